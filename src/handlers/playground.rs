use std::sync::Arc;

use crate::error::EstimateError;
use crate::handlers::estimate::call_model;
use crate::models::{GenerateResponse, MealSummaryResponse, SamplingPreset, TokenUsage};
use crate::services::TextGenerator;

/// Free-form prompting with the named sampling presets, plus the
/// template-based meal summary.
pub struct PromptPlayground {
    generator: Arc<dyn TextGenerator>,
}

/// Dynamic prompt: the meal description is embedded in the instructions.
pub fn meal_summary_prompt(meal: &str) -> String {
    format!(
        "\nYou are a nutrition assistant.\n\
         The user will provide a meal description, and you must estimate the total calories clearly.\n\
         User input: {}\n\
         Respond with: 'Your meal has approximately X calories.'\n",
        meal
    )
}

impl PromptPlayground {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub async fn generate(
        &self,
        prompt: &str,
        preset: Option<&str>,
    ) -> Result<GenerateResponse, EstimateError> {
        if prompt.trim().is_empty() {
            return Err(EstimateError::InvalidRequest(
                "`prompt` required in request body".to_string(),
            ));
        }

        let preset = match preset {
            None => SamplingPreset::ZeroShot,
            Some(name) => SamplingPreset::from_string(name).ok_or_else(|| {
                EstimateError::InvalidRequest(format!(
                    "unknown preset '{}' (expected temperature, top_k, top_p, zero_shot or structured)",
                    name
                ))
            })?,
        };

        let config = preset.config();
        let reply = call_model(self.generator.as_ref(), prompt, &config).await?;
        let usage = TokenUsage::approximate(prompt, &reply.text);

        log::info!(
            "🎛️ preset={} elapsed={:.2}s approximate_tokens_in={} out={} total={}",
            preset,
            reply.elapsed.as_secs_f64(),
            usage.input_tokens,
            usage.output_tokens,
            usage.total_tokens
        );

        Ok(GenerateResponse {
            text: reply.text,
            preset: preset.to_string(),
            elapsed_ms: reply.elapsed.as_millis() as u64,
            usage,
        })
    }

    pub async fn meal_summary(&self, meal: &str) -> Result<MealSummaryResponse, EstimateError> {
        if meal.trim().is_empty() {
            return Err(EstimateError::InvalidRequest(
                "`text` required in request body".to_string(),
            ));
        }

        let prompt = meal_summary_prompt(meal.trim());
        let config = SamplingPreset::ZeroShot.config();
        let reply = call_model(self.generator.as_ref(), &prompt, &config).await?;
        log::info!("🍽️ Meal summary in {:.2}s", reply.elapsed.as_secs_f64());

        Ok(MealSummaryResponse {
            reply: reply.text.trim().to_string(),
        })
    }
}

use serde::{Deserialize, Serialize};

/// One food item in a structured estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    pub quantity: String,  // free text as the model wrote it ("2", "1 cup")
    pub calories: f64,
    pub note: Option<String>,
}

/// Validated calorie estimate returned by `/structured-estimate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredEstimate {
    pub total_calories: f64,
    pub items: Vec<Item>,
    pub confidence: f64,  // 0.0 - 1.0
    pub explanation: String,
}

/// Sampling parameters sent along with a prompt. `None` means provider default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GenerationConfig {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub max_output_tokens: Option<u32>,
}

impl GenerationConfig {
    /// Greedy decoding keeps the JSON formatting stable between calls.
    pub const STRUCTURED: GenerationConfig = GenerationConfig {
        temperature: Some(0.0),
        top_p: Some(0.95),
        top_k: None,
        max_output_tokens: Some(450),
    };
}

/// Named sampling setups for the `/generate` playground.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingPreset {
    Temperature,
    TopK,
    TopP,
    ZeroShot,
    Structured,
}

impl std::fmt::Display for SamplingPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SamplingPreset::Temperature => "temperature",
            SamplingPreset::TopK => "top_k",
            SamplingPreset::TopP => "top_p",
            SamplingPreset::ZeroShot => "zero_shot",
            SamplingPreset::Structured => "structured",
        };
        write!(f, "{}", s)
    }
}

impl SamplingPreset {
    pub fn from_string(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace('-', "_");

        match normalized.as_str() {
            "temperature" => Some(SamplingPreset::Temperature),
            "top_k" | "topk" => Some(SamplingPreset::TopK),
            "top_p" | "topp" => Some(SamplingPreset::TopP),
            "zero_shot" | "zeroshot" => Some(SamplingPreset::ZeroShot),
            "structured" => Some(SamplingPreset::Structured),
            _ => None,
        }
    }

    pub fn config(&self) -> GenerationConfig {
        match self {
            SamplingPreset::Temperature => GenerationConfig {
                temperature: Some(0.9),
                top_p: Some(1.0),
                top_k: None,
                max_output_tokens: Some(150),
            },
            SamplingPreset::TopK => GenerationConfig {
                temperature: Some(0.8),
                top_p: Some(1.0),
                top_k: Some(40),
                max_output_tokens: Some(150),
            },
            SamplingPreset::TopP => GenerationConfig {
                temperature: Some(0.7),
                top_p: Some(0.3),
                top_k: None,
                max_output_tokens: Some(150),
            },
            SamplingPreset::ZeroShot => GenerationConfig::default(),
            SamplingPreset::Structured => GenerationConfig::STRUCTURED,
        }
    }
}

/// Whitespace-split token estimate; good enough for logs, not for billing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

impl TokenUsage {
    pub fn approximate(input: &str, output: &str) -> Self {
        let input_tokens = approx_token_count(input);
        let output_tokens = approx_token_count(output);
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

pub fn approx_token_count(text: &str) -> usize {
    text.split_whitespace().count()
}

// Request / response bodies

#[derive(Debug, Clone, Deserialize)]
pub struct EstimateRequest {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: String,
    pub preset: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateResponse {
    pub text: String,
    pub preset: String,
    pub elapsed_ms: u64,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Serialize)]
pub struct MealSummaryResponse {
    pub reply: String,
}

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{EstimateError, FieldError};
use crate::models::{GenerationConfig, Item, StructuredEstimate, TokenUsage};
use crate::services::TextGenerator;

/// Instruction block sent ahead of every meal description.
pub const SYSTEM_PROMPT: &str = r#"
You are a nutrition assistant. The user will provide a meal description.
Return ONLY valid JSON that exactly matches the schema described below (no explanation).
Schema:
{
  "total_calories": number,
  "items": [
    { "name": string, "quantity": string, "calories": number, "note": string|null }
  ],
  "confidence": number,        // between 0.0 and 1.0
  "explanation": string        // one-sentence summary
}
If uncertain about exact calories, estimate and lower the confidence. Use metric/US units inferred
from the user's text. Keep explanation to one short sentence.
"#;

pub const PROMPT_SEPARATOR: &str = "\n\n";
pub const USER_PREFIX: &str = "Estimate calories for: ";

/// Compose the outbound prompt. Callers reject blank text before getting here.
pub fn build_prompt(user_text: &str) -> String {
    format!("{}{}{}{}", SYSTEM_PROMPT, PROMPT_SEPARATOR, USER_PREFIX, user_text)
}

/// Raw model text plus how long the call took.
#[derive(Debug, Clone)]
pub struct ModelReply {
    pub text: String,
    pub elapsed: Duration,
}

/// Send one prompt, timing the round trip. No retries.
pub async fn call_model(
    generator: &dyn TextGenerator,
    prompt: &str,
    config: &GenerationConfig,
) -> Result<ModelReply, EstimateError> {
    let start = Instant::now();
    let text = generator
        .generate(prompt, config)
        .await
        .map_err(EstimateError::ModelCall)?;

    Ok(ModelReply {
        text,
        elapsed: start.elapsed(),
    })
}

/// Slice from the first `{` to the last `}` of the trimmed reply.
///
/// Braces inside string values are not tokenized, so a reply whose prose
/// contains stray braces can produce a wrong span. That case surfaces later
/// as a parse or validation error.
pub fn extract_json(reply: &str) -> Result<&str, EstimateError> {
    let text = reply.trim();

    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => Ok(&text[start..=end]),
        _ => Err(EstimateError::NoJsonFound {
            raw: text.to_string(),
        }),
    }
}

/// Drop a comma sitting directly before `}` or `]`.
pub fn repair_trailing_commas(candidate: &str) -> String {
    candidate.replace(",}", "}").replace(",]", "]")
}

/// Strict parse, then at most one repaired reparse.
pub fn parse_with_repair(candidate: &str, raw: &str) -> Result<Value, EstimateError> {
    match serde_json::from_str(candidate) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            log::warn!("⚠️ Model JSON did not parse ({}), trying trailing-comma repair", first_err);
            let cleaned = repair_trailing_commas(candidate);
            serde_json::from_str(&cleaned).map_err(|source| EstimateError::MalformedModelOutput {
                source,
                raw: raw.to_string(),
            })
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn field_number(
    obj: &Map<String, Value>,
    prefix: &str,
    key: &str,
    errors: &mut Vec<FieldError>,
) -> Option<f64> {
    let path = join_path(prefix, key);
    match obj.get(key) {
        None => {
            errors.push(FieldError::new(path, "field required"));
            None
        }
        Some(value) => match value.as_f64() {
            Some(n) => Some(n),
            None => {
                errors.push(FieldError::new(
                    path,
                    format!("expected number, got {}", type_name(value)),
                ));
                None
            }
        },
    }
}

fn field_non_negative(
    obj: &Map<String, Value>,
    prefix: &str,
    key: &str,
    errors: &mut Vec<FieldError>,
) -> Option<f64> {
    let n = field_number(obj, prefix, key, errors)?;
    if n < 0.0 {
        errors.push(FieldError::new(
            join_path(prefix, key),
            format!("must be non-negative, got {}", n),
        ));
        return None;
    }
    Some(n)
}

fn field_string(
    obj: &Map<String, Value>,
    prefix: &str,
    key: &str,
    errors: &mut Vec<FieldError>,
) -> Option<String> {
    let path = join_path(prefix, key);
    match obj.get(key) {
        None => {
            errors.push(FieldError::new(path, "field required"));
            None
        }
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            errors.push(FieldError::new(
                path,
                format!("expected string, got {}", type_name(other)),
            ));
            None
        }
    }
}

fn validate_item(value: &Value, prefix: &str, errors: &mut Vec<FieldError>) -> Option<Item> {
    let obj = match value.as_object() {
        Some(obj) => obj,
        None => {
            errors.push(FieldError::new(
                prefix,
                format!("expected object, got {}", type_name(value)),
            ));
            return None;
        }
    };

    let name = field_string(obj, prefix, "name", errors);
    let quantity = field_string(obj, prefix, "quantity", errors);
    let calories = field_non_negative(obj, prefix, "calories", errors);
    let note = match obj.get("note") {
        None | Some(Value::Null) => Some(None),
        Some(Value::String(s)) => Some(Some(s.clone())),
        Some(other) => {
            errors.push(FieldError::new(
                join_path(prefix, "note"),
                format!("expected string or null, got {}", type_name(other)),
            ));
            None
        }
    };

    Some(Item {
        name: name?,
        quantity: quantity?,
        calories: calories?,
        note: note?,
    })
}

/// Check a parsed reply against the estimate shape, collecting every field error.
pub fn validate_estimate(value: &Value) -> Result<StructuredEstimate, Vec<FieldError>> {
    let mut errors = Vec::new();

    let obj = match value.as_object() {
        Some(obj) => obj,
        None => {
            return Err(vec![FieldError::new(
                "$",
                format!("expected object, got {}", type_name(value)),
            )])
        }
    };

    let total_calories = field_non_negative(obj, "", "total_calories", &mut errors);

    let items = match obj.get("items") {
        None => {
            errors.push(FieldError::new("items", "field required"));
            None
        }
        Some(Value::Array(raw_items)) => {
            let mut items = Vec::with_capacity(raw_items.len());
            for (i, raw_item) in raw_items.iter().enumerate() {
                if let Some(item) = validate_item(raw_item, &format!("items.{}", i), &mut errors) {
                    items.push(item);
                }
            }
            Some(items)
        }
        Some(other) => {
            errors.push(FieldError::new(
                "items",
                format!("expected array, got {}", type_name(other)),
            ));
            None
        }
    };

    let confidence = match field_number(obj, "", "confidence", &mut errors) {
        Some(c) if (0.0..=1.0).contains(&c) => Some(c),
        Some(c) => {
            errors.push(FieldError::new(
                "confidence",
                format!("must be between 0.0 and 1.0, got {}", c),
            ));
            None
        }
        None => None,
    };

    let explanation = field_string(obj, "", "explanation", &mut errors);

    if !errors.is_empty() {
        return Err(errors);
    }

    match (total_calories, items, confidence, explanation) {
        (Some(total_calories), Some(items), Some(confidence), Some(explanation)) => {
            Ok(StructuredEstimate {
                total_calories,
                items,
                confidence,
                explanation,
            })
        }
        // Every None above pushed an error, so this arm is unreachable in practice.
        _ => Err(vec![FieldError::new("$", "incomplete estimate")]),
    }
}

/// Runs prompt -> model -> extraction -> repair -> validation for one request.
pub struct StructuredEstimator {
    generator: Arc<dyn TextGenerator>,
    config: GenerationConfig,
}

impl StructuredEstimator {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            config: GenerationConfig::STRUCTURED,
        }
    }

    pub async fn estimate(&self, text: &str) -> Result<StructuredEstimate, EstimateError> {
        if text.trim().is_empty() {
            return Err(EstimateError::InvalidRequest(
                "`text` required in request body".to_string(),
            ));
        }

        let prompt = build_prompt(text);
        let reply = call_model(self.generator.as_ref(), &prompt, &self.config).await?;

        let usage = TokenUsage::approximate(&prompt, &reply.text);
        log::info!(
            "📊 model={} elapsed={:.2}s approximate_tokens_in={} out={} total={}",
            self.generator.model_name(),
            reply.elapsed.as_secs_f64(),
            usage.input_tokens,
            usage.output_tokens,
            usage.total_tokens
        );

        let raw = reply.text.trim();
        let candidate = extract_json(raw)?;
        let data = parse_with_repair(candidate, raw)?;

        validate_estimate(&data).map_err(|errors| EstimateError::SchemaValidation { errors, raw: data })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Generator that returns a canned reply (or error) and records the last prompt.
    pub(crate) struct StubGenerator {
        pub reply: Result<String, String>,
        pub last_prompt: std::sync::Mutex<Option<String>>,
    }

    impl StubGenerator {
        pub(crate) fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                last_prompt: std::sync::Mutex::new(None),
            }
        }

        pub(crate) fn failing(message: &str) -> Self {
            Self {
                reply: Err(message.to_string()),
                last_prompt: std::sync::Mutex::new(None),
            }
        }
    }

    #[async_trait::async_trait]
    impl TextGenerator for StubGenerator {
        fn model_name(&self) -> &str {
            "stub-model"
        }

        async fn generate(&self, prompt: &str, _config: &GenerationConfig) -> anyhow::Result<String> {
            *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(message) => Err(anyhow::anyhow!(message.clone())),
            }
        }
    }

    fn valid_estimate() -> Value {
        json!({
            "total_calories": 220,
            "items": [
                {"name": "boiled egg", "quantity": "2", "calories": 140, "note": null},
                {"name": "bread slice", "quantity": "1", "calories": 80, "note": null}
            ],
            "confidence": 0.7,
            "explanation": "Estimated from typical values."
        })
    }

    #[test]
    fn test_build_prompt_keeps_instructions_and_appends_text() {
        let prompt = build_prompt("2 boiled eggs");
        assert!(prompt.starts_with(SYSTEM_PROMPT));
        assert!(prompt.ends_with("Estimate calories for: 2 boiled eggs"));
    }

    #[test]
    fn test_extract_json_with_surrounding_prose() {
        let reply = "Sure! Here it is:\n{\"a\": {\"b\": 1}}\nHope that helps.";
        assert_eq!(extract_json(reply).unwrap(), "{\"a\": {\"b\": 1}}");
    }

    #[test]
    fn test_extract_json_with_code_fence() {
        let reply = "```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json(reply).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_without_braces() {
        assert!(matches!(
            extract_json("About 300 calories."),
            Err(EstimateError::NoJsonFound { .. })
        ));
        assert!(matches!(
            extract_json("only an opening { here"),
            Err(EstimateError::NoJsonFound { .. })
        ));
        assert!(matches!(
            extract_json("closing } before opening {"),
            Err(EstimateError::NoJsonFound { .. })
        ));
    }

    #[test]
    fn test_repair_trailing_commas() {
        let value = parse_with_repair("{\"a\":1,}", "{\"a\":1,}").unwrap();
        assert_eq!(value, json!({"a": 1}));

        let value = parse_with_repair("{\"a\":1,\"b\":2,}", "raw").unwrap();
        assert_eq!(value, json!({"a": 1, "b": 2}));

        let value = parse_with_repair("{\"a\":[1,2,],}", "raw").unwrap();
        assert_eq!(value, json!({"a": [1, 2]}));
    }

    #[test]
    fn test_repair_gives_up_after_one_pass() {
        let err = parse_with_repair("{'a': 1}", "model said {'a': 1}").unwrap_err();
        match err {
            EstimateError::MalformedModelOutput { raw, .. } => {
                assert_eq!(raw, "model said {'a': 1}");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_validate_confidence_range() {
        let mut value = valid_estimate();
        value["confidence"] = json!(1.5);
        let errors = validate_estimate(&value).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "confidence");

        value["confidence"] = json!(0.5);
        assert_eq!(validate_estimate(&value).unwrap().confidence, 0.5);
    }

    #[test]
    fn test_validate_items_required_but_may_be_empty() {
        let mut value = valid_estimate();
        value.as_object_mut().unwrap().remove("items");
        let errors = validate_estimate(&value).unwrap_err();
        assert_eq!(errors, vec![FieldError::new("items", "field required")]);

        value["items"] = json!([]);
        let estimate = validate_estimate(&value).unwrap();
        assert!(estimate.items.is_empty());
    }

    #[test]
    fn test_validate_collects_item_errors() {
        let value = json!({
            "total_calories": "lots",
            "items": [
                {"name": "egg", "quantity": 2, "calories": -5},
                "toast"
            ],
            "confidence": 0.4
        });

        let errors = validate_estimate(&value).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "total_calories",
                "items.0.quantity",
                "items.0.calories",
                "items.1",
                "explanation"
            ]
        );
    }

    #[test]
    fn test_validate_rejects_non_object() {
        let errors = validate_estimate(&json!([1, 2])).unwrap_err();
        assert_eq!(errors[0].field, "$");
    }

    #[test]
    fn test_validate_keeps_item_order_and_notes() {
        let mut value = valid_estimate();
        value["items"][1]["note"] = json!("whole wheat");
        let estimate = validate_estimate(&value).unwrap();

        assert_eq!(estimate.total_calories, 220.0);
        assert_eq!(estimate.items[0].name, "boiled egg");
        assert_eq!(estimate.items[0].note, None);
        assert_eq!(estimate.items[1].note.as_deref(), Some("whole wheat"));
    }

    #[tokio::test]
    async fn test_estimate_end_to_end_with_prose_and_trailing_comma() {
        let reply = "Here you go:\n{\"total_calories\": 95, \"items\": [{\"name\": \"apple\", \"quantity\": \"1\", \"calories\": 95,},], \"confidence\": 0.9, \"explanation\": \"One medium apple.\",}";
        let stub = Arc::new(StubGenerator::replying(reply));
        let estimator = StructuredEstimator::new(stub.clone());

        let estimate = estimator.estimate("an apple").await.unwrap();
        assert_eq!(estimate.total_calories, 95.0);
        assert_eq!(estimate.items.len(), 1);

        let prompt = stub.last_prompt.lock().unwrap().clone().unwrap();
        assert!(prompt.ends_with("Estimate calories for: an apple"));
    }

    #[tokio::test]
    async fn test_estimate_rejects_blank_text_without_calling_model() {
        let stub = Arc::new(StubGenerator::replying("{}"));
        let estimator = StructuredEstimator::new(stub.clone());

        let err = estimator.estimate("   \n").await.unwrap_err();
        assert!(err.is_client_error());
        assert!(stub.last_prompt.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_estimate_propagates_model_failure() {
        let estimator = StructuredEstimator::new(Arc::new(StubGenerator::failing("quota exceeded")));

        let err = estimator.estimate("soup").await.unwrap_err();
        assert!(matches!(err, EstimateError::ModelCall(_)));
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_estimate_reports_schema_errors_with_raw_object() {
        let stub = Arc::new(StubGenerator::replying("{\"total_calories\": 10, \"items\": [], \"confidence\": 2, \"explanation\": \"x\"}"));
        let estimator = StructuredEstimator::new(stub);

        match estimator.estimate("gum").await.unwrap_err() {
            EstimateError::SchemaValidation { errors, raw } => {
                assert_eq!(errors[0].field, "confidence");
                assert_eq!(raw["total_calories"], 10);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}

//! Backend-agnostic model interface.
//!
//! Every backend exposes the same two capabilities. Clients make exactly one
//! request per call and never retry; wrap calls in
//! [`retry_call`](crate::invoke::retry_call) for that.

use crate::client::Schema;
use crate::models::{Result, SensemakeError};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Default number of records per categorization prompt.
pub const DEFAULT_CATEGORIZATION_BATCH_SIZE: usize = 100;

/// Text-generation backend contract.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Endpoint name for logging.
    fn name(&self) -> &str;

    /// Records per categorization prompt that this model handles well.
    fn categorization_batch_size(&self) -> usize {
        DEFAULT_CATEGORIZATION_BATCH_SIZE
    }

    /// Generate free text for `prompt`.
    async fn generate_text(&self, prompt: &str) -> Result<String>;

    /// Generate JSON constrained by `schema`.
    ///
    /// Fails with `SensemakeError::Parse` carrying the raw text when the
    /// backend's answer is not valid JSON.
    async fn generate_structured_data(&self, prompt: &str, schema: &Schema) -> Result<Value>;
}

/// Generate a value of type `T`, deriving the schema from `T`.
///
/// JSON that does not fit `T` is reported as a parse error so callers can
/// treat it like any other malformed output.
pub async fn generate_data<T>(model: &dyn ModelClient, prompt: &str) -> Result<T>
where
    T: DeserializeOwned + JsonSchema,
{
    let schema = Schema::for_type::<T>()?;
    let value = model.generate_structured_data(prompt, &schema).await?;
    serde_json::from_value::<T>(value.clone()).map_err(|e| {
        SensemakeError::parse(
            format!("Response does not match schema '{}': {e}", schema.name()),
            value.to_string(),
        )
    })
}

/// Parse backend text as JSON, keeping the text on failure.
pub(crate) fn parse_json_text(text: &str) -> Result<Value> {
    serde_json::from_str(text.trim())
        .map_err(|e| SensemakeError::parse(format!("Response is not valid JSON: {e}"), text))
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedModel;
    use super::*;
    use crate::models::{PartialRecord, Topic};

    #[test]
    fn test_parse_json_text_keeps_raw_on_failure() {
        let err = parse_json_text("Sure! Here is your JSON:").unwrap_err();
        assert_eq!(err.raw_output(), Some("Sure! Here is your JSON:"));
        assert_eq!(parse_json_text(" [1, 2] \n").unwrap(), serde_json::json!([1, 2]));
    }

    #[tokio::test]
    async fn test_generate_data_deserializes_typed_value() {
        let model = ScriptedModel::new(vec![Ok(
            r#"[{"id": "1", "topics": [{"name": "Safety"}]}]"#.to_string(),
        )]);
        let partials: Vec<PartialRecord> = generate_data(&model, "categorize").await.unwrap();
        assert_eq!(partials, vec![PartialRecord::new("1", vec![Topic::new("Safety")])]);
    }

    #[tokio::test]
    async fn test_generate_data_reports_shape_mismatch_as_parse_error() {
        let model = ScriptedModel::new(vec![Ok(r#"{"unexpected": true}"#.to_string())]);
        let err = generate_data::<Vec<PartialRecord>>(&model, "categorize")
            .await
            .unwrap_err();
        assert!(matches!(err, SensemakeError::Parse { .. }));
        assert!(err.raw_output().unwrap().contains("unexpected"));
    }
}

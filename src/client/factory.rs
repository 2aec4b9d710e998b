//! Builds the configured model client.

use crate::client::{ModelClient, OllamaModel, OpenAiCompatModel};
use crate::models::{Backend, Config, Result};
use std::sync::Arc;
use tracing::info;

/// Create the model client described by `config.model`.
///
/// # Errors
///
/// Returns `ConfigError::MissingApiKey` if an API key env var is named but
/// not set, and `ConfigError::Invalid` if the config fails validation.
pub fn build_model(config: &Config) -> Result<Arc<dyn ModelClient>> {
    config.validate()?;
    let api_key = config.model.resolve_api_key()?;

    let mut model_config = config.model.clone();
    model_config.categorization_batch_size = config.effective_batch_size();

    let client: Arc<dyn ModelClient> = match model_config.backend {
        Backend::Ollama => Arc::new(OllamaModel::new(&model_config, api_key)?),
        Backend::OpenAi => {
            if api_key.is_none() {
                info!(base_url = %model_config.base_url, "No API key configured; sending unauthenticated requests");
            }
            Arc::new(OpenAiCompatModel::new(&model_config, api_key)?)
        }
    };

    info!(
        endpoint = client.name(),
        backend = %model_config.backend,
        batch_size = client.categorization_batch_size(),
        "Model client ready"
    );
    Ok(client)
}

//! Provider construction from the `provider:model` config spec.

use std::sync::Arc;

use cleverchatty_core::config::CleverChattyConfig;

use crate::anthropic::AnthropicProvider;
use crate::google::GoogleProvider;
use crate::mock::MockProvider;
use crate::ollama::OllamaProvider;
use crate::openai::OpenAiProvider;
use crate::provider::{Provider, ProviderError};

/// Resolve the configured provider. The model spec splits on the first
/// colon only, so model ids containing colons survive intact.
pub fn build_provider(config: &CleverChattyConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let (vendor, _model) = config.model.split_once(':').ok_or_else(|| {
        ProviderError::UnsupportedProvider(format!(
            "model '{}' is not in provider:model form",
            config.model
        ))
    })?;

    match vendor {
        "anthropic" => {
            let creds = config.providers.anthropic.as_ref().ok_or(
                ProviderError::MissingCredentials {
                    vendor: "anthropic".to_string(),
                },
            )?;
            Ok(Arc::new(AnthropicProvider::new(
                creds.api_key.clone(),
                creds.base_url.clone(),
            )))
        }
        "openai" => {
            let creds =
                config
                    .providers
                    .openai
                    .as_ref()
                    .ok_or(ProviderError::MissingCredentials {
                        vendor: "openai".to_string(),
                    })?;
            Ok(Arc::new(OpenAiProvider::new(
                creds.api_key.clone(),
                creds.base_url.clone(),
            )))
        }
        "ollama" => {
            let base_url = config
                .providers
                .ollama
                .as_ref()
                .map(|c| c.base_url.clone())
                .unwrap_or_else(|| "http://localhost:11434".to_string());
            Ok(Arc::new(OllamaProvider::new(base_url)))
        }
        "google" => {
            let creds =
                config
                    .providers
                    .google
                    .as_ref()
                    .ok_or(ProviderError::MissingCredentials {
                        vendor: "google".to_string(),
                    })?;
            Ok(Arc::new(GoogleProvider::new(
                creds.api_key.clone(),
                creds.base_url.clone(),
            )))
        }
        "mock" => Ok(Arc::new(MockProvider)),
        other => Err(ProviderError::UnsupportedProvider(other.to_string())),
    }
}

/// The model half of the configured `provider:model` spec.
pub fn model_name(config: &CleverChattyConfig) -> String {
    config
        .model
        .split_once(':')
        .map(|(_, m)| m.to_string())
        .unwrap_or_else(|| config.model.clone())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use cleverchatty_core::config::*;

    use super::*;

    fn config_for(model: &str) -> CleverChattyConfig {
        CleverChattyConfig {
            agent_id: "test".to_string(),
            model: model.to_string(),
            system_instruction: String::new(),
            message_window: 10,
            log_file_path: String::new(),
            debug_mode: false,
            providers: ProvidersConfig::default(),
            server: ServerSettings::default(),
            rag_settings: RagSettings::default(),
            a2a_settings: A2aSettings::default(),
            reverse_mcp_settings: ReverseMcpSettings::default(),
            tools_servers: HashMap::new(),
        }
    }

    #[test]
    fn mock_provider_needs_no_credentials() {
        let provider = build_provider(&config_for("mock:mock")).unwrap();
        assert_eq!(provider.name(), "mock");
    }

    #[test]
    fn unknown_vendor_is_rejected() {
        let err = build_provider(&config_for("nonsense:model")).unwrap_err();
        assert!(matches!(err, ProviderError::UnsupportedProvider(_)));
    }

    #[test]
    fn anthropic_without_credentials_is_rejected() {
        let err = build_provider(&config_for("anthropic:claude-sonnet-4-6")).unwrap_err();
        assert!(matches!(err, ProviderError::MissingCredentials { .. }));
    }

    #[test]
    fn model_name_preserves_colons_after_the_first() {
        assert_eq!(model_name(&config_for("openai:ft:gpt-4o")), "ft:gpt-4o");
    }
}

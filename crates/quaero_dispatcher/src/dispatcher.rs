//! Single entry point that routes a provider-agnostic `ContentRequest`
//! to the right backend, applying retry and key resolution along the
//! way.

use std::sync::Arc;
use std::time::Duration;

use quaero_protocol::store::KvStore;
use quaero_protocol::{ChatMessage, ContentRequest, ContentResponse, Provider, ProtocolError};
use quaero_retry::{with_retry, CancellationToken, RetryConfig, RetryError};
use tokio::sync::OnceCell;

use crate::detect::{detect_provider, normalize_model};
use crate::keys::KeyResolver;

#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

pub struct DispatcherConfig {
    pub default_provider: Provider,
    pub claude: ProviderSettings,
    pub gemini: ProviderSettings,
    pub retry: RetryConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_provider: Provider::Claude,
            claude: ProviderSettings::default(),
            gemini: ProviderSettings::default(),
            retry: RetryConfig::default(),
        }
    }
}

pub struct Dispatcher {
    config: DispatcherConfig,
    key_resolver: KeyResolver,
    client: OnceCell<reqwest::Client>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, kv: Arc<dyn KvStore>) -> Self {
        Self {
            config,
            key_resolver: KeyResolver::new(kv),
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> &reqwest::Client {
        self.client.get_or_init(|| async { reqwest::Client::new() }).await
    }

    fn resolve_model(&self, provider: Provider, requested: &str) -> String {
        let normalized = normalize_model(requested);
        if !normalized.is_empty() {
            return normalized.to_string();
        }
        let configured = match provider {
            Provider::Claude => self.config.claude.model.as_deref(),
            Provider::Gemini => self.config.gemini.model.as_deref(),
            Provider::Local => None,
        };
        configured
            .map(str::to_string)
            .unwrap_or_else(|| quaero_protocol::defaults::default_model(&provider.to_string()).to_string())
    }

    async fn resolve_key(&self, provider: Provider) -> Result<String, ProtocolError> {
        let (key_name, fallback) = match provider {
            Provider::Claude => ("claude_api_key", self.config.claude.api_key.as_deref()),
            Provider::Gemini => ("gemini_api_key", self.config.gemini.api_key.as_deref()),
            Provider::Local => return Ok(String::new()),
        };
        self.key_resolver.resolve(provider, key_name, fallback).await
    }

    pub async fn generate(
        &self,
        mut request: ContentRequest,
        cancel: &CancellationToken,
    ) -> Result<ContentResponse, ProtocolError> {
        request
            .validate()
            .map_err(ProtocolError::ConfigInvalid)?;

        let provider = detect_provider(&request.model, self.config.default_provider);
        request.model = self.resolve_model(provider, &request.model);
        let api_key = self.resolve_key(provider).await?;
        let client = self.client().await.clone();

        let result = with_retry(&self.config.retry, cancel, |_attempt| {
            let client = client.clone();
            let api_key = api_key.clone();
            let request = request.clone();
            async move {
                match provider {
                    Provider::Claude => crate::claude::call(&client, &api_key, &request).await,
                    Provider::Gemini => crate::gemini::call(&client, &api_key, &request).await,
                    Provider::Local => Err("local provider must be dispatched through quaero_inference".to_string()),
                }
            }
        })
        .await;

        match result {
            Ok(response) => Ok(response),
            Err(RetryError::Cancelled) => Err(ProtocolError::Cancelled("generate cancelled".to_string())),
            Err(RetryError::Inner(message)) => Err(classify_provider_error(message)),
        }
    }

    /// Minimal round-trip used to verify a provider is reachable and the
    /// configured API key is valid.
    pub async fn health_check(&self, provider: Provider) -> Result<(), ProtocolError> {
        let request = ContentRequest::new(
            quaero_protocol::defaults::default_model(&provider.to_string()),
            vec![ChatMessage::user("ping")],
        );
        let cancel = CancellationToken::new();
        let response = self.generate(request, &cancel).await?;
        if response.text.trim().is_empty() {
            return Err(ProtocolError::ProviderTransient("health check returned empty text".to_string()));
        }
        Ok(())
    }

    pub async fn generate_with_timeout(
        &self,
        request: ContentRequest,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<ContentResponse, ProtocolError> {
        tokio::select! {
            result = self.generate(request, cancel) => result,
            _ = tokio::time::sleep(timeout) => Err(ProtocolError::DependencyTimeout(format!("generate exceeded {timeout:?}"))),
            _ = cancel.cancelled() => Err(ProtocolError::Cancelled("generate cancelled during timeout wait".to_string())),
        }
    }
}

fn classify_provider_error(message: String) -> ProtocolError {
    if quaero_retry::is_quota_exhausted(&message) {
        ProtocolError::ProviderQuotaExhausted(message)
    } else if quaero_retry::is_rate_limit(&message) {
        ProtocolError::ProviderRateLimited(message)
    } else {
        ProtocolError::ProviderTransient(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct EmptyKv;

    #[async_trait]
    impl KvStore for EmptyKv {
        async fn get(&self, _key: &str) -> Result<Option<String>, ProtocolError> {
            Ok(None)
        }
        async fn set(&self, _key: &str, _value: &str) -> Result<(), ProtocolError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn generate_fails_config_invalid_for_empty_messages() {
        let config = DispatcherConfig::default();
        let dispatcher = Dispatcher::new(config, Arc::new(EmptyKv));
        let request = ContentRequest::new("claude-sonnet-4-20250514", vec![]);
        let cancel = CancellationToken::new();
        let err = dispatcher.generate(request, &cancel).await.unwrap_err();
        assert!(matches!(err, ProtocolError::ConfigInvalid(_)));
    }

    #[tokio::test]
    async fn generate_fails_with_missing_key_before_any_network_call() {
        let config = DispatcherConfig::default();
        let dispatcher = Dispatcher::new(config, Arc::new(EmptyKv));
        let request = ContentRequest::new("claude-sonnet-4-20250514", vec![ChatMessage::user("hi")]);
        let cancel = CancellationToken::new();
        let err = dispatcher.generate(request, &cancel).await.unwrap_err();
        assert!(matches!(err, ProtocolError::ConfigInvalid(_)));
    }

    #[test]
    fn resolve_model_falls_back_to_provider_default_when_empty() {
        let config = DispatcherConfig::default();
        let dispatcher = Dispatcher::new(config, Arc::new(EmptyKv));
        let model = dispatcher.resolve_model(Provider::Gemini, "");
        assert_eq!(model, quaero_protocol::defaults::default_model("gemini"));
    }
}

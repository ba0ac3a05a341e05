//! API-key resolution: KV store first, falling back to a caller-supplied
//! config value. Resolved keys are cached per provider so a KV lookup
//! only happens once per process.

use std::collections::HashMap;
use std::sync::Arc;

use quaero_protocol::store::KvStore;
use quaero_protocol::{Provider, ProtocolError};
use tokio::sync::Mutex;

pub struct KeyResolver {
    kv: Arc<dyn KvStore>,
    cache: Mutex<HashMap<Provider, String>>,
}

impl KeyResolver {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn resolve(
        &self,
        provider: Provider,
        key_name: &str,
        config_fallback: Option<&str>,
    ) -> Result<String, ProtocolError> {
        if let Some(cached) = self.cache.lock().await.get(&provider) {
            return Ok(cached.clone());
        }

        let resolved = match self.kv.get(key_name).await? {
            Some(key) if !key.is_empty() => key,
            _ => match config_fallback {
                Some(fallback) if !fallback.is_empty() => fallback.to_string(),
                _ => {
                    return Err(ProtocolError::ConfigInvalid(format!(
                        "no API key available for provider '{provider}' (key name '{key_name}')"
                    )))
                }
            },
        };

        self.cache.lock().await.insert(provider, resolved.clone());
        Ok(resolved)
    }
}

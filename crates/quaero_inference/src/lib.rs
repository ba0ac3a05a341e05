//! Local inference subprocess management: binary discovery, an
//! embedding server lifecycle, and one-shot chat invocation — all
//! strictly loopback-only.

pub mod binary_discovery;
pub mod chat;
pub mod embed;
mod error;
pub mod http_guard;

pub use error::InferenceError;

use std::path::PathBuf;

use quaero_protocol::ChatMessage;

use crate::embed::{EmbedConfig, EmbedManager};

/// Facade over the embedding server and the one-shot chat path, with a
/// mock switch so tests and CI can exercise callers without shipping a
/// model.
pub struct LocalInferenceManager {
    mock: bool,
    binary_path: Option<PathBuf>,
    model_path: PathBuf,
    embedder: EmbedManager,
}

impl LocalInferenceManager {
    pub fn new(binary_name: &str, binary_dir: Option<PathBuf>, model_path: PathBuf, mock: bool) -> Result<Self, InferenceError> {
        let binary_path = if mock {
            None
        } else {
            Some(binary_discovery::find_binary(binary_name, binary_dir.as_deref())?)
        };

        let embedder = EmbedManager::new(EmbedConfig {
            binary_dir,
            binary_name: binary_name.to_string(),
            model_path: model_path.clone(),
            ..EmbedConfig::default()
        });

        Ok(Self {
            mock,
            binary_path,
            model_path,
            embedder,
        })
    }

    pub async fn start(&self) -> Result<(), InferenceError> {
        if self.mock {
            return Ok(());
        }
        let binary_path = self.binary_path.as_ref().expect("binary resolved at construction");
        self.embedder.start(binary_path).await
    }

    pub async fn close(&self) {
        if !self.mock {
            self.embedder.close().await;
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, InferenceError> {
        if self.mock {
            return Ok(embed::mock_embed(text));
        }
        self.embedder.embed(text).await
    }

    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<String, InferenceError> {
        if self.mock {
            return Ok(chat::mock_chat(messages));
        }
        let binary_path = self.binary_path.as_ref().expect("binary resolved at construction");
        chat::chat_once(binary_path, messages, &self.model_path).await
    }
}

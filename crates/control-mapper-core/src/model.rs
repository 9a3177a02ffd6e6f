//! Generative model interface.
//!
//! Prompt in, text out. A transient rate limit is reported separately from
//! every other failure. The HTTP client lives in the app crate.

use std::time::Duration;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The provider asked us to slow down. Retrying later may succeed.
    #[error("rate limited by model provider")]
    RateLimited {
        /// Provider-suggested wait, when it sent one.
        retry_after: Option<Duration>,
    },

    #[error("model call failed: {0}")]
    Failed(String),
}

impl ModelError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ModelError::RateLimited { .. })
    }
}

/// A text-completion model.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Model identifier, recorded in output metadata.
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, ModelError>;
}

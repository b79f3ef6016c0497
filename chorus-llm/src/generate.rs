//! The text-generation seam used by the turn loop.
//!
//! Anything that can turn a prompt into text implements [`Generate`]: the HTTP
//! [`LlmClient`], or a scripted stand-in in tests and benches.

use crate::client::LlmClient;
use crate::error::LlmError;
use crate::types::LlmRequest;

/// Prompt in, raw model text out.
#[allow(async_fn_in_trait)]
pub trait Generate {
    /// Generate raw text for `prompt`. Errors are the caller's to absorb.
    async fn generate_text(&self, prompt: &str) -> Result<String, LlmError>;
}

impl Generate for LlmClient {
    async fn generate_text(&self, prompt: &str) -> Result<String, LlmError> {
        let request = LlmRequest::new(prompt).with_options(self.options().clone());
        self.generate(&request).await.map(|response| response.text)
    }
}

impl<G: Generate + ?Sized> Generate for &G {
    async fn generate_text(&self, prompt: &str) -> Result<String, LlmError> {
        (**self).generate_text(prompt).await
    }
}

//! # chorus-llm: LLM Abstraction Layer for chorus
//!
//! Provides a unified interface for persona replies across backends:
//!   - **OpenAI-compatible API** (LM Studio, vLLM, llama.cpp server; default)
//!   - **Ollama** (local)
//!   - **None** (every call fails; the caller substitutes a placeholder)
//!
//! All model calls in chorus go through this crate, ensuring:
//!   - Timeout management
//!   - Retry on transport failure
//!   - A single [`Generate`] seam the turn loop can be tested against
//!
//! # Architecture
//!
//! ```text
//! prompt ──► Generate::generate_text ──► LlmClient::generate ──► HTTP
//!                                              │
//!                                              └──► LlmError (absorbed by the validator)
//! ```

pub mod client;
pub mod error;
pub mod generate;
pub mod types;

pub use client::{LlmClient, LlmProvider};
pub use error::LlmError;
pub use generate::Generate;
pub use types::{GenerationOptions, LlmRequest, LlmResponse};

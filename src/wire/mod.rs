//! Wire types for every dialect the relay speaks.
//!
//! [`openai`] is the caller-facing contract. [`deepseek`] covers the
//! chat-completions dialect spoken by DeepSeek and OpenRouter, [`ollama`] the
//! native Ollama `/api/chat` shape. These modules hold data only; translation
//! lives in [`crate::convert`] and the backend adapters.

pub mod deepseek;
pub mod ollama;
pub mod openai;

//! LLM Provider implementations for Taskloom.
//!
//! All providers implement the `taskloom_core::Provider` trait. The agent
//! talks to one OpenAI-compatible endpoint, typically a local llama.cpp
//! server holding a single conversational slot.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

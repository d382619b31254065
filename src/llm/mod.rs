// LLM abstraction layer

pub mod provider;
pub mod openai;

#[cfg(test)]
pub(crate) mod scripted;

pub use provider::*;

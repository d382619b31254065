use std::sync::Arc;

use async_trait::async_trait;
use crate::config::LLMConfig;
use crate::types::{AppError, AppResult, LLMProvider, LLMRequest, LLMResponse};

#[async_trait]
pub trait LLMAdapter: Send + Sync {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse>;
}

/// Configuration for an LLM provider handle
pub struct LLMProviderConfig {
    pub provider: LLMProvider,
    pub api_key: String,
    pub api_base: Option<String>,
}

#[derive(Clone)]
pub struct LLM {
    adapter: Arc<dyn LLMAdapter>,
    provider: LLMProvider,
}

impl LLM {
    pub fn new(config: LLMProviderConfig) -> AppResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(AppError::AgentConstruction(format!(
                "an API key is required for provider {}",
                config.provider
            )));
        }

        let api_base = config
            .api_base
            .unwrap_or_else(|| config.provider.default_api_base().to_string());
        let adapter: Arc<dyn LLMAdapter> =
            Arc::new(crate::llm::openai::OpenAIAdapter::new_with_api_base(&config.api_key, &api_base));

        Ok(Self {
            adapter,
            provider: config.provider,
        })
    }

    /// Build from application config, taking the key supplied with the request
    pub fn from_config(config: &LLMConfig, api_key: String) -> AppResult<Self> {
        Self::new(LLMProviderConfig {
            provider: config.provider,
            api_key,
            api_base: config.api_base.clone(),
        })
    }

    /// Wrap an existing adapter, e.g. a gateway or a scripted model
    pub fn with_adapter(adapter: Arc<dyn LLMAdapter>, provider: LLMProvider) -> Self {
        Self { adapter, provider }
    }

    pub fn provider(&self) -> LLMProvider {
        self.provider
    }

    pub async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        self.adapter.create_chat_completion(request).await
    }
}

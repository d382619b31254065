// Scripted chat model for tests: replies from a fixed queue and records every request

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::llm::provider::{LLMAdapter, LLM};
use crate::types::{AppError, AppResult, LLMProvider, LLMRequest, LLMResponse, TokenUsage};

#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<LLMRequest>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn llm(self: &Arc<Self>) -> LLM {
        LLM::with_adapter(self.clone(), LLMProvider::OpenAI)
    }

    pub fn requests(&self) -> Vec<LLMRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLMAdapter for ScriptedModel {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AppError::LLMApi("script exhausted".to_string()))?;
        Ok(LLMResponse {
            content: reply,
            finish_reason: "stop".to_string(),
            usage: TokenUsage::default(),
        })
    }
}

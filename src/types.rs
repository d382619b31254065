// Type definitions and enums

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LLMProvider {
    OpenAI,
    OpenRouter,
    Groq,
}

impl std::fmt::Display for LLMProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LLMProvider::OpenAI => write!(f, "openai"),
            LLMProvider::OpenRouter => write!(f, "openrouter"),
            LLMProvider::Groq => write!(f, "groq"),
        }
    }
}

impl LLMProvider {
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "openai" => Some(LLMProvider::OpenAI),
            "openrouter" => Some(LLMProvider::OpenRouter),
            "groq" => Some(LLMProvider::Groq),
            _ => None,
        }
    }

    /// Chat-completions base URL; every supported provider speaks the OpenAI dialect
    pub fn default_api_base(&self) -> &'static str {
        match self {
            LLMProvider::OpenAI => "https://api.openai.com/v1",
            LLMProvider::OpenRouter => "https://openrouter.ai/api/v1",
            LLMProvider::Groq => "https://api.groq.com/openai/v1",
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LLMRequest {
    pub model: String,
    pub messages: Vec<LLMMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Sequences at which the model must stop generating
    pub stop: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LLMMessage {
    pub role: String, // "user", "assistant", "system"
    pub content: String,
}

impl LLMMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LLMResponse {
    pub content: String,
    pub finish_reason: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Acquisition error: {0}")]
    Acquisition(String),

    #[error("Invalid folder path: {0}")]
    InvalidPath(String),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Decode error in {file}: {message}")]
    Decode { file: String, message: String },

    #[error("Both transport readers failed for {file}: primary: {primary}; secondary: {secondary}")]
    TransportFormatFallbackExhausted {
        file: String,
        primary: String,
        secondary: String,
    },

    #[error("Database write error: {0}")]
    DatabaseWrite(String),

    #[error("Agent construction failed: {0}")]
    AgentConstruction(String),

    #[error("Agent execution failed: {0}")]
    AgentExecution(String),

    #[error("Query rejected: {0}")]
    QueryRejected(String),

    #[error("LLM API error: {0}")]
    LLMApi(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl AppError {
    pub fn decode(file: impl Into<String>, message: impl std::fmt::Display) -> Self {
        AppError::Decode {
            file: file.into(),
            message: message.to_string(),
        }
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;

/// Severity of a user-visible notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A message surfaced to the user instead of an error crossing a component boundary
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Info, message: message.into() }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Warning, message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Error, message: message.into() }
    }
}

impl From<&AppError> for Notice {
    fn from(err: &AppError) -> Self {
        Notice::error(err.to_string())
    }
}

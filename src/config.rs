use anyhow::Result;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

use crate::types::LLMProvider;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LLMConfig,
    pub storage: StorageConfig,
    pub remote: RemoteSourceConfig,
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub cors_allowed_origins: Vec<String>,
    /// Upper bound on a multipart request body
    pub max_upload_bytes: usize,
    /// Query sessions admitted per minute across all clients; 0 disables the limit
    pub query_rate_per_minute: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LLMConfig {
    /// Fallback key when the browser form leaves the key blank
    pub openai_api_key: String,
    pub provider: LLMProvider,
    pub model: String,
    pub api_base: Option<String>,
    pub temperature: f32,
}

impl LLMConfig {
    /// Key from the request if present, otherwise the configured one
    pub fn resolve_api_key(&self, from_request: Option<&str>) -> Option<String> {
        from_request
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .or_else(|| {
                if self.openai_api_key.is_empty() {
                    None
                } else {
                    Some(self.openai_api_key.clone())
                }
            })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root under which per-session directories are created
    pub work_dir: PathBuf,
}

/// Location of the fixed remote repository used by the "default files" source
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSourceConfig {
    pub base_url: String,
    pub files: Vec<String>,
}

impl Default for RemoteSourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://raw.githubusercontent.com/rejipmathew27/Text2Sql/main".to_string(),
            files: ["AE.csv", "DM.csv", "LB.csv", "IE.csv"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub max_iterations: usize,
    pub top_k: usize,
    pub sample_rows: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            top_k: 10,
            sample_rows: 3,
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let remote_defaults = RemoteSourceConfig::default();
        let agent_defaults = AgentConfig::default();

        let provider_id = env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let provider = LLMProvider::from_id(&provider_id)
            .ok_or_else(|| anyhow::anyhow!("Unsupported LLM_PROVIDER: {}", provider_id))?;

        Ok(Self {
            server: ServerConfig {
                port: env::var("PORT")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()?,
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                cors_allowed_origins: split_list(
                    &env::var("ALLOWED_ORIGINS")
                        .unwrap_or_else(|_| "http://localhost:3000".to_string()),
                ),
                max_upload_bytes: env::var("MAX_UPLOAD_MB")
                    .unwrap_or_else(|_| "200".to_string())
                    .parse::<usize>()?
                    * 1024
                    * 1024,
                query_rate_per_minute: env::var("QUERY_RATE_PER_MINUTE")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()?,
            },
            llm: LLMConfig {
                openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
                provider,
                model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".to_string()),
                api_base: env::var("LLM_API_BASE").ok().filter(|s| !s.is_empty()),
                temperature: env::var("LLM_TEMPERATURE")
                    .unwrap_or_else(|_| "0".to_string())
                    .parse()?,
            },
            storage: StorageConfig {
                work_dir: env::var("WORK_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| env::temp_dir().join("clinical-sql")),
            },
            remote: RemoteSourceConfig {
                base_url: env::var("REMOTE_BASE_URL").unwrap_or(remote_defaults.base_url),
                files: env::var("REMOTE_FILES")
                    .map(|raw| split_list(&raw))
                    .unwrap_or(remote_defaults.files),
            },
            agent: AgentConfig {
                max_iterations: env::var("AGENT_MAX_ITERATIONS")
                    .map(|v| v.parse())
                    .unwrap_or(Ok(agent_defaults.max_iterations))?,
                top_k: env::var("AGENT_TOP_K")
                    .map(|v| v.parse())
                    .unwrap_or(Ok(agent_defaults.top_k))?,
                sample_rows: env::var("AGENT_SAMPLE_ROWS")
                    .map(|v| v.parse())
                    .unwrap_or(Ok(agent_defaults.sample_rows))?,
            },
        })
    }
}

#[cfg(test)]
impl Config {
    /// Defaults for tests, with sessions rooted at `work_dir`
    pub(crate) fn for_tests(work_dir: &std::path::Path) -> Self {
        Self {
            server: ServerConfig {
                port: 0,
                host: "127.0.0.1".to_string(),
                cors_allowed_origins: vec!["*".to_string()],
                max_upload_bytes: 10 * 1024 * 1024,
                query_rate_per_minute: 0,
            },
            llm: LLMConfig {
                openai_api_key: String::new(),
                provider: LLMProvider::OpenAI,
                model: "gpt-3.5-turbo".to_string(),
                api_base: None,
                temperature: 0.0,
            },
            storage: StorageConfig {
                work_dir: work_dir.to_path_buf(),
            },
            remote: RemoteSourceConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llm_config(key: &str) -> LLMConfig {
        LLMConfig {
            openai_api_key: key.to_string(),
            provider: LLMProvider::OpenAI,
            model: "gpt-3.5-turbo".to_string(),
            api_base: None,
            temperature: 0.0,
        }
    }

    #[test]
    fn test_request_key_overrides_configured_key() {
        let config = llm_config("sk-env");
        assert_eq!(config.resolve_api_key(Some("sk-form")), Some("sk-form".to_string()));
        assert_eq!(config.resolve_api_key(Some("   ")), Some("sk-env".to_string()));
        assert_eq!(config.resolve_api_key(None), Some("sk-env".to_string()));
    }

    #[test]
    fn test_missing_key_everywhere() {
        let config = llm_config("");
        assert_eq!(config.resolve_api_key(None), None);
        assert_eq!(config.resolve_api_key(Some("")), None);
    }

    #[test]
    fn test_remote_defaults() {
        let remote = RemoteSourceConfig::default();
        assert_eq!(remote.files, vec!["AE.csv", "DM.csv", "LB.csv", "IE.csv"]);
        assert!(remote.base_url.ends_with("/main"));
    }

    // The only test that touches the process environment
    #[test]
    fn test_from_env_overrides_and_defaults() {
        const VARS: [&str; 6] = [
            "REMOTE_FILES",
            "AGENT_MAX_ITERATIONS",
            "QUERY_RATE_PER_MINUTE",
            "MAX_UPLOAD_MB",
            "LLM_PROVIDER",
            "ALLOWED_ORIGINS",
        ];

        env::set_var("REMOTE_FILES", "AE.csv, lb.xpt");
        env::set_var("AGENT_MAX_ITERATIONS", "4");
        env::set_var("QUERY_RATE_PER_MINUTE", "0");
        env::set_var("MAX_UPLOAD_MB", "2");
        env::set_var("LLM_PROVIDER", "groq");
        env::set_var("ALLOWED_ORIGINS", "*");
        let config = Config::from_env().unwrap();
        assert_eq!(config.remote.files, vec!["AE.csv", "lb.xpt"]);
        assert_eq!(config.agent.max_iterations, 4);
        assert_eq!(config.agent.top_k, 10);
        assert_eq!(config.server.query_rate_per_minute, 0);
        assert_eq!(config.server.max_upload_bytes, 2 * 1024 * 1024);
        assert_eq!(config.llm.provider, LLMProvider::Groq);
        assert_eq!(config.server.cors_allowed_origins, vec!["*"]);

        env::set_var("LLM_PROVIDER", "gemini");
        assert!(Config::from_env().is_err());

        for var in VARS {
            env::remove_var(var);
        }
        let config = Config::from_env().unwrap();
        assert_eq!(config.remote.files, RemoteSourceConfig::default().files);
        assert_eq!(config.agent.max_iterations, 15);
        assert_eq!(config.server.query_rate_per_minute, 30);
        assert_eq!(config.server.max_upload_bytes, 200 * 1024 * 1024);
        assert_eq!(config.llm.provider, LLMProvider::OpenAI);
    }

    #[test]
    fn test_split_list_skips_blanks() {
        assert_eq!(split_list(" a.csv, ,b.xpt,"), vec!["a.csv", "b.xpt"]);
    }
}

use crate::util::{env_clamped, env_string, is_local_endpoint_url, parse_bool_flag};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_EXECUTE_URL: &str = "http://localhost:5000/execute";
pub const DEFAULT_MODEL: &str = "gpt-4-0613";
pub const DEFAULT_SESSION_ID: &str = "aaa";
pub const DEFAULT_AZURE_API_VERSION: &str = "2023-07-01-preview";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant with access to a code interpreter.\n\
Use run_code to execute Python and run_shell to run shell commands when a task needs real output.\n\
Pass the code or command as the single string argument the tool expects.\n\
Read each execution result before deciding on the next step, and answer plainly once you have what you need.";

/// Which flavour of chat-completions service `api_url` points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiType {
    #[default]
    OpenAi,
    /// Azure OpenAI: `api_url` is the resource host and requests address a deployment.
    Azure,
}

impl ApiType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "azure" => Some(Self::Azure),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api_key: Option<String>,
    pub api_url: String,
    pub api_type: ApiType,
    pub azure_deployment_id: Option<String>,
    pub api_version: String,
    /// Sent as `OpenAI-Organization`; ignored for Azure.
    pub organization: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: String,
    pub execute_url: String,
    pub session_id: String,
    pub max_tool_rounds: usize,
    pub max_result_history_chars: usize,
    pub code_interpreter: bool,
    pub store_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: DEFAULT_API_URL.to_string(),
            api_type: ApiType::OpenAi,
            azure_deployment_id: None,
            api_version: DEFAULT_AZURE_API_VERSION.to_string(),
            organization: None,
            model: DEFAULT_MODEL.to_string(),
            temperature: 1.0,
            max_tokens: 1000,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            execute_url: DEFAULT_EXECUTE_URL.to_string(),
            session_id: DEFAULT_SESSION_ID.to_string(),
            max_tool_rounds: 16,
            max_result_history_chars: 200,
            code_interpreter: true,
            store_dir: default_store_dir(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let defaults = Self::default();

        let temperature = match env_string("RELAY_TEMPERATURE") {
            Some(raw) => match raw.parse::<f32>() {
                Ok(value) => value,
                Err(_) => bail!("Invalid RELAY_TEMPERATURE '{raw}': expected a number"),
            },
            None => defaults.temperature,
        };

        let api_type = match env_string("RELAY_API_TYPE") {
            Some(raw) => match ApiType::parse(&raw) {
                Some(api_type) => api_type,
                None => bail!("Invalid RELAY_API_TYPE '{raw}': expected 'openai' or 'azure'"),
            },
            None => defaults.api_type,
        };

        Ok(Self {
            api_key: env_string("RELAY_API_KEY").or_else(|| env_string("OPENAI_API_KEY")),
            api_url: env_string("RELAY_API_URL").unwrap_or(defaults.api_url),
            api_type,
            azure_deployment_id: env_string("RELAY_AZURE_DEPLOYMENT_ID"),
            api_version: env_string("RELAY_API_VERSION").unwrap_or(defaults.api_version),
            organization: env_string("RELAY_ORGANIZATION"),
            model: env_string("RELAY_MODEL").unwrap_or(defaults.model),
            temperature,
            max_tokens: env_clamped("RELAY_MAX_TOKENS", defaults.max_tokens, 64, 8192),
            system_prompt: env_string("RELAY_SYSTEM_PROMPT").unwrap_or(defaults.system_prompt),
            execute_url: env_string("RELAY_EXECUTE_URL").unwrap_or(defaults.execute_url),
            session_id: env_string("RELAY_SESSION_ID").unwrap_or(defaults.session_id),
            max_tool_rounds: env_clamped("RELAY_MAX_TOOL_ROUNDS", defaults.max_tool_rounds, 1, 64),
            max_result_history_chars: env_clamped(
                "RELAY_MAX_RESULT_HISTORY_CHARS",
                defaults.max_result_history_chars,
                50,
                20_000,
            ),
            code_interpreter: std::env::var("RELAY_CODE_INTERPRETER")
                .ok()
                .and_then(parse_bool_flag)
                .unwrap_or(defaults.code_interpreter),
            store_dir: env_string("RELAY_STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.store_dir),
        })
    }

    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("RELAY_API_URL", &self.api_url),
            ("RELAY_EXECUTE_URL", &self.execute_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                bail!("Invalid {name} '{url}': expected http:// or https:// URL");
            }
        }

        if !self.is_local_endpoint() && self.api_key.is_none() {
            bail!(
                "RELAY_API_KEY (or OPENAI_API_KEY) must be set for non-local endpoints (url: '{}')",
                self.api_url
            );
        }

        if self.api_type == ApiType::Azure {
            if self.azure_deployment_id.is_none() {
                bail!("RELAY_AZURE_DEPLOYMENT_ID must be set when RELAY_API_TYPE is 'azure'");
            }
            if self.api_version.trim().is_empty() {
                bail!("RELAY_API_VERSION must not be empty for Azure endpoints");
            }
        }

        if self.model.trim().is_empty() {
            bail!("Model name must not be empty");
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            bail!(
                "Invalid temperature {}: expected a value between 0 and 2",
                self.temperature
            );
        }

        if self.session_id.trim().is_empty() {
            bail!("Execution session id must not be empty");
        }

        Ok(())
    }

    pub fn is_local_endpoint(&self) -> bool {
        is_local_endpoint_url(&self.api_url)
    }
}

fn default_store_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".relaycoder")
        .join("conversations")
}

use anyhow::Result;
use std::env;

use crate::services::gemini::DEFAULT_BASE_URL;

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

/// Process-wide settings, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub bind_addr: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = non_empty("GOOGLE_API_KEY")
            .or_else(|| non_empty("GEMINI_API_KEY"))
            .ok_or_else(|| anyhow::anyhow!("GOOGLE_API_KEY not found in environment or .env file"))?;

        Ok(Self {
            api_key,
            model: non_empty("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: non_empty("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            bind_addr: non_empty("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
        })
    }
}

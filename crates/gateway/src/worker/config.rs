use directories::BaseDirs;
use serde::Deserialize;
use std::{env, fs, path::PathBuf};
use url::Url;

/// Model the platform's worker serves when none is configured.
pub const DEFAULT_MODEL: &str = "@cf/meta/llama-3.1-8b-instruct";

const DEFAULT_API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone, Debug, Deserialize)]
pub struct WorkerFileConfig {
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub api_key_header: Option<String>,
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub api_key: String,
    pub endpoint: Url,
    pub model: String,
    pub api_key_header: String,
    pub proxy: Option<String>,
}

impl WorkerConfig {
    pub fn new(endpoint: Url, api_key: impl Into<String>) -> Self {
        WorkerConfig {
            api_key: api_key.into(),
            endpoint,
            model: DEFAULT_MODEL.to_string(),
            api_key_header: DEFAULT_API_KEY_HEADER.to_string(),
            proxy: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Deployment-time configuration: environment first, then the platform
    /// config file. The endpoint must come from one of the two.
    pub fn from_env_and_file() -> anyhow::Result<Self> {
        let api_key = env::var("TUTOR_GATEWAY_KEY")
            .map_err(|_| anyhow::anyhow!("TUTOR_GATEWAY_KEY not set"))?;

        let mut endpoint = env::var("TUTOR_GATEWAY_URL").ok();
        let mut model = DEFAULT_MODEL.to_string();
        let mut api_key_header = DEFAULT_API_KEY_HEADER.to_string();

        if let Some(path) = Self::config_path() {
            if path.exists() {
                if let Ok(text) = fs::read_to_string(&path) {
                    if let Ok(file_cfg) = toml::from_str::<WorkerFileConfig>(&text) {
                        if endpoint.is_none() {
                            endpoint = file_cfg.endpoint;
                        }
                        if let Some(m) = file_cfg.model {
                            model = m;
                        }
                        if let Some(h) = file_cfg.api_key_header {
                            api_key_header = h;
                        }
                    }
                }
            }
        }

        let endpoint = endpoint.ok_or_else(|| {
            anyhow::anyhow!(
                "gateway endpoint not configured; set TUTOR_GATEWAY_URL or add `endpoint` to config.toml"
            )
        })?;
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| anyhow::anyhow!("invalid gateway endpoint {endpoint}: {e}"))?;

        let proxy = env::var("HTTPS_PROXY")
            .ok()
            .or_else(|| env::var("HTTP_PROXY").ok());

        Ok(WorkerConfig {
            api_key,
            endpoint,
            model,
            api_key_header,
            proxy,
        })
    }

    fn config_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        let p = if cfg!(target_os = "windows") {
            base.home_dir().join(".tutor").join("config.toml")
        } else {
            base.config_dir().join("tutor").join("config.toml")
        };
        Some(p)
    }
}

use crate::utils::error::{EnrollmentError, Result};
use crate::utils::validation::{self, Validate, ValidationReport};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_seconds: Option<u64>,
    pub token: Option<String>,
}

impl ApiConfig {
    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub json: Option<bool>,
}

impl AppConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| EnrollmentError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    pub fn log_level(&self) -> Option<&str> {
        self.logging.as_ref().and_then(|l| l.level.as_deref())
    }

    pub fn json_logging(&self) -> bool {
        self.logging
            .as_ref()
            .and_then(|l| l.json)
            .unwrap_or(false)
    }
}

/// 替換環境變數 (例如 ${PORTAL_API_TOKEN})，未設定者保留原樣
pub fn substitute_env_vars(content: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| EnrollmentError::ConfigError {
        message: format!("Invalid substitution pattern: {}", e),
    })?;

    let result = re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
    });

    Ok(result.to_string())
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        let mut report = ValidationReport::new();
        report.check(validation::validate_url("api.base_url", &self.api.base_url));
        report.check(validation::validate_range(
            "api.timeout_seconds",
            self.api.timeout_seconds(),
            1,
            300,
        ));
        if let Some(level) = self.log_level() {
            let valid_levels = ["trace", "debug", "info", "warn", "error"];
            if !valid_levels.contains(&level) {
                report.push(
                    "logging.level",
                    format!("Unsupported level. Valid levels: {}", valid_levels.join(", ")),
                );
            }
        }
        report.finish()
    }
}

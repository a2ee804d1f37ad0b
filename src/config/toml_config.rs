use crate::adapters::{firestore, openai, FirestoreStore, FirestoreTarget, OpenAiClient};
use crate::core::generator::{DEFAULT_MAX_TOKENS, DEFAULT_MODEL};
use crate::core::retry::DEFAULT_MAX_ATTEMPTS;
use crate::core::GeneratorSettings;
use crate::utils::error::{MettaError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "metta.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub openai: OpenAiConfig,
    pub firestore: FirestoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    #[serde(default = "default_openai_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirestoreConfig {
    pub project_id: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_firestore_url")]
    pub base_url: String,
    pub access_token: Option<String>,
}

fn default_openai_url() -> String {
    openai::DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_timeout() -> u64 {
    120
}

fn default_database() -> String {
    "(default)".to_string()
}

fn default_collection() -> String {
    "entries".to_string()
}

fn default_firestore_url() -> String {
    firestore::DEFAULT_BASE_URL.to_string()
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_openai_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            max_attempts: default_max_attempts(),
            timeout_seconds: default_timeout(),
        }
    }
}

/// 讀取環境變數，空字串視為未設定
fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| MettaError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 沒有設定檔時，完全由環境變數組成配置
    pub fn from_env() -> Result<Self> {
        let defaults = OpenAiConfig::default();
        Ok(Self {
            openai: OpenAiConfig {
                api_key: env_opt("OPENAI_API_KEY"),
                base_url: env_opt("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
                model: env_opt("OPENAI_MODEL").unwrap_or(defaults.model),
                ..defaults
            },
            firestore: FirestoreConfig {
                project_id: env_opt("FIRESTORE_PROJECT_ID").ok_or_else(|| MettaError::ConfigError {
                    message: "FIRESTORE_PROJECT_ID environment variable is required".to_string(),
                })?,
                database: default_database(),
                collection: env_opt("FIRESTORE_COLLECTION").unwrap_or_else(default_collection),
                base_url: env_opt("FIRESTORE_BASE_URL").unwrap_or_else(default_firestore_url),
                access_token: env_opt("FIRESTORE_ACCESS_TOKEN"),
            },
        })
    }

    /// 指定路徑時必須存在；否則先找 `metta.toml`，找不到再退回環境變數
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(DEFAULT_CONFIG_FILE),
            None => Self::from_env(),
        }
    }

    /// 替換環境變數 (例如 ${OPENAI_API_KEY})，未設定的保持原樣
    fn substitute_env_vars(content: &str) -> String {
        static VAR: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
        let re = VAR.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("static regex"));

        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .to_string()
    }

    pub fn firestore_store(&self, client: reqwest::Client) -> FirestoreStore {
        FirestoreStore::new(
            client,
            FirestoreTarget {
                base_url: self.firestore.base_url.clone(),
                project_id: self.firestore.project_id.clone(),
                database: self.firestore.database.clone(),
                collection: self.firestore.collection.clone(),
                access_token: self.firestore.access_token.clone(),
            },
        )
    }

    /// API key 只有產生問答時才需要
    pub fn openai_client(&self) -> Result<OpenAiClient> {
        let api_key = validation::validate_required_field("openai.api_key", &self.openai.api_key)?;
        validation::validate_non_empty_string("openai.api_key", api_key)?;
        if api_key.starts_with("${") {
            return Err(MettaError::MissingConfigError {
                field: format!("openai.api_key (unresolved {})", api_key),
            });
        }
        OpenAiClient::new(
            api_key.clone(),
            self.openai.base_url.clone(),
            Duration::from_secs(self.openai.timeout_seconds),
        )
    }
}

impl GeneratorSettings for OpenAiConfig {
    fn model(&self) -> &str {
        &self.model
    }

    fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_url("openai.base_url", &self.openai.base_url)?;
        validation::validate_non_empty_string("openai.model", &self.openai.model)?;
        validation::validate_positive_number("openai.max_tokens", self.openai.max_tokens, 1)?;
        validation::validate_range("openai.max_attempts", self.openai.max_attempts, 1, 20)?;

        validation::validate_url("firestore.base_url", &self.firestore.base_url)?;
        validation::validate_non_empty_string("firestore.project_id", &self.firestore.project_id)?;
        validation::validate_non_empty_string("firestore.database", &self.firestore.database)?;
        validation::validate_non_empty_string("firestore.collection", &self.firestore.collection)?;
        if let Some(token) = &self.firestore.access_token {
            if token.starts_with("${") {
                return Err(MettaError::MissingConfigError {
                    field: format!("firestore.access_token (unresolved {})", token),
                });
            }
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
[firestore]
project_id = "metta-demo"
"#;

    #[test]
    fn test_parse_minimal_config_uses_defaults() {
        let config = AppConfig::from_toml_str(MINIMAL).unwrap();

        assert_eq!(config.firestore.project_id, "metta-demo");
        assert_eq!(config.firestore.collection, "entries");
        assert_eq!(config.firestore.database, "(default)");
        assert_eq!(config.openai.model, "gpt-3.5-turbo");
        assert_eq!(config.openai.max_tokens, 4097);
        assert_eq!(config.openai.max_attempts, 5);
        assert!(config.openai.api_key.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("METTA_TEST_OPENAI_KEY", "sk-from-env");

        let toml_content = r#"
[openai]
api_key = "${METTA_TEST_OPENAI_KEY}"
model = "gpt-4"

[firestore]
project_id = "metta-demo"
access_token = "${METTA_TEST_UNSET_TOKEN}"
"#;

        let config = AppConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.openai.api_key.as_deref(), Some("sk-from-env"));
        assert_eq!(config.openai.model, "gpt-4");
        assert_eq!(
            config.firestore.access_token.as_deref(),
            Some("${METTA_TEST_UNSET_TOKEN}")
        );

        std::env::remove_var("METTA_TEST_OPENAI_KEY");
    }

    #[test]
    fn test_config_validation() {
        let toml_content = r#"
[openai]
base_url = "invalid-url"

[firestore]
project_id = "metta-demo"
"#;
        let config = AppConfig::from_toml_str(toml_content).unwrap();
        assert!(config.validate().is_err());

        let toml_content = r#"
[openai]
max_attempts = 0

[firestore]
project_id = "metta-demo"
"#;
        let config = AppConfig::from_toml_str(toml_content).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unresolved_access_token_fails_validation() {
        let toml_content = r#"
[firestore]
project_id = "metta-demo"
access_token = "${METTA_TEST_NEVER_SET_TOKEN}"
"#;
        let config = AppConfig::from_toml_str(toml_content).unwrap();
        assert!(matches!(
            config.validate(),
            Err(MettaError::MissingConfigError { field }) if field.contains("firestore.access_token")
        ));

        let resolved = AppConfig::from_toml_str(
            "[firestore]\nproject_id = \"metta-demo\"\naccess_token = \"ya29.token\"\n",
        )
        .unwrap();
        assert!(resolved.validate().is_ok());
    }

    #[test]
    fn test_missing_firestore_section() {
        assert!(matches!(
            AppConfig::from_toml_str("[openai]\nmodel = \"gpt-4\"\n"),
            Err(MettaError::ConfigValidationError { .. })
        ));
    }

    #[test]
    fn test_openai_client_requires_key() {
        let config = AppConfig::from_toml_str(MINIMAL).unwrap();
        assert!(matches!(
            config.openai_client(),
            Err(MettaError::MissingConfigError { .. })
        ));
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(MINIMAL.as_bytes()).unwrap();

        let config = AppConfig::load(Some(temp_file.path())).unwrap();
        assert_eq!(config.firestore.project_id, "metta-demo");
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MettaError {
    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration validation failed for {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Context length exceeded with {max_tokens} response tokens")]
    ContextLengthExceeded { max_tokens: u32 },

    #[error("Gave up after {attempts} attempts (last budget {last_budget} tokens)")]
    RetriesExhausted { attempts: u32, last_budget: u32 },

    #[error("Prompt needs {prompt_tokens} tokens, model limit is {limit}")]
    PromptTooLong { prompt_tokens: u32, limit: u32 },

    #[error("Completion service error ({status}, {code}): {message}")]
    Upstream {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Tokenizer error: {message}")]
    TokenizerError { message: String },

    #[error("Entry not found: {id}")]
    NotFound { id: String },

    #[error("Document store error: {message}")]
    StoreError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Network,
    Upstream,
    Data,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl MettaError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            MettaError::ConfigError { .. }
            | MettaError::MissingConfigError { .. }
            | MettaError::InvalidConfigValueError { .. }
            | MettaError::ConfigValidationError { .. }
            | MettaError::PromptTooLong { .. } => ErrorCategory::Configuration,
            MettaError::ApiError(_) => ErrorCategory::Network,
            MettaError::ContextLengthExceeded { .. }
            | MettaError::RetriesExhausted { .. }
            | MettaError::Upstream { .. }
            | MettaError::StoreError { .. } => ErrorCategory::Upstream,
            MettaError::SerializationError(_) | MettaError::NotFound { .. } => {
                ErrorCategory::Data
            }
            MettaError::IoError(_) | MettaError::TokenizerError { .. } => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            MettaError::ContextLengthExceeded { .. } => ErrorSeverity::Low,
            MettaError::ApiError(_)
            | MettaError::RetriesExhausted { .. }
            | MettaError::Upstream { .. }
            | MettaError::StoreError { .. } => ErrorSeverity::Medium,
            MettaError::IoError(_) | MettaError::TokenizerError { .. } => ErrorSeverity::Critical,
            _ => ErrorSeverity::High,
        }
    }

    /// Only a context overflow can be fixed by asking again with a smaller budget.
    pub fn is_context_overflow(&self) -> bool {
        matches!(self, MettaError::ContextLengthExceeded { .. })
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            MettaError::ConfigError { .. }
            | MettaError::MissingConfigError { .. }
            | MettaError::InvalidConfigValueError { .. }
            | MettaError::ConfigValidationError { .. } => {
                "Check metta.toml or the OPENAI_*/FIRESTORE_* environment variables".to_string()
            }
            MettaError::PromptTooLong { .. } => {
                "Shorten the prompt or the source context, or raise openai.max_tokens".to_string()
            }
            MettaError::ApiError(_) => "Check the network connection and try again".to_string(),
            MettaError::ContextLengthExceeded { .. } | MettaError::RetriesExhausted { .. } => {
                "The source context is too long for the model; try a model with a larger context window"
                    .to_string()
            }
            MettaError::Upstream { status, .. } if *status == 401 || *status == 403 => {
                "Check the API key".to_string()
            }
            MettaError::Upstream { status, .. } if *status == 429 => {
                "Rate limited; wait a moment before running again".to_string()
            }
            MettaError::Upstream { .. } => "Inspect the completion service error above".to_string(),
            MettaError::StoreError { .. } => {
                "Check the Firestore project id and access token".to_string()
            }
            MettaError::NotFound { .. } => "Use `metta list` to find a valid entry id".to_string(),
            MettaError::SerializationError(_) => {
                "The input or response was not valid JSON".to_string()
            }
            MettaError::IoError(_) => "Check file paths and permissions".to_string(),
            MettaError::TokenizerError { .. } => {
                "The tokenizer could not be loaded for this model".to_string()
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            MettaError::NotFound { id } => format!("No entry with id '{}'", id),
            MettaError::RetriesExhausted { attempts, .. } => format!(
                "The model kept running out of context, gave up after {} attempts",
                attempts
            ),
            MettaError::Upstream { message, .. } => {
                format!("The completion service refused the request: {}", message)
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MettaError>;

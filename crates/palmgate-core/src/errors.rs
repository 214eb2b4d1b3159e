use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use palmgate_config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("capture file not found or unreadable: {path}")]
    MissingInput { path: PathBuf },

    #[error("capture payload in {path} is invalid: {message}")]
    InvalidCapture { path: PathBuf, message: String },

    #[error("degenerate hand geometry: {message}")]
    DegenerateInput { message: String },

    #[error("no hand detected in {path}")]
    NoHandDetected { path: PathBuf },

    #[error("payment amount must be a finite, non-negative number (got {amount})")]
    InvalidAmount { amount: f64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to write {path}: {source}")]
    FeatureWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {path}: {source}")]
    FeatureRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("template store {path} is invalid: {message}")]
    InvalidTemplate { path: PathBuf, message: String },

    #[error("no enrolled template found for user {user}")]
    TemplateNotFound { user: String },

    #[error("enrollment requires at least {required} usable sample(s), found {found}")]
    InsufficientSamples { required: usize, found: usize },

    #[error("inconsistent hand types across enrollment samples: {message}")]
    InconsistentHandedness { message: String },

    #[error("invalid user name '{user}': {message}")]
    InvalidUser { user: String, message: String },

    #[error("no sample with id {sample_id} found for user {user}")]
    SampleNotFound { user: String, sample_id: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to read configuration file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration file {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("Secret Service unavailable for user {user} (service {service}): {message}")]
    SecretServiceUnavailable {
        user: String,
        service: String,
        message: String,
    },

    #[error("template store {path} is encrypted and requires a Secret Service key")]
    EncryptedStoreRequiresKey { path: PathBuf },

    #[error("template encryption error: {0}")]
    Encryption(String),

    #[error("Secret Service template key for user {user} invalid: {message}")]
    SecretServiceKeyInvalid { user: String, message: String },
}

impl AppError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            AppError::MissingInput { .. } => ExitCode::from(2),
            AppError::InvalidCapture { .. } => ExitCode::from(2),
            AppError::DegenerateInput { .. } => ExitCode::from(3),
            AppError::NoHandDetected { .. } => ExitCode::from(3),
            AppError::InvalidAmount { .. } => ExitCode::from(2),
            AppError::FeatureRead { .. } => ExitCode::from(2),
            AppError::InvalidTemplate { .. } => ExitCode::from(2),
            AppError::TemplateNotFound { .. } => ExitCode::from(4),
            AppError::InsufficientSamples { .. } => ExitCode::from(3),
            AppError::InconsistentHandedness { .. } => ExitCode::from(3),
            AppError::InvalidUser { .. } => ExitCode::from(2),
            AppError::SampleNotFound { .. } => ExitCode::from(4),
            AppError::ConfigRead { .. } => ExitCode::from(2),
            AppError::ConfigParse { .. } => ExitCode::from(2),
            AppError::SecretServiceUnavailable { .. } => ExitCode::from(2),
            AppError::EncryptedStoreRequiresKey { .. } => ExitCode::from(2),
            AppError::Encryption(_) => ExitCode::from(2),
            AppError::SecretServiceKeyInvalid { .. } => ExitCode::from(2),
            _ => ExitCode::from(1),
        }
    }

    pub fn human_message(&self) -> String {
        self.to_string()
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Read { path, source } => AppError::ConfigRead { path, source },
            ConfigError::Parse { path, message } => AppError::ConfigParse { path, message },
        }
    }
}

use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PRIMARY_CONFIG_PATH: &str = "/etc/palmgate/config.toml";
pub const SECONDARY_CONFIG_PATH: &str = "/usr/local/etc/palmgate/config.toml";
pub const DEFAULT_STORE_DIR: &str = "/var/lib/palmgate/templates";
pub const DEFAULT_MIN_ENROLLMENT_SAMPLES: usize = 5;
pub const DEFAULT_PIN_TIER_MIN_AMOUNT: f64 = 2000.0;
pub const DEFAULT_OTP_TIER_MIN_AMOUNT: f64 = 10000.0;

/// Named threshold bundles for the matching engine.
///
/// `HybridFused` fuses the geometric signature with the auxiliary embedding;
/// `StrictGeometric` scores geometry alone with a tighter variance gate and a
/// lower final-score cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchPreset {
    StrictGeometric,
    #[default]
    HybridFused,
}

impl MatchPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchPreset::StrictGeometric => "strict-geometric",
            MatchPreset::HybridFused => "hybrid-fused",
        }
    }
}

impl fmt::Display for MatchPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchPreset {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict-geometric" | "strict" => Ok(MatchPreset::StrictGeometric),
            "hybrid-fused" | "hybrid" => Ok(MatchPreset::HybridFused),
            other => Err(format!(
                "unknown match preset '{other}' (expected strict-geometric or hybrid-fused)"
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConfigFile {
    pub match_preset: Option<MatchPreset>,
    pub variance_threshold: Option<f64>,
    pub verification_threshold: Option<f64>,
    pub template_store_dir: Option<PathBuf>,
    pub min_enrollment_samples: Option<usize>,
    pub pin_tier_min_amount: Option<f64>,
    pub otp_tier_min_amount: Option<f64>,
    pub require_secret_service: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub match_preset: MatchPreset,
    pub variance_threshold: Option<f64>,
    pub verification_threshold: Option<f64>,
    /// `None` leaves the choice to the template store (`PALMGATE_STORE_DIR`,
    /// then [`DEFAULT_STORE_DIR`]).
    pub template_store_dir: Option<PathBuf>,
    pub min_enrollment_samples: usize,
    pub pin_tier_min_amount: f64,
    pub otp_tier_min_amount: f64,
    pub require_secret_service: bool,
}

impl ResolvedConfig {
    pub fn from_raw(raw: ConfigFile) -> Self {
        Self {
            match_preset: raw.match_preset.unwrap_or_default(),
            variance_threshold: raw.variance_threshold,
            verification_threshold: raw.verification_threshold,
            template_store_dir: raw.template_store_dir,
            min_enrollment_samples: raw
                .min_enrollment_samples
                .unwrap_or(DEFAULT_MIN_ENROLLMENT_SAMPLES)
                .max(1),
            pin_tier_min_amount: raw
                .pin_tier_min_amount
                .unwrap_or(DEFAULT_PIN_TIER_MIN_AMOUNT),
            otp_tier_min_amount: raw
                .otp_tier_min_amount
                .unwrap_or(DEFAULT_OTP_TIER_MIN_AMOUNT),
            require_secret_service: raw.require_secret_service.unwrap_or(false),
        }
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self::from_raw(ConfigFile::default())
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub contents: ConfigFile,
    pub source: PathBuf,
}

impl LoadedConfig {
    pub fn new(contents: ConfigFile, source: PathBuf) -> Self {
        Self { contents, source }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfigWithSource {
    pub resolved: ResolvedConfig,
    pub source: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

pub fn default_sources() -> [PathBuf; 2] {
    [
        PathBuf::from(PRIMARY_CONFIG_PATH),
        PathBuf::from(SECONDARY_CONFIG_PATH),
    ]
}

pub fn load_resolved_config() -> Result<ResolvedConfigWithSource, ConfigError> {
    load_resolved_from_paths(&default_sources())
}

pub fn load_from_paths(paths: &[PathBuf]) -> Result<Option<LoadedConfig>, ConfigError> {
    for path in paths {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let parsed =
                    toml::from_str::<ConfigFile>(&contents).map_err(|err| ConfigError::Parse {
                        path: path.clone(),
                        message: err.to_string(),
                    })?;
                return Ok(Some(LoadedConfig::new(parsed, path.clone())));
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.clone(),
                    source: err,
                })
            }
        }
    }

    Ok(None)
}

pub fn load_resolved_from_paths(
    paths: &[PathBuf],
) -> Result<ResolvedConfigWithSource, ConfigError> {
    match load_from_paths(paths)? {
        Some(entry) => Ok(ResolvedConfigWithSource {
            resolved: ResolvedConfig::from_raw(entry.contents),
            source: Some(entry.source),
        }),
        None => Ok(ResolvedConfigWithSource {
            resolved: ResolvedConfig::default(),
            source: None,
        }),
    }
}

use std::path::PathBuf;

use palmgate_config::{
    load_resolved_config, load_resolved_from_paths, MatchPreset, ResolvedConfig,
    ResolvedConfigWithSource,
};
use palmgate_core::hands::MatchPolicy;
use tracing::debug;

use crate::errors::AppResult;

/// Configuration as seen by the command handlers.
#[derive(Debug, Clone, Default)]
pub struct CliSettings {
    pub resolved: ResolvedConfig,
    pub source: Option<PathBuf>,
}

impl From<ResolvedConfigWithSource> for CliSettings {
    fn from(loaded: ResolvedConfigWithSource) -> Self {
        match &loaded.source {
            Some(path) => debug!(config = %path.display(), "loaded configuration"),
            None => debug!("no configuration file found; using defaults"),
        }
        Self {
            resolved: loaded.resolved,
            source: loaded.source,
        }
    }
}

pub fn load_settings() -> AppResult<CliSettings> {
    Ok(load_resolved_config()?.into())
}

pub fn load_settings_with_sources(sources: &[PathBuf]) -> AppResult<CliSettings> {
    Ok(load_resolved_from_paths(sources)?.into())
}

/// `--store-dir`, then the configured directory; `None` defers to the store
/// resolver.
pub fn resolve_store_dir(cli_value: Option<PathBuf>, settings: &CliSettings) -> Option<PathBuf> {
    cli_value.or_else(|| settings.resolved.template_store_dir.clone())
}

pub fn resolve_policy(preset: Option<MatchPreset>, settings: &CliSettings) -> MatchPolicy {
    let resolved = &settings.resolved;
    MatchPolicy::from_preset(preset.unwrap_or(resolved.match_preset))
        .with_overrides(resolved.variance_threshold, resolved.verification_threshold)
}

//! Environment-driven defaults for share operations.
//!
//! Every value can be overridden by an explicit CLI flag; the environment only
//! supplies defaults.

use std::env;

use crate::{ScrubPreset, ShareResult, normalize_scrub_preset};

pub const ENV_SCRUB_PRESET: &str = "MAILROOM_SCRUB_PRESET";
pub const ENV_PROJECTS: &str = "MAILROOM_PROJECTS";
pub const ENV_LOG_LEVEL: &str = "MAILROOM_LOG_LEVEL";
pub const ENV_SCRUB: &str = "MAILROOM_SCRUB";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareConfig {
    pub scrub_preset: ScrubPreset,
    /// Project identifiers to keep; empty keeps everything.
    pub projects: Vec<String>,
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Whether `export` runs the scrub pass at all.
    pub scrub: bool,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            scrub_preset: ScrubPreset::Standard,
            projects: Vec::new(),
            log_level: "info".to_string(),
            scrub: true,
        }
    }
}

impl ShareConfig {
    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// [`crate::ShareError::InvalidScrubPreset`] if `MAILROOM_SCRUB_PRESET` is
    /// set to an unknown preset. Unknown presets never fall back silently.
    pub fn from_env() -> ShareResult<Self> {
        Self::from_lookup(env_value)
    }

    /// Load using `lookup` in place of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ShareResult<Self> {
        let mut config = Self::default();
        if let Some(v) = lookup(ENV_SCRUB_PRESET) {
            config.scrub_preset = normalize_scrub_preset(&v)?;
        }
        if let Some(v) = lookup(ENV_PROJECTS) {
            config.projects = parse_list(&v);
        }
        if let Some(v) = lookup(ENV_LOG_LEVEL) {
            let v = v.trim();
            if !v.is_empty() {
                config.log_level = v.to_string();
            }
        }
        if let Some(v) = lookup(ENV_SCRUB) {
            config.scrub = parse_bool(&v, config.scrub);
        }
        Ok(config)
    }
}

/// Read an environment variable, treating an unset or non-UTF-8 value as absent.
#[must_use]
pub fn env_value(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" => true,
        "0" | "false" | "f" | "no" | "n" => false,
        _ => default,
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

#![forbid(unsafe_code)]
//! Snapshot redaction and project scoping for Mailroom exports.
//!
//! A snapshot is a standalone SQLite copy of the mail store. Before it leaves
//! the machine, callers run two passes over it:
//!
//! - [`apply_project_scope`] keeps only the selected projects and cascades the
//!   deletion through every dependent table.
//! - [`scrub_snapshot`] applies a [`ScrubPreset`]: masks secret-shaped text,
//!   strips sensitive attachment metadata and clears ephemeral state.
//!
//! Both run inside a single transaction and return a serializable summary.

pub mod config;
pub mod preset;
pub mod scope;
pub mod scrub;
pub mod secrets;
pub mod snapshot;
pub mod structure;

pub use config::ShareConfig;
pub use preset::{BODY_REDACTED_PLACEHOLDER, ScrubConfig};
pub use scope::{ProjectRecord, ProjectScopeResult, RemainingCounts, apply_project_scope};
pub use scrub::{ScrubSummary, scrub_snapshot};
pub use secrets::{SECRET_PLACEHOLDER, SecretScan, scan_for_secrets};
pub use snapshot::{Snapshot, create_snapshot};
pub use structure::{ATTACHMENT_REDACT_KEYS, StructureScrub, canonical_json, scrub_structure};

use std::str::FromStr;

/// Supported scrub presets for sharing.
pub const SCRUB_PRESETS: [&str; 3] = ["standard", "strict", "archive"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScrubPreset {
    Standard,
    Strict,
    Archive,
}

impl ScrubPreset {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Strict => "strict",
            Self::Archive => "archive",
        }
    }
}

impl std::fmt::Display for ScrubPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScrubPreset {
    type Err = ShareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        normalize_scrub_preset(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ShareError {
    #[error("invalid scrub preset: {preset}")]
    InvalidScrubPreset { preset: String },
    #[error("snapshot not found: {path}")]
    SnapshotNotFound { path: String },
    #[error("snapshot destination already exists: {path}")]
    SnapshotDestinationExists { path: String },
    #[error("database has no projects")]
    ScopeNoProjects,
    #[error("project identifier not found: {identifier}")]
    ScopeIdentifierNotFound { identifier: String },
    #[error("no project identifiers left after trimming blank entries")]
    ScopeNoMatchingProjects,
    #[error("sqlite error: {message}")]
    Sqlite { message: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShareError {
    /// Wrap a SQLite failure with the step that produced it.
    pub(crate) fn sqlite(context: &str, err: &rusqlite::Error) -> Self {
        Self::Sqlite {
            message: format!("{context}: {err}"),
        }
    }
}

pub type ShareResult<T> = Result<T, ShareError>;

/// Normalize and validate a scrub preset string (case-insensitive, trimmed).
pub fn normalize_scrub_preset(input: &str) -> ShareResult<ScrubPreset> {
    let preset = input.trim().to_ascii_lowercase();
    match preset.as_str() {
        "standard" => Ok(ScrubPreset::Standard),
        "strict" => Ok(ScrubPreset::Strict),
        "archive" => Ok(ScrubPreset::Archive),
        _ => Err(ShareError::InvalidScrubPreset { preset }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_scrub_preset_accepts_case_and_trims() {
        assert_eq!(
            normalize_scrub_preset("  StRiCt  ").expect("strict preset should parse"),
            ScrubPreset::Strict
        );
        assert_eq!(
            normalize_scrub_preset("standard").expect("standard preset should parse"),
            ScrubPreset::Standard
        );
        assert_eq!(
            normalize_scrub_preset("\tARCHIVE\n").expect("archive preset should parse"),
            ScrubPreset::Archive
        );
    }

    #[test]
    fn normalize_scrub_preset_rejects_unknown_values() {
        let err = normalize_scrub_preset("  Paranoid  ").expect_err("expected invalid preset");
        match err {
            ShareError::InvalidScrubPreset { preset } => assert_eq!(preset, "paranoid"),
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn preset_names_round_trip_through_from_str() {
        for name in SCRUB_PRESETS {
            let preset: ScrubPreset = name.parse().expect("listed preset parses");
            assert_eq!(preset.as_str(), name);
            assert_eq!(preset.to_string(), name);
        }
        assert!("".parse::<ScrubPreset>().is_err());
    }
}

//! Per-preset scrub switches.
//!
//! Each preset maps to one immutable [`ScrubConfig`] table entry.

use serde::Serialize;

use crate::ScrubPreset;

/// Body text written over every message when a preset redacts bodies.
pub const BODY_REDACTED_PLACEHOLDER: &str = "[Message body redacted]";

/// Switches controlling which mutation categories a scrub pass applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct ScrubConfig {
    pub redact_body: bool,
    pub body_placeholder: Option<&'static str>,
    pub drop_attachments: bool,
    pub scrub_secrets: bool,
    pub clear_ack_state: bool,
    pub clear_recipients: bool,
    pub clear_file_reservations: bool,
    pub clear_agent_links: bool,
}

impl ScrubConfig {
    pub const STANDARD: Self = Self {
        redact_body: false,
        body_placeholder: None,
        drop_attachments: false,
        scrub_secrets: true,
        clear_ack_state: true,
        clear_recipients: true,
        clear_file_reservations: true,
        clear_agent_links: true,
    };

    pub const STRICT: Self = Self {
        redact_body: true,
        body_placeholder: Some(BODY_REDACTED_PLACEHOLDER),
        drop_attachments: true,
        ..Self::STANDARD
    };

    pub const ARCHIVE: Self = Self {
        redact_body: false,
        body_placeholder: None,
        drop_attachments: false,
        scrub_secrets: false,
        clear_ack_state: false,
        clear_recipients: false,
        clear_file_reservations: false,
        clear_agent_links: false,
    };

    /// Whether the message pass needs to decode attachment JSON at all.
    #[must_use]
    pub const fn touches_attachments(&self) -> bool {
        self.drop_attachments || self.scrub_secrets
    }

    /// The body text to write when `redact_body` is set.
    #[must_use]
    pub fn placeholder(&self) -> &'static str {
        self.body_placeholder.unwrap_or(BODY_REDACTED_PLACEHOLDER)
    }
}

impl ScrubPreset {
    #[must_use]
    pub const fn config(self) -> &'static ScrubConfig {
        match self {
            Self::Standard => &ScrubConfig::STANDARD,
            Self::Strict => &ScrubConfig::STRICT,
            Self::Archive => &ScrubConfig::ARCHIVE,
        }
    }
}

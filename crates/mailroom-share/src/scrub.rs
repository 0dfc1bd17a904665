//! Snapshot scrubbing: apply a [`ScrubPreset`] to every message in place.

use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, Row, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::preset::ScrubConfig;
use crate::secrets::scan_for_secrets;
use crate::snapshot::{Snapshot, count_rows, table_exists};
use crate::structure::{canonical_json, scrub_structure};
use crate::{ScrubPreset, ShareError, ShareResult};

/// Summary of scrub operations performed on a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrubSummary {
    pub preset: String,
    /// Reserved for agent pseudonymization; currently the preset name.
    pub pseudonym_salt: String,
    pub agents_total: i64,
    /// Always zero: agent names are never rewritten.
    pub agents_pseudonymized: i64,
    pub ack_flags_cleared: i64,
    pub recipients_cleared: i64,
    pub file_reservations_removed: i64,
    pub agent_links_removed: i64,
    pub secrets_replaced: i64,
    pub attachments_sanitized: i64,
    pub bodies_redacted: i64,
    pub attachments_cleared: i64,
}

impl ScrubSummary {
    fn new(preset: ScrubPreset, agents_total: i64) -> Self {
        Self {
            preset: preset.as_str().to_string(),
            pseudonym_salt: preset.as_str().to_string(),
            agents_total,
            agents_pseudonymized: 0,
            ack_flags_cleared: 0,
            recipients_cleared: 0,
            file_reservations_removed: 0,
            agent_links_removed: 0,
            secrets_replaced: 0,
            attachments_sanitized: 0,
            bodies_redacted: 0,
            attachments_cleared: 0,
        }
    }

    /// Replacements and removals made by the pass.
    ///
    /// The ack and recipient resets are left out: they count every row they
    /// visit, so a repeated pass reports them again.
    #[must_use]
    pub const fn content_changes(&self) -> i64 {
        self.file_reservations_removed
            + self.agent_links_removed
            + self.secrets_replaced
            + self.attachments_sanitized
            + self.bodies_redacted
            + self.attachments_cleared
    }
}

/// Apply scrub operations to a snapshot database according to the given preset.
///
/// Operates in-place on the provided snapshot file.
///
/// # Errors
///
/// - [`ShareError::SnapshotNotFound`] if the file does not exist.
/// - [`ShareError::Sqlite`] on any SQLite error.
pub fn scrub_snapshot(snapshot_path: &Path, preset: ScrubPreset) -> ShareResult<ScrubSummary> {
    Snapshot::open(snapshot_path)?.scrub(preset)
}

impl Snapshot {
    /// Run one scrub pass. Every change commits together or not at all.
    pub fn scrub(&mut self, preset: ScrubPreset) -> ShareResult<ScrubSummary> {
        let cfg = preset.config();
        let tx = self.begin()?;

        let mut summary = ScrubSummary::new(preset, count_rows(&tx, "agents")?);

        if cfg.clear_ack_state {
            summary.ack_flags_cleared = exec_count(&tx, "UPDATE messages SET ack_required = 0")?;
        }
        if cfg.clear_recipients {
            summary.recipients_cleared = exec_count(
                &tx,
                "UPDATE message_recipients SET read_ts = NULL, ack_ts = NULL",
            )?;
        }
        if cfg.clear_file_reservations && table_exists(&tx, "file_reservations")? {
            summary.file_reservations_removed = exec_count(&tx, "DELETE FROM file_reservations")?;
        }
        if cfg.clear_agent_links && table_exists(&tx, "agent_links")? {
            summary.agent_links_removed = exec_count(&tx, "DELETE FROM agent_links")?;
        }
        tracing::debug!(
            ack_flags = summary.ack_flags_cleared,
            recipients = summary.recipients_cleared,
            file_reservations = summary.file_reservations_removed,
            agent_links = summary.agent_links_removed,
            "cleared ephemeral state"
        );

        scrub_messages(&tx, cfg, &mut summary)?;

        tx.commit()
            .map_err(|e| ShareError::sqlite("COMMIT failed", &e))?;

        tracing::info!(
            preset = %preset,
            secrets = summary.secrets_replaced,
            attachments = summary.attachments_sanitized,
            bodies = summary.bodies_redacted,
            "scrubbed snapshot"
        );
        Ok(summary)
    }
}

fn exec_count(conn: &Connection, sql: &str) -> ShareResult<i64> {
    let affected = conn
        .execute(sql, [])
        .map_err(|e| ShareError::sqlite(sql, &e))?;
    Ok(i64::try_from(affected).unwrap_or(i64::MAX))
}

/// A text column as stored. SQLite does not enforce declared types, so a
/// column may hold a blob, a number or bytes that are not UTF-8.
#[derive(Debug, PartialEq, Eq)]
enum StoredText {
    Text(String),
    Null,
    Unreadable(&'static str),
}

impl StoredText {
    fn read(row: &Row<'_>, idx: usize) -> rusqlite::Result<Self> {
        Ok(match row.get_ref(idx)? {
            ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => Self::Text(text.to_owned()),
                Err(_) => Self::Unreadable("invalid UTF-8 text"),
            },
            ValueRef::Null => Self::Null,
            ValueRef::Blob(_) => Self::Unreadable("blob"),
            ValueRef::Integer(_) => Self::Unreadable("integer"),
            ValueRef::Real(_) => Self::Unreadable("real"),
        })
    }

    fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Null | Self::Unreadable(_) => None,
        }
    }
}

struct MessageRow {
    id: i64,
    subject: StoredText,
    body: StoredText,
    attachments: StoredText,
}

fn load_messages(conn: &Connection) -> ShareResult<Vec<MessageRow>> {
    let mut stmt = conn
        .prepare("SELECT id, subject, body_md, attachments FROM messages ORDER BY id")
        .map_err(|e| ShareError::sqlite("SELECT messages failed", &e))?;
    stmt.query_map([], |row| {
        Ok(MessageRow {
            id: row.get(0)?,
            subject: StoredText::read(row, 1)?,
            body: StoredText::read(row, 2)?,
            attachments: StoredText::read(row, 3)?,
        })
    })
    .and_then(Iterator::collect)
    .map_err(|e| ShareError::sqlite("SELECT messages failed", &e))
}

/// Scan one text column, or log and skip it when it holds no readable text.
fn scan_column(
    message_id: i64,
    column: &'static str,
    stored: &StoredText,
    summary: &mut ScrubSummary,
) -> Option<String> {
    match stored {
        StoredText::Text(text) => {
            let scan = scan_for_secrets(text);
            summary.secrets_replaced += scan.replacements;
            scan.changed().then_some(scan.text)
        }
        StoredText::Null => None,
        StoredText::Unreadable(kind) => {
            tracing::warn!(message_id, column, kind, "column is not text; left as stored");
            None
        }
    }
}

/// Decode a stored attachment list.
///
/// Returns the items and whether the stored value must be rewritten because it
/// was not a JSON array.
fn decode_attachments(message_id: i64, stored: &StoredText) -> (Vec<Value>, bool) {
    match stored {
        StoredText::Text(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(items)) => (items, false),
            Ok(other) => {
                tracing::warn!(
                    message_id,
                    kind = json_kind(&other),
                    "attachments are not a JSON array; resetting to []"
                );
                (Vec::new(), true)
            }
            Err(err) => {
                tracing::warn!(message_id, error = %err, "malformed attachments JSON; resetting to []");
                (Vec::new(), true)
            }
        },
        StoredText::Null => {
            tracing::warn!(message_id, "attachments are NULL; resetting to []");
            (Vec::new(), true)
        }
        StoredText::Unreadable(kind) => {
            tracing::warn!(message_id, kind, "attachments are not text; resetting to []");
            (Vec::new(), true)
        }
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn scrub_messages(
    conn: &Connection,
    cfg: &ScrubConfig,
    summary: &mut ScrubSummary,
) -> ShareResult<()> {
    // The archive preset never reads message content.
    if !cfg.scrub_secrets && !cfg.redact_body && !cfg.touches_attachments() {
        return Ok(());
    }

    let messages = load_messages(conn)?;
    let mut update = conn
        .prepare(
            "UPDATE messages SET subject = COALESCE(?1, subject), \
             body_md = COALESCE(?2, body_md), attachments = COALESCE(?3, attachments) \
             WHERE id = ?4",
        )
        .map_err(|e| ShareError::sqlite("prepare message update failed", &e))?;

    for msg in &messages {
        let mut subject = None;
        let mut body = None;

        if cfg.scrub_secrets {
            subject = scan_column(msg.id, "subject", &msg.subject, summary);
            body = scan_column(msg.id, "body_md", &msg.body, summary);
        }

        if cfg.redact_body {
            let placeholder = cfg.placeholder();
            if msg.body.as_text() == Some(placeholder) {
                body = None;
            } else {
                summary.bodies_redacted += 1;
                body = Some(placeholder.to_string());
            }
        }

        let mut attachments = None;
        if cfg.touches_attachments() {
            let (mut items, mut updated) =
                decode_attachments(msg.id, &msg.attachments);
            let mut activity = 0;

            if cfg.drop_attachments && !items.is_empty() {
                items.clear();
                summary.attachments_cleared += 1;
                updated = true;
            }

            if cfg.scrub_secrets && !items.is_empty() {
                let original = Value::Array(items);
                let scrubbed = scrub_structure(&original);
                activity = scrubbed.replacements + scrubbed.keys_removed;
                summary.secrets_replaced += scrubbed.replacements;
                if scrubbed.value != original {
                    updated = true;
                }
                items = match scrubbed.value {
                    Value::Array(arr) => arr,
                    _ => Vec::new(),
                };
            }

            if updated || activity > 0 {
                summary.attachments_sanitized += 1;
            }
            if updated {
                attachments = Some(canonical_json(&Value::Array(items)));
            }
        }

        if subject.is_none() && body.is_none() && attachments.is_none() {
            continue;
        }
        update
            .execute(params![subject, body, attachments, msg.id])
            .map_err(|e| ShareError::sqlite("UPDATE messages failed", &e))?;
        tracing::debug!(message_id = msg.id, "rewrote message content");
    }

    tracing::debug!(messages = messages.len(), "scanned messages");
    Ok(())
}

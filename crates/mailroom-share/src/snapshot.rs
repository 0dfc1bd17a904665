//! Handle on a snapshot database opened for offline manipulation.
//!
//! A snapshot is a standalone SQLite file produced by the export pipeline.
//! Scoping and scrubbing each take `&mut Snapshot`, so one handle can never
//! run both passes at the same time.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};

use crate::scope::RemainingCounts;
use crate::{ShareError, ShareResult};

pub struct Snapshot {
    conn: Connection,
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("path", &self.conn.path())
            .finish()
    }
}

impl Snapshot {
    /// Open an existing snapshot file. Never creates one.
    pub fn open(path: &Path) -> ShareResult<Self> {
        if !path.exists() {
            return Err(ShareError::SnapshotNotFound {
                path: path.display().to_string(),
            });
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| {
            ShareError::sqlite(&format!("cannot open snapshot {}", path.display()), &e)
        })?;
        Self::from_connection(conn)
    }

    /// Wrap an already-open connection (e.g. an in-memory database).
    pub fn from_connection(conn: Connection) -> ShareResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON")
            .map_err(|e| ShareError::sqlite("PRAGMA foreign_keys failed", &e))?;
        Ok(Self { conn })
    }

    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    #[must_use]
    pub fn into_connection(self) -> Connection {
        self.conn
    }

    /// Start the single write transaction a pass runs in.
    ///
    /// Dropping the returned transaction without committing rolls it back.
    pub(crate) fn begin(&mut self) -> ShareResult<Transaction<'_>> {
        self.conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| ShareError::sqlite("BEGIN transaction failed", &e))
    }

    pub fn table_exists(&self, name: &str) -> ShareResult<bool> {
        table_exists(&self.conn, name)
    }

    /// Current row count of every snapshot table.
    pub fn row_counts(&self) -> ShareResult<RemainingCounts> {
        row_counts(&self.conn)
    }
}

/// Copy a live mail database into a new standalone snapshot file.
///
/// The copy goes through SQLite (`VACUUM INTO`), so pages that are committed
/// but still sitting in the source's `-wal` file are included. Returns the
/// destination path.
///
/// # Errors
///
/// - [`ShareError::SnapshotNotFound`] if `source` does not exist.
/// - [`ShareError::SnapshotDestinationExists`] if `destination` already exists.
/// - [`ShareError::Sqlite`] on any SQLite error.
/// - [`ShareError::Io`] on filesystem errors.
pub fn create_snapshot(source: &Path, destination: &Path) -> ShareResult<PathBuf> {
    if !source.exists() {
        return Err(ShareError::SnapshotNotFound {
            path: source.display().to_string(),
        });
    }
    if destination.exists() {
        return Err(ShareError::SnapshotDestinationExists {
            path: destination.display().to_string(),
        });
    }
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let Some(dest) = destination.to_str() else {
        return Err(ShareError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("snapshot path is not valid UTF-8: {}", destination.display()),
        )));
    };

    let src = Connection::open_with_flags(
        source,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| {
        ShareError::sqlite(&format!("cannot open source DB {}", source.display()), &e)
    })?;

    // Best-effort: another connection may still hold the WAL open.
    let _ = src.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()));

    src.execute("VACUUM INTO ?1", [dest])
        .map_err(|e| ShareError::sqlite(&format!("cannot write snapshot {dest}"), &e))?;
    tracing::debug!(source = %source.display(), destination = dest, "created snapshot");
    Ok(destination.to_path_buf())
}

pub(crate) fn table_exists(conn: &Connection, name: &str) -> ShareResult<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [name],
        |row| row.get(0),
    )
    .map_err(|e| ShareError::sqlite("table_exists check failed", &e))
}

/// Table names cannot be bound parameters; only these are ever counted.
const COUNTABLE_TABLES: &[(&str, &str)] = &[
    ("projects", "SELECT COUNT(*) FROM projects"),
    ("agents", "SELECT COUNT(*) FROM agents"),
    ("messages", "SELECT COUNT(*) FROM messages"),
    ("message_recipients", "SELECT COUNT(*) FROM message_recipients"),
    ("file_reservations", "SELECT COUNT(*) FROM file_reservations"),
    ("agent_links", "SELECT COUNT(*) FROM agent_links"),
    (
        "project_sibling_suggestions",
        "SELECT COUNT(*) FROM project_sibling_suggestions",
    ),
];

pub(crate) fn count_rows(conn: &Connection, table: &str) -> ShareResult<i64> {
    let Some((_, sql)) = COUNTABLE_TABLES.iter().find(|(name, _)| *name == table) else {
        return Err(ShareError::Sqlite {
            message: format!("unsupported table for COUNT(*): {table}"),
        });
    };
    conn.query_row(sql, [], |row| row.get(0))
        .map_err(|e| ShareError::sqlite(&format!("COUNT(*) from {table} failed"), &e))
}

/// Count rows, treating a missing optional table as empty.
pub(crate) fn count_if_exists(conn: &Connection, table: &str) -> ShareResult<i64> {
    if table_exists(conn, table)? {
        count_rows(conn, table)
    } else {
        Ok(0)
    }
}

pub(crate) fn row_counts(conn: &Connection) -> ShareResult<RemainingCounts> {
    Ok(RemainingCounts {
        projects: count_rows(conn, "projects")?,
        agents: count_rows(conn, "agents")?,
        messages: count_rows(conn, "messages")?,
        recipients: count_rows(conn, "message_recipients")?,
        file_reservations: count_rows(conn, "file_reservations")?,
        agent_links: count_if_exists(conn, "agent_links")?,
        project_sibling_suggestions: count_if_exists(conn, "project_sibling_suggestions")?,
    })
}

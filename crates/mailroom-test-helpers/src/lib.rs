//! Shared test helpers: snapshot schema DDL and fixture builders.
//!
//! Fixtures are real SQLite files in a temporary directory so the engine is
//! exercised through the same `Snapshot::open` path the CLI uses.

#![forbid(unsafe_code)]
#![allow(clippy::must_use_candidate, clippy::missing_const_for_fn)]

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};
use tempfile::TempDir;

/// DDL for every table a snapshot can contain.
///
/// Foreign keys are declared so that `PRAGMA foreign_keys = ON` catches any
/// delete that would strand a child row.
pub const SNAPSHOT_SCHEMA: &str = "
CREATE TABLE projects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    slug TEXT NOT NULL UNIQUE,
    human_key TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT ''
);
CREATE TABLE agents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    name TEXT NOT NULL,
    program TEXT NOT NULL DEFAULT '',
    model TEXT NOT NULL DEFAULT '',
    task_description TEXT NOT NULL DEFAULT '',
    inception_ts TEXT NOT NULL DEFAULT '',
    last_active_ts TEXT NOT NULL DEFAULT '',
    attachments_policy TEXT NOT NULL DEFAULT 'auto',
    contact_policy TEXT NOT NULL DEFAULT 'auto',
    UNIQUE (project_id, name)
);
CREATE TABLE messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    sender_id INTEGER NOT NULL REFERENCES agents(id),
    thread_id TEXT,
    subject TEXT NOT NULL DEFAULT '',
    body_md TEXT NOT NULL DEFAULT '',
    importance TEXT NOT NULL DEFAULT 'normal',
    ack_required INTEGER NOT NULL DEFAULT 0,
    created_ts TEXT NOT NULL DEFAULT '',
    attachments TEXT NOT NULL DEFAULT '[]'
);
CREATE TABLE message_recipients (
    message_id INTEGER NOT NULL REFERENCES messages(id),
    agent_id INTEGER NOT NULL REFERENCES agents(id),
    kind TEXT NOT NULL DEFAULT 'to',
    read_ts TEXT,
    ack_ts TEXT,
    PRIMARY KEY (message_id, agent_id)
);
CREATE TABLE file_reservations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    agent_id INTEGER NOT NULL REFERENCES agents(id),
    path_pattern TEXT NOT NULL,
    exclusive INTEGER NOT NULL DEFAULT 1,
    reason TEXT NOT NULL DEFAULT '',
    created_ts TEXT NOT NULL DEFAULT '',
    expires_ts TEXT NOT NULL DEFAULT '',
    released_ts TEXT
);
CREATE TABLE agent_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    a_project_id INTEGER NOT NULL REFERENCES projects(id),
    a_agent_id INTEGER NOT NULL REFERENCES agents(id),
    b_project_id INTEGER NOT NULL REFERENCES projects(id),
    b_agent_id INTEGER NOT NULL REFERENCES agents(id),
    status TEXT NOT NULL DEFAULT 'pending',
    reason TEXT NOT NULL DEFAULT '',
    created_ts TEXT NOT NULL DEFAULT '',
    updated_ts TEXT NOT NULL DEFAULT '',
    expires_ts TEXT
);
CREATE TABLE project_sibling_suggestions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_a_id INTEGER NOT NULL REFERENCES projects(id),
    project_b_id INTEGER NOT NULL REFERENCES projects(id),
    score REAL NOT NULL DEFAULT 0.0,
    status TEXT NOT NULL DEFAULT 'suggested',
    rationale TEXT NOT NULL DEFAULT '',
    created_ts TEXT NOT NULL DEFAULT '',
    evaluated_ts TEXT NOT NULL DEFAULT '',
    confirmed_ts TEXT,
    dismissed_ts TEXT
);
";

/// Create every snapshot table on `conn`.
pub fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SNAPSHOT_SCHEMA)
}

/// A snapshot file in its own temporary directory, plus a seeding connection.
pub struct FixtureDb {
    _dir: TempDir,
    path: PathBuf,
    conn: Connection,
}

impl Default for FixtureDb {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureDb {
    /// Create an empty snapshot with the full schema.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("snapshot.sqlite3");
        let conn = Connection::open(&path).expect("open fixture db");
        conn.execute_batch("PRAGMA foreign_keys = ON")
            .expect("enable foreign keys");
        create_schema(&conn).expect("create schema");
        Self {
            _dir: dir,
            path,
            conn,
        }
    }

    /// Like [`FixtureDb::new`], but in WAL mode with automatic checkpoints
    /// off, so committed writes stay in the `-wal` file while this handle is
    /// open.
    pub fn with_wal() -> Self {
        let db = Self::new();
        let mode: String = db
            .conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .expect("enable WAL");
        assert_eq!(mode.to_ascii_lowercase(), "wal");
        db.conn
            .pragma_update_and_check(None, "wal_autocheckpoint", 0, |row| row.get::<_, i64>(0))
            .expect("disable autocheckpoint");
        db
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn execute(&self, sql: &str) {
        self.conn.execute_batch(sql).expect("fixture sql");
    }

    pub fn project(&self, slug: &str, human_key: &str) -> i64 {
        self.conn
            .execute(
                "INSERT INTO projects (slug, human_key, created_at) VALUES (?1, ?2, '2026-01-01T00:00:00Z')",
                params![slug, human_key],
            )
            .expect("insert project");
        self.conn.last_insert_rowid()
    }

    pub fn agent(&self, project_id: i64, name: &str) -> i64 {
        self.conn
            .execute(
                "INSERT INTO agents (project_id, name, program, model) VALUES (?1, ?2, 'codex', 'gpt')",
                params![project_id, name],
            )
            .expect("insert agent");
        self.conn.last_insert_rowid()
    }

    pub fn message(&self, project_id: i64, sender_id: i64, subject: &str, body: &str) -> i64 {
        self.conn
            .execute(
                "INSERT INTO messages (project_id, sender_id, subject, body_md, created_ts)
                 VALUES (?1, ?2, ?3, ?4, '2026-01-02T00:00:00Z')",
                params![project_id, sender_id, subject, body],
            )
            .expect("insert message");
        self.conn.last_insert_rowid()
    }

    pub fn set_attachments(&self, message_id: i64, attachments: &str) {
        self.conn
            .execute(
                "UPDATE messages SET attachments = ?1 WHERE id = ?2",
                params![attachments, message_id],
            )
            .expect("update attachments");
    }

    pub fn set_ack_required(&self, message_id: i64, ack_required: bool) {
        self.conn
            .execute(
                "UPDATE messages SET ack_required = ?1 WHERE id = ?2",
                params![i64::from(ack_required), message_id],
            )
            .expect("update ack_required");
    }

    pub fn recipient(
        &self,
        message_id: i64,
        agent_id: i64,
        read_ts: Option<&str>,
        ack_ts: Option<&str>,
    ) {
        self.conn
            .execute(
                "INSERT INTO message_recipients (message_id, agent_id, read_ts, ack_ts) VALUES (?1, ?2, ?3, ?4)",
                params![message_id, agent_id, read_ts, ack_ts],
            )
            .expect("insert recipient");
    }

    pub fn file_reservation(&self, project_id: i64, agent_id: i64, pattern: &str) -> i64 {
        self.conn
            .execute(
                "INSERT INTO file_reservations (project_id, agent_id, path_pattern, expires_ts)
                 VALUES (?1, ?2, ?3, '2026-01-03T00:00:00Z')",
                params![project_id, agent_id, pattern],
            )
            .expect("insert file reservation");
        self.conn.last_insert_rowid()
    }

    pub fn agent_link(&self, a_project: i64, a_agent: i64, b_project: i64, b_agent: i64) -> i64 {
        self.conn
            .execute(
                "INSERT INTO agent_links (a_project_id, a_agent_id, b_project_id, b_agent_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![a_project, a_agent, b_project, b_agent],
            )
            .expect("insert agent link");
        self.conn.last_insert_rowid()
    }

    pub fn sibling_suggestion(&self, project_a: i64, project_b: i64) -> i64 {
        self.conn
            .execute(
                "INSERT INTO project_sibling_suggestions (project_a_id, project_b_id, score)
                 VALUES (?1, ?2, 0.75)",
                params![project_a, project_b],
            )
            .expect("insert sibling suggestion");
        self.conn.last_insert_rowid()
    }

    /// `SELECT COUNT(*)` over a table name taken from test code.
    pub fn count(&self, table: &str) -> i64 {
        self.conn
            .query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
                row.get(0)
            })
            .expect("count rows")
    }

    /// Read one text column of one message.
    pub fn message_text(&self, message_id: i64, column: &str) -> Option<String> {
        self.conn
            .query_row(
                &format!("SELECT \"{column}\" FROM messages WHERE id = ?1"),
                [message_id],
                |row| row.get(0),
            )
            .optional()
            .expect("read message column")
    }

    pub fn ack_required(&self, message_id: i64) -> i64 {
        self.conn
            .query_row(
                "SELECT ack_required FROM messages WHERE id = ?1",
                [message_id],
                |row| row.get(0),
            )
            .expect("read ack_required")
    }

    /// Deterministic dump of every row in every table, for before/after
    /// comparisons.
    pub fn dump(&self) -> Vec<String> {
        let tables: Vec<String> = {
            let mut stmt = self
                .conn
                .prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table'
                     AND name NOT LIKE 'sqlite_%' ORDER BY name",
                )
                .expect("list tables");
            stmt.query_map([], |row| row.get(0))
                .expect("query tables")
                .collect::<rusqlite::Result<_>>()
                .expect("collect tables")
        };
        let mut out = Vec::new();
        for table in tables {
            let mut stmt = self
                .conn
                .prepare(&format!("SELECT * FROM \"{table}\" ORDER BY rowid"))
                .expect("prepare dump");
            let columns = stmt.column_count();
            let rows = stmt
                .query_map([], |row| {
                    let mut cells = Vec::with_capacity(columns);
                    for idx in 0..columns {
                        let value: rusqlite::types::Value = row.get(idx)?;
                        cells.push(format!("{value:?}"));
                    }
                    Ok(cells.join("|"))
                })
                .expect("query dump")
                .collect::<rusqlite::Result<Vec<_>>>()
                .expect("collect dump");
            for row in rows {
                out.push(format!("{table}:{row}"));
            }
        }
        out
    }
}

/// Two projects with cross-links between them.
///
/// `proj-alpha` (`/data/projects/alpha`): agent `GreenCastle`, messages 1 and 2,
/// one file reservation. `proj-beta` (`/data/projects/beta`): agent
/// `PurpleBear`, message 3, one file reservation. One agent link and one
/// sibling suggestion connect the two projects.
pub fn two_project_snapshot() -> FixtureDb {
    let db = FixtureDb::new();
    seed_two_projects(&db);
    db
}

/// Seed the [`two_project_snapshot`] rows into an existing fixture.
pub fn seed_two_projects(db: &FixtureDb) {
    let alpha = db.project("proj-alpha", "/data/projects/alpha");
    let beta = db.project("proj-beta", "/data/projects/beta");
    let green = db.agent(alpha, "GreenCastle");
    let purple = db.agent(beta, "PurpleBear");
    let m1 = db.message(alpha, green, "Msg A", "alpha body one");
    let m2 = db.message(alpha, green, "Msg B", "alpha body two");
    let m3 = db.message(beta, purple, "Msg C", "beta body");
    db.recipient(m1, green, Some("2026-01-02T01:00:00Z"), None);
    db.recipient(m2, green, None, Some("2026-01-02T02:00:00Z"));
    db.recipient(m3, purple, Some("2026-01-02T03:00:00Z"), Some("2026-01-02T04:00:00Z"));
    db.file_reservation(alpha, green, "src/*.rs");
    db.file_reservation(beta, purple, "docs/**");
    db.agent_link(alpha, green, beta, purple);
    db.sibling_suggestion(alpha, beta);
}

/// Three projects, one agent and one message each, plus links across them.
pub fn three_project_snapshot() -> FixtureDb {
    let db = FixtureDb::new();
    let mut agents = Vec::new();
    for (slug, key, agent) in [
        ("alpha", "/work/Alpha-Repo", "BlueLake"),
        ("beta", "/work/Beta-Repo", "RedStone"),
        ("gamma", "/work/Gamma-Repo", "GoldHill"),
    ] {
        let project = db.project(slug, key);
        let agent_id = db.agent(project, agent);
        let message = db.message(project, agent_id, &format!("{slug} status"), "all good");
        db.recipient(message, agent_id, None, None);
        db.file_reservation(project, agent_id, "Cargo.toml");
        agents.push((project, agent_id));
    }
    db.agent_link(agents[0].0, agents[0].1, agents[1].0, agents[1].1);
    db.agent_link(agents[1].0, agents[1].1, agents[2].0, agents[2].1);
    db.sibling_suggestion(agents[0].0, agents[2].0);
    db
}

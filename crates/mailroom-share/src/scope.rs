//! Project scoping: delete rows for non-selected projects.
//!
//! Given a snapshot database and a list of project identifiers (slugs or
//! human keys), removes all data belonging to non-selected projects.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use rusqlite::{Connection, params_from_iter};
use serde::{Deserialize, Serialize};

use crate::snapshot::{Snapshot, row_counts, table_exists};
use crate::{ShareError, ShareResult};

/// A project record from the `projects` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: i64,
    pub slug: String,
    pub human_key: String,
}

/// Result of applying project scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectScopeResult {
    /// The identifiers that were requested (echoed back).
    pub identifiers: Vec<String>,
    /// Projects that matched the identifiers (kept), in request order.
    pub projects: Vec<ProjectRecord>,
    /// How many projects were removed.
    pub removed_count: usize,
    /// Rows inside kept projects deleted because they named a removed agent:
    /// recipients, file reservations, agent links and messages it sent.
    pub orphans_removed: usize,
    /// Remaining row counts per table after scoping.
    pub remaining: RemainingCounts,
}

/// Row counts in the scoped database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemainingCounts {
    pub projects: i64,
    pub agents: i64,
    pub messages: i64,
    pub recipients: i64,
    pub file_reservations: i64,
    pub agent_links: i64,
    pub project_sibling_suggestions: i64,
}

/// One cascading delete. `{keep}` expands to the kept project ids and
/// `{agents}` to the ids of agents living in kept projects.
struct ScopeDelete {
    table: &'static str,
    optional: bool,
    /// Removes rows of kept projects that point at a removed agent.
    orphan: bool,
    filter: &'static str,
}

/// Children strictly before parents. Orphans inside kept projects go first,
/// then everything belonging to the removed projects.
const SCOPE_DELETE_PLAN: &[ScopeDelete] = &[
    ScopeDelete {
        table: "agent_links",
        optional: true,
        orphan: true,
        filter: "a_project_id IN ({keep}) AND b_project_id IN ({keep}) \
                 AND (a_agent_id NOT IN ({agents}) OR b_agent_id NOT IN ({agents}))",
    },
    ScopeDelete {
        table: "message_recipients",
        optional: false,
        orphan: true,
        filter: "message_id IN (SELECT id FROM messages WHERE project_id IN ({keep})) \
                 AND (agent_id NOT IN ({agents}) \
                 OR message_id IN (SELECT id FROM messages WHERE sender_id NOT IN ({agents})))",
    },
    ScopeDelete {
        table: "messages",
        optional: false,
        orphan: true,
        filter: "project_id IN ({keep}) AND sender_id NOT IN ({agents})",
    },
    ScopeDelete {
        table: "file_reservations",
        optional: false,
        orphan: true,
        filter: "project_id IN ({keep}) AND agent_id NOT IN ({agents})",
    },
    ScopeDelete {
        table: "agent_links",
        optional: true,
        orphan: false,
        filter: "a_project_id NOT IN ({keep}) OR b_project_id NOT IN ({keep})",
    },
    ScopeDelete {
        table: "project_sibling_suggestions",
        optional: true,
        orphan: false,
        filter: "project_a_id NOT IN ({keep}) OR project_b_id NOT IN ({keep})",
    },
    ScopeDelete {
        table: "message_recipients",
        optional: false,
        orphan: false,
        filter: "message_id IN (SELECT id FROM messages WHERE project_id NOT IN ({keep}))",
    },
    ScopeDelete {
        table: "messages",
        optional: false,
        orphan: false,
        filter: "project_id NOT IN ({keep})",
    },
    ScopeDelete {
        table: "file_reservations",
        optional: false,
        orphan: false,
        filter: "project_id NOT IN ({keep})",
    },
    ScopeDelete {
        table: "agents",
        optional: false,
        orphan: false,
        filter: "project_id NOT IN ({keep})",
    },
    ScopeDelete {
        table: "projects",
        optional: false,
        orphan: false,
        filter: "id NOT IN ({keep})",
    },
];

impl ScopeDelete {
    fn sql(&self, keep: &str) -> String {
        let filter = self
            .filter
            .replace("{agents}", "SELECT id FROM agents WHERE project_id IN ({keep})")
            .replace("{keep}", keep);
        format!("DELETE FROM {} WHERE {filter}", self.table)
    }
}

/// Apply project scoping to the snapshot file at `snapshot_path`.
///
/// # Errors
///
/// - [`ShareError::ScopeNoProjects`] if the database has no projects.
/// - [`ShareError::ScopeIdentifierNotFound`] if any identifier doesn't match.
/// - [`ShareError::ScopeNoMatchingProjects`] if every identifier is blank.
/// - [`ShareError::Sqlite`] on any SQLite error.
pub fn apply_project_scope(
    snapshot_path: &Path,
    identifiers: &[String],
) -> ShareResult<ProjectScopeResult> {
    Snapshot::open(snapshot_path)?.apply_scope(identifiers)
}

impl Snapshot {
    /// Keep only the projects named by `identifiers`.
    ///
    /// If `identifiers` is empty, all projects are kept and no deletions occur.
    /// Otherwise each identifier is matched against slugs, then human keys
    /// (case-insensitive, trimmed); every other project is deleted together
    /// with everything that references it.
    pub fn apply_scope(&mut self, identifiers: &[String]) -> ShareResult<ProjectScopeResult> {
        let all_projects = load_projects(self.connection())?;
        if all_projects.is_empty() {
            return Err(ShareError::ScopeNoProjects);
        }

        if identifiers.is_empty() {
            let remaining = self.row_counts()?;
            return Ok(ProjectScopeResult {
                identifiers: Vec::new(),
                projects: all_projects,
                removed_count: 0,
                orphans_removed: 0,
                remaining,
            });
        }

        let matched = resolve_identifiers(&all_projects, identifiers)?;
        let keep_ids: Vec<i64> = matched.iter().map(|p| p.id).collect();
        let removed_total = all_projects.len() - matched.len();

        if removed_total == 0 {
            tracing::debug!(
                projects = matched.len(),
                "scope selects every project; nothing to delete"
            );
            let remaining = self.row_counts()?;
            return Ok(ProjectScopeResult {
                identifiers: identifiers.to_vec(),
                projects: matched,
                removed_count: 0,
                orphans_removed: 0,
                remaining,
            });
        }

        let tx = self.begin()?;
        let DeleteTotals {
            projects: removed_count,
            orphans: orphans_removed,
        } = delete_unselected(&tx, &keep_ids)?;
        let remaining = row_counts(&tx)?;
        tx.commit()
            .map_err(|e| ShareError::sqlite("COMMIT failed", &e))?;

        tracing::info!(
            kept = matched.len(),
            removed = removed_count,
            orphans = orphans_removed,
            messages = remaining.messages,
            agents = remaining.agents,
            "applied project scope"
        );

        Ok(ProjectScopeResult {
            identifiers: identifiers.to_vec(),
            projects: matched,
            removed_count,
            orphans_removed,
            remaining,
        })
    }
}

fn load_projects(conn: &Connection) -> ShareResult<Vec<ProjectRecord>> {
    let mut stmt = conn
        .prepare("SELECT id, slug, human_key FROM projects ORDER BY id")
        .map_err(|e| ShareError::sqlite("SELECT projects failed", &e))?;
    stmt.query_map([], |row| {
        Ok(ProjectRecord {
            id: row.get(0)?,
            slug: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            human_key: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        })
    })
    .and_then(Iterator::collect)
    .map_err(|e| ShareError::sqlite("SELECT projects failed", &e))
}

fn lookup_key(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Map identifiers to projects, de-duplicated, in first-seen order.
fn resolve_identifiers(
    projects: &[ProjectRecord],
    identifiers: &[String],
) -> ShareResult<Vec<ProjectRecord>> {
    let mut by_slug: HashMap<String, &ProjectRecord> = HashMap::new();
    let mut by_human_key: HashMap<String, &ProjectRecord> = HashMap::new();
    for project in projects {
        by_slug.entry(lookup_key(&project.slug)).or_insert(project);
        by_human_key
            .entry(lookup_key(&project.human_key))
            .or_insert(project);
    }

    let mut matched = Vec::new();
    let mut seen = HashSet::new();
    for ident in identifiers {
        let key = lookup_key(ident);
        if key.is_empty() {
            continue;
        }
        let Some(project) = by_slug.get(&key).or_else(|| by_human_key.get(&key)) else {
            return Err(ShareError::ScopeIdentifierNotFound {
                identifier: ident.clone(),
            });
        };
        if seen.insert(project.id) {
            matched.push((*project).clone());
        }
    }

    if matched.is_empty() {
        return Err(ShareError::ScopeNoMatchingProjects);
    }
    Ok(matched)
}

/// `?1, ?2, ...`: numbered so one statement can reuse the list.
fn numbered_placeholders(n: usize) -> String {
    (1..=n)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

struct DeleteTotals {
    projects: usize,
    orphans: usize,
}

/// Run the delete plan.
fn delete_unselected(conn: &Connection, keep_ids: &[i64]) -> ShareResult<DeleteTotals> {
    let keep = numbered_placeholders(keep_ids.len());
    let mut totals = DeleteTotals {
        projects: 0,
        orphans: 0,
    };
    for step in SCOPE_DELETE_PLAN {
        if step.optional && !table_exists(conn, step.table)? {
            tracing::debug!(table = step.table, "table absent; skipping scope delete");
            continue;
        }
        let deleted = conn
            .execute(&step.sql(&keep), params_from_iter(keep_ids.iter()))
            .map_err(|e| ShareError::sqlite(&format!("DELETE FROM {} failed", step.table), &e))?;
        tracing::debug!(table = step.table, orphan = step.orphan, deleted, "scope delete");
        if step.orphan {
            totals.orphans += deleted;
        } else if step.table == "projects" {
            totals.projects = deleted;
        }
    }
    if totals.orphans > 0 {
        tracing::info!(
            rows = totals.orphans,
            "removed rows in kept projects that referenced removed agents"
        );
    }
    Ok(totals)
}

//! SQLite persistence for the intel brief pipeline.
//!
//! Four tables: `runs` (one row per pipeline execution, mirroring every
//! blackboard key the pipeline may need to inspect), `discoveries` and
//! `contacts` (append-only children of a run), and `audit_log` (one row
//! per executed step or notable event).
//!
//! Concurrency model: WAL journal mode with one short-lived connection per
//! call. Writers from different worker tasks serialize on SQLite's write
//! lock; readers see the last committed state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use brief_types::{AuditEntry, AuditStatus, Blackboard, RunRow, RunStatus, RunSummary, Webhook};

const AUDIT_MESSAGE_MAX_CHARS: usize = 2000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("run {0} not found")]
    RunNotFound(i64),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Handle to the pipeline database. Cheap to clone; every operation opens
/// its own connection.
#[derive(Debug, Clone)]
pub struct Store {
    db_path: PathBuf,
}

impl Store {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> StoreResult<Connection> {
        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        // PRAGMA journal_mode returns a row, so query_row and ignore it
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute("PRAGMA synchronous = NORMAL", [])?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(conn)
    }

    /// Idempotently create the schema.
    pub fn init(&self) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                target_domain TEXT NOT NULL,
                prospect_name TEXT,
                prospect_email TEXT,
                target_company TEXT,
                product_description TEXT,
                campaign_id TEXT,
                tier TEXT,
                batch_id INTEGER,
                search_strategy TEXT,
                discovery_signals_a TEXT,
                discovery_signals_b TEXT,
                discovery_buyers TEXT,
                featured_buyer_id TEXT,
                featured_buyer_name TEXT,
                featured_buyer_type TEXT,
                selection_rationale TEXT,
                secondary_buyers TEXT,
                feat_profile TEXT,
                feat_contacts TEXT,
                feat_opportunities TEXT,
                feat_ai_context TEXT,
                sec_profiles TEXT,
                sec_contacts TEXT,
                section_exec_summary TEXT,
                section_featured TEXT,
                section_secondary TEXT,
                section_cta TEXT,
                report_markdown TEXT,
                validation_result TEXT,
                notion_url TEXT,
                status TEXT DEFAULT 'pending',
                created_at TEXT DEFAULT (datetime('now')),
                completed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS discoveries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL,
                target_domain TEXT NOT NULL,
                buyer_id TEXT,
                buyer_name TEXT,
                signal_type TEXT,
                signal_summary TEXT,
                signal_score REAL,
                discovered_at TEXT DEFAULT (datetime('now')),
                FOREIGN KEY (run_id) REFERENCES runs(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS contacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL,
                buyer_id TEXT,
                contact_name TEXT,
                contact_title TEXT,
                contact_email TEXT,
                email_verified INTEGER,
                discovered_at TEXT DEFAULT (datetime('now')),
                FOREIGN KEY (run_id) REFERENCES runs(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER,
                step TEXT NOT NULL,
                status TEXT NOT NULL,
                message TEXT,
                duration_seconds REAL,
                metadata TEXT,
                created_at TEXT DEFAULT (datetime('now')),
                FOREIGN KEY (run_id) REFERENCES runs(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_runs_domain ON runs(target_domain);
            CREATE INDEX IF NOT EXISTS idx_runs_batch ON runs(batch_id);
            CREATE INDEX IF NOT EXISTS idx_contacts_buyer ON contacts(buyer_id);
            CREATE INDEX IF NOT EXISTS idx_audit_run ON audit_log(run_id);",
        )?;
        Ok(())
    }

    // ========================================================================
    // Run lifecycle
    // ========================================================================

    /// Create a minimal run row carrying only the webhook fields. All other
    /// columns stay NULL until backfilled by the discovery or terminal
    /// updates. Returns the assigned run id.
    pub fn insert_run_stub(&self, webhook: &Webhook, batch_id: Option<i64>) -> StoreResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO runs (target_domain, prospect_name, prospect_email,
                               target_company, product_description, campaign_id, tier,
                               batch_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                webhook.target_domain,
                none_if_empty(&webhook.prospect_name),
                none_if_empty(&webhook.prospect_email),
                none_if_empty(&webhook.target_company),
                none_if_empty(&webhook.product_description),
                none_if_empty(&webhook.campaign_id),
                webhook.tier.to_string(),
                batch_id,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// `pending → processing`. No effect on rows already past pending.
    pub fn mark_run_processing(&self, run_id: i64) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE runs SET status = 'processing' WHERE id = ?1 AND status = 'pending'",
            params![run_id],
        )?;
        Ok(())
    }

    /// Backfill discovery-phase columns. COALESCE keeps values that were
    /// already written; this backfills NULL columns only.
    pub fn update_run_discovery(&self, run_id: i64, board: &Blackboard) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE runs SET
                search_strategy = COALESCE(search_strategy, ?1),
                discovery_signals_a = COALESCE(discovery_signals_a, ?2),
                discovery_signals_b = COALESCE(discovery_signals_b, ?3),
                discovery_buyers = COALESCE(discovery_buyers, ?4),
                featured_buyer_id = COALESCE(featured_buyer_id, ?5),
                featured_buyer_name = COALESCE(featured_buyer_name, ?6),
                featured_buyer_type = COALESCE(featured_buyer_type, ?7),
                selection_rationale = COALESCE(selection_rationale, ?8),
                secondary_buyers = COALESCE(secondary_buyers, ?9)
             WHERE id = ?10",
            params![
                json_opt(&board.search_strategy)?,
                json_opt(&board.discovery_signals_a)?,
                json_opt(&board.discovery_signals_b)?,
                json_opt(&merged_direct_buyers(board))?,
                board.featured_buyer_id,
                board.featured_buyer_name,
                board.featured_buyer_type,
                board.selection_rationale,
                json_opt(&board.secondary_buyers)?,
                run_id,
            ],
        )?;
        Ok(())
    }

    /// Write enrichment and report columns, set status `completed`.
    pub fn update_run_completed(&self, run_id: i64, board: &Blackboard) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE runs SET
                feat_profile = ?1, feat_contacts = ?2, feat_opportunities = ?3,
                feat_ai_context = ?4,
                sec_profiles = ?5, sec_contacts = ?6,
                section_exec_summary = ?7, section_featured = ?8,
                section_secondary = ?9, section_cta = ?10,
                report_markdown = ?11, validation_result = ?12,
                notion_url = ?13,
                status = 'completed', completed_at = datetime('now')
             WHERE id = ?14",
            params![
                json_opt(&board.feat_profile)?,
                json_opt(&board.feat_contacts)?,
                json_opt(&board.feat_opportunities)?,
                board.feat_ai_context,
                json_opt(&board.sec_profiles)?,
                json_opt(&board.sec_contacts)?,
                board.section_exec_summary,
                board.section_featured,
                board.section_secondary,
                board.section_cta,
                board.report_markdown,
                json_opt(&board.validation_result)?,
                board.notion_url,
                run_id,
            ],
        )?;
        Ok(())
    }

    /// Mark a run `failed` and persist whatever partial state exists.
    /// Every persisted blackboard column is COALESCE-merged so values
    /// saved by the discovery update or a completed branch are never
    /// overwritten by a later NULL.
    pub fn update_run_failed(&self, run_id: i64, board: &Blackboard) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE runs SET
                status = 'failed',
                completed_at = datetime('now'),
                search_strategy = COALESCE(search_strategy, ?1),
                discovery_signals_a = COALESCE(discovery_signals_a, ?2),
                discovery_signals_b = COALESCE(discovery_signals_b, ?3),
                discovery_buyers = COALESCE(discovery_buyers, ?4),
                featured_buyer_id = COALESCE(featured_buyer_id, ?5),
                featured_buyer_name = COALESCE(featured_buyer_name, ?6),
                featured_buyer_type = COALESCE(featured_buyer_type, ?7),
                selection_rationale = COALESCE(selection_rationale, ?8),
                secondary_buyers = COALESCE(secondary_buyers, ?9),
                feat_profile = COALESCE(feat_profile, ?10),
                feat_contacts = COALESCE(feat_contacts, ?11),
                feat_opportunities = COALESCE(feat_opportunities, ?12),
                feat_ai_context = COALESCE(feat_ai_context, ?13),
                sec_profiles = COALESCE(sec_profiles, ?14),
                sec_contacts = COALESCE(sec_contacts, ?15),
                section_exec_summary = COALESCE(section_exec_summary, ?16),
                section_featured = COALESCE(section_featured, ?17),
                section_secondary = COALESCE(section_secondary, ?18),
                section_cta = COALESCE(section_cta, ?19),
                report_markdown = COALESCE(report_markdown, ?20),
                validation_result = COALESCE(validation_result, ?21),
                notion_url = COALESCE(notion_url, ?22)
             WHERE id = ?23",
            params![
                json_opt(&board.search_strategy)?,
                json_opt(&board.discovery_signals_a)?,
                json_opt(&board.discovery_signals_b)?,
                json_opt(&merged_direct_buyers(board))?,
                board.featured_buyer_id,
                board.featured_buyer_name,
                board.featured_buyer_type,
                board.selection_rationale,
                json_opt(&board.secondary_buyers)?,
                json_opt(&board.feat_profile)?,
                json_opt(&board.feat_contacts)?,
                json_opt(&board.feat_opportunities)?,
                board.feat_ai_context,
                json_opt(&board.sec_profiles)?,
                json_opt(&board.sec_contacts)?,
                board.section_exec_summary,
                board.section_featured,
                board.section_secondary,
                board.section_cta,
                board.report_markdown,
                json_opt(&board.validation_result)?,
                board.notion_url,
                run_id,
            ],
        )?;
        Ok(())
    }

    /// Mark a run `cancelled`, but only while it is still pending or
    /// processing. Terminal rows are untouched.
    pub fn update_run_cancelled(&self, run_id: i64) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE runs SET status = 'cancelled', completed_at = datetime('now')
             WHERE id = ?1 AND status IN ('processing', 'pending')",
            params![run_id],
        )?;
        Ok(())
    }

    /// Workspace-URL fix-up. The one permitted write to a terminal row.
    pub fn update_run_notion_url(&self, run_id: i64, url: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE runs SET notion_url = ?1 WHERE id = ?2",
            params![url, run_id],
        )?;
        Ok(())
    }

    // ========================================================================
    // Children
    // ========================================================================

    pub fn insert_discoveries(
        &self,
        run_id: i64,
        target_domain: &str,
        scored: &[brief_types::ScoredBuyer],
    ) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for buyer in scored {
            tx.execute(
                "INSERT INTO discoveries (run_id, target_domain, buyer_id, buyer_name,
                                          signal_type, signal_summary, signal_score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    run_id,
                    target_domain,
                    buyer.buyer_id,
                    buyer.buyer_name,
                    buyer.top_signal_type,
                    buyer.top_signal_summary,
                    buyer.score,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Bulk insert contact records. Fields come from the provider's
    /// attribute bags (`name`/`title`/`email`/`emailVerified`).
    pub fn insert_contacts(
        &self,
        run_id: i64,
        buyer_id: &str,
        contacts: &[Value],
    ) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for contact in contacts {
            let name = contact.get("name").and_then(Value::as_str);
            let title = contact.get("title").and_then(Value::as_str);
            let email = contact.get("email").and_then(Value::as_str);
            let verified = contact
                .get("emailVerified")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            tx.execute(
                "INSERT INTO contacts (run_id, buyer_id, contact_name, contact_title,
                                       contact_email, email_verified)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![run_id, buyer_id, name, title, email, verified as i64],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // ========================================================================
    // Audit log
    // ========================================================================

    /// Record an audit entry. Never propagates an error to the caller;
    /// a broken audit write must not break the pipeline.
    pub fn log_step(
        &self,
        run_id: i64,
        step: &str,
        status: AuditStatus,
        message: Option<&str>,
        duration: Option<f64>,
        metadata: Option<&Value>,
    ) {
        if let Err(e) = self.try_log_step(run_id, step, status, message, duration, metadata) {
            tracing::warn!(run_id, step, error = %e, "audit write failed");
        }
    }

    fn try_log_step(
        &self,
        run_id: i64,
        step: &str,
        status: AuditStatus,
        message: Option<&str>,
        duration: Option<f64>,
        metadata: Option<&Value>,
    ) -> StoreResult<()> {
        let conn = self.conn()?;
        let truncated = message.map(|m| {
            if m.chars().count() > AUDIT_MESSAGE_MAX_CHARS {
                m.chars().take(AUDIT_MESSAGE_MAX_CHARS).collect::<String>()
            } else {
                m.to_string()
            }
        });
        let metadata_json = metadata.map(serde_json::to_string).transpose()?;
        conn.execute(
            "INSERT INTO audit_log (run_id, step, status, message, duration_seconds, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run_id,
                step,
                status.as_str(),
                truncated,
                duration.map(|d| (d * 1000.0).round() / 1000.0),
                metadata_json,
            ],
        )?;
        Ok(())
    }

    pub fn get_audit_log(&self, run_id: i64) -> StoreResult<Vec<AuditEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, run_id, step, status, message, duration_seconds, metadata, created_at
             FROM audit_log WHERE run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(AuditEntry {
                id: row.get(0)?,
                run_id: row.get(1)?,
                step: row.get(2)?,
                status: row.get(3)?,
                message: row.get(4)?,
                duration_seconds: row.get(5)?,
                metadata: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn get_run(&self, run_id: i64) -> StoreResult<RunRow> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
                params![run_id],
                row_to_run,
            )
            .optional()?;
        row.ok_or(StoreError::RunNotFound(run_id))
    }

    pub fn get_run_status(&self, run_id: i64) -> StoreResult<Option<RunStatus>> {
        let conn = self.conn()?;
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM runs WHERE id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.as_deref().and_then(RunStatus::parse))
    }

    pub fn get_recent_runs(&self, limit: u32) -> StoreResult<Vec<RunSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, target_domain, target_company, status, created_at, completed_at,
                    featured_buyer_name, notion_url, batch_id
             FROM runs ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], row_to_summary)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_batch_runs(&self, batch_id: i64) -> StoreResult<Vec<RunSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, target_domain, target_company, status, created_at, completed_at,
                    featured_buyer_name, notion_url, batch_id
             FROM runs WHERE batch_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![batch_id], row_to_summary)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Most recent runs for a domain, newest first.
    pub fn load_prior_runs(&self, target_domain: &str, limit: u32) -> StoreResult<Vec<RunRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE target_domain = ?1
             ORDER BY id DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![target_domain, limit], row_to_run)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Next batch id: monotonically increasing across the table.
    pub fn next_batch_id(&self) -> StoreResult<i64> {
        let conn = self.conn()?;
        let max: i64 = conn.query_row(
            "SELECT COALESCE(MAX(batch_id), 0) FROM runs",
            [],
            |row| row.get(0),
        )?;
        Ok(max + 1)
    }

    pub fn count_runs_in_status(&self, status: RunStatus) -> StoreResult<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM runs WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?)
    }

    pub fn get_discoveries(&self, run_id: i64) -> StoreResult<Vec<Value>> {
        self.rows_as_json(
            "SELECT id, run_id, target_domain, buyer_id, buyer_name, signal_type,
                    signal_summary, signal_score, discovered_at
             FROM discoveries WHERE run_id = ?1 ORDER BY id",
            run_id,
        )
    }

    pub fn get_contacts(&self, run_id: i64) -> StoreResult<Vec<Value>> {
        self.rows_as_json(
            "SELECT id, run_id, buyer_id, contact_name, contact_title, contact_email,
                    email_verified, discovered_at
             FROM contacts WHERE run_id = ?1 ORDER BY id",
            run_id,
        )
    }

    fn rows_as_json(&self, sql: &str, run_id: i64) -> StoreResult<Vec<Value>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let column_names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(|c| c.to_string())
            .collect();
        let rows = stmt.query_map(params![run_id], |row| {
            let mut object = serde_json::Map::new();
            for (idx, name) in column_names.iter().enumerate() {
                let value = match row.get_ref(idx)? {
                    rusqlite::types::ValueRef::Null => Value::Null,
                    rusqlite::types::ValueRef::Integer(i) => Value::from(i),
                    rusqlite::types::ValueRef::Real(f) => Value::from(f),
                    rusqlite::types::ValueRef::Text(t) => {
                        Value::from(String::from_utf8_lossy(t).to_string())
                    }
                    rusqlite::types::ValueRef::Blob(_) => Value::Null,
                };
                object.insert(name.clone(), value);
            }
            Ok(Value::Object(object))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

// Direct buyers persist as the union of the type-filter and geographic
// branches; both land in the `discovery_buyers` column.
fn merged_direct_buyers(board: &Blackboard) -> Option<Vec<Value>> {
    match (&board.discovery_buyers, &board.discovery_buyers_geo) {
        (None, None) => None,
        (a, b) => {
            let mut out = Vec::new();
            if let Some(a) = a {
                out.extend(a.iter().cloned());
            }
            if let Some(b) = b {
                out.extend(b.iter().cloned());
            }
            Some(out)
        }
    }
}

fn json_opt<T: Serialize>(value: &Option<T>) -> Result<Option<String>, serde_json::Error> {
    value.as_ref().map(serde_json::to_string).transpose()
}

fn none_if_empty(value: &str) -> Option<&str> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

const RUN_COLUMNS: &str = "id, target_domain, target_company, product_description, campaign_id,
    prospect_name, prospect_email, tier, batch_id, search_strategy,
    discovery_signals_a, discovery_signals_b, discovery_buyers,
    featured_buyer_id, featured_buyer_name, featured_buyer_type,
    selection_rationale, secondary_buyers, feat_profile, feat_contacts,
    feat_opportunities, feat_ai_context, sec_profiles, sec_contacts,
    section_exec_summary, section_featured, section_secondary, section_cta,
    report_markdown, validation_result, notion_url, status, created_at,
    completed_at";

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<RunRow> {
    Ok(RunRow {
        id: row.get(0)?,
        target_domain: row.get(1)?,
        target_company: row.get(2)?,
        product_description: row.get(3)?,
        campaign_id: row.get(4)?,
        prospect_name: row.get(5)?,
        prospect_email: row.get(6)?,
        tier: row.get(7)?,
        batch_id: row.get(8)?,
        search_strategy: row.get(9)?,
        discovery_signals_a: row.get(10)?,
        discovery_signals_b: row.get(11)?,
        discovery_buyers: row.get(12)?,
        featured_buyer_id: row.get(13)?,
        featured_buyer_name: row.get(14)?,
        featured_buyer_type: row.get(15)?,
        selection_rationale: row.get(16)?,
        secondary_buyers: row.get(17)?,
        feat_profile: row.get(18)?,
        feat_contacts: row.get(19)?,
        feat_opportunities: row.get(20)?,
        feat_ai_context: row.get(21)?,
        sec_profiles: row.get(22)?,
        sec_contacts: row.get(23)?,
        section_exec_summary: row.get(24)?,
        section_featured: row.get(25)?,
        section_secondary: row.get(26)?,
        section_cta: row.get(27)?,
        report_markdown: row.get(28)?,
        validation_result: row.get(29)?,
        notion_url: row.get(30)?,
        status: row.get(31)?,
        created_at: row.get(32)?,
        completed_at: row.get(33)?,
    })
}

fn row_to_summary(row: &Row<'_>) -> rusqlite::Result<RunSummary> {
    Ok(RunSummary {
        id: row.get(0)?,
        target_domain: row.get(1)?,
        target_company: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
        completed_at: row.get(5)?,
        featured_buyer_name: row.get(6)?,
        notion_url: row.get(7)?,
        batch_id: row.get(8)?,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use brief_types::{ScoredBuyer, SearchStrategy};
    use serde_json::json;

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("pipeline.db"));
        store.init().unwrap();
        (dir, store)
    }

    fn webhook() -> Webhook {
        Webhook {
            target_company: "Acme".to_string(),
            target_domain: "acme.com".to_string(),
            product_description: "widget procurement platform".to_string(),
            ..Webhook::default()
        }
    }

    fn scored(name: &str, score: f64) -> ScoredBuyer {
        ScoredBuyer {
            buyer_id: format!("id-{name}"),
            buyer_name: name.to_string(),
            buyer_type: "City".to_string(),
            signal_count: 2,
            top_signal_type: "RFP".to_string(),
            top_signal_summary: "RFP for widgets".to_string(),
            score,
        }
    }

    #[test]
    fn init_is_idempotent() {
        let (_dir, store) = temp_store();
        store.init().unwrap();
        store.init().unwrap();
    }

    #[test]
    fn stub_then_discovery_then_completed_roundtrips() {
        let (_dir, store) = temp_store();
        let run_id = store.insert_run_stub(&webhook(), None).unwrap();
        store.mark_run_processing(run_id).unwrap();

        let mut board = Blackboard::default();
        let mut strategy = SearchStrategy::default();
        strategy.primary_keywords = vec!["widget".to_string()];
        board.search_strategy = Some(strategy.clone());
        board.discovery_signals_a = Some(vec![json!({"id": "opp-1", "buyerId": "B1"})]);
        board.featured_buyer_id = Some("B1".to_string());
        board.featured_buyer_name = Some("Springfield".to_string());
        board.all_scored_buyers = Some(vec![scored("Springfield", 0.9)]);
        store.update_run_discovery(run_id, &board).unwrap();

        board.report_markdown = Some("# Springfield report".to_string());
        board.section_exec_summary = Some("summary".to_string());
        board.notion_url = Some("https://notion.so/abc".to_string());
        store.update_run_completed(run_id, &board).unwrap();

        let row = store.get_run(run_id).unwrap();
        assert_eq!(row.status, "completed");
        assert!(row.completed_at.is_some());
        assert_eq!(row.featured_buyer_name.as_deref(), Some("Springfield"));
        assert_eq!(row.report_markdown.as_deref(), Some("# Springfield report"));

        let stored: SearchStrategy =
            serde_json::from_str(row.search_strategy.as_deref().unwrap()).unwrap();
        assert_eq!(stored.primary_keywords, strategy.primary_keywords);

        let signals: Vec<Value> =
            serde_json::from_str(row.discovery_signals_a.as_deref().unwrap()).unwrap();
        assert_eq!(signals.len(), 1);
    }

    #[test]
    fn discovery_update_backfills_null_columns_only() {
        let (_dir, store) = temp_store();
        let run_id = store.insert_run_stub(&webhook(), None).unwrap();

        let first = Blackboard {
            featured_buyer_name: Some("Springfield".to_string()),
            ..Blackboard::default()
        };
        store.update_run_discovery(run_id, &first).unwrap();

        let second = Blackboard {
            featured_buyer_name: Some("Shelbyville".to_string()),
            selection_rationale: Some("second pass".to_string()),
            ..Blackboard::default()
        };
        store.update_run_discovery(run_id, &second).unwrap();

        let row = store.get_run(run_id).unwrap();
        assert_eq!(row.featured_buyer_name.as_deref(), Some("Springfield"));
        assert_eq!(row.selection_rationale.as_deref(), Some("second pass"));
    }

    #[test]
    fn failed_update_never_overwrites_existing_values() {
        let (_dir, store) = temp_store();
        let run_id = store.insert_run_stub(&webhook(), None).unwrap();

        let mut board = Blackboard::default();
        board.featured_buyer_name = Some("Springfield".to_string());
        board.selection_rationale = Some("top score".to_string());
        store.update_run_discovery(run_id, &board).unwrap();

        // Failure path runs with a board that never produced those keys.
        let partial = Blackboard {
            section_exec_summary: Some("summary from the branch that finished".to_string()),
            ..Blackboard::default()
        };
        store.update_run_failed(run_id, &partial).unwrap();

        let row = store.get_run(run_id).unwrap();
        assert_eq!(row.status, "failed");
        assert_eq!(row.featured_buyer_name.as_deref(), Some("Springfield"));
        assert_eq!(row.selection_rationale.as_deref(), Some("top score"));
        assert_eq!(
            row.section_exec_summary.as_deref(),
            Some("summary from the branch that finished")
        );
    }

    #[test]
    fn cancelled_only_applies_to_live_runs() {
        let (_dir, store) = temp_store();
        let run_id = store.insert_run_stub(&webhook(), None).unwrap();

        store.update_run_cancelled(run_id).unwrap();
        assert_eq!(
            store.get_run_status(run_id).unwrap(),
            Some(RunStatus::Cancelled)
        );

        let completed_id = store.insert_run_stub(&webhook(), None).unwrap();
        store
            .update_run_completed(completed_id, &Blackboard::default())
            .unwrap();
        store.update_run_cancelled(completed_id).unwrap();
        assert_eq!(
            store.get_run_status(completed_id).unwrap(),
            Some(RunStatus::Completed),
            "terminal rows must not transition to cancelled"
        );
    }

    #[test]
    fn notion_url_backfill_is_allowed_on_terminal_rows() {
        let (_dir, store) = temp_store();
        let run_id = store.insert_run_stub(&webhook(), None).unwrap();
        store
            .update_run_completed(run_id, &Blackboard::default())
            .unwrap();

        store
            .update_run_notion_url(run_id, "https://notion.so/fixedup")
            .unwrap();
        let row = store.get_run(run_id).unwrap();
        assert_eq!(row.status, "completed");
        assert_eq!(row.notion_url.as_deref(), Some("https://notion.so/fixedup"));
    }

    #[test]
    fn log_step_truncates_and_never_panics() {
        let (_dir, store) = temp_store();
        let run_id = store.insert_run_stub(&webhook(), None).unwrap();

        let long_message = "x".repeat(5000);
        store.log_step(
            run_id,
            "s3a_primary_search",
            AuditStatus::Failure,
            Some(&long_message),
            Some(1.23456),
            Some(&json!({"results": 0})),
        );

        let entries = store.get_audit_log(run_id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message.as_ref().unwrap().chars().count(), 2000);
        assert_eq!(entries[0].duration_seconds, Some(1.235));

        // A store pointed at an unwritable path must swallow the error.
        let broken = Store::new("/dev/null/nope/pipeline.db");
        broken.log_step(1, "s0_parse_webhook", AuditStatus::Success, None, None, None);
    }

    #[test]
    fn prior_runs_are_newest_first_and_limited() {
        let (_dir, store) = temp_store();
        for _ in 0..7 {
            store.insert_run_stub(&webhook(), None).unwrap();
        }
        let prior = store.load_prior_runs("acme.com", 5).unwrap();
        assert_eq!(prior.len(), 5);
        assert!(prior.windows(2).all(|w| w[0].id > w[1].id));
        assert!(store.load_prior_runs("other.com", 5).unwrap().is_empty());
    }

    #[test]
    fn batch_ids_are_monotonic() {
        let (_dir, store) = temp_store();
        let first = store.next_batch_id().unwrap();
        store.insert_run_stub(&webhook(), Some(first)).unwrap();
        let second = store.next_batch_id().unwrap();
        assert!(second > first);

        store.insert_run_stub(&webhook(), Some(second)).unwrap();
        store.insert_run_stub(&webhook(), Some(second)).unwrap();
        assert_eq!(store.get_batch_runs(second).unwrap().len(), 2);
    }

    #[test]
    fn children_reference_their_run() {
        let (_dir, store) = temp_store();
        let run_id = store.insert_run_stub(&webhook(), None).unwrap();

        store
            .insert_discoveries(run_id, "acme.com", &[scored("A", 0.5), scored("B", 0.4)])
            .unwrap();
        store
            .insert_contacts(
                run_id,
                "id-A",
                &[json!({"name": "Jane Doe", "title": "Director", "email": "jane@a.gov",
                         "emailVerified": true})],
            )
            .unwrap();

        assert_eq!(store.get_discoveries(run_id).unwrap().len(), 2);
        let contacts = store.get_contacts(run_id).unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0]["contact_name"], "Jane Doe");
        assert_eq!(contacts[0]["email_verified"], 1);

        // FK enforcement: a child pointing at a missing run must fail.
        let err = store.insert_discoveries(9999, "acme.com", &[scored("C", 0.1)]);
        assert!(err.is_err());
    }

    #[test]
    fn recent_runs_are_listed_newest_first() {
        let (_dir, store) = temp_store();
        for _ in 0..3 {
            store.insert_run_stub(&webhook(), None).unwrap();
        }
        let recent = store.get_recent_runs(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].id > recent[1].id);
    }
}

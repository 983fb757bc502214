use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use thiserror::Error;

use crate::models::{
    ApplicationStatus, Candidate, JobApplication, KillSwitchState, ReasonCode, Stats, Verdict,
};

/// Typed failures for the status state machine; everything else in here
/// reports through anyhow like the rest of the crate.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("No application with draft filename '{0}'")]
    NotFound(String),
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: ApplicationStatus,
        to: ApplicationStatus,
    },
}

/// Most recent active (or cooldown-window) application matching a
/// company/position pair.
#[derive(Debug, Clone)]
pub struct DuplicateMatch {
    pub status: ApplicationStatus,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub draft_filename: Option<String>,
    pub company: String,
    pub position: String,
    pub fit_score: i64,
    pub confidence_score: i64,
    pub approved: bool,
    pub reason: Option<ReasonCode>,
    pub message: String,
    pub decided_at: DateTime<Utc>,
}

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open() -> Result<Self> {
        let path = Self::default_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        // Concurrent runs wait on the write lock instead of erroring out.
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self { conn, path })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn default_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("SNIPE_DB") {
            return Ok(PathBuf::from(path));
        }
        // Use XDG data directory or fallback
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "snipe") {
            Ok(proj_dirs.data_dir().join("snipe.db"))
        } else {
            Ok(PathBuf::from("snipe.db"))
        }
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS job_statuses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                draft_filename TEXT NOT NULL UNIQUE,
                company TEXT NOT NULL,
                position TEXT NOT NULL,
                fit_score INTEGER NOT NULL DEFAULT 0,
                confidence_score INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'applied', 'denied', 'accepted', 'no_response')),
                contact_email TEXT,
                contact_name TEXT,
                contact_phone TEXT,
                job_url TEXT,
                source TEXT,
                created_date TEXT NOT NULL,
                applied_date TEXT,
                response_date TEXT,
                notes TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_job_statuses_status ON job_statuses(status);
            CREATE INDEX IF NOT EXISTS idx_job_statuses_company ON job_statuses(company);

            CREATE TABLE IF NOT EXISTS blacklist_companies (
                company TEXT PRIMARY KEY,
                reason TEXT,
                added_date TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS blacklist_keywords (
                keyword TEXT PRIMARY KEY,
                added_date TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS kill_switch (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                active INTEGER NOT NULL DEFAULT 0,
                reason TEXT,
                activated_at TEXT
            );

            CREATE TABLE IF NOT EXISTS gate_audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                draft_filename TEXT,
                company TEXT NOT NULL,
                position TEXT NOT NULL,
                fit_score INTEGER NOT NULL,
                confidence_score INTEGER NOT NULL,
                approved INTEGER NOT NULL,
                reason_code TEXT,
                message TEXT NOT NULL,
                decided_at TEXT NOT NULL
            );

            INSERT OR IGNORE INTO kill_switch (id, active) VALUES (1, 0);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='job_statuses'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!("Database not initialized. Run 'snipe init' first."));
        }
        Ok(())
    }

    /// One candidate's evaluate-then-apply runs inside this. BEGIN IMMEDIATE
    /// takes the write lock up front, so two concurrent runs cannot both read
    /// the same rate window and both approve.
    pub fn immediate_tx(&self) -> Result<rusqlite::Transaction<'_>> {
        rusqlite::Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .context("Failed to begin immediate transaction")
    }

    // --- Ledger operations ---

    /// Insert a candidate as pending. Re-inserting an existing draft_filename
    /// resolves to the existing row's id; the original row is untouched.
    pub fn add_job(&self, candidate: &Candidate, now: DateTime<Utc>) -> Result<i64> {
        let inserted = self.conn.execute(
            "INSERT INTO job_statuses
             (draft_filename, company, position, fit_score, confidence_score, status,
              contact_email, contact_name, contact_phone, job_url, source, created_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                candidate.draft_filename,
                candidate.company,
                candidate.position,
                candidate.fit_score,
                candidate.confidence_score,
                ApplicationStatus::Pending.as_str(),
                candidate.contact.email,
                candidate.contact.name,
                candidate.contact.phone,
                candidate.job_url,
                candidate.source,
                fmt_ts(now),
            ],
        );

        match inserted {
            Ok(_) => Ok(self.conn.last_insert_rowid()),
            Err(e) if is_unique_violation(&e) => self
                .conn
                .query_row(
                    "SELECT id FROM job_statuses WHERE draft_filename = ?1",
                    [&candidate.draft_filename],
                    |row| row.get(0),
                )
                .context("Failed to look up existing application"),
            Err(e) => Err(e).context("Failed to insert application"),
        }
    }

    pub fn get_job(&self, draft_filename: &str) -> Result<Option<JobApplication>> {
        self.conn
            .query_row(
                &format!("SELECT {APPLICATION_COLUMNS} FROM job_statuses WHERE draft_filename = ?1"),
                [draft_filename],
                row_to_application,
            )
            .optional()
            .context("Failed to fetch application")
    }

    /// Move an application along the state machine, stamping applied_date or
    /// response_date as appropriate. Terminal records never move again.
    pub fn update_status(
        &self,
        draft_filename: &str,
        new_status: ApplicationStatus,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let job = self
            .get_job(draft_filename)?
            .ok_or_else(|| LedgerError::NotFound(draft_filename.to_string()))?;

        if !job.status.can_transition_to(new_status) {
            return Err(LedgerError::InvalidTransition {
                from: job.status,
                to: new_status,
            }
            .into());
        }

        // Only `applied` or a terminal state is reachable past the guard, and
        // each stamps its date exactly once.
        let changed = if new_status == ApplicationStatus::Applied {
            self.conn.execute(
                "UPDATE job_statuses SET status = ?1, applied_date = ?2
                 WHERE draft_filename = ?3 AND status = ?4",
                params![
                    new_status.as_str(),
                    fmt_ts(now),
                    draft_filename,
                    job.status.as_str()
                ],
            )?
        } else {
            self.conn.execute(
                "UPDATE job_statuses SET status = ?1, response_date = ?2
                 WHERE draft_filename = ?3 AND status = ?4",
                params![
                    new_status.as_str(),
                    fmt_ts(now),
                    draft_filename,
                    job.status.as_str()
                ],
            )?
        };
        if changed == 0 {
            bail!(
                "Application '{}' changed status concurrently, not updated",
                draft_filename
            );
        }

        if let Some(text) = notes {
            self.append_note(draft_filename, text)?;
        }
        Ok(())
    }

    pub fn append_note(&self, draft_filename: &str, note: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE job_statuses
             SET notes = CASE WHEN notes IS NULL OR notes = ''
                              THEN ?1
                              ELSE notes || char(10) || ?1 END
             WHERE draft_filename = ?2",
            params![note, draft_filename],
        )?;
        if changed == 0 {
            return Err(LedgerError::NotFound(draft_filename.to_string()).into());
        }
        Ok(())
    }

    /// The one sanctioned reversal: a submission the collaborator reported as
    /// failed goes back to pending, and its applied_date leaves the rate
    /// window since nothing actually went out. Audited.
    pub fn revert_to_pending(
        &self,
        draft_filename: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let job = self
            .get_job(draft_filename)?
            .ok_or_else(|| LedgerError::NotFound(draft_filename.to_string()))?;

        if job.status != ApplicationStatus::Applied {
            bail!(
                "Only applied records can be reverted; '{}' is {}",
                draft_filename,
                job.status
            );
        }

        let changed = self.conn.execute(
            "UPDATE job_statuses SET status = 'pending', applied_date = NULL
             WHERE draft_filename = ?1 AND status = 'applied'",
            [draft_filename],
        )?;
        if changed == 0 {
            bail!(
                "Application '{}' changed status concurrently, not reverted",
                draft_filename
            );
        }

        self.append_note(
            draft_filename,
            &format!("submission failure reported: {reason}"),
        )?;
        self.log_audit(
            Some(draft_filename),
            &job.company,
            &job.position,
            job.fit_score,
            job.confidence_score,
            false,
            None,
            &format!("reverted applied -> pending: {reason}"),
            now,
        )
    }

    /// With no filter, actionable statuses surface first, newest within each.
    pub fn jobs_by_status(
        &self,
        status: Option<ApplicationStatus>,
    ) -> Result<Vec<JobApplication>> {
        let mut jobs = Vec::new();
        match status {
            Some(s) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {APPLICATION_COLUMNS} FROM job_statuses
                     WHERE status = ?1 ORDER BY created_date DESC"
                ))?;
                let rows = stmt.query_map([s.as_str()], row_to_application)?;
                for row in rows {
                    jobs.push(row?);
                }
            }
            None => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {APPLICATION_COLUMNS} FROM job_statuses
                     ORDER BY
                        CASE status
                            WHEN 'pending' THEN 1
                            WHEN 'applied' THEN 2
                            WHEN 'denied' THEN 3
                            WHEN 'accepted' THEN 4
                            ELSE 5
                        END,
                        created_date DESC"
                ))?;
                let rows = stmt.query_map([], row_to_application)?;
                for row in rows {
                    jobs.push(row?);
                }
            }
        }
        Ok(jobs)
    }

    /// Applications whose applied_date falls inside [since, now]. Always
    /// recomputed from the rows, never a cached counter.
    pub fn count_recent_applied(&self, since: DateTime<Utc>) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM job_statuses
                 WHERE applied_date IS NOT NULL AND applied_date >= ?1",
                [fmt_ts(since)],
                |row| row.get(0),
            )
            .context("Failed to count recent applications")
    }

    /// Case-insensitive exact match over active (pending/applied) rows,
    /// most recent first. Pure read.
    pub fn find_active_duplicate(
        &self,
        company: &str,
        position: &str,
    ) -> Result<Option<DuplicateMatch>> {
        self.conn
            .query_row(
                "SELECT status, COALESCE(applied_date, created_date) FROM job_statuses
                 WHERE LOWER(company) = LOWER(?1)
                 AND LOWER(position) = LOWER(?2)
                 AND status IN ('pending', 'applied')
                 ORDER BY created_date DESC
                 LIMIT 1",
                params![company.trim(), position.trim()],
                row_to_duplicate,
            )
            .optional()
            .context("Failed to check for duplicate application")
    }

    /// Cooldown layer: match rows of any status whose application date (or
    /// creation date if never applied) is on or after `since`.
    pub fn find_cooldown_duplicate(
        &self,
        company: &str,
        position: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<DuplicateMatch>> {
        self.conn
            .query_row(
                "SELECT status, COALESCE(applied_date, created_date) FROM job_statuses
                 WHERE LOWER(company) = LOWER(?1)
                 AND LOWER(position) = LOWER(?2)
                 AND COALESCE(applied_date, created_date) >= ?3
                 ORDER BY created_date DESC
                 LIMIT 1",
                params![company.trim(), position.trim(), fmt_ts(since)],
                row_to_duplicate,
            )
            .optional()
            .context("Failed to check duplicate cooldown")
    }

    pub fn stats(&self) -> Result<Stats> {
        let count = |status: &str| -> Result<i64> {
            self.conn
                .query_row(
                    "SELECT COUNT(*) FROM job_statuses WHERE status = ?1",
                    [status],
                    |row| row.get(0),
                )
                .context("Failed to count applications")
        };

        let avg: Option<f64> = self
            .conn
            .query_row("SELECT AVG(fit_score) FROM job_statuses", [], |row| {
                row.get(0)
            })?;

        Ok(Stats {
            pending: count("pending")?,
            applied: count("applied")?,
            denied: count("denied")?,
            avg_fit_score: avg.unwrap_or(0.0) as i64,
        })
    }

    // --- Blacklist ---
    // Stored normalized (lower-cased, trimmed); adds are set-semantic.

    pub fn blacklist_add_company(
        &self,
        company: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO blacklist_companies (company, reason, added_date)
             VALUES (LOWER(TRIM(?1)), ?2, ?3)",
            params![company, reason, fmt_ts(now)],
        )?;
        Ok(changed > 0)
    }

    pub fn blacklist_remove_company(&self, company: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "DELETE FROM blacklist_companies WHERE company = LOWER(TRIM(?1))",
            [company],
        )?;
        Ok(changed > 0)
    }

    pub fn blacklist_has_company(&self, company: &str) -> Result<bool> {
        let hit: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM blacklist_companies WHERE company = LOWER(TRIM(?1))",
                [company],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    pub fn blacklist_companies(&self) -> Result<Vec<(String, Option<String>)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT company, reason FROM blacklist_companies ORDER BY company")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list blacklisted companies")
    }

    pub fn blacklist_add_keyword(&self, keyword: &str, now: DateTime<Utc>) -> Result<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO blacklist_keywords (keyword, added_date)
             VALUES (LOWER(TRIM(?1)), ?2)",
            params![keyword, fmt_ts(now)],
        )?;
        Ok(changed > 0)
    }

    pub fn blacklist_keywords(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT keyword FROM blacklist_keywords ORDER BY keyword")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list blacklist keywords")
    }

    // --- Kill switch ---
    // Single row, single-statement writes; readers never see a half state.

    pub fn kill_switch(&self) -> Result<KillSwitchState> {
        let (active, reason, activated_at): (i64, Option<String>, Option<String>) = self
            .conn
            .query_row(
                "SELECT active, reason, activated_at FROM kill_switch WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .context("Failed to read kill switch")?;

        Ok(KillSwitchState {
            active: active != 0,
            reason,
            activated_at: activated_at.as_deref().map(parse_ts).transpose()?,
        })
    }

    pub fn activate_kill_switch(&self, reason: &str, now: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE kill_switch SET active = 1, reason = ?1, activated_at = ?2 WHERE id = 1",
            params![reason, fmt_ts(now)],
        )?;
        Ok(())
    }

    pub fn deactivate_kill_switch(&self) -> Result<()> {
        self.conn.execute(
            "UPDATE kill_switch SET active = 0, reason = NULL, activated_at = NULL WHERE id = 1",
            [],
        )?;
        Ok(())
    }

    // --- Gate audit log ---

    pub fn append_audit(
        &self,
        candidate: &Candidate,
        verdict: &Verdict,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.log_audit(
            Some(&candidate.draft_filename),
            &candidate.company,
            &candidate.position,
            candidate.fit_score,
            candidate.confidence_score,
            verdict.approved,
            verdict.reason,
            &verdict.message,
            now,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn log_audit(
        &self,
        draft_filename: Option<&str>,
        company: &str,
        position: &str,
        fit_score: i64,
        confidence_score: i64,
        approved: bool,
        reason: Option<ReasonCode>,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO gate_audit
             (draft_filename, company, position, fit_score, confidence_score,
              approved, reason_code, message, decided_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                draft_filename,
                company,
                position,
                fit_score,
                confidence_score,
                approved as i64,
                reason.map(ReasonCode::as_str),
                message,
                fmt_ts(now),
            ],
        )?;
        Ok(())
    }

    pub fn recent_audit(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT draft_filename, company, position, fit_score, confidence_score,
                    approved, reason_code, message, decided_at
             FROM gate_audit ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            let approved: i64 = row.get(5)?;
            let reason: Option<String> = row.get(6)?;
            let decided_at: String = row.get(8)?;
            Ok(AuditRecord {
                draft_filename: row.get(0)?,
                company: row.get(1)?,
                position: row.get(2)?,
                fit_score: row.get(3)?,
                confidence_score: row.get(4)?,
                approved: approved != 0,
                reason: reason
                    .as_deref()
                    .map(|r| r.parse::<ReasonCode>().map_err(|e| invalid_column(6, e)))
                    .transpose()?,
                message: row.get(7)?,
                decided_at: parse_ts(&decided_at).map_err(|e| invalid_column(8, e))?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to read gate audit log")
    }
}

const APPLICATION_COLUMNS: &str = "id, draft_filename, company, position, fit_score, \
     confidence_score, status, contact_email, contact_name, contact_phone, job_url, source, \
     created_date, applied_date, response_date, notes";

fn row_to_application(row: &rusqlite::Row) -> rusqlite::Result<JobApplication> {
    let status_raw: String = row.get(6)?;
    let created_raw: String = row.get(12)?;
    let applied_raw: Option<String> = row.get(13)?;
    let response_raw: Option<String> = row.get(14)?;

    Ok(JobApplication {
        id: row.get(0)?,
        draft_filename: row.get(1)?,
        company: row.get(2)?,
        position: row.get(3)?,
        fit_score: row.get(4)?,
        confidence_score: row.get(5)?,
        status: status_raw
            .parse::<ApplicationStatus>()
            .map_err(|e| invalid_column(6, e))?,
        contact_email: row.get(7)?,
        contact_name: row.get(8)?,
        contact_phone: row.get(9)?,
        job_url: row.get(10)?,
        source: row.get(11)?,
        created_date: parse_ts(&created_raw).map_err(|e| invalid_column(12, e))?,
        applied_date: applied_raw
            .as_deref()
            .map(parse_ts)
            .transpose()
            .map_err(|e| invalid_column(13, e))?,
        response_date: response_raw
            .as_deref()
            .map(parse_ts)
            .transpose()
            .map_err(|e| invalid_column(14, e))?,
        notes: row.get(15)?,
    })
}

fn row_to_duplicate(row: &rusqlite::Row) -> rusqlite::Result<DuplicateMatch> {
    let status_raw: String = row.get(0)?;
    let date_raw: String = row.get(1)?;
    Ok(DuplicateMatch {
        status: status_raw
            .parse::<ApplicationStatus>()
            .map_err(|e| invalid_column(0, e))?,
        date: parse_ts(&date_raw).map_err(|e| invalid_column(1, e))?,
    })
}

fn invalid_column(idx: usize, err: anyhow::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, err.into())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

// Timestamps are stored as second-precision RFC 3339 in UTC ("...Z"), which
// keeps string comparison equivalent to time comparison.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContactInfo;
    use chrono::{Duration, TimeZone};

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        db
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap()
    }

    fn candidate(draft: &str, company: &str, position: &str) -> Candidate {
        Candidate {
            draft_filename: draft.to_string(),
            company: company.to_string(),
            position: position.to_string(),
            title: None,
            fit_score: 90,
            confidence_score: 90,
            contact: ContactInfo::default(),
            job_url: None,
            source: Some("test".to_string()),
        }
    }

    #[test]
    fn test_add_job_is_idempotent_and_keeps_original_row() {
        let db = test_db();
        let first = db
            .add_job(&candidate("draft1.md", "Acme Corp", "Cook"), t0())
            .unwrap();
        let second = db
            .add_job(&candidate("draft1.md", "Other Co", "Waiter"), t0())
            .unwrap();

        assert_eq!(first, second);
        let job = db.get_job("draft1.md").unwrap().unwrap();
        assert_eq!(job.company, "Acme Corp");
        assert_eq!(job.position, "Cook");
        assert_eq!(job.status, ApplicationStatus::Pending);
    }

    #[test]
    fn test_update_status_stamps_dates_once() {
        let db = test_db();
        db.add_job(&candidate("d.md", "Acme", "Cook"), t0()).unwrap();

        let applied_at = t0() + Duration::minutes(5);
        db.update_status("d.md", ApplicationStatus::Applied, Some("sent"), applied_at)
            .unwrap();
        let job = db.get_job("d.md").unwrap().unwrap();
        assert_eq!(job.status, ApplicationStatus::Applied);
        assert_eq!(job.applied_date, Some(applied_at));
        assert_eq!(job.response_date, None);
        assert_eq!(job.notes.as_deref(), Some("sent"));

        let responded_at = t0() + Duration::days(3);
        db.update_status("d.md", ApplicationStatus::Denied, None, responded_at)
            .unwrap();
        let job = db.get_job("d.md").unwrap().unwrap();
        assert_eq!(job.status, ApplicationStatus::Denied);
        assert_eq!(job.applied_date, Some(applied_at));
        assert_eq!(job.response_date, Some(responded_at));
    }

    #[test]
    fn test_update_status_rejects_terminal_moves() {
        let db = test_db();
        db.add_job(&candidate("d.md", "Acme", "Cook"), t0()).unwrap();
        db.update_status("d.md", ApplicationStatus::Accepted, None, t0())
            .unwrap();

        let err = db
            .update_status("d.md", ApplicationStatus::Pending, None, t0())
            .unwrap_err();
        match err.downcast_ref::<LedgerError>() {
            Some(LedgerError::InvalidTransition { from, to }) => {
                assert_eq!(*from, ApplicationStatus::Accepted);
                assert_eq!(*to, ApplicationStatus::Pending);
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    #[test]
    fn test_update_status_unknown_record() {
        let db = test_db();
        let err = db
            .update_status("missing.md", ApplicationStatus::Applied, None, t0())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LedgerError>(),
            Some(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn test_pending_straight_to_terminal() {
        let db = test_db();
        db.add_job(&candidate("d.md", "Acme", "Cook"), t0()).unwrap();
        db.update_status("d.md", ApplicationStatus::NoResponse, None, t0())
            .unwrap();
        let job = db.get_job("d.md").unwrap().unwrap();
        assert_eq!(job.status, ApplicationStatus::NoResponse);
        assert_eq!(job.applied_date, None);
        assert!(job.response_date.is_some());
    }

    #[test]
    fn test_jobs_by_status_ordering() {
        let db = test_db();
        for (i, (draft, status)) in [
            ("a.md", Some(ApplicationStatus::Accepted)),
            ("b.md", Some(ApplicationStatus::Applied)),
            ("c.md", None),
            ("d.md", Some(ApplicationStatus::Denied)),
            ("e.md", None),
        ]
        .iter()
        .enumerate()
        {
            let created = t0() + Duration::minutes(i as i64);
            db.add_job(&candidate(draft, "Acme", &format!("Role {i}")), created)
                .unwrap();
            if let Some(s) = status {
                db.update_status(draft, *s, None, created).unwrap();
            }
        }

        let all = db.jobs_by_status(None).unwrap();
        let drafts: Vec<&str> = all.iter().map(|j| j.draft_filename.as_str()).collect();
        // pending (newest first), then applied, denied, accepted
        assert_eq!(drafts, vec!["e.md", "c.md", "b.md", "d.md", "a.md"]);

        let pending = db.jobs_by_status(Some(ApplicationStatus::Pending)).unwrap();
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn test_count_recent_applied_window() {
        let db = test_db();
        for (draft, offset) in [("a.md", 0), ("b.md", 50), ("c.md", 90)] {
            db.add_job(&candidate(draft, "Acme", draft), t0()).unwrap();
            db.update_status(
                draft,
                ApplicationStatus::Applied,
                None,
                t0() + Duration::minutes(offset),
            )
            .unwrap();
        }

        let now = t0() + Duration::minutes(95);
        assert_eq!(db.count_recent_applied(now - Duration::hours(1)).unwrap(), 2);
        assert_eq!(
            db.count_recent_applied(now - Duration::hours(24)).unwrap(),
            3
        );
    }

    #[test]
    fn test_duplicate_match_is_case_insensitive_and_active_only() {
        let db = test_db();
        db.add_job(&candidate("d.md", "Acme Corp", "Cook"), t0())
            .unwrap();

        let hit = db.find_active_duplicate("acme corp", "COOK").unwrap();
        assert_eq!(hit.unwrap().status, ApplicationStatus::Pending);

        db.update_status("d.md", ApplicationStatus::Denied, None, t0())
            .unwrap();
        assert!(db.find_active_duplicate("acme corp", "COOK").unwrap().is_none());
    }

    #[test]
    fn test_cooldown_duplicate_matches_closed_rows() {
        let db = test_db();
        db.add_job(&candidate("d.md", "Acme", "Cook"), t0()).unwrap();
        db.update_status("d.md", ApplicationStatus::Applied, None, t0())
            .unwrap();
        db.update_status("d.md", ApplicationStatus::Denied, None, t0() + Duration::days(10))
            .unwrap();

        let now = t0() + Duration::days(30);
        assert!(db
            .find_cooldown_duplicate("ACME", "cook", now - Duration::days(90))
            .unwrap()
            .is_some());
        assert!(db
            .find_cooldown_duplicate("ACME", "cook", now - Duration::days(7))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_revert_to_pending_clears_applied_date() {
        let db = test_db();
        db.add_job(&candidate("d.md", "Acme", "Cook"), t0()).unwrap();
        db.update_status("d.md", ApplicationStatus::Applied, None, t0())
            .unwrap();
        assert_eq!(db.count_recent_applied(t0() - Duration::hours(1)).unwrap(), 1);

        db.revert_to_pending("d.md", "smtp timeout", t0() + Duration::minutes(1))
            .unwrap();
        let job = db.get_job("d.md").unwrap().unwrap();
        assert_eq!(job.status, ApplicationStatus::Pending);
        assert_eq!(job.applied_date, None);
        assert!(job.notes.unwrap().contains("smtp timeout"));
        assert_eq!(db.count_recent_applied(t0() - Duration::hours(1)).unwrap(), 0);

        // pending records cannot be "reverted"
        assert!(db.revert_to_pending("d.md", "again", t0()).is_err());
    }

    #[test]
    fn test_blacklist_set_semantics() {
        let db = test_db();
        assert!(db
            .blacklist_add_company("  BadCo  ", Some("ghosted twice"), t0())
            .unwrap());
        assert!(!db.blacklist_add_company("badco", None, t0()).unwrap());

        assert!(db.blacklist_has_company("BADCO").unwrap());
        assert!(!db.blacklist_has_company("GoodCo").unwrap());

        assert!(db.blacklist_add_keyword("Night Audit", t0()).unwrap());
        assert!(!db.blacklist_add_keyword("night audit", t0()).unwrap());
        assert_eq!(db.blacklist_keywords().unwrap(), vec!["night audit"]);

        assert!(db.blacklist_remove_company("BadCo").unwrap());
        assert!(!db.blacklist_has_company("badco").unwrap());
    }

    #[test]
    fn test_kill_switch_round_trip() {
        let db = test_db();
        assert!(!db.kill_switch().unwrap().active);

        db.activate_kill_switch("manual stop", t0()).unwrap();
        let state = db.kill_switch().unwrap();
        assert!(state.active);
        assert_eq!(state.reason.as_deref(), Some("manual stop"));
        assert_eq!(state.activated_at, Some(t0()));

        db.deactivate_kill_switch().unwrap();
        let state = db.kill_switch().unwrap();
        assert!(!state.active);
        assert_eq!(state.reason, None);
        assert_eq!(state.activated_at, None);
    }

    #[test]
    fn test_audit_log_round_trip() {
        let db = test_db();
        let c = candidate("d.md", "Acme", "Cook");
        db.append_audit(&c, &Verdict::approve(), t0()).unwrap();
        db.append_audit(
            &c,
            &Verdict::reject(ReasonCode::Blacklisted, "'Acme' is blacklisted"),
            t0() + Duration::minutes(1),
        )
        .unwrap();

        let audit = db.recent_audit(10).unwrap();
        assert_eq!(audit.len(), 2);
        // newest first
        assert!(!audit[0].approved);
        assert_eq!(audit[0].reason, Some(ReasonCode::Blacklisted));
        assert!(audit[1].approved);
        assert_eq!(audit[1].reason, None);
    }
}

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::SafetyConfig;
use crate::db::Database;
use crate::models::{ApplicationStatus, Candidate, Verdict};
use crate::safety::SafetyGate;

/// Hand-off record emitted to the submission/notification collaborator on
/// approval. The collaborator owns the actual form submission and alerting.
#[derive(Debug, Serialize)]
pub struct SubmissionRequest<'a> {
    pub company: &'a str,
    pub position: &'a str,
    pub draft_filename: &'a str,
    pub verdict: &'a Verdict,
}

pub trait Submitter {
    fn submit(&mut self, request: &SubmissionRequest) -> Result<()>;
}

/// Default collaborator: drops each approved hand-off as a JSON file into an
/// outbox directory for a human or a delivery agent to pick up. Nothing
/// leaves the machine from here.
pub struct OutboxSubmitter {
    dir: PathBuf,
}

impl OutboxSubmitter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Submitter for OutboxSubmitter {
    fn submit(&mut self, request: &SubmissionRequest) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create outbox at {}", self.dir.display()))?;

        let path = self
            .dir
            .join(format!("{}.json", sanitize_filename(request.draft_filename)));
        let body = serde_json::to_string_pretty(request)?;
        fs::write(&path, body)
            .with_context(|| format!("Failed to write hand-off {}", path.display()))?;

        info!(path = %path.display(), "submission hand-off written");
        Ok(())
    }
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Applied,
    Rejected(Verdict),
    SubmissionFailed(String),
    Skipped(String),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Applied => "applied",
            Outcome::Rejected(_) => "rejected",
            Outcome::SubmissionFailed(_) => "submit-failed",
            Outcome::Skipped(_) => "skipped",
        }
    }
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub applied: usize,
    pub rejected: usize,
    pub failed: usize,
    pub skipped: usize,
    pub outcomes: Vec<(String, Outcome)>,
}

/// Orchestrates one candidate at a time: idempotent insert, gate verdict,
/// hand-off, ledger transition. Each candidate is its own transactional unit,
/// so an interrupted batch resumes cleanly on the next run.
pub struct Pipeline<'a, S: Submitter> {
    db: &'a Database,
    clock: &'a dyn Clock,
    config: &'a SafetyConfig,
    submitter: S,
}

impl<'a, S: Submitter> Pipeline<'a, S> {
    pub fn new(
        db: &'a Database,
        clock: &'a dyn Clock,
        config: &'a SafetyConfig,
        submitter: S,
    ) -> Self {
        Self {
            db,
            clock,
            config,
            submitter,
        }
    }

    pub fn process_batch(&mut self, candidates: &[Candidate]) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for candidate in candidates {
            let outcome = self.process_one(candidate);
            match outcome {
                Outcome::Applied => summary.applied += 1,
                Outcome::Rejected(_) => summary.rejected += 1,
                Outcome::SubmissionFailed(_) => summary.failed += 1,
                Outcome::Skipped(_) => summary.skipped += 1,
            }
            summary
                .outcomes
                .push((candidate.draft_filename.clone(), outcome));
        }
        summary
    }

    pub fn process_one(&mut self, raw: &Candidate) -> Outcome {
        let candidate = match raw.validated() {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!(draft = %raw.draft_filename, error = %e, "skipping malformed candidate");
                return Outcome::Skipped(e.to_string());
            }
        };

        match self.evaluate_and_apply(&candidate) {
            Ok(outcome) => outcome,
            Err(e) => {
                // Transaction rolled back; the candidate is untouched and can
                // be retried on the next run.
                error!(
                    draft = %candidate.draft_filename,
                    error = %format!("{e:#}"),
                    "candidate left unprocessed"
                );
                Outcome::Skipped(format!("{e:#}"))
            }
        }
    }

    fn evaluate_and_apply(&mut self, candidate: &Candidate) -> Result<Outcome> {
        // Serialize against other runs: nobody else may read the rate window
        // between our read and our conditional `applied` transition.
        let tx = self.db.immediate_tx()?;

        self.db.add_job(candidate, self.clock.now())?;

        let verdict = SafetyGate::new(self.db, self.clock, self.config).evaluate(candidate);
        if !verdict.approved {
            self.db.append_note(
                &candidate.draft_filename,
                &format!("gate rejected: {}", verdict.message),
            )?;
            tx.commit()?;
            return Ok(Outcome::Rejected(verdict));
        }

        let request = SubmissionRequest {
            company: &candidate.company,
            position: &candidate.position,
            draft_filename: &candidate.draft_filename,
            verdict: &verdict,
        };
        if let Err(e) = self.submitter.submit(&request) {
            // No retry here: record the failure and leave the row pending so
            // a later run re-evaluates it from scratch.
            self.db.append_note(
                &candidate.draft_filename,
                &format!("submission failed: {e:#}"),
            )?;
            tx.commit()?;
            return Ok(Outcome::SubmissionFailed(format!("{e:#}")));
        }

        self.db.update_status(
            &candidate.draft_filename,
            ApplicationStatus::Applied,
            Some("auto-submitted"),
            self.clock.now(),
        )?;
        tx.commit()?;
        Ok(Outcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{ContactInfo, ReasonCode};
    use chrono::{Duration, TimeZone, Utc};

    #[derive(Default)]
    struct FakeSubmitter {
        submitted: Vec<String>,
        fail: bool,
    }

    impl Submitter for FakeSubmitter {
        fn submit(&mut self, request: &SubmissionRequest) -> Result<()> {
            if self.fail {
                anyhow::bail!("simulated delivery failure");
            }
            self.submitted.push(request.draft_filename.to_string());
            Ok(())
        }
    }

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        db
    }

    fn t0() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 9, 0, 0).unwrap()
    }

    fn candidate(draft: &str, company: &str) -> Candidate {
        Candidate {
            draft_filename: draft.to_string(),
            company: company.to_string(),
            position: "Front Desk Agent".to_string(),
            title: None,
            fit_score: 95,
            confidence_score: 95,
            contact: ContactInfo::default(),
            job_url: None,
            source: Some("scanner".to_string()),
        }
    }

    #[test]
    fn test_approved_candidate_is_submitted_and_applied() {
        let db = test_db();
        let clock = ManualClock::new(t0());
        let config = SafetyConfig::default();
        let mut pipeline = Pipeline::new(&db, &clock, &config, FakeSubmitter::default());

        let outcome = pipeline.process_one(&candidate("a.md", "Hotel A"));
        assert!(matches!(outcome, Outcome::Applied));

        let job = db.get_job("a.md").unwrap().unwrap();
        assert_eq!(job.status, ApplicationStatus::Applied);
        assert_eq!(job.applied_date, Some(t0()));
        assert_eq!(pipeline.submitter.submitted, vec!["a.md"]);
    }

    #[test]
    fn test_rejected_candidate_stays_pending_with_reason() {
        let db = test_db();
        let clock = ManualClock::new(t0());
        let config = SafetyConfig::default();
        let mut pipeline = Pipeline::new(&db, &clock, &config, FakeSubmitter::default());

        let mut low = candidate("low.md", "Hotel A");
        low.fit_score = 40;
        let outcome = pipeline.process_one(&low);
        match outcome {
            Outcome::Rejected(verdict) => {
                assert_eq!(verdict.reason, Some(ReasonCode::FitScoreBelowThreshold));
            }
            other => panic!("expected rejection, got {other:?}"),
        }

        let job = db.get_job("low.md").unwrap().unwrap();
        assert_eq!(job.status, ApplicationStatus::Pending);
        assert!(job.notes.unwrap().contains("fit score 40"));
        assert!(pipeline.submitter.submitted.is_empty());
    }

    #[test]
    fn test_submission_failure_leaves_pending() {
        let db = test_db();
        let clock = ManualClock::new(t0());
        let config = SafetyConfig::default();
        let submitter = FakeSubmitter {
            fail: true,
            ..FakeSubmitter::default()
        };
        let mut pipeline = Pipeline::new(&db, &clock, &config, submitter);

        let outcome = pipeline.process_one(&candidate("a.md", "Hotel A"));
        assert!(matches!(outcome, Outcome::SubmissionFailed(_)));

        let job = db.get_job("a.md").unwrap().unwrap();
        assert_eq!(job.status, ApplicationStatus::Pending);
        assert_eq!(job.applied_date, None);
        assert!(job.notes.unwrap().contains("submission failed"));
    }

    #[test]
    fn test_rerun_after_apply_rejects_as_duplicate() {
        let db = test_db();
        let clock = ManualClock::new(t0());
        let config = SafetyConfig::default();
        let mut pipeline = Pipeline::new(&db, &clock, &config, FakeSubmitter::default());

        let c = candidate("a.md", "Hotel A");
        assert!(matches!(pipeline.process_one(&c), Outcome::Applied));

        // same candidate again (crash-recovery replay): resolves to the same
        // row and re-evaluates instead of double-submitting
        let outcome = pipeline.process_one(&c);
        match outcome {
            Outcome::Rejected(verdict) => {
                assert_eq!(verdict.reason, Some(ReasonCode::DuplicateApplication));
            }
            other => panic!("expected duplicate rejection, got {other:?}"),
        }
        assert_eq!(pipeline.submitter.submitted.len(), 1);
        assert_eq!(db.jobs_by_status(None).unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_candidate_is_skipped_not_inserted() {
        let db = test_db();
        let clock = ManualClock::new(t0());
        let config = SafetyConfig::default();
        let mut pipeline = Pipeline::new(&db, &clock, &config, FakeSubmitter::default());

        let mut broken = candidate("broken.md", "Hotel A");
        broken.company = "  ".to_string();
        let outcome = pipeline.process_one(&broken);
        assert!(matches!(outcome, Outcome::Skipped(_)));
        assert!(db.get_job("broken.md").unwrap().is_none());
    }

    #[test]
    fn test_hourly_cap_is_never_exceeded_in_a_batch() {
        let db = test_db();
        let clock = ManualClock::new(t0());
        let config = SafetyConfig::default();
        let mut pipeline = Pipeline::new(&db, &clock, &config, FakeSubmitter::default());

        let batch: Vec<Candidate> = (0..5)
            .map(|i| candidate(&format!("c{i}.md"), &format!("Hotel {i}")))
            .collect();
        let summary = pipeline.process_batch(&batch);

        assert_eq!(summary.applied, 3);
        assert_eq!(summary.rejected, 2);
        assert_eq!(
            db.count_recent_applied(t0() - Duration::hours(1)).unwrap(),
            3
        );

        // the hour rolls over and the budget returns
        clock.advance(Duration::minutes(61));
        let outcome = pipeline.process_one(&candidate("late.md", "Hotel Late"));
        assert!(matches!(outcome, Outcome::Applied));
    }

    #[test]
    fn test_daily_cap_blocks_after_hourly_windows_roll() {
        let db = test_db();
        let clock = ManualClock::new(t0());
        let config = SafetyConfig {
            max_daily_applications: 4,
            ..SafetyConfig::default()
        };
        let mut pipeline = Pipeline::new(&db, &clock, &config, FakeSubmitter::default());

        // four applications spread two hours apart - the hourly window is
        // never the binding constraint
        for i in 0..4 {
            let outcome =
                pipeline.process_one(&candidate(&format!("h{i}.md"), &format!("Hotel {i}")));
            assert!(matches!(outcome, Outcome::Applied));
            clock.advance(Duration::hours(2));
        }

        let outcome = pipeline.process_one(&candidate("extra.md", "Hotel X"));
        match outcome {
            Outcome::Rejected(verdict) => {
                assert_eq!(verdict.reason, Some(ReasonCode::RateLimitExceeded));
                assert!(verdict.message.contains("daily"));
            }
            other => panic!("expected daily rate rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_outbox_submitter_writes_handoff_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut submitter = OutboxSubmitter::new(dir.path());
        let verdict = Verdict::approve();
        submitter
            .submit(&SubmissionRequest {
                company: "Hotel A",
                position: "Front Desk Agent",
                draft_filename: "20260801_hotel_a.md",
                verdict: &verdict,
            })
            .unwrap();

        let path = dir.path().join("20260801_hotel_a.md.json");
        let body = std::fs::read_to_string(path).unwrap();
        assert!(body.contains("\"company\": \"Hotel A\""));
        assert!(body.contains("\"approved\": true"));
    }

    #[test]
    fn test_sanitize_filename_strips_path_characters() {
        assert_eq!(sanitize_filename("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_filename("draft_2026-08.md"), "draft_2026-08.md");
    }
}

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::SafetyConfig;
use crate::db::{Database, DuplicateMatch};
use crate::models::{Candidate, ReasonCode, Verdict};

// --- Rate limiter ---

#[derive(Debug, Clone, Copy)]
pub struct RateCheck {
    pub allowed: bool,
    pub hourly_count: i64,
    pub daily_count: i64,
    pub remaining_hour: i64,
    pub remaining_day: i64,
}

/// Sliding-window quotas over the ledger's applied_date column. There is no
/// separate counter to record into or to drift: the `applied` transition is
/// the record, so a restart cannot desynchronize the limiter.
pub struct RateLimiter<'a> {
    db: &'a Database,
    max_hourly: i64,
    max_daily: i64,
}

impl<'a> RateLimiter<'a> {
    pub fn new(db: &'a Database, config: &SafetyConfig) -> Self {
        Self {
            db,
            max_hourly: config.max_hourly_applications,
            max_daily: config.max_daily_applications,
        }
    }

    pub fn check(&self, now: DateTime<Utc>) -> Result<RateCheck> {
        let hourly_count = self.db.count_recent_applied(now - Duration::hours(1))?;
        let daily_count = self.db.count_recent_applied(now - Duration::hours(24))?;

        Ok(RateCheck {
            allowed: hourly_count < self.max_hourly && daily_count < self.max_daily,
            hourly_count,
            daily_count,
            remaining_hour: (self.max_hourly - hourly_count).max(0),
            remaining_day: (self.max_daily - daily_count).max(0),
        })
    }
}

// --- Blacklist ---

/// Excluded employers and excluded title keywords. Reads hit the store every
/// time, so an operator edit applies to the very next evaluation.
pub struct Blacklist<'a> {
    db: &'a Database,
}

impl<'a> Blacklist<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn is_blacklisted(&self, company: &str, title: &str) -> Result<bool> {
        if self.db.blacklist_has_company(company)? {
            return Ok(true);
        }
        let title = title.to_lowercase();
        Ok(self
            .db
            .blacklist_keywords()?
            .iter()
            .any(|kw| title.contains(kw.as_str())))
    }

    pub fn add_company(
        &self,
        company: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.db.blacklist_add_company(company, reason, now)
    }

    pub fn add_keyword(&self, keyword: &str, now: DateTime<Utc>) -> Result<bool> {
        self.db.blacklist_add_keyword(keyword, now)
    }
}

// --- Kill switch ---

/// Global emergency stop. `is_active` is a cold read on every call - the
/// whole point is that flipping it halts evaluations already in flight
/// between polling cycles.
pub struct KillSwitch<'a> {
    db: &'a Database,
}

impl<'a> KillSwitch<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn state(&self) -> Result<crate::models::KillSwitchState> {
        self.db.kill_switch()
    }

    pub fn is_active(&self) -> Result<bool> {
        Ok(self.state()?.active)
    }

    pub fn activate(&self, reason: &str, now: DateTime<Utc>) -> Result<()> {
        warn!(reason, "kill switch activated");
        self.db.activate_kill_switch(reason, now)
    }

    pub fn deactivate(&self) -> Result<()> {
        self.db.deactivate_kill_switch()
    }
}

// --- Duplicate guard ---

/// Pure read over the ledger: is an application to this company/position
/// already mid-flight? The optional cooldown layer additionally matches
/// closed applications inside the configured window.
pub struct DuplicateGuard<'a> {
    db: &'a Database,
    cooldown_days: Option<i64>,
}

impl<'a> DuplicateGuard<'a> {
    pub fn new(db: &'a Database, cooldown_days: Option<i64>) -> Self {
        Self { db, cooldown_days }
    }

    pub fn check(
        &self,
        company: &str,
        position: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DuplicateMatch>> {
        if let Some(hit) = self.db.find_active_duplicate(company, position)? {
            return Ok(Some(hit));
        }
        if let Some(days) = self.cooldown_days {
            return self
                .db
                .find_cooldown_duplicate(company, position, now - Duration::days(days));
        }
        Ok(None)
    }
}

// --- Safety gate ---

pub struct SafetyGate<'a> {
    db: &'a Database,
    clock: &'a dyn Clock,
    config: &'a SafetyConfig,
}

impl<'a> SafetyGate<'a> {
    pub fn new(db: &'a Database, clock: &'a dyn Clock, config: &'a SafetyConfig) -> Self {
        Self { db, clock, config }
    }

    /// Ordered, short-circuiting checks; the first failure wins so every
    /// rejection has one unambiguous reason. Never returns an error: if the
    /// ledger itself is unreachable the gate fails closed, rejecting as if
    /// the kill switch were active.
    pub fn evaluate(&self, candidate: &Candidate) -> Verdict {
        let verdict = match self.run_checks(candidate) {
            Ok(verdict) => verdict,
            Err(e) => Verdict::reject(
                ReasonCode::KillSwitchActive,
                format!("ledger unavailable, failing closed: {e:#}"),
            ),
        };

        debug!(
            draft = %candidate.draft_filename,
            approved = verdict.approved,
            reason = verdict.reason.map(|r| r.as_str()),
            "gate decision"
        );

        // The decision is persisted before anyone can act on it; a crash
        // right after evaluation still leaves the audit trail.
        if let Err(e) = self
            .db
            .append_audit(candidate, &verdict, self.clock.now())
        {
            warn!(error = %format!("{e:#}"), "failed to append gate audit record");
        }

        verdict
    }

    fn run_checks(&self, candidate: &Candidate) -> Result<Verdict> {
        let now = self.clock.now();

        let switch = KillSwitch::new(self.db).state()?;
        if switch.active {
            let reason = switch.reason.as_deref().unwrap_or("no reason recorded");
            return Ok(Verdict::reject(
                ReasonCode::KillSwitchActive,
                format!("kill switch active: {reason}"),
            ));
        }

        if Blacklist::new(self.db).is_blacklisted(&candidate.company, candidate.match_title())? {
            return Ok(Verdict::reject(
                ReasonCode::Blacklisted,
                format!("'{}' matches the blacklist", candidate.company),
            ));
        }

        if candidate.fit_score < self.config.min_fit_score {
            return Ok(Verdict::reject(
                ReasonCode::FitScoreBelowThreshold,
                format!(
                    "fit score {} below minimum {}",
                    candidate.fit_score, self.config.min_fit_score
                ),
            ));
        }

        if candidate.confidence_score < self.config.min_confidence_score {
            return Ok(Verdict::reject(
                ReasonCode::ConfidenceBelowThreshold,
                format!(
                    "confidence score {} below minimum {}",
                    candidate.confidence_score, self.config.min_confidence_score
                ),
            ));
        }

        let guard = DuplicateGuard::new(self.db, self.config.duplicate_cooldown_days);
        if let Some(hit) = guard.check(&candidate.company, &candidate.position, now)? {
            return Ok(Verdict::reject(
                ReasonCode::DuplicateApplication,
                format!(
                    "existing {} application to {} / {} from {}",
                    hit.status,
                    candidate.company,
                    candidate.position,
                    hit.date.format("%Y-%m-%d")
                ),
            ));
        }

        let rate = RateLimiter::new(self.db, self.config).check(now)?;
        if !rate.allowed {
            let message = if rate.hourly_count >= self.config.max_hourly_applications {
                format!(
                    "hourly limit reached ({}/{})",
                    rate.hourly_count, self.config.max_hourly_applications
                )
            } else {
                format!(
                    "daily limit reached ({}/{})",
                    rate.daily_count, self.config.max_daily_applications
                )
            };
            return Ok(Verdict::reject(ReasonCode::RateLimitExceeded, message));
        }

        Ok(Verdict::approve())
    }
}

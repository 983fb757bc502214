use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Applied,
    Denied,
    Accepted,
    NoResponse,
}

impl ApplicationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Applied => "applied",
            ApplicationStatus::Denied => "denied",
            ApplicationStatus::Accepted => "accepted",
            ApplicationStatus::NoResponse => "no_response",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ApplicationStatus::Denied | ApplicationStatus::Accepted | ApplicationStatus::NoResponse
        )
    }

    // Transitions are monotonic: pending may go straight to a terminal state
    // (closed by hand without ever being submitted), terminal states are final.
    pub fn can_transition_to(self, next: ApplicationStatus) -> bool {
        match self {
            ApplicationStatus::Pending => next != ApplicationStatus::Pending,
            ApplicationStatus::Applied => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplicationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ApplicationStatus::Pending),
            "applied" => Ok(ApplicationStatus::Applied),
            "denied" => Ok(ApplicationStatus::Denied),
            "accepted" => Ok(ApplicationStatus::Accepted),
            "no_response" => Ok(ApplicationStatus::NoResponse),
            _ => Err(anyhow!(
                "Unknown status '{}'. Valid: pending, applied, denied, accepted, no_response",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobApplication {
    pub id: i64,
    pub draft_filename: String,
    pub company: String,
    pub position: String,
    pub fit_score: i64,
    pub confidence_score: i64,
    pub status: ApplicationStatus,
    pub contact_email: Option<String>,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub job_url: Option<String>,
    pub source: Option<String>,
    pub created_date: DateTime<Utc>,
    pub applied_date: Option<DateTime<Utc>>,
    pub response_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
}

/// A scored candidate handed in by the scanning collaborator. Untrusted
/// until it has been through `validated()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub draft_filename: String,
    pub company: String,
    pub position: String,
    pub title: Option<String>,
    pub fit_score: i64,
    pub confidence_score: i64,
    #[serde(default)]
    pub contact: ContactInfo,
    pub job_url: Option<String>,
    pub source: Option<String>,
}

impl Candidate {
    /// The string the keyword blacklist matches against.
    pub fn match_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.position)
    }

    /// Validate and normalize scanner input: required fields present, scores
    /// in range, whitespace trimmed, malformed contact details dropped.
    pub fn validated(&self) -> Result<Candidate> {
        let draft_filename = self.draft_filename.trim();
        if draft_filename.is_empty() {
            bail!("candidate is missing draft_filename");
        }
        let company = self.company.trim();
        if company.is_empty() {
            bail!("candidate '{}' is missing company", draft_filename);
        }
        let position = self.position.trim();
        if position.is_empty() {
            bail!("candidate '{}' is missing position", draft_filename);
        }
        if !(0..=100).contains(&self.fit_score) {
            bail!(
                "candidate '{}' has fit score {} outside 0-100",
                draft_filename,
                self.fit_score
            );
        }
        if !(0..=100).contains(&self.confidence_score) {
            bail!(
                "candidate '{}' has confidence score {} outside 0-100",
                draft_filename,
                self.confidence_score
            );
        }

        Ok(Candidate {
            draft_filename: draft_filename.to_string(),
            company: company.to_string(),
            position: position.to_string(),
            title: trimmed(&self.title),
            fit_score: self.fit_score,
            confidence_score: self.confidence_score,
            contact: scrub_contact(&self.contact, draft_filename)?,
            job_url: trimmed(&self.job_url),
            source: trimmed(&self.source),
        })
    }
}

fn trimmed(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// Contact details come from scraped postings, so shapes vary wildly. Keep
// what looks plausible, drop the rest with a warning.
fn scrub_contact(contact: &ContactInfo, draft_filename: &str) -> Result<ContactInfo> {
    let email_re = regex::Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$")?;
    let phone_re = regex::Regex::new(r"^\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}$")?;

    let email = match trimmed(&contact.email) {
        Some(e) if email_re.is_match(&e) => Some(e),
        Some(e) => {
            warn!(draft = draft_filename, email = %e, "dropping malformed contact email");
            None
        }
        None => None,
    };
    let phone = match trimmed(&contact.phone) {
        Some(p) if phone_re.is_match(&p) => Some(p),
        Some(p) => {
            warn!(draft = draft_filename, phone = %p, "dropping malformed contact phone");
            None
        }
        None => None,
    };

    Ok(ContactInfo {
        email,
        name: trimmed(&contact.name),
        phone,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    KillSwitchActive,
    Blacklisted,
    FitScoreBelowThreshold,
    ConfidenceBelowThreshold,
    DuplicateApplication,
    RateLimitExceeded,
}

impl ReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::KillSwitchActive => "kill_switch_active",
            ReasonCode::Blacklisted => "blacklisted",
            ReasonCode::FitScoreBelowThreshold => "fit_score_below_threshold",
            ReasonCode::ConfidenceBelowThreshold => "confidence_below_threshold",
            ReasonCode::DuplicateApplication => "duplicate_application",
            ReasonCode::RateLimitExceeded => "rate_limit_exceeded",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasonCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "kill_switch_active" => Ok(ReasonCode::KillSwitchActive),
            "blacklisted" => Ok(ReasonCode::Blacklisted),
            "fit_score_below_threshold" => Ok(ReasonCode::FitScoreBelowThreshold),
            "confidence_below_threshold" => Ok(ReasonCode::ConfidenceBelowThreshold),
            "duplicate_application" => Ok(ReasonCode::DuplicateApplication),
            "rate_limit_exceeded" => Ok(ReasonCode::RateLimitExceeded),
            _ => Err(anyhow!("Unknown reason code '{}'", s)),
        }
    }
}

/// The gate's answer for one candidate. Rejections always carry a reason code.
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub approved: bool,
    pub reason: Option<ReasonCode>,
    pub message: String,
}

impl Verdict {
    pub fn approve() -> Self {
        Verdict {
            approved: true,
            reason: None,
            message: "all safety checks passed".to_string(),
        }
    }

    pub fn reject(reason: ReasonCode, message: impl Into<String>) -> Self {
        Verdict {
            approved: false,
            reason: Some(reason),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KillSwitchState {
    pub active: bool,
    pub reason: Option<String>,
    pub activated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Stats {
    pub pending: i64,
    pub applied: i64,
    pub denied: i64,
    pub avg_fit_score: i64,
}

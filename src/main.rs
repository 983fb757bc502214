mod clock;
mod config;
mod db;
mod models;
mod pipeline;
mod safety;
mod tui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use clock::{Clock, SystemClock};
use config::SafetyConfig;
use db::Database;
use models::{ApplicationStatus, Candidate, ContactInfo, Verdict};
use pipeline::{Outcome, OutboxSubmitter, Pipeline};
use safety::{Blacklist, KillSwitch, RateLimiter, SafetyGate};

#[derive(Parser)]
#[command(name = "snipe")]
#[command(about = "Safety-gated job application automation - ledger, gate, and audit trail")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Track a candidate application (no evaluation, no submission)
    Add {
        /// Draft filename - the unique key for this application
        draft_filename: String,

        #[arg(short, long)]
        company: String,

        #[arg(short, long)]
        position: String,

        /// Posting title, if it differs from the position
        #[arg(long)]
        title: Option<String>,

        #[arg(short, long, default_value = "0")]
        fit_score: i64,

        #[arg(long, default_value = "0")]
        confidence_score: i64,

        #[arg(long)]
        contact_email: Option<String>,

        #[arg(long)]
        contact_name: Option<String>,

        #[arg(long)]
        contact_phone: Option<String>,

        #[arg(short, long)]
        url: Option<String>,

        /// Where the candidate came from (scanner, manual, referral...)
        #[arg(short, long)]
        source: Option<String>,
    },

    /// Run one candidate through the safety gate without touching the ledger rows
    Check {
        #[arg(short, long)]
        company: String,

        #[arg(short, long)]
        position: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(short, long)]
        fit_score: i64,

        #[arg(long)]
        confidence_score: i64,
    },

    /// Process a batch of scanner candidates through the gate and pipeline
    Process {
        /// JSON file with an array of candidate records
        candidates: PathBuf,

        /// Directory where approved hand-offs are written
        #[arg(short, long, default_value = "outbox")]
        outbox: PathBuf,

        /// Evaluate and report without inserting or submitting anything
        #[arg(long)]
        dry_run: bool,
    },

    /// List tracked applications
    List {
        /// Filter by status (pending, applied, denied, accepted, no_response)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Show one application in full
    Show {
        draft_filename: String,
    },

    /// Record a status change (e.g. an employer response)
    Status {
        draft_filename: String,

        /// New status (applied, denied, accepted, no_response)
        status: String,

        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Revert a record to pending after the submission collaborator reports a failure
    ReportFailure {
        draft_filename: String,

        #[arg(short, long)]
        reason: String,
    },

    /// Application counts and current rate budget
    Stats,

    /// Recent safety gate decisions
    Audit {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Manage the company/keyword blacklist
    Blacklist {
        #[command(subcommand)]
        command: BlacklistCommands,
    },

    /// Emergency stop for all autonomous submissions
    Kill {
        #[command(subcommand)]
        command: KillCommands,
    },

    /// Browse applications in a terminal dashboard
    Tui {
        /// Filter by status
        #[arg(short, long)]
        status: Option<String>,
    },
}

#[derive(Subcommand)]
enum BlacklistCommands {
    /// Add a company (idempotent)
    Add {
        company: String,

        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Add an excluded title keyword (idempotent)
    Keyword {
        keyword: String,
    },

    /// Remove a company
    Remove {
        company: String,
    },

    /// List blacklisted companies and keywords
    List,
}

#[derive(Subcommand)]
enum KillCommands {
    /// Activate the kill switch - every evaluation rejects from now on
    On {
        #[arg(short, long, default_value = "manual activation")]
        reason: String,
    },

    /// Deactivate the kill switch
    Off,

    /// Show the switch state
    Status,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("snipe=warn")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = SafetyConfig::from_env();
    let clock = SystemClock;
    let db = Database::open()?;

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Add {
            draft_filename,
            company,
            position,
            title,
            fit_score,
            confidence_score,
            contact_email,
            contact_name,
            contact_phone,
            url,
            source,
        } => {
            db.ensure_initialized()?;
            let candidate = Candidate {
                draft_filename,
                company,
                position,
                title,
                fit_score,
                confidence_score,
                contact: ContactInfo {
                    email: contact_email,
                    name: contact_name,
                    phone: contact_phone,
                },
                job_url: url,
                source: source.or_else(|| Some("manual".to_string())),
            }
            .validated()?;
            let id = db.add_job(&candidate, clock.now())?;
            println!("Tracking application #{id} ({})", candidate.draft_filename);
        }

        Commands::Check {
            company,
            position,
            title,
            fit_score,
            confidence_score,
        } => {
            db.ensure_initialized()?;
            let candidate = Candidate {
                draft_filename: "(ad-hoc check)".to_string(),
                company,
                position,
                title,
                fit_score,
                confidence_score,
                contact: ContactInfo::default(),
                job_url: None,
                source: None,
            }
            .validated()?;
            let gate = SafetyGate::new(&db, &clock, &config);
            print_verdict(&gate.evaluate(&candidate));
        }

        Commands::Process {
            candidates,
            outbox,
            dry_run,
        } => {
            db.ensure_initialized()?;
            let raw = std::fs::read_to_string(&candidates)
                .with_context(|| format!("Failed to read {}", candidates.display()))?;
            let batch: Vec<Candidate> = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid candidate file {}", candidates.display()))?;
            println!("Processing {} candidate(s)...", batch.len());

            if dry_run {
                let gate = SafetyGate::new(&db, &clock, &config);
                for raw_candidate in &batch {
                    match raw_candidate.validated() {
                        Ok(candidate) => {
                            let verdict = gate.evaluate(&candidate);
                            let mark = if verdict.approved { "OK " } else { "REJ" };
                            println!(
                                "  {} {:<30} {}",
                                mark,
                                truncate(&candidate.draft_filename, 28),
                                verdict.message
                            );
                        }
                        Err(e) => {
                            println!("  SKP {:<30} {e}", truncate(&raw_candidate.draft_filename, 28));
                        }
                    }
                }
                println!("Dry run - nothing was inserted or submitted.");
            } else {
                let submitter = OutboxSubmitter::new(&outbox);
                let mut pipeline = Pipeline::new(&db, &clock, &config, submitter);
                let summary = pipeline.process_batch(&batch);

                for (draft, outcome) in &summary.outcomes {
                    let detail = match outcome {
                        Outcome::Applied => "submitted and marked applied".to_string(),
                        Outcome::Rejected(verdict) => verdict.message.clone(),
                        Outcome::SubmissionFailed(msg) => msg.clone(),
                        Outcome::Skipped(msg) => msg.clone(),
                    };
                    println!(
                        "  {:<13} {:<30} {}",
                        outcome.label(),
                        truncate(draft, 28),
                        detail
                    );
                }
                println!(
                    "Done: {} applied, {} rejected, {} failed, {} skipped",
                    summary.applied, summary.rejected, summary.failed, summary.skipped
                );
            }
        }

        Commands::List { status } => {
            db.ensure_initialized()?;
            let filter = status
                .as_deref()
                .map(|s| s.parse::<ApplicationStatus>())
                .transpose()?;
            let jobs = db.jobs_by_status(filter)?;
            if jobs.is_empty() {
                println!("No applications found.");
            } else {
                println!(
                    "{:<12} {:<22} {:<26} {:>4} {:>5}  {:<11} {}",
                    "STATUS", "COMPANY", "POSITION", "FIT", "CONF", "APPLIED", "DRAFT"
                );
                println!("{}", "-".repeat(100));
                for job in jobs {
                    let applied = job
                        .applied_date
                        .map(|d| d.format("%Y-%m-%d").to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:<12} {:<22} {:<26} {:>4} {:>5}  {:<11} {}",
                        job.status.as_str(),
                        truncate(&job.company, 20),
                        truncate(&job.position, 24),
                        job.fit_score,
                        job.confidence_score,
                        applied,
                        job.draft_filename
                    );
                }
            }
        }

        Commands::Show { draft_filename } => {
            db.ensure_initialized()?;
            match db.get_job(&draft_filename)? {
                Some(job) => {
                    println!("Application #{}", job.id);
                    println!("Draft: {}", job.draft_filename);
                    println!("Company: {}", job.company);
                    println!("Position: {}", job.position);
                    println!("Status: {}", job.status);
                    println!(
                        "Scores: fit {}/100, confidence {}/100",
                        job.fit_score, job.confidence_score
                    );
                    if let Some(url) = &job.job_url {
                        println!("URL: {url}");
                    }
                    if let Some(source) = &job.source {
                        println!("Source: {source}");
                    }
                    for (label, value) in [
                        ("Contact name", &job.contact_name),
                        ("Contact email", &job.contact_email),
                        ("Contact phone", &job.contact_phone),
                    ] {
                        if let Some(v) = value {
                            println!("{label}: {v}");
                        }
                    }
                    println!("Created: {}", job.created_date.format("%Y-%m-%d %H:%M"));
                    if let Some(applied) = job.applied_date {
                        println!("Applied: {}", applied.format("%Y-%m-%d %H:%M"));
                    }
                    if let Some(response) = job.response_date {
                        println!("Response: {}", response.format("%Y-%m-%d %H:%M"));
                    }
                    if let Some(notes) = &job.notes {
                        println!("\n--- Notes ---\n{notes}");
                    }
                }
                None => {
                    println!("Application '{draft_filename}' not found.");
                }
            }
        }

        Commands::Status {
            draft_filename,
            status,
            notes,
        } => {
            db.ensure_initialized()?;
            let new_status: ApplicationStatus = status.parse()?;
            db.update_status(&draft_filename, new_status, notes.as_deref(), clock.now())?;
            println!("Updated {draft_filename} -> {new_status}");
        }

        Commands::ReportFailure {
            draft_filename,
            reason,
        } => {
            db.ensure_initialized()?;
            db.revert_to_pending(&draft_filename, &reason, clock.now())?;
            println!("Reverted {draft_filename} to pending (submission failure: {reason})");
        }

        Commands::Stats => {
            db.ensure_initialized()?;
            let stats = db.stats()?;
            println!(
                "Applications: {} pending, {} applied, {} denied (avg fit {})",
                stats.pending, stats.applied, stats.denied, stats.avg_fit_score
            );

            let rate = RateLimiter::new(&db, &config).check(clock.now())?;
            println!(
                "Rate budget: hour {}/{} used ({} left), day {}/{} used ({} left)",
                rate.hourly_count,
                config.max_hourly_applications,
                rate.remaining_hour,
                rate.daily_count,
                config.max_daily_applications,
                rate.remaining_day
            );

            if KillSwitch::new(&db).is_active()? {
                println!("Kill switch: ACTIVE - all submissions halted");
            } else {
                println!("Kill switch: inactive");
            }
        }

        Commands::Audit { limit } => {
            db.ensure_initialized()?;
            let records = db.recent_audit(limit)?;
            if records.is_empty() {
                println!("No gate decisions recorded yet.");
            } else {
                println!(
                    "{:<17} {:<4} {:<26} {:<26} {:>4} {:>5}  {}",
                    "DECIDED", "", "REASON", "CANDIDATE", "FIT", "CONF", "MESSAGE"
                );
                println!("{}", "-".repeat(110));
                for record in records {
                    let mark = if record.approved { "OK" } else { "REJ" };
                    let reason = record.reason.map(|r| r.as_str()).unwrap_or("-");
                    let subject = record
                        .draft_filename
                        .clone()
                        .unwrap_or_else(|| format!("{} / {}", record.company, record.position));
                    println!(
                        "{:<17} {:<4} {:<26} {:<26} {:>4} {:>5}  {}",
                        record.decided_at.format("%Y-%m-%d %H:%M"),
                        mark,
                        reason,
                        truncate(&subject, 24),
                        record.fit_score,
                        record.confidence_score,
                        record.message
                    );
                }
            }
        }

        Commands::Blacklist { command } => {
            db.ensure_initialized()?;
            let blacklist = Blacklist::new(&db);
            match command {
                BlacklistCommands::Add { company, reason } => {
                    if blacklist.add_company(&company, reason.as_deref(), clock.now())? {
                        println!("Blacklisted '{}'", company.trim().to_lowercase());
                    } else {
                        println!("'{}' is already blacklisted", company.trim().to_lowercase());
                    }
                }
                BlacklistCommands::Keyword { keyword } => {
                    if blacklist.add_keyword(&keyword, clock.now())? {
                        println!("Excluded keyword '{}'", keyword.trim().to_lowercase());
                    } else {
                        println!("Keyword already excluded");
                    }
                }
                BlacklistCommands::Remove { company } => {
                    if db.blacklist_remove_company(&company)? {
                        println!("Removed '{}'", company.trim().to_lowercase());
                    } else {
                        println!("'{}' was not blacklisted", company.trim().to_lowercase());
                    }
                }
                BlacklistCommands::List => {
                    let companies = db.blacklist_companies()?;
                    let keywords = db.blacklist_keywords()?;
                    if companies.is_empty() && keywords.is_empty() {
                        println!("Blacklist is empty.");
                    }
                    if !companies.is_empty() {
                        println!("Companies:");
                        for (company, reason) in companies {
                            match reason {
                                Some(r) => println!("  {company}  ({r})"),
                                None => println!("  {company}"),
                            }
                        }
                    }
                    if !keywords.is_empty() {
                        println!("Title keywords:");
                        for keyword in keywords {
                            println!("  {keyword}");
                        }
                    }
                }
            }
        }

        Commands::Kill { command } => {
            db.ensure_initialized()?;
            let switch = KillSwitch::new(&db);
            match command {
                KillCommands::On { reason } => {
                    switch.activate(&reason, clock.now())?;
                    println!("KILL SWITCH ACTIVE - all submissions halted ({reason})");
                }
                KillCommands::Off => {
                    switch.deactivate()?;
                    println!("Kill switch deactivated - submissions may resume");
                }
                KillCommands::Status => {
                    let state = switch.state()?;
                    if state.active {
                        println!(
                            "ACTIVE since {} ({})",
                            state
                                .activated_at
                                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                                .unwrap_or_else(|| "unknown".to_string()),
                            state.reason.as_deref().unwrap_or("no reason recorded")
                        );
                    } else {
                        println!("inactive");
                    }
                }
            }
        }

        Commands::Tui { status } => {
            db.ensure_initialized()?;
            let filter = status
                .as_deref()
                .map(|s| s.parse::<ApplicationStatus>())
                .transpose()?;
            tui::run_dashboard(&db, filter)?;
        }
    }

    Ok(())
}

fn print_verdict(verdict: &Verdict) {
    if verdict.approved {
        println!("APPROVED - {}", verdict.message);
    } else {
        let reason = verdict
            .reason
            .map(|r| r.as_str())
            .unwrap_or("unknown");
        println!("REJECTED [{reason}] - {}", verdict.message);
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() > max_len {
        let short: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{short}...")
    } else {
        s.to_string()
    }
}

//! pmr - review pain-management escalations from the command line.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::{ColoredString, Colorize};
use pmr_core::{
    Actor, Comment, CommentParent, DrugEntry, Escalation, EscalationFilter, EscalationPriority,
    EscalationStatus, EscalationTrigger, Protocol, ProtocolStatus, Recommendation,
    RecommendationStatus, ReviewConfig, ReviewError, PMR_DIR,
};
use pmr_review::{
    ApprovalEdit, FanoutAuditSink, JsonlAuditSink, RejectionRequest, ReviewCoordinator,
    TracingAuditSink,
};
use pmr_storage::{Database, ReviewStore};
use std::collections::BTreeSet;
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pmr")]
#[command(about = "pmr - Pain-management escalation review", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Acting user id (defaults to $USER)
    #[arg(long, global = true)]
    actor: Option<String>,

    /// Display name for the acting user
    #[arg(long, global = true)]
    name: Option<String>,

    /// Act with elevated permissions
    #[arg(long, global = true)]
    elevated: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new pmr workspace
    Init {
        /// Path to initialize (defaults to current directory)
        path: Option<String>,
    },

    /// Create a drug recommendation for a patient
    Recommend {
        /// Patient MRN
        #[arg(long)]
        mrn: String,

        /// Drug line: name:moiety:dosing:interval:route[:role]
        #[arg(short, long = "drug")]
        drugs: Vec<DrugEntry>,

        /// Contraindication (repeatable)
        #[arg(short, long = "contra")]
        contraindications: Vec<String>,
    },

    /// Escalate a recommendation for anesthesiology review
    Escalate {
        /// Recommendation ID
        id: i64,

        /// Patient pain score (0-10) that triggered the escalation
        #[arg(long, conflicts_with = "doctor_rejection")]
        vas: Option<u8>,

        /// The escalating doctor rejected the recommendation
        #[arg(long)]
        doctor_rejection: bool,

        /// Override the trigger's default priority
        #[arg(short, long)]
        priority: Option<EscalationPriority>,
    },

    /// List escalations, most urgent first
    List {
        /// Filter by status
        #[arg(short, long)]
        status: Option<EscalationStatus>,

        /// Filter by priority
        #[arg(short, long)]
        priority: Option<EscalationPriority>,

        /// Only escalations still awaiting a decision
        #[arg(short, long)]
        active: bool,
    },

    /// Show escalation counts
    Stats,

    /// Show an escalation with its recommendation, protocols and comments
    Show {
        /// Escalation ID
        id: i64,
    },

    /// Show every recommendation for a patient
    History {
        /// Patient MRN
        mrn: String,
    },

    /// Claim a pending escalation
    Take {
        /// Escalation ID
        id: i64,
    },

    /// Ask the escalating doctor a question
    Ask {
        /// Escalation ID
        id: i64,

        question: String,
    },

    /// Answer an open question and return the escalation to review
    Answer {
        /// Escalation ID
        id: i64,

        answer: String,
    },

    /// Approve the escalated recommendation, optionally with edited drugs
    Approve {
        /// Escalation ID
        id: i64,

        /// Replacement drug lines (keeps the current regimen when omitted)
        #[arg(short, long = "drug")]
        drugs: Vec<DrugEntry>,

        /// Replacement contraindications (keeps the current ones when omitted)
        #[arg(long = "contra")]
        contraindications: Vec<String>,

        /// Comment for the recommendation thread
        #[arg(short, long)]
        comment: Option<String>,

        /// Resolution recorded on the escalation
        #[arg(short, long)]
        resolution: String,
    },

    /// Reject the escalated recommendation and open its replacement
    Reject {
        /// Escalation ID
        id: i64,

        /// Why the recommendation was rejected
        #[arg(long)]
        reason: String,

        /// Comment for the recommendation thread
        #[arg(short, long)]
        comment: Option<String>,

        /// Resolution recorded on the escalation
        #[arg(short, long)]
        resolution: String,
    },

    /// Manage clinical protocols
    Protocol {
        #[command(subcommand)]
        command: ProtocolCommands,
    },

    /// Manage comments on recommendations and protocols
    Comment {
        #[command(subcommand)]
        command: CommentCommands,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ProtocolCommands {
    /// Draft a protocol for an escalation
    Draft {
        /// Escalation ID
        escalation: i64,

        #[arg(short, long)]
        title: String,

        #[arg(long, default_value = "")]
        content: String,
    },

    /// Rewrite a draft
    Edit {
        /// Protocol ID
        id: i64,

        #[arg(short, long)]
        title: String,

        #[arg(long, default_value = "")]
        content: String,
    },

    /// Approve a draft
    Approve {
        /// Protocol ID
        id: i64,
    },

    /// Reject a draft
    Reject {
        /// Protocol ID
        id: i64,

        #[arg(long)]
        reason: String,
    },

    /// List protocols for an escalation
    List {
        /// Escalation ID
        escalation: i64,
    },
}

#[derive(Subcommand)]
enum CommentCommands {
    /// Add a comment, e.g. `pmr comment add recommendation:7 "..."`
    Add {
        /// Parent as recommendation:<id> or protocol:<id>
        parent: String,

        content: String,

        /// Mark the comment as a question
        #[arg(short, long)]
        question: bool,
    },

    /// List comments on a parent, oldest first
    List {
        /// Parent as recommendation:<id> or protocol:<id>
        parent: String,
    },

    /// Delete a comment (author or elevated only)
    Delete {
        /// Comment ID
        id: i64,
    },
}

/// Find the .pmr directory by walking up from the current directory.
/// Returns the workspace root (the directory containing .pmr).
fn find_workspace_root() -> Result<PathBuf> {
    let mut current = env::current_dir()?;

    loop {
        if current.join(PMR_DIR).is_dir() {
            return Ok(current);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => {
                return Err(anyhow!(
                    "No {} directory found. Run 'pmr init' to initialize a workspace.",
                    PMR_DIR
                ));
            }
        }
    }
}

fn resolve_actor(cli: &Cli) -> Actor {
    let id = cli
        .actor
        .clone()
        .or_else(|| env::var("USER").ok())
        .unwrap_or_else(|| "unknown".to_string());
    let name = cli.name.clone().unwrap_or_else(|| id.clone());
    Actor::new(id, name).elevated(cli.elevated)
}

/// Parses `recommendation:<id>` or `protocol:<id>`
fn parse_parent(s: &str) -> Result<CommentParent> {
    let (tag, id) = s
        .split_once(':')
        .ok_or_else(|| anyhow!("expected <recommendation|protocol>:<id>, got '{}'", s))?;
    let id: i64 = id
        .trim()
        .parse()
        .map_err(|_| anyhow!("invalid id in '{}'", s))?;
    Ok(CommentParent::from_parts(tag.trim(), id)?)
}

/// An open workspace: database plus a coordinator wired to it
struct Session {
    db: Arc<Database>,
    coordinator: ReviewCoordinator,
    audit_writer: JoinHandle<()>,
}

impl Session {
    /// Release the coordinator and wait for queued audit lines to be written
    async fn close(self) {
        let Session {
            coordinator,
            audit_writer,
            ..
        } = self;
        drop(coordinator);
        if let Err(e) = audit_writer.await {
            warn!(error = %e, "audit writer did not finish");
        }
    }
}

async fn open_session(root: &Path) -> Result<Session> {
    let config = ReviewConfig::load_or_default(root)?;
    let db_path = config.database_path_in(root);
    let db = Arc::new(Database::open(&db_path).await?);
    db.init_schema().await?;
    debug!(path = %db_path.display(), "opened review database");

    let (jsonl, audit_writer) = JsonlAuditSink::spawn(root.join(PMR_DIR).join("audit.jsonl"));
    let audit = FanoutAuditSink::new()
        .with(Arc::new(TracingAuditSink))
        .with(Arc::new(jsonl));

    let store: Arc<dyn ReviewStore> = db.clone();
    let coordinator = ReviewCoordinator::new(store, Arc::new(audit), &config);
    Ok(Session {
        db,
        coordinator,
        audit_writer,
    })
}

/// Regimen to approve: each of drugs and contraindications falls back to the
/// stored value when no replacement was given for it.
fn approval_regimen(
    current_drugs: Vec<DrugEntry>,
    current_contraindications: BTreeSet<String>,
    drugs: Vec<DrugEntry>,
    contraindications: Vec<String>,
) -> (Vec<DrugEntry>, BTreeSet<String>) {
    let drugs = if drugs.is_empty() { current_drugs } else { drugs };
    let contraindications = if contraindications.is_empty() {
        current_contraindications
    } else {
        contraindications.into_iter().collect()
    };
    (drugs, contraindications)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn fmt_time(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn rec_status_colored(status: RecommendationStatus) -> ColoredString {
    let label = status.as_str();
    match status {
        RecommendationStatus::Pending => label.normal(),
        RecommendationStatus::Escalated => label.yellow(),
        RecommendationStatus::Approved => label.green(),
        RecommendationStatus::Rejected => label.red(),
    }
}

fn esc_status_colored(status: EscalationStatus) -> ColoredString {
    let label = status.as_str();
    match status {
        EscalationStatus::Pending => label.green(),
        EscalationStatus::InReview => label.yellow(),
        EscalationStatus::RequiresClarification => label.magenta(),
        EscalationStatus::Resolved | EscalationStatus::Cancelled => label.bright_black(),
    }
}

fn priority_colored(priority: EscalationPriority) -> ColoredString {
    let label = priority.as_str();
    match priority {
        EscalationPriority::Critical => label.red().bold(),
        EscalationPriority::High => label.yellow(),
        EscalationPriority::Medium => label.normal(),
        EscalationPriority::Low => label.bright_black(),
    }
}

fn protocol_status_colored(status: ProtocolStatus) -> ColoredString {
    let label = status.as_str();
    match status {
        ProtocolStatus::Draft => label.yellow(),
        ProtocolStatus::Approved => label.green(),
        ProtocolStatus::Rejected => label.red(),
    }
}

fn print_recommendation(rec: &Recommendation) {
    println!("{:<15} {}", "Recommendation:".bold(), rec.id.to_string().bright_cyan());
    println!("{:<15} {}", "Patient:".bold(), rec.patient_mrn);
    println!("{:<15} {}", "Status:".bold(), rec_status_colored(rec.status));
    println!("{:<15} {}", "Hierarchy:".bold(), rec.regimen_hierarchy);
    if let Some(previous) = rec.previous_recommendation_id {
        println!("{:<15} {}", "Replaces:".bold(), previous);
    }
    if let Some(reason) = &rec.rejected_reason {
        println!("{:<15} {}", "Rejected:".bold(), reason);
    }
    println!("{:<15} {} ({})", "Created:".bold(), fmt_time(&rec.created_at), rec.created_by);

    if rec.drugs.is_empty() {
        println!("{:<15} {}", "Drugs:".bold(), "none".bright_black());
    } else {
        println!("{}", "Drugs:".bold());
        for drug in &rec.drugs {
            println!(
                "  {:<11} {} ({}) {} {} {}",
                drug.role.to_string().bright_black(),
                drug.name,
                drug.active_moiety,
                drug.dosing,
                drug.interval,
                drug.route
            );
        }
    }
    if !rec.contraindications.is_empty() {
        let list: Vec<&str> = rec.contraindications.iter().map(String::as_str).collect();
        println!("{:<15} {}", "Contra:".bold(), list.join(", "));
    }
}

fn print_escalation_line(esc: &Escalation) {
    println!(
        "{:<6} {:<24} {:<10} {:<8} {:<20} {}",
        esc.id.to_string().bright_cyan(),
        esc_status_colored(esc.status),
        priority_colored(esc.priority),
        esc.recommendation_id,
        esc.reviewer.as_deref().unwrap_or("-"),
        esc.trigger
    );
}

fn print_protocol(protocol: &Protocol) {
    println!(
        "{:<6} {:<10} v{:<4} {}",
        protocol.id.to_string().bright_cyan(),
        protocol_status_colored(protocol.status),
        protocol.version,
        protocol.title
    );
}

fn print_comment(comment: &Comment) {
    let marker = if comment.is_question { "?" } else { " " };
    println!(
        "{} {} {} {}",
        format!("#{}", comment.id).bright_cyan(),
        marker.yellow().bold(),
        fmt_time(&comment.created_at).bright_black(),
        comment.author_name.bold()
    );
    println!("    {}", comment.content);
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            if let Some(review) = e.downcast_ref::<ReviewError>() {
                if review.needs_refresh() {
                    eprintln!(
                        "{}",
                        "hint: the record changed since it was read; reload it and retry".yellow()
                    );
                }
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let actor = resolve_actor(&cli);
    let json = cli.json;
    info!(actor = %actor.id, "pmr starting");

    if let Commands::Init { path } = &cli.command {
        let root = PathBuf::from(path.as_deref().unwrap_or("."));
        let config_path = ReviewConfig::write_default(&root)?;
        let config = ReviewConfig::load_or_default(&root)?;
        let db_path = config.database_path_in(&root);
        let db = Database::open(&db_path).await?;
        db.init_schema().await?;

        println!("{}", "✓ Initialized pmr workspace".green().bold());
        println!("  Config:   {}", config_path.display());
        println!("  Database: {}", db_path.display());
        return Ok(());
    }

    if let Commands::Version = &cli.command {
        println!("pmr {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let root = find_workspace_root()?;
    let session = open_session(&root).await?;
    let result = run_command(&session, cli.command, actor, json).await;
    session.close().await;
    result
}

async fn run_command(
    session: &Session,
    command: Commands,
    actor: Actor,
    json: bool,
) -> Result<()> {
    let review = &session.coordinator;

    match command {
        Commands::Init { .. } | Commands::Version => Ok(()),

        Commands::Recommend {
            mrn,
            drugs,
            contraindications,
        } => {
            let contraindications: BTreeSet<String> = contraindications.into_iter().collect();
            let rec = review
                .create_recommendation(&mrn, drugs, contraindications, &actor)
                .await?;

            if json {
                return print_json(&rec);
            }
            println!("{}", "✓ Created recommendation".green().bold());
            println!("  ID:      {}", rec.id.to_string().bright_cyan());
            println!("  Patient: {}", rec.patient_mrn);
            println!("  Drugs:   {}", rec.drugs.len());
            Ok(())
        }

        Commands::Escalate {
            id,
            vas,
            doctor_rejection,
            priority,
        } => {
            let trigger = match (vas, doctor_rejection) {
                (Some(vas), _) => EscalationTrigger::PainScore { vas },
                (None, true) => EscalationTrigger::DoctorRejection,
                (None, false) => EscalationTrigger::Manual,
            };
            let (_rec, esc) = review
                .escalate_recommendation(id, &actor, trigger, priority)
                .await?;

            if json {
                return print_json(&esc);
            }
            println!("{}", "✓ Escalated recommendation".green().bold());
            println!("  Escalation: {}", esc.id.to_string().bright_cyan());
            println!("  Priority:   {}", priority_colored(esc.priority));
            println!("  Trigger:    {}", esc.trigger);
            Ok(())
        }

        Commands::List {
            status,
            priority,
            active,
        } => {
            let filter = EscalationFilter {
                status,
                priority,
                active_only: active,
            };
            let escalations = review.list_escalations(&filter).await?;

            if json {
                return print_json(&escalations);
            }
            if escalations.is_empty() {
                println!("{}", "No escalations found".yellow());
                return Ok(());
            }

            println!(
                "{:<6} {:<24} {:<10} {:<8} {:<20} {}",
                "ID".bold(),
                "STATUS".bold(),
                "PRIORITY".bold(),
                "REC".bold(),
                "REVIEWER".bold(),
                "TRIGGER".bold()
            );
            println!("{}", "─".repeat(80));
            for esc in &escalations {
                print_escalation_line(esc);
            }
            Ok(())
        }

        Commands::Stats => {
            let stats = review.escalation_stats().await?;
            let counts = session.db.counts().await?;

            if json {
                return print_json(&stats);
            }
            println!("{}", "━".repeat(80));
            println!("{}", "Escalations".bold());
            println!("{}", "━".repeat(80));
            println!("{:<24} {}", "Total:".bold(), stats.total);
            println!("{:<24} {}", "Active:".bold(), stats.active);
            println!("{:<24} {}", "Pending:".bold(), stats.pending);
            println!("{:<24} {}", "In review:".bold(), stats.in_review);
            println!(
                "{:<24} {}",
                "Requires clarification:".bold(),
                stats.requires_clarification
            );
            println!("{:<24} {}", "Resolved:".bold(), stats.resolved);
            println!("{:<24} {}", "Cancelled:".bold(), stats.cancelled);
            println!();
            println!(
                "{:<24} {} critical, {} high, {} medium, {} low",
                "By priority:".bold(),
                stats.critical.to_string().red().bold(),
                stats.high,
                stats.medium,
                stats.low
            );
            println!(
                "{:<24} {} recommendations, {} protocols, {} comments",
                "Stored:".bold(),
                counts.recommendations,
                counts.protocols,
                counts.comments
            );
            Ok(())
        }

        Commands::Show { id } => {
            let detail = review.escalation_detail(id).await?;

            if json {
                return print_json(&detail);
            }
            let esc = &detail.escalation;
            println!("{}", "━".repeat(80));
            println!("{} {}", "Escalation:".bold(), esc.id.to_string().bright_cyan());
            println!("{}", "━".repeat(80));
            println!();
            println!("{:<15} {}", "Status:".bold(), esc_status_colored(esc.status));
            println!("{:<15} {}", "Priority:".bold(), priority_colored(esc.priority));
            println!("{:<15} {}", "Trigger:".bold(), esc.trigger);
            println!(
                "{:<15} {} ({})",
                "Escalated:".bold(),
                fmt_time(&esc.escalated_at),
                esc.escalated_by
            );
            if let Some(reviewer) = &esc.reviewer {
                println!("{:<15} {}", "Reviewer:".bold(), reviewer);
            }
            if let Some(question) = &esc.clarification {
                println!("{:<15} {}", "Question:".bold(), question.magenta());
            }
            if let Some(resolution) = &esc.resolution {
                println!("{:<15} {}", "Resolution:".bold(), resolution);
            }
            if let (Some(by), Some(at)) = (&esc.resolved_by, &esc.resolved_at) {
                println!("{:<15} {} ({})", "Closed:".bold(), fmt_time(at), by);
            }

            println!();
            print_recommendation(&detail.recommendation);

            if !detail.protocols.is_empty() {
                println!();
                println!("{}", "Protocols:".bold());
                for protocol in &detail.protocols {
                    print_protocol(protocol);
                }
            }
            if !detail.comments.is_empty() {
                println!();
                println!("{}", "Comments:".bold());
                for comment in &detail.comments {
                    print_comment(comment);
                }
            }

            println!();
            println!("{}", "━".repeat(80));
            Ok(())
        }

        Commands::History { mrn } => {
            let history = review.patient_history(&mrn).await?;

            if json {
                return print_json(&history);
            }
            if history.is_empty() {
                println!("{}", format!("No recommendations for {}", mrn).yellow());
                return Ok(());
            }
            for (i, rec) in history.iter().enumerate() {
                if i > 0 {
                    println!("{}", "─".repeat(80));
                }
                print_recommendation(rec);
            }
            Ok(())
        }

        Commands::Take { id } => {
            let esc = review.take(id, &actor).await?;
            if json {
                return print_json(&esc);
            }
            println!("{}", "✓ Escalation taken".green().bold());
            print_escalation_line(&esc);
            Ok(())
        }

        Commands::Ask { id, question } => {
            let esc = review.ask_question(id, &question, &actor).await?;
            if json {
                return print_json(&esc);
            }
            println!("{}", "✓ Question sent; escalation parked".green().bold());
            print_escalation_line(&esc);
            Ok(())
        }

        Commands::Answer { id, answer } => {
            let esc = review.answer_question(id, &answer, &actor).await?;
            if json {
                return print_json(&esc);
            }
            println!("{}", "✓ Answer recorded; back in review".green().bold());
            print_escalation_line(&esc);
            Ok(())
        }

        Commands::Approve {
            id,
            drugs,
            contraindications,
            comment,
            resolution,
        } => {
            let esc = review.escalation(id).await?;
            let rec = review.recommendation(esc.recommendation_id).await?;
            let (drugs, contraindications) =
                approval_regimen(rec.drugs, rec.contraindications, drugs, contraindications);

            let outcome = review
                .approve_with_edit(
                    id,
                    ApprovalEdit {
                        drugs,
                        contraindications,
                        comment,
                        resolution,
                    },
                    &actor,
                )
                .await?;

            if json {
                return print_json(&outcome);
            }
            println!("{}", "✓ Recommendation approved".green().bold());
            println!("  Recommendation: {}", outcome.recommendation.id.to_string().bright_cyan());
            println!("  Escalation:     {}", esc_status_colored(outcome.escalation.status));
            println!("  Steps run:      {:?}", outcome.completed);
            Ok(())
        }

        Commands::Reject {
            id,
            reason,
            comment,
            resolution,
        } => {
            let outcome = review
                .reject_and_replace(
                    id,
                    RejectionRequest {
                        reason,
                        comment,
                        resolution,
                    },
                    &actor,
                )
                .await?;

            if json {
                return print_json(&outcome);
            }
            println!("{}", "✓ Recommendation rejected".green().bold());
            println!("  Rejected:   {}", outcome.rejected.id.to_string().bright_cyan());
            println!(
                "  Successor:  {} (hierarchy {})",
                outcome.successor.id.to_string().bright_cyan(),
                outcome.successor.regimen_hierarchy
            );
            println!("  Escalation: {}", esc_status_colored(outcome.escalation.status));
            println!("  Steps run:  {:?}", outcome.completed);
            Ok(())
        }

        Commands::Protocol { command } => run_protocol(review, command, &actor, json).await,

        Commands::Comment { command } => run_comment(review, command, &actor, json).await,
    }
}

async fn run_protocol(
    review: &ReviewCoordinator,
    command: ProtocolCommands,
    actor: &Actor,
    json: bool,
) -> Result<()> {
    let (protocol, message) = match command {
        ProtocolCommands::Draft {
            escalation,
            title,
            content,
        } => (
            review.draft_protocol(escalation, &title, &content, actor).await?,
            "✓ Protocol drafted",
        ),
        ProtocolCommands::Edit { id, title, content } => (
            review.edit_protocol(id, &title, &content, actor).await?,
            "✓ Protocol updated",
        ),
        ProtocolCommands::Approve { id } => (
            review.approve_protocol(id, actor).await?,
            "✓ Protocol approved",
        ),
        ProtocolCommands::Reject { id, reason } => (
            review.reject_protocol(id, &reason, actor).await?,
            "✓ Protocol rejected",
        ),
        ProtocolCommands::List { escalation } => {
            let protocols = review.protocols_for(escalation).await?;
            if json {
                return print_json(&protocols);
            }
            if protocols.is_empty() {
                println!("{}", "No protocols found".yellow());
            }
            for protocol in &protocols {
                print_protocol(protocol);
            }
            return Ok(());
        }
    };

    if json {
        return print_json(&protocol);
    }
    println!("{}", message.green().bold());
    print_protocol(&protocol);
    Ok(())
}

async fn run_comment(
    review: &ReviewCoordinator,
    command: CommentCommands,
    actor: &Actor,
    json: bool,
) -> Result<()> {
    match command {
        CommentCommands::Add {
            parent,
            content,
            question,
        } => {
            let parent = parse_parent(&parent)?;
            let comment = review.add_comment(parent, &content, question, actor).await?;
            if json {
                return print_json(&comment);
            }
            println!("{}", "✓ Comment added".green().bold());
            print_comment(&comment);
            Ok(())
        }

        CommentCommands::List { parent } => {
            let parent = parse_parent(&parent)?;
            let comments = review.comments(parent).await?;
            if json {
                return print_json(&comments);
            }
            if comments.is_empty() {
                println!("{}", format!("No comments on {}", parent).yellow());
            }
            for comment in &comments {
                print_comment(comment);
            }
            Ok(())
        }

        CommentCommands::Delete { id } => {
            review.delete_comment(id, actor).await?;
            if !json {
                println!("{}", format!("✓ Deleted comment {}", id).green().bold());
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_parent() {
        assert_eq!(
            parse_parent("recommendation:7").unwrap(),
            CommentParent::Recommendation(7)
        );
        assert_eq!(
            parse_parent("protocol: 3").unwrap(),
            CommentParent::Protocol(3)
        );
        assert!(parse_parent("escalation:1").is_err());
        assert!(parse_parent("recommendation").is_err());
        assert!(parse_parent("protocol:x").is_err());
    }

    #[test]
    fn test_cli_parses_drug_lines() {
        let cli = Cli::try_parse_from([
            "pmr",
            "--actor",
            "dr-house",
            "recommend",
            "--mrn",
            "MRN-1",
            "--drug",
            "Morphine:morphine:2 mg:q4h:IV",
            "--drug",
            "Paracetamol:paracetamol:1 g:q6h:PO:alt",
            "--contra",
            "NSAID allergy",
        ])
        .unwrap();

        match cli.command {
            Commands::Recommend {
                mrn,
                drugs,
                contraindications,
            } => {
                assert_eq!(mrn, "MRN-1");
                assert_eq!(drugs.len(), 2);
                assert_eq!(drugs[1].name, "Paracetamol");
                assert_eq!(contraindications, vec!["NSAID allergy".to_string()]);
            }
            _ => panic!("expected recommend"),
        }
    }

    #[test]
    fn test_cli_rejects_bad_status() {
        assert!(Cli::try_parse_from(["pmr", "list", "--status", "LOST"]).is_err());
        assert!(Cli::try_parse_from(["pmr", "escalate", "1", "--vas", "9", "--doctor-rejection"]).is_err());
    }

    #[test]
    fn test_resolve_actor() {
        let cli = Cli::try_parse_from(["pmr", "--actor", "dr-cuddy", "--elevated", "stats"]).unwrap();
        let actor = resolve_actor(&cli);
        assert_eq!(actor.id, "dr-cuddy");
        assert_eq!(actor.name, "dr-cuddy");
        assert!(actor.elevated);
    }

    #[test]
    fn test_approval_regimen_defaults_each_field() {
        let current_drugs = vec!["Ibuprofen:ibuprofen:400mg:8h:PO".parse::<DrugEntry>().unwrap()];
        let current_contras: BTreeSet<String> = ["penicillin".to_string()].into();

        let (drugs, contras) = approval_regimen(
            current_drugs.clone(),
            current_contras.clone(),
            Vec::new(),
            vec!["renal impairment".to_string()],
        );
        assert_eq!(drugs, current_drugs);
        assert_eq!(contras, ["renal impairment".to_string()].into());

        let iv = vec!["Paracetamol:paracetamol:1g:6h:IV".parse::<DrugEntry>().unwrap()];
        let (drugs, contras) = approval_regimen(
            current_drugs.clone(),
            current_contras.clone(),
            iv.clone(),
            Vec::new(),
        );
        assert_eq!(drugs, iv);
        assert_eq!(contras, current_contras);

        let (drugs, contras) =
            approval_regimen(current_drugs.clone(), current_contras.clone(), vec![], vec![]);
        assert_eq!(drugs, current_drugs);
        assert_eq!(contras, current_contras);
    }
}

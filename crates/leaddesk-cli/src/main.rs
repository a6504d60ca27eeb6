//! `LeadDesk` CLI: capture leads and review them from the terminal.
//!
//! A terminal presentation layer over `leaddesk-core`. Every command is one
//! process; the signed-in session is persisted between commands in the
//! session file.

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod config;
mod session_file;

use std::io::{BufRead, Write as _};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use leaddesk_core::auth::{AuthBridge, SyncOutcome};
use leaddesk_core::collection::{LeadCounts, StatusFilter};
use leaddesk_core::controller::{
    Access, AdminController, Confirmation, DeleteOutcome, DestructiveAction,
};
use leaddesk_core::error::RepositoryError;
use leaddesk_core::repository::LeadRepository;
use leaddesk_core::submission::{FormField, FormStatus, LeadForm};
use leaddesk_core::view::DashboardView;
use leaddesk_store::{
    IdentityProvider, LeadId, LeadStatus, Profile, SupabaseBackend, SupabaseConfig, Variant,
};
use tracing::debug;

use crate::config::CliConfig;

// ── ANSI color helpers ───────────────────────────────────────────────

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const WHITE: &str = "\x1b[37m";

// ── CLI structure ────────────────────────────────────────────────────

/// LeadDesk: lead capture and admin review.
#[derive(Parser)]
#[command(
    name = "leaddesk",
    version,
    about = "LeadDesk CLI: submit leads and review them as an admin",
    long_about = None,
    after_help = format!(
        "{DIM}Environment variables:{RESET}\n  \
         SUPABASE_URL           Store base URL\n  \
         SUPABASE_ANON_KEY      Public API key\n  \
         LEADDESK_VARIANT       base or sales (default: base)\n  \
         LEADDESK_SESSION_FILE  Session file (default: ~/.leaddesk/session.json)\n  \
         LEADDESK_LOG_LEVEL     Log filter (default: warn)\n\n\
         {DIM}Examples:{RESET}\n  \
         leaddesk submit --name Ann --email a@x.com --seats 5\n  \
         leaddesk login\n  \
         leaddesk leads list --status new --search acme\n  \
         leaddesk leads set-status <id> done\n  \
         leaddesk leads export --out ./exports"
    ),
)]
struct Cli {
    /// Store base URL.
    #[arg(long, global = true)]
    supabase_url: Option<String>,

    /// Public API key of the store.
    #[arg(long, global = true)]
    supabase_anon_key: Option<String>,

    /// Marketing variant stamped into submitted leads (base or sales).
    #[arg(long, global = true)]
    variant: Option<Variant>,

    /// Session file location.
    #[arg(long, global = true)]
    session_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a lead through the capture form.
    Submit(SubmitArgs),
    /// Sign in with Google.
    Login {
        /// Address of the page the browser landed on after signing in (or a
        /// bare access token).
        #[arg(long)]
        callback: Option<String>,
    },
    /// Sign out and forget the saved session.
    Logout,
    /// Show the signed-in identity and its role.
    Whoami,
    /// Review submitted leads (admin only).
    Leads {
        #[command(subcommand)]
        action: LeadsCommands,
    },
}

#[derive(Args)]
struct SubmitArgs {
    /// Contact name (required).
    #[arg(long, default_value = "")]
    name: String,
    /// Contact email (required).
    #[arg(long, default_value = "")]
    email: String,
    /// Telegram handle.
    #[arg(long)]
    telegram: Option<String>,
    /// Number of seats (non-numeric values count as 1).
    #[arg(long, default_value = "1")]
    seats: String,
    /// Company name.
    #[arg(long)]
    company: Option<String>,
    /// What the team wants to achieve.
    #[arg(long)]
    goal: Option<String>,
}

#[derive(Args)]
struct QueryArgs {
    /// Status filter: all, new, in_progress or done.
    #[arg(long, default_value = "all")]
    status: StatusFilter,
    /// Case-insensitive search over name, email, telegram and company.
    #[arg(long, default_value = "")]
    search: String,
}

#[derive(Subcommand)]
enum LeadsCommands {
    /// List the working set (newest first, at most 200).
    List {
        #[command(flatten)]
        query: QueryArgs,
        /// Print the dashboard snapshot as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show total and per-status counts.
    Stats,
    /// Change a lead's status.
    SetStatus {
        /// Lead id.
        id: LeadId,
        /// New status: new, in_progress or done.
        status: LeadStatus,
    },
    /// Replace a lead's notes (empty text clears them).
    Note {
        /// Lead id.
        id: LeadId,
        /// Note text.
        #[arg(default_value = "")]
        text: String,
    },
    /// Delete one lead.
    Delete {
        /// Lead id.
        id: LeadId,
        /// Skip the confirmation prompt.
        #[arg(long, short)]
        yes: bool,
    },
    /// Delete several leads in one request.
    BulkDelete {
        /// Comma-separated lead ids (default: the whole working set).
        #[arg(long, value_delimiter = ',')]
        ids: Vec<LeadId>,
        #[command(flatten)]
        query: QueryArgs,
        /// Skip the confirmation prompt.
        #[arg(long, short)]
        yes: bool,
    },
    /// Export the working set as CSV.
    Export {
        #[command(flatten)]
        query: QueryArgs,
        /// Output file or directory (default: ./leads_YYYY-MM-DD.csv).
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

impl Cli {
    /// Environment configuration with command-line overrides applied.
    fn config(&self) -> CliConfig {
        let mut config = CliConfig::from_env();
        if let Some(url) = &self.supabase_url {
            config.supabase_url.clone_from(url);
        }
        if let Some(key) = &self.supabase_anon_key {
            config.anon_key.clone_from(key);
        }
        if let Some(variant) = self.variant {
            config.variant = variant;
        }
        if let Some(path) = &self.session_file {
            config.session_file.clone_from(path);
        }
        config
    }
}

// ── Pretty output helpers ────────────────────────────────────────────

fn header(icon: &str, title: &str) {
    println!("{BOLD}{CYAN}{icon} {title}{RESET}");
    println!("{DIM}─────────────────────────────────────────{RESET}");
}

fn kv_line(key: &str, value: &str) {
    println!("  {DIM}{key:<20}{RESET} {WHITE}{value}{RESET}");
}

fn success(msg: &str) {
    println!("{GREEN}{BOLD}✓{RESET} {msg}");
}

fn warning(msg: &str) {
    println!("{YELLOW}{BOLD}⚠{RESET} {YELLOW}{msg}{RESET}");
}

const fn status_color(status: LeadStatus) -> &'static str {
    match status {
        LeadStatus::New => CYAN,
        LeadStatus::InProgress => YELLOW,
        LeadStatus::Done => GREEN,
    }
}

fn print_leads(view: &DashboardView) {
    header("📋", "Leads");
    kv_line("Filter", &view.filter.to_string());
    if !view.search.trim().is_empty() {
        kv_line("Search", &view.search);
    }
    kv_line(
        "Showing",
        &format!("{} of {}", view.showing(), view.counts.total),
    );
    println!();

    if view.leads.is_empty() {
        println!("  {DIM}(no leads){RESET}");
        println!();
        return;
    }

    for row in &view.leads {
        let lead = &row.lead;
        let color = status_color(lead.status);
        println!(
            "  {color}{BOLD}{:<12}{RESET} {BOLD}{}{RESET} <{}>",
            lead.status.label(),
            lead.name,
            lead.email
        );
        let mut details = vec![format!("seats {}", lead.seats)];
        if let Some(company) = &lead.company {
            details.push(company.clone());
        }
        if let Some(telegram) = &lead.telegram {
            details.push(format!("tg {telegram}"));
        }
        details.push(lead.created_at.format("%Y-%m-%d %H:%M").to_string());
        println!("  {:<12} {DIM}{}{RESET}", "", details.join(" · "));
        if let Some(goal) = &lead.goal {
            println!("  {:<12} {DIM}goal:{RESET} {goal}", "");
        }
        if let Some(notes) = &lead.notes {
            println!("  {:<12} {DIM}notes:{RESET} {notes}", "");
        }
        println!("  {:<12} {DIM}{}{RESET}", "", lead.id);
        println!();
    }
}

fn print_stats(counts: &LeadCounts) {
    header("📊", "Lead Stats");
    kv_line("Total", &counts.total.to_string());
    for status in LeadStatus::ALL {
        let color = status_color(status);
        kv_line(
            status.label(),
            &format!("{color}{}{RESET}", counts.of(status)),
        );
    }
    println!();
}

fn print_profile(profile: &Profile, access: Access) {
    header("👤", "Signed In");
    if let Some(name) = &profile.full_name {
        kv_line("Name", name);
    }
    if let Some(email) = &profile.email {
        kv_line("Email", email);
    }
    kv_line("Role", profile.role());
    let access = match access {
        Access::Admin => format!("{GREEN}admin dashboard{RESET}"),
        Access::Member => format!("{YELLOW}no admin access{RESET}"),
        Access::Anonymous => format!("{RED}anonymous{RESET}"),
    };
    kv_line("Access", &access);
    println!();
}

// ── Confirmation ─────────────────────────────────────────────────────

/// Asks on the terminal unless `--yes` was given. Anything but `y`/`yes`
/// declines, including a closed stdin.
struct Prompt {
    assume_yes: bool,
}

impl Confirmation for Prompt {
    fn confirm(&self, action: &DestructiveAction) -> bool {
        if self.assume_yes {
            return true;
        }
        print!("{YELLOW}{BOLD}?{RESET} {action} [y/N] ");
        if std::io::stdout().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

// ── Store wiring ─────────────────────────────────────────────────────

fn supabase(config: &CliConfig) -> Result<Option<Arc<SupabaseBackend>>> {
    if !config.store_configured() {
        return Ok(None);
    }
    let backend = SupabaseBackend::with_config(SupabaseConfig {
        url: config.supabase_url.clone(),
        anon_key: config.anon_key.clone(),
        timeout: config.timeout,
    })
    .context("failed to configure the lead store")?;
    Ok(Some(Arc::new(backend)))
}

async fn repository(config: &CliConfig) -> Result<LeadRepository> {
    #[cfg(feature = "postgres-backend")]
    {
        if let Some(url) = &config.database_url {
            let backend = leaddesk_store::PostgresBackend::connect(url)
                .await
                .context("failed to connect to the database")?;
            return Ok(LeadRepository::new(Arc::new(backend)));
        }
    }

    Ok(match supabase(config)? {
        Some(backend) => LeadRepository::new(backend),
        None => LeadRepository::unconfigured(),
    })
}

fn bridge_for(backend: &Arc<SupabaseBackend>) -> AuthBridge {
    let controller = Arc::new(AdminController::new(LeadRepository::new(backend.clone())));
    AuthBridge::new(backend.clone(), backend.clone(), controller)
}

fn require_supabase(config: &CliConfig) -> Result<Arc<SupabaseBackend>> {
    match supabase(config)? {
        Some(backend) => Ok(backend),
        None => bail!(RepositoryError::NotConfigured),
    }
}

/// Enter the admin workflow for the saved session.
async fn admin(config: &CliConfig) -> Result<Arc<AdminController>> {
    #[cfg(feature = "postgres-backend")]
    {
        if let Some(url) = &config.database_url {
            return operator(url).await;
        }
    }

    let backend = require_supabase(config)?;
    let Some(session) = session_file::load(&config.session_file)? else {
        bail!("not signed in: run `leaddesk login` first");
    };
    backend.restore_session(session);

    let bridge = bridge_for(&backend);
    match bridge
        .start()
        .await
        .context("failed to open the admin dashboard")?
    {
        SyncOutcome::Entered {
            access: Access::Admin,
            ..
        } => Ok(Arc::clone(bridge.controller())),
        SyncOutcome::Entered { profile, .. } => bail!(
            "{} has role '{}': admin access requires role = admin in the profiles table",
            profile
                .email
                .as_deref()
                .or(profile.full_name.as_deref())
                .unwrap_or("this account"),
            profile.role()
        ),
        SyncOutcome::SignedOut | SyncOutcome::Superseded => {
            bail!("not signed in: run `leaddesk login` first")
        }
    }
}

/// Admin workflow over a direct database connection. The connection's
/// database role decides what is allowed, so the controller is entered as an
/// admin operator.
#[cfg(feature = "postgres-backend")]
async fn operator(url: &str) -> Result<Arc<AdminController>> {
    use leaddesk_core::controller::SessionContext;
    use leaddesk_store::{ADMIN_ROLE, PostgresBackend, Session, SessionUser};

    let backend = PostgresBackend::connect(url)
        .await
        .context("failed to connect to the database")?;
    let controller = Arc::new(AdminController::new(LeadRepository::new(Arc::new(backend))));

    let id = uuid::Uuid::nil();
    let ctx = SessionContext {
        session: Session {
            access_token: String::new(),
            refresh_token: None,
            expires_at: None,
            user: SessionUser {
                id,
                email: None,
                user_metadata: serde_json::Value::Null,
            },
        },
        profile: Profile {
            id,
            role: Some(ADMIN_ROLE.to_owned()),
            full_name: Some("database operator".to_owned()),
            email: None,
            avatar_url: None,
        },
    };
    controller
        .enter(&ctx)
        .await
        .context("failed to load leads")?;
    Ok(controller)
}

// ── Command dispatch ─────────────────────────────────────────────────

fn init_tracing(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = cli.config();
    init_tracing(&config.log_level);
    debug!(?config, "configuration loaded");

    match run(&config, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("  {RED}{BOLD}✗ Error:{RESET} {e:#}");
            eprintln!();
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &CliConfig, cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Submit(args) => cmd_submit(config, args).await,
        Commands::Login { callback } => cmd_login(config, callback.as_deref()).await,
        Commands::Logout => cmd_logout(config).await,
        Commands::Whoami => cmd_whoami(config).await,
        Commands::Leads { action } => cmd_leads(config, action).await,
    }
}

// ── Lead capture ─────────────────────────────────────────────────────

async fn cmd_submit(config: &CliConfig, args: SubmitArgs) -> Result<()> {
    let mut form = LeadForm::new(repository(config).await?, config.variant);
    form.set(FormField::Name, args.name);
    form.set(FormField::Email, args.email);
    form.set(FormField::Telegram, args.telegram.unwrap_or_default());
    form.set(FormField::Seats, args.seats);
    form.set(FormField::Company, args.company.unwrap_or_default());
    form.set(FormField::Goal, args.goal.unwrap_or_default());

    match form.submit().await? {
        FormStatus::Success => {
            success(&format!("Request sent ({} variant)", config.variant));
            Ok(())
        }
        FormStatus::Error(message) => bail!("{message}"),
        other => bail!("submission ended in an unexpected state: {other:?}"),
    }
}

// ── Session commands ─────────────────────────────────────────────────

async fn cmd_login(config: &CliConfig, callback: Option<&str>) -> Result<()> {
    let backend = require_supabase(config)?;
    let bridge = bridge_for(&backend);

    let Some(callback) = callback else {
        let url = bridge
            .sign_in_url(&config.redirect_url)
            .context("failed to build the sign-in URL")?;
        println!();
        header("🔐", "Sign In");
        println!();
        println!("  {DIM}Open this address in a browser and sign in with Google:{RESET}");
        println!();
        println!("  {CYAN}{url}{RESET}");
        println!();
        println!("  {DIM}Then copy the address of the page you land on and run:{RESET}");
        println!();
        println!("    {CYAN}leaddesk login --callback '<address>'{RESET}");
        println!();
        return Ok(());
    };

    let outcome = bridge.complete_sign_in(callback).await;
    if let Some(session) = backend.current_session().await? {
        session_file::save(&config.session_file, &session)?;
        debug!(path = %config.session_file.display(), "session saved");
    }

    match outcome.context("sign-in failed")? {
        SyncOutcome::Entered {
            profile, access, ..
        } => {
            println!();
            print_profile(&profile, access);
            success("Signed in");
        }
        SyncOutcome::SignedOut | SyncOutcome::Superseded => warning("Signed out"),
    }
    Ok(())
}

async fn cmd_logout(config: &CliConfig) -> Result<()> {
    if let Some(backend) = supabase(config)? {
        if let Some(session) = session_file::load(&config.session_file)? {
            backend.restore_session(session);
            if let Err(e) = bridge_for(&backend).sign_out().await {
                warning(&format!("sign-out request failed: {e}"));
            }
        }
    }

    if session_file::remove(&config.session_file)? {
        success("Signed out");
    } else {
        warning("No saved session");
    }
    Ok(())
}

async fn cmd_whoami(config: &CliConfig) -> Result<()> {
    let backend = require_supabase(config)?;
    let Some(session) = session_file::load(&config.session_file)? else {
        warning("Not signed in");
        return Ok(());
    };
    backend.restore_session(session);

    match bridge_for(&backend)
        .start()
        .await
        .context("failed to resolve the profile")?
    {
        SyncOutcome::Entered {
            profile, access, ..
        } => print_profile(&profile, access),
        SyncOutcome::SignedOut | SyncOutcome::Superseded => warning("Not signed in"),
    }
    Ok(())
}

// ── Admin commands ───────────────────────────────────────────────────

async fn apply_query(controller: &AdminController, query: QueryArgs) {
    controller.set_filter(query.status).await;
    controller.set_search(query.search).await;
}

async fn cmd_leads(config: &CliConfig, action: LeadsCommands) -> Result<()> {
    let controller = admin(config).await?;

    match action {
        LeadsCommands::List { query, json } => {
            apply_query(&controller, query).await;
            let view = controller.snapshot().await;
            if json {
                let text = serde_json::to_string_pretty(&view)
                    .context("failed to serialize leads")?;
                println!("{text}");
            } else {
                println!();
                print_leads(&view);
            }
        }
        LeadsCommands::Stats => {
            println!();
            print_stats(&controller.counts().await);
        }
        LeadsCommands::SetStatus { id, status } => {
            controller.set_status(id, status).await?;
            success(&format!("Lead {id} is now {}", status.label()));
        }
        LeadsCommands::Note { id, text } => {
            controller.save_notes(id, &text).await?;
            if text.trim().is_empty() {
                success(&format!("Notes cleared for lead {id}"));
            } else {
                success(&format!("Notes saved for lead {id}"));
            }
        }
        LeadsCommands::Delete { id, yes } => {
            let outcome = controller
                .delete_lead(id, &Prompt { assume_yes: yes })
                .await?;
            report_delete(outcome);
        }
        LeadsCommands::BulkDelete { ids, query, yes } => {
            apply_query(&controller, query).await;
            if ids.is_empty() {
                controller.select_all(true).await;
            } else {
                for id in ids {
                    if !controller.toggle_selection(id, true).await {
                        warning(&format!("Lead {id} is not loaded, skipping"));
                    }
                }
            }
            let outcome = controller
                .delete_selected(&Prompt { assume_yes: yes })
                .await?;
            report_delete(outcome);
        }
        LeadsCommands::Export { query, out } => {
            apply_query(&controller, query).await;
            let export = controller
                .export_csv(chrono::Utc::now().date_naive())
                .await?;
            let path = match out {
                Some(dir) if dir.is_dir() => dir.join(&export.filename),
                Some(path) => path,
                None => PathBuf::from(&export.filename),
            };
            std::fs::write(&path, &export.bytes)
                .with_context(|| format!("failed to write {}", path.display()))?;
            success(&format!("Exported to {}", path.display()));
        }
    }
    Ok(())
}

fn report_delete(outcome: DeleteOutcome) {
    match outcome {
        DeleteOutcome::Deleted { count } => success(&format!("Deleted {count} lead(s)")),
        DeleteOutcome::Declined => warning("Cancelled, nothing was deleted"),
        DeleteOutcome::NothingSelected => warning("No leads match, nothing was deleted"),
        DeleteOutcome::Abandoned => {
            warning("Session changed before confirming, nothing was deleted");
        }
    }
}

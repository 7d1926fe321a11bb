mod config;
mod db;
mod discovery;
mod llm;
mod models;
mod review;
mod scoring;
mod search;
mod tui;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn};

use config::Config;
use db::Database;
use discovery::DiscoveryGuard;
use models::ListingStatus;
use review::DraftReviewLoop;
use scoring::FitGate;
use search::WebClient;

#[derive(Parser)]
#[command(name = "legwork")]
#[command(about = "Job application pipeline - discover, score, draft, review, approve")]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "legwork.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Run one full cycle: discover, score, draft, review, approve
    Cycle,

    /// Search the web for new listings
    Discover,

    /// Score unprocessed listings against the candidate profile
    Score,

    /// Draft application materials for listings above the fit threshold
    Draft,

    /// Run the review-refinement loop over drafted applications
    Review,

    /// Interactively approve reviewed applications
    Approve,

    /// List listings
    List {
        /// Filter by status (new, analyzed, drafted, reviewed, submitted, user_rejected)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Show a listing and its application
    Show {
        /// Listing key
        key: String,
    },

    /// Show recent audit log entries
    Audit {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("legwork=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let db = open_database(&config)?;

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Cycle => {
            db.ensure_initialized()?;
            run_cycle(&db, &config)?;
        }

        Commands::Discover => {
            db.ensure_initialized()?;
            let provider = llm::create_provider(&config.llm)?;
            let web = WebClient::new(config.http_timeout_secs)?;
            let guard = DiscoveryGuard::new(&db, &web, provider.as_ref(), &config);
            let stats = guard.run()?;
            println!("Leads seen: {}", stats.leads_seen);
            println!("Created:    {}", stats.created);
            println!("Duplicates: {}", stats.duplicates);
            println!("Skipped:    {}", stats.skipped);
            if stats.errors > 0 {
                println!("Errors:     {}", stats.errors);
            }
        }

        Commands::Score => {
            db.ensure_initialized()?;
            let provider = llm::create_provider(&config.llm)?;
            let profile = config.load_profile()?;
            let gate = FitGate::new(&db, provider.as_ref(), &profile, &config);
            let scored = gate.run()?;
            println!("Scored {scored} listing(s).");
        }

        Commands::Draft => {
            db.ensure_initialized()?;
            let provider = llm::create_provider(&config.llm)?;
            let master_source = config.load_master_source()?;
            let looper = DraftReviewLoop::new(&db, provider.as_ref(), &master_source, &config);
            let drafted = looper.run_drafting()?;
            println!("Drafted {drafted} application(s).");
        }

        Commands::Review => {
            db.ensure_initialized()?;
            let provider = llm::create_provider(&config.llm)?;
            let master_source = config.load_master_source()?;
            let looper = DraftReviewLoop::new(&db, provider.as_ref(), &master_source, &config);
            let reviewed = looper.run_review()?;
            println!("Reviewed {reviewed} application(s).");
        }

        Commands::Approve => {
            db.ensure_initialized()?;
            tui::run_approval(&db)?;
        }

        Commands::List { status } => {
            db.ensure_initialized()?;
            let status = match status.as_deref() {
                Some(s) => Some(
                    ListingStatus::parse(s)
                        .ok_or_else(|| anyhow!("Unknown status '{}'", s))?,
                ),
                None => None,
            };
            let listings = db.list_listings(status)?;
            if listings.is_empty() {
                println!("No listings found.");
            } else {
                println!(
                    "{:<14} {:<13} {:>5} {:<22} {:<32}",
                    "KEY", "STATUS", "FIT", "COMPANY", "ROLE"
                );
                println!("{}", "-".repeat(90));
                for listing in listings {
                    let fit = listing
                        .fit_score
                        .map(|s| format!("{s:.0}"))
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:<14} {:<13} {:>5} {:<22} {:<32}",
                        listing.key,
                        listing.status.as_str(),
                        fit,
                        truncate(&listing.company, 20),
                        truncate(&listing.role, 30),
                    );
                }
            }
        }

        Commands::Show { key } => {
            db.ensure_initialized()?;
            match db.get_listing(&key)? {
                Some(listing) => {
                    println!("Listing {}", listing.key);
                    println!("Company:  {}", listing.company);
                    println!("Role:     {}", listing.role);
                    println!("Status:   {}", listing.status);
                    println!("URL:      {}", listing.url);
                    if let Some(location) = &listing.location {
                        println!("Location: {}", location);
                    }
                    if let Some(careers) = &listing.careers_url {
                        println!("Careers:  {} (verified: {})", careers, listing.careers_page_verified);
                    }
                    if let Some(score) = listing.fit_score {
                        println!("Fit:      {score:.1}/100");
                    }
                    if let Some(rationale) = &listing.fit_rationale {
                        println!("\n--- Fit rationale ---\n{rationale}");
                    }

                    if let Some(app) = db.application_for_listing(&listing.key)? {
                        println!("\nApplication {} ({})", app.id, app.status);
                        println!("Review score: {:.1}/100", app.review_score);
                        if let Some(path) = &app.resume_path {
                            println!("Resume:       {path}");
                        }
                        if let Some(path) = &app.cover_letter_path {
                            println!("Cover letter: {path}");
                        }
                        if let Some(submitted) = &app.submitted_at {
                            println!("Submitted:    {submitted}");
                        }
                        if let Some(feedback) = &app.feedback {
                            println!("\n--- Review feedback ---\n{feedback}");
                        }
                    }
                }
                None => {
                    println!("Listing '{key}' not found.");
                }
            }
        }

        Commands::Audit { limit } => {
            db.ensure_initialized()?;
            let entries = db.recent_audit(limit)?;
            if entries.is_empty() {
                println!("Audit log is empty.");
            } else {
                println!("{:<20} {:<14} {:<14} {}", "WHEN", "LISTING", "ACTION", "DETAIL");
                println!("{}", "-".repeat(80));
                for entry in entries {
                    println!(
                        "{:<20} {:<14} {:<14} {}",
                        entry.created_at,
                        entry.listing_key.as_deref().unwrap_or("-"),
                        entry.action,
                        truncate(entry.detail.as_deref().unwrap_or(""), 40),
                    );
                }
            }
        }
    }

    Ok(())
}

fn open_database(config: &Config) -> Result<Database> {
    match &config.db_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Database::open(path)
        }
        None => Database::open_default(),
    }
}

/// One full pass: discover, score, draft, review, approve. Each
/// LLM-dependent stage is held as an optional capability; a bootstrap
/// failure (no API key, missing profile or master source) disables that
/// stage for the run and the rest still execute.
fn run_cycle(db: &Database, config: &Config) -> Result<()> {
    info!("=== cycle started ===");
    db.audit(None, "cycle_started", "")?;

    let provider = match llm::create_provider(&config.llm) {
        Ok(provider) => Some(provider),
        Err(e) => {
            error!("llm provider unavailable: {e:#}");
            None
        }
    };
    let profile = match config.load_profile() {
        Ok(profile) => Some(profile),
        Err(e) => {
            error!("candidate profile unavailable: {e:#}");
            None
        }
    };
    let master_source = match config.load_master_source() {
        Ok(master) => Some(master),
        Err(e) => {
            error!("master source unavailable: {e:#}");
            None
        }
    };
    let web = WebClient::new(config.http_timeout_secs)?;

    // 1. Discovery
    if let Some(provider) = provider.as_deref() {
        let guard = DiscoveryGuard::new(db, &web, provider, config);
        if let Err(e) = guard.run() {
            error!("discovery pass failed: {e:#}");
        }
    } else {
        warn!("discovery disabled for this run");
    }

    // 2. Fit gate
    match (provider.as_deref(), profile.as_deref()) {
        (Some(provider), Some(profile)) => {
            let gate = FitGate::new(db, provider, profile, config);
            if let Err(e) = gate.run() {
                error!("scoring pass failed: {e:#}");
            }
        }
        _ => warn!("scoring disabled for this run"),
    }

    // 3. Draft-review loop
    match (provider.as_deref(), master_source.as_deref()) {
        (Some(provider), Some(master)) => {
            let looper = DraftReviewLoop::new(db, provider, master, config);
            if let Err(e) = looper.run_drafting() {
                error!("drafting pass failed: {e:#}");
            }
            if let Err(e) = looper.run_review() {
                error!("review pass failed: {e:#}");
            }
        }
        _ => warn!("drafting and review disabled for this run"),
    }

    // 4. Approval gate (interactive)
    tui::run_approval(db)?;

    db.audit(None, "cycle_complete", "")?;
    info!("=== cycle complete ===");
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max.saturating_sub(3)])
    }
}

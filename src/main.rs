//! `fiba-events` command-line entry point.
//!
//! ```bash
//! # one reconciliation cycle against the live API (what cron runs)
//! fiba-events run
//!
//! # replay a saved listing without notifying anyone
//! fiba-events run --source-file listing.json --no-notify
//!
//! # stored events with open registration
//! fiba-events list --open
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fiba_events::config::AppConfig;
use fiba_events::db::Store;
use fiba_events::fetch::{EventSource, FibaApi, JsonFileSource};
use fiba_events::models::Event;
use fiba_events::notify::{self, EmailNotifier, EMAIL_SUBJECT};
use fiba_events::reconcile::CycleReport;

const SUMMARY_PREVIEW: usize = 5;

#[derive(Parser, Debug)]
#[command(name = "fiba-events")]
#[command(about = "Tracks FIBA 3x3 events and reports new and missing ones")]
#[command(version)]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch events, update the store and report changes
    Run {
        /// Read the listing from a saved JSON response instead of the API
        #[arg(long)]
        source_file: Option<PathBuf>,

        /// Also write the raw API response to this file
        #[arg(long, conflicts_with = "source_file")]
        save_response: Option<PathBuf>,

        /// Report changes without calling any notifier
        #[arg(long)]
        no_notify: bool,
    },

    /// List stored events ordered by start date
    List {
        /// Only events with open registration
        #[arg(long)]
        open: bool,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Create the database if it does not exist yet
    InitDb,

    /// Email configuration helpers
    #[command(subcommand)]
    Email(EmailCommand),
}

#[derive(Subcommand, Debug)]
enum EmailCommand {
    /// Show whether email settings are complete
    Check,
    /// Send a test message to the configured recipients
    Test,
    /// Print a sample notification body without sending it
    Preview,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = execute(cli) {
        tracing::error!("{err:#}");
        println!("\n❌ Process failed: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "info,fiba_events=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn execute(cli: Cli) -> Result<()> {
    let mut config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(db) = cli.db {
        config.database_path = Some(db);
    }

    match cli.command {
        Command::Run {
            source_file,
            save_response,
            no_notify,
        } => run(&config, source_file, save_response, !no_notify),
        Command::List { open, json } => list(&config, open, json),
        Command::InitDb => {
            let path = config.database_path();
            Store::open(&path).with_context(|| format!("creating database at {path:?}"))?;
            println!("Database ready at: {}", path.display());
            Ok(())
        }
        Command::Email(command) => email(&config, command),
    }
}

fn open_store(config: &AppConfig) -> Result<Store> {
    let path = config.database_path();
    Store::open(&path).with_context(|| format!("opening database at {path:?}"))
}

fn run(
    config: &AppConfig,
    source_file: Option<PathBuf>,
    save_response: Option<PathBuf>,
    notify: bool,
) -> Result<()> {
    let source: Box<dyn EventSource> = match source_file {
        Some(path) => Box::new(JsonFileSource::new(path)),
        None => {
            let api = FibaApi::new(config.endpoint.clone(), config.fetch_timeout())?;
            Box::new(match save_response {
                Some(path) => api.save_response_to(path),
                None => api,
            })
        }
    };

    let mut store = open_store(config)?;
    println!("{}", "=".repeat(50));
    println!("FIBA 3x3 Events Scraper Starting...");
    println!("{}", "=".repeat(50));

    let outcome = fiba_events::run_cycle(config, &mut store, source.as_ref(), notify)
        .context("reconciliation cycle failed")?;

    print_report(&outcome.report);
    if outcome.notify_failures > 0 {
        println!(
            "⚠️  {} notification channel(s) failed; see log",
            outcome.notify_failures
        );
    }
    print_summary(&store)?;
    println!("\n✅ All done! Events have been scraped and stored in the database.");
    Ok(())
}

fn print_report(report: &CycleReport) {
    println!("\nCycle report ({}):", report.scrape_date);
    println!("- Retrieved: {}", report.total_fetched);
    println!(
        "- Stored: {} out of {}",
        report.stored, report.total_fetched
    );
    println!("- New: {}", report.new.len());
    println!("- Missing: {}", report.missing.len());
    if report.duplicates > 0 {
        println!("- Duplicate ids collapsed: {}", report.duplicates);
    }
    if !report.dropped.is_empty() {
        println!("- Dropped: {}", report.dropped.len());
        for err in &report.dropped {
            println!("    {err}");
        }
    }
    if report.outage_suspected() {
        println!("⚠️  The source returned no events; missing events may be an upstream outage.");
    }
}

fn print_summary(store: &Store) -> Result<()> {
    let total = store.count()?;
    let open = store.open_registration_events()?;

    println!("\nDatabase Summary:");
    println!("- Total events in database: {total}");
    println!("- Events with open registration: {}", open.len());

    if !open.is_empty() {
        println!("\nUpcoming events with open registration:");
        for stored in open.iter().take(SUMMARY_PREVIEW) {
            let event = &stored.event;
            println!("  • {} in {} - {}", event.name, event.city, event.start_day());
        }
    }
    Ok(())
}

fn list(config: &AppConfig, open: bool, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let events = if open {
        store.open_registration_events()?
    } else {
        store.all_events()?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    for stored in &events {
        let event = &stored.event;
        println!(
            "{}  {} - {} - {} (seen {})",
            event.start_day(),
            event.name,
            event.city,
            event.registration_label(),
            event.date_scraped
        );
    }
    println!("{} event(s)", events.len());
    Ok(())
}

fn email(config: &AppConfig, command: EmailCommand) -> Result<()> {
    match command {
        EmailCommand::Check => {
            let email = &config.email;
            println!("SMTP server: {}:{}", email.smtp_host, email.smtp_port);
            println!("User: {}", email.username.as_deref().unwrap_or("NOT SET"));
            println!("App password: {}", email.masked_password());
            println!("Recipients: {}", email.recipients.join(", "));
            if email.is_complete() {
                println!("\n✅ Email configuration looks good!");
            } else {
                println!("\n❌ Email not configured!");
                println!("Set GMAIL_USER, GMAIL_APP_PASSWORD and EMAIL_RECIPIENTS, or the `email` section of the config file.");
            }
            Ok(())
        }
        EmailCommand::Test => {
            let notifier = EmailNotifier::new(&config.email, Vec::new())?;
            let body = format!(
                "This is a test email from your FIBA 3x3 event monitoring system.\n\n\
                 If you received this email, your configuration is working correctly!\n\n\
                 Time: {}\n",
                Local::now().format("%Y-%m-%d %H:%M:%S")
            );
            notifier.send(&format!("{EMAIL_SUBJECT} (test)"), &body)?;
            println!("✅ Test email sent successfully!");
            Ok(())
        }
        EmailCommand::Preview => {
            let (new, missing) = sample_changes(Local::now().date_naive());
            print!("{}", notify::render_console(&new, &missing));
            println!();
            let roster = new.clone();
            print!(
                "{}",
                notify::render_email(&new, &missing, &roster, Local::now())
            );
            Ok(())
        }
    }
}

fn sample_changes(today: NaiveDate) -> (Vec<Event>, Vec<Event>) {
    let new = vec![Event {
        id: "sample-new".to_string(),
        name: "SAMPLE: New Tournament Sarajevo".to_string(),
        registration_is_open: true,
        start_date: "2025-12-01T00:00:00".to_string(),
        end_date: "2025-12-02T23:59:59".to_string(),
        city: "Sarajevo".to_string(),
        date_scraped: today,
    }];
    let missing = vec![Event {
        id: "sample-missing".to_string(),
        name: "SAMPLE: Cancelled Tournament Mostar".to_string(),
        registration_is_open: false,
        start_date: "2025-11-15T00:00:00".to_string(),
        end_date: "2025-11-16T23:59:59".to_string(),
        city: "Mostar".to_string(),
        date_scraped: today,
    }];
    (new, missing)
}

pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod models;
pub mod notify;
pub mod reconcile;
pub mod utils;

use tracing::{info, warn};

use config::AppConfig;
use db::Store;
use error::ReconcileError;
use fetch::EventSource;
use models::Event;
use notify::{ConsoleNotifier, EmailNotifier, Notifier};
use reconcile::{CycleReport, Reconciler};

pub struct CycleOutcome {
    pub report: CycleReport,
    pub notified: bool,
    pub notify_failures: usize,
}

/// Reconciles the store against `source`, then hands the changes to every
/// configured notifier. Notification problems never fail the cycle.
pub fn run_cycle(
    config: &AppConfig,
    store: &mut Store,
    source: &dyn EventSource,
    notify: bool,
) -> Result<CycleOutcome, ReconcileError> {
    let scrape_date = match config.scrape_date() {
        Ok(date) => date,
        Err(err) => {
            warn!("{err}; falling back to local date");
            chrono::Local::now().date_naive()
        }
    };
    let report = Reconciler::new(store, source, scrape_date).reconcile()?;

    if !notify || !should_notify(config, &report) {
        return Ok(CycleOutcome {
            report,
            notified: false,
            notify_failures: 0,
        });
    }

    let roster = match store.all_events() {
        Ok(events) => events.into_iter().map(|stored| stored.event).collect(),
        Err(err) => {
            warn!("unable to load current events for notification: {err}");
            Vec::new()
        }
    };
    let notifiers = build_notifiers(config, roster);
    let notify_failures = notify::dispatch(&notifiers, &report.new, &report.missing);

    Ok(CycleOutcome {
        report,
        notified: true,
        notify_failures,
    })
}

pub fn should_notify(config: &AppConfig, report: &CycleReport) -> bool {
    if !report.has_changes() {
        return false;
    }
    if report.outage_suspected() && !config.notify_on_empty_fetch {
        warn!("holding notifications until the source returns events again");
        return false;
    }
    true
}

pub fn build_notifiers(config: &AppConfig, roster: Vec<Event>) -> Vec<Box<dyn Notifier>> {
    let mut notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(ConsoleNotifier)];
    if config.email.is_complete() {
        match EmailNotifier::new(&config.email, roster) {
            Ok(email) => notifiers.push(Box::new(email)),
            Err(err) => warn!("email notifications disabled: {err}"),
        }
    } else {
        info!("email not configured; console notifications only");
    }
    notifiers
}

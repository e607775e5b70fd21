use std::fmt::Write as _;
use std::io::Write as _;
use std::time::Duration;

use chrono::{DateTime, Local};
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::{info, warn};

use crate::config::EmailConfig;
use crate::error::NotifyError;
use crate::models::Event;

pub const EMAIL_SUBJECT: &str = "FIBA 3x3 Events Update";
const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// A channel that relays new and missing events to people.
pub trait Notifier {
    fn name(&self) -> &'static str;
    fn notify(&self, new: &[Event], missing: &[Event]) -> Result<(), NotifyError>;
}

/// Runs every notifier and returns how many failed. Failures are logged only.
pub fn dispatch(notifiers: &[Box<dyn Notifier + '_>], new: &[Event], missing: &[Event]) -> usize {
    let mut failures = 0;
    for notifier in notifiers {
        if let Err(err) = notifier.notify(new, missing) {
            warn!(channel = notifier.name(), "notification failed: {err}");
            failures += 1;
        }
    }
    failures
}

pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn name(&self) -> &'static str {
        "console"
    }

    fn notify(&self, new: &[Event], missing: &[Event]) -> Result<(), NotifyError> {
        let text = render_console(new, missing);
        if text.is_empty() {
            return Ok(());
        }
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(text.as_bytes())
            .and_then(|_| stdout.flush())
            .map_err(|err| NotifyError::Channel {
                channel: "console",
                reason: err.to_string(),
            })
    }
}

pub fn render_console(new: &[Event], missing: &[Event]) -> String {
    let mut out = String::new();
    for (title, events) in [("NEW EVENTS", new), ("MISSING EVENTS", missing)] {
        if events.is_empty() {
            continue;
        }
        let _ = writeln!(out, "{title}:");
        for event in events {
            let _ = writeln!(
                out,
                "{} - {} - {}",
                event.name,
                event.city,
                event.registration_label()
            );
        }
    }
    out
}

pub struct EmailNotifier {
    config: EmailConfig,
    roster: Vec<Event>,
}

impl EmailNotifier {
    /// `roster` is the full set of stored events, listed at the end of each mail.
    pub fn new(config: &EmailConfig, roster: Vec<Event>) -> Result<Self, NotifyError> {
        if config.username.as_deref().map_or(true, |u| u.trim().is_empty()) {
            return Err(NotifyError::NotConfigured("smtp username"));
        }
        if config.password.as_deref().map_or(true, str::is_empty) {
            return Err(NotifyError::NotConfigured("smtp password"));
        }
        if config.recipients.is_empty() {
            return Err(NotifyError::NotConfigured("recipients"));
        }
        Ok(Self {
            config: config.clone(),
            roster,
        })
    }

    pub fn send(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        let message = self.build_message(subject, body)?;
        let username = self.config.username.clone().unwrap_or_default();
        let password = self.config.password.clone().unwrap_or_default();

        let mailer = SmtpTransport::starttls_relay(&self.config.smtp_host)
            .map_err(|err| NotifyError::Transport(err.to_string()))?
            .port(self.config.smtp_port)
            .credentials(Credentials::new(username, password))
            .timeout(Some(SMTP_TIMEOUT))
            .build();

        mailer
            .send(&message)
            .map_err(|err| NotifyError::Transport(err.to_string()))?;
        info!(
            recipients = %self.config.recipients.join(", "),
            "email sent"
        );
        Ok(())
    }

    fn build_message(&self, subject: &str, body: &str) -> Result<Message, NotifyError> {
        let sender = self
            .config
            .sender()
            .ok_or(NotifyError::NotConfigured("sender address"))?;
        let mut builder = Message::builder()
            .from(mailbox(sender)?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN);
        for recipient in &self.config.recipients {
            builder = builder.to(mailbox(recipient)?);
        }
        builder
            .body(body.to_string())
            .map_err(|err| NotifyError::Message(err.to_string()))
    }
}

impl Notifier for EmailNotifier {
    fn name(&self) -> &'static str {
        "email"
    }

    fn notify(&self, new: &[Event], missing: &[Event]) -> Result<(), NotifyError> {
        if new.is_empty() && missing.is_empty() {
            return Ok(());
        }
        let body = render_email(new, missing, &self.roster, Local::now());
        self.send(EMAIL_SUBJECT, &body)
    }
}

fn mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address.parse::<Mailbox>().map_err(|err| NotifyError::Address {
        address: address.to_string(),
        reason: err.to_string(),
    })
}

pub fn render_email(
    new: &[Event],
    missing: &[Event],
    roster: &[Event],
    now: DateTime<Local>,
) -> String {
    let mut body = format!(
        "{EMAIL_SUBJECT} - {}\n{}\n\n",
        now.format("%Y-%m-%d %H:%M"),
        "=".repeat(60)
    );
    body.push_str(&format_event_list(new, "NEW EVENTS DETECTED"));
    body.push_str(&format_event_list(missing, "EVENTS REMOVED/CANCELLED"));
    body.push_str(&format_event_list(roster, "ALL CURRENT EVENTS"));
    let _ = writeln!(
        body,
        "\nUpdate completed at: {}",
        now.format("%Y-%m-%d %H:%M:%S")
    );
    body
}

fn format_event_list(events: &[Event], title: &str) -> String {
    if events.is_empty() {
        return String::new();
    }
    let mut out = format!("\n{title}:\n{}\n", "=".repeat(50));
    for event in events {
        let _ = write!(
            out,
            "• {}\n  City: {}\n  Registration: {}\n  Dates: {} to {}\n\n",
            event.name,
            event.city,
            event.registration_label(),
            event.start_day(),
            event.end_day()
        );
    }
    out
}

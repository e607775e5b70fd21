use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{Local, NaiveDate, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::utils;

pub const DEFAULT_ENDPOINT: &str = "https://play.fiba3x3.com/api/v2/search/events?countryIso2=BA&name=&input=&when=future&distance=100";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
const DEFAULT_SMTP_PORT: u16 = 587;

static ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid address regex"));

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub endpoint: String,
    pub fetch_timeout_secs: u64,
    pub database_path: Option<PathBuf>,
    pub timezone: Option<String>,
    pub notify_on_empty_fetch: bool,
    pub email: EmailConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            fetch_timeout_secs: DEFAULT_TIMEOUT_SECS,
            database_path: None,
            timezone: None,
            notify_on_empty_fetch: false,
            email: EmailConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: Option<String>,
    pub recipients: Vec<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: DEFAULT_SMTP_HOST.to_string(),
            smtp_port: DEFAULT_SMTP_PORT,
            username: None,
            password: None,
            from: None,
            recipients: Vec::new(),
        }
    }
}

impl EmailConfig {
    pub fn is_complete(&self) -> bool {
        self.username.as_deref().is_some_and(|u| !u.trim().is_empty())
            && self.password.as_deref().is_some_and(|p| !p.is_empty())
            && !self.recipients.is_empty()
    }

    pub fn sender(&self) -> Option<&str> {
        self.from.as_deref().or(self.username.as_deref())
    }

    pub fn masked_password(&self) -> String {
        match self.password.as_deref() {
            Some(p) if !p.is_empty() => "*".repeat(p.chars().count()),
            _ => "NOT SET".to_string(),
        }
    }
}

impl AppConfig {
    /// Reads the JSON file (a missing file yields defaults), then applies
    /// environment overrides and normalizes recipients.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(utils::config_path);
        let mut config = read_config(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.email.recipients = normalize_recipients(&config.email.recipients)?;
        config.scrape_timezone()?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("FIBA_EVENTS_ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Some(db) = lookup("FIBA_EVENTS_DB") {
            self.database_path = Some(PathBuf::from(db));
        }
        if let Some(user) = lookup("GMAIL_USER") {
            self.email.username = Some(user);
        }
        if let Some(password) = lookup("GMAIL_APP_PASSWORD") {
            self.email.password = Some(password);
        }
        if let Some(list) = lookup("EMAIL_RECIPIENTS") {
            self.email.recipients = list.split(',').map(str::to_string).collect();
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(utils::database_path)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn scrape_timezone(&self) -> Result<Option<Tz>, ConfigError> {
        self.timezone
            .as_deref()
            .map(|name| {
                name.parse::<Tz>().map_err(|err| ConfigError::Timezone {
                    name: name.to_string(),
                    reason: err.to_string(),
                })
            })
            .transpose()
    }

    /// Today's calendar date in the configured zone, or the process local date.
    pub fn scrape_date(&self) -> Result<NaiveDate, ConfigError> {
        Ok(match self.scrape_timezone()? {
            Some(tz) => Utc::now().with_timezone(&tz).date_naive(),
            None => Local::now().date_naive(),
        })
    }
}

fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn normalize_recipients(raw: &[String]) -> Result<Vec<String>, ConfigError> {
    let mut out = Vec::new();
    for entry in raw {
        let address = entry.trim();
        if address.is_empty() {
            continue;
        }
        if !ADDRESS_RE.is_match(address) {
            return Err(ConfigError::Recipient(address.to_string()));
        }
        out.push(address.to_string());
    }
    Ok(out)
}

//! Runtime configuration for the harvester.
//!
//! Configuration is read from an optional YAML file. Every field has a
//! default, so an empty file (or no file at all) yields a working setup.
//!
//! ```yaml
//! concurrency: 4
//! load_timeout_secs: 30
//! result_timeout_secs: 20
//! views_dir: ./views
//! note_selectors:
//!   title: "h1.note-title"
//! ```

use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// CSS selectors used to pull note fields out of a note detail page.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NoteSelectors {
    pub title: String,
    pub author: String,
    pub description: String,
    /// Present on the page only when the note is public.
    pub public_marker: String,
}

impl Default for NoteSelectors {
    fn default() -> Self {
        Self {
            title: "[data-field='Title'], .note-title, h1".to_string(),
            author: "[data-field='CreatedBy'], .note-author".to_string(),
            description: "[data-field='Content'], .note-body".to_string(),
            public_marker: "[data-field='IsPublic'][data-checked='true'], .note-public".to_string(),
        }
    }
}

/// CSS selectors used to pull email fields out of an email detail page.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EmailSelectors {
    pub subject: String,
    pub from: String,
    pub to: String,
    pub body: String,
}

impl Default for EmailSelectors {
    fn default() -> Self {
        Self {
            subject: "[data-field='Subject'], .email-subject, h1".to_string(),
            from: "[data-field='FromAddress'], .email-from".to_string(),
            to: "[data-field='ToAddress'], .email-to".to_string(),
            body: "[data-field='HtmlBody'], .email-body".to_string(),
        }
    }
}

/// All tunables of the harvester.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Number of tabs scraped at the same time.
    pub concurrency: usize,
    /// Upper bound on waiting for a tab to finish loading.
    pub load_timeout_secs: u64,
    /// Upper bound on waiting for an injected extractor to answer.
    pub result_timeout_secs: u64,
    pub user_agent: String,
    /// Where rendered full views are written.
    pub views_dir: PathBuf,
    pub note_selectors: NoteSelectors,
    pub email_selectors: EmailSelectors,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            load_timeout_secs: 30,
            result_timeout_secs: 20,
            user_agent: concat!("case_tab_harvester/", env!("CARGO_PKG_VERSION")).to_string(),
            views_dir: PathBuf::from("./views"),
            note_selectors: NoteSelectors::default(),
            email_selectors: EmailSelectors::default(),
        }
    }
}

impl HarvestConfig {
    /// Load and validate a YAML config file.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_yaml(&content)?;
        info!(concurrency = config.concurrency, "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate YAML text. Empty text yields the defaults.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: HarvestConfig = if content.trim().is_empty() {
            HarvestConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".to_string()));
        }
        if self.load_timeout_secs == 0 || self.result_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be greater than zero".to_string()));
        }

        let n = &self.note_selectors;
        let e = &self.email_selectors;
        for (name, css) in [
            ("note_selectors.title", &n.title),
            ("note_selectors.author", &n.author),
            ("note_selectors.description", &n.description),
            ("note_selectors.public_marker", &n.public_marker),
            ("email_selectors.subject", &e.subject),
            ("email_selectors.from", &e.from),
            ("email_selectors.to", &e.to),
            ("email_selectors.body", &e.body),
        ] {
            Selector::parse(css).map_err(|err| ConfigError::Invalid(format!("{name}: {err}")))?;
        }
        Ok(())
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            load: Duration::from_secs(self.load_timeout_secs),
            result: Duration::from_secs(self.result_timeout_secs),
        }
    }
}

/// Bounds on the two waits of a scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub load: Duration,
    pub result: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        HarvestConfig::default().timeouts()
    }
}

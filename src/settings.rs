//! Worker configuration.
//!
//! Values are layered: built-in defaults, then an optional YAML file
//! (`config/settings.yaml` or the path in `COURIER_CONFIG`), then
//! environment variables such as `COURIER__SMTP__HOST`.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::errors::Error;
use crate::send_email::dispatcher::DispatchConfig;

const DEFAULT_CONFIG_FILE: &str = "config/settings";

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub implicit_tls: bool,
    /// Connect/send timeout for a single delivery.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateSettings {
    pub path: PathBuf,
    pub block: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeSettings {
    pub path: PathBuf,
    pub block: String,
    pub subject: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database_url: String,
    pub zmq_address: String,
    pub sender: String,
    pub smtp: SmtpSettings,
    pub template: TemplateSettings,
    pub subscribe: SubscribeSettings,
    pub dispatch: DispatchSettings,
    #[serde(default)]
    pub tracking_url: Option<String>,
}

impl Settings {
    /// Loads and validates settings from the default file and the environment.
    pub fn load() -> Result<Self, Error> {
        let file = std::env::var("COURIER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
        Self::from_sources(&file, Environment::with_prefix("COURIER").separator("__"))
    }

    fn from_sources(file: &str, env: Environment) -> Result<Self, Error> {
        let settings: Settings = Config::builder()
            .set_default("database_url", "app.db")?
            .set_default("zmq_address", "tcp://127.0.0.1:5560")?
            .set_default("sender", "")?
            .set_default("smtp.host", "")?
            .set_default("smtp.port", 465)?
            .set_default("smtp.implicit_tls", true)?
            .set_default("smtp.timeout_secs", 5)?
            .set_default("template.path", "templates/email_template.tmpl")?
            .set_default("template.block", "htmlBody")?
            .set_default("subscribe.path", "templates/subscribe_template.tmpl")?
            .set_default("subscribe.block", "htmlBody")?
            .set_default("subscribe.subject", "Welcome")?
            .set_default("dispatch.workers", 10)?
            .set_default("dispatch.queue_capacity", 100)?
            .add_source(File::with_name(file).required(false))
            .add_source(env.try_parsing(true))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Rejects values the worker cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.smtp.host.trim().is_empty() {
            return Err(Error::Config("smtp.host is not set".to_owned()));
        }
        if self.sender.trim().is_empty() {
            return Err(Error::Config("sender is not set".to_owned()));
        }
        if self.smtp.timeout_secs == 0 {
            return Err(Error::Config("smtp.timeout_secs must be positive".to_owned()));
        }
        if self.dispatch.workers == 0 {
            return Err(Error::Config("dispatch.workers must be positive".to_owned()));
        }
        if self.dispatch.queue_capacity == 0 {
            return Err(Error::Config(
                "dispatch.queue_capacity must be positive".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            workers: self.dispatch.workers,
            queue_capacity: self.dispatch.queue_capacity,
            deadline: self.dispatch.deadline_secs.map(Duration::from_secs),
            tracking_url: self.tracking_url.clone(),
        }
    }
}

//! Command-line interface of the `drsnap` binary.

use crate::catalog::InstanceScope;
use crate::config::RotationConfig;
use crate::copier::AgeCheck;
use crate::notify::Alerter;
use crate::orchestrator::Rotator;
use crate::service::RdsApi;
use crate::trigger::{Trigger, TriggerHandler};
use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

/// Top-level arguments.
#[derive(Parser)]
#[command(name = "drsnap")]
#[command(about = "Cross-region DR snapshot rotation", long_about = None)]
pub struct Cli {
    /// TOML or JSON config file; the environment is used when absent.
    #[arg(short, long, global = true, env = "DRSNAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit JSON log lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Handle a trigger payload (scheduled tick, initial sync, instance event or a Records batch).
    Handle {
        /// Payload file, or `-` for stdin.
        #[arg(short, long, default_value = "-")]
        event: String,
    },
    /// Rotate now.
    Rotate {
        /// Only this instance.
        #[arg(short, long)]
        instance: Option<String>,
        /// Suppress snapshot age warnings and alerts.
        #[arg(long)]
        initial_sync: bool,
    },
    /// Print the effective configuration.
    Config,
}

impl Command {
    /// Trigger for a `rotate` invocation.
    pub fn manual_trigger(&self) -> Option<Trigger> {
        let Command::Rotate {
            instance,
            initial_sync,
        } = self
        else {
            return None;
        };
        let scope = match instance {
            Some(id) => InstanceScope::One(id.clone()),
            None => InstanceScope::All,
        };
        let age_check = if *initial_sync {
            AgeCheck::Disabled
        } else {
            AgeCheck::Enabled
        };
        Some(Trigger::Manual { scope, age_check })
    }
}

impl Cli {
    /// Config from `--config` when given, from the environment otherwise.
    pub fn load_config(&self) -> Result<RotationConfig> {
        let config = match &self.config {
            Some(path) => RotationConfig::from_file(path)?,
            None => RotationConfig::from_env()?,
        };
        Ok(config)
    }

    /// Render the configuration with the webhook URL redacted.
    pub fn render_config(config: &RotationConfig) -> Result<String> {
        let mut shown = config.clone();
        if shown.slack_webhook_url.is_some() {
            shown.slack_webhook_url = Some("<redacted>".to_string());
        }
        Ok(serde_json::to_string_pretty(&shown)?)
    }

    /// Execute the parsed command against `api`.
    pub async fn run(self, api: Arc<dyn RdsApi>, config: RotationConfig) -> Result<()> {
        if self.command == Command::Config {
            println!("{}", Self::render_config(&config)?);
            return Ok(());
        }

        let alerter = Alerter::from_config(&config);
        let handler = TriggerHandler::new(Rotator::new(api, config, alerter)?);

        let report = match &self.command {
            Command::Handle { event } => {
                let payload = read_payload(event)?;
                handler.handle(&payload).await?
            }
            cmd => {
                let trigger = cmd
                    .manual_trigger()
                    .context("command does not start a rotation")?;
                handler.run(trigger, Utc::now()).await?
            }
        };
        println!("{}", report.summary());
        Ok(())
    }
}

/// Read a JSON payload from a file, or stdin for `-`.
pub fn read_payload(source: &str) -> Result<Value> {
    let text = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read event from stdin")?;
        buf
    } else {
        std::fs::read_to_string(source).with_context(|| format!("failed to read event file {}", source))?
    };
    serde_json::from_str(&text).context("event is not valid JSON")
}

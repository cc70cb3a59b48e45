//! Handles settings for the admin tool. Configuration is written in
//! `settings.toml`; any key can be overridden through `LEDGER__*` environment
//! variables (e.g. `LEDGER__APP__LEVEL=debug`).
//!
//! See `settings.toml` for the configuration.
use std::{collections::BTreeMap, time::Duration};

use config::{Config, ConfigError, Environment, File};
use ledger_engine::{CapPolicy, EngineConfig, NumberingConfig, Percent};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct App {
    pub level: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Database {
    Memory,
    Sqlite(String),
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Billing {
    pub render_timeout_secs: u64,
    pub cap_invoice: bool,
    pub cap_partial_payment: bool,
}

impl Default for Billing {
    fn default() -> Self {
        let cap = CapPolicy::default();
        Self {
            render_timeout_secs: 30,
            cap_invoice: cap.invoice,
            cap_partial_payment: cap.partial_payment,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub app: App,
    pub database: Database,
    #[serde(default)]
    pub billing: Billing,
    #[serde(default)]
    pub numbering: NumberingConfig,
    /// Replaces the built-in VAT table when present.
    pub vat_rates: Option<BTreeMap<String, Percent>>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name("settings"))
            .add_source(Environment::with_prefix("LEDGER").separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    pub fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            render_timeout: Duration::from_secs(self.billing.render_timeout_secs),
            cap: CapPolicy {
                invoice: self.billing.cap_invoice,
                partial_payment: self.billing.cap_partial_payment,
            },
            numbering: self.numbering.clone(),
            vat_rates: self.vat_rates.clone().unwrap_or(defaults.vat_rates),
        }
    }
}

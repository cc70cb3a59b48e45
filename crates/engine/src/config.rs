//! Tunables of the engine.

use std::{collections::BTreeMap, time::Duration};

use serde::Deserialize;

use crate::{DocumentKind, NumberFamily, Percent};

/// Whether `apply_performance_amount` rejects amounts above the total
/// remaining performance amount, per document kind.
///
/// The defaults reproduce the behaviour the billing team runs today: capped
/// for partial payments, uncapped for invoices. Pending confirmation from the
/// product owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CapPolicy {
    pub invoice: bool,
    pub partial_payment: bool,
}

impl Default for CapPolicy {
    fn default() -> Self {
        Self {
            invoice: false,
            partial_payment: true,
        }
    }
}

impl CapPolicy {
    pub fn enforced_for(self, kind: DocumentKind) -> bool {
        match kind {
            DocumentKind::Invoice => self.invoice,
            DocumentKind::PartialPayment => self.partial_payment,
        }
    }
}

/// Prefixes used when formatting allocated numbers.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NumberingConfig {
    pub invoice_prefix: String,
    pub partial_payment_prefix: String,
    pub project_prefix: String,
    /// Gives invoices and partial payments their own sequences instead of
    /// the shared billing one.
    pub separate_document_sequences: bool,
}

impl Default for NumberingConfig {
    fn default() -> Self {
        Self {
            invoice_prefix: "INV-".to_string(),
            partial_payment_prefix: "PP-".to_string(),
            project_prefix: "P-".to_string(),
            separate_document_sequences: false,
        }
    }
}

impl NumberingConfig {
    pub fn document_prefix(&self, kind: DocumentKind) -> &str {
        match kind {
            DocumentKind::Invoice => &self.invoice_prefix,
            DocumentKind::PartialPayment => &self.partial_payment_prefix,
        }
    }

    pub fn document_family(&self, kind: DocumentKind) -> NumberFamily {
        NumberFamily::for_document(kind, self.separate_document_sequences)
    }

    /// `{prefix}{year}-{seq:04}`.
    pub fn format(prefix: &str, year: i32, value: i64) -> String {
        format!("{prefix}{year}-{value:04}")
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound for one renderer or artifact store call while booking.
    #[serde(with = "seconds")]
    pub render_timeout: Duration,
    pub cap: CapPolicy,
    pub numbering: NumberingConfig,
    /// VAT reference -> rate, used when no external VAT lookup is configured.
    pub vat_rates: BTreeMap<String, Percent>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            render_timeout: Duration::from_secs(30),
            cap: CapPolicy::default(),
            numbering: NumberingConfig::default(),
            vat_rates: BTreeMap::from([
                ("standard".to_string(), Percent::whole(19)),
                ("reduced".to_string(), Percent::whole(7)),
                ("zero".to_string(), Percent::ZERO),
            ]),
        }
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

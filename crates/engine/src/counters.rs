//! Sequential number counters, one per `(tenant, family, year)`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{DocumentKind, util::stored_enum};

/// Groups document kinds that draw from one shared sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberFamily {
    /// Invoices and partial payments share this sequence.
    Billing,
    /// Used instead of [`NumberFamily::Billing`] when document kinds are
    /// numbered separately.
    Invoice,
    PartialPayment,
    Project,
}

stored_enum!(NumberFamily, "number family", {
    Billing => "billing",
    Invoice => "invoice",
    PartialPayment => "partial_payment",
    Project => "project",
});

impl NumberFamily {
    /// The family a document kind draws its number from.
    pub fn for_document(kind: DocumentKind, separate: bool) -> Self {
        match (kind, separate) {
            (_, false) => Self::Billing,
            (DocumentKind::Invoice, true) => Self::Invoice,
            (DocumentKind::PartialPayment, true) => Self::PartialPayment,
        }
    }
}


#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "number_counters")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub tenant_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub family: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub year: i32,
    /// The value the next call hands out.
    pub next_value: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

//! Billing documents: invoices and partial payments.
//!
//! Both kinds share one table and one lifecycle:
//!
//! ```text
//! Draft ──book──▶ Booked (terminal)
//! ```
//!
//! Once booked, monetary fields, number and snapshot references never change.

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    EngineError, Money, Percent, ResultEngine,
    util::{parse_uuid, stored_enum},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Invoice,
    PartialPayment,
}

stored_enum!(DocumentKind, "document kind", {
    Invoice => "invoice",
    PartialPayment => "partial_payment",
});

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Booked,
}

stored_enum!(DocumentStatus, "document status", {
    Draft => "draft",
    Booked => "booked",
});

/// Buyer data copied onto the document when it is initialized, so later
/// master-data edits do not change issued documents.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counterparty {
    pub name: String,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub country_code: Option<String>,
    pub vat_id: Option<String>,
    pub email: Option<String>,
}

/// Monetary header figures of a document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentTotals {
    pub amount_net: Money,
    pub amount_extras_net: Money,
    pub total_net: Money,
    pub tax: Money,
    pub total_gross: Money,
}

impl DocumentTotals {
    /// Derives the header totals from the allocated net and extras sums.
    pub fn compute(amount_net: Money, amount_extras_net: Money, vat: Percent) -> Self {
        let total_net = amount_net + amount_extras_net;
        let mut totals = Self {
            amount_net,
            amount_extras_net,
            total_net,
            ..Self::default()
        };
        totals.apply_vat(vat);
        totals
    }

    /// Recomputes tax and gross from the stored `total_net`.
    pub fn apply_vat(&mut self, vat: Percent) {
        self.tax = vat.apply(self.total_net);
        self.total_gross = self.total_net + self.tax;
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingDocument {
    pub id: Uuid,
    pub tenant_id: String,
    pub project_id: Uuid,
    pub kind: DocumentKind,
    pub status: DocumentStatus,
    pub number: Option<String>,
    pub issue_date: NaiveDate,
    pub vat_ref: String,
    pub vat_percent: Percent,
    pub counterparty: Counterparty,
    pub template_id: Option<String>,
    pub totals: DocumentTotals,
    /// Template actually used for the booked PDF, frozen at booking time.
    pub template_snapshot: Option<String>,
    pub theme_snapshot: Option<String>,
    pub booked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl BillingDocument {
    pub fn is_booked(&self) -> bool {
        self.status == DocumentStatus::Booked
    }

    /// Fails with a conflict unless the document is still a draft.
    pub fn ensure_draft(&self) -> ResultEngine<()> {
        if self.is_booked() {
            return Err(EngineError::Conflict(format!(
                "{} {} is booked and can no longer be changed",
                self.kind,
                self.number.as_deref().unwrap_or("(unnumbered)")
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "billing_documents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub tenant_id: String,
    pub project_id: String,
    pub kind: String,
    pub status: String,
    pub number: Option<String>,
    pub issue_date: Date,
    pub vat_ref: String,
    pub vat_percent: i64,
    pub counterparty: String,
    pub template_id: Option<String>,
    pub amount_net_minor: i64,
    pub amount_extras_net_minor: i64,
    pub total_net_minor: i64,
    pub tax_minor: i64,
    pub total_gross_minor: i64,
    pub template_snapshot: Option<String>,
    pub theme_snapshot: Option<String>,
    pub booked_at: Option<DateTimeUtc>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::projects::Entity",
        from = "Column::ProjectId",
        to = "super::projects::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Projects,
    #[sea_orm(has_many = "super::allocations::Entity")]
    Allocations,
    #[sea_orm(has_many = "super::snapshots::Entity")]
    Snapshots,
}

impl Related<super::projects::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Projects.def()
    }
}

impl Related<super::allocations::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Allocations.def()
    }
}

impl Related<super::snapshots::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Snapshots.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<&BillingDocument> for ActiveModel {
    type Error = EngineError;

    fn try_from(value: &BillingDocument) -> Result<Self, Self::Error> {
        let counterparty = serde_json::to_string(&value.counterparty)
            .map_err(|err| EngineError::Validation(format!("invalid counterparty: {err}")))?;
        Ok(Self {
            id: ActiveValue::Set(value.id.to_string()),
            tenant_id: ActiveValue::Set(value.tenant_id.clone()),
            project_id: ActiveValue::Set(value.project_id.to_string()),
            kind: ActiveValue::Set(value.kind.as_str().to_string()),
            status: ActiveValue::Set(value.status.as_str().to_string()),
            number: ActiveValue::Set(value.number.clone()),
            issue_date: ActiveValue::Set(value.issue_date),
            vat_ref: ActiveValue::Set(value.vat_ref.clone()),
            vat_percent: ActiveValue::Set(value.vat_percent.hundredths()),
            counterparty: ActiveValue::Set(counterparty),
            template_id: ActiveValue::Set(value.template_id.clone()),
            amount_net_minor: ActiveValue::Set(value.totals.amount_net.cents()),
            amount_extras_net_minor: ActiveValue::Set(value.totals.amount_extras_net.cents()),
            total_net_minor: ActiveValue::Set(value.totals.total_net.cents()),
            tax_minor: ActiveValue::Set(value.totals.tax.cents()),
            total_gross_minor: ActiveValue::Set(value.totals.total_gross.cents()),
            template_snapshot: ActiveValue::Set(value.template_snapshot.clone()),
            theme_snapshot: ActiveValue::Set(value.theme_snapshot.clone()),
            booked_at: ActiveValue::Set(value.booked_at),
            created_at: ActiveValue::Set(value.created_at),
        })
    }
}

impl TryFrom<Model> for BillingDocument {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let counterparty: Counterparty = serde_json::from_str(&model.counterparty)
            .map_err(|err| EngineError::Validation(format!("invalid stored counterparty: {err}")))?;
        Ok(Self {
            id: parse_uuid(&model.id, "document")?,
            tenant_id: model.tenant_id,
            project_id: parse_uuid(&model.project_id, "project")?,
            kind: DocumentKind::try_from(model.kind.as_str())?,
            status: DocumentStatus::try_from(model.status.as_str())?,
            number: model.number,
            issue_date: model.issue_date,
            vat_ref: model.vat_ref,
            vat_percent: Percent::from_hundredths(model.vat_percent),
            counterparty,
            template_id: model.template_id,
            totals: DocumentTotals {
                amount_net: Money::new(model.amount_net_minor),
                amount_extras_net: Money::new(model.amount_extras_net_minor),
                total_net: Money::new(model.total_net_minor),
                tax: Money::new(model.tax_minor),
                total_gross: Money::new(model.total_gross_minor),
            },
            template_snapshot: model.template_snapshot,
            theme_snapshot: model.theme_snapshot,
            booked_at: model.booked_at,
            created_at: model.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_follow_vat() {
        let totals = DocumentTotals::compute(Money::new(900_00), Money::new(100_00), Percent::whole(19));
        assert_eq!(totals.total_net, Money::new(1000_00));
        assert_eq!(totals.tax, Money::new(190_00));
        assert_eq!(totals.total_gross, Money::new(1190_00));
    }

    #[test]
    fn changing_vat_only_touches_tax_and_gross() {
        let mut totals =
            DocumentTotals::compute(Money::new(333_33), Money::ZERO, Percent::whole(19));
        totals.apply_vat(Percent::whole(7));
        assert_eq!(totals.total_net, Money::new(333_33));
        // 23.3331 -> 23.33
        assert_eq!(totals.tax, Money::new(23_33));
        assert_eq!(totals.total_gross, Money::new(356_66));
    }
}

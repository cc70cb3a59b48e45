//! Projects and their billing running totals.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, Money, util::parse_uuid};

/// A project (contract) that owns a structure tree, postings and billing
/// documents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub tenant_id: String,
    pub number: String,
    pub name: String,
    /// Sum of `total_net` over booked invoices.
    pub invoiced: Money,
    /// Sum of `total_net` over booked partial payments.
    pub partially_billed: Money,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "projects")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub tenant_id: String,
    pub number: String,
    pub name: String,
    pub invoiced_minor: i64,
    pub partially_billed_minor: i64,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::structures::Entity")]
    Structures,
}

impl Related<super::structures::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Structures.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Project> for ActiveModel {
    fn from(value: &Project) -> Self {
        Self {
            id: ActiveValue::Set(value.id.to_string()),
            tenant_id: ActiveValue::Set(value.tenant_id.clone()),
            number: ActiveValue::Set(value.number.clone()),
            name: ActiveValue::Set(value.name.clone()),
            invoiced_minor: ActiveValue::Set(value.invoiced.cents()),
            partially_billed_minor: ActiveValue::Set(value.partially_billed.cents()),
            created_at: ActiveValue::Set(value.created_at),
        }
    }
}

impl TryFrom<Model> for Project {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&model.id, "project")?,
            tenant_id: model.tenant_id,
            number: model.number,
            name: model.name,
            invoiced: Money::new(model.invoiced_minor),
            partially_billed: Money::new(model.partially_billed_minor),
            created_at: model.created_at,
        })
    }
}

//! Authoritative per `(worker, project)` billing rates.

use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};

use crate::Money;

/// Overrides the caller-supplied external rate (and role) of a posting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatePreset {
    pub external_rate: Money,
    pub role: Option<String>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "rate_presets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub worker_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub project_id: String,
    pub external_rate_minor: i64,
    pub role: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for RatePreset {
    fn from(model: Model) -> Self {
        Self {
            external_rate: Money::new(model.external_rate_minor),
            role: model.role,
        }
    }
}

impl ActiveModel {
    pub(crate) fn from_preset(worker_id: &str, project_id: &str, preset: &RatePreset) -> Self {
        Self {
            worker_id: ActiveValue::Set(worker_id.to_string()),
            project_id: ActiveValue::Set(project_id.to_string()),
            external_rate_minor: ActiveValue::Set(preset.external_rate.cents()),
            role: ActiveValue::Set(preset.role.clone()),
        }
    }
}

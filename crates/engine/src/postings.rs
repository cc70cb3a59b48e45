//! Postings (time/cost bookings) recorded against a structure node.
//!
//! A posting carries two amounts:
//! - `internal = quantity × internal_rate` (what the work cost)
//! - `billable = quantity × external_rate` (what can be charged)
//!
//! It can be assigned to at most one billing document through
//! [`PostingLink`]; the link is stored as one `(document_kind, document_id)`
//! pair, so being assigned to an invoice and a partial payment at the same
//! time is not representable.

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    DocumentKind, EngineError, Money, Quantity,
    util::{parse_optional_uuid, parse_uuid},
};

/// The billing document a posting is assigned to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "document_id", rename_all = "snake_case")]
pub enum PostingLink {
    Unassigned,
    Invoice(Uuid),
    PartialPayment(Uuid),
}

impl PostingLink {
    pub fn new(kind: DocumentKind, document_id: Uuid) -> Self {
        match kind {
            DocumentKind::Invoice => Self::Invoice(document_id),
            DocumentKind::PartialPayment => Self::PartialPayment(document_id),
        }
    }

    pub fn document_id(self) -> Option<Uuid> {
        match self {
            Self::Unassigned => None,
            Self::Invoice(id) | Self::PartialPayment(id) => Some(id),
        }
    }

    pub fn kind(self) -> Option<DocumentKind> {
        match self {
            Self::Unassigned => None,
            Self::Invoice(_) => Some(DocumentKind::Invoice),
            Self::PartialPayment(_) => Some(DocumentKind::PartialPayment),
        }
    }

    /// A posting is uninvoiced iff it is not assigned to any document.
    pub fn is_unassigned(self) -> bool {
        matches!(self, Self::Unassigned)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub id: Uuid,
    pub project_id: Uuid,
    pub structure_id: Uuid,
    pub worker_id: String,
    pub performed_on: NaiveDate,
    pub description: Option<String>,
    pub role: Option<String>,
    pub quantity: Quantity,
    pub internal_rate: Money,
    pub external_rate: Money,
    pub internal_amount: Money,
    pub billable_amount: Money,
    pub link: PostingLink,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "postings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub project_id: String,
    pub structure_id: String,
    pub worker_id: String,
    pub performed_on: Date,
    pub description: Option<String>,
    pub role: Option<String>,
    pub quantity: i64,
    pub internal_rate_minor: i64,
    pub external_rate_minor: i64,
    pub internal_minor: i64,
    pub billable_minor: i64,
    pub document_kind: Option<String>,
    pub document_id: Option<String>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::structures::Entity",
        from = "Column::StructureId",
        to = "super::structures::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Structures,
}

impl Related<super::structures::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Structures.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Posting> for ActiveModel {
    fn from(value: &Posting) -> Self {
        Self {
            id: ActiveValue::Set(value.id.to_string()),
            project_id: ActiveValue::Set(value.project_id.to_string()),
            structure_id: ActiveValue::Set(value.structure_id.to_string()),
            worker_id: ActiveValue::Set(value.worker_id.clone()),
            performed_on: ActiveValue::Set(value.performed_on),
            description: ActiveValue::Set(value.description.clone()),
            role: ActiveValue::Set(value.role.clone()),
            quantity: ActiveValue::Set(value.quantity.hundredths()),
            internal_rate_minor: ActiveValue::Set(value.internal_rate.cents()),
            external_rate_minor: ActiveValue::Set(value.external_rate.cents()),
            internal_minor: ActiveValue::Set(value.internal_amount.cents()),
            billable_minor: ActiveValue::Set(value.billable_amount.cents()),
            document_kind: ActiveValue::Set(value.link.kind().map(|k| k.as_str().to_string())),
            document_id: ActiveValue::Set(value.link.document_id().map(|id| id.to_string())),
            created_at: ActiveValue::Set(value.created_at),
        }
    }
}

impl TryFrom<Model> for Posting {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let document_id = parse_optional_uuid(model.document_id.as_deref(), "document")?;
        let link = match (model.document_kind.as_deref(), document_id) {
            (None, None) => PostingLink::Unassigned,
            (Some(kind), Some(id)) => PostingLink::new(DocumentKind::try_from(kind)?, id),
            _ => {
                return Err(EngineError::Validation(format!(
                    "posting {} has a half-set document link",
                    model.id
                )));
            }
        };

        Ok(Self {
            id: parse_uuid(&model.id, "posting")?,
            project_id: parse_uuid(&model.project_id, "project")?,
            structure_id: parse_uuid(&model.structure_id, "structure")?,
            worker_id: model.worker_id,
            performed_on: model.performed_on,
            description: model.description,
            role: model.role,
            quantity: Quantity::from_hundredths(model.quantity),
            internal_rate: Money::new(model.internal_rate_minor),
            external_rate: Money::new(model.external_rate_minor),
            internal_amount: Money::new(model.internal_minor),
            billable_amount: Money::new(model.billable_minor),
            link,
            created_at: model.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_exposes_kind_and_document() {
        let id = Uuid::new_v4();
        let link = PostingLink::new(DocumentKind::PartialPayment, id);
        assert_eq!(link.kind(), Some(DocumentKind::PartialPayment));
        assert_eq!(link.document_id(), Some(id));
        assert!(!link.is_unassigned());
        assert!(PostingLink::Unassigned.is_unassigned());
        assert_eq!(PostingLink::Unassigned.document_id(), None);
    }
}

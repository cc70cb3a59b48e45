//! Durable snapshot references (booked PDF / e-invoice XML) of a document.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    ArtifactRef, EngineError,
    util::{parse_uuid, stored_enum},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotFormat {
    Pdf,
    EInvoiceXml,
}

stored_enum!(SnapshotFormat, "snapshot format", {
    Pdf => "pdf",
    EInvoiceXml => "einvoice_xml",
});

impl SnapshotFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::EInvoiceXml => "application/xml",
        }
    }
}

/// A stored, immutable artifact attached to a booked document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub document_id: Uuid,
    pub format: SnapshotFormat,
    pub artifact: ArtifactRef,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(document_id: Uuid, format: SnapshotFormat, artifact: ArtifactRef) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            format,
            artifact,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "document_snapshots")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub document_id: String,
    pub format: String,
    pub artifact_id: String,
    pub content_hash: String,
    pub size_bytes: i64,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::documents::Entity",
        from = "Column::DocumentId",
        to = "super::documents::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Documents,
}

impl Related<super::documents::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Documents.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Snapshot> for ActiveModel {
    fn from(value: &Snapshot) -> Self {
        Self {
            id: ActiveValue::Set(value.id.to_string()),
            document_id: ActiveValue::Set(value.document_id.to_string()),
            format: ActiveValue::Set(value.format.as_str().to_string()),
            artifact_id: ActiveValue::Set(value.artifact.id.clone()),
            content_hash: ActiveValue::Set(value.artifact.content_hash.clone()),
            size_bytes: ActiveValue::Set(i64::try_from(value.artifact.size_bytes).unwrap_or(i64::MAX)),
            created_at: ActiveValue::Set(value.created_at),
        }
    }
}

impl TryFrom<Model> for Snapshot {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&model.id, "snapshot")?,
            document_id: parse_uuid(&model.document_id, "document")?,
            format: SnapshotFormat::try_from(model.format.as_str())?,
            artifact: ArtifactRef {
                id: model.artifact_id,
                content_hash: model.content_hash,
                size_bytes: u64::try_from(model.size_bytes).unwrap_or_default(),
            },
            created_at: model.created_at,
        })
    }
}

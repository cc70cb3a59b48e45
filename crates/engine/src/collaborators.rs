//! Ports to the systems the engine depends on but does not own: renderers,
//! artifact storage, rate presets and VAT rates.
//!
//! Every port returns [`CollaboratorError`]; the engine maps it into
//! [`EngineError`](crate::EngineError) and runs compensation where needed.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    Allocation, BillingDocument, CollaboratorError, DocumentKind, Percent, Posting, Project,
    RatePreset, rate_presets,
};

/// Reference to a stored artifact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub id: String,
    pub content_hash: String,
    pub size_bytes: u64,
}

/// Output of the PDF renderer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedPdf {
    pub bytes: Vec<u8>,
    /// Serialized template actually used, frozen onto booked documents.
    pub template_used: String,
    pub theme_used: String,
}

/// Everything the e-invoice generator needs to serialize a document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document: BillingDocument,
    pub project: Project,
    pub allocations: Vec<Allocation>,
    pub postings: Vec<Posting>,
}

#[async_trait]
pub trait PdfRenderer: Send + Sync {
    async fn render(
        &self,
        kind: DocumentKind,
        document_id: Uuid,
        template_id: Option<&str>,
    ) -> Result<RenderedPdf, CollaboratorError>;
}

#[async_trait]
pub trait EInvoiceGenerator: Send + Sync {
    /// Returns the e-invoice XML. Missing mandatory fields must be reported
    /// as [`CollaboratorError::Validation`].
    async fn generate(
        &self,
        kind: DocumentKind,
        record: &DocumentRecord,
    ) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn store(
        &self,
        content: Vec<u8>,
        content_type: &str,
        owner_id: Uuid,
    ) -> Result<ArtifactRef, CollaboratorError>;

    /// Deletes an artifact. Deleting a missing artifact is not an error.
    async fn delete(&self, artifact_id: &str) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait PresetResolver: Send + Sync {
    async fn resolve(
        &self,
        worker_id: &str,
        project_id: Uuid,
    ) -> Result<Option<RatePreset>, CollaboratorError>;
}

#[async_trait]
pub trait VatLookup: Send + Sync {
    async fn percent(&self, vat_ref: &str) -> Result<Percent, CollaboratorError>;
}

/// Placeholder used when no renderer/store was configured. Every call fails
/// with [`CollaboratorError::Unavailable`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Unconfigured;

#[async_trait]
impl PdfRenderer for Unconfigured {
    async fn render(
        &self,
        _kind: DocumentKind,
        _document_id: Uuid,
        _template_id: Option<&str>,
    ) -> Result<RenderedPdf, CollaboratorError> {
        Err(CollaboratorError::Unavailable(
            "no pdf renderer configured".to_string(),
        ))
    }
}

#[async_trait]
impl EInvoiceGenerator for Unconfigured {
    async fn generate(
        &self,
        _kind: DocumentKind,
        _record: &DocumentRecord,
    ) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::Unavailable(
            "no e-invoice generator configured".to_string(),
        ))
    }
}

#[async_trait]
impl ArtifactStore for Unconfigured {
    async fn store(
        &self,
        _content: Vec<u8>,
        _content_type: &str,
        _owner_id: Uuid,
    ) -> Result<ArtifactRef, CollaboratorError> {
        Err(CollaboratorError::Unavailable(
            "no artifact store configured".to_string(),
        ))
    }

    async fn delete(&self, _artifact_id: &str) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Resolves presets from the engine's own `rate_presets` table.
#[derive(Clone, Debug)]
pub struct DbPresetResolver {
    database: DatabaseConnection,
}

impl DbPresetResolver {
    pub fn new(database: DatabaseConnection) -> Self {
        Self { database }
    }
}

#[async_trait]
impl PresetResolver for DbPresetResolver {
    async fn resolve(
        &self,
        worker_id: &str,
        project_id: Uuid,
    ) -> Result<Option<RatePreset>, CollaboratorError> {
        rate_presets::Entity::find_by_id((worker_id.to_string(), project_id.to_string()))
            .one(&self.database)
            .await
            .map(|model| model.map(RatePreset::from))
            .map_err(|err| CollaboratorError::Unavailable(err.to_string()))
    }
}

/// VAT rates from a fixed table keyed by VAT reference.
#[derive(Clone, Debug, Default)]
pub struct StaticVatTable {
    rates: BTreeMap<String, Percent>,
}

impl StaticVatTable {
    pub fn new(rates: BTreeMap<String, Percent>) -> Self {
        Self { rates }
    }
}

#[async_trait]
impl VatLookup for StaticVatTable {
    async fn percent(&self, vat_ref: &str) -> Result<Percent, CollaboratorError> {
        self.rates
            .get(vat_ref)
            .copied()
            .ok_or_else(|| CollaboratorError::NotFound(format!("vat rate {vat_ref}")))
    }
}

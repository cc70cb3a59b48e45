//! Booking: the irreversible `Draft -> Booked` transition, and access to the
//! snapshots it leaves behind.
//!
//! Booking runs in three phases:
//!
//! 1. numbering and final totals, committed on their own so a retried booking
//!    keeps its number
//! 2. rendering and storing the PDF and the e-invoice XML, with no
//!    transaction open and every external call bounded by the render timeout
//! 3. one transaction that flips the status, records the snapshots and
//!    propagates the totals to the project and its structure nodes
//!
//! Artifacts created in phase 2 are deleted again when a later step fails.
//! When that cleanup itself fails the error is [`EngineError::Inconsistency`].

use std::future::Future;

use chrono::{Datelike, Utc};
use sea_orm::{
    ActiveValue, ConnectionTrait, QueryFilter, TransactionTrait, prelude::*, sea_query::Expr,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    ArtifactRef, BillingDocument, CollaboratorError, DocumentKind, DocumentRecord, DocumentStatus,
    EngineError, NumberingConfig, RenderedPdf, ResultEngine, Snapshot, SnapshotFormat, documents,
    projects, snapshots, structures,
};

use super::{
    Engine, allocation::recompute_totals_in, documents::ensure_number_free, load_allocations,
    load_document, load_document_postings, load_project, numbering::allocate_number, with_tx,
};

/// A document rendition handed out by the snapshot accessors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum DocumentSnapshot {
    /// The artifact frozen when the document was booked.
    Stored(ArtifactRef),
    /// Rendered on demand for a draft or a preview. Never persisted.
    Rendered {
        content_type: &'static str,
        bytes: Vec<u8>,
    },
}

async fn load_snapshot<C: ConnectionTrait>(
    db: &C,
    document_id: Uuid,
    format: SnapshotFormat,
) -> ResultEngine<Option<Snapshot>> {
    snapshots::Entity::find()
        .filter(snapshots::Column::DocumentId.eq(document_id.to_string()))
        .filter(snapshots::Column::Format.eq(format.as_str()))
        .one(db)
        .await?
        .map(Snapshot::try_from)
        .transpose()
}

fn running_total_columns(kind: DocumentKind) -> (projects::Column, structures::Column) {
    match kind {
        DocumentKind::Invoice => (projects::Column::InvoicedMinor, structures::Column::InvoicedMinor),
        DocumentKind::PartialPayment => (
            projects::Column::PartiallyBilledMinor,
            structures::Column::PartiallyBilledMinor,
        ),
    }
}

impl Engine {
    /// Runs one collaborator call under the render timeout.
    async fn call_collaborator<T, F>(&self, step: &'static str, call: F) -> ResultEngine<T>
    where
        F: Future<Output = Result<T, CollaboratorError>>,
    {
        let limit = self.config.render_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result.map_err(|err| EngineError::dependency(step, err)),
            Err(_) => Err(EngineError::dependency(step, CollaboratorError::Timeout(limit))),
        }
    }

    async fn render_pdf(&self, document: &BillingDocument) -> ResultEngine<RenderedPdf> {
        self.call_collaborator(
            "pdf rendering",
            self.collaborators
                .pdf
                .render(document.kind, document.id, document.template_id.as_deref()),
        )
        .await
    }

    async fn generate_xml(&self, document: &BillingDocument) -> ResultEngine<String> {
        let record = DocumentRecord {
            project: load_project(&self.database, document.project_id).await?,
            allocations: load_allocations(&self.database, document.id).await?,
            postings: load_document_postings(&self.database, document.id).await?,
            document: document.clone(),
        };
        self.call_collaborator(
            "e-invoice generation",
            self.collaborators.einvoice.generate(document.kind, &record),
        )
        .await
    }

    async fn store_artifact(
        &self,
        document_id: Uuid,
        format: SnapshotFormat,
        content: Vec<u8>,
    ) -> ResultEngine<ArtifactRef> {
        self.call_collaborator(
            "artifact storage",
            self.collaborators
                .artifacts
                .store(content, format.content_type(), document_id),
        )
        .await
    }

    /// Best-effort removal of artifacts after `cause` aborted a booking.
    ///
    /// Returns the error to surface: `cause` itself when every artifact was
    /// removed, an [`EngineError::Inconsistency`] otherwise.
    async fn discard_artifacts(
        &self,
        document_id: Uuid,
        artifacts: &[&ArtifactRef],
        cause: EngineError,
    ) -> EngineError {
        let mut leaked = Vec::new();
        for artifact in artifacts {
            tracing::warn!(%document_id, artifact_id = %artifact.id, %cause, "compensation: deleting artifact");
            let deleted = self
                .call_collaborator(
                    "artifact deletion",
                    self.collaborators.artifacts.delete(&artifact.id),
                )
                .await;
            if let Err(err) = deleted {
                leaked.push(format!("{} ({err})", artifact.id));
            }
        }

        if leaked.is_empty() {
            return cause;
        }
        let message = format!(
            "booking of document {document_id} failed with \"{cause}\" and artifacts could not be removed: {}",
            leaked.join(", ")
        );
        tracing::error!(severity = "critical", %document_id, "{message}");
        EngineError::Inconsistency(message)
    }

    /// Books a draft: numbers it, stores the PDF and e-invoice snapshots and
    /// adds its totals to the project and structure running totals.
    ///
    /// A document that is already booked is rejected with a conflict, so a
    /// retry after a failure never counts a document twice. Once started, the
    /// booking runs to completion (including cleanup) even when the returned
    /// future is dropped.
    pub async fn book_document(&self, document_id: Uuid) -> ResultEngine<BillingDocument> {
        load_document(&self.database, document_id)
            .await?
            .ensure_draft()?;

        let engine = self.clone();
        tokio::spawn(async move { engine.run_booking(document_id).await })
            .await
            .map_err(|err| {
                let message = format!("booking task of document {document_id} aborted: {err}");
                tracing::error!(severity = "critical", %document_id, "{message}");
                EngineError::Inconsistency(message)
            })?
    }

    async fn run_booking(&self, document_id: Uuid) -> ResultEngine<BillingDocument> {
        tracing::info!(%document_id, "booking started");

        let document = with_tx!(self, |db_tx| {
            let mut document = load_document(&db_tx, document_id).await?;
            document.ensure_draft()?;

            if document.number.is_none() {
                let year = document.issue_date.year();
                let family = self.config.numbering.document_family(document.kind);
                let value = allocate_number(&db_tx, &document.tenant_id, family, year).await?;
                let number = NumberingConfig::format(
                    self.config.numbering.document_prefix(document.kind),
                    year,
                    value,
                );
                ensure_number_free(&db_tx, &document, &number).await?;
                documents::ActiveModel {
                    id: ActiveValue::Set(document_id.to_string()),
                    number: ActiveValue::Set(Some(number.clone())),
                    ..Default::default()
                }
                .update(&db_tx)
                .await
                .map_err(|err| {
                    EngineError::from_unique_violation(err, || {
                        format!("document number {number} is already in use")
                    })
                })?;
                document.number = Some(number);
            }
            document.totals = recompute_totals_in(&db_tx, &document).await?;
            Ok(document)
        })?;

        let pdf = self.render_pdf(&document).await?;
        let template_used = pdf.template_used;
        let theme_used = pdf.theme_used;
        let pdf_ref = self
            .store_artifact(document_id, SnapshotFormat::Pdf, pdf.bytes)
            .await?;

        let xml_ref = match self.generate_xml(&document).await {
            Ok(xml) => {
                self.store_artifact(document_id, SnapshotFormat::EInvoiceXml, xml.into_bytes())
                    .await
            }
            Err(err) => Err(err),
        };
        let xml_ref = match xml_ref {
            Ok(xml_ref) => xml_ref,
            Err(err) => return Err(self.discard_artifacts(document_id, &[&pdf_ref], err).await),
        };

        let booked = self
            .finalize_booking(&document, &pdf_ref, &xml_ref, template_used, theme_used)
            .await;

        match booked {
            Ok(document) => {
                tracing::info!(
                    %document_id,
                    number = document.number.as_deref().unwrap_or_default(),
                    total_net = %document.totals.total_net,
                    "document booked"
                );
                Ok(document)
            }
            Err(err) => Err(self
                .discard_artifacts(document_id, &[&pdf_ref, &xml_ref], err)
                .await),
        }
    }

    /// Flips the status, records the snapshots and propagates the totals, as
    /// one transaction.
    async fn finalize_booking(
        &self,
        document: &BillingDocument,
        pdf_ref: &ArtifactRef,
        xml_ref: &ArtifactRef,
        template_used: String,
        theme_used: String,
    ) -> ResultEngine<BillingDocument> {
        with_tx!(self, |db_tx| {
            let now = Utc::now();
            let flipped = documents::Entity::update_many()
                .col_expr(
                    documents::Column::Status,
                    Expr::value(DocumentStatus::Booked.as_str()),
                )
                .col_expr(documents::Column::BookedAt, Expr::value(Some(now)))
                .col_expr(
                    documents::Column::TemplateSnapshot,
                    Expr::value(Some(template_used)),
                )
                .col_expr(
                    documents::Column::ThemeSnapshot,
                    Expr::value(Some(theme_used)),
                )
                .filter(documents::Column::Id.eq(document.id.to_string()))
                .filter(documents::Column::Status.eq(DocumentStatus::Draft.as_str()))
                .exec(&db_tx)
                .await?;
            if flipped.rows_affected != 1 {
                return Err(EngineError::Conflict(format!(
                    "document {} was booked concurrently",
                    document.id
                )));
            }

            let rows = load_allocations(&db_tx, document.id).await?;
            let totals = recompute_totals_in(&db_tx, document).await?;
            if totals != document.totals {
                return Err(EngineError::Conflict(format!(
                    "document {} changed while it was being booked",
                    document.id
                )));
            }

            for (format, artifact) in [
                (SnapshotFormat::Pdf, pdf_ref),
                (SnapshotFormat::EInvoiceXml, xml_ref),
            ] {
                let snapshot = Snapshot::new(document.id, format, artifact.clone());
                snapshots::ActiveModel::from(&snapshot).insert(&db_tx).await?;
            }

            let (project_column, structure_column) = running_total_columns(document.kind);
            let updated = projects::Entity::update_many()
                .col_expr(
                    project_column,
                    Expr::col(project_column).add(totals.total_net.cents()),
                )
                .filter(projects::Column::Id.eq(document.project_id.to_string()))
                .exec(&db_tx)
                .await?;
            if updated.rows_affected != 1 {
                return Err(EngineError::KeyNotFound("project not exists".to_string()));
            }

            for row in &rows {
                let updated = structures::Entity::update_many()
                    .col_expr(
                        structure_column,
                        Expr::col(structure_column).add(row.total().cents()),
                    )
                    .filter(structures::Column::Id.eq(row.structure_id.to_string()))
                    .exec(&db_tx)
                    .await?;
                if updated.rows_affected != 1 {
                    return Err(EngineError::KeyNotFound("structure not exists".to_string()));
                }
            }

            load_document(&db_tx, document.id).await
        })
    }

    /// The canonical PDF of a document.
    ///
    /// A booked document only ever serves its stored snapshot, and a missing
    /// snapshot is a conflict. Drafts, and any document with `preview` set,
    /// are rendered on demand without persisting anything.
    pub async fn document_pdf(
        &self,
        document_id: Uuid,
        preview: bool,
    ) -> ResultEngine<DocumentSnapshot> {
        let document = load_document(&self.database, document_id).await?;
        if document.is_booked() && !preview {
            return self.stored_snapshot(&document, SnapshotFormat::Pdf).await;
        }
        let pdf = self.render_pdf(&document).await?;
        Ok(DocumentSnapshot::Rendered {
            content_type: SnapshotFormat::Pdf.content_type(),
            bytes: pdf.bytes,
        })
    }

    /// The canonical e-invoice XML of a document, with the same policy as
    /// [`Engine::document_pdf`].
    pub async fn document_xml(
        &self,
        document_id: Uuid,
        preview: bool,
    ) -> ResultEngine<DocumentSnapshot> {
        let document = load_document(&self.database, document_id).await?;
        if document.is_booked() && !preview {
            return self
                .stored_snapshot(&document, SnapshotFormat::EInvoiceXml)
                .await;
        }
        let xml = self.generate_xml(&document).await?;
        Ok(DocumentSnapshot::Rendered {
            content_type: SnapshotFormat::EInvoiceXml.content_type(),
            bytes: xml.into_bytes(),
        })
    }

    async fn stored_snapshot(
        &self,
        document: &BillingDocument,
        format: SnapshotFormat,
    ) -> ResultEngine<DocumentSnapshot> {
        load_snapshot(&self.database, document.id, format)
            .await?
            .map(|s| DocumentSnapshot::Stored(s.artifact))
            .ok_or_else(|| {
                EngineError::Conflict(format!(
                    "booked document {} has no stored {format} snapshot",
                    document.id
                ))
            })
    }

    /// Snapshot references recorded for a document.
    pub async fn document_snapshots(&self, document_id: Uuid) -> ResultEngine<Vec<Snapshot>> {
        snapshots::Entity::find()
            .filter(snapshots::Column::DocumentId.eq(document_id.to_string()))
            .all(&self.database)
            .await?
            .into_iter()
            .map(Snapshot::try_from)
            .collect()
    }

    /// Creates the e-invoice snapshot of a booked document that lacks one.
    ///
    /// Idempotent: when the snapshot already exists its reference is returned
    /// unchanged and nothing is generated.
    pub async fn create_xml_snapshot(&self, document_id: Uuid) -> ResultEngine<ArtifactRef> {
        let document = load_document(&self.database, document_id).await?;
        if !document.is_booked() {
            return Err(EngineError::Conflict(format!(
                "document {document_id} is a draft; snapshots are created when booking"
            )));
        }
        if let Some(existing) =
            load_snapshot(&self.database, document_id, SnapshotFormat::EInvoiceXml).await?
        {
            return Ok(existing.artifact);
        }

        let xml = self.generate_xml(&document).await?;
        let artifact = self
            .store_artifact(document_id, SnapshotFormat::EInvoiceXml, xml.into_bytes())
            .await?;

        let snapshot = Snapshot::new(document_id, SnapshotFormat::EInvoiceXml, artifact.clone());
        let inserted = snapshots::ActiveModel::from(&snapshot)
            .insert(&self.database)
            .await;
        match inserted {
            Ok(_) => {
                tracing::info!(%document_id, artifact_id = %artifact.id, "e-invoice snapshot created");
                Ok(artifact)
            }
            Err(err) => {
                let err = EngineError::from_unique_violation(err, || {
                    "e-invoice snapshot created concurrently".to_string()
                });
                let surfaced = self
                    .discard_artifacts(document_id, &[&artifact], err)
                    .await;
                if !surfaced.is_conflict() {
                    return Err(surfaced);
                }
                load_snapshot(&self.database, document_id, SnapshotFormat::EInvoiceXml)
                    .await?
                    .map(|s| s.artifact)
                    .ok_or(surfaced)
            }
        }
    }
}

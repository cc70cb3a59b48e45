use chrono::{NaiveDate, Utc};
use sea_orm::{
    ConnectionTrait, PaginatorTrait, QueryFilter, QueryOrder, TransactionTrait, prelude::*,
    sea_query::Expr,
};
use uuid::Uuid;

use crate::{
    Allocation, BillingDocument, CollaboratorError, Counterparty, DocumentKind, DocumentStatus,
    DocumentTotals, EngineError, Percent, ResultEngine, allocations, documents, postings,
    snapshots, util::normalize_optional_text,
};

use super::{Engine, load_allocations, load_document, load_project, with_tx};

/// Input of [`Engine::init_document`].
#[derive(Clone, Debug)]
pub struct NewDocument {
    pub kind: DocumentKind,
    pub project_id: Uuid,
    pub issue_date: NaiveDate,
    pub vat_ref: String,
    /// Copied onto the document; later edits of the master data do not
    /// reach it.
    pub counterparty: Counterparty,
    pub template_id: Option<String>,
}

/// Changes to a draft. `None` keeps the current value.
#[derive(Clone, Debug, Default)]
pub struct DocumentPatch {
    pub issue_date: Option<NaiveDate>,
    pub vat_ref: Option<String>,
    pub counterparty: Option<Counterparty>,
    pub template_id: Option<String>,
    /// Manually chosen number; must be unique per tenant.
    pub number: Option<String>,
}

fn validate_counterparty(counterparty: &Counterparty) -> ResultEngine<Counterparty> {
    let name = counterparty.name.trim();
    if name.is_empty() {
        return Err(EngineError::Validation(
            "counterparty name must not be empty".to_string(),
        ));
    }
    Ok(Counterparty {
        name: name.to_string(),
        street: normalize_optional_text(counterparty.street.as_deref()),
        postal_code: normalize_optional_text(counterparty.postal_code.as_deref()),
        city: normalize_optional_text(counterparty.city.as_deref()),
        country_code: normalize_optional_text(counterparty.country_code.as_deref()),
        vat_id: normalize_optional_text(counterparty.vat_id.as_deref()),
        email: normalize_optional_text(counterparty.email.as_deref()),
    })
}

/// Fails with a conflict when another document of the tenant already carries
/// `number`.
pub(crate) async fn ensure_number_free<C: ConnectionTrait>(
    db: &C,
    document: &BillingDocument,
    number: &str,
) -> ResultEngine<()> {
    let taken = documents::Entity::find()
        .filter(documents::Column::TenantId.eq(document.tenant_id.as_str()))
        .filter(documents::Column::Number.eq(number))
        .filter(documents::Column::Id.ne(document.id.to_string()))
        .count(db)
        .await?;
    if taken > 0 {
        return Err(EngineError::Conflict(format!(
            "document number {number} is already in use"
        )));
    }
    Ok(())
}

impl Engine {
    async fn vat_percent(&self, vat_ref: &str) -> ResultEngine<Percent> {
        self.collaborators
            .vat
            .percent(vat_ref)
            .await
            .map_err(|err| match err {
                CollaboratorError::NotFound(_) => {
                    EngineError::Validation(format!("unknown VAT reference \"{vat_ref}\""))
                }
                err => EngineError::dependency("vat lookup", err),
            })
    }

    /// Return a billing document snapshot from DB.
    pub async fn document(&self, document_id: Uuid) -> ResultEngine<BillingDocument> {
        load_document(&self.database, document_id).await
    }

    /// Allocation rows of a document.
    pub async fn document_allocations(&self, document_id: Uuid) -> ResultEngine<Vec<Allocation>> {
        load_document(&self.database, document_id).await?;
        load_allocations(&self.database, document_id).await
    }

    /// Documents of a project, oldest first.
    pub async fn project_documents(&self, project_id: Uuid) -> ResultEngine<Vec<BillingDocument>> {
        documents::Entity::find()
            .filter(documents::Column::ProjectId.eq(project_id.to_string()))
            .order_by_asc(documents::Column::CreatedAt)
            .all(&self.database)
            .await?
            .into_iter()
            .map(BillingDocument::try_from)
            .collect()
    }

    /// Creates a draft invoice or partial payment for a project.
    pub async fn init_document(&self, cmd: NewDocument) -> ResultEngine<BillingDocument> {
        let counterparty = validate_counterparty(&cmd.counterparty)?;
        let vat_ref = cmd.vat_ref.trim().to_string();
        let vat_percent = self.vat_percent(&vat_ref).await?;

        let document = with_tx!(self, |db_tx| {
            let project = load_project(&db_tx, cmd.project_id).await?;
            let document = BillingDocument {
                id: Uuid::new_v4(),
                tenant_id: project.tenant_id,
                project_id: project.id,
                kind: cmd.kind,
                status: DocumentStatus::Draft,
                number: None,
                issue_date: cmd.issue_date,
                vat_ref,
                vat_percent,
                counterparty,
                template_id: normalize_optional_text(cmd.template_id.as_deref()),
                totals: DocumentTotals::default(),
                template_snapshot: None,
                theme_snapshot: None,
                booked_at: None,
                created_at: Utc::now(),
            };
            documents::ActiveModel::try_from(&document)?
                .insert(&db_tx)
                .await?;
            Ok(document)
        })?;

        tracing::info!(document_id = %document.id, kind = %document.kind, "document initialized");
        Ok(document)
    }

    /// Patches a draft. Booked documents are rejected with a conflict and
    /// left untouched.
    ///
    /// A VAT change recomputes tax and gross from the stored total net.
    pub async fn update_document(
        &self,
        document_id: Uuid,
        patch: DocumentPatch,
    ) -> ResultEngine<BillingDocument> {
        let current = load_document(&self.database, document_id).await?;
        current.ensure_draft()?;

        let counterparty = patch
            .counterparty
            .as_ref()
            .map(validate_counterparty)
            .transpose()?;
        let number = match patch.number.as_deref().map(str::trim) {
            Some("") => {
                return Err(EngineError::Validation(
                    "document number must not be empty".to_string(),
                ));
            }
            other => other.map(ToString::to_string),
        };
        let vat = match patch.vat_ref.as_deref().map(str::trim) {
            Some(vat_ref) if vat_ref != current.vat_ref => {
                Some((vat_ref.to_string(), self.vat_percent(vat_ref).await?))
            }
            _ => None,
        };

        let document = with_tx!(self, |db_tx| {
            let mut document = load_document(&db_tx, document_id).await?;
            document.ensure_draft()?;

            if let Some(issue_date) = patch.issue_date {
                document.issue_date = issue_date;
            }
            if let Some(counterparty) = counterparty {
                document.counterparty = counterparty;
            }
            if let Some(template_id) = patch.template_id.as_deref() {
                document.template_id = normalize_optional_text(Some(template_id));
            }
            if let Some(number) = number {
                ensure_number_free(&db_tx, &document, &number).await?;
                document.number = Some(number);
            }
            if let Some((vat_ref, percent)) = vat {
                document.vat_ref = vat_ref;
                document.vat_percent = percent;
                document.totals.apply_vat(percent);
            }

            documents::ActiveModel::try_from(&document)?
                .update(&db_tx)
                .await
                .map_err(|err| {
                    EngineError::from_unique_violation(err, || {
                        format!(
                            "document number {} is already in use",
                            document.number.as_deref().unwrap_or_default()
                        )
                    })
                })?;
            Ok(document)
        })?;

        tracing::info!(%document_id, "document updated");
        Ok(document)
    }

    /// Hard-deletes a draft: unassigns its postings and removes its rows
    /// before the header.
    pub async fn delete_document(&self, document_id: Uuid) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            let document = load_document(&db_tx, document_id).await?;
            document.ensure_draft()?;

            postings::Entity::update_many()
                .col_expr(postings::Column::DocumentKind, Expr::value(Option::<String>::None))
                .col_expr(postings::Column::DocumentId, Expr::value(Option::<String>::None))
                .filter(postings::Column::DocumentId.eq(document_id.to_string()))
                .exec(&db_tx)
                .await?;
            allocations::Entity::delete_many()
                .filter(allocations::Column::DocumentId.eq(document_id.to_string()))
                .exec(&db_tx)
                .await?;
            snapshots::Entity::delete_many()
                .filter(snapshots::Column::DocumentId.eq(document_id.to_string()))
                .exec(&db_tx)
                .await?;
            documents::Entity::delete_by_id(document_id.to_string())
                .exec(&db_tx)
                .await?;
            Ok(())
        })?;

        tracing::info!(%document_id, "draft document deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counterparty_is_trimmed_and_blank_fields_dropped() {
        let cp = validate_counterparty(&Counterparty {
            name: "  ACME GmbH ".to_string(),
            street: Some(" ".to_string()),
            city: Some("Berlin ".to_string()),
            ..Counterparty::default()
        })
        .unwrap();
        assert_eq!(cp.name, "ACME GmbH");
        assert_eq!(cp.street, None);
        assert_eq!(cp.city.as_deref(), Some("Berlin"));
    }

    #[test]
    fn counterparty_requires_name() {
        let err = validate_counterparty(&Counterparty::default()).unwrap_err();
        assert_eq!(
            err,
            EngineError::Validation("counterparty name must not be empty".to_string())
        );
    }
}

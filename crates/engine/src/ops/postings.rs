use chrono::{NaiveDate, Utc};
use sea_orm::{DatabaseTransaction, QueryFilter, QueryOrder, TransactionTrait, prelude::*};
use uuid::Uuid;

use crate::{
    BillingMode, EngineError, Money, Posting, PostingLink, Quantity, RatePreset, ResultEngine,
    StructureNode, postings, rate_presets, util::normalize_optional_text,
};

use super::{
    Engine, allocation::update_from_postings_in, load_document, load_posting, load_project,
    load_structure, structures::recompute_structure_in, with_tx,
};

#[derive(Clone, Debug)]
pub struct NewPosting {
    pub project_id: Uuid,
    pub structure_id: Uuid,
    pub worker_id: String,
    pub performed_on: NaiveDate,
    pub description: Option<String>,
    pub role: Option<String>,
    pub quantity: Quantity,
    pub internal_rate: Money,
    /// Replaced by the `(worker, project)` rate preset when one exists.
    pub external_rate: Money,
}

/// Fields to change on a posting. `None` keeps the current value.
#[derive(Clone, Debug, Default)]
pub struct PostingPatch {
    pub project_id: Option<Uuid>,
    pub structure_id: Option<Uuid>,
    pub worker_id: Option<String>,
    pub performed_on: Option<NaiveDate>,
    pub description: Option<String>,
    pub role: Option<String>,
    pub quantity: Option<Quantity>,
    pub internal_rate: Option<Money>,
    pub external_rate: Option<Money>,
}

fn validate_worker(worker_id: &str) -> ResultEngine<String> {
    let trimmed = worker_id.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Validation(
            "worker id must not be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

fn validate_quantity(quantity: Quantity) -> ResultEngine<()> {
    if quantity.hundredths() < 0 {
        return Err(EngineError::Validation(format!(
            "quantity must not be negative, got {}",
            Money::new(quantity.hundredths())
        )));
    }
    Ok(())
}

/// Applies a preset (if any) and derives both amounts.
fn price(posting: &mut Posting, preset: Option<RatePreset>) -> ResultEngine<()> {
    if let Some(preset) = preset {
        posting.external_rate = preset.external_rate;
        if preset.role.is_some() {
            posting.role = preset.role;
        }
    }
    posting.internal_amount = posting.quantity.times(posting.internal_rate)?;
    posting.billable_amount = posting.quantity.times(posting.external_rate)?;
    Ok(())
}

/// Loads the structure, checking it belongs to `project_id`.
async fn ensure_structure_in_project(
    db_tx: &DatabaseTransaction,
    structure_id: Uuid,
    project_id: Uuid,
) -> ResultEngine<StructureNode> {
    let structure = load_structure(db_tx, structure_id).await?;
    if structure.project_id != project_id {
        return Err(EngineError::Validation(format!(
            "structure {structure_id} does not belong to project {project_id}"
        )));
    }
    Ok(structure)
}

/// Postings on a booked document are frozen with it.
async fn ensure_link_mutable(db_tx: &DatabaseTransaction, link: PostingLink) -> ResultEngine<()> {
    if let Some(document_id) = link.document_id() {
        let document = load_document(db_tx, document_id).await?;
        if document.is_booked() {
            return Err(EngineError::Conflict(format!(
                "posting is part of booked {} {}",
                document.kind,
                document.number.as_deref().unwrap_or("(unnumbered)")
            )));
        }
    }
    Ok(())
}

/// Reruns posting-based allocation of the draft the posting is assigned to.
async fn refresh_linked_document(
    db_tx: &DatabaseTransaction,
    link: PostingLink,
) -> ResultEngine<()> {
    if let Some(document_id) = link.document_id() {
        let document = load_document(db_tx, document_id).await?;
        update_from_postings_in(db_tx, &document).await?;
    }
    Ok(())
}

impl Engine {
    async fn resolve_preset(
        &self,
        worker_id: &str,
        project_id: Uuid,
    ) -> ResultEngine<Option<RatePreset>> {
        self.collaborators
            .presets
            .resolve(worker_id, project_id)
            .await
            .map_err(|err| EngineError::dependency("rate preset lookup", err))
    }

    /// Return a posting snapshot from DB.
    pub async fn posting(&self, posting_id: Uuid) -> ResultEngine<Posting> {
        load_posting(&self.database, posting_id).await
    }

    /// Lists the postings of a project, most recent work first.
    pub async fn project_postings(&self, project_id: Uuid) -> ResultEngine<Vec<Posting>> {
        postings::Entity::find()
            .filter(postings::Column::ProjectId.eq(project_id.to_string()))
            .order_by_desc(postings::Column::PerformedOn)
            .all(&self.database)
            .await?
            .into_iter()
            .map(Posting::try_from)
            .collect()
    }

    /// Records a posting and refreshes the aggregates of its structure.
    pub async fn create_posting(&self, cmd: NewPosting) -> ResultEngine<Posting> {
        let worker_id = validate_worker(&cmd.worker_id)?;
        validate_quantity(cmd.quantity)?;
        let preset = self.resolve_preset(&worker_id, cmd.project_id).await?;

        let mut posting = Posting {
            id: Uuid::new_v4(),
            project_id: cmd.project_id,
            structure_id: cmd.structure_id,
            worker_id,
            performed_on: cmd.performed_on,
            description: normalize_optional_text(cmd.description.as_deref()),
            role: normalize_optional_text(cmd.role.as_deref()),
            quantity: cmd.quantity,
            internal_rate: cmd.internal_rate,
            external_rate: cmd.external_rate,
            internal_amount: Money::ZERO,
            billable_amount: Money::ZERO,
            link: PostingLink::Unassigned,
            created_at: Utc::now(),
        };
        price(&mut posting, preset)?;

        let posting = with_tx!(self, |db_tx| {
            ensure_structure_in_project(&db_tx, posting.structure_id, posting.project_id).await?;
            postings::ActiveModel::from(&posting).insert(&db_tx).await?;
            recompute_structure_in(&db_tx, posting.structure_id).await?;
            Ok(posting)
        })?;

        tracing::info!(
            posting_id = %posting.id,
            structure_id = %posting.structure_id,
            billable = %posting.billable_amount,
            "posting created"
        );
        Ok(posting)
    }

    /// Updates a posting, possibly re-pointing it to another structure,
    /// project or worker.
    ///
    /// Both the old and the new structure are recomputed, as is the draft
    /// document the posting is assigned to.
    pub async fn update_posting(
        &self,
        posting_id: Uuid,
        patch: PostingPatch,
    ) -> ResultEngine<Posting> {
        let worker_id = patch.worker_id.as_deref().map(validate_worker).transpose()?;
        if let Some(quantity) = patch.quantity {
            validate_quantity(quantity)?;
        }

        let current = load_posting(&self.database, posting_id).await?;
        let target_worker = worker_id.clone().unwrap_or_else(|| current.worker_id.clone());
        let target_project = patch.project_id.unwrap_or(current.project_id);
        let preset = self.resolve_preset(&target_worker, target_project).await?;

        let posting = with_tx!(self, |db_tx| {
            let old = load_posting(&db_tx, posting_id).await?;
            if old.worker_id != current.worker_id || old.project_id != current.project_id {
                return Err(EngineError::Conflict(
                    "posting was modified concurrently, retry".to_string(),
                ));
            }
            ensure_link_mutable(&db_tx, old.link).await?;
            if target_project != old.project_id && !old.link.is_unassigned() {
                return Err(EngineError::Validation(
                    "unassign the posting from its document before moving it to another project"
                        .to_string(),
                ));
            }

            let mut posting = old.clone();
            posting.project_id = target_project;
            posting.worker_id = target_worker;
            if let Some(structure_id) = patch.structure_id {
                posting.structure_id = structure_id;
            }
            if let Some(performed_on) = patch.performed_on {
                posting.performed_on = performed_on;
            }
            if let Some(description) = patch.description.as_deref() {
                posting.description = normalize_optional_text(Some(description));
            }
            if let Some(role) = patch.role.as_deref() {
                posting.role = normalize_optional_text(Some(role));
            }
            if let Some(quantity) = patch.quantity {
                posting.quantity = quantity;
            }
            if let Some(rate) = patch.internal_rate {
                posting.internal_rate = rate;
            }
            if let Some(rate) = patch.external_rate {
                posting.external_rate = rate;
            }
            price(&mut posting, preset)?;

            let target =
                ensure_structure_in_project(&db_tx, posting.structure_id, posting.project_id)
                    .await?;
            // Only posting based nodes are billed from assigned postings.
            if !posting.link.is_unassigned() && target.billing_mode != BillingMode::PostingBased {
                return Err(EngineError::Validation(format!(
                    "structure {} is not posting based; unassign the posting from its document first",
                    target.id
                )));
            }
            postings::ActiveModel::from(&posting).update(&db_tx).await?;

            if old.structure_id != posting.structure_id {
                recompute_structure_in(&db_tx, old.structure_id).await?;
            }
            recompute_structure_in(&db_tx, posting.structure_id).await?;
            refresh_linked_document(&db_tx, posting.link).await?;
            Ok(posting)
        })?;

        tracing::info!(%posting_id, structure_id = %posting.structure_id, "posting updated");
        Ok(posting)
    }

    /// Deletes a posting and refreshes what depended on it.
    pub async fn delete_posting(&self, posting_id: Uuid) -> ResultEngine<()> {
        with_tx!(self, |db_tx| {
            let posting = load_posting(&db_tx, posting_id).await?;
            ensure_link_mutable(&db_tx, posting.link).await?;

            postings::Entity::delete_by_id(posting_id.to_string())
                .exec(&db_tx)
                .await?;
            recompute_structure_in(&db_tx, posting.structure_id).await?;
            refresh_linked_document(&db_tx, posting.link).await?;
            Ok(())
        })?;

        tracing::info!(%posting_id, "posting deleted");
        Ok(())
    }

    /// Creates or replaces the authoritative rate of a worker on a project.
    ///
    /// Existing postings keep their amounts; the preset applies to postings
    /// created or updated afterwards.
    pub async fn set_rate_preset(
        &self,
        worker_id: &str,
        project_id: Uuid,
        preset: RatePreset,
    ) -> ResultEngine<()> {
        let worker_id = validate_worker(worker_id)?;
        if preset.external_rate.cents() < 0 {
            return Err(EngineError::Validation(format!(
                "rate must not be negative, got {}",
                preset.external_rate
            )));
        }
        let preset = RatePreset {
            role: normalize_optional_text(preset.role.as_deref()),
            ..preset
        };

        with_tx!(self, |db_tx| {
            load_project(&db_tx, project_id).await?;
            rate_presets::Entity::delete_by_id((worker_id.clone(), project_id.to_string()))
                .exec(&db_tx)
                .await?;
            rate_presets::ActiveModel::from_preset(&worker_id, &project_id.to_string(), &preset)
                .insert(&db_tx)
                .await?;
            Ok(())
        })
    }

    /// Removes the rate preset of a worker on a project, if any.
    pub async fn clear_rate_preset(&self, worker_id: &str, project_id: Uuid) -> ResultEngine<()> {
        rate_presets::Entity::delete_by_id((worker_id.trim().to_string(), project_id.to_string()))
            .exec(&self.database)
            .await?;
        Ok(())
    }
}

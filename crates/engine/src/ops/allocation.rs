//! Allocation of billing documents across structure nodes.
//!
//! Performance nodes get a share of a free amount, proportional to what is
//! still billable on them. Posting based nodes get exactly the billable sum of
//! the postings assigned to the document. Rows of either kind are always
//! replaced as a set, and the document header totals are re-derived from the
//! full row set after every change.

use std::collections::{HashMap, HashSet};

use sea_orm::{
    ActiveValue, ConnectionTrait, PaginatorTrait, QueryFilter, QuerySelect, TransactionTrait,
    prelude::*, sea_query::Expr,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    Allocation, BillingDocument, BillingMode, DocumentStatus, DocumentTotals, EngineError, Money,
    Posting, ResultEngine, StructureNode, allocations, distribute, documents, postings,
};

use super::{
    Engine, load_allocations, load_document, load_document_postings, load_posting,
    load_project_structures, with_tx,
};

/// Rounding tolerance of the performance cap.
const CAP_TOLERANCE: Money = Money::new(1);

/// Result of [`Engine::billing_proposal`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BillingProposal {
    pub document: BillingDocument,
    pub allocations: Vec<Allocation>,
    /// Postings assigned to the document by this call. Empty on repeated
    /// calls.
    pub newly_assigned: Vec<Uuid>,
}

/// Postings of a document and the ones that could still be assigned to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DocumentPostings {
    pub assigned: Vec<Posting>,
    /// Unassigned postings on posting based nodes of the document's project.
    pub available: Vec<Posting>,
}

fn ids_of(nodes: &[StructureNode], mode: BillingMode) -> Vec<Uuid> {
    nodes
        .iter()
        .filter(|n| n.billing_mode == mode)
        .map(|n| n.id)
        .collect()
}

fn to_strings(ids: &[Uuid]) -> Vec<String> {
    ids.iter().map(Uuid::to_string).collect()
}

/// Net amount already billed per node by the project's other booked
/// documents, of either kind.
async fn previously_billed<C: ConnectionTrait>(
    db: &C,
    document: &BillingDocument,
) -> ResultEngine<HashMap<Uuid, Money>> {
    let booked: Vec<String> = documents::Entity::find()
        .select_only()
        .column(documents::Column::Id)
        .filter(documents::Column::ProjectId.eq(document.project_id.to_string()))
        .filter(documents::Column::Status.eq(DocumentStatus::Booked.as_str()))
        .filter(documents::Column::Id.ne(document.id.to_string()))
        .into_tuple()
        .all(db)
        .await?;
    if booked.is_empty() {
        return Ok(HashMap::new());
    }

    let mut billed: HashMap<Uuid, Money> = HashMap::new();
    let rows = allocations::Entity::find()
        .filter(allocations::Column::DocumentId.is_in(booked))
        .all(db)
        .await?;
    for row in rows {
        let row = Allocation::try_from(row)?;
        *billed.entry(row.structure_id).or_default() += row.net;
    }
    Ok(billed)
}

/// `max(0, revenue_completion - billed)` for every performance node.
async fn performance_remaining<C: ConnectionTrait>(
    db: &C,
    document: &BillingDocument,
    nodes: &[StructureNode],
) -> ResultEngine<Vec<(Uuid, Money)>> {
    let billed = previously_billed(db, document).await?;
    Ok(nodes
        .iter()
        .filter(|n| n.billing_mode == BillingMode::Performance)
        .map(|n| {
            let done = billed.get(&n.id).copied().unwrap_or_default();
            (n.id, (n.revenue_completion - done).clamp_non_negative())
        })
        .collect())
}

/// Deletes the document's rows for `structure_ids` and inserts `rows`.
async fn replace_rows<C: ConnectionTrait>(
    db: &C,
    document_id: Uuid,
    structure_ids: &[Uuid],
    rows: &[Allocation],
) -> ResultEngine<()> {
    if !structure_ids.is_empty() {
        allocations::Entity::delete_many()
            .filter(allocations::Column::DocumentId.eq(document_id.to_string()))
            .filter(allocations::Column::StructureId.is_in(to_strings(structure_ids)))
            .exec(db)
            .await?;
    }
    if !rows.is_empty() {
        allocations::Entity::insert_many(rows.iter().map(allocations::ActiveModel::from))
            .exec(db)
            .await?;
    }
    Ok(())
}

/// Re-derives and persists the header totals from the document's rows.
pub(crate) async fn recompute_totals_in<C: ConnectionTrait>(
    db: &C,
    document: &BillingDocument,
) -> ResultEngine<DocumentTotals> {
    let rows = load_allocations(db, document.id).await?;
    let net: Money = rows.iter().map(|r| r.net).sum();
    let extras: Money = rows.iter().map(|r| r.extras_net).sum();
    let totals = DocumentTotals::compute(net, extras, document.vat_percent);

    let active = documents::ActiveModel {
        id: ActiveValue::Set(document.id.to_string()),
        amount_net_minor: ActiveValue::Set(totals.amount_net.cents()),
        amount_extras_net_minor: ActiveValue::Set(totals.amount_extras_net.cents()),
        total_net_minor: ActiveValue::Set(totals.total_net.cents()),
        tax_minor: ActiveValue::Set(totals.tax.cents()),
        total_gross_minor: ActiveValue::Set(totals.total_gross.cents()),
        ..Default::default()
    };
    active.update(db).await?;
    Ok(totals)
}

/// Distributes `amount` over the performance nodes and replaces their rows.
async fn apply_performance_in<C: ConnectionTrait>(
    db: &C,
    document: &BillingDocument,
    amount: Money,
    enforce_cap: bool,
) -> ResultEngine<()> {
    let nodes = load_project_structures(db, document.project_id).await?;
    let remaining = performance_remaining(db, document, &nodes).await?;
    let available: Money = remaining.iter().map(|(_, r)| *r).sum();
    if enforce_cap && amount > available + CAP_TOLERANCE {
        return Err(EngineError::Validation(format!(
            "amount {amount} exceeds the remaining performance amount {available}"
        )));
    }

    let shares = distribute(amount, &remaining)?;
    let by_id: HashMap<Uuid, &StructureNode> = nodes.iter().map(|n| (n.id, n)).collect();
    let rows: Vec<Allocation> = shares
        .into_iter()
        .filter(|(_, share)| !share.is_zero())
        .filter_map(|(id, share)| {
            by_id.get(&id).map(|node| {
                Allocation::new(document.id, id, share, node.extras_percent.apply(share))
            })
        })
        .collect();

    replace_rows(db, document.id, &ids_of(&nodes, BillingMode::Performance), &rows).await?;
    recompute_totals_in(db, document).await?;
    Ok(())
}

/// Rebuilds the posting based rows of a draft from its assigned postings.
pub(crate) async fn update_from_postings_in<C: ConnectionTrait>(
    db: &C,
    document: &BillingDocument,
) -> ResultEngine<()> {
    document.ensure_draft()?;
    let nodes = load_project_structures(db, document.project_id).await?;
    let posting_nodes: HashMap<Uuid, &StructureNode> = nodes
        .iter()
        .filter(|n| n.billing_mode == BillingMode::PostingBased)
        .map(|n| (n.id, n))
        .collect();

    let mut sums: HashMap<Uuid, Money> = HashMap::new();
    for posting in load_document_postings(db, document.id).await? {
        if posting_nodes.contains_key(&posting.structure_id) {
            *sums.entry(posting.structure_id).or_default() += posting.billable_amount;
        }
    }

    let rows: Vec<Allocation> = nodes
        .iter()
        .filter_map(|node| {
            let sum = sums.get(&node.id).copied()?;
            (!sum.is_zero()).then(|| {
                Allocation::new(document.id, node.id, sum, node.extras_percent.apply(sum))
            })
        })
        .collect();

    let ids: Vec<Uuid> = posting_nodes.keys().copied().collect();
    replace_rows(db, document.id, &ids, &rows).await?;
    recompute_totals_in(db, document).await?;
    Ok(())
}

/// Points every unassigned posting on the given nodes at the document.
///
/// The `document_id IS NULL` filter makes the claim atomic: a posting taken
/// by a concurrent assignment is simply not matched.
async fn claim_unassigned<C: ConnectionTrait>(
    db: &C,
    document: &BillingDocument,
    structure_ids: &[Uuid],
    posting_ids: Option<&[Uuid]>,
) -> ResultEngine<Vec<Uuid>> {
    if structure_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut candidates = postings::Entity::find()
        .select_only()
        .column(postings::Column::Id)
        .filter(postings::Column::ProjectId.eq(document.project_id.to_string()))
        .filter(postings::Column::StructureId.is_in(to_strings(structure_ids)))
        .filter(postings::Column::DocumentId.is_null());
    if let Some(ids) = posting_ids {
        candidates = candidates.filter(postings::Column::Id.is_in(to_strings(ids)));
    }
    let candidates: Vec<String> = candidates.into_tuple().all(db).await?;
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let claimed = postings::Entity::update_many()
        .col_expr(
            postings::Column::DocumentKind,
            Expr::value(document.kind.as_str()),
        )
        .col_expr(
            postings::Column::DocumentId,
            Expr::value(document.id.to_string()),
        )
        .filter(postings::Column::Id.is_in(candidates.clone()))
        .filter(postings::Column::DocumentId.is_null())
        .exec(db)
        .await?;
    if claimed.rows_affected != candidates.len() as u64 {
        return Err(EngineError::Conflict(
            "a posting was assigned elsewhere concurrently, retry".to_string(),
        ));
    }

    candidates
        .iter()
        .map(|id| crate::util::parse_uuid(id, "posting"))
        .collect()
}

impl Engine {
    /// Allocates a free amount across the performance nodes of the
    /// document's project, proportionally to their remaining amount.
    ///
    /// Replaces all performance rows of the document. Whether the amount may
    /// exceed the total remaining is governed by [`crate::CapPolicy`].
    pub async fn apply_performance_amount(
        &self,
        document_id: Uuid,
        amount: Money,
    ) -> ResultEngine<Vec<Allocation>> {
        let rows = with_tx!(self, |db_tx| {
            let document = load_document(&db_tx, document_id).await?;
            document.ensure_draft()?;
            let enforce = self.config.cap.enforced_for(document.kind);
            apply_performance_in(&db_tx, &document, amount, enforce).await?;
            load_allocations(&db_tx, document_id).await
        })?;

        tracing::info!(%document_id, %amount, rows = rows.len(), "performance amount applied");
        Ok(rows)
    }

    /// Rebuilds the posting based rows of a draft from the postings
    /// currently assigned to it.
    pub async fn update_from_postings(&self, document_id: Uuid) -> ResultEngine<Vec<Allocation>> {
        with_tx!(self, |db_tx| {
            let document = load_document(&db_tx, document_id).await?;
            update_from_postings_in(&db_tx, &document).await?;
            load_allocations(&db_tx, document_id).await
        })
    }

    /// Re-derives the header totals of a draft from its allocation rows.
    pub async fn recompute_document_totals(&self, document_id: Uuid) -> ResultEngine<DocumentTotals> {
        with_tx!(self, |db_tx| {
            let document = load_document(&db_tx, document_id).await?;
            document.ensure_draft()?;
            recompute_totals_in(&db_tx, &document).await
        })
    }

    /// Suggests an allocation the first time it is requested for a document.
    ///
    /// - without performance rows, the full remaining performance amount is
    ///   applied
    /// - without assigned postings, every unassigned posting on the posting
    ///   based nodes is assigned to the document
    ///
    /// Later calls find rows or postings in place and leave them untouched, so
    /// repeated calls on an untouched draft return the same rows and totals.
    pub async fn billing_proposal(&self, document_id: Uuid) -> ResultEngine<BillingProposal> {
        let proposal = with_tx!(self, |db_tx| {
            let document = load_document(&db_tx, document_id).await?;
            document.ensure_draft()?;
            let nodes = load_project_structures(&db_tx, document.project_id).await?;
            let performance: HashSet<Uuid> =
                ids_of(&nodes, BillingMode::Performance).into_iter().collect();

            let rows = load_allocations(&db_tx, document_id).await?;
            if !rows.iter().any(|r| performance.contains(&r.structure_id)) {
                let remaining = performance_remaining(&db_tx, &document, &nodes).await?;
                let suggestion: Money = remaining.iter().map(|(_, r)| *r).sum();
                apply_performance_in(&db_tx, &document, suggestion, false).await?;
            }

            let assigned = postings::Entity::find()
                .filter(postings::Column::DocumentId.eq(document_id.to_string()))
                .count(&db_tx)
                .await?;
            let newly_assigned = if assigned == 0 {
                let posting_nodes = ids_of(&nodes, BillingMode::PostingBased);
                let claimed = claim_unassigned(&db_tx, &document, &posting_nodes, None).await?;
                update_from_postings_in(&db_tx, &document).await?;
                claimed
            } else {
                Vec::new()
            };

            Ok(BillingProposal {
                document: load_document(&db_tx, document_id).await?,
                allocations: load_allocations(&db_tx, document_id).await?,
                newly_assigned,
            })
        })?;

        tracing::info!(
            %document_id,
            total_net = %proposal.document.totals.total_net,
            newly_assigned = proposal.newly_assigned.len(),
            "billing proposal computed"
        );
        Ok(proposal)
    }

    /// Manually assigns and unassigns postings of a draft, then reruns the
    /// posting based allocation.
    ///
    /// A posting can be assigned only while it is unassigned, belongs to the
    /// document's project and sits on a posting based node. A posting held by
    /// another document fails validation; it has to be unassigned there first.
    pub async fn set_posting_assignment(
        &self,
        document_id: Uuid,
        assign: &[Uuid],
        unassign: &[Uuid],
    ) -> ResultEngine<DocumentPostings> {
        if let Some(id) = assign.iter().find(|id| unassign.contains(id)) {
            return Err(EngineError::Validation(format!(
                "posting {id} is both assigned and unassigned"
            )));
        }

        with_tx!(self, |db_tx| {
            let document = load_document(&db_tx, document_id).await?;
            document.ensure_draft()?;

            if !unassign.is_empty() {
                postings::Entity::update_many()
                    .col_expr(postings::Column::DocumentKind, Expr::value(Option::<String>::None))
                    .col_expr(postings::Column::DocumentId, Expr::value(Option::<String>::None))
                    .filter(postings::Column::Id.is_in(to_strings(unassign)))
                    .filter(postings::Column::DocumentId.eq(document_id.to_string()))
                    .exec(&db_tx)
                    .await?;
            }

            let nodes = load_project_structures(&db_tx, document.project_id).await?;
            let posting_nodes: HashSet<Uuid> =
                ids_of(&nodes, BillingMode::PostingBased).into_iter().collect();
            let mut to_claim = Vec::new();
            let mut seen = HashSet::new();
            for posting_id in assign.iter().filter(|id| seen.insert(**id)) {
                let posting = load_posting(&db_tx, *posting_id).await?;
                if posting.link.document_id() == Some(document_id) {
                    continue;
                }
                if posting.project_id != document.project_id {
                    return Err(EngineError::Validation(format!(
                        "posting {posting_id} belongs to another project"
                    )));
                }
                if !posting.link.is_unassigned() {
                    return Err(EngineError::Validation(format!(
                        "posting {posting_id} is already assigned to another document"
                    )));
                }
                if !posting_nodes.contains(&posting.structure_id) {
                    return Err(EngineError::Validation(format!(
                        "posting {posting_id} is not on a posting based structure"
                    )));
                }
                to_claim.push(*posting_id);
            }

            let node_ids: Vec<Uuid> = posting_nodes.iter().copied().collect();
            let claimed = claim_unassigned(&db_tx, &document, &node_ids, Some(&to_claim)).await?;
            if claimed.len() != to_claim.len() {
                return Err(EngineError::Conflict(
                    "a posting was assigned elsewhere concurrently, retry".to_string(),
                ));
            }

            update_from_postings_in(&db_tx, &document).await?;
            document_postings_in(&db_tx, &document, &node_ids).await
        })
    }

    /// Postings assigned to a document plus the ones still available to it.
    pub async fn document_postings(&self, document_id: Uuid) -> ResultEngine<DocumentPostings> {
        let document = load_document(&self.database, document_id).await?;
        let nodes = load_project_structures(&self.database, document.project_id).await?;
        let node_ids = ids_of(&nodes, BillingMode::PostingBased);
        document_postings_in(&self.database, &document, &node_ids).await
    }
}

async fn document_postings_in<C: ConnectionTrait>(
    db: &C,
    document: &BillingDocument,
    posting_nodes: &[Uuid],
) -> ResultEngine<DocumentPostings> {
    let assigned = load_document_postings(db, document.id).await?;
    let available = if document.is_booked() || posting_nodes.is_empty() {
        Vec::new()
    } else {
        postings::Entity::find()
            .filter(postings::Column::ProjectId.eq(document.project_id.to_string()))
            .filter(postings::Column::StructureId.is_in(to_strings(posting_nodes)))
            .filter(postings::Column::DocumentId.is_null())
            .all(db)
            .await?
            .into_iter()
            .map(Posting::try_from)
            .collect::<ResultEngine<_>>()?
    };
    Ok(DocumentPostings {
        assigned,
        available,
    })
}

use std::collections::{HashMap, HashSet};

use sea_orm::{
    ActiveValue, ConnectionTrait, DatabaseTransaction, PaginatorTrait, QueryFilter, QuerySelect,
    TransactionTrait, prelude::*,
};
use uuid::Uuid;

use crate::{
    BillingMode, EngineError, Money, Percent, ResultEngine, StructureNode, allocations, postings,
    structures, util::normalize_required_name,
};

use super::{Engine, load_project, load_project_structures, load_structure, with_tx};

#[derive(Clone, Debug)]
pub struct NewStructure {
    pub project_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub billing_mode: BillingMode,
    pub extras_percent: Percent,
    /// Fixed revenue; only meaningful for [`BillingMode::Performance`].
    pub revenue: Money,
}

/// Editable fields of a structure node. `None` leaves a field untouched.
#[derive(Clone, Debug, Default)]
pub struct StructurePatch {
    pub name: Option<String>,
    pub extras_percent: Option<Percent>,
    /// Only accepted for [`BillingMode::Performance`] nodes.
    pub revenue: Option<Money>,
    pub revenue_completion_percent: Option<Percent>,
}

/// Re-derives a node's aggregates from the postings currently attached to it
/// and persists them.
///
/// Only derived columns are written; running totals are left to their
/// atomic increments.
pub(crate) async fn recompute_structure_in<C: ConnectionTrait>(
    db: &C,
    structure_id: Uuid,
) -> ResultEngine<StructureNode> {
    let mut node = load_structure(db, structure_id).await?;
    let amounts: Vec<(i64, i64)> = postings::Entity::find()
        .select_only()
        .column(postings::Column::InternalMinor)
        .column(postings::Column::BillableMinor)
        .filter(postings::Column::StructureId.eq(structure_id.to_string()))
        .into_tuple()
        .all(db)
        .await?;

    node.recompute(
        amounts
            .into_iter()
            .map(|(internal, billable)| (Money::new(internal), Money::new(billable))),
    );
    persist_derived(db, &node).await?;
    Ok(node)
}

async fn persist_derived<C: ConnectionTrait>(db: &C, node: &StructureNode) -> ResultEngine<()> {
    let active = structures::ActiveModel {
        id: ActiveValue::Set(node.id.to_string()),
        name: ActiveValue::Set(node.name.clone()),
        cost_minor: ActiveValue::Set(node.cost.cents()),
        revenue_minor: ActiveValue::Set(node.revenue.cents()),
        extras_percent: ActiveValue::Set(node.extras_percent.hundredths()),
        extras_minor: ActiveValue::Set(node.extras.cents()),
        revenue_completion_percent: ActiveValue::Set(node.revenue_completion_percent.hundredths()),
        revenue_completion_minor: ActiveValue::Set(node.revenue_completion.cents()),
        extras_completion_minor: ActiveValue::Set(node.extras_completion.cents()),
        ..Default::default()
    };
    active.update(db).await?;
    Ok(())
}

/// Collects `root` and all of its descendants.
fn subtree(nodes: &[StructureNode], root: Uuid) -> HashSet<Uuid> {
    let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for node in nodes {
        if let Some(parent) = node.parent_id {
            children.entry(parent).or_default().push(node.id);
        }
    }

    let mut out = HashSet::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if out.insert(id) {
            if let Some(kids) = children.get(&id) {
                stack.extend(kids.iter().copied());
            }
        }
    }
    out
}

impl Engine {
    /// Return a structure node snapshot from DB.
    pub async fn structure(&self, structure_id: Uuid) -> ResultEngine<StructureNode> {
        load_structure(&self.database, structure_id).await
    }

    /// Lists all structure nodes of a project.
    pub async fn project_structures(&self, project_id: Uuid) -> ResultEngine<Vec<StructureNode>> {
        load_project_structures(&self.database, project_id).await
    }

    /// Recomputes the derived figures of a structure node from its postings.
    ///
    /// Idempotent: the result only depends on the postings currently attached.
    pub async fn recompute_structure(&self, structure_id: Uuid) -> ResultEngine<StructureNode> {
        with_tx!(self, |db_tx| {
            recompute_structure_in(&db_tx, structure_id).await
        })
    }

    pub async fn create_structure(&self, cmd: NewStructure) -> ResultEngine<StructureNode> {
        let name = normalize_required_name(&cmd.name, "structure")?;
        if cmd.billing_mode == BillingMode::PostingBased && !cmd.revenue.is_zero() {
            return Err(EngineError::Validation(
                "revenue of a posting based structure is derived from its postings".to_string(),
            ));
        }

        with_tx!(self, |db_tx| {
            load_project(&db_tx, cmd.project_id).await?;
            if let Some(parent_id) = cmd.parent_id {
                let parent = load_structure(&db_tx, parent_id).await?;
                if parent.project_id != cmd.project_id {
                    return Err(EngineError::Validation(
                        "parent structure belongs to another project".to_string(),
                    ));
                }
            }

            let mut node = StructureNode::new(
                cmd.project_id,
                cmd.parent_id,
                name,
                cmd.billing_mode,
                cmd.extras_percent,
            );
            node.revenue = cmd.revenue;
            node.refresh_derived();
            structures::ActiveModel::from(&node).insert(&db_tx).await?;
            Ok(node)
        })
    }

    /// Edits a node and re-derives its extras/completion amounts.
    pub async fn update_structure(
        &self,
        structure_id: Uuid,
        patch: StructurePatch,
    ) -> ResultEngine<StructureNode> {
        let name = patch
            .name
            .as_deref()
            .map(|n| normalize_required_name(n, "structure"))
            .transpose()?;
        if let Some(pct) = patch.revenue_completion_percent
            && !(Percent::ZERO..=Percent::HUNDRED).contains(&pct)
        {
            return Err(EngineError::Validation(format!(
                "completion must be between 0% and 100%, got {pct}"
            )));
        }

        with_tx!(self, |db_tx| {
            let mut node = load_structure(&db_tx, structure_id).await?;
            if let Some(revenue) = patch.revenue {
                if node.billing_mode != BillingMode::Performance {
                    return Err(EngineError::Validation(
                        "revenue of a posting based structure is derived from its postings"
                            .to_string(),
                    ));
                }
                node.revenue = revenue;
            }
            if let Some(name) = name {
                node.name = name;
            }
            if let Some(pct) = patch.extras_percent {
                node.extras_percent = pct;
            }
            if let Some(pct) = patch.revenue_completion_percent {
                node.revenue_completion_percent = pct;
            }
            node.refresh_derived();
            persist_derived(&db_tx, &node).await?;
            Ok(node)
        })
    }

    /// Re-parents a node inside its project. `None` makes it a root.
    ///
    /// Refused while postings or allocation rows reference the node.
    pub async fn move_structure(
        &self,
        structure_id: Uuid,
        new_parent_id: Option<Uuid>,
    ) -> ResultEngine<StructureNode> {
        with_tx!(self, |db_tx| {
            let mut node = load_structure(&db_tx, structure_id).await?;
            ensure_unreferenced(&db_tx, &[structure_id]).await?;

            if let Some(parent_id) = new_parent_id {
                let nodes = load_project_structures(&db_tx, node.project_id).await?;
                let parent = nodes
                    .iter()
                    .find(|n| n.id == parent_id)
                    .ok_or_else(|| {
                        EngineError::Validation(
                            "parent structure belongs to another project".to_string(),
                        )
                    })?;
                if subtree(&nodes, structure_id).contains(&parent.id) {
                    return Err(EngineError::Validation(
                        "a structure cannot be moved below itself".to_string(),
                    ));
                }
            }

            let active = structures::ActiveModel {
                id: ActiveValue::Set(structure_id.to_string()),
                parent_id: ActiveValue::Set(new_parent_id.map(|id| id.to_string())),
                ..Default::default()
            };
            active.update(&db_tx).await?;
            node.parent_id = new_parent_id;
            Ok(node)
        })
    }

    /// Deletes a node together with all its descendants, as one set.
    ///
    /// Refused when any node of the set is referenced by a posting or an
    /// allocation row. Returns the ids removed.
    pub async fn delete_structure(&self, structure_id: Uuid) -> ResultEngine<Vec<Uuid>> {
        let removed = with_tx!(self, |db_tx| {
            let node = load_structure(&db_tx, structure_id).await?;
            let nodes = load_project_structures(&db_tx, node.project_id).await?;
            let ids: Vec<Uuid> = subtree(&nodes, structure_id).into_iter().collect();
            ensure_unreferenced(&db_tx, &ids).await?;

            structures::Entity::delete_many()
                .filter(structures::Column::Id.is_in(ids.iter().map(Uuid::to_string)))
                .exec(&db_tx)
                .await?;
            Ok(ids)
        })?;

        tracing::info!(%structure_id, removed = removed.len(), "structure subtree deleted");
        Ok(removed)
    }
}

async fn ensure_unreferenced(db: &DatabaseTransaction, ids: &[Uuid]) -> ResultEngine<()> {
    let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
    let posting_refs = postings::Entity::find()
        .filter(postings::Column::StructureId.is_in(ids.clone()))
        .count(db)
        .await?;
    if posting_refs > 0 {
        return Err(EngineError::Conflict(format!(
            "structure is referenced by {posting_refs} posting(s)"
        )));
    }
    let allocation_refs = allocations::Entity::find()
        .filter(allocations::Column::StructureId.is_in(ids))
        .count(db)
        .await?;
    if allocation_refs > 0 {
        return Err(EngineError::Conflict(format!(
            "structure is referenced by {allocation_refs} allocation row(s)"
        )));
    }
    Ok(())
}

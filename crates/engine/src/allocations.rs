//! Allocation rows: how much of a billing document is attributed to each
//! structure node.
//!
//! At most one row exists per `(document_id, structure_id)`. Rows of a
//! document are always replaced as a set for the structures being
//! recomputed, never patched one by one.

use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EngineError, Money, ResultEngine, util::parse_uuid};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: Uuid,
    pub document_id: Uuid,
    pub structure_id: Uuid,
    pub net: Money,
    pub extras_net: Money,
}

impl Allocation {
    pub fn new(document_id: Uuid, structure_id: Uuid, net: Money, extras_net: Money) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            structure_id,
            net,
            extras_net,
        }
    }

    /// `net + extras_net`, the amount propagated to structure running totals.
    pub fn total(&self) -> Money {
        self.net + self.extras_net
    }
}

/// Splits `amount` across nodes proportionally to their remaining billable
/// amount, using largest-remainder rounding.
///
/// Only nodes with a positive remaining amount take part. Every node first
/// gets its exact share rounded down to the cent; the cents left over go one
/// by one to the nodes with the largest dropped fractions. The shares always
/// sum to `amount`, are never negative and, when `amount` does not exceed the
/// total remaining, never exceed the node's remaining amount.
///
/// Fails when `amount` is negative, or when no node is eligible and `amount`
/// is not zero. Capping `amount` at the total remaining is left to the caller.
pub fn distribute(amount: Money, remaining: &[(Uuid, Money)]) -> ResultEngine<Vec<(Uuid, Money)>> {
    if amount.cents() < 0 {
        return Err(EngineError::Validation(format!(
            "amount must not be negative, got {amount}"
        )));
    }

    let eligible: Vec<(Uuid, Money)> = remaining
        .iter()
        .copied()
        .filter(|(_, r)| r.is_positive())
        .collect();
    if eligible.is_empty() {
        if amount.is_zero() {
            return Ok(Vec::new());
        }
        return Err(EngineError::Validation(format!(
            "amount {amount} cannot be allocated: no structure has a remaining amount"
        )));
    }

    let total: i128 = eligible.iter().map(|(_, r)| i128::from(r.cents())).sum();
    let amount_cents = i128::from(amount.cents());

    // (index, floored share, dropped fraction numerator)
    let mut parts: Vec<(usize, i128, i128)> = eligible
        .iter()
        .enumerate()
        .map(|(idx, (_, r))| {
            let exact = amount_cents * i128::from(r.cents());
            (idx, exact / total, exact % total)
        })
        .collect();

    let floored: i128 = parts.iter().map(|(_, share, _)| share).sum();
    let leftover = usize::try_from(amount_cents - floored)
        .map_err(|_| EngineError::Validation(format!("cannot split {amount}")))?;

    parts.sort_by(|(a_idx, _, a_rem), (b_idx, _, b_rem)| {
        b_rem
            .cmp(a_rem)
            .then_with(|| eligible[*b_idx].1.cmp(&eligible[*a_idx].1))
            .then_with(|| eligible[*a_idx].0.cmp(&eligible[*b_idx].0))
    });
    for part in parts.iter_mut().take(leftover) {
        part.1 += 1;
    }
    parts.sort_by_key(|(idx, _, _)| *idx);

    parts
        .into_iter()
        .map(|(idx, share, _)| {
            let cents = i64::try_from(share)
                .map_err(|_| EngineError::Validation(format!("share of {amount} overflows")))?;
            Ok((eligible[idx].0, Money::new(cents)))
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "document_allocations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub document_id: String,
    pub structure_id: String,
    pub net_minor: i64,
    pub extras_net_minor: i64,
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
    #[sea_orm(
        belongs_to = "super::structures::Entity",
        from = "Column::StructureId",
        to = "super::structures::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Structures,
}

impl Related<super::documents::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Documents.def()
    }
}

impl Related<super::structures::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Structures.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Allocation> for ActiveModel {
    fn from(value: &Allocation) -> Self {
        Self {
            id: ActiveValue::Set(value.id.to_string()),
            document_id: ActiveValue::Set(value.document_id.to_string()),
            structure_id: ActiveValue::Set(value.structure_id.to_string()),
            net_minor: ActiveValue::Set(value.net.cents()),
            extras_net_minor: ActiveValue::Set(value.extras_net.cents()),
        }
    }
}

impl TryFrom<Model> for Allocation {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&model.id, "allocation")?,
            document_id: parse_uuid(&model.document_id, "document")?,
            structure_id: parse_uuid(&model.structure_id, "structure")?,
            net: Money::new(model.net_minor),
            extras_net: Money::new(model.extras_net_minor),
        })
    }
}

//! Structure nodes: the per-project cost/billing breakdown tree.
//!
//! Aggregates stored on a node are derived:
//! - `cost` is always the sum of the internal amount of the postings on it
//! - for [`BillingMode::PostingBased`] nodes `revenue` is the sum of the
//!   billable amount of the postings on it
//! - `extras` is always `revenue × extras_percent`
//! - completion amounts follow from the completion percentage
//!
//! [`StructureNode::recompute`] is the single place these are derived.

use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    EngineError, Money, Percent,
    util::{parse_optional_uuid, parse_uuid, stored_enum},
};

/// How the billable revenue of a node is determined.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingMode {
    /// Fixed revenue billed by manually tracked completion.
    Performance,
    /// Revenue is the sum of the postings booked on the node.
    PostingBased,
}

stored_enum!(BillingMode, "billing mode", {
    Performance => "performance",
    PostingBased => "posting_based",
});

/// A node of a project's structure tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureNode {
    pub id: Uuid,
    pub project_id: Uuid,
    /// `None` for roots.
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub billing_mode: BillingMode,
    pub cost: Money,
    pub revenue: Money,
    pub extras_percent: Percent,
    pub extras: Money,
    pub revenue_completion_percent: Percent,
    pub revenue_completion: Money,
    pub extras_completion: Money,
    /// Running total of booked invoice allocations (net + extras).
    pub invoiced: Money,
    /// Running total of booked partial payment allocations (net + extras).
    pub partially_billed: Money,
}

impl StructureNode {
    pub fn new(
        project_id: Uuid,
        parent_id: Option<Uuid>,
        name: String,
        billing_mode: BillingMode,
        extras_percent: Percent,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            parent_id,
            name,
            billing_mode,
            cost: Money::ZERO,
            revenue: Money::ZERO,
            extras_percent,
            extras: Money::ZERO,
            revenue_completion_percent: Percent::ZERO,
            revenue_completion: Money::ZERO,
            extras_completion: Money::ZERO,
            invoiced: Money::ZERO,
            partially_billed: Money::ZERO,
        }
    }

    /// Re-derives every aggregate from the `(internal, billable)` amounts of
    /// the postings currently attached to this node.
    ///
    /// Pure function of its inputs: calling it twice with the same postings
    /// yields the same node.
    pub fn recompute<I>(&mut self, postings: I)
    where
        I: IntoIterator<Item = (Money, Money)>,
    {
        let (cost, billable) = postings
            .into_iter()
            .fold((Money::ZERO, Money::ZERO), |(c, b), (internal, external)| {
                (c + internal, b + external)
            });
        self.cost = cost;
        if self.billing_mode == BillingMode::PostingBased {
            self.revenue = billable;
        }
        self.refresh_derived();
    }

    /// Recomputes extras and completion amounts from revenue and percents.
    pub fn refresh_derived(&mut self) {
        self.extras = self.extras_percent.apply(self.revenue);
        self.revenue_completion = self.revenue_completion_percent.apply(self.revenue);
        self.extras_completion = self.extras_percent.apply(self.revenue_completion);
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "structures")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub project_id: String,
    pub parent_id: Option<String>,
    pub name: String,
    pub billing_mode: String,
    pub cost_minor: i64,
    pub revenue_minor: i64,
    pub extras_percent: i64,
    pub extras_minor: i64,
    pub revenue_completion_percent: i64,
    pub revenue_completion_minor: i64,
    pub extras_completion_minor: i64,
    pub invoiced_minor: i64,
    pub partially_billed_minor: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::projects::Entity",
        from = "Column::ProjectId",
        to = "super::projects::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Projects,
    #[sea_orm(has_many = "super::postings::Entity")]
    Postings,
}

impl Related<super::projects::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Projects.def()
    }
}

impl Related<super::postings::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Postings.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&StructureNode> for ActiveModel {
    fn from(value: &StructureNode) -> Self {
        Self {
            id: ActiveValue::Set(value.id.to_string()),
            project_id: ActiveValue::Set(value.project_id.to_string()),
            parent_id: ActiveValue::Set(value.parent_id.map(|id| id.to_string())),
            name: ActiveValue::Set(value.name.clone()),
            billing_mode: ActiveValue::Set(value.billing_mode.as_str().to_string()),
            cost_minor: ActiveValue::Set(value.cost.cents()),
            revenue_minor: ActiveValue::Set(value.revenue.cents()),
            extras_percent: ActiveValue::Set(value.extras_percent.hundredths()),
            extras_minor: ActiveValue::Set(value.extras.cents()),
            revenue_completion_percent: ActiveValue::Set(
                value.revenue_completion_percent.hundredths(),
            ),
            revenue_completion_minor: ActiveValue::Set(value.revenue_completion.cents()),
            extras_completion_minor: ActiveValue::Set(value.extras_completion.cents()),
            invoiced_minor: ActiveValue::Set(value.invoiced.cents()),
            partially_billed_minor: ActiveValue::Set(value.partially_billed.cents()),
        }
    }
}

impl TryFrom<Model> for StructureNode {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&model.id, "structure")?,
            project_id: parse_uuid(&model.project_id, "project")?,
            parent_id: parse_optional_uuid(model.parent_id.as_deref(), "structure")?,
            name: model.name,
            billing_mode: BillingMode::try_from(model.billing_mode.as_str())?,
            cost: Money::new(model.cost_minor),
            revenue: Money::new(model.revenue_minor),
            extras_percent: Percent::from_hundredths(model.extras_percent),
            extras: Money::new(model.extras_minor),
            revenue_completion_percent: Percent::from_hundredths(
                model.revenue_completion_percent,
            ),
            revenue_completion: Money::new(model.revenue_completion_minor),
            extras_completion: Money::new(model.extras_completion_minor),
            invoiced: Money::new(model.invoiced_minor),
            partially_billed: Money::new(model.partially_billed_minor),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(mode: BillingMode) -> StructureNode {
        StructureNode::new(
            Uuid::new_v4(),
            None,
            "Walls".to_string(),
            mode,
            Percent::whole(10),
        )
    }

    #[test]
    fn posting_based_revenue_is_sum_of_postings() {
        let mut node = node(BillingMode::PostingBased);
        node.recompute([
            (Money::new(50_00), Money::new(80_00)),
            (Money::new(25_00), Money::new(40_05)),
        ]);
        assert_eq!(node.cost, Money::new(75_00));
        assert_eq!(node.revenue, Money::new(120_05));
        // 12.005 -> 12.01
        assert_eq!(node.extras, Money::new(12_01));
    }

    #[test]
    fn performance_revenue_is_kept() {
        let mut node = node(BillingMode::Performance);
        node.revenue = Money::new(1000_00);
        node.revenue_completion_percent = Percent::whole(40);
        node.recompute([(Money::new(10_00), Money::new(99_00))]);
        assert_eq!(node.cost, Money::new(10_00));
        assert_eq!(node.revenue, Money::new(1000_00));
        assert_eq!(node.extras, Money::new(100_00));
        assert_eq!(node.revenue_completion, Money::new(400_00));
        assert_eq!(node.extras_completion, Money::new(40_00));
    }

    #[test]
    fn recompute_is_idempotent() {
        let mut node = node(BillingMode::PostingBased);
        let postings = [(Money::new(1), Money::new(3))];
        node.recompute(postings);
        let first = node.clone();
        node.recompute(postings);
        assert_eq!(node, first);

        node.recompute([]);
        assert_eq!(node.revenue, Money::ZERO);
        assert_eq!(node.cost, Money::ZERO);
    }

    #[test]
    fn billing_mode_round_trips_through_storage_text() {
        assert_eq!(
            BillingMode::try_from("posting_based").unwrap(),
            BillingMode::PostingBased
        );
        assert!(BillingMode::try_from("hourly").is_err());
    }
}

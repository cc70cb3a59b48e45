use chrono::{Datelike, Utc};
use sea_orm::{TransactionTrait, prelude::*};
use uuid::Uuid;

use crate::{
    Money, NumberFamily, NumberingConfig, Project, ResultEngine, projects,
    util::normalize_required_name,
};

use super::{Engine, load_project, numbering::allocate_number, with_tx};

impl Engine {
    /// Creates a project, drawing its number from the tenant's project
    /// sequence (separate from billing document numbers).
    pub async fn create_project(&self, tenant_id: &str, name: &str) -> ResultEngine<Project> {
        let name = normalize_required_name(name, "project")?;
        let created_at = Utc::now();
        let year = created_at.year();

        let project = with_tx!(self, |db_tx| {
            let value = allocate_number(&db_tx, tenant_id, NumberFamily::Project, year).await?;
            let project = Project {
                id: Uuid::new_v4(),
                tenant_id: tenant_id.to_string(),
                number: NumberingConfig::format(&self.config.numbering.project_prefix, year, value),
                name,
                invoiced: Money::ZERO,
                partially_billed: Money::ZERO,
                created_at,
            };
            projects::ActiveModel::from(&project).insert(&db_tx).await?;
            Ok(project)
        })?;

        tracing::info!(project_id = %project.id, number = %project.number, "project created");
        Ok(project)
    }

    /// Return a project snapshot from DB.
    pub async fn project(&self, project_id: Uuid) -> ResultEngine<Project> {
        load_project(&self.database, project_id).await
    }
}

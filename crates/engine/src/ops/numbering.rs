use sea_orm::{ConnectionTrait, Statement, TransactionTrait, prelude::*, sea_query::Expr};

use crate::{
    DocumentKind, EngineError, NumberFamily, NumberingConfig, ResultEngine, counters,
};

use super::{Engine, with_tx};

/// Atomically hands out the next value of a counter.
///
/// The counter row is created on first use. The increment is a single
/// `UPDATE … SET next_value = next_value + 1`, so two concurrent callers
/// serialize on the row and never observe the same value.
pub(crate) async fn allocate_number<C: ConnectionTrait>(
    db: &C,
    tenant_id: &str,
    family: NumberFamily,
    year: i32,
) -> ResultEngine<i64> {
    let backend = db.get_database_backend();
    db.execute(Statement::from_sql_and_values(
        backend,
        "INSERT INTO number_counters (tenant_id, family, year, next_value) VALUES (?, ?, ?, 1) \
         ON CONFLICT (tenant_id, family, year) DO NOTHING;",
        vec![tenant_id.into(), family.as_str().into(), year.into()],
    ))
    .await?;

    let updated = counters::Entity::update_many()
        .col_expr(
            counters::Column::NextValue,
            Expr::col(counters::Column::NextValue).add(1),
        )
        .filter(counters::Column::TenantId.eq(tenant_id))
        .filter(counters::Column::Family.eq(family.as_str()))
        .filter(counters::Column::Year.eq(year))
        .exec(db)
        .await?;
    if updated.rows_affected != 1 {
        return Err(EngineError::Inconsistency(format!(
            "number counter {tenant_id}/{family}/{year} missing after upsert"
        )));
    }

    let counter = counters::Entity::find_by_id((tenant_id.to_string(), family.as_str().to_string(), year))
        .one(db)
        .await?
        .ok_or_else(|| EngineError::KeyNotFound("number counter not exists".to_string()))?;
    Ok(counter.next_value - 1)
}

impl Engine {
    /// Returns the next number of `family` for `tenant_id`/`year` and advances
    /// the counter.
    pub async fn next_number(
        &self,
        tenant_id: &str,
        family: NumberFamily,
        year: i32,
    ) -> ResultEngine<i64> {
        let value = with_tx!(self, |db_tx| {
            allocate_number(&db_tx, tenant_id, family, year).await
        })?;
        tracing::info!(tenant_id, %family, year, value, "number allocated");
        Ok(value)
    }

    /// Allocates and formats the next document number, e.g. `INV-2026-0042`.
    pub async fn next_document_number(
        &self,
        tenant_id: &str,
        kind: DocumentKind,
        year: i32,
    ) -> ResultEngine<String> {
        let family = self.config.numbering.document_family(kind);
        let value = self.next_number(tenant_id, family, year).await?;
        Ok(NumberingConfig::format(
            self.config.numbering.document_prefix(kind),
            year,
            value,
        ))
    }

    /// Returns the value the next allocation would hand out without
    /// advancing the counter.
    pub async fn peek_next_number(
        &self,
        tenant_id: &str,
        family: NumberFamily,
        year: i32,
    ) -> ResultEngine<i64> {
        let counter = counters::Entity::find_by_id((
            tenant_id.to_string(),
            family.as_str().to_string(),
            year,
        ))
        .one(&self.database)
        .await?;
        Ok(counter.map_or(1, |c| c.next_value))
    }

    /// Administrative override of the next value of a counter.
    pub async fn set_next_number(
        &self,
        tenant_id: &str,
        family: NumberFamily,
        year: i32,
        next_value: i64,
    ) -> ResultEngine<()> {
        if next_value < 1 {
            return Err(EngineError::Validation(
                "next_value must be >= 1".to_string(),
            ));
        }
        let previous = with_tx!(self, |db_tx| {
            let previous = counters::Entity::find_by_id((
                tenant_id.to_string(),
                family.as_str().to_string(),
                year,
            ))
            .one(&db_tx)
            .await?
            .map(|c| c.next_value);

            let backend = db_tx.get_database_backend();
            db_tx
                .execute(Statement::from_sql_and_values(
                    backend,
                    "INSERT INTO number_counters (tenant_id, family, year, next_value) VALUES (?, ?, ?, ?) \
                     ON CONFLICT (tenant_id, family, year) DO UPDATE SET next_value = excluded.next_value;",
                    vec![
                        tenant_id.into(),
                        family.as_str().into(),
                        year.into(),
                        next_value.into(),
                    ],
                ))
                .await?;
            Ok(previous)
        })?;

        if previous.is_some_and(|p| next_value < p) {
            tracing::warn!(
                tenant_id,
                %family,
                year,
                next_value,
                previous = previous.unwrap_or_default(),
                "number counter moved backwards; later allocations may collide with issued numbers"
            );
        } else {
            tracing::info!(tenant_id, %family, year, next_value, "number counter set");
        }
        Ok(())
    }
}

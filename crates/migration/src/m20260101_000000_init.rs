//! Initial schema migration - creates all tables from scratch.
//!
//! - `projects`: contracts with their billing running totals
//! - `structures`: per-project cost/billing breakdown tree
//! - `postings`: time/cost bookings on structure nodes
//! - `billing_documents`: invoices and partial payments
//! - `document_allocations`: per-structure share of a document
//! - `document_snapshots`: stored PDF / e-invoice artifacts of booked documents
//! - `number_counters`: sequential numbers per tenant, family and year
//! - `rate_presets`: authoritative rates per worker and project

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

// ─────────────────────────────────────────────────────────────────────────────
// Table identifiers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Iden)]
enum Projects {
    Table,
    Id,
    TenantId,
    Number,
    Name,
    InvoicedMinor,
    PartiallyBilledMinor,
    CreatedAt,
}

#[derive(Iden)]
enum Structures {
    Table,
    Id,
    ProjectId,
    ParentId,
    Name,
    BillingMode,
    CostMinor,
    RevenueMinor,
    ExtrasPercent,
    ExtrasMinor,
    RevenueCompletionPercent,
    RevenueCompletionMinor,
    ExtrasCompletionMinor,
    InvoicedMinor,
    PartiallyBilledMinor,
}

#[derive(Iden)]
enum Postings {
    Table,
    Id,
    ProjectId,
    StructureId,
    WorkerId,
    PerformedOn,
    Description,
    Role,
    Quantity,
    InternalRateMinor,
    ExternalRateMinor,
    InternalMinor,
    BillableMinor,
    DocumentKind,
    DocumentId,
    CreatedAt,
}

#[derive(Iden)]
enum BillingDocuments {
    Table,
    Id,
    TenantId,
    ProjectId,
    Kind,
    Status,
    Number,
    IssueDate,
    VatRef,
    VatPercent,
    Counterparty,
    TemplateId,
    AmountNetMinor,
    AmountExtrasNetMinor,
    TotalNetMinor,
    TaxMinor,
    TotalGrossMinor,
    TemplateSnapshot,
    ThemeSnapshot,
    BookedAt,
    CreatedAt,
}

#[derive(Iden)]
enum DocumentAllocations {
    Table,
    Id,
    DocumentId,
    StructureId,
    NetMinor,
    ExtrasNetMinor,
}

#[derive(Iden)]
enum DocumentSnapshots {
    Table,
    Id,
    DocumentId,
    Format,
    ArtifactId,
    ContentHash,
    SizeBytes,
    CreatedAt,
}

#[derive(Iden)]
enum NumberCounters {
    Table,
    TenantId,
    Family,
    Year,
    NextValue,
}

#[derive(Iden)]
enum RatePresets {
    Table,
    WorkerId,
    ProjectId,
    ExternalRateMinor,
    Role,
}

fn money(col: impl IntoIden) -> ColumnDef {
    ColumnDef::new(col)
        .big_integer()
        .not_null()
        .default(0)
        .to_owned()
}

// ─────────────────────────────────────────────────────────────────────────────
// Migration implementation
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ───────────────────────────────────────────────────────────────────
        // 1. Projects
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Projects::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Projects::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Projects::TenantId).string().not_null())
                    .col(ColumnDef::new(Projects::Number).string().not_null())
                    .col(ColumnDef::new(Projects::Name).string().not_null())
                    .col(money(Projects::InvoicedMinor))
                    .col(money(Projects::PartiallyBilledMinor))
                    .col(
                        ColumnDef::new(Projects::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-projects-tenant_id-number-unique")
                    .table(Projects::Table)
                    .col(Projects::TenantId)
                    .col(Projects::Number)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 2. Structures
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Structures::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Structures::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Structures::ProjectId).string().not_null())
                    .col(ColumnDef::new(Structures::ParentId).string())
                    .col(ColumnDef::new(Structures::Name).string().not_null())
                    .col(ColumnDef::new(Structures::BillingMode).string().not_null())
                    .col(money(Structures::CostMinor))
                    .col(money(Structures::RevenueMinor))
                    .col(money(Structures::ExtrasPercent))
                    .col(money(Structures::ExtrasMinor))
                    .col(money(Structures::RevenueCompletionPercent))
                    .col(money(Structures::RevenueCompletionMinor))
                    .col(money(Structures::ExtrasCompletionMinor))
                    .col(money(Structures::InvoicedMinor))
                    .col(money(Structures::PartiallyBilledMinor))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-structures-project_id")
                            .from(Structures::Table, Structures::ProjectId)
                            .to(Projects::Table, Projects::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-structures-parent_id")
                            .from(Structures::Table, Structures::ParentId)
                            .to(Structures::Table, Structures::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-structures-project_id")
                    .table(Structures::Table)
                    .col(Structures::ProjectId)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 3. Billing documents
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(BillingDocuments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BillingDocuments::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(BillingDocuments::TenantId).string().not_null())
                    .col(ColumnDef::new(BillingDocuments::ProjectId).string().not_null())
                    .col(ColumnDef::new(BillingDocuments::Kind).string().not_null())
                    .col(ColumnDef::new(BillingDocuments::Status).string().not_null())
                    .col(ColumnDef::new(BillingDocuments::Number).string())
                    .col(ColumnDef::new(BillingDocuments::IssueDate).date().not_null())
                    .col(ColumnDef::new(BillingDocuments::VatRef).string().not_null())
                    .col(money(BillingDocuments::VatPercent))
                    .col(ColumnDef::new(BillingDocuments::Counterparty).text().not_null())
                    .col(ColumnDef::new(BillingDocuments::TemplateId).string())
                    .col(money(BillingDocuments::AmountNetMinor))
                    .col(money(BillingDocuments::AmountExtrasNetMinor))
                    .col(money(BillingDocuments::TotalNetMinor))
                    .col(money(BillingDocuments::TaxMinor))
                    .col(money(BillingDocuments::TotalGrossMinor))
                    .col(ColumnDef::new(BillingDocuments::TemplateSnapshot).text())
                    .col(ColumnDef::new(BillingDocuments::ThemeSnapshot).text())
                    .col(ColumnDef::new(BillingDocuments::BookedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(BillingDocuments::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-billing_documents-project_id")
                            .from(BillingDocuments::Table, BillingDocuments::ProjectId)
                            .to(Projects::Table, Projects::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // Drafts have no number yet; SQLite lets NULLs repeat in a unique index.
        manager
            .create_index(
                Index::create()
                    .name("idx-billing_documents-tenant_id-number-unique")
                    .table(BillingDocuments::Table)
                    .col(BillingDocuments::TenantId)
                    .col(BillingDocuments::Number)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-billing_documents-project_id-status")
                    .table(BillingDocuments::Table)
                    .col(BillingDocuments::ProjectId)
                    .col(BillingDocuments::Status)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 4. Postings
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Postings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Postings::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Postings::ProjectId).string().not_null())
                    .col(ColumnDef::new(Postings::StructureId).string().not_null())
                    .col(ColumnDef::new(Postings::WorkerId).string().not_null())
                    .col(ColumnDef::new(Postings::PerformedOn).date().not_null())
                    .col(ColumnDef::new(Postings::Description).string())
                    .col(ColumnDef::new(Postings::Role).string())
                    .col(money(Postings::Quantity))
                    .col(money(Postings::InternalRateMinor))
                    .col(money(Postings::ExternalRateMinor))
                    .col(money(Postings::InternalMinor))
                    .col(money(Postings::BillableMinor))
                    .col(ColumnDef::new(Postings::DocumentKind).string())
                    .col(ColumnDef::new(Postings::DocumentId).string())
                    .col(
                        ColumnDef::new(Postings::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-postings-project_id")
                            .from(Postings::Table, Postings::ProjectId)
                            .to(Projects::Table, Projects::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-postings-structure_id")
                            .from(Postings::Table, Postings::StructureId)
                            .to(Structures::Table, Structures::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-postings-document_id")
                            .from(Postings::Table, Postings::DocumentId)
                            .to(BillingDocuments::Table, BillingDocuments::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-postings-structure_id")
                    .table(Postings::Table)
                    .col(Postings::StructureId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-postings-document_id")
                    .table(Postings::Table)
                    .col(Postings::DocumentId)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 5. Allocation rows
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(DocumentAllocations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DocumentAllocations::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DocumentAllocations::DocumentId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DocumentAllocations::StructureId)
                            .string()
                            .not_null(),
                    )
                    .col(money(DocumentAllocations::NetMinor))
                    .col(money(DocumentAllocations::ExtrasNetMinor))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-document_allocations-document_id")
                            .from(DocumentAllocations::Table, DocumentAllocations::DocumentId)
                            .to(BillingDocuments::Table, BillingDocuments::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-document_allocations-structure_id")
                            .from(DocumentAllocations::Table, DocumentAllocations::StructureId)
                            .to(Structures::Table, Structures::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-document_allocations-document_id-structure_id-unique")
                    .table(DocumentAllocations::Table)
                    .col(DocumentAllocations::DocumentId)
                    .col(DocumentAllocations::StructureId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 6. Snapshots
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(DocumentSnapshots::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DocumentSnapshots::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DocumentSnapshots::DocumentId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DocumentSnapshots::Format).string().not_null())
                    .col(
                        ColumnDef::new(DocumentSnapshots::ArtifactId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DocumentSnapshots::ContentHash)
                            .string()
                            .not_null(),
                    )
                    .col(money(DocumentSnapshots::SizeBytes))
                    .col(
                        ColumnDef::new(DocumentSnapshots::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-document_snapshots-document_id")
                            .from(DocumentSnapshots::Table, DocumentSnapshots::DocumentId)
                            .to(BillingDocuments::Table, BillingDocuments::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-document_snapshots-document_id-format-unique")
                    .table(DocumentSnapshots::Table)
                    .col(DocumentSnapshots::DocumentId)
                    .col(DocumentSnapshots::Format)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 7. Number counters
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(NumberCounters::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(NumberCounters::TenantId).string().not_null())
                    .col(ColumnDef::new(NumberCounters::Family).string().not_null())
                    .col(ColumnDef::new(NumberCounters::Year).integer().not_null())
                    .col(
                        ColumnDef::new(NumberCounters::NextValue)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .primary_key(
                        Index::create()
                            .col(NumberCounters::TenantId)
                            .col(NumberCounters::Family)
                            .col(NumberCounters::Year),
                    )
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 8. Rate presets
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(RatePresets::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(RatePresets::WorkerId).string().not_null())
                    .col(ColumnDef::new(RatePresets::ProjectId).string().not_null())
                    .col(money(RatePresets::ExternalRateMinor))
                    .col(ColumnDef::new(RatePresets::Role).string())
                    .primary_key(
                        Index::create()
                            .col(RatePresets::WorkerId)
                            .col(RatePresets::ProjectId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-rate_presets-project_id")
                            .from(RatePresets::Table, RatePresets::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Drop in reverse order of creation (respecting FK dependencies)
        manager
            .drop_table(Table::drop().table(RatePresets::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(NumberCounters::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DocumentSnapshots::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DocumentAllocations::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Postings::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(BillingDocuments::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Structures::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Projects::Table).to_owned())
            .await?;
        Ok(())
    }
}

use std::{fmt, sync::Arc};

use sea_orm::{ConnectionTrait, DatabaseConnection, QueryFilter, prelude::*};
use uuid::Uuid;

use crate::{
    Allocation, ArtifactStore, BillingDocument, DbPresetResolver, EInvoiceGenerator,
    EngineConfig, EngineError, PdfRenderer, Posting, PresetResolver, Project, ResultEngine,
    StaticVatTable, StructureNode, Unconfigured, VatLookup,
};

mod allocation;
mod booking;
mod documents;
mod numbering;
mod postings;
mod projects;
mod structures;

pub use allocation::{BillingProposal, DocumentPostings};
pub use booking::DocumentSnapshot;
pub use documents::{DocumentPatch, NewDocument};
pub use postings::{NewPosting, PostingPatch};
pub use structures::{NewStructure, StructurePatch};

/// Run a block inside a DB transaction, committing on success and rolling back on error.
macro_rules! with_tx {
    ($self:expr, |$tx:ident| $body:expr) => {{
        let $tx = $self.database.begin().await?;
        let result: $crate::ResultEngine<_> = $body;
        match result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }};
}

pub(crate) use with_tx;

#[derive(Clone)]
struct Collaborators {
    pdf: Arc<dyn PdfRenderer>,
    einvoice: Arc<dyn EInvoiceGenerator>,
    artifacts: Arc<dyn ArtifactStore>,
    presets: Arc<dyn PresetResolver>,
    vat: Arc<dyn VatLookup>,
}

/// Handle to the billing ledger. Cheap to clone; every clone shares the same
/// database pool and collaborators.
#[derive(Clone)]
pub struct Engine {
    database: DatabaseConnection,
    collaborators: Collaborators,
    config: EngineConfig,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("database", &self.database)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Return a builder for `Engine`. Help to build the struct.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

pub(crate) async fn load_project<C: ConnectionTrait>(db: &C, id: Uuid) -> ResultEngine<Project> {
    let model = crate::projects::Entity::find_by_id(id.to_string())
        .one(db)
        .await?
        .ok_or_else(|| EngineError::KeyNotFound("project not exists".to_string()))?;
    Project::try_from(model)
}

pub(crate) async fn load_structure<C: ConnectionTrait>(
    db: &C,
    id: Uuid,
) -> ResultEngine<StructureNode> {
    let model = crate::structures::Entity::find_by_id(id.to_string())
        .one(db)
        .await?
        .ok_or_else(|| EngineError::KeyNotFound("structure not exists".to_string()))?;
    StructureNode::try_from(model)
}

pub(crate) async fn load_project_structures<C: ConnectionTrait>(
    db: &C,
    project_id: Uuid,
) -> ResultEngine<Vec<StructureNode>> {
    crate::structures::Entity::find()
        .filter(crate::structures::Column::ProjectId.eq(project_id.to_string()))
        .all(db)
        .await?
        .into_iter()
        .map(StructureNode::try_from)
        .collect()
}

pub(crate) async fn load_posting<C: ConnectionTrait>(db: &C, id: Uuid) -> ResultEngine<Posting> {
    let model = crate::postings::Entity::find_by_id(id.to_string())
        .one(db)
        .await?
        .ok_or_else(|| EngineError::KeyNotFound("posting not exists".to_string()))?;
    Posting::try_from(model)
}

pub(crate) async fn load_document<C: ConnectionTrait>(
    db: &C,
    id: Uuid,
) -> ResultEngine<BillingDocument> {
    let model = crate::documents::Entity::find_by_id(id.to_string())
        .one(db)
        .await?
        .ok_or_else(|| EngineError::KeyNotFound("document not exists".to_string()))?;
    BillingDocument::try_from(model)
}

pub(crate) async fn load_allocations<C: ConnectionTrait>(
    db: &C,
    document_id: Uuid,
) -> ResultEngine<Vec<Allocation>> {
    crate::allocations::Entity::find()
        .filter(crate::allocations::Column::DocumentId.eq(document_id.to_string()))
        .all(db)
        .await?
        .into_iter()
        .map(Allocation::try_from)
        .collect()
}

pub(crate) async fn load_document_postings<C: ConnectionTrait>(
    db: &C,
    document_id: Uuid,
) -> ResultEngine<Vec<Posting>> {
    crate::postings::Entity::find()
        .filter(crate::postings::Column::DocumentId.eq(document_id.to_string()))
        .all(db)
        .await?
        .into_iter()
        .map(Posting::try_from)
        .collect()
}

/// The builder for `Engine`
#[derive(Default)]
pub struct EngineBuilder {
    database: DatabaseConnection,
    config: EngineConfig,
    pdf: Option<Arc<dyn PdfRenderer>>,
    einvoice: Option<Arc<dyn EInvoiceGenerator>>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    presets: Option<Arc<dyn PresetResolver>>,
    vat: Option<Arc<dyn VatLookup>>,
}

impl EngineBuilder {
    /// Pass the required database
    pub fn database(mut self, db: DatabaseConnection) -> EngineBuilder {
        self.database = db;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> EngineBuilder {
        self.config = config;
        self
    }

    pub fn pdf_renderer(mut self, renderer: Arc<dyn PdfRenderer>) -> EngineBuilder {
        self.pdf = Some(renderer);
        self
    }

    pub fn einvoice_generator(mut self, generator: Arc<dyn EInvoiceGenerator>) -> EngineBuilder {
        self.einvoice = Some(generator);
        self
    }

    pub fn artifact_store(mut self, store: Arc<dyn ArtifactStore>) -> EngineBuilder {
        self.artifacts = Some(store);
        self
    }

    /// Defaults to the engine's own `rate_presets` table.
    pub fn preset_resolver(mut self, resolver: Arc<dyn PresetResolver>) -> EngineBuilder {
        self.presets = Some(resolver);
        self
    }

    /// Defaults to [`EngineConfig::vat_rates`].
    pub fn vat_lookup(mut self, lookup: Arc<dyn VatLookup>) -> EngineBuilder {
        self.vat = Some(lookup);
        self
    }

    /// Construct `Engine`
    pub async fn build(self) -> ResultEngine<Engine> {
        if matches!(self.database, DatabaseConnection::Disconnected) {
            return Err(EngineError::Validation(
                "engine requires a database connection".to_string(),
            ));
        }
        let collaborators = Collaborators {
            pdf: self.pdf.unwrap_or_else(|| Arc::new(Unconfigured)),
            einvoice: self.einvoice.unwrap_or_else(|| Arc::new(Unconfigured)),
            artifacts: self.artifacts.unwrap_or_else(|| Arc::new(Unconfigured)),
            presets: self
                .presets
                .unwrap_or_else(|| Arc::new(DbPresetResolver::new(self.database.clone()))),
            vat: self
                .vat
                .unwrap_or_else(|| Arc::new(StaticVatTable::new(self.config.vat_rates.clone()))),
        };
        Ok(Engine {
            database: self.database,
            collaborators,
            config: self.config,
        })
    }
}

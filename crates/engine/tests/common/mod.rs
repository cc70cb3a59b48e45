#![allow(dead_code)]

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::NaiveDate;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use uuid::Uuid;

use ledger_engine::{
    ArtifactRef, ArtifactStore, BillingDocument, BillingMode, CollaboratorError, Counterparty,
    DocumentKind, DocumentRecord, EInvoiceGenerator, Engine, EngineConfig, Money, NewDocument,
    NewPosting, NewStructure, PdfRenderer, Percent, Project, Quantity, RenderedPdf,
    StructureNode, StructurePatch,
};
use migration::MigratorTrait;

#[derive(Default)]
pub struct FakePdf {
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl PdfRenderer for FakePdf {
    async fn render(
        &self,
        kind: DocumentKind,
        document_id: Uuid,
        _template_id: Option<&str>,
    ) -> Result<RenderedPdf, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("renderer down".to_string()));
        }
        Ok(RenderedPdf {
            bytes: format!("%PDF {kind} {document_id}").into_bytes(),
            template_used: "template-v1".to_string(),
            theme_used: "theme-blue".to_string(),
        })
    }
}

#[derive(Default)]
pub struct FakeXml {
    pub failure: Mutex<Option<CollaboratorError>>,
    pub calls: AtomicUsize,
}

impl FakeXml {
    pub fn fail_with(&self, err: CollaboratorError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }
}

#[async_trait]
impl EInvoiceGenerator for FakeXml {
    async fn generate(
        &self,
        _kind: DocumentKind,
        record: &DocumentRecord,
    ) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(format!(
            "<Invoice><Number>{}</Number><Net>{}</Net><Lines>{}</Lines></Invoice>",
            record.document.number.as_deref().unwrap_or_default(),
            record.document.totals.total_net,
            record.allocations.len()
        ))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub artifacts: Mutex<HashMap<String, Vec<u8>>>,
    pub fail_delete: AtomicBool,
}

impl MemoryStore {
    pub fn len(&self) -> usize {
        self.artifacts.lock().unwrap().len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.artifacts.lock().unwrap().contains_key(id)
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn store(
        &self,
        content: Vec<u8>,
        _content_type: &str,
        _owner_id: Uuid,
    ) -> Result<ArtifactRef, CollaboratorError> {
        let id = Uuid::new_v4().to_string();
        let artifact = ArtifactRef {
            id: id.clone(),
            content_hash: format!("len-{}", content.len()),
            size_bytes: content.len() as u64,
        };
        self.artifacts.lock().unwrap().insert(id, content);
        Ok(artifact)
    }

    async fn delete(&self, artifact_id: &str) -> Result<(), CollaboratorError> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("store down".to_string()));
        }
        self.artifacts.lock().unwrap().remove(artifact_id);
        Ok(())
    }
}

pub struct World {
    pub engine: Engine,
    pub db: DatabaseConnection,
    pub pdf: Arc<FakePdf>,
    pub xml: Arc<FakeXml>,
    pub store: Arc<MemoryStore>,
}

pub async fn memory_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    db
}

/// A migrated SQLite file under `target/test_dbs`, served by a pool of
/// several connections.
pub async fn file_db() -> (DatabaseConnection, PathBuf) {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../target/test_dbs");
    std::fs::create_dir_all(&root).unwrap();

    let path = root.join(format!("ledger_{}.db", Uuid::new_v4()));
    let mut options = ConnectOptions::new(format!("sqlite:{}?mode=rwc", path.display()));
    options.max_connections(8).min_connections(2);

    let db = Database::connect(options).await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    (db, path)
}

pub async fn engine_with(
    db: &DatabaseConnection,
    config: EngineConfig,
    pdf: Arc<dyn PdfRenderer>,
    xml: Arc<FakeXml>,
    store: Arc<MemoryStore>,
) -> Engine {
    Engine::builder()
        .database(db.clone())
        .config(config)
        .pdf_renderer(pdf)
        .einvoice_generator(xml)
        .artifact_store(store)
        .build()
        .await
        .unwrap()
}

pub async fn world() -> World {
    let db = memory_db().await;
    let pdf = Arc::new(FakePdf::default());
    let xml = Arc::new(FakeXml::default());
    let store = Arc::new(MemoryStore::default());
    let engine = engine_with(
        &db,
        EngineConfig::default(),
        pdf.clone(),
        xml.clone(),
        store.clone(),
    )
    .await;
    World {
        engine,
        db,
        pdf,
        xml,
        store,
    }
}

pub fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 15).unwrap()
}

pub async fn project(engine: &Engine) -> Project {
    engine.create_project("acme", "Office refit").await.unwrap()
}

/// A performance node with `revenue` of which `completion` percent is done.
pub async fn performance_node(
    engine: &Engine,
    project_id: Uuid,
    revenue: i64,
    completion: i64,
    extras: i64,
) -> StructureNode {
    let node = engine
        .create_structure(NewStructure {
            project_id,
            parent_id: None,
            name: "Drywall".to_string(),
            billing_mode: BillingMode::Performance,
            extras_percent: Percent::whole(extras),
            revenue: Money::new(revenue),
        })
        .await
        .unwrap();
    engine
        .update_structure(
            node.id,
            StructurePatch {
                revenue_completion_percent: Some(Percent::whole(completion)),
                ..StructurePatch::default()
            },
        )
        .await
        .unwrap()
}

pub async fn posting_node(engine: &Engine, project_id: Uuid, extras: i64) -> StructureNode {
    engine
        .create_structure(NewStructure {
            project_id,
            parent_id: None,
            name: "Site work".to_string(),
            billing_mode: BillingMode::PostingBased,
            extras_percent: Percent::whole(extras),
            revenue: Money::ZERO,
        })
        .await
        .unwrap()
}

/// `hours` hours at 40.00 internal / 80.00 external.
pub fn hours(project_id: Uuid, structure_id: Uuid, hours: i64) -> NewPosting {
    NewPosting {
        project_id,
        structure_id,
        worker_id: "w-anna".to_string(),
        performed_on: day(),
        description: Some("installation".to_string()),
        role: None,
        quantity: Quantity::whole(hours),
        internal_rate: Money::new(40_00),
        external_rate: Money::new(80_00),
    }
}

pub async fn draft(engine: &Engine, project_id: Uuid, kind: DocumentKind) -> BillingDocument {
    engine
        .init_document(NewDocument {
            kind,
            project_id,
            issue_date: day(),
            vat_ref: "standard".to_string(),
            counterparty: Counterparty {
                name: "Buyer AG".to_string(),
                vat_id: Some("DE123456789".to_string()),
                ..Counterparty::default()
            },
            template_id: None,
        })
        .await
        .unwrap()
}

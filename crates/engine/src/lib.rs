//! Billing ledger engine.
//!
//! Tracks billable work (postings) against a per-project structure tree and
//! keeps interim (partial payment) and final invoices consistent with it:
//!
//! - structure aggregates are derived from postings
//! - billing documents are allocated across structure nodes
//! - booking numbers, snapshots and propagates a document into project and
//!   structure running totals
//!
//! All operations live on [`Engine`].

pub use allocations::{Allocation, distribute};
pub use collaborators::{
    ArtifactRef, ArtifactStore, DbPresetResolver, DocumentRecord, EInvoiceGenerator, PdfRenderer,
    PresetResolver, RenderedPdf, StaticVatTable, Unconfigured, VatLookup,
};
pub use config::{CapPolicy, EngineConfig, NumberingConfig};
pub use counters::NumberFamily;
pub use documents::{
    BillingDocument, Counterparty, DocumentKind, DocumentStatus, DocumentTotals,
};
pub use error::{CollaboratorError, EngineError};
pub use money::{Money, Percent, Quantity};
pub use ops::{
    BillingProposal, DocumentPatch, DocumentPostings, DocumentSnapshot, Engine, EngineBuilder,
    NewDocument, NewPosting, NewStructure, PostingPatch, StructurePatch,
};
pub use postings::{Posting, PostingLink};
pub use projects::Project;
pub use rate_presets::RatePreset;
pub use snapshots::{Snapshot, SnapshotFormat};
pub use structures::{BillingMode, StructureNode};

mod allocations;
mod collaborators;
mod config;
mod counters;
mod documents;
mod error;
mod money;
mod ops;
mod postings;
mod projects;
mod rate_presets;
mod snapshots;
mod structures;
mod util;

type ResultEngine<T> = Result<T, EngineError>;

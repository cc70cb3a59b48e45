mod common;

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, atomic::Ordering},
    time::Duration,
};

use async_trait::async_trait;
use sea_orm::{ConnectionTrait, Statement};
use uuid::Uuid;

use ledger_engine::{
    CollaboratorError, DocumentKind, DocumentPatch, DocumentSnapshot, DocumentStatus, Engine,
    EngineConfig, EngineError, Money, PdfRenderer, PostingPatch, Quantity, RenderedPdf,
};

use common::{
    FakePdf, FakeXml, MemoryStore, draft, engine_with, file_db, hours, memory_db,
    performance_node, posting_node, project, world,
};

/// Changes the performance amount of the document while rendering it.
#[derive(Default)]
struct EditingPdf {
    inner: FakePdf,
    edit: Mutex<Option<(Engine, Money)>>,
}

#[async_trait]
impl PdfRenderer for EditingPdf {
    async fn render(
        &self,
        kind: DocumentKind,
        document_id: Uuid,
        template_id: Option<&str>,
    ) -> Result<RenderedPdf, CollaboratorError> {
        let edit = self.edit.lock().unwrap().take();
        if let Some((engine, amount)) = edit {
            engine
                .apply_performance_amount(document_id, amount)
                .await
                .unwrap();
        }
        self.inner.render(kind, document_id, template_id).await
    }
}

struct SlowPdf(Duration);

#[async_trait]
impl PdfRenderer for SlowPdf {
    async fn render(
        &self,
        _kind: DocumentKind,
        _document_id: Uuid,
        _template_id: Option<&str>,
    ) -> Result<RenderedPdf, CollaboratorError> {
        tokio::time::sleep(self.0).await;
        Ok(RenderedPdf {
            bytes: b"%PDF late".to_vec(),
            template_used: "template-v1".to_string(),
            theme_used: "theme-blue".to_string(),
        })
    }
}

fn rows(allocations: &[ledger_engine::Allocation]) -> Vec<(uuid::Uuid, Money, Money)> {
    let mut rows: Vec<_> = allocations
        .iter()
        .map(|a| (a.structure_id, a.net, a.extras_net))
        .collect();
    rows.sort();
    rows
}

#[tokio::test]
async fn proposal_is_computed_once() {
    let w = world().await;
    let project = project(&w.engine).await;
    let perf = performance_node(&w.engine, project.id, 1000_00, 50, 10).await;
    let site = posting_node(&w.engine, project.id, 0).await;
    let p1 = w.engine.create_posting(hours(project.id, site.id, 2)).await.unwrap();
    let p2 = w.engine.create_posting(hours(project.id, site.id, 1)).await.unwrap();

    let doc = draft(&w.engine, project.id, DocumentKind::PartialPayment).await;
    let first = w.engine.billing_proposal(doc.id).await.unwrap();

    let mut assigned = first.newly_assigned.clone();
    assigned.sort();
    let mut expected = vec![p1.id, p2.id];
    expected.sort();
    assert_eq!(assigned, expected);
    assert_eq!(
        rows(&first.allocations),
        {
            let mut r = vec![
                (perf.id, Money::new(500_00), Money::new(50_00)),
                (site.id, Money::new(240_00), Money::ZERO),
            ];
            r.sort();
            r
        }
    );
    assert_eq!(first.document.totals.amount_net, Money::new(740_00));
    assert_eq!(first.document.totals.amount_extras_net, Money::new(50_00));
    assert_eq!(first.document.totals.total_net, Money::new(790_00));
    assert_eq!(first.document.totals.tax, Money::new(150_10));

    let second = w.engine.billing_proposal(doc.id).await.unwrap();
    assert!(second.newly_assigned.is_empty());
    assert_eq!(rows(&second.allocations), rows(&first.allocations));
    assert_eq!(second.document.totals, first.document.totals);
}

#[tokio::test]
async fn cap_is_a_per_kind_policy() {
    let w = world().await;
    let project = project(&w.engine).await;
    performance_node(&w.engine, project.id, 1000_00, 50, 0).await;

    let pp = draft(&w.engine, project.id, DocumentKind::PartialPayment).await;
    let err = w
        .engine
        .apply_performance_amount(pp.id, Money::new(600_00))
        .await
        .unwrap_err();
    assert!(err.is_validation());
    // One cent of rounding tolerance.
    let rows = w
        .engine
        .apply_performance_amount(pp.id, Money::new(500_01))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].net, Money::new(500_01));

    let invoice = draft(&w.engine, project.id, DocumentKind::Invoice).await;
    let rows = w
        .engine
        .apply_performance_amount(invoice.id, Money::new(600_00))
        .await
        .unwrap();
    assert_eq!(rows.iter().map(|r| r.net).sum::<Money>(), Money::new(600_00));
}

#[tokio::test]
async fn performance_amount_is_split_proportionally() {
    let w = world().await;
    let project = project(&w.engine).await;
    let a = performance_node(&w.engine, project.id, 100_00, 100, 0).await;
    let b = performance_node(&w.engine, project.id, 50_00, 100, 20).await;

    let doc = draft(&w.engine, project.id, DocumentKind::PartialPayment).await;
    let rows = w
        .engine
        .apply_performance_amount(doc.id, Money::new(75_00))
        .await
        .unwrap();
    let by_node = |id| rows.iter().find(|r| r.structure_id == id).unwrap();
    assert_eq!(by_node(a.id).net, Money::new(50_00));
    assert_eq!(by_node(b.id).net, Money::new(25_00));
    assert_eq!(by_node(b.id).extras_net, Money::new(5_00));

    // Replaces instead of accumulating.
    let rows = w
        .engine
        .apply_performance_amount(doc.id, Money::new(15_00))
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    let doc = w.engine.document(doc.id).await.unwrap();
    assert_eq!(doc.totals.amount_net, Money::new(15_00));
}

#[tokio::test]
async fn booked_documents_reduce_remaining_amount() {
    let w = world().await;
    let project = project(&w.engine).await;
    let perf = performance_node(&w.engine, project.id, 1000_00, 50, 0).await;

    let first = draft(&w.engine, project.id, DocumentKind::PartialPayment).await;
    w.engine
        .apply_performance_amount(first.id, Money::new(300_00))
        .await
        .unwrap();
    w.engine.book_document(first.id).await.unwrap();

    let second = draft(&w.engine, project.id, DocumentKind::PartialPayment).await;
    let proposal = w.engine.billing_proposal(second.id).await.unwrap();
    assert_eq!(proposal.allocations.len(), 1);
    assert_eq!(proposal.allocations[0].structure_id, perf.id);
    assert_eq!(proposal.allocations[0].net, Money::new(200_00));

    let err = w
        .engine
        .apply_performance_amount(second.id, Money::new(250_00))
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn no_remaining_amount_only_accepts_zero() {
    let w = world().await;
    let project = project(&w.engine).await;
    performance_node(&w.engine, project.id, 1000_00, 0, 0).await;

    let invoice = draft(&w.engine, project.id, DocumentKind::Invoice).await;
    let rows = w
        .engine
        .apply_performance_amount(invoice.id, Money::ZERO)
        .await
        .unwrap();
    assert!(rows.is_empty());
    let err = w
        .engine
        .apply_performance_amount(invoice.id, Money::new(1))
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn posting_is_held_by_one_document_at_a_time() {
    let w = world().await;
    let project = project(&w.engine).await;
    let site = posting_node(&w.engine, project.id, 0).await;
    let posting = w.engine.create_posting(hours(project.id, site.id, 3)).await.unwrap();

    let invoice = draft(&w.engine, project.id, DocumentKind::Invoice).await;
    let pp = draft(&w.engine, project.id, DocumentKind::PartialPayment).await;

    let held = w
        .engine
        .set_posting_assignment(invoice.id, &[posting.id], &[])
        .await
        .unwrap();
    assert_eq!(held.assigned.len(), 1);
    assert!(held.available.is_empty());

    let err = w
        .engine
        .set_posting_assignment(pp.id, &[posting.id], &[])
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(w.engine.document_allocations(pp.id).await.unwrap().is_empty());

    w.engine
        .set_posting_assignment(invoice.id, &[], &[posting.id])
        .await
        .unwrap();
    let invoice_doc = w.engine.document(invoice.id).await.unwrap();
    assert_eq!(invoice_doc.totals.total_net, Money::ZERO);

    let moved = w
        .engine
        .set_posting_assignment(pp.id, &[posting.id], &[])
        .await
        .unwrap();
    assert_eq!(moved.assigned[0].link.kind(), Some(DocumentKind::PartialPayment));
    let pp_doc = w.engine.document(pp.id).await.unwrap();
    assert_eq!(pp_doc.totals.amount_net, Money::new(240_00));
}

#[tokio::test]
async fn booking_propagates_totals_exactly_once() {
    let w = world().await;
    let project = project(&w.engine).await;
    let perf = performance_node(&w.engine, project.id, 1000_00, 100, 0).await;

    let invoice = draft(&w.engine, project.id, DocumentKind::Invoice).await;
    w.engine
        .apply_performance_amount(invoice.id, Money::new(1000_00))
        .await
        .unwrap();

    let booked = w.engine.book_document(invoice.id).await.unwrap();
    assert_eq!(booked.status, DocumentStatus::Booked);
    assert_eq!(booked.number.as_deref(), Some("INV-2026-0001"));
    assert_eq!(booked.totals.total_net, Money::new(1000_00));
    assert_eq!(booked.totals.tax, Money::new(190_00));
    assert_eq!(booked.totals.total_gross, Money::new(1190_00));
    assert_eq!(booked.template_snapshot.as_deref(), Some("template-v1"));
    assert_eq!(booked.theme_snapshot.as_deref(), Some("theme-blue"));
    assert!(booked.booked_at.is_some());
    assert_eq!(w.store.len(), 2);
    assert_eq!(w.engine.document_snapshots(invoice.id).await.unwrap().len(), 2);

    let project_after = w.engine.project(project.id).await.unwrap();
    assert_eq!(project_after.invoiced, Money::new(1000_00));
    assert_eq!(project_after.partially_billed, Money::ZERO);
    let node = w.engine.structure(perf.id).await.unwrap();
    assert_eq!(node.invoiced, Money::new(1000_00));

    let err = w.engine.book_document(invoice.id).await.unwrap_err();
    assert!(err.is_conflict());
    let project_again = w.engine.project(project.id).await.unwrap();
    assert_eq!(project_again.invoiced, Money::new(1000_00));
    assert_eq!(w.store.len(), 2);
}

#[tokio::test]
async fn both_kinds_share_one_number_sequence() {
    let w = world().await;
    let project = project(&w.engine).await;
    performance_node(&w.engine, project.id, 1000_00, 100, 0).await;

    let pp = draft(&w.engine, project.id, DocumentKind::PartialPayment).await;
    w.engine
        .apply_performance_amount(pp.id, Money::new(100_00))
        .await
        .unwrap();
    let pp = w.engine.book_document(pp.id).await.unwrap();

    let invoice = draft(&w.engine, project.id, DocumentKind::Invoice).await;
    w.engine.billing_proposal(invoice.id).await.unwrap();
    let invoice = w.engine.book_document(invoice.id).await.unwrap();

    assert_eq!(pp.number.as_deref(), Some("PP-2026-0001"));
    assert_eq!(invoice.number.as_deref(), Some("INV-2026-0002"));
    let project = w.engine.project(project.id).await.unwrap();
    assert_eq!(project.partially_billed, Money::new(100_00));
    assert_eq!(project.invoiced, Money::new(900_00));
}

#[tokio::test]
async fn booked_document_rejects_every_edit() {
    let w = world().await;
    let project = project(&w.engine).await;
    let site = posting_node(&w.engine, project.id, 0).await;
    let posting = w.engine.create_posting(hours(project.id, site.id, 2)).await.unwrap();

    let invoice = draft(&w.engine, project.id, DocumentKind::Invoice).await;
    w.engine.billing_proposal(invoice.id).await.unwrap();
    let booked = w.engine.book_document(invoice.id).await.unwrap();

    let patch = DocumentPatch {
        vat_ref: Some("reduced".to_string()),
        ..DocumentPatch::default()
    };
    assert!(w.engine.update_document(invoice.id, patch).await.unwrap_err().is_conflict());
    assert!(
        w.engine
            .apply_performance_amount(invoice.id, Money::ZERO)
            .await
            .unwrap_err()
            .is_conflict()
    );
    assert!(
        w.engine
            .set_posting_assignment(invoice.id, &[], &[posting.id])
            .await
            .unwrap_err()
            .is_conflict()
    );
    assert!(w.engine.delete_document(invoice.id).await.unwrap_err().is_conflict());

    let posting_patch = PostingPatch {
        quantity: Some(Quantity::whole(5)),
        ..PostingPatch::default()
    };
    assert!(
        w.engine
            .update_posting(posting.id, posting_patch)
            .await
            .unwrap_err()
            .is_conflict()
    );
    assert!(w.engine.delete_posting(posting.id).await.unwrap_err().is_conflict());

    let after = w.engine.document(invoice.id).await.unwrap();
    assert_eq!(after.totals, booked.totals);
    assert_eq!(after.vat_percent, booked.vat_percent);
}

#[tokio::test]
async fn xml_failure_discards_pdf_and_keeps_draft() {
    let w = world().await;
    let project = project(&w.engine).await;
    performance_node(&w.engine, project.id, 1000_00, 100, 0).await;
    let invoice = draft(&w.engine, project.id, DocumentKind::Invoice).await;
    w.engine.billing_proposal(invoice.id).await.unwrap();

    w.xml
        .fail_with(CollaboratorError::Validation("buyer address is missing".to_string()));
    let err = w.engine.book_document(invoice.id).await.unwrap_err();
    assert_eq!(
        err,
        EngineError::Validation("buyer address is missing".to_string())
    );
    assert_eq!(w.store.len(), 0);

    let doc = w.engine.document(invoice.id).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Draft);
    assert!(doc.template_snapshot.is_none());
    assert!(w.engine.document_snapshots(invoice.id).await.unwrap().is_empty());
    assert_eq!(w.engine.project(project.id).await.unwrap().invoiced, Money::ZERO);
    // The number is kept for the retry.
    assert_eq!(doc.number.as_deref(), Some("INV-2026-0001"));

    w.xml.recover();
    let booked = w.engine.book_document(invoice.id).await.unwrap();
    assert_eq!(booked.number.as_deref(), Some("INV-2026-0001"));
    assert_eq!(w.store.len(), 2);
    assert_eq!(w.engine.project(project.id).await.unwrap().invoiced, Money::new(1000_00));
}

#[tokio::test]
async fn renderer_failure_is_a_dependency_error() {
    let w = world().await;
    let project = project(&w.engine).await;
    performance_node(&w.engine, project.id, 1000_00, 100, 0).await;
    let invoice = draft(&w.engine, project.id, DocumentKind::Invoice).await;

    w.pdf.fail.store(true, Ordering::SeqCst);
    let err = w.engine.book_document(invoice.id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Dependency {
            step: "pdf rendering",
            source: CollaboratorError::Unavailable(_)
        }
    ));
    assert_eq!(w.xml.calls.load(Ordering::SeqCst), 0);
    assert_eq!(w.store.len(), 0);
}

#[tokio::test]
async fn failed_compensation_surfaces_inconsistency() {
    let w = world().await;
    let project = project(&w.engine).await;
    performance_node(&w.engine, project.id, 1000_00, 100, 0).await;
    let invoice = draft(&w.engine, project.id, DocumentKind::Invoice).await;

    w.xml
        .fail_with(CollaboratorError::Unavailable("generator down".to_string()));
    w.store.fail_delete.store(true, Ordering::SeqCst);
    let err = w.engine.book_document(invoice.id).await.unwrap_err();
    assert!(matches!(err, EngineError::Inconsistency(_)));
    assert_eq!(w.store.len(), 1);
    let doc = w.engine.document(invoice.id).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Draft);
}

#[tokio::test]
async fn booked_snapshots_are_never_regenerated() {
    let w = world().await;
    let project = project(&w.engine).await;
    performance_node(&w.engine, project.id, 1000_00, 100, 0).await;
    let invoice = draft(&w.engine, project.id, DocumentKind::Invoice).await;
    w.engine.billing_proposal(invoice.id).await.unwrap();

    let preview = w.engine.document_pdf(invoice.id, false).await.unwrap();
    assert!(matches!(preview, DocumentSnapshot::Rendered { content_type: "application/pdf", .. }));
    assert_eq!(w.store.len(), 0);

    w.engine.book_document(invoice.id).await.unwrap();
    let renders = w.pdf.calls.load(Ordering::SeqCst);
    let DocumentSnapshot::Stored(pdf) = w.engine.document_pdf(invoice.id, false).await.unwrap()
    else {
        panic!("booked document must serve its stored pdf");
    };
    assert!(w.store.contains(&pdf.id));
    assert_eq!(w.pdf.calls.load(Ordering::SeqCst), renders);

    let rendered = w.engine.document_pdf(invoice.id, true).await.unwrap();
    assert!(matches!(rendered, DocumentSnapshot::Rendered { .. }));
    assert_eq!(w.store.len(), 2);

    // Simulate a booked document whose XML snapshot went missing.
    let backend = w.db.get_database_backend();
    w.db.execute(Statement::from_sql_and_values(
        backend,
        "DELETE FROM document_snapshots WHERE document_id = ? AND format = ?",
        vec![invoice.id.to_string().into(), "einvoice_xml".into()],
    ))
    .await
    .unwrap();

    let err = w.engine.document_xml(invoice.id, false).await.unwrap_err();
    assert!(err.is_conflict());

    let created = w.engine.create_xml_snapshot(invoice.id).await.unwrap();
    let again = w.engine.create_xml_snapshot(invoice.id).await.unwrap();
    assert_eq!(created, again);
    assert_eq!(
        w.engine.document_xml(invoice.id, false).await.unwrap(),
        DocumentSnapshot::Stored(created)
    );
}

#[tokio::test]
async fn xml_snapshot_requires_a_booked_document() {
    let w = world().await;
    let project = project(&w.engine).await;
    let invoice = draft(&w.engine, project.id, DocumentKind::Invoice).await;
    let err = w.engine.create_xml_snapshot(invoice.id).await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(w.store.len(), 0);
}

#[tokio::test]
async fn vat_change_recomputes_tax_from_stored_net() {
    let w = world().await;
    let project = project(&w.engine).await;
    performance_node(&w.engine, project.id, 1000_00, 100, 0).await;
    let invoice = draft(&w.engine, project.id, DocumentKind::Invoice).await;
    w.engine.billing_proposal(invoice.id).await.unwrap();

    let doc = w
        .engine
        .update_document(
            invoice.id,
            DocumentPatch {
                vat_ref: Some("reduced".to_string()),
                ..DocumentPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(doc.totals.total_net, Money::new(1000_00));
    assert_eq!(doc.totals.tax, Money::new(70_00));
    assert_eq!(doc.totals.total_gross, Money::new(1070_00));

    let err = w
        .engine
        .update_document(
            invoice.id,
            DocumentPatch {
                vat_ref: Some("luxury".to_string()),
                ..DocumentPatch::default()
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn deleting_a_draft_releases_its_postings() {
    let w = world().await;
    let project = project(&w.engine).await;
    let site = posting_node(&w.engine, project.id, 0).await;
    let posting = w.engine.create_posting(hours(project.id, site.id, 2)).await.unwrap();

    let invoice = draft(&w.engine, project.id, DocumentKind::Invoice).await;
    w.engine.billing_proposal(invoice.id).await.unwrap();
    w.engine.delete_document(invoice.id).await.unwrap();

    assert!(w.engine.document(invoice.id).await.unwrap_err().is_not_found());
    let posting = w.engine.posting(posting.id).await.unwrap();
    assert!(posting.link.is_unassigned());

    let next = draft(&w.engine, project.id, DocumentKind::PartialPayment).await;
    let proposal = w.engine.billing_proposal(next.id).await.unwrap();
    assert_eq!(proposal.newly_assigned, vec![posting.id]);
}

#[tokio::test]
async fn duplicate_document_number_is_a_conflict() {
    let w = world().await;
    let project = project(&w.engine).await;
    let a = draft(&w.engine, project.id, DocumentKind::Invoice).await;
    let b = draft(&w.engine, project.id, DocumentKind::Invoice).await;

    let number = |n: &str| DocumentPatch {
        number: Some(n.to_string()),
        ..DocumentPatch::default()
    };
    w.engine.update_document(a.id, number("MAN-1")).await.unwrap();
    let err = w.engine.update_document(b.id, number("MAN-1")).await.unwrap_err();
    assert!(err.is_conflict());
}

#[tokio::test]
async fn edit_while_rendering_aborts_booking() {
    let db = memory_db().await;
    let pdf = Arc::new(EditingPdf::default());
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

    let project = project(&engine).await;
    let perf = performance_node(&engine, project.id, 1000_00, 100, 0).await;
    let invoice = draft(&engine, project.id, DocumentKind::Invoice).await;
    engine.billing_proposal(invoice.id).await.unwrap();

    *pdf.edit.lock().unwrap() = Some((engine.clone(), Money::new(400_00)));
    let err = engine.book_document(invoice.id).await.unwrap_err();
    assert!(err.is_conflict());
    assert!(err.to_string().contains("changed while it was being booked"));
    assert_eq!(xml.calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.len(), 0);

    let doc = engine.document(invoice.id).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Draft);
    assert!(doc.template_snapshot.is_none());
    assert_eq!(doc.totals.total_net, Money::new(400_00));
    assert!(engine.document_snapshots(invoice.id).await.unwrap().is_empty());
    assert_eq!(engine.project(project.id).await.unwrap().invoiced, Money::ZERO);
    assert_eq!(engine.structure(perf.id).await.unwrap().invoiced, Money::ZERO);

    let booked = engine.book_document(invoice.id).await.unwrap();
    assert_eq!(booked.totals.total_net, Money::new(400_00));
    assert_eq!(store.len(), 2);
    assert_eq!(
        engine.project(project.id).await.unwrap().invoiced,
        Money::new(400_00)
    );
    assert_eq!(
        engine.structure(perf.id).await.unwrap().invoiced,
        Money::new(400_00)
    );
}

#[tokio::test]
async fn slow_renderer_times_out() {
    let db = memory_db().await;
    let xml = Arc::new(FakeXml::default());
    let store = Arc::new(MemoryStore::default());
    let config = EngineConfig {
        render_timeout: Duration::from_millis(20),
        ..EngineConfig::default()
    };
    let engine = engine_with(
        &db,
        config,
        Arc::new(SlowPdf(Duration::from_millis(500))),
        xml.clone(),
        store.clone(),
    )
    .await;

    let project = project(&engine).await;
    performance_node(&engine, project.id, 1000_00, 100, 0).await;
    let invoice = draft(&engine, project.id, DocumentKind::Invoice).await;
    engine.billing_proposal(invoice.id).await.unwrap();

    let err = engine.book_document(invoice.id).await.unwrap_err();
    assert_eq!(
        err,
        EngineError::Dependency {
            step: "pdf rendering",
            source: CollaboratorError::Timeout(Duration::from_millis(20)),
        }
    );
    assert_eq!(xml.calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.len(), 0);
    let doc = engine.document(invoice.id).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Draft);
    assert_eq!(engine.project(project.id).await.unwrap().invoiced, Money::ZERO);
}

#[tokio::test]
async fn repeated_posting_ids_are_assigned_once() {
    let w = world().await;
    let project = project(&w.engine).await;
    let site = posting_node(&w.engine, project.id, 0).await;
    let posting = w.engine.create_posting(hours(project.id, site.id, 2)).await.unwrap();
    let invoice = draft(&w.engine, project.id, DocumentKind::Invoice).await;

    let postings = w
        .engine
        .set_posting_assignment(invoice.id, &[posting.id, posting.id], &[])
        .await
        .unwrap();
    assert_eq!(postings.assigned.len(), 1);
    assert_eq!(
        w.engine.document(invoice.id).await.unwrap().totals.amount_net,
        Money::new(160_00)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_proposals_never_share_a_posting() {
    let (db, path) = file_db().await;
    let engine = engine_with(
        &db,
        EngineConfig::default(),
        Arc::new(FakePdf::default()),
        Arc::new(FakeXml::default()),
        Arc::new(MemoryStore::default()),
    )
    .await;

    let project = project(&engine).await;
    let site = posting_node(&engine, project.id, 0).await;
    for h in 1..=6 {
        engine.create_posting(hours(project.id, site.id, h)).await.unwrap();
    }
    let mut drafts = Vec::new();
    for _ in 0..4 {
        drafts.push(draft(&engine, project.id, DocumentKind::PartialPayment).await.id);
    }

    let mut tasks = tokio::task::JoinSet::new();
    for document_id in drafts {
        let engine = engine.clone();
        tasks.spawn(async move { (document_id, engine.billing_proposal(document_id).await) });
    }

    // Losing a race may surface as a conflict or a busy database; a posting
    // is never reported as claimed by two documents.
    let mut claimed = HashSet::new();
    while let Some(joined) = tasks.join_next().await {
        let (document_id, result) = joined.unwrap();
        let Ok(proposal) = result else { continue };
        for posting_id in proposal.newly_assigned {
            assert!(claimed.insert(posting_id));
            let posting = engine.posting(posting_id).await.unwrap();
            assert_eq!(posting.link.document_id(), Some(document_id));
        }
    }

    drop(engine);
    drop(db);
    let _ = std::fs::remove_file(path);
}

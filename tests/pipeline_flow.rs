//! End-to-end tests of the generation pipeline on a temporary SQLite file.
//!
//! Run with: cargo test --test pipeline_flow

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use folio_forge::assets::{AssetSource, ExtractiveRecap, Recap};
use folio_forge::catalog::{Book, BookImport, Catalog, Chapter, ChapterImport, CharacterImport};
use folio_forge::config::PipelineConfig;
use folio_forge::error::GeneratorError;
use folio_forge::orchestrator::Orchestrator;
use folio_forge::pipeline::{
    AssetKind, AssetRequest, GenerationStatus, Generator, Outbox, Pipeline, PipelineParts,
    PipelineSettings, RequestOutcome, TargetRepository, UnitOfWork,
};
use folio_forge::storage::Database;

const ALICE: &str = "Alice was beginning to get very tired of sitting by her sister. \
    Then she saw the White Rabbit run close by her. The White Rabbit took a watch out of its \
    pocket. Alice started to her feet and ran across the field after the White Rabbit.";

/// Recap generator with switchable availability and failure, tracking how
/// many calls overlap.
#[derive(Default)]
struct ScriptedRecaps {
    unavailable: AtomicBool,
    failing: AtomicBool,
    delay_ms: u64,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedRecaps {
    fn with_delay(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator<Chapter, Recap> for ScriptedRecaps {
    fn name(&self) -> &str {
        "scripted-recap"
    }

    async fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    async fn generate(&self, chapter: &Chapter) -> Result<Recap, GeneratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            return Err(GeneratorError::Provider("model overloaded".to_string()));
        }
        Ok(Recap {
            summary: format!("Recap of {}", chapter.title),
            key_points: vec!["Something happened".to_string()],
            source: AssetSource::Generated,
        })
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    db: Database,
    catalog: Catalog,
    book: Book,
    chapters: Vec<Chapter>,
}

async fn fixture(chapter_count: usize) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Database::open_path(&dir.path().join("folio.db"))
        .await
        .expect("open database");
    let catalog = Catalog::new(db.clone());

    let import = BookImport {
        title: "Alice's Adventures in Wonderland".to_string(),
        author: Some("Lewis Carroll".to_string()),
        chapters: (1..=chapter_count)
            .map(|n| ChapterImport {
                title: format!("Chapter {}", n),
                text: ALICE.to_string(),
            })
            .collect(),
        characters: vec![CharacterImport {
            name: "Alice".to_string(),
            description: "A curious girl".to_string(),
        }],
    };
    let book = catalog.import_book(&import).await.expect("import book");
    let chapters = catalog.chapters(book.id).await.expect("list chapters");

    Fixture {
        _dir: dir,
        db,
        catalog,
        book,
        chapters,
    }
}

fn recap_pipeline(
    fx: &Fixture,
    generator: Arc<ScriptedRecaps>,
    settings: PipelineSettings,
) -> Pipeline<Chapter, Recap> {
    let targets: Arc<dyn TargetRepository<Chapter>> = Arc::new(fx.catalog.clone());
    Pipeline::new(
        AssetKind::Recap,
        fx.db.clone(),
        PipelineParts::<Chapter, Recap>::new(
            targets,
            generator,
            Arc::new(ExtractiveRecap::default()),
        ),
        settings.with_shutdown_timeout(Duration::from_secs(5)),
    )
}

async fn request(pipeline: &Pipeline<Chapter, Recap>, target_id: i64) -> RequestOutcome {
    let mut outbox = Outbox::new();
    let outcome = pipeline
        .request(target_id, &mut outbox)
        .await
        .expect("request");
    outbox.flush().await;
    outcome
}

async fn wait_for_status(
    pipeline: &Pipeline<Chapter, Recap>,
    target_id: i64,
    status: GenerationStatus,
) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let view = pipeline.status(target_id).await.expect("status");
        if view.as_ref().map(|v| v.status) == Some(status) {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "target {} never reached {}, last seen {:?}",
            target_id,
            status,
            view
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_request_generates_and_completes() {
    let fx = fixture(1).await;
    let generator = Arc::new(ScriptedRecaps::default());
    let pipeline = recap_pipeline(&fx, Arc::clone(&generator), PipelineSettings::default());
    pipeline.start().await.expect("start");

    let chapter = &fx.chapters[0];
    assert_eq!(request(&pipeline, chapter.id).await, RequestOutcome::Scheduled);
    wait_for_status(&pipeline, chapter.id, GenerationStatus::Completed).await;

    let view = pipeline.status(chapter.id).await.unwrap().unwrap();
    assert!(view.ready);
    assert!(view.generated_at.is_some());
    let recap: Recap = serde_json::from_str(view.output_ref.as_deref().unwrap()).unwrap();
    assert_eq!(recap.summary, "Recap of Chapter 1");
    assert_eq!(recap.source, AssetSource::Generated);

    pipeline.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_worker_processes_one_item_at_a_time() {
    let fx = fixture(4).await;
    let generator = Arc::new(ScriptedRecaps::with_delay(40));
    let pipeline = recap_pipeline(&fx, Arc::clone(&generator), PipelineSettings::default());
    pipeline.start().await.expect("start");

    for chapter in &fx.chapters {
        request(&pipeline, chapter.id).await;
    }
    for chapter in &fx.chapters {
        wait_for_status(&pipeline, chapter.id, GenerationStatus::Completed).await;
    }

    assert_eq!(generator.calls(), 4);
    assert_eq!(generator.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.stats().completed, 4);
    pipeline.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_completed_record_is_not_regenerated() {
    let fx = fixture(1).await;
    let generator = Arc::new(ScriptedRecaps::default());
    let pipeline = recap_pipeline(&fx, Arc::clone(&generator), PipelineSettings::default());
    pipeline.start().await.expect("start");

    let id = fx.chapters[0].id;
    request(&pipeline, id).await;
    wait_for_status(&pipeline, id, GenerationStatus::Completed).await;

    let mut outbox = Outbox::new();
    let outcome = pipeline.request(id, &mut outbox).await.unwrap();
    assert_eq!(outcome, RequestOutcome::AlreadyCompleted);
    assert!(outbox.is_empty());

    // A stray duplicate id in the queue is skipped by the worker.
    pipeline.queue().enqueue(id).await;
    let deadline = Instant::now() + Duration::from_secs(5);
    while pipeline.stats().skipped == 0 {
        assert!(Instant::now() < deadline, "stray id was never popped");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(generator.calls(), 1);

    pipeline.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_regenerate_resets_completed_record() {
    let fx = fixture(1).await;
    let generator = Arc::new(ScriptedRecaps::default());
    let pipeline = recap_pipeline(&fx, Arc::clone(&generator), PipelineSettings::default());
    pipeline.start().await.expect("start");

    let id = fx.chapters[0].id;
    request(&pipeline, id).await;
    wait_for_status(&pipeline, id, GenerationStatus::Completed).await;

    let mut outbox = Outbox::new();
    let outcome = pipeline.regenerate(id, &mut outbox).await.unwrap();
    assert_eq!(outcome, RequestOutcome::Scheduled);
    outbox.flush().await;

    let deadline = Instant::now() + Duration::from_secs(10);
    while generator.calls() < 2 {
        assert!(Instant::now() < deadline, "regeneration never ran");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    wait_for_status(&pipeline, id, GenerationStatus::Completed).await;

    pipeline.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_unavailable_generator_uses_fallback() {
    let fx = fixture(1).await;
    let generator = Arc::new(ScriptedRecaps::default());
    generator.unavailable.store(true, Ordering::SeqCst);
    let pipeline = recap_pipeline(&fx, Arc::clone(&generator), PipelineSettings::default());
    pipeline.start().await.expect("start");

    let id = fx.chapters[0].id;
    request(&pipeline, id).await;
    wait_for_status(&pipeline, id, GenerationStatus::Completed).await;

    let view = pipeline.status(id).await.unwrap().unwrap();
    let recap: Recap = serde_json::from_str(view.output_ref.as_deref().unwrap()).unwrap();
    assert_eq!(recap.source, AssetSource::Fallback);
    assert!(recap.summary.starts_with("Alice was beginning"));
    assert_eq!(generator.calls(), 0);
    assert_eq!(pipeline.stats().fallbacks, 1);

    pipeline.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_failed_record_is_rescheduled_on_request() {
    let fx = fixture(1).await;
    let generator = Arc::new(ScriptedRecaps::default());
    generator.failing.store(true, Ordering::SeqCst);
    let pipeline = recap_pipeline(&fx, Arc::clone(&generator), PipelineSettings::default());

    let id = fx.chapters[0].id;
    request(&pipeline, id).await;
    pipeline.start().await.expect("start");
    wait_for_status(&pipeline, id, GenerationStatus::Failed).await;

    let view = pipeline.status(id).await.unwrap().unwrap();
    assert!(!view.ready);
    assert!(view.error.as_deref().unwrap().contains("model overloaded"));
    pipeline.shutdown().await.expect("shutdown");

    // Not running: the retry stays pending with its error cleared.
    generator.failing.store(false, Ordering::SeqCst);
    let mut outbox = Outbox::new();
    let outcome = pipeline.request(id, &mut outbox).await.unwrap();
    assert_eq!(outcome, RequestOutcome::Scheduled);
    assert_eq!(outbox.len(), 1);

    let view = pipeline.status(id).await.unwrap().unwrap();
    assert_eq!(view.status, GenerationStatus::Pending);
    assert!(view.error.is_none());
}

#[tokio::test]
async fn test_fallback_on_error_when_enabled() {
    let fx = fixture(1).await;
    let generator = Arc::new(ScriptedRecaps::default());
    generator.failing.store(true, Ordering::SeqCst);
    let pipeline = recap_pipeline(
        &fx,
        Arc::clone(&generator),
        PipelineSettings::default().with_fallback_on_error(true),
    );
    pipeline.start().await.expect("start");

    let id = fx.chapters[0].id;
    request(&pipeline, id).await;
    wait_for_status(&pipeline, id, GenerationStatus::Completed).await;

    assert_eq!(generator.calls(), 1);
    assert_eq!(pipeline.stats().fallbacks, 1);
    pipeline.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_generation_timeout_fails_record() {
    let fx = fixture(1).await;
    let generator = Arc::new(ScriptedRecaps::with_delay(500));
    let pipeline = recap_pipeline(
        &fx,
        Arc::clone(&generator),
        PipelineSettings::default().with_generation_timeout(Duration::from_millis(50)),
    );
    pipeline.start().await.expect("start");

    let id = fx.chapters[0].id;
    request(&pipeline, id).await;
    wait_for_status(&pipeline, id, GenerationStatus::Failed).await;

    let view = pipeline.status(id).await.unwrap().unwrap();
    assert!(view.error.is_some());
    pipeline.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_unknown_target_creates_no_record() {
    let fx = fixture(1).await;
    let pipeline = recap_pipeline(
        &fx,
        Arc::new(ScriptedRecaps::default()),
        PipelineSettings::default(),
    );

    let mut outbox = Outbox::new();
    let result = pipeline.request(9999, &mut outbox).await;
    assert!(result.is_err());
    assert!(outbox.is_empty());
    assert!(pipeline.status(9999).await.unwrap().is_none());
}

#[tokio::test]
async fn test_duplicate_requests_queue_once() {
    let fx = fixture(1).await;
    let pipeline = recap_pipeline(
        &fx,
        Arc::new(ScriptedRecaps::default()),
        PipelineSettings::default(),
    );

    let id = fx.chapters[0].id;
    let mut outbox = Outbox::new();
    for _ in 0..3 {
        let outcome = pipeline.request(id, &mut outbox).await.unwrap();
        assert_eq!(outcome, RequestOutcome::Scheduled);
    }
    assert_eq!(outbox.len(), 3);
    assert_eq!(outbox.flush().await, 1);
    assert_eq!(pipeline.queue().snapshot().await, vec![id]);
}

#[tokio::test]
async fn test_concurrent_requests_create_one_record() {
    let fx = fixture(1).await;
    let pipeline = recap_pipeline(
        &fx,
        Arc::new(ScriptedRecaps::default()),
        PipelineSettings::default(),
    );

    let id = fx.chapters[0].id;
    let mut first = Outbox::new();
    let mut second = Outbox::new();
    let (a, b) = tokio::join!(
        pipeline.request(id, &mut first),
        pipeline.request(id, &mut second)
    );
    assert_eq!(a.expect("first request"), RequestOutcome::Scheduled);
    assert_eq!(b.expect("second request"), RequestOutcome::Scheduled);

    let counts = pipeline.counts(Some(fx.book.id)).await.unwrap();
    assert_eq!(counts.total(), 1);
    assert_eq!(counts.pending, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requesters_generate_once() {
    let fx = fixture(1).await;
    let generator = Arc::new(ScriptedRecaps::with_delay(30));
    let pipeline = Arc::new(recap_pipeline(
        &fx,
        Arc::clone(&generator),
        PipelineSettings::default(),
    ));
    pipeline.start().await.expect("start");

    let id = fx.chapters[0].id;
    let mut handles = Vec::new();
    for _ in 0..16 {
        let pipeline = Arc::clone(&pipeline);
        handles.push(tokio::spawn(async move {
            let mut outbox = Outbox::new();
            let outcome = pipeline.request(id, &mut outbox).await;
            outbox.flush().await;
            outcome
        }));
    }
    for handle in handles {
        handle.await.expect("join").expect("request");
    }

    wait_for_status(&pipeline, id, GenerationStatus::Completed).await;
    // Late requesters see the finished asset.
    for _ in 0..4 {
        assert_eq!(request(&pipeline, id).await, RequestOutcome::AlreadyCompleted);
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(generator.calls(), 1);
    assert_eq!(pipeline.counts(None).await.unwrap().total(), 1);
    pipeline.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_retry_request_does_not_reopen_completed_record() {
    let fx = fixture(1).await;
    let generator = Arc::new(ScriptedRecaps::default());
    let pipeline = Arc::new(recap_pipeline(
        &fx,
        Arc::clone(&generator),
        PipelineSettings::default(),
    ));

    let id = fx.chapters[0].id;
    pipeline.store().create(id, fx.book.id).await.expect("create");
    pipeline
        .store()
        .update_status(id, GenerationStatus::Failed, None, Some("model overloaded"))
        .await
        .expect("fail");

    // Another writer holds the lock and completes the record while the
    // request is waiting to reset it.
    let mut writer = fx.db.pool().acquire().await.expect("conn");
    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut *writer)
        .await
        .expect("begin");
    let pending_request = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            let mut outbox = Outbox::new();
            let outcome = pipeline.request(id, &mut outbox).await;
            outbox.flush().await;
            outcome
        })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    sqlx::query(
        "UPDATE generation_records SET status = 'completed', output_ref = 'done.json',
             error_message = NULL WHERE kind = 'recap' AND target_id = ?1",
    )
    .bind(id)
    .execute(&mut *writer)
    .await
    .expect("complete");
    sqlx::query("COMMIT")
        .execute(&mut *writer)
        .await
        .expect("commit");
    drop(writer);

    let outcome = pending_request.await.expect("join").expect("request");
    assert_eq!(outcome, RequestOutcome::AlreadyCompleted);

    let view = pipeline.status(id).await.unwrap().unwrap();
    assert_eq!(view.status, GenerationStatus::Completed);
    assert_eq!(view.output_ref.as_deref(), Some("done.json"));
    assert!(pipeline.queue().is_empty().await);

    pipeline.start().await.expect("start");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(generator.calls(), 0);
    pipeline.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_item_survives_store_outage() {
    let fx = fixture(1).await;
    let generator = Arc::new(ScriptedRecaps::default());
    let pipeline = recap_pipeline(
        &fx,
        Arc::clone(&generator),
        PipelineSettings::default().with_requeue_delay(Duration::from_millis(50)),
    );
    pipeline.start().await.expect("start");

    let id = fx.chapters[0].id;
    pipeline.store().create(id, fx.book.id).await.expect("create");

    sqlx::query("ALTER TABLE generation_records RENAME TO generation_records_offline")
        .execute(fx.db.pool())
        .await
        .expect("take table offline");
    pipeline.queue().enqueue(id).await;

    let deadline = Instant::now() + Duration::from_secs(10);
    while pipeline.stats().requeued == 0 {
        assert!(Instant::now() < deadline, "worker never requeued the item");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(generator.calls(), 0);

    sqlx::query("ALTER TABLE generation_records_offline RENAME TO generation_records")
        .execute(fx.db.pool())
        .await
        .expect("bring table back");

    wait_for_status(&pipeline, id, GenerationStatus::Completed).await;
    assert_eq!(generator.calls(), 1);
    pipeline.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_enqueue_waits_for_commit() {
    let fx = fixture(1).await;
    let pipeline = recap_pipeline(
        &fx,
        Arc::new(ScriptedRecaps::default()),
        PipelineSettings::default(),
    );
    let chapter = &fx.chapters[0];

    let mut uow = UnitOfWork::begin(&fx.db).await.unwrap();
    pipeline.request(chapter.id, uow.outbox()).await.unwrap();
    assert!(pipeline.queue().is_empty().await);

    Catalog::record_progress(uow.conn(), fx.book.id, chapter.id)
        .await
        .unwrap();
    assert_eq!(uow.commit().await.unwrap(), 1);
    assert!(pipeline.queue().contains(chapter.id).await);
    assert_eq!(
        fx.catalog.reading_progress(fx.book.id).await.unwrap(),
        Some(chapter.id)
    );
}

#[tokio::test]
async fn test_rollback_discards_enqueue() {
    let fx = fixture(1).await;
    let pipeline = recap_pipeline(
        &fx,
        Arc::new(ScriptedRecaps::default()),
        PipelineSettings::default(),
    );
    let id = fx.chapters[0].id;

    let mut uow = UnitOfWork::begin(&fx.db).await.unwrap();
    pipeline.request(id, uow.outbox()).await.unwrap();
    uow.rollback().await.unwrap();

    assert!(pipeline.queue().is_empty().await);
    // The pending record is still there for the next sweep.
    let summary = pipeline.recover(None).await.unwrap();
    assert_eq!(summary.pending, 1);
    assert!(pipeline.queue().contains(id).await);
}

#[tokio::test]
async fn test_restart_recovers_stale_and_pending_records() {
    let fx = fixture(2).await;
    let stale_id = fx.chapters[0].id;
    let pending_id = fx.chapters[1].id;

    {
        // First process: both requested, one picked up, then a crash.
        let crashed = recap_pipeline(
            &fx,
            Arc::new(ScriptedRecaps::default()),
            PipelineSettings::default(),
        );
        request(&crashed, stale_id).await;
        request(&crashed, pending_id).await;
        crashed
            .store()
            .update_status(stale_id, GenerationStatus::Generating, None, None)
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let generator = Arc::new(ScriptedRecaps::default());
    let restarted = recap_pipeline(
        &fx,
        Arc::clone(&generator),
        PipelineSettings::default().with_stale_threshold(Duration::from_millis(50)),
    );
    let summary = restarted.start().await.expect("start");
    assert_eq!(summary.reset_stale, 1);
    assert_eq!(summary.pending, 1);
    assert_eq!(summary.enqueued, 2);

    wait_for_status(&restarted, stale_id, GenerationStatus::Completed).await;
    wait_for_status(&restarted, pending_id, GenerationStatus::Completed).await;
    assert_eq!(generator.calls(), 2);
    restarted.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_fresh_generating_record_is_left_alone() {
    let fx = fixture(1).await;
    let pipeline = recap_pipeline(
        &fx,
        Arc::new(ScriptedRecaps::default()),
        PipelineSettings::default(),
    );
    let id = fx.chapters[0].id;

    request(&pipeline, id).await;
    pipeline
        .store()
        .update_status(id, GenerationStatus::Generating, None, None)
        .await
        .unwrap();

    let summary = pipeline.recover(None).await.unwrap();
    assert_eq!(summary.reset_stale, 0);

    let mut outbox = Outbox::new();
    let outcome = pipeline.request(id, &mut outbox).await.unwrap();
    assert_eq!(outcome, RequestOutcome::AlreadyInProgress);
    assert!(outbox.is_empty());
}

#[tokio::test]
async fn test_legacy_rows_are_normalized() {
    let fx = fixture(2).await;
    for chapter in &fx.chapters {
        sqlx::query(
            "INSERT INTO generation_records
                (kind, target_id, book_id, status, created_at, updated_at)
             VALUES ('recap', ?1, ?2, NULL, 0, 0)",
        )
        .bind(chapter.id)
        .bind(fx.book.id)
        .execute(fx.db.pool())
        .await
        .unwrap();
    }

    let pipeline = recap_pipeline(
        &fx,
        Arc::new(ScriptedRecaps::default()),
        PipelineSettings::default(),
    );

    // Legacy rows read as pending.
    let view = pipeline.status(fx.chapters[0].id).await.unwrap().unwrap();
    assert_eq!(view.status, GenerationStatus::Pending);
    let counts = pipeline.counts(None).await.unwrap();
    assert_eq!(counts.legacy, 2);

    // A request normalizes one; the sweep gets the other.
    let outcome = request(&pipeline, fx.chapters[0].id).await;
    assert_eq!(outcome, RequestOutcome::Scheduled);
    let summary = pipeline.start().await.expect("start");
    assert_eq!(summary.normalized_legacy, 1);
    assert_eq!(summary.pending, 1);

    for chapter in &fx.chapters {
        wait_for_status(&pipeline, chapter.id, GenerationStatus::Completed).await;
    }
    assert_eq!(pipeline.counts(None).await.unwrap().legacy, 0);
    pipeline.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let fx = fixture(1).await;
    let pipeline = recap_pipeline(
        &fx,
        Arc::new(ScriptedRecaps::default()),
        PipelineSettings::default(),
    );
    pipeline.start().await.expect("start");
    assert!(pipeline.start().await.is_err());
    pipeline.shutdown().await.expect("shutdown");
    assert!(pipeline.shutdown().await.is_err());
}

// ============================================================================
// Library and orchestrator
// ============================================================================

fn test_config(dir: &std::path::Path) -> PipelineConfig {
    PipelineConfig::default()
        .with_asset_dir(dir.join("assets"))
        .with_poll_interval(Duration::from_millis(50))
}

#[tokio::test]
async fn test_open_chapter_requests_neighbours() {
    let fx = fixture(3).await;
    let app = Orchestrator::with_providers(test_config(fx._dir.path()), fx.db.clone(), None)
        .expect("orchestrator");

    let second = &fx.chapters[1];
    let opened = app.library().open_chapter(second.id).await.expect("open");

    let requested: Vec<AssetRequest> = opened.requests.iter().map(|(r, _)| *r).collect();
    assert_eq!(
        requested,
        vec![
            AssetRequest::Illustration(second.id),
            AssetRequest::ChapterAnalysis(second.id),
            AssetRequest::Illustration(fx.chapters[2].id),
            AssetRequest::Recap(fx.chapters[0].id),
        ]
    );
    assert_eq!(opened.scheduled(), 4);
    assert_eq!(opened.enqueued, 4);
    assert_eq!(
        fx.catalog.reading_progress(fx.book.id).await.unwrap(),
        Some(second.id)
    );

    // Opening again schedules the same ids without queueing them twice.
    let again = app.library().open_chapter(second.id).await.expect("reopen");
    assert_eq!(again.enqueued, 0);

    assert!(app.library().open_chapter(9999).await.is_err());
}

#[tokio::test]
async fn test_first_chapter_has_no_recap() {
    let fx = fixture(1).await;
    let app = Orchestrator::with_providers(test_config(fx._dir.path()), fx.db.clone(), None)
        .expect("orchestrator");

    let opened = app
        .library()
        .open_chapter(fx.chapters[0].id)
        .await
        .expect("open");
    let kinds: Vec<AssetKind> = opened.requests.iter().map(|(r, _)| r.kind()).collect();
    assert_eq!(kinds, vec![AssetKind::Illustration, AssetKind::ChapterAnalysis]);
}

#[tokio::test]
async fn test_analysis_discovers_characters_and_portraits() {
    let fx = fixture(1).await;
    let app = Orchestrator::with_providers(test_config(fx._dir.path()), fx.db.clone(), None)
        .expect("orchestrator");
    app.start().await.expect("start");

    app.library()
        .open_chapter(fx.chapters[0].id)
        .await
        .expect("open");

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let characters = app.catalog().characters(fx.book.id).await.unwrap();
        let counts = app.pipelines().counts(Some(fx.book.id)).await.unwrap();
        let portraits = counts[&AssetKind::Portrait];
        let illustrations = counts[&AssetKind::Illustration];
        // Only discovered characters get a portrait here; Alice was imported.
        if characters.iter().any(|c| c.name == "White Rabbit")
            && portraits.total() == 1
            && portraits.is_settled()
            && illustrations.completed == 1
        {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "portraits never settled: {:?}",
            portraits
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let illustration = app
        .library()
        .status(AssetRequest::Illustration(fx.chapters[0].id))
        .await
        .unwrap()
        .unwrap();
    assert!(illustration.ready);
    assert_eq!(
        illustration.output_ref.as_deref(),
        Some("placeholders/illustration.png")
    );

    app.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_pregenerate_settles_every_kind() {
    let fx = fixture(2).await;
    let app = Orchestrator::with_providers(test_config(fx._dir.path()), fx.db.clone(), None)
        .expect("orchestrator");
    app.start().await.expect("start");

    let report = app
        .pregenerator()
        .run(fx.book.id, &AssetKind::ALL)
        .await
        .expect("pregenerate");

    assert!(!report.timed_out);
    // Two chapters for four chapter kinds plus one imported character.
    assert_eq!(report.scheduled, 9);
    let totals = report.totals();
    assert!(totals.is_settled());
    assert_eq!(totals.failed, 0);

    // A second run finds everything done.
    let again = app
        .pregenerator()
        .run(fx.book.id, &[AssetKind::Recap, AssetKind::Quiz])
        .await
        .expect("pregenerate again");
    assert_eq!(again.scheduled, 0);
    assert_eq!(again.already_completed, 4);

    app.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_pregenerate_unknown_book() {
    let fx = fixture(1).await;
    let app = Orchestrator::with_providers(test_config(fx._dir.path()), fx.db.clone(), None)
        .expect("orchestrator");
    assert!(app.pregenerator().run(9999, &AssetKind::ALL).await.is_err());
}

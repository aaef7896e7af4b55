use std::collections::HashSet;
use std::sync::Arc;

use pageflow::pipeline::{
    DocumentFormat, InputEntry, InputSpec, LoadSession, PageStatus, PoolPlan, RasterKind,
    SessionOptions, SessionProgress,
};

mod fixtures;
use fixtures::{
    FailingDecoder, MemoryFetcher, PickyDecoder, RecordingSink, UnitKillingDecoder, hints, inputs,
    options, pdf, png, tiff,
};

type PageTuple = (usize, usize, u32, Option<DocumentFormat>);

fn tuples(session: &LoadSession) -> Vec<PageTuple> {
    session
        .pages()
        .iter()
        .flatten()
        .map(|p| (p.global_index, p.owner_index, p.page_in_file, p.format))
        .collect()
}

fn mixed_fetcher() -> MemoryFetcher {
    MemoryFetcher::default()
        .with("cover.png", png(4, 4, 200))
        .with("scan.tif", tiff(&[10, 20, 30]))
        .with("notes.pdf", pdf(2))
        .with("back.jpg.png", png(2, 8, 90))
}

const MIXED: [&str; 4] = ["cover.png", "scan.tif", "notes.pdf", "back.jpg.png"];

#[test]
fn test_three_rasters_land_in_input_order() {
    let fetcher = MemoryFetcher::default()
        .with("a.png", png(2, 2, 1))
        .with("b.png", png(2, 2, 2))
        .with("c.png", png(2, 2, 3));
    let sink = RecordingSink::default();
    let mut session = LoadSession::start(
        inputs(&["a.png", "b.png", "c.png"]),
        options(8, fetcher),
        Box::new(sink.clone()),
    );

    assert_eq!(session.run_to_completion(), SessionProgress::Complete);

    let pages: Vec<_> = session.pages().iter().flatten().collect();
    assert_eq!(pages.len(), 3);
    for (i, page) in pages.iter().enumerate() {
        assert_eq!(page.global_index, i);
        assert_eq!(page.owner_index, i);
        assert_eq!(page.status, PageStatus::Ready);
        assert_eq!(page.status.code(), 1);
        assert!(page.loaded);
        assert_eq!(page.format, Some(DocumentFormat::Raster(RasterKind::Png)));
    }
    assert_eq!(*sink.worker_counts.lock().unwrap(), vec![session.unit_count()]);
}

#[test]
fn test_single_threaded_format_runs_on_fallback_path() {
    let fetcher = MemoryFetcher::default().with("book.pdf", pdf(5));
    let mut session = LoadSession::start(
        inputs(&["book.pdf"]),
        options(8, fetcher),
        Box::new(RecordingSink::default()),
    );
    session.run_to_completion();

    let stats = session.stats();
    assert_eq!(stats.jobs_built, 1);
    assert_eq!(stats.routed_fallback, 1);
    assert_eq!(stats.routed_parallel, 0);

    let pages = tuples(&session);
    assert_eq!(pages.len(), 5);
    for (i, page) in pages.iter().enumerate() {
        assert_eq!(*page, (i, 0, i as u32, Some(DocumentFormat::Pdf)));
    }
    assert_eq!(stats.pages_ready, 5);
}

#[test]
fn test_unit_error_reroutes_job_exactly_once() {
    let fetcher = MemoryFetcher::default().with("scan.tif", tiff(&[1, 2, 3]));
    let sink = RecordingSink::default();
    let mut session = LoadSession::start(
        inputs(&["scan.tif"]),
        SessionOptions {
            decoder: Arc::new(FailingDecoder),
            ..options(8, fetcher)
        },
        Box::new(sink.clone()),
    );
    session.run_to_completion();

    let stats = session.stats();
    assert_eq!(stats.routed_parallel, 1);
    assert_eq!(stats.error_recoveries, 1);
    assert_eq!(session.pages().len(), 3);
    assert_eq!(stats.pages_ready + stats.pages_failed, 3);

    let indices: HashSet<usize> = sink
        .inserts
        .lock()
        .unwrap()
        .iter()
        .map(|(_, index)| *index)
        .collect();
    assert_eq!(indices, HashSet::from([0, 1, 2]));
}

#[test]
fn test_fallback_failure_is_terminal() {
    let fetcher = MemoryFetcher::default().with("scan.tif", tiff(&[1, 2, 3]));
    let mut session = LoadSession::start(
        inputs(&["scan.tif"]),
        SessionOptions {
            decoder: Arc::new(FailingDecoder),
            fallback_decoder: Arc::new(FailingDecoder),
            ..options(8, fetcher)
        },
        Box::new(RecordingSink::default()),
    );

    assert_eq!(session.run_to_completion(), SessionProgress::Complete);
    let stats = session.stats();
    assert_eq!(stats.error_recoveries, 1);
    assert_eq!(stats.pages_failed, 3);
    for page in session.pages().iter().flatten() {
        assert_eq!(page.status, PageStatus::Failed);
        assert!(page.rendered.is_some(), "failed pages show the placeholder");
    }
}

#[test]
fn test_unit_thread_exit_is_recovered_by_refetch() {
    let fetcher = MemoryFetcher::default().with("scan.tif", tiff(&[1, 2, 3]));
    let sink = RecordingSink::default();
    let mut session = LoadSession::start(
        inputs(&["scan.tif"]),
        SessionOptions {
            decoder: Arc::new(UnitKillingDecoder),
            ..options(8, fetcher)
        },
        Box::new(sink.clone()),
    );

    assert_eq!(session.run_to_completion(), SessionProgress::Complete);

    let stats = session.stats();
    assert_eq!(stats.routed_parallel, 1);
    assert_eq!(stats.unit_faults, 1);
    assert_eq!(stats.error_recoveries, 1);
    assert_eq!(stats.pages_pending, 0);
    assert_eq!(stats.pages_ready, 3);

    let pages = tuples(&session);
    assert_eq!(pages.len(), 3);
    for (i, page) in pages.iter().enumerate() {
        assert_eq!(*page, (i, 0, i as u32, Some(DocumentFormat::Tiff)));
    }
    for page in session.pages().iter().flatten() {
        assert_eq!(page.status, PageStatus::Ready);
    }
}

#[test]
fn test_unsupported_page_is_requested_from_fallback() {
    let fetcher = MemoryFetcher::default().with("scan.tif", tiff(&[1, 2, 3]));
    let mut session = LoadSession::start(
        inputs(&["scan.tif"]),
        SessionOptions {
            decoder: Arc::new(PickyDecoder {
                unsupported_page: 1,
            }),
            ..options(8, fetcher)
        },
        Box::new(RecordingSink::default()),
    );
    session.run_to_completion();

    let stats = session.stats();
    assert_eq!(stats.fallback_requests, 1);
    assert_eq!(stats.error_recoveries, 0);
    assert_eq!(stats.pages_ready, 3);
}

#[test]
fn test_two_cores_select_sequential_mode() {
    let plan = PoolPlan::size(hints(2), 8);
    assert!(plan.sequential);
    assert_eq!(plan.unit_count, 1);

    let fetcher = MemoryFetcher::default().with("a.png", png(1, 1, 0));
    let mut session = LoadSession::start(
        inputs(&["a.png"]),
        options(2, fetcher),
        Box::new(RecordingSink::default()),
    );
    assert!(session.plan().sequential);
    assert_eq!(session.unit_count(), 1);
    assert_eq!(session.run_to_completion(), SessionProgress::Complete);
}

#[test]
fn test_sequential_and_parallel_modes_agree() {
    let mut sequential = LoadSession::start(
        inputs(&MIXED),
        SessionOptions {
            force_sequential: true,
            ..options(8, mixed_fetcher())
        },
        Box::new(RecordingSink::default()),
    );
    let mut parallel = LoadSession::start(
        inputs(&MIXED),
        options(8, mixed_fetcher()),
        Box::new(RecordingSink::default()),
    );
    sequential.run_to_completion();
    parallel.run_to_completion();

    assert!(sequential.plan().sequential);
    assert!(!parallel.plan().sequential);
    assert_eq!(tuples(&sequential), tuples(&parallel));
    assert_eq!(tuples(&parallel).len(), 1 + 3 + 2 + 1);
}

#[test]
fn test_final_order_follows_input_order() {
    let mut session = LoadSession::start(
        inputs(&MIXED),
        options(8, mixed_fetcher()),
        Box::new(RecordingSink::default()),
    );
    session.run_to_completion();

    let pages = tuples(&session);
    let globals: Vec<_> = pages.iter().map(|p| p.0).collect();
    assert_eq!(globals, (0..pages.len()).collect::<Vec<_>>());
    assert!(pages.windows(2).all(|w| w[0].1 <= w[1].1));
    assert!(pages.windows(2).all(|w| w[0].1 < w[1].1 || w[0].2 < w[1].2));
}

#[test]
fn test_explicit_indices_reorder_inputs() {
    let spec = InputSpec::List(vec![
        InputEntry::new("second.png").with_index(1),
        InputEntry::new("first.png").with_index(0),
    ]);
    let fetcher = MemoryFetcher::default()
        .with("first.png", png(1, 1, 1))
        .with("second.png", png(1, 1, 2));
    let mut session = LoadSession::start(
        spec.expand().unwrap(),
        options(8, fetcher),
        Box::new(RecordingSink::default()),
    );
    session.run_to_completion();

    let page = session.pages()[0].as_ref().unwrap();
    assert_eq!(page.owner_index, 0);
    let handle = page.rendered.unwrap();
    let encoded = session.handles().get(handle).unwrap();
    assert_eq!((encoded.width, encoded.height), (1, 1));
}

#[test]
fn test_bad_input_leaves_one_placeholder_and_the_rest_continues() {
    let fetcher = MemoryFetcher::default()
        .with("a.png", png(1, 1, 1))
        .with("junk.dat", b"definitely not a document".to_vec())
        .with("c.tif", tiff(&[5, 6]));
    let mut session = LoadSession::start(
        inputs(&["a.png", "junk.dat", "missing.png", "c.tif"]),
        options(8, fetcher),
        Box::new(RecordingSink::default()),
    );
    assert_eq!(session.run_to_completion(), SessionProgress::Complete);

    let pages = tuples(&session);
    assert_eq!(
        pages,
        vec![
            (0, 0, 0, Some(DocumentFormat::Raster(RasterKind::Png))),
            (1, 1, 0, None),
            (2, 2, 0, None),
            (3, 3, 0, Some(DocumentFormat::Tiff)),
            (4, 3, 1, Some(DocumentFormat::Tiff)),
        ]
    );
    let stats = session.stats();
    assert_eq!(stats.classification_failures, 1);
    assert_eq!(stats.fetch_failures, 1);
    assert_eq!(stats.pages_ready, 3);
    assert_eq!(stats.pages_failed, 2);
}

#[test]
fn test_pattern_input_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    for n in 1..=3u8 {
        std::fs::write(dir.path().join(format!("{n}.png")), png(2, 2, n * 40)).unwrap();
    }
    let spec = InputSpec::Pattern {
        base_folder: dir.path().to_string_lossy().into_owned(),
        extension: "png".to_string(),
        count: 3,
    };

    let mut session = LoadSession::start(
        spec.expand().unwrap(),
        SessionOptions {
            hints: hints(4),
            ..SessionOptions::default()
        },
        Box::new(RecordingSink::default()),
    );
    assert_eq!(session.run_to_completion(), SessionProgress::Complete);
    assert_eq!(session.stats().pages_ready, 3);
}

#[test]
fn test_poll_never_blocks_and_eventually_completes() {
    let mut session = LoadSession::start(
        inputs(&MIXED),
        options(8, mixed_fetcher()),
        Box::new(RecordingSink::default()),
    );

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(30);
    let mut progress = session.poll();
    while progress == SessionProgress::Working {
        assert!(std::time::Instant::now() < deadline, "session never completed");
        std::thread::sleep(std::time::Duration::from_millis(1));
        progress = session.poll();
    }
    assert_eq!(progress, SessionProgress::Complete);
    assert!(session.is_complete());
    assert_eq!(session.stats().pages_pending, 0);
}

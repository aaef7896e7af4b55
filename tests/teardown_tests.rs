use std::sync::Arc;
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use image::RgbaImage;
use pageflow::pipeline::{
    DecodeFailure, DocumentFormat, LoadSession, PageDecoder, PageSource, RasterDecoder,
    SessionOptions, SessionProgress,
};

mod fixtures;
use fixtures::{MemoryFetcher, RecordingSink, inputs, options, png};

/// Holds every render until the test opens the gate
struct GateDecoder {
    started: Sender<()>,
    gate: Receiver<()>,
}

struct GatedPages<'a> {
    inner: Box<dyn PageSource + 'a>,
    started: Sender<()>,
    gate: Receiver<()>,
}

impl PageSource for GatedPages<'_> {
    fn page_count(&self) -> u32 {
        self.inner.page_count()
    }

    fn render(&mut self, page: u32) -> Result<RgbaImage, DecodeFailure> {
        let _ = self.started.send(());
        let _ = self.gate.recv_timeout(Duration::from_secs(10));
        self.inner.render(page)
    }
}

impl PageDecoder for GateDecoder {
    fn open<'a>(
        &self,
        format: DocumentFormat,
        bytes: &'a [u8],
    ) -> Result<Box<dyn PageSource + 'a>, DecodeFailure> {
        Ok(Box::new(GatedPages {
            inner: RasterDecoder.open(format, bytes)?,
            started: self.started.clone(),
            gate: self.gate.clone(),
        }))
    }
}

fn wait_for_starts(session: &mut LoadSession, started: &Receiver<()>, count: usize) {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut seen = 0;
    while seen < count {
        assert!(Instant::now() < deadline, "jobs never reached the units");
        session.poll();
        seen += started.drain().count();
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_teardown_with_jobs_in_flight_places_nothing_afterwards() {
    let (started_tx, started_rx) = flume::unbounded();
    let (gate_tx, gate_rx) = flume::unbounded();
    let fetcher = MemoryFetcher::default()
        .with("a.png", png(2, 2, 1))
        .with("b.png", png(2, 2, 2));
    let sink = RecordingSink::default();

    let mut session = LoadSession::start(
        inputs(&["a.png", "b.png"]),
        SessionOptions {
            decoder: Arc::new(GateDecoder {
                started: started_tx,
                gate: gate_rx,
            }),
            ..options(8, fetcher)
        },
        Box::new(sink.clone()),
    );

    wait_for_starts(&mut session, &started_rx, 2);
    let liveness = session.liveness();
    let placed_before = sink.insert_count();

    session.teardown();
    assert!(!liveness.is_alive());

    // Let both units finish their decode after the fact
    gate_tx.send(()).unwrap();
    gate_tx.send(()).unwrap();
    std::thread::sleep(Duration::from_millis(100));

    for _ in 0..10 {
        assert_eq!(session.poll(), SessionProgress::TornDown);
    }
    assert_eq!(session.run_to_completion(), SessionProgress::TornDown);
    assert_eq!(sink.insert_count(), placed_before);
    assert!(session.handles().is_empty());
}

#[test]
fn test_dropping_a_running_session_is_clean() {
    let (started_tx, started_rx) = flume::unbounded();
    let (gate_tx, gate_rx) = flume::unbounded();
    let fetcher = MemoryFetcher::default().with("a.png", png(2, 2, 1));
    let sink = RecordingSink::default();

    let mut session = LoadSession::start(
        inputs(&["a.png"]),
        SessionOptions {
            decoder: Arc::new(GateDecoder {
                started: started_tx,
                gate: gate_rx,
            }),
            ..options(8, fetcher)
        },
        Box::new(sink.clone()),
    );
    wait_for_starts(&mut session, &started_rx, 1);
    let placed_before = sink.insert_count();

    drop(session);
    gate_tx.send(()).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(sink.insert_count(), placed_before);
}

#[test]
fn test_teardown_before_any_fetch_completes() {
    let fetcher = MemoryFetcher::default().with("a.png", png(2, 2, 1));
    let sink = RecordingSink::default();
    let mut session = LoadSession::start(
        inputs(&["a.png"]),
        options(4, fetcher),
        Box::new(sink.clone()),
    );
    session.teardown();

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(session.poll(), SessionProgress::TornDown);
    assert_eq!(sink.insert_count(), 0);
    assert_eq!(session.stats().refused_placements, 0);
}

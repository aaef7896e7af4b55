//! Load session - owns every piece of per-document pipeline state

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::Serialize;

use super::assembler::{PageAssembler, PageRecord, PageSink, PageStatus};
use super::cancel::{CancellationToken, Liveness};
use super::classify::classify;
use super::decode::{PageDecoder, RasterDecoder};
use super::error::{FetchError, UnitFault};
use super::fallback::{FallbackJob, FallbackRenderer};
use super::fetch::{AutoFetcher, FetchedBytes, Fetcher};
use super::handles::HandleRegistry;
use super::input::InputReference;
use super::job::{FallbackReason, Job, JobBuilder, JobId, Route, Router};
use super::pdf::{PdfRasterizer, default_rasterizer};
use super::pool::{DeviceHints, PoolPlan};
use super::request::{PageResult, SessionEvent, UnitEvent, UnitMessage};
use super::scheduler::BatchScheduler;
use super::unit::{ExecutionUnit, UnitHandle};

/// Events handled per tick unless configured otherwise
pub const DEFAULT_EVENTS_PER_POLL: usize = 64;
/// Default cap on execution units requested by the caller
pub const DEFAULT_MAX_UNITS: usize = 8;
/// How long the blocking driver waits on the event channel when idle
const IDLE_WAIT: Duration = Duration::from_millis(50);

/// Collaborators and knobs for one session
pub struct SessionOptions {
    pub hints: DeviceHints,
    /// Caller's own ceiling on execution units
    pub max_units: usize,
    /// Skip pool sizing and run one job at a time
    pub force_sequential: bool,
    pub events_per_poll: usize,
    pub fetcher: Arc<dyn Fetcher>,
    /// Decoder shared by the execution units
    pub decoder: Arc<dyn PageDecoder>,
    /// Non-PDF decoder used on the fallback path
    pub fallback_decoder: Arc<dyn PageDecoder>,
    pub pdf: Box<dyn PdfRasterizer>,
    pub handles: HandleRegistry,
}

impl Default for SessionOptions {
    fn default() -> Self {
        let decoder: Arc<dyn PageDecoder> = Arc::new(RasterDecoder);
        Self {
            hints: DeviceHints::detect(),
            max_units: DEFAULT_MAX_UNITS,
            force_sequential: false,
            events_per_poll: DEFAULT_EVENTS_PER_POLL,
            fetcher: Arc::new(AutoFetcher::default()),
            decoder: decoder.clone(),
            fallback_decoder: decoder,
            pdf: default_rasterizer(),
            handles: HandleRegistry::new(),
        }
    }
}

/// Counters for one session
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub inputs: usize,
    pub jobs_built: usize,
    pub routed_parallel: usize,
    pub routed_fallback: usize,
    pub error_recoveries: usize,
    pub fallback_requests: usize,
    pub unit_faults: usize,
    pub classification_failures: usize,
    pub fetch_failures: usize,
    pub pages_ready: usize,
    pub pages_failed: usize,
    pub pages_pending: usize,
    pub refused_placements: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionProgress {
    Working,
    Complete,
    TornDown,
}

/// Work deferred to the next tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Task {
    /// One scheduler pass
    Pump,
    /// Render one queued fallback job
    DrainFallback,
}

/// Coordinates one document load from input list to assembled pages
pub struct LoadSession {
    inputs: Vec<InputReference>,
    /// Fetched inputs waiting for their turn, keyed by input position
    fetched: BTreeMap<usize, Result<FetchedBytes, FetchError>>,
    next_to_ingest: usize,
    /// Set when the loader thread could not start; fetches then run per tick
    inline_fetcher: Option<Arc<dyn Fetcher>>,
    builder: JobBuilder,
    router: Router,
    plan: PoolPlan,
    scheduler: BatchScheduler,
    fallback: FallbackRenderer,
    assembler: PageAssembler,
    handles: HandleRegistry,
    events: Receiver<SessionEvent>,
    tasks: VecDeque<Task>,
    recovered: HashSet<JobId>,
    liveness: Liveness,
    cancel: CancellationToken,
    loader: Option<JoinHandle<()>>,
    events_per_poll: usize,
    stats: SessionStats,
}

impl LoadSession {
    /// Size the pool, spawn the units and the loader, and return at once
    pub fn start(
        inputs: Vec<InputReference>,
        options: SessionOptions,
        sink: Box<dyn PageSink>,
    ) -> Self {
        let plan = if options.force_sequential {
            PoolPlan::sequential()
        } else {
            PoolPlan::size(options.hints, options.max_units)
        };

        let liveness = Liveness::new();
        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = flume::unbounded();

        let mut units: Vec<Box<dyn UnitHandle>> = Vec::with_capacity(plan.unit_count);
        for _ in 0..plan.unit_count {
            let slot = units.len();
            match ExecutionUnit::spawn(
                slot,
                options.decoder.clone(),
                events_tx.clone(),
                cancel.clone(),
            ) {
                Ok(unit) => units.push(Box::new(unit)),
                Err(e) => log::error!("Failed to spawn execution unit {slot}: {e}"),
            }
        }
        let unit_count = units.len();

        let mut assembler = PageAssembler::new(liveness.clone(), sink);
        assembler.announce_worker_count(unit_count);

        let (loader, inline_fetcher) =
            match spawn_loader(&inputs, options.fetcher.clone(), cancel.clone(), events_tx) {
                Ok(handle) => (Some(handle), None),
                Err(e) => {
                    log::error!("Failed to spawn loader thread, fetching inline: {e}");
                    (None, Some(options.fetcher.clone()))
                }
            };

        log::info!(
            "Load session started: {} input(s), {} unit(s), sequential={}, batch ceiling {:?}",
            inputs.len(),
            unit_count,
            plan.sequential,
            plan.batch_size_ceiling
        );

        let fallback = FallbackRenderer::new(
            options.fallback_decoder,
            options.pdf,
            options.fetcher,
            cancel.clone(),
        );

        Self {
            stats: SessionStats {
                inputs: inputs.len(),
                ..SessionStats::default()
            },
            inputs,
            fetched: BTreeMap::new(),
            next_to_ingest: 0,
            inline_fetcher,
            builder: JobBuilder::new(),
            router: Router::new(unit_count > 0),
            plan,
            scheduler: BatchScheduler::new(units, plan.batch_size_ceiling),
            fallback,
            assembler,
            handles: options.handles,
            events: events_rx,
            tasks: VecDeque::new(),
            recovered: HashSet::new(),
            liveness,
            cancel,
            loader,
            events_per_poll: options.events_per_poll.max(1),
        }
    }

    /// One non-blocking tick
    pub fn poll(&mut self) -> SessionProgress {
        if !self.liveness.is_alive() {
            return SessionProgress::TornDown;
        }

        // Tasks queued during this tick wait for the next one
        let deferred: Vec<Task> = self.tasks.drain(..).collect();
        for task in deferred {
            self.run_task(task);
        }

        self.fetch_inline();

        for _ in 0..self.events_per_poll {
            match self.events.try_recv() {
                Ok(event) => self.handle_event(event),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }

        self.check_unit_health();
        self.progress()
    }

    /// Drive the session until every page is resolved or it is torn down
    pub fn run_to_completion(&mut self) -> SessionProgress {
        loop {
            match self.poll() {
                SessionProgress::Working => {}
                done => return done,
            }
            if !self.tasks.is_empty() || self.inline_pending() {
                continue;
            }

            match self.events.recv_timeout(IDLE_WAIT) {
                Ok(event) => self.handle_event(event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.abandon_unfetched();
                    if self.progress() == SessionProgress::Working && self.tasks.is_empty() {
                        thread::sleep(IDLE_WAIT);
                    }
                }
            }
        }
    }

    /// Stop everything mid-flight. Safe to call more than once.
    pub fn teardown(&mut self) {
        if !self.liveness.kill() {
            return;
        }
        self.cancel.cancel();
        self.scheduler.terminate();
        self.fallback.clear();
        self.tasks.clear();
        self.fetched.clear();
        // Detached: a blocked fetch ends on its own once it sees the token
        self.loader = None;
        let released = self.handles.release_all();
        log::info!(
            "Load session torn down ({released} handle(s) released, {} page(s) placed)",
            self.assembler.pages().iter().flatten().count()
        );
    }

    #[must_use]
    pub fn pages(&self) -> &[Option<PageRecord>] {
        self.assembler.pages()
    }

    #[must_use]
    pub fn plan(&self) -> PoolPlan {
        self.plan
    }

    #[must_use]
    pub fn handles(&self) -> &HandleRegistry {
        &self.handles
    }

    /// Flag consulted before every placement; flips on teardown
    #[must_use]
    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.scheduler.unit_count()
    }

    #[must_use]
    pub fn stats(&self) -> SessionStats {
        let mut stats = self.stats.clone();
        for page in self.assembler.pages() {
            match page.as_ref().map(|p| p.status) {
                Some(PageStatus::Ready) => stats.pages_ready += 1,
                Some(PageStatus::Failed) => stats.pages_failed += 1,
                Some(PageStatus::Pending) | None => stats.pages_pending += 1,
            }
        }
        stats.refused_placements = self.assembler.refused();
        stats
    }

    /// All inputs ingested, nothing queued or in flight
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.next_to_ingest == self.inputs.len()
            && self.scheduler.is_idle()
            && self.fallback.is_empty()
    }

    fn progress(&self) -> SessionProgress {
        if !self.liveness.is_alive() {
            SessionProgress::TornDown
        } else if self.is_complete() {
            SessionProgress::Complete
        } else {
            SessionProgress::Working
        }
    }

    fn schedule(&mut self, task: Task) {
        if task == Task::DrainFallback && self.tasks.contains(&task) {
            return;
        }
        self.tasks.push_back(task);
    }

    fn run_task(&mut self, task: Task) {
        match task {
            Task::Pump => self.pump(),
            Task::DrainFallback => {
                if let Some(results) = self.fallback.render_next() {
                    self.place_results(results);
                }
                if !self.fallback.is_empty() {
                    self.schedule(Task::DrainFallback);
                }
            }
        }
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Fetched { position, result } => {
                self.fetched.insert(position, result);
                self.ingest_ready();
            }
            SessionEvent::Unit(event) => self.on_unit_event(event),
        }
    }

    fn inline_pending(&self) -> bool {
        self.inline_fetcher.is_some() && self.next_to_ingest < self.inputs.len()
    }

    /// Without a loader thread, fetch one input per tick
    fn fetch_inline(&mut self) {
        let Some(fetcher) = self.inline_fetcher.clone() else {
            return;
        };
        let position = self.next_to_ingest;
        let Some(input) = self.inputs.get(position) else {
            return;
        };
        let result = fetcher.fetch(&input.locator, &self.cancel);
        self.fetched.insert(position, result);
        self.ingest_ready();
    }

    /// The loader is gone; whatever it never sent will not arrive
    fn abandon_unfetched(&mut self) {
        if self.inline_fetcher.is_some() {
            return;
        }
        for position in self.next_to_ingest..self.inputs.len() {
            let locator = self.inputs[position].locator.clone();
            self.fetched
                .entry(position)
                .or_insert(Err(FetchError::LoaderStopped { locator }));
        }
        self.ingest_ready();
    }

    /// Classify, build and route fetched inputs strictly in input order
    fn ingest_ready(&mut self) {
        while let Some(result) = self.fetched.remove(&self.next_to_ingest) {
            let position = self.next_to_ingest;
            self.next_to_ingest += 1;
            self.ingest(position, result);
        }
    }

    fn ingest(&mut self, position: usize, result: Result<FetchedBytes, FetchError>) {
        let input = self.inputs[position].clone();

        let fetched = match result {
            Ok(fetched) => fetched,
            Err(FetchError::Cancelled) => return,
            Err(e) => {
                log::warn!("Input {} could not be fetched: {e}", input.owner_index);
                self.stats.fetch_failures += 1;
                self.place_unclassified(&input);
                return;
            }
        };

        let classification = match classify(
            &fetched.bytes,
            &input.locator,
            fetched.content_type.as_deref(),
        ) {
            Ok(classification) => classification,
            Err(e) => {
                log::warn!("Input {} could not be classified: {e}", input.owner_index);
                self.stats.classification_failures += 1;
                self.place_unclassified(&input);
                return;
            }
        };

        let job = self.builder.build(&input, classification, fetched.bytes);
        self.stats.jobs_built += 1;
        self.assembler.reserve(self.builder.reserved());
        for page in job.pages() {
            self.assembler.place(PageRecord::pending(
                job.global_index_of(page),
                job.owner_index,
                page,
                job.format,
            ));
        }

        match self.router.route(&job) {
            Route::Parallel => {
                self.stats.routed_parallel += 1;
                self.scheduler.enqueue(job);
                if !self.tasks.contains(&Task::Pump) {
                    self.schedule(Task::Pump);
                }
            }
            Route::Fallback(reason) => {
                self.stats.routed_fallback += 1;
                self.fallback.enqueue(FallbackJob::whole(job, reason));
                self.schedule(Task::DrainFallback);
            }
        }
    }

    /// One failed entry stands in for an input that produced no job
    fn place_unclassified(&mut self, input: &InputReference) {
        let index = self.builder.reserve(1);
        self.assembler.reserve(self.builder.reserved());
        let placeholder = self.handles.failure_placeholder();
        self.assembler.place(PageRecord::unclassified(
            index,
            input.owner_index,
            placeholder,
        ));
    }

    fn pump(&mut self) {
        if !self.scheduler.has_capacity() {
            self.divert_queued();
            return;
        }

        let outcome = self.scheduler.pass();
        for batch in outcome.undelivered {
            self.stats.unit_faults += 1;
            let fault = UnitFault::Transport {
                slot: batch.slot,
                detail: "request channel closed".to_string(),
            };
            log::warn!("{fault}");
            for job in batch.batch.jobs {
                self.recover(job, FallbackReason::UnitFault);
            }
        }
        if !self.scheduler.has_capacity() {
            self.divert_queued();
        }
    }

    /// Every unit is gone: send remaining parallel work down the fallback path
    fn divert_queued(&mut self) {
        self.router.set_parallel_available(false);
        let jobs = self.scheduler.drain_queued();
        if jobs.is_empty() {
            return;
        }
        log::warn!(
            "No execution unit left, diverting {} job(s) to fallback",
            jobs.len()
        );
        for job in jobs {
            self.fallback
                .enqueue(FallbackJob::whole(job, FallbackReason::NoParallelism));
        }
        self.schedule(Task::DrainFallback);
    }

    fn on_unit_event(&mut self, event: UnitEvent) {
        if self.scheduler.complete(event.slot, event.assignment).is_none() {
            return;
        }

        log::debug!(
            "Unit {} finished {:?} with {}",
            event.slot,
            event.assignment,
            event.message.kind()
        );
        match event.message {
            UnitMessage::Success { pages } => self.place_results(pages),
            UnitMessage::Error {
                jobs,
                reason,
                completed,
            } => {
                let fault = UnitFault::Application {
                    slot: event.slot,
                    reason,
                };
                log::warn!("{fault}");
                self.place_results(completed);
                for job in jobs {
                    self.recover(job, FallbackReason::UnitError);
                }
            }
            UnitMessage::FallbackRequest { items, completed } => {
                self.place_results(completed);
                for item in items {
                    self.stats.fallback_requests += 1;
                    self.fallback.enqueue(FallbackJob {
                        job: item.job,
                        pages: Some(item.pages),
                        reason: FallbackReason::Requested,
                    });
                }
                self.schedule(Task::DrainFallback);
            }
        }

        self.schedule(Task::Pump);
    }

    /// Reroute a job the parallel path lost, at most once per job
    fn recover(&mut self, mut job: Job, reason: FallbackReason) {
        if job.recovered || !self.recovered.insert(job.id) {
            log::error!(
                "Job {:?} already recovered once, failing its pages",
                job.id
            );
            let failed = job
                .pages()
                .map(|page| PageResult {
                    owner_index: job.owner_index,
                    page_in_file: page,
                    global_index: job.global_index_of(page),
                    format: job.format,
                    rendered: None,
                })
                .collect();
            self.place_results(failed);
            return;
        }

        log::warn!("Rerouting job {:?} to fallback ({reason:?})", job.id);
        job.recovered = true;
        if reason.is_recovery() {
            self.stats.error_recoveries += 1;
        }
        self.fallback.enqueue(FallbackJob::whole(job, reason));
        self.schedule(Task::DrainFallback);
    }

    /// Turn unit faults into reroutes
    fn check_unit_health(&mut self) {
        let faulted = self.scheduler.reap_faults();
        if faulted.is_empty() {
            return;
        }
        for slot in faulted {
            self.stats.unit_faults += 1;
            let fault = UnitFault::Transport {
                slot: slot.slot,
                detail: "thread exited".to_string(),
            };
            log::warn!("{fault}");
            for ticket in slot.tickets {
                self.recover(ticket.into_job(), FallbackReason::UnitFault);
            }
        }
        if !self.scheduler.has_capacity() {
            self.schedule(Task::Pump);
        }
    }

    fn place_results(&mut self, results: Vec<PageResult>) {
        for result in results {
            if !self.liveness.is_alive() {
                return;
            }
            let record = PageRecord::pending(
                result.global_index,
                result.owner_index,
                result.page_in_file,
                result.format,
            );
            let record = match result.rendered {
                Some(page) => record.ready(self.handles.register(page)),
                None => record.failed(self.handles.failure_placeholder()),
            };
            self.assembler.place(record);
        }
    }
}

impl Drop for LoadSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Fetch every input in order on a dedicated thread
fn spawn_loader(
    inputs: &[InputReference],
    fetcher: Arc<dyn Fetcher>,
    cancel: CancellationToken,
    events: Sender<SessionEvent>,
) -> std::io::Result<JoinHandle<()>> {
    let locators: Vec<String> = inputs.iter().map(|i| i.locator.clone()).collect();
    thread::Builder::new()
        .name("pageflow-loader".to_string())
        .spawn(move || {
            for (position, locator) in locators.iter().enumerate() {
                if cancel.is_cancelled() {
                    break;
                }
                let result = fetcher.fetch(locator, &cancel);
                if events.send(SessionEvent::Fetched { position, result }).is_err() {
                    break;
                }
            }
        })
}

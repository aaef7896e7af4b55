//! Job construction, global index reservation and routing

use std::ops::Range;

use super::classify::Classification;
use super::format::{DecodeAffinity, DocumentFormat};
use super::input::InputReference;
use super::tiff_probe;

/// Jobs placed into one batch; batching stays off so a large multi-page
/// buffer is never duplicated across batches
pub const JOBS_PER_BATCH: usize = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

/// One input document's full page range, ready to decode
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub owner_index: usize,
    pub format: DocumentFormat,
    pub page_start: u32,
    pub page_count: u32,
    pub global_start: usize,
    /// Owned document bytes; moves with the job and is never copied
    pub buffer: Option<Vec<u8>>,
    pub source_locator: Option<String>,
    /// Already rerouted to the fallback path once by error recovery
    pub recovered: bool,
}

impl Job {
    #[must_use]
    pub fn global_range(&self) -> Range<usize> {
        self.global_start..self.global_start + self.page_count as usize
    }

    /// Zero-based pages of the document this job covers
    pub fn pages(&self) -> Range<u32> {
        self.page_start..self.page_start + self.page_count
    }

    /// Global index of a page of the document
    #[must_use]
    pub fn global_index_of(&self, page_in_file: u32) -> usize {
        self.global_start + (page_in_file - self.page_start) as usize
    }

    /// Buffer-free description kept while the job is away in a unit
    #[must_use]
    pub fn ticket(&self) -> JobTicket {
        JobTicket {
            id: self.id,
            owner_index: self.owner_index,
            format: self.format,
            page_start: self.page_start,
            page_count: self.page_count,
            global_start: self.global_start,
            source_locator: self.source_locator.clone(),
        }
    }
}

/// Metadata of a job whose buffer is owned elsewhere
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobTicket {
    pub id: JobId,
    pub owner_index: usize,
    pub format: DocumentFormat,
    pub page_start: u32,
    pub page_count: u32,
    pub global_start: usize,
    pub source_locator: Option<String>,
}

impl JobTicket {
    /// Rebuild a job with no buffer; the consumer refetches by locator
    #[must_use]
    pub fn into_job(self) -> Job {
        Job {
            id: self.id,
            owner_index: self.owner_index,
            format: self.format,
            page_start: self.page_start,
            page_count: self.page_count,
            global_start: self.global_start,
            buffer: None,
            source_locator: self.source_locator,
            recovered: false,
        }
    }
}

/// Distribution envelope around jobs of one format
#[derive(Debug)]
pub struct Batch {
    pub jobs: Vec<Job>,
    pub format: DocumentFormat,
}

impl Batch {
    #[must_use]
    pub fn single(job: Job) -> Self {
        Self {
            format: job.format,
            jobs: vec![job],
        }
    }

    #[must_use]
    pub fn tickets(&self) -> Vec<JobTicket> {
        self.jobs.iter().map(Job::ticket).collect()
    }
}

/// Builds jobs and owns the session's global page counter
#[derive(Debug, Default)]
pub struct JobBuilder {
    next_global: usize,
    next_id: u64,
}

impl JobBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total global indices reserved so far
    #[must_use]
    pub fn reserved(&self) -> usize {
        self.next_global
    }

    /// Reserve `count` contiguous global indices, returning the first
    pub fn reserve(&mut self, count: u32) -> usize {
        let start = self.next_global;
        self.next_global += count as usize;
        start
    }

    /// Build the single job covering a classified reference.
    /// The global range is reserved here, before any asynchronous work.
    pub fn build(
        &mut self,
        input: &InputReference,
        classification: Classification,
        buffer: Vec<u8>,
    ) -> Job {
        let global_start = self.reserve(classification.page_count);
        self.next_id += 1;

        let job = Job {
            id: JobId(self.next_id),
            owner_index: input.owner_index,
            format: classification.format,
            page_start: 0,
            page_count: classification.page_count,
            global_start,
            buffer: Some(buffer),
            source_locator: Some(input.locator.clone()),
            recovered: false,
        };
        log::debug!(
            "Job {:?}: owner {} {} pages {:?} -> global {:?}",
            job.id,
            job.owner_index,
            job.format,
            job.pages(),
            job.global_range()
        );
        job
    }
}

/// Why a job runs on the fallback path
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FallbackReason {
    /// The format only decodes on the interactive thread
    MainThreadFormat,
    /// The pre-scan found a compression subtype units cannot decode
    UnsupportedCompression(u16),
    /// No execution unit is available
    NoParallelism,
    /// A unit reported an application-level error
    UnitError,
    /// A unit disappeared while holding the job
    UnitFault,
    /// A unit asked for specific pages to be handled here
    Requested,
}

impl FallbackReason {
    /// Reroutes caused by a failure in the parallel path
    #[must_use]
    pub fn is_recovery(self) -> bool {
        matches!(self, Self::UnitError | Self::UnitFault)
    }
}

/// Routing outcome for one job
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    Parallel,
    Fallback(FallbackReason),
}

/// Deterministic routing between the parallel pool and the fallback path
#[derive(Clone, Copy, Debug)]
pub struct Router {
    parallel_available: bool,
}

impl Router {
    #[must_use]
    pub fn new(parallel_available: bool) -> Self {
        Self { parallel_available }
    }

    pub fn set_parallel_available(&mut self, available: bool) {
        self.parallel_available = available;
    }

    #[must_use]
    pub fn route(&self, job: &Job) -> Route {
        let route = match job.format.affinity() {
            DecodeAffinity::MainThread => Route::Fallback(FallbackReason::MainThreadFormat),
            DecodeAffinity::Parallel => Route::Parallel,
            DecodeAffinity::ParallelAfterPrescan => {
                let prescan = job
                    .buffer
                    .as_deref()
                    .map(tiff_probe::unsupported_compression);
                match prescan {
                    Some(Ok(Some(compression))) => {
                        Route::Fallback(FallbackReason::UnsupportedCompression(compression))
                    }
                    Some(Err(e)) => {
                        // The unit's decoder reports the real failure per page
                        log::warn!("Pre-scan of job {:?} failed: {e}", job.id);
                        Route::Parallel
                    }
                    Some(Ok(None)) | None => Route::Parallel,
                }
            }
        };

        match route {
            Route::Parallel if !self.parallel_available => {
                Route::Fallback(FallbackReason::NoParallelism)
            }
            other => other,
        }
    }
}

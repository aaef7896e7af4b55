//! Fallback renderer: single-threaded decode on the interactive thread
//!
//! Every failure here is terminal. A page that cannot be rendered becomes a
//! failure placeholder and the job moves on to its next page.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use super::cancel::CancellationToken;
use super::decode::{EncodedPage, PageDecoder, PageSource, export_png};
use super::error::DecodeFailure;
use super::fetch::Fetcher;
use super::format::DocumentFormat;
use super::job::{FallbackReason, Job};
use super::pdf::PdfRasterizer;
use super::request::PageResult;
use super::unit::panic_message;

/// A job waiting for the fallback path
#[derive(Debug)]
pub struct FallbackJob {
    pub job: Job,
    /// Only these pages; `None` is the job's whole range
    pub pages: Option<Vec<u32>>,
    pub reason: FallbackReason,
}

impl FallbackJob {
    #[must_use]
    pub fn whole(job: Job, reason: FallbackReason) -> Self {
        Self {
            job,
            pages: None,
            reason,
        }
    }

    fn requested_pages(&self) -> Vec<u32> {
        self.pages
            .clone()
            .unwrap_or_else(|| self.job.pages().collect())
    }
}

pub struct FallbackRenderer {
    queue: VecDeque<FallbackJob>,
    decoder: Arc<dyn PageDecoder>,
    pdf: Box<dyn PdfRasterizer>,
    fetcher: Arc<dyn Fetcher>,
    cancel: CancellationToken,
}

impl FallbackRenderer {
    pub fn new(
        decoder: Arc<dyn PageDecoder>,
        pdf: Box<dyn PdfRasterizer>,
        fetcher: Arc<dyn Fetcher>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue: VecDeque::new(),
            decoder,
            pdf,
            fetcher,
            cancel,
        }
    }

    pub fn enqueue(&mut self, job: FallbackJob) {
        log::debug!(
            "Job {:?} queued for fallback ({:?})",
            job.job.id,
            job.reason
        );
        self.queue.push_back(job);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Render the next queued job. Produces one result per requested page,
    /// or nothing when the session was cancelled mid-job.
    pub fn render_next(&mut self) -> Option<Vec<PageResult>> {
        let mut item = self.queue.pop_front()?;
        let pages = item.requested_pages();
        let job = &mut item.job;

        let bytes = match job.buffer.take() {
            Some(bytes) => bytes,
            None => match self.refetch(job) {
                Ok(bytes) => bytes,
                Err(_) if self.cancel.is_cancelled() => return Some(Vec::new()),
                Err(reason) => {
                    log::error!("Fallback for job {:?} has no bytes: {reason}", job.id);
                    return Some(failed_pages(job, &pages));
                }
            },
        };

        let results = self.render_pages(job, &bytes, &pages);
        if self.cancel.is_cancelled() {
            return Some(Vec::new());
        }
        Some(results)
    }

    fn refetch(&self, job: &Job) -> Result<Vec<u8>, String> {
        let locator = job
            .source_locator
            .as_deref()
            .ok_or_else(|| "no source locator".to_string())?;
        self.fetcher
            .fetch(locator, &self.cancel)
            .map(|fetched| fetched.bytes)
            .map_err(|e| e.to_string())
    }

    fn open<'a>(
        &'a self,
        format: DocumentFormat,
        bytes: &'a [u8],
    ) -> Result<Box<dyn PageSource + 'a>, DecodeFailure> {
        let opened = catch_unwind(AssertUnwindSafe(|| match format {
            DocumentFormat::Pdf => self.pdf.open(bytes),
            other => self.decoder.open(other, bytes),
        }));
        opened.unwrap_or_else(|panic| Err(DecodeFailure::engine(panic_message(&panic))))
    }

    fn render_pages(&self, job: &Job, bytes: &[u8], pages: &[u32]) -> Vec<PageResult> {
        let mut source = match self.open(job.format, bytes) {
            Ok(source) => source,
            Err(e) => {
                log::error!("Fallback could not open job {:?}: {e}", job.id);
                return failed_pages(job, pages);
            }
        };

        let mut results = Vec::with_capacity(pages.len());
        for &page in pages {
            if self.cancel.is_cancelled() {
                break;
            }

            let rendered = catch_unwind(AssertUnwindSafe(|| {
                source.render(page).and_then(|img| export_png(&img))
            }))
            .unwrap_or_else(|panic| Err(DecodeFailure::engine(panic_message(&panic))));

            let rendered = match rendered {
                Ok(encoded) => Some(encoded),
                Err(e) => {
                    log::warn!("Fallback page {page} of job {:?} failed: {e}", job.id);
                    None
                }
            };
            results.push(page_result(job, page, rendered));
        }
        results
    }
}

fn page_result(
    job: &Job,
    page: u32,
    rendered: Option<EncodedPage>,
) -> PageResult {
    PageResult {
        owner_index: job.owner_index,
        page_in_file: page,
        global_index: job.global_index_of(page),
        format: job.format,
        rendered,
    }
}

fn failed_pages(job: &Job, pages: &[u32]) -> Vec<PageResult> {
    pages.iter().map(|&page| page_result(job, page, None)).collect()
}

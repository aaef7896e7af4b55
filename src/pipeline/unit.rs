//! Execution units: one decode thread per pool slot

use std::any::Any;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use flume::{Receiver, Sender};

use super::cancel::CancellationToken;
use super::decode::{PageDecoder, export_png};
use super::job::{Batch, Job};
use super::request::{
    AssignmentId, FallbackItem, PageResult, SessionEvent, UnitEvent, UnitMessage, UnitRequest,
};

/// What the scheduler needs from a unit
pub trait UnitHandle {
    /// Hand a batch over; gives it back if the unit can no longer receive
    fn send(&self, assignment: AssignmentId, batch: Batch) -> Result<(), Batch>;

    /// The unit's thread has exited
    fn is_finished(&self) -> bool;

    /// Stop the unit without waiting for in-flight work
    fn terminate(&mut self);
}

/// A decode thread fed over a flume channel
pub struct ExecutionUnit {
    slot: usize,
    requests: Sender<UnitRequest>,
    thread: Option<JoinHandle<()>>,
}

impl ExecutionUnit {
    pub fn spawn(
        slot: usize,
        decoder: Arc<dyn PageDecoder>,
        events: Sender<SessionEvent>,
        cancel: CancellationToken,
    ) -> io::Result<Self> {
        let (request_tx, request_rx) = flume::unbounded();
        let thread = thread::Builder::new()
            .name(format!("pageflow-unit-{slot}"))
            .spawn(move || unit_worker(slot, decoder.as_ref(), request_rx, events, cancel))?;

        Ok(Self {
            slot,
            requests: request_tx,
            thread: Some(thread),
        })
    }
}

impl UnitHandle for ExecutionUnit {
    fn send(&self, assignment: AssignmentId, batch: Batch) -> Result<(), Batch> {
        match self.requests.send(UnitRequest::Decode { assignment, batch }) {
            Ok(()) => Ok(()),
            Err(flume::SendError(UnitRequest::Decode { batch, .. })) => Err(batch),
            Err(flume::SendError(UnitRequest::Shutdown)) => unreachable!("sent a decode request"),
        }
    }

    fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    fn terminate(&mut self) {
        let _ = self.requests.send(UnitRequest::Shutdown);
        // Detach: in-flight work is dropped without acknowledgment
        if self.thread.take().is_some() {
            log::debug!("Execution unit {} terminated", self.slot);
        }
    }
}

/// Unit thread body
#[expect(
    clippy::needless_pass_by_value,
    reason = "Values moved into thread, need ownership"
)]
fn unit_worker(
    slot: usize,
    decoder: &dyn PageDecoder,
    requests: Receiver<UnitRequest>,
    events: Sender<SessionEvent>,
    cancel: CancellationToken,
) {
    for request in requests {
        match request {
            UnitRequest::Decode { assignment, batch } => {
                let Some(message) = process_batch(decoder, batch, &cancel) else {
                    log::debug!("Unit {slot} dropping cancelled assignment {assignment:?}");
                    return;
                };
                let event = UnitEvent {
                    slot,
                    assignment,
                    message,
                };
                if events.send(SessionEvent::Unit(event)).is_err() {
                    return;
                }
            }

            UnitRequest::Shutdown => break,
        }
    }
}

enum JobOutcome {
    Done(Vec<PageResult>),
    Partial {
        pages: Vec<PageResult>,
        unsupported: Vec<u32>,
    },
    Failed(String),
    Cancelled,
}

/// Decode every job of a batch into one terminal message.
/// `None` means the session was cancelled mid-batch.
pub(crate) fn process_batch(
    decoder: &dyn PageDecoder,
    batch: Batch,
    cancel: &CancellationToken,
) -> Option<UnitMessage> {
    let mut completed = Vec::new();
    let mut failed = Vec::new();
    let mut reasons = Vec::new();
    let mut items = Vec::new();

    for job in batch.jobs {
        let outcome = catch_unwind(AssertUnwindSafe(|| decode_job(decoder, &job, cancel)))
            .unwrap_or_else(|panic| {
                JobOutcome::Failed(format!("decoder panicked: {}", panic_message(&panic)))
            });

        match outcome {
            JobOutcome::Done(pages) => completed.extend(pages),
            JobOutcome::Partial { pages, unsupported } => {
                completed.extend(pages);
                items.push(FallbackItem {
                    job,
                    pages: unsupported,
                });
            }
            JobOutcome::Failed(reason) => {
                reasons.push(reason);
                failed.push(job);
            }
            JobOutcome::Cancelled => return None,
        }
    }

    Some(if !failed.is_empty() {
        // Jobs that only needed some pages rerouted go back whole
        failed.extend(items.into_iter().map(|item| item.job));
        UnitMessage::Error {
            jobs: failed,
            reason: reasons.join("; "),
            completed,
        }
    } else if !items.is_empty() {
        UnitMessage::FallbackRequest { items, completed }
    } else {
        UnitMessage::Success { pages: completed }
    })
}

fn decode_job(decoder: &dyn PageDecoder, job: &Job, cancel: &CancellationToken) -> JobOutcome {
    let Some(bytes) = job.buffer.as_deref() else {
        return JobOutcome::Failed(format!("job {:?} arrived without its buffer", job.id));
    };

    let mut source = match decoder.open(job.format, bytes) {
        Ok(source) => source,
        Err(e) if e.is_unsupported() => {
            return JobOutcome::Partial {
                pages: Vec::new(),
                unsupported: job.pages().collect(),
            };
        }
        Err(e) => return JobOutcome::Failed(e.to_string()),
    };

    let mut pages = Vec::with_capacity(job.page_count as usize);
    let mut unsupported = Vec::new();
    for page in job.pages() {
        if cancel.is_cancelled() {
            return JobOutcome::Cancelled;
        }

        let rendered = match source.render(page).and_then(|img| export_png(&img)) {
            Ok(encoded) => Some(encoded),
            Err(e) if e.is_unsupported() => {
                unsupported.push(page);
                continue;
            }
            Err(e) => {
                log::warn!("Job {:?} page {page} failed to decode: {e}", job.id);
                None
            }
        };

        pages.push(PageResult {
            owner_index: job.owner_index,
            page_in_file: page,
            global_index: job.global_index_of(page),
            format: job.format,
            rendered,
        });
    }

    if unsupported.is_empty() {
        JobOutcome::Done(pages)
    } else {
        JobOutcome::Partial { pages, unsupported }
    }
}

pub(crate) fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

//! Batch scheduler: distributes queued jobs over the execution pool
//!
//! A pass never waits. It hands one batch to every idle unit and returns.
//! The session triggers the next pass from the following tick whenever a
//! unit reports back.

use std::collections::VecDeque;

use super::job::{Batch, JOBS_PER_BATCH, Job, JobTicket};
use super::request::AssignmentId;
use super::unit::UnitHandle;

/// One pool slot: a unit plus its scheduling state
struct UnitSlot {
    unit: Box<dyn UnitHandle>,
    busy: bool,
    /// Set before the batch is sent, so even an immediate reply finds it
    assignment: Option<(AssignmentId, Vec<JobTicket>)>,
    retired: bool,
}

impl UnitSlot {
    fn new(unit: Box<dyn UnitHandle>) -> Self {
        Self {
            unit,
            busy: false,
            assignment: None,
            retired: false,
        }
    }

    fn idle(&self) -> bool {
        !self.busy && !self.retired
    }

    fn retire(&mut self) -> Vec<JobTicket> {
        self.retired = true;
        self.busy = false;
        self.assignment
            .take()
            .map(|(_, tickets)| tickets)
            .unwrap_or_default()
    }
}

/// What one pass achieved
#[derive(Debug, Default)]
pub struct PassOutcome {
    pub dispatched: usize,
    /// Batches a dead unit refused; their buffers are intact
    pub undelivered: Vec<UndeliveredBatch>,
}

#[derive(Debug)]
pub struct UndeliveredBatch {
    pub slot: usize,
    pub batch: Batch,
}

/// A unit found dead while the session was polling its health
#[derive(Debug)]
pub struct FaultedSlot {
    pub slot: usize,
    /// Jobs it held; buffers went down with the unit
    pub tickets: Vec<JobTicket>,
}

pub struct BatchScheduler {
    slots: Vec<UnitSlot>,
    parallel_queue: VecDeque<Job>,
    batch_queue: VecDeque<Batch>,
    batch_ceiling: Option<usize>,
    next_assignment: u64,
}

impl BatchScheduler {
    #[must_use]
    pub fn new(units: Vec<Box<dyn UnitHandle>>, batch_ceiling: Option<usize>) -> Self {
        Self {
            slots: units.into_iter().map(UnitSlot::new).collect(),
            parallel_queue: VecDeque::new(),
            batch_queue: VecDeque::new(),
            batch_ceiling,
            next_assignment: 0,
        }
    }

    pub fn enqueue(&mut self, job: Job) {
        self.parallel_queue.push_back(job);
    }

    /// Jobs per batch: the ceiling applies, but batching itself stays at one
    fn batch_size(&self) -> usize {
        self.batch_ceiling
            .map_or(JOBS_PER_BATCH, |ceiling| ceiling.clamp(1, JOBS_PER_BATCH))
    }

    /// Wrap queued jobs into same-format batches
    fn refill_batches(&mut self) {
        let size = self.batch_size();
        while let Some(first) = self.parallel_queue.pop_front() {
            let mut batch = Batch::single(first);
            while batch.jobs.len() < size {
                match self.parallel_queue.front() {
                    Some(next) if next.format == batch.format => {
                        if let Some(job) = self.parallel_queue.pop_front() {
                            batch.jobs.push(job);
                        }
                    }
                    _ => break,
                }
            }
            self.batch_queue.push_back(batch);
        }
    }

    /// One dispatch pass over every idle unit
    pub fn pass(&mut self) -> PassOutcome {
        self.refill_batches();
        let mut outcome = PassOutcome::default();

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if self.batch_queue.is_empty() {
                break;
            }
            if !slot.idle() {
                continue;
            }
            let Some(batch) = self.batch_queue.pop_front() else {
                break;
            };

            self.next_assignment += 1;
            let assignment = AssignmentId(self.next_assignment);
            slot.busy = true;
            slot.assignment = Some((assignment, batch.tickets()));

            match slot.unit.send(assignment, batch) {
                Ok(()) => {
                    log::debug!("Assignment {assignment:?} dispatched to unit {index}");
                    outcome.dispatched += 1;
                }
                Err(batch) => {
                    log::warn!("Unit {index} refused assignment {assignment:?}; retiring it");
                    slot.retire();
                    outcome.undelivered.push(UndeliveredBatch { slot: index, batch });
                }
            }
        }

        outcome
    }

    /// Clear the busy flag for a terminal message.
    /// Returns `None` for a reply that does not match the slot's assignment.
    pub fn complete(
        &mut self,
        slot: usize,
        assignment: AssignmentId,
    ) -> Option<Vec<JobTicket>> {
        let unit = self.slots.get_mut(slot)?;
        match unit.assignment.take() {
            Some((current, tickets)) if current == assignment => {
                unit.busy = false;
                Some(tickets)
            }
            other => {
                unit.assignment = other;
                log::warn!("Stale reply {assignment:?} from unit {slot}");
                None
            }
        }
    }

    /// Retire every unit whose thread has exited, returning what they held
    pub fn reap_faults(&mut self) -> Vec<FaultedSlot> {
        let mut faulted = Vec::new();
        for (slot, unit) in self.slots.iter_mut().enumerate() {
            if unit.retired || !unit.unit.is_finished() {
                continue;
            }
            let tickets = unit.retire();
            faulted.push(FaultedSlot { slot, tickets });
        }
        faulted
    }

    /// No queued work and no unit busy
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.parallel_queue.is_empty()
            && self.batch_queue.is_empty()
            && self.slots.iter().all(|s| !s.busy)
    }

    /// At least one unit can still take work
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.slots.iter().any(|s| !s.retired)
    }

    #[must_use]
    pub fn has_queued(&self) -> bool {
        !self.parallel_queue.is_empty() || !self.batch_queue.is_empty()
    }

    #[must_use]
    pub fn busy_count(&self) -> usize {
        self.slots.iter().filter(|s| s.busy).count()
    }

    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.slots.len()
    }

    /// Take every queued job back, e.g. to divert it when no unit is left
    pub fn drain_queued(&mut self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .batch_queue
            .drain(..)
            .flat_map(|batch| batch.jobs)
            .collect();
        jobs.extend(self.parallel_queue.drain(..));
        jobs
    }

    /// Terminate every unit and forget queued and in-flight work
    pub fn terminate(&mut self) {
        self.parallel_queue.clear();
        self.batch_queue.clear();
        for slot in &mut self.slots {
            if !slot.retired {
                slot.unit.terminate();
            }
            slot.retire();
        }
    }
}

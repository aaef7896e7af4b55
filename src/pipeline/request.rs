//! Messages exchanged between the session and its execution units

use super::decode::EncodedPage;
use super::error::FetchError;
use super::fetch::FetchedBytes;
use super::format::DocumentFormat;
use super::job::{Batch, Job};

/// Identifies one batch assignment to one unit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AssignmentId(pub u64);

/// Request sent to an execution unit
#[derive(Debug)]
pub enum UnitRequest {
    Decode {
        assignment: AssignmentId,
        batch: Batch,
    },

    /// Stop after the current assignment
    Shutdown,
}

/// Decoded (or failed) page produced by a unit or the fallback path.
/// `rendered: None` is an item-level failure and still gets a placeholder.
#[derive(Debug)]
pub struct PageResult {
    pub owner_index: usize,
    pub page_in_file: u32,
    pub global_index: usize,
    pub format: DocumentFormat,
    pub rendered: Option<EncodedPage>,
}

/// Pages of a job the unit wants handled on the interactive thread
#[derive(Debug)]
pub struct FallbackItem {
    pub job: Job,
    pub pages: Vec<u32>,
}

/// Terminal message for one assignment
#[derive(Debug)]
pub enum UnitMessage {
    Success {
        pages: Vec<PageResult>,
    },

    /// The unit could not process these jobs; their buffers come back with them
    Error {
        jobs: Vec<Job>,
        reason: String,
        completed: Vec<PageResult>,
    },

    /// Some pages hit a sub-case only the fallback path can handle
    FallbackRequest {
        items: Vec<FallbackItem>,
        completed: Vec<PageResult>,
    },
}

impl UnitMessage {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Error { .. } => "error",
            Self::FallbackRequest { .. } => "fallback-request",
        }
    }
}

/// Message from a unit, tagged with who sent it and for which assignment
#[derive(Debug)]
pub struct UnitEvent {
    pub slot: usize,
    pub assignment: AssignmentId,
    pub message: UnitMessage,
}

/// Everything that arrives on the session's event channel
#[derive(Debug)]
pub enum SessionEvent {
    /// The loader finished fetching the input at `position`
    Fetched {
        position: usize,
        result: Result<FetchedBytes, FetchError>,
    },

    Unit(UnitEvent),
}

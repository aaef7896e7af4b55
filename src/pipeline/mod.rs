//! Page-decoding pipeline
//!
//! Inputs are fetched, classified and turned into one job per document.
//! Jobs run on a pool of execution units or on the single-threaded
//! fallback path, and every page lands at a global index reserved up
//! front.

mod assembler;
mod cancel;
mod classify;
mod decode;
mod error;
mod fallback;
mod fetch;
mod format;
mod handles;
mod input;
mod job;
mod pdf;
mod pool;
mod request;
mod scheduler;
mod session;
mod tiff_probe;
mod unit;

pub use assembler::{NullSink, PageAssembler, PageRecord, PageSink, PageStatus};
pub use cancel::{CancellationToken, Liveness};
pub use classify::{Classification, classify, pdf_page_count, sniff};
pub use decode::{EncodedPage, PageDecoder, PageSource, RasterDecoder, export_png};
pub use error::{ClassificationError, DecodeFailure, FetchError, InputError, UnitFault};
pub use fallback::{FallbackJob, FallbackRenderer};
#[cfg(feature = "http")]
pub use fetch::HttpFetcher;
pub use fetch::{AutoFetcher, FetchedBytes, Fetcher, FileFetcher};
pub use format::{DecodeAffinity, DocumentFormat, RasterKind};
pub use handles::{HandleRegistry, RenderedHandle};
pub use input::{InputEntry, InputReference, InputSpec};
pub use job::{
    Batch, FallbackReason, JOBS_PER_BATCH, Job, JobBuilder, JobId, JobTicket, Route, Router,
};
#[cfg(feature = "pdf")]
pub use pdf::MupdfRasterizer;
#[cfg(not(feature = "pdf"))]
pub use pdf::UnavailableRasterizer;
pub use pdf::{DEFAULT_PDF_SCALE, PdfRasterizer, default_rasterizer};
pub use pool::{DeviceHints, PoolPlan};
pub use request::{
    AssignmentId, FallbackItem, PageResult, SessionEvent, UnitEvent, UnitMessage, UnitRequest,
};
pub use scheduler::{BatchScheduler, FaultedSlot, PassOutcome, UndeliveredBatch};
pub use session::{
    DEFAULT_EVENTS_PER_POLL, DEFAULT_MAX_UNITS, LoadSession, SessionOptions, SessionProgress,
    SessionStats,
};
pub use tiff_probe::{
    PARALLEL_UNSUPPORTED_COMPRESSIONS, TiffStructureError, compressions, has_signature,
    page_count as tiff_page_count, unsupported_compression,
};
pub use unit::{ExecutionUnit, UnitHandle};

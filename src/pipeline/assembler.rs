//! Page assembly: the only writer into the ordered page list

use serde::Serialize;

use super::cancel::Liveness;
use super::format::DocumentFormat;
use super::handles::RenderedHandle;

/// Page lifecycle, with the numeric codes the viewer shell expects
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(i8)]
pub enum PageStatus {
    Pending = 0,
    Ready = 1,
    Failed = -1,
}

impl PageStatus {
    #[must_use]
    pub fn code(self) -> i8 {
        self as i8
    }
}

/// One entry of the assembled page list
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PageRecord {
    pub global_index: usize,
    pub owner_index: usize,
    pub page_in_file: u32,
    /// `None` for an input that could not be classified
    pub format: Option<DocumentFormat>,
    pub rendered: Option<RenderedHandle>,
    pub loaded: bool,
    pub status: PageStatus,
}

impl PageRecord {
    #[must_use]
    pub fn pending(
        global_index: usize,
        owner_index: usize,
        page_in_file: u32,
        format: DocumentFormat,
    ) -> Self {
        Self {
            global_index,
            owner_index,
            page_in_file,
            format: Some(format),
            rendered: None,
            loaded: false,
            status: PageStatus::Pending,
        }
    }

    /// Single failed entry standing in for an input that never classified
    #[must_use]
    pub fn unclassified(
        global_index: usize,
        owner_index: usize,
        placeholder: Option<RenderedHandle>,
    ) -> Self {
        Self {
            global_index,
            owner_index,
            page_in_file: 0,
            format: None,
            rendered: placeholder,
            loaded: true,
            status: PageStatus::Failed,
        }
    }

    #[must_use]
    pub fn ready(mut self, handle: RenderedHandle) -> Self {
        self.rendered = Some(handle);
        self.loaded = true;
        self.status = PageStatus::Ready;
        self
    }

    /// Terminal failure; `placeholder` is the shared failure image, if any
    #[must_use]
    pub fn failed(mut self, placeholder: Option<RenderedHandle>) -> Self {
        self.rendered = placeholder;
        self.loaded = true;
        self.status = PageStatus::Failed;
        self
    }
}

/// Outward page-insertion callback consumed by the viewer shell
pub trait PageSink {
    fn insert_page(&mut self, record: &PageRecord, global_index: usize);

    /// Called once after the execution pool is created; display only
    fn set_worker_count(&mut self, _count: usize) {}
}

/// Sink that discards everything
#[derive(Debug, Default)]
pub struct NullSink;

impl PageSink for NullSink {
    fn insert_page(&mut self, _record: &PageRecord, _global_index: usize) {}
}

/// Forwards insertions to another thread
impl PageSink for flume::Sender<PageRecord> {
    fn insert_page(&mut self, record: &PageRecord, _global_index: usize) {
        let _ = self.send(record.clone());
    }
}

/// Owns the ordered page list for one load session
pub struct PageAssembler {
    pages: Vec<Option<PageRecord>>,
    liveness: Liveness,
    sink: Box<dyn PageSink>,
    refused: usize,
}

impl PageAssembler {
    pub fn new(liveness: Liveness, sink: Box<dyn PageSink>) -> Self {
        Self {
            pages: Vec::new(),
            liveness,
            sink,
            refused: 0,
        }
    }

    /// Extend the list to hold `total` global indices
    pub fn reserve(&mut self, total: usize) {
        if total > self.pages.len() {
            self.pages.resize(total, None);
        }
    }

    /// Place a record at its global index, overwriting any earlier entry.
    ///
    /// Refused (returns `false`) once the session is torn down or when
    /// the index lies outside the reserved range.
    pub fn place(&mut self, record: PageRecord) -> bool {
        if !self.liveness.is_alive() {
            self.refused += 1;
            log::debug!(
                "Dropping page {} placement after teardown",
                record.global_index
            );
            return false;
        }

        let index = record.global_index;
        let Some(slot) = self.pages.get_mut(index) else {
            log::error!(
                "Page index {index} outside reserved range 0..{}",
                self.pages.len()
            );
            return false;
        };

        let record = slot.insert(record);
        self.sink.insert_page(record, index);
        true
    }

    pub(crate) fn announce_worker_count(&mut self, count: usize) {
        self.sink.set_worker_count(count);
    }

    #[must_use]
    pub fn pages(&self) -> &[Option<PageRecord>] {
        &self.pages
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&PageRecord> {
        self.pages.get(index).and_then(Option::as_ref)
    }

    /// Placements refused after teardown
    #[must_use]
    pub fn refused(&self) -> usize {
        self.refused
    }

    /// Every reserved index holds a ready or failed record
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.pages
            .iter()
            .all(|p| p.as_ref().is_some_and(|p| p.status != PageStatus::Pending))
    }
}

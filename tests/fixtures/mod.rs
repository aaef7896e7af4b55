//! Shared fixtures for the pipeline integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use image::{Rgba, RgbaImage};
use pageflow::pipeline::{
    CancellationToken, DecodeFailure, DeviceHints, DocumentFormat, FetchError, FetchedBytes,
    Fetcher, InputReference, PageDecoder, PageRecord, PageSink, PageSource, PdfRasterizer,
    RasterDecoder, SessionOptions,
};

pub fn png(width: u32, height: u32, shade: u8) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba([shade, shade, shade, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Multi-page RGB8 TIFF, one solid 3x2 page per shade
pub fn tiff(shades: &[u8]) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    {
        let mut encoder = tiff::encoder::TiffEncoder::new(&mut out).unwrap();
        for &shade in shades {
            let data = vec![shade; 3 * 2 * 3];
            encoder
                .write_image::<tiff::encoder::colortype::RGB8>(3, 2, &data)
                .unwrap();
        }
    }
    out.into_inner()
}

/// Just enough PDF structure for page counting
pub fn pdf(pages: u32) -> Vec<u8> {
    let kids: Vec<String> = (0..pages).map(|i| format!("{} 0 R", i + 3)).collect();
    let mut out = String::from("%PDF-1.4\n");
    out.push_str("1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    out.push_str(&format!(
        "2 0 obj << /Type /Pages /Kids [{}] /Count {pages} >> endobj\n",
        kids.join(" ")
    ));
    for i in 0..pages {
        out.push_str(&format!(
            "{} 0 obj << /Type /Page /Parent 2 0 R >> endobj\n",
            i + 3
        ));
    }
    out.push_str("trailer << /Root 1 0 R >>\n%%EOF\n");
    out.into_bytes()
}

pub fn hints(cores: usize) -> DeviceHints {
    DeviceHints {
        logical_cores: cores,
        memory_gb: None,
        mobile: false,
    }
}

/// Serves documents from memory, keyed by locator
#[derive(Clone, Default)]
pub struct MemoryFetcher {
    documents: HashMap<String, Vec<u8>>,
}

impl MemoryFetcher {
    pub fn with(mut self, locator: &str, bytes: Vec<u8>) -> Self {
        self.documents.insert(locator.to_string(), bytes);
        self
    }
}

impl Fetcher for MemoryFetcher {
    fn fetch(
        &self,
        locator: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchedBytes, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let bytes = self
            .documents
            .get(locator)
            .cloned()
            .ok_or_else(|| FetchError::Http {
                locator: locator.to_string(),
                detail: "not found".to_string(),
            })?;
        Ok(FetchedBytes {
            bytes,
            content_type: None,
        })
    }
}

/// PDF rasterizer that renders blank pages and honours the page count probe
pub struct StubPdf;

struct StubPdfPages {
    count: u32,
}

impl PageSource for StubPdfPages {
    fn page_count(&self) -> u32 {
        self.count
    }

    fn render(&mut self, page: u32) -> Result<RgbaImage, DecodeFailure> {
        if page >= self.count {
            return Err(DecodeFailure::PageOutOfRange {
                page,
                count: self.count,
            });
        }
        Ok(RgbaImage::from_pixel(4, 6, Rgba([255, 255, 255, 255])))
    }
}

impl PdfRasterizer for StubPdf {
    fn open<'a>(&'a self, bytes: &'a [u8]) -> Result<Box<dyn PageSource + 'a>, DecodeFailure> {
        let count = pageflow::pipeline::pdf_page_count(bytes)
            .ok_or_else(|| DecodeFailure::corrupt("no page tree"))?;
        Ok(Box::new(StubPdfPages { count }))
    }
}

/// Fails every document it is asked to open
pub struct FailingDecoder;

impl PageDecoder for FailingDecoder {
    fn open<'a>(
        &self,
        _format: DocumentFormat,
        _bytes: &'a [u8],
    ) -> Result<Box<dyn PageSource + 'a>, DecodeFailure> {
        Err(DecodeFailure::engine("decoder unavailable"))
    }
}

/// Panic payload whose destructor panics again
struct Poisoned;

impl Drop for Poisoned {
    fn drop(&mut self) {
        panic!("unit thread torn down");
    }
}

/// Takes its unit thread down: the job panic is caught, but dropping the
/// caught payload panics outside the per-job guard
pub struct UnitKillingDecoder;

impl PageDecoder for UnitKillingDecoder {
    fn open<'a>(
        &self,
        _format: DocumentFormat,
        _bytes: &'a [u8],
    ) -> Result<Box<dyn PageSource + 'a>, DecodeFailure> {
        std::panic::panic_any(Poisoned)
    }
}

/// Delegates to `RasterDecoder` but reports one page as unsupported
pub struct PickyDecoder {
    pub unsupported_page: u32,
}

struct PickyPages<'a> {
    inner: Box<dyn PageSource + 'a>,
    unsupported_page: u32,
}

impl PageSource for PickyPages<'_> {
    fn page_count(&self) -> u32 {
        self.inner.page_count()
    }

    fn render(&mut self, page: u32) -> Result<RgbaImage, DecodeFailure> {
        if page == self.unsupported_page {
            return Err(DecodeFailure::unsupported("exotic photometric"));
        }
        self.inner.render(page)
    }
}

impl PageDecoder for PickyDecoder {
    fn open<'a>(
        &self,
        format: DocumentFormat,
        bytes: &'a [u8],
    ) -> Result<Box<dyn PageSource + 'a>, DecodeFailure> {
        Ok(Box::new(PickyPages {
            inner: RasterDecoder.open(format, bytes)?,
            unsupported_page: self.unsupported_page,
        }))
    }
}

/// Everything the viewer shell would have been told
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub inserts: Arc<Mutex<Vec<(PageRecord, usize)>>>,
    pub worker_counts: Arc<Mutex<Vec<usize>>>,
}

impl RecordingSink {
    pub fn insert_count(&self) -> usize {
        self.inserts.lock().unwrap().len()
    }
}

impl PageSink for RecordingSink {
    fn insert_page(&mut self, record: &PageRecord, global_index: usize) {
        self.inserts
            .lock()
            .unwrap()
            .push((record.clone(), global_index));
    }

    fn set_worker_count(&mut self, count: usize) {
        self.worker_counts.lock().unwrap().push(count);
    }
}

pub fn inputs(locators: &[&str]) -> Vec<InputReference> {
    locators
        .iter()
        .enumerate()
        .map(|(owner_index, locator)| InputReference {
            locator: (*locator).to_string(),
            owner_index,
        })
        .collect()
}

pub fn options(cores: usize, fetcher: MemoryFetcher) -> SessionOptions {
    SessionOptions {
        hints: hints(cores),
        fetcher: Arc::new(fetcher),
        pdf: Box::new(StubPdf),
        ..SessionOptions::default()
    }
}

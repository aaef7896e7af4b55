//! Format and page-count classification
//!
//! Runs synchronously on the interactive thread before a job is queued, so
//! every probe here reads structure only and never decodes pixel data.

use std::sync::LazyLock;

use regex::bytes::Regex;

use super::error::ClassificationError;
use super::format::{DocumentFormat, RasterKind};
use super::tiff_probe;

/// `%PDF-` may be preceded by junk within this many bytes
const PDF_HEADER_WINDOW: usize = 1024;
/// Size of the head and tail windows searched before a full PDF scan
const PDF_PROBE_WINDOW: usize = 256 * 1024;
/// How far around a `/Type /Pages` marker its dictionary is searched
const PDF_DICT_REACH: usize = 1024;

static PAGES_NODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/Type\s*/Pages\b").expect("Failed to compile pages node regex"));
static COUNT_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/Count\s+(\d+)").expect("Failed to compile count regex"));
static PAGE_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/Type\s*/Page\b").expect("Failed to compile page object regex"));

/// Result of classifying one document
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classification {
    pub format: DocumentFormat,
    pub page_count: u32,
}

/// Determine format and page count for a fetched document.
///
/// Signature sniffing wins; the transport content type and then the
/// locator suffix are consulted only when the bytes are not recognised.
pub fn classify(
    bytes: &[u8],
    locator: &str,
    content_type: Option<&str>,
) -> Result<Classification, ClassificationError> {
    if bytes.is_empty() {
        return Err(ClassificationError::Empty {
            locator: locator.to_string(),
        });
    }

    let format = sniff(bytes)
        .or_else(|| content_type.and_then(DocumentFormat::from_content_type))
        .or_else(|| DocumentFormat::from_locator(locator))
        .ok_or_else(|| ClassificationError::UnknownFormat {
            locator: locator.to_string(),
        })?;

    let page_count = match format {
        DocumentFormat::Pdf => pdf_page_count(bytes)
            .ok_or(ClassificationError::PageCount { format })?,
        DocumentFormat::Tiff => {
            let count = tiff_probe::page_count(bytes)?;
            u32::try_from(count).map_err(|_| ClassificationError::PageCount { format })?
        }
        DocumentFormat::Raster(_) => 1,
    };

    if page_count == 0 {
        return Err(ClassificationError::PageCount { format });
    }

    log::debug!("Classified {locator} as {format} with {page_count} page(s)");
    Ok(Classification { format, page_count })
}

/// Identify a format from its byte signature alone
#[must_use]
pub fn sniff(bytes: &[u8]) -> Option<DocumentFormat> {
    if bytes.starts_with(b"%PDF-") {
        return Some(DocumentFormat::Pdf);
    }
    if tiff_probe::has_signature(bytes) {
        return Some(DocumentFormat::Tiff);
    }
    if let Some(kind) = image::guess_format(bytes)
        .ok()
        .and_then(RasterKind::from_image_format)
    {
        return Some(DocumentFormat::Raster(kind));
    }

    let head = &bytes[..bytes.len().min(PDF_HEADER_WINDOW)];
    head.windows(5)
        .any(|w| w == b"%PDF-")
        .then_some(DocumentFormat::Pdf)
}

/// Page count of a PDF from its page tree, without parsing objects.
///
/// The head and tail of the file are searched first since that is where
/// writers usually put the catalog and page-tree root; only if neither
/// shows a `/Pages` node is the whole file scanned.
#[must_use]
pub fn pdf_page_count(bytes: &[u8]) -> Option<u32> {
    if bytes.len() > 2 * PDF_PROBE_WINDOW {
        let head = &bytes[..PDF_PROBE_WINDOW];
        let tail = &bytes[bytes.len() - PDF_PROBE_WINDOW..];
        if let Some(count) = [head, tail].into_iter().filter_map(page_tree_count).max() {
            return Some(count);
        }
    }

    page_tree_count(bytes).or_else(|| {
        let objects = PAGE_OBJECT.find_iter(bytes).count();
        u32::try_from(objects).ok().filter(|&n| n > 0)
    })
}

/// Largest `/Count` found inside any `/Type /Pages` dictionary
fn page_tree_count(haystack: &[u8]) -> Option<u32> {
    PAGES_NODE
        .find_iter(haystack)
        .filter_map(|node| {
            let lo = node.start().saturating_sub(PDF_DICT_REACH);
            let dict_start = haystack[lo..node.start()]
                .windows(2)
                .rposition(|w| w == b"<<")
                .map_or(lo, |at| lo + at);
            let dict_end = (node.end() + PDF_DICT_REACH).min(haystack.len());

            COUNT_ENTRY
                .captures(&haystack[dict_start..dict_end])
                .and_then(|caps| caps.get(1))
                .and_then(|digits| std::str::from_utf8(digits.as_bytes()).ok())
                .and_then(|digits| digits.parse::<u32>().ok())
        })
        .max()
}

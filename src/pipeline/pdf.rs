//! PDF rasterization on the interactive thread
//!
//! The PDF engine is not `Send`, so its rasterizer is owned by the fallback
//! renderer and never crosses into an execution unit.

use super::decode::PageSource;
use super::error::DecodeFailure;
#[cfg(not(feature = "pdf"))]
use super::format::DocumentFormat;

/// Default magnification applied to PDF user space (72 dpi)
pub const DEFAULT_PDF_SCALE: f32 = 1.5;

/// Opens PDF bytes for page rasterization
pub trait PdfRasterizer {
    fn open<'a>(&'a self, bytes: &'a [u8]) -> Result<Box<dyn PageSource + 'a>, DecodeFailure>;
}

/// Rasterizer used when the crate is built without a PDF engine.
/// Every PDF page becomes a failure placeholder.
#[cfg(not(feature = "pdf"))]
#[derive(Debug, Default)]
pub struct UnavailableRasterizer;

#[cfg(not(feature = "pdf"))]
impl PdfRasterizer for UnavailableRasterizer {
    fn open<'a>(&'a self, _bytes: &'a [u8]) -> Result<Box<dyn PageSource + 'a>, DecodeFailure> {
        Err(DecodeFailure::NoDecoder {
            format: DocumentFormat::Pdf,
        })
    }
}

/// Rasterizer for the current build
#[must_use]
pub fn default_rasterizer() -> Box<dyn PdfRasterizer> {
    #[cfg(feature = "pdf")]
    return Box::new(mupdf_backend::MupdfRasterizer::default());

    #[cfg(not(feature = "pdf"))]
    Box::new(UnavailableRasterizer)
}

#[cfg(feature = "pdf")]
pub use mupdf_backend::MupdfRasterizer;

#[cfg(feature = "pdf")]
mod mupdf_backend {
    use image::RgbaImage;
    use mupdf::{Colorspace, Document, Matrix, Pixmap};

    use super::{DEFAULT_PDF_SCALE, PageSource, PdfRasterizer};
    use crate::pipeline::error::DecodeFailure;

    /// MuPDF-backed rasterizer
    #[derive(Debug)]
    pub struct MupdfRasterizer {
        scale: f32,
    }

    impl MupdfRasterizer {
        #[must_use]
        pub fn with_scale(scale: f32) -> Self {
            Self {
                scale: scale.max(0.1),
            }
        }
    }

    impl Default for MupdfRasterizer {
        fn default() -> Self {
            Self::with_scale(DEFAULT_PDF_SCALE)
        }
    }

    impl PdfRasterizer for MupdfRasterizer {
        fn open<'a>(&'a self, bytes: &'a [u8]) -> Result<Box<dyn PageSource + 'a>, DecodeFailure> {
            let doc = Document::from_bytes(bytes, "application/pdf")?;
            let count = u32::try_from(doc.page_count()?).unwrap_or(0);
            Ok(Box::new(MupdfPages {
                doc,
                count,
                scale: self.scale,
            }))
        }
    }

    struct MupdfPages {
        doc: Document,
        count: u32,
        scale: f32,
    }

    impl PageSource for MupdfPages {
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
            let index = i32::try_from(page).map_err(|_| DecodeFailure::PageOutOfRange {
                page,
                count: self.count,
            })?;

            let page = self.doc.load_page(index)?;
            let transform = Matrix::new_scale(self.scale, self.scale);
            let pixmap = page.to_pixmap(&transform, &Colorspace::device_rgb(), false, false)?;
            pixmap_to_rgba(&pixmap)
        }
    }

    fn pixmap_to_rgba(pixmap: &Pixmap) -> Result<RgbaImage, DecodeFailure> {
        let n = pixmap.n() as usize;
        if n < 3 {
            return Err(DecodeFailure::unsupported(format!(
                "pixmap with {n} channels"
            )));
        }

        let width = pixmap.width() as usize;
        let height = pixmap.height() as usize;
        let stride = pixmap.stride() as usize;
        let samples = pixmap.samples();
        let row_bytes = width * n;
        if samples.len() < stride.saturating_mul(height) || row_bytes > stride {
            return Err(DecodeFailure::corrupt("pixmap buffer size mismatch"));
        }

        let mut out = Vec::with_capacity(width * height * 4);
        for y in 0..height {
            let row = &samples[y * stride..y * stride + row_bytes];
            for px in row.chunks_exact(n) {
                let alpha = if n > 3 { px[3] } else { 255 };
                out.extend_from_slice(&[px[0], px[1], px[2], alpha]);
            }
        }

        RgbaImage::from_raw(pixmap.width(), pixmap.height(), out)
            .ok_or_else(|| DecodeFailure::corrupt("pixmap dimensions do not match samples"))
    }
}

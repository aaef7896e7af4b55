//! Page decoders and raster export

use std::io::Cursor;

use base64::Engine;
use image::RgbaImage;

use super::error::DecodeFailure;
use super::format::{DocumentFormat, RasterKind};
use super::tiff_probe;

/// An opened document that renders pages on demand
pub trait PageSource {
    fn page_count(&self) -> u32;

    /// Render one zero-based page
    fn render(&mut self, page: u32) -> Result<RgbaImage, DecodeFailure>;
}

/// Decoder usable from any execution unit
pub trait PageDecoder: Send + Sync {
    fn open<'a>(
        &self,
        format: DocumentFormat,
        bytes: &'a [u8],
    ) -> Result<Box<dyn PageSource + 'a>, DecodeFailure>;
}

/// Decoded page exported to a self-contained PNG blob
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedPage {
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

impl EncodedPage {
    /// `data:` URL usable wherever a blob URL would be
    #[must_use]
    pub fn to_data_url(&self) -> String {
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&self.png)
        )
    }
}

/// Export a raster to a PNG blob
pub fn export_png(image: &RgbaImage) -> Result<EncodedPage, DecodeFailure> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, image::ImageFormat::Png)?;
    Ok(EncodedPage {
        width: image.width(),
        height: image.height(),
        png: out.into_inner(),
    })
}

/// Rasters through `image`, TIFF pages through `tiff`
#[derive(Clone, Debug, Default)]
pub struct RasterDecoder;

impl PageDecoder for RasterDecoder {
    fn open<'a>(
        &self,
        format: DocumentFormat,
        bytes: &'a [u8],
    ) -> Result<Box<dyn PageSource + 'a>, DecodeFailure> {
        match format {
            DocumentFormat::Raster(kind) => Ok(Box::new(SingleRaster { bytes, kind })),
            DocumentFormat::Tiff => Ok(Box::new(TiffPages::open(bytes)?)),
            DocumentFormat::Pdf => Err(DecodeFailure::NoDecoder { format }),
        }
    }
}

struct SingleRaster<'a> {
    bytes: &'a [u8],
    kind: RasterKind,
}

impl PageSource for SingleRaster<'_> {
    fn page_count(&self) -> u32 {
        1
    }

    fn render(&mut self, page: u32) -> Result<RgbaImage, DecodeFailure> {
        if page != 0 {
            return Err(DecodeFailure::PageOutOfRange { page, count: 1 });
        }
        let decoded = image::load_from_memory_with_format(self.bytes, self.kind.image_format())?;
        Ok(decoded.to_rgba8())
    }
}

struct TiffPages<'a> {
    decoder: tiff::decoder::Decoder<Cursor<&'a [u8]>>,
    count: u32,
}

impl<'a> TiffPages<'a> {
    fn open(bytes: &'a [u8]) -> Result<Self, DecodeFailure> {
        let count = tiff_probe::page_count(bytes)
            .map_err(|e| DecodeFailure::corrupt(e.to_string()))?;
        let decoder = tiff::decoder::Decoder::new(Cursor::new(bytes))?;
        Ok(Self {
            decoder,
            count: u32::try_from(count).unwrap_or(u32::MAX),
        })
    }
}

impl PageSource for TiffPages<'_> {
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

        self.decoder.seek_to_image(page as usize)?;
        let (width, height) = self.decoder.dimensions()?;
        let color = self.decoder.colortype()?;

        let samples = match self.decoder.read_image()? {
            tiff::decoder::DecodingResult::U8(samples) => samples,
            tiff::decoder::DecodingResult::U16(samples) => {
                samples.into_iter().map(|s| (s >> 8) as u8).collect()
            }
            _ => {
                return Err(DecodeFailure::unsupported(format!(
                    "sample format of {color:?}"
                )));
            }
        };

        tiff_samples_to_rgba(color, width, height, samples)
    }
}

fn tiff_samples_to_rgba(
    color: tiff::ColorType,
    width: u32,
    height: u32,
    samples: Vec<u8>,
) -> Result<RgbaImage, DecodeFailure> {
    use tiff::ColorType;

    let depth_ok = |bits: u8| bits == 8 || bits == 16;
    let rgba: Vec<u8> = match color {
        ColorType::Gray(bits) if depth_ok(bits) => {
            samples.iter().flat_map(|&g| [g, g, g, 255]).collect()
        }
        ColorType::GrayA(bits) if depth_ok(bits) => samples
            .chunks_exact(2)
            .flat_map(|px| [px[0], px[0], px[0], px[1]])
            .collect(),
        ColorType::RGB(bits) if depth_ok(bits) => samples
            .chunks_exact(3)
            .flat_map(|px| [px[0], px[1], px[2], 255])
            .collect(),
        ColorType::RGBA(bits) if depth_ok(bits) => samples,
        ColorType::CMYK(bits) if depth_ok(bits) => samples
            .chunks_exact(4)
            .flat_map(|px| {
                let k = 255 - u16::from(px[3]);
                let channel = |c: u8| ((255 - u16::from(c)) * k / 255) as u8;
                [channel(px[0]), channel(px[1]), channel(px[2]), 255]
            })
            .collect(),
        other => {
            return Err(DecodeFailure::unsupported(format!(
                "TIFF color type {other:?}"
            )));
        }
    };

    RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| DecodeFailure::corrupt("TIFF sample buffer does not match dimensions"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn png_fixture(width: u32, height: u32, shade: u8) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, image::Rgba([shade, shade, shade, 255]));
        export_png(&img).unwrap().png
    }

    /// Real multi-page RGB8 TIFF, one solid page per shade
    pub(crate) fn tiff_fixture(shades: &[u8]) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        {
            let mut encoder = tiff::encoder::TiffEncoder::new(&mut out).unwrap();
            for &shade in shades {
                let data = vec![shade; 3 * 3 * 2];
                encoder
                    .write_image::<tiff::encoder::colortype::RGB8>(3, 2, &data)
                    .unwrap();
            }
        }
        out.into_inner()
    }

    #[test]
    fn decodes_single_raster() {
        let bytes = png_fixture(4, 3, 90);
        let mut source = RasterDecoder
            .open(DocumentFormat::Raster(RasterKind::Png), &bytes)
            .unwrap();
        assert_eq!(source.page_count(), 1);
        let page = source.render(0).unwrap();
        assert_eq!(page.dimensions(), (4, 3));
        assert_eq!(page.get_pixel(0, 0).0, [90, 90, 90, 255]);
        assert!(matches!(
            source.render(1),
            Err(DecodeFailure::PageOutOfRange { page: 1, count: 1 })
        ));
    }

    #[test]
    fn decodes_every_tiff_page_in_any_order() {
        let bytes = tiff_fixture(&[10, 20, 30]);
        let mut source = RasterDecoder.open(DocumentFormat::Tiff, &bytes).unwrap();
        assert_eq!(source.page_count(), 3);

        for page in [2u32, 0, 1] {
            let img = source.render(page).unwrap();
            assert_eq!(img.dimensions(), (3, 2));
            let shade = (page as u8 + 1) * 10;
            assert_eq!(img.get_pixel(1, 1).0, [shade, shade, shade, 255]);
        }
    }

    #[test]
    fn corrupt_raster_is_an_image_error() {
        let mut source = RasterDecoder
            .open(DocumentFormat::Raster(RasterKind::Png), b"\x89PNG\r\n\x1a\ngarbage")
            .unwrap();
        assert!(matches!(source.render(0), Err(DecodeFailure::Image(_))));
    }

    #[test]
    fn pdf_has_no_parallel_decoder() {
        assert!(matches!(
            RasterDecoder.open(DocumentFormat::Pdf, b"%PDF-1.4"),
            Err(DecodeFailure::NoDecoder { .. })
        ));
    }

    #[test]
    fn cmyk_converts_to_rgb() {
        let img = tiff_samples_to_rgba(tiff::ColorType::CMYK(8), 1, 1, vec![255, 0, 0, 0]).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [0, 255, 255, 255]);
    }

    #[test]
    fn export_round_trips_dimensions_and_data_url() {
        let page = export_png(&RgbaImage::new(5, 7)).unwrap();
        assert_eq!((page.width, page.height), (5, 7));
        assert!(page.to_data_url().starts_with("data:image/png;base64,iVBOR"));
    }
}

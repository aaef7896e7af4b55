//! Document formats understood by the pipeline

use std::fmt;

use serde::Serialize;

/// Single-page raster encodings
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RasterKind {
    Png,
    Jpeg,
    Gif,
    Bmp,
    WebP,
}

impl RasterKind {
    #[must_use]
    pub fn image_format(self) -> image::ImageFormat {
        match self {
            Self::Png => image::ImageFormat::Png,
            Self::Jpeg => image::ImageFormat::Jpeg,
            Self::Gif => image::ImageFormat::Gif,
            Self::Bmp => image::ImageFormat::Bmp,
            Self::WebP => image::ImageFormat::WebP,
        }
    }

    #[must_use]
    pub fn from_image_format(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Png => Some(Self::Png),
            image::ImageFormat::Jpeg => Some(Self::Jpeg),
            image::ImageFormat::Gif => Some(Self::Gif),
            image::ImageFormat::Bmp => Some(Self::Bmp),
            image::ImageFormat::WebP => Some(Self::WebP),
            _ => None,
        }
    }
}

/// Where a format's pages may be decoded
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeAffinity {
    /// Any execution unit can decode it
    Parallel,
    /// Parallel unless the structural pre-scan finds an unsupported subtype
    ParallelAfterPrescan,
    /// Only the interactive thread owns a decoder for it
    MainThread,
}

/// Classified document format
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Pdf,
    Tiff,
    Raster(RasterKind),
}

impl DocumentFormat {
    /// Whether the format can carry more than one page
    #[must_use]
    pub fn is_paginated(self) -> bool {
        matches!(self, Self::Pdf | Self::Tiff)
    }

    #[must_use]
    pub fn affinity(self) -> DecodeAffinity {
        match self {
            Self::Pdf => DecodeAffinity::MainThread,
            Self::Tiff => DecodeAffinity::ParallelAfterPrescan,
            Self::Raster(_) => DecodeAffinity::Parallel,
        }
    }

    /// Map a transport content type (`image/png; charset=...`) to a format
    #[must_use]
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "application/pdf" | "application/x-pdf" => Some(Self::Pdf),
            "image/tiff" | "image/tiff-fx" => Some(Self::Tiff),
            "image/png" => Some(Self::Raster(RasterKind::Png)),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Raster(RasterKind::Jpeg)),
            "image/gif" => Some(Self::Raster(RasterKind::Gif)),
            "image/bmp" | "image/x-bmp" | "image/x-ms-bmp" => Some(Self::Raster(RasterKind::Bmp)),
            "image/webp" => Some(Self::Raster(RasterKind::WebP)),
            _ => None,
        }
    }

    /// Map a locator's suffix to a format, ignoring query strings and fragments
    #[must_use]
    pub fn from_locator(locator: &str) -> Option<Self> {
        let path = locator
            .split(['?', '#'])
            .next()
            .unwrap_or_default();
        let file_name = path.rsplit(['/', '\\']).next().unwrap_or(path);
        let (_, ext) = file_name.rsplit_once('.')?;
        let ext = ext.to_ascii_lowercase();

        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "tif" | "tiff" => Some(Self::Tiff),
            other => image::ImageFormat::from_extension(other)
                .and_then(RasterKind::from_image_format)
                .map(Self::Raster),
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pdf => write!(f, "pdf"),
            Self::Tiff => write!(f, "tiff"),
            Self::Raster(kind) => write!(f, "{}", format!("{kind:?}").to_ascii_lowercase()),
        }
    }
}

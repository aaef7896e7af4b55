//! Structural TIFF probing
//!
//! Walks the top-level IFD chain without touching strip or tile data, so
//! page counting and the compression pre-scan cost a few reads per page.

use std::collections::HashSet;

/// Compression tag
const TAG_COMPRESSION: u16 = 259;
/// Hard limit on the IFD chain length
const MAX_IFDS: usize = 65_536;

const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;

/// Compression subtypes the parallel decoder cannot handle:
/// CCITT RLE, CCITT T.4, CCITT T.6, old-style JPEG, JPEG 2000
pub const PARALLEL_UNSUPPORTED_COMPRESSIONS: &[u16] = &[2, 3, 4, 6, 34712];

#[derive(Debug, thiserror::Error)]
pub enum TiffStructureError {
    #[error("not a TIFF header")]
    BadHeader,

    #[error("IFD offset {offset} lies outside the {len}-byte file")]
    OffsetOutOfBounds { offset: u64, len: usize },

    #[error("IFD chain longer than 65536 entries")]
    TooManyIfds,

    #[error("IFDs claim {entries} entries, more than a {len}-byte file can hold")]
    OverlappingIfds { entries: u64, len: usize },
}

#[derive(Clone, Copy, Debug)]
enum Endian {
    Little,
    Big,
}

struct Reader<'a> {
    bytes: &'a [u8],
    endian: Endian,
    big_tiff: bool,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Result<(Self, u64), TiffStructureError> {
        let endian = match bytes.get(..2) {
            Some(b"II") => Endian::Little,
            Some(b"MM") => Endian::Big,
            _ => return Err(TiffStructureError::BadHeader),
        };
        let mut reader = Self {
            bytes,
            endian,
            big_tiff: false,
        };

        match reader.u16_at(2) {
            Some(42) => {
                let first = reader.u32_at(4).ok_or(TiffStructureError::BadHeader)?;
                Ok((reader, u64::from(first)))
            }
            Some(43) => {
                // BigTIFF: offset size (8) and a zero pad precede the first offset
                if reader.u16_at(4) != Some(8) {
                    return Err(TiffStructureError::BadHeader);
                }
                reader.big_tiff = true;
                let first = reader.u64_at(8).ok_or(TiffStructureError::BadHeader)?;
                Ok((reader, first))
            }
            _ => Err(TiffStructureError::BadHeader),
        }
    }

    fn slice<const N: usize>(&self, offset: u64) -> Option<[u8; N]> {
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(N)?;
        self.bytes.get(start..end)?.try_into().ok()
    }

    fn u16_at(&self, offset: u64) -> Option<u16> {
        let raw = self.slice::<2>(offset)?;
        Some(match self.endian {
            Endian::Little => u16::from_le_bytes(raw),
            Endian::Big => u16::from_be_bytes(raw),
        })
    }

    fn u32_at(&self, offset: u64) -> Option<u32> {
        let raw = self.slice::<4>(offset)?;
        Some(match self.endian {
            Endian::Little => u32::from_le_bytes(raw),
            Endian::Big => u32::from_be_bytes(raw),
        })
    }

    fn u64_at(&self, offset: u64) -> Option<u64> {
        let raw = self.slice::<8>(offset)?;
        Some(match self.endian {
            Endian::Little => u64::from_le_bytes(raw),
            Endian::Big => u64::from_be_bytes(raw),
        })
    }

    fn header_len(&self) -> u64 {
        if self.big_tiff { 8 } else { 2 }
    }

    fn entry_len(&self) -> u64 {
        if self.big_tiff { 20 } else { 12 }
    }

    fn file_len(&self) -> u64 {
        u64::try_from(self.bytes.len()).unwrap_or(u64::MAX)
    }

    /// Entry count of the IFD at `ifd`, or `None` when its entries run past the file
    fn entry_count(&self, ifd: u64) -> Option<u64> {
        let count = if self.big_tiff {
            self.u64_at(ifd)?
        } else {
            u64::from(self.u16_at(ifd)?)
        };
        let end = self.entry_offset(ifd, count)?;
        (end <= self.file_len()).then_some(count)
    }

    fn entry_offset(&self, ifd: u64, index: u64) -> Option<u64> {
        index
            .checked_mul(self.entry_len())?
            .checked_add(self.header_len())?
            .checked_add(ifd)
    }

    fn next_ifd(&self, ifd: u64, count: u64) -> Option<u64> {
        let at = self.entry_offset(ifd, count)?;
        if self.big_tiff {
            self.u64_at(at)
        } else {
            self.u32_at(at).map(u64::from)
        }
    }

    /// Value of a SHORT or LONG single-valued tag stored inline
    fn inline_value(&self, entry: u64) -> Option<u32> {
        let kind = self.u16_at(entry + 2)?;
        let value_at = if self.big_tiff { entry + 12 } else { entry + 8 };
        match kind {
            TYPE_SHORT => self.u16_at(value_at).map(u32::from),
            TYPE_LONG => self.u32_at(value_at),
            _ => None,
        }
    }

    fn offsets(&self, first: u64) -> Result<Vec<(u64, u64)>, TiffStructureError> {
        let mut seen = HashSet::new();
        let mut ifds = Vec::new();
        let mut next = first;
        // Disjoint IFDs can never claim more entries than the file has room for
        let entry_budget = self.file_len() / self.entry_len();
        let mut entries: u64 = 0;

        while next != 0 {
            if !seen.insert(next) {
                log::warn!("TIFF IFD chain loops back to offset {next}, stopping");
                break;
            }
            if ifds.len() >= MAX_IFDS {
                return Err(TiffStructureError::TooManyIfds);
            }

            let Some(count) = self.entry_count(next) else {
                if ifds.is_empty() {
                    return Err(TiffStructureError::OffsetOutOfBounds {
                        offset: next,
                        len: self.bytes.len(),
                    });
                }
                log::warn!("TIFF IFD offset {next} is out of bounds, truncating chain");
                break;
            };

            entries = entries.saturating_add(count);
            if entries > entry_budget {
                return Err(TiffStructureError::OverlappingIfds {
                    entries,
                    len: self.bytes.len(),
                });
            }

            ifds.push((next, count));
            next = self.next_ifd(next, count).unwrap_or(0);
        }

        if ifds.is_empty() {
            return Err(TiffStructureError::OffsetOutOfBounds {
                offset: first,
                len: self.bytes.len(),
            });
        }
        Ok(ifds)
    }
}

/// Whether the bytes start with a classic or BigTIFF header
#[must_use]
pub fn has_signature(bytes: &[u8]) -> bool {
    matches!(
        bytes.get(..4),
        Some(b"II*\0" | b"MM\0*" | b"II+\0" | b"MM\0+")
    )
}

/// Number of top-level IFDs (pages)
pub fn page_count(bytes: &[u8]) -> Result<usize, TiffStructureError> {
    let (reader, first) = Reader::new(bytes)?;
    Ok(reader.offsets(first)?.len())
}

/// Compression tag of every top-level IFD, in page order.
/// IFDs without the tag report 1 (uncompressed), as the format defines.
pub fn compressions(bytes: &[u8]) -> Result<Vec<u16>, TiffStructureError> {
    let (reader, first) = Reader::new(bytes)?;
    let ifds = reader.offsets(first)?;

    Ok(ifds
        .into_iter()
        .map(|(ifd, count)| {
            (0..count)
                .filter_map(|i| reader.entry_offset(ifd, i))
                .find(|&entry| reader.u16_at(entry) == Some(TAG_COMPRESSION))
                .and_then(|entry| reader.inline_value(entry))
                .and_then(|value| u16::try_from(value).ok())
                .unwrap_or(1)
        })
        .collect())
}

/// First compression subtype in the file the parallel decoder cannot handle
pub fn unsupported_compression(bytes: &[u8]) -> Result<Option<u16>, TiffStructureError> {
    Ok(compressions(bytes)?
        .into_iter()
        .find(|c| PARALLEL_UNSUPPORTED_COMPRESSIONS.contains(c)))
}

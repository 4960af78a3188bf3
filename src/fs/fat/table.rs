use super::{FatWidth, RESERVED_ENTRIES};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum TableError {
    #[error("cluster {index} is outside of the table ({entries} entries)")]
    OutOfRange { index: u32, entries: u32 },
    #[error("entry {0} is reserved")]
    ReservedEntry(u32),
    #[error("{value:#x} is not a valid {width} entry")]
    InvalidValue { value: u32, width: FatWidth },
    #[error("serialized table has {actual} bytes, expected at least {expected}")]
    Truncated { actual: usize, expected: usize },
}

/// In-memory file allocation table.
///
/// Entries are kept unpacked, one `u32` per cluster, and only packed to the
/// on-disk width by [`FatTable::serialize`]. Entries 0 and 1 can only be set
/// before the table is sealed.
#[derive(Debug, Clone)]
pub struct FatTable {
    width: FatWidth,
    entries: Vec<u32>,
    bad_clusters: u32,
    sealed: bool,
}

impl FatTable {
    /// Zero filled table, open for initialization of the reserved entries.
    pub fn new(width: FatWidth, entry_count: u32) -> Self {
        Self {
            width,
            entries: vec![0; entry_count as usize],
            bad_clusters: 0,
            sealed: false,
        }
    }

    /// Table with entry 0 carrying the media descriptor and entry 1 an
    /// end-of-chain marker.
    pub fn with_media(width: FatWidth, entry_count: u32, media: u8) -> Result<Self, TableError> {
        let mut table = Self::new(width, entry_count);
        table.mark(0, (width.mask() & !0xFF) | media as u32)?;
        table.mark(1, width.mask())?;
        table.seal();
        Ok(table)
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    #[inline]
    pub fn width(&self) -> FatWidth {
        self.width
    }

    #[inline]
    pub fn entry_count(&self) -> u32 {
        self.entries.len() as u32
    }

    #[inline]
    pub fn bad_cluster_count(&self) -> u32 {
        self.bad_clusters
    }

    pub fn free_cluster_count(&self) -> u32 {
        self.data_entries().filter(|(_, x)| *x == 0).count() as u32
    }

    /// First free cluster at or after `from`.
    pub fn first_free(&self, from: u32) -> Option<u32> {
        self.data_entries()
            .skip_while(|(i, _)| *i < from)
            .find(|(_, x)| *x == 0)
            .map(|(i, _)| i)
    }

    pub fn is_bad(&self, index: u32) -> bool {
        index >= RESERVED_ENTRIES
            && self
                .entries
                .get(index as usize)
                .map_or(false, |x| self.width.is_bad(*x))
    }

    pub fn read(&self, index: u32) -> Result<u32, TableError> {
        self.entries
            .get(index as usize)
            .copied()
            .ok_or(TableError::OutOfRange {
                index,
                entries: self.entry_count(),
            })
    }

    /// Sets entry `index`, returns whether the stored value changed.
    pub fn mark(&mut self, index: u32, value: u32) -> Result<bool, TableError> {
        if index >= self.entry_count() {
            return Err(TableError::OutOfRange {
                index,
                entries: self.entry_count(),
            });
        }

        let value = self.check_value(index, value)?;
        let old = self.entries[index as usize];
        if old == value {
            return Ok(false);
        }

        if index >= RESERVED_ENTRIES {
            match (self.width.is_bad(old), self.width.is_bad(value)) {
                (false, true) => self.bad_clusters += 1,
                (true, false) => self.bad_clusters -= 1,
                _ => (),
            }
        }

        self.entries[index as usize] = value;
        Ok(true)
    }

    fn check_value(&self, index: u32, value: u32) -> Result<u32, TableError> {
        let width = self.width;
        let masked = value & width.mask();
        if width != FatWidth::Fat32 && masked != value {
            return Err(TableError::InvalidValue { value, width });
        }

        if index < RESERVED_ENTRIES {
            if self.sealed {
                return Err(TableError::ReservedEntry(index));
            }
            return Ok(masked);
        }

        let valid = masked == 0
            || (masked >= RESERVED_ENTRIES && masked < self.entry_count())
            || masked >= width.bad_marker();
        if valid {
            Ok(masked)
        } else {
            Err(TableError::InvalidValue { value, width })
        }
    }

    fn data_entries(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.entries
            .iter()
            .copied()
            .enumerate()
            .skip(RESERVED_ENTRIES as usize)
            .map(|(i, x)| (i as u32, x))
    }

    /// Packs the table into its little endian on-disk form. The result is not
    /// padded to a sector boundary.
    pub fn serialize(&self) -> Vec<u8> {
        let len = self.width.table_bytes(self.entries.len() as u64) as usize;

        match self.width {
            FatWidth::Fat12 => {
                let mut buf = vec![0u8; len];
                for (n, x) in self.entries.iter().copied().enumerate() {
                    let offset = n * 3 / 2;
                    if n % 2 == 0 {
                        buf[offset] = x as u8;
                        buf[offset + 1] = (buf[offset + 1] & 0xF0) | ((x >> 8) as u8 & 0x0F);
                    } else {
                        buf[offset] = (buf[offset] & 0x0F) | ((x as u8 & 0x0F) << 4);
                        buf[offset + 1] = (x >> 4) as u8;
                    }
                }
                buf
            }
            FatWidth::Fat16 => {
                let mut buf = Vec::with_capacity(len);
                for x in self.entries.iter().copied() {
                    buf.write_u16::<LittleEndian>(x as u16).unwrap();
                }
                buf
            }
            FatWidth::Fat32 => {
                let mut buf = Vec::with_capacity(len);
                for x in self.entries.iter().copied() {
                    buf.write_u32::<LittleEndian>(x & FatWidth::Fat32.mask())
                        .unwrap();
                }
                buf
            }
        }
    }

    /// Parses `entry_count` entries out of a serialized table. The returned
    /// table is sealed.
    pub fn from_bytes(width: FatWidth, entry_count: u32, bytes: &[u8]) -> Result<Self, TableError> {
        let expected = width.table_bytes(entry_count as u64) as usize;
        if bytes.len() < expected {
            return Err(TableError::Truncated {
                actual: bytes.len(),
                expected,
            });
        }

        let mut entries = Vec::with_capacity(entry_count as usize);
        let mut cursor = Cursor::new(bytes);
        for n in 0..entry_count as usize {
            let x = match width {
                FatWidth::Fat12 => {
                    let offset = n * 3 / 2;
                    let lo = bytes[offset] as u32;
                    let hi = bytes[offset + 1] as u32;
                    if n % 2 == 0 {
                        lo | ((hi & 0x0F) << 8)
                    } else {
                        (lo >> 4) | (hi << 4)
                    }
                }
                FatWidth::Fat16 => cursor.read_u16::<LittleEndian>().unwrap() as u32,
                FatWidth::Fat32 => cursor.read_u32::<LittleEndian>().unwrap() & width.mask(),
            };
            entries.push(x);
        }

        let bad_clusters = entries
            .iter()
            .skip(RESERVED_ENTRIES as usize)
            .filter(|x| width.is_bad(**x))
            .count() as u32;

        Ok(Self {
            width,
            entries,
            bad_clusters,
            sealed: true,
        })
    }
}

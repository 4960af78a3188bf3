pub mod bpb;
pub mod defect;
pub mod format;
pub mod fsinfo;
pub mod geometry;
pub mod label;
pub mod table;
pub mod writer;

pub use format::{format, FormatReport, FormatRequest, NewVolume};
pub use geometry::{compute_layout, DeviceGeometry, FatLayout, LayoutOptions};
pub use table::FatTable;

use std::fmt;
use std::str::FromStr;

pub const DIR_ENTRY_SIZE: u32 = 32;

/// Cluster number holding the FAT32 root directory on a fresh volume.
pub const ROOT_CLUSTER: u32 = 2;

/// Number of table entries preceding the first data cluster.
pub const RESERVED_ENTRIES: u32 = 2;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum FatWidth {
    Fat12,
    Fat16,
    Fat32,
}

impl FatWidth {
    pub fn bits(self) -> u32 {
        match self {
            Self::Fat12 => 12,
            Self::Fat16 => 16,
            Self::Fat32 => 32,
        }
    }

    /// Significant bits of an entry. FAT32 entries only use the low 28 bits.
    pub fn mask(self) -> u32 {
        match self {
            Self::Fat12 => 0xFFF,
            Self::Fat16 => 0xFFFF,
            Self::Fat32 => 0x0FFF_FFFF,
        }
    }

    pub fn eof_marker(self) -> u32 {
        self.mask() & 0x0FFF_FFF8
    }

    pub fn bad_marker(self) -> u32 {
        self.mask() & 0x0FFF_FFF7
    }

    pub fn is_eof(self, value: u32) -> bool {
        value & self.mask() >= self.eof_marker()
    }

    pub fn is_bad(self, value: u32) -> bool {
        value & self.mask() == self.bad_marker()
    }

    pub fn min_clusters(self) -> u32 {
        match self {
            Self::Fat12 => 1,
            Self::Fat16 => 4087,
            Self::Fat32 => 65525,
        }
    }

    pub fn max_clusters(self) -> u32 {
        match self {
            Self::Fat12 => 4084,
            Self::Fat16 => 65524,
            Self::Fat32 => 268_435_446,
        }
    }

    /// File system type string stored in the boot sector.
    pub fn fs_type(self) -> &'static [u8; 8] {
        match self {
            Self::Fat12 => b"FAT12   ",
            Self::Fat16 => b"FAT16   ",
            Self::Fat32 => b"FAT32   ",
        }
    }

    /// Bytes taken by a table addressing `entries` entries.
    pub fn table_bytes(self, entries: u64) -> u64 {
        match self {
            Self::Fat12 => (entries * 3 + 1) / 2,
            Self::Fat16 => entries * 2,
            Self::Fat32 => entries * 4,
        }
    }
}

impl FromStr for FatWidth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "12" => Ok(Self::Fat12),
            "16" => Ok(Self::Fat16),
            "32" => Ok(Self::Fat32),
            _ => Err("unknown FAT type, expected 12, 16 or 32".to_owned()),
        }
    }
}

impl fmt::Display for FatWidth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "FAT{}", self.bits())
    }
}

use super::{FatWidth, DIR_ENTRY_SIZE, RESERVED_ENTRIES};
use crate::region::Region;
use crate::utils::div_ceil;
use std::cmp::{max, min};
use std::fmt;
use thiserror::Error;

pub const MIN_SECTOR_SIZE: u32 = 512;
pub const MAX_SECTOR_SIZE: u32 = 32768;
pub const MAX_CLUSTER_SECTORS: u32 = 128;
pub const MAX_FAT_COUNT: u8 = 4;

/// Devices up to this many sectors are never aligned.
const ALIGNMENT_THRESHOLD: u64 = 8192;
/// Size from which FAT32 is chosen when no width is requested.
const FAT32_THRESHOLD: u64 = 512 * 1024 * 1024;
/// Minimum number of 1 KiB blocks past the start of the data area.
const MIN_DATA_BLOCKS: u64 = 32;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum GeometryError {
    #[error("invalid sector size {0}, expected a power of two between 512 and 32768")]
    InvalidSectorSize(u32),
    #[error("invalid cluster size of {0} sectors, expected a power of two between 1 and 128")]
    InvalidClusterSize(u32),
    #[error("invalid number of FATs {0}, expected 1 to 4")]
    InvalidFatCount(u8),
    #[error("invalid number of reserved sectors {0}")]
    InvalidReservedSectors(u32),
    #[error("device has {0} sectors, FAT supports at most 4294967295")]
    TooManySectors(u64),
    #[error("device too small for a viable filesystem")]
    DeviceTooSmall,
    #[error("no cluster size yields a valid FAT layout for {0} sectors")]
    NoValidConfiguration(u64),
}

/// Physical parameters of the target device.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DeviceGeometry {
    pub sector_size: u32,
    pub total_sectors: u64,
    pub heads: u16,
    pub sectors_per_track: u16,
    pub hidden_sectors: u32,
}

impl DeviceGeometry {
    /// Geometry with the conventional translated CHS values for the size.
    pub fn new(sector_size: u32, total_sectors: u64) -> Self {
        let (heads, sectors_per_track) = default_chs(sector_size as u64 * total_sectors);
        Self {
            sector_size,
            total_sectors,
            heads,
            sectors_per_track,
            hidden_sectors: 0,
        }
    }

    #[inline]
    pub fn size_bytes(&self) -> u64 {
        self.total_sectors * self.sector_size as u64
    }
}

/// Heads and sectors per track reported for a disk of `size` bytes when the
/// device does not report its own.
pub fn default_chs(size: u64) -> (u16, u16) {
    if size < 512 * 1024 * 1024 {
        (64, 32)
    } else {
        (255, 63)
    }
}

/// Starting cluster size in sectors for FAT32, after the Microsoft
/// recommendations (0.5 KiB clusters up to 260 MiB, then 4 KiB to 32 KiB).
pub fn fat32_cluster_hint(size: u64, sector_size: u32) -> u32 {
    const MIB: u64 = 1024 * 1024;

    let sectors_512 = match size / MIB {
        x if x > 32 * 1024 => 64,
        x if x > 16 * 1024 => 32,
        x if x > 8 * 1024 => 16,
        x if x > 260 => 8,
        _ => 1,
    };
    max(1, sectors_512 * 512 / sector_size)
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FloppyPreset {
    pub size_kib: u64,
    pub sectors_per_track: u16,
    pub heads: u16,
    pub media: u8,
    pub cluster_sectors: u32,
    pub root_dir_entries: u32,
}

pub const FLOPPY_PRESETS: [FloppyPreset; 5] = [
    FloppyPreset {
        size_kib: 360,
        sectors_per_track: 9,
        heads: 2,
        media: 0xFD,
        cluster_sectors: 2,
        root_dir_entries: 112,
    },
    FloppyPreset {
        size_kib: 720,
        sectors_per_track: 9,
        heads: 2,
        media: 0xF9,
        cluster_sectors: 2,
        root_dir_entries: 112,
    },
    FloppyPreset {
        size_kib: 1200,
        sectors_per_track: 15,
        heads: 2,
        media: 0xF9,
        cluster_sectors: 1,
        root_dir_entries: 224,
    },
    FloppyPreset {
        size_kib: 1440,
        sectors_per_track: 18,
        heads: 2,
        media: 0xF0,
        cluster_sectors: 1,
        root_dir_entries: 224,
    },
    FloppyPreset {
        size_kib: 2880,
        sectors_per_track: 36,
        heads: 2,
        media: 0xF0,
        cluster_sectors: 2,
        root_dir_entries: 240,
    },
];

/// Standard floppy format matching a device of `size` bytes exactly.
pub fn floppy_preset(size: u64) -> Option<&'static FloppyPreset> {
    if size % 1024 != 0 {
        return None;
    }
    FLOPPY_PRESETS.iter().find(|x| x.size_kib == size / 1024)
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LayoutOptions {
    /// `None` picks the width from the device size.
    pub fat_width: Option<FatWidth>,
    /// Ignored for FAT32.
    pub root_dir_entries: u32,
    /// Forced cluster size, only this size is tried.
    pub cluster_sectors: Option<u32>,
    /// Cluster size the search starts at.
    pub cluster_hint: Option<u32>,
    pub reserved_sectors: Option<u32>,
    pub fat_count: u8,
    pub align: bool,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            fat_width: None,
            root_dir_entries: 512,
            cluster_sectors: None,
            cluster_hint: None,
            reserved_sectors: None,
            fat_count: 2,
            align: true,
        }
    }
}

/// Sizes and positions of every area of a FAT volume, in sectors relative to
/// the start of the volume.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FatLayout {
    pub fat_width: FatWidth,
    pub sector_size: u32,
    pub cluster_sectors: u32,
    pub cluster_count: u32,
    pub fat_length_sectors: u32,
    pub fat_count: u8,
    pub reserved_sectors: u32,
    pub root_dir_entries: u32,
    pub root_dir_sectors: u32,
    pub data_start_sector: u64,
    pub total_usable_sectors: u64,
    pub aligned: bool,
}

impl FatLayout {
    #[inline]
    pub fn entry_count(&self) -> u32 {
        self.cluster_count + RESERVED_ENTRIES
    }

    pub fn fat_start(&self, copy: u8) -> u64 {
        self.reserved_sectors as u64 + copy as u64 * self.fat_length_sectors as u64
    }

    /// First sector of the root directory. On FAT32 this is the first sector
    /// of the root cluster.
    pub fn root_dir_start(&self, root_cluster: u32) -> u64 {
        match self.fat_width {
            FatWidth::Fat32 => self.cluster_to_sector(root_cluster),
            _ => self.fat_start(self.fat_count),
        }
    }

    pub fn cluster_to_sector(&self, cluster: u32) -> u64 {
        debug_assert!(cluster >= RESERVED_ENTRIES);
        self.data_start_sector
            + (cluster - RESERVED_ENTRIES) as u64 * self.cluster_sectors as u64
    }

    /// Cluster containing `sector`, `None` outside of the cluster area.
    pub fn sector_to_cluster(&self, sector: u64) -> Option<u32> {
        if sector < self.data_start_sector || sector >= self.data_end_sector() {
            return None;
        }

        let index = (sector - self.data_start_sector) / self.cluster_sectors as u64;
        Some(index as u32 + RESERVED_ENTRIES)
    }

    /// First sector past the last cluster.
    pub fn data_end_sector(&self) -> u64 {
        self.data_start_sector + self.cluster_count as u64 * self.cluster_sectors as u64
    }

    /// Sectors before the first FAT.
    pub fn reserved_region(&self) -> Region {
        Region::new(0, self.reserved_sectors as u64 - 1)
    }

    #[inline]
    pub fn fat_bytes(&self) -> usize {
        self.fat_length_sectors as usize * self.sector_size as usize
    }

    /// Sectors written for the root directory on a fresh volume.
    pub fn root_dir_write_sectors(&self) -> u32 {
        match self.fat_width {
            FatWidth::Fat32 => self.cluster_sectors,
            _ => self.root_dir_sectors,
        }
    }
}

impl fmt::Display for FatLayout {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "FAT type              : {}
Sector size           : {}
Sectors per cluster   : {}
Number of clusters    : {}
Reserved sectors      : {}
Number of FATs        : {}
Sectors per FAT       : {}
Root entries          : {}
Root sectors          : {}
Data start            : {}
Total sectors         : {}
Aligned               : {}",
            self.fat_width,
            self.sector_size,
            self.cluster_sectors,
            self.cluster_count,
            self.reserved_sectors,
            self.fat_count,
            self.fat_length_sectors,
            self.root_dir_entries,
            self.root_dir_sectors,
            self.data_start_sector,
            self.total_usable_sectors,
            self.aligned
        )
    }
}

/// Cluster count and FAT length of one width for one cluster size.
#[derive(Debug, Copy, Clone)]
struct Fit {
    clusters: u32,
    fat_length: u32,
}

struct Candidate {
    sector_size: u64,
    cluster_sectors: u64,
    fat_count: u64,
    align: bool,
}

impl Candidate {
    fn align(&self, x: u64) -> u64 {
        if self.align {
            round_up!(x, self.cluster_sectors)
        } else {
            x
        }
    }

    /// Estimates the cluster count from the space left for FATs and data,
    /// sizes the FAT for it and recomputes the count once from the final FAT
    /// length.
    fn fit(&self, width: FatWidth, fat_data: u64) -> Option<Fit> {
        let ss = self.sector_size;
        let cs = self.cluster_sectors;
        let fats = self.fat_count;

        let estimate = match width {
            FatWidth::Fat12 => 2 * (fat_data * ss + fats * 3) / (2 * cs * ss + fats * 3),
            FatWidth::Fat16 => (fat_data * ss + fats * 4) / (cs * ss + fats * 2),
            FatWidth::Fat32 => (fat_data * ss + fats * 8) / (cs * ss + fats * 4),
        };

        let fat_length = self.align(div_ceil(
            width.table_bytes(estimate + RESERVED_ENTRIES as u64),
            ss,
        ));
        let clusters = fat_data.checked_sub(fats * fat_length)? / cs;

        let addressable = fat_length * ss * 8 / width.bits() as u64 - RESERVED_ENTRIES as u64;
        let max = min(addressable, width.max_clusters() as u64);

        if clusters < width.min_clusters() as u64 || clusters > max {
            debug!(
                "{}: {} clusters of {} sectors outside of {}..={}",
                width,
                clusters,
                cs,
                width.min_clusters(),
                max
            );
            return None;
        }

        trace!(
            "{}: {} clusters of {} sectors, FAT length {}",
            width,
            clusters,
            cs,
            fat_length
        );

        Some(Fit {
            clusters: clusters as u32,
            fat_length: fat_length as u32,
        })
    }
}

/// Computes the layout of a FAT volume filling the whole device.
///
/// Cluster sizes are tried from the hint (or 1) upward, doubling each time,
/// and the first size giving an acceptable cluster count for an allowed width
/// wins. Without an explicit width FAT32 is used for devices of 512 MiB and
/// more, otherwise FAT16 is preferred over FAT12.
pub fn compute_layout(
    geometry: &DeviceGeometry,
    options: &LayoutOptions,
) -> Result<FatLayout, GeometryError> {
    let sector_size = geometry.sector_size;
    if !is_power_of_2!(sector_size)
        || sector_size < MIN_SECTOR_SIZE
        || sector_size > MAX_SECTOR_SIZE
    {
        return Err(GeometryError::InvalidSectorSize(sector_size));
    }
    if options.fat_count == 0 || options.fat_count > MAX_FAT_COUNT {
        return Err(GeometryError::InvalidFatCount(options.fat_count));
    }
    for x in options.cluster_sectors.iter().chain(options.cluster_hint.iter()).copied() {
        if !is_power_of_2!(x) || x > MAX_CLUSTER_SECTORS {
            return Err(GeometryError::InvalidClusterSize(x));
        }
    }

    let total_sectors = geometry.total_sectors;
    if total_sectors > u32::MAX as u64 {
        return Err(GeometryError::TooManySectors(total_sectors));
    }

    let size = geometry.size_bytes();
    let requested = match options.fat_width {
        Some(x) => Some(x),
        None if size >= FAT32_THRESHOLD => Some(FatWidth::Fat32),
        None => None,
    };
    let fat32 = requested == Some(FatWidth::Fat32);

    let mut reserved = options
        .reserved_sectors
        .unwrap_or(if fat32 { 32 } else { 1 }) as u64;
    if reserved == 0 || reserved > u16::MAX as u64 {
        return Err(GeometryError::InvalidReservedSectors(reserved as u32));
    }
    if fat32 && reserved < 2 {
        warn!("FAT32 needs at least 2 reserved sectors, using 2");
        reserved = 2;
    }

    let mut root_entries = if fat32 { 0 } else { options.root_dir_entries as u64 };
    let mut root_sectors = div_ceil(root_entries * DIR_ENTRY_SIZE as u64, sector_size as u64);
    let align = options.align && total_sectors > ALIGNMENT_THRESHOLD;
    if options.align && !align {
        debug!("{} sectors, not aligning", total_sectors);
    }

    let mut cluster_sectors = options
        .cluster_sectors
        .or(options.cluster_hint)
        .unwrap_or(if fat32 { fat32_cluster_hint(size, sector_size) } else { 1 });

    let (width, fit, candidate) = loop {
        let candidate = Candidate {
            sector_size: sector_size as u64,
            cluster_sectors: cluster_sectors as u64,
            fat_count: options.fat_count as u64,
            align,
        };

        let fat_data32 = total_sectors
            .checked_sub(candidate.align(reserved))
            .ok_or(GeometryError::DeviceTooSmall)?;
        let fat_data1216 = fat_data32
            .checked_sub(candidate.align(root_sectors))
            .ok_or(GeometryError::DeviceTooSmall)?;

        let try_width = |w: FatWidth| requested.map_or(w != FatWidth::Fat32, |x| x == w);
        let fit16 = if try_width(FatWidth::Fat16) {
            candidate.fit(FatWidth::Fat16, fat_data1216)
        } else {
            None
        };
        let fit12 = if try_width(FatWidth::Fat12) {
            candidate.fit(FatWidth::Fat12, fat_data1216)
        } else {
            None
        };
        let fit32 = if try_width(FatWidth::Fat32) {
            candidate.fit(FatWidth::Fat32, fat_data32)
        } else {
            None
        };

        if let Some(x) = fit16 {
            break (FatWidth::Fat16, x, candidate);
        }
        if let Some(x) = fit12 {
            break (FatWidth::Fat12, x, candidate);
        }
        if let Some(x) = fit32 {
            break (FatWidth::Fat32, x, candidate);
        }

        if options.cluster_sectors.is_some() || cluster_sectors >= MAX_CLUSTER_SECTORS {
            return Err(GeometryError::NoValidConfiguration(total_sectors));
        }
        cluster_sectors *= 2;
    };

    let reserved = candidate.align(reserved);
    if reserved > u16::MAX as u64 {
        return Err(GeometryError::InvalidReservedSectors(reserved as u32));
    }

    if width == FatWidth::Fat32 {
        root_entries = 0;
        root_sectors = 0;
    } else if align {
        let aligned_sectors = candidate.align(root_sectors);
        let aligned_entries = aligned_sectors * sector_size as u64 / DIR_ENTRY_SIZE as u64;
        if aligned_entries <= u16::MAX as u64 {
            root_entries = aligned_entries;
            root_sectors = aligned_sectors;
        } else {
            debug!(
                "aligned root directory would hold {} entries, not aligning it",
                aligned_entries
            );
        }
    }

    let data_start_sector =
        reserved + options.fat_count as u64 * fit.fat_length as u64 + root_sectors;

    let blocks = size / 1024;
    let data_start_block = div_ceil(data_start_sector * sector_size as u64, 1024);
    if blocks < data_start_block + MIN_DATA_BLOCKS {
        return Err(GeometryError::DeviceTooSmall);
    }

    let layout = FatLayout {
        fat_width: width,
        sector_size,
        cluster_sectors,
        cluster_count: fit.clusters,
        fat_length_sectors: fit.fat_length,
        fat_count: options.fat_count,
        reserved_sectors: reserved as u32,
        root_dir_entries: root_entries as u32,
        root_dir_sectors: root_sectors as u32,
        data_start_sector,
        total_usable_sectors: total_sectors,
        aligned: align,
    };
    debug_assert!(layout.data_end_sector() <= total_sectors);

    debug!("computed layout\n{}", layout);
    Ok(layout)
}

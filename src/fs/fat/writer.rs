use super::format::NewVolume;
use super::ROOT_CLUSTER;
use crate::disk::BlockDevice;
use std::{fmt, io, result};
use thiserror::Error;

/// Part of the volume a write belongs to.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Section {
    ReservedArea,
    BootSector,
    InfoSector,
    BackupBootSector,
    BackupInfoSector,
    /// FAT copy, counted from 0.
    Fat(u8),
    RootDirectory,
    Flush,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ReservedArea => f.write_str("reserved area"),
            Self::BootSector => f.write_str("boot sector"),
            Self::InfoSector => f.write_str("FS information sector"),
            Self::BackupBootSector => f.write_str("backup boot sector"),
            Self::BackupInfoSector => f.write_str("backup FS information sector"),
            Self::Fat(x) => write!(f, "FAT copy {}", x + 1),
            Self::RootDirectory => f.write_str("root directory"),
            Self::Flush => f.write_str("flush"),
        }
    }
}

#[derive(Debug, Error)]
#[error("writing {section} failed: {source}")]
pub struct WriteError {
    pub section: Section,
    pub source: io::Error,
}

fn write(
    device: &mut dyn BlockDevice,
    section: Section,
    lba: u64,
    buf: &[u8],
) -> result::Result<(), WriteError> {
    trace!("writing {} ({} bytes) at sector {}", section, buf.len(), lba);
    device
        .write_blocks(lba, buf)
        .map_err(|source| WriteError { section, source })
}

/// Writes every structure of `volume` in LBA order, one write per section,
/// and flushes the device.
pub fn write_all(
    device: &mut dyn BlockDevice,
    volume: &NewVolume,
) -> result::Result<(), WriteError> {
    let layout = volume.layout();
    let ss = layout.sector_size;
    let boot_sector = volume.boot_sector();
    let boot_sector_bytes = boot_sector.to_sector(ss);

    info!("writing {} volume", layout.fat_width);

    let reserved = vec![0u8; layout.reserved_sectors as usize * ss as usize];
    write(device, Section::ReservedArea, 0, &reserved)?;
    drop(reserved);

    write(device, Section::BootSector, 0, &boot_sector_bytes)?;

    if let (Some(info), Some(ext)) = (volume.fs_info(), boot_sector.fat32.as_ref()) {
        let info_bytes = info.to_sector(ss);
        write(device, Section::InfoSector, ext.info_sector as u64, &info_bytes)?;

        if ext.backup_boot_sector != 0 {
            let backup = ext.backup_boot_sector as u64;
            write(device, Section::BackupBootSector, backup, &boot_sector_bytes)?;

            let backup_info = backup + ext.info_sector as u64;
            if layout.reserved_region().contains(backup_info) {
                write(device, Section::BackupInfoSector, backup_info, &info_bytes)?;
            } else {
                debug!("no room for a backup FS information sector at {}", backup_info);
            }
        }
    }

    let mut fat = volume.table().serialize();
    fat.resize(layout.fat_bytes(), 0);
    for copy in 0..layout.fat_count {
        write(device, Section::Fat(copy), layout.fat_start(copy), &fat)?;
    }

    let root_cluster = boot_sector.root_cluster().unwrap_or(ROOT_CLUSTER);
    write(
        device,
        Section::RootDirectory,
        layout.root_dir_start(root_cluster),
        volume.root_dir(),
    )?;

    device.flush().map_err(|source| WriteError {
        section: Section::Flush,
        source,
    })
}

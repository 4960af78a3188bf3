pub mod ram;
pub mod raw;
pub mod slice;

use std::str::FromStr;
use std::{fmt, io};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum MediaType {
    Unknown,
    FDD,
    HDD,
    SSD,
}

impl MediaType {
    /// Fixed media may carry a partition table, floppies never do.
    pub fn is_fixed(self) -> bool {
        self == Self::HDD || self == Self::SSD
    }
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fdd" | "floppy" => Ok(Self::FDD),
            "hdd" => Ok(Self::HDD),
            "ssd" => Ok(Self::SSD),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!(
                "unknown media type \"{}\", expected fdd, hdd or ssd",
                s
            )),
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::FDD => "floppy disk",
            Self::HDD => "hard disk",
            Self::SSD => "solid state disk",
        };
        f.write_str(s)
    }
}

pub trait Info {
    fn block_size(&self) -> u32;
    fn block_count(&self) -> u64;
    fn media_type(&self) -> MediaType;

    fn read_only(&self) -> bool {
        false
    }

    fn media_present(&self) -> bool {
        true
    }

    fn disk_size(&self) -> u64 {
        self.block_count() * self.block_size() as u64
    }
}

/// Sector addressed storage. Buffers passed to `read_blocks` and
/// `write_blocks` must be a whole number of blocks long.
pub trait BlockDevice: Info {
    fn read_blocks(&mut self, lba: u64, buf: &mut [u8]) -> io::Result<()>;
    fn write_blocks(&mut self, lba: u64, buf: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
}

/// Validates a transfer against device bounds and returns the number of
/// blocks it covers.
pub(crate) fn check_transfer(info: &dyn Info, lba: u64, len: usize) -> io::Result<u64> {
    let block_size = info.block_size() as usize;
    if len % block_size != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "transfer of {} bytes is not a multiple of block size {}",
                len, block_size
            ),
        ));
    }

    let count = (len / block_size) as u64;
    match lba.checked_add(count) {
        Some(end) if end <= info.block_count() => Ok(count),
        _ => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "transfer of {} blocks at LBA {} is past the end of device ({} blocks)",
                count,
                lba,
                info.block_count()
            ),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::ram::RamDisk;

    #[test]
    fn test_media_type_from_str() {
        crate::tests_init();

        assert_eq!(MediaType::from_str("fdd").unwrap(), MediaType::FDD);
        assert_eq!(MediaType::from_str("Floppy").unwrap(), MediaType::FDD);
        assert_eq!(MediaType::from_str("HDD").unwrap(), MediaType::HDD);
        assert!(MediaType::from_str("cdrom").is_err());

        assert!(MediaType::SSD.is_fixed());
        assert!(!MediaType::FDD.is_fixed());
    }

    #[test]
    fn test_check_transfer() {
        crate::tests_init();

        let disk = RamDisk::new_zeroed(512, 8);
        assert_eq!(check_transfer(&disk, 0, 4096).unwrap(), 8);
        assert_eq!(check_transfer(&disk, 7, 512).unwrap(), 1);
        assert_eq!(check_transfer(&disk, 8, 0).unwrap(), 0);
        assert!(check_transfer(&disk, 7, 1024).is_err());
        assert!(check_transfer(&disk, 0, 100).is_err());
        assert!(check_transfer(&disk, u64::MAX, 512).is_err());
    }
}

use super::bpb::BOOT_SIGNATURE;
use crate::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Seek, SeekFrom};

pub const LEAD_SIGNATURE: u32 = 0x4161_5252;
pub const STRUCT_SIGNATURE: u32 = 0x6141_7272;

const STRUCT_OFFSET: u64 = 0x1E4;
const TRAIL_OFFSET: u64 = 0x1FE;

/// Value of either counter when it is unknown.
pub const UNKNOWN: u32 = 0xFFFF_FFFF;

/// FAT32 FS information sector.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FsInfo {
    pub free_clusters: u32,
    pub next_free: u32,
}

impl FsInfo {
    pub const SIZE: usize = 512;

    pub fn new(free_clusters: u32, next_free: u32) -> Self {
        Self {
            free_clusters,
            next_free,
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        assert!(buf.len() >= Self::SIZE);
        let mut cursor = Cursor::new(&mut buf[..Self::SIZE]);

        cursor.write_u32::<LittleEndian>(LEAD_SIGNATURE).unwrap();
        cursor.seek(SeekFrom::Start(STRUCT_OFFSET)).unwrap();
        cursor.write_u32::<LittleEndian>(STRUCT_SIGNATURE).unwrap();
        cursor.write_u32::<LittleEndian>(self.free_clusters).unwrap();
        cursor.write_u32::<LittleEndian>(self.next_free).unwrap();
        cursor.seek(SeekFrom::Start(TRAIL_OFFSET)).unwrap();
        cursor.write_u16::<LittleEndian>(BOOT_SIGNATURE).unwrap();
    }

    /// Whole zero padded sector holding the structure.
    pub fn to_sector(&self, sector_size: u32) -> Vec<u8> {
        let mut buf = vec![0u8; sector_size as usize];
        self.encode(&mut buf);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(Error::InvalidFsInfo);
        }
        let mut cursor = Cursor::new(&buf[..Self::SIZE]);

        if cursor.read_u32::<LittleEndian>()? != LEAD_SIGNATURE {
            return Err(Error::InvalidFsInfo);
        }
        cursor.seek(SeekFrom::Start(STRUCT_OFFSET))?;
        if cursor.read_u32::<LittleEndian>()? != STRUCT_SIGNATURE {
            return Err(Error::InvalidFsInfo);
        }
        let free_clusters = cursor.read_u32::<LittleEndian>()?;
        let next_free = cursor.read_u32::<LittleEndian>()?;
        cursor.seek(SeekFrom::Start(TRAIL_OFFSET))?;
        if cursor.read_u16::<LittleEndian>()? != BOOT_SIGNATURE {
            return Err(Error::InvalidFsInfo);
        }

        Ok(Self {
            free_clusters,
            next_free,
        })
    }
}

use crate::fs::fat::FatWidth;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

pub const DISK_SIGNATURE_OFFSET: usize = 0x1B8;
pub const PARTITION_TABLE_OFFSET: usize = 0x1BE;

pub const ACTIVE: u8 = 0x80;

/// Largest address expressible in CHS form.
const MAX_CHS: Chs = Chs {
    cylinder: 1023,
    head: 254,
    sector: 63,
};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Chs {
    pub cylinder: u16,
    pub head: u8,
    pub sector: u8,
}

/// Translates an LBA to CHS, saturating at the largest CHS address.
pub fn lba_to_chs(lba: u64, heads: u16, sectors_per_track: u16) -> Chs {
    if heads == 0 || sectors_per_track == 0 || heads > 255 || sectors_per_track > 63 {
        return MAX_CHS;
    }

    let spt = sectors_per_track as u64;
    let heads = heads as u64;
    let cylinder = lba / (spt * heads);
    if cylinder > MAX_CHS.cylinder as u64 {
        return MAX_CHS;
    }

    Chs {
        cylinder: cylinder as u16,
        head: ((lba / spt) % heads) as u8,
        sector: (lba % spt + 1) as u8,
    }
}

/// Partition type byte for a FAT volume spanning `sectors` sectors.
pub fn partition_type(width: FatWidth, sectors: u64, heads: u16, sectors_per_track: u16) -> u8 {
    let chs_limit = heads as u64 * sectors_per_track as u64 * 1024;

    match width {
        FatWidth::Fat12 => 0x01,
        FatWidth::Fat16 if sectors < 65536 => 0x04,
        FatWidth::Fat16 if sectors < chs_limit => 0x06,
        FatWidth::Fat16 => 0x0E,
        FatWidth::Fat32 if sectors < chs_limit => 0x0B,
        FatWidth::Fat32 => 0x0C,
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MbrPartition {
    pub flags: u8,
    pub start_chs: Chs,
    pub partition_type: u8,
    pub end_chs: Chs,
    pub lba: u32,
    pub num_sectors: u32,
}

impl MbrPartition {
    pub const SIZE: usize = 16;

    /// Active partition covering `num_sectors` sectors from `lba`.
    pub fn new(
        partition_type: u8,
        lba: u32,
        num_sectors: u32,
        heads: u16,
        sectors_per_track: u16,
    ) -> Self {
        let last = (lba as u64 + num_sectors as u64).saturating_sub(1);
        Self {
            flags: ACTIVE,
            start_chs: lba_to_chs(lba as u64, heads, sectors_per_track),
            partition_type,
            end_chs: lba_to_chs(last, heads, sectors_per_track),
            lba,
            num_sectors,
        }
    }

    pub fn decode(buf: &[u8; Self::SIZE]) -> Option<Self> {
        let mut cursor = Cursor::new(buf);

        let flags = cursor.read_u8().unwrap();
        let start_chs = Self::decode_chs(&mut cursor);
        let partition_type = cursor.read_u8().unwrap();
        if partition_type == 0 {
            return None;
        }
        let end_chs = Self::decode_chs(&mut cursor);

        let lba = cursor.read_u32::<LittleEndian>().unwrap();
        let num_sectors = cursor.read_u32::<LittleEndian>().unwrap();

        debug_assert_eq!(cursor.position(), Self::SIZE as u64);

        Some(Self {
            flags,
            start_chs,
            partition_type,
            end_chs,
            lba,
            num_sectors,
        })
    }

    pub fn encode(&self, buf: &mut [u8; Self::SIZE]) {
        let mut cursor = Cursor::new(&mut buf[..]);

        cursor.write_u8(self.flags).unwrap();
        Self::encode_chs(&mut cursor, &self.start_chs);
        cursor.write_u8(self.partition_type).unwrap();
        Self::encode_chs(&mut cursor, &self.end_chs);
        cursor.write_u32::<LittleEndian>(self.lba).unwrap();
        cursor.write_u32::<LittleEndian>(self.num_sectors).unwrap();

        debug_assert_eq!(cursor.position(), Self::SIZE as u64);
    }

    fn decode_chs<T: AsRef<[u8]>>(cursor: &mut Cursor<T>) -> Chs {
        let x1 = cursor.read_u8().unwrap();
        let x2 = cursor.read_u8().unwrap();
        let x3 = cursor.read_u8().unwrap();

        Chs {
            cylinder: x3 as u16 | (((x2 as u16) & 0xC0) << 2),
            head: x1,
            sector: x2 & 0x3F,
        }
    }

    fn encode_chs(cursor: &mut Cursor<&mut [u8]>, chs: &Chs) {
        cursor.write_u8(chs.head).unwrap();
        cursor
            .write_u8((chs.sector & 0x3F) | ((chs.cylinder >> 2) as u8 & 0xC0))
            .unwrap();
        cursor.write_u8(chs.cylinder as u8).unwrap();
    }
}

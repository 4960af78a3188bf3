use super::geometry::{DeviceGeometry, FatLayout};
use super::label::{VolumeLabel, LABEL_LENGTH};
use super::{FatWidth, ROOT_CLUSTER};
use crate::part::mbr::{MbrPartition, ACTIVE, DISK_SIGNATURE_OFFSET, PARTITION_TABLE_OFFSET};
use crate::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::NaiveDateTime;
use std::fmt;
use std::io::{Cursor, Read, Write};

pub const BOOT_SIGNATURE: u16 = 0xAA55;
pub const OEM_ID: &[u8; 8] = b"MSWIN4.1";
const EXTENDED_BOOT_SIGNATURE: u8 = 0x29;
/// Sector of the FS information structure on FAT32.
pub const INFO_SECTOR: u16 = 1;

const BOOT_CODE_OFFSET_FAT16: usize = 0x3E;
const BOOT_CODE_OFFSET_FAT32: usize = 0x5A;
const BOOT_CODE_END: usize = 0x1FE;
/// Load address of the boot sector in real mode.
const BOOT_ADDRESS: u16 = 0x7C00;

/// Prints the message following it and reboots on a key press.
const DUMMY_BOOT_CODE: [u8; 29] = [
    0x0E, // push cs
    0x1F, // pop ds
    0xBE, 0x5B, 0x7C, // mov si, message
    0xAC, // lodsb
    0x22, 0xC0, // and al, al
    0x74, 0x0B, // jz key_press
    0x56, // push si
    0xB4, 0x0E, // mov ah, 0eh
    0xBB, 0x07, 0x00, // mov bx, 0007h
    0xCD, 0x10, // int 10h
    0x5E, // pop si
    0xEB, 0xF0, // jmp print
    0x32, 0xE4, // key_press: xor ah, ah
    0xCD, 0x16, // int 16h
    0xCD, 0x19, // int 19h
    0xEB, 0xFE, // jmp $
];
/// Offset of the message pointer operand inside the boot code.
const MESSAGE_POINTER: usize = 3;

pub const DEFAULT_MESSAGE: &[u8] = b"This is not a bootable disk.  \
Please insert a bootable floppy and\n\
press any key to try again ... \n";

/// Volume metadata that is not derived from the layout.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct VolumeInfo {
    pub label: VolumeLabel,
    pub volume_id: u32,
    pub drive_number: u8,
    pub media: u8,
    pub created: NaiveDateTime,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Fat32Extension {
    pub fat_length: u32,
    pub flags: u16,
    pub version: u16,
    pub root_cluster: u32,
    pub info_sector: u16,
    pub backup_boot_sector: u16,
}

/// Disk signature and single partition entry making the volume look like a
/// partitioned disk.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FakeMbr {
    pub disk_signature: u32,
    pub partition: MbrPartition,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BootSector {
    pub jump: [u8; 3],
    pub oem_id: [u8; 8],
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_count: u8,
    pub root_dir_entries: u16,
    pub total_sectors_16: u16,
    pub media: u8,
    pub fat_length_16: u16,
    pub sectors_per_track: u16,
    pub heads: u16,
    pub hidden_sectors: u32,
    pub total_sectors_32: u32,
    pub fat32: Option<Fat32Extension>,
    pub drive_number: u8,
    pub extended_signature: u8,
    pub volume_id: u32,
    pub label: [u8; LABEL_LENGTH],
    pub fs_type: [u8; 8],
    pub boot_code: Vec<u8>,
    pub mbr: Option<FakeMbr>,
}

impl BootSector {
    pub const SIZE: usize = 512;

    /// Boot sector for a fresh volume, carrying the default boot message.
    /// `backup_boot_sector` is only used on FAT32, 0 means no backup.
    pub fn new(
        layout: &FatLayout,
        geometry: &DeviceGeometry,
        volume: &VolumeInfo,
        backup_boot_sector: u16,
    ) -> Self {
        let fat32 = layout.fat_width == FatWidth::Fat32;
        let total = layout.total_usable_sectors;
        let (total_sectors_16, total_sectors_32) = if total < 65536 {
            (total as u16, 0)
        } else {
            (0, total as u32)
        };

        let boot_code_offset = boot_code_offset(layout.fat_width);
        let jump_target = (boot_code_offset - 2) as u8;

        let mut s = Self {
            jump: [0xEB, jump_target, 0x90],
            oem_id: *OEM_ID,
            bytes_per_sector: layout.sector_size as u16,
            sectors_per_cluster: layout.cluster_sectors as u8,
            reserved_sectors: layout.reserved_sectors as u16,
            fat_count: layout.fat_count,
            root_dir_entries: layout.root_dir_entries as u16,
            total_sectors_16,
            media: volume.media,
            fat_length_16: if fat32 {
                0
            } else {
                layout.fat_length_sectors as u16
            },
            sectors_per_track: geometry.sectors_per_track,
            heads: geometry.heads,
            hidden_sectors: geometry.hidden_sectors,
            total_sectors_32,
            fat32: if fat32 {
                Some(Fat32Extension {
                    fat_length: layout.fat_length_sectors,
                    flags: 0,
                    version: 0,
                    root_cluster: ROOT_CLUSTER,
                    info_sector: INFO_SECTOR,
                    backup_boot_sector,
                })
            } else {
                None
            },
            drive_number: volume.drive_number,
            extended_signature: EXTENDED_BOOT_SIGNATURE,
            volume_id: volume.volume_id,
            label: *volume.label.as_bytes(),
            fs_type: *layout.fat_width.fs_type(),
            boot_code: vec![0; BOOT_CODE_END - boot_code_offset],
            mbr: None,
        };
        s.set_message(DEFAULT_MESSAGE);
        s
    }

    fn boot_code_offset(&self) -> usize {
        if self.fat32.is_some() {
            BOOT_CODE_OFFSET_FAT32
        } else {
            BOOT_CODE_OFFSET_FAT16
        }
    }

    /// Installs the dummy boot code printing `message`. CR and NUL bytes are
    /// dropped and LF is expanded to CR LF. A message that does not fit is
    /// truncated.
    pub fn set_message(&mut self, message: &[u8]) {
        let offset = self.boot_code_offset();
        let mut limit = self.boot_code.len();
        if self.mbr.is_some() {
            limit = DISK_SIGNATURE_OFFSET - offset;
        }
        let capacity = limit - DUMMY_BOOT_CODE.len();

        let mut encoded = encode_message(message);
        if encoded.len() > capacity {
            warn!(
                "boot message is {} bytes long, truncating to {}",
                encoded.len(),
                capacity
            );
            encoded.truncate(capacity - 1);
            encoded.push(0);
        }

        for x in self.boot_code.iter_mut() {
            *x = 0;
        }
        self.boot_code[..DUMMY_BOOT_CODE.len()].copy_from_slice(&DUMMY_BOOT_CODE);
        let pointer = BOOT_ADDRESS + (offset + DUMMY_BOOT_CODE.len()) as u16;
        self.boot_code[MESSAGE_POINTER..MESSAGE_POINTER + 2]
            .copy_from_slice(&pointer.to_le_bytes());
        self.boot_code[DUMMY_BOOT_CODE.len()..DUMMY_BOOT_CODE.len() + encoded.len()]
            .copy_from_slice(&encoded);
    }

    /// Adds the partition table. The boot message is cut to keep clear of it.
    pub fn set_fake_mbr(&mut self, mbr: FakeMbr) {
        self.mbr = Some(mbr);

        let offset = self.boot_code_offset();
        let start = DISK_SIGNATURE_OFFSET - offset;
        let message = &self.boot_code[DUMMY_BOOT_CODE.len()..];
        let len = message.iter().position(|x| *x == 0).unwrap_or(message.len());
        if DUMMY_BOOT_CODE.len() + len >= start {
            warn!("boot message overlaps the partition table, truncating");
            self.boot_code[start - 1] = 0;
        }
        for x in self.boot_code[start..].iter_mut() {
            *x = 0;
        }
    }

    pub fn total_sectors(&self) -> u64 {
        if self.total_sectors_16 != 0 {
            self.total_sectors_16 as u64
        } else {
            self.total_sectors_32 as u64
        }
    }

    pub fn fat_length(&self) -> u32 {
        match &self.fat32 {
            Some(x) => x.fat_length,
            None => self.fat_length_16 as u32,
        }
    }

    pub fn root_cluster(&self) -> Option<u32> {
        self.fat32.map(|x| x.root_cluster)
    }

    pub fn encode(&self, buf: &mut [u8]) {
        assert!(buf.len() >= Self::SIZE);
        let mut cursor = Cursor::new(&mut buf[..Self::SIZE]);

        macro_rules! write {
            (array($data:expr)) => {{
                cursor.write_all($data).unwrap();
            }};
            (u8($x:expr)) => {{
                cursor.write_u8($x).unwrap();
            }};
            (u16($x:expr)) => {{
                cursor.write_u16::<LittleEndian>($x).unwrap();
            }};
            (u32($x:expr)) => {{
                cursor.write_u32::<LittleEndian>($x).unwrap();
            }};
        }

        write!(array(&self.jump));
        write!(array(&self.oem_id));
        write!(u16(self.bytes_per_sector));
        write!(u8(self.sectors_per_cluster));
        write!(u16(self.reserved_sectors));
        write!(u8(self.fat_count));
        write!(u16(self.root_dir_entries));
        write!(u16(self.total_sectors_16));
        write!(u8(self.media));
        write!(u16(self.fat_length_16));
        write!(u16(self.sectors_per_track));
        write!(u16(self.heads));
        write!(u32(self.hidden_sectors));
        write!(u32(self.total_sectors_32));
        if let Some(x) = &self.fat32 {
            write!(u32(x.fat_length));
            write!(u16(x.flags));
            write!(u16(x.version));
            write!(u32(x.root_cluster));
            write!(u16(x.info_sector));
            write!(u16(x.backup_boot_sector));
            write!(array(&[0u8; 12]));
        }
        write!(u8(self.drive_number));
        write!(u8(0));
        write!(u8(self.extended_signature));
        write!(u32(self.volume_id));
        write!(array(&self.label));
        write!(array(&self.fs_type));
        debug_assert_eq!(cursor.position() as usize, self.boot_code_offset());
        write!(array(&self.boot_code));
        write!(u16(BOOT_SIGNATURE));
        debug_assert_eq!(cursor.position() as usize, Self::SIZE);

        if let Some(mbr) = &self.mbr {
            buf[DISK_SIGNATURE_OFFSET..DISK_SIGNATURE_OFFSET + 4]
                .copy_from_slice(&mbr.disk_signature.to_le_bytes());
            buf[DISK_SIGNATURE_OFFSET + 4..PARTITION_TABLE_OFFSET].copy_from_slice(&[0, 0]);

            let mut entry = [0u8; MbrPartition::SIZE];
            mbr.partition.encode(&mut entry);
            buf[PARTITION_TABLE_OFFSET..PARTITION_TABLE_OFFSET + MbrPartition::SIZE]
                .copy_from_slice(&entry);
        }
    }

    /// Whole sector holding the boot sector, zero padded past 512 bytes.
    pub fn to_sector(&self, sector_size: u32) -> Vec<u8> {
        let mut buf = vec![0u8; sector_size as usize];
        self.encode(&mut buf);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(Error::InvalidBootSector);
        }
        let reader = &mut Cursor::new(&buf[..Self::SIZE]);

        macro_rules! read {
            (array($size:expr)) => {{
                let mut a = [0u8; $size];
                reader.read_exact(&mut a)?;
                a
            }};
            (u8) => {
                reader.read_u8()?
            };
            (u16) => {
                reader.read_u16::<LittleEndian>()?
            };
            (u32) => {
                reader.read_u32::<LittleEndian>()?
            };
        }

        let jump = read!(array(3));
        let oem_id = read!(array(8));
        let bytes_per_sector = read!(u16);
        let sectors_per_cluster = read!(u8);
        let reserved_sectors = read!(u16);
        let fat_count = read!(u8);
        let root_dir_entries = read!(u16);
        let total_sectors_16 = read!(u16);
        let media = read!(u8);
        let fat_length_16 = read!(u16);
        let sectors_per_track = read!(u16);
        let heads = read!(u16);
        let hidden_sectors = read!(u32);
        let total_sectors_32 = read!(u32);

        if !is_power_of_2!(bytes_per_sector)
            || !is_power_of_2!(sectors_per_cluster)
            || fat_count == 0
        {
            return Err(Error::InvalidBootSector);
        }

        let fat32 = if fat_length_16 == 0 {
            let x = Fat32Extension {
                fat_length: read!(u32),
                flags: read!(u16),
                version: read!(u16),
                root_cluster: read!(u32),
                info_sector: read!(u16),
                backup_boot_sector: read!(u16),
            };
            let _ = read!(array(12));
            Some(x)
        } else {
            None
        };

        let drive_number = read!(u8);
        let _ = read!(u8);
        let extended_signature = read!(u8);
        let volume_id = read!(u32);
        let label = read!(array(LABEL_LENGTH));
        let fs_type = read!(array(8));
        let mut boot_code = vec![0u8; BOOT_CODE_END - reader.position() as usize];
        reader.read_exact(&mut boot_code)?;
        if read!(u16) != BOOT_SIGNATURE {
            return Err(Error::InvalidBootSector);
        }

        let mbr = decode_fake_mbr(buf);

        Ok(Self {
            jump,
            oem_id,
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors,
            fat_count,
            root_dir_entries,
            total_sectors_16,
            media,
            fat_length_16,
            sectors_per_track,
            heads,
            hidden_sectors,
            total_sectors_32,
            fat32,
            drive_number,
            extended_signature,
            volume_id,
            label,
            fs_type,
            boot_code,
            mbr,
        })
    }
}

/// Recognizes the partition table written by [`BootSector::set_fake_mbr`]:
/// the message ends before the disk signature, the two bytes after the
/// signature are zero and the only entry is an active partition at LBA 0.
fn decode_fake_mbr(buf: &[u8]) -> Option<FakeMbr> {
    if buf[DISK_SIGNATURE_OFFSET - 1] != 0
        || buf[DISK_SIGNATURE_OFFSET + 4..PARTITION_TABLE_OFFSET] != [0, 0]
        || buf[PARTITION_TABLE_OFFSET] != ACTIVE
    {
        return None;
    }

    let mut entry = [0u8; MbrPartition::SIZE];
    entry.copy_from_slice(&buf[PARTITION_TABLE_OFFSET..][..MbrPartition::SIZE]);
    let partition = MbrPartition::decode(&entry).filter(|x| x.lba == 0)?;

    let mut signature = [0u8; 4];
    signature.copy_from_slice(&buf[DISK_SIGNATURE_OFFSET..DISK_SIGNATURE_OFFSET + 4]);
    Some(FakeMbr {
        disk_signature: u32::from_le_bytes(signature),
        partition,
    })
}

fn boot_code_offset(width: FatWidth) -> usize {
    match width {
        FatWidth::Fat32 => BOOT_CODE_OFFSET_FAT32,
        _ => BOOT_CODE_OFFSET_FAT16,
    }
}

/// Converts a message to the form printed by the boot code: CR and NUL
/// removed, LF turned into CR LF, NUL terminated.
pub fn encode_message(message: &[u8]) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(message.len() + 8);
    for x in message.iter().copied() {
        match x {
            b'\r' | 0 => (),
            b'\n' => encoded.extend_from_slice(b"\r\n"),
            x => encoded.push(x),
        }
    }
    encoded.push(0);
    encoded
}

/// Picks a backup boot sector location inside the reserved area avoiding the
/// info sector. `None` if the reserved area is too small.
pub fn select_backup_boot_sector(reserved_sectors: u32, info_sector: u32) -> Option<u32> {
    let r = reserved_sectors;
    if r >= 7 && info_sector != 6 {
        Some(6)
    } else if r >= 3 + info_sector && info_sector != r - 2 && info_sector != r - 1 {
        Some(r - 2)
    } else if r >= 3 && info_sector != r - 1 {
        Some(r - 1)
    } else {
        None
    }
}

impl fmt::Display for BootSector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Oem ID                      : {}
Bytes per sector            : {}
Sectors per cluster         : {}
Reserved sectors            : {}
Number of FATs              : {}
Number of directory entries : {}
Sectors per FAT             : {}
Media descriptor            : 0x{:02X}
Sectors per track           : {}
Number of heads             : {}
Number of hidden sectors    : {}
Total sectors               : {}
Volume ID                   : {:08X}
Label                       : {}
Type                        : {}",
            String::from_utf8_lossy(&self.oem_id),
            self.bytes_per_sector,
            self.sectors_per_cluster,
            self.reserved_sectors,
            self.fat_count,
            self.root_dir_entries,
            self.fat_length(),
            self.media,
            self.sectors_per_track,
            self.heads,
            self.hidden_sectors,
            self.total_sectors(),
            self.volume_id,
            String::from_utf8_lossy(&self.label).trim_end(),
            String::from_utf8_lossy(&self.fs_type).trim_end(),
        )?;

        if let Some(x) = &self.fat32 {
            write!(
                f,
                "
Root cluster                : {}
FS info sector              : {}
Backup boot sector          : {}",
                x.root_cluster, x.info_sector, x.backup_boot_sector
            )?;
        }
        Ok(())
    }
}

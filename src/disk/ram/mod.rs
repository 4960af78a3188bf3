use crate::disk::{check_transfer, BlockDevice, Info, MediaType};
use std::collections::BTreeSet;
use std::io;

/// In-memory block device. Individual sectors can be made unreadable or
/// unwritable to emulate a failing medium.
pub struct RamDisk {
    buffer: Vec<u8>,
    sector_size: u32,
    media_type: MediaType,
    read_only: bool,
    media_present: bool,
    unreadable: BTreeSet<u64>,
    unwritable: BTreeSet<u64>,
    writes: Vec<(u64, u64)>,
}

impl RamDisk {
    pub fn new_zeroed(sector_size: u32, num_sectors: u64) -> Self {
        let size_in_bytes = sector_size as usize * num_sectors as usize;
        Self::from_vec(vec![0u8; size_in_bytes], sector_size)
    }

    pub fn from_vec(vector: Vec<u8>, sector_size: u32) -> Self {
        assert_eq!(vector.len() % sector_size as usize, 0);

        Self {
            buffer: vector,
            sector_size,
            media_type: MediaType::HDD,
            read_only: false,
            media_present: true,
            unreadable: BTreeSet::new(),
            unwritable: BTreeSet::new(),
            writes: Vec::new(),
        }
    }

    pub fn with_media_type(mut self, media_type: MediaType) -> Self {
        self.media_type = media_type;
        self
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn set_media_present(&mut self, present: bool) {
        self.media_present = present;
    }

    pub fn mark_unreadable(&mut self, sector: u64) {
        self.unreadable.insert(sector);
    }

    pub fn mark_unwritable(&mut self, sector: u64) {
        self.unwritable.insert(sector);
    }

    /// `(lba, block count)` of every successful write, in order.
    pub fn write_log(&self) -> &[(u64, u64)] {
        &self.writes
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    pub fn sector(&self, lba: u64) -> &[u8] {
        let start = lba as usize * self.sector_size as usize;
        &self.buffer[start..start + self.sector_size as usize]
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }

    fn byte_range(&self, lba: u64, count: u64) -> (usize, usize) {
        let start = lba as usize * self.sector_size as usize;
        (start, start + count as usize * self.sector_size as usize)
    }
}

impl Info for RamDisk {
    fn block_size(&self) -> u32 {
        self.sector_size
    }
    fn block_count(&self) -> u64 {
        (self.buffer.len() / self.sector_size as usize) as u64
    }
    fn media_type(&self) -> MediaType {
        self.media_type
    }
    fn read_only(&self) -> bool {
        self.read_only
    }
    fn media_present(&self) -> bool {
        self.media_present
    }
}

impl BlockDevice for RamDisk {
    fn read_blocks(&mut self, lba: u64, buf: &mut [u8]) -> io::Result<()> {
        let count = check_transfer(&*self, lba, buf.len())?;
        if let Some(bad) = self.unreadable.range(lba..lba + count).next() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("unreadable sector {}", bad),
            ));
        }

        let (start, end) = self.byte_range(lba, count);
        buf.copy_from_slice(&self.buffer[start..end]);
        Ok(())
    }

    fn write_blocks(&mut self, lba: u64, buf: &[u8]) -> io::Result<()> {
        if self.read_only {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "device is read only",
            ));
        }

        let count = check_transfer(&*self, lba, buf.len())?;
        if let Some(bad) = self.unwritable.range(lba..lba + count).next() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("write to sector {} failed", bad),
            ));
        }

        let (start, end) = self.byte_range(lba, count);
        self.buffer[start..end].copy_from_slice(buf);
        self.writes.push((lba, count));
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ram_disk_read_write() {
        crate::tests_init();

        let mut disk = RamDisk::new_zeroed(512, 4);
        assert_eq!(disk.block_count(), 4);
        assert_eq!(disk.disk_size(), 2048);

        disk.write_blocks(1, &[0xAB; 1024]).unwrap();
        let mut buf = [0u8; 512];
        disk.read_blocks(2, &mut buf).unwrap();
        assert!(buf.iter().all(|x| *x == 0xAB));
        disk.read_blocks(3, &mut buf).unwrap();
        assert!(buf.iter().all(|x| *x == 0));

        assert_eq!(disk.write_log(), &[(1, 2)]);
        assert!(disk.write_blocks(3, &[0; 1024]).is_err());
    }

    #[test]
    fn test_ram_disk_failures() {
        crate::tests_init();

        let mut disk = RamDisk::new_zeroed(512, 16);
        disk.mark_unreadable(5);
        disk.mark_unwritable(9);

        let mut buf = vec![0u8; 512 * 4];
        assert!(disk.read_blocks(0, &mut buf).is_ok());
        assert!(disk.read_blocks(4, &mut buf).is_err());
        assert!(disk.read_blocks(6, &mut buf).is_ok());

        assert!(disk.write_blocks(8, &buf[..1024]).is_err());
        assert!(disk.write_blocks(10, &buf[..1024]).is_ok());

        disk.set_read_only(true);
        assert!(disk.write_blocks(0, &buf[..512]).is_err());
        assert_eq!(disk.write_log().len(), 1);
    }
}

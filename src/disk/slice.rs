use crate::disk::{check_transfer, BlockDevice, Info, MediaType};
use std::io;

/// Window of `block_count` blocks starting at `start_lba` of a parent device.
pub struct DiskSlice<'a> {
    parent: &'a mut dyn BlockDevice,
    start: u64,
    block_count: u64,
}

impl<'a> DiskSlice<'a> {
    pub fn new(
        parent: &'a mut dyn BlockDevice,
        start_lba: u64,
        block_count: u64,
    ) -> io::Result<Self> {
        match start_lba.checked_add(block_count) {
            Some(end) if end <= parent.block_count() => (),
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "slice of {} blocks at LBA {} does not fit device of {} blocks",
                        block_count,
                        start_lba,
                        parent.block_count()
                    ),
                ))
            }
        }

        Ok(Self {
            parent,
            start: start_lba,
            block_count,
        })
    }

    /// Slice covering everything from `start_lba` to the end of the parent.
    pub fn from_offset(parent: &'a mut dyn BlockDevice, start_lba: u64) -> io::Result<Self> {
        let count = parent.block_count().saturating_sub(start_lba);
        Self::new(parent, start_lba, count)
    }

    #[inline]
    pub fn start(&self) -> u64 {
        self.start
    }
}

impl<'a> Info for DiskSlice<'a> {
    fn block_size(&self) -> u32 {
        self.parent.block_size()
    }
    fn block_count(&self) -> u64 {
        self.block_count
    }
    fn media_type(&self) -> MediaType {
        self.parent.media_type()
    }
    fn read_only(&self) -> bool {
        self.parent.read_only()
    }
    fn media_present(&self) -> bool {
        self.parent.media_present()
    }
}

impl<'a> BlockDevice for DiskSlice<'a> {
    fn read_blocks(&mut self, lba: u64, buf: &mut [u8]) -> io::Result<()> {
        check_transfer(&*self, lba, buf.len())?;
        self.parent.read_blocks(self.start + lba, buf)
    }

    fn write_blocks(&mut self, lba: u64, buf: &[u8]) -> io::Result<()> {
        check_transfer(&*self, lba, buf.len())?;
        self.parent.write_blocks(self.start + lba, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.parent.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::ram::RamDisk;

    #[test]
    fn test_disk_slice_creation() {
        crate::tests_init();

        let mut disk = RamDisk::new_zeroed(512, 3);
        assert!(DiskSlice::new(&mut disk, 0, 1).is_ok());
        assert!(DiskSlice::new(&mut disk, 0, 3).is_ok());
        assert!(DiskSlice::new(&mut disk, 2, 1).is_ok());
        assert!(DiskSlice::new(&mut disk, 0, 4).is_err());
        assert!(DiskSlice::new(&mut disk, 3, 1).is_err());

        let slice = DiskSlice::from_offset(&mut disk, 1).unwrap();
        assert_eq!(slice.block_count(), 2);
        assert_eq!(slice.disk_size(), 1024);
    }

    #[test]
    fn test_disk_slice_read() {
        crate::tests_init();

        let mut data = vec![0u8; 512 * 3];
        data[..7].copy_from_slice(b"1245P21");
        data[512..522].copy_from_slice(b"0021X11R97");
        data[1020..1024].copy_from_slice(b"A4N1");
        let mut disk = RamDisk::from_vec(data, 512);

        let mut slice = DiskSlice::new(&mut disk, 1, 2).unwrap();
        let mut buf = [0u8; 512];
        slice.read_blocks(0, &mut buf).unwrap();
        assert_eq!(&buf[..10], b"0021X11R97");
        assert_eq!(&buf[508..], b"A4N1");

        assert!(slice.read_blocks(2, &mut buf).is_err());
    }

    #[test]
    fn test_disk_slice_write() {
        crate::tests_init();

        let mut disk = RamDisk::new_zeroed(512, 4);
        {
            let mut slice = DiskSlice::new(&mut disk, 2, 2).unwrap();
            slice.write_blocks(1, &[0x77; 512]).unwrap();
            assert!(slice.write_blocks(1, &[0x77; 1024]).is_err());
            slice.flush().unwrap();
        }

        assert_eq!(disk.write_log(), &[(3, 1)]);
        assert!(disk.sector(3).iter().all(|x| *x == 0x77));
        assert!(disk.sector(2).iter().all(|x| *x == 0));
    }
}

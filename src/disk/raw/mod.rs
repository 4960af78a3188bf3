use crate::disk::{check_transfer, BlockDevice, Info, MediaType};
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Block device backed by anything seekable, a disk image or a device node.
pub struct RawDisk<B>
where
    B: Read + Seek + Write,
{
    backend: B,
    block_size: u32,
    block_count: u64,
    media_type: MediaType,
    read_only: bool,
}

impl<B> RawDisk<B>
where
    B: Read + Seek + Write,
{
    pub fn open(backend: B, block_size: u32, block_count: u64, media_type: MediaType) -> Self {
        Self {
            backend,
            block_size,
            block_count,
            media_type,
            read_only: false,
        }
    }

    /// Determines the block count from the backend length. A trailing partial
    /// block is not addressable.
    pub fn probe(mut backend: B, block_size: u32, media_type: MediaType) -> io::Result<Self> {
        let size = backend.seek(SeekFrom::End(0))?;
        let block_count = size / block_size as u64;
        if size % block_size as u64 != 0 {
            warn!(
                "device size {} is not a multiple of block size {}, ignoring last {} bytes",
                size,
                block_size,
                size % block_size as u64
            );
        }

        Ok(Self::open(backend, block_size, block_count, media_type))
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn into_inner(self) -> B {
        self.backend
    }
}

impl<B> Info for RawDisk<B>
where
    B: Read + Seek + Write,
{
    fn block_size(&self) -> u32 {
        self.block_size
    }
    fn block_count(&self) -> u64 {
        self.block_count
    }
    fn media_type(&self) -> MediaType {
        self.media_type
    }
    fn read_only(&self) -> bool {
        self.read_only
    }
}

impl<B> BlockDevice for RawDisk<B>
where
    B: Read + Seek + Write,
{
    fn read_blocks(&mut self, lba: u64, buf: &mut [u8]) -> io::Result<()> {
        check_transfer(&*self, lba, buf.len())?;
        self.backend
            .seek(SeekFrom::Start(lba * self.block_size as u64))?;
        self.backend.read_exact(buf)
    }

    fn write_blocks(&mut self, lba: u64, buf: &[u8]) -> io::Result<()> {
        if self.read_only {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "device is read only",
            ));
        }

        check_transfer(&*self, lba, buf.len())?;
        self.backend
            .seek(SeekFrom::Start(lba * self.block_size as u64))?;
        self.backend.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.backend.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_raw_disk_probe() {
        crate::tests_init();

        let disk = RawDisk::probe(Cursor::new(vec![0u8; 4096 + 100]), 512, MediaType::HDD).unwrap();
        assert_eq!(disk.block_count(), 8);
        assert_eq!(disk.block_size(), 512);
        assert!(!disk.read_only());
    }

    #[test]
    fn test_raw_disk_read_write() {
        crate::tests_init();

        let mut disk = RawDisk::open(Cursor::new(vec![0u8; 2048]), 512, 4, MediaType::HDD);
        disk.write_blocks(2, &[0x5A; 512]).unwrap();

        let mut buf = [0u8; 1024];
        disk.read_blocks(1, &mut buf).unwrap();
        assert!(buf[..512].iter().all(|x| *x == 0));
        assert!(buf[512..].iter().all(|x| *x == 0x5A));

        assert!(disk.read_blocks(3, &mut buf).is_err());

        let inner = disk.into_inner().into_inner();
        assert_eq!(inner[1024], 0x5A);
        assert_eq!(inner[1535], 0x5A);
        assert_eq!(inner[1536], 0);
    }

    #[test]
    fn test_raw_disk_read_only() {
        crate::tests_init();

        let mut disk =
            RawDisk::open(Cursor::new(vec![0u8; 1024]), 512, 2, MediaType::FDD)
                .with_read_only(true);
        assert!(disk.read_only());
        assert!(disk.write_blocks(0, &[0; 512]).is_err());
    }
}

extern crate better_panic;
extern crate clap;
extern crate fatfmt;

#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate log;

use anyhow::Context;
use clap::Parser;
use fatfmt::disk::raw::RawDisk;
use fatfmt::disk::slice::DiskSlice;
use fatfmt::disk::{Info, MediaType};
use fatfmt::fs::fat::{self, FatWidth, FormatReport, FormatRequest};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

mod utils;

#[derive(Parser)]
#[clap(about = "Create a FAT file system on a device or disk image")]
struct Options {
    #[clap(short, long, parse(from_occurrences))]
    pub verbose: u32,

    #[clap(short = 'F', long = "fat", parse(try_from_str), help = "FAT type: 12, 16 or 32")]
    pub fat_width: Option<FatWidth>,

    #[clap(short = 'n', long = "label", default_value = "")]
    pub label: String,

    #[clap(short = 'i', long = "volume-id", parse(try_from_str = utils::parse_volume_id))]
    pub volume_id: Option<u32>,

    #[clap(short = 'D', long = "drive-number", parse(try_from_str = utils::parse_u8))]
    pub drive_number: Option<u8>,

    #[clap(short = 'M', long = "media", parse(try_from_str = utils::parse_u8))]
    pub media: Option<u8>,

    #[clap(long = "media-type", default_value = "hdd", parse(try_from_str))]
    pub media_type: MediaType,

    #[clap(short = 'S', long = "sector-size")]
    pub sector_size: Option<u32>,

    #[clap(short = 's', long = "cluster-size", help = "Sectors per cluster")]
    pub cluster_sectors: Option<u32>,

    #[clap(short = 'R', long = "reserved")]
    pub reserved_sectors: Option<u32>,

    #[clap(short = 'r', long = "root-entries")]
    pub root_dir_entries: Option<u32>,

    #[clap(short = 'f', long = "fats", default_value = "2")]
    pub fat_count: u8,

    #[clap(short = 'c', long = "check", help = "Scan the device for bad blocks")]
    pub check: bool,

    #[clap(short = 'l', long = "bad-blocks", parse(from_os_str))]
    #[clap(help = "File listing bad 1 KiB blocks")]
    pub bad_block_list: Option<PathBuf>,

    #[clap(short = 'a', long = "no-align")]
    pub no_align: bool,

    #[clap(short = 'b', long = "backup")]
    pub backup_boot_sector: Option<u32>,

    #[clap(short = 'm', long = "message", parse(from_os_str))]
    #[clap(help = "File holding the boot message")]
    pub message: Option<PathBuf>,

    #[clap(long = "hidden", default_value = "0")]
    pub hidden_sectors: u32,

    #[clap(short = 'g', long = "geometry", help = "HEADS/SECTORS")]
    #[clap(parse(try_from_str = utils::parse_geometry))]
    pub chs: Option<(u16, u16)>,

    #[clap(long = "mbr", help = "Write a partition table spanning the whole device")]
    pub fake_mbr: bool,

    #[clap(long = "offset", default_value = "0", help = "First sector of the file system")]
    pub offset: u64,

    #[clap(short = 'C', long = "create", help = "Create the image file")]
    pub create: bool,

    #[clap(name = "file", parse(from_os_str))]
    pub file: PathBuf,

    #[clap(name = "blocks", help = "File system size in 1 KiB blocks")]
    pub block_count: Option<u64>,
}

impl Options {
    fn request(&self) -> anyhow::Result<FormatRequest> {
        let message = match &self.message {
            Some(path) => Some(fs::read(path).with_context(|| {
                format!("failed to read boot message from {}", path.display())
            })?),
            None => None,
        };
        let bad_block_list = match &self.bad_block_list {
            Some(path) => Some(
                fs::read_to_string(path)
                    .with_context(|| format!("failed to read bad block list {}", path.display()))?,
            ),
            None => None,
        };

        Ok(FormatRequest {
            fat_width: self.fat_width,
            sector_size: self.sector_size,
            cluster_sectors: self.cluster_sectors,
            reserved_sectors: self.reserved_sectors,
            root_dir_entries: self.root_dir_entries,
            fat_count: self.fat_count,
            align: !self.no_align,
            label: self.label.clone(),
            volume_id: self.volume_id,
            drive_number: self.drive_number,
            media: self.media,
            hidden_sectors: self.hidden_sectors,
            media_type: Some(self.media_type),
            chs: self.chs,
            backup_boot_sector: self.backup_boot_sector,
            message,
            check_bad_blocks: self.check,
            bad_block_list,
            fake_mbr: self.fake_mbr,
            created: None,
        })
    }
}

/// Opens the target, falling back to read only access when it cannot be
/// written. The returned flag tells whether the fallback was taken.
fn open_file(path: &Path, create: bool, size: Option<u64>) -> anyhow::Result<(File, bool)> {
    if !create {
        return match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => Ok((file, false)),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                debug!("{} is not writable: {}", path.display(), e);
                let file = File::open(path).context("failed to open file")?;
                Ok((file, true))
            }
            Err(e) => Err(e).context("failed to open file"),
        };
    }

    let size = size.ok_or_else(|| anyhow!("size of the image to create was not given"))?;
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)
        .context("failed to create file")?;
    file.set_len(size).context("failed to resize file")?;
    Ok((file, false))
}

fn format_file(
    file: File,
    read_only: bool,
    options: &Options,
    request: &FormatRequest,
) -> anyhow::Result<FormatReport> {
    let sector_size = options.sector_size.unwrap_or(512);
    let mut disk = RawDisk::probe(file, sector_size, options.media_type)
        .context("failed to determine device size")?
        .with_read_only(read_only);
    let mut slice = match options.block_count {
        Some(x) => DiskSlice::new(&mut disk, options.offset, x * 1024 / sector_size as u64),
        None => DiskSlice::from_offset(&mut disk, options.offset),
    }
    .context("file system does not fit on the device")?;

    info!(
        "formatting {} ({}) starting at sector {}",
        options.file.display(),
        utils::size_to_string(slice.disk_size()),
        slice.start()
    );

    fat::format(&mut slice, request).context("failed to create file system")
}

fn main() -> anyhow::Result<()> {
    better_panic::install();
    let options = Options::parse();
    utils::setup_logging(options.verbose);

    let request = options.request()?;
    request.validate().context("invalid options")?;

    let sector_size = options.sector_size.unwrap_or(512);
    let fs_size = options.block_count.map(|x| x * 1024);
    let image_size = fs_size.map(|x| options.offset * sector_size as u64 + x);
    let (file, read_only) = open_file(&options.file, options.create, image_size)?;

    let report = format_file(file, read_only, &options, &request);
    if report.is_err() && options.create {
        debug!("removing {}", options.file.display());
        if let Err(e) = fs::remove_file(&options.file) {
            warn!("failed to remove {}: {}", options.file.display(), e);
        }
    }
    println!("{}", report?);

    Ok(())
}

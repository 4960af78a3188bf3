use super::bpb::{select_backup_boot_sector, BootSector, FakeMbr, VolumeInfo, INFO_SECTOR};
use super::defect::{self, DefectError};
use super::fsinfo::{self, FsInfo};
use super::geometry::{
    compute_layout, floppy_preset, DeviceGeometry, FatLayout, FloppyPreset, GeometryError,
    LayoutOptions, MAX_CLUSTER_SECTORS, MAX_FAT_COUNT, MAX_SECTOR_SIZE, MIN_SECTOR_SIZE,
};
use super::label::{volume_label_entry, VolumeLabel};
use super::table::FatTable;
use super::{writer, FatWidth, DIR_ENTRY_SIZE};
use crate::disk::{BlockDevice, MediaType};
use crate::part::mbr::{partition_type, MbrPartition};
use crate::region::Region;
use crate::{Error, Result};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use std::collections::BTreeSet;
use std::fmt;

const DEFAULT_ROOT_ENTRIES: u32 = 512;
const DEFAULT_MEDIA: u8 = 0xF8;

/// Everything describing one formatting job. Fields left as `None` are
/// derived from the device.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatRequest {
    pub fat_width: Option<FatWidth>,
    /// Must match the device block size when set.
    pub sector_size: Option<u32>,
    pub cluster_sectors: Option<u32>,
    pub reserved_sectors: Option<u32>,
    pub root_dir_entries: Option<u32>,
    pub fat_count: u8,
    pub align: bool,
    pub label: String,
    pub volume_id: Option<u32>,
    pub drive_number: Option<u8>,
    pub media: Option<u8>,
    pub hidden_sectors: u32,
    /// Overrides the media type reported by the device.
    pub media_type: Option<MediaType>,
    /// Heads and sectors per track.
    pub chs: Option<(u16, u16)>,
    pub backup_boot_sector: Option<u32>,
    pub message: Option<Vec<u8>>,
    pub check_bad_blocks: bool,
    /// Contents of a bad block list.
    pub bad_block_list: Option<String>,
    pub fake_mbr: bool,
    pub created: Option<NaiveDateTime>,
}

impl Default for FormatRequest {
    fn default() -> Self {
        Self {
            fat_width: None,
            sector_size: None,
            cluster_sectors: None,
            reserved_sectors: None,
            root_dir_entries: None,
            fat_count: 2,
            align: true,
            label: String::new(),
            volume_id: None,
            drive_number: None,
            media: None,
            hidden_sectors: 0,
            media_type: None,
            chs: None,
            backup_boot_sector: None,
            message: None,
            check_bad_blocks: false,
            bad_block_list: None,
            fake_mbr: false,
            created: None,
        }
    }
}

impl FormatRequest {
    /// Checks everything that can be checked without looking at the device.
    pub fn validate(&self) -> Result<()> {
        if self.check_bad_blocks && self.bad_block_list.is_some() {
            return Err(Error::Configuration(
                "cannot scan for bad blocks and use a bad block list at the same time".to_owned(),
            ));
        }

        if self.fat_count == 0 || self.fat_count > MAX_FAT_COUNT {
            return Err(GeometryError::InvalidFatCount(self.fat_count).into());
        }
        if let Some(x) = self.sector_size {
            if !is_power_of_2!(x) || x < MIN_SECTOR_SIZE || x > MAX_SECTOR_SIZE {
                return Err(GeometryError::InvalidSectorSize(x).into());
            }
        }
        if let Some(x) = self.cluster_sectors {
            if !is_power_of_2!(x) || x > MAX_CLUSTER_SECTORS {
                return Err(GeometryError::InvalidClusterSize(x).into());
            }
        }
        if let Some(x) = self.reserved_sectors {
            if x == 0 || x > u16::MAX as u32 {
                return Err(GeometryError::InvalidReservedSectors(x).into());
            }
        }

        if let Some(x) = self.root_dir_entries {
            if x == 0 || x > u16::MAX as u32 {
                return Err(Error::Configuration(format!(
                    "invalid number of root directory entries {}",
                    x
                )));
            }
        }
        if let Some((heads, sectors_per_track)) = self.chs {
            if heads == 0 || heads > 255 || sectors_per_track == 0 || sectors_per_track > 63 {
                return Err(Error::Configuration(format!(
                    "invalid geometry {}/{}, expected 1-255 heads and 1-63 sectors per track",
                    heads, sectors_per_track
                )));
            }
        }
        if let Some(x) = self.backup_boot_sector {
            if x == 0 || x == INFO_SECTOR as u32 {
                return Err(Error::Configuration(format!(
                    "backup boot sector cannot be placed at sector {}",
                    x
                )));
            }
            if let Some(reserved) = self.reserved_sectors.map(|n| Region::new(0, n as u64 - 1)) {
                check_backup_boot_sector(x, &reserved)?;
            }
        }
        if let Some(x) = self.media_type {
            check_fake_mbr(self.fake_mbr, x)?;
        }

        self.label()?;
        if let Some(list) = &self.bad_block_list {
            defect::parse_list(list)?;
        }

        Ok(())
    }

    fn label(&self) -> Result<VolumeLabel> {
        Ok(VolumeLabel::parse(&self.label)?)
    }

    fn device_geometry(
        &self,
        sector_size: u32,
        total_sectors: u64,
        preset: Option<&FloppyPreset>,
    ) -> DeviceGeometry {
        let mut geometry = DeviceGeometry::new(sector_size, total_sectors);
        if let Some(x) = preset {
            geometry.heads = x.heads;
            geometry.sectors_per_track = x.sectors_per_track;
        }
        if let Some((heads, sectors_per_track)) = self.chs {
            geometry.heads = heads;
            geometry.sectors_per_track = sectors_per_track;
        }
        geometry.hidden_sectors = self.hidden_sectors;
        geometry
    }

    fn layout_options(&self, preset: Option<&FloppyPreset>) -> LayoutOptions {
        LayoutOptions {
            fat_width: self.fat_width,
            root_dir_entries: self
                .root_dir_entries
                .or_else(|| preset.map(|x| x.root_dir_entries))
                .unwrap_or(DEFAULT_ROOT_ENTRIES),
            cluster_sectors: self.cluster_sectors,
            cluster_hint: preset.map(|x| x.cluster_sectors),
            reserved_sectors: self.reserved_sectors,
            fat_count: self.fat_count,
            align: self.align,
        }
    }

    /// Backup boot sector location, 0 when there is none.
    fn backup_boot_sector(&self, layout: &FatLayout) -> Result<u16> {
        if layout.fat_width != FatWidth::Fat32 {
            if self.backup_boot_sector.is_some() {
                warn!("backup boot sector is only used on FAT32, ignoring");
            }
            return Ok(0);
        }

        match self.backup_boot_sector {
            Some(x) => {
                check_backup_boot_sector(x, &layout.reserved_region())?;
                Ok(x as u16)
            }
            None => match select_backup_boot_sector(layout.reserved_sectors, INFO_SECTOR as u32) {
                Some(x) => Ok(x as u16),
                None => {
                    warn!(
                        "no room for a backup boot sector in {} reserved sectors",
                        layout.reserved_sectors
                    );
                    Ok(0)
                }
            },
        }
    }
}

fn check_backup_boot_sector(sector: u32, reserved: &Region) -> Result<()> {
    if reserved.contains(sector as u64) {
        return Ok(());
    }
    Err(Error::Configuration(format!(
        "backup boot sector {} is outside of the reserved area {}",
        sector, reserved
    )))
}

fn check_fake_mbr(fake_mbr: bool, media_type: MediaType) -> Result<()> {
    if fake_mbr && !media_type.is_fixed() {
        return Err(Error::Configuration(format!(
            "cannot write a partition table to a {}",
            media_type
        )));
    }
    Ok(())
}

/// Volume serial number derived from the creation time.
pub fn volume_id<Tz: TimeZone>(created: &DateTime<Tz>) -> u32 {
    ((created.timestamp() as u32) << 20) | created.timestamp_subsec_micros()
}

fn fake_mbr(layout: &FatLayout, geometry: &DeviceGeometry, disk_signature: u32) -> FakeMbr {
    let sectors = layout.total_usable_sectors;
    let heads = geometry.heads;
    let sectors_per_track = geometry.sectors_per_track;

    FakeMbr {
        disk_signature,
        partition: MbrPartition::new(
            partition_type(layout.fat_width, sectors, heads, sectors_per_track),
            0,
            sectors as u32,
            heads,
            sectors_per_track,
        ),
    }
}

/// A volume built in memory, ready to be written.
///
/// The FAT, the FS information sector and the root cluster recorded in the
/// boot sector depend on each other, they only change together through
/// [`NewVolume::process_bad_clusters`].
#[derive(Debug)]
pub struct NewVolume {
    layout: FatLayout,
    boot_sector: BootSector,
    fs_info: Option<FsInfo>,
    table: FatTable,
    root_dir: Vec<u8>,
}

impl NewVolume {
    pub fn new(layout: FatLayout, boot_sector: BootSector, volume: &VolumeInfo) -> Result<Self> {
        let width = layout.fat_width;
        let mut table = FatTable::with_media(width, layout.entry_count(), volume.media)?;

        let fs_info = match boot_sector.root_cluster() {
            Some(root) => {
                table.mark(root, width.eof_marker())?;
                Some(FsInfo::new(table.free_cluster_count(), next_free(&table)))
            }
            None => None,
        };

        let root_dir_bytes = layout.root_dir_write_sectors() as usize * layout.sector_size as usize;
        let mut root_dir = vec![0u8; root_dir_bytes];
        let entry_size = DIR_ENTRY_SIZE as usize;
        if !volume.label.is_default() && root_dir.len() >= entry_size {
            let entry = volume_label_entry(&volume.label, &volume.created);
            root_dir[..entry_size].copy_from_slice(&entry);
        }

        Ok(Self {
            layout,
            boot_sector,
            fs_info,
            table,
            root_dir,
        })
    }

    #[inline]
    pub fn layout(&self) -> &FatLayout {
        &self.layout
    }

    #[inline]
    pub fn boot_sector(&self) -> &BootSector {
        &self.boot_sector
    }

    #[inline]
    pub fn fs_info(&self) -> Option<&FsInfo> {
        self.fs_info.as_ref()
    }

    #[inline]
    pub fn table(&self) -> &FatTable {
        &self.table
    }

    #[inline]
    pub fn root_dir(&self) -> &[u8] {
        &self.root_dir
    }

    /// Marks the clusters holding `sectors` bad and returns how many of them
    /// were not bad already.
    ///
    /// On FAT32 the free cluster count and next free hint are updated and a
    /// bad root cluster is moved to the next free cluster. Nothing changes
    /// when an error is returned.
    pub fn process_bad_clusters(&mut self, sectors: &BTreeSet<u64>) -> Result<u32> {
        let clusters = defect::bad_clusters(&self.layout, sectors);
        if clusters.is_empty() {
            return Ok(0);
        }

        let width = self.layout.fat_width;
        let mut table = self.table.clone();
        let mut newly_bad = 0;
        for x in clusters.iter().copied() {
            if table.mark(x, width.bad_marker())? {
                newly_bad += 1;
            }
        }

        let mut new_root = None;
        if let Some(root) = self.boot_sector.root_cluster() {
            if table.is_bad(root) {
                let x = table
                    .first_free(root + 1)
                    .ok_or(DefectError::NoRootCluster(root))?;
                table.mark(x, width.eof_marker())?;
                warn!("root cluster {} is bad, moving the root directory to cluster {}", root, x);
                new_root = Some(x);
            }
        }

        let fs_info = self.fs_info.map(|x| {
            let free_clusters = table.free_cluster_count();
            debug_assert_eq!(free_clusters, x.free_clusters.saturating_sub(newly_bad));
            FsInfo::new(free_clusters, next_free(&table))
        });

        if let (Some(root), Some(ext)) = (new_root, self.boot_sector.fat32.as_mut()) {
            ext.root_cluster = root;
        }
        self.fs_info = fs_info;
        self.table = table;

        info!(
            "{} clusters marked bad, {} in total",
            newly_bad,
            self.table.bad_cluster_count()
        );
        Ok(newly_bad)
    }
}

fn next_free(table: &FatTable) -> u32 {
    table.first_free(0).unwrap_or(fsinfo::UNKNOWN)
}

/// Summary of a finished format.
#[derive(Debug, Clone)]
pub struct FormatReport {
    pub layout: FatLayout,
    pub volume_id: u32,
    pub label: VolumeLabel,
    pub bad_clusters: u32,
    pub free_clusters: u32,
    pub root_cluster: Option<u32>,
    pub backup_boot_sector: Option<u16>,
}

impl fmt::Display for FormatReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{}", self.layout)?;
        write!(
            f,
            "Volume ID             : {:08X}
Label                 : {}
Bad clusters          : {}
Free clusters         : {}",
            self.volume_id, self.label, self.bad_clusters, self.free_clusters
        )?;
        if let Some(x) = self.root_cluster {
            write!(f, "\nRoot cluster          : {}", x)?;
        }
        if let Some(x) = self.backup_boot_sector {
            write!(f, "\nBackup boot sector    : {}", x)?;
        }
        Ok(())
    }
}

/// Creates a FAT file system spanning the whole `device`.
///
/// Nothing is written unless the request is valid, a layout exists for the
/// device and the bad block list fits the layout.
pub fn format(device: &mut dyn BlockDevice, request: &FormatRequest) -> Result<FormatReport> {
    request.validate()?;

    if !device.media_present() {
        return Err(Error::Configuration("no medium in the device".to_owned()));
    }
    if device.read_only() {
        return Err(Error::Configuration("device is read only".to_owned()));
    }

    let sector_size = device.block_size();
    if let Some(x) = request.sector_size {
        if x != sector_size {
            return Err(Error::Configuration(format!(
                "requested sector size {} does not match device block size {}",
                x, sector_size
            )));
        }
    }

    let media_type = request.media_type.unwrap_or_else(|| device.media_type());
    check_fake_mbr(request.fake_mbr, media_type)?;

    let preset = if media_type == MediaType::FDD {
        floppy_preset(device.disk_size())
    } else {
        None
    };
    if let Some(x) = preset {
        info!("using standard {} KiB floppy format", x.size_kib);
    }

    let geometry = request.device_geometry(sector_size, device.block_count(), preset);
    let layout = compute_layout(&geometry, &request.layout_options(preset))?;
    if layout.fat_width == FatWidth::Fat32 && request.root_dir_entries.is_some() {
        warn!("root directory size is not fixed on FAT32, ignoring the number of entries");
    }
    let backup_boot_sector = request.backup_boot_sector(&layout)?;

    let now = Local::now();
    let created = request.created.unwrap_or_else(|| now.naive_local());
    let default_volume_id = match request.created {
        Some(x) => volume_id(&x.and_utc()),
        None => volume_id(&now),
    };
    let volume = VolumeInfo {
        label: request.label()?,
        volume_id: request.volume_id.unwrap_or(default_volume_id),
        drive_number: request.drive_number.unwrap_or(match media_type {
            MediaType::FDD => 0x00,
            _ => 0x80,
        }),
        media: request
            .media
            .or_else(|| preset.map(|x| x.media))
            .unwrap_or(DEFAULT_MEDIA),
        created,
    };

    let mut boot_sector = BootSector::new(&layout, &geometry, &volume, backup_boot_sector);
    if let Some(x) = &request.message {
        boot_sector.set_message(x);
    }
    if request.fake_mbr {
        boot_sector.set_fake_mbr(fake_mbr(&layout, &geometry, volume.volume_id));
    }
    debug!("boot sector\n{}", boot_sector);

    let listed = match &request.bad_block_list {
        Some(list) => Some(defect::mark_from_list(list, &layout)?),
        None => None,
    };

    let mut new_volume = NewVolume::new(layout, boot_sector, &volume)?;
    let bad_sectors = match listed {
        Some(x) => x,
        None if request.check_bad_blocks => defect::scan(device, &layout)?,
        None => BTreeSet::new(),
    };
    new_volume.process_bad_clusters(&bad_sectors)?;

    writer::write_all(device, &new_volume)?;

    Ok(FormatReport {
        layout,
        volume_id: volume.volume_id,
        label: volume.label,
        bad_clusters: new_volume.table().bad_cluster_count(),
        free_clusters: new_volume.table().free_cluster_count(),
        root_cluster: new_volume.boot_sector().root_cluster(),
        backup_boot_sector: match backup_boot_sector {
            0 => None,
            x => Some(x),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::ram::RamDisk;
    use crate::fs::fat::defect::ListError;
    use crate::fs::fat::label::ValidationError;
    use chrono::NaiveDate;
    use std::io::Cursor;

    fn created() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 11, 5)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap()
    }

    fn request() -> FormatRequest {
        FormatRequest {
            label: "FATFMT".to_owned(),
            volume_id: Some(0x0BAD_F00D),
            created: Some(created()),
            ..Default::default()
        }
    }

    fn fat32_request() -> FormatRequest {
        FormatRequest {
            fat_width: Some(FatWidth::Fat32),
            ..request()
        }
    }

    fn mount(disk: RamDisk) -> fatfs::FileSystem<Cursor<Vec<u8>>> {
        fatfs::FileSystem::new(Cursor::new(disk.into_inner()), fatfs::FsOptions::new()).unwrap()
    }

    #[test]
    fn test_validate() {
        crate::tests_init();

        assert!(request().validate().is_ok());

        macro_rules! invalid {
            ($err:pat, $($field:ident: $value:expr),+) => {{
                let r = FormatRequest {
                    $($field: $value,)+
                    ..request()
                };
                assert!(matches!(r.validate(), Err($err)));
            }};
        }

        invalid!(
            Error::Configuration(_),
            check_bad_blocks: true,
            bad_block_list: Some("100\n".to_owned())
        );
        invalid!(Error::Geometry(GeometryError::InvalidFatCount(5)), fat_count: 5);
        invalid!(Error::Geometry(GeometryError::InvalidFatCount(0)), fat_count: 0);
        invalid!(Error::Geometry(GeometryError::InvalidSectorSize(1000)), sector_size: Some(1000));
        invalid!(Error::Geometry(GeometryError::InvalidClusterSize(3)), cluster_sectors: Some(3));
        invalid!(
            Error::Geometry(GeometryError::InvalidClusterSize(256)),
            cluster_sectors: Some(256)
        );
        invalid!(
            Error::Geometry(GeometryError::InvalidReservedSectors(0)),
            reserved_sectors: Some(0)
        );
        invalid!(Error::Configuration(_), root_dir_entries: Some(70000));
        invalid!(Error::Configuration(_), chs: Some((0, 63)));
        invalid!(Error::Configuration(_), chs: Some((16, 64)));
        invalid!(Error::Configuration(_), backup_boot_sector: Some(1));
        invalid!(
            Error::Configuration(_),
            fake_mbr: true,
            media_type: Some(MediaType::FDD)
        );
        invalid!(
            Error::Configuration(_),
            reserved_sectors: Some(8),
            backup_boot_sector: Some(10)
        );
        invalid!(
            Error::Configuration(_),
            reserved_sectors: Some(8),
            backup_boot_sector: Some(8)
        );

        invalid!(
            Error::Validation(ValidationError::LabelTooLong(_)),
            label: "TOO LONG LABEL".to_owned()
        );
        invalid!(
            Error::List(ListError::ParseError { line: 2, .. }),
            bad_block_list: Some("100\n10O\n".to_owned())
        );

        let r = FormatRequest {
            fake_mbr: true,
            media_type: Some(MediaType::HDD),
            reserved_sectors: Some(8),
            backup_boot_sector: Some(6),
            ..request()
        };
        assert!(r.validate().is_ok());
    }

    #[test]
    fn test_device_checks() {
        crate::tests_init();

        let mut disk = RamDisk::new_zeroed(512, 2880);
        disk.set_read_only(true);
        assert!(matches!(format(&mut disk, &request()), Err(Error::Configuration(_))));

        let mut disk = RamDisk::new_zeroed(512, 2880);
        disk.set_media_present(false);
        assert!(matches!(format(&mut disk, &request()), Err(Error::Configuration(_))));

        let mut disk = RamDisk::new_zeroed(512, 2880);
        let r = FormatRequest {
            sector_size: Some(4096),
            ..request()
        };
        assert!(matches!(format(&mut disk, &r), Err(Error::Configuration(_))));
        assert!(disk.write_log().is_empty());

        let mut disk = RamDisk::new_zeroed(512, 2880).with_media_type(MediaType::FDD);
        let r = FormatRequest {
            fake_mbr: true,
            ..request()
        };
        assert!(matches!(format(&mut disk, &r), Err(Error::Configuration(_))));
        assert!(disk.write_log().is_empty());

        let mut disk = RamDisk::new_zeroed(512, 16);
        assert!(matches!(format(&mut disk, &request()), Err(Error::Geometry(_))));
        assert!(disk.write_log().is_empty());
    }

    #[test]
    fn test_format_fat16() {
        crate::tests_init();

        let mut disk = RamDisk::new_zeroed(512, 131072);
        let report = format(&mut disk, &request()).unwrap();

        let layout = report.layout;
        assert_eq!(layout.fat_width, FatWidth::Fat16);
        assert!(layout.cluster_count >= 4087 && layout.cluster_count <= 65524);
        assert_eq!(report.root_cluster, None);
        assert_eq!(report.backup_boot_sector, None);
        assert_eq!(report.free_clusters, layout.cluster_count);

        let bs = BootSector::decode(disk.sector(0)).unwrap();
        assert_eq!(bs.total_sectors(), 131072);
        assert_eq!(bs.volume_id, 0x0BAD_F00D);
        assert_eq!(bs.drive_number, 0x80);
        assert_eq!(bs.media, 0xF8);
        assert_eq!((bs.heads, bs.sectors_per_track), (64, 32));
        assert_eq!(&bs.label, b"FATFMT     ");
        assert_eq!(bs.mbr, None);

        let root = layout.root_dir_start(0);
        assert_eq!(&disk.sector(root)[..11], b"FATFMT     ");
        assert_eq!(disk.sector(root)[11], 0x08);

        let fs = mount(disk);
        assert_eq!(fs.fat_type(), fatfs::FatType::Fat16);
        assert_eq!(fs.volume_id(), 0x0BAD_F00D);
        assert_eq!(fs.volume_label().trim_end(), "FATFMT");
        let stats = fs.stats().unwrap();
        assert_eq!(stats.total_clusters(), layout.cluster_count);
        assert_eq!(stats.free_clusters(), report.free_clusters);
    }

    #[test]
    fn test_format_floppy() {
        crate::tests_init();

        let mut disk = RamDisk::new_zeroed(512, 2880).with_media_type(MediaType::FDD);
        let r = FormatRequest {
            bad_block_list: Some("100\n".to_owned()),
            ..request()
        };
        let report = format(&mut disk, &r).unwrap();

        let layout = report.layout;
        assert_eq!(layout.fat_width, FatWidth::Fat12);
        assert_eq!(layout.root_dir_entries, 224);
        assert_eq!(layout.cluster_count, 2847);
        assert_eq!(layout.data_start_sector, 33);
        assert_eq!(report.bad_clusters, 2);
        assert_eq!(report.free_clusters, 2845);

        let bs = BootSector::decode(disk.sector(0)).unwrap();
        assert_eq!(bs.media, 0xF0);
        assert_eq!(bs.drive_number, 0x00);
        assert_eq!((bs.heads, bs.sectors_per_track), (2, 18));

        let fat = &disk.as_slice()[512..512 * (1 + layout.fat_length_sectors as usize)];
        let table = FatTable::from_bytes(FatWidth::Fat12, layout.entry_count(), fat).unwrap();
        assert_eq!(table.read(0).unwrap(), 0xFF0);
        assert!(table.is_bad(169));
        assert!(table.is_bad(170));
        assert_eq!(table.bad_cluster_count(), 2);

        let fs = mount(disk);
        assert_eq!(fs.fat_type(), fatfs::FatType::Fat12);
        let stats = fs.stats().unwrap();
        assert_eq!(stats.total_clusters(), 2847);
        assert_eq!(stats.free_clusters(), 2845);
    }

    #[test]
    fn test_list_out_of_range() {
        crate::tests_init();

        let mut disk = RamDisk::new_zeroed(512, 2880);
        let r = FormatRequest {
            bad_block_list: Some("1000\n0\n".to_owned()),
            ..request()
        };

        assert!(matches!(
            format(&mut disk, &r),
            Err(Error::List(ListError::OutOfRange { block: 0 }))
        ));
        assert!(disk.write_log().is_empty());
    }

    #[test]
    fn test_scan_marks_clusters() {
        crate::tests_init();

        let mut disk = RamDisk::new_zeroed(512, 2880);
        disk.mark_unreadable(1000);
        let r = FormatRequest {
            check_bad_blocks: true,
            ..request()
        };
        let report = format(&mut disk, &r).unwrap();

        assert_eq!(report.layout.data_start_sector, 51);
        assert_eq!(report.bad_clusters, 2);

        let fat = &disk.as_slice()[512..512 * 10];
        let entries = report.layout.entry_count();
        let table = FatTable::from_bytes(FatWidth::Fat12, entries, fat).unwrap();
        assert!(table.is_bad(951));
        assert!(table.is_bad(952));
        assert!(!table.is_bad(953));
    }

    #[test]
    fn test_format_fat32() {
        crate::tests_init();

        let mut disk = RamDisk::new_zeroed(512, 70000);
        let report = format(&mut disk, &fat32_request()).unwrap();

        let layout = report.layout;
        assert_eq!(layout.fat_width, FatWidth::Fat32);
        assert_eq!(layout.reserved_sectors, 32);
        assert_eq!(layout.root_dir_entries, 0);
        assert_eq!(report.root_cluster, Some(2));
        assert_eq!(report.backup_boot_sector, Some(6));
        assert_eq!(report.free_clusters, layout.cluster_count - 1);

        let info = FsInfo::decode(disk.sector(1)).unwrap();
        assert_eq!(info.free_clusters, layout.cluster_count - 1);
        assert_eq!(info.next_free, 3);
        assert_eq!(disk.sector(0), disk.sector(6));

        let fs = mount(disk);
        assert_eq!(fs.fat_type(), fatfs::FatType::Fat32);
        assert_eq!(fs.volume_id(), 0x0BAD_F00D);
        let stats = fs.stats().unwrap();
        assert_eq!(stats.total_clusters(), layout.cluster_count);
        assert_eq!(stats.free_clusters(), layout.cluster_count - 1);
    }

    #[test]
    fn test_backup_boot_sector_request() {
        crate::tests_init();

        let mut disk = RamDisk::new_zeroed(512, 70000);
        let r = FormatRequest {
            backup_boot_sector: Some(40),
            ..fat32_request()
        };
        assert!(matches!(format(&mut disk, &r), Err(Error::Configuration(_))));
        assert!(disk.write_log().is_empty());

        let r = FormatRequest {
            backup_boot_sector: Some(10),
            ..fat32_request()
        };
        let report = format(&mut disk, &r).unwrap();
        assert_eq!(report.backup_boot_sector, Some(10));
        assert_eq!(disk.sector(0), disk.sector(10));
        assert_eq!(disk.sector(1), disk.sector(11));

        let mut disk = RamDisk::new_zeroed(512, 70000);
        let r = FormatRequest {
            reserved_sectors: Some(2),
            ..fat32_request()
        };
        let report = format(&mut disk, &r).unwrap();
        assert_eq!(report.backup_boot_sector, None);
        let bs = BootSector::decode(disk.sector(0)).unwrap();
        assert_eq!(bs.fat32.unwrap().backup_boot_sector, 0);
    }

    #[test]
    fn test_fake_mbr() {
        crate::tests_init();

        let mut disk = RamDisk::new_zeroed(512, 131072);
        let r = FormatRequest {
            fake_mbr: true,
            ..request()
        };
        format(&mut disk, &r).unwrap();

        let sector = disk.sector(0);
        assert_eq!(&sector[0x1B8..0x1BC], &0x0BAD_F00Du32.to_le_bytes());
        assert_eq!(sector[0x1BE], 0x80);
        assert_eq!(sector[0x1BE + 4], 0x06);
        assert_eq!(&sector[0x1BE + 8..0x1BE + 12], &[0, 0, 0, 0]);
        assert_eq!(&sector[0x1BE + 12..0x1BE + 16], &131072u32.to_le_bytes());
        assert_eq!(&sector[510..], &[0x55, 0xAA]);

        let bs = BootSector::decode(sector).unwrap();
        let mbr = bs.mbr.unwrap();
        assert_eq!(mbr.disk_signature, 0x0BAD_F00D);
        assert_eq!(mbr.partition.num_sectors, 131072);
    }

    #[test]
    fn test_bad_root_cluster() {
        crate::tests_init();

        let geometry = DeviceGeometry::new(512, 70000);
        let request = fat32_request();
        let layout = compute_layout(&geometry, &request.layout_options(None)).unwrap();
        let volume = VolumeInfo {
            label: VolumeLabel::default(),
            volume_id: 1,
            drive_number: 0x80,
            media: 0xF8,
            created: created(),
        };
        let boot_sector = BootSector::new(&layout, &geometry, &volume, 6);
        let mut new_volume = NewVolume::new(layout, boot_sector, &volume).unwrap();
        let initial_free = new_volume.fs_info().unwrap().free_clusters;

        let start = layout.data_start_sector;
        let sectors: BTreeSet<u64> = vec![start, start + 1].into_iter().collect();
        assert_eq!(new_volume.process_bad_clusters(&sectors).unwrap(), 2);

        let width = FatWidth::Fat32;
        assert_eq!(new_volume.boot_sector().root_cluster(), Some(4));
        assert_eq!(new_volume.table().read(4).unwrap(), width.eof_marker());
        assert!(new_volume.table().is_bad(2));
        assert!(new_volume.table().is_bad(3));

        let info = new_volume.fs_info().unwrap();
        assert_eq!(info.free_clusters, initial_free - 2);
        assert_eq!(info.next_free, 5);

        // marking the same sectors again changes nothing
        assert_eq!(new_volume.process_bad_clusters(&sectors).unwrap(), 0);
        assert_eq!(new_volume.fs_info().unwrap().free_clusters, initial_free - 2);
    }

    #[test]
    fn test_no_room_for_root_cluster() {
        crate::tests_init();

        let geometry = DeviceGeometry::new(512, 70000);
        let layout = compute_layout(&geometry, &fat32_request().layout_options(None)).unwrap();
        let volume = VolumeInfo {
            label: VolumeLabel::default(),
            volume_id: 1,
            drive_number: 0x80,
            media: 0xF8,
            created: created(),
        };
        let boot_sector = BootSector::new(&layout, &geometry, &volume, 6);
        let mut new_volume = NewVolume::new(layout, boot_sector, &volume).unwrap();
        let before = *new_volume.fs_info().unwrap();

        let sectors: BTreeSet<u64> = (layout.data_start_sector..layout.data_end_sector()).collect();
        assert!(matches!(
            new_volume.process_bad_clusters(&sectors),
            Err(Error::Defect(DefectError::NoRootCluster(2)))
        ));

        assert_eq!(new_volume.table().bad_cluster_count(), 0);
        assert_eq!(new_volume.boot_sector().root_cluster(), Some(2));
        assert_eq!(*new_volume.fs_info().unwrap(), before);
    }

    #[test]
    fn test_volume_id() {
        crate::tests_init();

        let t = NaiveDate::from_ymd_opt(1970, 1, 1)
            .unwrap()
            .and_hms_micro_opt(0, 0, 1, 5)
            .unwrap()
            .and_utc();
        assert_eq!(volume_id(&t), (1 << 20) | 5);

        let local = t.with_timezone(&Local);
        assert_eq!(volume_id(&local), volume_id(&t));
    }

    #[test]
    fn test_report_display() {
        crate::tests_init();

        let mut disk = RamDisk::new_zeroed(512, 2880);
        let report = format(&mut disk, &request()).unwrap();
        let text = report.to_string();

        assert!(text.starts_with("FAT type              : FAT12"));
        assert!(text.contains("Volume ID             : 0BADF00D"));
        assert!(text.contains("Label                 : FATFMT"));
        assert!(!text.contains("Root cluster"));
    }
}

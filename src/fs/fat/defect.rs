use super::geometry::FatLayout;
use crate::disk::BlockDevice;
use crate::utils::div_ceil;
use crate::Result;
use std::cmp::{max, min};
use std::collections::BTreeSet;
use std::result;
use thiserror::Error;

/// Unit of bad block lists and of the surface scan retries.
pub const BLOCK_SIZE: u64 = 1024;
const BATCH_SIZE: u64 = 16 * 1024;

#[derive(Debug, Error, Eq, PartialEq)]
pub enum DefectError {
    #[error("bad block at sector {0} lies before the data area")]
    BadBlocksBeforeData(u64),
    #[error("root cluster {0} is bad and no free cluster is left to move it to")]
    NoRootCluster(u32),
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ListError {
    #[error("line {line}: \"{text}\" is not a block number")]
    ParseError { line: usize, text: String },
    #[error("block {block} is outside of the data area")]
    OutOfRange { block: u64 },
}

/// Sectors covered by 1 KiB block `block`.
fn block_sectors(block: u64, sector_size: u32) -> (u64, u64) {
    let ss = sector_size as u64;
    let start = block * BLOCK_SIZE / ss;
    let end = div_ceil((block + 1) * BLOCK_SIZE, ss);
    (start, end)
}

/// Parses a bad block list, one block number per line. Surrounding
/// whitespace is allowed and blank lines are skipped.
pub fn parse_list(text: &str) -> result::Result<Vec<u64>, ListError> {
    let mut blocks = Vec::new();

    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let block = line.parse::<u64>().map_err(|_| ListError::ParseError {
            line: n + 1,
            text: line.to_owned(),
        })?;
        blocks.push(block);
    }

    Ok(blocks)
}

/// Converts listed blocks to sectors. Nothing is returned unless every block
/// lies between the start of the data area and the end of the volume.
pub fn list_sectors(
    blocks: &[u64],
    layout: &FatLayout,
) -> result::Result<BTreeSet<u64>, ListError> {
    let limit = layout.total_usable_sectors * layout.sector_size as u64 / BLOCK_SIZE;
    let mut sectors = BTreeSet::new();

    for block in blocks.iter().copied() {
        if block >= limit {
            return Err(ListError::OutOfRange { block });
        }
        let (start, end) = block_sectors(block, layout.sector_size);
        if start < layout.data_start_sector {
            return Err(ListError::OutOfRange { block });
        }
        sectors.extend(start..end);
    }

    debug!("{} blocks listed bad, {} sectors", blocks.len(), sectors.len());
    Ok(sectors)
}

/// Parses and range checks a bad block list in one go.
pub fn mark_from_list(text: &str, layout: &FatLayout) -> result::Result<BTreeSet<u64>, ListError> {
    list_sectors(&parse_list(text)?, layout)
}

/// Reads the volume up to its last cluster and returns every sector of each
/// unreadable block.
///
/// The device is read in 16 KiB batches. A failed batch is read again block
/// by block and only the blocks that fail a second time are reported.
pub fn scan(device: &mut dyn BlockDevice, layout: &FatLayout) -> Result<BTreeSet<u64>> {
    let ss = layout.sector_size as u64;
    let block_sectors = max(1, BLOCK_SIZE / ss);
    let batch_sectors = max(block_sectors, BATCH_SIZE / ss);
    let end = layout.data_end_sector();

    let mut buf = vec![0u8; (batch_sectors * ss) as usize];
    let mut bad = BTreeSet::new();
    let mut bad_blocks = 0u64;
    let mut lba = 0;

    info!("searching for bad blocks in {} sectors", end);
    while lba < end {
        let count = min(batch_sectors, end - lba);
        match device.read_blocks(lba, &mut buf[..(count * ss) as usize]) {
            Ok(()) => {
                lba += count;
                continue;
            }
            Err(e) => debug!("reading {} sectors at {} failed: {}", count, lba, e),
        }

        let batch_end = lba + count;
        while lba < batch_end {
            let n = min(block_sectors, batch_end - lba);
            if let Err(e) = device.read_blocks(lba, &mut buf[..(n * ss) as usize]) {
                warn!("bad block at sector {}: {}", lba, e);
                if lba < layout.data_start_sector {
                    return Err(DefectError::BadBlocksBeforeData(lba).into());
                }
                bad.extend(lba..lba + n);
                bad_blocks += 1;
            }
            lba += n;
        }
    }

    match bad_blocks {
        0 => info!("no bad blocks found"),
        1 => info!("1 bad block found"),
        x => info!("{} bad blocks found", x),
    }
    Ok(bad)
}

/// Clusters containing any of `sectors`. Sectors outside of the cluster
/// area are skipped.
pub fn bad_clusters(layout: &FatLayout, sectors: &BTreeSet<u64>) -> BTreeSet<u32> {
    sectors
        .iter()
        .filter_map(|x| layout.sector_to_cluster(*x))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::ram::RamDisk;
    use crate::fs::fat::geometry::{compute_layout, DeviceGeometry, LayoutOptions};
    use crate::Error;

    fn layout(sector_size: u32, sectors: u64) -> FatLayout {
        compute_layout(
            &DeviceGeometry::new(sector_size, sectors),
            &LayoutOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_list() {
        crate::tests_init();

        assert_eq!(parse_list("100\n  200  \n\n300\r\n").unwrap(), vec![100, 200, 300]);
        assert_eq!(parse_list("").unwrap(), Vec::<u64>::new());

        macro_rules! invalid {
            ($text:expr, $line:expr, $bad:expr) => {{
                assert_eq!(
                    parse_list($text),
                    Err(ListError::ParseError {
                        line: $line,
                        text: $bad.to_owned()
                    })
                );
            }};
        }

        invalid!("12\n34x\n", 2, "34x");
        invalid!("abc", 1, "abc");
        invalid!("1\n\n-5", 3, "-5");
        invalid!("7 8", 1, "7 8");
    }

    #[test]
    fn test_list_range() {
        crate::tests_init();

        // FAT12, data area starts at sector 51
        let layout = layout(512, 2880);
        assert_eq!(layout.data_start_sector, 51);

        assert_eq!(
            mark_from_list("25\n", &layout),
            Err(ListError::OutOfRange { block: 25 })
        );
        assert_eq!(
            mark_from_list("1440\n", &layout),
            Err(ListError::OutOfRange { block: 1440 })
        );
        assert_eq!(
            mark_from_list(&format!("{}\n", u64::MAX), &layout),
            Err(ListError::OutOfRange { block: u64::MAX })
        );
        // one bad entry rejects the whole list
        assert!(mark_from_list("100\n10\n", &layout).is_err());

        let sectors = mark_from_list("26\n1439\n", &layout).unwrap();
        assert_eq!(sectors.into_iter().collect::<Vec<_>>(), vec![52, 53, 2878, 2879]);
    }

    #[test]
    fn test_list_large_sectors() {
        crate::tests_init();

        let layout = layout(4096, 262144);
        let first = layout.data_start_sector * 4;

        let sectors = mark_from_list(&format!("{}\n{}\n", first, first + 3), &layout).unwrap();
        assert_eq!(sectors.len(), 1);
        assert!(sectors.contains(&layout.data_start_sector));
    }

    #[test]
    fn test_bad_clusters() {
        crate::tests_init();

        let layout = layout(512, 131072);
        let cs = layout.cluster_sectors as u64;
        let start = layout.data_start_sector;

        let end = layout.data_end_sector();
        let sectors: BTreeSet<u64> = vec![start, start + 1, start + cs * 10, end]
            .into_iter()
            .collect();
        let clusters = bad_clusters(&layout, &sectors);
        assert_eq!(clusters.into_iter().collect::<Vec<_>>(), vec![2, 12]);
    }

    #[test]
    fn test_scan() {
        crate::tests_init();

        let layout = layout(512, 2880);
        let mut disk = RamDisk::new_zeroed(512, 2880);
        assert!(scan(&mut disk, &layout).unwrap().is_empty());

        disk.mark_unreadable(100);
        disk.mark_unreadable(2000);
        let bad = scan(&mut disk, &layout).unwrap();
        assert_eq!(bad.into_iter().collect::<Vec<_>>(), vec![100, 101, 2000, 2001]);

        let clusters = bad_clusters(&layout, &scan(&mut disk, &layout).unwrap());
        assert_eq!(clusters.len(), 4);
    }

    #[test]
    fn test_scan_ignores_tail() {
        crate::tests_init();

        let mut layout = layout(512, 2880);
        layout.cluster_count -= 10;
        let mut disk = RamDisk::new_zeroed(512, 2880);
        disk.mark_unreadable(2875);
        assert!(scan(&mut disk, &layout).unwrap().is_empty());
    }

    #[test]
    fn test_scan_before_data() {
        crate::tests_init();

        let layout = layout(512, 2880);
        let mut disk = RamDisk::new_zeroed(512, 2880);
        disk.mark_unreadable(5);

        assert!(matches!(
            scan(&mut disk, &layout),
            Err(Error::Defect(DefectError::BadBlocksBeforeData(4)))
        ));
    }
}

//! Data disk LUN bookkeeping.

use std::collections::HashSet;

use crate::error::{CpiError, Result};
use crate::types::DataDisk;

/// Highest LUN handed out. Data disks occupy `/dev/sdc` through `/dev/sdx`;
/// `sda` and `sdb` are the OS and resource disks.
pub const MAX_LUN: u32 = 21;

/// Lowest LUN in `0..=MAX_LUN` that no attached disk occupies.
///
/// Disks attached in order on a fresh VM get 0, 1, 2, ...; a LUN freed by a
/// detach is handed out again before higher ones. The result is only free
/// while attach/detach calls for the VM are serialized, which the manager
/// guarantees with a per-instance lock.
pub fn next_lun(current_disks: &[DataDisk]) -> Result<u32> {
    let used = current_disks
        .iter()
        .map(lun_of)
        .collect::<Result<HashSet<u32>>>()?;

    (0..=MAX_LUN).find(|lun| !used.contains(lun)).ok_or_else(|| {
        CpiError::invalid_lun(format!("all {} data disk slots are in use", MAX_LUN + 1))
    })
}

/// LUN of an attached disk. The provider leaves the field empty for LUN 0.
pub fn lun_of(disk: &DataDisk) -> Result<u32> {
    let lun = disk.lun.trim();
    if lun.is_empty() {
        return Ok(0);
    }

    lun.parse().map_err(|_| {
        CpiError::invalid_lun(format!("disk {} reports LUN '{}'", disk.name, disk.lun))
    })
}

/// Guest device path for a LUN: `/dev/sdc` for LUN 0, `/dev/sdd` for LUN 1, ...
pub fn device_path(lun: u32) -> Result<String> {
    if lun > MAX_LUN {
        return Err(CpiError::invalid_lun(format!(
            "{} has no device name (maximum is {})",
            lun, MAX_LUN
        )));
    }

    Ok(format!("/dev/sd{}", (b'c' + lun as u8) as char))
}

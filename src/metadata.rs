// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Reading and writing the per-PV metadata region.
//!
//! Each PV of a VG carries a complete copy of the VG's metadata: the PV
//! record at offset zero, then the VG record, the PV uuid list, the LV
//! table and the PE map at the offsets the PV record declares. The reader
//! materializes one `PvView` per device; the writer serializes a view back
//! section by section, preserving the declared layout byte for byte.

use log::{debug, error, info, trace};

use crate::device::Device;
use crate::disk::{LvDisk, PeDisk, PvDisk, VgDisk, NAME_LEN, PV_ID, SECTOR_SIZE};
use crate::util::{align_to, copy_name, make_uuid};
use crate::{Error, Result};

// Region layout for freshly initialized PVs: fixed reservations for the
// PV and VG records, then uuid-list and LV-table regions sized by the
// slot maximums, then the PE map running up to the first data extent.
const PV_RESERVED: u32 = 1024;
const VG_RESERVED: u32 = 1024;
const DEFAULT_PV_MAX: u32 = 32;
const DEFAULT_LV_MAX: u32 = 64;
/// Sectors per extent on a fresh PV (4 MiB).
const DEFAULT_PE_SIZE: u32 = 8192;

/// One device's view of its VG: the PV record plus the VG record, uuid
/// list, LV table and PE map read from that device.
///
/// The view owns every allocation made while reading, so discarding it on
/// a failed or rejected parse frees everything at once. An orphan PV (one
/// with an empty `vg_name`) carries only the PV record; the remaining
/// collections stay empty.
#[derive(Debug)]
pub struct PvView {
    pub dev: Device,
    pub pvd: PvDisk,
    pub vgd: VgDisk,
    pub uuids: Vec<[u8; NAME_LEN]>,
    pub lvds: Vec<LvDisk>,
    pub extents: Vec<PeDisk>,
}

fn read_pvd(dev: &Device) -> Result<PvDisk> {
    let mut buf = [0u8; PvDisk::SIZE];
    dev.read_at(0, &mut buf)?;
    PvDisk::from_buf(&buf)
}

fn read_vgd(dev: &Device, pvd: &PvDisk) -> Result<VgDisk> {
    let mut buf = [0u8; VgDisk::SIZE];
    dev.read_at(pvd.vg_on_disk.base as u64, &mut buf)?;
    VgDisk::from_buf(&buf)
}

fn read_uuids(dev: &Device, pvd: &PvDisk, vgd: &VgDisk) -> Result<Vec<[u8; NAME_LEN]>> {
    let mut uuids = Vec::new();
    let mut pos = pvd.pv_uuidlist_on_disk.base as u64;
    let end = pos + pvd.pv_uuidlist_on_disk.size as u64;

    while pos < end && uuids.len() < vgd.pv_cur as usize {
        let mut buf = [0u8; NAME_LEN];
        dev.read_at(pos, &mut buf)?;
        uuids.push(buf);
        pos += NAME_LEN as u64;
    }

    Ok(uuids)
}

fn read_lvds(dev: &Device, pvd: &PvDisk, vgd: &VgDisk) -> Result<Vec<LvDisk>> {
    let mut lvds = Vec::new();

    for i in 0..vgd.lv_max as u64 {
        if lvds.len() >= vgd.lv_cur as usize {
            break;
        }

        let pos = pvd.lv_on_disk.base as u64 + i * LvDisk::SIZE as u64;
        let mut buf = [0u8; LvDisk::SIZE];
        dev.read_at(pos, &mut buf)?;

        let lvd = LvDisk::from_buf(&buf)?;
        if lvd.is_live() {
            lvds.push(lvd);
        }
    }

    Ok(lvds)
}

fn read_extents(dev: &Device, pvd: &PvDisk) -> Result<Vec<PeDisk>> {
    let len = pvd.pe_total as usize * PeDisk::SIZE;
    let mut buf = vec![0u8; len];
    dev.read_at(pvd.pe_on_disk.base as u64, &mut buf)?;
    PeDisk::map_from_buf(&buf, pvd.pe_total as usize)
}

/// Read one device's metadata and materialize its `PvView`.
///
/// Devices that do not carry a valid PV identifier, or that belong to a
/// different VG than `vg_name`, are rejected quietly; I/O failures are
/// logged loudly. Either way the caller gets `None` and the device handle
/// is dropped. The reader never writes.
pub fn read_disk(dev: Device, vg_name: Option<&str>) -> Option<PvView> {
    let name = dev.name().to_owned();

    let mut pvd = match read_pvd(&dev) {
        Ok(pvd) => pvd,
        Err(e) => {
            debug!("Failed to read PV data from {}: {}", name, e);
            return None;
        }
    };

    if pvd.id != PV_ID {
        trace!("{} does not have a valid PV identifier", name);
        return None;
    }

    if let Err(e) = pvd.normalize_format() {
        trace!("{} found on {}", e, name);
        return None;
    }

    if pvd.is_orphan() {
        trace!("{} is not a member of any VG", name);
        if vg_name.is_some() {
            return None;
        }
        return Some(PvView {
            dev,
            pvd,
            vgd: VgDisk::default(),
            uuids: Vec::new(),
            lvds: Vec::new(),
            extents: Vec::new(),
        });
    }

    if let Some(wanted) = vg_name {
        if pvd.vg_name_str() != wanted {
            trace!("{} is not a member of the VG {}", name, wanted);
            return None;
        }
    }

    let vgd = match read_vgd(&dev, &pvd) {
        Ok(vgd) => vgd,
        Err(e) => {
            error!("Failed to read VG data from PV ({}): {}", name, e);
            return None;
        }
    };

    let uuids = match read_uuids(&dev, &pvd, &vgd) {
        Ok(uuids) => uuids,
        Err(e) => {
            error!("Failed to read PV uuid list from {}: {}", name, e);
            return None;
        }
    };

    let lvds = match read_lvds(&dev, &pvd, &vgd) {
        Ok(lvds) => lvds,
        Err(e) => {
            error!("Failed to read LVs from {}: {}", name, e);
            return None;
        }
    };

    let extents = match read_extents(&dev, &pvd) {
        Ok(extents) => extents,
        Err(e) => {
            error!("Failed to read extents from {}: {}", name, e);
            return None;
        }
    };

    trace!("Found {} in VG {}", name, pvd.vg_name_str());

    Some(PvView {
        dev,
        pvd,
        vgd,
        uuids,
        lvds,
        extents,
    })
}

/// Collect the views of every device belonging to `vg_name`.
///
/// A pure collector: devices that fail to parse or belong elsewhere are
/// skipped, nothing is deduplicated or repaired. An empty result means the
/// VG does not exist on the scanned devices.
pub fn read_pvs_in_vg<I>(vg_name: &str, devs: I) -> Result<Vec<PvView>>
where
    I: IntoIterator<Item = Device>,
{
    let mut views = Vec::new();

    for dev in devs {
        if let Some(view) = read_disk(dev, Some(vg_name)) {
            views.push(view);
        }
    }

    if views.is_empty() {
        return Err(Error::Metadata(format!(
            "volume group \"{}\" not found",
            vg_name
        )));
    }

    Ok(views)
}

fn write_pvd(view: &PvView) -> Result<()> {
    let mut buf = [0u8; PvDisk::SIZE];
    view.pvd.write_buf(&mut buf)?;
    view.dev.write_at(0, &buf)
}

fn write_vgd(view: &PvView) -> Result<()> {
    let mut buf = [0u8; VgDisk::SIZE];
    view.vgd.write_buf(&mut buf)?;
    view.dev.write_at(view.pvd.vg_on_disk.base as u64, &buf)
}

fn write_uuids(view: &PvView) -> Result<()> {
    let mut pos = view.pvd.pv_uuidlist_on_disk.base as u64;
    let end = pos + view.pvd.pv_uuidlist_on_disk.size as u64;

    for uuid in &view.uuids {
        if pos >= end {
            error!("Too many uuids to fit on {}", view.dev.name());
            return Err(Error::Metadata(format!(
                "uuid list overflows its region on {}",
                view.dev.name()
            )));
        }

        view.dev.write_at(pos, uuid)?;
        pos += NAME_LEN as u64;
    }

    Ok(())
}

fn write_lvs(view: &PvView) -> Result<()> {
    let mut pos = view.pvd.lv_on_disk.base as u64;

    // The whole table is zeroed first so dead slots read back empty; live
    // slots are then written packed from the start of the region.
    if let Err(e) = view
        .dev
        .zero(pos, view.pvd.lv_on_disk.size as u64)
    {
        error!("couldn't zero lv area on device '{}'", view.dev.name());
        return Err(e);
    }

    for lvd in &view.lvds {
        let mut buf = [0u8; LvDisk::SIZE];
        lvd.write_buf(&mut buf)?;
        view.dev.write_at(pos, &buf)?;
        pos += LvDisk::SIZE as u64;
    }

    Ok(())
}

fn write_extents(view: &PvView) -> Result<()> {
    let mut buf = vec![0u8; view.extents.len() * PeDisk::SIZE];
    PeDisk::map_write_buf(&view.extents, &mut buf)?;
    view.dev.write_at(view.pvd.pe_on_disk.base as u64, &buf)
}

/// Serialize a view back to its device: PV record, then (unless the PV is
/// an orphan) VG record, uuid list, LV table and PE map.
///
/// The sections are written in order with nothing flushed in between; the
/// format is not transactional, and a crash mid-sequence leaves an
/// inconsistent image that callers recover from only by rewriting every PV
/// of the VG.
pub fn write_all_pvd(view: &PvView) -> Result<()> {
    let pv_name = view.dev.name();

    if let Err(e) = write_pvd(view) {
        error!("Failed to write PV structure onto {}", pv_name);
        return Err(e);
    }

    // Stop here for orphan pv's.
    if view.pvd.is_orphan() {
        return Ok(());
    }

    if let Err(e) = write_vgd(view) {
        error!("Failed to write VG data to {}", pv_name);
        return Err(e);
    }

    if let Err(e) = write_uuids(view) {
        error!("Failed to write PV uuid list to {}", pv_name);
        return Err(e);
    }

    if let Err(e) = write_lvs(view) {
        error!("Failed to write LV's to {}", pv_name);
        return Err(e);
    }

    if let Err(e) = write_extents(view) {
        error!("Failed to write extents to {}", pv_name);
        return Err(e);
    }

    Ok(())
}

/// Write all the given pv's to disk. Does very little sanity checking, so
/// the caller must have normalized the VG and PE metadata across the views
/// beforehand.
pub fn write_pvds(views: &[PvView]) -> Result<()> {
    for view in views {
        write_all_pvd(view)?;
        debug!("Successfully wrote data to {}", view.dev.name());
    }

    Ok(())
}

/// Lay out and write a fresh orphan PV on `dev`.
///
/// The metadata regions are placed back to back from offset zero, the
/// first data extent is aligned to the extent size, and only the PV
/// record itself is written; the VG sections appear once the PV joins a
/// VG. The record format addresses sectors with 32 bits, so devices past
/// that limit are refused rather than truncated.
pub fn initialize_pv(dev: Device) -> Result<PvView> {
    use crate::disk::DiskLocn;

    let sectors = dev.size_bytes()? / SECTOR_SIZE as u64;
    if sectors > u32::MAX as u64 {
        return Err(Error::Metadata(format!(
            "{} is too large for this metadata format",
            dev.name()
        )));
    }
    let dev_sectors = sectors as u32;

    let vg_base = PV_RESERVED;
    let uuid_base = vg_base + VG_RESERVED;
    let uuid_size = DEFAULT_PV_MAX * NAME_LEN as u32;
    let lv_base = uuid_base + uuid_size;
    let lv_size = DEFAULT_LV_MAX * LvDisk::SIZE as u32;
    let pe_base = lv_base + lv_size;

    // size the map for every extent the device could hold, then align
    // the first data extent up
    let max_extents = dev_sectors / DEFAULT_PE_SIZE;
    let map_end = pe_base + max_extents * PeDisk::SIZE as u32;
    let map_sectors = (map_end + SECTOR_SIZE - 1) / SECTOR_SIZE;
    let pe_start = align_to(map_sectors as usize, DEFAULT_PE_SIZE as usize) as u32;

    if dev_sectors < pe_start + DEFAULT_PE_SIZE {
        return Err(Error::Metadata(format!("{} is too small", dev.name())));
    }
    let pe_total = (dev_sectors - pe_start) / DEFAULT_PE_SIZE;

    let mut pvd = PvDisk {
        pv_on_disk: DiskLocn { base: 0, size: PV_RESERVED },
        vg_on_disk: DiskLocn { base: vg_base, size: VG_RESERVED },
        pv_uuidlist_on_disk: DiskLocn { base: uuid_base, size: uuid_size },
        lv_on_disk: DiskLocn { base: lv_base, size: lv_size },
        pe_on_disk: DiskLocn {
            base: pe_base,
            size: pe_start * SECTOR_SIZE - pe_base,
        },
        pv_allocatable: 1,
        pv_size: dev_sectors,
        pe_size: DEFAULT_PE_SIZE,
        pe_total,
        pe_start,
        ..PvDisk::default()
    };
    copy_name(&mut pvd.pv_uuid, &make_uuid())?;

    let view = PvView {
        dev,
        pvd,
        vgd: VgDisk::default(),
        uuids: Vec::new(),
        lvds: Vec::new(),
        extents: Vec::new(),
    };
    write_all_pvd(&view)?;

    info!(
        "Initialized PV {} with {} extents of {} sectors",
        view.dev.name(),
        pe_total,
        DEFAULT_PE_SIZE
    );
    Ok(view)
}

/// Rename the VG the given views belong to, in core only; follow with
/// `write_pvds` to persist. The VG name recurs in every live LV record,
/// so each one is rewritten as well.
pub fn rename_vg(views: &mut [PvView], new_name: &str) -> Result<()> {
    for view in views.iter_mut() {
        copy_name(&mut view.pvd.vg_name, new_name)?;

        for lvd in view.lvds.iter_mut() {
            copy_name(&mut lvd.vg_name, new_name)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskLocn;
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;

    const IMG_LEN: usize = 8192;

    fn image_path(dir: &Path, fill: u8) -> std::path::PathBuf {
        let path = dir.join("pv0");
        let mut f = File::create(&path).unwrap();
        f.write_all(&vec![fill; IMG_LEN]).unwrap();
        path
    }

    // A 16-extent PV of VG "vg0" laid out in the first 8 KiB of the
    // device: pv record at 0, vg at 512, uuid list at 1024 (256 bytes,
    // two slots), lv table at 2048 (8 slots), pe map at 8128.
    fn sample_view(dev: Device, live_lvs: u32) -> PvView {
        let mut pvd = PvDisk {
            pv_on_disk: DiskLocn { base: 0, size: PvDisk::SIZE as u32 },
            vg_on_disk: DiskLocn { base: 512, size: VgDisk::SIZE as u32 },
            pv_uuidlist_on_disk: DiskLocn { base: 1024, size: 256 },
            lv_on_disk: DiskLocn { base: 2048, size: 8 * LvDisk::SIZE as u32 },
            pe_on_disk: DiskLocn { base: 8128, size: 64 },
            pv_number: 1,
            pv_size: 40960,
            lv_cur: live_lvs,
            pe_size: 8192,
            pe_total: 16,
            pe_allocated: live_lvs * 2,
            pe_start: 16,
            ..PvDisk::default()
        };
        copy_name(&mut pvd.pv_uuid, "fpJ7sO2XI279085kXmLktQC0sLycYIG2").unwrap();
        copy_name(&mut pvd.vg_name, "vg0").unwrap();

        let vgd = VgDisk {
            vg_number: 0,
            lv_max: 8,
            lv_cur: live_lvs,
            pv_max: 32,
            pv_cur: 2,
            pv_act: 2,
            pe_size: 8192,
            pe_total: 16,
            pe_allocated: live_lvs * 2,
            ..VgDisk::default()
        };

        let mut uuids = Vec::new();
        for n in 0..2 {
            let mut u = [0u8; NAME_LEN];
            copy_name(&mut u, &format!("uuid-{}", n)).unwrap();
            uuids.push(u);
        }

        let mut lvds = Vec::new();
        for n in 0..live_lvs {
            let mut lvd = LvDisk {
                lv_number: n,
                lv_size: 2 * 8192,
                lv_allocated_le: 2,
                ..LvDisk::default()
            };
            copy_name(&mut lvd.lv_name, &format!("lv{}", n)).unwrap();
            copy_name(&mut lvd.vg_name, "vg0").unwrap();
            lvds.push(lvd);
        }

        let mut extents = vec![PeDisk::default(); 16];
        for n in 0..live_lvs as usize {
            extents[2 * n] = PeDisk { lv_num: n as u16 + 1, le_num: 0 };
            extents[2 * n + 1] = PeDisk { lv_num: n as u16 + 1, le_num: 1 };
        }

        PvView { dev, pvd, vgd, uuids, lvds, extents }
    }

    #[test]
    fn pv_io_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        // non-zero fill so the LV-region zeroing is observable
        let path = image_path(dir.path(), 0xab);

        let view = sample_view(Device::open(&path).unwrap(), 3);
        write_all_pvd(&view).unwrap();

        // dead LV slots (3..8) must read back as zeroes
        let check = Device::open(&path).unwrap();
        let mut dead = vec![0u8; 5 * LvDisk::SIZE];
        check.read_at(2048 + 3 * LvDisk::SIZE as u64, &mut dead).unwrap();
        assert!(dead.iter().all(|&b| b == 0));

        let back = read_disk(Device::open(&path).unwrap(), None).expect("readable image");
        assert_eq!(back.pvd, view.pvd);
        assert_eq!(back.vgd, view.vgd);
        assert_eq!(back.uuids, view.uuids);
        assert_eq!(back.lvds, view.lvds);
        assert_eq!(back.extents, view.extents);
    }

    #[test]
    fn version_two_reads_like_version_one() {
        let dir = tempfile::tempdir().unwrap();

        let v1_path = image_path(dir.path(), 0);
        let v1 = sample_view(Device::open(&v1_path).unwrap(), 1);
        write_all_pvd(&v1).unwrap();

        let v2_path = {
            let path = dir.path().join("pv1");
            let mut f = File::create(&path).unwrap();
            f.write_all(&vec![0u8; IMG_LEN]).unwrap();
            path
        };
        let mut v2 = sample_view(Device::open(&v2_path).unwrap(), 1);
        v2.pvd.version = 2;
        v2.pvd.pe_on_disk.size = 0;
        write_all_pvd(&v2).unwrap();

        let a = read_disk(Device::open(&v1_path).unwrap(), None).unwrap();
        let b = read_disk(Device::open(&v2_path).unwrap(), None).unwrap();
        assert_eq!(a.pvd, b.pvd);
        assert_eq!(a.pvd.version, 1);
        assert_eq!(a.pvd.pe_on_disk.size, 64);
    }

    #[test]
    fn foreign_vg_rejected_without_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = image_path(dir.path(), 0x17);

        let view = sample_view(Device::open(&path).unwrap(), 1);
        write_all_pvd(&view).unwrap();

        let before = std::fs::read(&path).unwrap();
        assert!(read_disk(Device::open(&path).unwrap(), Some("vgB")).is_none());
        assert_eq!(std::fs::read(&path).unwrap(), before);

        assert!(read_disk(Device::open(&path).unwrap(), Some("vg0")).is_some());
    }

    #[test]
    fn bad_magic_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = image_path(dir.path(), 0x4d);

        assert!(read_disk(Device::open(&path).unwrap(), None).is_none());
    }

    #[test]
    fn orphan_reads_empty_and_fails_vg_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = image_path(dir.path(), 0);

        let mut view = sample_view(Device::open(&path).unwrap(), 0);
        view.pvd.vg_name = [0; NAME_LEN];
        view.uuids.clear();
        write_all_pvd(&view).unwrap();

        let orphan = read_disk(Device::open(&path).unwrap(), None).unwrap();
        assert!(orphan.pvd.is_orphan());
        assert!(orphan.lvds.is_empty());
        assert!(orphan.uuids.is_empty());
        assert!(orphan.extents.is_empty());

        assert!(read_disk(Device::open(&path).unwrap(), Some("vg0")).is_none());
    }

    #[test]
    fn uuid_overflow_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = image_path(dir.path(), 0);

        let mut view = sample_view(Device::open(&path).unwrap(), 1);
        view.pvd.pv_uuidlist_on_disk.size = NAME_LEN as u32;
        match write_all_pvd(&view) {
            Err(Error::Metadata(_)) => {}
            other => panic!("expected capacity error, got {:?}", other),
        }
    }

    #[test]
    fn aggregator_collects_only_members() {
        let dir = tempfile::tempdir().unwrap();

        let member = image_path(dir.path(), 0);
        write_all_pvd(&sample_view(Device::open(&member).unwrap(), 1)).unwrap();

        let stranger = dir.path().join("notapv");
        File::create(&stranger)
            .unwrap()
            .write_all(&vec![0u8; IMG_LEN])
            .unwrap();

        let devs = vec![
            Device::open(&member).unwrap(),
            Device::open(&stranger).unwrap(),
        ];
        let views = read_pvs_in_vg("vg0", devs).unwrap();
        assert_eq!(views.len(), 1);

        let devs = vec![Device::open(&member).unwrap()];
        assert!(read_pvs_in_vg("vgZ", devs).is_err());
    }

    #[test]
    fn initialize_lays_out_an_orphan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank");
        File::create(&path).unwrap().set_len(32 << 20).unwrap();

        let view = initialize_pv(Device::open(&path).unwrap()).unwrap();
        assert!(view.pvd.is_orphan());
        assert_eq!(view.pvd.pe_size, 8192);
        assert_eq!(view.pvd.pe_start, 8192);
        assert_eq!(view.pvd.pe_total, 7);
        // the reader's pe_start derivation must agree with the layout
        assert_eq!(
            (view.pvd.pe_on_disk.base + view.pvd.pe_on_disk.size) / 512,
            view.pvd.pe_start
        );

        let back = read_disk(Device::open(&path).unwrap(), None).unwrap();
        assert!(back.pvd.is_orphan());
        assert_eq!(back.pvd, view.pvd);

        let tiny = dir.path().join("tiny");
        File::create(&tiny).unwrap().set_len(1 << 20).unwrap();
        assert!(initialize_pv(Device::open(&tiny).unwrap()).is_err());
    }

    #[test]
    fn rename_rewrites_pv_and_lv_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = image_path(dir.path(), 0);

        let view = sample_view(Device::open(&path).unwrap(), 2);
        write_all_pvd(&view).unwrap();

        let mut views = read_pvs_in_vg("vg0", vec![Device::open(&path).unwrap()]).unwrap();
        rename_vg(&mut views, "vault").unwrap();
        write_pvds(&views).unwrap();

        let back = read_disk(Device::open(&path).unwrap(), Some("vault")).unwrap();
        assert_eq!(back.pvd.vg_name_str(), "vault");
        for lvd in &back.lvds {
            assert_eq!(crate::util::buf_to_string(&lvd.vg_name), "vault");
        }
    }
}

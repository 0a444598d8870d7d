// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Volume Groups

use std::collections::{BTreeMap, HashSet};

use log::debug;

use crate::disk::LvDisk;
use crate::lv::{Area, Segment, LV};
use crate::metadata::PvView;
use crate::pv::PV;
use crate::{Error, Result};

/// A Volume Group: a pool of PVs carved into LVs, all sharing one extent
/// size. The VG owns its PVs and LVs; segments refer back to PVs by index
/// into `pvs`.
#[derive(Debug)]
pub struct VG {
    /// Name.
    pub name: String,
    /// Size of each extent, in 512-byte sectors.
    pub extent_size: u64,
    /// Physical Volumes, ordered by their on-disk PV number.
    pub pvs: Vec<PV>,
    /// Logical Volumes, ordered by their on-disk LV number.
    pub lvs: Vec<LV>,
}

impl VG {
    /// Build the in-core VG from the per-PV views an aggregation pass
    /// collected.
    ///
    /// Enforces that every view names this VG with one uniform extent
    /// size, merges the redundant per-PV LV tables, and rebuilds each
    /// LV's segments from the PE maps. Holes, out-of-range extents, or
    /// conflicting LV definitions are metadata errors.
    pub fn assemble(name: &str, mut views: Vec<PvView>) -> Result<VG> {
        if views.is_empty() {
            return Err(Error::Metadata(format!(
                "volume group \"{}\" has no PVs",
                name
            )));
        }

        views.sort_by_key(|v| v.pvd.pv_number);
        let vgd = views[0].vgd;

        for view in &views {
            if view.pvd.vg_name_str() != name {
                return Err(Error::Metadata(format!(
                    "{} belongs to VG \"{}\", not \"{}\"",
                    view.dev.name(),
                    view.pvd.vg_name_str(),
                    name
                )));
            }
            if view.pvd.pe_size != vgd.pe_size {
                return Err(Error::Metadata(format!(
                    "extent size on {} ({} sectors) does not match the VG's ({})",
                    view.dev.name(),
                    view.pvd.pe_size,
                    vgd.pe_size
                )));
            }
        }

        let lvd_by_num = merge_lv_tables(&views)?;
        let mut maps = build_extent_maps(&views, &lvd_by_num)?;

        let mut lvs = Vec::with_capacity(lvd_by_num.len());
        for (num, lvd) in &lvd_by_num {
            let map = complete_map(lvd, maps.remove(num).unwrap_or_default())?;

            let segments = if lvd.lv_stripes > 1 {
                striped_segments(lvd, &map)?
            } else {
                linear_segments(&map)
            };

            debug!(
                "LV {} rebuilt with {} segment(s) over {} extent(s)",
                lvd.lv_name_str(),
                segments.len(),
                map.len()
            );

            lvs.push(LV {
                name: lvd.lv_name_str(),
                number: *num,
                access: lvd.lv_access,
                status: lvd.lv_status,
                size: lvd.lv_size as u64,
                allocated_le: lvd.lv_allocated_le,
                stripes: lvd.lv_stripes,
                stripe_size: lvd.lv_stripesize,
                read_ahead: lvd.lv_read_ahead,
                io_timeout: lvd.lv_io_timeout,
                segments,
            });
        }

        let pvs = views
            .into_iter()
            .map(|view| PV {
                number: view.pvd.pv_number,
                uuid: view.pvd.pv_uuid_str(),
                status: view.pvd.pv_status,
                allocatable: view.pvd.pv_allocatable,
                size: view.pvd.pv_size as u64,
                pe_start: view.pvd.pe_start as u64,
                pe_total: view.pvd.pe_total,
                pe_allocated: view.pvd.pe_allocated,
                dev: view.dev,
            })
            .collect();

        Ok(VG {
            name: name.to_string(),
            extent_size: vgd.pe_size as u64,
            pvs,
            lvs,
        })
    }

    /// Returns a reference to the LV matching the name.
    pub fn lv_get(&self, name: &str) -> Option<&LV> {
        self.lvs.iter().find(|lv| lv.name == name)
    }

    /// The total number of extents in the volume group.
    pub fn extents(&self) -> u64 {
        self.pvs.iter().map(|x| x.pe_total as u64).sum()
    }

    /// The total number of extents in use in the volume group.
    pub fn extents_in_use(&self) -> u64 {
        self.lvs.iter().map(|x| x.used_extents()).sum()
    }

    /// The total number of free extents in the volume group.
    pub fn extents_free(&self) -> u64 {
        self.extents() - self.extents_in_use()
    }
}

// Every PV carries a copy of the LV table; merge them by LV number and
// insist the copies agree. Live names must be unique in the VG.
fn merge_lv_tables(views: &[PvView]) -> Result<BTreeMap<u32, LvDisk>> {
    let mut lvd_by_num: BTreeMap<u32, LvDisk> = BTreeMap::new();

    for view in views {
        for lvd in &view.lvds {
            match lvd_by_num.get(&lvd.lv_number) {
                Some(existing) if existing.lv_name != lvd.lv_name => {
                    return Err(Error::Metadata(format!(
                        "conflicting names for LV number {} on {}",
                        lvd.lv_number,
                        view.dev.name()
                    )));
                }
                Some(_) => {}
                None => {
                    lvd_by_num.insert(lvd.lv_number, lvd.clone());
                }
            }
        }
    }

    let mut names = HashSet::new();
    for lvd in lvd_by_num.values() {
        if !names.insert(lvd.lv_name_str()) {
            return Err(Error::Metadata(format!(
                "duplicate LV name \"{}\"",
                lvd.lv_name_str()
            )));
        }
    }

    Ok(lvd_by_num)
}

// Walk every PV's PE map and record, per LV, which (pv, pe) backs each
// logical extent.
fn build_extent_maps(
    views: &[PvView],
    lvd_by_num: &BTreeMap<u32, LvDisk>,
) -> Result<BTreeMap<u32, Vec<Option<(usize, u32)>>>> {
    let mut maps: BTreeMap<u32, Vec<Option<(usize, u32)>>> = lvd_by_num
        .iter()
        .map(|(num, lvd)| (*num, vec![None; lvd.lv_allocated_le as usize]))
        .collect();

    for (pv_idx, view) in views.iter().enumerate() {
        for (pe, entry) in view.extents.iter().enumerate() {
            if entry.lv_num == 0 {
                continue;
            }

            let num = entry.lv_num as u32 - 1;
            let map = maps.get_mut(&num).ok_or_else(|| {
                Error::Metadata(format!(
                    "PE map on {} references unknown LV number {}",
                    view.dev.name(),
                    num
                ))
            })?;

            let le = entry.le_num as usize;
            if le >= map.len() {
                return Err(Error::Metadata(format!(
                    "PE map on {} places extent {} at LE {} beyond the LV",
                    view.dev.name(),
                    pe,
                    le
                )));
            }
            if map[le].is_some() {
                return Err(Error::Metadata(format!(
                    "LE {} of LV number {} is mapped twice",
                    le, num
                )));
            }

            map[le] = Some((pv_idx, pe as u32));
        }
    }

    Ok(maps)
}

fn complete_map(lvd: &LvDisk, map: Vec<Option<(usize, u32)>>) -> Result<Vec<(usize, u32)>> {
    map.into_iter()
        .enumerate()
        .map(|(le, slot)| {
            slot.ok_or_else(|| {
                Error::Metadata(format!("LV {} is missing LE {}", lvd.lv_name_str(), le))
            })
        })
        .collect()
}

// Segments of a linear LV are the maximal runs of consecutive logical
// extents backed by consecutive physical extents on one PV.
fn linear_segments(map: &[(usize, u32)]) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut le = 0;

    while le < map.len() {
        let (pv, pe) = map[le];
        let mut len = 1;

        while le + len < map.len() {
            let (next_pv, next_pe) = map[le + len];
            if next_pv != pv || next_pe != pe + len as u32 {
                break;
            }
            len += 1;
        }

        segments.push(Segment {
            le: le as u32,
            len: len as u32,
            stripe_size: 0,
            areas: vec![Area { pv, pe }],
        });

        le += len;
    }

    segments
}

// A striped LV is one segment covering the whole LV. Stripe `s` occupies
// the contiguous LE band [s * band, (s + 1) * band), and each band must
// be physically contiguous on its PV.
fn striped_segments(lvd: &LvDisk, map: &[(usize, u32)]) -> Result<Vec<Segment>> {
    if map.is_empty() {
        return Ok(Vec::new());
    }

    let stripes = lvd.lv_stripes as usize;
    if map.len() % stripes != 0 {
        return Err(Error::Metadata(format!(
            "LV {}: {} extents do not divide into {} stripes",
            lvd.lv_name_str(),
            map.len(),
            stripes
        )));
    }

    let band = map.len() / stripes;
    let mut areas = Vec::with_capacity(stripes);

    for s in 0..stripes {
        let (pv, pe0) = map[s * band];

        for i in 0..band {
            let (pv_i, pe_i) = map[s * band + i];
            if pv_i != pv || pe_i != pe0 + i as u32 {
                return Err(Error::Metadata(format!(
                    "LV {}: stripe {} is not contiguous",
                    lvd.lv_name_str(),
                    s
                )));
            }
        }

        areas.push(Area { pv, pe: pe0 });
    }

    Ok(vec![Segment {
        le: 0,
        len: map.len() as u32,
        stripe_size: lvd.lv_stripesize,
        areas,
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::disk::{DiskLocn, PeDisk, PvDisk, VgDisk};
    use crate::util::copy_name;
    use std::fs::File;

    fn test_dev(dir: &std::path::Path, name: &str) -> Device {
        let path = dir.join(name);
        File::create(&path).unwrap();
        Device::open(&path).unwrap()
    }

    fn test_view(
        dev: Device,
        pv_number: u32,
        pe_total: u32,
        lvds: Vec<LvDisk>,
        extents: Vec<PeDisk>,
    ) -> PvView {
        assert_eq!(extents.len(), pe_total as usize);

        let mut pvd = PvDisk {
            pv_on_disk: DiskLocn { base: 0, size: PvDisk::SIZE as u32 },
            pv_number,
            pe_size: 1024,
            pe_total,
            pe_start: 100,
            ..PvDisk::default()
        };
        copy_name(&mut pvd.vg_name, "vg0").unwrap();

        let vgd = VgDisk {
            lv_max: 8,
            lv_cur: lvds.len() as u32,
            pv_cur: 1,
            pe_size: 1024,
            pe_total,
            ..VgDisk::default()
        };

        PvView {
            dev,
            pvd,
            vgd,
            uuids: Vec::new(),
            lvds,
            extents,
        }
    }

    fn test_lvd(name: &str, number: u32, allocated_le: u32, stripes: u32) -> LvDisk {
        let mut lvd = LvDisk {
            lv_number: number,
            lv_size: allocated_le * 1024,
            lv_allocated_le: allocated_le,
            lv_stripes: stripes,
            lv_stripesize: if stripes > 1 { 16 } else { 0 },
            ..LvDisk::default()
        };
        copy_name(&mut lvd.lv_name, name).unwrap();
        copy_name(&mut lvd.vg_name, "vg0").unwrap();
        lvd
    }

    #[test]
    fn linear_lv_spanning_two_pvs() {
        let dir = tempfile::tempdir().unwrap();

        // LEs 0-2 on pv0 at pe 0-2, LEs 3-4 on pv1 at pe 7-8
        let lvd = test_lvd("home", 0, 5, 1);
        let mut pe0 = vec![PeDisk::default(); 10];
        for le in 0..3u16 {
            pe0[le as usize] = PeDisk { lv_num: 1, le_num: le };
        }
        let mut pe1 = vec![PeDisk::default(); 10];
        pe1[7] = PeDisk { lv_num: 1, le_num: 3 };
        pe1[8] = PeDisk { lv_num: 1, le_num: 4 };

        let views = vec![
            test_view(test_dev(dir.path(), "a"), 1, 10, vec![lvd.clone()], pe0),
            test_view(test_dev(dir.path(), "b"), 2, 10, vec![lvd], pe1),
        ];

        let vg = VG::assemble("vg0", views).unwrap();
        assert_eq!(vg.extent_size, 1024);
        assert_eq!(vg.pvs.len(), 2);

        let lv = vg.lv_get("home").unwrap();
        assert_eq!(
            lv.segments,
            vec![
                Segment { le: 0, len: 3, stripe_size: 0, areas: vec![Area { pv: 0, pe: 0 }] },
                Segment { le: 3, len: 2, stripe_size: 0, areas: vec![Area { pv: 1, pe: 7 }] },
            ]
        );
        assert_eq!(lv.used_extents(), 5);
        assert_eq!(vg.extents(), 20);
        assert_eq!(vg.extents_free(), 15);
    }

    #[test]
    fn striped_lv_is_one_segment() {
        let dir = tempfile::tempdir().unwrap();

        // 2 stripes x 2 extents: band 0 (LEs 0-1) on pv0 pe 0-1,
        // band 1 (LEs 2-3) on pv1 pe 1-2
        let lvd = test_lvd("fast", 0, 4, 2);
        let mut pe0 = vec![PeDisk::default(); 4];
        pe0[0] = PeDisk { lv_num: 1, le_num: 0 };
        pe0[1] = PeDisk { lv_num: 1, le_num: 1 };
        let mut pe1 = vec![PeDisk::default(); 4];
        pe1[1] = PeDisk { lv_num: 1, le_num: 2 };
        pe1[2] = PeDisk { lv_num: 1, le_num: 3 };

        let views = vec![
            test_view(test_dev(dir.path(), "a"), 1, 4, vec![lvd.clone()], pe0),
            test_view(test_dev(dir.path(), "b"), 2, 4, vec![lvd], pe1),
        ];

        let vg = VG::assemble("vg0", views).unwrap();
        let lv = vg.lv_get("fast").unwrap();
        assert_eq!(
            lv.segments,
            vec![Segment {
                le: 0,
                len: 4,
                stripe_size: 16,
                areas: vec![Area { pv: 0, pe: 0 }, Area { pv: 1, pe: 1 }],
            }]
        );
    }

    #[test]
    fn extent_size_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();

        let a = test_view(test_dev(dir.path(), "a"), 1, 0, Vec::new(), Vec::new());
        let mut b = test_view(test_dev(dir.path(), "b"), 2, 0, Vec::new(), Vec::new());
        b.pvd.pe_size = 2048;

        assert!(VG::assemble("vg0", vec![a, b]).is_err());
    }

    #[test]
    fn missing_extent_rejected() {
        let dir = tempfile::tempdir().unwrap();

        let lvd = test_lvd("holey", 0, 2, 1);
        let mut pe = vec![PeDisk::default(); 4];
        pe[0] = PeDisk { lv_num: 1, le_num: 0 };
        // LE 1 never mapped

        let views = vec![test_view(test_dev(dir.path(), "a"), 1, 4, vec![lvd], pe)];
        assert!(VG::assemble("vg0", views).is_err());
    }

    #[test]
    fn duplicate_lv_names_rejected() {
        let dir = tempfile::tempdir().unwrap();

        let views = vec![test_view(
            test_dev(dir.path(), "a"),
            1,
            0,
            vec![test_lvd("twin", 0, 0, 1), test_lvd("twin", 1, 0, 1)],
            Vec::new(),
        )];
        assert!(VG::assemble("vg0", views).is_err());
    }

    #[test]
    fn broken_stripe_rejected() {
        let dir = tempfile::tempdir().unwrap();

        let lvd = test_lvd("fast", 0, 4, 2);
        let mut pe0 = vec![PeDisk::default(); 8];
        pe0[0] = PeDisk { lv_num: 1, le_num: 0 };
        pe0[1] = PeDisk { lv_num: 1, le_num: 1 };
        // second band physically discontiguous
        pe0[4] = PeDisk { lv_num: 1, le_num: 2 };
        pe0[6] = PeDisk { lv_num: 1, le_num: 3 };

        let views = vec![test_view(test_dev(dir.path(), "a"), 1, 8, vec![lvd], pe0)];
        assert!(VG::assemble("vg0", views).is_err());
    }
}

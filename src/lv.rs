// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Logical Volumes

/// One stripe of a segment: the PV backing it and the first physical
/// extent on that PV. PVs are referenced by their index in the owning
/// VG's `pvs`, never by pointer, so the graph stays acyclic.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Area {
    pub pv: usize,
    pub pe: u32,
}

/// A contiguous run of logical extents with uniform stripe geometry.
///
/// `areas` holds one entry per stripe; a single-area segment is a plain
/// linear mapping. `len` counts logical extents across all stripes.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Segment {
    /// First logical extent within the LV this segment comprises.
    pub le: u32,
    /// How many logical extents this segment comprises.
    pub len: u32,
    /// Sectors per stripe chunk; meaningful only when striped.
    pub stripe_size: u32,
    pub areas: Vec<Area>,
}

impl Segment {
    pub fn stripes(&self) -> u32 {
        self.areas.len() as u32
    }
}

/// A Logical Volume carved from a Volume Group.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct LV {
    /// The name, unique within the VG.
    pub name: String,
    /// The slot number the on-disk tables identify this LV by.
    pub number: u32,
    pub access: u32,
    pub status: u32,
    /// Size in sectors.
    pub size: u64,
    /// Allocated logical extents.
    pub allocated_le: u32,
    pub stripes: u32,
    pub stripe_size: u32,
    /// Read-ahead hint, in sectors, passed through to the kernel.
    pub read_ahead: u32,
    /// I/O timeout hint; the kernel honors it, this crate only carries it.
    pub io_timeout: u32,
    /// The segments comprising the LV, in logical-extent order.
    pub segments: Vec<Segment>,
}

impl LV {
    /// The total number of extents used by this logical volume.
    pub fn used_extents(&self) -> u64 {
        self.segments.iter().map(|x| x.len as u64).sum()
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The fixed on-disk records of the HM metadata format.
//!
//! Every record is a packed little-endian structure at a fixed offset
//! within the PV's metadata region. The layout is frozen; the codecs here
//! reproduce it byte-for-byte. Name fields are fixed-length and
//! NUL-terminated, but their trailing bytes are undefined on disk and must
//! survive a read/rewrite cycle unchanged, so the in-core records keep the
//! raw arrays and decode to host order only for the integer fields.

use std::io::Read;
use std::io::Write;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::util::buf_to_string;
use crate::{Error, Result};

pub const SECTOR_SIZE: u32 = 512;
pub const NAME_LEN: usize = 128;

/// The two magic bytes at the start of every PV.
pub const PV_ID: [u8; 2] = *b"HM";

/// Byte offset and length of one sub-region of the PV metadata.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct DiskLocn {
    pub base: u32,
    pub size: u32,
}

impl DiskLocn {
    pub const SIZE: usize = 8;

    fn read(c: &mut &[u8]) -> Result<DiskLocn> {
        Ok(DiskLocn {
            base: c.read_u32::<LittleEndian>()?,
            size: c.read_u32::<LittleEndian>()?,
        })
    }

    fn write(&self, c: &mut &mut [u8]) -> Result<()> {
        c.write_u32::<LittleEndian>(self.base)?;
        c.write_u32::<LittleEndian>(self.size)?;
        Ok(())
    }
}

//
// PV RECORD LAYOUT (468 bytes, at device offset 0):
// - id "HM" (2), version u16 (2)
// - five region descriptors, 8 bytes each, in fixed order:
//   pv, vg, pv uuid list, lv table, pe map
// - pv_uuid, vg_name, system_id: NAME_LEN each
// - ten u32s: pv_major, pv_number, pv_status, pv_allocatable,
//   pv_size, lv_cur, pe_size, pe_total, pe_allocated, pe_start
//
#[derive(Debug, Clone, PartialEq)]
pub struct PvDisk {
    pub id: [u8; 2],
    pub version: u16,
    pub pv_on_disk: DiskLocn,
    pub vg_on_disk: DiskLocn,
    pub pv_uuidlist_on_disk: DiskLocn,
    pub lv_on_disk: DiskLocn,
    pub pe_on_disk: DiskLocn,
    pub pv_uuid: [u8; NAME_LEN],
    pub vg_name: [u8; NAME_LEN],
    pub system_id: [u8; NAME_LEN],
    pub pv_major: u32,
    pub pv_number: u32,
    pub pv_status: u32,
    pub pv_allocatable: u32,
    /// Size of the whole device, in sectors.
    pub pv_size: u32,
    pub lv_cur: u32,
    /// Sectors per extent; uniform across the VG.
    pub pe_size: u32,
    pub pe_total: u32,
    pub pe_allocated: u32,
    /// First data-extent sector.
    pub pe_start: u32,
}

impl Default for PvDisk {
    fn default() -> PvDisk {
        PvDisk {
            id: PV_ID,
            version: 1,
            pv_on_disk: DiskLocn::default(),
            vg_on_disk: DiskLocn::default(),
            pv_uuidlist_on_disk: DiskLocn::default(),
            lv_on_disk: DiskLocn::default(),
            pe_on_disk: DiskLocn::default(),
            pv_uuid: [0; NAME_LEN],
            vg_name: [0; NAME_LEN],
            system_id: [0; NAME_LEN],
            pv_major: 0,
            pv_number: 0,
            pv_status: 0,
            pv_allocatable: 0,
            pv_size: 0,
            lv_cur: 0,
            pe_size: 0,
            pe_total: 0,
            pe_allocated: 0,
            pe_start: 0,
        }
    }
}

impl PvDisk {
    pub const SIZE: usize = 468;

    pub fn from_buf(buf: &[u8]) -> Result<PvDisk> {
        let mut c = buf;
        let mut pvd = PvDisk::default();

        c.read_exact(&mut pvd.id)?;
        pvd.version = c.read_u16::<LittleEndian>()?;
        pvd.pv_on_disk = DiskLocn::read(&mut c)?;
        pvd.vg_on_disk = DiskLocn::read(&mut c)?;
        pvd.pv_uuidlist_on_disk = DiskLocn::read(&mut c)?;
        pvd.lv_on_disk = DiskLocn::read(&mut c)?;
        pvd.pe_on_disk = DiskLocn::read(&mut c)?;
        c.read_exact(&mut pvd.pv_uuid)?;
        c.read_exact(&mut pvd.vg_name)?;
        c.read_exact(&mut pvd.system_id)?;
        pvd.pv_major = c.read_u32::<LittleEndian>()?;
        pvd.pv_number = c.read_u32::<LittleEndian>()?;
        pvd.pv_status = c.read_u32::<LittleEndian>()?;
        pvd.pv_allocatable = c.read_u32::<LittleEndian>()?;
        pvd.pv_size = c.read_u32::<LittleEndian>()?;
        pvd.lv_cur = c.read_u32::<LittleEndian>()?;
        pvd.pe_size = c.read_u32::<LittleEndian>()?;
        pvd.pe_total = c.read_u32::<LittleEndian>()?;
        pvd.pe_allocated = c.read_u32::<LittleEndian>()?;
        pvd.pe_start = c.read_u32::<LittleEndian>()?;

        Ok(pvd)
    }

    pub fn write_buf(&self, buf: &mut [u8]) -> Result<()> {
        let mut c = buf;

        c.write_all(&self.id)?;
        c.write_u16::<LittleEndian>(self.version)?;
        self.pv_on_disk.write(&mut c)?;
        self.vg_on_disk.write(&mut c)?;
        self.pv_uuidlist_on_disk.write(&mut c)?;
        self.lv_on_disk.write(&mut c)?;
        self.pe_on_disk.write(&mut c)?;
        c.write_all(&self.pv_uuid)?;
        c.write_all(&self.vg_name)?;
        c.write_all(&self.system_id)?;
        c.write_u32::<LittleEndian>(self.pv_major)?;
        c.write_u32::<LittleEndian>(self.pv_number)?;
        c.write_u32::<LittleEndian>(self.pv_status)?;
        c.write_u32::<LittleEndian>(self.pv_allocatable)?;
        c.write_u32::<LittleEndian>(self.pv_size)?;
        c.write_u32::<LittleEndian>(self.lv_cur)?;
        c.write_u32::<LittleEndian>(self.pe_size)?;
        c.write_u32::<LittleEndian>(self.pe_total)?;
        c.write_u32::<LittleEndian>(self.pe_allocated)?;
        c.write_u32::<LittleEndian>(self.pe_start)?;

        Ok(())
    }

    /// Handle both historical minor format versions.
    ///
    /// Version 1 derives `pe_start` from the PE-map region; version 2
    /// stores `pe_start` directly and is normalized to version 1 by
    /// deriving the region size from it instead. The in-core record is
    /// always version 1 afterwards. Unknown versions are rejected.
    pub fn normalize_format(&mut self) -> Result<()> {
        match self.version {
            1 => {
                self.pe_start = (self.pe_on_disk.base + self.pe_on_disk.size) / SECTOR_SIZE;
            }
            2 => {
                self.version = 1;
                self.pe_on_disk.size = self.pe_start * SECTOR_SIZE - self.pe_on_disk.base;
            }
            v => {
                return Err(Error::Metadata(format!("unknown metadata version {}", v)));
            }
        }

        Ok(())
    }

    /// An orphan PV has been initialized but belongs to no VG yet.
    pub fn is_orphan(&self) -> bool {
        self.vg_name[0] == b'\0'
    }

    pub fn vg_name_str(&self) -> String {
        buf_to_string(&self.vg_name)
    }

    pub fn pv_uuid_str(&self) -> String {
        buf_to_string(&self.pv_uuid)
    }
}

//
// VG RECORD LAYOUT (60 bytes, at pv.vg_on_disk.base): fifteen u32s.
//
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VgDisk {
    pub vg_number: u32,
    pub vg_access: u32,
    pub vg_status: u32,
    pub lv_max: u32,
    pub lv_cur: u32,
    pub lv_open: u32,
    pub pv_max: u32,
    pub pv_cur: u32,
    pub pv_act: u32,
    pub dummy: u32,
    pub vgda: u32,
    pub pe_size: u32,
    pub pe_total: u32,
    pub pe_allocated: u32,
    pub pvg_total: u32,
}

impl VgDisk {
    pub const SIZE: usize = 60;

    pub fn from_buf(buf: &[u8]) -> Result<VgDisk> {
        let mut c = buf;

        Ok(VgDisk {
            vg_number: c.read_u32::<LittleEndian>()?,
            vg_access: c.read_u32::<LittleEndian>()?,
            vg_status: c.read_u32::<LittleEndian>()?,
            lv_max: c.read_u32::<LittleEndian>()?,
            lv_cur: c.read_u32::<LittleEndian>()?,
            lv_open: c.read_u32::<LittleEndian>()?,
            pv_max: c.read_u32::<LittleEndian>()?,
            pv_cur: c.read_u32::<LittleEndian>()?,
            pv_act: c.read_u32::<LittleEndian>()?,
            dummy: c.read_u32::<LittleEndian>()?,
            vgda: c.read_u32::<LittleEndian>()?,
            pe_size: c.read_u32::<LittleEndian>()?,
            pe_total: c.read_u32::<LittleEndian>()?,
            pe_allocated: c.read_u32::<LittleEndian>()?,
            pvg_total: c.read_u32::<LittleEndian>()?,
        })
    }

    pub fn write_buf(&self, buf: &mut [u8]) -> Result<()> {
        let mut c = buf;

        c.write_u32::<LittleEndian>(self.vg_number)?;
        c.write_u32::<LittleEndian>(self.vg_access)?;
        c.write_u32::<LittleEndian>(self.vg_status)?;
        c.write_u32::<LittleEndian>(self.lv_max)?;
        c.write_u32::<LittleEndian>(self.lv_cur)?;
        c.write_u32::<LittleEndian>(self.lv_open)?;
        c.write_u32::<LittleEndian>(self.pv_max)?;
        c.write_u32::<LittleEndian>(self.pv_cur)?;
        c.write_u32::<LittleEndian>(self.pv_act)?;
        c.write_u32::<LittleEndian>(self.dummy)?;
        c.write_u32::<LittleEndian>(self.vgda)?;
        c.write_u32::<LittleEndian>(self.pe_size)?;
        c.write_u32::<LittleEndian>(self.pe_total)?;
        c.write_u32::<LittleEndian>(self.pe_allocated)?;
        c.write_u32::<LittleEndian>(self.pvg_total)?;

        Ok(())
    }
}

//
// LV RECORD LAYOUT (328 bytes): one slot of the LV table at
// pv.lv_on_disk.base. A slot is live iff lv_name[0] != 0.
//
#[derive(Debug, Clone, PartialEq)]
pub struct LvDisk {
    pub lv_name: [u8; NAME_LEN],
    pub vg_name: [u8; NAME_LEN],
    pub lv_access: u32,
    pub lv_status: u32,
    pub lv_open: u32,
    pub lv_dev: u32,
    pub lv_number: u32,
    pub lv_mirror_copies: u32,
    pub lv_recovery: u32,
    pub lv_schedule: u32,
    /// Size in sectors.
    pub lv_size: u32,
    pub lv_snapshot_minor: u32,
    pub lv_chunk_size: u16,
    pub dummy: u16,
    pub lv_allocated_le: u32,
    pub lv_stripes: u32,
    /// Sectors per stripe chunk.
    pub lv_stripesize: u32,
    pub lv_badblock: u32,
    pub lv_allocation: u32,
    pub lv_io_timeout: u32,
    pub lv_read_ahead: u32,
}

impl Default for LvDisk {
    fn default() -> LvDisk {
        LvDisk {
            lv_name: [0; NAME_LEN],
            vg_name: [0; NAME_LEN],
            lv_access: 0,
            lv_status: 0,
            lv_open: 0,
            lv_dev: 0,
            lv_number: 0,
            lv_mirror_copies: 0,
            lv_recovery: 0,
            lv_schedule: 0,
            lv_size: 0,
            lv_snapshot_minor: 0,
            lv_chunk_size: 0,
            dummy: 0,
            lv_allocated_le: 0,
            lv_stripes: 1,
            lv_stripesize: 0,
            lv_badblock: 0,
            lv_allocation: 0,
            lv_io_timeout: 0,
            lv_read_ahead: 0,
        }
    }
}

impl LvDisk {
    pub const SIZE: usize = 328;

    pub fn from_buf(buf: &[u8]) -> Result<LvDisk> {
        let mut c = buf;
        let mut lvd = LvDisk::default();

        c.read_exact(&mut lvd.lv_name)?;
        c.read_exact(&mut lvd.vg_name)?;
        lvd.lv_access = c.read_u32::<LittleEndian>()?;
        lvd.lv_status = c.read_u32::<LittleEndian>()?;
        lvd.lv_open = c.read_u32::<LittleEndian>()?;
        lvd.lv_dev = c.read_u32::<LittleEndian>()?;
        lvd.lv_number = c.read_u32::<LittleEndian>()?;
        lvd.lv_mirror_copies = c.read_u32::<LittleEndian>()?;
        lvd.lv_recovery = c.read_u32::<LittleEndian>()?;
        lvd.lv_schedule = c.read_u32::<LittleEndian>()?;
        lvd.lv_size = c.read_u32::<LittleEndian>()?;
        lvd.lv_snapshot_minor = c.read_u32::<LittleEndian>()?;
        lvd.lv_chunk_size = c.read_u16::<LittleEndian>()?;
        lvd.dummy = c.read_u16::<LittleEndian>()?;
        lvd.lv_allocated_le = c.read_u32::<LittleEndian>()?;
        lvd.lv_stripes = c.read_u32::<LittleEndian>()?;
        lvd.lv_stripesize = c.read_u32::<LittleEndian>()?;
        lvd.lv_badblock = c.read_u32::<LittleEndian>()?;
        lvd.lv_allocation = c.read_u32::<LittleEndian>()?;
        lvd.lv_io_timeout = c.read_u32::<LittleEndian>()?;
        lvd.lv_read_ahead = c.read_u32::<LittleEndian>()?;

        Ok(lvd)
    }

    pub fn write_buf(&self, buf: &mut [u8]) -> Result<()> {
        let mut c = buf;

        c.write_all(&self.lv_name)?;
        c.write_all(&self.vg_name)?;
        c.write_u32::<LittleEndian>(self.lv_access)?;
        c.write_u32::<LittleEndian>(self.lv_status)?;
        c.write_u32::<LittleEndian>(self.lv_open)?;
        c.write_u32::<LittleEndian>(self.lv_dev)?;
        c.write_u32::<LittleEndian>(self.lv_number)?;
        c.write_u32::<LittleEndian>(self.lv_mirror_copies)?;
        c.write_u32::<LittleEndian>(self.lv_recovery)?;
        c.write_u32::<LittleEndian>(self.lv_schedule)?;
        c.write_u32::<LittleEndian>(self.lv_size)?;
        c.write_u32::<LittleEndian>(self.lv_snapshot_minor)?;
        c.write_u16::<LittleEndian>(self.lv_chunk_size)?;
        c.write_u16::<LittleEndian>(self.dummy)?;
        c.write_u32::<LittleEndian>(self.lv_allocated_le)?;
        c.write_u32::<LittleEndian>(self.lv_stripes)?;
        c.write_u32::<LittleEndian>(self.lv_stripesize)?;
        c.write_u32::<LittleEndian>(self.lv_badblock)?;
        c.write_u32::<LittleEndian>(self.lv_allocation)?;
        c.write_u32::<LittleEndian>(self.lv_io_timeout)?;
        c.write_u32::<LittleEndian>(self.lv_read_ahead)?;

        Ok(())
    }

    pub fn is_live(&self) -> bool {
        self.lv_name[0] != b'\0'
    }

    pub fn lv_name_str(&self) -> String {
        buf_to_string(&self.lv_name)
    }
}

//
// PE MAP ENTRY (4 bytes): pe_total of these at pv.pe_on_disk.base.
// lv_num 0 marks a free extent; otherwise lv_num - 1 is the owning LV's
// lv_number and le_num the logical extent it backs.
//
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PeDisk {
    pub lv_num: u16,
    pub le_num: u16,
}

impl PeDisk {
    pub const SIZE: usize = 4;

    pub fn map_from_buf(buf: &[u8], count: usize) -> Result<Vec<PeDisk>> {
        let mut c = buf;
        let mut map = Vec::with_capacity(count);

        for _ in 0..count {
            map.push(PeDisk {
                lv_num: c.read_u16::<LittleEndian>()?,
                le_num: c.read_u16::<LittleEndian>()?,
            });
        }

        Ok(map)
    }

    pub fn map_write_buf(map: &[PeDisk], buf: &mut [u8]) -> Result<()> {
        let mut c = buf;

        for pe in map {
            c.write_u16::<LittleEndian>(pe.lv_num)?;
            c.write_u16::<LittleEndian>(pe.le_num)?;
        }

        Ok(())
    }
}

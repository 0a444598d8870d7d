// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The ioctl transport behind `DmCtl`.
//!
//! Every dm request is a `struct dm_ioctl` header, optionally followed by
//! payload, passed through a read-write ioctl on `/dev/mapper/control`.
//! The header and the `dm_target_spec` rows are marshaled by hand into a
//! byte buffer in native byte order.

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;

use byteorder::{ByteOrder, NativeEndian};
use log::{debug, error};

use super::{Dm, DmInfo, DmTask, TaskKind};
use crate::util::align_to;
use crate::{Error, Result};

const DM_CTL_PATH: &str = "/dev/mapper/control";

// Lowest interface version this crate needs.
const DM_VERSION_MAJOR: u32 = 4;
const DM_VERSION_MINOR: u32 = 0;
const DM_VERSION_PATCHLEVEL: u32 = 0;

const DM_IOCTL: libc::c_ulong = 0xfd;

const DM_DEV_CREATE_CMD: libc::c_ulong = 3;
const DM_DEV_REMOVE_CMD: libc::c_ulong = 4;
const DM_DEV_SUSPEND_CMD: libc::c_ulong = 6;
const DM_DEV_STATUS_CMD: libc::c_ulong = 7;
const DM_TABLE_LOAD_CMD: libc::c_ulong = 9;

// struct dm_ioctl is 312 bytes and every dm request encodes that size,
// however long the buffer actually is.
const DM_IOCTL_STRUCT_LEN: usize = 312;
const DM_TARGET_SPEC_LEN: usize = 40;
pub const DM_NAME_LEN: usize = 128;
const DM_MAX_TYPE_NAME: usize = 16;

// dm_ioctl field offsets
const HDR_VERSION: usize = 0;
const HDR_DATA_SIZE: usize = 12;
const HDR_DATA_START: usize = 16;
const HDR_TARGET_COUNT: usize = 20;
const HDR_OPEN_COUNT: usize = 24;
const HDR_FLAGS: usize = 28;
const HDR_EVENT_NR: usize = 32;
const HDR_DEV: usize = 40;
const HDR_NAME: usize = 48;

// dm_target_spec field offsets
const SPEC_SECTOR_START: usize = 0;
const SPEC_LENGTH: usize = 8;
const SPEC_NEXT: usize = 20;
const SPEC_TARGET_TYPE: usize = 24;

const DM_READONLY_FLAG: u32 = 1 << 0;
const DM_SUSPEND_FLAG: u32 = 1 << 1;
const DM_EXISTS_FLAG: u32 = 1 << 2;

// _IOWR(DM_IOCTL, cmd, struct dm_ioctl)
fn dm_op(cmd: libc::c_ulong) -> libc::c_ulong {
    const IOC_READWRITE: libc::c_ulong = 3;
    (IOC_READWRITE << 30) | ((DM_IOCTL_STRUCT_LEN as libc::c_ulong) << 16) | (DM_IOCTL << 8) | cmd
}

fn build_hdr(name: &str, data_size: usize, flags: u32) -> Vec<u8> {
    let mut buf = vec![0u8; DM_IOCTL_STRUCT_LEN];

    NativeEndian::write_u32(&mut buf[HDR_VERSION..HDR_VERSION + 4], DM_VERSION_MAJOR);
    NativeEndian::write_u32(&mut buf[HDR_VERSION + 4..HDR_VERSION + 8], DM_VERSION_MINOR);
    NativeEndian::write_u32(
        &mut buf[HDR_VERSION + 8..HDR_VERSION + 12],
        DM_VERSION_PATCHLEVEL,
    );
    NativeEndian::write_u32(&mut buf[HDR_DATA_SIZE..HDR_DATA_SIZE + 4], data_size as u32);
    NativeEndian::write_u32(
        &mut buf[HDR_DATA_START..HDR_DATA_START + 4],
        DM_IOCTL_STRUCT_LEN as u32,
    );
    NativeEndian::write_u32(&mut buf[HDR_FLAGS..HDR_FLAGS + 4], flags);
    buf[HDR_NAME..HDR_NAME + name.len()].copy_from_slice(name.as_bytes());

    buf
}

struct Target {
    start: u64,
    length: u64,
    target_type: String,
    params: String,
}

// One dm_target_spec per row; params trail each spec, NUL-terminated and
// padded so the next spec stays 8-byte aligned.
fn marshal_targets(targets: &[Target]) -> Vec<u8> {
    let mut data = Vec::new();

    for t in targets {
        let next = DM_TARGET_SPEC_LEN + align_to(t.params.len() + 1, 8);
        let mut spec = vec![0u8; next];

        NativeEndian::write_u64(&mut spec[SPEC_SECTOR_START..SPEC_SECTOR_START + 8], t.start);
        NativeEndian::write_u64(&mut spec[SPEC_LENGTH..SPEC_LENGTH + 8], t.length);
        NativeEndian::write_u32(&mut spec[SPEC_NEXT..SPEC_NEXT + 4], next as u32);
        spec[SPEC_TARGET_TYPE..SPEC_TARGET_TYPE + t.target_type.len()]
            .copy_from_slice(t.target_type.as_bytes());
        spec[DM_TARGET_SPEC_LEN..DM_TARGET_SPEC_LEN + t.params.len()]
            .copy_from_slice(t.params.as_bytes());

        data.extend_from_slice(&spec);
    }

    data
}

// Linux dev_t: twelve bits of major, twenty of minor, split around the
// historical low byte.
fn decode_dev(dev: u64) -> (u32, u32) {
    let major = ((dev >> 8) & 0xfff) as u32;
    let minor = ((dev & 0xff) | ((dev >> 12) & !0xff)) as u32;
    (major, minor)
}

fn parse_info(buf: &[u8]) -> DmInfo {
    let flags = NativeEndian::read_u32(&buf[HDR_FLAGS..HDR_FLAGS + 4]);
    let open_count = NativeEndian::read_i32(&buf[HDR_OPEN_COUNT..HDR_OPEN_COUNT + 4]);
    let (major, minor) = decode_dev(NativeEndian::read_u64(&buf[HDR_DEV..HDR_DEV + 8]));

    DmInfo {
        exists: flags & DM_EXISTS_FLAG != 0,
        suspended: flags & DM_SUSPEND_FLAG != 0,
        read_only: flags & DM_READONLY_FLAG != 0,
        open_count: open_count.max(0) as u32,
        major,
        minor,
        target_count: NativeEndian::read_u32(&buf[HDR_TARGET_COUNT..HDR_TARGET_COUNT + 4]),
        event_nr: NativeEndian::read_u32(&buf[HDR_EVENT_NR..HDR_EVENT_NR + 4]),
    }
}

/// Task source backed by `/dev/mapper/control`.
pub struct DmCtl {
    file: File,
}

impl DmCtl {
    pub fn new() -> Result<DmCtl> {
        Ok(DmCtl {
            file: File::open(DM_CTL_PATH)?,
        })
    }
}

impl Dm for DmCtl {
    fn task_create(&self, kind: TaskKind) -> Result<Box<dyn DmTask>> {
        Ok(Box::new(IoctlTask {
            file: self.file.try_clone()?,
            kind,
            name: String::new(),
            targets: Vec::new(),
            info: DmInfo::default(),
        }))
    }
}

struct IoctlTask {
    file: File,
    kind: TaskKind,
    name: String,
    targets: Vec<Target>,
    info: DmInfo,
}

impl IoctlTask {
    fn ioctl(&self, cmd: libc::c_ulong, buf: &mut [u8]) -> io::Result<()> {
        let r = unsafe { libc::ioctl(self.file.as_raw_fd(), dm_op(cmd), buf.as_mut_ptr()) };
        if r < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    fn simple(&self, cmd: libc::c_ulong, flags: u32) -> Result<()> {
        let mut buf = build_hdr(&self.name, DM_IOCTL_STRUCT_LEN, flags);
        self.ioctl(cmd, &mut buf)?;
        Ok(())
    }

    fn table_load(&self) -> Result<()> {
        let data = marshal_targets(&self.targets);

        let mut buf = build_hdr(&self.name, DM_IOCTL_STRUCT_LEN + data.len(), 0);
        NativeEndian::write_u32(
            &mut buf[HDR_TARGET_COUNT..HDR_TARGET_COUNT + 4],
            self.targets.len() as u32,
        );
        buf.extend_from_slice(&data);

        self.ioctl(DM_TABLE_LOAD_CMD, &mut buf)?;
        Ok(())
    }

    // Create is compound: make the device, load its table, resume it. A
    // failure after the create must not leave the half-made device
    // behind.
    fn create(&self) -> Result<()> {
        self.simple(DM_DEV_CREATE_CMD, 0)?;

        let loaded = self
            .table_load()
            .and_then(|_| self.simple(DM_DEV_SUSPEND_CMD, 0));

        if let Err(e) = loaded {
            if let Err(rm) = self.simple(DM_DEV_REMOVE_CMD, 0) {
                error!("Couldn't remove half-created device '{}': {}", self.name, rm);
            }
            return Err(e);
        }

        Ok(())
    }

    fn status(&mut self) -> Result<()> {
        let mut buf = build_hdr(&self.name, DM_IOCTL_STRUCT_LEN, 0);

        match self.ioctl(DM_DEV_STATUS_CMD, &mut buf) {
            Ok(()) => {
                self.info = parse_info(&buf);
                Ok(())
            }
            // Absence is an answer, not an error.
            Err(ref e) if e.raw_os_error() == Some(libc::ENXIO) => {
                self.info = DmInfo::default();
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl DmTask for IoctlTask {
    fn set_name(&mut self, name: &str) -> Result<()> {
        if name.len() >= DM_NAME_LEN {
            return Err(Error::Metadata(format!(
                "device name \"{}\" too long",
                name
            )));
        }

        self.name = name.to_owned();
        Ok(())
    }

    fn add_target(
        &mut self,
        start: u64,
        length: u64,
        target_type: &str,
        params: &str,
    ) -> Result<()> {
        if target_type.len() >= DM_MAX_TYPE_NAME {
            return Err(Error::Metadata(format!(
                "target type \"{}\" too long",
                target_type
            )));
        }

        self.targets.push(Target {
            start,
            length,
            target_type: target_type.to_owned(),
            params: params.to_owned(),
        });
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        debug!("dm {:?} on '{}'", self.kind, self.name);

        match self.kind {
            TaskKind::Info => self.status(),
            TaskKind::Create => self.create(),
            TaskKind::Reload => self.table_load(),
            TaskKind::Suspend => self.simple(DM_DEV_SUSPEND_CMD, DM_SUSPEND_FLAG),
            TaskKind::Resume => self.simple(DM_DEV_SUSPEND_CMD, 0),
            TaskKind::Remove => self.simple(DM_DEV_REMOVE_CMD, 0),
        }
    }

    fn info(&self) -> DmInfo {
        self.info
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Communicating with the running kernel using device-mapper.
//!
//! Work is expressed as short-lived tasks: create one for a given kind,
//! name it, queue table rows if the kind takes a table, then run it. A
//! task is released when it goes out of scope, on every path.

mod ioctl;

pub use self::ioctl::DmCtl;

use crate::Result;

/// The request kinds the activation engine issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Query a device's existence and status.
    Info,
    /// Create a device, load its table and resume it.
    Create,
    /// Load a new table into an existing (suspended) device.
    Reload,
    Suspend,
    Resume,
    Remove,
}

/// What the kernel reports about one mapped device. A device that does
/// not exist reports the zeroed record with `exists` false.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DmInfo {
    pub exists: bool,
    pub suspended: bool,
    pub read_only: bool,
    pub open_count: u32,
    pub major: u32,
    pub minor: u32,
    pub target_count: u32,
    pub event_nr: u32,
}

/// One device-mapper request in the making.
pub trait DmTask {
    fn set_name(&mut self, name: &str) -> Result<()>;

    /// Queue one table row. Only `Create` and `Reload` tasks consume
    /// rows; `start` and `length` are in 512-byte sectors.
    fn add_target(
        &mut self,
        start: u64,
        length: u64,
        target_type: &str,
        params: &str,
    ) -> Result<()>;

    fn run(&mut self) -> Result<()>;

    /// The device info gathered by a completed `Info` task.
    fn info(&self) -> DmInfo;
}

/// A source of device-mapper tasks. The activation engine is written
/// against this seam; tests substitute a recording fake.
pub trait Dm {
    fn task_create(&self, kind: TaskKind) -> Result<Box<dyn DmTask>>;
}

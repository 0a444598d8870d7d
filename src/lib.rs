// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Reading, rewriting and activating HM-format volume-manager metadata.
//!
//! A physical volume (PV) is a block device carrying an `"HM"` metadata
//! header at offset zero. One or more PVs form a named volume group (VG),
//! which is carved into logical volumes (LVs); each LV is a list of
//! linear or striped segments over physical extents. This crate reads and
//! writes the per-PV metadata region and drives the kernel device-mapper
//! to activate LVs as mapped block devices.

pub mod activate;
pub mod device;
pub mod disk;
pub mod dm;
pub mod fs;
pub mod lock;
pub mod lv;
pub mod metadata;
pub mod pv;
pub mod vg;
mod util;

mod error;

pub use crate::error::{Error, Result};

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Driving the device-mapper lifecycle of logical volumes.
//!
//! An active LV is a mapped device named `"<vg>_<lv>"` whose table holds
//! one row per segment, in segment order. The engine here turns segments
//! into rows and walks devices through create, reload, suspend, resume
//! and remove.

use log::{error, info};

use crate::dm::{Dm, DmInfo, DmTask, TaskKind};
use crate::fs::LvNotify;
use crate::lv::{Segment, LV};
use crate::vg::VG;
use crate::Result;

fn lv_dm_name(vg: &VG, lv: &LV) -> String {
    format!("{}_{}", vg.name, lv.name)
}

/// Emit the table row for one segment.
///
/// A one-area segment maps to a `linear` row; more areas make a
/// `striped` row, whose params lead with the stripe count and chunk
/// size. Each area contributes `"<dev> <sector>"`, the sector being the
/// PV's first data sector plus the area's starting extent.
fn emit_target(task: &mut dyn DmTask, vg: &VG, seg: &Segment) -> Result<()> {
    let esize = vg.extent_size;

    let mut params = Vec::with_capacity(seg.areas.len() + 1);
    if seg.stripes() > 1 {
        params.push(format!("{} {}", seg.stripes(), seg.stripe_size));
    }
    for area in &seg.areas {
        let pv = &vg.pvs[area.pv];
        params.push(format!(
            "{} {}",
            pv.dev.name(),
            pv.pe_start + esize * area.pe as u64
        ));
    }

    task.add_target(
        esize * seg.le as u64,
        esize * seg.len as u64,
        if seg.stripes() == 1 { "linear" } else { "striped" },
        &params.join(" "),
    )
}

/// The activation engine, bound to its two collaborators: a task source
/// and the device-node notifier.
pub struct Activator<'a> {
    dm: &'a dyn Dm,
    fs: &'a dyn LvNotify,
}

impl<'a> Activator<'a> {
    pub fn new(dm: &'a dyn Dm, fs: &'a dyn LvNotify) -> Activator<'a> {
        Activator { dm, fs }
    }

    fn task(&self, vg: &VG, lv: &LV, kind: TaskKind) -> Result<Box<dyn DmTask>> {
        let mut task = self.dm.task_create(kind)?;
        task.set_name(&lv_dm_name(vg, lv))?;
        Ok(task)
    }

    /// Query the kernel about the LV's mapped device. An absent device is
    /// the zeroed record, not an error.
    pub fn info(&self, vg: &VG, lv: &LV) -> Result<DmInfo> {
        let mut task = self.task(vg, lv, TaskKind::Info)?;
        task.run()?;
        Ok(task.info())
    }

    pub fn active(&self, vg: &VG, lv: &LV) -> Result<bool> {
        Ok(self.info(vg, lv)?.exists)
    }

    pub fn open_count(&self, vg: &VG, lv: &LV) -> Result<u32> {
        Ok(self.info(vg, lv)?.open_count)
    }

    fn load(&self, vg: &VG, lv: &LV, kind: TaskKind) -> Result<()> {
        let mut task = self.task(vg, lv, kind)?;

        for seg in &lv.segments {
            if let Err(e) = emit_target(task.as_mut(), vg, seg) {
                error!("Unable to activate logical volume '{}'", lv.name);
                return Err(e);
            }
        }

        task.run()?;

        info!("Logical volume {} activated", lv.name);
        Ok(())
    }

    /// Map the LV and publish its device node.
    pub fn activate(&self, vg: &VG, lv: &LV) -> Result<()> {
        self.load(vg, lv, TaskKind::Create)?;
        self.fs.add_lv(vg, lv)
    }

    fn suspend(&self, vg: &VG, lv: &LV, suspend: bool) -> Result<()> {
        let kind = if suspend {
            TaskKind::Suspend
        } else {
            TaskKind::Resume
        };

        let mut task = self.task(vg, lv, kind)?;
        if let Err(e) = task.run() {
            error!(
                "Couldn't {} device '{}'",
                if suspend { "suspend" } else { "resume" },
                lv.name
            );
            return Err(e);
        }

        Ok(())
    }

    /// Swap in a table rebuilt from the LV's current segments.
    ///
    /// In-flight I/O is quiesced before the swap, and the device is
    /// resumed afterwards even when the reload failed so it is never left
    /// frozen. The reload's result decides the overall outcome.
    pub fn reactivate(&self, vg: &VG, lv: &LV) -> Result<()> {
        self.suspend(vg, lv, true)?;

        let reloaded = self.load(vg, lv, TaskKind::Reload);
        let resumed = self.suspend(vg, lv, false);

        reloaded.and(resumed)
    }

    /// Unmap the LV. The device node is retired whether or not the kernel
    /// still knew the device, keeping the namespace clean.
    pub fn deactivate(&self, vg: &VG, lv: &LV) -> Result<()> {
        let removed = self
            .task(vg, lv, TaskKind::Remove)
            .and_then(|mut task| task.run());

        if let Err(e) = self.fs.del_lv(vg, lv) {
            error!("Couldn't remove device node for '{}': {}", lv.name, e);
        }

        removed
    }

    /// Activate every inactive LV in the VG, in order; one LV's failure
    /// does not stop the sweep. Returns how many were newly activated.
    pub fn activate_vg(&self, vg: &VG) -> usize {
        vg.lvs
            .iter()
            .filter(|lv| {
                matches!(self.active(vg, lv), Ok(false)) && self.activate(vg, lv).is_ok()
            })
            .count()
    }

    /// Deactivate every active LV in the VG; the count of LVs actually
    /// unmapped is returned.
    pub fn deactivate_vg(&self, vg: &VG) -> usize {
        vg.lvs
            .iter()
            .filter(|lv| {
                matches!(self.active(vg, lv), Ok(true)) && self.deactivate(vg, lv).is_ok()
            })
            .count()
    }

    /// How many of the VG's LVs are currently mapped.
    pub fn lvs_activated(&self, vg: &VG) -> usize {
        vg.lvs
            .iter()
            .filter(|lv| matches!(self.active(vg, lv), Ok(true)))
            .count()
    }

    /// How many of the VG's LVs are held open by at least one opener.
    pub fn lvs_opened(&self, vg: &VG) -> usize {
        vg.lvs
            .iter()
            .filter(|lv| self.open_count(vg, lv).map(|c| c > 0).unwrap_or(false))
            .count()
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Device-node bookkeeping for activated LVs.

use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::PathBuf;

use log::debug;

use crate::lv::LV;
use crate::vg::VG;
use crate::Result;

/// Notified when mapped devices come and go, so the per-VG device
/// namespace tracks the kernel's.
pub trait LvNotify {
    fn add_lv(&self, vg: &VG, lv: &LV) -> Result<()>;
    fn del_lv(&self, vg: &VG, lv: &LV) -> Result<()>;
}

/// Maintains `<base>/<vg>/<lv>` symlinks to the mapper node of each
/// active LV. The base is `/dev` in production.
pub struct DevDir {
    base: PathBuf,
}

impl DevDir {
    pub fn new() -> DevDir {
        DevDir {
            base: PathBuf::from("/dev"),
        }
    }

    pub fn with_base(base: PathBuf) -> DevDir {
        DevDir { base }
    }
}

impl Default for DevDir {
    fn default() -> DevDir {
        DevDir::new()
    }
}

fn remove_if_present(path: &PathBuf) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(ref e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl LvNotify for DevDir {
    fn add_lv(&self, vg: &VG, lv: &LV) -> Result<()> {
        let dir = self.base.join(&vg.name);
        fs::create_dir_all(&dir)?;

        let node = dir.join(&lv.name);
        remove_if_present(&node)?;
        symlink(format!("../mapper/{}_{}", vg.name, lv.name), &node)?;

        debug!("Created device node {:?}", node);
        Ok(())
    }

    fn del_lv(&self, vg: &VG, lv: &LV) -> Result<()> {
        let node = self.base.join(&vg.name).join(&lv.name);
        remove_if_present(&node)?;
        debug!("Removed device node {:?}", node);

        // prune the VG directory once its last node is gone
        let _ = fs::remove_dir(self.base.join(&vg.name));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lv::LV;

    fn test_lv(name: &str) -> LV {
        LV {
            name: name.to_string(),
            number: 0,
            access: 0,
            status: 0,
            size: 0,
            allocated_le: 0,
            stripes: 1,
            stripe_size: 0,
            read_ahead: 0,
            io_timeout: 0,
            segments: Vec::new(),
        }
    }

    fn test_vg(name: &str) -> VG {
        VG {
            name: name.to_string(),
            extent_size: 8192,
            pvs: Vec::new(),
            lvs: Vec::new(),
        }
    }

    #[test]
    fn node_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let nodes = DevDir::with_base(dir.path().to_owned());
        let vg = test_vg("vg0");
        let lv = test_lv("home");

        nodes.add_lv(&vg, &lv).unwrap();
        let node = dir.path().join("vg0/home");
        assert_eq!(
            fs::read_link(&node).unwrap(),
            PathBuf::from("../mapper/vg0_home")
        );

        // re-adding replaces the link rather than failing
        nodes.add_lv(&vg, &lv).unwrap();

        nodes.del_lv(&vg, &lv).unwrap();
        assert!(!node.exists());
        assert!(!dir.path().join("vg0").exists());

        // removal is idempotent
        nodes.del_lv(&vg, &lv).unwrap();
    }
}

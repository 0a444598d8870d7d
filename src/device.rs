// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Block-device handles and scanning.

use std::fs::{read_dir, File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, FileTypeExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use log::debug;

use crate::{Error, Result};

pub const SECTOR_SIZE: usize = 512;

// BLKGETSIZE64: size in bytes of a block device.
nix::ioctl_read!(blkgetsize64, 0x12, 114, u64);

/// An open handle on one block device (or, in tests, an image file).
///
/// Reads and writes are positioned and exact-length; a short transfer is
/// an error. The handle is opened read-write when possible, falling back
/// to read-only so that scanning does not require write access.
#[derive(Debug)]
pub struct Device {
    file: File,
    path: PathBuf,
    name: String,
    writable: bool,
}

impl Device {
    pub fn open(path: &Path) -> Result<Device> {
        let (file, writable) = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(f) => (f, true),
            Err(_) => (File::open(path)?, false),
        };

        Ok(Device {
            file,
            name: path.to_string_lossy().into_owned(),
            path: path.to_owned(),
            writable,
        })
    }

    /// A stable human-readable path for log messages and target params.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is open read-only", self.name),
            )));
        }

        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    pub fn zero(&self, offset: u64, len: u64) -> Result<()> {
        let zeroes = [0u8; 8 * SECTOR_SIZE];
        let mut pos = offset;
        let end = offset + len;

        while pos < end {
            let chunk = ((end - pos) as usize).min(zeroes.len());
            self.write_at(pos, &zeroes[..chunk])?;
            pos += chunk as u64;
        }

        Ok(())
    }

    /// Size in bytes: `BLKGETSIZE64` for block devices, file length for
    /// regular files.
    pub fn size_bytes(&self) -> Result<u64> {
        let meta = self.file.metadata()?;
        if !meta.file_type().is_block_device() {
            return Ok(meta.len());
        }

        let mut val: u64 = 0;
        unsafe { blkgetsize64(self.file.as_raw_fd(), &mut val) }?;
        Ok(val)
    }
}

/// Scan a list of directories for block-device nodes.
///
/// Non-block entries are filtered out; unreadable entries are skipped with
/// a log message rather than failing the scan.
pub fn scan_block_devs(dirs: &[&Path]) -> Result<Vec<PathBuf>> {
    let mut ret_vec = Vec::new();

    for dir in dirs {
        for entry in read_dir(dir)? {
            let path = match entry {
                Ok(e) => e.path(),
                Err(e) => {
                    debug!("Skipping unreadable entry in {:?}: {}", dir, e);
                    continue;
                }
            };

            match nix::sys::stat::stat(&path) {
                Ok(st) if (st.st_mode & libc::S_IFMT) == libc::S_IFBLK => ret_vec.push(path),
                Ok(_) => {}
                Err(e) => debug!("Could not stat {:?}: {}", path, e),
            }
        }
    }

    Ok(ret_vec)
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use crate::{Error, Result};

pub fn align_to(num: usize, align_to: usize) -> usize {
    let agn = align_to - 1;

    (num + agn) & !agn
}

//
// Return up to the first \0, or the whole slice
//
pub fn slice_to_null(slc: &[u8]) -> &[u8] {
    for (i, c) in slc.iter().enumerate() {
        if *c == b'\0' {
            return &slc[..i];
        };
    }
    slc
}

/// The printable contents of a fixed-length NUL-terminated name field.
pub fn buf_to_string(buf: &[u8]) -> String {
    String::from_utf8_lossy(slice_to_null(buf)).into_owned()
}

/// Copy `s` into a fixed-length NUL-terminated name field. The field keeps
/// at least one trailing NUL, so `s` must be shorter than the field.
pub fn copy_name(dst: &mut [u8], s: &str) -> Result<()> {
    let src = s.as_bytes();
    if src.len() >= dst.len() {
        return Err(Error::Metadata(format!("name \"{}\" too long", s)));
    }

    dst[..src.len()].copy_from_slice(src);
    for b in dst[src.len()..].iter_mut() {
        *b = b'\0';
    }

    Ok(())
}

pub fn make_uuid() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

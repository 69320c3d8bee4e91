//! Byte-range access to disc/ROM images

// SPDX-FileCopyrightText: © 2023 Marcus Rowe <undisbeliever@gmail.com>
//
// SPDX-License-Identifier: MIT

use crate::errors::SourceError;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// The only I/O this crate consumes: a synchronous byte-range read.
///
/// Sector translation, filesystem lookup and executable loading belong to the
/// caller; the decoders only ever ask for byte ranges.
pub trait SequenceSource {
    fn read(&self, offset: u64, length: usize) -> Result<&[u8], SourceError>;

    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check_range(offset: u64, length: usize, source_length: u64) -> Result<(), SourceError> {
    let end = offset.checked_add(length as u64);
    match end {
        Some(end) if end <= source_length => Ok(()),
        _ => Err(SourceError::ReadPastEndOfSource {
            offset,
            length,
            source_length,
        }),
    }
}

/// In-memory source backed by a byte slice.
pub struct SliceSource<'a> {
    data: &'a [u8],
}

impl<'a> SliceSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl SequenceSource for SliceSource<'_> {
    fn read(&self, offset: u64, length: usize) -> Result<&[u8], SourceError> {
        check_range(offset, length, self.data.len() as u64)?;

        let start = offset as usize;
        Ok(&self.data[start..start + length])
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

/// A whole image loaded once and shared between songs of the same source.
pub struct CachedSource {
    data: Rc<[u8]>,
}

impl SequenceSource for CachedSource {
    fn read(&self, offset: u64, length: usize) -> Result<&[u8], SourceError> {
        check_range(offset, length, self.data.len() as u64)?;

        let start = offset as usize;
        Ok(&self.data[start..start + length])
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Per-path image cache.
///
/// Repeated opens of the same path reuse the already-loaded image instead of
/// re-reading the file (one image is typically decoded song-by-song).
#[derive(Default)]
pub struct SourceCache {
    images: HashMap<PathBuf, Rc<[u8]>>,
}

impl SourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, path: &Path) -> Result<CachedSource, SourceError> {
        if let Some(data) = self.images.get(path) {
            return Ok(CachedSource {
                data: Rc::clone(data),
            });
        }

        let file_name = path
            .file_name()
            .unwrap_or(path.as_os_str())
            .to_string_lossy()
            .to_string();

        let data: Rc<[u8]> = match std::fs::read(path) {
            Ok(bytes) => Rc::from(bytes.into_boxed_slice()),
            Err(e) => return Err(SourceError::OpenError(file_name, e)),
        };

        self.images.insert(path.to_owned(), Rc::clone(&data));

        Ok(CachedSource { data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_source_bounds() {
        let s = SliceSource::new(&[1, 2, 3, 4]);

        assert_eq!(s.read(1, 2).unwrap(), &[2, 3]);
        assert_eq!(s.read(0, 4).unwrap(), &[1, 2, 3, 4]);
        assert!(s.read(3, 2).is_err());
        assert!(s.read(u64::MAX, 1).is_err());
    }
}

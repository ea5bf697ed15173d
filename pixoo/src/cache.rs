/*!
Per-display cache of decoded sources and encoded frames.

Holds one source path at a time. Encoded frames are keyed by
(frame index, sub-index) under that path; loading a different path drops
everything.
*/

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pixoo_codec::{DecodedRaster, EncodedImage};
use tracing::debug;

/// Identifies one frame of one source file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameRef {
    pub path: PathBuf,
    pub index: usize,
    pub sub_index: usize,
}

impl FrameRef {
    pub fn new(path: impl Into<PathBuf>, index: usize) -> Self {
        Self {
            path: path.into(),
            index,
            sub_index: 0,
        }
    }

    /// First frame of a file
    pub fn still(path: impl Into<PathBuf>) -> Self {
        Self::new(path, 0)
    }

    pub fn with_sub_index(mut self, sub_index: usize) -> Self {
        self.sub_index = sub_index;
        self
    }

    fn key(&self) -> (usize, usize) {
        (self.index, self.sub_index)
    }
}

#[derive(Debug, Default)]
pub struct ImageCache {
    path: Option<PathBuf>,
    raster: Option<Arc<DecodedRaster>>,
    encoded: HashMap<(usize, usize), EncodedImage>,
    last: Option<(usize, usize)>,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `path` is the currently cached source
    pub fn holds(&self, path: &Path) -> bool {
        self.path.as_deref() == Some(path)
    }

    /// Replace the cached source, invalidating every encoded frame
    pub fn load(&mut self, path: &Path, raster: DecodedRaster) -> Arc<DecodedRaster> {
        self.reset(path);
        let raster = Arc::new(raster);
        self.raster = Some(Arc::clone(&raster));
        raster
    }

    fn reset(&mut self, path: &Path) {
        debug!("Image cache now holds {}", path.display());
        self.path = Some(path.to_path_buf());
        self.raster = None;
        self.encoded.clear();
        self.last = None;
    }

    /// Decoded source of the cached path, if it came from a file
    pub fn raster(&self) -> Option<Arc<DecodedRaster>> {
        self.raster.clone()
    }

    /// Decoded source for `path` when it is the cached one
    pub fn raster_for(&self, path: &Path) -> Option<Arc<DecodedRaster>> {
        if self.holds(path) {
            self.raster.clone()
        } else {
            None
        }
    }

    /// Cached encoding of `frame`, marking it as the last one used
    pub fn get(&mut self, frame: &FrameRef) -> Option<&EncodedImage> {
        if !self.holds(&frame.path) {
            return None;
        }
        let key = frame.key();
        if self.encoded.contains_key(&key) {
            self.last = Some(key);
        }
        self.encoded.get(&key)
    }

    pub fn insert(&mut self, frame: &FrameRef, image: EncodedImage) {
        if !self.holds(&frame.path) {
            self.reset(&frame.path);
        }
        let key = frame.key();
        self.encoded.insert(key, image);
        self.last = Some(key);
    }

    /// Most recently encoded or fetched frame
    pub fn last(&self) -> Option<&EncodedImage> {
        self.last.and_then(|key| self.encoded.get(&key))
    }

    pub fn len(&self) -> usize {
        self.encoded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoded.is_empty()
    }
}

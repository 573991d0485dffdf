//! Zero-copy byte-range descriptors.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A byte range of a block file, used to forward partition payloads to
/// remote readers without deserializing them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileArea {
    pub path: PathBuf,
    pub offset: u64,
    pub length: u64,
}

impl FileArea {
    pub fn new<P: Into<PathBuf>>(path: P, offset: u64, length: u64) -> Self {
        Self {
            path: path.into(),
            offset,
            length,
        }
    }
}

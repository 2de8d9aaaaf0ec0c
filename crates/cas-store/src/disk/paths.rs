//! On-disk layout.
//!
//! ```text
//! <root>/tmp/<uuid>                  blobs being written
//! <root>/_XY/<remaining 30 hex>      committed blob, XY = first two hex digits
//! ```

use std::path::{Path, PathBuf};

use cas_types::Hash;

/// Directory holding in-progress temp files.
pub const TEMP_DIR: &str = "tmp";

/// Number of hex digits used for the shard directory name.
const SHARD_DIGITS: usize = 2;

pub fn temp_dir(root: &Path) -> PathBuf {
    root.join(TEMP_DIR)
}

/// Fresh, unique temp file path.
pub fn new_temp_path(root: &Path) -> PathBuf {
    temp_dir(root).join(uuid::Uuid::now_v7().simple().to_string())
}

pub fn shard_dir(root: &Path, hash: &Hash) -> PathBuf {
    let hex = hash.to_hex();
    root.join(format!("_{}", &hex[..SHARD_DIGITS]))
}

/// Final location of a committed blob.
pub fn blob_path(root: &Path, hash: &Hash) -> PathBuf {
    let hex = hash.to_hex();
    shard_dir(root, hash).join(&hex[SHARD_DIGITS..])
}

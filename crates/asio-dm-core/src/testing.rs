//! Fixtures shared by the test suites of the workspace crates.

use tempfile::TempDir;

/// A temp dir whose path survives lower-casing.
///
/// Driver descriptors lower-case their module path, so on case-sensitive
/// file systems the on-disk layout must already be lower-case.
///
/// # Panics
/// Panics if no lower-case temp dir can be created.
#[must_use]
pub fn lowercase_tempdir() -> TempDir {
    for _ in 0..1000 {
        let dir = tempfile::Builder::new()
            .prefix("asio-dm-")
            .rand_bytes(3)
            .tempdir()
            .expect("Failed to create temp dir");
        let path = dir.path().to_string_lossy();
        if path == path.to_lowercase() {
            return dir;
        }
    }
    panic!("temp dir base is not lower-case: {}", std::env::temp_dir().display());
}

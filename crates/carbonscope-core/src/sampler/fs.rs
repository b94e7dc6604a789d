//! Filesystem access seam for the pseudo-file readers.
//!
//! Every read of `/proc` or `/sys/class/powercap` goes through the `ProcFs`
//! trait, so readers can run against the real host or against the in-memory
//! [`MockFs`](super::mock::MockFs) fixtures in tests.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// Abstraction over the pseudo-filesystem operations the readers need.
pub trait ProcFs: Send + Sync {
    /// Reads the entire contents of a file as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Lists entries of a directory, symlinks included.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Checks whether a path exists.
    fn exists(&self, path: &Path) -> bool;

    /// Verifies read access without consuming the file contents.
    ///
    /// The probe uses this to classify counters as readable before any
    /// value is sampled.
    fn check_readable(&self, path: &Path) -> io::Result<()>;

    /// Resolves symlinks to the real path.
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;
}

/// Real filesystem implementation delegating to `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl ProcFs for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(path)? {
            paths.push(entry?.path());
        }
        Ok(paths)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn check_readable(&self, path: &Path) -> io::Result<()> {
        File::open(path).map(|_| ())
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::canonicalize(path)
    }
}

//! Shared-state in-memory filesystem for tests.
//!
//! Unlike a plain map-backed mock, clones share one underlying store: the
//! readers hold their own clone, and a test can mutate counter files
//! between ticks (advance an energy counter, remove a pid's stat file) and
//! have every reader observe the change, which is exactly what a
//! delta-based pipeline needs to be testable.

use crate::sampler::fs::ProcFs;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Inner {
    files: HashMap<PathBuf, String>,
    directories: HashSet<PathBuf>,
    denied: HashSet<PathBuf>,
    links: HashMap<PathBuf, PathBuf>,
}

/// In-memory filesystem; `Clone` shares the store.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    inner: Arc<Mutex<Inner>>,
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a file; parent directories are created.
    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();
        let mut inner = self.inner.lock().expect("mock fs poisoned");
        add_parents(&mut inner.directories, &path);
        inner.files.insert(path, content.into());
    }

    /// Adds an empty directory.
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        let mut inner = self.inner.lock().expect("mock fs poisoned");
        add_parents(&mut inner.directories, &path);
        inner.directories.insert(path);
    }

    /// Removes a file, simulating e.g. a target process exiting.
    pub fn remove_file(&self, path: impl AsRef<Path>) {
        let mut inner = self.inner.lock().expect("mock fs poisoned");
        inner.files.remove(path.as_ref());
    }

    /// Marks a path as present but unreadable (permission denied).
    pub fn deny(&self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        let mut inner = self.inner.lock().expect("mock fs poisoned");
        add_parents(&mut inner.directories, &path);
        inner.files.entry(path.clone()).or_default();
        inner.denied.insert(path);
    }

    /// Clears a denial set by [`MockFs::deny`].
    pub fn allow(&self, path: impl AsRef<Path>) {
        let mut inner = self.inner.lock().expect("mock fs poisoned");
        inner.denied.remove(path.as_ref());
    }

    /// Registers a symlink resolution for `canonicalize`.
    pub fn link(&self, path: impl AsRef<Path>, target: impl AsRef<Path>) {
        let mut inner = self.inner.lock().expect("mock fs poisoned");
        inner
            .links
            .insert(path.as_ref().to_path_buf(), target.as_ref().to_path_buf());
    }

    /// Adds a powercap energy domain directory.
    ///
    /// # Arguments
    /// * `root` - powercap root, e.g. "/sys/class/powercap"
    /// * `node` - domain directory name, e.g. "intel-rapl:0"
    /// * `name` - content of the `name` file, e.g. "package-0"
    /// * `energy_uj` - current cumulative counter value
    /// * `max_energy_uj` - wrap limit; omitted file when `None`
    pub fn add_energy_domain(
        &self,
        root: impl AsRef<Path>,
        node: &str,
        name: &str,
        energy_uj: u64,
        max_energy_uj: Option<u64>,
    ) {
        let dir = root.as_ref().join(node);
        self.add_dir(&dir);
        self.add_file(dir.join("name"), format!("{}\n", name));
        self.add_file(dir.join("energy_uj"), format!("{}\n", energy_uj));
        if let Some(max) = max_energy_uj {
            self.add_file(dir.join("max_energy_uj"), format!("{}\n", max));
        }
    }

    /// Overwrites a domain's cumulative counter.
    pub fn set_energy_uj(&self, root: impl AsRef<Path>, node: &str, energy_uj: u64) {
        self.add_file(
            root.as_ref().join(node).join("energy_uj"),
            format!("{}\n", energy_uj),
        );
    }

    /// Writes an aggregate `/proc/stat` with the given eight counters and a
    /// matching pair of per-core lines.
    pub fn set_host_stat(&self, proc_root: impl AsRef<Path>, counters: [u64; 8]) {
        let [user, nice, system, idle, iowait, irq, softirq, steal] = counters;
        let half = counters.map(|c| c / 2);
        let core = |id: usize| {
            format!(
                "cpu{} {} {} {} {} {} {} {} {} 0 0",
                id, half[0], half[1], half[2], half[3], half[4], half[5], half[6], half[7]
            )
        };
        let content = format!(
            "cpu  {} {} {} {} {} {} {} {} 0 0\n{}\n{}\nctxt 500000\nbtime 1700000000\nprocesses 10000\nprocs_running 2\nprocs_blocked 0\n",
            user,
            nice,
            system,
            idle,
            iowait,
            irq,
            softirq,
            steal,
            core(0),
            core(1)
        );
        self.add_file(proc_root.as_ref().join("stat"), content);
    }

    /// Writes a `/proc/<pid>/stat` file with the given activity counters.
    pub fn set_pid_stat(
        &self,
        proc_root: impl AsRef<Path>,
        pid: i32,
        comm: &str,
        utime: u64,
        stime: u64,
        starttime: u64,
    ) {
        let content = format!(
            "{pid} ({comm}) S 1 {pid} {pid} 0 -1 4194304 2500 0 3 0 {utime} {stime} 0 0 20 0 4 0 {starttime} 223455232 1630 18446744073709551615 1 1 0 0 0 0 0 0 0 0 0 0 17 2 0 0 0 0 0 0 0 0 0 0 0 0 0\n"
        );
        self.add_file(
            proc_root.as_ref().join(pid.to_string()).join("stat"),
            content,
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("mock fs poisoned")
    }
}

fn add_parents(directories: &mut HashSet<PathBuf>, path: &Path) {
    let mut parent = path.parent();
    while let Some(p) = parent {
        if !p.as_os_str().is_empty() {
            directories.insert(p.to_path_buf());
        }
        parent = p.parent();
    }
}

fn denied_error(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::PermissionDenied,
        format!("permission denied: {:?}", path),
    )
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("not found: {:?}", path))
}

impl ProcFs for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let inner = self.lock();
        if inner.denied.contains(path) {
            return Err(denied_error(path));
        }
        inner
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let inner = self.lock();
        if !inner.directories.contains(path) {
            return Err(not_found(path));
        }

        let mut entries = HashSet::new();
        for file in inner.files.keys() {
            if file.parent().is_some_and(|parent| parent == path) {
                entries.insert(file.clone());
            }
        }
        for dir in &inner.directories {
            if dir.parent().is_some_and(|parent| parent == path) && dir != path {
                entries.insert(dir.clone());
            }
        }
        Ok(entries.into_iter().collect())
    }

    fn exists(&self, path: &Path) -> bool {
        let inner = self.lock();
        inner.files.contains_key(path) || inner.directories.contains(path)
    }

    fn check_readable(&self, path: &Path) -> io::Result<()> {
        let inner = self.lock();
        if inner.denied.contains(path) {
            return Err(denied_error(path));
        }
        if inner.files.contains_key(path) {
            Ok(())
        } else {
            Err(not_found(path))
        }
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        let inner = self.lock();
        if let Some(target) = inner.links.get(path) {
            return Ok(target.clone());
        }
        if inner.files.contains_key(path) || inner.directories.contains(path) {
            Ok(path.to_path_buf())
        } else {
            Err(not_found(path))
        }
    }
}

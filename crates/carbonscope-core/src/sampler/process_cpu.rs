//! Active-tick deltas for the audited process from `/proc/<pid>/stat`.
//!
//! The reader tracks `utime + stime` and the process `starttime`. A change
//! in `starttime` means the pid was recycled: state resets and the tick
//! reports a zero, unprimed delta instead of diffing across two different
//! processes.

use crate::error::{AuditError, INVALID_FILE_CONTENT, canonical_kind};
use crate::sampler::fs::ProcFs;
use crate::sampler::parser::parse_pid_stat;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One process CPU sample.
#[derive(Debug, Clone)]
pub struct ProcessCpuSample {
    pub ok: bool,
    pub primed: bool,
    pub pid: i32,
    /// `utime + stime` jiffies consumed since the previous sample.
    pub delta_active: u64,
    pub error: Option<String>,
}

/// Clamp-free prime-then-diff reader for one target process.
#[derive(Debug)]
pub struct ProcessCpuReader<F: ProcFs> {
    fs: F,
    pid: i32,
    path: PathBuf,
    last_app_ticks: Option<u64>,
    last_start_ticks: Option<u64>,
}

impl<F: ProcFs> ProcessCpuReader<F> {
    /// Reader over `<proc_root>/<pid>/stat`.
    pub fn new(fs: F, proc_root: &Path, pid: i32) -> Result<Self, AuditError> {
        if pid <= 0 {
            return Err(AuditError::InvalidPid(pid));
        }
        let path = proc_root.join(pid.to_string()).join("stat");
        Ok(Self {
            fs,
            pid,
            path,
            last_app_ticks: None,
            last_start_ticks: None,
        })
    }

    /// Reader over an explicit stat-file path.
    ///
    /// The path must embed the same pid (`.../<pid>/stat`); a mismatch is a
    /// configuration error.
    pub fn with_stat_path(fs: F, pid: i32, path: PathBuf) -> Result<Self, AuditError> {
        if pid <= 0 {
            return Err(AuditError::InvalidPid(pid));
        }
        let embedded = path
            .file_name()
            .filter(|name| *name == "stat")
            .and_then(|_| path.parent())
            .and_then(|dir| dir.file_name())
            .and_then(|name| name.to_str())
            .and_then(|name| name.parse::<i32>().ok());
        if embedded != Some(pid) {
            return Err(AuditError::PidMismatch { path, pid });
        }
        Ok(Self {
            fs,
            pid,
            path,
            last_app_ticks: None,
            last_start_ticks: None,
        })
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Samples the target process once.
    ///
    /// A missing stat file (the common sign the target exited) is not
    /// fatal: the sample carries `ok = false` and the canonical reason.
    pub fn sample(&mut self) -> ProcessCpuSample {
        let content = match self.fs.read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) => {
                return self.failed(canonical_kind(&err));
            }
        };
        let stat = match parse_pid_stat(&content) {
            Ok(stat) => stat,
            Err(_) => return self.failed(INVALID_FILE_CONTENT.to_string()),
        };

        let current_app_ticks = stat.active_ticks();
        let current_start = stat.starttime;

        match self.last_start_ticks {
            None => {
                self.last_app_ticks = Some(current_app_ticks);
                self.last_start_ticks = Some(current_start);
                self.unprimed()
            }
            Some(last_start) if last_start != current_start => {
                debug!(
                    pid = self.pid,
                    last_start, current_start, "process restart detected, resetting baseline"
                );
                self.last_app_ticks = Some(current_app_ticks);
                self.last_start_ticks = Some(current_start);
                self.unprimed()
            }
            Some(_) => {
                let last = self.last_app_ticks.unwrap_or(current_app_ticks);
                let delta_active = current_app_ticks.saturating_sub(last);
                self.last_app_ticks = Some(current_app_ticks);
                ProcessCpuSample {
                    ok: true,
                    primed: true,
                    pid: self.pid,
                    delta_active,
                    error: None,
                }
            }
        }
    }

    fn unprimed(&self) -> ProcessCpuSample {
        ProcessCpuSample {
            ok: true,
            primed: false,
            pid: self.pid,
            delta_active: 0,
            error: None,
        }
    }

    fn failed(&self, error: String) -> ProcessCpuSample {
        ProcessCpuSample {
            ok: false,
            primed: false,
            pid: self.pid,
            delta_active: 0,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::mock::MockFs;

    fn reader(fs: &MockFs, pid: i32) -> ProcessCpuReader<MockFs> {
        ProcessCpuReader::new(fs.clone(), Path::new("/proc"), pid).unwrap()
    }

    #[test]
    fn test_rejects_non_positive_pid() {
        let fs = MockFs::new();
        let err = ProcessCpuReader::new(fs.clone(), Path::new("/proc"), 0).unwrap_err();
        assert_eq!(err.kind(), "invalid_pid");
        let err = ProcessCpuReader::new(fs, Path::new("/proc"), -4).unwrap_err();
        assert_eq!(err.kind(), "invalid_pid");
    }

    #[test]
    fn test_explicit_path_pid_match() {
        let fs = MockFs::new();
        let ok = ProcessCpuReader::with_stat_path(
            fs.clone(),
            4242,
            PathBuf::from("/proc/4242/stat"),
        );
        assert!(ok.is_ok());

        let err = ProcessCpuReader::with_stat_path(
            fs.clone(),
            4242,
            PathBuf::from("/proc/9999/stat"),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "pid_mismatch");

        let err = ProcessCpuReader::with_stat_path(
            fs,
            4242,
            PathBuf::from("/proc/4242/status"),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "pid_mismatch");
    }

    #[test]
    fn test_priming_then_delta() {
        let fs = MockFs::new();
        fs.set_pid_stat("/proc", 4242, "worker", 100, 20, 5000);
        let mut reader = reader(&fs, 4242);

        let first = reader.sample();
        assert!(first.ok);
        assert!(!first.primed);
        assert_eq!(first.delta_active, 0);

        fs.set_pid_stat("/proc", 4242, "worker", 130, 27, 5000);
        let second = reader.sample();
        assert!(second.ok && second.primed);
        assert_eq!(second.delta_active, 37);
    }

    #[test]
    fn test_restart_resets_baseline() {
        let fs = MockFs::new();
        fs.set_pid_stat("/proc", 4242, "worker", 500, 100, 5000);
        let mut reader = reader(&fs, 4242);
        reader.sample();

        // pid recycled: fresh process with small counters, new starttime
        fs.set_pid_stat("/proc", 4242, "worker", 3, 1, 7777);
        let restart = reader.sample();
        assert!(restart.ok);
        assert!(!restart.primed);
        assert_eq!(restart.delta_active, 0);

        // deltas resume from the post-restart baseline
        fs.set_pid_stat("/proc", 4242, "worker", 13, 3, 7777);
        let resumed = reader.sample();
        assert!(resumed.primed);
        assert_eq!(resumed.delta_active, 12);
    }

    #[test]
    fn test_counter_regression_clamps_to_zero() {
        let fs = MockFs::new();
        fs.set_pid_stat("/proc", 4242, "worker", 100, 50, 5000);
        let mut reader = reader(&fs, 4242);
        reader.sample();
        fs.set_pid_stat("/proc", 4242, "worker", 110, 55, 5000);
        reader.sample();

        // same process, counters jump backwards (should not happen, but
        // must never go negative)
        fs.set_pid_stat("/proc", 4242, "worker", 90, 40, 5000);
        let sample = reader.sample();
        assert!(sample.primed);
        assert_eq!(sample.delta_active, 0);
    }

    #[test]
    fn test_exited_process_reports_file_not_found() {
        let fs = MockFs::new();
        fs.set_pid_stat("/proc", 4242, "worker", 100, 20, 5000);
        let mut reader = reader(&fs, 4242);
        reader.sample();

        fs.remove_file("/proc/4242/stat");
        let sample = reader.sample();
        assert!(!sample.ok);
        assert_eq!(sample.error.as_deref(), Some("file_not_found"));
        assert_eq!(sample.delta_active, 0);
    }

    #[test]
    fn test_malformed_stat_is_invalid_content() {
        let fs = MockFs::new();
        fs.add_file("/proc/4242/stat", "gibberish");
        let mut reader = reader(&fs, 4242);

        let sample = reader.sample();
        assert!(!sample.ok);
        assert_eq!(sample.error.as_deref(), Some(INVALID_FILE_CONTENT));
    }

    #[test]
    fn test_comm_with_whitespace_survives() {
        let fs = MockFs::new();
        fs.set_pid_stat("/proc", 4242, "Web Content", 10, 5, 5000);
        let mut reader = reader(&fs, 4242);

        let sample = reader.sample();
        assert!(sample.ok);
    }
}

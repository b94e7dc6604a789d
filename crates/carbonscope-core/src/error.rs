//! Error taxonomy for the audit pipeline.
//!
//! Two families exist and are handled very differently:
//!
//! - **Configuration / programmer errors** (`AuditError`) abort immediately:
//!   bad PID, bad period, unusable energy source, double finalisation.
//! - **Transient I/O failures** never abort the audit loop. They degrade a
//!   tick's contribution to zero and are counted; their native codes are
//!   mapped to canonical kind strings by [`canonical_kind`], the single
//!   place that inspects `std::io::Error`.

use std::io;
use std::path::PathBuf;

/// Fatal errors: invalid configuration or misuse of the pipeline.
#[derive(Debug)]
pub enum AuditError {
    /// PID is zero, negative, or below the controller's floor of 2.
    InvalidPid(i32),
    /// An explicit stat-file path embeds a different PID than the one audited.
    PidMismatch { path: PathBuf, pid: i32 },
    /// Scheduler period is non-finite or not strictly positive.
    InvalidPeriod(f64),
    /// Audit duration is non-finite or not strictly positive.
    InvalidDuration(f64),
    /// Emission factor is negative or non-finite.
    InvalidEmissionFactor(f64),
    /// Neither hardware counters nor the empirical model are usable.
    EnergySourceUnavailable,
    /// The accumulator was finalised a second time.
    AlreadyFinalised,
}

impl AuditError {
    /// Canonical kind string for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            AuditError::InvalidPid(_) => "invalid_pid",
            AuditError::PidMismatch { .. } => "pid_mismatch",
            AuditError::InvalidPeriod(_) => "invalid_period",
            AuditError::InvalidDuration(_) => "invalid_duration",
            AuditError::InvalidEmissionFactor(_) => "invalid_emission_factor",
            AuditError::EnergySourceUnavailable => "energy_source_unavailable",
            AuditError::AlreadyFinalised => "already_finalised",
        }
    }
}

impl std::fmt::Display for AuditError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditError::InvalidPid(pid) => write!(f, "invalid pid {}", pid),
            AuditError::PidMismatch { path, pid } => {
                write!(f, "stat path {:?} does not belong to pid {}", path, pid)
            }
            AuditError::InvalidPeriod(ms) => {
                write!(f, "tick period must be finite and positive, got {} ms", ms)
            }
            AuditError::InvalidDuration(s) => {
                write!(f, "duration must be finite and positive, got {} s", s)
            }
            AuditError::InvalidEmissionFactor(g) => {
                write!(f, "emission factor must be non-negative, got {} g/kWh", g)
            }
            AuditError::EnergySourceUnavailable => {
                write!(
                    f,
                    "no usable energy source: hardware counters absent and empirical model not configured"
                )
            }
            AuditError::AlreadyFinalised => write!(f, "accumulator already finalised"),
        }
    }
}

impl std::error::Error for AuditError {}

/// Maps a native I/O error to its canonical kind string.
///
/// Readers never branch on the native code directly; everything funnels
/// through this table. Unknown kinds fall back to the lowercased name of
/// the original code.
pub fn canonical_kind(err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::PermissionDenied => {
            // EPERM and EACCES both surface as PermissionDenied; the raw
            // OS code tells them apart.
            if err.raw_os_error() == Some(1) {
                "operation_not_permitted".to_string()
            } else {
                "permission_denied".to_string()
            }
        }
        io::ErrorKind::NotFound => "file_not_found".to_string(),
        io::ErrorKind::NotADirectory => "not_a_directory".to_string(),
        io::ErrorKind::FilesystemLoop => "symlink_loop".to_string(),
        io::ErrorKind::InvalidData => "invalid_file_content".to_string(),
        other => format!("{:?}", other).to_lowercase(),
    }
}

/// Canonical kind for a malformed or empty pseudo-file.
pub const INVALID_FILE_CONTENT: &str = "invalid_file_content";

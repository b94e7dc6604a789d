//! Discovery of CPU-package energy domains under the kernel powercap tree.
//!
//! Runs once at audit start. The walk itself never fails: filesystem
//! trouble is folded into the structured [`ProbeReport`] so the energy
//! reader can decide between hardware mode and the empirical fallback.

use crate::error::canonical_kind;
use crate::sampler::fs::ProcFs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default location of the kernel powercap hierarchy.
pub const DEFAULT_POWERCAP_ROOT: &str = "/sys/class/powercap";

/// Substring of the `name` file identifying a package-level domain.
const PACKAGE_MARKER: &str = "package-";

/// Outcome class of a probe run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    /// At least one package found and at least one counter is readable.
    Ok,
    /// Packages found, but no counter is readable.
    Degraded,
    /// Root unreadable or no package domain at all.
    Failed,
}

/// CPU vendor guessed from the domain directory name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    Intel,
    Amd,
    Unknown,
}

impl Vendor {
    fn classify(node: &str) -> Self {
        if node.starts_with("intel-rapl") {
            Vendor::Intel
        } else if node.starts_with("amd-rapl") {
            Vendor::Amd
        } else {
            Vendor::Unknown
        }
    }
}

/// One discovered package-level energy domain.
#[derive(Debug, Clone)]
pub struct PackageProbe {
    /// Domain directory name, e.g. `intel-rapl:0`.
    pub node: String,
    /// Trimmed content of the `name` file, e.g. `package-0`.
    pub name: String,
    /// Real path of the cumulative counter (symlinks resolved), falling
    /// back to the nominal path when resolution fails.
    pub energy_path: PathBuf,
    /// Whether the counter passed the read-access check.
    pub readable: bool,
    /// Reason the counter is unreadable, canonical kind.
    pub reason: Option<String>,
    /// Counter wrap limit in microjoules, when exported.
    pub max_energy_uj: Option<u64>,
    pub vendor: Vendor,
}

/// Structured probe result.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub status: ProbeStatus,
    pub packages: Vec<PackageProbe>,
    /// Human-oriented diagnostic for non-Ok outcomes.
    pub hint: Option<String>,
}

impl ProbeReport {
    pub fn is_ok(&self) -> bool {
        self.status == ProbeStatus::Ok
    }
}

/// Walks `root` and reports every package-level energy domain.
///
/// Immediate subdirectories (or symlinks) whose `name` file contains
/// `"package-"` are included; core/uncore/psys sub-domains are not. The
/// counter file is checked for read access but its value is not consumed
/// here; priming belongs to the energy reader.
pub fn probe_packages<F: ProcFs>(fs: &F, root: &Path) -> ProbeReport {
    let entries = match fs.read_dir(root) {
        Ok(entries) => entries,
        Err(err) => {
            let kind = canonical_kind(&err);
            warn!(root = %root.display(), kind = %kind, "powercap root unreadable");
            return ProbeReport {
                status: ProbeStatus::Failed,
                packages: Vec::new(),
                hint: Some(format!(
                    "powercap root {} unreadable ({})",
                    root.display(),
                    kind
                )),
            };
        }
    };

    let mut packages = Vec::new();
    for entry in entries {
        let Some(node) = entry.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Ok(name) = fs.read_to_string(&entry.join("name")) else {
            continue;
        };
        let name = name.trim().to_string();
        if !name.contains(PACKAGE_MARKER) {
            continue;
        }

        let nominal = entry.join("energy_uj");
        let (readable, reason) = match fs.check_readable(&nominal) {
            Ok(()) => (true, None),
            Err(err) => (false, Some(canonical_kind(&err))),
        };

        let max_energy_uj = fs
            .read_to_string(&entry.join("max_energy_uj"))
            .ok()
            .and_then(|content| content.trim().parse::<u64>().ok());

        let energy_path = fs.canonicalize(&nominal).unwrap_or(nominal);

        packages.push(PackageProbe {
            node: node.to_string(),
            name,
            energy_path,
            readable,
            reason,
            max_energy_uj,
            vendor: Vendor::classify(node),
        });
    }

    // read_dir order is not stable; keep package order deterministic.
    packages.sort_by(|a, b| a.node.cmp(&b.node));

    let report = if packages.is_empty() {
        ProbeReport {
            status: ProbeStatus::Failed,
            packages,
            hint: Some(format!(
                "no package-level energy domain under {}",
                root.display()
            )),
        }
    } else if packages.iter().any(|p| p.readable) {
        ProbeReport {
            status: ProbeStatus::Ok,
            packages,
            hint: None,
        }
    } else {
        let reason = packages
            .iter()
            .find_map(|p| p.reason.clone())
            .unwrap_or_else(|| "permission_denied".to_string());
        ProbeReport {
            status: ProbeStatus::Degraded,
            packages,
            hint: Some(format!(
                "energy counters found but none readable ({}); retry with elevated privileges",
                reason
            )),
        }
    };

    debug!(
        status = ?report.status,
        packages = report.packages.len(),
        "powercap probe complete"
    );
    report
}

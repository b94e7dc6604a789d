//! Pre-built mock filesystem scenarios.
//!
//! Each scenario is a self-consistent host state: a powercap tree, an
//! aggregate `/proc/stat`, and one candidate target process (pid 4242).

use super::filesystem::MockFs;

/// Default powercap root used by the scenarios.
pub const POWERCAP_ROOT: &str = "/sys/class/powercap";

/// Default proc root used by the scenarios.
pub const PROC_ROOT: &str = "/proc";

/// Target process present in every scenario that has a `/proc`.
pub const SCENARIO_PID: i32 = 4242;

impl MockFs {
    /// Dual-socket Intel workstation with readable RAPL counters.
    ///
    /// Packages `intel-rapl:0` / `intel-rapl:1` wrap at 20 000 000 µJ and
    /// start at 5 000 000 / 8 000 000 µJ. Sub-domains (`core`, `psys`) are
    /// present and must be ignored by the probe.
    pub fn rapl_workstation() -> Self {
        let fs = Self::new();

        fs.add_energy_domain(
            POWERCAP_ROOT,
            "intel-rapl:0",
            "package-0",
            5_000_000,
            Some(20_000_000),
        );
        fs.add_energy_domain(
            POWERCAP_ROOT,
            "intel-rapl:1",
            "package-1",
            8_000_000,
            Some(20_000_000),
        );
        // Non-package domains the probe must skip.
        fs.add_energy_domain(
            POWERCAP_ROOT,
            "intel-rapl:0:0",
            "core",
            2_000_000,
            Some(20_000_000),
        );
        fs.add_energy_domain(POWERCAP_ROOT, "intel-rapl:1:1", "uncore", 100_000, None);

        fs.set_host_stat(PROC_ROOT, [10_000, 500, 3_000, 80_000, 1_000, 200, 100, 0]);
        fs.set_pid_stat(PROC_ROOT, SCENARIO_PID, "stress-ng", 120, 40, 98_765);
        fs
    }

    /// Counters exist but are root-only: the canonical DEGRADED probe.
    pub fn rapl_locked_down() -> Self {
        let fs = Self::rapl_workstation();
        fs.deny(format!("{}/intel-rapl:0/energy_uj", POWERCAP_ROOT));
        fs.deny(format!("{}/intel-rapl:1/energy_uj", POWERCAP_ROOT));
        fs
    }

    /// Virtualised host without any powercap hierarchy.
    pub fn headless_vm() -> Self {
        let fs = Self::new();
        fs.set_host_stat(PROC_ROOT, [4_000, 0, 1_200, 94_000, 400, 50, 30, 320]);
        fs.set_pid_stat(PROC_ROOT, SCENARIO_PID, "java", 800, 200, 12_345);
        fs
    }

    /// AMD host with a single readable package counter.
    pub fn amd_single_socket() -> Self {
        let fs = Self::new();
        fs.add_energy_domain(
            POWERCAP_ROOT,
            "amd-rapl:0",
            "package-0",
            1_000_000,
            Some(65_532_610_987),
        );
        fs.set_host_stat(PROC_ROOT, [20_000, 100, 5_000, 70_000, 2_000, 500, 400, 0]);
        fs.set_pid_stat(PROC_ROOT, SCENARIO_PID, "ffmpeg", 5_000, 1_500, 54_321);
        fs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::fs::ProcFs;
    use std::path::Path;

    #[test]
    fn test_rapl_workstation_layout() {
        let fs = MockFs::rapl_workstation();

        assert!(fs.exists(Path::new("/sys/class/powercap/intel-rapl:0/energy_uj")));
        assert!(fs.exists(Path::new("/sys/class/powercap/intel-rapl:1/max_energy_uj")));
        assert!(fs.exists(Path::new("/proc/stat")));
        assert!(fs.exists(Path::new("/proc/4242/stat")));

        let name = fs
            .read_to_string(Path::new("/sys/class/powercap/intel-rapl:0/name"))
            .unwrap();
        assert_eq!(name.trim(), "package-0");
    }

    #[test]
    fn test_locked_down_denies_counters() {
        let fs = MockFs::rapl_locked_down();
        assert!(
            fs.check_readable(Path::new("/sys/class/powercap/intel-rapl:0/energy_uj"))
                .is_err()
        );
        // name files stay readable so the packages are still discoverable
        assert!(
            fs.check_readable(Path::new("/sys/class/powercap/intel-rapl:0/name"))
                .is_ok()
        );
    }

    #[test]
    fn test_headless_vm_has_no_powercap() {
        let fs = MockFs::headless_vm();
        assert!(!fs.exists(Path::new("/sys/class/powercap")));
        assert!(fs.exists(Path::new("/proc/stat")));
    }
}

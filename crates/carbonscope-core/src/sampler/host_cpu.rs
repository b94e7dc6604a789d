//! Whole-host CPU activity deltas from the aggregate `/proc/stat` line.

use crate::error::{INVALID_FILE_CONTENT, canonical_kind};
use crate::sampler::fs::ProcFs;
use crate::sampler::parser::parse_host_stat;
use crate::sampler::{clamp_dt_s, counter_delta};
use std::path::PathBuf;
use tracing::debug;

/// Per-tick jiffy deltas of the aggregate cpu line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostTickDeltas {
    pub delta_active: u64,
    pub delta_idle: u64,
    pub delta_total: u64,
}

/// One host CPU sample.
#[derive(Debug, Clone)]
pub struct HostCpuSample {
    pub ok: bool,
    pub primed: bool,
    pub clamped_dt_s: f64,
    pub ticks: HostTickDeltas,
    /// `delta_active / delta_total`, clamped to `[0, 1]`.
    pub utilisation: f64,
    pub error: Option<String>,
}

impl HostCpuSample {
    fn failed(error: String) -> Self {
        Self {
            ok: false,
            primed: false,
            clamped_dt_s: 0.0,
            ticks: HostTickDeltas::default(),
            utilisation: 0.0,
            error: Some(error),
        }
    }
}

/// Clamp-then-diff reader over the aggregate `/proc/stat` counters.
pub struct HostCpuReader<F: ProcFs> {
    fs: F,
    path: PathBuf,
    last: Option<(u64, u64)>, // (grand_total, idle_total)
    last_ns: Option<u64>,
}

impl<F: ProcFs> HostCpuReader<F> {
    pub fn new(fs: F, path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            path: path.into(),
            last: None,
            last_ns: None,
        }
    }

    /// Samples the host counters at `now_ns`.
    ///
    /// Failures are folded into the sample (`ok = false`); baselines are
    /// left untouched so the next success diffs across the gap under the
    /// dt clamp.
    pub fn sample(&mut self, now_ns: u64) -> HostCpuSample {
        let content = match self.fs.read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) => return HostCpuSample::failed(canonical_kind(&err)),
        };
        let stat = match parse_host_stat(&content) {
            Ok(stat) => stat,
            Err(_) => return HostCpuSample::failed(INVALID_FILE_CONTENT.to_string()),
        };
        let Some(aggregate) = stat.aggregate() else {
            return HostCpuSample::failed(INVALID_FILE_CONTENT.to_string());
        };

        let grand = aggregate.grand_total();
        let idle = aggregate.idle_total();

        let dt_s = match self.last_ns {
            Some(last_ns) => clamp_dt_s((now_ns.saturating_sub(last_ns)) as f64 / 1e9),
            None => 0.0,
        };
        self.last_ns = Some(now_ns);

        let Some((prev_grand, prev_idle)) = self.last.replace((grand, idle)) else {
            return HostCpuSample {
                ok: true,
                primed: false,
                clamped_dt_s: dt_s,
                ticks: HostTickDeltas::default(),
                utilisation: 0.0,
                error: None,
            };
        };

        let delta_total = counter_delta(grand, prev_grand);
        let (ticks, utilisation) = if delta_total == 0 {
            (HostTickDeltas::default(), 0.0)
        } else {
            let delta_idle = counter_delta(idle, prev_idle).min(delta_total);
            let delta_active = delta_total - delta_idle;
            let utilisation = (delta_active as f64 / delta_total as f64).clamp(0.0, 1.0);
            (
                HostTickDeltas {
                    delta_active,
                    delta_idle,
                    delta_total,
                },
                utilisation,
            )
        };

        debug!(
            delta_total,
            utilisation = format_args!("{:.3}", utilisation),
            "host cpu sample"
        );

        HostCpuSample {
            ok: true,
            primed: true,
            clamped_dt_s: dt_s,
            ticks,
            utilisation,
            error: None,
        }
    }
}

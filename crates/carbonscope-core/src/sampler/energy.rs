//! Host CPU energy deltas, from hardware counters or an empirical model.
//!
//! Mode is fixed at construction from the probe result: a usable probe
//! selects hardware mode over the package counters; otherwise a
//! sufficiently configured empirical model estimates power from host
//! utilisation. With neither, the reader is not ready and the audit
//! refuses to start.

use crate::error::AuditError;
use crate::sampler::fs::ProcFs;
use crate::sampler::host_cpu::HostCpuReader;
use crate::sampler::probe::ProbeReport;
use crate::sampler::clamp_dt_s;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default idle power as a fraction of TDP.
pub const DEFAULT_IDLE_FRACTION: f64 = 0.07;

/// Default full-load package power as a fraction of TDP.
pub const DEFAULT_MAX_FRACTION: f64 = 0.55;

/// Empirical power model configuration for hosts without usable counters.
///
/// Sufficient when either `p_idle_w`/`p_max_w` are both set (recommended),
/// or `tdp_w` is set and the fractions derive the two endpoints.
#[derive(Debug, Clone)]
pub struct EmpiricalPower {
    pub p_idle_w: Option<f64>,
    pub p_max_w: Option<f64>,
    pub tdp_w: Option<f64>,
    pub idle_fraction: f64,
    pub max_fraction: f64,
}

impl Default for EmpiricalPower {
    fn default() -> Self {
        Self {
            p_idle_w: None,
            p_max_w: None,
            tdp_w: None,
            idle_fraction: DEFAULT_IDLE_FRACTION,
            max_fraction: DEFAULT_MAX_FRACTION,
        }
    }
}

impl EmpiricalPower {
    /// Explicit idle/max watts.
    pub fn from_watts(p_idle_w: f64, p_max_w: f64) -> Self {
        Self {
            p_idle_w: Some(p_idle_w),
            p_max_w: Some(p_max_w),
            ..Self::default()
        }
    }

    /// TDP with the default fractions.
    pub fn from_tdp(tdp_w: f64) -> Self {
        Self {
            tdp_w: Some(tdp_w),
            ..Self::default()
        }
    }

    /// Resolves to `(p_idle_w, p_max_w)` when the configuration is usable.
    pub fn resolve(&self) -> Option<(f64, f64)> {
        if let (Some(idle), Some(max)) = (self.p_idle_w, self.p_max_w)
            && idle > 0.0
            && max >= idle
        {
            return Some((idle, max));
        }
        if let Some(tdp) = self.tdp_w
            && tdp > 0.0
        {
            return Some((tdp * self.idle_fraction, tdp * self.max_fraction));
        }
        None
    }
}

/// Per-package contribution to one energy sample.
#[derive(Debug, Clone)]
pub struct PackageDelta {
    pub node: String,
    pub delta_uj: u64,
    pub wraps: u32,
    pub ok: bool,
}

/// One energy sample.
#[derive(Debug, Clone)]
pub struct EnergySample {
    /// At least one package read succeeded (always true in fallback mode
    /// when the cpu sub-sample succeeded).
    pub ok: bool,
    /// A prior successful read exists, so the delta is meaningful.
    pub primed: bool,
    pub clamped_dt_s: f64,
    pub delta_uj: u64,
    pub delta_j: f64,
    /// Counter wrap-arounds detected this tick.
    pub wraps: u32,
    pub packages: Vec<PackageDelta>,
}

struct PackageState {
    node: String,
    path: PathBuf,
    wrap_limit: Option<u64>,
    last_uj: Option<u64>,
}

enum Mode<F: ProcFs> {
    Hardware { packages: Vec<PackageState> },
    Fallback { p_idle_w: f64, p_max_w: f64, cpu: HostCpuReader<F> },
    NotReady,
}

/// Per-tick host energy reader. Not re-entrant; one outstanding `sample`
/// call at a time.
pub struct EnergyReader<F: ProcFs> {
    fs: F,
    mode: Mode<F>,
    last_ns: Option<u64>,
}

impl<F: ProcFs + Clone> EnergyReader<F> {
    /// Selects the mode from the probe result and the empirical config.
    ///
    /// `stat_path` is the host stat file the fallback model samples for
    /// utilisation.
    pub fn new(fs: F, probe: &ProbeReport, power: &EmpiricalPower, stat_path: &Path) -> Self {
        let mode = if probe.is_ok() {
            let packages = probe
                .packages
                .iter()
                .map(|p| PackageState {
                    node: p.node.clone(),
                    path: p.energy_path.clone(),
                    wrap_limit: p.max_energy_uj,
                    last_uj: None,
                })
                .collect();
            Mode::Hardware { packages }
        } else if let Some((p_idle_w, p_max_w)) = power.resolve() {
            debug!(p_idle_w, p_max_w, "energy reader in empirical mode");
            Mode::Fallback {
                p_idle_w,
                p_max_w,
                cpu: HostCpuReader::new(fs.clone(), stat_path),
            }
        } else {
            warn!("no hardware counters and no empirical model; energy reader not ready");
            Mode::NotReady
        };

        Self {
            fs,
            mode,
            last_ns: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        !matches!(self.mode, Mode::NotReady)
    }

    /// Name of the active energy source, for the report meta block.
    pub fn source_name(&self) -> &'static str {
        match self.mode {
            Mode::Hardware { .. } => "rapl",
            Mode::Fallback { .. } => "empirical",
            Mode::NotReady => "unavailable",
        }
    }

    /// Takes one sample at monotone time `now_ns`.
    pub fn sample(&mut self, now_ns: u64) -> Result<EnergySample, AuditError> {
        match &mut self.mode {
            Mode::NotReady => Err(AuditError::EnergySourceUnavailable),
            Mode::Fallback { p_idle_w, p_max_w, cpu } => {
                let sub = cpu.sample(now_ns);
                let (delta_j, primed) = if sub.ok && sub.primed {
                    let power_w = *p_idle_w + (*p_max_w - *p_idle_w) * sub.utilisation;
                    (power_w * sub.clamped_dt_s, true)
                } else {
                    (0.0, false)
                };
                Ok(EnergySample {
                    ok: sub.ok,
                    primed,
                    clamped_dt_s: sub.clamped_dt_s,
                    delta_uj: (delta_j * 1e6) as u64,
                    delta_j,
                    wraps: 0,
                    packages: Vec::new(),
                })
            }
            Mode::Hardware { packages } => {
                let primed = packages.iter().any(|p| p.last_uj.is_some());
                let dt_s = match self.last_ns {
                    Some(last_ns) => clamp_dt_s((now_ns.saturating_sub(last_ns)) as f64 / 1e9),
                    None => 0.0,
                };
                self.last_ns = Some(now_ns);

                let mut total_uj: u64 = 0;
                let mut total_wraps: u32 = 0;
                let mut any_ok = false;
                let mut deltas = Vec::with_capacity(packages.len());

                for pkg in packages.iter_mut() {
                    let current = match read_counter(&self.fs, &pkg.path) {
                        Some(value) => value,
                        None => {
                            // leave last_uj untouched; the counter may come back
                            deltas.push(PackageDelta {
                                node: pkg.node.clone(),
                                delta_uj: 0,
                                wraps: 0,
                                ok: false,
                            });
                            continue;
                        }
                    };
                    any_ok = true;

                    let (delta_uj, wraps) = match pkg.last_uj {
                        None => (0, 0),
                        Some(last) if current >= last => (current - last, 0),
                        Some(last) => match pkg.wrap_limit {
                            Some(limit) => (limit.saturating_sub(last) + current, 1),
                            None => (0, 0),
                        },
                    };
                    pkg.last_uj = Some(current);

                    total_uj += delta_uj;
                    total_wraps += wraps;
                    deltas.push(PackageDelta {
                        node: pkg.node.clone(),
                        delta_uj,
                        wraps,
                        ok: true,
                    });
                }

                let (delta_uj, delta_j) = if primed {
                    (total_uj, total_uj as f64 / 1e6)
                } else {
                    (0, 0.0)
                };

                if !any_ok {
                    warn!("no energy counter readable this tick");
                }

                Ok(EnergySample {
                    ok: any_ok,
                    primed,
                    clamped_dt_s: dt_s,
                    delta_uj,
                    delta_j,
                    wraps: total_wraps,
                    packages: deltas,
                })
            }
        }
    }
}

fn read_counter<F: ProcFs>(fs: &F, path: &Path) -> Option<u64> {
    fs.read_to_string(path)
        .ok()
        .and_then(|content| content.trim().parse::<u64>().ok())
}

//! Accumulation and energy attribution.
//!
//! Attribution is ticks-ratio weighted: jiffies are the only per-process
//! signal, so the process is charged `process_ticks / host_ticks` of the
//! host energy summed over the same window. Aggregating both over the
//! window smooths jiffy quantisation without breaking conservation: the
//! attributed energy never exceeds the host energy of the window.

use crate::error::AuditError;
use crate::report::{AuditMeta, AuditReport, EndReason};
use crate::sampler::{EnergySample, HostCpuSample, ProcessCpuSample};
use crate::scheduler::Tick;
use serde::Serialize;
use std::collections::VecDeque;

/// Joules per kilowatt-hour.
pub const JOULES_PER_KWH: f64 = 3_600_000.0;

/// Default grid carbon intensity, grams CO₂e per kWh.
pub const DEFAULT_EMISSION_FACTOR_G_PER_KWH: f64 = 475.0;

/// Default sliding-window capacity, in samples.
pub const DEFAULT_WINDOW_CAPACITY: usize = 10;

/// Converts joules to grams of CO₂-equivalent.
pub fn carbon_gco2e(energy_j: f64, emission_factor_g_per_kwh: f64) -> f64 {
    energy_j / JOULES_PER_KWH * emission_factor_g_per_kwh
}

/// The three reader samples of one tick.
#[derive(Debug, Clone)]
pub struct TickSamples {
    pub energy: EnergySample,
    pub host: HostCpuSample,
    pub process: ProcessCpuSample,
}

/// Batch accumulator for one audit window.
///
/// Owned and mutated by the controller only. `finalise` must be called
/// exactly once.
pub struct Accumulator {
    pid: i32,
    start_ns: u64,
    end_ns: Option<u64>,

    sum_host_energy_j: f64,
    sum_host_active_ticks: u64,
    sum_process_active_ticks: u64,

    ticks_observed: u64,
    energy_primed: u64,
    host_primed: u64,
    process_primed: u64,
    process_ok: u64,
    energy_errors: u64,
    host_errors: u64,
    process_errors: u64,
    first_process_error: Option<String>,
    skipped_periods: u64,
    counter_wraps: u64,
}

impl Accumulator {
    pub fn new(pid: i32, start_ns: u64) -> Self {
        Self {
            pid,
            start_ns,
            end_ns: None,
            sum_host_energy_j: 0.0,
            sum_host_active_ticks: 0,
            sum_process_active_ticks: 0,
            ticks_observed: 0,
            energy_primed: 0,
            host_primed: 0,
            process_primed: 0,
            process_ok: 0,
            energy_errors: 0,
            host_errors: 0,
            process_errors: 0,
            first_process_error: None,
            skipped_periods: 0,
            counter_wraps: 0,
        }
    }

    /// Folds one tick's samples into the running sums.
    ///
    /// Unprimed or failed samples contribute zero; the energy guard is
    /// strictly positive.
    pub fn push(&mut self, tick: &Tick, samples: &TickSamples) {
        self.ticks_observed += 1;
        self.skipped_periods += tick.skipped_periods;
        self.counter_wraps += u64::from(samples.energy.wraps);

        if samples.energy.ok {
            if samples.energy.primed {
                self.energy_primed += 1;
                if samples.energy.delta_j > 0.0 {
                    self.sum_host_energy_j += samples.energy.delta_j;
                }
            }
        } else {
            self.energy_errors += 1;
        }

        if samples.host.ok {
            if samples.host.primed {
                self.host_primed += 1;
                self.sum_host_active_ticks += samples.host.ticks.delta_active;
            }
        } else {
            self.host_errors += 1;
        }

        if samples.process.ok {
            self.process_ok += 1;
            if samples.process.primed {
                self.process_primed += 1;
            }
            // unprimed samples carry a zero delta by contract
            self.sum_process_active_ticks += samples.process.delta_active;
        } else {
            self.process_errors += 1;
            if self.first_process_error.is_none() {
                self.first_process_error = samples.process.error.clone();
            }
        }
    }

    /// Closes the window and derives the report. Exactly once.
    pub fn finalise(
        &mut self,
        end_ns: u64,
        end_reason: EndReason,
        emission_factor_g_per_kwh: f64,
        energy_source: &str,
        include_meta: bool,
    ) -> Result<AuditReport, AuditError> {
        if self.end_ns.is_some() {
            return Err(AuditError::AlreadyFinalised);
        }
        self.end_ns = Some(end_ns);

        let duration_seconds = end_ns.saturating_sub(self.start_ns) as f64 / 1e9;
        let attribution = attribute(
            self.sum_host_energy_j,
            self.sum_host_active_ticks,
            self.sum_process_active_ticks,
            emission_factor_g_per_kwh,
        );
        let is_active = self.sum_process_active_ticks > 0;

        let meta = include_meta.then(|| AuditMeta {
            energy_source: energy_source.to_string(),
            ticks_observed: self.ticks_observed,
            energy_primed_samples: self.energy_primed,
            host_primed_samples: self.host_primed,
            process_primed_samples: self.process_primed,
            process_ok_samples: self.process_ok,
            energy_errors: self.energy_errors,
            host_errors: self.host_errors,
            process_errors: self.process_errors,
            first_process_error: self.first_process_error.clone(),
            skipped_periods: self.skipped_periods,
            counter_wraps: self.counter_wraps,
            host_active_ticks: self.sum_host_active_ticks,
            process_active_ticks: self.sum_process_active_ticks,
            note: None,
        });

        Ok(AuditReport {
            pid: self.pid,
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            end_reason,
            duration_seconds,
            host_cpu_energy_j: attribution.host_energy_j,
            process_cpu_energy_j: attribution.process_energy_j,
            process_cpu_energy_share: attribution.share,
            host_carbon_gco2e: attribution.host_carbon_gco2e,
            process_carbon_gco2e: attribution.process_carbon_gco2e,
            emission_factor_g_per_kwh,
            is_active,
            meta,
        })
    }

    /// First process error kind observed, if any.
    pub fn first_process_error(&self) -> Option<&str> {
        self.first_process_error.as_deref()
    }
}

/// Shared attribution arithmetic for batch and sliding-window modes.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Attribution {
    pub host_energy_j: f64,
    pub process_energy_j: f64,
    /// `process_ticks / host_ticks`, clamped to `[0, 1]`; 0 when the
    /// denominator is 0.
    pub share: f64,
    pub host_carbon_gco2e: f64,
    pub process_carbon_gco2e: f64,
}

fn attribute(
    host_energy_j: f64,
    host_active_ticks: u64,
    process_active_ticks: u64,
    emission_factor_g_per_kwh: f64,
) -> Attribution {
    let share = if host_active_ticks > 0 {
        (process_active_ticks as f64 / host_active_ticks as f64).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let process_energy_j = host_energy_j * share;
    Attribution {
        host_energy_j,
        process_energy_j,
        share,
        host_carbon_gco2e: carbon_gco2e(host_energy_j, emission_factor_g_per_kwh),
        process_carbon_gco2e: carbon_gco2e(process_energy_j, emission_factor_g_per_kwh),
    }
}

/// One sliding-window entry, already guarded like the batch sums.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WindowSample {
    pub host_energy_j: f64,
    pub host_active_ticks: u64,
    pub process_active_ticks: u64,
}

impl WindowSample {
    /// Extracts the guarded contributions of one tick.
    pub fn from_tick(samples: &TickSamples) -> Self {
        let host_energy_j = if samples.energy.ok && samples.energy.primed && samples.energy.delta_j > 0.0 {
            samples.energy.delta_j
        } else {
            0.0
        };
        let host_active_ticks = if samples.host.ok && samples.host.primed {
            samples.host.ticks.delta_active
        } else {
            0
        };
        let process_active_ticks = if samples.process.ok {
            samples.process.delta_active
        } else {
            0
        };
        Self {
            host_energy_j,
            host_active_ticks,
            process_active_ticks,
        }
    }
}

/// Attribution failure: the window saw no host CPU activity.
#[derive(Debug, Clone, Copy)]
pub struct NoHostCpuActivity {
    /// Samples currently buffered.
    pub samples: usize,
}

impl NoHostCpuActivity {
    pub fn kind(&self) -> &'static str {
        "no_host_cpu_activity"
    }
}

impl std::fmt::Display for NoHostCpuActivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "no host cpu activity across {} buffered samples",
            self.samples
        )
    }
}

impl std::error::Error for NoHostCpuActivity {}

/// Windowed attribution over the most recent samples.
#[derive(Debug, Clone, Serialize)]
pub struct WindowAttribution {
    /// Samples the sums cover (≤ capacity).
    pub samples: usize,
    pub host_active_ticks: u64,
    pub process_active_ticks: u64,
    #[serde(flatten)]
    pub attribution: Attribution,
}

/// Bounded ring of the last `capacity` samples, re-attributed on each push.
///
/// The ring is self-contained: it is updated before the attribution is
/// computed, and the result (success or stall) is the only thing callers
/// observe; external state should advance only on success.
pub struct SlidingWindow {
    capacity: usize,
    emission_factor_g_per_kwh: f64,
    samples: VecDeque<WindowSample>,
}

impl SlidingWindow {
    pub fn new(capacity: usize, emission_factor_g_per_kwh: f64) -> Self {
        Self {
            capacity: capacity.max(1),
            emission_factor_g_per_kwh,
            samples: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Appends a sample (evicting the oldest beyond capacity) and
    /// recomputes the attribution over the buffer.
    pub fn push(&mut self, sample: WindowSample) -> Result<WindowAttribution, NoHostCpuActivity> {
        self.samples.push_back(sample);
        if self.samples.len() > self.capacity {
            self.samples.pop_front();
        }

        let mut host_energy_j = 0.0;
        let mut host_active_ticks = 0u64;
        let mut process_active_ticks = 0u64;
        for s in &self.samples {
            host_energy_j += s.host_energy_j;
            host_active_ticks += s.host_active_ticks;
            process_active_ticks += s.process_active_ticks;
        }

        if host_active_ticks == 0 {
            return Err(NoHostCpuActivity {
                samples: self.samples.len(),
            });
        }

        Ok(WindowAttribution {
            samples: self.samples.len(),
            host_active_ticks,
            process_active_ticks,
            attribution: attribute(
                host_energy_j,
                host_active_ticks,
                process_active_ticks,
                self.emission_factor_g_per_kwh,
            ),
        })
    }
}

//! Newline-delimited JSON streaming of per-tick attribution.
//!
//! One record per tick that produced a successful sliding-window
//! attribution. Ticks whose window carries no host CPU activity are
//! skipped entirely: nothing is written and the record counter does not
//! advance.

use carbonscope_core::attribution::{SlidingWindow, TickSamples, WindowAttribution, WindowSample};
use carbonscope_core::audit::TickSink;
use carbonscope_core::scheduler::Tick;
use serde::Serialize;
use std::io::Write;
use tracing::debug;

/// JSONL record schema, one line per tick.
///
/// ```json
/// {"tick_id":3,"schedule_index":3,"start_ns":3000012345,"lateness_ns":12345,
///  "skipped_periods":0,
///  "energy":{"ok":true,"primed":true,"delta_j":2.0,"wraps":0},
///  "host":{"delta_active":30,"delta_idle":70,"delta_total":100,"utilisation":0.3},
///  "process":{"ok":true,"delta_active":10},
///  "window":{"samples":4,"host_active_ticks":120,"process_active_ticks":40,
///            "host_energy_j":8.0,"process_energy_j":2.666,"share":0.333,
///            "host_carbon_gco2e":1.05e-3,"process_carbon_gco2e":3.5e-4}}
/// ```
#[derive(Debug, Serialize)]
struct StreamRecord<'a> {
    tick_id: u64,
    schedule_index: u64,
    start_ns: u64,
    lateness_ns: u64,
    skipped_periods: u64,
    energy: EnergyRecord,
    host: HostRecord,
    process: ProcessRecord,
    window: &'a WindowAttribution,
}

#[derive(Debug, Serialize)]
struct EnergyRecord {
    ok: bool,
    primed: bool,
    delta_j: f64,
    wraps: u32,
}

#[derive(Debug, Serialize)]
struct HostRecord {
    delta_active: u64,
    delta_idle: u64,
    delta_total: u64,
    utilisation: f64,
}

#[derive(Debug, Serialize)]
struct ProcessRecord {
    ok: bool,
    delta_active: u64,
}

/// Tick sink feeding a sliding window and emitting one JSONL line per
/// successful attribution.
pub struct JsonlSink<W: Write> {
    window: SlidingWindow,
    writer: W,
    records_written: u64,
}

impl<W: Write> JsonlSink<W> {
    pub fn new(writer: W, window_capacity: usize, emission_factor_g_per_kwh: f64) -> Self {
        Self {
            window: SlidingWindow::new(window_capacity, emission_factor_g_per_kwh),
            writer,
            records_written: 0,
        }
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }
}

impl<W: Write> TickSink for JsonlSink<W> {
    fn on_tick(&mut self, tick: &Tick, samples: &TickSamples) -> std::io::Result<()> {
        let attribution = match self.window.push(WindowSample::from_tick(samples)) {
            Ok(attribution) => attribution,
            Err(stall) => {
                debug!(
                    tick_id = tick.tick_id,
                    samples = stall.samples,
                    "window stalled, record skipped"
                );
                return Ok(());
            }
        };

        let record = StreamRecord {
            tick_id: tick.tick_id,
            schedule_index: tick.schedule_index,
            start_ns: tick.start_ns,
            lateness_ns: tick.lateness_ns,
            skipped_periods: tick.skipped_periods,
            energy: EnergyRecord {
                ok: samples.energy.ok,
                primed: samples.energy.primed,
                delta_j: samples.energy.delta_j,
                wraps: samples.energy.wraps,
            },
            host: HostRecord {
                delta_active: samples.host.ticks.delta_active,
                delta_idle: samples.host.ticks.delta_idle,
                delta_total: samples.host.ticks.delta_total,
                utilisation: samples.host.utilisation,
            },
            process: ProcessRecord {
                ok: samples.process.ok,
                delta_active: samples.process.delta_active,
            },
            window: &attribution,
        };

        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.records_written += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carbonscope_core::sampler::{
        EnergySample, HostCpuSample, HostTickDeltas, ProcessCpuSample,
    };

    fn tick(id: u64) -> Tick {
        Tick {
            tick_id: id,
            schedule_index: id,
            period_ns: 1_000_000_000,
            t0_ns: 0,
            deadline_ns: id * 1_000_000_000,
            start_ns: id * 1_000_000_000,
            dt_ns: if id == 0 { 0 } else { 1_000_000_000 },
            lateness_ns: 0,
            skipped_periods: 0,
        }
    }

    fn samples(energy_j: f64, host_active: u64, process_active: u64) -> TickSamples {
        TickSamples {
            energy: EnergySample {
                ok: true,
                primed: true,
                clamped_dt_s: 1.0,
                delta_uj: (energy_j * 1e6) as u64,
                delta_j: energy_j,
                wraps: 0,
                packages: Vec::new(),
            },
            host: HostCpuSample {
                ok: true,
                primed: true,
                clamped_dt_s: 1.0,
                ticks: HostTickDeltas {
                    delta_active: host_active,
                    delta_idle: 100 - host_active,
                    delta_total: 100,
                },
                utilisation: host_active as f64 / 100.0,
                error: None,
            },
            process: ProcessCpuSample {
                ok: true,
                primed: true,
                pid: 4242,
                delta_active: process_active,
                error: None,
            },
        }
    }

    #[test]
    fn test_writes_one_line_per_active_tick() {
        let mut sink = JsonlSink::new(Vec::new(), 10, 475.0);
        sink.on_tick(&tick(0), &samples(2.0, 30, 10)).unwrap();
        sink.on_tick(&tick(1), &samples(2.0, 30, 10)).unwrap();

        assert_eq!(sink.records_written(), 2);
        let output = String::from_utf8(sink.writer.clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let record: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(record["tick_id"], 1);
        assert_eq!(record["window"]["samples"], 2);
        assert_eq!(record["window"]["host_active_ticks"], 60);
        let share = record["window"]["share"].as_f64().unwrap();
        assert!((share - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_stalled_window_writes_nothing() {
        let mut sink = JsonlSink::new(Vec::new(), 10, 475.0);
        sink.on_tick(&tick(0), &samples(0.0, 0, 0)).unwrap();

        assert_eq!(sink.records_written(), 0);
        assert!(sink.writer.is_empty());

        // activity arriving later resumes the stream
        sink.on_tick(&tick(1), &samples(2.0, 30, 10)).unwrap();
        assert_eq!(sink.records_written(), 1);
    }
}

//! Audit controller: drives the readers under the scheduler and derives
//! the final report.
//!
//! One logical task per audit. Within a tick the three reader samples are
//! issued concurrently (scoped threads, no pooled workers) and awaited
//! together; across ticks, ordering equals scheduler tick order. In-flight
//! samples are never interrupted: cancellation is observed at tick
//! boundaries, and the current tick's samples are always awaited before
//! finalising.

use crate::attribution::{Accumulator, DEFAULT_EMISSION_FACTOR_G_PER_KWH, TickSamples};
use crate::clock::Clock;
use crate::error::AuditError;
use crate::report::{AuditReport, EndReason};
use crate::sampler::energy::{EmpiricalPower, EnergyReader};
use crate::sampler::fs::ProcFs;
use crate::sampler::host_cpu::HostCpuReader;
use crate::sampler::probe::{DEFAULT_POWERCAP_ROOT, probe_packages};
use crate::sampler::process_cpu::ProcessCpuReader;
use crate::scheduler::{CancelToken, Scheduler, Tick, TickPolicy};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-tick observer for the streaming surface.
///
/// Sink failures are logged and counted but never abort the audit.
pub trait TickSink {
    fn on_tick(&mut self, tick: &Tick, samples: &TickSamples) -> std::io::Result<()>;
}

/// Pseudo-filesystem roots, overridable for tests.
#[derive(Debug, Clone)]
pub struct AuditPaths {
    pub powercap_root: PathBuf,
    pub proc_root: PathBuf,
}

impl Default for AuditPaths {
    fn default() -> Self {
        Self {
            powercap_root: PathBuf::from(DEFAULT_POWERCAP_ROOT),
            proc_root: PathBuf::from("/proc"),
        }
    }
}

impl AuditPaths {
    fn stat_path(&self) -> PathBuf {
        self.proc_root.join("stat")
    }
}

/// Options of one audit run.
#[derive(Debug, Clone)]
pub struct AuditOptions {
    pub pid: i32,
    pub duration_seconds: f64,
    pub tick_ms: f64,
    pub emission_factor_g_per_kwh: f64,
    pub policy: TickPolicy,
    /// Attach the meta block to the report.
    pub include_meta: bool,
    /// Log per-reader sampling durations at debug level.
    pub debug_timing: bool,
    pub cancel: CancelToken,
}

impl AuditOptions {
    pub fn new(pid: i32) -> Self {
        Self {
            pid,
            duration_seconds: 30.0,
            tick_ms: 1000.0,
            emission_factor_g_per_kwh: DEFAULT_EMISSION_FACTOR_G_PER_KWH,
            policy: TickPolicy::default(),
            include_meta: false,
            debug_timing: false,
            cancel: CancelToken::new(),
        }
    }
}

/// Orchestrates probe, readers, scheduler and accumulator for audits.
pub struct Auditor<F: ProcFs + Clone, C: Clock> {
    fs: F,
    clock: Arc<C>,
    paths: AuditPaths,
    power: EmpiricalPower,
}

impl<F: ProcFs + Clone, C: Clock> Auditor<F, C> {
    pub fn new(fs: F, clock: Arc<C>, paths: AuditPaths, power: EmpiricalPower) -> Self {
        Self {
            fs,
            clock,
            paths,
            power,
        }
    }

    /// Runs one audit to completion (duration elapsed or cancelled).
    pub fn run(
        &self,
        opts: &AuditOptions,
        mut sink: Option<&mut dyn TickSink>,
    ) -> Result<AuditReport, AuditError> {
        if opts.pid <= 1 {
            return Err(AuditError::InvalidPid(opts.pid));
        }
        if !opts.duration_seconds.is_finite() || opts.duration_seconds <= 0.0 {
            return Err(AuditError::InvalidDuration(opts.duration_seconds));
        }
        if !opts.emission_factor_g_per_kwh.is_finite() || opts.emission_factor_g_per_kwh < 0.0 {
            return Err(AuditError::InvalidEmissionFactor(
                opts.emission_factor_g_per_kwh,
            ));
        }

        // The probe runs once per audit; nothing is cached across runs.
        let probe = probe_packages(&self.fs, &self.paths.powercap_root);
        if let Some(hint) = &probe.hint {
            warn!(hint = %hint, "energy probe not ok");
        }

        let mut energy = EnergyReader::new(
            self.fs.clone(),
            &probe,
            &self.power,
            &self.paths.stat_path(),
        );
        if !energy.is_ready() {
            return Err(AuditError::EnergySourceUnavailable);
        }
        let mut host = HostCpuReader::new(self.fs.clone(), self.paths.stat_path());
        let mut process =
            ProcessCpuReader::new(self.fs.clone(), &self.paths.proc_root, opts.pid)?;

        let mut scheduler = Scheduler::new(
            self.clock.clone(),
            opts.tick_ms,
            opts.policy,
            opts.cancel.clone(),
        )?;
        let t0_ns = scheduler.t0_ns();
        let deadline_target_ns = t0_ns + (opts.duration_seconds * 1e9) as u64;

        info!(
            pid = opts.pid,
            duration_s = opts.duration_seconds,
            tick_ms = opts.tick_ms,
            source = energy.source_name(),
            "audit started"
        );

        let mut accumulator = Accumulator::new(opts.pid, t0_ns);
        let end_reason = loop {
            let Some(tick) = scheduler.next_tick() else {
                break EndReason::Aborted;
            };
            if opts.cancel.is_cancelled() {
                break EndReason::Aborted;
            }
            if tick.start_ns >= deadline_target_ns {
                break EndReason::Duration;
            }

            let samples = self.collect(&tick, &mut energy, &mut host, &mut process, opts)?;
            accumulator.push(&tick, &samples);

            if let Some(sink) = sink.as_deref_mut()
                && let Err(err) = sink.on_tick(&tick, &samples)
            {
                warn!(tick_id = tick.tick_id, error = %err, "tick sink write failed");
            }
        };

        let end_ns = self.clock.now_ns();
        let note = accumulator.first_process_error().map(diagnostic_note);

        let mut report = accumulator.finalise(
            end_ns,
            end_reason,
            opts.emission_factor_g_per_kwh,
            energy.source_name(),
            opts.include_meta,
        )?;

        if !report.is_active {
            let note =
                note.unwrap_or_else(|| "no process cpu activity observed in the window".to_string());
            warn!(pid = opts.pid, note = %note, "target inactive");
            if let Some(meta) = report.meta.as_mut() {
                meta.note = Some(note);
            }
        }

        info!(
            pid = report.pid,
            duration_s = report.duration_seconds,
            host_j = report.host_cpu_energy_j,
            process_j = report.process_cpu_energy_j,
            share = report.process_cpu_energy_share,
            "audit finished"
        );
        Ok(report)
    }

    /// Issues the three reader samples concurrently at the tick timestamp.
    fn collect(
        &self,
        tick: &Tick,
        energy: &mut EnergyReader<F>,
        host: &mut HostCpuReader<F>,
        process: &mut ProcessCpuReader<F>,
        opts: &AuditOptions,
    ) -> Result<TickSamples, AuditError> {
        let clock = &self.clock;
        let start_ns = tick.start_ns;

        let (energy_result, host_result, process_sample, timing) = std::thread::scope(|scope| {
            let energy_handle = scope.spawn(move || {
                let begin = clock.now_ns();
                let sample = energy.sample(start_ns);
                (sample, clock.now_ns().saturating_sub(begin))
            });
            let host_handle = scope.spawn(move || {
                let begin = clock.now_ns();
                let sample = host.sample(start_ns);
                (sample, clock.now_ns().saturating_sub(begin))
            });

            let begin = clock.now_ns();
            let process_sample = process.sample();
            let process_ns = clock.now_ns().saturating_sub(begin);

            let (energy_result, energy_ns) =
                energy_handle.join().expect("energy sampler panicked");
            let (host_result, host_ns) = host_handle.join().expect("host sampler panicked");
            (
                energy_result,
                host_result,
                process_sample,
                (energy_ns, host_ns, process_ns),
            )
        });

        if opts.debug_timing {
            let (energy_ns, host_ns, process_ns) = timing;
            debug!(
                tick_id = tick.tick_id,
                energy_us = energy_ns / 1_000,
                host_us = host_ns / 1_000,
                process_us = process_ns / 1_000,
                lateness_us = tick.lateness_ns / 1_000,
                "tick timing"
            );
        }

        Ok(TickSamples {
            energy: energy_result?,
            host: host_result,
            process: process_sample,
        })
    }
}

/// Maps the first recorded process error to an operator-facing hint.
fn diagnostic_note(first_error: &str) -> String {
    match first_error {
        "file_not_found" => {
            "process stat file disappeared; the target likely ended before priming. \
             Reduce the tick period to catch short-lived processes"
                .to_string()
        }
        "permission_denied" | "operation_not_permitted" => {
            "process stat file unreadable; check privileges".to_string()
        }
        other => format!("process sampling failed ({})", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sampler::mock::MockFs;
    use std::sync::Mutex;
    use std::time::Duration;

    const SEC: u64 = 1_000_000_000;

    /// Clock that rewrites the mock host on every sleep, simulating a
    /// machine that keeps running while the audit waits for deadlines:
    /// 2 W per package, 30 host active jiffies/s of which the target burns
    /// 10, plus an optional scripted event.
    struct LiveHost {
        inner: ManualClock,
        fs: MockFs,
        event_at_ns: Option<u64>,
        event: Box<dyn Fn(&MockFs) + Send + Sync>,
        fired: Mutex<bool>,
    }

    impl LiveHost {
        fn new(fs: MockFs) -> Self {
            Self {
                inner: ManualClock::new(),
                fs,
                event_at_ns: None,
                event: Box::new(|_| {}),
                fired: Mutex::new(false),
            }
        }

        fn with_event(
            fs: MockFs,
            at_ns: u64,
            event: impl Fn(&MockFs) + Send + Sync + 'static,
        ) -> Self {
            Self {
                inner: ManualClock::new(),
                fs,
                event_at_ns: Some(at_ns),
                event: Box::new(event),
                fired: Mutex::new(false),
            }
        }

        fn write_host(&self, now_ns: u64) {
            let seconds = now_ns / SEC;
            let active = 30 * seconds;
            let idle = 70 * seconds;
            self.fs
                .set_host_stat("/proc", [active, 0, 0, idle, 0, 0, 0, 0]);
            self.fs.set_energy_uj(
                "/sys/class/powercap",
                "intel-rapl:0",
                5_000_000 + 2_000_000 * seconds,
            );
            if self.fs.exists(std::path::Path::new("/proc/4242/stat")) {
                self.fs
                    .set_pid_stat("/proc", 4242, "worker", 10 * seconds, 0, 9000);
            }
        }
    }

    impl Clock for LiveHost {
        fn now_ns(&self) -> u64 {
            self.inner.now_ns()
        }

        fn sleep(&self, duration: Duration) {
            self.inner.sleep(duration);
            let now = self.inner.now_ns();
            self.write_host(now);
            if let Some(at) = self.event_at_ns
                && now >= at
            {
                let mut fired = self.fired.lock().unwrap();
                if !*fired {
                    *fired = true;
                    (self.event)(&self.fs);
                }
            }
        }
    }

    fn live_fs() -> MockFs {
        let fs = MockFs::new();
        fs.add_energy_domain(
            "/sys/class/powercap",
            "intel-rapl:0",
            "package-0",
            5_000_000,
            Some(262_143_328_850),
        );
        fs.set_host_stat("/proc", [0, 0, 0, 0, 0, 0, 0, 0]);
        fs.set_pid_stat("/proc", 4242, "worker", 0, 0, 9000);
        fs
    }

    fn auditor(clock: Arc<LiveHost>, fs: MockFs) -> Auditor<MockFs, LiveHost> {
        Auditor::new(fs, clock, AuditPaths::default(), EmpiricalPower::default())
    }

    struct RecordingSink {
        tick_ids: Vec<u64>,
    }

    impl TickSink for RecordingSink {
        fn on_tick(&mut self, tick: &Tick, _samples: &TickSamples) -> std::io::Result<()> {
            self.tick_ids.push(tick.tick_id);
            Ok(())
        }
    }

    #[test]
    fn test_full_audit_attributes_share_of_energy() {
        let fs = live_fs();
        let clock = Arc::new(LiveHost::new(fs.clone()));
        let auditor = auditor(clock, fs);

        let mut opts = AuditOptions::new(4242);
        opts.duration_seconds = 5.0;
        opts.tick_ms = 1000.0;
        opts.include_meta = true;
        let report = auditor.run(&opts, None).unwrap();

        assert_eq!(report.end_reason, EndReason::Duration);
        assert!(report.is_active);
        // 4 primed ticks of 2 J each
        assert!((report.host_cpu_energy_j - 8.0).abs() < 1e-9);
        // process holds 10 of 30 active jiffies per second
        assert!((report.process_cpu_energy_share - 1.0 / 3.0).abs() < 1e-9);
        assert!((report.process_cpu_energy_j - 8.0 / 3.0).abs() < 1e-9);
        assert!(report.process_cpu_energy_j <= report.host_cpu_energy_j);
        assert!((report.duration_seconds - 5.0).abs() < 0.1);

        let meta = report.meta.unwrap();
        assert_eq!(meta.energy_source, "rapl");
        assert_eq!(meta.ticks_observed, 5);
        assert_eq!(meta.energy_primed_samples, 4);
        assert_eq!(meta.host_primed_samples, 4);
        assert_eq!(meta.process_ok_samples, 5);
        assert_eq!(meta.process_errors, 0);
        assert!(meta.note.is_none());
    }

    #[test]
    fn test_short_lived_target_yields_inactive_report_with_hint() {
        let fs = live_fs();
        let clock = Arc::new(LiveHost::with_event(fs.clone(), SEC / 2, |fs| {
            fs.remove_file("/proc/4242/stat");
        }));
        let auditor = auditor(clock, fs);

        let mut opts = AuditOptions::new(4242);
        opts.duration_seconds = 4.0;
        opts.tick_ms = 1000.0;
        opts.include_meta = true;
        let report = auditor.run(&opts, None).unwrap();

        assert!(!report.is_active);
        assert_eq!(report.process_cpu_energy_j, 0.0);
        let meta = report.meta.unwrap();
        assert_eq!(meta.process_ok_samples, 1);
        assert_eq!(meta.process_errors, 3);
        assert_eq!(meta.first_process_error.as_deref(), Some("file_not_found"));
        assert!(meta.note.unwrap().contains("before priming"));
    }

    #[test]
    fn test_cancellation_returns_partial_report() {
        let fs = live_fs();
        let opts = {
            let mut opts = AuditOptions::new(4242);
            opts.duration_seconds = 60.0;
            opts.tick_ms = 1000.0;
            opts.include_meta = true;
            opts
        };
        let cancel = opts.cancel.clone();
        let clock = Arc::new(LiveHost::with_event(fs.clone(), 2 * SEC + SEC / 2, move |_| {
            cancel.cancel();
        }));
        let auditor = auditor(clock, fs);

        let report = auditor.run(&opts, None).unwrap();
        assert_eq!(report.end_reason, EndReason::Aborted);
        // the two primed ticks before the signal still count
        assert!((report.host_cpu_energy_j - 4.0).abs() < 1e-9);
        assert!(report.is_active);
    }

    #[test]
    fn test_sink_observes_every_processed_tick() {
        let fs = live_fs();
        let clock = Arc::new(LiveHost::new(fs.clone()));
        let auditor = auditor(clock, fs);

        let mut opts = AuditOptions::new(4242);
        opts.duration_seconds = 3.0;
        opts.tick_ms = 1000.0;
        let mut sink = RecordingSink { tick_ids: Vec::new() };
        auditor.run(&opts, Some(&mut sink)).unwrap();

        assert_eq!(sink.tick_ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_precondition_validation() {
        let fs = live_fs();
        let clock = Arc::new(LiveHost::new(fs.clone()));
        let auditor = auditor(clock, fs);

        let opts = AuditOptions::new(1);
        assert_eq!(auditor.run(&opts, None).unwrap_err().kind(), "invalid_pid");

        let mut opts = AuditOptions::new(4242);
        opts.duration_seconds = 0.0;
        assert_eq!(
            auditor.run(&opts, None).unwrap_err().kind(),
            "invalid_duration"
        );

        let mut opts = AuditOptions::new(4242);
        opts.tick_ms = -5.0;
        assert_eq!(
            auditor.run(&opts, None).unwrap_err().kind(),
            "invalid_period"
        );

        let mut opts = AuditOptions::new(4242);
        opts.emission_factor_g_per_kwh = -1.0;
        assert_eq!(
            auditor.run(&opts, None).unwrap_err().kind(),
            "invalid_emission_factor"
        );
    }

    #[test]
    fn test_energy_source_unavailable_rejected_upfront() {
        let fs = MockFs::headless_vm();
        let clock = Arc::new(LiveHost::new(fs.clone()));
        let auditor = Auditor::new(
            fs,
            clock,
            AuditPaths::default(),
            EmpiricalPower::default(),
        );

        let opts = AuditOptions::new(4242);
        let err = auditor.run(&opts, None).unwrap_err();
        assert_eq!(err.kind(), "energy_source_unavailable");
    }

    #[test]
    fn test_fallback_audit_on_headless_host() {
        let fs = MockFs::new();
        fs.set_host_stat("/proc", [0, 0, 0, 0, 0, 0, 0, 0]);
        fs.set_pid_stat("/proc", 4242, "worker", 0, 0, 9000);
        let clock = Arc::new(LiveHost::new(fs.clone()));
        let auditor = Auditor::new(
            fs,
            clock,
            AuditPaths::default(),
            EmpiricalPower::from_watts(8.0, 65.0),
        );

        let mut opts = AuditOptions::new(4242);
        opts.duration_seconds = 5.0;
        opts.tick_ms = 1000.0;
        opts.include_meta = true;
        let report = auditor.run(&opts, None).unwrap();

        // utilisation is a steady 30%: P = 8 + 57 * 0.3 = 25.1 W per second
        let meta = report.meta.as_ref().unwrap();
        assert_eq!(meta.energy_source, "empirical");
        assert!((report.host_cpu_energy_j - 4.0 * 25.1).abs() < 1e-6);
        assert!((report.process_cpu_energy_share - 1.0 / 3.0).abs() < 1e-9);
    }
}

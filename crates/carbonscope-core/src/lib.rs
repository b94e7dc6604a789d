//! carbonscope-core — CPU energy sampling and carbon attribution.
//!
//! Audits the electrical energy consumed by the CPU of a Linux host over a
//! bounded window and attributes a ticks-ratio share of it (plus the CO₂e
//! equivalent) to one target process.
//!
//! Provides:
//! - `sampler` — probe, energy, host and process readers over injectable
//!   pseudo-filesystems (plus the in-memory mock used by the tests)
//! - `scheduler` — fixed-period monotone tick source with coalesce-on-overrun
//! - `attribution` — batch accumulator and sliding-window attribution
//! - `audit` — the controller orchestrating one audit run
//! - `clock` — monotone time abstraction (real and manual)
//! - `report` — serialisable audit report
//! - `error` — canonical error kinds
//!
//! ```no_run
//! use carbonscope_core::audit::{AuditOptions, AuditPaths, Auditor};
//! use carbonscope_core::clock::MonotonicClock;
//! use carbonscope_core::sampler::{EmpiricalPower, RealFs};
//! use std::sync::Arc;
//!
//! let auditor = Auditor::new(
//!     RealFs::new(),
//!     Arc::new(MonotonicClock::new()),
//!     AuditPaths::default(),
//!     EmpiricalPower::default(),
//! );
//! let report = auditor.run(&AuditOptions::new(4242), None).unwrap();
//! println!("{} gCO2e", report.process_carbon_gco2e);
//! ```

#![feature(io_error_more)]

pub mod attribution;
pub mod audit;
pub mod clock;
pub mod error;
pub mod report;
pub mod sampler;
pub mod scheduler;

pub use attribution::{
    Accumulator, Attribution, DEFAULT_EMISSION_FACTOR_G_PER_KWH, DEFAULT_WINDOW_CAPACITY,
    JOULES_PER_KWH, NoHostCpuActivity, SlidingWindow, TickSamples, WindowAttribution,
    WindowSample, carbon_gco2e,
};
pub use audit::{AuditOptions, AuditPaths, Auditor, TickSink};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{AuditError, canonical_kind};
pub use report::{AuditMeta, AuditReport, EndReason};
pub use sampler::{
    EmpiricalPower, EnergyReader, EnergySample, HostCpuReader, HostCpuSample, MockFs, ProcFs,
    ProbeReport, ProbeStatus, ProcessCpuReader, ProcessCpuSample, RealFs,
};
pub use scheduler::{CancelToken, Scheduler, Tick, TickPolicy};

//! Final audit report types, serialisable for the CLI and any downstream
//! consumer.

use serde::Serialize;

/// Why the audit loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The configured duration elapsed.
    Duration,
    /// Cancellation was signalled; totals cover the partial window.
    Aborted,
}

/// Diagnostic counters gathered across the audit, included on request.
#[derive(Debug, Clone, Serialize)]
pub struct AuditMeta {
    /// Active energy source: `rapl` or `empirical`.
    pub energy_source: String,
    pub ticks_observed: u64,
    pub energy_primed_samples: u64,
    pub host_primed_samples: u64,
    pub process_primed_samples: u64,
    pub process_ok_samples: u64,
    pub energy_errors: u64,
    pub host_errors: u64,
    pub process_errors: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_process_error: Option<String>,
    /// Grid slots dropped by the coalescing scheduler.
    pub skipped_periods: u64,
    pub counter_wraps: u64,
    pub host_active_ticks: u64,
    pub process_active_ticks: u64,
    /// Human-oriented diagnostic, e.g. when the target never primed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// The audit result returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub pid: i32,
    /// Wall-clock completion time, RFC 3339. Informational only; every
    /// duration in the report comes from the monotone clock.
    pub timestamp: String,
    pub end_reason: EndReason,
    pub duration_seconds: f64,
    pub host_cpu_energy_j: f64,
    pub process_cpu_energy_j: f64,
    /// Ticks-ratio share in `[0, 1]`.
    pub process_cpu_energy_share: f64,
    pub host_carbon_gco2e: f64,
    pub process_carbon_gco2e: f64,
    pub emission_factor_g_per_kwh: f64,
    /// Whether the target consumed any CPU during the window.
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<AuditMeta>,
}

//! Maintenance-mode sources.
//!
//! The processing loop re-reads its source at a fixed cadence, so an operator can
//! suspend or resume processing without restarting the host. Reads are lock-free;
//! a value up to one refresh interval stale is fine.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

pub trait MaintenanceSource: Send + Sync {
    fn is_in_maintenance(&self) -> bool;
}

impl<S> MaintenanceSource for Arc<S>
where
    S: MaintenanceSource + ?Sized,
{
    fn is_in_maintenance(&self) -> bool {
        (**self).is_in_maintenance()
    }
}

/// Shared in-process flag. Clones observe the same value.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceFlag(Arc<AtomicBool>);

impl MaintenanceFlag {
    pub fn new(on: bool) -> Self {
        Self(Arc::new(AtomicBool::new(on)))
    }

    pub fn set(&self, on: bool) {
        self.0.store(on, Ordering::Relaxed);
    }
}

impl MaintenanceSource for MaintenanceFlag {
    fn is_in_maintenance(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Reads an environment variable on every refresh.
///
/// `1`, `true`, `yes`, `on` (any case) mean maintenance; anything else, including
/// an unset variable, means normal operation.
#[derive(Debug, Clone)]
pub struct EnvMaintenanceSource {
    var: String,
}

impl EnvMaintenanceSource {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl MaintenanceSource for EnvMaintenanceSource {
    fn is_in_maintenance(&self) -> bool {
        match std::env::var(&self.var) {
            Ok(raw) => parse_switch(&raw).unwrap_or_else(|| {
                debug!(var = %self.var, value = %raw, "unrecognised maintenance value; treating as off");
                false
            }),
            Err(_) => false,
        }
    }
}

/// On while any of its sources is on.
#[derive(Clone, Default)]
pub struct AnyMaintenance(Vec<Arc<dyn MaintenanceSource>>);

impl AnyMaintenance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: Arc<dyn MaintenanceSource>) -> Self {
        self.0.push(source);
        self
    }
}

impl std::fmt::Debug for AnyMaintenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyMaintenance")
            .field("sources", &self.0.len())
            .finish()
    }
}

impl MaintenanceSource for AnyMaintenance {
    fn is_in_maintenance(&self) -> bool {
        self.0.iter().any(|source| source.is_in_maintenance())
    }
}

/// Parse a boolean-ish setting (`true`/`false`, `1`/`0`, `yes`/`no`, `on`/`off`).
pub fn parse_switch(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

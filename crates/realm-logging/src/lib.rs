//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Structured lifecycle logging adapters."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Structured logging helpers carrying realm lifecycle context.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

#[macro_use]
pub mod macros;

#[doc(hidden)]
pub use tracing;

/// Initialize a baseline tracing subscriber suitable for development and tests.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

/// Lifecycle phase a log event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// Graph construction and wave scheduling.
    Planning,
    /// Wave-by-wave startup.
    Startup,
    /// Continuous health watch after startup.
    Monitor,
    /// Reverse-order teardown.
    Shutdown,
}

impl LifecyclePhase {
    /// Static label used in structured fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::Planning => "planning",
            LifecyclePhase::Startup => "startup",
            LifecyclePhase::Monitor => "monitor",
            LifecyclePhase::Shutdown => "shutdown",
        }
    }
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogContext<'a> {
    /// Realm identifier associated with the log event.
    pub realm: Option<&'a str>,
    /// Wave index the realm belongs to.
    pub wave: Option<usize>,
    /// Correlation id of the orchestrator run.
    pub run_id: Option<&'a str>,
    /// Lifecycle phase.
    pub phase: Option<LifecyclePhase>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a realm identifier.
    pub fn with_realm(mut self, realm: &'a str) -> Self {
        self.realm = Some(realm);
        self
    }

    /// Attach a wave index.
    pub fn with_wave(mut self, wave: usize) -> Self {
        self.wave = Some(wave);
        self
    }

    /// Attach the run correlation id.
    pub fn with_run_id(mut self, run_id: &'a str) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Attach a lifecycle phase.
    pub fn with_phase(mut self, phase: LifecyclePhase) -> Self {
        self.phase = Some(phase);
        self
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// The operation completed successfully.
    Success,
    /// The operation completed with contained failures.
    Partial,
    /// The operation failed or was aborted.
    Fault,
}

impl LifecycleOutcome {
    /// Static label used in structured fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleOutcome::Success => "success",
            LifecycleOutcome::Partial => "partial",
            LifecycleOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized lifecycle event with an outcome-dependent level.
pub fn log_lifecycle_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: LifecycleOutcome,
) {
    let ctx = context.copied().unwrap_or_default();
    match outcome {
        LifecycleOutcome::Success => realm_info!(
            context = ctx,
            "{event} [{}]: {message}",
            outcome.as_str()
        ),
        LifecycleOutcome::Partial => realm_warn!(
            context = ctx,
            "{event} [{}]: {message}",
            outcome.as_str()
        ),
        LifecycleOutcome::Fault => realm_error!(
            context = ctx,
            "{event} [{}]: {message}",
            outcome.as_str()
        ),
    }
}

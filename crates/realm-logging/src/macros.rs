//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Context-enriched logging macros."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---

/// Shared expansion for the level-specific macros below.
#[doc(hidden)]
#[macro_export]
macro_rules! __realm_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        $crate::tracing::event!(
            $level,
            realm = ctx.realm.unwrap_or(""),
            wave = ctx.wave.unwrap_or_default(),
            run_id = ctx.run_id.unwrap_or(""),
            phase = ctx.phase.map(|phase| phase.as_str()).unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with lifecycle context.
#[macro_export]
macro_rules! realm_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__realm_event!($crate::tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__realm_event!($crate::tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a debug log enriched with lifecycle context.
#[macro_export]
macro_rules! realm_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__realm_event!($crate::tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__realm_event!($crate::tracing::Level::DEBUG, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with lifecycle context.
#[macro_export]
macro_rules! realm_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__realm_event!($crate::tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__realm_event!($crate::tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit an error log enriched with lifecycle context.
#[macro_export]
macro_rules! realm_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__realm_event!($crate::tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__realm_event!($crate::tracing::Level::ERROR, $crate::LogContext::default(), $($arg)+)
    };
}

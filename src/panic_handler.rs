//! Custom panic handler for daemon crash diagnostics.
//!
//! The daemon runs under the service manager, so the crash report goes to
//! stderr and ends up in the journal next to the regular log output.

use std::io::Write;
use std::panic::{self, PanicHookInfo};

/// Install the custom panic handler.
///
/// This should be called early in main(), before any other initialization.
pub fn install() {
    // Enable backtraces
    if std::env::var("RUST_BACKTRACE").is_err() {
        std::env::set_var("RUST_BACKTRACE", "1");
    }

    panic::set_hook(Box::new(|info| {
        let report = format_crash_report(info);
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(report.as_bytes());
        let _ = stderr.flush();
    }));
}

/// Extract the panic message from its payload.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

/// Format the crash report with all available diagnostic information.
fn format_crash_report(info: &PanicHookInfo) -> String {
    let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f UTC");

    let thread = std::thread::current();
    let thread_name = thread.name().unwrap_or("<unnamed>");

    let location = info
        .location()
        .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
        .unwrap_or_else(|| "unknown".to_string());

    let backtrace = std::backtrace::Backtrace::force_capture();

    format!(
        r"
================================================================================
UBUNTU ADVANTAGE DESKTOP DAEMON CRASH REPORT
================================================================================
Version:  {}
Time:     {}
Thread:   {} ({:?})
Location: {}
Message:  {}

Backtrace:
{}
================================================================================
",
        env!("CARGO_PKG_VERSION"),
        timestamp,
        thread_name,
        thread.id(),
        location,
        panic_message(info.payload()),
        backtrace,
    )
}

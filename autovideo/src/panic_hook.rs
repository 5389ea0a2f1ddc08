//! Process-wide panic logging.

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe, PanicHookInfo};

/// Route panics through `tracing` and then to the previously installed hook.
///
/// The worker pool already turns a panicking job into a failed one; this
/// puts the location and backtrace in the log file as well.
pub fn install() {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
        // A panic while logging must not abort the process.
        let _ = panic::catch_unwind(AssertUnwindSafe(|| log_panic(info)));
        previous(info);
    }));
}

fn log_panic(info: &PanicHookInfo<'_>) {
    let message = panic_payload_to_string(info.payload()).unwrap_or_else(|| info.to_string());
    let location = info
        .location()
        .map(|l| format!("{}:{}", l.file(), l.line()))
        .unwrap_or_default();
    let current = std::thread::current();
    let thread = current.name().unwrap_or("<unnamed>");

    tracing::error!(
        target: "autovideo::panic",
        thread,
        location = %location,
        backtrace = %Backtrace::force_capture(),
        "panicked: {message}"
    );
}

/// Text of a panic payload when it is a `&str` or `String`.
pub fn panic_payload_to_string(payload: &(dyn Any + Send)) -> Option<String> {
    payload
        .downcast_ref::<&'static str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
}

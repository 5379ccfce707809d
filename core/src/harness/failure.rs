use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as _;
use std::sync::{Mutex, Once};

use crate::error::OperationError;
use crate::protocol::FailureReport;

pub const PANIC_KIND: &str = "panic";

/// Stack section holding the backtrace of where the failure was raised.
const ORIGIN_LABEL: &str = "backtrace:";
/// Stack section holding the backtrace of where the failure was reported.
const REPORTED_AT_LABEL: &str = "reported at:";

struct CapturedPanic {
    location: Option<String>,
    backtrace: Vec<String>,
}

static LAST_PANIC: Mutex<Option<CapturedPanic>> = Mutex::new(None);
static HOOK: Once = Once::new();

/// Installs a panic hook that records where the panic happened so the
/// harness can report it. The previous hook still runs.
pub fn install_panic_capture() {
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let location = info
                .location()
                .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()));
            let backtrace = format_backtrace(&Backtrace::force_capture());
            if let Ok(mut slot) = LAST_PANIC.lock() {
                *slot = Some(CapturedPanic {
                    location,
                    backtrace,
                });
            }
            previous(info);
        }));
    });
}

pub fn report_operation_error(err: &OperationError) -> FailureReport {
    let mut stack = Vec::new();
    stack.push(format!("0: {err}"));
    let mut source = err.source();
    let mut depth = 1;
    while let Some(cause) = source {
        stack.push(format!("{depth}: {cause}"));
        source = cause.source();
        depth += 1;
    }

    // Only anyhow errors carry the backtrace of where they were raised; for
    // the rest all we know is where the harness turned them into a report.
    let (label, captured) = match err {
        OperationError::Other(e) if e.backtrace().status() == BacktraceStatus::Captured => {
            (ORIGIN_LABEL, format_backtrace(e.backtrace()))
        }
        _ => (REPORTED_AT_LABEL, format_backtrace(&Backtrace::force_capture())),
    };
    if !captured.is_empty() {
        stack.push(label.to_string());
        stack.extend(captured);
    }

    FailureReport::new(err.kind(), err.to_string()).with_stack(stack)
}

pub fn report_panic(payload: Box<dyn Any + Send>) -> FailureReport {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    };

    let captured = LAST_PANIC.lock().ok().and_then(|mut slot| slot.take());
    let mut stack = vec![format!("0: {message}")];
    match captured {
        Some(CapturedPanic {
            location,
            backtrace,
        }) => {
            if let Some(location) = location {
                stack.push(format!("at {location}"));
            }
            if !backtrace.is_empty() {
                stack.push(ORIGIN_LABEL.to_string());
                stack.extend(backtrace);
            }
        }
        None => stack.push("at <location unavailable>".to_string()),
    }

    FailureReport::new(PANIC_KIND, message).with_stack(stack)
}

fn format_backtrace(bt: &Backtrace) -> Vec<String> {
    bt.to_string()
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect()
}

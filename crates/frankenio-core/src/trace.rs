//! Structured diagnostic events.
//!
//! Streams report notable transitions (protocol failures, stream resets,
//! dead pipe endpoints, failed closes) as single-line JSON records. Nothing
//! is written unless tracing is enabled, either through `FRANKENIO_TRACE`
//! or [`set_level`], and a sink has been installed with [`set_sink`]
//! (stderr is used when tracing is on and no sink is installed).

use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::{self, TraceLevel};
use crate::error::IoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One structured event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub timestamp: String,
    pub level: EventLevel,
    pub component: String,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errno: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl TraceEvent {
    #[must_use]
    pub fn new(level: EventLevel, component: &str, event: &str) -> Self {
        Self {
            timestamp: now_utc(),
            level,
            component: component.to_string(),
            event: event.to_string(),
            errno: None,
            message: None,
            details: None,
        }
    }

    /// Attach an error's errno and message.
    #[must_use]
    pub fn with_error(mut self, err: &IoError) -> Self {
        self.errno = Some(err.errno());
        self.message = Some(err.to_string());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

// ---------------------------------------------------------------------------
// Level and sink
// ---------------------------------------------------------------------------

// 0=Off, 1=On, 2=Verbose, 255=follow configuration.
static LEVEL_OVERRIDE: AtomicU8 = AtomicU8::new(LEVEL_FROM_CONFIG);
const LEVEL_FROM_CONFIG: u8 = 255;

static SINK: Mutex<Option<Box<dyn Write + Send>>> = Mutex::new(None);

/// Override the configured trace level for the whole process.
pub fn set_level(level: TraceLevel) {
    let v = match level {
        TraceLevel::Off => 0,
        TraceLevel::On => 1,
        TraceLevel::Verbose => 2,
    };
    LEVEL_OVERRIDE.store(v, Ordering::Release);
}

/// Effective trace level.
#[must_use]
pub fn level() -> TraceLevel {
    match LEVEL_OVERRIDE.load(Ordering::Acquire) {
        0 => TraceLevel::Off,
        1 => TraceLevel::On,
        2 => TraceLevel::Verbose,
        _ => config::config().trace,
    }
}

/// Route events to `sink`, returning the previous one.
pub fn set_sink(sink: Box<dyn Write + Send>) -> Option<Box<dyn Write + Send>> {
    SINK.lock().replace(sink)
}

/// Remove the installed sink.
pub fn clear_sink() -> Option<Box<dyn Write + Send>> {
    SINK.lock().take()
}

/// Write an event if tracing is enabled.
///
/// Debug-level events need `Verbose`. Failures to write are ignored: a
/// diagnostic sink must never turn a successful stream operation into an
/// error.
pub fn emit(event: TraceEvent) {
    let lvl = level();
    if !lvl.enabled() || (event.level == EventLevel::Debug && lvl < TraceLevel::Verbose) {
        return;
    }
    let Ok(line) = serde_json::to_string(&event) else {
        return;
    };
    let mut guard = SINK.lock();
    match guard.as_mut() {
        Some(sink) => {
            let _ = writeln!(sink, "{line}");
            let _ = sink.flush();
        }
        None => {
            let _ = writeln!(std::io::stderr(), "{line}");
        }
    }
}

/// Shorthand: report a failure from `component`.
pub fn error(component: &str, event: &str, err: &IoError) {
    if level().enabled() {
        emit(TraceEvent::new(EventLevel::Error, component, event).with_error(err));
    }
}

/// Shorthand: informational event with details.
pub fn info(component: &str, event: &str, details: serde_json::Value) {
    if level().enabled() {
        emit(TraceEvent::new(EventLevel::Info, component, event).with_details(details));
    }
}

/// Shorthand: verbose-only event with details.
pub fn debug(component: &str, event: &str, details: serde_json::Value) {
    if level() >= TraceLevel::Verbose {
        emit(TraceEvent::new(EventLevel::Debug, component, event).with_details(details));
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Current UTC time as `YYYY-MM-DDTHH:MM:SS.mmmZ`.
#[must_use]
pub fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format_utc(duration.as_secs(), duration.subsec_millis())
}

fn format_utc(secs: u64, millis: u32) -> String {
    let days = (secs / 86_400) as i64;
    let rem = secs % 86_400;
    let (y, m, d) = civil_from_days(days);
    format!(
        "{y:04}-{m:02}-{d:02}T{:02}:{:02}:{:02}.{millis:03}Z",
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60,
    )
}

// Days since 1970-01-01 to (year, month, day), proleptic Gregorian.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn utc_formatting() {
        assert_eq!(format_utc(0, 0), "1970-01-01T00:00:00.000Z");
        assert_eq!(format_utc(951_782_400, 5), "2000-02-29T00:00:00.005Z");
        assert_eq!(format_utc(1_700_000_000, 123), "2023-11-14T22:13:20.123Z");
    }

    #[test]
    fn event_serializes_optional_fields_only_when_set() {
        let ev = TraceEvent::new(EventLevel::Warn, "pipe", "read_end_dead");
        let json: serde_json::Value = serde_json::from_str(&serde_json::to_string(&ev).unwrap()).unwrap();
        assert_eq!(json["level"], "warn");
        assert_eq!(json["component"], "pipe");
        assert!(json.get("errno").is_none());

        let ev = ev.with_error(&IoError::PushbackOverflow);
        assert_eq!(ev.errno, Some(crate::error::errno::ENOSPC));
        assert_eq!(ev.message.as_deref(), Some("Pushback buffer overflow"));
    }

    #[test]
    fn emit_writes_jsonl_to_installed_sink() {
        let buf = SharedBuf::default();
        let previous = set_sink(Box::new(buf.clone()));
        set_level(TraceLevel::Verbose);

        error("trace-test", "trace_test_unique_event", &IoError::Closed);
        debug("trace-test", "trace_test_debug_event", serde_json::json!({"n": 1}));

        set_level(TraceLevel::Off);
        info("trace-test", "trace_test_suppressed_event", serde_json::json!({}));
        match previous {
            Some(p) => {
                set_sink(p);
            }
            None => {
                clear_sink();
            }
        }

        let text = String::from_utf8(buf.0.lock().clone()).unwrap();
        let ours: Vec<serde_json::Value> = text
            .lines()
            .filter_map(|l| serde_json::from_str::<serde_json::Value>(l).ok())
            .filter(|v| v["component"] == "trace-test")
            .collect();
        assert_eq!(ours.len(), 2);
        assert_eq!(ours[0]["event"], "trace_test_unique_event");
        assert_eq!(ours[0]["errno"], crate::error::errno::EBADF);
        assert_eq!(ours[1]["details"]["n"], 1);
    }
}

//! Runtime I/O configuration.
//!
//! Values come from environment variables, read once and cached:
//! - `FRANKENIO_LINE_SEPARATOR`: `lf`, `crlf`, `cr` or `platform` (default).
//!   Used by `BufferedWriter::new_line`.
//! - `FRANKENIO_BUFFER_SIZE`: default capacity of buffered streams
//!   (default 8192, minimum 1).
//! - `FRANKENIO_TRACE`: `off` (default), `on`, `verbose`. Gates the
//!   structured events in [`crate::trace`].
//!
//! Embedders that do not want process-wide state build an [`IoConfig`]
//! directly and pass its values to the constructors that take them.

use std::sync::OnceLock;

/// Default buffer size for buffered streams.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Line terminator written by `new_line`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineSeparator {
    Lf,
    CrLf,
    Cr,
    #[default]
    Platform,
}

impl LineSeparator {
    /// Parse from string (case-insensitive). Unknown values fall back to `Platform`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "lf" | "\\n" | "unix" => Self::Lf,
            "crlf" | "\\r\\n" | "windows" | "dos" => Self::CrLf,
            "cr" | "\\r" | "mac" => Self::Cr,
            _ => Self::Platform,
        }
    }

    /// The terminator text.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
            Self::Cr => "\r",
            Self::Platform => {
                if cfg!(windows) {
                    "\r\n"
                } else {
                    "\n"
                }
            }
        }
    }
}

/// Verbosity of structured trace events.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TraceLevel {
    #[default]
    Off,
    On,
    Verbose,
}

impl TraceLevel {
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" | "1" | "true" | "yes" => Self::On,
            "verbose" | "debug" | "2" | "all" => Self::Verbose,
            _ => Self::Off,
        }
    }

    #[must_use]
    pub const fn enabled(self) -> bool {
        !matches!(self, Self::Off)
    }
}

/// Resolved configuration values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoConfig {
    pub line_separator: LineSeparator,
    pub buffer_size: usize,
    pub trace: TraceLevel,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            line_separator: LineSeparator::Platform,
            buffer_size: DEFAULT_BUFFER_SIZE,
            trace: TraceLevel::Off,
        }
    }
}

impl IoConfig {
    /// Build a configuration from a lookup function (env var name -> value).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(v) = lookup("FRANKENIO_LINE_SEPARATOR") {
            cfg.line_separator = LineSeparator::from_str_loose(&v);
        }
        if let Some(v) = lookup("FRANKENIO_BUFFER_SIZE") {
            cfg.buffer_size = parse_buffer_size(&v);
        }
        if let Some(v) = lookup("FRANKENIO_TRACE") {
            cfg.trace = TraceLevel::from_str_loose(&v);
        }
        cfg
    }

    /// Read the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

fn parse_buffer_size(raw: &str) -> usize {
    let raw = raw.trim().replace('_', "");
    let parsed = if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        usize::from_str_radix(hex, 16).ok()
    } else if let Some(kib) = raw.strip_suffix(['k', 'K']) {
        kib.parse::<usize>().ok().and_then(|n| n.checked_mul(1024))
    } else {
        raw.parse::<usize>().ok()
    };
    parsed.unwrap_or(DEFAULT_BUFFER_SIZE).max(1)
}

static CONFIG: OnceLock<IoConfig> = OnceLock::new();

/// Process-wide configuration (reads the environment on first call).
#[must_use]
pub fn config() -> &'static IoConfig {
    CONFIG.get_or_init(IoConfig::from_env)
}

/// Configured line terminator.
#[must_use]
pub fn line_separator() -> &'static str {
    config().line_separator.as_str()
}

/// Configured default buffer capacity.
#[must_use]
pub fn default_buffer_size() -> usize {
    config().buffer_size
}

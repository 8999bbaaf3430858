//! Debug-gated log sink shared by the session and its transport
//!
//! The relay's own chatter (connection lifecycle, subscribe outcomes, payload
//! dumps) is only emitted when debug mode is switched on. The logger is an
//! ordinary value: the session builds one, `init` flips its flag, and every
//! component that wants to log holds an `Arc<Logger>`.
//!
//! Output goes through `tracing` with target [`LOG_TARGET`], so the console
//! sink is whatever subscriber the host application installed.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// `tracing` target of every line emitted through [`Logger::log`]
pub const LOG_TARGET: &str = "mqtt_relay";

#[derive(Debug, Default)]
pub struct Logger {
    is_debug: AtomicBool,
}

impl Logger {
    pub fn new(is_debug: bool) -> Self {
        Self {
            is_debug: AtomicBool::new(is_debug),
        }
    }

    /// Switches debug output on or off. `None` counts as off.
    pub fn set_debug(&self, is_debug: impl Into<Option<bool>>) {
        let flag = is_debug.into().unwrap_or(false);
        self.is_debug.store(flag, Ordering::Relaxed);
    }

    pub fn is_debug(&self) -> bool {
        self.is_debug.load(Ordering::Relaxed)
    }

    /// Emits `args` when debug mode is on, does nothing otherwise
    pub fn log(&self, args: fmt::Arguments<'_>) {
        if !self.is_debug() {
            return;
        }
        tracing::info!(target: LOG_TARGET, "{}", args);
    }
}

/// Formats and forwards a line to [`Logger::log`]
///
/// ```rust
/// use mqtt_relay::{relay_log, Logger};
///
/// let logger = Logger::new(true);
/// relay_log!(logger, "subscribed to {}", "sensors/#");
/// ```
#[macro_export]
macro_rules! relay_log {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log(format_args!($($arg)+))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn capture<F: FnOnce()>(f: F) -> String {
        let buffer = Captured::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        buffer.text()
    }

    #[test]
    fn silent_by_default() {
        let logger = Logger::default();
        let out = capture(|| relay_log!(logger, "connected to {}", "broker"));
        assert!(out.is_empty());
    }

    #[test]
    fn emits_when_debug_enabled() {
        let logger = Logger::new(false);
        logger.set_debug(true);
        let out = capture(|| relay_log!(logger, "connected to {}", "broker"));
        assert!(out.contains("connected to broker"));
        assert!(out.contains(LOG_TARGET));
    }

    #[test]
    fn none_switches_debug_off() {
        let logger = Logger::new(true);
        logger.set_debug(None::<bool>);
        assert!(!logger.is_debug());
        let out = capture(|| relay_log!(logger, "offline"));
        assert!(out.is_empty());
    }
}

//! # Logging Utilities
//!
//! Rate limiting and hex dumps for frame-level logging. Devices that stream
//! malformed frames every few seconds would otherwise flood the log with the
//! same warning.
//!
//! ```rust
//! use solar_modbus::util::logging::{LogThrottle, log_frame_hex};
//!
//! let mut throttle = LogThrottle::new(60_000, 3);
//! if throttle.allow() {
//!     log::warn!("short frame from inverter");
//! }
//! log_frame_hex("notify", &[0x01, 0x03, 0x00, 0x02]);
//! ```

use std::time::Instant;

/// Longest prefix of a frame written to the debug log
const MAX_LOG_BYTES: usize = 64;

/// Throttling structure for rate-limiting log messages
#[derive(Debug)]
pub struct LogThrottle {
    /// Time window for throttling (in milliseconds)
    window_ms: u64,
    /// Maximum messages allowed per window
    cap: u32,
    /// Current message count in window
    count: u32,
    /// Messages suppressed since the window opened
    suppressed: u32,
    /// Start time of current window
    t0: Instant,
}

impl LogThrottle {
    /// Create new throttle with time window and message cap
    pub fn new(window_ms: u64, cap: u32) -> Self {
        Self {
            window_ms,
            cap,
            count: 0,
            suppressed: 0,
            t0: Instant::now(),
        }
    }

    /// Check if logging is allowed (resets counter after window expires)
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        let elapsed_ms = now.duration_since(self.t0).as_millis() as u64;

        if elapsed_ms > self.window_ms {
            if self.suppressed > 0 {
                log::debug!("{} log messages suppressed in last window", self.suppressed);
            }
            self.t0 = now;
            self.count = 0;
            self.suppressed = 0;
        }

        self.count += 1;
        if self.count <= self.cap {
            true
        } else {
            self.suppressed += 1;
            false
        }
    }

    /// Messages dropped in the current window
    pub fn suppressed(&self) -> u32 {
        self.suppressed
    }
}

/// Log frame bytes as compact hex at debug level.
pub fn log_frame_hex(prefix: &str, data: &[u8]) {
    if !log::log_enabled!(log::Level::Debug) {
        return;
    }

    let display_data = &data[..data.len().min(MAX_LOG_BYTES)];
    let hex_str = crate::util::hex::format_hex_compact(display_data);
    let suffix = if data.len() > MAX_LOG_BYTES {
        format!(" ... ({} bytes total)", data.len())
    } else {
        String::new()
    };

    log::debug!("{prefix}: {hex_str}{suffix}");
}

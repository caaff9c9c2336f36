//! Selection of a device timebase for a requested sample interval.

use crate::sys::ScopeDriver;
use crate::{Error, Result};

/// A resolved device timebase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimebaseSelection {
    /// Device-specific timebase code.
    pub code: u32,
    /// Sample interval achieved at this code, in nanoseconds. Never shorter
    /// than the requested interval.
    pub interval_ns: f64,
    /// Largest sample count the device can store at this code.
    pub max_samples: u32,
}

/// Finds the smallest (fastest) timebase code whose achieved interval is at
/// least `interval_ns`.
///
/// The scan starts at the driver's closed-form estimate and walks upward,
/// skipping candidates the device rejects, so a requested interval of zero
/// (or one below the fastest native interval) resolves to the fastest valid
/// timebase. The scan is bounded by the driver's code range; exhausting it
/// fails with `TimebaseNotFound` rather than looping.
pub(crate) fn resolve<D: ScopeDriver + ?Sized>(driver: &mut D, samples: u32,
                                               oversample: u16, interval_ns: f64)
                                               -> Result<TimebaseSelection> {
    let max_code = driver.max_timebase();
    for code in driver.first_timebase(interval_ns)..=max_code {
        if let Some(info) = driver.get_timebase(code, samples, oversample)? {
            if info.interval_ns >= interval_ns {
                log::debug!("timebase {} achieves {} ns (requested {} ns), \
                             up to {} samples",
                    code, info.interval_ns, interval_ns, info.max_samples);
                return Ok(TimebaseSelection {
                    code,
                    interval_ns: info.interval_ns,
                    max_samples: info.max_samples,
                });
            }
        }
    }
    Err(Error::TimebaseNotFound { interval_ns, max_code })
}

//! Sample buffers: the accumulation buffer filled while streaming, and the
//! converted time series handed back to the caller.

use bitflags::bitflags;

use crate::config::{Channel, VoltageRange};
use crate::sys::StreamChunk;
use crate::{Error, Result};

bitflags! {
    /// Channels whose input exceeded the configured range at least once
    /// during a capture. Informational, never an error.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Overflow: u8 {
        const CHANNEL_A = 1 << 0;
        const CHANNEL_B = 1 << 1;
    }
}

/// Samples converted to physical units: one voltage per enabled channel for
/// each point of the time axis. Times start at zero and increase by the
/// achieved sample interval.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    /// Achieved sample interval in seconds.
    pub interval: f64,
    /// Sample times in seconds.
    pub times: Vec<f64>,
    /// Voltages per channel; `None` for channels not enabled in the capture.
    pub channels: [Option<Vec<f64>>; 2],
    pub overflow: Overflow,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn channel(&self, channel: Channel) -> Option<&[f64]> {
        self.channels[channel.index()].as_deref()
    }
}

/// Converts raw ADC counts to a time series. The sample count is taken from
/// the channel buffers, which hold equally many samples per enabled channel.
pub(crate) fn convert(interval_ns: f64, raw: [Option<Vec<i16>>; 2],
                      ranges: [Option<VoltageRange>; 2], max_adc: i16,
                      overflow: Overflow) -> TimeSeries {
    let interval = interval_ns * 1e-9;
    let mut count = 0;
    let mut channels = [None, None];
    for (index, (buffer, range)) in raw.into_iter().zip(ranges).enumerate() {
        if let (Some(buffer), Some(range)) = (buffer, range) {
            count = buffer.len();
            channels[index] = Some(buffer.into_iter()
                .map(|sample| range.from_adc(sample, max_adc))
                .collect());
        }
    }
    let times = (0..count).map(|index| index as f64 * interval).collect();
    TimeSeries { interval, times, channels, overflow }
}

/// Accumulation buffer for one streaming capture. Owned by a single call;
/// the fill offset only ever grows and never exceeds the capacity.
#[derive(Debug)]
pub(crate) struct Accumulator {
    channels: [Option<Vec<i16>>; 2],
    capacity: usize,
    filled: usize,
    overflow: Overflow,
    auto_stopped: bool,
}

impl Accumulator {
    pub fn new(capacity: usize, enabled: [bool; 2]) -> Accumulator {
        Accumulator {
            channels: enabled.map(|on| on.then(|| Vec::with_capacity(capacity))),
            capacity,
            filled: 0,
            overflow: Overflow::empty(),
            auto_stopped: false,
        }
    }

    /// Appends one chunk from the device's overview buffer. A chunk that
    /// would take the fill offset past the capacity is a fault in the device
    /// or driver and fails without copying anything.
    pub fn append(&mut self, chunk: &StreamChunk) -> Result<()> {
        let incoming = chunk.len();
        if self.filled + incoming > self.capacity {
            return Err(Error::Overrun {
                filled: self.filled,
                incoming,
                capacity: self.capacity,
            });
        }
        self.overflow |= chunk.overflow;
        if chunk.auto_stop {
            self.auto_stopped = true;
        }
        for (buffer, samples) in self.channels.iter_mut().zip(chunk.samples) {
            if let Some(buffer) = buffer {
                assert_eq!(samples.len(), incoming,
                    "driver delivered unequal channel slices");
                buffer.extend_from_slice(samples);
            }
        }
        self.filled += incoming;
        Ok(())
    }

    pub fn full(&self) -> bool {
        self.filled >= self.capacity
    }

    pub fn auto_stopped(&self) -> bool {
        self.auto_stopped
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    /// Converts whatever has accumulated so far.
    pub fn finish(self, interval_ns: f64, ranges: [Option<VoltageRange>; 2],
                  max_adc: i16) -> TimeSeries {
        convert(interval_ns, self.channels, ranges, max_adc, self.overflow)
    }
}

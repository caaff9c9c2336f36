use crate::capture::Overflow;
use crate::config::{Channel, ChannelConfiguration};
use crate::trigger::Edge;
use crate::Result;

/// What the device reports about one timebase candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimebaseInfo {
    /// Achieved sample interval at this code, in nanoseconds.
    pub interval_ns: f64,
    /// Largest sample count the device memory holds at this code, given
    /// the currently enabled channels.
    pub max_samples: u32,
}

/// Trigger condition with the threshold already converted to ADC counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerParams {
    pub channel: Channel,
    pub threshold_adc: i16,
    pub edge: Edge,
    pub pre_trigger_samples: u32,
    /// 0 waits for the trigger indefinitely.
    pub auto_trigger_ms: u32,
}

/// Raw samples retrieved after a block capture, one buffer per enabled channel.
#[derive(Debug)]
pub struct RawBlock {
    pub channels: [Option<Vec<i16>>; 2],
    pub overflow: Overflow,
}

/// One batch of streaming samples handed out of the device's overview buffer.
/// Disabled channels carry an empty slice; enabled channels carry equally
/// many samples.
#[derive(Debug, Clone, Copy)]
pub struct StreamChunk<'a> {
    pub samples: [&'a [i16]; 2],
    pub overflow: Overflow,
    pub auto_stop: bool,
}

impl StreamChunk<'_> {
    pub fn len(&self) -> usize {
        self.samples[0].len().max(self.samples[1].len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The boundary to a vendor driver for one scope sub-family. The unit handle
/// is owned by the implementation and closed when it is dropped.
pub trait ScopeDriver {
    fn set_channel(&mut self, channel: Channel,
                   config: Option<&ChannelConfiguration>) -> Result<()>;

    fn set_trigger(&mut self, trigger: Option<&TriggerParams>) -> Result<()>;

    /// Queries one timebase candidate. `Ok(None)` means the device rejects
    /// this code for the given sample count; a larger code may still work.
    fn get_timebase(&mut self, code: u32, samples: u32, oversample: u16)
                    -> Result<Option<TimebaseInfo>>;

    /// Largest timebase code worth probing; bounds the resolver's scan.
    fn max_timebase(&self) -> u32;

    /// Smallest code that could possibly achieve `interval_ns`. Codes below
    /// the returned one are guaranteed to be faster than requested, so the
    /// resolver may start its scan here. Defaults to a full scan.
    fn first_timebase(&self, interval_ns: f64) -> u32 {
        let _ = interval_ns;
        0
    }

    fn run_block(&mut self, samples: u32, timebase: u32, oversample: u16) -> Result<()>;

    fn is_ready(&mut self) -> Result<bool>;

    fn get_values(&mut self, samples: u32) -> Result<RawBlock>;

    /// Starts continuous sampling into a device-side ring buffer of
    /// `ring_samples` per channel. With `auto_stop`, the device stops itself
    /// once `target_samples` have been taken. Returns the actual sample
    /// interval in nanoseconds.
    fn run_streaming(&mut self, interval_ns: u32, ring_samples: u32,
                     target_samples: u32, auto_stop: bool) -> Result<u32>;

    /// Asks the driver for samples taken since the last call. Invokes
    /// `on_data` at most once and returns whether it was invoked.
    fn get_streaming_latest(&mut self,
                            on_data: &mut dyn FnMut(StreamChunk)) -> Result<bool>;

    fn stop(&mut self) -> Result<()>;

    /// Full-scale ADC count; the divisor of the count-to-volts conversion.
    fn max_adc_value(&self) -> i16;
}

impl ScopeDriver for Box<dyn ScopeDriver> {
    fn set_channel(&mut self, channel: Channel,
                   config: Option<&ChannelConfiguration>) -> Result<()> {
        (**self).set_channel(channel, config)
    }

    fn set_trigger(&mut self, trigger: Option<&TriggerParams>) -> Result<()> {
        (**self).set_trigger(trigger)
    }

    fn get_timebase(&mut self, code: u32, samples: u32, oversample: u16)
                    -> Result<Option<TimebaseInfo>> {
        (**self).get_timebase(code, samples, oversample)
    }

    fn max_timebase(&self) -> u32 {
        (**self).max_timebase()
    }

    fn first_timebase(&self, interval_ns: f64) -> u32 {
        (**self).first_timebase(interval_ns)
    }

    fn run_block(&mut self, samples: u32, timebase: u32, oversample: u16) -> Result<()> {
        (**self).run_block(samples, timebase, oversample)
    }

    fn is_ready(&mut self) -> Result<bool> {
        (**self).is_ready()
    }

    fn get_values(&mut self, samples: u32) -> Result<RawBlock> {
        (**self).get_values(samples)
    }

    fn run_streaming(&mut self, interval_ns: u32, ring_samples: u32,
                     target_samples: u32, auto_stop: bool) -> Result<u32> {
        (**self).run_streaming(interval_ns, ring_samples, target_samples, auto_stop)
    }

    fn get_streaming_latest(&mut self,
                            on_data: &mut dyn FnMut(StreamChunk)) -> Result<bool> {
        (**self).get_streaming_latest(on_data)
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }

    fn max_adc_value(&self) -> i16 {
        (**self).max_adc_value()
    }
}

#[cfg(feature = "hardware")]
pub mod ps2000;
#[cfg(feature = "hardware")]
pub mod ps2000a;

#[cfg(test)]
pub mod fake;

//! Deterministic in-memory driver backing the unit tests. Models a 2000A-ish
//! capability table (1, 2, 4 ns, then 8 ns steps) and plays back scripted
//! streaming chunks.

use std::collections::VecDeque;

use crate::capture::Overflow;
use crate::config::{Channel, ChannelConfiguration};
use crate::{Error, Result};

use super::{RawBlock, ScopeDriver, StreamChunk, TimebaseInfo, TriggerParams};

#[derive(Debug)]
pub struct FakeScope {
    pub fastest_interval_ns: f64,
    pub max_timebase: u32,
    /// Codes below this are rejected, like a real scope refusing its fastest
    /// timebases for some configurations.
    pub min_timebase: u32,
    /// Device memory with a single channel enabled; shared between channels.
    pub memory_samples: u32,
    pub max_adc: i16,
    /// Scripts a failure with this status code on the named operation.
    pub fail_op: Option<(&'static str, i32)>,
    pub enabled: [bool; 2],
    pub trigger: Option<TriggerParams>,
    /// Block samples to hand out; ramps are generated when not scripted.
    pub block_data: [Option<Vec<i16>>; 2],
    pub block_overflow: Overflow,
    /// How many `is_ready` polls report false before the block completes.
    pub ready_after_polls: u32,
    pub ready_polls: u32,
    pub stop_count: usize,
    pub stream_ring: u32,
    pub stream_target: u32,
    stream_chunks: VecDeque<(usize, bool)>,
    stream_position: usize,
}

impl FakeScope {
    pub fn new() -> FakeScope {
        FakeScope {
            fastest_interval_ns: 1.0,
            max_timebase: 1 << 20,
            min_timebase: 0,
            memory_samples: 8064,
            max_adc: 32767,
            fail_op: None,
            enabled: [false, false],
            trigger: None,
            block_data: [None, None],
            block_overflow: Overflow::empty(),
            ready_after_polls: 0,
            ready_polls: 0,
            stop_count: 0,
            stream_ring: 0,
            stream_target: 0,
            stream_chunks: VecDeque::new(),
            stream_position: 0,
        }
    }

    /// Queues streaming chunks of the given sizes; with `auto_stop_last`,
    /// the final chunk carries the device's auto-stop flag.
    pub fn script_stream(&mut self, sizes: &[usize], auto_stop_last: bool) {
        self.stream_chunks = sizes.iter().enumerate()
            .map(|(index, &size)| (size, auto_stop_last && index == sizes.len() - 1))
            .collect();
    }

    fn fail(&self, op: &'static str) -> Result<()> {
        match self.fail_op {
            Some((failing, code)) if failing == op =>
                Err(Error::Device { op: failing, code }),
            _ => Ok(()),
        }
    }

    fn interval_ns(&self, code: u32) -> f64 {
        if code <= 2 {
            self.fastest_interval_ns * (1u32 << code) as f64
        } else {
            self.fastest_interval_ns * 8.0 * (code - 2) as f64
        }
    }

    fn enabled_count(&self) -> u32 {
        self.enabled.iter().filter(|&&on| on).count() as u32
    }

    fn ramp(&self, length: usize, offset: usize) -> Vec<i16> {
        (0..length).map(|index| ((offset + index) % 3000) as i16).collect()
    }
}

impl ScopeDriver for FakeScope {
    fn set_channel(&mut self, channel: Channel,
                   config: Option<&ChannelConfiguration>) -> Result<()> {
        self.fail("set_channel")?;
        self.enabled[channel.index()] = config.is_some();
        Ok(())
    }

    fn set_trigger(&mut self, trigger: Option<&TriggerParams>) -> Result<()> {
        self.fail("set_trigger")?;
        self.trigger = trigger.copied();
        Ok(())
    }

    fn get_timebase(&mut self, code: u32, _samples: u32, _oversample: u16)
                    -> Result<Option<TimebaseInfo>> {
        self.fail("get_timebase")?;
        if code < self.min_timebase {
            return Ok(None);
        }
        Ok(Some(TimebaseInfo {
            interval_ns: self.interval_ns(code),
            max_samples: self.memory_samples / self.enabled_count().max(1),
        }))
    }

    fn max_timebase(&self) -> u32 {
        self.max_timebase
    }

    fn run_block(&mut self, _samples: u32, _timebase: u32, _oversample: u16)
                 -> Result<()> {
        self.fail("run_block")?;
        self.ready_polls = 0;
        Ok(())
    }

    fn is_ready(&mut self) -> Result<bool> {
        self.fail("is_ready")?;
        self.ready_polls += 1;
        Ok(self.ready_polls > self.ready_after_polls)
    }

    fn get_values(&mut self, samples: u32) -> Result<RawBlock> {
        self.fail("get_values")?;
        let mut channels = [None, None];
        for index in 0..2 {
            if self.enabled[index] {
                let mut data = match &self.block_data[index] {
                    Some(scripted) => scripted.clone(),
                    None => self.ramp(samples as usize, 0),
                };
                data.truncate(samples as usize);
                channels[index] = Some(data);
            }
        }
        Ok(RawBlock { channels, overflow: self.block_overflow })
    }

    fn run_streaming(&mut self, interval_ns: u32, ring_samples: u32,
                     target_samples: u32, _auto_stop: bool) -> Result<u32> {
        self.fail("run_streaming")?;
        self.stream_ring = ring_samples;
        self.stream_target = target_samples;
        self.stream_position = 0;
        Ok(interval_ns)
    }

    fn get_streaming_latest(&mut self,
                            on_data: &mut dyn FnMut(StreamChunk)) -> Result<bool> {
        self.fail("get_streaming_latest")?;
        let (length, auto_stop) = match self.stream_chunks.pop_front() {
            Some(chunk) => chunk,
            None => return Ok(false),
        };
        let a = self.enabled[0].then(|| self.ramp(length, self.stream_position));
        let b = self.enabled[1].then(|| self.ramp(length, self.stream_position));
        self.stream_position += length;
        on_data(StreamChunk {
            samples: [a.as_deref().unwrap_or(&[]), b.as_deref().unwrap_or(&[])],
            overflow: Overflow::empty(),
            auto_stop,
        });
        Ok(true)
    }

    fn stop(&mut self) -> Result<()> {
        self.fail("stop")?;
        self.stop_count += 1;
        Ok(())
    }

    fn max_adc_value(&self) -> i16 {
        self.max_adc
    }
}

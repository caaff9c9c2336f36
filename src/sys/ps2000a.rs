//! Backend for the 2000A-series driver (e.g. the 2208B).

use std::ptr;

use libc::{c_char, c_void};

use crate::capture::Overflow;
use crate::config::{Channel, ChannelConfiguration, Coupling, VoltageRange};
use crate::trigger::Edge;
use crate::{Error, Result};

use super::{RawBlock, ScopeDriver, StreamChunk, TimebaseInfo, TriggerParams};

type BlockReady = unsafe extern "C" fn(handle: i16, status: u32,
                                       parameter: *mut c_void);
type StreamingReady = unsafe extern "C" fn(handle: i16, no_of_samples: i32,
                                           start_index: u32, overflow: i16,
                                           trigger_at: u32, triggered: i16,
                                           auto_stop: i16, parameter: *mut c_void);

#[link(name = "ps2000a")]
extern "C" {
    fn ps2000aOpenUnit(handle: *mut i16, serial: *mut c_char) -> u32;
    fn ps2000aCloseUnit(handle: i16) -> u32;
    fn ps2000aSetChannel(handle: i16, channel: i32, enabled: i16, coupling: i32,
                         range: i32, analogue_offset: f32) -> u32;
    fn ps2000aGetTimebase2(handle: i16, timebase: u32, no_samples: i32,
                           time_interval_ns: *mut f32, oversample: i16,
                           max_samples: *mut i32, segment_index: u32) -> u32;
    fn ps2000aSetSimpleTrigger(handle: i16, enable: i16, source: i32,
                               threshold: i16, direction: i32, delay: u32,
                               auto_trigger_ms: i16) -> u32;
    fn ps2000aRunBlock(handle: i16, no_of_pre_trigger_samples: i32,
                       no_of_post_trigger_samples: i32, timebase: u32,
                       oversample: i16, time_indisposed_ms: *mut i32,
                       segment_index: u32, ready: Option<BlockReady>,
                       parameter: *mut c_void) -> u32;
    fn ps2000aIsReady(handle: i16, ready: *mut i16) -> u32;
    fn ps2000aSetDataBuffer(handle: i16, channel: i32, buffer: *mut i16,
                            buffer_length: i32, segment_index: u32,
                            mode: i32) -> u32;
    fn ps2000aGetValues(handle: i16, start_index: u32, no_of_samples: *mut u32,
                        down_sample_ratio: u32, down_sample_ratio_mode: i32,
                        segment_index: u32, overflow: *mut i16) -> u32;
    fn ps2000aMaximumValue(handle: i16, value: *mut i16) -> u32;
    fn ps2000aRunStreaming(handle: i16, sample_interval: *mut u32,
                           sample_interval_time_units: i32,
                           max_pre_trigger_samples: u32,
                           max_post_trigger_samples: u32, auto_stop: i16,
                           down_sample_ratio: u32, down_sample_ratio_mode: i32,
                           overview_buffer_size: u32) -> u32;
    fn ps2000aGetStreamingLatestValues(handle: i16, callback: StreamingReady,
                                       parameter: *mut c_void) -> u32;
    fn ps2000aStop(handle: i16) -> u32;
}

const PICO_OK: u32 = 0x00;
const PICO_NOT_FOUND: u32 = 0x03;
const PICO_INVALID_TIMEBASE: u32 = 0x0e;

const TIME_UNITS_NS: i32 = 2;
const COUPLING_AC: i32 = 0;
const COUPLING_DC: i32 = 1;
const DIRECTION_RISING: i32 = 2;
const DIRECTION_FALLING: i32 = 3;
const RATIO_MODE_NONE: i32 = 0;

// Codes past the first three map to (code - 2) cycles of the 125 MHz clock.
const MAX_TIMEBASE: u32 = 1 << 30;

fn range_code(range: VoltageRange) -> i32 {
    match range {
        VoltageRange::mV20  => 1,
        VoltageRange::mV50  => 2,
        VoltageRange::mV100 => 3,
        VoltageRange::mV200 => 4,
        VoltageRange::mV500 => 5,
        VoltageRange::V1    => 6,
        VoltageRange::V2    => 7,
        VoltageRange::V5    => 8,
        VoltageRange::V10   => 9,
        VoltageRange::V20   => 10,
    }
}

fn overflow_flags(raw: i16) -> Overflow {
    Overflow::from_bits_truncate((raw & 0b11) as u8)
}

fn check(status: u32, op: &'static str) -> Result<()> {
    if status == PICO_OK {
        Ok(())
    } else {
        Err(Error::Device { op, code: status as i32 })
    }
}

struct PendingChunk {
    a: Vec<i16>,
    b: Vec<i16>,
    overflow: i16,
    auto_stop: bool,
}

// Carries the registered ring buffers into the callback and the copied-out
// chunk back; lives only for the duration of one latest-values call.
struct StreamContext<'a> {
    rings: &'a [Option<Vec<i16>>; 2],
    chunk: Option<PendingChunk>,
}

unsafe extern "C" fn on_streaming_ready(_handle: i16, no_of_samples: i32,
                                        start_index: u32, overflow: i16,
                                        _trigger_at: u32, _triggered: i16,
                                        auto_stop: i16, parameter: *mut c_void) {
    let context = &mut *(parameter as *mut StreamContext);
    let start = start_index as usize;
    let length = no_of_samples as usize;
    let copy = |ring: &Option<Vec<i16>>| {
        ring.as_ref().map_or(Vec::new(), |ring| ring[start..start + length].to_vec())
    };
    context.chunk = Some(PendingChunk {
        a: copy(&context.rings[0]),
        b: copy(&context.rings[1]),
        overflow,
        auto_stop: auto_stop != 0,
    });
}

#[derive(Debug)]
pub struct Ps2000aDriver {
    handle: i16,
    max_adc: i16,
    enabled: [bool; 2],
    // run_block splits the capture into pre and post trigger portions
    pre_trigger_samples: u32,
    rings: [Option<Vec<i16>>; 2],
}

impl Ps2000aDriver {
    pub fn open() -> Result<Ps2000aDriver> {
        let mut handle = 0i16;
        let status = unsafe { ps2000aOpenUnit(&mut handle, ptr::null_mut()) };
        match status {
            PICO_OK => {}
            PICO_NOT_FOUND => return Err(Error::NotFound),
            status => return Err(Error::Device { op: "ps2000aOpenUnit",
                code: status as i32 }),
        }
        let mut max_adc = 0i16;
        check(unsafe { ps2000aMaximumValue(handle, &mut max_adc) },
            "ps2000aMaximumValue")?;
        log::debug!("opened 2000A-series unit, handle {}, full scale {}",
            handle, max_adc);
        Ok(Ps2000aDriver {
            handle,
            max_adc,
            enabled: [false, false],
            pre_trigger_samples: 0,
            rings: [None, None],
        })
    }
}

impl ScopeDriver for Ps2000aDriver {
    fn set_channel(&mut self, channel: Channel,
                   config: Option<&ChannelConfiguration>) -> Result<()> {
        let (enabled, coupling, range) = match config {
            Some(config) => {
                let coupling = match config.coupling {
                    Coupling::AC => COUPLING_AC,
                    Coupling::DC => COUPLING_DC,
                };
                (1, coupling, range_code(config.range))
            }
            None => (0, COUPLING_DC, range_code(VoltageRange::default())),
        };
        check(unsafe {
            ps2000aSetChannel(self.handle, channel.index() as i32, enabled,
                coupling, range, 0.0)
        }, "ps2000aSetChannel")?;
        self.enabled[channel.index()] = config.is_some();
        Ok(())
    }

    fn set_trigger(&mut self, trigger: Option<&TriggerParams>) -> Result<()> {
        match trigger {
            Some(params) => {
                let direction = match params.edge {
                    Edge::Rising => DIRECTION_RISING,
                    Edge::Falling => DIRECTION_FALLING,
                };
                check(unsafe {
                    ps2000aSetSimpleTrigger(self.handle, 1,
                        params.channel.index() as i32, params.threshold_adc,
                        direction, 0,
                        params.auto_trigger_ms.min(i16::MAX as u32) as i16)
                }, "ps2000aSetSimpleTrigger")?;
                self.pre_trigger_samples = params.pre_trigger_samples;
            }
            None => {
                check(unsafe {
                    ps2000aSetSimpleTrigger(self.handle, 0, 0, 0,
                        DIRECTION_RISING, 0, 0)
                }, "ps2000aSetSimpleTrigger")?;
                self.pre_trigger_samples = 0;
            }
        }
        Ok(())
    }

    fn get_timebase(&mut self, code: u32, samples: u32, _oversample: u16)
                    -> Result<Option<TimebaseInfo>> {
        let mut interval_ns = 0f32;
        let mut max_samples = 0i32;
        // the oversample argument survives in the API but has no effect
        let status = unsafe {
            ps2000aGetTimebase2(self.handle, code, samples as i32,
                &mut interval_ns, 0, &mut max_samples, 0)
        };
        match status {
            PICO_OK => Ok(Some(TimebaseInfo {
                interval_ns: interval_ns as f64,
                max_samples: max_samples as u32,
            })),
            PICO_INVALID_TIMEBASE => Ok(None),
            status => Err(Error::Device { op: "ps2000aGetTimebase2",
                code: status as i32 }),
        }
    }

    fn max_timebase(&self) -> u32 {
        MAX_TIMEBASE
    }

    fn first_timebase(&self, interval_ns: f64) -> u32 {
        // codes 0..=2 sample at 1, 2 and 4 ns; beyond that the interval is
        // (code - 2) * 8 ns, so the estimate lands on the smallest candidate
        // that is not faster than requested
        if interval_ns <= 4.0 {
            let mut code = 0;
            while ((1u32 << code) as f64) < interval_ns {
                code += 1;
            }
            code
        } else {
            (interval_ns / 8.0).ceil().min((MAX_TIMEBASE - 2) as f64) as u32 + 2
        }
    }

    fn run_block(&mut self, samples: u32, timebase: u32, _oversample: u16)
                 -> Result<()> {
        let pre = self.pre_trigger_samples.min(samples) as i32;
        let post = samples as i32 - pre;
        let mut indisposed_ms = 0i32;
        // completion is polled through ps2000aIsReady, not the callback
        check(unsafe {
            ps2000aRunBlock(self.handle, pre, post, timebase, 0,
                &mut indisposed_ms, 0, None, ptr::null_mut())
        }, "ps2000aRunBlock")
    }

    fn is_ready(&mut self) -> Result<bool> {
        let mut ready = 0i16;
        check(unsafe { ps2000aIsReady(self.handle, &mut ready) },
            "ps2000aIsReady")?;
        Ok(ready != 0)
    }

    fn get_values(&mut self, samples: u32) -> Result<RawBlock> {
        let mut channels = [None, None];
        for (index, &enabled) in self.enabled.iter().enumerate() {
            if enabled {
                let mut buffer = vec![0i16; samples as usize];
                check(unsafe {
                    ps2000aSetDataBuffer(self.handle, index as i32,
                        buffer.as_mut_ptr(), samples as i32, 0, RATIO_MODE_NONE)
                }, "ps2000aSetDataBuffer")?;
                channels[index] = Some(buffer);
            }
        }
        let mut returned = samples;
        let mut overflow = 0i16;
        check(unsafe {
            ps2000aGetValues(self.handle, 0, &mut returned, 1, RATIO_MODE_NONE,
                0, &mut overflow)
        }, "ps2000aGetValues")?;
        for buffer in channels.iter_mut().flatten() {
            buffer.truncate(returned as usize);
        }
        Ok(RawBlock { channels, overflow: overflow_flags(overflow) })
    }

    fn run_streaming(&mut self, interval_ns: u32, ring_samples: u32,
                     target_samples: u32, auto_stop: bool) -> Result<u32> {
        for (index, &enabled) in self.enabled.iter().enumerate() {
            if enabled {
                let mut ring = vec![0i16; ring_samples as usize];
                check(unsafe {
                    ps2000aSetDataBuffer(self.handle, index as i32,
                        ring.as_mut_ptr(), ring_samples as i32, 0,
                        RATIO_MODE_NONE)
                }, "ps2000aSetDataBuffer")?;
                self.rings[index] = Some(ring);
            } else {
                self.rings[index] = None;
            }
        }
        let mut interval = interval_ns;
        check(unsafe {
            ps2000aRunStreaming(self.handle, &mut interval, TIME_UNITS_NS, 0,
                target_samples, auto_stop as i16, 1, RATIO_MODE_NONE,
                ring_samples)
        }, "ps2000aRunStreaming")?;
        // the driver rounds the interval to what the hardware can do
        Ok(interval)
    }

    fn get_streaming_latest(&mut self,
                            on_data: &mut dyn FnMut(StreamChunk)) -> Result<bool> {
        let mut context = StreamContext { rings: &self.rings, chunk: None };
        let status = unsafe {
            ps2000aGetStreamingLatestValues(self.handle, on_streaming_ready,
                &mut context as *mut StreamContext as *mut c_void)
        };
        check(status, "ps2000aGetStreamingLatestValues")?;
        match context.chunk.take() {
            None => Ok(false),
            Some(chunk) => {
                on_data(StreamChunk {
                    samples: [&chunk.a, &chunk.b],
                    overflow: overflow_flags(chunk.overflow),
                    auto_stop: chunk.auto_stop,
                });
                Ok(true)
            }
        }
    }

    fn stop(&mut self) -> Result<()> {
        check(unsafe { ps2000aStop(self.handle) }, "ps2000aStop")
    }

    fn max_adc_value(&self) -> i16 {
        self.max_adc
    }
}

impl Drop for Ps2000aDriver {
    fn drop(&mut self) {
        let status = unsafe { ps2000aCloseUnit(self.handle) };
        if status != PICO_OK {
            log::warn!("failed to close 2000A-series unit, handle {} (status {})",
                self.handle, status);
        }
    }
}

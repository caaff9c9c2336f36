//! Backend for the plain 2000-series driver (e.g. the 2204A).

use std::cell::RefCell;
use std::ptr;
use std::slice;

use crate::capture::Overflow;
use crate::config::{Channel, ChannelConfiguration, Coupling, VoltageRange};
use crate::trigger::Edge;
use crate::{Error, Result};

use super::{RawBlock, ScopeDriver, StreamChunk, TimebaseInfo, TriggerParams};

// Overview buffers arrive as [A max, A min, B max, B min]; the min buffers
// only carry data when aggregating.
type GetOverviewBuffersMaxMin = unsafe extern "C" fn(
    overview_buffers: *mut *mut i16, overflow: i16, triggered_at: u32,
    triggered: i16, auto_stop: i16, n_values: u32);

#[link(name = "ps2000")]
extern "C" {
    fn ps2000_open_unit() -> i16;
    fn ps2000_close_unit(handle: i16) -> i16;
    fn ps2000_set_channel(handle: i16, channel: i16, enabled: i16, dc: i16,
                          range: i16) -> i16;
    fn ps2000_get_timebase(handle: i16, timebase: i16, no_of_samples: i32,
                           time_interval: *mut i32, time_units: *mut i16,
                           oversample: i16, max_samples: *mut i32) -> i16;
    fn ps2000_set_trigger(handle: i16, source: i16, threshold: i16,
                          direction: i16, delay: i16, auto_trigger_ms: i16) -> i16;
    fn ps2000_run_block(handle: i16, no_of_values: i32, timebase: i16,
                        oversample: i16, time_indisposed_ms: *mut i32) -> i16;
    fn ps2000_ready(handle: i16) -> i16;
    fn ps2000_get_values(handle: i16, buffer_a: *mut i16, buffer_b: *mut i16,
                         buffer_c: *mut i16, buffer_d: *mut i16,
                         overflow: *mut i16, no_of_values: i32) -> i32;
    fn ps2000_run_streaming_ns(handle: i16, sample_interval: u32,
                               time_units: i32, max_samples: u32, auto_stop: i16,
                               no_of_samples_per_aggregate: u32,
                               overview_buffer_size: u32) -> i16;
    fn ps2000_get_streaming_last_values(handle: i16,
                                        callback: GetOverviewBuffersMaxMin) -> i16;
    fn ps2000_stop(handle: i16) -> i16;
}

const MAX_VALUE: i16 = 32767;
const TIME_UNITS_NS: i32 = 2;
const SOURCE_NONE: i16 = 5;
const COUPLING_AC: i16 = 0;
const COUPLING_DC: i16 = 1;
const DIRECTION_RISING: i16 = 0;
const DIRECTION_FALLING: i16 = 1;

fn range_code(range: VoltageRange) -> i16 {
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

// This driver returns 0 for failure and has no status codes beyond that.
fn check(status: i16, op: &'static str) -> Result<()> {
    if status == 0 {
        Err(Error::Device { op, code: status as i32 })
    } else {
        Ok(())
    }
}

struct PendingChunk {
    a: Vec<i16>,
    b: Vec<i16>,
    overflow: i16,
    auto_stop: bool,
}

thread_local! {
    // ps2000_get_streaming_last_values reports through a bare callback with
    // no user-data argument, so the chunk is routed through a thread local.
    // The callback only runs inside that call, on the calling thread.
    static PENDING: RefCell<Option<PendingChunk>> = RefCell::new(None);
}

unsafe extern "C" fn on_overview_buffers(overview_buffers: *mut *mut i16,
                                         overflow: i16, _triggered_at: u32,
                                         _triggered: i16, auto_stop: i16,
                                         n_values: u32) {
    let length = n_values as usize;
    let a_buffer = *overview_buffers.offset(0);
    let b_buffer = *overview_buffers.offset(2);
    let chunk = PendingChunk {
        a: if a_buffer.is_null() { Vec::new() }
           else { slice::from_raw_parts(a_buffer, length).to_vec() },
        b: if b_buffer.is_null() { Vec::new() }
           else { slice::from_raw_parts(b_buffer, length).to_vec() },
        overflow,
        auto_stop: auto_stop != 0,
    };
    PENDING.with(|pending| *pending.borrow_mut() = Some(chunk));
}

#[derive(Debug)]
pub struct Ps2000Driver {
    handle: i16,
    enabled: [bool; 2],
    // applied on run_block, where the trigger delay percentage is known
    trigger: Option<TriggerParams>,
}

impl Ps2000Driver {
    pub fn open() -> Result<Ps2000Driver> {
        let handle = unsafe { ps2000_open_unit() };
        match handle {
            0 => Err(Error::NotFound),
            handle if handle < 0 =>
                Err(Error::Device { op: "ps2000_open_unit", code: handle as i32 }),
            handle => {
                log::debug!("opened 2000-series unit, handle {}", handle);
                Ok(Ps2000Driver { handle, enabled: [false, false], trigger: None })
            }
        }
    }

    fn apply_trigger(&mut self, samples: u32) -> Result<()> {
        // the delay argument is a percentage of the block size; negative
        // values move the trigger point into the block
        let (source, threshold, direction, delay, auto_ms) = match &self.trigger {
            Some(params) => {
                let percent = (params.pre_trigger_samples as i64 * 100
                    / samples.max(1) as i64) as i16;
                let direction = match params.edge {
                    Edge::Rising => DIRECTION_RISING,
                    Edge::Falling => DIRECTION_FALLING,
                };
                (params.channel.index() as i16, params.threshold_adc, direction,
                 -percent, params.auto_trigger_ms.min(i16::MAX as u32) as i16)
            }
            None => (SOURCE_NONE, 0, DIRECTION_RISING, 0, 0),
        };
        check(unsafe {
            ps2000_set_trigger(self.handle, source, threshold, direction,
                delay, auto_ms)
        }, "ps2000_set_trigger")
    }
}

impl ScopeDriver for Ps2000Driver {
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
            ps2000_set_channel(self.handle, channel.index() as i16, enabled,
                coupling, range)
        }, "ps2000_set_channel")?;
        self.enabled[channel.index()] = config.is_some();
        Ok(())
    }

    fn set_trigger(&mut self, trigger: Option<&TriggerParams>) -> Result<()> {
        self.trigger = trigger.copied();
        Ok(())
    }

    fn get_timebase(&mut self, code: u32, samples: u32, oversample: u16)
                    -> Result<Option<TimebaseInfo>> {
        if code > i16::MAX as u32 {
            return Ok(None);
        }
        let mut interval = 0i32;
        let mut units = 0i16;
        let mut max_samples = 0i32;
        let valid = unsafe {
            ps2000_get_timebase(self.handle, code as i16, samples as i32,
                &mut interval, &mut units, oversample as i16, &mut max_samples)
        };
        if valid == 0 {
            // this code cannot hold the requested capture; a slower one may
            Ok(None)
        } else {
            Ok(Some(TimebaseInfo {
                interval_ns: interval as f64,
                max_samples: max_samples as u32,
            }))
        }
    }

    fn max_timebase(&self) -> u32 {
        i16::MAX as u32
    }

    fn run_block(&mut self, samples: u32, timebase: u32, oversample: u16)
                 -> Result<()> {
        self.apply_trigger(samples)?;
        let mut indisposed_ms = 0i32;
        check(unsafe {
            ps2000_run_block(self.handle, samples as i32, timebase as i16,
                oversample as i16, &mut indisposed_ms)
        }, "ps2000_run_block")
    }

    fn is_ready(&mut self) -> Result<bool> {
        let ready = unsafe { ps2000_ready(self.handle) };
        if ready < 0 {
            Err(Error::Device { op: "ps2000_ready", code: ready as i32 })
        } else {
            Ok(ready > 0)
        }
    }

    fn get_values(&mut self, samples: u32) -> Result<RawBlock> {
        let length = samples as usize;
        let mut a = self.enabled[0].then(|| vec![0i16; length]);
        let mut b = self.enabled[1].then(|| vec![0i16; length]);
        let mut overflow = 0i16;
        let returned = unsafe {
            ps2000_get_values(self.handle,
                a.as_mut().map_or(ptr::null_mut(), |buffer| buffer.as_mut_ptr()),
                b.as_mut().map_or(ptr::null_mut(), |buffer| buffer.as_mut_ptr()),
                ptr::null_mut(), ptr::null_mut(),
                &mut overflow, samples as i32)
        };
        if returned <= 0 {
            return Err(Error::Device { op: "ps2000_get_values", code: returned });
        }
        for buffer in [&mut a, &mut b].into_iter().flatten() {
            buffer.truncate(returned as usize);
        }
        Ok(RawBlock { channels: [a, b], overflow: overflow_flags(overflow) })
    }

    fn run_streaming(&mut self, interval_ns: u32, ring_samples: u32,
                     target_samples: u32, auto_stop: bool) -> Result<u32> {
        check(unsafe {
            ps2000_run_streaming_ns(self.handle, interval_ns, TIME_UNITS_NS,
                target_samples, auto_stop as i16, 1, ring_samples)
        }, "ps2000_run_streaming_ns")?;
        // this driver samples at exactly the interval it was given
        Ok(interval_ns)
    }

    fn get_streaming_latest(&mut self,
                            on_data: &mut dyn FnMut(StreamChunk)) -> Result<bool> {
        PENDING.with(|pending| pending.borrow_mut().take());
        let called = unsafe {
            ps2000_get_streaming_last_values(self.handle, on_overview_buffers)
        };
        if called == 0 {
            // no new data since the last call
            return Ok(false);
        }
        match PENDING.with(|pending| pending.borrow_mut().take()) {
            None => Ok(false),
            Some(chunk) => {
                let a: &[i16] = if self.enabled[0] { &chunk.a } else { &[] };
                let b: &[i16] = if self.enabled[1] { &chunk.b } else { &[] };
                on_data(StreamChunk {
                    samples: [a, b],
                    overflow: overflow_flags(chunk.overflow),
                    auto_stop: chunk.auto_stop,
                });
                Ok(true)
            }
        }
    }

    fn stop(&mut self) -> Result<()> {
        check(unsafe { ps2000_stop(self.handle) }, "ps2000_stop")
    }

    fn max_adc_value(&self) -> i16 {
        MAX_VALUE
    }
}

impl Drop for Ps2000Driver {
    fn drop(&mut self) {
        if unsafe { ps2000_close_unit(self.handle) } == 0 {
            log::warn!("failed to close 2000-series unit, handle {}", self.handle);
        }
    }
}

use std::thread::sleep;
use std::time::Duration;

use crate::capture::{convert, Accumulator, TimeSeries};
use crate::config::{AcquisitionConfig, Channel};
use crate::sys::{ScopeDriver, TriggerParams};
use crate::timebase::{self, TimebaseSelection};
use crate::trigger::Trigger;
use crate::{Error, Result};

/// Block mode completion is polled, not signalled.
const READY_POLL: Duration = Duration::from_millis(100);
/// Pause between streaming drains when the driver had nothing new.
const STREAM_POLL: Duration = Duration::from_millis(10);

/// A scope with exclusive ownership of its driver handle. One acquisition
/// runs at a time; the handle is released (stopping the scope) on drop.
#[derive(Debug)]
pub struct Device<D: ScopeDriver> {
    driver: D,
    config: Option<AcquisitionConfig>,
}

#[cfg(feature = "hardware")]
impl Device<crate::sys::ps2000::Ps2000Driver> {
    /// Opens the first 2000-series scope (e.g. a 2204A).
    pub fn open() -> Result<Self> {
        Ok(Device::from_driver(crate::sys::ps2000::Ps2000Driver::open()?))
    }
}

#[cfg(feature = "hardware")]
impl Device<crate::sys::ps2000a::Ps2000aDriver> {
    /// Opens the first 2000A-series scope (e.g. a 2208B).
    pub fn open() -> Result<Self> {
        Ok(Device::from_driver(crate::sys::ps2000a::Ps2000aDriver::open()?))
    }
}

#[cfg(feature = "hardware")]
impl Device<Box<dyn ScopeDriver>> {
    /// Opens whichever scope is connected. The two sub-families answer to
    /// different vendor drivers; the 2000A driver is tried first.
    pub fn open_any() -> Result<Self> {
        match crate::sys::ps2000a::Ps2000aDriver::open() {
            Ok(driver) =>
                Ok(Device::from_driver(Box::new(driver) as Box<dyn ScopeDriver>)),
            Err(Error::NotFound) => {
                log::info!("no 2000A-series scope found, trying the 2000-series driver");
                let driver = crate::sys::ps2000::Ps2000Driver::open()?;
                Ok(Device::from_driver(Box::new(driver) as Box<dyn ScopeDriver>))
            }
            Err(error) => Err(error),
        }
    }

    /// Opens a scope, runs `f`, and stops and closes the scope no matter how
    /// `f` exits.
    pub fn with<T>(f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let mut device = Self::open_any()?;
        let result = f(&mut device);
        let closed = device.close();
        let value = result?;
        closed?;
        Ok(value)
    }
}

impl<D: ScopeDriver> Device<D> {
    pub fn from_driver(driver: D) -> Device<D> {
        Device { driver, config: None }
    }

    /// Validates the configuration and programs both channels. Must run
    /// before a trigger is set or a capture is started.
    pub fn configure(&mut self, config: &AcquisitionConfig) -> Result<()> {
        config.validate()?;
        for channel in Channel::ALL {
            self.driver.set_channel(channel,
                config.channels[channel.index()].as_ref())?;
        }
        self.config = Some(*config);
        Ok(())
    }

    /// Sets or clears the trigger. Without one, captures start immediately.
    pub fn set_trigger(&mut self, trigger: Option<Trigger>) -> Result<()> {
        let params = match trigger {
            Some(trigger) => {
                let config = self.configured()?;
                let channel = config.channels[trigger.channel.index()]
                    .ok_or(Error::InvalidConfiguration(
                        "trigger channel is not enabled"))?;
                if trigger.pre_trigger_samples > config.samples {
                    return Err(Error::InvalidConfiguration(
                        "pre-trigger sample count exceeds the block size"));
                }
                Some(TriggerParams {
                    channel: trigger.channel,
                    threshold_adc: channel.range.to_adc(trigger.threshold,
                        self.driver.max_adc_value()),
                    edge: trigger.edge,
                    pre_trigger_samples: trigger.pre_trigger_samples,
                    auto_trigger_ms: trigger.auto_trigger
                        .map_or(0, |wait| wait.as_millis() as u32),
                })
            }
            None => None,
        };
        self.driver.set_trigger(params.as_ref())
    }

    /// Resolves the timebase the configured sample rate would run at, without
    /// starting a capture.
    pub fn resolve_timebase(&mut self) -> Result<TimebaseSelection> {
        let config = self.configured()?;
        timebase::resolve(&mut self.driver, config.samples, config.oversample,
            config.requested_interval_ns())
    }

    /// Captures one block: fills the device memory once at the configured
    /// rate, then transfers and converts it. Returns exactly the configured
    /// number of samples per enabled channel.
    pub fn capture_block(&mut self) -> Result<TimeSeries> {
        let config = self.configured()?;
        let selection = timebase::resolve(&mut self.driver, config.samples,
            config.oversample, config.requested_interval_ns())?;
        if config.samples > selection.max_samples {
            return Err(Error::InvalidConfiguration(
                "sample count exceeds the device memory for the enabled channels"));
        }
        log::debug!("block capture: {} samples at {} ns (timebase {})",
            config.samples, selection.interval_ns, selection.code);
        self.driver.run_block(config.samples, selection.code, config.oversample)?;
        let result = self.finish_block(&config, &selection);
        if result.is_err() {
            // the scope must not be left running when the capture fails
            if let Err(error) = self.driver.stop() {
                log::warn!("failed to stop device after block error: {}", error);
            }
        }
        result
    }

    fn finish_block(&mut self, config: &AcquisitionConfig,
                    selection: &TimebaseSelection) -> Result<TimeSeries> {
        while !self.driver.is_ready()? {
            sleep(READY_POLL);
        }
        let raw = self.driver.get_values(config.samples)?;
        if !raw.overflow.is_empty() {
            log::warn!("input exceeded the configured range on {:?}", raw.overflow);
        }
        Ok(convert(selection.interval_ns, raw.channels, config.ranges(),
            self.driver.max_adc_value(), raw.overflow))
    }

    /// Captures continuously for `duration`: samples stream through a
    /// one-second device-side ring buffer into an accumulation buffer sized
    /// for the whole duration. Stops as soon as the buffer is full or the
    /// device reports auto-stop, whichever comes first.
    pub fn capture_streaming(&mut self, duration: Duration) -> Result<TimeSeries> {
        let config = self.configured()?;
        if config.sample_rate <= 0.0 {
            return Err(Error::InvalidConfiguration(
                "streaming requires a positive sample rate"));
        }
        let ring_samples = config.sample_rate.ceil() as u32;
        let target = (duration.as_secs_f64() * config.sample_rate).ceil() as usize;
        if target == 0 {
            return Err(Error::InvalidConfiguration(
                "collection window is shorter than one sample interval"));
        }
        let selection = timebase::resolve(&mut self.driver, ring_samples,
            config.oversample, config.requested_interval_ns())?;
        let interval_ns = self.driver.run_streaming(selection.interval_ns as u32,
            ring_samples, target as u32, true)?;
        log::debug!("streaming: {} samples at {} ns through a {} sample ring",
            target, interval_ns, ring_samples);

        let mut accumulator = Accumulator::new(target, config.enabled());
        let result = self.drain(&mut accumulator);
        // stop unconditionally so the scope never keeps streaming past the call
        let stopped = self.driver.stop();
        result?;
        stopped?;
        log::debug!("streaming done after {} samples", accumulator.filled());
        Ok(accumulator.finish(interval_ns as f64, config.ranges(),
            self.driver.max_adc_value()))
    }

    fn drain(&mut self, accumulator: &mut Accumulator) -> Result<()> {
        while !accumulator.full() && !accumulator.auto_stopped() {
            let mut appended = Ok(());
            let fired = self.driver.get_streaming_latest(&mut |chunk| {
                if appended.is_ok() {
                    appended = accumulator.append(&chunk);
                }
            })?;
            appended?;
            if !fired {
                sleep(STREAM_POLL);
            }
        }
        Ok(())
    }

    /// Stops the scope and releases the handle. The driver closes the unit
    /// when dropped, so this only surfaces the final stop's status.
    pub fn close(mut self) -> Result<()> {
        self.driver.stop()
    }

    fn configured(&self) -> Result<AcquisitionConfig> {
        self.config.ok_or(Error::InvalidConfiguration(
            "channels must be configured first"))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::capture::Overflow;
    use crate::config::{ChannelConfiguration, VoltageRange};
    use crate::sys::fake::FakeScope;

    fn config(channels: [Option<ChannelConfiguration>; 2], sample_rate: f64,
              samples: u32) -> AcquisitionConfig {
        AcquisitionConfig { channels, sample_rate, oversample: 1, samples }
    }

    fn channel(range: VoltageRange) -> Option<ChannelConfiguration> {
        Some(ChannelConfiguration { range, ..Default::default() })
    }

    #[test]
    fn test_capture_requires_configuration() {
        let mut device = Device::from_driver(FakeScope::new());
        assert!(matches!(device.capture_block(),
            Err(Error::InvalidConfiguration(_))));
        assert!(matches!(device.capture_streaming(Duration::from_secs(1)),
            Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_block_scenario_500hz() {
        // 500 Hz, 2000 samples, 10 V, channel A only: the ladder meets the
        // 2 ms interval exactly, so the series spans just under 4 seconds.
        let mut device = Device::from_driver(FakeScope::new());
        device.configure(&config([channel(VoltageRange::V10), None], 500.0, 2000))
            .unwrap();
        let series = device.capture_block().unwrap();
        assert_eq!(series.len(), 2000);
        assert_eq!(series.times[0], 0.0);
        assert!(series.times.windows(2).all(|pair| pair[1] > pair[0]));
        assert!(series.interval >= 2e-3);
        let span = series.times[1999];
        assert!(span > 3.9 && span < 4.3, "span {} s", span);
        assert!(series.channel(Channel::A).is_some());
        assert!(series.channel(Channel::B).is_none());
    }

    #[test]
    fn test_block_converts_counts_to_volts() {
        let mut device = Device::from_driver(FakeScope::new());
        device.driver.block_data = [Some(vec![0, 16384, 32767, -32767]), None];
        device.configure(&config([channel(VoltageRange::V2), None], 1000.0, 4))
            .unwrap();
        let series = device.capture_block().unwrap();
        let volts = series.channel(Channel::A).unwrap();
        assert_eq!(volts[0], 0.0);
        assert!((volts[1] - 1.0).abs() < 1e-4);
        assert_eq!(volts[2], 2.0);
        assert_eq!(volts[3], -2.0);
    }

    #[test]
    fn test_block_dual_channel() {
        let mut device = Device::from_driver(FakeScope::new());
        device.configure(&config(
            [channel(VoltageRange::V2), channel(VoltageRange::V5)], 1000.0, 64))
            .unwrap();
        let series = device.capture_block().unwrap();
        assert_eq!(series.channel(Channel::A).unwrap().len(), 64);
        assert_eq!(series.channel(Channel::B).unwrap().len(), 64);
    }

    #[test]
    fn test_block_polls_until_ready() {
        let mut device = Device::from_driver(FakeScope::new());
        device.driver.ready_after_polls = 2;
        device.configure(&config([channel(VoltageRange::V2), None], 1000.0, 16))
            .unwrap();
        let series = device.capture_block().unwrap();
        assert_eq!(series.len(), 16);
        assert_eq!(device.driver.ready_polls, 3);
    }

    #[test]
    fn test_block_overflow_is_a_warning_not_an_error() {
        let mut device = Device::from_driver(FakeScope::new());
        device.driver.block_overflow = Overflow::CHANNEL_A;
        device.configure(&config([channel(VoltageRange::V2), None], 1000.0, 16))
            .unwrap();
        let series = device.capture_block().unwrap();
        assert_eq!(series.overflow, Overflow::CHANNEL_A);
    }

    #[test]
    fn test_block_rejects_oversized_capture() {
        let mut device = Device::from_driver(FakeScope::new());
        device.driver.memory_samples = 8064;
        device.configure(&config([channel(VoltageRange::V2), None], 1000.0, 10000))
            .unwrap();
        assert!(matches!(device.capture_block(),
            Err(Error::InvalidConfiguration(_))));
        // dual channel halves the per-channel memory
        device.configure(&config(
            [channel(VoltageRange::V2), channel(VoltageRange::V2)], 1000.0, 5000))
            .unwrap();
        assert!(matches!(device.capture_block(),
            Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_block_error_stops_device() {
        let mut device = Device::from_driver(FakeScope::new());
        device.driver.fail_op = Some(("get_values", 7));
        device.configure(&config([channel(VoltageRange::V2), None], 1000.0, 16))
            .unwrap();
        assert!(matches!(device.capture_block(),
            Err(Error::Device { op: "get_values", code: 7 })));
        assert_eq!(device.driver.stop_count, 1);
    }

    #[test]
    fn test_streaming_scenario_30khz() {
        // 3 s at 30 kHz: the accumulation target is exactly 90000 samples.
        let mut device = Device::from_driver(FakeScope::new());
        device.driver.script_stream(&[30000, 30000, 30000], false);
        device.configure(&config([channel(VoltageRange::V10), None], 30000.0, 1000))
            .unwrap();
        let series = device.capture_streaming(Duration::from_secs(3)).unwrap();
        assert_eq!(series.len(), 90000);
        assert_eq!(device.driver.stream_target, 90000);
        assert_eq!(device.driver.stream_ring, 30000);
        assert_eq!(device.driver.stop_count, 1);
        assert!(series.times.windows(2).all(|pair| pair[1] > pair[0]));
    }

    #[test]
    fn test_streaming_auto_stop_cuts_capture_short() {
        let mut device = Device::from_driver(FakeScope::new());
        device.driver.script_stream(&[400, 100], true);
        device.configure(&config([channel(VoltageRange::V2), None], 1000.0, 1000))
            .unwrap();
        let series = device.capture_streaming(Duration::from_secs(2)).unwrap();
        assert_eq!(series.len(), 500);
        assert_eq!(device.driver.stop_count, 1);
    }

    #[test]
    fn test_streaming_drains_both_channels() {
        let mut device = Device::from_driver(FakeScope::new());
        device.driver.script_stream(&[500, 500], false);
        device.configure(&config(
            [channel(VoltageRange::V2), channel(VoltageRange::V2)], 1000.0, 1000))
            .unwrap();
        let series = device.capture_streaming(Duration::from_secs(1)).unwrap();
        assert_eq!(series.channel(Channel::A).unwrap().len(), 1000);
        assert_eq!(series.channel(Channel::B).unwrap().len(), 1000);
    }

    #[test]
    fn test_streaming_overrun_is_fatal_and_stops() {
        let mut device = Device::from_driver(FakeScope::new());
        device.driver.script_stream(&[800, 800], false);
        device.configure(&config([channel(VoltageRange::V2), None], 1000.0, 1000))
            .unwrap();
        let result = device.capture_streaming(Duration::from_secs(1));
        assert!(matches!(result,
            Err(Error::Overrun { filled: 800, incoming: 800, capacity: 1000 })));
        assert_eq!(device.driver.stop_count, 1);
    }

    #[test]
    fn test_streaming_error_still_stops() {
        let mut device = Device::from_driver(FakeScope::new());
        device.driver.fail_op = Some(("get_streaming_latest", 9));
        device.configure(&config([channel(VoltageRange::V2), None], 1000.0, 1000))
            .unwrap();
        assert!(matches!(device.capture_streaming(Duration::from_secs(1)),
            Err(Error::Device { op: "get_streaming_latest", code: 9 })));
        assert_eq!(device.driver.stop_count, 1);
    }

    #[test]
    fn test_streaming_rejects_zero_rate() {
        let mut device = Device::from_driver(FakeScope::new());
        device.configure(&config([channel(VoltageRange::V2), None], 0.0, 1000))
            .unwrap();
        assert!(matches!(device.capture_streaming(Duration::from_secs(1)),
            Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_trigger_threshold_conversion() {
        let mut device = Device::from_driver(FakeScope::new());
        device.configure(&config([channel(VoltageRange::V10), None], 1000.0, 2000))
            .unwrap();
        device.set_trigger(Some(Trigger::rising(Channel::A, 2.5))).unwrap();
        let params = device.driver.trigger.unwrap();
        assert_eq!(params.threshold_adc,
            (2.5 / 10.0 * 32767f64).round() as i16);
        assert_eq!(params.auto_trigger_ms, 0);
    }

    #[test]
    fn test_trigger_on_disabled_channel_rejected() {
        let mut device = Device::from_driver(FakeScope::new());
        device.configure(&config([channel(VoltageRange::V10), None], 1000.0, 2000))
            .unwrap();
        assert!(matches!(
            device.set_trigger(Some(Trigger::rising(Channel::B, 1.0))),
            Err(Error::InvalidConfiguration(_))));
        assert!(device.driver.trigger.is_none());
    }

    #[test]
    fn test_trigger_pre_trigger_bounds() {
        let mut device = Device::from_driver(FakeScope::new());
        device.configure(&config([channel(VoltageRange::V10), None], 1000.0, 100))
            .unwrap();
        let mut trigger = Trigger::rising(Channel::A, 1.0);
        trigger.pre_trigger_samples = 101;
        assert!(matches!(device.set_trigger(Some(trigger)),
            Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_resolve_timebase_reports_rate() {
        let mut device = Device::from_driver(FakeScope::new());
        device.configure(&config([channel(VoltageRange::V2), None], 500.0, 2000))
            .unwrap();
        let selection = device.resolve_timebase().unwrap();
        assert!(selection.interval_ns >= 2e6);
        assert_eq!(selection.interval_ns, 2e6);
    }

    #[test]
    fn test_close_stops_device() {
        let device = Device::from_driver(FakeScope::new());
        device.close().unwrap();
    }
}

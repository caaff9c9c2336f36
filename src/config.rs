//! High-level configuration of an acquisition in terms of physical qualities.

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    A = 0,
    B = 1,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::A, Channel::B];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Coupling {
    #[default]
    DC,
    AC,
}

/// Full-scale input range. The 2000 series supports exactly this set; anything
/// else is rejected up front rather than handed to the driver.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum VoltageRange {
    mV20,
    mV50,
    mV100,
    mV200,
    mV500,
    V1,
    #[default]
    V2,
    V5,
    V10,
    V20,
}

impl VoltageRange {
    pub const ALL: [VoltageRange; 10] = [
        VoltageRange::mV20, VoltageRange::mV50, VoltageRange::mV100,
        VoltageRange::mV200, VoltageRange::mV500, VoltageRange::V1,
        VoltageRange::V2, VoltageRange::V5, VoltageRange::V10,
        VoltageRange::V20,
    ];

    pub fn volts(self) -> f64 {
        match self {
            Self::mV20  => 0.02,
            Self::mV50  => 0.05,
            Self::mV100 => 0.1,
            Self::mV200 => 0.2,
            Self::mV500 => 0.5,
            Self::V1    => 1.0,
            Self::V2    => 2.0,
            Self::V5    => 5.0,
            Self::V10   => 10.0,
            Self::V20   => 20.0,
        }
    }

    pub fn from_volts(volts: f64) -> Result<VoltageRange> {
        Self::ALL.into_iter().find(|range| range.volts() == volts)
            .ok_or(Error::InvalidConfiguration(
                "voltage range must be one of 0.02, 0.05, 0.1, 0.2, 0.5, 1, 2, 5, 10 or 20 V"))
    }

    /// Converts a raw ADC count to volts at this range.
    pub fn from_adc(self, raw: i16, max_adc: i16) -> f64 {
        raw as f64 * self.volts() / max_adc as f64
    }

    /// Converts volts to the nearest ADC count at this range, clamped to full scale.
    pub fn to_adc(self, volts: f64, max_adc: i16) -> i16 {
        let scaled = volts * max_adc as f64 / self.volts();
        scaled.round().clamp(-(max_adc as f64), max_adc as f64) as i16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelConfiguration {
    pub coupling: Coupling,
    pub range: VoltageRange,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionConfig {
    /// Per-channel configuration; `None` leaves the channel disabled.
    pub channels: [Option<ChannelConfiguration>; 2],
    /// Requested sample rate in Hz. The achieved rate is the nearest one the
    /// device supports that is no faster than requested; 0 selects the fastest
    /// rate the device can do.
    pub sample_rate: f64,
    /// Number of raw conversions averaged per stored sample.
    pub oversample: u16,
    /// Sample count for block captures.
    pub samples: u32,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        AcquisitionConfig {
            channels: [Some(ChannelConfiguration::default()), None],
            sample_rate: 1000.0,
            oversample: 1,
            samples: 2000,
        }
    }
}

impl AcquisitionConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.channels.iter().all(Option::is_none) {
            return Err(Error::InvalidConfiguration("at least one channel must be enabled"));
        }
        if !self.sample_rate.is_finite() || self.sample_rate < 0.0 {
            return Err(Error::InvalidConfiguration("sample rate must be a finite value in Hz"));
        }
        if self.oversample == 0 {
            return Err(Error::InvalidConfiguration("oversample factor must be at least 1"));
        }
        if self.samples == 0 {
            return Err(Error::InvalidConfiguration("sample count must be nonzero"));
        }
        Ok(())
    }

    /// The requested sample interval in nanoseconds; 0 means "as fast as possible".
    pub(crate) fn requested_interval_ns(&self) -> f64 {
        if self.sample_rate == 0.0 { 0.0 } else { 1e9 / self.sample_rate }
    }

    pub(crate) fn enabled(&self) -> [bool; 2] {
        [self.channels[0].is_some(), self.channels[1].is_some()]
    }

    pub(crate) fn ranges(&self) -> [Option<VoltageRange>; 2] {
        self.channels.map(|channel| channel.map(|channel| channel.range))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_range_lookup() {
        assert_eq!(VoltageRange::from_volts(10.0).unwrap(), VoltageRange::V10);
        assert_eq!(VoltageRange::from_volts(0.02).unwrap(), VoltageRange::mV20);
        assert!(matches!(VoltageRange::from_volts(3.0),
            Err(Error::InvalidConfiguration(_))));
        assert!(matches!(VoltageRange::from_volts(0.0),
            Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_adc_conversion_round_trip() {
        const MAX_ADC: i16 = 32767;
        for range in VoltageRange::ALL {
            for raw in [-32767i16, -12345, -1, 0, 1, 4096, 32767] {
                let volts = range.from_adc(raw, MAX_ADC);
                assert_eq!(range.to_adc(volts, MAX_ADC), raw);
            }
        }
    }

    #[test]
    fn test_adc_conversion_scale() {
        const MAX_ADC: i16 = 32767;
        assert_eq!(VoltageRange::V10.from_adc(32767, MAX_ADC), 10.0);
        assert_eq!(VoltageRange::V10.from_adc(0, MAX_ADC), 0.0);
        assert_eq!(VoltageRange::V10.from_adc(-32767, MAX_ADC), -10.0);
        // within one quantization step of half scale
        let half = VoltageRange::V2.from_adc(16384, MAX_ADC);
        assert!((half - 1.0).abs() < 2.0 / MAX_ADC as f64);
    }

    #[test]
    fn test_adc_conversion_clamps() {
        const MAX_ADC: i16 = 32767;
        assert_eq!(VoltageRange::V2.to_adc(5.0, MAX_ADC), 32767);
        assert_eq!(VoltageRange::V2.to_adc(-5.0, MAX_ADC), -32767);
    }

    #[test]
    fn test_validation() {
        let config = AcquisitionConfig::default();
        assert!(config.validate().is_ok());

        let no_channels = AcquisitionConfig { channels: [None, None], ..config };
        assert!(matches!(no_channels.validate(),
            Err(Error::InvalidConfiguration(_))));

        let bad_rate = AcquisitionConfig { sample_rate: f64::NAN, ..config };
        assert!(bad_rate.validate().is_err());
        let negative_rate = AcquisitionConfig { sample_rate: -1.0, ..config };
        assert!(negative_rate.validate().is_err());

        let no_oversample = AcquisitionConfig { oversample: 0, ..config };
        assert!(no_oversample.validate().is_err());
    }

    #[test]
    fn test_requested_interval() {
        let config = AcquisitionConfig { sample_rate: 500.0, ..Default::default() };
        assert_eq!(config.requested_interval_ns(), 2e6);
        let fastest = AcquisitionConfig { sample_rate: 0.0, ..Default::default() };
        assert_eq!(fastest.requested_interval_ns(), 0.0);
    }
}

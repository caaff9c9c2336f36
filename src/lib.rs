mod sys;
mod config;
mod trigger;
mod timebase;
mod capture;
mod device;

#[derive(Debug)]
pub enum Error {
    /// No scope responded when the unit was opened.
    NotFound,
    /// A requested parameter is outside the supported set. Detected before any
    /// device call is made.
    InvalidConfiguration(&'static str),
    /// No timebase code within the device's range achieves the requested
    /// sample interval.
    TimebaseNotFound { interval_ns: f64, max_code: u32 },
    /// The driver reported a non-zero status; `op` names the originating call.
    Device { op: &'static str, code: i32 },
    /// The driver delivered more streaming samples than the accumulation
    /// buffer was sized for. This is a consistency fault, never truncated.
    Overrun { filled: usize, incoming: usize, capacity: usize },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::NotFound =>
                write!(f, "device not connected"),
            Self::InvalidConfiguration(reason) =>
                write!(f, "invalid configuration: {}", reason),
            Self::TimebaseNotFound { interval_ns, max_code } =>
                write!(f, "no timebase up to {} achieves a {} ns sample interval",
                    max_code, interval_ns),
            Self::Device { op, code } =>
                write!(f, "device error in {} (status {})", op, code),
            Self::Overrun { filled, incoming, capacity } =>
                write!(f, "streaming overrun: {} samples delivered at offset {} \
                           into a {} sample buffer", incoming, filled, capacity),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> =
    core::result::Result<T, Error>;

pub use config::{
    Channel,
    Coupling,
    VoltageRange,
    ChannelConfiguration,
    AcquisitionConfig,
};

pub use trigger::{
    Edge,
    Trigger,
};

pub use timebase::TimebaseSelection;

pub use capture::{
    Overflow,
    TimeSeries,
};

pub use sys::{
    ScopeDriver,
    TimebaseInfo,
    TriggerParams,
    RawBlock,
    StreamChunk,
};

pub use device::Device;

#[cfg(feature = "hardware")]
pub type Ps2000Device =
    device::Device<sys::ps2000::Ps2000Driver>;

#[cfg(feature = "hardware")]
pub type Ps2000aDevice =
    device::Device<sys::ps2000a::Ps2000aDriver>;

/// A device whose driver sub-family is selected at open time.
pub type AnyDevice =
    device::Device<Box<dyn sys::ScopeDriver>>;

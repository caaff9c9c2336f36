//! Edge trigger configuration. Trigger detection runs on the scope itself;
//! this module only describes the condition for the driver.

use std::time::Duration;

use crate::config::Channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trigger {
    /// Channel the trigger condition is evaluated on. Must be enabled.
    pub channel: Channel,
    /// Threshold in volts, interpreted against the trigger channel's range.
    pub threshold: f64,
    pub edge: Edge,
    /// Number of samples retained from before the trigger point. 0 places
    /// the trigger event at the first sample of the capture; it can be at
    /// most the block's sample count.
    pub pre_trigger_samples: u32,
    /// Give up waiting and capture anyway after this long. `None` waits
    /// for the trigger indefinitely.
    pub auto_trigger: Option<Duration>,
}

impl Trigger {
    pub fn rising(channel: Channel, threshold: f64) -> Trigger {
        Trigger {
            channel,
            threshold,
            edge: Edge::Rising,
            pre_trigger_samples: 0,
            auto_trigger: None,
        }
    }

    pub fn falling(channel: Channel, threshold: f64) -> Trigger {
        Trigger { edge: Edge::Falling, ..Trigger::rising(channel, threshold) }
    }
}

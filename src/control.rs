use std::sync::mpsc::{Receiver, TryRecvError};

pub const ESCAPE_KEY: i32 = 27;
/// Step applied to the point budget by the `+` and `-` keys
pub const MAX_COUNT_STEP: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ParamChange {
    MaxCount(usize),
    QualityLevel(f64),
    MinDistance(f64),
    ClearTrails,
    /// Grow or shrink the point budget relative to its current value
    AdjustMaxCount(i64),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ControlSignal {
    Continue,
    Stop,
    Reseed,
    Param(ParamChange),
}

impl ControlSignal {
    pub fn from_key(code: i32) -> ControlSignal {
        match code {
            ESCAPE_KEY => ControlSignal::Stop,
            c if c == 'q' as i32 => ControlSignal::Stop,
            c if c == 'r' as i32 => ControlSignal::Reseed,
            c if c == 'c' as i32 => ControlSignal::Param(ParamChange::ClearTrails),
            c if c == '+' as i32 => {
                ControlSignal::Param(ParamChange::AdjustMaxCount(MAX_COUNT_STEP as i64))
            }
            c if c == '-' as i32 => {
                ControlSignal::Param(ParamChange::AdjustMaxCount(-(MAX_COUNT_STEP as i64)))
            }
            _ => ControlSignal::Continue,
        }
    }
}

/// Per-iteration input polled by the tracking loop. Must not block.
pub trait ControlSource {
    fn poll(&mut self) -> ControlSignal;
}

/// Never asks for anything, for headless runs
pub struct NoControl;

impl ControlSource for NoControl {
    fn poll(&mut self) -> ControlSignal {
        ControlSignal::Continue
    }
}

/// Signals sent from another thread, one per poll
pub struct ChannelControl {
    receiver: Receiver<ControlSignal>,
}

impl ChannelControl {
    pub fn new(receiver: Receiver<ControlSignal>) -> Self {
        Self { receiver }
    }
}

impl ControlSource for ChannelControl {
    fn poll(&mut self) -> ControlSignal {
        match self.receiver.try_recv() {
            Ok(signal) => signal,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => ControlSignal::Continue,
        }
    }
}

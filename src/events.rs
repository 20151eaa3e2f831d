//! Real-time safe event reporting.
//!
//! The audio thread must not format strings or touch a logger, so it pushes
//! small `Copy` events into a pre-allocated SPSC ring. A control thread
//! drains the ring and hands the events to `log`. When the ring is full new
//! events are dropped and counted.

use std::fmt;

use ringbuf::{Consumer, Producer, RingBuffer};

use crate::dsp::oversampling::OversamplingMode;

pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Ways a host can break the preparation contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractViolation {
    /// `process` was called before `prepare`.
    NotPrepared,
    /// More channels than were prepared; the extras pass through untouched.
    TooManyChannels { got: usize, prepared: usize },
    /// Block longer than the prepared maximum; processed in chunks.
    OversizedBlock { got: usize, prepared: usize },
}

impl fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotPrepared => write!(f, "process called before prepare"),
            Self::TooManyChannels { got, prepared } => {
                write!(f, "{got} channels, prepared for {prepared}")
            }
            Self::OversizedBlock { got, prepared } => {
                write!(f, "block of {got}, prepared for {prepared}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    OversamplingChanged {
        from: OversamplingMode,
        to: OversamplingMode,
    },
    ContractViolation(ContractViolation),
    Reset,
}

/// Audio-thread side.
pub struct EventQueue {
    producer: Producer<EngineEvent>,
    dropped: usize,
}

impl EventQueue {
    #[inline]
    pub fn push(&mut self, event: EngineEvent) {
        if self.producer.push(event).is_err() {
            self.dropped = self.dropped.saturating_add(1);
        }
    }

    /// Events lost to a full ring since creation.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

/// Control-thread side.
pub struct EventDrain {
    consumer: Consumer<EngineEvent>,
}

impl EventDrain {
    pub fn pop(&mut self) -> Option<EngineEvent> {
        self.consumer.pop()
    }

    /// Logs every pending event. Returns how many were written.
    pub fn drain_to_log(&mut self) -> usize {
        let mut count = 0;
        while let Some(event) = self.consumer.pop() {
            match event {
                EngineEvent::OversamplingChanged { from, to } => {
                    log::info!("oversampling changed: {from:?} -> {to:?}");
                }
                EngineEvent::ContractViolation(v) => {
                    log::warn!("host contract violation: {v}");
                }
                EngineEvent::Reset => log::debug!("engine state reset"),
            }
            count += 1;
        }
        count
    }
}

pub fn event_queue(capacity: usize) -> (EventQueue, EventDrain) {
    let (producer, consumer) = RingBuffer::<EngineEvent>::new(capacity.max(1)).split();
    (
        EventQueue {
            producer,
            dropped: 0,
        },
        EventDrain { consumer },
    )
}

//! Streaming statistics over bounded windows

pub mod ring;

pub use ring::{RingIter, RingStatistics, Sample};

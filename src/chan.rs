//! Logical channel to hardware lane/slot addressing.
//!
//! The DSP blocks process `n_parallel_chans` channels per clock, so a
//! logical channel index maps to a parallel lane (which hardware datapath)
//! and a serial slot (the position within that datapath). Per-lane
//! registers are vectors indexed by slot.

use crate::error::{Error, Result};

/// Position of a logical channel in the parallel/serial channel split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LanePos {
    /// Parallel datapath index, in `[0, n_parallel_chans)`.
    pub lane: usize,
    /// Serial position within the datapath, in `[0, n_serial_chans)`.
    pub slot: usize,
}

/// Channel split of a block processing `n_chans` channels over
/// `n_parallel_chans` lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMap {
    n_chans: usize,
    n_parallel_chans: usize,
    n_serial_chans: usize,
}

impl ChannelMap {
    /// Creates a channel map.
    ///
    /// Fails if the channel count is not an exact multiple of the lane
    /// count, which the hardware requires.
    pub fn new(n_chans: usize, n_parallel_chans: usize) -> Result<ChannelMap> {
        if n_parallel_chans == 0 || n_chans % n_parallel_chans != 0 {
            return Err(Error::InvalidConfig(format!(
                "{n_chans} channels cannot be split over {n_parallel_chans} parallel lanes"
            )));
        }
        Ok(ChannelMap {
            n_chans,
            n_parallel_chans,
            n_serial_chans: n_chans / n_parallel_chans,
        })
    }

    /// Maps a logical channel index to its lane and slot.
    pub fn locate(&self, channel: usize) -> Result<LanePos> {
        if channel >= self.n_chans {
            return Err(Error::ChannelOutOfRange {
                channel,
                n_chans: self.n_chans,
            });
        }
        Ok(LanePos {
            lane: channel % self.n_parallel_chans,
            slot: channel / self.n_parallel_chans,
        })
    }

    /// Number of channels the block processes.
    pub fn n_chans(&self) -> usize {
        self.n_chans
    }

    /// Number of parallel lanes.
    pub fn n_parallel_chans(&self) -> usize {
        self.n_parallel_chans
    }

    /// Number of serial channel slots per lane.
    pub fn n_serial_chans(&self) -> usize {
        self.n_serial_chans
    }
}

/// Builds the name of a per-lane register.
///
/// The `"{prefix}{lane}_{field}"` convention (`lo0_phase_inc`,
/// `lo0_phase_scale`, ...) is a contract with the firmware register map.
pub fn lane_register(prefix: &str, lane: usize, field: &str) -> String {
    format!("{prefix}{lane}_{field}")
}

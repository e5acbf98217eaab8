//! Error types.
//!
//! All fallible operations in this crate return [`Error`]. The variants are
//! deliberately distinguishable: a torn accumulator read is recoverable
//! (re-read and try again), while an inconsistent buffer layout indicates a
//! software/firmware build mismatch and is fatal.

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the readout control blocks.
#[derive(Debug, Error)]
pub enum Error {
    /// A channel index outside `[0, n_chans)` was given.
    #[error("channel {channel} out of range (block has {n_chans} channels)")]
    ChannelOutOfRange {
        /// The offending channel index.
        channel: usize,
        /// Number of channels the block processes.
        n_chans: usize,
    },
    /// An amplitude scale that is not strictly positive was given.
    ///
    /// Scales above 1.0 are not an error; they saturate to the maximum
    /// register code, which is the documented hardware behaviour.
    #[error("amplitude scale {0} is not strictly positive")]
    InvalidScale(f64),
    /// A block configuration that the firmware cannot represent.
    #[error("invalid block configuration: {0}")]
    InvalidConfig(String),
    /// The accumulation RAMs are not laid out contiguously in the device
    /// address space. The bulk read path relies on a fixed stride between
    /// lanes, so this indicates a firmware build this software does not
    /// understand.
    #[error(
        "accumulation RAM for lane {lane} at address {actual:#x} \
         breaks the expected stride (expected {expected:#x})"
    )]
    InconsistentLayout {
        /// Lane whose address breaks the stride.
        lane: usize,
        /// Address implied by the stride of the previous lanes.
        expected: usize,
        /// Address reported by the register interface.
        actual: usize,
    },
    /// The accumulation counter changed while the buffer was being read, so
    /// the data contains a mix of old and new accumulations and must be
    /// discarded.
    #[error("accumulation counter changed during read ({start} -> {end}); data is torn")]
    TornRead {
        /// Counter value before the bulk read.
        start: u32,
        /// Counter value after the bulk read.
        end: u32,
    },
    /// A register transport failure, propagated unchanged.
    #[error("register access failed")]
    RegisterAccess(#[source] Box<dyn std::error::Error + Send + Sync>),
}

//! Block configuration.
//!
//! The channel counts, fixed-point bit widths and sample rate are properties
//! of a particular firmware build. They are supplied by the board control
//! layer, typically deserialized from its configuration file, and passed
//! immutably into each block constructor. Derived quantities (such as the
//! number of serial channels per lane) are computed once at construction
//! time rather than on every call.

use serde::{Deserialize, Serialize};

/// Configuration of the mixer (NCO bank) block.
///
/// The defaults match the standard single-pipeline firmware build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Number of channels the block processes.
    pub n_chans: usize,
    /// Number of channels processed in parallel (hardware lanes).
    pub n_parallel_chans: usize,
    /// Fractional bits of the phase increment registers.
    pub phase_bp: u32,
    /// Fractional bits of the phase offset registers.
    pub phase_offset_bp: u32,
    /// Bits of the amplitude scale registers.
    pub n_scale_bits: u32,
    /// DAC sample rate in MHz.
    pub sample_rate_mhz: f64,
}

impl Default for MixerConfig {
    fn default() -> MixerConfig {
        MixerConfig {
            n_chans: 4096,
            n_parallel_chans: 4,
            phase_bp: 31,
            phase_offset_bp: 31,
            n_scale_bits: 8,
            sample_rate_mhz: 2500.0,
        }
    }
}

/// Configuration of the accumulator block.
///
/// The accumulator may use a different parallelization factor than the
/// mixer, so it carries its own channel split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulatorConfig {
    /// Number of frequency channels accumulated.
    pub n_chans: usize,
    /// Number of channels accumulated in parallel (one output RAM each).
    pub n_parallel_chans: usize,
    /// Whether the accumulated data is complex-valued. If `false`, each
    /// channel holds a single real word.
    pub is_complex: bool,
    /// Accumulation length programmed by `initialize`, in spectra.
    pub acc_len: u32,
}

impl Default for AccumulatorConfig {
    fn default() -> AccumulatorConfig {
        AccumulatorConfig {
            n_chans: 4096,
            n_parallel_chans: 8,
            is_complex: true,
            acc_len: 1 << 15,
        }
    }
}

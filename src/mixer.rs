//! Per-channel digital mixer (NCO bank) control.
//!
//! Each output channel of the polyphase synthesizer has a
//! numerically-controlled oscillator that either phase-rotates the channel
//! or computes its power (one global mode for the whole bank). This module
//! programs the per-channel phase increment, phase offset and amplitude
//! scale registers.
//!
//! The two registers written by a phase step update are not an atomic
//! pair. A concurrent reader may briefly observe a new increment with an
//! old offset; since the oscillator free-runs, the state converges on the
//! next full update, and callers only need to avoid concurrent writes to
//! the same channel.

use crate::chan::{lane_register, ChannelMap};
use crate::config::MixerConfig;
use crate::error::Result;
use crate::fixed;
use crate::registers::RegisterIo;
use std::sync::Arc;

/// Global mode register: 1 selects power mode, 0 phase rotation.
const POWER_EN_REG: &str = "power_en";
/// Prefix of the per-lane oscillator registers.
const LANE_PREFIX: &str = "lo";
const PHASE_INC_FIELD: &str = "phase_inc";
const PHASE_OFFSET_FIELD: &str = "phase_offset";
const PHASE_SCALE_FIELD: &str = "phase_scale";

/// NCO bank of the polyphase synthesizer.
#[derive(Clone)]
pub struct Mixer {
    regs: Arc<dyn RegisterIo>,
    config: MixerConfig,
    map: ChannelMap,
}

impl std::fmt::Debug for Mixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mixer").field("config", &self.config).finish()
    }
}

impl Mixer {
    /// Creates a mixer control block.
    ///
    /// Fails if the configured channel split is invalid.
    pub fn new(regs: Arc<dyn RegisterIo>, config: &MixerConfig) -> Result<Mixer> {
        let map = ChannelMap::new(config.n_chans, config.n_parallel_chans)?;
        Ok(Mixer {
            regs,
            config: config.clone(),
            map,
        })
    }

    /// Number of channels in the bank.
    pub fn n_chans(&self) -> usize {
        self.map.n_chans()
    }

    /// Width of one FFT channel in Hz for the given DAC sample rate.
    pub fn fft_rbw_hz(&self, sample_rate_mhz: f64) -> f64 {
        sample_rate_mhz * 1e6 / self.config.n_chans as f64
    }

    /// Sets the bank-wide mode: power detection if `power` is true, phase
    /// rotation otherwise.
    pub fn set_power_mode(&self, power: bool) -> Result<()> {
        self.regs.write_u32(POWER_EN_REG, u32::from(power), 0)
    }

    /// Returns true if the bank is in power detection mode.
    pub fn is_power_mode(&self) -> Result<bool> {
        Ok(self.regs.read_u32(POWER_EN_REG, 0)? != 0)
    }

    /// Sets the phase increment applied on each successive sample of
    /// `channel`, and its starting phase offset.
    ///
    /// A `phase_step_rad` of `None` disables the channel's oscillator
    /// (enable bit clear, zero increment); the phase offset register is
    /// written either way. All frequency-setting operations reduce to this
    /// call.
    pub fn set_phase_step(
        &self,
        channel: usize,
        phase_step_rad: Option<f64>,
        phase_offset_rad: f64,
    ) -> Result<()> {
        let pos = self.map.locate(channel)?;
        let inc = fixed::encode_enable_and_phase(phase_step_rad, self.config.phase_bp);
        self.regs.write_u32(
            &lane_register(LANE_PREFIX, pos.lane, PHASE_INC_FIELD),
            inc,
            pos.slot,
        )?;
        let offset = fixed::encode_phase(phase_offset_rad, self.config.phase_offset_bp) as u32;
        self.regs.write_u32(
            &lane_register(LANE_PREFIX, pos.lane, PHASE_OFFSET_FIELD),
            offset,
            pos.slot,
        )
    }

    /// Sets the frequency of `channel` as an offset in Hz from the channel
    /// center.
    ///
    /// A `freq_offset_hz` of `None` disables the channel's oscillator.
    pub fn set_chan_freq(
        &self,
        channel: usize,
        freq_offset_hz: Option<f64>,
        phase_offset_rad: f64,
        sample_rate_mhz: f64,
    ) -> Result<()> {
        let rbw = self.fft_rbw_hz(sample_rate_mhz);
        let phase_step = freq_offset_hz.map(|f| 2.0 * std::f64::consts::PI * f / rbw);
        self.set_phase_step(channel, phase_step, phase_offset_rad)
    }

    /// Reads back the phase increment (radians per sample), phase offset
    /// (radians) and enable flag of `channel`.
    pub fn get_phase_offset(&self, channel: usize) -> Result<(f64, f64, bool)> {
        let pos = self.map.locate(channel)?;
        let word = self.regs.read_u32(
            &lane_register(LANE_PREFIX, pos.lane, PHASE_INC_FIELD),
            pos.slot,
        )?;
        let (phase_step, enabled) = fixed::decode_enable_and_phase(word, self.config.phase_bp);
        let offset = self.regs.read_i32(
            &lane_register(LANE_PREFIX, pos.lane, PHASE_OFFSET_FIELD),
            pos.slot,
        )?;
        let phase_offset = fixed::decode_phase(offset.into(), self.config.phase_offset_bp);
        Ok((phase_step, phase_offset, enabled))
    }

    /// Applies an amplitude scale in (0, 1] to `channel`.
    ///
    /// Scales above 1.0 saturate to the maximum register code.
    pub fn set_amplitude_scale(&self, channel: usize, scale: f64) -> Result<()> {
        let pos = self.map.locate(channel)?;
        let code = fixed::encode_scale(scale, self.config.n_scale_bits)?;
        self.regs.write_u32(
            &lane_register(LANE_PREFIX, pos.lane, PHASE_SCALE_FIELD),
            code,
            pos.slot,
        )
    }

    /// Puts the bank in a known, inert state: phase rotation mode, every
    /// oscillator disabled, every amplitude scale reset to 1.0.
    ///
    /// A no-op if `read_only`.
    pub fn initialize(&self, read_only: bool) -> Result<()> {
        if read_only {
            return Ok(());
        }
        self.set_power_mode(false)?;
        for channel in 0..self.map.n_chans() {
            self.set_phase_step(channel, None, 0.0)?;
            self.set_amplitude_scale(channel, 1.0)?;
        }
        tracing::info!(n_chans = self.map.n_chans(), "initialized mixer bank");
        Ok(())
    }
}

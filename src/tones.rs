//! Tone placement across the synthesizer channels.
//!
//! A target output frequency is split into the nearest FFT channel and a
//! residual offset that the channel's oscillator provides. Two tones that
//! fall in the same output bin are not supported by the firmware, so tone
//! sets are checked for separation before loading; the check is advisory
//! and never blocks execution.

use crate::config::MixerConfig;
use crate::error::Result;
use crate::mixer::Mixer;
use crate::registers::RegisterIo;
use std::sync::Arc;

/// FFT shift schedule registers of the primary and phase-offset
/// synthesizer paths. Both are always written with the same schedule.
const SHIFT_REGS: [&str; 2] = ["pfs_fftshift", "pfsoffset_fftshift"];

/// A tone to load into the synthesizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    /// Output frequency in Hz.
    pub freq_hz: f64,
    /// Starting phase in radians.
    pub phase_offset_rad: f64,
}

/// Advisory warning for a pair of tones that risk aliasing into the same
/// output bin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeparationWarning {
    /// The frequency the warning is about, in Hz.
    pub freq_hz: f64,
    /// Distance to its nearest neighbour, in Hz.
    pub neighbor_offset_hz: f64,
    /// Minimum separation the firmware supports, in Hz.
    pub min_separation_hz: f64,
}

/// Computes the FFT shift schedule for a synthesizer summing `n_tones`
/// tones.
///
/// Shifting down at the first `ceil(log2(n_tones))` stages bounds the
/// fixed-point growth of the summed signal, so the schedule is a mask of
/// that many low bits.
pub fn compute_shift_schedule(n_tones: usize) -> u32 {
    if n_tones <= 1 {
        return 0;
    }
    let shift_stages = n_tones.next_power_of_two().trailing_zeros();
    (1 << shift_stages) - 1
}

/// Places tones on the mixer bank and programs the synthesizer shift
/// schedule.
#[derive(Clone)]
pub struct ToneScheduler {
    mixer: Mixer,
    regs: Arc<dyn RegisterIo>,
    n_chans_out: usize,
}

impl std::fmt::Debug for ToneScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToneScheduler")
            .field("mixer", &self.mixer)
            .field("n_chans_out", &self.n_chans_out)
            .finish()
    }
}

impl ToneScheduler {
    /// Creates a tone scheduler driving `mixer`.
    ///
    /// `n_chans_out` is the number of output channels of the channel
    /// selection stage downstream of the synthesizer, which sets the
    /// minimum usable tone separation.
    pub fn new(regs: Arc<dyn RegisterIo>, config: &MixerConfig, n_chans_out: usize) -> Result<ToneScheduler> {
        let mixer = Mixer::new(regs.clone(), config)?;
        Ok(ToneScheduler {
            mixer,
            regs,
            n_chans_out,
        })
    }

    /// The mixer bank driven by this scheduler.
    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }

    /// Places a tone at `freq_hz`, returning the channel it landed in.
    ///
    /// The frequency is split into the nearest FFT channel and a residual
    /// offset handled by that channel's oscillator. Negative frequencies
    /// and frequencies outside the first Nyquist zone cannot be emitted;
    /// they are logged and skipped (`None`), never an error.
    pub fn place_tone(
        &self,
        freq_hz: f64,
        phase_offset_rad: f64,
        sample_rate_mhz: f64,
        scaling: f64,
    ) -> Result<Option<usize>> {
        if freq_hz < 0.0 {
            tracing::warn!(freq_hz, "skipping negative frequency");
            return Ok(None);
        }
        if freq_hz > sample_rate_mhz * 1e6 {
            tracing::warn!(freq_hz, "skipping frequency outside the first Nyquist zone");
            return Ok(None);
        }
        let rbw = self.mixer.fft_rbw_hz(sample_rate_mhz);
        let channel = (freq_hz / rbw).round() as usize;
        let offset_hz = freq_hz - channel as f64 * rbw;
        tracing::info!(channel, offset_hz, "placing tone");
        self.mixer
            .set_chan_freq(channel, Some(offset_hz), phase_offset_rad, sample_rate_mhz)?;
        self.mixer.set_amplitude_scale(channel, scaling)?;
        Ok(Some(channel))
    }

    /// Checks a tone set for under-separated pairs.
    ///
    /// Each frequency closer to its nearest neighbour than half an output
    /// bin produces a warning; the pair risks aliasing into the same
    /// output bin, which the firmware does not support. Warnings are
    /// logged and returned; they never block loading.
    pub fn check_separation(
        &self,
        freqs_hz: &[f64],
        sample_rate_mhz: f64,
    ) -> Vec<SeparationWarning> {
        let min_separation_hz = sample_rate_mhz * 1e6 / self.n_chans_out as f64 / 2.0;
        let mut warnings = Vec::new();
        for &freq_hz in freqs_hz {
            let neighbor_offset_hz = freqs_hz
                .iter()
                .map(|&other| (other - freq_hz).abs())
                .filter(|&offset| offset > 0.0)
                .fold(f64::INFINITY, f64::min);
            if neighbor_offset_hz < min_separation_hz {
                tracing::warn!(
                    freq_hz,
                    neighbor_offset_hz,
                    min_separation_hz,
                    "tone is too close to its neighbour"
                );
                warnings.push(SeparationWarning {
                    freq_hz,
                    neighbor_offset_hz,
                    min_separation_hz,
                });
            }
        }
        warnings
    }

    /// Programs the shift schedule for a synthesizer summing `n_tones`
    /// tones, on both the primary and phase-offset paths.
    pub fn set_shift_schedule(&self, n_tones: usize) -> Result<()> {
        let schedule = compute_shift_schedule(n_tones);
        tracing::info!(n_tones, schedule, "setting shift schedule");
        for reg in SHIFT_REGS {
            self.regs.write_u32(reg, schedule, 0)?;
        }
        Ok(())
    }

    /// Loads a full tone set: checks separation, places every tone with
    /// the given amplitude scaling, then programs the shift schedule for
    /// the set size.
    ///
    /// Returns the channel each tone landed in (`None` for skipped
    /// tones).
    pub fn load_tones(
        &self,
        tones: &[Tone],
        sample_rate_mhz: f64,
        scaling: f64,
    ) -> Result<Vec<Option<usize>>> {
        let freqs_hz: Vec<f64> = tones.iter().map(|t| t.freq_hz).collect();
        self.check_separation(&freqs_hz, sample_rate_mhz);
        let mut placed = Vec::with_capacity(tones.len());
        for tone in tones {
            placed.push(self.place_tone(
                tone.freq_hz,
                tone.phase_offset_rad,
                sample_rate_mhz,
                scaling,
            )?);
        }
        self.set_shift_schedule(tones.len())?;
        Ok(placed)
    }
}

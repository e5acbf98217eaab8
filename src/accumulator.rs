//! Accumulation buffer readout with tear detection.
//!
//! The FPGA accumulates spectra into per-lane block RAMs and increments a
//! free-running counter once per completed accumulation. The hardware
//! offers no lock or interrupt to coordinate with: the only consistency
//! mechanism is optimistic, sampling the counter before and after the bulk
//! read and discarding the data if it changed. [`Accumulator::wait_for_acc`]
//! reduces the chance of a tear by reading shortly after an accumulation
//! boundary, but correctness rests solely on the counter check.

use crate::chan::ChannelMap;
use crate::config::AccumulatorConfig;
use crate::error::{Error, Result};
use crate::registers::RegisterIo;
use std::sync::Arc;
use std::time::Duration;

/// Free-running accumulation counter. Wraps silently; compared for
/// equality only.
const ACC_CNT_REG: &str = "acc_cnt";
/// Accumulation length register, in units of parallel words.
const ACC_LEN_REG: &str = "acc_len";
/// Prefix of the per-lane output RAMs.
const RAM_PREFIX: &str = "dout";

/// One accumulated channel value.
///
/// For real-valued accumulators `im` is always zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sample {
    /// Real part.
    pub re: i32,
    /// Imaginary part.
    pub im: i32,
}

/// Device memory layout of the interleaved accumulation buffer.
///
/// The addresses are fixed for a given firmware build, so the layout is
/// computed once and reused for every read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferLayout {
    /// Base address of each lane's RAM, one per parallel lane.
    pub addresses: Vec<usize>,
    /// Size of one lane's RAM in bytes, which is also the stride between
    /// consecutive lane addresses.
    pub stride_bytes: usize,
}

/// A consistent accumulation readout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spectra {
    /// Accumulation counter value over the read window.
    pub acc_cnt: u32,
    /// Accumulated values, one per channel, in channel order.
    pub data: Vec<Sample>,
}

/// Result of one accumulation buffer read attempt.
///
/// A torn read carries no data at all, so it cannot be mistaken for a
/// valid (or empty) spectrum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot {
    /// The counter did not change across the read window; the data is a
    /// single coherent accumulation.
    Consistent(Spectra),
    /// The hardware completed an accumulation mid-read. Retry.
    Torn {
        /// Counter value before the bulk read.
        start: u32,
        /// Counter value after the bulk read.
        end: u32,
    },
}

impl Snapshot {
    /// Returns true if the read was consistent.
    pub fn is_consistent(&self) -> bool {
        matches!(self, Snapshot::Consistent(_))
    }

    /// Converts the snapshot into spectra, turning a torn read into
    /// [`Error::TornRead`].
    pub fn into_spectra(self) -> Result<Spectra> {
        match self {
            Snapshot::Consistent(spectra) => Ok(spectra),
            Snapshot::Torn { start, end } => Err(Error::TornRead { start, end }),
        }
    }
}

/// Readout interface to the accumulator block.
#[derive(Clone)]
pub struct Accumulator {
    regs: Arc<dyn RegisterIo>,
    config: AccumulatorConfig,
    map: ChannelMap,
}

impl std::fmt::Debug for Accumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accumulator")
            .field("config", &self.config)
            .finish()
    }
}

impl Accumulator {
    /// Creates an accumulator readout block.
    ///
    /// Fails if the configured channel split is invalid.
    pub fn new(regs: Arc<dyn RegisterIo>, config: &AccumulatorConfig) -> Result<Accumulator> {
        let map = ChannelMap::new(config.n_chans, config.n_parallel_chans)?;
        Ok(Accumulator {
            regs,
            config: config.clone(),
            map,
        })
    }

    /// Number of frequency channels accumulated.
    pub fn n_chans(&self) -> usize {
        self.map.n_chans()
    }

    fn bytes_per_slot(&self) -> usize {
        if self.config.is_complex {
            2 * std::mem::size_of::<i32>()
        } else {
            std::mem::size_of::<i32>()
        }
    }

    /// Reads the current accumulation count.
    pub fn acc_cnt(&self) -> Result<u32> {
        self.regs.read_u32(ACC_CNT_REG, 0)
    }

    /// Computes and verifies the device memory layout of the accumulation
    /// buffer.
    ///
    /// One address is queried per lane; the lanes must sit contiguously at
    /// a fixed stride, otherwise the firmware build does not match this
    /// software and [`Error::InconsistentLayout`] is returned.
    pub fn buffer_layout(&self) -> Result<BufferLayout> {
        let stride_bytes = self.map.n_serial_chans() * self.bytes_per_slot();
        let mut addresses = Vec::with_capacity(self.map.n_parallel_chans());
        for lane in 0..self.map.n_parallel_chans() {
            addresses.push(self.regs.device_address(&format!("{RAM_PREFIX}{lane}"))?);
        }
        for (lane, &actual) in addresses.iter().enumerate() {
            let expected = addresses[0] + lane * stride_bytes;
            if actual != expected {
                return Err(Error::InconsistentLayout {
                    lane,
                    expected,
                    actual,
                });
            }
        }
        Ok(BufferLayout {
            addresses,
            stride_bytes,
        })
    }

    /// Reads the accumulation buffer once.
    ///
    /// Performs one bulk read per lane, de-interleaving lane `i` into
    /// channels `i, i + P, i + 2P, ...` where `P` is the number of lanes.
    /// The accumulation counter is sampled before and after; if it moved,
    /// [`Snapshot::Torn`] is returned and the data is discarded.
    pub fn read_snapshot(&self, layout: &BufferLayout) -> Result<Snapshot> {
        let start = self.acc_cnt()?;
        let n_parallel = self.map.n_parallel_chans();
        let mut data = vec![Sample::default(); self.map.n_chans()];
        for (lane, &addr) in layout.addresses.iter().enumerate() {
            let raw = self.regs.read_bytes(addr, layout.stride_bytes)?;
            for (slot, chunk) in raw.chunks_exact(self.bytes_per_slot()).enumerate() {
                // accumulated words are big endian on the wire
                let re = i32::from_be_bytes(chunk[..4].try_into().unwrap());
                let im = if self.config.is_complex {
                    i32::from_be_bytes(chunk[4..8].try_into().unwrap())
                } else {
                    0
                };
                data[slot * n_parallel + lane] = Sample { re, im };
            }
        }
        let end = self.acc_cnt()?;
        if start != end {
            tracing::warn!(start, end, "accumulation counter changed while reading data");
            return Ok(Snapshot::Torn { start, end });
        }
        Ok(Snapshot::Consistent(Spectra {
            acc_cnt: end,
            data,
        }))
    }

    /// Waits until a new accumulation completes, polling the counter every
    /// `poll_interval`, and returns the new count.
    ///
    /// Reading right after the accumulation boundary minimizes the chance
    /// of a torn read; it is an optimization, not a correctness
    /// requirement.
    pub async fn wait_for_acc(&self, poll_interval: Duration) -> Result<u32> {
        let start = u64::from(self.acc_cnt()?);
        let target = start + 1;
        loop {
            let mut current = u64::from(self.acc_cnt()?);
            if current < start {
                // counter wrapped
                current += 1 << 32;
            }
            if current >= target {
                return Ok(current as u32);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Returns the currently programmed accumulation length, in spectra.
    pub fn acc_len(&self) -> Result<u32> {
        let raw = u64::from(self.regs.read_u32(ACC_LEN_REG, 0)?);
        Ok((raw * self.map.n_parallel_chans() as u64 / self.map.n_chans() as u64) as u32)
    }

    /// Programs the accumulation length, in spectra.
    ///
    /// The register holds the length in parallel words, so the value is
    /// scaled by `n_chans / n_parallel_chans` before writing.
    pub fn set_acc_len(&self, spectra: u32) -> Result<()> {
        let raw = u64::from(spectra) * self.map.n_serial_chans() as u64;
        let raw = u32::try_from(raw).map_err(|_| {
            Error::InvalidConfig(format!("accumulation length {spectra} overflows the register"))
        })?;
        self.regs.write_u32(ACC_LEN_REG, raw, 0)
    }

    /// Initializes the block.
    ///
    /// If `read_only`, the currently loaded accumulation length is read
    /// back; otherwise the configured default length is programmed.
    pub fn initialize(&self, read_only: bool) -> Result<()> {
        if read_only {
            self.acc_len()?;
        } else {
            self.set_acc_len(self.config.acc_len)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registers::mock::FakeFpga;

    fn accumulator(config: &AccumulatorConfig) -> (Arc<FakeFpga>, Accumulator) {
        let fpga = Arc::new(FakeFpga::new());
        let acc = Accumulator::new(fpga.clone(), config).unwrap();
        (fpga, acc)
    }

    fn small_config() -> AccumulatorConfig {
        AccumulatorConfig {
            n_chans: 4,
            n_parallel_chans: 2,
            ..AccumulatorConfig::default()
        }
    }

    fn be_samples(samples: &[(i32, i32)]) -> Vec<u8> {
        samples
            .iter()
            .flat_map(|&(re, im)| {
                re.to_be_bytes().into_iter().chain(im.to_be_bytes())
            })
            .collect()
    }

    #[test]
    fn contiguous_layout() {
        let config = AccumulatorConfig {
            n_chans: 16,
            n_parallel_chans: 4,
            ..AccumulatorConfig::default()
        };
        let (fpga, acc) = accumulator(&config);
        // 4 serial slots of 8 bytes each per lane
        for lane in 0..4 {
            fpga.add_ram(&format!("dout{lane}"), 0x1000 + lane * 0x20, &[0; 0x20]);
        }
        let layout = acc.buffer_layout().unwrap();
        assert_eq!(layout.stride_bytes, 0x20);
        assert_eq!(layout.addresses, vec![0x1000, 0x1020, 0x1040, 0x1060]);
    }

    #[test]
    fn discontiguous_layout_rejected() {
        // 96 channels over 3 lanes of 32 complex slots: 0x100 bytes per lane
        let config = AccumulatorConfig {
            n_chans: 96,
            n_parallel_chans: 3,
            ..AccumulatorConfig::default()
        };
        let (fpga, acc) = accumulator(&config);
        fpga.add_ram("dout0", 0x1000, &[]);
        fpga.add_ram("dout1", 0x1100, &[]);
        fpga.add_ram("dout2", 0x1300, &[]);
        assert!(matches!(
            acc.buffer_layout(),
            Err(Error::InconsistentLayout {
                lane: 2,
                expected: 0x1200,
                actual: 0x1300,
            })
        ));
    }

    #[test]
    fn snapshot_deinterleaves_lanes() {
        let (fpga, acc) = accumulator(&small_config());
        fpga.set_register(ACC_CNT_REG, 0, 5);
        fpga.add_ram("dout0", 0x2000, &be_samples(&[(1, 2), (3, 4)]));
        fpga.add_ram("dout1", 0x2010, &be_samples(&[(5, 6), (7, 8)]));
        let layout = acc.buffer_layout().unwrap();
        let spectra = acc.read_snapshot(&layout).unwrap().into_spectra().unwrap();
        assert_eq!(spectra.acc_cnt, 5);
        assert_eq!(
            spectra.data,
            vec![
                Sample { re: 1, im: 2 },
                Sample { re: 5, im: 6 },
                Sample { re: 3, im: 4 },
                Sample { re: 7, im: 8 },
            ]
        );
    }

    #[test]
    fn counter_movement_tears_the_read() {
        let (fpga, acc) = accumulator(&small_config());
        fpga.queue_read(ACC_CNT_REG, 5);
        fpga.set_register(ACC_CNT_REG, 0, 6);
        fpga.add_ram("dout0", 0x2000, &be_samples(&[(1, 2), (3, 4)]));
        fpga.add_ram("dout1", 0x2010, &be_samples(&[(5, 6), (7, 8)]));
        let layout = acc.buffer_layout().unwrap();
        let snapshot = acc.read_snapshot(&layout).unwrap();
        assert_eq!(snapshot, Snapshot::Torn { start: 5, end: 6 });
        assert!(!snapshot.is_consistent());
        assert!(matches!(
            snapshot.into_spectra(),
            Err(Error::TornRead { start: 5, end: 6 })
        ));
    }

    #[test]
    fn real_valued_snapshot() {
        let config = AccumulatorConfig {
            n_chans: 4,
            n_parallel_chans: 2,
            is_complex: false,
            ..AccumulatorConfig::default()
        };
        let (fpga, acc) = accumulator(&config);
        fpga.set_register(ACC_CNT_REG, 0, 1);
        let words: Vec<u8> = [10i32, 30].iter().flat_map(|w| w.to_be_bytes()).collect();
        fpga.add_ram("dout0", 0x3000, &words);
        let words: Vec<u8> = [20i32, 40].iter().flat_map(|w| w.to_be_bytes()).collect();
        fpga.add_ram("dout1", 0x3008, &words);
        let layout = acc.buffer_layout().unwrap();
        assert_eq!(layout.stride_bytes, 8);
        let spectra = acc.read_snapshot(&layout).unwrap().into_spectra().unwrap();
        let re: Vec<i32> = spectra.data.iter().map(|s| s.re).collect();
        assert_eq!(re, vec![10, 20, 30, 40]);
        assert!(spectra.data.iter().all(|s| s.im == 0));
    }

    #[test]
    fn acc_len_roundtrip() {
        let (fpga, acc) = accumulator(&AccumulatorConfig::default());
        acc.set_acc_len(1 << 15).unwrap();
        // 32768 spectra * 4096 chans / 8 lanes
        assert_eq!(fpga.register(ACC_LEN_REG, 0).unwrap(), 16_777_216);
        assert_eq!(acc.acc_len().unwrap(), 1 << 15);
    }

    #[test]
    fn initialize_programs_default_length() {
        let config = AccumulatorConfig {
            acc_len: 1024,
            ..AccumulatorConfig::default()
        };
        let (fpga, acc) = accumulator(&config);
        acc.initialize(false).unwrap();
        assert_eq!(acc.acc_len().unwrap(), 1024);
        fpga.set_register(ACC_LEN_REG, 0, 512 * 512);
        acc.initialize(true).unwrap();
        assert_eq!(acc.acc_len().unwrap(), 512);
    }

    #[tokio::test]
    async fn wait_for_acc_returns_on_increment() {
        let (fpga, acc) = accumulator(&small_config());
        fpga.queue_read(ACC_CNT_REG, 5);
        fpga.queue_read(ACC_CNT_REG, 5);
        fpga.set_register(ACC_CNT_REG, 0, 6);
        let cnt = acc.wait_for_acc(Duration::from_millis(1)).await.unwrap();
        assert_eq!(cnt, 6);
    }

    #[tokio::test]
    async fn wait_for_acc_handles_counter_wrap() {
        let (fpga, acc) = accumulator(&small_config());
        fpga.queue_read(ACC_CNT_REG, u32::MAX);
        fpga.set_register(ACC_CNT_REG, 0, 0);
        let cnt = acc.wait_for_acc(Duration::from_millis(1)).await.unwrap();
        assert_eq!(cnt, 0);
    }
}

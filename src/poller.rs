//! Accumulation poller.
//!
//! This module runs the periodic readout of the accumulator block: wait
//! for the next accumulation boundary, bulk-read the buffer, throw away
//! torn reads, and publish consistent spectra (normalized by the
//! accumulation length and serialized into [`Bytes`]) to a
//! [`tokio::sync::broadcast::Sender`] for any consumers.

use crate::accumulator::{Accumulator, BufferLayout, Snapshot, Spectra};
use anyhow::Result;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::broadcast;

/// Periodic accumulator readout loop.
#[derive(Debug)]
pub struct AccPoller {
    accumulator: Accumulator,
    layout: BufferLayout,
    sender: broadcast::Sender<Bytes>,
    poll_interval: Duration,
}

impl AccPoller {
    /// Creates a poller for `accumulator`.
    ///
    /// The buffer layout is computed and verified here, once; a layout
    /// mismatch is fatal and reported immediately rather than on the
    /// first read.
    pub fn new(
        accumulator: Accumulator,
        sender: broadcast::Sender<Bytes>,
        poll_interval: Duration,
    ) -> Result<AccPoller> {
        let layout = accumulator.buffer_layout()?;
        Ok(AccPoller {
            accumulator,
            layout,
            sender,
            poll_interval,
        })
    }

    /// Runs the poller.
    ///
    /// This function only returns if there is an error. It should be run
    /// concurrently with the rest of the application.
    #[tracing::instrument(name = "acc_poller", skip_all)]
    pub async fn run(self) -> Result<()> {
        let mut torn_reads: u64 = 0;
        loop {
            self.accumulator.wait_for_acc(self.poll_interval).await?;
            let spectra = match self.accumulator.read_snapshot(&self.layout)? {
                Snapshot::Consistent(spectra) => spectra,
                Snapshot::Torn { .. } => {
                    // read_snapshot already logged the tear; just retry
                    torn_reads += 1;
                    tracing::debug!(torn_reads, "discarding torn read");
                    continue;
                }
            };
            let scale = 1.0 / self.accumulator.acc_len()? as f32;
            if self.sender.receiver_count() > 0 {
                // It is ok if send returns Err, because there might be
                // no receiver handles in this moment.
                let _ = self.sender.send(Self::spectra_to_bytes(&spectra, scale));
            }
        }
    }

    fn spectra_to_bytes(spectra: &Spectra, scale: f32) -> Bytes {
        spectra
            .data
            .iter()
            .flat_map(|sample| {
                (sample.re as f32 * scale)
                    .to_ne_bytes()
                    .into_iter()
                    .chain((sample.im as f32 * scale).to_ne_bytes())
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::accumulator::Sample;
    use crate::config::AccumulatorConfig;
    use crate::registers::mock::FakeFpga;
    use std::sync::Arc;

    #[test]
    fn spectra_serialization() {
        let spectra = Spectra {
            acc_cnt: 1,
            data: vec![Sample { re: 2, im: -4 }, Sample { re: 0, im: 8 }],
        };
        let bytes = AccPoller::spectra_to_bytes(&spectra, 0.5);
        let expected: Vec<u8> = [1.0f32, -2.0, 0.0, 4.0]
            .iter()
            .flat_map(|x| x.to_ne_bytes())
            .collect();
        assert_eq!(&bytes[..], &expected[..]);
    }

    #[tokio::test]
    async fn publishes_consistent_snapshot() {
        let fpga = Arc::new(FakeFpga::new());
        let config = AccumulatorConfig {
            n_chans: 4,
            n_parallel_chans: 2,
            ..AccumulatorConfig::default()
        };
        let accumulator = Accumulator::new(fpga.clone(), &config).unwrap();
        let data: Vec<u8> = [1i32, 2, 3, 4].iter().flat_map(|w| w.to_be_bytes()).collect();
        fpga.add_ram("dout0", 0x1000, &data);
        let data: Vec<u8> = [5i32, 6, 7, 8].iter().flat_map(|w| w.to_be_bytes()).collect();
        fpga.add_ram("dout1", 0x1010, &data);
        // one accumulation boundary, then the counter holds at 2
        fpga.queue_read("acc_cnt", 1);
        fpga.set_register("acc_cnt", 0, 2);
        accumulator.set_acc_len(1).unwrap();

        let (sender, mut receiver) = broadcast::channel(4);
        let poller =
            AccPoller::new(accumulator, sender, Duration::from_millis(1)).unwrap();
        let handle = tokio::spawn(poller.run());
        let bytes = receiver.recv().await.unwrap();
        handle.abort();

        let expected: Vec<u8> = [1.0f32, 2.0, 5.0, 6.0, 3.0, 4.0, 7.0, 8.0]
            .iter()
            .flat_map(|x| x.to_ne_bytes())
            .collect();
        assert_eq!(&bytes[..], &expected[..]);
    }
}

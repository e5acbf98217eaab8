//! readout-ctl is the control software for an FPGA polyphase tone
//! synthesizer and accumulation readout. It programs the per-channel NCO
//! bank (frequency, phase and amplitude of each output tone) and reads the
//! continuously-updating hardware accumulation buffer, detecting and
//! discarding reads torn by the FPGA's background accumulation cycle.
//!
//! Board programming and the register transport are external: everything
//! here talks to the hardware through the narrow
//! [`RegisterIo`](registers::RegisterIo) interface.

#![warn(missing_docs)]

pub mod accumulator;
pub mod chan;
pub mod config;
pub mod error;
pub mod fixed;
pub mod mixer;
pub mod poller;
pub mod registers;
pub mod tones;

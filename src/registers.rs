//! Register interface to the FPGA.
//!
//! The firmware exposes its control surface as named 32-bit registers and
//! named block RAMs mapped into the device address space. How those names
//! are resolved and how the words move on the wire is the transport's
//! business (memory-mapped AXI, katcp, a simulator...); the blocks in this
//! crate only see the narrow [`RegisterIo`] capability defined here.
//!
//! Register names are a bit-for-bit contract with the firmware register map
//! and must not be altered independently of it.

use crate::error::Result;
use std::collections::BTreeSet;

/// Access to the named registers and RAMs of the FPGA design.
///
/// All calls are synchronous and blocking. Implementations must wrap any
/// transport failure in [`Error::RegisterAccess`] without interpreting it.
pub trait RegisterIo: Send + Sync {
    /// Reads a 32-bit register.
    ///
    /// For vector registers, `word_offset` selects the 32-bit word within
    /// the register.
    fn read_u32(&self, name: &str, word_offset: usize) -> Result<u32>;

    /// Writes a 32-bit register.
    fn write_u32(&self, name: &str, value: u32, word_offset: usize) -> Result<()>;

    /// Lists the registers and RAMs present in the running design.
    fn list(&self) -> Result<BTreeSet<String>>;

    /// Returns the device address of a named RAM.
    ///
    /// Used to set up bulk reads of the accumulation buffers.
    fn device_address(&self, name: &str) -> Result<usize>;

    /// Performs a bulk read of `len` bytes starting at device address
    /// `addr`.
    fn read_bytes(&self, addr: usize, len: usize) -> Result<Vec<u8>>;

    /// Reads a register as a two's-complement signed value.
    fn read_i32(&self, name: &str, word_offset: usize) -> Result<i32> {
        Ok(self.read_u32(name, word_offset)? as i32)
    }
}

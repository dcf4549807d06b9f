//! A driver for 23-series serial SRAM chips wired to the user-mode SPI
//! controller of ESP8266-class microcontrollers.
//!
//! Unlike a byte-stream SPI master, the controller is driven through its
//! phase registers: every access programs command/address/data phase lengths,
//! triggers one hardware transaction and moves the payload through the
//! controller's 16-word data window. At most 64 bytes move per transaction;
//! longer requests are clamped, never rejected.
//!
//! Quad-line transfers are supported, including boards where the two inner
//! data lines are crossed and the mode-switch command has to be clocked out
//! by hand on raw GPIOs. See [`sram23::SpiRam`] for the driver entry points.

#![doc(html_root_url = "https://docs.rs/spi-sram/0.1.0")]
#![warn(missing_debug_implementations, rust_2018_idioms)]
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod log;
mod error;
pub mod bus;
pub mod prelude;
pub mod selftest;
pub mod sram23;

pub use crate::error::Error;

/// A trait for reading operations from a memory chip.
pub trait Read<Addr> {
    /// Error produced by a failed read.
    type Error;

    /// Reads bytes from a memory chip.
    ///
    /// Fills the front of `buf` starting at `addr` and returns the number of
    /// bytes actually transferred, which may be less than `buf.len()`.
    fn read(&mut self, addr: Addr, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

/// A trait for writing operations on a memory chip.
pub trait Write<Addr> {
    /// Error produced by a failed write.
    type Error;

    /// Writes bytes to a memory chip.
    ///
    /// Transfers the front of `data` to the chip starting at `addr` and
    /// returns the number of bytes actually transferred, which may be less
    /// than `data.len()`.
    fn write(&mut self, addr: Addr, data: &[u8]) -> Result<usize, Self::Error>;
}

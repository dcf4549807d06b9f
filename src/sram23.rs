//! Driver for 23-series serial SRAM chips (23LC1024 and friends).
//!
//! The chip powers up in single-line mode. Quad-line operation requires a
//! one-time mode-switch command, after which every transaction folds the
//! opcode into the address phase. On boards where the inner data lines are
//! crossed, that one command cannot go through the controller at all and is
//! clocked out by hand on raw GPIOs instead; see
//! [`SpiRam::init_quad_swapped`].

use crate::bus::{Data, Engine, LineMode, Registers, Timeout, WaitPolicy};
use crate::{Error, Read, Write};
use embedded_hal::digital::v2::OutputPin;

enum Opcode {
    /// Sequential read.
    Read = 0x03,
    /// Sequential write.
    Write = 0x02,
    /// Switch the chip from single-line to quad-line transfers.
    EnterQuadIo = 0x38,
}

/// Driver for a 23-series SRAM on the user-mode SPI controller.
///
/// # Type Parameters
///
/// * **`R`**: Exclusive handle to the controller register files.
///
/// Every operation runs its register sequence inside a critical section; the
/// two controllers alias the same physical lines and a preempting task must
/// not observe a half-programmed phase configuration. Serialization between
/// tasks is the caller's job; the driver provides no queueing.
#[derive(Debug)]
pub struct SpiRam<R: Registers> {
    engine: Engine<R>,
}

impl<R: Registers> SpiRam<R> {
    /// Brings up the bus in single-line mode.
    ///
    /// Configures the controller and flushes whatever state power-up left in
    /// the chip with one discarded read. Must run before the first access;
    /// running it again on the same hardware changes nothing.
    pub fn init(regs: R, wait: WaitPolicy) -> Result<Self, Timeout> {
        let mut this = SpiRam {
            engine: Engine::new(regs, LineMode::Single, wait),
        };
        critical_section::with(|_| this.engine.configure());
        info!("SpiRam::init: single-line mode");
        this.flush()?;
        Ok(this)
    }

    /// Brings up the bus in quad-line mode.
    ///
    /// The mode-switch command goes out as an ordinary single-line command
    /// transaction before the controller's data path is widened.
    pub fn init_quad(regs: R, wait: WaitPolicy) -> Result<Self, Timeout> {
        let mut this = SpiRam {
            engine: Engine::new(regs, LineMode::Quad, wait),
        };
        critical_section::with(|_| -> Result<(), Timeout> {
            this.engine.configure();
            this.engine.apply_phase_defaults();
            this.engine.command(Opcode::EnterQuadIo as u8)?;
            this.engine.enable_quad_data();
            Ok(())
        })?;
        info!("SpiRam::init_quad: quad mode entered through the engine");
        this.flush()?;
        Ok(this)
    }

    /// Brings up the bus in quad-line mode on a board with crossed SIO0/SIO1
    /// and SIO2/SIO3 lines.
    ///
    /// The crossing makes the controller's own command phase unusable for
    /// the mode switch, so the command is clocked out by hand on `cs`, `clk`
    /// and `sio` while they are plain GPIOs; the pads are handed back to the
    /// controller afterwards. All three pins must share one error type,
    /// which they do when they come from the same HAL.
    pub fn init_quad_swapped<CS, CLK, SIO, E>(
        regs: R,
        wait: WaitPolicy,
        cs: &mut CS,
        clk: &mut CLK,
        sio: &mut SIO,
    ) -> Result<Self, Error<E>>
    where
        CS: OutputPin<Error = E>,
        CLK: OutputPin<Error = E>,
        SIO: OutputPin<Error = E>,
    {
        let mut this = SpiRam {
            engine: Engine::new(regs, LineMode::QuadSwapped, wait),
        };
        critical_section::with(|_| -> Result<(), Error<E>> {
            bitbang_command(cs, clk, sio, Opcode::EnterQuadIo as u8).map_err(Error::Gpio)?;
            this.engine.attach_data_pins();
            this.engine.configure();
            this.engine.apply_phase_defaults();
            this.engine.enable_quad_data();
            Ok(())
        })?;
        info!("SpiRam::init_quad_swapped: quad mode entered over raw pins");
        this.flush()?;
        Ok(this)
    }

    /// Reads up to [64 bytes](crate::bus::MAX_TRANSFER) starting at `addr`
    /// into the front of `buf`, returning the number of bytes transferred.
    ///
    /// Longer buffers are clamped, not split; `addr` is truncated to the
    /// chip's 24 address bits.
    pub fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<usize, Timeout> {
        critical_section::with(|_| self.engine.run(Opcode::Read as u8, addr, Data::In(buf)))
    }

    /// Writes up to [64 bytes](crate::bus::MAX_TRANSFER) from the front of
    /// `data` starting at `addr`, returning the number of bytes transferred.
    ///
    /// Returns as soon as the transaction is triggered; the next operation's
    /// leading idle poll waits for it.
    pub fn write(&mut self, addr: u32, data: &[u8]) -> Result<usize, Timeout> {
        critical_section::with(|_| self.engine.run(Opcode::Write as u8, addr, Data::Out(data)))
    }

    /// Releases the register file.
    pub fn free(self) -> R {
        self.engine.free()
    }

    /// One discarded read, large enough to cover the whole data window.
    /// Drains any indeterminate state power-up or the mode switch left in
    /// the chip.
    fn flush(&mut self) -> Result<(), Timeout> {
        let mut dummy = [0; 128];
        self.read(0x0, &mut dummy).map(drop)
    }
}

impl<R: Registers> Read<u32> for SpiRam<R> {
    type Error = Timeout;

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<usize, Timeout> {
        SpiRam::read(self, addr, buf)
    }
}

impl<R: Registers> Write<u32> for SpiRam<R> {
    type Error = Timeout;

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<usize, Timeout> {
        SpiRam::write(self, addr, data)
    }
}

/// Clocks `opcode` out by hand, most significant bit first: chip-select low,
/// the data pin per bit, one clock pulse per bit, chip-select high.
///
/// No explicit delays; the pin writes themselves are slow against the chip's
/// timing requirements.
fn bitbang_command<CS, CLK, SIO, E>(
    cs: &mut CS,
    clk: &mut CLK,
    sio: &mut SIO,
    opcode: u8,
) -> Result<(), E>
where
    CS: OutputPin<Error = E>,
    CLK: OutputPin<Error = E>,
    SIO: OutputPin<Error = E>,
{
    cs.set_high()?;
    clk.set_low()?;
    cs.set_low()?;
    for bit in (0..8).rev() {
        if opcode & (1 << bit) != 0 {
            sio.set_high()?;
        } else {
            sio.set_low()?;
        }
        clk.set_high()?;
        clk.set_low()?;
    }
    cs.set_high()
}

//! The transaction engine for the user-mode SPI controller.
//!
//! The controller executes one half-duplex transaction at a time, described
//! entirely by register fields: which phases run (command, address, dummy,
//! data-in, data-out), how many bits each phase shifts, and a 16-word data
//! window holding the payload. [`Engine`] translates a logical request into
//! those fields, fires the transaction and, for reads, collects the result.
//!
//! Hardware access goes through the [`Registers`] capability so that board
//! support crates (and the test suite) can supply the actual register file.

use bitflags::bitflags;
use core::fmt;

/// Payload capacity of one transaction: 16 data-window words of 4 bytes.
///
/// Longer requests are clamped to this size. That is a documented policy of
/// the driver, not an error condition.
pub const MAX_TRANSFER: usize = 64;

/// Memory addresses are truncated to the chip's 24 address bits.
pub const ADDR_MASK: u32 = 0x00FF_FFFF;

/// The two controllers overlapped onto the shared bus pads. `Cspi` carries
/// the boot flash; `Hspi` carries the SRAM traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ctrl {
    /// The primary controller, kept at higher arbitration priority.
    Cspi,
    /// The secondary controller the engine runs its transactions on.
    Hspi,
}

/// Word-sized registers of one controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    /// Transaction trigger and busy status.
    Cmd,
    /// Controller mode bits (quad IO, fast read).
    Ctrl,
    /// Serial clock divider.
    Clock,
    /// Phase enables and transfer shape.
    User,
    /// Address, data and dummy phase bit lengths.
    User1,
    /// Command phase bit length and value.
    User2,
    /// Composed address (and, in quad mode, opcode) word.
    Addr,
    /// Chip-select routing.
    Pin,
    /// Bus arbitration priority.
    Ext3,
    /// Data window, words 0 through 15.
    W(u8),
}

bitflags! {
    /// Phase-enable and transfer-shape bits of the [`Reg::User`] register.
    pub struct User: u32 {
        /// Run a command phase.
        const COMMAND = 1 << 31;
        /// Run an address phase.
        const ADDR = 1 << 30;
        /// Insert dummy cycles before the data phase.
        const DUMMY = 1 << 29;
        /// Run a data-in phase.
        const MISO = 1 << 28;
        /// Run a data-out phase.
        const MOSI = 1 << 27;
        /// Send the data-out phase over all four lines.
        const FWRITE_QIO = 1 << 15;
        /// Insert chip-select setup time before the first phase.
        const CS_SETUP = 1 << 5;
        /// Hold chip-select after the last phase.
        const CS_HOLD = 1 << 4;
        /// Flash-compatible framing; always off for SRAM transactions.
        const FLASH_MODE = 1 << 2;
    }
}

/// [`Reg::Cmd`]: transaction start bit; reads back as the busy flag.
pub const CMD_USR: u32 = 1 << 18;

/// [`Reg::Ctrl`]: receive the data-in phase over all four lines.
pub const CTRL_QIO_MODE: u32 = 1 << 24;
/// [`Reg::Ctrl`]: fast-read timing for the data-in phase.
pub const CTRL_FASTRD_MODE: u32 = 1 << 13;

/// [`Reg::Pin`]: chip-select line disables.
pub const PIN_CS0_DIS: u32 = 1 << 0;
/// See [`PIN_CS0_DIS`].
pub const PIN_CS1_DIS: u32 = 1 << 1;
/// See [`PIN_CS0_DIS`].
pub const PIN_CS2_DIS: u32 = 1 << 2;

/// [`Reg::User1`] bit-length fields. Each field holds one less than the
/// number of bits the phase shifts; the dummy field counts cycle units.
pub const USER1_ADDR_BITLEN: u32 = 0x3F;
/// Shift of the address bit-length field.
pub const USER1_ADDR_BITLEN_S: u32 = 26;
/// Mask of the data-out bit-length field.
pub const USER1_MOSI_BITLEN: u32 = 0x1FF;
/// Shift of the data-out bit-length field.
pub const USER1_MOSI_BITLEN_S: u32 = 17;
/// Mask of the data-in bit-length field.
pub const USER1_MISO_BITLEN: u32 = 0x1FF;
/// Shift of the data-in bit-length field.
pub const USER1_MISO_BITLEN_S: u32 = 8;
/// Mask of the dummy-cycle field.
pub const USER1_DUMMY_CYCLELEN: u32 = 0xFF;
/// Shift of the dummy-cycle field.
pub const USER1_DUMMY_CYCLELEN_S: u32 = 0;

/// [`Reg::User2`]: command bit-length field (one less than the bit count).
pub const USER2_COMMAND_BITLEN: u32 = 0xF;
/// Shift of the command bit-length field.
pub const USER2_COMMAND_BITLEN_S: u32 = 28;
/// [`Reg::User2`]: command value field.
pub const USER2_COMMAND_VALUE: u32 = 0xFFFF;

/// [`Reg::Clock`] value for one quarter of the 80 MHz system clock:
/// pre-divider 1, cycle length 4, clock high for 2 of those cycles.
pub const CLOCK_SYSCLK_DIV_4: u32 = (3 << 12) | (1 << 6) | 3;

/// Exclusive access to the register files of the two overlapped user-mode
/// SPI controllers, plus the pad-routing glue the engine cannot express
/// itself.
///
/// Implementations map `(Ctrl, Reg)` pairs onto their memory-mapped register
/// addresses; the bit layout inside each register is fixed by this module's
/// constants. Exactly one value of the implementing type may exist per
/// hardware instance, so holding it is holding the bus.
pub trait Registers {
    /// Reads one register.
    fn read(&self, ctrl: Ctrl, reg: Reg) -> u32;

    /// Writes one register.
    fn write(&mut self, ctrl: Ctrl, reg: Reg, word: u32);

    /// Sets the bits in `mask`, read-modify-write.
    fn set_bits(&mut self, ctrl: Ctrl, reg: Reg, mask: u32) {
        let word = self.read(ctrl, reg);
        self.write(ctrl, reg, word | mask);
    }

    /// Clears the bits in `mask`, read-modify-write.
    fn clear_bits(&mut self, ctrl: Ctrl, reg: Reg, mask: u32) {
        let word = self.read(ctrl, reg);
        self.write(ctrl, reg, word & !mask);
    }

    /// Board glue: overlaps both controllers onto the shared bus pads.
    fn join_bus(&mut self);

    /// Board glue: routes the `Hspi` CS2 pad function to the chip-select pin.
    fn route_chip_select(&mut self);

    /// Board glue: re-attaches the clock and data pads to the controller
    /// after they were borrowed for bit-banging.
    fn attach_data_pins(&mut self);
}

/// Payload of one transaction.
///
/// The variant selects the data phase, so a transaction moves bytes in
/// exactly one direction; the hardware is half-duplex.
#[derive(Debug)]
pub enum Data<'a> {
    /// Clock bytes out of the chip into the buffer.
    In(&'a mut [u8]),
    /// Clock bytes from the buffer into the chip.
    Out(&'a [u8]),
}

impl Data<'_> {
    fn len(&self) -> usize {
        match self {
            Data::In(buf) => buf.len(),
            Data::Out(buf) => buf.len(),
        }
    }

    fn is_in(&self) -> bool {
        matches!(self, Data::In(_))
    }
}

/// Bus width configuration, fixed when the engine is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineMode {
    /// One data line in each direction; commands go out on their own phase.
    Single,
    /// Four shared data lines; the opcode rides as the top byte of a 32-bit
    /// address phase and reads take one dummy unit before data.
    Quad,
    /// Quad transfers on a board with SIO0/SIO1 and SIO2/SIO3 crossed.
    /// Every transmitted address/opcode word is bit-permuted to compensate.
    QuadSwapped,
}

/// How [`Engine`] polls for transaction completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Poll until the hardware reports done. A wedged controller hangs the
    /// caller; a supervising watchdog is expected above this layer.
    Forever,
    /// Give up after this many polls and report [`Timeout`].
    Spins(u32),
}

impl Default for WaitPolicy {
    fn default() -> Self {
        WaitPolicy::Forever
    }
}

/// A completion poll exceeded its spin budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout;

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("transaction completion poll timed out")
    }
}

/// Register fields for one transaction, derived from the request before
/// anything touches the hardware.
#[derive(Debug, PartialEq, Eq)]
struct Phases {
    /// [`Reg::User`] bits to set.
    enable: User,
    /// [`Reg::User`] bits to clear.
    disable: User,
    /// Packed bit-length word for [`Reg::User1`].
    lengths: u32,
    /// Command bit length and value for [`Reg::User2`]; single-line only.
    command: Option<u32>,
    /// Composed address/opcode word, already permuted for crossed lines.
    addr: u32,
}

/// Exchanges each adjacent bit pair of `word`: bit 0 with bit 1, bit 2 with
/// bit 3, and so on.
///
/// Applying this to every transmitted word is what compensates for crossed
/// SIO0/SIO1 and SIO2/SIO3 lines; applying it twice is the identity.
pub fn swap_pairs(word: u32) -> u32 {
    ((word & 0xAAAA_AAAA) >> 1) | ((word & 0x5555_5555) << 1)
}

fn command_field(opcode: u8) -> u32 {
    // The hardware shifts one bit more than the field value: 7 encodes the
    // 8-bit command.
    ((7 & USER2_COMMAND_BITLEN) << USER2_COMMAND_BITLEN_S) | u32::from(opcode)
}

impl LineMode {
    /// Encodes a transaction descriptor into its phase field set.
    ///
    /// `len` of zero drops the data phase (and, for quad reads, the dummy
    /// cycles) entirely; the transaction then runs only its command/address
    /// phases.
    fn phases(self, opcode: u8, addr: u32, data_in: bool, len: usize) -> Phases {
        let addr = addr & ADDR_MASK;
        let mut enable = User::ADDR;
        let mut disable = User::FLASH_MODE;
        let mut lengths = 0;

        if len != 0 {
            // Bit-length fields hold one less than the number of bits moved.
            let data_bits = 8 * len as u32 - 1;
            if data_in {
                enable |= User::MISO;
                disable |= User::MOSI;
                lengths |= (data_bits & USER1_MISO_BITLEN) << USER1_MISO_BITLEN_S;
            } else {
                enable |= User::MOSI;
                disable |= User::MISO;
                lengths |= (data_bits & USER1_MOSI_BITLEN) << USER1_MOSI_BITLEN_S;
            }
        } else {
            disable |= User::MISO | User::MOSI;
        }

        match self {
            LineMode::Single => {
                enable |= User::COMMAND | User::CS_SETUP | User::CS_HOLD;
                disable |= User::DUMMY;
                lengths |= (23 & USER1_ADDR_BITLEN) << USER1_ADDR_BITLEN_S;
                Phases {
                    enable,
                    disable,
                    lengths,
                    command: Some(command_field(opcode)),
                    addr: addr << 8,
                }
            }
            LineMode::Quad | LineMode::QuadSwapped => {
                // No command phase; the opcode is the top byte of a 32-bit
                // address phase.
                disable |= User::COMMAND;
                if data_in && len != 0 {
                    enable |= User::DUMMY;
                    lengths |= (1 & USER1_DUMMY_CYCLELEN) << USER1_DUMMY_CYCLELEN_S;
                } else {
                    disable |= User::DUMMY;
                }
                lengths |= (31 & USER1_ADDR_BITLEN) << USER1_ADDR_BITLEN_S;

                let word = addr | u32::from(opcode) << 24;
                Phases {
                    enable,
                    disable,
                    lengths,
                    command: None,
                    addr: if self == LineMode::QuadSwapped {
                        swap_pairs(word)
                    } else {
                        word
                    },
                }
            }
        }
    }
}

/// The controller all transactions run on.
const DATA_CTRL: Ctrl = Ctrl::Hspi;

/// The transaction engine.
///
/// Owns the register handle exclusively; at most one transaction is in
/// flight, enforced by the leading idle poll of every operation.
#[derive(Debug)]
pub struct Engine<R: Registers> {
    regs: R,
    mode: LineMode,
    wait: WaitPolicy,
}

impl<R: Registers> Engine<R> {
    /// Takes ownership of the register file.
    ///
    /// The engine is inert until [`configure`](Engine::configure) has run.
    pub fn new(regs: R, mode: LineMode, wait: WaitPolicy) -> Self {
        Engine { regs, mode, wait }
    }

    /// Releases the register file.
    pub fn free(self) -> R {
        self.regs
    }

    /// One-time controller setup. Idempotent.
    ///
    /// Overlaps the two controllers onto the shared pads, keeps the flash
    /// controller ahead in bus arbitration, enables only CS2 on the data
    /// controller and programs the serial clock for 20 MHz.
    pub fn configure(&mut self) {
        self.regs.join_bus();

        self.regs.set_bits(Ctrl::Cspi, Reg::Ext3, 0x1);
        self.regs.set_bits(Ctrl::Hspi, Reg::Ext3, 0x3);
        self.regs.set_bits(DATA_CTRL, Reg::User, User::CS_SETUP.bits());

        // CS2 selects the SRAM; CS0/CS1 stay parked.
        self.regs.clear_bits(DATA_CTRL, Reg::Pin, PIN_CS2_DIS);
        self.regs
            .set_bits(DATA_CTRL, Reg::Pin, PIN_CS0_DIS | PIN_CS1_DIS);
        self.regs.route_chip_select();

        self.regs.write(DATA_CTRL, Reg::Clock, CLOCK_SYSCLK_DIV_4);
    }

    /// Programs the phase-enable defaults of the engine's line mode.
    ///
    /// Single-line mode needs none; quad mode claims chip-select timing and
    /// the command phase up front, before the mode-switch command goes out.
    pub fn apply_phase_defaults(&mut self) {
        match self.mode {
            LineMode::Single => {}
            LineMode::Quad | LineMode::QuadSwapped => {
                self.regs.set_bits(
                    DATA_CTRL,
                    Reg::User,
                    (User::CS_SETUP | User::CS_HOLD | User::COMMAND).bits(),
                );
                self.regs
                    .clear_bits(DATA_CTRL, Reg::User, User::FLASH_MODE.bits());
            }
        }
    }

    /// Switches the controller's data path to four lines, in both directions.
    ///
    /// Must only run once the chip itself has accepted the enter-quad
    /// command.
    pub fn enable_quad_data(&mut self) {
        self.regs
            .set_bits(DATA_CTRL, Reg::Ctrl, CTRL_QIO_MODE | CTRL_FASTRD_MODE);
        self.regs
            .set_bits(DATA_CTRL, Reg::User, User::FWRITE_QIO.bits());
    }

    /// Re-attaches the clock and data pads to the controller after a
    /// bit-banged command borrowed them.
    pub fn attach_data_pins(&mut self) {
        self.regs.attach_data_pins();
    }

    /// Blocks until no transaction is in flight.
    pub fn wait_idle(&mut self) -> Result<(), Timeout> {
        match self.wait {
            WaitPolicy::Forever => {
                while self.regs.read(DATA_CTRL, Reg::Cmd) & CMD_USR != 0 {}
                Ok(())
            }
            WaitPolicy::Spins(budget) => {
                for _ in 0..budget {
                    if self.regs.read(DATA_CTRL, Reg::Cmd) & CMD_USR == 0 {
                        return Ok(());
                    }
                }
                Err(Timeout)
            }
        }
    }

    /// Runs a single-line, command-phase-only transaction.
    ///
    /// This is the shape the one-time mode-switch command takes when the
    /// board wiring lets the engine send it; unlike data transactions it
    /// waits for its own completion.
    pub fn command(&mut self, opcode: u8) -> Result<(), Timeout> {
        self.wait_idle()?;
        self.regs
            .set_bits(DATA_CTRL, Reg::User, User::COMMAND.bits());
        self.regs.clear_bits(
            DATA_CTRL,
            Reg::User,
            (User::MOSI | User::MISO | User::DUMMY | User::ADDR).bits(),
        );
        self.regs
            .write(DATA_CTRL, Reg::User2, command_field(opcode));
        self.regs.set_bits(DATA_CTRL, Reg::Cmd, CMD_USR);
        self.wait_idle()
    }

    /// Runs exactly one transaction and returns the number of payload bytes
    /// moved, `min(data.len(), 64)`.
    ///
    /// Writes return right after the trigger; the leading idle poll of the
    /// next operation is what waits for them. Reads poll to completion and
    /// then unpack the data window into the caller's buffer.
    pub fn run(&mut self, opcode: u8, addr: u32, data: Data<'_>) -> Result<usize, Timeout> {
        self.wait_idle()?;

        let len = data.len().min(MAX_TRANSFER);
        trace!(
            "bus: opcode {:#04x}, {} byte(s) at {:#08x}",
            opcode,
            len,
            addr & ADDR_MASK
        );

        let phases = self.mode.phases(opcode, addr, data.is_in(), len);
        self.regs
            .set_bits(DATA_CTRL, Reg::User, phases.enable.bits());
        self.regs
            .clear_bits(DATA_CTRL, Reg::User, phases.disable.bits());
        self.regs.write(DATA_CTRL, Reg::User1, phases.lengths);
        if let Some(command) = phases.command {
            self.regs.write(DATA_CTRL, Reg::User2, command);
        }
        self.regs.write(DATA_CTRL, Reg::Addr, phases.addr);

        match data {
            Data::Out(buf) => {
                self.store(&buf[..len]);
                self.regs.set_bits(DATA_CTRL, Reg::Cmd, CMD_USR);
            }
            Data::In(buf) => {
                self.regs.set_bits(DATA_CTRL, Reg::Cmd, CMD_USR);
                self.wait_idle()?;
                self.load(&mut buf[..len]);
            }
        }
        Ok(len)
    }

    /// Packs `buf` into the data window, 4 bytes per word, least-significant
    /// byte first; a trailing partial chunk lands in the low bytes of its
    /// word.
    fn store(&mut self, buf: &[u8]) {
        for (i, chunk) in buf.chunks(4).enumerate() {
            let mut word = 0;
            for (shift, byte) in chunk.iter().enumerate() {
                word |= u32::from(*byte) << (8 * shift);
            }
            self.regs.write(DATA_CTRL, Reg::W(i as u8), word);
        }
    }

    /// Unpacks the data window into `buf`, inverse of
    /// [`store`](Engine::store).
    fn load(&mut self, buf: &mut [u8]) {
        for (i, chunk) in buf.chunks_mut(4).enumerate() {
            let word = self.regs.read(DATA_CTRL, Reg::W(i as u8));
            for (shift, byte) in chunk.iter_mut().enumerate() {
                *byte = (word >> (8 * shift)) as u8;
            }
        }
    }
}

//! A behavioral model of the user-mode SPI controller with a 23LC1024
//! behind it.
//!
//! The model decodes the phase registers the way the hardware would: it
//! checks that a transaction's framing matches the mode the chip is in,
//! honors the crossed-wiring permutation, and moves payload bytes between
//! the data window and a 128 KiB memory array. Framing mistakes panic, so
//! every driver test doubles as a check of the register protocol.

#![allow(dead_code)]

use core::convert::Infallible;
use std::cell::RefCell;
use std::rc::Rc;

use embedded_hal::digital::v2::OutputPin;
use spi_sram::bus::{self, swap_pairs, Ctrl, Reg, Registers, User, WaitPolicy};
use spi_sram::sram23::SpiRam;

/// 1 Mbit part: addresses wrap at 128 KiB.
pub const MEM_SIZE: usize = 128 * 1024;

#[derive(Debug)]
pub struct Board {
    // Data-controller register file.
    user: u32,
    user1: u32,
    user2: u32,
    addr: u32,
    cmd: u32,
    ctrl: u32,
    clock: u32,
    pin: u32,
    ext3: [u32; 2],
    w: [u32; 16],

    // Chip and wiring state.
    pub swapped_wiring: bool,
    pub quad: bool,
    pub mem: Vec<u8>,
    pub transactions: usize,
    /// Fault injection: this cell drops the masked bits of every byte
    /// written to it.
    pub stuck_low: Option<(usize, u8)>,

    // Glue hook observations.
    pub joined: bool,
    pub cs_routed: bool,
    pub pins_attached: bool,

    // Raw pin levels for the bit-banged path.
    cs_level: bool,
    clk_level: bool,
    sio_level: bool,
    shift: u16,
    nbits: u8,
    pub clock_pulses: usize,
}

impl Board {
    pub fn new(swapped_wiring: bool) -> Rc<RefCell<Board>> {
        Rc::new(RefCell::new(Board {
            user: 0,
            user1: 0,
            user2: 0,
            addr: 0,
            cmd: 0,
            ctrl: 0,
            clock: 0,
            pin: 0,
            ext3: [0; 2],
            w: [0; 16],
            swapped_wiring,
            quad: false,
            mem: vec![0; MEM_SIZE],
            transactions: 0,
            stuck_low: None,
            joined: false,
            cs_routed: false,
            pins_attached: false,
            cs_level: true,
            clk_level: false,
            sio_level: false,
            shift: 0,
            nbits: 0,
            clock_pulses: 0,
        }))
    }

    fn reg_read(&self, ctrl: Ctrl, reg: Reg) -> u32 {
        if ctrl == Ctrl::Cspi {
            match reg {
                Reg::Ext3 => return self.ext3[0],
                other => panic!("read of flash-controller register {:?}", other),
            }
        }
        match reg {
            Reg::Cmd => self.cmd,
            Reg::Ctrl => self.ctrl,
            Reg::Clock => self.clock,
            Reg::User => self.user,
            Reg::User1 => self.user1,
            Reg::User2 => self.user2,
            Reg::Addr => self.addr,
            Reg::Pin => self.pin,
            Reg::Ext3 => self.ext3[1],
            Reg::W(n) => self.w[n as usize],
        }
    }

    fn reg_write(&mut self, ctrl: Ctrl, reg: Reg, word: u32) {
        if ctrl == Ctrl::Cspi {
            match reg {
                Reg::Ext3 => self.ext3[0] = word,
                other => panic!("write of flash-controller register {:?}", other),
            }
            return;
        }
        match reg {
            Reg::Cmd => {
                if word & bus::CMD_USR != 0 {
                    // Transactions complete instantly; the busy flag is
                    // never observed set.
                    self.cmd = word & !bus::CMD_USR;
                    self.transact();
                } else {
                    self.cmd = word;
                }
            }
            Reg::Ctrl => self.ctrl = word,
            Reg::Clock => self.clock = word,
            Reg::User => self.user = word,
            Reg::User1 => self.user1 = word,
            Reg::User2 => self.user2 = word,
            Reg::Addr => self.addr = word,
            Reg::Pin => self.pin = word,
            Reg::Ext3 => self.ext3[1] = word,
            Reg::W(n) => self.w[n as usize] = word,
        }
    }

    /// One hardware transaction, as described by the phase registers.
    fn transact(&mut self) {
        self.transactions += 1;
        assert!(
            self.joined && self.cs_routed,
            "transaction before configure()"
        );
        assert_eq!(
            self.clock,
            bus::CLOCK_SYSCLK_DIV_4,
            "clock divider not programmed"
        );
        assert_eq!(
            self.pin & (bus::PIN_CS0_DIS | bus::PIN_CS1_DIS | bus::PIN_CS2_DIS),
            bus::PIN_CS0_DIS | bus::PIN_CS1_DIS,
            "chip-select 2 not the active line"
        );

        let user = User::from_bits_truncate(self.user);
        assert!(!user.contains(User::FLASH_MODE), "flash framing left on");
        assert!(
            !(user.contains(User::MISO) && user.contains(User::MOSI)),
            "full-duplex transaction"
        );

        if !user.contains(User::ADDR) {
            // Command-only transaction: the engine-side mode switch.
            assert!(user.contains(User::COMMAND));
            assert!(
                !self.swapped_wiring,
                "single-line framing over crossed lines"
            );
            let bits =
                ((self.user2 >> bus::USER2_COMMAND_BITLEN_S) & bus::USER2_COMMAND_BITLEN) + 1;
            assert_eq!(bits, 8, "mode-switch command is one byte");
            self.chip_command(self.user2 as u8);
            return;
        }

        let addr_bits = ((self.user1 >> bus::USER1_ADDR_BITLEN_S) & bus::USER1_ADDR_BITLEN) + 1;
        let mut word = self.addr;
        if self.swapped_wiring {
            // The crossing permutes whatever the controller shifts out.
            word = swap_pairs(word);
        }

        let (opcode, addr) = if user.contains(User::COMMAND) {
            assert!(
                !self.swapped_wiring,
                "single-line framing over crossed lines"
            );
            assert!(!self.quad, "single-line framing to a chip in quad mode");
            assert_eq!(addr_bits, 24);
            (self.user2 as u8, word >> 8)
        } else {
            assert!(self.quad, "quad framing to a chip in single-line mode");
            assert_eq!(addr_bits, 32);
            ((word >> 24) as u8, word & 0x00FF_FFFF)
        };

        match opcode {
            0x03 => {
                let len = self.data_len(user, User::MISO, bus::USER1_MISO_BITLEN_S);
                if self.quad && len > 0 {
                    assert!(user.contains(User::DUMMY), "quad read without dummy cycles");
                    assert_eq!(self.user1 & bus::USER1_DUMMY_CYCLELEN, 1);
                } else {
                    assert!(!user.contains(User::DUMMY), "unexpected dummy cycles");
                }
                for i in 0..len {
                    let byte = self.wire(self.mem[(addr as usize + i) % MEM_SIZE]);
                    let shift = 8 * (i % 4);
                    let w = &mut self.w[i / 4];
                    *w = (*w & !(0xFF << shift)) | u32::from(byte) << shift;
                }
            }
            0x02 => {
                assert!(!user.contains(User::DUMMY), "write with dummy cycles");
                let len = self.data_len(user, User::MOSI, bus::USER1_MOSI_BITLEN_S);
                for i in 0..len {
                    let mut byte = self.wire((self.w[i / 4] >> (8 * (i % 4))) as u8);
                    let at = (addr as usize + i) % MEM_SIZE;
                    if let Some((cell, mask)) = self.stuck_low {
                        if at == cell {
                            byte &= !mask;
                        }
                    }
                    self.mem[at] = byte;
                }
            }
            other => panic!("unknown opcode {:#04x}", other),
        }
    }

    fn data_len(&self, user: User, phase: User, shift: u32) -> usize {
        if !user.contains(phase) {
            return 0;
        }
        let bits = ((self.user1 >> shift) & 0x1FF) + 1;
        assert_eq!(bits % 8, 0, "data phase not byte-aligned");
        bits as usize / 8
    }

    /// What a byte looks like on the far side of the wiring. With crossed
    /// lines every quad data nibble has its bit pairs exchanged, in both
    /// directions, so round trips through the chip still read back intact.
    fn wire(&self, byte: u8) -> u8 {
        if self.swapped_wiring && self.quad {
            ((byte & 0xAA) >> 1) | ((byte & 0x55) << 1)
        } else {
            byte
        }
    }

    fn chip_command(&mut self, opcode: u8) {
        match opcode {
            0x38 => self.quad = true,
            other => panic!("chip got unknown command {:#04x}", other),
        }
    }

    /// A raw pin edge, as the chip sees it while the pads are GPIOs.
    fn drive(&mut self, line: Line, level: bool) {
        match line {
            Line::Cs => {
                if self.cs_level && !level {
                    self.shift = 0;
                    self.nbits = 0;
                }
                if !self.cs_level && level && self.nbits == 8 {
                    self.chip_command(self.shift as u8);
                }
                self.cs_level = level;
            }
            Line::Clk => {
                if !self.clk_level && level && !self.cs_level {
                    self.shift = (self.shift << 1) | self.sio_level as u16;
                    self.nbits += 1;
                    self.clock_pulses += 1;
                }
                self.clk_level = level;
            }
            Line::Sio => self.sio_level = level,
        }
    }
}

/// The register-file handle handed to the driver.
#[derive(Debug)]
pub struct BusHandle(pub Rc<RefCell<Board>>);

impl Registers for BusHandle {
    fn read(&self, ctrl: Ctrl, reg: Reg) -> u32 {
        self.0.borrow().reg_read(ctrl, reg)
    }

    fn write(&mut self, ctrl: Ctrl, reg: Reg, word: u32) {
        self.0.borrow_mut().reg_write(ctrl, reg, word)
    }

    fn join_bus(&mut self) {
        self.0.borrow_mut().joined = true;
    }

    fn route_chip_select(&mut self) {
        self.0.borrow_mut().cs_routed = true;
    }

    fn attach_data_pins(&mut self) {
        self.0.borrow_mut().pins_attached = true;
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Line {
    Cs,
    Clk,
    Sio,
}

/// One of the raw pins borrowed for the bit-banged mode switch.
#[derive(Debug)]
pub struct Pin {
    board: Rc<RefCell<Board>>,
    line: Line,
}

impl OutputPin for Pin {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Infallible> {
        self.board.borrow_mut().drive(self.line, false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.board.borrow_mut().drive(self.line, true);
        Ok(())
    }
}

pub fn pins(board: &Rc<RefCell<Board>>) -> (Pin, Pin, Pin) {
    (
        Pin {
            board: board.clone(),
            line: Line::Cs,
        },
        Pin {
            board: board.clone(),
            line: Line::Clk,
        },
        Pin {
            board: board.clone(),
            line: Line::Sio,
        },
    )
}

pub fn single_line() -> (Rc<RefCell<Board>>, SpiRam<BusHandle>) {
    let board = Board::new(false);
    let ram = SpiRam::init(BusHandle(board.clone()), WaitPolicy::Forever).unwrap();
    (board, ram)
}

pub fn quad() -> (Rc<RefCell<Board>>, SpiRam<BusHandle>) {
    let board = Board::new(false);
    let ram = SpiRam::init_quad(BusHandle(board.clone()), WaitPolicy::Forever).unwrap();
    (board, ram)
}

pub fn quad_swapped() -> (Rc<RefCell<Board>>, SpiRam<BusHandle>) {
    let board = Board::new(true);
    let (mut cs, mut clk, mut sio) = pins(&board);
    let ram = SpiRam::init_quad_swapped(
        BusHandle(board.clone()),
        WaitPolicy::Forever,
        &mut cs,
        &mut clk,
        &mut sio,
    )
    .unwrap();
    (board, ram)
}

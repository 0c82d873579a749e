//! Bit-banged I2C master
//!
//! SCL and SDA are open drain with external pull-ups. The output latch of
//! both pins stays at 0 and a line is pulled low by switching its pin to
//! output, or released high by switching it back to input.

use std::thread;
use std::time::{Duration, Instant};

use crate::config::RegisterCommand;
use crate::error::{ConfigError, ProtocolError, Result, TimeoutError};
use crate::gpio::{GpioConfig, GpioPort, Pins};

/// Clock line
pub const SCL: Pins = Pins::AD0;
/// Data line
pub const SDA: Pins = Pins::AD1;

/// Delay after every line transition
pub const BIT_DELAY: Duration = Duration::from_micros(100);

/// Longest time a target may hold SCL low
pub const DEFAULT_STRETCH_TIMEOUT: Duration = Duration::from_millis(100);

/// Requested state of one bus line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    /// Pulled low by the master
    Low,
    /// Released to the pull-up
    High,
    /// Left as it is
    Unchanged,
}

/// Port setup for the I2C driver: both lines released, latch at 0
pub fn gpio_config() -> GpioConfig {
    GpioConfig {
        direction: Pins::empty(),
        initial: Pins::empty(),
        frequency: None,
    }
}

/// I2C master talking to one target device
pub struct I2cBitBang<P: GpioPort> {
    port: P,
    dev_addr: u8,
    /// Lines currently pulled low
    driven: Pins,
    delay: Duration,
    stretch_timeout: Duration,
    released: bool,
}

impl<P: GpioPort> I2cBitBang<P> {
    /// Take ownership of `port` and release both lines
    pub fn new(port: P, dev_addr: u8) -> Result<Self> {
        Self::with_timing(port, dev_addr, BIT_DELAY, DEFAULT_STRETCH_TIMEOUT)
    }

    pub fn with_timing(
        port: P,
        dev_addr: u8,
        delay: Duration,
        stretch_timeout: Duration,
    ) -> Result<Self> {
        let mut bus = Self {
            port,
            dev_addr,
            driven: Pins::empty(),
            delay,
            stretch_timeout,
            released: false,
        };
        // On error the port is closed when `bus` drops
        bus.port.set_direction(SCL | SDA, Pins::empty())?;
        log::debug!("I2C master ready, target 0x{:02X}", dev_addr);
        Ok(bus)
    }

    /// Move SDA and SCL; each line independently pulled, released or kept
    pub fn set_state(&mut self, sda: LineState, scl: LineState) -> Result<()> {
        let mut driven = self.driven;
        for (line, state) in [(SDA, sda), (SCL, scl)] {
            match state {
                LineState::Low => driven.insert(line),
                LineState::High => driven.remove(line),
                LineState::Unchanged => {}
            }
        }
        if driven != self.driven {
            self.port.set_direction(SCL | SDA, driven)?;
            self.driven = driven;
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        Ok(())
    }

    /// Poll until the target releases SCL; returns the pins sampled then
    pub fn wait_for_scl_high(&mut self) -> Result<Pins> {
        let start = Instant::now();
        loop {
            let pins = self.port.read()?;
            if pins.contains(SCL) {
                return Ok(pins);
            }
            if start.elapsed() >= self.stretch_timeout {
                log::warn!("SCL still low after {:?}", self.stretch_timeout);
                return Err(TimeoutError::ClockStretch(self.stretch_timeout).into());
            }
        }
    }

    /// START (or repeated START) condition
    pub fn start_condition(&mut self) -> Result<()> {
        self.set_state(LineState::High, LineState::Unchanged)?;
        self.set_state(LineState::Unchanged, LineState::High)?;
        self.wait_for_scl_high()?;
        self.set_state(LineState::Low, LineState::Unchanged)?;
        self.set_state(LineState::Unchanged, LineState::Low)
    }

    /// STOP condition
    pub fn stop_condition(&mut self) -> Result<()> {
        self.set_state(LineState::Low, LineState::Unchanged)?;
        self.set_state(LineState::Unchanged, LineState::High)?;
        self.wait_for_scl_high()?;
        self.set_state(LineState::High, LineState::Unchanged)
    }

    pub fn write_bit(&mut self, bit: bool) -> Result<()> {
        let sda = if bit { LineState::High } else { LineState::Low };
        self.set_state(sda, LineState::Unchanged)?;
        self.set_state(LineState::Unchanged, LineState::High)?;
        self.wait_for_scl_high()?;
        self.set_state(LineState::Unchanged, LineState::Low)
    }

    pub fn read_bit(&mut self) -> Result<bool> {
        self.set_state(LineState::High, LineState::Unchanged)?;
        self.set_state(LineState::Unchanged, LineState::High)?;
        let pins = self.wait_for_scl_high()?;
        self.set_state(LineState::Unchanged, LineState::Low)?;
        Ok(pins.contains(SDA))
    }

    /// Send one byte MSB first and check the target's ACK
    pub fn write_byte(&mut self, byte: u8) -> Result<()> {
        for i in (0..8).rev() {
            self.write_bit(byte & (1 << i) != 0)?;
        }
        if self.read_bit()? {
            log::debug!("NAK after 0x{:02X}", byte);
            return Err(ProtocolError::Nak(byte).into());
        }
        Ok(())
    }

    /// Receive one byte MSB first, then send ACK (or NAK if `nak`)
    pub fn read_byte(&mut self, nak: bool) -> Result<u8> {
        let mut byte = 0u8;
        for _ in 0..8 {
            byte = (byte << 1) | u8::from(self.read_bit()?);
        }
        self.write_bit(nak)?;
        Ok(byte)
    }

    /// Run `f` between START and STOP; a failed transfer still ends with STOP
    fn transaction<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        self.start_condition()?;
        match f(self) {
            Ok(value) => {
                self.stop_condition()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(stop_err) = self.stop_condition() {
                    log::debug!("STOP after failed transfer also failed: {}", stop_err);
                }
                Err(e)
            }
        }
    }

    fn write_address(&mut self, read: bool, reg: u16) -> Result<()> {
        self.write_byte(self.dev_addr << 1)?;
        let [hi, lo] = reg.to_be_bytes();
        self.write_byte(hi)?;
        self.write_byte(lo)?;
        if read {
            self.start_condition()?;
            self.write_byte((self.dev_addr << 1) | 1)?;
        }
        Ok(())
    }

    /// Read `len` bytes starting at register `reg`
    pub fn read_register(&mut self, reg: u16, len: usize) -> Result<Vec<u8>> {
        let data = self.transaction(|bus| {
            bus.write_address(true, reg)?;
            (0..len).map(|i| bus.read_byte(i + 1 == len)).collect()
        })?;
        log::trace!("I2C read 0x{:04X}: {:02X?}", reg, data);
        Ok(data)
    }

    /// Write `data` starting at register `reg`
    pub fn write_registers(&mut self, reg: u16, data: &[u8]) -> Result<()> {
        log::trace!("I2C write 0x{:04X}: {:02X?}", reg, data);
        self.transaction(|bus| {
            bus.write_address(false, reg)?;
            data.iter().try_for_each(|&b| bus.write_byte(b))
        })
    }

    /// Issue a register command
    pub fn write_command(&mut self, cmd: &RegisterCommand) -> Result<()> {
        self.write_registers(cmd.addr, &cmd.data)
    }

    /// Compare the revision register against the expected bytes
    pub fn check_revision(&mut self, revision: &RegisterCommand) -> Result<()> {
        let expected = revision
            .expected
            .as_ref()
            .ok_or_else(|| ConfigError::MissingValue("`expected` for revision".into()))?;
        let got = self.read_register(revision.addr, expected.len())?;
        if &got != expected {
            return Err(ProtocolError::RevisionMismatch {
                expected: expected.clone(),
                got,
            }
            .into());
        }
        log::info!("CPLD revision {:02X?}", got);
        Ok(())
    }

    /// Close the port now instead of on drop
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.port.close()
    }
}

impl<P: GpioPort> Drop for I2cBitBang<P> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.port.close() {
                log::warn!("Failed to close GPIO port: {}", e);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::Error;
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::rc::Rc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Phase {
        Idle,
        Recv { bits: u8, byte: u8 },
        AckOut { read: bool },
        Send { bits: u8, byte: u8 },
        AckIn,
    }

    /// Open-drain bus with a register-file I2C target attached
    pub(crate) struct I2cTarget {
        addr: u8,
        phase: Phase,
        expect_address: bool,
        received: usize,
        pointer: u16,
        host_low: Pins,
        target_sda_low: bool,
        stretch_left: usize,
        /// Reads that see SCL held low after every rising edge
        pub stretch: usize,
        /// Never release SCL
        pub stuck: bool,
        pub registers: BTreeMap<u16, u8>,
        /// SDA level at every SCL rising edge
        pub clocked: Vec<bool>,
        /// ACK (true) / NAK (false) sent by the host for each byte read
        pub host_acks: Vec<bool>,
        pub starts: usize,
        pub stops: usize,
        pub closes: usize,
    }

    impl I2cTarget {
        pub(crate) fn new(addr: u8) -> Rc<RefCell<Self>> {
            Rc::new(RefCell::new(Self {
                addr,
                phase: Phase::Idle,
                expect_address: false,
                received: 0,
                pointer: 0,
                host_low: Pins::empty(),
                target_sda_low: false,
                stretch_left: 0,
                stretch: 0,
                stuck: false,
                registers: BTreeMap::new(),
                clocked: Vec::new(),
                host_acks: Vec::new(),
                starts: 0,
                stops: 0,
                closes: 0,
            }))
        }

        fn sda(&self) -> bool {
            !self.host_low.contains(SDA) && !self.target_sda_low
        }

        fn scl(&self) -> bool {
            !self.host_low.contains(SCL)
        }

        fn drive_bit(&mut self, byte: u8, bits: u8) {
            self.target_sda_low = byte & (0x80 >> bits) == 0;
        }

        fn on_byte(&mut self, byte: u8) -> Phase {
            if self.expect_address {
                self.expect_address = false;
                if byte >> 1 != self.addr {
                    return Phase::Idle;
                }
                self.received = 0;
                self.target_sda_low = true;
                return Phase::AckOut { read: byte & 1 == 1 };
            }
            match self.received {
                0 => self.pointer = u16::from(byte) << 8,
                1 => self.pointer |= u16::from(byte),
                _ => {
                    self.registers.insert(self.pointer, byte);
                    self.pointer = self.pointer.wrapping_add(1);
                }
            }
            self.received += 1;
            self.target_sda_low = true;
            Phase::AckOut { read: false }
        }

        fn load(&self) -> u8 {
            self.registers.get(&self.pointer).copied().unwrap_or(0xFF)
        }

        fn rising(&mut self) {
            let sda = self.sda();
            self.clocked.push(sda);
            self.stretch_left = self.stretch;
            match self.phase {
                Phase::Recv { bits, byte } => {
                    self.phase = Phase::Recv {
                        bits: bits + 1,
                        byte: (byte << 1) | u8::from(sda),
                    }
                }
                Phase::AckIn => self.host_acks.push(!sda),
                _ => {}
            }
        }

        fn falling(&mut self) {
            self.phase = match self.phase {
                Phase::Recv { bits: 8, byte } => self.on_byte(byte),
                Phase::AckOut { read: true } => {
                    let byte = self.load();
                    self.drive_bit(byte, 0);
                    Phase::Send { bits: 0, byte }
                }
                Phase::AckOut { read: false } => {
                    self.target_sda_low = false;
                    Phase::Recv { bits: 0, byte: 0 }
                }
                Phase::Send { bits: 7, .. } => {
                    self.target_sda_low = false;
                    Phase::AckIn
                }
                Phase::Send { bits, byte } => {
                    self.drive_bit(byte, bits + 1);
                    Phase::Send {
                        bits: bits + 1,
                        byte,
                    }
                }
                Phase::AckIn => {
                    self.pointer = self.pointer.wrapping_add(1);
                    if self.host_acks.last() == Some(&true) {
                        let byte = self.load();
                        self.drive_bit(byte, 0);
                        Phase::Send { bits: 0, byte }
                    } else {
                        Phase::Idle
                    }
                }
                other => other,
            };
        }

        fn set_host_low(&mut self, low: Pins) {
            let (scl, sda) = (self.scl(), self.sda());
            self.host_low = low;
            let (new_scl, new_sda) = (self.scl(), self.sda());

            if scl && new_scl && sda != new_sda {
                self.target_sda_low = false;
                if new_sda {
                    self.stops += 1;
                    self.phase = Phase::Idle;
                } else {
                    self.starts += 1;
                    self.expect_address = true;
                    self.phase = Phase::Recv { bits: 0, byte: 0 };
                }
            } else if !scl && new_scl {
                self.rising();
            } else if scl && !new_scl {
                self.falling();
            }
        }
    }

    /// GPIO port wired to an [`I2cTarget`]
    pub(crate) struct MockI2cPort(pub Rc<RefCell<I2cTarget>>);

    impl GpioPort for MockI2cPort {
        fn set_direction(&mut self, pins: Pins, outputs: Pins) -> Result<()> {
            let mut bus = self.0.borrow_mut();
            let low = (bus.host_low - pins) | (outputs & pins);
            bus.set_host_low(low);
            Ok(())
        }

        fn write(&mut self, state: Pins) -> Result<()> {
            assert!(state.is_empty(), "open-drain latch must stay low");
            Ok(())
        }

        fn read(&mut self) -> Result<Pins> {
            let mut bus = self.0.borrow_mut();
            let mut pins = Pins::all() - (SCL | SDA);
            let held = bus.stuck || bus.stretch_left > 0;
            bus.stretch_left = bus.stretch_left.saturating_sub(1);
            if bus.scl() && !held {
                pins |= SCL;
            }
            if bus.sda() {
                pins |= SDA;
            }
            Ok(pins)
        }

        fn exchange(&mut self, waveform: &[Pins]) -> Result<Vec<Pins>> {
            Ok(waveform.to_vec())
        }

        fn close(&mut self) -> Result<()> {
            self.0.borrow_mut().closes += 1;
            Ok(())
        }
    }

    fn bus(target: &Rc<RefCell<I2cTarget>>) -> I2cBitBang<MockI2cPort> {
        I2cBitBang::with_timing(
            MockI2cPort(target.clone()),
            0x70,
            Duration::ZERO,
            Duration::from_millis(5),
        )
        .unwrap()
    }

    #[test]
    fn test_write_byte_zero_and_ff() {
        let target = I2cTarget::new(0x70);
        let mut i2c = bus(&target);
        i2c.start_condition().unwrap();
        i2c.write_byte(0x70 << 1).unwrap();

        target.borrow_mut().clocked.clear();
        i2c.write_byte(0x00).unwrap();
        assert_eq!(target.borrow().clocked, [vec![false; 8], vec![false]].concat());

        target.borrow_mut().clocked.clear();
        i2c.write_byte(0xFF).unwrap();
        assert_eq!(target.borrow().clocked, [vec![true; 8], vec![false]].concat());
    }

    #[test]
    fn test_nak_from_absent_device() {
        let target = I2cTarget::new(0x42);
        let mut i2c = bus(&target);
        i2c.start_condition().unwrap();
        let err = i2c.write_byte(0x70 << 1).unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::Nak(0xE0))));
    }

    #[test]
    fn test_write_registers() {
        let target = I2cTarget::new(0x70);
        let mut i2c = bus(&target);
        i2c.write_registers(0x0008, &[0x0C, 0x0D]).unwrap();
        let t = target.borrow();
        assert_eq!(t.registers.get(&0x0008), Some(&0x0C));
        assert_eq!(t.registers.get(&0x0009), Some(&0x0D));
        assert_eq!((t.starts, t.stops), (1, 1));
    }

    #[test]
    fn test_read_register_naks_last_byte() {
        let target = I2cTarget::new(0x70);
        target.borrow_mut().registers.extend([(0x00FF, 0x23), (0x0100, 0x01)]);
        let mut i2c = bus(&target);
        assert_eq!(i2c.read_register(0x00FF, 2).unwrap(), vec![0x23, 0x01]);
        let t = target.borrow();
        assert_eq!(t.host_acks, vec![true, false]);
        assert_eq!((t.starts, t.stops), (2, 1));
    }

    #[test]
    fn test_check_revision() {
        let target = I2cTarget::new(0x70);
        target.borrow_mut().registers.extend([(0x00FF, 0x22), (0x0100, 0x01)]);
        let mut i2c = bus(&target);
        let revision = RegisterCommand {
            addr: 0x00FF,
            data: vec![],
            expected: Some(vec![0x23, 0x01]),
        };
        let err = i2c.check_revision(&revision).unwrap_err();
        match err {
            Error::Protocol(ProtocolError::RevisionMismatch { expected, got }) => {
                assert_eq!(expected, vec![0x23, 0x01]);
                assert_eq!(got, vec![0x22, 0x01]);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        target.borrow_mut().registers.insert(0x00FF, 0x23);
        i2c.check_revision(&revision).unwrap();
    }

    #[test]
    fn test_clock_stretching() {
        let target = I2cTarget::new(0x70);
        target.borrow_mut().stretch = 3;
        let mut i2c = bus(&target);
        i2c.write_registers(0x0024, &[1]).unwrap();
        assert_eq!(target.borrow().registers.get(&0x0024), Some(&1));
    }

    #[test]
    fn test_stuck_clock_times_out() {
        let target = I2cTarget::new(0x70);
        target.borrow_mut().stuck = true;
        let mut i2c = bus(&target);
        let err = i2c.write_registers(0x0024, &[1]).unwrap_err();
        assert!(matches!(err, Error::Timeout(TimeoutError::ClockStretch(_))));
    }

    #[test]
    fn test_port_closed_once() {
        let target = I2cTarget::new(0x70);
        bus(&target).release().unwrap();
        assert_eq!(target.borrow().closes, 1);

        drop(bus(&target));
        assert_eq!(target.borrow().closes, 2);

        {
            let mut i2c = bus(&target);
            target.borrow_mut().stuck = true;
            assert!(i2c.write_registers(0x0024, &[1]).is_err());
        }
        assert_eq!(target.borrow().closes, 3);
    }
}

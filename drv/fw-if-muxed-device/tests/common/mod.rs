// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A simulated I2C bus for driving the muxed-device driver from host tests.
//!
//! Every address is a 256-byte register file: a write of `[reg, data...]`
//! stores `data` from `reg` on, a bare `[reg]` only moves the pointer, and a
//! read returns bytes from the register named in the preceding write. Muxes
//! fall out of the same model, their single control byte being a "pointer".

#![allow(dead_code)]

use drv_fw_if_muxed_device::{
    MuxedDeviceCfg, MuxedDeviceDriver, MuxedDeviceInitCfg,
};
use drv_i2c_api::{I2cBus, ResponseCode};
use embedded_hal::blocking::delay::DelayMs;
use serde::Deserialize;
use std::cell::{RefCell, RefMut};
use std::collections::HashMap;
use std::rc::Rc;

pub const BUS: u8 = 1;
pub const MUX0: u8 = 0x70;
pub const MUX1: u8 = 0x71;
pub const MUX2: u8 = 0x72;
pub const CONTROL: u8 = 0x20;
pub const POWER: u8 = 0x21;
pub const MODULE: u8 = 0x50;
pub const SPD: u8 = 0x18;

/// Control expander input port with a module seated and `MODSEL_L` high.
pub const PRESENT: u8 = 0b0000_0001;
/// Module seated and already selected.
pub const PRESENT_SELECTED: u8 = 0b0000_0000;
/// Empty cage, `MODSEL_L` left asserted.
pub const ABSENT_SELECTED: u8 = 0b0000_1000;
/// Empty cage, `MODSEL_L` high.
pub const ABSENT: u8 = 0b0000_1001;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Event {
    Write { addr: u8, data: Vec<u8> },
    Read { addr: u8, len: usize },
    Delay(u32),
}

pub fn write(addr: u8, data: &[u8]) -> Event {
    Event::Write {
        addr,
        data: data.to_vec(),
    }
}

pub fn read(addr: u8, len: usize) -> Event {
    Event::Read { addr, len }
}

#[derive(Default)]
pub struct SimState {
    pub log: Vec<Event>,
    regs: HashMap<u8, [u8; 256]>,
    /// Writes that NAK, matched on address and exact bytes.
    failing: Vec<(u8, Vec<u8>)>,
}

impl SimState {
    pub fn reg(&self, addr: u8, reg: u8) -> u8 {
        self.regs.get(&addr).map_or(0, |r| r[reg as usize])
    }

    pub fn set_reg(&mut self, addr: u8, reg: u8, val: u8) {
        self.regs.entry(addr).or_insert([0; 256])[reg as usize] = val;
    }

    pub fn fail_write(&mut self, addr: u8, data: &[u8]) {
        self.failing.push((addr, data.to_vec()));
    }

    /// The log without delays.
    pub fn transactions(&self) -> Vec<Event> {
        self.log
            .iter()
            .filter(|e| !matches!(e, Event::Delay(_)))
            .cloned()
            .collect()
    }

    pub fn touched(&self, addr: u8) -> bool {
        self.log.iter().any(|e| match e {
            Event::Write { addr: a, .. } | Event::Read { addr: a, .. } => {
                *a == addr
            }
            Event::Delay(_) => false,
        })
    }

    fn write(&mut self, addr: u8, data: &[u8]) -> Result<(), ResponseCode> {
        self.log.push(write(addr, data));
        if self.failing.iter().any(|(a, d)| *a == addr && d == data) {
            return Err(ResponseCode::NoDevice);
        }
        let regs = self.regs.entry(addr).or_insert([0; 256]);
        if let Some((&reg, rest)) = data.split_first() {
            for (i, b) in rest.iter().enumerate() {
                regs[(reg as usize + i) & 0xff] = *b;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct Sim(Rc<RefCell<SimState>>);

impl Sim {
    pub fn state(&self) -> RefMut<'_, SimState> {
        self.0.borrow_mut()
    }

    pub fn bus(&self) -> SimBus {
        SimBus(self.0.clone())
    }

    pub fn delay(&self) -> SimDelay {
        SimDelay(self.0.clone())
    }

    pub fn clear_log(&self) {
        self.state().log.clear();
    }
}

pub struct SimBus(Rc<RefCell<SimState>>);

impl I2cBus for SimBus {
    fn send(
        &mut self,
        bus: u8,
        address: u8,
        buf: &[u8],
    ) -> Result<(), ResponseCode> {
        if bus != BUS {
            return Err(ResponseCode::BadBus);
        }
        self.0.borrow_mut().write(address, buf)
    }

    fn send_recv(
        &mut self,
        bus: u8,
        address: u8,
        tx: &[u8],
        rx: &mut [u8],
    ) -> Result<(), ResponseCode> {
        if bus != BUS {
            return Err(ResponseCode::BadBus);
        }
        let mut s = self.0.borrow_mut();
        s.write(address, tx)?;
        s.log.push(read(address, rx.len()));
        let reg = tx.first().copied().unwrap_or(0);
        for (i, b) in rx.iter_mut().enumerate() {
            *b = s.reg(address, reg.wrapping_add(i as u8));
        }
        Ok(())
    }
}

pub struct SimDelay(Rc<RefCell<SimState>>);

impl DelayMs<u32> for SimDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.0.borrow_mut().log.push(Event::Delay(ms));
    }
}

pub type Driver = MuxedDeviceDriver<SimBus, SimDelay>;

#[derive(Debug, Deserialize)]
pub struct Profile {
    pub i2c: MuxedDeviceInitCfg,
    pub qsfp: Vec<MuxedDeviceCfg>,
    pub dimm: MuxedDeviceCfg,
}

pub const V80: &str = include_str!("../../profiles/v80.toml");

pub fn v80() -> Profile {
    toml::from_str(V80).unwrap()
}

/// An initialised driver on a fresh bus. The power expander reports power
/// good on every cage and all cages hold a module with `MODSEL_L` high.
pub fn rig() -> (Sim, Driver, Profile) {
    let sim = Sim::default();
    {
        let mut s = sim.state();
        s.set_reg(POWER, 0, 0xf0);
        s.set_reg(POWER, 3, 0xff);
        s.set_reg(CONTROL, 0, PRESENT);
    }
    let profile = v80();
    let driver = MuxedDeviceDriver::new(sim.bus(), sim.delay());
    driver.init(profile.i2c).unwrap();
    (sim, driver, profile)
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driver for the TCA6408 GPIO expander
//!
//! Every pin comes out of reset as an input. Methods that change one group of
//! pins do a read-modify-write so pins owned by other users of the same
//! expander (the power expander is shared by all cages on a board) keep
//! their state.

use drv_i2c_api::{I2cBus, I2cDevice, ResponseCode};
use num_derive::FromPrimitive;

/// `PinSet` is a bit vector indicating on which pins a given operation is
/// applied.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PinSet(pub u8);

impl PinSet {
    /// Returns a `PinSet` with the mask bit `index` set.
    #[inline(always)]
    pub const fn pin(index: usize) -> Self {
        Self(1 << index)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

/// Pins in a `PinSet` can be configured as either `Input` or `Output`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum Mode {
    Input = 0,
    Output = 1,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum Register {
    InputPort = 0x00,
    OutputPort = 0x01,
    Configuration = 0x03,
}

/// Output port value with every pin driven high.
pub const ALL_OUTPUTS_HIGH: u8 = 0xff;

#[derive(Copy, Clone, Debug)]
pub struct Tca6408 {
    device: I2cDevice,
}

impl Tca6408 {
    pub fn new(device: I2cDevice) -> Self {
        Self { device }
    }

    fn read_reg<B: I2cBus + ?Sized>(
        &self,
        i2c: &mut B,
        register: Register,
    ) -> Result<u8, ResponseCode> {
        self.device.read_reg(i2c, register as u8)
    }

    fn write_reg<B: I2cBus + ?Sized>(
        &self,
        i2c: &mut B,
        register: Register,
        value: u8,
    ) -> Result<(), ResponseCode> {
        self.device.write_reg(i2c, register as u8, value)
    }

    /// Read the raw input port. Pins configured as outputs read back the
    /// level they are driving.
    pub fn read_inputs<B: I2cBus + ?Sized>(
        &self,
        i2c: &mut B,
    ) -> Result<u8, ResponseCode> {
        self.read_reg(i2c, Register::InputPort)
    }

    /// Set the pins in the `PinSet` to low/high based on the given bool value
    /// of `set`.
    pub fn set_to<B: I2cBus + ?Sized>(
        &self,
        i2c: &mut B,
        pins: PinSet,
        set: bool,
    ) -> Result<(), ResponseCode> {
        let outputs = self.read_reg(i2c, Register::OutputPort)?;
        self.write_reg(
            i2c,
            Register::OutputPort,
            if set {
                outputs | pins.0
            } else {
                outputs & !pins.0
            },
        )
    }

    /// Set the pins in the `PinSet`.
    pub fn set<B: I2cBus + ?Sized>(
        &self,
        i2c: &mut B,
        pins: PinSet,
    ) -> Result<(), ResponseCode> {
        self.set_to(i2c, pins, true)
    }

    /// Reset the pins
    pub fn reset<B: I2cBus + ?Sized>(
        &self,
        i2c: &mut B,
        pins: PinSet,
    ) -> Result<(), ResponseCode> {
        self.set_to(i2c, pins, false)
    }

    /// Overwrite the whole output port.
    pub fn write_outputs<B: I2cBus + ?Sized>(
        &self,
        i2c: &mut B,
        value: u8,
    ) -> Result<(), ResponseCode> {
        self.write_reg(i2c, Register::OutputPort, value)
    }

    /// Configure the pins in the `PinSet` with the given `Mode`, leaving the
    /// other pins alone. Polarity is not touched.
    pub fn set_mode<B: I2cBus + ?Sized>(
        &self,
        i2c: &mut B,
        pins: PinSet,
        mode: Mode,
    ) -> Result<(), ResponseCode> {
        let input_pins = self.read_reg(i2c, Register::Configuration)?;
        self.write_config(
            i2c,
            match mode {
                Mode::Input => input_pins | pins.0,
                Mode::Output => input_pins & !pins.0,
            },
        )
    }

    /// Overwrite the whole configuration register; a set bit is an input.
    pub fn write_config<B: I2cBus + ?Sized>(
        &self,
        i2c: &mut B,
        value: u8,
    ) -> Result<(), ResponseCode> {
        self.write_reg(i2c, Register::Configuration, value)
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client API for an I2C bus
//!
//! The bus itself is owned by whoever wires up the board: a register-level
//! controller driver on hardware, a recording double in tests. Drivers above
//! this crate only ever see the [`I2cBus`] trait, and typically reach a
//! particular part through an [`I2cDevice`].
//!
//! # I2C devices
//!
//! An I2C device is identified by a 2-tuple:
//!
//! - The bus number, identifying which controller/bus the device sits on
//! - The 7-bit address of the device itself
//!
//! Multiplexers are not part of the tuple: on the boards this is written for,
//! muxes are ordinary devices that the caller steers explicitly.

#![cfg_attr(not(test), no_std)]

use num_derive::FromPrimitive;

/// The response code returned from an I2C bus.  These response codes are
/// pretty specific, not because the caller is expected to necessarily handle
/// them differently, but to give upstack software some modicum of context
/// surrounding the error.
#[derive(Copy, Clone, Debug, FromPrimitive, Eq, PartialEq)]
#[repr(u32)]
pub enum ResponseCode {
    /// Bad response from bus
    BadResponse = 1,
    /// Bad argument sent to bus
    BadArg = 2,
    /// Indicated I2C device did not acknowledge its address
    NoDevice = 3,
    /// Indicated bus number is invalid
    BadBus = 4,
    /// Device address is reserved
    ReservedAddress = 5,
    /// Device does not have indicated register
    NoRegister = 8,
    /// I2C bus was spontaneously reset during operation
    BusReset = 17,
    /// I2C bus locked up and was reset
    BusLocked = 19,
    /// I2C controller appeared to be busy and was reset
    ControllerBusy = 21,
    /// I2C bus error
    BusError = 22,
    /// Requested operation is not supported
    OperationNotSupported = 25,
}

/// Blocking I2C primitives.
///
/// Implementations are not expected to be reentrant: a bus is a single
/// exclusive resource, and callers serialize access to it (the FW_IF drivers
/// do so by holding the bus behind their own lock).
pub trait I2cBus {
    /// Writes `buf` to the device at `address` on `bus`.
    fn send(
        &mut self,
        bus: u8,
        address: u8,
        buf: &[u8],
    ) -> Result<(), ResponseCode>;

    /// Writes `tx` and then, after a repeated start, reads exactly
    /// `rx.len()` bytes from the same device.
    fn send_recv(
        &mut self,
        bus: u8,
        address: u8,
        tx: &[u8],
        rx: &mut [u8],
    ) -> Result<(), ResponseCode>;
}

impl<B: I2cBus + ?Sized> I2cBus for &mut B {
    fn send(
        &mut self,
        bus: u8,
        address: u8,
        buf: &[u8],
    ) -> Result<(), ResponseCode> {
        (**self).send(bus, address, buf)
    }

    fn send_recv(
        &mut self,
        bus: u8,
        address: u8,
        tx: &[u8],
        rx: &mut [u8],
    ) -> Result<(), ResponseCode> {
        (**self).send_recv(bus, address, tx, rx)
    }
}

///
/// The 2-tuple that identifies an I2C device.
///
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct I2cDevice {
    pub bus: u8,
    pub address: u8,
}

impl core::fmt::Display for I2cDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "i2c{} {:#x}", self.bus, self.address)
    }
}

impl I2cDevice {
    pub const fn new(bus: u8, address: u8) -> Self {
        Self { bus, address }
    }

    ///
    /// Reads an 8-bit register.
    ///
    /// ## Register definition
    ///
    /// Most devices have a notion of a different kinds of values that can be
    /// read; the numerical value of the desired kind is written to the
    /// device, and then the device replies by writing back the desired value.
    /// This notion is often called a "register", but "pointer" and "address"
    /// are also common.
    ///
    /// ## Error handling
    ///
    /// On failure, a [`ResponseCode`] will indicate more detail.
    ///
    pub fn read_reg<B: I2cBus + ?Sized>(
        &self,
        i2c: &mut B,
        reg: u8,
    ) -> Result<u8, ResponseCode> {
        let mut val = [0u8; 1];
        i2c.send_recv(self.bus, self.address, &[reg], &mut val)?;
        Ok(val[0])
    }

    ///
    /// Like [`I2cDevice::read_reg`], but fills `buf` starting at `reg`,
    /// returning the number of bytes read.
    ///
    pub fn read_reg_into<B: I2cBus + ?Sized>(
        &self,
        i2c: &mut B,
        reg: u8,
        buf: &mut [u8],
    ) -> Result<usize, ResponseCode> {
        i2c.send_recv(self.bus, self.address, &[reg], buf)?;
        Ok(buf.len())
    }

    ///
    /// Writes a buffer to a device. Unlike a register read, this will not
    /// perform any follow-up reads.
    ///
    pub fn write<B: I2cBus + ?Sized>(
        &self,
        i2c: &mut B,
        buffer: &[u8],
    ) -> Result<(), ResponseCode> {
        i2c.send(self.bus, self.address, buffer)
    }

    /// Writes `value` to the 8-bit register `reg`.
    pub fn write_reg<B: I2cBus + ?Sized>(
        &self,
        i2c: &mut B,
        reg: u8,
        value: u8,
    ) -> Result<(), ResponseCode> {
        self.write(i2c, &[reg, value])
    }
}

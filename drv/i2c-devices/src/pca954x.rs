// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driver for PCA954x-family I2C muxes

use bitfield::bitfield;
use drv_i2c_api::{I2cBus, I2cDevice, ResponseCode};

bitfield! {
    /// The mux's only register. Each set bit connects one downstream channel;
    /// several channels may be connected at once.
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct ControlRegister(u8);
    impl Debug;
    pub channel3_enabled, set_channel3_enabled: 3;
    pub channel2_enabled, set_channel2_enabled: 2;
    pub channel1_enabled, set_channel1_enabled: 1;
    pub channel0_enabled, set_channel0_enabled: 0;
}

impl ControlRegister {
    /// No channel connected.
    pub const DESELECTED: Self = Self(0);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Pca954x {
    device: I2cDevice,
}

impl Pca954x {
    pub fn new(device: I2cDevice) -> Self {
        Self { device }
    }

    pub fn device(&self) -> I2cDevice {
        self.device
    }

    /// Connects exactly the channels set in `reg`.
    pub fn select<B: I2cBus + ?Sized>(
        &self,
        i2c: &mut B,
        reg: ControlRegister,
    ) -> Result<(), ResponseCode> {
        //
        // This part has but one register -- any write is to the control
        // register.
        //
        self.device.write(i2c, &[reg.bits()])
    }

    /// Disconnects every channel.
    pub fn deselect<B: I2cBus + ?Sized>(
        &self,
        i2c: &mut B,
    ) -> Result<(), ResponseCode> {
        self.select(i2c, ControlRegister::DESELECTED)
    }
}

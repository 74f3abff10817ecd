// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! QSFP cage low-speed lines
//!
//! Each cage has its own GPIO expander wired to the module's low-speed
//! signals. All of them except `LPMODE` are active low.

use bitfield::bitfield;

bitfield! {
    #[derive(Copy, Clone, Eq, PartialEq)]
    pub struct ControlLines(u8);
    impl Debug;
    /// Module select; the module only answers on I2C while this is low.
    pub modsel_l, set_modsel_l: 0;
    pub reset_l, set_reset_l: 1;
    pub lpmode, set_lpmode: 2;
    /// Module present; low when a module is seated.
    pub modpres_l, _: 3;
    pub int_l, _: 4;
}

impl ControlLines {
    /// Configuration register value that turns `MODSEL_L` into an output and
    /// leaves every other line an input.
    pub const MODSEL_OUTPUT_CONFIG: u8 = 0xfe;

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub fn is_present(&self) -> bool {
        !self.modpres_l()
    }

    pub fn is_selected(&self) -> bool {
        !self.modsel_l()
    }

    /// Returns these lines with `MODSEL_L` asserted or released, every other
    /// line as it was read.
    pub fn with_selected(mut self, selected: bool) -> Self {
        self.set_modsel_l(!selected);
        self
    }
}

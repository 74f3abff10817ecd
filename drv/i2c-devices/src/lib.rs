// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! I2C device drivers
//!
//! This crate contains the I2C parts that sit in front of QSFP cages and
//! DIMM slots:
//!
//! - [`pca954x`]: PCA954x-style single-register I2C mux
//! - [`qsfp`]: QSFP cage control/status lines as seen through an expander
//! - [`tca6408`]: TCA6408 8-bit GPIO expander

#![cfg_attr(not(test), no_std)]

pub mod pca954x;
pub mod qsfp;
pub mod tca6408;

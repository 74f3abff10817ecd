// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! DIMM slots: SPD reads through a mux, nothing else.

use drv_fw_if_api::FwIfError;
use drv_i2c_api::{I2cBus, ResponseCode};
use drv_i2c_devices::pca954x::ControlRegister;

use crate::selection::MuxSelection;
use crate::{Inner, MuxedDeviceCfg, Wiring};

/// Reads `buf.len()` bytes from register `reg` of the slot's device. On
/// success the slot stays selected; on failure the mux is deselected.
pub(crate) fn read<B: I2cBus, D>(
    inner: &mut Inner<B, D>,
    wiring: &Wiring,
    cfg: &MuxedDeviceCfg,
    reg: u8,
    buf: &mut [u8],
) -> Result<usize, FwIfError> {
    let fail = |_: ResponseCode| FwIfError::Read;
    let mut sel = MuxSelection::new(inner, wiring.selected, None);

    for mux in &wiring.unselected {
        mux.deselect(&mut *sel).map_err(fail)?;
    }
    wiring
        .selected
        .select(
            &mut *sel,
            ControlRegister::from_bits(cfg.mux_bit_io_expander),
        )
        .map_err(fail)?;
    let n = wiring
        .device
        .read_reg_into(&mut *sel, reg, buf)
        .map_err(fail)?;

    sel.keep();
    Ok(n)
}

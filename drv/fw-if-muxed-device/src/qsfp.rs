// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! QSFP cage procedures
//!
//! The power expander is shared by every cage: its low nibble drives the
//! enables and its high nibble reads back the matching power-good signals.
//! Each cage's control expander carries that module's low-speed lines.

use drv_fw_if_api::FwIfError;
use drv_i2c_api::{I2cBus, ResponseCode};
use drv_i2c_devices::pca954x::ControlRegister;
use drv_i2c_devices::qsfp::ControlLines;
use drv_i2c_devices::tca6408::{Mode, PinSet, ALL_OUTPUTS_HIGH};
use embedded_hal::blocking::delay::DelayMs;

use crate::selection::MuxSelection;
use crate::{ErrorStat, Inner, MuxedDeviceCfg, Trace, Wiring, MAX_DATA};

/// Enable pins on the power expander; the power-good inputs sit above them.
const POWER_IO_EXPANDER_NUM_INPUTS: u8 = 4;
pub(crate) const POWER_ENABLE_MASK: u8 =
    (1 << POWER_IO_EXPANDER_NUM_INPUTS) - 1;

/// Powers the cage up and leaves the mux pointing at its control expander
/// with `MODSEL_L` configured as an output.
pub(crate) fn power_up<B: I2cBus, D: DelayMs<u32>>(
    inner: &mut Inner<B, D>,
    wiring: &Wiring,
    cfg: &MuxedDeviceCfg,
) -> Result<(), FwIfError> {
    let open = |_: ResponseCode| FwIfError::Open;
    let enable = PinSet(cfg.power_io_expander_bit);

    wiring.power.set_mode(inner, enable, Mode::Output).map_err(open)?;
    wiring.power.set(inner, enable).map_err(open)?;
    inner.delay.delay_ms(wiring.timing.power_settle_ms);

    let inputs = wiring.power.read_inputs(inner).map_err(open)?;
    if (inputs >> POWER_IO_EXPANDER_NUM_INPUTS) & enable.bits() == 0 {
        inner.count(ErrorStat::PowerNotConfirmed);
        inner.note(Trace::PowerNotConfirmed {
            inputs,
            bit: enable.bits(),
        });
        return Err(FwIfError::Open);
    }

    let mut sel = MuxSelection::new(inner, wiring.selected, None);
    for mux in &wiring.unselected {
        mux.deselect(&mut *sel).map_err(open)?;
    }
    wiring
        .selected
        .select(
            &mut *sel,
            ControlRegister::from_bits(cfg.mux_bit_io_expander),
        )
        .map_err(open)?;
    wiring
        .control
        .write_outputs(&mut *sel, ALL_OUTPUTS_HIGH)
        .map_err(open)?;
    wiring
        .control
        .write_config(&mut *sel, ControlLines::MODSEL_OUTPUT_CONFIG)
        .map_err(open)?;

    sel.keep();
    Ok(())
}

/// Switches the cage's power enable off. Other cages' enables are untouched.
pub(crate) fn power_down<B: I2cBus, D>(
    inner: &mut Inner<B, D>,
    wiring: &Wiring,
    cfg: &MuxedDeviceCfg,
) -> Result<(), FwIfError> {
    wiring
        .power
        .reset(inner, PinSet(cfg.power_io_expander_bit))
        .map_err(|_| FwIfError::Close)
}

/// Connects both the control expander and the module, then makes sure a
/// module is seated and selected. Fails with `err` if anything goes wrong,
/// by which point the guard has put the mux back.
fn select_module<'a, B: I2cBus, D: DelayMs<u32>>(
    inner: &'a mut Inner<B, D>,
    wiring: &Wiring,
    cfg: &MuxedDeviceCfg,
    err: FwIfError,
) -> Result<MuxSelection<'a, B, D>, FwIfError> {
    let fail = |_: ResponseCode| err;
    let mut sel = MuxSelection::new(
        inner,
        wiring.selected,
        Some(ControlRegister::from_bits(cfg.mux_bit_io_expander)),
    );

    for mux in &wiring.unselected {
        mux.deselect(&mut *sel).map_err(fail)?;
    }
    wiring
        .selected
        .select(
            &mut *sel,
            ControlRegister::from_bits(
                cfg.mux_bit_io_expander | cfg.mux_bit_device,
            ),
        )
        .map_err(fail)?;

    let lines = ControlLines::from_bits(
        wiring.control.read_inputs(&mut *sel).map_err(fail)?,
    );
    match (lines.is_present(), lines.is_selected()) {
        (true, true) => {}
        (true, false) => {
            wiring
                .control
                .write_outputs(&mut *sel, lines.with_selected(true).bits())
                .map_err(fail)?;
            sel.delay.delay_ms(wiring.timing.modsel_setup_ms);
        }
        (false, selected) => {
            // Never leave an empty cage selected.
            if selected {
                wiring
                    .control
                    .write_outputs(
                        &mut *sel,
                        lines.with_selected(false).bits(),
                    )
                    .map_err(fail)?;
            }
            sel.count(ErrorStat::ModuleAbsent);
            sel.note(Trace::ModuleAbsent {
                io_expander: cfg.io_expander_addr,
                lines: lines.bits(),
            });
            return Err(err);
        }
    }
    Ok(sel)
}

/// Releases the selection and folds both outcomes into one. A failed
/// transaction wins over a failed cleanup.
fn deselect_module<T, B: I2cBus, D>(
    sel: MuxSelection<'_, B, D>,
    r: Result<T, ResponseCode>,
    err: FwIfError,
) -> Result<T, FwIfError> {
    let released = sel.release();
    let v = r.map_err(|_| err)?;
    released.map_err(|_| err)?;
    Ok(v)
}

/// Reads the control expander's input port into `buf[0]`.
pub(crate) fn read_control<B: I2cBus, D: DelayMs<u32>>(
    inner: &mut Inner<B, D>,
    wiring: &Wiring,
    cfg: &MuxedDeviceCfg,
    buf: &mut [u8],
) -> Result<usize, FwIfError> {
    let mut sel = select_module(inner, wiring, cfg, FwIfError::Read)?;
    let r = wiring.control.read_inputs(&mut *sel).map(|lines| {
        buf[0] = lines;
        1
    });
    deselect_module(sel, r, FwIfError::Read)
}

/// Drives the control expander's output port with `data[0]`.
pub(crate) fn write_control<B: I2cBus, D: DelayMs<u32>>(
    inner: &mut Inner<B, D>,
    wiring: &Wiring,
    cfg: &MuxedDeviceCfg,
    data: &[u8],
) -> Result<(), FwIfError> {
    let mut sel = select_module(inner, wiring, cfg, FwIfError::Write)?;
    let r = wiring.control.write_outputs(&mut *sel, data[0]);
    deselect_module(sel, r, FwIfError::Write)
}

pub(crate) fn read_memory<B: I2cBus, D: DelayMs<u32>>(
    inner: &mut Inner<B, D>,
    wiring: &Wiring,
    cfg: &MuxedDeviceCfg,
    reg: u8,
    buf: &mut [u8],
) -> Result<usize, FwIfError> {
    let mut sel = select_module(inner, wiring, cfg, FwIfError::Read)?;
    let r = wiring.device.read_reg_into(&mut *sel, reg, buf);
    deselect_module(sel, r, FwIfError::Read)
}

pub(crate) fn write_memory<B: I2cBus, D: DelayMs<u32>>(
    inner: &mut Inner<B, D>,
    wiring: &Wiring,
    cfg: &MuxedDeviceCfg,
    reg: u8,
    data: &[u8],
) -> Result<(), FwIfError> {
    let mut frame = [0u8; MAX_DATA + 1];
    frame[0] = reg;
    frame[1..=data.len()].copy_from_slice(data);

    let mut sel = select_module(inner, wiring, cfg, FwIfError::Write)?;
    sel.delay.delay_ms(wiring.timing.write_setup_ms);
    let r = wiring.device.write(&mut *sel, &frame[..=data.len()]);
    deselect_module(sel, r, FwIfError::Write)
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod common;

use common::*;
use drv_fw_if_api::{
    CommonEvent, CommonIoctl, FwIf, FwIfError, FwIfStatus, RxMode,
    TIMEOUT_NO_WAIT,
};
use drv_fw_if_muxed_device::{
    ErrorStat, HwLevel, MuxedDeviceIoctl, Stat, Trace,
};
use std::cell::RefCell;

thread_local! {
    static EVENTS: RefCell<Vec<(u16, u32)>> =
        const { RefCell::new(Vec::new()) };
}

fn record(event: u16, data: &[u8]) -> Result<(), FwIfStatus> {
    let code = u32::from_le_bytes(data.try_into().unwrap());
    EVENTS.with(|e| e.borrow_mut().push((event, code)));
    Ok(())
}

fn listen(dev: &mut dyn FwIf) {
    EVENTS.with(|e| e.borrow_mut().clear());
    dev.bind_callback(record).unwrap();
}

fn events() -> Vec<(u16, u32)> {
    EVENTS.with(|e| e.borrow().clone())
}

const ERROR: u16 = CommonEvent::Error as u16;

#[test]
fn open_runs_the_seven_steps_in_order() {
    let (sim, driver, profile) = rig();
    let mut qsfp = driver.create(profile.qsfp[0]).unwrap();

    qsfp.open().unwrap();

    assert_eq!(
        sim.state().log,
        vec![
            // 1: enable pin becomes an output
            write(POWER, &[3]),
            read(POWER, 1),
            write(POWER, &[3, 0xfe]),
            // 2: drive it high
            write(POWER, &[1]),
            read(POWER, 1),
            write(POWER, &[1, 0x01]),
            Event::Delay(2),
            // 3: power good
            write(POWER, &[0]),
            read(POWER, 1),
            // 4: park the other muxes
            write(MUX1, &[0]),
            write(MUX2, &[0]),
            // 5: control expander channel
            write(MUX0, &[0x01]),
            // 6, 7: outputs high, MODSEL_L an output
            write(CONTROL, &[1, 0xff]),
            write(CONTROL, &[3, 0xfe]),
        ]
    );

    let stats = driver.statistics();
    assert_eq!(stats.stat(Stat::Open), 1);
    assert_eq!(stats.stat(Stat::I2cSend), 7);
    assert_eq!(stats.stat(Stat::I2cSendRecv), 3);
}

#[test]
fn open_preserves_other_cages_power() {
    let (sim, driver, profile) = rig();
    sim.state().set_reg(POWER, 1, 0x01);
    sim.state().set_reg(POWER, 3, 0xfe);

    driver.create(profile.qsfp[3]).unwrap().open().unwrap();

    assert_eq!(sim.state().reg(POWER, 1), 0x09);
    assert_eq!(sim.state().reg(POWER, 3), 0xf6);
}

#[test]
fn open_fails_without_power_good() {
    let (sim, driver, profile) = rig();
    sim.state().set_reg(POWER, 0, 0xe0);
    let mut qsfp = driver.create(profile.qsfp[0]).unwrap();
    listen(&mut qsfp);

    assert_eq!(qsfp.open(), Err(FwIfError::Open.into()));

    // Nothing past step 3.
    assert!(!sim.state().touched(MUX0));
    assert!(!sim.state().touched(CONTROL));
    assert_eq!(events(), vec![(ERROR, FwIfError::Open as u32)]);

    let stats = driver.statistics();
    assert_eq!(stats.error(ErrorStat::PowerNotConfirmed), 1);
    assert_eq!(stats.error(ErrorStat::OpenFailed), 1);
    assert_eq!(stats.stat(Stat::Open), 0);
}

#[test]
fn open_failure_after_parking_deselects() {
    let (sim, driver, profile) = rig();
    sim.state().fail_write(CONTROL, &[1, 0xff]);

    let mut qsfp = driver.create(profile.qsfp[0]).unwrap();
    assert_eq!(qsfp.open(), Err(FwIfError::Open.into()));

    let log = sim.state().transactions();
    assert_eq!(
        log[log.len() - 3..],
        [
            write(MUX0, &[0x01]),
            write(CONTROL, &[1, 0xff]),
            write(MUX0, &[0]),
        ]
    );
    assert!(!log.contains(&write(CONTROL, &[3, 0xfe])));
    assert_eq!(driver.statistics().error(ErrorStat::I2cSendFailed), 1);
}

#[test]
fn memory_map_read_reaches_the_module() {
    let (sim, driver, profile) = rig();
    for (i, b) in [0x11, 0x22, 0x33, 0x44].into_iter().enumerate() {
        sim.state().set_reg(MODULE, 0x80 + i as u8, b);
    }
    let mut qsfp = driver.create(profile.qsfp[0]).unwrap();
    assert_eq!(qsfp.hw_level(), HwLevel::MemoryMap);

    let mut buf = [0u8; 4];
    assert_eq!(qsfp.read(0x80, &mut buf, TIMEOUT_NO_WAIT), Ok(4));
    assert_eq!(buf, [0x11, 0x22, 0x33, 0x44]);

    assert_eq!(
        sim.state().log,
        vec![
            write(MUX1, &[0]),
            write(MUX2, &[0]),
            write(MUX0, &[0x03]),
            write(CONTROL, &[0]),
            read(CONTROL, 1),
            // MODSEL_L was high: assert it and wait
            write(CONTROL, &[1, 0x00]),
            Event::Delay(2),
            write(MODULE, &[0x80]),
            read(MODULE, 4),
            // back to the control expander, then off
            write(MUX0, &[0x01]),
            write(MUX0, &[0]),
        ]
    );
    assert_eq!(driver.statistics().stat(Stat::Read), 1);
}

#[test]
fn already_selected_module_skips_the_setup_wait() {
    let (sim, driver, profile) = rig();
    sim.state().set_reg(CONTROL, 0, PRESENT_SELECTED);
    let mut qsfp = driver.create(profile.qsfp[0]).unwrap();

    let mut buf = [0u8; 1];
    qsfp.read(0, &mut buf, TIMEOUT_NO_WAIT).unwrap();

    let log = sim.state().log.clone();
    assert!(!log.iter().any(|e| matches!(e, Event::Delay(_))));
    assert!(!log.iter().any(|e| matches!(
        e,
        Event::Write { addr: CONTROL, data } if data.len() == 2
    )));
}

#[test]
fn memory_map_write_waits_then_writes_once() {
    let (sim, driver, profile) = rig();
    let mut qsfp = driver.create(profile.qsfp[1]).unwrap();

    qsfp.write(0x7f, &[0xa5, 0x5a], TIMEOUT_NO_WAIT).unwrap();

    let log = sim.state().log.clone();
    assert_eq!(
        log[log.len() - 5..],
        [
            Event::Delay(2),
            Event::Delay(2),
            write(MODULE, &[0x7f, 0xa5, 0x5a]),
            write(MUX0, &[0x04]),
            write(MUX0, &[0]),
        ]
    );
    assert_eq!(sim.state().reg(MODULE, 0x80), 0x5a);
    assert_eq!(driver.statistics().stat(Stat::Write), 1);
}

#[test]
fn absent_module_never_touches_the_device() {
    let (sim, driver, profile) = rig();
    sim.state().set_reg(CONTROL, 0, ABSENT);
    let mut qsfp = driver.create(profile.qsfp[0]).unwrap();
    listen(&mut qsfp);

    let mut buf = [0u8; 8];
    assert_eq!(
        qsfp.read(0, &mut buf, TIMEOUT_NO_WAIT),
        Err(FwIfError::Read.into())
    );
    assert_eq!(
        qsfp.write(0, &[1], TIMEOUT_NO_WAIT),
        Err(FwIfError::Write.into())
    );

    let s = sim.state();
    assert!(!s.touched(MODULE));
    // MODSEL_L was never asserted, so nothing was written to the expander.
    assert!(!s.log.iter().any(|e| matches!(
        e,
        Event::Write { addr: CONTROL, data } if data.len() == 2
    )));
    drop(s);

    assert_eq!(
        events(),
        vec![
            (ERROR, FwIfError::Read as u32),
            (ERROR, FwIfError::Write as u32),
        ]
    );
    let stats = driver.statistics();
    assert_eq!(stats.error(ErrorStat::ModuleAbsent), 2);
    assert_eq!(stats.error(ErrorStat::ReadFailed), 1);
    assert_eq!(stats.error(ErrorStat::WriteFailed), 1);
}

#[test]
fn absent_module_with_modsel_asserted_is_released_once() {
    let (sim, driver, profile) = rig();
    sim.state().set_reg(CONTROL, 0, ABSENT_SELECTED);
    let mut qsfp = driver.create(profile.qsfp[0]).unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(
        qsfp.read(0, &mut buf, TIMEOUT_NO_WAIT),
        Err(FwIfError::Read.into())
    );

    assert_eq!(
        sim.state().log,
        vec![
            write(MUX1, &[0]),
            write(MUX2, &[0]),
            write(MUX0, &[0x03]),
            write(CONTROL, &[0]),
            read(CONTROL, 1),
            write(CONTROL, &[1, ABSENT_SELECTED | 0x01]),
            write(MUX0, &[0x01]),
            write(MUX0, &[0]),
        ]
    );
    assert!(driver.trace().iter().any(|e| e.payload
        == Trace::ModuleAbsent {
            io_expander: CONTROL,
            lines: ABSENT_SELECTED,
        }));
}

#[test]
fn deselect_is_attempted_after_a_failed_restore() {
    let (sim, driver, profile) = rig();
    sim.state().fail_write(MUX0, &[0x01]);
    let mut qsfp = driver.create(profile.qsfp[0]).unwrap();

    let mut buf = [0u8; 2];
    assert_eq!(
        qsfp.read(0, &mut buf, TIMEOUT_NO_WAIT),
        Err(FwIfError::Read.into())
    );

    let log = sim.state().transactions();
    assert_eq!(
        log[log.len() - 2..],
        [write(MUX0, &[0x01]), write(MUX0, &[0])]
    );
    assert!(driver
        .trace()
        .iter()
        .any(|e| e.payload == Trace::CleanupFailed { mux: MUX0 }));
}

#[test]
fn failed_transfer_still_deselects() {
    let (sim, driver, profile) = rig();
    sim.state().fail_write(MODULE, &[0x10]);
    let mut qsfp = driver.create(profile.qsfp[0]).unwrap();

    let mut buf = [0u8; 2];
    assert_eq!(
        qsfp.read(0x10, &mut buf, TIMEOUT_NO_WAIT),
        Err(FwIfError::Read.into())
    );

    let log = sim.state().transactions();
    assert_eq!(
        log[log.len() - 3..],
        [write(MODULE, &[0x10]), write(MUX0, &[0x01]), write(MUX0, &[0])]
    );
    assert_eq!(driver.statistics().error(ErrorStat::I2cSendRecvFailed), 1);
}

#[test]
fn io_expander_level_uses_the_control_ports() {
    let (sim, driver, profile) = rig();
    let mut qsfp = driver.create(profile.qsfp[2]).unwrap();
    qsfp.ioctl(MuxedDeviceIoctl::SetIoExpander as u32, None)
        .unwrap();
    assert_eq!(qsfp.hw_level(), HwLevel::IoExpander);

    // The offset is ignored at this level, even out of register range.
    let mut buf = [0u8; 4];
    assert_eq!(qsfp.read(0x1234, &mut buf, TIMEOUT_NO_WAIT), Ok(1));
    qsfp.write(0x1234, &[0x04, 0xff], TIMEOUT_NO_WAIT).unwrap();

    let s = sim.state();
    assert!(!s.touched(MODULE));
    assert!(s.log.contains(&write(CONTROL, &[1, 0x04])));
    // The cage's mux is 0x71; the other two are parked.
    assert!(s.log.contains(&write(MUX0, &[0])));
    assert!(s.log.contains(&write(MUX1, &[0x03])));
    drop(s);

    qsfp.ioctl(MuxedDeviceIoctl::SetMemoryMap as u32, None)
        .unwrap();
    assert_eq!(qsfp.hw_level(), HwLevel::MemoryMap);
    assert_eq!(driver.statistics().stat(Stat::IoCtrl), 2);
}

#[test]
fn parameters_are_checked_before_the_bus() {
    let (sim, driver, profile) = rig();
    let mut qsfp = driver.create(profile.qsfp[0]).unwrap();

    let params = Err(FwIfStatus::from(FwIfError::Params));
    assert_eq!(qsfp.write(0, &[], TIMEOUT_NO_WAIT), params);
    assert_eq!(qsfp.write(0, &[0; 257], TIMEOUT_NO_WAIT), params);
    assert_eq!(qsfp.read(0, &mut [], TIMEOUT_NO_WAIT).map(|_| ()), params);
    assert_eq!(
        qsfp.read(0x100, &mut [0; 4], TIMEOUT_NO_WAIT).map(|_| ()),
        params
    );

    assert!(sim.state().log.is_empty());
    assert_eq!(driver.statistics().error(ErrorStat::Params), 4);
}

#[test]
fn close_clears_only_this_cages_enable() {
    let (sim, driver, profile) = rig();
    sim.state().set_reg(POWER, 1, 0x0f);
    let mut qsfp = driver.create(profile.qsfp[1]).unwrap();

    qsfp.close().unwrap();

    assert_eq!(
        sim.state().log,
        vec![write(POWER, &[1]), read(POWER, 1), write(POWER, &[1, 0x0d])]
    );
    assert_eq!(driver.statistics().stat(Stat::Close), 1);
}

#[test]
fn close_failure_raises_an_event() {
    let (sim, driver, profile) = rig();
    sim.state().fail_write(POWER, &[1, 0x00]);
    let mut qsfp = driver.create(profile.qsfp[0]).unwrap();
    listen(&mut qsfp);

    assert_eq!(qsfp.close(), Err(FwIfError::Close.into()));
    assert_eq!(events(), vec![(ERROR, FwIfError::Close as u32)]);
    assert_eq!(driver.statistics().stat(Stat::BindCallback), 1);
}

#[test]
fn common_ioctls() {
    let (_sim, driver, profile) = rig();
    let mut qsfp = driver.create(profile.qsfp[0]).unwrap();

    let mut mode = 0;
    qsfp.ioctl(CommonIoctl::GetRxMode as u32, Some(&mut mode))
        .unwrap();
    assert_eq!(mode, RxMode::Polling as u32);
    qsfp.ioctl(CommonIoctl::FlushTx as u32, None).unwrap();
    qsfp.ioctl(CommonIoctl::FlushRx as u32, None).unwrap();

    assert_eq!(
        qsfp.ioctl(7, None),
        Err(FwIfError::UnrecognisedOption.into())
    );
    let stats = driver.statistics();
    assert_eq!(stats.stat(Stat::IoCtrl), 3);
    assert_eq!(stats.error(ErrorStat::UnrecognisedOption), 1);
}

#[test]
fn debug_print_traces_each_transfer() {
    let (_sim, driver, profile) = rig();
    let mut qsfp = driver.create(profile.qsfp[0]).unwrap();
    let mut buf = [0u8; 4];
    let fetched = Trace::SendRecv {
        addr: MODULE,
        reg: 0x80,
        len: 4,
    };

    qsfp.read(0x80, &mut buf, TIMEOUT_NO_WAIT).unwrap();
    assert!(!driver.trace().iter().any(|e| e.payload == fetched));

    qsfp.ioctl(CommonIoctl::EnableDebugPrint as u32, None)
        .unwrap();
    qsfp.read(0x80, &mut buf, TIMEOUT_NO_WAIT).unwrap();
    assert!(driver.trace().iter().any(|e| e.payload == fetched));

    qsfp.ioctl(CommonIoctl::DisableDebugPrint as u32, None)
        .unwrap();
    let before = driver.trace().last().copied();
    qsfp.read(0x80, &mut buf, TIMEOUT_NO_WAIT).unwrap();
    assert_eq!(driver.trace().last().copied(), before);
}

#[test]
fn handles_share_the_bus() {
    let (sim, driver, profile) = rig();
    let mut handles = profile
        .qsfp
        .iter()
        .map(|cfg| driver.create(*cfg).unwrap())
        .collect::<Vec<_>>();

    for h in &mut handles {
        h.open().unwrap();
    }

    // Every cage's enable is now set.
    assert_eq!(sim.state().reg(POWER, 1), 0x0f);
    let stats = driver.statistics();
    assert_eq!(stats.stat(Stat::InstanceCreate), 4);
    assert_eq!(stats.stat(Stat::Open), 4);
}

#[test]
fn usable_as_a_trait_object() {
    let (sim, driver, profile) = rig();
    sim.state().set_reg(MODULE, 0, 0x0d);
    let mut qsfp = driver.create(profile.qsfp[0]).unwrap();
    let dev: &mut dyn FwIf = &mut qsfp;

    dev.open().unwrap();
    let mut id = [0u8; 1];
    assert_eq!(dev.read(0, &mut id, TIMEOUT_NO_WAIT), Ok(1));
    assert_eq!(id, [0x0d]);
    dev.close().unwrap();
}

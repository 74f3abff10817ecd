// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! FW_IF driver for I2C devices that sit behind muxes
//!
//! QSFP cages and DIMM slots hang off one I2C bus through up to three
//! single-register muxes. Exactly one device's path may be connected at a
//! time, so every procedure first parks the two muxes that do not lead to
//! the device, then steers the one that does, and puts things back when it
//! is done (including when a step fails part way through).
//!
//! QSFP cages also have a power expander, shared by all cages, and a
//! per-cage control expander carrying the module's low-speed lines. Opening
//! a QSFP handle powers the cage up; every read or write first checks that a
//! module is seated and selects it. DIMMs have none of that: a read is a mux
//! selection and a register read.
//!
//! The driver class owns the bus. Every operation holds the class lock from
//! its first bus transaction to its last, so step sequences from different
//! handles never interleave.

#![cfg_attr(not(test), no_std)]

use drv_fw_if_api::{
    CommonIoctl, EventHook, FwIf, FwIfError, FwIfStatus, RaiseEvent, RxMode,
    Statistics, MAX_COMMON_IOCTL,
};
use drv_i2c_api::{I2cBus, I2cDevice, ResponseCode};
use drv_i2c_devices::pca954x::Pca954x;
use drv_i2c_devices::tca6408::Tca6408;
use embedded_hal::blocking::delay::DelayMs;
use enum_map::Enum;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use ringbuf::{ringbuf_entry, Ringbuf};
use serde::{Deserialize, Serialize};
use spin::{Mutex, MutexGuard};
use static_assertions::const_assert_eq;

mod dimm;
mod qsfp;
mod selection;

/// Largest single read or write.
pub const MAX_DATA: usize = 256;

/// Muxed-device ioctl options.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u32)]
pub enum MuxedDeviceIoctl {
    /// Route reads and writes to the control expander's ports.
    SetIoExpander = MAX_COMMON_IOCTL,
    /// Route reads and writes to the device's own register space.
    SetMemoryMap,
}

const_assert_eq!(MuxedDeviceIoctl::SetMemoryMap as u32, 6);

#[derive(
    Copy, Clone, Debug, Eq, PartialEq, FromPrimitive, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum DeviceKind {
    Qsfp = 0,
    Dimm = 1,
}

/// Which part a QSFP read or write reaches once the module is selected.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    FromPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum HwLevel {
    /// The control expander: one byte, input port on read, output port on
    /// write. The caller's offset is ignored.
    #[default]
    IoExpander = 0,
    /// The module itself, with the caller's offset as register address.
    MemoryMap = 1,
}

/// Fixed waits demanded by the hardware, in milliseconds.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Between switching cage power on and checking it came up.
    pub power_settle_ms: u32,
    /// After asserting `MODSEL_L`, before talking to the module.
    pub modsel_setup_ms: u32,
    /// Before each write to a module's register space.
    pub write_setup_ms: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            power_settle_ms: 2,
            modsel_setup_ms: 2,
            write_setup_ms: 2,
        }
    }
}

/// Driver-class configuration, shared by every handle.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MuxedDeviceInitCfg {
    /// I2C bus number the muxes and devices sit on.
    pub bus: u8,
    #[serde(default)]
    pub timing: Timing,
}

/// Per-device wiring. DIMMs use only the mux fields and `device_addr`;
/// the rest stay zero.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MuxedDeviceCfg {
    pub device: DeviceKind,
    #[serde(default)]
    pub power_io_expander_addr: u8,
    /// This cage's bit in the power expander's ports.
    #[serde(default)]
    pub power_io_expander_bit: u8,
    /// The mux that leads to this device.
    pub selected_mux_addr: u8,
    /// The other two muxes, which must be parked first.
    pub unselected_mux_addrs: [u8; 2],
    /// Mux channel bits reaching the control expander (QSFP) or the slot
    /// (DIMM).
    pub mux_bit_io_expander: u8,
    /// Mux channel bits reaching the module itself.
    #[serde(default)]
    pub mux_bit_device: u8,
    #[serde(default)]
    pub io_expander_addr: u8,
    pub device_addr: u8,
    #[serde(default)]
    pub hw_level: HwLevel,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Enum)]
pub enum Stat {
    InitOverallComplete,
    InstanceCreate,
    I2cSend,
    I2cSendRecv,
    Open,
    Close,
    Read,
    Write,
    IoCtrl,
    BindCallback,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Enum)]
pub enum ErrorStat {
    DriverInUse,
    DriverNotInitialised,
    InvalidCfg,
    Params,
    UnrecognisedOption,
    ValidationFailed,
    I2cSendFailed,
    I2cSendRecvFailed,
    PowerNotConfirmed,
    ModuleAbsent,
    OpenFailed,
    CloseFailed,
    ReadFailed,
    WriteFailed,
}

pub type MuxedDeviceStatistics = Statistics<Stat, ErrorStat>;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Trace {
    None,
    Init { bus: u8 },
    Deinit,
    Created { device: DeviceKind, addr: u8 },
    BadCfg { device: DeviceKind, addr: u8 },
    Send { addr: u8, len: u16 },
    SendRecv { addr: u8, reg: u8, len: u16 },
    I2cFailed { addr: u8, code: ResponseCode },
    PowerNotConfirmed { inputs: u8, bit: u8 },
    ModuleAbsent { io_expander: u8, lines: u8 },
    CleanupFailed { mux: u8 },
    Failed { addr: u8, err: FwIfError },
}

pub const TRACE_DEPTH: usize = 48;

pub(crate) struct Inner<B, D> {
    bus: B,
    pub(crate) delay: D,
    init: Option<MuxedDeviceInitCfg>,
    stats: MuxedDeviceStatistics,
    trace: Ringbuf<Trace, TRACE_DEPTH>,
    /// Trace every transaction, not just failures.
    verbose: bool,
}

impl<B, D> Inner<B, D> {
    fn reject(&mut self, e: FwIfError) -> FwIfError {
        let stat = match e {
            FwIfError::Params => ErrorStat::Params,
            FwIfError::InvalidCfg => ErrorStat::InvalidCfg,
            FwIfError::UnrecognisedOption => ErrorStat::UnrecognisedOption,
            FwIfError::DriverInUse => ErrorStat::DriverInUse,
            FwIfError::DriverNotInitialised => ErrorStat::DriverNotInitialised,
            FwIfError::Open => ErrorStat::OpenFailed,
            FwIfError::Close => ErrorStat::CloseFailed,
            FwIfError::Read => ErrorStat::ReadFailed,
            FwIfError::Write => ErrorStat::WriteFailed,
            _ => ErrorStat::ValidationFailed,
        };
        self.stats.incr_error(stat);
        e
    }

    pub(crate) fn note(&mut self, event: Trace) {
        ringbuf_entry!(self.trace, event);
    }

    pub(crate) fn count(&mut self, error: ErrorStat) {
        self.stats.incr_error(error);
    }
}

/// Every transaction the driver makes goes through here, so each one is
/// counted and failures always land in the trace.
impl<B: I2cBus, D> I2cBus for Inner<B, D> {
    fn send(
        &mut self,
        bus: u8,
        address: u8,
        buf: &[u8],
    ) -> Result<(), ResponseCode> {
        self.stats.incr_stat(Stat::I2cSend);
        if self.verbose {
            ringbuf_entry!(
                self.trace,
                Trace::Send {
                    addr: address,
                    len: buf.len() as u16,
                }
            );
        }
        self.bus.send(bus, address, buf).inspect_err(|&code| {
            self.stats.incr_error(ErrorStat::I2cSendFailed);
            ringbuf_entry!(
                self.trace,
                Trace::I2cFailed {
                    addr: address,
                    code,
                }
            );
        })
    }

    fn send_recv(
        &mut self,
        bus: u8,
        address: u8,
        tx: &[u8],
        rx: &mut [u8],
    ) -> Result<(), ResponseCode> {
        self.stats.incr_stat(Stat::I2cSendRecv);
        if self.verbose {
            ringbuf_entry!(
                self.trace,
                Trace::SendRecv {
                    addr: address,
                    reg: tx.first().copied().unwrap_or(0),
                    len: rx.len() as u16,
                }
            );
        }
        self.bus.send_recv(bus, address, tx, rx).inspect_err(|&code| {
            self.stats.incr_error(ErrorStat::I2cSendRecvFailed);
            ringbuf_entry!(
                self.trace,
                Trace::I2cFailed {
                    addr: address,
                    code,
                }
            );
        })
    }
}

/// The parts a handle talks to, resolved against the class's bus once at
/// create time.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Wiring {
    pub power: Tca6408,
    pub control: Tca6408,
    pub selected: Pca954x,
    pub unselected: [Pca954x; 2],
    pub device: I2cDevice,
    pub timing: Timing,
}

impl Wiring {
    fn new(init: &MuxedDeviceInitCfg, cfg: &MuxedDeviceCfg) -> Self {
        let dev = |address| I2cDevice::new(init.bus, address);
        Self {
            power: Tca6408::new(dev(cfg.power_io_expander_addr)),
            control: Tca6408::new(dev(cfg.io_expander_addr)),
            selected: Pca954x::new(dev(cfg.selected_mux_addr)),
            unselected: cfg
                .unselected_mux_addrs
                .map(|addr| Pca954x::new(dev(addr))),
            device: dev(cfg.device_addr),
            timing: init.timing,
        }
    }
}

/// The muxed-device driver class: one per I2C bus.
pub struct MuxedDeviceDriver<B, D> {
    inner: Mutex<Inner<B, D>>,
}

impl<B: I2cBus, D: DelayMs<u32>> MuxedDeviceDriver<B, D> {
    pub fn new(bus: B, delay: D) -> Self {
        Self {
            inner: Mutex::new(Inner {
                bus,
                delay,
                init: None,
                stats: MuxedDeviceStatistics::new(),
                trace: Ringbuf::new(Trace::None),
                verbose: false,
            }),
        }
    }

    /// Records the class configuration. Fails with `DriverInUse` if the
    /// class is already initialised.
    pub fn init(&self, cfg: MuxedDeviceInitCfg) -> Result<(), FwIfError> {
        let mut inner = self.inner.lock();
        if inner.init.is_some() {
            return Err(inner.reject(FwIfError::DriverInUse));
        }
        inner.init = Some(cfg);
        inner.stats.incr_stat(Stat::InitOverallComplete);
        ringbuf_entry!(inner.trace, Trace::Init { bus: cfg.bus });
        Ok(())
    }

    /// Returns the class to its uninitialised state. No handle can be alive
    /// while this runs.
    pub fn deinit(&mut self) {
        let inner = self.inner.get_mut();
        inner.init = None;
        ringbuf_entry!(inner.trace, Trace::Deinit);
    }

    pub fn is_initialised(&self) -> bool {
        self.inner.lock().init.is_some()
    }

    /// Creates a handle for one QSFP cage or DIMM slot. No bus traffic
    /// happens until the handle is used.
    pub fn create(
        &self,
        cfg: MuxedDeviceCfg,
    ) -> Result<MuxedDevice<'_, B, D>, FwIfError> {
        let mut inner = self.initialised(false)?;
        let Some(init) = inner.init else {
            return Err(inner.reject(FwIfError::DriverNotInitialised));
        };

        let parks_own_mux =
            cfg.unselected_mux_addrs.contains(&cfg.selected_mux_addr);
        let unreachable = match cfg.device {
            DeviceKind::Qsfp => {
                cfg.mux_bit_io_expander == 0
                    || cfg.mux_bit_device == 0
                    || cfg.power_io_expander_bit == 0
                    || cfg.power_io_expander_bit & !qsfp::POWER_ENABLE_MASK
                        != 0
            }
            DeviceKind::Dimm => cfg.mux_bit_io_expander == 0,
        };
        if parks_own_mux || unreachable {
            ringbuf_entry!(
                inner.trace,
                Trace::BadCfg {
                    device: cfg.device,
                    addr: cfg.device_addr,
                }
            );
            return Err(inner.reject(FwIfError::InvalidCfg));
        }

        inner.stats.incr_stat(Stat::InstanceCreate);
        ringbuf_entry!(
            inner.trace,
            Trace::Created {
                device: cfg.device,
                addr: cfg.device_addr,
            }
        );
        Ok(MuxedDevice {
            driver: self,
            cfg,
            wiring: Wiring::new(&init, &cfg),
            hook: EventHook::default(),
            debug_print: false,
        })
    }

    pub fn statistics(&self) -> MuxedDeviceStatistics {
        self.inner.lock().stats.clone()
    }

    pub fn clear_statistics(&self) -> Result<(), FwIfError> {
        self.initialised(false)?.stats.clear();
        Ok(())
    }

    /// A copy of the trace ring buffer, for dumping.
    pub fn trace(&self) -> Ringbuf<Trace, TRACE_DEPTH> {
        self.inner.lock().trace.clone()
    }

    fn initialised(
        &self,
        verbose: bool,
    ) -> Result<MutexGuard<'_, Inner<B, D>>, FwIfError> {
        let mut inner = self.inner.lock();
        if inner.init.is_none() {
            return Err(inner.reject(FwIfError::DriverNotInitialised));
        }
        inner.verbose = verbose;
        Ok(inner)
    }
}

/// A QSFP cage or DIMM slot.
pub struct MuxedDevice<'d, B, D> {
    driver: &'d MuxedDeviceDriver<B, D>,
    cfg: MuxedDeviceCfg,
    wiring: Wiring,
    hook: EventHook,
    debug_print: bool,
}

impl<B: I2cBus, D: DelayMs<u32>> MuxedDevice<'_, B, D> {
    pub fn cfg(&self) -> &MuxedDeviceCfg {
        &self.cfg
    }

    pub fn hw_level(&self) -> HwLevel {
        self.cfg.hw_level
    }

    /// Register address for a register-space access.
    fn register(inner: &mut Inner<B, D>, port: u64) -> Result<u8, FwIfError> {
        u8::try_from(port).map_err(|_| inner.reject(FwIfError::Params))
    }

    fn check_len(
        inner: &mut Inner<B, D>,
        len: usize,
    ) -> Result<(), FwIfError> {
        if len == 0 || len > MAX_DATA {
            return Err(inner.reject(FwIfError::Params));
        }
        Ok(())
    }

    /// Traces and counts an aggregate hardware failure.
    fn failed(&self, inner: &mut Inner<B, D>, err: FwIfError) -> FwIfError {
        ringbuf_entry!(
            inner.trace,
            Trace::Failed {
                addr: self.cfg.device_addr,
                err,
            }
        );
        inner.reject(err)
    }

    fn do_open(&mut self) -> Result<(), FwIfError> {
        let driver = self.driver;
        let mut inner = driver.initialised(self.debug_print)?;
        if self.cfg.device == DeviceKind::Qsfp {
            if let Err(e) = qsfp::power_up(&mut inner, &self.wiring, &self.cfg)
            {
                return Err(self.failed(&mut inner, e));
            }
        }
        inner.stats.incr_stat(Stat::Open);
        Ok(())
    }

    fn do_close(&mut self) -> Result<(), FwIfError> {
        let driver = self.driver;
        let mut inner = driver.initialised(self.debug_print)?;
        if self.cfg.device == DeviceKind::Qsfp {
            if let Err(e) =
                qsfp::power_down(&mut inner, &self.wiring, &self.cfg)
            {
                return Err(self.failed(&mut inner, e));
            }
        }
        inner.stats.incr_stat(Stat::Close);
        Ok(())
    }

    fn do_read(
        &mut self,
        port: u64,
        buf: &mut [u8],
    ) -> Result<usize, FwIfError> {
        let driver = self.driver;
        let mut inner = driver.initialised(self.debug_print)?;
        Self::check_len(&mut inner, buf.len())?;

        let r = match (self.cfg.device, self.cfg.hw_level) {
            (DeviceKind::Qsfp, HwLevel::IoExpander) => {
                qsfp::read_control(&mut inner, &self.wiring, &self.cfg, buf)
            }
            (DeviceKind::Qsfp, HwLevel::MemoryMap) => {
                let reg = Self::register(&mut inner, port)?;
                qsfp::read_memory(&mut inner, &self.wiring, &self.cfg, reg, buf)
            }
            (DeviceKind::Dimm, _) => {
                let reg = Self::register(&mut inner, port)?;
                dimm::read(&mut inner, &self.wiring, &self.cfg, reg, buf)
            }
        };
        match r {
            Ok(n) => {
                inner.stats.incr_stat(Stat::Read);
                Ok(n)
            }
            Err(e) => Err(self.failed(&mut inner, e)),
        }
    }

    fn do_write(&mut self, port: u64, data: &[u8]) -> Result<(), FwIfError> {
        let driver = self.driver;
        let mut inner = driver.initialised(self.debug_print)?;
        Self::check_len(&mut inner, data.len())?;

        let r = match (self.cfg.device, self.cfg.hw_level) {
            (DeviceKind::Qsfp, HwLevel::IoExpander) => {
                qsfp::write_control(&mut inner, &self.wiring, &self.cfg, data)
            }
            (DeviceKind::Qsfp, HwLevel::MemoryMap) => {
                let reg = Self::register(&mut inner, port)?;
                qsfp::write_memory(
                    &mut inner,
                    &self.wiring,
                    &self.cfg,
                    reg,
                    data,
                )
            }
            // DIMM slots are read-only through this interface.
            (DeviceKind::Dimm, _) => Ok(()),
        };
        match r {
            Ok(()) => {
                inner.stats.incr_stat(Stat::Write);
                Ok(())
            }
            Err(e) => Err(self.failed(&mut inner, e)),
        }
    }

    fn do_ioctl(
        &mut self,
        option: u32,
        value: Option<&mut u32>,
    ) -> Result<(), FwIfError> {
        let driver = self.driver;
        let mut inner = driver.initialised(self.debug_print)?;

        if let Some(common) = CommonIoctl::from_u32(option) {
            match common {
                CommonIoctl::FlushTx | CommonIoctl::FlushRx => {}
                CommonIoctl::GetRxMode => {
                    if let Some(value) = value {
                        *value = RxMode::Polling as u32;
                    }
                }
                CommonIoctl::EnableDebugPrint => self.debug_print = true,
                CommonIoctl::DisableDebugPrint => self.debug_print = false,
            }
        } else {
            match MuxedDeviceIoctl::from_u32(option) {
                Some(MuxedDeviceIoctl::SetIoExpander) => {
                    self.cfg.hw_level = HwLevel::IoExpander;
                }
                Some(MuxedDeviceIoctl::SetMemoryMap) => {
                    self.cfg.hw_level = HwLevel::MemoryMap;
                }
                None => {
                    return Err(inner.reject(FwIfError::UnrecognisedOption))
                }
            }
        }

        inner.stats.incr_stat(Stat::IoCtrl);
        Ok(())
    }

    fn do_bind(&mut self, cb: RaiseEvent) -> Result<(), FwIfError> {
        let driver = self.driver;
        let mut inner = driver.initialised(self.debug_print)?;
        self.hook.bind(cb);
        inner.stats.incr_stat(Stat::BindCallback);
        Ok(())
    }

    /// Converts to the wire status, raising an error event for hardware
    /// failures. Runs after the driver lock has been released.
    fn finish<T>(&self, r: Result<T, FwIfError>) -> Result<T, FwIfStatus> {
        r.map_err(|e| {
            let status = FwIfStatus::from(e);
            if matches!(
                e,
                FwIfError::Open
                    | FwIfError::Close
                    | FwIfError::Read
                    | FwIfError::Write
            ) {
                self.hook.raise_error(status);
            }
            status
        })
    }
}

impl<B: I2cBus, D: DelayMs<u32>> FwIf for MuxedDevice<'_, B, D> {
    fn open(&mut self) -> Result<(), FwIfStatus> {
        let r = self.do_open();
        self.finish(r)
    }

    fn close(&mut self) -> Result<(), FwIfStatus> {
        let r = self.do_close();
        self.finish(r)
    }

    /// `port` is the module register at `MemoryMap` level and is ignored at
    /// `IoExpander` level. `timeout_ms` is advisory.
    fn write(
        &mut self,
        port: u64,
        data: &[u8],
        _timeout_ms: u32,
    ) -> Result<(), FwIfStatus> {
        let r = self.do_write(port, data);
        self.finish(r)
    }

    fn read(
        &mut self,
        port: u64,
        buf: &mut [u8],
        _timeout_ms: u32,
    ) -> Result<usize, FwIfStatus> {
        let r = self.do_read(port, buf);
        self.finish(r)
    }

    fn ioctl(
        &mut self,
        option: u32,
        value: Option<&mut u32>,
    ) -> Result<(), FwIfStatus> {
        let r = self.do_ioctl(option, value);
        self.finish(r)
    }

    fn bind_callback(&mut self, cb: RaiseEvent) -> Result<(), FwIfStatus> {
        let r = self.do_bind(cb);
        self.finish(r)
    }
}

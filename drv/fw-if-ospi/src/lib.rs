// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! FW_IF driver for OSPI flash
//!
//! Each [`Ospi`] handle is a window (`base_address`, `length`) onto the flash
//! part behind an [`OspiDriver`]. Offsets passed to `read`/`write` are
//! relative to the window, and every access must fit entirely inside it.
//!
//! A handle moves through a small state machine:
//!
//! ```text
//!   create      open          close
//!  -------> Init -----> Opened -----> Closed
//! ```
//!
//! `read` and `write` are only allowed while `Opened`. Calls from any other
//! state fail with [`OspiError::InvalidState`] and never reach the flash.

#![cfg_attr(not(test), no_std)]

use drv_fw_if_api::{
    CommonIoctl, EventHook, FwIf, FwIfError, FwIfStatus, RaiseEvent, RxMode,
    Statistics, MAX_COMMON_IOCTL, MAX_FW_IF_ERROR,
};
use drv_ospi_api::{FlashError, FlashInitCfg, OspiFlash};
use enum_map::Enum;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use ringbuf::{ringbuf_entry, Ringbuf};
use serde::{Deserialize, Serialize};
use spin::{Mutex, MutexGuard};
use static_assertions::const_assert_eq;

/// Errors returned by OSPI handles. Codes shared with [`FwIfError`] keep
/// their common values; OSPI's own codes start at [`MAX_FW_IF_ERROR`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u32)]
pub enum OspiError {
    Params = FwIfError::Params as u32,
    InvalidCfg = FwIfError::InvalidCfg as u32,
    UnrecognisedOption = FwIfError::UnrecognisedOption as u32,
    DriverInUse = FwIfError::DriverInUse as u32,
    DriverNotInitialised = FwIfError::DriverNotInitialised as u32,

    /// Operation not allowed in the handle's current state
    InvalidState = MAX_FW_IF_ERROR,
    /// The flash controller reported a failure
    DriverFailure,
    /// Access does not fit inside the handle's window
    InvalidAddress,
}

const_assert_eq!(OspiError::InvalidState as u32, 15);
const_assert_eq!(OspiError::InvalidAddress as u32, 17);

impl From<OspiError> for FwIfStatus {
    fn from(e: OspiError) -> Self {
        FwIfStatus(e as u32)
    }
}

impl TryFrom<FwIfStatus> for OspiError {
    type Error = FwIfStatus;

    fn try_from(s: FwIfStatus) -> Result<Self, Self::Error> {
        Self::from_u32(s.code()).ok_or(s)
    }
}

/// OSPI-specific ioctl options.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u32)]
pub enum OspiIoctl {
    /// Writes the 0 to 100 completion percentage of the in-flight erase or
    /// program operation.
    GetProgress = MAX_COMMON_IOCTL,
}

#[derive(
    Copy, Clone, Debug, Eq, PartialEq, FromPrimitive, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum OspiState {
    Init = 0,
    Opened = 1,
    Closed = 2,
    Error = 3,
}

/// Driver-class configuration, shared by every handle.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct OspiInitCfg {
    pub device_id: u8,
    #[serde(default = "default_page_size")]
    pub page_size: u16,
}

fn default_page_size() -> u16 {
    drv_ospi_api::PAGE_SIZE_BYTES as u16
}

impl From<OspiInitCfg> for FlashInitCfg {
    fn from(cfg: OspiInitCfg) -> Self {
        FlashInitCfg {
            device_id: cfg.device_id,
            page_size: cfg.page_size,
        }
    }
}

/// Per-handle window onto the flash.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct OspiCfg {
    pub base_address: u32,
    pub length: u32,
    #[serde(default)]
    pub erase_before_write: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Enum)]
pub enum Stat {
    InitOverallComplete,
    InstanceCreate,
    Open,
    Close,
    Read,
    Write,
    IoCtrl,
    BindCallback,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Enum)]
pub enum ErrorStat {
    Params,
    DriverInUse,
    DriverNotInitialised,
    DriverFailure,
    InvalidCfg,
    InvalidState,
    InvalidAddress,
    UnrecognisedOption,
}

pub type OspiStatistics = Statistics<Stat, ErrorStat>;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Op {
    Init,
    Open,
    Close,
    Read,
    Write,
    Erase,
    Progress,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Trace {
    None,
    Init { device_id: u8, page_size: u16 },
    Deinit,
    Created { base_address: u32, length: u32 },
    BadCfg { base_address: u32, length: u32 },
    Transition { from: OspiState, to: OspiState },
    InvalidState { op: Op, state: OspiState },
    OutOfRange { offset: u64, len: usize },
    Erase { addr: u32, len: u32 },
    Write { addr: u32, len: u32 },
    Read { addr: u32, len: u32, got: u32 },
    FlashFailed { op: Op, err: FlashError },
}

pub const TRACE_DEPTH: usize = 32;

struct Inner<F> {
    flash: F,
    init: Option<OspiInitCfg>,
    stats: OspiStatistics,
    trace: Ringbuf<Trace, TRACE_DEPTH>,
}

impl<F: OspiFlash> Inner<F> {
    fn flash_failed(&mut self, op: Op, err: FlashError) -> OspiError {
        ringbuf_entry!(self.trace, Trace::FlashFailed { op, err });
        self.stats.incr_error(ErrorStat::DriverFailure);
        OspiError::DriverFailure
    }

    fn reject(&mut self, e: OspiError) -> OspiError {
        let stat = match e {
            OspiError::Params => ErrorStat::Params,
            OspiError::InvalidCfg => ErrorStat::InvalidCfg,
            OspiError::UnrecognisedOption => ErrorStat::UnrecognisedOption,
            OspiError::DriverInUse => ErrorStat::DriverInUse,
            OspiError::DriverNotInitialised => ErrorStat::DriverNotInitialised,
            OspiError::InvalidState => ErrorStat::InvalidState,
            OspiError::DriverFailure => ErrorStat::DriverFailure,
            OspiError::InvalidAddress => ErrorStat::InvalidAddress,
        };
        self.stats.incr_error(stat);
        e
    }
}

/// The OSPI driver class: one per flash part.
pub struct OspiDriver<F> {
    inner: Mutex<Inner<F>>,
}

impl<F: OspiFlash> OspiDriver<F> {
    pub fn new(flash: F) -> Self {
        Self {
            inner: Mutex::new(Inner {
                flash,
                init: None,
                stats: OspiStatistics::new(),
                trace: Ringbuf::new(Trace::None),
            }),
        }
    }

    /// Brings up the flash controller. Fails with `DriverInUse` if the class
    /// is already initialised.
    pub fn init(&self, cfg: OspiInitCfg) -> Result<(), OspiError> {
        let mut inner = self.inner.lock();
        if inner.init.is_some() {
            return Err(inner.reject(OspiError::DriverInUse));
        }
        if cfg.page_size == 0 {
            return Err(inner.reject(OspiError::InvalidCfg));
        }
        if let Err(e) = inner.flash.init(cfg.into()) {
            return Err(inner.flash_failed(Op::Init, e));
        }

        inner.init = Some(cfg);
        inner.stats.incr_stat(Stat::InitOverallComplete);
        ringbuf_entry!(
            inner.trace,
            Trace::Init {
                device_id: cfg.device_id,
                page_size: cfg.page_size,
            }
        );
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

    /// Creates a handle for the window described by `cfg`, in state `Init`.
    pub fn create(&self, cfg: OspiCfg) -> Result<Ospi<'_, F>, OspiError> {
        let mut inner = self.initialised()?;
        let fits = cfg.base_address.checked_add(cfg.length).is_some();
        if cfg.length == 0 || !fits {
            ringbuf_entry!(
                inner.trace,
                Trace::BadCfg {
                    base_address: cfg.base_address,
                    length: cfg.length,
                }
            );
            return Err(inner.reject(OspiError::InvalidCfg));
        }

        inner.stats.incr_stat(Stat::InstanceCreate);
        ringbuf_entry!(
            inner.trace,
            Trace::Created {
                base_address: cfg.base_address,
                length: cfg.length,
            }
        );
        Ok(Ospi {
            driver: self,
            cfg,
            state: OspiState::Init,
            hook: EventHook::default(),
            debug_print: false,
        })
    }

    pub fn statistics(&self) -> OspiStatistics {
        self.inner.lock().stats.clone()
    }

    pub fn clear_statistics(&self) -> Result<(), OspiError> {
        self.initialised()?.stats.clear();
        Ok(())
    }

    /// A copy of the trace ring buffer, for dumping.
    pub fn trace(&self) -> Ringbuf<Trace, TRACE_DEPTH> {
        self.inner.lock().trace.clone()
    }

    fn initialised(&self) -> Result<MutexGuard<'_, Inner<F>>, OspiError> {
        let mut inner = self.inner.lock();
        if inner.init.is_none() {
            return Err(inner.reject(OspiError::DriverNotInitialised));
        }
        Ok(inner)
    }
}

/// A window onto an OSPI flash part.
pub struct Ospi<'d, F> {
    driver: &'d OspiDriver<F>,
    cfg: OspiCfg,
    state: OspiState,
    hook: EventHook,
    debug_print: bool,
}

impl<F: OspiFlash> Ospi<'_, F> {
    pub fn state(&self) -> OspiState {
        self.state
    }

    pub fn cfg(&self) -> &OspiCfg {
        &self.cfg
    }

    fn require(
        &self,
        inner: &mut Inner<F>,
        op: Op,
        expected: OspiState,
    ) -> Result<(), OspiError> {
        if self.state != expected {
            ringbuf_entry!(
                inner.trace,
                Trace::InvalidState {
                    op,
                    state: self.state,
                }
            );
            return Err(inner.reject(OspiError::InvalidState));
        }
        Ok(())
    }

    /// Translates a window-relative access into a flash address.
    fn window(
        &self,
        inner: &mut Inner<F>,
        offset: u64,
        len: usize,
    ) -> Result<u32, OspiError> {
        let end = offset.checked_add(len as u64);
        let addr = u32::try_from(offset)
            .ok()
            .and_then(|o| self.cfg.base_address.checked_add(o));
        match (end, addr) {
            (Some(end), Some(addr)) if end <= u64::from(self.cfg.length) => {
                Ok(addr)
            }
            _ => {
                ringbuf_entry!(inner.trace, Trace::OutOfRange { offset, len });
                Err(inner.reject(OspiError::InvalidAddress))
            }
        }
    }

    fn transition(&mut self, inner: &mut Inner<F>, to: OspiState) {
        ringbuf_entry!(
            inner.trace,
            Trace::Transition {
                from: self.state,
                to,
            }
        );
        self.state = to;
    }

    fn do_open(&mut self) -> Result<(), OspiError> {
        let driver = self.driver;
        let mut inner = driver.initialised()?;
        self.require(&mut inner, Op::Open, OspiState::Init)?;
        self.transition(&mut inner, OspiState::Opened);
        inner.stats.incr_stat(Stat::Open);
        Ok(())
    }

    fn do_close(&mut self) -> Result<(), OspiError> {
        let driver = self.driver;
        let mut inner = driver.initialised()?;
        self.require(&mut inner, Op::Close, OspiState::Opened)?;
        self.transition(&mut inner, OspiState::Closed);
        inner.stats.incr_stat(Stat::Close);
        Ok(())
    }

    fn do_write(&mut self, offset: u64, data: &[u8]) -> Result<(), OspiError> {
        let driver = self.driver;
        let mut inner = driver.initialised()?;
        if data.is_empty() {
            return Err(inner.reject(OspiError::Params));
        }
        self.require(&mut inner, Op::Write, OspiState::Opened)?;
        let addr = self.window(&mut inner, offset, data.len())?;
        // Fits in the window, so fits in a u32.
        let len = data.len() as u32;

        if self.cfg.erase_before_write {
            if self.debug_print {
                ringbuf_entry!(inner.trace, Trace::Erase { addr, len });
            }
            if let Err(e) = inner.flash.erase(addr, len) {
                return Err(inner.flash_failed(Op::Erase, e));
            }
        }

        if self.debug_print {
            ringbuf_entry!(inner.trace, Trace::Write { addr, len });
        }
        if let Err(e) = inner.flash.write(addr, data) {
            return Err(inner.flash_failed(Op::Write, e));
        }

        inner.stats.incr_stat(Stat::Write);
        Ok(())
    }

    fn do_read(
        &mut self,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<usize, OspiError> {
        let driver = self.driver;
        let mut inner = driver.initialised()?;
        if buf.is_empty() {
            return Err(inner.reject(OspiError::Params));
        }
        self.require(&mut inner, Op::Read, OspiState::Opened)?;
        let addr = self.window(&mut inner, offset, buf.len())?;

        let got = match inner.flash.read(addr, buf) {
            Ok(n) => n.min(buf.len()),
            Err(e) => return Err(inner.flash_failed(Op::Read, e)),
        };
        if self.debug_print {
            ringbuf_entry!(
                inner.trace,
                Trace::Read {
                    addr,
                    len: buf.len() as u32,
                    got: got as u32,
                }
            );
        }

        inner.stats.incr_stat(Stat::Read);
        Ok(got)
    }

    fn do_ioctl(
        &mut self,
        option: u32,
        value: Option<&mut u32>,
    ) -> Result<(), OspiError> {
        let driver = self.driver;
        let mut inner = driver.initialised()?;

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
            match OspiIoctl::from_u32(option) {
                Some(OspiIoctl::GetProgress) => {
                    let Some(value) = value else {
                        return Err(inner.reject(OspiError::Params));
                    };
                    match inner.flash.progress() {
                        Ok(pct) => *value = u32::from(pct.min(100)),
                        Err(e) => {
                            return Err(inner.flash_failed(Op::Progress, e))
                        }
                    }
                }
                None => {
                    return Err(inner.reject(OspiError::UnrecognisedOption))
                }
            }
        }

        inner.stats.incr_stat(Stat::IoCtrl);
        Ok(())
    }

    fn do_bind(&mut self, cb: RaiseEvent) -> Result<(), OspiError> {
        let driver = self.driver;
        let mut inner = driver.initialised()?;
        self.hook.bind(cb);
        inner.stats.incr_stat(Stat::BindCallback);
        Ok(())
    }

    /// Converts to the wire status, raising an error event for hardware
    /// failures. Runs after the driver lock has been released.
    fn finish<T>(&self, r: Result<T, OspiError>) -> Result<T, FwIfStatus> {
        r.map_err(|e| {
            let status = FwIfStatus::from(e);
            if e == OspiError::DriverFailure {
                self.hook.raise_error(status);
            }
            status
        })
    }
}

impl<F: OspiFlash> FwIf for Ospi<'_, F> {
    fn open(&mut self) -> Result<(), FwIfStatus> {
        let r = self.do_open();
        self.finish(r)
    }

    fn close(&mut self) -> Result<(), FwIfStatus> {
        let r = self.do_close();
        self.finish(r)
    }

    /// `timeout_ms` is advisory: the flash controller call blocks until the
    /// part reports completion.
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

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The FW_IF contract
//!
//! Every hardware backend (flash, muxed I2C devices, ...) is driven through
//! the same six operations of [`FwIf`], so upstream code can hold a
//! `&mut dyn FwIf` and never learn which backend it is talking to.
//!
//! # Status codes
//!
//! Operations fail with a [`FwIfStatus`], a raw `u32`. The common codes of
//! [`FwIfError`] occupy `1..MAX_FW_IF_ERROR`; each backend numbers its own
//! extra codes from [`MAX_FW_IF_ERROR`] upward. A caller that only knows the
//! common set can still interpret any status through
//! [`FwIfStatus::common`], and a caller that knows the backend can convert
//! the status into that backend's own error type.
//!
//! Ioctl options follow the same layout: [`CommonIoctl`] below
//! [`MAX_COMMON_IOCTL`], backend options from there on.
//!
//! # Driver classes and handles
//!
//! A backend is a driver-class value owned by the board wiring. It is
//! initialised once, then hands out one handle per physical device; the
//! handle borrows the driver class and implements [`FwIf`]. Because a handle
//! can only come from its driver class, there is nothing to check for
//! corrupted or foreign handles at run time.

#![cfg_attr(not(test), no_std)]

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use static_assertions::const_assert_eq;

mod stats;

pub use stats::Statistics;

/// Return immediately if the operation cannot complete.
pub const TIMEOUT_NO_WAIT: u32 = 0;
/// Block until the operation completes.
pub const TIMEOUT_WAIT_FOREVER: u32 = u32::MAX;

/// Errors common to every backend. Success (`NONE`, zero) is `Ok`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u32)]
pub enum FwIfError {
    Params = 1,
    InvalidHandle = 2,
    InvalidCfg = 3,
    UnrecognisedOption = 4,
    DriverInUse = 5,
    DriverNotInitialised = 6,
    DriverRxMode = 7,
    Timeout = 8,
    Binding = 9,
    Open = 10,
    Close = 11,
    Write = 12,
    Read = 13,
    Ioctrl = 14,
}

/// First status code available to a backend's own error type.
pub const MAX_FW_IF_ERROR: u32 = 15;
const_assert_eq!(MAX_FW_IF_ERROR, FwIfError::Ioctrl as u32 + 1);

/// The raw status carried by every failed FW_IF operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct FwIfStatus(pub u32);

impl FwIfStatus {
    pub const NONE: Self = Self(0);

    pub const fn code(self) -> u32 {
        self.0
    }

    /// Interprets the status as a common error, if it is one.
    pub fn common(self) -> Option<FwIfError> {
        FwIfError::from_u32(self.0)
    }

    /// Whether the status lies in a backend's extended range.
    pub const fn is_extended(self) -> bool {
        self.0 >= MAX_FW_IF_ERROR
    }
}

impl From<FwIfError> for FwIfStatus {
    fn from(e: FwIfError) -> Self {
        Self(e as u32)
    }
}

impl From<FwIfStatus> for u32 {
    fn from(s: FwIfStatus) -> Self {
        s.0
    }
}

impl core::fmt::Display for FwIfStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.common() {
            Some(e) => write!(f, "{e:?} ({})", self.0),
            None => write!(f, "status {}", self.0),
        }
    }
}

/// Ioctl options understood by every backend.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u32)]
pub enum CommonIoctl {
    FlushTx = 0,
    FlushRx = 1,
    GetRxMode = 2,
    EnableDebugPrint = 3,
    DisableDebugPrint = 4,
}

/// First option code available to a backend's own ioctls.
pub const MAX_COMMON_IOCTL: u32 = 5;
const_assert_eq!(MAX_COMMON_IOCTL, CommonIoctl::DisableDebugPrint as u32 + 1);

/// Event ids common to every backend.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u16)]
pub enum CommonEvent {
    NewRxData = 0,
    NewTxComplete = 1,
    Warning = 2,
    Error = 3,
}

pub const MAX_COMMON_EVENT: u16 = 4;

/// How a backend delivers received data.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u32)]
pub enum RxMode {
    Polling = 0x01,
    Event = 0x02,
}

/// Event-raising callback: an event id and its payload bytes.
pub type RaiseEvent = fn(u16, &[u8]) -> Result<(), FwIfStatus>;

/// The callback slot of a handle. Binding overwrites; there is no unbind.
#[derive(Copy, Clone, Debug, Default)]
pub struct EventHook(Option<RaiseEvent>);

impl EventHook {
    pub fn bind(&mut self, cb: RaiseEvent) {
        self.0 = Some(cb);
    }

    pub fn is_bound(&self) -> bool {
        self.0.is_some()
    }

    /// Invokes the bound callback, if any.
    pub fn raise(&self, event: u16, data: &[u8]) -> Result<(), FwIfStatus> {
        match self.0 {
            Some(cb) => cb(event, data),
            None => Ok(()),
        }
    }

    /// Raises [`CommonEvent::Error`] carrying `status` as little-endian
    /// bytes. The callback's own result is dropped: the operation has
    /// already failed with `status`.
    pub fn raise_error(&self, status: FwIfStatus) {
        let _ = self.raise(CommonEvent::Error as u16, &status.0.to_le_bytes());
    }
}

/// The operations every FW_IF backend provides.
///
/// `port` is a backend-defined offset or port number. `timeout_ms` is
/// accepted everywhere but is advisory: a backend only honours it where its
/// transport can. [`TIMEOUT_NO_WAIT`] and [`TIMEOUT_WAIT_FOREVER`] are the
/// conventional extremes.
pub trait FwIf {
    fn open(&mut self) -> Result<(), FwIfStatus>;

    fn close(&mut self) -> Result<(), FwIfStatus>;

    fn write(
        &mut self,
        port: u64,
        data: &[u8],
        timeout_ms: u32,
    ) -> Result<(), FwIfStatus>;

    /// Reads up to `buf.len()` bytes, returning how many were obtained.
    fn read(
        &mut self,
        port: u64,
        buf: &mut [u8],
        timeout_ms: u32,
    ) -> Result<usize, FwIfStatus>;

    /// Performs `option`. Options that produce a value write it through
    /// `value`.
    fn ioctl(
        &mut self,
        option: u32,
        value: Option<&mut u32>,
    ) -> Result<(), FwIfStatus>;

    fn bind_callback(&mut self, cb: RaiseEvent) -> Result<(), FwIfStatus>;
}

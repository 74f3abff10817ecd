// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! OSPI flash controller interface used by the OSPI FW_IF driver.

#![no_std]

use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};

/// Size in bytes of a single page of data (the largest unit the controller
/// programs in one command).
///
/// This value is really a property of the flash we're talking to and not this
/// interface, but it's correct for all our current parts.
pub const PAGE_SIZE_BYTES: usize = 256;

/// Size in bytes of the smallest erasable unit.
pub const SUBSECTOR_SIZE_BYTES: usize = 4096;

/// Size in bytes of a single sector of data.
pub const SECTOR_SIZE_BYTES: usize = 65_536;

/// Parameters handed to the controller once at bring-up.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FlashInitCfg {
    pub device_id: u8,
    pub page_size: u16,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u32)]
pub enum FlashError {
    /// Controller or part failed to come up
    Init = 1,
    /// A previous long-running operation is still in flight
    Busy = 2,
    /// The part did not report completion in time
    Timeout = 3,
    Erase = 4,
    Program = 5,
    Read = 6,
}

/// Blocking access to an OSPI flash part. Addresses are absolute flash
/// addresses; callers are responsible for windowing.
pub trait OspiFlash {
    fn init(&mut self, cfg: FlashInitCfg) -> Result<(), FlashError>;

    /// Erases every erase unit that overlaps `addr..addr + len`.
    fn erase(&mut self, addr: u32, len: u32) -> Result<(), FlashError>;

    /// Reads into `buf`, returning how many bytes were actually obtained.
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<usize, FlashError>;

    /// Programs `data`, splitting at page boundaries as needed.
    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError>;

    /// Percentage (0 to 100) of the in-flight erase or program operation.
    fn progress(&mut self) -> Result<u8, FlashError>;
}

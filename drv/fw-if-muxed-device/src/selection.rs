// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scoped mux selection.

use core::ops::{Deref, DerefMut};

use drv_i2c_api::{I2cBus, ResponseCode};
use drv_i2c_devices::pca954x::{ControlRegister, Pca954x};

use crate::{Inner, Trace};

/// Exclusive use of the bus while a device path is switched in.
///
/// Unless [`MuxSelection::keep`] is called, the selected mux is put back on
/// the way out: first to `restore`, if given, then fully deselected. The
/// final deselect is attempted even when the restore write fails. Dropping
/// the guard (an early `?` return, say) runs the same cleanup and discards
/// its result.
pub(crate) struct MuxSelection<'a, B: I2cBus, D> {
    inner: &'a mut Inner<B, D>,
    mux: Pca954x,
    restore: Option<ControlRegister>,
    armed: bool,
}

impl<'a, B: I2cBus, D> MuxSelection<'a, B, D> {
    pub fn new(
        inner: &'a mut Inner<B, D>,
        mux: Pca954x,
        restore: Option<ControlRegister>,
    ) -> Self {
        Self {
            inner,
            mux,
            restore,
            armed: true,
        }
    }

    /// Runs the cleanup now, reporting the first failure.
    pub fn release(mut self) -> Result<(), ResponseCode> {
        self.cleanup()
    }

    /// Leaves the mux as it is.
    pub fn keep(mut self) {
        self.armed = false;
    }

    fn cleanup(&mut self) -> Result<(), ResponseCode> {
        self.armed = false;
        let restored = match self.restore {
            Some(reg) => self.mux.select(&mut *self.inner, reg),
            None => Ok(()),
        };
        let deselected = self.mux.deselect(&mut *self.inner);
        let r = restored.and(deselected);
        if r.is_err() {
            self.inner.note(Trace::CleanupFailed {
                mux: self.mux.device().address,
            });
        }
        r
    }
}

impl<B: I2cBus, D> Deref for MuxSelection<'_, B, D> {
    type Target = Inner<B, D>;

    fn deref(&self) -> &Self::Target {
        self.inner
    }
}

impl<B: I2cBus, D> DerefMut for MuxSelection<'_, B, D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner
    }
}

impl<B: I2cBus, D> Drop for MuxSelection<'_, B, D> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.cleanup();
        }
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-driver-class event counters.

use core::fmt;
use enum_map::{EnumArray, EnumMap};

/// Two counter tables, one for things that happened and one for things that
/// went wrong. Counts wrap rather than saturate.
pub struct Statistics<S: EnumArray<u32>, E: EnumArray<u32>> {
    stats: EnumMap<S, u32>,
    errors: EnumMap<E, u32>,
}

impl<S: EnumArray<u32>, E: EnumArray<u32>> Statistics<S, E> {
    pub fn new() -> Self {
        Self {
            stats: EnumMap::default(),
            errors: EnumMap::default(),
        }
    }

    pub fn incr_stat(&mut self, stat: S) {
        let c = &mut self.stats[stat];
        *c = c.wrapping_add(1);
    }

    pub fn incr_error(&mut self, error: E) {
        let c = &mut self.errors[error];
        *c = c.wrapping_add(1);
    }

    pub fn stat(&self, stat: S) -> u32 {
        self.stats[stat]
    }

    pub fn error(&self, error: E) -> u32 {
        self.errors[error]
    }

    pub fn clear(&mut self) {
        self.stats.clear();
        self.errors.clear();
    }
}

impl<S: EnumArray<u32>, E: EnumArray<u32>> Default for Statistics<S, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, E> Clone for Statistics<S, E>
where
    S: EnumArray<u32>,
    E: EnumArray<u32>,
    EnumMap<S, u32>: Clone,
    EnumMap<E, u32>: Clone,
{
    fn clone(&self) -> Self {
        Self {
            stats: self.stats.clone(),
            errors: self.errors.clone(),
        }
    }
}

impl<S, E> fmt::Display for Statistics<S, E>
where
    S: EnumArray<u32> + fmt::Debug,
    E: EnumArray<u32> + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Statistics:")?;
        for (stat, count) in self.stats.iter() {
            writeln!(f, "  {stat:?} . . . . {count}")?;
        }
        writeln!(f, "Errors:")?;
        for (error, count) in self.errors.iter() {
            writeln!(f, "  {error:?} . . . . {count}")?;
        }
        Ok(())
    }
}

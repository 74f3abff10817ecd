// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring buffer for tracing FW_IF drivers
//!
//! Each driver class owns a [`Ringbuf`] as a plain field next to the rest of
//! its state, rather than a process-wide static, so the buffer lives and dies
//! with the driver value and sits behind the same lock.
//!
//! ## Constraints
//!
//! The type in the ring buffer must implement both `Copy` and `PartialEq`.
//!
//! ## Recording entries
//!
//! ```
//! let mut trace = Ringbuf::<Trace, 16>::new(Trace::None);
//! ringbuf_entry!(trace, Trace::Opened { device: 3 });
//! ```
//!
//! An entry with the same source line and payload as the most recent entry
//! bumps that entry's `count` instead of consuming a new slot, so a retry loop
//! or a polling path does not flush out the interesting history.
//!
//! ## Inspecting
//!
//! [`Ringbuf::iter`] walks the recorded entries from oldest to newest, which
//! is what a debug console dump wants. The buffer derives `Debug`, so a
//! debugger can print the raw structure directly as well.

#![cfg_attr(not(test), no_std)]

/// Inserts `payload` into the ring buffer `buf`, stamping it with the line of
/// the invocation.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate both buf and payload, without letting them access each
        // other, by evaluating them in a tuple where each cannot
        // accidentally use the other's binding.
        let (p, buf) = ($payload, &mut $buf);
        $crate::Ringbuf::entry(buf, line!() as u16, p);
    }};
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let _ = &$buf;
        let _ = &$payload;
    }};
}

///
/// The structure of a single [`Ringbuf`] entry, carrying a payload of arbitrary
/// type.  When a ring buffer entry is generated with an identical payload to
/// the most recent entry (in terms of both `line` and `payload`), `count` will
/// be incremented rather than generating a new entry.
///
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

///
/// A ring buffer of parametrized type and size.
///
#[derive(Debug, Clone)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    last: Option<usize>,
    buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, { N }> {
    /// Makes an empty ring buffer whose slots all hold `init`.
    pub const fn new(init: T) -> Self {
        Self {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: init,
            }; N],
        }
    }

    pub fn entry(&mut self, line: u16, payload: T) {
        // On the very first entry `last` is None; treating it as an
        // out-of-range index makes the lookup below miss and the wrap logic
        // land on slot 0.
        let last = self.last.unwrap_or(usize::MAX);

        if let Some(ent) = self.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                // Only reuse this entry if we don't overflow the count.
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        let ndx = {
            let last_plus_1 = last.wrapping_add(1);
            if last_plus_1 >= self.buffer.len() {
                0
            } else {
                last_plus_1
            }
        };

        let Some(ent) = self.buffer.get_mut(ndx) else {
            // Zero-sized buffer: nothing to record into.
            return;
        };
        *ent = RingbufEntry {
            line,
            payload,
            count: 1,
            // Zero marks a slot that was never written.
            generation: ent.generation.checked_add(1).unwrap_or(1),
        };

        self.last = Some(ndx);
    }

    /// Returns the most recently recorded entry.
    pub fn last(&self) -> Option<&RingbufEntry<T>> {
        self.last.and_then(|ndx| self.buffer.get(ndx))
    }

    /// Walks recorded entries from oldest to newest. Slots that have never
    /// been written are skipped.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let start = match self.last {
            Some(last) => last + 1,
            None => N,
        };
        self.buffer[start.min(N)..]
            .iter()
            .chain(self.buffer[..start.min(N)].iter())
            .filter(|ent| ent.generation != 0)
    }

    /// Forgets every recorded entry.
    pub fn clear(&mut self) {
        for ent in self.buffer.iter_mut() {
            ent.line = 0;
            ent.count = 0;
            ent.generation = 0;
        }
        self.last = None;
    }
}

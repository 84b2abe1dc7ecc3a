/*!
 * Stream Channel
 * One direction of an in-process stream connection, backed by a ring buffer
 */

use crate::substrate::errors::{PalError, PalResult};
use parking_lot::{Condvar, Mutex};
use ringbuf::{traits::*, HeapRb};
use std::io::{IoSlice, IoSliceMut};
use std::time::{Duration, Instant};

struct ChannelState {
    ring: HeapRb<u8>,
    /// Writer shut down; readers see EOF once drained
    write_closed: bool,
    /// Reader gone; writers get a broken pipe
    read_closed: bool,
}

/// Bounded byte channel with blocking and non-blocking transfer
pub(super) struct Channel {
    state: Mutex<ChannelState>,
    readable: Condvar,
    writable: Condvar,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Channel")
            .field("buffered_bytes", &state.ring.occupied_len())
            .field("capacity", &state.ring.capacity().get())
            .field("write_closed", &state.write_closed)
            .field("read_closed", &state.read_closed)
            .finish()
    }
}

fn deadline_after(timeout_us: u64) -> Option<Instant> {
    if timeout_us == 0 {
        None
    } else {
        Some(Instant::now() + Duration::from_micros(timeout_us))
    }
}

impl Channel {
    pub(super) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(ChannelState {
                ring: HeapRb::<u8>::new(capacity),
                write_closed: false,
                read_closed: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    /// Gather `iov` into the ring; may transfer fewer bytes than requested
    pub(super) fn write(
        &self,
        iov: &[IoSlice<'_>],
        nonblocking: bool,
        timeout_us: u64,
    ) -> PalResult<usize> {
        let total: usize = iov.iter().map(|slice| slice.len()).sum();
        let deadline = deadline_after(timeout_us);
        let mut state = self.state.lock();

        loop {
            if state.read_closed || state.write_closed {
                return Err(PalError::ConnFailedPipe);
            }
            if total == 0 || state.ring.vacant_len() > 0 {
                break;
            }
            if nonblocking {
                return Err(PalError::TryAgain);
            }
            match deadline {
                Some(deadline) => {
                    if self.writable.wait_until(&mut state, deadline).timed_out() {
                        return Err(PalError::TryAgain);
                    }
                }
                None => self.writable.wait(&mut state),
            }
        }

        let mut written = 0;
        for slice in iov {
            let pushed = state.ring.push_slice(slice);
            written += pushed;
            if pushed < slice.len() {
                break;
            }
        }

        if written > 0 {
            self.readable.notify_all();
        }
        Ok(written)
    }

    /// Scatter buffered bytes into `iov`; returns 0 at end of stream
    pub(super) fn read(
        &self,
        iov: &mut [IoSliceMut<'_>],
        nonblocking: bool,
        timeout_us: u64,
    ) -> PalResult<usize> {
        let total: usize = iov.iter().map(|slice| slice.len()).sum();
        let deadline = deadline_after(timeout_us);
        let mut state = self.state.lock();

        loop {
            if total == 0 || !state.ring.is_empty() {
                break;
            }
            if state.write_closed || state.read_closed {
                return Ok(0);
            }
            if nonblocking {
                return Err(PalError::TryAgain);
            }
            match deadline {
                Some(deadline) => {
                    if self.readable.wait_until(&mut state, deadline).timed_out() {
                        return Err(PalError::TryAgain);
                    }
                }
                None => self.readable.wait(&mut state),
            }
        }

        let mut read = 0;
        for slice in iov.iter_mut() {
            let popped = state.ring.pop_slice(slice);
            read += popped;
            if popped < slice.len() {
                break;
            }
        }

        if read > 0 {
            self.writable.notify_all();
        }
        Ok(read)
    }

    pub(super) fn pending(&self) -> usize {
        self.state.lock().ring.occupied_len()
    }

    pub(super) fn close_write(&self) {
        self.state.lock().write_closed = true;
        self.readable.notify_all();
        self.writable.notify_all();
    }

    pub(super) fn close_read(&self) {
        let mut state = self.state.lock();
        state.read_closed = true;
        state.ring.clear();
        drop(state);
        self.readable.notify_all();
        self.writable.notify_all();
    }
}

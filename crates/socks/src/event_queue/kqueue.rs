use super::{EventNotification, EventQueue, NotificationErrors};
use crate::utils::retry_interrupted;
use crate::{FileDescriptor, Interest, SocketError};

use libc::{EV_ADD, EV_DELETE, EV_ENABLE, EV_EOF, EV_ERROR, EVFILT_READ, EVFILT_USER, EVFILT_WRITE, c_int, kevent};
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, trace};

/// Identifier of the user event that interrupts a blocked wait.
const WAKE_IDENT: usize = 0;

/// kqueue backend. Each interest bit is one filter, so a registration change
/// is a list of `EV_ADD` / `EV_DELETE` changes for the affected filters.
#[derive(Debug)]
pub struct KQueueEventQueue {
    max_events: usize,
    kqueue: AtomicI32,
    closed: AtomicBool,
    existing: Mutex<HashMap<FileDescriptor, Interest>>,
}

impl KQueueEventQueue {
    pub fn new(max_events: usize) -> Self {
        Self {
            max_events: max_events.max(1),
            kqueue: AtomicI32::new(-1),
            closed: AtomicBool::new(false),
            existing: Mutex::new(HashMap::new()),
        }
    }

    fn kqueue(&self) -> Result<RawFd, SocketError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SocketError::Cancelled);
        }
        match self.kqueue.load(Ordering::Acquire) {
            -1 => Err(SocketError::NotReady),
            fd => Ok(fd),
        }
    }

    fn change(ident: usize, filter: i16, flags: u16, fflags: u32) -> kevent {
        // SAFETY: all-zero bytes are a valid `kevent`.
        let mut event: kevent = unsafe { std::mem::zeroed() };
        event.ident = ident as _;
        event.filter = filter as _;
        event.flags = flags as _;
        event.fflags = fflags as _;
        event
    }

    fn submit(kqueue: RawFd, changes: &[kevent]) -> Result<(), SocketError> {
        if changes.is_empty() {
            return Ok(());
        }
        // SAFETY: `changes` is valid for `changes.len()` entries, no events are returned.
        let result = unsafe {
            libc::kevent(kqueue, changes.as_ptr(), changes.len() as _, ptr::null_mut(), 0, ptr::null())
        };
        if result < 0 {
            return Err(SocketError::make_failed("kevent"));
        }
        Ok(())
    }

    fn changes(file: FileDescriptor, interest: Interest, flags: u16) -> Vec<kevent> {
        let mut changes = Vec::with_capacity(2);
        if interest.is_readable() {
            changes.push(Self::change(file.raw() as usize, EVFILT_READ, flags, 0));
        }
        if interest.is_writable() {
            changes.push(Self::change(file.raw() as usize, EVFILT_WRITE, flags, 0));
        }
        changes
    }

    fn make_notification(&self, event: &kevent) -> Option<EventNotification> {
        let file = FileDescriptor::new(event.ident as RawFd);
        let flags = event.flags as u16;

        let ready = match event.filter as i16 {
            EVFILT_READ => Interest::READ,
            EVFILT_WRITE => Interest::WRITE,
            _ => return None,
        };
        // pending bytes are delivered before end of file
        let has_data = ready.is_readable() && event.data > 0;
        let errors = NotificationErrors {
            end_of_file: !has_data && flags & EV_EOF != 0,
            error: !has_data && flags & EV_ERROR != 0,
        };

        let existing = self.existing.lock().unwrap_or_else(PoisonError::into_inner);
        let registered = existing.get(&file).copied().unwrap_or_default();
        registered.intersects(ready).then(|| EventNotification::with_errors(file, ready, errors))
    }
}

impl EventQueue for KQueueEventQueue {
    fn open(&self) -> Result<(), SocketError> {
        if self.kqueue.load(Ordering::Acquire) >= 0 {
            return Ok(());
        }
        // SAFETY: no pointer arguments.
        let kqueue = unsafe { libc::kqueue() };
        if kqueue < 0 {
            return Err(SocketError::make_failed("kqueue"));
        }
        let wake = Self::change(WAKE_IDENT, EVFILT_USER, EV_ADD | EV_ENABLE | libc::EV_CLEAR, 0);
        if let Err(error) = Self::submit(kqueue, &[wake]) {
            // SAFETY: `kqueue` was created above and is not shared yet.
            unsafe { libc::close(kqueue) };
            return Err(error);
        }
        self.kqueue.store(kqueue, Ordering::Release);
        debug!(kqueue, "opened kqueue event queue");
        Ok(())
    }

    fn add_events(&self, file: FileDescriptor, interest: Interest) -> Result<(), SocketError> {
        let kqueue = self.kqueue()?;
        let mut existing = self.existing.lock().unwrap_or_else(PoisonError::into_inner);
        let from = existing.get(&file).copied().unwrap_or_default();
        let added = interest - from;
        Self::submit(kqueue, &Self::changes(file, added, EV_ADD | EV_ENABLE))?;
        existing.insert(file, from | interest);
        trace!(fd = %file, interest = %(from | interest), "kqueue registration grown");
        Ok(())
    }

    fn remove_events(&self, file: FileDescriptor, interest: Interest) -> Result<(), SocketError> {
        let kqueue = self.kqueue()?;
        let mut existing = self.existing.lock().unwrap_or_else(PoisonError::into_inner);
        let from = existing.get(&file).copied().unwrap_or_default();
        let removed = interest & from;
        if let Err(error) = Self::submit(kqueue, &Self::changes(file, removed, EV_DELETE)) {
            // closing a descriptor drops its filters
            if !matches!(error, SocketError::Failed { errno: libc::ENOENT | libc::EBADF, .. }) {
                return Err(error);
            }
        }
        let to = from - interest;
        if to.is_empty() {
            existing.remove(&file);
        } else {
            existing.insert(file, to);
        }
        trace!(fd = %file, interest = %to, "kqueue registration shrunk");
        Ok(())
    }

    fn get_notifications(&self) -> Result<Vec<EventNotification>, SocketError> {
        let kqueue = self.kqueue()?;
        // SAFETY: all-zero bytes are a valid `kevent`.
        let mut events = vec![unsafe { std::mem::zeroed::<kevent>() }; self.max_events];
        let count = retry_interrupted(|| {
            // SAFETY: `events` has room for `events.len()` entries; a null timeout blocks.
            unsafe {
                libc::kevent(kqueue, ptr::null(), 0, events.as_mut_ptr(), events.len() as c_int, ptr::null()) as isize
            }
        })
        .map_err(|e| SocketError::from_io("kevent", &e))?;

        if self.closed.load(Ordering::Acquire) {
            return Err(SocketError::Cancelled);
        }

        Ok(events[..count as usize].iter().filter_map(|event| self.make_notification(event)).collect())
    }

    fn close(&self) -> Result<(), SocketError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let kqueue = self.kqueue.load(Ordering::Acquire);
        if kqueue >= 0 {
            let trigger = Self::change(WAKE_IDENT, EVFILT_USER, 0, libc::NOTE_TRIGGER);
            Self::submit(kqueue, &[trigger])?;
        }
        debug!("closed kqueue event queue");
        Ok(())
    }
}

impl Drop for KQueueEventQueue {
    fn drop(&mut self) {
        let kqueue = self.kqueue.load(Ordering::Acquire);
        if kqueue >= 0 {
            // SAFETY: the queue owns the descriptor and nothing else can use it now.
            unsafe { libc::close(kqueue) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_queue::tests::check_backend;

    #[test]
    fn kqueue_backend() {
        check_backend(&KQueueEventQueue::new(8));
    }
}

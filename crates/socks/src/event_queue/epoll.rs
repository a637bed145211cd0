use super::{EventNotification, EventQueue, NotificationErrors};
use crate::utils::retry_interrupted;
use crate::{FileDescriptor, Interest, SocketError};

use libc::{EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLPRI, EPOLLRDHUP, c_int, epoll_event};
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, trace};

/// `epoll_event.u64` of the wake-up eventfd.
const WAKE_TOKEN: u64 = u64::MAX;

/// Level triggered epoll backend.
///
/// The union registered for each descriptor is mirrored in `existing`, which
/// decides between `EPOLL_CTL_ADD`, `EPOLL_CTL_MOD` and `EPOLL_CTL_DEL`.
#[derive(Debug)]
pub struct EPollEventQueue {
    max_events: usize,
    epoll: AtomicI32,
    wake: AtomicI32,
    closed: AtomicBool,
    existing: Mutex<HashMap<FileDescriptor, Interest>>,
}

impl EPollEventQueue {
    pub fn new(max_events: usize) -> Self {
        Self {
            max_events: max_events.max(1),
            epoll: AtomicI32::new(-1),
            wake: AtomicI32::new(-1),
            closed: AtomicBool::new(false),
            existing: Mutex::new(HashMap::new()),
        }
    }

    fn epoll(&self) -> Result<RawFd, SocketError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SocketError::Cancelled);
        }
        match self.epoll.load(Ordering::Acquire) {
            -1 => Err(SocketError::NotReady),
            fd => Ok(fd),
        }
    }

    fn control(epoll: RawFd, op: c_int, file: RawFd, interest: Interest, token: u64) -> Result<(), SocketError> {
        let mut event = epoll_event { events: Self::flags(interest), u64: token };
        // SAFETY: `event` is a valid epoll_event for the duration of the call.
        if unsafe { libc::epoll_ctl(epoll, op, file, &raw mut event) } < 0 {
            return Err(SocketError::make_failed("epoll_ctl"));
        }
        Ok(())
    }

    /// `EPOLLRDHUP` only matters to readers: a peer that shut down its write
    /// side can still be written to.
    fn flags(interest: Interest) -> u32 {
        let mut flags = 0;
        if interest.is_readable() {
            flags |= EPOLLIN | EPOLLRDHUP;
        }
        if interest.is_writable() {
            flags |= EPOLLOUT;
        }
        flags as u32
    }

    fn update(&self, file: FileDescriptor, from: Interest, to: Interest) -> Result<(), SocketError> {
        let epoll = self.epoll()?;
        if from == to {
            return Ok(());
        }
        if to.is_empty() {
            // SAFETY: a null event is allowed for EPOLL_CTL_DEL.
            let result = unsafe { libc::epoll_ctl(epoll, libc::EPOLL_CTL_DEL, file.raw(), std::ptr::null_mut()) };
            if result < 0 {
                let error = std::io::Error::last_os_error();
                // the descriptor may already have been closed, which deregisters it
                if !matches!(error.raw_os_error(), Some(libc::ENOENT | libc::EBADF)) {
                    return Err(SocketError::from_io("epoll_ctl", &error));
                }
            }
            return Ok(());
        }
        let op = if from.is_empty() { libc::EPOLL_CTL_ADD } else { libc::EPOLL_CTL_MOD };
        Self::control(epoll, op, file.raw(), to, file.raw() as u64)
    }

    fn drain_wake(&self) {
        let wake = self.wake.load(Ordering::Acquire);
        let mut value: u64 = 0;
        // SAFETY: `value` is 8 writable bytes as eventfd requires.
        unsafe {
            libc::read(wake, (&raw mut value).cast::<libc::c_void>(), size_of::<u64>());
        }
    }

    fn make_notification(&self, event: &epoll_event) -> Option<EventNotification> {
        let token = event.u64;
        let flags = event.events as c_int;
        let file = FileDescriptor::new(token as RawFd);

        let mut ready = Interest::NONE;
        if flags & EPOLLIN != 0 {
            ready |= Interest::READ;
        }
        if flags & EPOLLOUT != 0 {
            ready |= Interest::WRITE;
        }
        let errors = NotificationErrors {
            end_of_file: flags & (EPOLLHUP | EPOLLRDHUP) != 0,
            error: flags & (EPOLLERR | EPOLLPRI) != 0,
        };

        let existing = self.existing.lock().unwrap_or_else(PoisonError::into_inner);
        let registered = existing.get(&file).copied().unwrap_or_default();
        EventNotification::normalized(file, ready, errors, registered)
    }
}

impl EventQueue for EPollEventQueue {
    fn open(&self) -> Result<(), SocketError> {
        if self.epoll.load(Ordering::Acquire) >= 0 {
            return Ok(());
        }
        // SAFETY: no pointer arguments.
        let epoll = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(SocketError::make_failed("epoll_create1"));
        }
        // SAFETY: no pointer arguments.
        let wake = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if wake < 0 {
            let error = SocketError::make_failed("eventfd");
            // SAFETY: `epoll` was created above and is not shared yet.
            unsafe { libc::close(epoll) };
            return Err(error);
        }
        Self::control(epoll, libc::EPOLL_CTL_ADD, wake, Interest::READ, WAKE_TOKEN)?;
        self.wake.store(wake, Ordering::Release);
        self.epoll.store(epoll, Ordering::Release);
        debug!(epoll, "opened epoll event queue");
        Ok(())
    }

    fn add_events(&self, file: FileDescriptor, interest: Interest) -> Result<(), SocketError> {
        let mut existing = self.existing.lock().unwrap_or_else(PoisonError::into_inner);
        let from = existing.get(&file).copied().unwrap_or_default();
        let to = from | interest;
        self.update(file, from, to)?;
        existing.insert(file, to);
        trace!(fd = %file, interest = %to, "epoll registration grown");
        Ok(())
    }

    fn remove_events(&self, file: FileDescriptor, interest: Interest) -> Result<(), SocketError> {
        let mut existing = self.existing.lock().unwrap_or_else(PoisonError::into_inner);
        let from = existing.get(&file).copied().unwrap_or_default();
        let to = from - interest;
        self.update(file, from, to)?;
        if to.is_empty() {
            existing.remove(&file);
        } else {
            existing.insert(file, to);
        }
        trace!(fd = %file, interest = %to, "epoll registration shrunk");
        Ok(())
    }

    fn get_notifications(&self) -> Result<Vec<EventNotification>, SocketError> {
        let epoll = self.epoll()?;
        // SAFETY: all-zero bytes are a valid `epoll_event`.
        let mut events = vec![unsafe { std::mem::zeroed::<epoll_event>() }; self.max_events];
        let count = retry_interrupted(|| {
            // SAFETY: `events` has room for `events.len()` entries.
            unsafe { libc::epoll_wait(epoll, events.as_mut_ptr(), events.len() as c_int, -1) as isize }
        })
        .map_err(|e| SocketError::from_io("epoll_wait", &e))?;

        if self.closed.load(Ordering::Acquire) {
            return Err(SocketError::Cancelled);
        }

        let mut notifications = Vec::with_capacity(count as usize);
        for event in &events[..count as usize] {
            if event.u64 == WAKE_TOKEN {
                self.drain_wake();
                continue;
            }
            notifications.extend(self.make_notification(event));
        }
        Ok(notifications)
    }

    fn close(&self) -> Result<(), SocketError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let wake = self.wake.load(Ordering::Acquire);
        if wake >= 0 {
            let value: u64 = 1;
            // SAFETY: `value` is 8 readable bytes as eventfd requires.
            unsafe {
                libc::write(wake, (&raw const value).cast::<libc::c_void>(), size_of::<u64>());
            }
        }
        debug!("closed epoll event queue");
        Ok(())
    }
}

impl Drop for EPollEventQueue {
    fn drop(&mut self) {
        for fd in [self.epoll.load(Ordering::Acquire), self.wake.load(Ordering::Acquire)] {
            if fd >= 0 {
                // SAFETY: the queue owns both descriptors and nothing else can use them now.
                unsafe { libc::close(fd) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_queue::tests::check_backend;

    #[test]
    fn epoll_backend() {
        check_backend(&EPollEventQueue::new(8));
    }

    #[test]
    fn registration_mirrors_union() {
        let queue = EPollEventQueue::new(8);
        queue.open().unwrap();
        let (left, right) = crate::Socket::pair().unwrap();

        queue.add_events(right.file(), Interest::READ).unwrap();
        queue.add_events(right.file(), Interest::WRITE).unwrap();
        assert_eq!(queue.existing.lock().unwrap().get(&right.file()), Some(&Interest::READ_WRITE));

        queue.remove_events(right.file(), Interest::WRITE).unwrap();
        assert_eq!(queue.existing.lock().unwrap().get(&right.file()), Some(&Interest::READ));

        queue.remove_events(right.file(), Interest::READ).unwrap();
        assert!(queue.existing.lock().unwrap().is_empty());

        left.close().unwrap();
        right.close().unwrap();
    }

    #[test]
    fn read_hangup_is_registered_for_readers_only() {
        assert_eq!(EPollEventQueue::flags(Interest::READ), (EPOLLIN | EPOLLRDHUP) as u32);
        assert_eq!(EPollEventQueue::flags(Interest::WRITE), EPOLLOUT as u32);
        assert_eq!(EPollEventQueue::flags(Interest::READ_WRITE), (EPOLLIN | EPOLLRDHUP | EPOLLOUT) as u32);
    }

    #[test]
    fn unopened_queue_is_not_ready() {
        let queue = EPollEventQueue::new(8);
        assert_eq!(queue.get_notifications().unwrap_err(), SocketError::NotReady);
    }
}

use super::{EventNotification, EventQueue, NotificationErrors};
use crate::{FileDescriptor, Interest, SocketError};

use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, c_int, pollfd};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, trace};

/// Portable `poll(2)` backend.
///
/// `poll` keeps no kernel side state, so the registration table is snapshotted
/// into a fresh `pollfd` array for every wait. A wait lasts at most `interval`,
/// which also bounds how long a registration made during a wait goes unnoticed.
#[derive(Debug)]
pub struct PollEventQueue {
    interval: Duration,
    opened: AtomicBool,
    closed: AtomicBool,
    entries: Mutex<HashMap<FileDescriptor, Interest>>,
}

impl PollEventQueue {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            opened: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn check_open(&self) -> Result<(), SocketError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SocketError::Cancelled);
        }
        if !self.opened.load(Ordering::Acquire) {
            return Err(SocketError::NotReady);
        }
        Ok(())
    }

    fn make_pollfd(file: FileDescriptor, interest: Interest) -> pollfd {
        let mut events = 0;
        if interest.is_readable() {
            events |= POLLIN;
        }
        if interest.is_writable() {
            events |= POLLOUT;
        }
        pollfd { fd: file.raw(), events, revents: 0 }
    }

    fn make_notification(entry: &pollfd, registered: Interest) -> Option<EventNotification> {
        if entry.revents == 0 {
            return None;
        }
        let mut ready = Interest::NONE;
        if entry.revents & POLLIN != 0 {
            ready |= Interest::READ;
        }
        if entry.revents & POLLOUT != 0 {
            ready |= Interest::WRITE;
        }
        let errors = NotificationErrors {
            end_of_file: entry.revents & POLLHUP != 0,
            error: entry.revents & (POLLERR | POLLNVAL) != 0,
        };
        EventNotification::normalized(FileDescriptor::new(entry.fd), ready, errors, registered)
    }
}

impl EventQueue for PollEventQueue {
    fn open(&self) -> Result<(), SocketError> {
        self.opened.store(true, Ordering::Release);
        debug!(interval = ?self.interval, "opened poll event queue");
        Ok(())
    }

    fn add_events(&self, file: FileDescriptor, interest: Interest) -> Result<(), SocketError> {
        self.check_open()?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.entry(file).or_default();
        *entry |= interest;
        trace!(fd = %file, interest = %entry, "poll registration grown");
        Ok(())
    }

    fn remove_events(&self, file: FileDescriptor, interest: Interest) -> Result<(), SocketError> {
        self.check_open()?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let remaining = entries.get(&file).copied().unwrap_or_default() - interest;
        if remaining.is_empty() {
            entries.remove(&file);
        } else {
            entries.insert(file, remaining);
        }
        trace!(fd = %file, interest = %remaining, "poll registration shrunk");
        Ok(())
    }

    fn get_notifications(&self) -> Result<Vec<EventNotification>, SocketError> {
        self.check_open()?;
        let registered = self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let mut fds: Vec<pollfd> =
            registered.iter().map(|(file, interest)| Self::make_pollfd(*file, *interest)).collect();

        let timeout = c_int::try_from(self.interval.as_millis()).unwrap_or(c_int::MAX);
        // SAFETY: `fds` is valid for `fds.len()` entries.
        let result = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
        if result < 0 {
            let error = std::io::Error::last_os_error();
            if error.raw_os_error() == Some(libc::EINTR) {
                return Ok(Vec::new());
            }
            return Err(SocketError::from_io("poll", &error));
        }

        if self.closed.load(Ordering::Acquire) {
            return Err(SocketError::Cancelled);
        }

        Ok(fds
            .iter()
            .filter_map(|entry| {
                let interest = registered.get(&FileDescriptor::new(entry.fd)).copied().unwrap_or_default();
                Self::make_notification(entry, interest)
            })
            .collect())
    }

    fn close(&self) -> Result<(), SocketError> {
        // the next wait observes the flag within one interval
        self.closed.store(true, Ordering::Release);
        debug!("closed poll event queue");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_queue::tests::check_backend;

    #[test]
    fn poll_backend() {
        check_backend(&PollEventQueue::new(Duration::from_millis(10)));
    }

    #[test]
    fn error_without_data_is_reported_to_registered_interest() {
        let entry = pollfd { fd: 4, events: POLLOUT, revents: POLLHUP };
        let notification = PollEventQueue::make_notification(&entry, Interest::WRITE).unwrap();
        assert_eq!(notification.interest, Interest::WRITE);
        assert!(notification.errors.end_of_file);
    }

    #[test]
    fn readable_hangup_keeps_data() {
        let entry = pollfd { fd: 4, events: POLLIN, revents: POLLIN | POLLHUP };
        let notification = PollEventQueue::make_notification(&entry, Interest::READ).unwrap();
        assert_eq!(notification, EventNotification::new(FileDescriptor::new(4), Interest::READ));
    }

    #[test]
    fn quiet_descriptor_yields_nothing() {
        let entry = pollfd { fd: 4, events: POLLIN, revents: 0 };
        assert!(PollEventQueue::make_notification(&entry, Interest::READ).is_none());
    }
}

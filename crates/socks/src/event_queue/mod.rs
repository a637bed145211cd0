//! Readiness event queues.
//!
//! An [`EventQueue`] registers per-descriptor [`Interest`] with one OS readiness
//! multiplexer and reports batches of [`EventNotification`]s. Three backends exist:
//!
//! - [`EPollEventQueue`] on Linux and Android (incremental, level triggered)
//! - [`KQueueEventQueue`] on Apple platforms and the BSDs (incremental)
//! - [`PollEventQueue`] everywhere (rebuilds its `pollfd` array on every wait)
//!
//! [`make_default`] selects the best backend for the current platform. Any type
//! implementing the trait can be handed to [`SocketPool`](crate::SocketPool).
//!
//! # Threading
//!
//! [`EventQueue::get_notifications`] blocks the calling thread. The pool calls it
//! from a blocking worker while registration changes arrive concurrently from
//! the pool's own task, so implementations take `&self` and keep their tables
//! behind a mutex.
//!
//! # Normalisation
//!
//! Backends report hang-up and error conditions through [`NotificationErrors`].
//! When a descriptor is readable those flags are dropped: the pending bytes
//! are delivered first and the condition resurfaces on a later read.

use crate::{FileDescriptor, Interest, SocketError};

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use epoll::EPollEventQueue;

#[cfg(any(
    target_vendor = "apple",
    target_os = "freebsd",
    target_os = "dragonfly"
))]
mod kqueue;
#[cfg(any(
    target_vendor = "apple",
    target_os = "freebsd",
    target_os = "dragonfly"
))]
pub use kqueue::KQueueEventQueue;

mod poll;
pub use poll::PollEventQueue;

/// Registers readiness interest with the OS and waits for notifications.
pub trait EventQueue: Send + Sync + Debug {
    /// Acquires the OS primitive. Must be called before any other method.
    fn open(&self) -> Result<(), SocketError>;

    /// Adds `interest` to the registration of `file`.
    fn add_events(&self, file: FileDescriptor, interest: Interest) -> Result<(), SocketError>;

    /// Removes `interest` from the registration of `file`, deregistering it
    /// entirely once nothing remains.
    fn remove_events(&self, file: FileDescriptor, interest: Interest) -> Result<(), SocketError>;

    /// Blocks until at least one registered descriptor is ready.
    ///
    /// Interval based backends may return an empty batch. After [`close`](Self::close)
    /// this fails with [`SocketError::Cancelled`].
    fn get_notifications(&self) -> Result<Vec<EventNotification>, SocketError>;

    /// Releases the primitive and wakes a thread blocked in `get_notifications`.
    fn close(&self) -> Result<(), SocketError>;
}

/// Terminal conditions attached to a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NotificationErrors {
    pub end_of_file: bool,
    pub error: bool,
}

impl NotificationErrors {
    pub const NONE: NotificationErrors = NotificationErrors { end_of_file: false, error: false };

    pub const fn is_empty(self) -> bool {
        !self.end_of_file && !self.error
    }
}

/// A descriptor became ready for `interest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventNotification {
    pub file: FileDescriptor,
    pub interest: Interest,
    pub errors: NotificationErrors,
}

impl EventNotification {
    pub const fn new(file: FileDescriptor, interest: Interest) -> Self {
        Self { file, interest, errors: NotificationErrors::NONE }
    }

    pub const fn with_errors(file: FileDescriptor, interest: Interest, errors: NotificationErrors) -> Self {
        Self { file, interest, errors }
    }

    /// Builds a normalised notification from raw backend flags.
    ///
    /// `ready` is what the OS reported, `registered` what we asked for. Returns
    /// `None` when there is nothing to deliver to the registered interest.
    pub(crate) fn normalized(
        file: FileDescriptor,
        ready: Interest,
        errors: NotificationErrors,
        registered: Interest,
    ) -> Option<Self> {
        let errors = if ready.is_readable() { NotificationErrors::NONE } else { errors };
        let interest = if ready.is_empty() { registered } else { ready };

        if interest.is_empty() || (!interest.intersects(registered) && errors.is_empty()) {
            return None;
        }
        Some(Self { file, interest, errors })
    }
}

/// Backend parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventQueueConfig {
    /// Upper bound of notifications returned by one wait.
    pub max_events: usize,
    /// Timeout of a single `poll(2)` call for the poll backend.
    pub poll_interval: Duration,
}

impl Default for EventQueueConfig {
    fn default() -> Self {
        Self { max_events: 20, poll_interval: Duration::from_millis(10) }
    }
}

/// The preferred backend for the current platform.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn make_default(config: &EventQueueConfig) -> Arc<dyn EventQueue> {
    Arc::new(EPollEventQueue::new(config.max_events))
}

/// The preferred backend for the current platform.
#[cfg(any(
    target_vendor = "apple",
    target_os = "freebsd",
    target_os = "dragonfly"
))]
pub fn make_default(config: &EventQueueConfig) -> Arc<dyn EventQueue> {
    Arc::new(KQueueEventQueue::new(config.max_events))
}

/// The preferred backend for the current platform.
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_vendor = "apple",
    target_os = "freebsd",
    target_os = "dragonfly"
)))]
pub fn make_default(config: &EventQueueConfig) -> Arc<dyn EventQueue> {
    Arc::new(PollEventQueue::new(config.poll_interval))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::Socket;

    const FILE: FileDescriptor = FileDescriptor::new(9);
    const EOF: NotificationErrors = NotificationErrors { end_of_file: true, error: false };

    #[test]
    fn readable_data_wins_over_terminal_flags() {
        let notification = EventNotification::normalized(FILE, Interest::READ, EOF, Interest::READ).unwrap();
        assert_eq!(notification, EventNotification::new(FILE, Interest::READ));
    }

    #[test]
    fn hangup_without_data_falls_back_to_registration() {
        let notification = EventNotification::normalized(FILE, Interest::NONE, EOF, Interest::READ_WRITE).unwrap();
        assert_eq!(notification, EventNotification::with_errors(FILE, Interest::READ_WRITE, EOF));
    }

    #[test]
    fn nothing_registered_is_dropped() {
        assert!(EventNotification::normalized(FILE, Interest::NONE, EOF, Interest::NONE).is_none());
        assert!(
            EventNotification::normalized(FILE, Interest::WRITE, NotificationErrors::NONE, Interest::READ).is_none()
        );
    }

    /// Exercises any backend against a real socket pair.
    pub(crate) fn check_backend(queue: &dyn EventQueue) {
        queue.open().unwrap();
        let (left, right) = Socket::pair().unwrap();
        right.set_nonblocking().unwrap();

        queue.add_events(right.file(), Interest::READ).unwrap();
        left.write(b"ping").unwrap();
        let notifications = wait_for(queue, right.file());
        assert!(notifications.iter().any(|n| n.interest.is_readable() && n.errors.is_empty()));

        // a writable socket reports write readiness once asked for
        queue.add_events(right.file(), Interest::WRITE).unwrap();
        let notifications = wait_for(queue, right.file());
        assert!(notifications.iter().any(|n| n.interest.is_writable()));

        queue.remove_events(right.file(), Interest::READ_WRITE).unwrap();
        assert_eq!(&right.read(16).unwrap()[..], b"ping");

        // hang-up without pending data is reported as end of file
        queue.add_events(right.file(), Interest::READ).unwrap();
        left.close().unwrap();
        let notifications = wait_for(queue, right.file());
        assert!(
            notifications.iter().any(|n| n.errors.end_of_file || n.interest.is_readable()),
            "{notifications:?}"
        );
        queue.remove_events(right.file(), Interest::READ).unwrap();

        right.close().unwrap();
        queue.close().unwrap();
        assert_eq!(queue.get_notifications().unwrap_err(), SocketError::Cancelled);
    }

    fn wait_for(queue: &dyn EventQueue, file: FileDescriptor) -> Vec<EventNotification> {
        for _ in 0..100 {
            let notifications: Vec<_> =
                queue.get_notifications().unwrap().into_iter().filter(|n| n.file == file).collect();
            if !notifications.is_empty() {
                return notifications;
            }
        }
        panic!("no notification for {file}");
    }
}

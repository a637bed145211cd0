//! Multiplexing many suspended sockets over one [`EventQueue`].
//!
//! A [`SocketPool`] is a handle to a single actor that owns the waiter registry
//! and decides what the event queue is registered for. Callers never touch that
//! state directly: [`SocketPool::suspend`] sends a registration and receives a
//! one-shot [`Suspension`] that the actor resolves exactly once.
//!
//! The actor is driven by [`SocketPool::run`]. While no waiter exists it only
//! listens for commands. Otherwise it keeps exactly one blocking
//! [`EventQueue::get_notifications`] call in flight on tokio's blocking pool and
//! resumes every waiter whose interest intersects a notification:
//!
//! ```text
//! suspend(fd, interest) ──► commands ──► actor ──► add_events / remove_events
//!                                          ▲
//!            spawn_blocking(get_notifications)
//! ```
//!
//! Because commands are processed in order, a cancellation always follows the
//! registration it refers to; cancelling a waiter that was already resumed is
//! a no-op.

mod waiting;

pub use waiting::WaiterId;
use waiting::{Waiter, Waiting};

use crate::event_queue::{self, EventNotification, EventQueue, EventQueueConfig};
use crate::{FileDescriptor, Interest, SocketError};

use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

/// Something sockets can suspend on until they are ready.
#[async_trait]
pub trait AsyncSocketPool: Send + Sync + Debug {
    /// Prepares the pool for use; suspensions are accepted afterwards.
    async fn prepare(&self) -> Result<(), SocketError>;

    /// Runs the pool until it is stopped or fails.
    async fn run(&self) -> Result<(), SocketError>;

    /// Suspends until `file` is ready for `interest`.
    ///
    /// Resolves with [`SocketError::Disconnected`] when the descriptor reports
    /// end of file or an error, and with [`SocketError::Cancelled`] when the pool
    /// stops first.
    async fn suspend_socket(&self, file: FileDescriptor, interest: Interest) -> Result<(), SocketError>;
}

/// Lifecycle of a [`SocketPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PoolState {
    Uninitialized = 0,
    Ready = 1,
    Running = 2,
    Complete = 3,
}

impl PoolState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Uninitialized,
            1 => Self::Ready,
            2 => Self::Running,
            _ => Self::Complete,
        }
    }
}

/// Pool configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolConfig {
    pub event_queue: EventQueueConfig,
}

impl PoolConfig {
    #[must_use]
    pub fn max_events(mut self, max_events: usize) -> Self {
        self.event_queue.max_events = max_events;
        self
    }

    #[must_use]
    pub fn poll_interval(mut self, interval: std::time::Duration) -> Self {
        self.event_queue.poll_interval = interval;
        self
    }
}

#[derive(Debug)]
enum Command {
    Suspend { id: WaiterId, file: FileDescriptor, interest: Interest, resume: oneshot::Sender<Result<(), SocketError>> },
    Cancel { id: WaiterId },
    Count { reply: oneshot::Sender<usize> },
    Stop,
}

/// An [`AsyncSocketPool`] backed by an [`EventQueue`].
#[derive(Debug, Clone)]
pub struct SocketPool {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    queue: Arc<dyn EventQueue>,
    state: AtomicU8,
    next_id: AtomicU64,
    commands: mpsc::UnboundedSender<Command>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
}

impl SocketPool {
    pub fn new(queue: Arc<dyn EventQueue>) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                queue,
                state: AtomicU8::new(PoolState::Uninitialized as u8),
                next_id: AtomicU64::new(0),
                commands,
                receiver: Mutex::new(Some(receiver)),
            }),
        }
    }

    /// A pool over the preferred event queue of this platform.
    pub fn make(config: &PoolConfig) -> Self {
        Self::new(event_queue::make_default(&config.event_queue))
    }

    pub fn state(&self) -> PoolState {
        PoolState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PoolState) {
        debug!(?state, "socket pool state changed");
        self.inner.state.store(state as u8, Ordering::Release);
    }

    /// Registers a waiter and returns the future that resolves it.
    ///
    /// The registration is sent before this returns, so the returned
    /// [`Suspension::id`] can be cancelled right away.
    pub fn suspend(&self, file: FileDescriptor, interest: Interest) -> Result<Suspension, SocketError> {
        match self.state() {
            PoolState::Uninitialized => return Err(SocketError::NotReady),
            PoolState::Complete => return Err(SocketError::Cancelled),
            PoolState::Ready | PoolState::Running => {}
        }

        let id = WaiterId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (resume, receiver) = oneshot::channel();
        self.inner
            .commands
            .send(Command::Suspend { id, file, interest, resume })
            .map_err(|_closed| SocketError::Cancelled)?;

        Ok(Suspension { id, receiver, commands: self.inner.commands.clone(), done: false })
    }

    /// Resolves the waiter `id` with [`SocketError::Cancelled`] if it is still suspended.
    pub fn cancel(&self, id: WaiterId) {
        let _ = self.inner.commands.send(Command::Cancel { id });
    }

    /// Number of outstanding waiters, as seen by the running actor.
    ///
    /// Waits for the actor to start if the pool is ready but not yet running.
    pub async fn waiter_count(&self) -> usize {
        let (reply, count) = oneshot::channel();
        if self.inner.commands.send(Command::Count { reply }).is_err() {
            return 0;
        }
        count.await.unwrap_or(0)
    }

    /// Stops the pool: every outstanding waiter resolves with [`SocketError::Cancelled`]
    /// and the event queue is closed.
    pub fn stop(&self) {
        match self.state() {
            PoolState::Running => {
                let _ = self.inner.commands.send(Command::Stop);
            }
            PoolState::Uninitialized | PoolState::Ready => {
                self.set_state(PoolState::Complete);
                // dropping the receiver cancels anything queued before `run`
                drop(self.take_receiver());
                if let Err(e) = self.inner.queue.close() {
                    warn!(cause = %e, "failed to close event queue");
                }
            }
            PoolState::Complete => {}
        }
    }

    fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<Command>> {
        self.inner.receiver.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

#[async_trait]
impl AsyncSocketPool for SocketPool {
    async fn prepare(&self) -> Result<(), SocketError> {
        match self.state() {
            PoolState::Uninitialized => {
                self.inner.queue.open()?;
                self.set_state(PoolState::Ready);
                Ok(())
            }
            PoolState::Ready | PoolState::Running => Ok(()),
            PoolState::Complete => Err(SocketError::Cancelled),
        }
    }

    async fn run(&self) -> Result<(), SocketError> {
        match self.state() {
            PoolState::Ready => {}
            PoolState::Uninitialized => return Err(SocketError::NotReady),
            PoolState::Running => return Err(SocketError::unexpected_state("socket pool is already running")),
            PoolState::Complete => return Err(SocketError::Cancelled),
        }
        let receiver =
            self.take_receiver().ok_or_else(|| SocketError::unexpected_state("socket pool is already running"))?;
        self.set_state(PoolState::Running);

        let mut actor = PoolActor {
            queue: Arc::clone(&self.inner.queue),
            commands: receiver,
            waiting: Waiting::default(),
            fetch: None,
        };
        let result = actor.run().await;
        if let Err(e) = &result {
            error!(cause = %e, "socket pool stopped with error");
        }

        self.set_state(PoolState::Complete);
        actor.teardown();
        result
    }

    async fn suspend_socket(&self, file: FileDescriptor, interest: Interest) -> Result<(), SocketError> {
        self.suspend(file, interest)?.await
    }
}

/// A pending suspension returned by [`SocketPool::suspend`].
///
/// Dropping it before it resolves cancels the waiter.
#[derive(Debug)]
pub struct Suspension {
    id: WaiterId,
    receiver: oneshot::Receiver<Result<(), SocketError>>,
    commands: mpsc::UnboundedSender<Command>,
    done: bool,
}

impl Suspension {
    pub fn id(&self) -> WaiterId {
        self.id
    }
}

impl Future for Suspension {
    type Output = Result<(), SocketError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(result)) => result,
            // the actor went away without resuming us
            Poll::Ready(Err(_closed)) => Err(SocketError::Cancelled),
        };
        self.done = true;
        Poll::Ready(result)
    }
}

impl Drop for Suspension {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.commands.send(Command::Cancel { id: self.id });
        }
    }
}

type Fetch = JoinHandle<Result<Vec<EventNotification>, SocketError>>;

enum Event {
    Command(Option<Command>),
    Fetched(Result<Result<Vec<EventNotification>, SocketError>, tokio::task::JoinError>),
}

/// The single owner of the waiter registry.
struct PoolActor {
    queue: Arc<dyn EventQueue>,
    commands: mpsc::UnboundedReceiver<Command>,
    waiting: Waiting,
    fetch: Option<Fetch>,
}

impl PoolActor {
    async fn run(&mut self) -> Result<(), SocketError> {
        loop {
            let event = if self.waiting.is_empty() {
                trace!("no waiters, socket pool idle");
                Event::Command(self.commands.recv().await)
            } else {
                let mut fetch = self.fetch.take().unwrap_or_else(|| {
                    let queue = Arc::clone(&self.queue);
                    tokio::task::spawn_blocking(move || queue.get_notifications())
                });
                let event = tokio::select! {
                    command = self.commands.recv() => Event::Command(command),
                    fetched = &mut fetch => Event::Fetched(fetched),
                };
                if matches!(event, Event::Command(_)) {
                    self.fetch = Some(fetch);
                }
                event
            };

            match event {
                Event::Command(None | Some(Command::Stop)) => return Ok(()),
                Event::Command(Some(command)) => self.handle(command),
                Event::Fetched(fetched) => {
                    let notifications = fetched
                        .map_err(|e| SocketError::unexpected_state(format!("notification worker failed: {e}")))??;
                    self.process(notifications);
                }
            }
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Suspend { id, file, interest, resume } => {
                let added = self.waiting.append(file, Waiter::new(id, interest, resume));
                trace!(fd = %file, %interest, waiter = %id, "waiter suspended");
                if added.is_empty() {
                    return;
                }
                if let Err(e) = self.queue.add_events(file, added) {
                    warn!(fd = %file, cause = %e, "failed to register interest");
                    if let Some((waiter, _, _)) = self.waiting.remove(id) {
                        waiter.resume(Err(e));
                    }
                }
            }
            Command::Cancel { id } => {
                if let Some((waiter, file, unneeded)) = self.waiting.remove(id) {
                    trace!(fd = %file, waiter = %id, "waiter cancelled");
                    self.shrink(file, unneeded);
                    waiter.resume(Err(SocketError::Cancelled));
                }
            }
            Command::Count { reply } => {
                let _ = reply.send(self.waiting.len());
            }
            Command::Stop => {}
        }
    }

    fn process(&mut self, notifications: Vec<EventNotification>) {
        for notification in notifications {
            let (resumed, unneeded) = self.waiting.take_ready(notification.file, notification.interest);
            if resumed.is_empty() {
                continue;
            }
            self.shrink(notification.file, unneeded);

            let result = if notification.errors.is_empty() { Ok(()) } else { Err(SocketError::Disconnected) };
            trace!(fd = %notification.file, count = resumed.len(), ?result, "resuming waiters");
            for waiter in resumed {
                waiter.resume(result.clone());
            }
        }
    }

    fn shrink(&self, file: FileDescriptor, unneeded: Interest) {
        if unneeded.is_empty() {
            return;
        }
        if let Err(e) = self.queue.remove_events(file, unneeded) {
            warn!(fd = %file, cause = %e, "failed to deregister interest");
        }
    }

    fn teardown(&mut self) {
        let waiters = self.waiting.drain();
        debug!(count = waiters.len(), "cancelling outstanding waiters");
        for waiter in waiters {
            waiter.resume(Err(SocketError::Cancelled));
        }
        if let Err(e) = self.queue.close() {
            warn!(cause = %e, "failed to close event queue");
        }
        self.commands.close();
    }
}

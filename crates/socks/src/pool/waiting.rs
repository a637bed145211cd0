//! The waiter registry owned by the pool actor.

use crate::{FileDescriptor, Interest, SocketError};

use std::collections::HashMap;
use std::fmt;
use tokio::sync::oneshot;

/// Unique identity of one suspension, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaiterId(pub(crate) u64);

impl fmt::Display for WaiterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A suspended caller. Resuming consumes the waiter, so it fires exactly once.
#[derive(Debug)]
pub(crate) struct Waiter {
    pub(crate) id: WaiterId,
    pub(crate) interest: Interest,
    resume: oneshot::Sender<Result<(), SocketError>>,
}

impl Waiter {
    pub(crate) fn new(id: WaiterId, interest: Interest, resume: oneshot::Sender<Result<(), SocketError>>) -> Self {
        Self { id, interest, resume }
    }

    pub(crate) fn resume(self, result: Result<(), SocketError>) {
        // the caller may have stopped waiting already
        let _ = self.resume.send(result);
    }
}

#[derive(Debug, Default)]
pub(crate) struct Waiting {
    waiters: HashMap<FileDescriptor, Vec<Waiter>>,
    files: HashMap<WaiterId, FileDescriptor>,
}

impl Waiting {
    pub(crate) fn len(&self) -> usize {
        self.files.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Union of the interests of every waiter on `file`.
    pub(crate) fn interest(&self, file: FileDescriptor) -> Interest {
        self.waiters
            .get(&file)
            .map(|waiters| waiters.iter().fold(Interest::NONE, |union, waiter| union | waiter.interest))
            .unwrap_or_default()
    }

    /// Adds a waiter, returning the interest that is newly required for `file`.
    pub(crate) fn append(&mut self, file: FileDescriptor, waiter: Waiter) -> Interest {
        let before = self.interest(file);
        let added = waiter.interest - before;
        self.files.insert(waiter.id, file);
        self.waiters.entry(file).or_default().push(waiter);
        added
    }

    /// Removes one waiter, returning it with its descriptor and the interest no
    /// longer needed by the waiters that remain.
    pub(crate) fn remove(&mut self, id: WaiterId) -> Option<(Waiter, FileDescriptor, Interest)> {
        let file = self.files.remove(&id)?;
        let before = self.interest(file);
        let waiters = self.waiters.get_mut(&file)?;
        let index = waiters.iter().position(|waiter| waiter.id == id)?;
        let waiter = waiters.swap_remove(index);
        if waiters.is_empty() {
            self.waiters.remove(&file);
        }
        Some((waiter, file, before - self.interest(file)))
    }

    /// Takes every waiter on `file` whose interest intersects `ready`, returning
    /// them with the interest no longer needed by the waiters that remain.
    pub(crate) fn take_ready(&mut self, file: FileDescriptor, ready: Interest) -> (Vec<Waiter>, Interest) {
        let before = self.interest(file);
        let Some(waiters) = self.waiters.get_mut(&file) else {
            return (Vec::new(), Interest::NONE);
        };
        let (resumed, remaining): (Vec<_>, Vec<_>) =
            waiters.drain(..).partition(|waiter| waiter.interest.intersects(ready));
        if remaining.is_empty() {
            self.waiters.remove(&file);
        } else {
            *waiters = remaining;
        }
        for waiter in &resumed {
            self.files.remove(&waiter.id);
        }
        (resumed, before - self.interest(file))
    }

    /// Takes every waiter, emptying the registry.
    pub(crate) fn drain(&mut self) -> Vec<Waiter> {
        self.files.clear();
        self.waiters.drain().flat_map(|(_, waiters)| waiters).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: FileDescriptor = FileDescriptor::new(5);

    fn waiter(id: u64, interest: Interest) -> (Waiter, oneshot::Receiver<Result<(), SocketError>>) {
        let (tx, rx) = oneshot::channel();
        (Waiter::new(WaiterId(id), interest, tx), rx)
    }

    #[test]
    fn append_reports_only_new_interest() {
        let mut waiting = Waiting::default();
        assert_eq!(waiting.append(FILE, waiter(1, Interest::READ).0), Interest::READ);
        assert_eq!(waiting.append(FILE, waiter(2, Interest::READ).0), Interest::NONE);
        assert_eq!(waiting.append(FILE, waiter(3, Interest::READ_WRITE).0), Interest::WRITE);
        assert_eq!(waiting.interest(FILE), Interest::READ_WRITE);
        assert_eq!(waiting.len(), 3);
    }

    #[test]
    fn remove_shrinks_to_remaining_interest() {
        let mut waiting = Waiting::default();
        waiting.append(FILE, waiter(1, Interest::READ).0);
        waiting.append(FILE, waiter(2, Interest::WRITE).0);

        let (removed, file, unneeded) = waiting.remove(WaiterId(2)).unwrap();
        assert_eq!(removed.id, WaiterId(2));
        assert_eq!(file, FILE);
        assert_eq!(unneeded, Interest::WRITE);
        assert_eq!(waiting.interest(FILE), Interest::READ);

        let (_, _, unneeded) = waiting.remove(WaiterId(1)).unwrap();
        assert_eq!(unneeded, Interest::READ);
        assert!(waiting.is_empty());
        assert!(waiting.remove(WaiterId(1)).is_none());
    }

    #[test]
    fn take_ready_resumes_intersecting_waiters() {
        let mut waiting = Waiting::default();
        waiting.append(FILE, waiter(1, Interest::READ).0);
        waiting.append(FILE, waiter(2, Interest::WRITE).0);
        waiting.append(FILE, waiter(3, Interest::READ_WRITE).0);

        let (resumed, unneeded) = waiting.take_ready(FILE, Interest::READ);
        let mut ids: Vec<_> = resumed.iter().map(|w| w.id).collect();
        ids.sort();
        assert_eq!(ids, vec![WaiterId(1), WaiterId(3)]);
        assert_eq!(unneeded, Interest::READ);
        assert_eq!(waiting.interest(FILE), Interest::WRITE);
        assert_eq!(waiting.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn drained_waiters_can_be_resumed() {
        let mut waiting = Waiting::default();
        let (first, rx) = waiter(1, Interest::READ);
        waiting.append(FILE, first);

        for waiter in waiting.drain() {
            waiter.resume(Err(SocketError::Cancelled));
        }
        assert!(waiting.is_empty());
        assert_eq!(rx.await.unwrap(), Err(SocketError::Cancelled));
    }
}

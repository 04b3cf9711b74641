//! Communication backends for SPMD execution.
//!
//! All distributed algorithms in this crate are written against the
//! [`Communicator`] trait. Point-to-point messages are matched by `(source, tag)`
//! and delivered in order per `(source, tag)` pair, so deterministic exchange
//! schedules computed independently on each partition pair up without any
//! handshake. Collectives are blocking on every partition.
//!
//! Two backends are provided: [`SerialComm`] for single-partition runs, and
//! [`ThreadComm`] which runs each partition on its own thread with unbounded
//! channels between them. Sends never block, so a partition may post all of its
//! sends before entering its receives without deadlocking.

use crate::Real;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::mpsc::{channel, Receiver, Sender};

/// A blocking communicator connecting the partitions of an SPMD run.
pub trait Communicator<T: Real> {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Posts a message to `dest`. Never blocks.
    fn send(&self, dest: usize, tag: usize, data: &[T]);

    /// Receives the next message from `source` with the given tag, blocking
    /// until it arrives.
    fn recv(&self, source: usize, tag: usize) -> Vec<T>;

    /// Blocks until every partition has entered the barrier.
    fn barrier(&self);

    fn all_reduce_sum(&self, value: T) -> T {
        let mut buffer = [value];
        self.all_reduce_sum_slice(&mut buffer);
        buffer[0]
    }

    fn all_reduce_max(&self, value: T) -> T;

    /// Element-wise sum over all partitions; every partition receives the result.
    fn all_reduce_sum_slice(&self, data: &mut [T]);
}

impl<'a, T: Real, C: ?Sized + Communicator<T>> Communicator<T> for &'a C {
    fn rank(&self) -> usize {
        <C as Communicator<T>>::rank(self)
    }

    fn size(&self) -> usize {
        <C as Communicator<T>>::size(self)
    }

    fn send(&self, dest: usize, tag: usize, data: &[T]) {
        <C as Communicator<T>>::send(self, dest, tag, data)
    }

    fn recv(&self, source: usize, tag: usize) -> Vec<T> {
        <C as Communicator<T>>::recv(self, source, tag)
    }

    fn barrier(&self) {
        <C as Communicator<T>>::barrier(self)
    }

    fn all_reduce_sum(&self, value: T) -> T {
        <C as Communicator<T>>::all_reduce_sum(self, value)
    }

    fn all_reduce_max(&self, value: T) -> T {
        <C as Communicator<T>>::all_reduce_max(self, value)
    }

    fn all_reduce_sum_slice(&self, data: &mut [T]) {
        <C as Communicator<T>>::all_reduce_sum_slice(self, data)
    }
}

/// The trivial communicator for a single-partition run.
///
/// Exchange schedules never contain the local partition itself, so
/// point-to-point messages are unreachable here and treated as logic errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialComm;

impl<T: Real> Communicator<T> for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, dest: usize, _tag: usize, _data: &[T]) {
        panic!("SerialComm has no peer to send to (dest = {dest}).");
    }

    fn recv(&self, source: usize, _tag: usize) -> Vec<T> {
        panic!("SerialComm has no peer to receive from (source = {source}).");
    }

    fn barrier(&self) {}

    fn all_reduce_max(&self, value: T) -> T {
        value
    }

    fn all_reduce_sum_slice(&self, _data: &mut [T]) {}
}

// Tags at the top of the tag space are reserved for collectives. User tags
// must stay below this range.
const TAG_REDUCE: usize = usize::MAX;
const TAG_BROADCAST: usize = usize::MAX - 1;
const TAG_BARRIER: usize = usize::MAX - 2;

type Message<T> = (usize, usize, Vec<T>);

/// An in-process communicator connecting one thread per partition.
///
/// Construct a full group with [`ThreadComm::group`] and move each member into
/// its own thread, or use the [`spmd`] harness which does exactly that.
#[derive(Debug)]
pub struct ThreadComm<T> {
    rank: usize,
    senders: Vec<Sender<Message<T>>>,
    receiver: Receiver<Message<T>>,
    // Messages received while waiting for a different (source, tag).
    pending: RefCell<FxHashMap<(usize, usize), VecDeque<Vec<T>>>>,
}

impl<T: Real> ThreadComm<T> {
    /// Creates a fully connected group of `size` communicators.
    pub fn group(size: usize) -> Vec<Self> {
        assert!(size >= 1, "Communicator group must have at least one member.");
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| channel()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, receiver)| Self {
                rank,
                senders: senders.clone(),
                receiver,
                pending: RefCell::new(FxHashMap::default()),
            })
            .collect()
    }
}

impl<T: Real + Send> Communicator<T> for ThreadComm<T> {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.senders.len()
    }

    fn send(&self, dest: usize, tag: usize, data: &[T]) {
        assert_ne!(dest, self.rank, "A partition must not message itself.");
        self.senders[dest]
            .send((self.rank, tag, data.to_vec()))
            .unwrap_or_else(|_| panic!("Partition {dest} hung up before partition {} finished.", self.rank));
    }

    fn recv(&self, source: usize, tag: usize) -> Vec<T> {
        if let Some(queue) = self.pending.borrow_mut().get_mut(&(source, tag)) {
            if let Some(data) = queue.pop_front() {
                return data;
            }
        }
        loop {
            let (from, received_tag, data) = self
                .receiver
                .recv()
                .unwrap_or_else(|_| panic!("All peers of partition {} hung up.", self.rank));
            if from == source && received_tag == tag {
                return data;
            }
            self.pending
                .borrow_mut()
                .entry((from, received_tag))
                .or_default()
                .push_back(data);
        }
    }

    fn barrier(&self) {
        // Gather-to-root followed by a broadcast of empty payloads.
        let size = self.senders.len();
        if size == 1 {
            return;
        }
        if self.rank == 0 {
            for source in 1..size {
                self.recv(source, TAG_BARRIER);
            }
            for dest in 1..size {
                self.send(dest, TAG_BARRIER, &[]);
            }
        } else {
            self.send(0, TAG_BARRIER, &[]);
            self.recv(0, TAG_BARRIER);
        }
    }

    fn all_reduce_max(&self, value: T) -> T {
        self.all_reduce_with(value, |a, b| if b > a { b } else { a })
    }

    fn all_reduce_sum_slice(&self, data: &mut [T]) {
        let size = self.senders.len();
        if size == 1 {
            return;
        }
        if self.rank == 0 {
            for source in 1..size {
                let contribution = self.recv(source, TAG_REDUCE);
                assert_eq!(contribution.len(), data.len());
                for (accumulated, received) in data.iter_mut().zip(&contribution) {
                    *accumulated += *received;
                }
            }
            for dest in 1..size {
                self.send(dest, TAG_BROADCAST, data);
            }
        } else {
            self.send(0, TAG_REDUCE, data);
            let result = self.recv(0, TAG_BROADCAST);
            data.copy_from_slice(&result);
        }
    }
}

impl<T: Real + Send> ThreadComm<T> {
    fn all_reduce_with(&self, value: T, combine: impl Fn(T, T) -> T) -> T {
        let size = self.senders.len();
        if size == 1 {
            return value;
        }
        if self.rank == 0 {
            let mut result = value;
            for source in 1..size {
                let contribution = self.recv(source, TAG_REDUCE);
                result = combine(result, contribution[0]);
            }
            for dest in 1..size {
                self.send(dest, TAG_BROADCAST, &[result]);
            }
            result
        } else {
            self.send(0, TAG_REDUCE, &[value]);
            self.recv(0, TAG_BROADCAST)[0]
        }
    }
}

/// Runs `body` once per partition on its own thread and collects the results
/// in rank order. A panic on any partition propagates to the caller.
pub fn spmd<T, R, F>(size: usize, body: F) -> Vec<R>
where
    T: Real + Send,
    R: Send,
    F: Fn(ThreadComm<T>) -> R + Sync,
{
    let comms = ThreadComm::group(size);
    std::thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let body = &body;
                scope.spawn(move || body(comm))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(result) => result,
                Err(payload) => std::panic::resume_unwind(payload),
            })
            .collect()
    })
}

//! Bounded producer/consumer queue with promise-based receive.
//!
//! [`AsyncQueue`] decouples a producer (the channel's receive pump) from
//! consumers. It keeps two collections behind one short, non-async lock:
//! a buffer of items nobody has claimed yet, and a FIFO of receivers
//! waiting for an item. At any instant at least one of them is empty.
//!
//! Each waiting receiver is a [`oneshot`] channel. Completing it with
//! `send` is the atomic hand-off: if the receiver was dropped (the caller
//! cancelled), `send` fails and gives the item back, and the producer tries
//! the next waiter or buffers the item instead.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::sync::{Notify, oneshot};

/// Errors returned by [`AsyncQueue`] receive operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Too many receivers are already waiting. This is a usage error.
    #[error("too many pending receive operations (limit: {limit})")]
    PromisesLimitReached { limit: usize },

    /// The queue was closed and holds no more items.
    #[error("queue closed")]
    Closed,
}

struct Inner<T> {
    buffer: VecDeque<T>,
    promises: VecDeque<oneshot::Sender<T>>,
    closed: bool,
}

impl<T> Inner<T> {
    /// Hands the item to the oldest live waiter, or returns it.
    fn complete_promise(&mut self, mut item: T) -> Result<(), T> {
        while let Some(promise) = self.promises.pop_front() {
            match promise.send(item) {
                Ok(()) => return Ok(()),
                Err(returned) => item = returned,
            }
        }
        Err(item)
    }
}

/// A bounded multi-producer, multi-consumer async queue.
///
/// `buffer_limit` caps buffered items and `promises_limit` caps waiting
/// receivers; `0` means unbounded for both.
pub struct AsyncQueue<T> {
    inner: Mutex<Inner<T>>,
    space_available: Notify,
    buffer_limit: usize,
    promises_limit: usize,
}

impl<T> AsyncQueue<T> {
    /// Creates a queue with the given limits (`0` = unbounded).
    pub fn new(buffer_limit: usize, promises_limit: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buffer: VecDeque::new(),
                promises: VecDeque::new(),
                closed: false,
            }),
            space_available: Notify::new(),
            buffer_limit,
            promises_limit,
        }
    }

    /// Creates an unbounded queue.
    pub fn unbounded() -> Self {
        Self::new(0, 0)
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // Critical sections never panic halfway through a mutation.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Posts an item, returning `false` if the buffer is full or the queue
    /// is closed.
    pub fn post(&self, item: T) -> bool {
        self.offer(item).is_ok()
    }

    /// Posts an item, handing it back on rejection.
    pub fn offer(&self, item: T) -> Result<(), T> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(item);
        }

        let item = match inner.complete_promise(item) {
            Ok(()) => return Ok(()),
            Err(item) => item,
        };

        if self.buffer_limit > 0 && inner.buffer.len() >= self.buffer_limit {
            return Err(item);
        }
        inner.buffer.push_back(item);
        Ok(())
    }

    /// Posts an item, waiting for buffer space instead of rejecting it.
    pub async fn post_wait(&self, mut item: T) -> Result<(), QueueError> {
        loop {
            let notified = self.space_available.notified();
            match self.offer(item) {
                Ok(()) => return Ok(()),
                Err(rejected) => {
                    if self.is_closed() {
                        return Err(QueueError::Closed);
                    }
                    item = rejected;
                }
            }
            notified.await;
        }
    }

    /// Receives the next item.
    ///
    /// The waiter is registered when this method is called, not when the
    /// returned future is first polled, so limit violations surface
    /// immediately. Dropping the future cancels the receive.
    pub fn receive(&self) -> Receive<'_, T> {
        let mut inner = self.lock();

        if let Some(item) = inner.buffer.pop_front() {
            drop(inner);
            self.space_available.notify_waiters();
            return Receive::ready(self, Ok(item));
        }

        if inner.closed {
            return Receive::ready(self, Err(QueueError::Closed));
        }

        inner.promises.retain(|promise| !promise.is_closed());
        if self.promises_limit > 0 && inner.promises.len() >= self.promises_limit {
            return Receive::ready(
                self,
                Err(QueueError::PromisesLimitReached {
                    limit: self.promises_limit,
                }),
            );
        }

        let (tx, rx) = oneshot::channel();
        inner.promises.push_back(tx);
        Receive {
            queue: self,
            state: ReceiveState::Waiting(rx),
        }
    }

    /// Takes a buffered item without waiting.
    pub fn try_receive(&self) -> Option<T> {
        let item = self.lock().buffer.pop_front();
        if item.is_some() {
            self.space_available.notify_waiters();
        }
        item
    }

    /// Number of buffered items.
    pub fn buffer_count(&self) -> usize {
        self.lock().buffer.len()
    }

    /// Number of receivers currently waiting.
    pub fn promises_count(&self) -> usize {
        self.lock()
            .promises
            .iter()
            .filter(|promise| !promise.is_closed())
            .count()
    }

    /// Closes the queue.
    ///
    /// Waiting receivers fail with [`QueueError::Closed`]; items already
    /// buffered can still be received.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.promises.clear();
        drop(inner);
        self.space_available.notify_waiters();
    }

    /// True once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Puts back an item that was delivered to a receiver which was
    /// dropped before reading it.
    fn restore(&self, item: T) {
        let mut inner = self.lock();
        if let Err(item) = inner.complete_promise(item) {
            inner.buffer.push_front(item);
        }
    }
}

impl<T> Default for AsyncQueue<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

enum ReceiveState<T> {
    Ready(Option<Result<T, QueueError>>),
    Waiting(oneshot::Receiver<T>),
    Done,
}

/// Future returned by [`AsyncQueue::receive`].
#[must_use = "futures do nothing unless polled"]
pub struct Receive<'a, T> {
    queue: &'a AsyncQueue<T>,
    state: ReceiveState<T>,
}

impl<'a, T> Receive<'a, T> {
    fn ready(queue: &'a AsyncQueue<T>, result: Result<T, QueueError>) -> Self {
        Self {
            queue,
            state: ReceiveState::Ready(Some(result)),
        }
    }
}

// The item is never pinned; it is only moved in and out of the state.
impl<T> Unpin for Receive<'_, T> {}

impl<T> Future for Receive<'_, T> {
    type Output = Result<T, QueueError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            ReceiveState::Ready(result) => {
                let result = result.take().unwrap_or(Err(QueueError::Closed));
                this.state = ReceiveState::Done;
                Poll::Ready(result)
            }
            ReceiveState::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(result) => {
                    this.state = ReceiveState::Done;
                    Poll::Ready(result.map_err(|_| QueueError::Closed))
                }
                Poll::Pending => Poll::Pending,
            },
            ReceiveState::Done => Poll::Ready(Err(QueueError::Closed)),
        }
    }
}

impl<T> Drop for Receive<'_, T> {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.state, ReceiveState::Done) {
            ReceiveState::Waiting(mut rx) => {
                rx.close();
                // A producer may have completed us just before the close.
                if let Ok(item) = rx.try_recv() {
                    self.queue.restore(item);
                }
            }
            ReceiveState::Ready(Some(Ok(item))) => self.queue.restore(item),
            _ => {}
        }
    }
}

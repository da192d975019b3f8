//! Pending command correlation table.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use lime_core::{Command, Node};
use tokio::sync::oneshot;

use crate::error::ChannelError;

type Completion = oneshot::Sender<Result<Command, ChannelError>>;

struct Waiter {
    token: u64,
    /// The request's `to`; a response naming another sender is not ours.
    responder: Option<Node>,
    completion: Completion,
}

impl Waiter {
    fn answered_by(&self, response: &Command) -> bool {
        match (&self.responder, &response.header.from) {
            (Some(expected), Some(from)) => {
                expected.identity == from.identity
                    && (expected.instance.is_empty()
                        || from.instance.is_empty()
                        || expected.instance.eq_ignore_ascii_case(&from.instance))
            }
            _ => true,
        }
    }
}

/// Outstanding `process_command` calls keyed by command id.
///
/// Each registration carries a token so a guard only ever removes its own
/// entry, even after the id was completed and registered again.
#[derive(Default)]
pub(crate) struct PendingCommands {
    table: Mutex<HashMap<String, Waiter>>,
    next_token: AtomicU64,
}

impl PendingCommands {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Waiter>> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a completion handle for `id`, answered by `responder`
    /// when known.
    pub(crate) fn register(
        &self,
        id: &str,
        responder: Option<Node>,
    ) -> Result<(oneshot::Receiver<Result<Command, ChannelError>>, PendingGuard<'_>), ChannelError>
    {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        match self.lock().entry(id.to_string()) {
            Entry::Occupied(_) => return Err(ChannelError::DuplicateCommandId(id.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(Waiter {
                    token,
                    responder,
                    completion: tx,
                });
            }
        }
        Ok((
            rx,
            PendingGuard {
                table: self,
                id: id.to_string(),
                token,
            },
        ))
    }

    /// Completes the handle registered for the response's id.
    ///
    /// Hands the response back when nothing is waiting for it, or when it
    /// comes from a node other than the one the request was sent to.
    pub(crate) fn complete(&self, response: Command) -> Result<(), Command> {
        let Some(id) = response.header.id.clone() else {
            return Err(response);
        };
        let waiter = {
            let mut table = self.lock();
            let answered = table
                .get(&id)
                .is_some_and(|waiter| waiter.answered_by(&response));
            if answered { table.remove(&id) } else { None }
        };
        let Some(waiter) = waiter else {
            return Err(response);
        };
        // A dropped receiver means the caller gave up; the response is spent.
        let _ = waiter.completion.send(Ok(response));
        Ok(())
    }

    /// Fails every outstanding handle, returning how many there were.
    pub(crate) fn fail_all(&self, error: &ChannelError) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        let count = drained.len();
        for (_, waiter) in drained {
            let _ = waiter.completion.send(Err(error.clone()));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn remove(&self, id: &str, token: u64) {
        let mut table = self.lock();
        if table.get(id).is_some_and(|waiter| waiter.token == token) {
            table.remove(id);
        }
    }
}

/// Removes its registration when dropped.
pub(crate) struct PendingGuard<'a> {
    table: &'a PendingCommands,
    id: String,
    token: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.remove(&self.id, self.token);
    }
}

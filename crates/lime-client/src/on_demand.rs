//! A client channel that builds itself on first use and rebuilds after
//! its transport dies.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use lime_channel::{Channel, ChannelResult};
use lime_core::{Command, Message, Notification, new_envelope_id};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::builder::ChannelBuilder;
use crate::error::{ClientError, ClientResult};
use crate::retry::{FixedRetry, RetryPolicy};

/// Wraps a [`ChannelBuilder`], keeping one established channel alive.
///
/// Operations that fail with a retryable error are tried again on a
/// rebuilt channel, as long as the retry policy allows.
pub struct OnDemandClientChannel<B> {
    builder: B,
    retry: Arc<dyn RetryPolicy>,
    /// Held while building, so concurrent callers share one build.
    current: Mutex<Option<Channel>>,
    channels_created: AtomicU64,
    finished: AtomicBool,
}

impl<B: ChannelBuilder> OnDemandClientChannel<B> {
    /// Creates an on-demand channel with one immediate retry.
    pub fn new(builder: B) -> Self {
        Self::with_retry_policy(builder, Arc::new(FixedRetry::default()))
    }

    pub fn with_retry_policy(builder: B, retry: Arc<dyn RetryPolicy>) -> Self {
        Self {
            builder,
            retry,
            current: Mutex::new(None),
            channels_created: AtomicU64::new(0),
            finished: AtomicBool::new(false),
        }
    }

    /// Number of channels built so far.
    pub fn channels_created(&self) -> u64 {
        self.channels_created.load(Ordering::Relaxed)
    }

    /// True once [`finish`](Self::finish) was called.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// The usable channel, building one when there is none.
    pub async fn channel(&self) -> ClientResult<Channel> {
        if self.is_finished() {
            return Err(ClientError::Finished);
        }

        let mut current = self.current.lock().await;
        if let Some(channel) = current.as_ref() {
            if channel.is_usable() {
                return Ok(channel.clone());
            }
            debug!(
                session_id = ?channel.session_id(),
                state = %channel.state(),
                "Discarding dead channel"
            );
            *current = None;
        }

        let channel = self.builder.build().await?;
        let created = self.channels_created.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            session_id = ?channel.session_id(),
            channels_created = created,
            "Channel created"
        );
        *current = Some(channel.clone());
        Ok(channel)
    }

    pub async fn send_message(&self, message: Message) -> ClientResult<()> {
        self.execute("send a message", |channel| {
            let message = message.clone();
            async move { channel.send_message(message).await }
        })
        .await
    }

    pub async fn send_notification(&self, notification: Notification) -> ClientResult<()> {
        self.execute("send a notification", |channel| {
            let notification = notification.clone();
            async move { channel.send_notification(notification).await }
        })
        .await
    }

    pub async fn send_command(&self, command: Command) -> ClientResult<()> {
        self.execute("send a command", |channel| {
            let command = command.clone();
            async move { channel.send_command(command).await }
        })
        .await
    }

    /// Sends a request and waits for its response.
    ///
    /// A retried request is sent again with the same id.
    pub async fn process_command(&self, mut command: Command) -> ClientResult<Command> {
        if command.header.id.is_none() {
            command.header.id = Some(new_envelope_id());
        }
        self.execute("process a command", |channel| {
            let command = command.clone();
            async move { channel.process_command(command).await }
        })
        .await
    }

    pub async fn receive_message(&self) -> ClientResult<Message> {
        self.execute("receive a message", |channel| async move {
            channel.receive_message().await
        })
        .await
    }

    pub async fn receive_notification(&self) -> ClientResult<Notification> {
        self.execute("receive a notification", |channel| async move {
            channel.receive_notification().await
        })
        .await
    }

    pub async fn receive_command(&self) -> ClientResult<Command> {
        self.execute("receive a command", |channel| async move {
            channel.receive_command().await
        })
        .await
    }

    /// Finishes the active channel, if any. Later operations fail with
    /// [`ClientError::Finished`].
    pub async fn finish(&self) -> ClientResult<()> {
        if self.finished.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let channel = self.current.lock().await.take();
        match channel {
            Some(channel) if channel.is_usable() => {
                channel.finish().await?;
                debug!(session_id = ?channel.session_id(), "Channel finished");
                Ok(())
            }
            Some(channel) => {
                channel.close().await;
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn execute<T, F, Fut>(&self, operation: &'static str, op: F) -> ClientResult<T>
    where
        F: Fn(Channel) -> Fut,
        Fut: Future<Output = ChannelResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            let result = match self.channel().await {
                Ok(channel) => op(channel).await.map_err(ClientError::from),
                Err(e) => Err(e),
            };
            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            attempt += 1;
            let delay = if error.is_retryable() && !self.is_finished() {
                self.retry.next_delay(attempt, &error)
            } else {
                None
            };
            let Some(delay) = delay else {
                return Err(error);
            };

            warn!(
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying on a new channel"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

impl<B> std::fmt::Debug for OnDemandClientChannel<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnDemandClientChannel")
            .field("retry", &self.retry)
            .field("channels_created", &self.channels_created.load(Ordering::Relaxed))
            .field("finished", &self.finished.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

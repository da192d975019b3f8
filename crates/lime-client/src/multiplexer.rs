//! A fixed pool of on-demand channels sharing one builder.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::future::join_all;
use lime_core::{Command, Message, Notification};
use tracing::{debug, warn};

use crate::builder::ChannelBuilder;
use crate::error::{ClientError, ClientResult};
use crate::on_demand::OnDemandClientChannel;
use crate::retry::RetryPolicy;

/// Spreads outbound traffic round-robin over `N` channels.
///
/// Inbound traffic is read from the first channel only, so a logical
/// session keeps one receive path.
pub struct MultiplexerClientChannel<B> {
    channels: Vec<OnDemandClientChannel<Arc<B>>>,
    next: AtomicUsize,
}

impl<B: ChannelBuilder> MultiplexerClientChannel<B> {
    /// Creates a pool of `size` channels. Nothing is built until used.
    pub fn new(builder: B, size: usize, retry: Arc<dyn RetryPolicy>) -> ClientResult<Self> {
        if size == 0 {
            return Err(ClientError::Config(
                "a multiplexer needs at least one channel".to_string(),
            ));
        }
        let builder = Arc::new(builder);
        let channels = (0..size)
            .map(|_| {
                OnDemandClientChannel::with_retry_policy(Arc::clone(&builder), Arc::clone(&retry))
            })
            .collect();
        Ok(Self {
            channels,
            next: AtomicUsize::new(0),
        })
    }

    pub fn size(&self) -> usize {
        self.channels.len()
    }

    /// Channels built so far across the pool.
    pub fn channels_created(&self) -> u64 {
        self.channels.iter().map(|c| c.channels_created()).sum()
    }

    /// Builds every channel in the pool that is not already usable.
    pub async fn establish_all(&self) -> ClientResult<()> {
        for result in join_all(self.channels.iter().map(|c| c.channel())).await {
            result?;
        }
        Ok(())
    }

    fn next_channel(&self) -> &OnDemandClientChannel<Arc<B>> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.channels.len();
        &self.channels[index]
    }

    fn receiver(&self) -> &OnDemandClientChannel<Arc<B>> {
        &self.channels[0]
    }

    pub async fn send_message(&self, message: Message) -> ClientResult<()> {
        self.next_channel().send_message(message).await
    }

    pub async fn send_notification(&self, notification: Notification) -> ClientResult<()> {
        self.next_channel().send_notification(notification).await
    }

    pub async fn send_command(&self, command: Command) -> ClientResult<()> {
        self.next_channel().send_command(command).await
    }

    /// Processes a command on the next channel; the response comes back
    /// on the channel the request went out on.
    pub async fn process_command(&self, command: Command) -> ClientResult<Command> {
        self.next_channel().process_command(command).await
    }

    pub async fn receive_message(&self) -> ClientResult<Message> {
        self.receiver().receive_message().await
    }

    pub async fn receive_notification(&self) -> ClientResult<Notification> {
        self.receiver().receive_notification().await
    }

    pub async fn receive_command(&self) -> ClientResult<Command> {
        self.receiver().receive_command().await
    }

    /// Finishes every channel concurrently and returns the first error.
    pub async fn finish(&self) -> ClientResult<()> {
        let results = join_all(self.channels.iter().map(|c| c.finish())).await;
        let mut first_error = None;
        for (index, result) in results.into_iter().enumerate() {
            if let Err(e) = result {
                warn!(channel = index, error = %e, "Failed to finish pooled channel");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        debug!(size = self.channels.len(), "Multiplexer finished");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<B> std::fmt::Debug for MultiplexerClientChannel<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiplexerClientChannel")
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}

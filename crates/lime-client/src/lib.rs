//! Client-side channel management.
//!
//! - [`ClientConfig`]: TOML client settings
//! - [`ChannelBuilder`] / [`TcpChannelBuilder`]: produce established channels
//! - [`OnDemandClientChannel`]: builds lazily and rebuilds after failures
//! - [`MultiplexerClientChannel`]: round-robin pool of on-demand channels
//! - [`RetryPolicy`]: decides whether a failed operation is retried
//!
//! ```rust,no_run
//! use lime_client::{ClientConfig, OnDemandClientChannel, TcpChannelBuilder};
//! use lime_core::{Command, CommandMethod};
//!
//! # async fn run() -> Result<(), lime_client::ClientError> {
//! let config = ClientConfig::load()?;
//! let builder = TcpChannelBuilder::from_config(&config)?;
//! let channel = OnDemandClientChannel::with_retry_policy(builder, config.retry.policy());
//!
//! let account = channel
//!     .process_command(Command::new(CommandMethod::Get, "/account"))
//!     .await?;
//! println!("{:?}", account.status);
//! channel.finish().await?;
//! # Ok(())
//! # }
//! ```

mod builder;
mod config;
mod error;
mod multiplexer;
mod on_demand;
mod retry;

pub use builder::{ChannelBuilder, TcpChannelBuilder};
pub use config::{ClientConfig, RetryKind, RetrySettings};
pub use error::{ClientError, ClientResult};
pub use multiplexer::MultiplexerClientChannel;
pub use on_demand::OnDemandClientChannel;
pub use retry::{ExponentialBackoff, FixedRetry, NoRetry, RetryPolicy};

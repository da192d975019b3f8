//! Channels: envelope exchange over one transport within one session.
//!
//! A [`Channel`] is created over a [`Transport`](lime_protocol::Transport),
//! established by a [`ClientNegotiator`] or [`ServerNegotiator`], and then
//! used to exchange messages, notifications and commands:
//!
//! ```ignore
//! let channel = Channel::new(transport, ChannelConfig::default());
//! ClientNegotiator::new(options).establish(&channel).await?;
//!
//! let response = channel
//!     .process_command(Command::new(CommandMethod::Get, "/account"))
//!     .await?;
//! channel.finish().await?;
//! ```

mod channel;
mod config;
mod error;
pub mod negotiation;
mod pending;

pub use channel::{Channel, ChannelStats};
pub use config::{ChannelConfig, DEFAULT_BUFFER_LIMIT, OverflowPolicy};
pub use error::{ChannelError, ChannelResult};
pub use negotiation::{
    AllowAllAuthenticator, AuthenticationResult, Authenticator, ClientNegotiator,
    ClientSessionOptions, EstablishedSession, ServerNegotiator, ServerSessionOptions,
};

//! Server-side hosting of Lime channels.
//!
//! A [`ChannelListener`] accepts TCP connections, runs the server session
//! negotiation on each and hands established channels to a handler.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use lime_core::{DomainRole, Identity, Node};
//! use lime_server::{ChannelListener, MemoryAuthenticator, ServerConfig, ShutdownHandle};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let node: Node = "postmaster@example.org/server".parse()?;
//!     let listener = ChannelListener::bind(ServerConfig::new("0.0.0.0:55321", node)).await?;
//!
//!     let authenticator = MemoryAuthenticator::new();
//!     authenticator.set_password(Identity::parse("alice@example.org")?, "secret", DomainRole::Member);
//!
//!     let shutdown = ShutdownHandle::new();
//!     shutdown.listen_for_ctrl_c();
//!     listener
//!         .run_until_shutdown(
//!             Arc::new(authenticator),
//!             |connection| async move {
//!                 while let Ok(message) = connection.channel.receive_message().await {
//!                     let _ = connection.channel.send_message(message).await;
//!                 }
//!             },
//!             shutdown.wait(),
//!         )
//!         .await?;
//!     Ok(())
//! }
//! ```

mod authenticator;
mod config;
mod error;
mod listener;
mod shutdown;

pub use authenticator::MemoryAuthenticator;
pub use config::{DEFAULT_BIND_ADDR, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use listener::{ChannelListener, PendingConnection, ServerConnection};
pub use shutdown::ShutdownHandle;

//! Non-blocking sockets suspended on a readiness event queue.
//!
//! This crate is the I/O core underneath `ferry-http`. Sockets are plain file
//! descriptors driven through raw syscalls; whenever a call would block, the
//! caller suspends on a [`SocketPool`] until an [`EventQueue`] reports the
//! descriptor ready.
//!
//! # Example
//!
//! ```no_run
//! use ferry_socks::{AsyncSocket, AsyncSocketPool, PoolConfig, Socket, SocketAddress, SocketPool};
//! use futures::StreamExt;
//! use std::sync::Arc;
//! use tracing::{error, info};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ferry_socks::SocketError> {
//!     let pool = SocketPool::make(&PoolConfig::default());
//!     pool.prepare().await?;
//!     tokio::spawn({
//!         let pool = pool.clone();
//!         async move {
//!             if let Err(e) = pool.run().await {
//!                 error!(cause = %e, "socket pool failed");
//!             }
//!         }
//!     });
//!
//!     let listener = Socket::new(libc::AF_INET, libc::SOCK_STREAM)?;
//!     listener.set_reuse_address()?;
//!     listener.bind(&SocketAddress::loopback(8080))?;
//!     listener.listen(128)?;
//!     let listener = AsyncSocket::new(listener, Arc::new(pool))?;
//!
//!     let mut sockets = Box::pin(listener.sockets());
//!     while let Some(socket) = sockets.next().await {
//!         let socket = socket?;
//!         info!(fd = %socket.socket().file(), "accepted");
//!         socket.write(b"hello\n").await?;
//!         socket.close()?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`socket`]: descriptors, raw socket calls and errno mapping
//! - [`event_queue`]: epoll, kqueue and poll backends
//! - [`pool`]: the actor multiplexing suspended sockets over one event queue
//! - [`async_socket`]: sockets that suspend instead of blocking
//! - [`buffered`]: chunked byte sequences (counted, in-memory, file, prefix, shared replay)
//! - [`timeout`]: bounding any socket future by a deadline

pub mod address;
pub mod async_socket;
pub mod buffered;
pub mod error;
pub mod event_queue;
pub mod interest;
pub mod pool;
pub mod socket;
pub mod timeout;

mod utils;

pub use address::SocketAddress;
pub use async_socket::{AsyncSocket, SocketBytes};
pub use buffered::{BufferedIterator, BufferedSequence};
pub use error::SocketError;
pub use event_queue::{EventNotification, EventQueue, EventQueueConfig, NotificationErrors};
pub use interest::Interest;
pub use pool::{AsyncSocketPool, PoolConfig, PoolState, SocketPool, Suspension, WaiterId};
pub use socket::{FileDescriptor, Socket};
pub use timeout::with_timeout;

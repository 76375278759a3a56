// #![include_doc("../README.md", start)]
//! # jsonlink
//!
//! A bidirectional JSON-RPC 2.0 message connection for tokio.
//!
//! ## Overview
//!
//! `jsonlink` turns any transport that reads and writes discrete JSON-RPC messages into a
//! typed request/response/notification API. Either side may send requests and notifications.
//!
//! ## Features
//!
//! - Incoming messages are dispatched one at a time, in arrival order
//! - Request handlers reply immediately or through a future
//! - Cancellation with `$/cancelRequest`, in both directions
//!   - A pluggable strategy can answer a request that is cancelled before it was dispatched
//! - Protocol tracing with `$/setTraceNotification` and `$/logTraceNotification`
//! - Lifecycle events for errors, close, dispose and unhandled notifications
//! - In-memory and line-delimited byte stream transports
//!
//! ## Usage
//!
//! ```rust
//! use jsonlink::{Connection, ConnectionOptions, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (server, client) = Connection::new_channel(&ConnectionOptions::default());
//!     server.on_request("add", |params, cx| {
//!         let a: i32 = params.arg(0)?;
//!         let b: i32 = params.arg(1)?;
//!         cx.success(&(a + b))
//!     })?;
//!     server.listen()?;
//!     client.listen()?;
//!
//!     let sum: i32 = client.request("add", (1, 2)).await?;
//!     assert_eq!(sum, 3);
//!     Ok(())
//! }
//! ```
//!
//! ### Asynchronous handlers
//!
//! ```rust
//! use jsonlink::{Connection, ConnectionOptions, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (server, client) = Connection::new_channel(&ConnectionOptions::default());
//!     server.on_request("slow", |params, cx| {
//!         let s: String = params.arg(0)?;
//!         cx.handle_async(async move {
//!             tokio::task::yield_now().await;
//!             Ok(s.to_uppercase())
//!         })
//!     })?;
//!     server.listen()?;
//!     client.listen()?;
//!
//!     let s: String = client.request("slow", ("hello",)).await?;
//!     assert_eq!(s, "HELLO");
//!     Ok(())
//! }
//! ```
//!
//! ### Standard I/O
//!
//! ```rust,no_run
//! use jsonlink::{Connection, ConnectionOptions, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let connection = Connection::from_stdio(&ConnectionOptions::default());
//!     connection.on_request("ping", |_, cx| cx.success(&"pong"))?;
//!     connection.listen()?;
//!     std::future::pending::<()>().await;
//!     Ok(())
//! }
//! ```
//!
//! ## License
//!
//! This project is dual licensed under Apache-2.0/MIT.
// #![include_doc("../README.md", end)]

//! # lib_japi
//!
//! Embeddable JSON API library: newline-delimited JSON over TCP, with named
//! request handlers and named push services.
//!
//! An application registers handlers and push services on a
//! [`JapiContext`], then runs [`start_server`]. Connected clients send one
//! `{ "japi_request": ... }` object per line and get one response line
//! back; push services fan unsolicited `{ "japi_pushsrv": ... }` messages
//! out to every subscribed client from their own producer task.
//!
//! ```no_run
//! use lib_japi::{start_server, JapiContext};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), lib_japi::JapiError> {
//!     let ctx = JapiContext::new();
//!     ctx.register("ping", |_ctx, _args, response| {
//!         response["pong"] = json!(true);
//!     })?;
//!     start_server(ctx, 1234).await
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod connections;
pub mod core;
pub mod error;
pub mod utils;

pub use crate::connections::line_reader::LineReader;
pub use crate::connections::listener::TcpKeepaliveConfig;
pub use crate::core::context::JapiContext;
pub use crate::core::pushsrv::PushService;
pub use crate::core::registry::RequestHandler;
pub use crate::core::server::{serve, start_server};
pub use crate::error::JapiError;

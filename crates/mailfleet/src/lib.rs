//! # mailfleet
//!
//! Outbound mail delivery: assemble a message, then hand it to a smart host
//! or straight to the recipient's mail exchangers, over fleets of routes
//! with bounded concurrency.
//!
//! ## Features
//!
//! - **Routes**: fixed or reverse-resolved HELO name, local bind address or
//!   SOCKS5 proxy, NAT map, per-route concurrency limit
//! - **Direct delivery**: MX lookup with implicit MX and failover in
//!   preference order
//! - **Smart hosts**: STARTTLS when advertised, AUTH PLAIN with credentials
//! - **Streaming**: messages render on the blocking pool straight into DATA
//! - **Pipeline**: one shared queue, per-route admission slots, exactly one
//!   result callback per task
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailfleet::{Email, Pipeline, RouteConfig, mime::Message};
//!
//! #[tokio::main]
//! async fn main() -> mailfleet::Result<()> {
//!     let route = RouteConfig::builder("main")
//!         .hostname("mail.example.org")
//!         .stream(10)
//!         .build();
//!     let pipeline = Pipeline::new(&[route])?;
//!     pipeline.start()?;
//!
//!     let message = Message::builder()
//!         .from("Alice <alice@example.org>")
//!         .to("Bob <bob@example.com>")
//!         .subject("Hi")
//!         .text("Hello")
//!         .build()?;
//!
//!     let email = Email::new("1", message).on_result(|result| {
//!         println!("{}: {:?} in {:?}", result.id, result.error, result.duration);
//!     });
//!     pipeline.send(email).await?;
//!
//!     pipeline.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Route configuration and validation
//! - [`resolver`]: MX and reverse DNS lookups behind the `Resolve` trait
//! - [`dialer`]: Connection setup with failover and HELO discovery
//! - [`session`]: The SMTP transaction for one message
//! - [`pipeline`]: Concurrent delivery across routes

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod dialer;
mod email;
mod error;
pub mod pipeline;
pub mod resolver;
pub mod session;

pub use config::{Route, RouteConfig, RouteConfigBuilder, SmartHost};
pub use dialer::{Connection, Dialer};
pub use email::{DeliveryResult, Email, ResultCallback};
pub use error::{Error, Result};
pub use pipeline::{Deliver, Pipeline, SmtpDeliverer, deliver_now};
pub use resolver::{MailServer, Resolve, Resolver};

pub use mailfleet_mime as mime;
pub use mailfleet_smtp as smtp;

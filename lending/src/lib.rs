//! # Lending
//!
//! The lending application: configuration, infrastructure bootstrap and the two
//! processes built from the engine crates.
//!
//! | Binary           | Runs |
//! |------------------|------|
//! | `lending-server` | HTTP loan routes, `/ws` live feed, the live hub and its relay consumer |
//! | `counter-worker` | The durable counter worker (scale out by starting more) |
//!
//! Both read their settings from the environment (see [`Config`]) and exit
//! cleanly on Ctrl+C or SIGTERM.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bootstrap;
pub mod config;
pub mod lifecycle;
pub mod server;
pub mod worker;

pub use bootstrap::{Resources, init_tracing, start_metrics};
pub use config::Config;

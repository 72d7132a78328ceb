#![warn(clippy::indexing_slicing)]

//! Client for the headscale control-plane API.
//!
//! [`client`] is the transport layer: it turns logical operations into
//! authenticated HTTP requests. [`preauthkeys`] and [`users`] are the domain
//! operations built on top of it.

pub mod client;
pub mod error;
pub mod preauthkeys;
pub mod users;

pub use client::{ApiRequest, Client, ClientConfig, RequestBody};
pub use error::{HeadscaleApiError, Result};

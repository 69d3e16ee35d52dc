//! Core library for the Collabo client.
//!
//! Every authenticated call to the Collabo API goes through one
//! [`Mediator`](api::Mediator). It owns the session token, attaches it as a
//! bearer header, and clears the session when the server answers 401.
//!
//! - [`config`]: base address and token store selection
//! - [`auth`]: token persistence (`Session`, key-value stores) and claim decoding
//! - [`api`]: transport, navigation hook, the mediator itself, login/signup

pub mod api;
pub mod auth;
pub mod config;

pub use api::{Mediator, RequestError, RequestOptions};
pub use auth::Session;
pub use config::Config;

//! Request mediation for the Collabo REST API.
//!
//! This module provides the `Mediator`, the single choke point for
//! authenticated calls: it injects `Authorization: Bearer <token>`, maps
//! responses to JSON or a `RequestError`, and ends the session on 401.
//! The HTTP transport and the login redirect are injected collaborators.

pub mod auth;
pub mod error;
pub mod mediator;
pub mod navigator;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{LoginResponse, SignupForm, SignupResponse};
pub use error::{AuthError, RequestError};
pub use mediator::{Mediator, RequestOptions};
pub use navigator::{LoginSignal, Navigator, NoopNavigator};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};

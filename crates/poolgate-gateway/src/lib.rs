//! poolgate gateway: the client-facing grant/checkout API, the
//! administrative service, grant token generation and the response
//! envelope.

pub mod admin;
pub mod config;
pub mod envelope;
pub mod error;
pub mod retry;
pub mod service;
pub mod token;

pub use admin::{AdminService, GrantDetails, GrantExpiry, IssueGrants};
pub use config::GatewayConfig;
pub use envelope::{CheckoutView, Envelope, ErrorBody, LeasedView, ResourceView, VerifyView};
pub use error::GatewayError;
pub use service::Gateway;

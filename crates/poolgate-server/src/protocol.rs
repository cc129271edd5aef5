//! JSON-lines request decoding and dispatch to the gateway.
//!
//! One request per line:
//!
//! ```json
//! {"op":"checkout","token":"WS-7K2Q-M0ZD-PX41-C9RT","client_identity":"A1B2C3"}
//! ```
//!
//! One [`Envelope`] per line in response.

use poolgate_core::clock::Clock;
use poolgate_core::error::{PoolgateError, PoolgateResult};
use poolgate_core::repository::{
    AllocationStore, GrantRepository, LeaseRepository, ResourceRepository,
};
use poolgate_gateway::{Envelope, Gateway};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Verify,
    Checkout,
    ListLeased,
    Rebind,
    Current,
}

impl Op {
    fn as_str(self) -> &'static str {
        match self {
            Op::Verify => "verify",
            Op::Checkout => "checkout",
            Op::ListLeased => "list_leased",
            Op::Rebind => "rebind",
            Op::Current => "current",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub op: Op,
    pub token: String,
    pub client_identity: String,
    #[serde(default)]
    pub resource_id: Option<Uuid>,
}

/// Decode one request line, run it and encode the response line.
pub async fn handle_line<G, R, L, S, K>(gateway: &Gateway<G, R, L, S, K>, line: &str) -> String
where
    G: GrantRepository,
    R: ResourceRepository,
    L: LeaseRepository,
    S: AllocationStore,
    K: Clock,
{
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "Malformed request line");
            return rejection(format!("malformed request: {e}"));
        }
    };

    let op = request.op.as_str();
    let response = dispatch(gateway, request).await;
    debug!(op, "Request handled");
    response
}

async fn dispatch<G, R, L, S, K>(gateway: &Gateway<G, R, L, S, K>, request: Request) -> String
where
    G: GrantRepository,
    R: ResourceRepository,
    L: LeaseRepository,
    S: AllocationStore,
    K: Clock,
{
    let Request {
        op,
        token,
        client_identity,
        resource_id,
    } = request;

    match op {
        Op::Verify => encode(gateway.verify(&token, &client_identity).await),
        Op::Checkout => encode(gateway.checkout(&token, &client_identity).await),
        Op::ListLeased => encode(gateway.list_leased(&token, &client_identity).await),
        Op::Current => encode(gateway.current(&token, &client_identity).await),
        Op::Rebind => match resource_id {
            Some(resource_id) => {
                encode(gateway.rebind(&token, &client_identity, resource_id).await)
            }
            None => rejection("rebind requires resource_id".into()),
        },
    }
}

/// A `validation` failure line for input that never reached the gateway.
pub fn rejection(message: String) -> String {
    encode(Err::<(), _>(PoolgateError::Validation { message }))
}

fn encode<T: Serialize>(result: PoolgateResult<T>) -> String {
    let envelope: Envelope<T> = result.into();
    match serde_json::to_string(&envelope) {
        Ok(line) => line,
        Err(e) => {
            error!(error = %e, "Failed to encode response");
            let fallback: Envelope<()> =
                Envelope::failure(&PoolgateError::Internal("response encoding failed".into()));
            serde_json::to_string(&fallback).unwrap_or_default()
        }
    }
}

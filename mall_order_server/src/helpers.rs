use std::future::{ready, Ready};

use actix_web::{dev::Payload, FromRequest, HttpRequest};
use log::*;
use mall_order_engine::db_types::UserId;

use crate::errors::ServerError;

/// Set by the login filter in front of this server once it has authenticated the caller.
pub const USER_ID_HEADER: &str = "X-User-Id";

/// The authenticated caller of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub UserId);

impl Caller {
    pub fn id(&self) -> UserId {
        self.0
    }
}

impl FromRequest for Caller {
    type Error = ServerError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(caller_from_request(req))
    }
}

pub fn caller_from_request(req: &HttpRequest) -> Result<Caller, ServerError> {
    let value = req
        .headers()
        .get(USER_ID_HEADER)
        .ok_or_else(|| ServerError::MissingCaller(format!("No {USER_ID_HEADER} header")))?;
    let id = value
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse::<UserId>().ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| {
            debug!("💻️ Rejected malformed {USER_ID_HEADER} header: {value:?}");
            ServerError::MissingCaller(format!("{USER_ID_HEADER} is not a valid user id"))
        })?;
    trace!("💻️ Request from user #{id}");
    Ok(Caller(id))
}

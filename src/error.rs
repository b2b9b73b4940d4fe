use crate::response::Status;
use serde::{Deserialize, Serialize};
use serde_json;
use std::error;
use std::fmt;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServiceError {
    pub msg: String,
    pub status: Status,
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let json = serde_json::to_string_pretty(&self).map_err(|_| fmt::Error)?;
        write!(f, "{}", json)
    }
}

impl error::Error for ServiceError {}

impl ServiceError {
    /// Input that cannot be used at all: missing file, invalid JSON, bad event.
    pub fn bad_request<T: std::fmt::Display>(msg: T) -> ServiceError {
        ServiceError {
            msg: msg.to_string(),
            status: Status::BadRequest,
        }
    }

    /// A page was fetched but yielded nothing usable.
    pub fn unprocessable<T: std::fmt::Display>(msg: T) -> ServiceError {
        ServiceError {
            msg: msg.to_string(),
            status: Status::UnprocessableEntity,
        }
    }

    pub fn internal_server_error<T: std::fmt::Display>(msg: T) -> ServiceError {
        ServiceError {
            msg: msg.to_string(),
            status: Status::InternalServerError,
        }
    }

    /// Upstream site answered with a failure status or the connection broke.
    pub fn bad_gateway<T: std::fmt::Display>(msg: T) -> ServiceError {
        ServiceError {
            msg: msg.to_string(),
            status: Status::BadGateway,
        }
    }

    pub fn gateway_timeout<T: std::fmt::Display>(msg: T) -> ServiceError {
        ServiceError {
            msg: msg.to_string(),
            status: Status::GatewayTimeout,
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ServiceError::gateway_timeout(err)
        } else {
            ServiceError::bad_gateway(err)
        }
    }
}

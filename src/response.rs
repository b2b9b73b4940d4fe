use serde::{de, Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::error::ServiceError;

#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    Ok,
    BadRequest,
    UnprocessableEntity,
    InternalServerError,
    BadGateway,
    GatewayTimeout,
}

impl Status {
    fn code(&self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::UnprocessableEntity => 422,
            Status::InternalServerError => 500,
            Status::BadGateway => 502,
            Status::GatewayTimeout => 504,
        }
    }
}

impl Serialize for Status {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u16(self.code())
    }
}

struct StatusCodeVisitor;

impl<'de> de::Visitor<'de> for StatusCodeVisitor {
    type Value = Status;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("Status")
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            200 => Ok(Status::Ok),
            400 => Ok(Status::BadRequest),
            422 => Ok(Status::UnprocessableEntity),
            500 => Ok(Status::InternalServerError),
            502 => Ok(Status::BadGateway),
            504 => Ok(Status::GatewayTimeout),
            value => Err(de::Error::custom(value.to_string())),
        }
    }
}

impl<'de> de::Deserialize<'de> for Status {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_u16(StatusCodeVisitor)
    }
}

#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    pub status_code: Status,
    pub headers: Value,
    pub body: Value,
}

pub fn make_response_payload(
    result: Result<Value, ServiceError>,
) -> Result<Value, lambda_runtime::Error> {
    let headers = json!({
        "Content-Type": "application/json",
        "Access-Control-Allow-Origin": "*"
    });
    let response_payload = match result {
        Err(err) => ResponsePayload {
            status_code: err.status,
            headers,
            body: Value::String(err.msg),
        },
        Ok(body) => ResponsePayload {
            status_code: Status::Ok,
            headers,
            body,
        },
    };
    serde_json::to_value(response_payload).map_err(lambda_runtime::Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_import_becomes_error_payload() {
        let payload =
            make_response_payload(Err(ServiceError::bad_request("input file not found"))).unwrap();
        assert_eq!(payload["statusCode"], 400);
        assert_eq!(payload["body"], "input file not found");
    }

    #[test]
    fn payload_reads_back_status() {
        let payload = make_response_payload(Ok(json!({"created": 3}))).unwrap();
        let parsed: ResponsePayload = serde_json::from_value(payload).unwrap();
        assert_eq!(parsed.status_code, Status::Ok);
        assert_eq!(parsed.body["created"], 3);
    }

    #[test]
    fn unknown_status_code_is_rejected() {
        let res: Result<Status, _> = serde_json::from_value(json!(418));
        assert!(res.is_err());
    }
}

//! protoo wire messages
//!
//! Every frame is a JSON object flagged with exactly one of `request`,
//! `response` or `notification`:
//!
//! ```text
//! {"request":true,"id":1,"method":"join","data":{..}}
//! {"response":true,"id":1,"ok":true,"data":{..}}
//! {"response":true,"id":1,"ok":false,"errorCode":404,"errorReason":"room not found"}
//! {"notification":true,"method":"stream-add","data":{..}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(thiserror::Error, Debug)]
pub enum MessageError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("malformed protoo message ({0})")]
    Malformed(&'static str),
}

/// Error carried by a rejected response
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{code} => {reason}")]
pub struct ResponseError {
    pub code: i64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: u64,
    pub method: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u64,
    pub result: Result<Value, ResponseError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Frame {
    #[serde(default, skip_serializing_if = "is_false")]
    request: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    response: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    notification: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ok: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_reason: Option<String>,
}

impl Message {
    pub fn from_json(text: &str) -> Result<Self, MessageError> {
        let frame: Frame = serde_json::from_str(text)?;
        let data = frame.data.unwrap_or(Value::Null);
        if frame.request {
            let id = frame.id.ok_or(MessageError::Malformed("request without id"))?;
            let method = frame.method.ok_or(MessageError::Malformed("request without method"))?;
            Ok(Message::Request(Request { id, method, data }))
        } else if frame.response {
            let id = frame.id.ok_or(MessageError::Malformed("response without id"))?;
            let result = if frame.ok.unwrap_or(false) {
                Ok(data)
            } else {
                Err(ResponseError {
                    code: frame.error_code.unwrap_or_default(),
                    reason: frame.error_reason.unwrap_or_default(),
                })
            };
            Ok(Message::Response(Response { id, result }))
        } else if frame.notification {
            let method = frame.method.ok_or(MessageError::Malformed("notification without method"))?;
            Ok(Message::Notification(Notification { method, data }))
        } else {
            Err(MessageError::Malformed("missing request/response/notification flag"))
        }
    }

    pub fn to_json(&self) -> Result<String, MessageError> {
        let frame = match self {
            Message::Request(request) => Frame {
                request: true,
                id: Some(request.id),
                method: Some(request.method.clone()),
                data: Some(request.data.clone()),
                ..Default::default()
            },
            Message::Response(Response { id, result: Ok(data) }) => Frame {
                response: true,
                id: Some(*id),
                ok: Some(true),
                data: Some(data.clone()),
                ..Default::default()
            },
            Message::Response(Response { id, result: Err(error) }) => Frame {
                response: true,
                id: Some(*id),
                ok: Some(false),
                error_code: Some(error.code),
                error_reason: Some(error.reason.clone()),
                ..Default::default()
            },
            Message::Notification(notification) => Frame {
                notification: true,
                method: Some(notification.method.clone()),
                data: Some(notification.data.clone()),
                ..Default::default()
            },
        };
        Ok(serde_json::to_string(&frame)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_rejected_response() {
        let text = r#"{"response":true,"id":7,"ok":false,"errorCode":401,"errorReason":"unauthorized"}"#;
        let message = Message::from_json(text).unwrap();
        assert_eq!(
            message,
            Message::Response(Response {
                id: 7,
                result: Err(ResponseError { code: 401, reason: "unauthorized".into() }),
            })
        );
    }

    #[test]
    fn parses_notification_without_data() {
        let message = Message::from_json(r#"{"notification":true,"method":"ping"}"#).unwrap();
        assert_eq!(
            message,
            Message::Notification(Notification { method: "ping".into(), data: Value::Null })
        );
    }

    #[test]
    fn request_wire_shape() {
        let request = Message::Request(Request { id: 3, method: "join".into(), data: json!({"rid": "r1"}) });
        let value: Value = serde_json::from_str(&request.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"request": true, "id": 3, "method": "join", "data": {"rid": "r1"}}));
    }

    #[test]
    fn rejects_unflagged_frames() {
        assert!(matches!(
            Message::from_json(r#"{"id":1,"method":"join"}"#),
            Err(MessageError::Malformed(_))
        ));
        assert!(matches!(Message::from_json("not json"), Err(MessageError::Json(_))));
    }
}

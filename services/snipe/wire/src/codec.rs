//! JSON-lines encoding for the bridge transport.
//!
//! Each frame is a single JSON object terminated by `\n`. The correlation id
//! travels in the `@extra` field; frames without `@extra` are push events.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;

use crate::error::WireError;
use crate::id::PUSH_ID;
use crate::object::{Frame, Object, RemoteError};
use crate::request::Request;

/// Field carrying the correlation id
pub const EXTRA_FIELD: &str = "@extra";

/// Error code of the synthetic error standing in for an undecodable reply
pub const UNDECODABLE_REPLY: i32 = -1;

/// Default maximum size of a single encoded line (16 MiB)
pub const DEFAULT_MAX_LINE: usize = 16 * 1024 * 1024;

/// Encode a request into a newline-terminated line
pub fn encode_request(id: u64, request: &Request) -> Result<Bytes, WireError> {
    let mut value = serde_json::to_value(request)?;
    let map = value.as_object_mut().ok_or(WireError::Malformed)?;
    map.insert(EXTRA_FIELD.to_string(), Value::from(id));

    let body = serde_json::to_vec(&value)?;
    let mut buf = BytesMut::with_capacity(body.len() + 1);
    buf.put_slice(&body);
    buf.put_u8(b'\n');
    Ok(buf.freeze())
}

/// Decode a single line (with or without the trailing newline) into a frame
pub fn decode_frame(line: &[u8], max_line: usize) -> Result<Frame, WireError> {
    if line.len() > max_line {
        return Err(WireError::Size(line.len()));
    }

    let mut value: Value = serde_json::from_slice(trim_newline(line))?;
    let map = value.as_object_mut().ok_or(WireError::Malformed)?;
    let id = match map.remove(EXTRA_FIELD) {
        None | Some(Value::Null) => PUSH_ID,
        Some(extra) => extra.as_u64().ok_or(WireError::Extra)?,
    };

    match serde_json::from_value::<Object>(value) {
        Ok(object) => Ok(Frame::new(id, object)),
        // A correlated reply must still reach its waiter
        Err(e) if id != PUSH_ID => Ok(Frame::new(
            id,
            Object::Error(RemoteError::new(UNDECODABLE_REPLY, format!("undecodable reply: {}", e))),
        )),
        Err(e) => Err(e.into()),
    }
}

fn trim_newline(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\n' || line[end - 1] == b'\r') {
        end -= 1;
    }
    &line[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_carries_extra() {
        let line = encode_request(7, &Request::GetMe).unwrap();
        assert_eq!(line.last(), Some(&b'\n'));

        let value: Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(value["@type"], "getMe");
        assert_eq!(value["@extra"], 7);
    }

    #[test]
    fn test_decode_reply_and_push() {
        let frame = decode_frame(
            br#"{"@type":"error","code":400,"message":"STARGIFT_UPGRADE_UNAVAILABLE","@extra":987654321}"#,
            DEFAULT_MAX_LINE,
        )
        .unwrap();
        assert_eq!(frame.id, 987_654_321);
        assert_eq!(
            frame.object,
            Object::Error(RemoteError::new(400, "STARGIFT_UPGRADE_UNAVAILABLE"))
        );

        let frame = decode_frame(
            b"{\"@type\":\"updateAuthorizationState\",\"authorization_state\":{\"@type\":\"authorizationStateReady\"}}\r\n",
            DEFAULT_MAX_LINE,
        )
        .unwrap();
        assert_eq!(frame.id, PUSH_ID);
    }

    #[test]
    fn test_undecodable_reply_keeps_its_id() {
        let frame = decode_frame(
            br#"{"@type":"upgradeGiftResult","gift":{"id":["not","an","id"]},"@extra":7}"#,
            DEFAULT_MAX_LINE,
        )
        .unwrap();
        assert_eq!(frame.id, 7);
        match frame.object {
            Object::Error(e) => {
                assert_eq!(e.code, UNDECODABLE_REPLY);
                assert!(e.message.starts_with("undecodable reply"));
            }
            other => panic!("expected synthetic error, got {:?}", other),
        }

        // Pushes have no waiter and are still rejected
        assert!(matches!(
            decode_frame(
                br#"{"@type":"updateAuthorizationState","authorization_state":7}"#,
                DEFAULT_MAX_LINE
            ),
            Err(WireError::Json(_))
        ));
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        assert!(matches!(
            decode_frame(b"[1,2,3]", DEFAULT_MAX_LINE),
            Err(WireError::Malformed)
        ));
        assert!(matches!(
            decode_frame(br#"{"@type":"ok","@extra":"abc"}"#, DEFAULT_MAX_LINE),
            Err(WireError::Extra)
        ));
        assert!(matches!(
            decode_frame(br#"{"@type":"ok"}"#, 4),
            Err(WireError::Size(14))
        ));
    }
}

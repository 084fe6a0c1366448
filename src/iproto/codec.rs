// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Frame reader/writer and header+body decode. A frame is
//! `<uint32 length> <map{header}> <map{body}?>`, `length` counting the
//! two maps combined. Decoding never consumes bytes it can't fully parse:
//! a short buffer returns `Ok(None)` so the connection can keep reading.

use rmpv::Value;
use rmpv::decode::read_value;
use rmpv::encode::write_value;

use crate::iproto::error::ProtocolError;
use crate::iproto::request::{Request, required_body_keys};
use crate::iproto::wire::{IprotoKey, RequestType};

/// A request plus the number of bytes it consumed from the input buffer.
pub struct DecodedFrame {
    pub request: Request,
    pub consumed: usize,
}

/// Attempts to decode exactly one frame from the front of `buf`.
/// Returns `Ok(None)` if `buf` does not yet contain a complete frame.
pub fn try_decode_frame(buf: &[u8]) -> Result<Option<DecodedFrame>, ProtocolError> {
    let mut cursor = std::io::Cursor::new(buf);
    let length = match read_value(&mut cursor) {
        Ok(Value::Integer(n)) => n
            .as_u64()
            .ok_or_else(|| ProtocolError::InvalidMsgpack("frame length is not a uint".to_string()))?
            as usize,
        Ok(_) => return Err(ProtocolError::InvalidMsgpack("frame length is not an integer".to_string())),
        Err(_) => return Ok(None), // not enough bytes to even read the length prefix
    };
    let prefix_len = cursor.position() as usize;
    let frame_end = prefix_len + length;
    if buf.len() < frame_end {
        return Ok(None);
    }

    let mut body_cursor = std::io::Cursor::new(&buf[prefix_len..frame_end]);
    let header = read_value(&mut body_cursor)
        .map_err(|e| ProtocolError::InvalidMsgpack(format!("header: {e}")))?;
    let (request_type, sync, schema_version) = decode_header(&header)?;

    let body = if (body_cursor.position() as usize) < length {
        Some(
            read_value(&mut body_cursor)
                .map_err(|e| ProtocolError::InvalidMsgpack(format!("body: {e}")))?,
        )
    } else {
        None
    };

    if request_type.is_dml() {
        validate_dml_body(request_type, body.as_ref())?;
    }

    Ok(Some(DecodedFrame {
        request: Request {
            request_type,
            sync,
            schema_version,
            body,
            frame_len: frame_end,
        },
        consumed: frame_end,
    }))
}

fn decode_header(header: &Value) -> Result<(RequestType, u64, Option<u64>), ProtocolError> {
    let map = header
        .as_map()
        .ok_or_else(|| ProtocolError::InvalidMsgpack("header is not a map".to_string()))?;

    let mut request_type = None;
    let mut sync = None;
    let mut schema_version = None;

    for (key, value) in map {
        let key = key
            .as_u64()
            .ok_or_else(|| ProtocolError::InvalidMsgpack("header key is not a uint".to_string()))?;
        match key as u8 {
            k if k == IprotoKey::RequestType.code() => {
                let code = value
                    .as_u64()
                    .ok_or_else(|| ProtocolError::InvalidMsgpack("IPROTO_REQUEST_TYPE not uint".to_string()))?;
                request_type = Some(
                    RequestType::from_code(code as u32)
                        .ok_or(ProtocolError::UnknownRequestType(code as u32))?,
                );
            }
            k if k == IprotoKey::Sync.code() => {
                sync = value.as_u64();
            }
            k if k == IprotoKey::SchemaVersion.code() => {
                schema_version = value.as_u64();
            }
            // Replica id / lsn / timestamp are part of the recognized
            // header key space but not mandatory on client-originated
            // requests; accept and ignore them here.
            _ => {}
        }
    }

    let request_type = request_type.ok_or(ProtocolError::MissingRequestField("IPROTO_REQUEST_TYPE", "header"))?;
    let sync = sync.ok_or(ProtocolError::MissingRequestField("IPROTO_SYNC", "header"))?;
    Ok((request_type, sync, schema_version))
}

fn validate_dml_body(request_type: RequestType, body: &Option<Value>) -> Result<(), ProtocolError> {
    let required = required_body_keys(request_type);
    if required.is_empty() {
        return Ok(());
    }
    let map = body
        .as_ref()
        .and_then(|v| v.as_map())
        .ok_or(ProtocolError::MissingRequestField("body", "DML request"))?;

    for key in required {
        let present = map.iter().any(|(k, _)| k.as_u64() == Some(key.code() as u64));
        if !present {
            return Err(ProtocolError::MissingRequestField(key_name(*key), "DML body"));
        }
    }
    Ok(())
}

fn key_name(key: IprotoKey) -> &'static str {
    match key {
        IprotoKey::SpaceId => "space_id",
        IprotoKey::IndexId => "index_id",
        IprotoKey::Key => "key",
        IprotoKey::Tuple => "tuple",
        IprotoKey::Ops => "ops",
        _ => "field",
    }
}

/// Encodes `header`/`body` maps into a complete length-prefixed frame.
pub fn encode_frame(header: &Value, body: Option<&Value>) -> Vec<u8> {
    let mut payload = Vec::new();
    write_value(&mut payload, header).expect("writing to a Vec never fails");
    if let Some(body) = body {
        write_value(&mut payload, body).expect("writing to a Vec never fails");
    }

    let mut frame = Vec::with_capacity(payload.len() + 5);
    write_value(&mut frame, &Value::from(payload.len() as u64)).expect("writing to a Vec never fails");
    frame.extend_from_slice(&payload);
    frame
}

/// Builds an error reply frame: type `IPROTO_TYPE_ERROR | code`, body
/// `{IPROTO_ERROR: message}`.
pub fn encode_error_reply(sync: u64, iproto_type: u32, message: &str) -> Vec<u8> {
    let header = Value::Map(vec![
        (Value::from(IprotoKey::RequestType.code()), Value::from(iproto_type)),
        (Value::from(IprotoKey::Sync.code()), Value::from(sync)),
    ]);
    let body = Value::Map(vec![(Value::from(IprotoKey::Error.code()), Value::from(message))]);
    encode_frame(&header, Some(&body))
}

/// Builds a successful (`IPROTO_OK`) reply frame carrying `data` under
/// `IPROTO_DATA`.
pub fn encode_ok_reply(sync: u64, data: Value) -> Vec<u8> {
    let header = Value::Map(vec![
        (Value::from(IprotoKey::RequestType.code()), Value::from(RequestType::Ok.code())),
        (Value::from(IprotoKey::Sync.code()), Value::from(sync)),
    ]);
    let body = Value::Map(vec![(Value::from(IprotoKey::Data.code()), data)]);
    encode_frame(&header, Some(&body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping_frame(sync: u64) -> Vec<u8> {
        let header = Value::Map(vec![
            (Value::from(IprotoKey::RequestType.code()), Value::from(RequestType::Ping.code())),
            (Value::from(IprotoKey::Sync.code()), Value::from(sync)),
        ]);
        encode_frame(&header, None)
    }

    #[test]
    fn roundtrip_admin_request_with_no_body() {
        let bytes = ping_frame(7);
        let decoded = try_decode_frame(&bytes).expect("ok").expect("complete frame");
        assert_eq!(decoded.request.request_type, RequestType::Ping);
        assert_eq!(decoded.request.sync, 7);
        assert_eq!(decoded.consumed, bytes.len());
    }

    #[test]
    fn partial_frame_returns_none() {
        let bytes = ping_frame(1);
        for cut in 1..bytes.len() {
            let partial = &bytes[..cut];
            assert!(try_decode_frame(partial).expect("no error on partial input").is_none());
        }
    }

    #[test]
    fn select_missing_key_is_rejected() {
        let header = Value::Map(vec![
            (Value::from(IprotoKey::RequestType.code()), Value::from(RequestType::Select.code())),
            (Value::from(IprotoKey::Sync.code()), Value::from(1u64)),
        ]);
        let body = Value::Map(vec![(Value::from(IprotoKey::SpaceId.code()), Value::from(280u64))]);
        let bytes = encode_frame(&header, Some(&body));
        let err = try_decode_frame(&bytes).expect("parses far enough to validate").expect_err("missing key");
        assert!(matches!(err, ProtocolError::MissingRequestField("key", _)));
    }

    #[test]
    fn concatenated_frames_decode_in_order() {
        let mut stream = ping_frame(1);
        stream.extend_from_slice(&ping_frame(2));

        let first = try_decode_frame(&stream).expect("ok").expect("frame 1");
        assert_eq!(first.request.sync, 1);
        let second = try_decode_frame(&stream[first.consumed..]).expect("ok").expect("frame 2");
        assert_eq!(second.request.sync, 2);
    }
}

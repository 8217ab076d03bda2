//! Response classification and decoding.

use super::response::{RawData, ResponseHead};
use crate::codec::{Decoded, ResponseDeserializer};
use crate::error::{MessengerError, Result};

/// Classify a finished task and decode its payload.
///
/// Checks run in a fixed order and the first match wins:
///
/// 1. an error is present: it is returned unchanged
/// 2. no response: [`MessengerError::ResponseMissing`]
/// 3. status outside `[200, 300)`: [`MessengerError::StatusOutOfRange`]
/// 4. a payload is present: the deserializer's result, failures mapped to
///    [`MessengerError::DecodeFailure`]
/// 5. otherwise `Ok(None)`
///
/// Transport errors are wrapped as [`MessengerError::TransportFailure`] at
/// the transport boundary, so an error reaching this function is already
/// classified.
pub fn decode_response(
    response: Option<&ResponseHead>,
    payload: Option<&RawData>,
    error: Option<MessengerError>,
    deserializer: &dyn ResponseDeserializer,
) -> Result<Option<Decoded>> {
    if let Some(err) = error {
        return Err(err);
    }
    let response = response.ok_or(MessengerError::ResponseMissing)?;
    if !response.is_success() {
        return Err(MessengerError::StatusOutOfRange(response.status));
    }
    let decoded = match payload {
        Some(RawData::Bytes(body)) => deserializer.decode(body),
        Some(RawData::File(path)) => deserializer.decode_file(path),
        None => return Ok(None),
    };
    decoded.map(Some).map_err(|err| match err {
        err @ MessengerError::DecodeFailure(_) => err,
        other => MessengerError::decode(other),
    })
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::codec::{DataDeserializer, JsonDeserializer};
    use crate::transport::TransportError;

    fn json_body(raw: &'static [u8]) -> RawData {
        RawData::Bytes(Bytes::from_static(raw))
    }

    #[test]
    fn test_status_boundaries() {
        let d = JsonDeserializer::new();
        let body = json_body(b"{}");

        let err = decode_response(Some(&ResponseHead::new(199)), Some(&body), None, &d).unwrap_err();
        assert_eq!(err.status(), Some(199));

        let ok = decode_response(Some(&ResponseHead::new(200)), Some(&body), None, &d).unwrap();
        assert_eq!(ok, Some(Decoded::Json(serde_json::json!({}))));

        let err = decode_response(Some(&ResponseHead::new(300)), Some(&body), None, &d).unwrap_err();
        assert_eq!(err.status(), Some(300));
    }

    #[test]
    fn test_unparsable_json_is_decode_failure() {
        let err = decode_response(
            Some(&ResponseHead::new(200)),
            Some(&json_body(b"not json")),
            None,
            &JsonDeserializer::new(),
        )
        .unwrap_err();
        assert!(matches!(err, MessengerError::DecodeFailure(_)));
    }

    #[test]
    fn test_no_content_is_empty_success() {
        let ok = decode_response(Some(&ResponseHead::new(204)), None, None, &JsonDeserializer::new())
            .unwrap();
        assert_eq!(ok, None);
    }

    #[test]
    fn test_error_takes_precedence() {
        let err = decode_response(
            Some(&ResponseHead::new(500)),
            Some(&json_body(b"{}")),
            Some(MessengerError::from(TransportError::Timeout)),
            &JsonDeserializer::new(),
        )
        .unwrap_err();
        assert!(matches!(err, MessengerError::TransportFailure(_)));
    }

    #[test]
    fn test_missing_response() {
        let err = decode_response(None, None, None, &DataDeserializer::new()).unwrap_err();
        assert!(matches!(err, MessengerError::ResponseMissing));
    }

    #[test]
    fn test_file_payload_uses_decode_file() {
        let payload = RawData::File("/tmp/saved.bin".into());
        let ok = decode_response(
            Some(&ResponseHead::new(200)),
            Some(&payload),
            None,
            &DataDeserializer::new(),
        )
        .unwrap();
        assert_eq!(ok, Some(Decoded::File("/tmp/saved.bin".into())));
    }
}

// Copyright 2023 Divy Srivastava <dj.srivastava23@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::error::WebSocketError;

/// Status code carried in a CLOSE frame.
///
/// See [RFC 6455 §7.4.1](https://www.rfc-editor.org/rfc/rfc6455#section-7.4.1).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CloseCode {
  /// Normal closure.
  Normal,
  /// The endpoint is going away (e.g. server shutdown, browser navigation).
  Away,
  /// A protocol framing violation occurred.
  Protocol,
  /// The endpoint received data it cannot accept.
  Unsupported,
  /// Reserved. MUST NOT appear on the wire.
  Reserved,
  /// No status code was present in the frame. Never sent over the wire.
  NoStatusRcvd,
  /// The connection was closed abnormally, i.e. without a close frame.
  /// Never sent over the wire; a purely local indicator.
  Abnormal,
  /// Received data that was not consistent with the type of message
  /// (e.g. invalid UTF-8 in a Text message or close reason).
  Invalid,
  /// A policy violation not covered by a more specific code.
  Policy,
  /// A message was too large to process.
  Size,
  /// The client expected the server to negotiate an extension it did not.
  Extension,
  /// The server encountered an unexpected condition.
  Error,
  /// The service is restarting.
  Restart,
  /// The server is overloaded and the client should try again later.
  Again,
  /// Reserved for future use.
  Unused(u16),
  /// TLS handshake failure. Never sent over the wire; a purely local
  /// indicator.
  Tls,
  /// Application-defined close code in the range `3000..=4999`.
  Application(u16),
}

impl CloseCode {
  /// True if this close code is valid to receive on the wire, per
  /// RFC 6455 §7.4.1: `1000..=4999` except the reserved/local-only codes.
  /// Anything outside `1000..=4999` (e.g. `50` or `5000`) is rejected too
  /// — `Unused(code)` only covers the gaps *within* that range.
  pub fn is_allowed(&self) -> bool {
    let code: u16 = (*self).into();
    (1000..=4999).contains(&code)
      && !matches!(
        self,
        CloseCode::Reserved
          | CloseCode::NoStatusRcvd
          | CloseCode::Abnormal
          | CloseCode::Tls
      )
  }
}

impl From<u16> for CloseCode {
  fn from(code: u16) -> CloseCode {
    match code {
      1000 => CloseCode::Normal,
      1001 => CloseCode::Away,
      1002 => CloseCode::Protocol,
      1003 => CloseCode::Unsupported,
      1004 => CloseCode::Reserved,
      1005 => CloseCode::NoStatusRcvd,
      1006 => CloseCode::Abnormal,
      1007 => CloseCode::Invalid,
      1008 => CloseCode::Policy,
      1009 => CloseCode::Size,
      1010 => CloseCode::Extension,
      1011 => CloseCode::Error,
      1012 => CloseCode::Restart,
      1013 => CloseCode::Again,
      1015 => CloseCode::Tls,
      3000..=4999 => CloseCode::Application(code),
      _ => CloseCode::Unused(code),
    }
  }
}

impl From<CloseCode> for u16 {
  fn from(code: CloseCode) -> u16 {
    match code {
      CloseCode::Normal => 1000,
      CloseCode::Away => 1001,
      CloseCode::Protocol => 1002,
      CloseCode::Unsupported => 1003,
      CloseCode::Reserved => 1004,
      CloseCode::NoStatusRcvd => 1005,
      CloseCode::Abnormal => 1006,
      CloseCode::Invalid => 1007,
      CloseCode::Policy => 1008,
      CloseCode::Size => 1009,
      CloseCode::Extension => 1010,
      CloseCode::Error => 1011,
      CloseCode::Restart => 1012,
      CloseCode::Again => 1013,
      CloseCode::Tls => 1015,
      CloseCode::Unused(code) => code,
      CloseCode::Application(code) => code,
    }
  }
}

/// Maximum length, in UTF-8 bytes, of a close reason string (RFC 6455
/// bounds the whole CLOSE payload to 125 bytes, 2 of which are the code).
pub const MAX_REASON_BYTES: usize = 123;

/// The decoded form of a CLOSE frame payload: `code` + `reason`. An empty
/// CLOSE payload decodes to `code: None, reason: ""`.
#[derive(Debug, Clone, Default)]
pub struct ClosePayload {
  pub code: Option<CloseCode>,
  pub reason: String,
}

/// Decodes a CLOSE frame payload per RFC 6455 §5.5.1.
///
/// A payload of length 1 is always a protocol error: the 16-bit code
/// can't be split. A payload of length 0 means no status was given. A
/// payload whose reason bytes are not valid UTF-8 is reported as
/// [`WebSocketError::InvalidUTF8`] — callers are expected to still close
/// the connection, substituting close code 1007 for whatever was on the
/// wire (§4.6 of the close coordinator).
pub fn decode_close_payload(
  payload: &[u8],
) -> Result<ClosePayload, WebSocketError> {
  match payload.len() {
    0 => Ok(ClosePayload::default()),
    1 => Err(WebSocketError::InvalidCloseFrame),
    _ => {
      let code =
        CloseCode::from(u16::from_be_bytes([payload[0], payload[1]]));

      if !code.is_allowed() {
        return Err(WebSocketError::InvalidCloseCode);
      }

      let reason = std::str::from_utf8(&payload[2..])
        .map_err(|_| WebSocketError::InvalidUTF8)?
        .to_owned();

      Ok(ClosePayload {
        code: Some(code),
        reason,
      })
    }
  }
}

/// Encodes a close code and reason into a CLOSE frame payload, truncating
/// the reason to [`MAX_REASON_BYTES`] without splitting a UTF-8 codepoint.
pub fn encode_close_payload(code: CloseCode, reason: &str) -> Vec<u8> {
  let reason = truncate_reason(reason);
  let mut payload = Vec::with_capacity(2 + reason.len());
  payload.extend_from_slice(&u16::from(code).to_be_bytes());
  payload.extend_from_slice(reason.as_bytes());
  payload
}

/// Truncates `reason` to at most [`MAX_REASON_BYTES`] bytes, dropping a
/// trailing incomplete UTF-8 sequence rather than splitting a codepoint.
pub fn truncate_reason(reason: &str) -> &str {
  if reason.len() <= MAX_REASON_BYTES {
    return reason;
  }

  let mut end = MAX_REASON_BYTES;
  while end > 0 && !reason.is_char_boundary(end) {
    end -= 1;
  }
  &reason[..end]
}

/// Tracks which side(s) of the close handshake have sent a CLOSE frame.
///
/// The transition to `Closed` happens once both flags are true (§4.6 of
/// the close coordinator), or immediately if the transport terminates
/// first (the driver treats that as a local 1006 regardless of these
/// flags).
#[derive(Debug, Default, Clone, Copy)]
pub struct CloseState {
  pub sent: bool,
  pub received: bool,
}

impl CloseState {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_closed(&self) -> bool {
    self.sent && self.received
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn allowed_codes() {
    assert!(CloseCode::from(1000).is_allowed());
    assert!(CloseCode::from(1011).is_allowed());
    assert!(CloseCode::from(3000).is_allowed());
    assert!(CloseCode::from(4999).is_allowed());
  }

  #[test]
  fn disallowed_codes() {
    assert!(!CloseCode::from(1004).is_allowed());
    assert!(!CloseCode::from(1005).is_allowed());
    assert!(!CloseCode::from(1006).is_allowed());
    assert!(!CloseCode::from(1015).is_allowed());
  }

  #[test]
  fn out_of_range_codes_are_rejected() {
    assert!(!CloseCode::from(50).is_allowed());
    assert!(!CloseCode::from(999).is_allowed());
    assert!(!CloseCode::from(5000).is_allowed());
    assert!(!CloseCode::from(u16::MAX).is_allowed());
  }

  #[test]
  fn out_of_range_code_is_a_protocol_error_on_decode() {
    assert!(matches!(
      decode_close_payload(&[0x00, 0x32]),
      Err(WebSocketError::InvalidCloseCode)
    ));
    assert!(matches!(
      decode_close_payload(&[0x13, 0x88]),
      Err(WebSocketError::InvalidCloseCode)
    ));
  }

  #[test]
  fn empty_payload_decodes_to_no_status() {
    let p = decode_close_payload(&[]).unwrap();
    assert!(p.code.is_none());
    assert_eq!(p.reason, "");
  }

  #[test]
  fn single_byte_payload_is_protocol_error() {
    assert!(matches!(
      decode_close_payload(&[0x03]),
      Err(WebSocketError::InvalidCloseFrame)
    ));
  }

  #[test]
  fn reserved_code_is_rejected() {
    let mut payload = vec![];
    payload.extend_from_slice(&1005u16.to_be_bytes());
    assert!(matches!(
      decode_close_payload(&payload),
      Err(WebSocketError::InvalidCloseCode)
    ));
  }

  #[test]
  fn reason_truncation_does_not_split_codepoints() {
    let reason: String = std::iter::repeat('é').take(100).collect();
    let truncated = truncate_reason(&reason);
    assert!(truncated.len() <= MAX_REASON_BYTES);
    assert!(std::str::from_utf8(truncated.as_bytes()).is_ok());
  }

  #[test]
  fn encode_decode_roundtrip() {
    let payload = encode_close_payload(CloseCode::Normal, "bye");
    let decoded = decode_close_payload(&payload).unwrap();
    assert_eq!(decoded.code, Some(CloseCode::Normal));
    assert_eq!(decoded.reason, "bye");
  }
}

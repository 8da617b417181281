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

//! Server-side generator and client-side parser for the opening-handshake
//! HTTP response. See RFC 6455 §4.2.2.

use crate::error::WebSocketError;
use crate::handshake::accept_key;
use crate::handshake::header_contains_token;
use crate::handshake::is_valid_token;
use crate::handshake::split_comma_list;
use crate::handshake::HeaderList;
use crate::handshake::MAX_HEADER_LINE;
use crate::handshake::MAX_NUM_HEADERS;
use crate::handshake::SUPPORTED_VERSION;

/// A parsed server response (client-side view).
#[derive(Debug, Clone)]
pub struct Response {
  pub status: u16,
  pub http_version: (u8, u8),
  pub accepted_subprotocol: Option<String>,
  pub accepted_extensions: Vec<String>,
  /// The `Sec-WebSocket-Accept` value, present only on a 101 response.
  pub accept_value: Option<String>,
  /// Server-advertised supported versions; only meaningful on a 400
  /// response.
  pub supported_versions: Vec<u32>,
  pub headers: HeaderList,
}

/// Parses a server response buffer (ending in `CRLF CRLF`) and validates
/// it against the `client_key` used to generate the original request.
///
/// Dispatches by status code per §4.5.2:
/// - `101`: requires `Upgrade: websocket`, `Connection: upgrade`, a
///   matching `Sec-WebSocket-Accept`, and — if present — a
///   `Sec-WebSocket-Protocol` drawn from `offered_protocols`.
/// - `400`: extracts `Sec-WebSocket-Version` into `supported_versions`.
/// - anything else: returned as-is for the caller to classify
///   ([`crate::handshake::client`] turns this into a refusal).
pub fn parse(
  buf: &[u8],
  client_key: &str,
  offered_protocols: &[String],
) -> Result<Response, WebSocketError> {
  if buf.len() > MAX_NUM_HEADERS * MAX_HEADER_LINE {
    return Err(WebSocketError::InvalidHandshake(
      "response exceeds configured size limit".into(),
    ));
  }

  let mut header_storage = [httparse::EMPTY_HEADER; MAX_NUM_HEADERS];
  let mut parsed = httparse::Response::new(&mut header_storage);

  let status = parsed
    .parse(buf)
    .map_err(|e| WebSocketError::InvalidHandshake(e.to_string()))?;

  if status.is_partial() {
    return Err(WebSocketError::HandshakeIncomplete);
  }

  let code = parsed.code.ok_or_else(|| {
    WebSocketError::InvalidHandshake("missing status code".into())
  })?;
  let version = parsed.version.unwrap_or(0);

  let mut headers = HeaderList::new();
  for header in parsed.headers.iter() {
    let value = std::str::from_utf8(header.value)
      .map_err(|_| WebSocketError::InvalidHandshake("non-UTF-8 header value".into()))?;
    headers.push(header.name.to_owned(), value.to_owned());
  }

  let mut response = Response {
    status: code,
    http_version: (1, if version == 1 { 1 } else { version as u8 }),
    accepted_subprotocol: None,
    accepted_extensions: Vec::new(),
    accept_value: None,
    supported_versions: Vec::new(),
    headers: headers.clone(),
  };

  match code {
    101 => {
      if version < 1 {
        return Err(WebSocketError::InvalidHttpVersion);
      }

      let upgrade = headers.get("Upgrade").ok_or_else(|| {
        WebSocketError::InvalidHandshake("missing Upgrade header".into())
      })?;
      if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(WebSocketError::InvalidHandshake(
          "Upgrade header is not websocket".into(),
        ));
      }

      let connection = headers.get("Connection").ok_or_else(|| {
        WebSocketError::InvalidHandshake("missing Connection header".into())
      })?;
      if !header_contains_token(connection, "upgrade") {
        return Err(WebSocketError::InvalidHandshake(
          "Connection header does not contain 'upgrade'".into(),
        ));
      }

      let accept = headers.get("Sec-WebSocket-Accept").ok_or_else(|| {
        WebSocketError::InvalidHandshake(
          "missing Sec-WebSocket-Accept header".into(),
        )
      })?;
      let expected = accept_key(client_key);
      if accept != expected {
        return Err(WebSocketError::HandshakeRefused(
          "Sec-WebSocket-Accept mismatch".into(),
        ));
      }
      response.accept_value = Some(accept.to_owned());

      if let Some(proto) = headers.get("Sec-WebSocket-Protocol") {
        if !offered_protocols.iter().any(|p| p == proto) {
          return Err(WebSocketError::HandshakeRefused(format!(
            "server accepted unoffered subprotocol: {proto}"
          )));
        }
        response.accepted_subprotocol = Some(proto.to_owned());
      }

      response.accepted_extensions = headers
        .get("Sec-WebSocket-Extensions")
        .map(split_comma_list)
        .unwrap_or_default();
    }
    400 => {
      response.supported_versions = headers
        .get("Sec-WebSocket-Version")
        .map(split_comma_list)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| v.parse().ok())
        .collect();
    }
    _ => {}
  }

  Ok(response)
}

/// Builds the `HTTP/1.1 101 Switching Protocols` success response
/// (§4.5.1). `subprotocol`/`extension` are the single, already-matched
/// values this server picked from the client's offers, if any.
pub fn generate_success(
  client_key: &str,
  subprotocol: Option<&str>,
  extension: Option<&str>,
  origin_echo: Option<&str>,
) -> Vec<u8> {
  let mut out = Vec::new();
  out.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
  out.extend_from_slice(b"Upgrade: websocket\r\n");
  out.extend_from_slice(b"Connection: Upgrade\r\n");
  out.extend_from_slice(
    format!("Sec-WebSocket-Accept: {}\r\n", accept_key(client_key)).as_bytes(),
  );

  if let Some(subprotocol) = subprotocol {
    out.extend_from_slice(format!("Sec-WebSocket-Protocol: {subprotocol}\r\n").as_bytes());
  }
  if let Some(extension) = extension {
    out.extend_from_slice(format!("Sec-WebSocket-Extensions: {extension}\r\n").as_bytes());
  }
  if let Some(origin) = origin_echo {
    out.extend_from_slice(format!("Access-Control-Allow-Origin: {origin}\r\n").as_bytes());
  }

  out.extend_from_slice(b"\r\n");
  out
}

/// Builds the `HTTP/1.1 400 Bad Request` rejection, which MUST carry the
/// server's supported version list (§4.5.1, §6.1).
pub fn generate_bad_request() -> Vec<u8> {
  format!(
    "HTTP/1.1 400 Bad Request\r\nSec-WebSocket-Version: {SUPPORTED_VERSION}\r\n\r\n"
  )
  .into_bytes()
}

/// Builds the `HTTP/1.1 403 Access Forbidden` rejection sent when the
/// origin authenticator rejects the request's `Origin`.
pub fn generate_forbidden() -> Vec<u8> {
  b"HTTP/1.1 403 Access Forbidden\r\n\r\n".to_vec()
}

/// Picks the first client-offered subprotocol that the server also
/// supports, preserving the server's preference order (§4.5.1: "Matching
/// uses set intersection preserving server preference order").
pub fn negotiate_subprotocol(
  offered: &[String],
  supported: &[String],
) -> Option<String> {
  supported
    .iter()
    .find(|s| offered.iter().any(|o| o == *s) && is_valid_token(s))
    .cloned()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_successful_response() {
    let key = "dGhlIHNhbXBsZSBub25jZQ==";
    let bytes = generate_success(key, None, None, None);
    let resp = parse(&bytes, key, &[]).unwrap();
    assert_eq!(resp.status, 101);
    assert_eq!(
      resp.accept_value.as_deref(),
      Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=")
    );
  }

  #[test]
  fn rejects_unoffered_subprotocol() {
    let key = "dGhlIHNhbXBsZSBub25jZQ==";
    let bytes = generate_success(key, Some("chat"), None, None);
    let err = parse(&bytes, key, &["other".into()]).unwrap_err();
    assert!(matches!(err, WebSocketError::HandshakeRefused(_)));
  }

  #[test]
  fn bad_request_response_carries_versions() {
    let bytes = generate_bad_request();
    let resp = parse(&bytes, "irrelevant", &[]).unwrap();
    assert_eq!(resp.status, 400);
    assert_eq!(resp.supported_versions, vec![SUPPORTED_VERSION]);
  }

  #[test]
  fn negotiate_prefers_server_order() {
    let offered = vec!["chatv1".to_string(), "chatv2".to_string()];
    let supported = vec!["chatv2".to_string(), "chatv1".to_string()];
    assert_eq!(
      negotiate_subprotocol(&offered, &supported),
      Some("chatv2".to_string())
    );
  }
}

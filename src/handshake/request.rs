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

//! Server-side parser and client-side generator for the opening-handshake
//! HTTP/1.1 GET request. See RFC 6455 §4.1/§4.2.

use crate::error::WebSocketError;
use crate::handshake::contains_crlf;
use crate::handshake::header_contains_token;
use crate::handshake::is_valid_token;
use crate::handshake::split_comma_list;
use crate::handshake::HeaderList;
use crate::handshake::MAX_HEADER_LINE;
use crate::handshake::MAX_NUM_HEADERS;
use crate::handshake::SUPPORTED_VERSION;

/// A parsed, validated client upgrade request (server-side view).
#[derive(Debug, Clone)]
pub struct Request {
  pub method: String,
  pub http_version: (u8, u8),
  pub resource: String,
  pub host: String,
  pub key: String,
  /// Requested protocol versions, sorted descending.
  pub versions: Vec<u32>,
  pub origin: Option<String>,
  /// Client-preferred subprotocols, in request order.
  pub protocols: Vec<String>,
  pub extensions: Vec<String>,
  pub headers: HeaderList,
}

/// Parses a byte buffer known to end with `CRLF CRLF` into a validated
/// [`Request`].
///
/// Caps parsing at [`MAX_NUM_HEADERS`] header lines of at most
/// [`MAX_HEADER_LINE`] bytes each (enforced by `httparse`'s fixed-size
/// header array and buffer length check, respectively) — exceeding
/// either is a rejection, matching §4.4.1's stated defaults.
pub fn parse(buf: &[u8]) -> Result<Request, WebSocketError> {
  if buf.len() > MAX_NUM_HEADERS * MAX_HEADER_LINE {
    return Err(WebSocketError::InvalidHandshake(
      "request exceeds configured size limit".into(),
    ));
  }

  let mut header_storage = [httparse::EMPTY_HEADER; MAX_NUM_HEADERS];
  let mut parsed = httparse::Request::new(&mut header_storage);

  let status = parsed
    .parse(buf)
    .map_err(|e| WebSocketError::InvalidHandshake(e.to_string()))?;

  if status.is_partial() {
    return Err(WebSocketError::HandshakeIncomplete);
  }

  let method = parsed.method.unwrap_or("").to_owned();
  if method != "GET" {
    return Err(WebSocketError::InvalidMethod);
  }

  let version = parsed.version.unwrap_or(0);
  if version < 1 {
    return Err(WebSocketError::InvalidHttpVersion);
  }

  let resource = parsed.path.unwrap_or("").to_owned();

  let mut headers = HeaderList::new();
  for header in parsed.headers.iter() {
    let value = std::str::from_utf8(header.value)
      .map_err(|_| WebSocketError::InvalidHandshake("non-UTF-8 header value".into()))?;
    headers.push(header.name.to_owned(), value.to_owned());
  }

  // §3: mandatory on every request except origin/protocols/extensions.
  let host = headers
    .get("Host")
    .ok_or_else(|| WebSocketError::InvalidHandshake("missing Host header".into()))?
    .to_owned();
  if host.is_empty() {
    return Err(WebSocketError::InvalidHandshake("Host header is empty".into()));
  }

  let upgrade = headers
    .get("Upgrade")
    .ok_or_else(|| WebSocketError::InvalidHandshake("missing Upgrade header".into()))?;
  if !upgrade.eq_ignore_ascii_case("websocket") {
    return Err(WebSocketError::InvalidHandshake(
      "Upgrade header is not websocket".into(),
    ));
  }

  let connection = headers
    .get("Connection")
    .ok_or_else(|| WebSocketError::InvalidHandshake("missing Connection header".into()))?;
  if !header_contains_token(connection, "upgrade") {
    return Err(WebSocketError::InvalidHandshake(
      "Connection header does not contain 'upgrade'".into(),
    ));
  }

  let key = headers
    .get("Sec-WebSocket-Key")
    .ok_or(WebSocketError::MissingSecWebSocketKey)?
    .to_owned();
  if key.is_empty() {
    return Err(WebSocketError::MissingSecWebSocketKey);
  }

  let versions_header = headers
    .get("Sec-WebSocket-Version")
    .ok_or_else(|| WebSocketError::InvalidHandshake("missing Sec-WebSocket-Version".into()))?;
  let versions = crate::handshake::parse_versions(versions_header)?;

  let origin = match headers.get("Origin") {
    Some(o) if contains_crlf(o) => {
      return Err(WebSocketError::InvalidHandshake("Origin contains CRLF".into()))
    }
    Some(o) => Some(o.to_owned()),
    None => None,
  };

  let protocols = match headers.get("Sec-WebSocket-Protocol") {
    Some(v) => {
      let candidates = split_comma_list(v);
      for c in &candidates {
        if !is_valid_token(c) {
          return Err(WebSocketError::InvalidHandshake(format!(
            "invalid subprotocol token: {c}"
          )));
        }
      }
      candidates
    }
    None => Vec::new(),
  };

  let extensions = headers
    .get("Sec-WebSocket-Extensions")
    .map(split_comma_list)
    .unwrap_or_default();

  Ok(Request {
    method,
    http_version: (1, if version == 1 { 1 } else { version as u8 }),
    resource,
    host,
    key,
    versions,
    origin,
    protocols,
    extensions,
    headers,
  })
}

/// Options for [`generate`], the client-side request generator.
#[derive(Debug, Default, Clone)]
pub struct GenerateOptions<'a> {
  pub host: &'a str,
  pub resource: &'a str,
  pub origin: Option<&'a str>,
  pub protocols: &'a [String],
  pub extensions: &'a [String],
  pub extra_headers: &'a [(String, String)],
}

/// Generates the canonical client upgrade request (§4.4.2), returning
/// `None` if `resource`, `host`, `origin`, or an extension value contains
/// a bare CR/LF (request/header injection).
///
/// Subprotocol names that fail [`is_valid_token`] are dropped with a
/// `tracing::warn!` rather than failing the whole handshake.
pub fn generate(opts: &GenerateOptions<'_>, key: &str) -> Option<Vec<u8>> {
  if contains_crlf(opts.resource) || contains_crlf(opts.host) {
    return None;
  }
  if let Some(origin) = opts.origin {
    if contains_crlf(origin) {
      return None;
    }
  }
  for ext in opts.extensions {
    if contains_crlf(ext) {
      return None;
    }
  }

  let mut out = Vec::new();
  out.extend_from_slice(format!("GET {} HTTP/1.1\r\n", opts.resource).as_bytes());
  out.extend_from_slice(format!("Host: {}\r\n", opts.host).as_bytes());
  out.extend_from_slice(b"Upgrade: websocket\r\n");
  out.extend_from_slice(b"Connection: Upgrade\r\n");
  out.extend_from_slice(format!("Sec-WebSocket-Key: {key}\r\n").as_bytes());
  out.extend_from_slice(
    format!("Sec-WebSocket-Version: {SUPPORTED_VERSION}\r\n").as_bytes(),
  );

  if let Some(origin) = opts.origin {
    out.extend_from_slice(format!("Origin: {origin}\r\n").as_bytes());
  }

  if !opts.extensions.is_empty() {
    out.extend_from_slice(
      format!("Sec-WebSocket-Extensions: {}\r\n", opts.extensions.join(", ")).as_bytes(),
    );
  }

  let valid_protocols: Vec<&str> = opts
    .protocols
    .iter()
    .filter_map(|p| {
      if is_valid_token(p) {
        Some(p.as_str())
      } else {
        tracing::warn!(protocol = p, "dropping invalid subprotocol token");
        None
      }
    })
    .collect();
  if !valid_protocols.is_empty() {
    out.extend_from_slice(
      format!("Sec-WebSocket-Protocol: {}\r\n", valid_protocols.join(", ")).as_bytes(),
    );
  }

  for (name, value) in opts.extra_headers {
    out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
  }

  out.extend_from_slice(b"\r\n");
  Some(out)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample_request(extra: &str) -> Vec<u8> {
    format!(
      "GET /chat HTTP/1.1\r\n\
       Host: example.com\r\n\
       Upgrade: websocket\r\n\
       Connection: Upgrade\r\n\
       Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
       Sec-WebSocket-Version: 13\r\n\
       {extra}\r\n"
    )
    .into_bytes()
  }

  #[test]
  fn parses_minimal_valid_request() {
    let req = parse(&sample_request("")).unwrap();
    assert_eq!(req.method, "GET");
    assert_eq!(req.resource, "/chat");
    assert_eq!(req.host, "example.com");
    assert_eq!(req.key, "dGhlIHNhbXBsZSBub25jZQ==");
    assert_eq!(req.versions, vec![13]);
  }

  #[test]
  fn rejects_non_get_method() {
    let bytes = b"POST /chat HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: x\r\nSec-WebSocket-Version: 13\r\n\r\n";
    assert!(matches!(parse(bytes), Err(WebSocketError::InvalidMethod)));
  }

  #[test]
  fn rejects_missing_upgrade() {
    let bytes = b"GET /chat HTTP/1.1\r\nHost: x\r\nConnection: Upgrade\r\nSec-WebSocket-Key: x\r\nSec-WebSocket-Version: 13\r\n\r\n";
    assert!(parse(bytes).is_err());
  }

  #[test]
  fn rejects_missing_host() {
    let bytes = b"GET /chat HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: x\r\nSec-WebSocket-Version: 13\r\n\r\n";
    assert!(matches!(
      parse(bytes),
      Err(WebSocketError::InvalidHandshake(_))
    ));
  }

  #[test]
  fn sorts_versions_descending() {
    let req = parse(&sample_request_with_versions("8, 13, 7")).unwrap();
    assert_eq!(req.versions, vec![13, 8, 7]);
  }

  fn sample_request_with_versions(versions: &str) -> Vec<u8> {
    format!(
      "GET /chat HTTP/1.1\r\n\
       Host: example.com\r\n\
       Upgrade: websocket\r\n\
       Connection: Upgrade\r\n\
       Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
       Sec-WebSocket-Version: {versions}\r\n\r\n"
    )
    .into_bytes()
  }

  #[test]
  fn generates_canonical_request() {
    let opts = GenerateOptions {
      host: "localhost:9001",
      resource: "/",
      origin: None,
      protocols: &[],
      extensions: &[],
      extra_headers: &[],
    };
    let bytes = generate(&opts, "dGhlIHNhbXBsZSBub25jZQ==").unwrap();
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.starts_with("GET / HTTP/1.1\r\n"));
    assert!(text.contains("Sec-WebSocket-Version: 13\r\n"));
    assert!(text.ends_with("\r\n\r\n"));
  }

  #[test]
  fn generate_refuses_crlf_injection() {
    let opts = GenerateOptions {
      host: "localhost",
      resource: "/\r\nEvil: header",
      origin: None,
      protocols: &[],
      extensions: &[],
      extra_headers: &[],
    };
    assert!(generate(&opts, "key").is_none());
  }
}

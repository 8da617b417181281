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

//! Opening-handshake request/response codecs (RFC 6455 §4).
//!
//! These parse and generate the raw HTTP/1.1 bytes of the WebSocket
//! opening handshake. They are always compiled — unlike [`crate::upgrade`]
//! and [`client`], which plug this codec into `hyper` behind the
//! `upgrade` feature, this module works directly on byte buffers so it
//! can be used standalone against any transport.
//!
//! Grounded on the sibling `soketto` crate's `handshake.rs`, which parses
//! with `httparse` the same way.

#[cfg(feature = "upgrade")]
pub mod client;
pub mod request;
pub mod response;

use base64::Engine;
use rand::RngCore;
use sha1::Digest;
use sha1::Sha1;

/// The GUID RFC 6455 §1.3 defines for computing `Sec-WebSocket-Accept`
/// from `Sec-WebSocket-Key`.
const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this crate's server negotiates.
pub const SUPPORTED_VERSION: u32 = 13;

/// Maximum number of header lines a [`request::parse`]/[`response::parse`]
/// call will accept, per the distilled spec's default cap.
pub const MAX_NUM_HEADERS: usize = 100;

/// Maximum length, in bytes, of any single header line (or the request/
/// status line), per the distilled spec's default cap.
pub const MAX_HEADER_LINE: usize = 8 * 1024;

/// Generates a fresh `Sec-WebSocket-Key`: base64 of 16 random bytes.
pub fn generate_key() -> String {
  let mut bytes = [0u8; 16];
  rand::thread_rng().fill_bytes(&mut bytes);
  base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Computes `Sec-WebSocket-Accept` from a client's `Sec-WebSocket-Key`:
/// `base64(SHA1(key ++ GUID))`.
pub fn accept_key(client_key: &str) -> String {
  let mut hasher = Sha1::new();
  hasher.update(client_key.as_bytes());
  hasher.update(GUID.as_bytes());
  let digest = hasher.finalize();
  base64::engine::general_purpose::STANDARD.encode(digest)
}

/// A case-insensitive, multi-valued header list, in original request
/// order. RFC 7230 permits repeated header fields and requires matching
/// field names case-insensitively; a plain `HashMap<String, String>`
/// can't represent either.
#[derive(Debug, Default, Clone)]
pub struct HeaderList(Vec<(String, String)>);

impl HeaderList {
  pub fn new() -> Self {
    Self(Vec::new())
  }

  pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
    self.0.push((name.into(), value.into()));
  }

  /// Returns the first value for `name`, matched case-insensitively.
  pub fn get(&self, name: &str) -> Option<&str> {
    self
      .0
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Returns every value for `name`, matched case-insensitively, in
  /// original order.
  pub fn get_all<'a>(
    &'a self,
    name: &'a str,
  ) -> impl Iterator<Item = &'a str> + 'a {
    self
      .0
      .iter()
      .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
  }
}

/// True if `haystack` (a comma-separated header value, e.g. `Connection`
/// or `Upgrade`) contains `needle` as a token, matched
/// case-insensitively, per RFC 7230 §3.2.6 token comma-list syntax.
pub fn header_contains_token(haystack: &str, needle: &str) -> bool {
  haystack
    .split(',')
    .map(|tok| tok.trim())
    .any(|tok| tok.eq_ignore_ascii_case(needle))
}

/// Parses a comma-separated list of tokens, trimming surrounding
/// whitespace from each and dropping empty entries. Used for
/// `Sec-WebSocket-Protocol`, `Sec-WebSocket-Extensions` and
/// `Sec-WebSocket-Version`.
pub fn split_comma_list(value: &str) -> Vec<String> {
  value
    .split(',')
    .map(|s| s.trim())
    .filter(|s| !s.is_empty())
    .map(|s| s.to_owned())
    .collect()
}

/// Parses a `Sec-WebSocket-Version` header value into the descending,
/// sorted list of requested versions (§3's `versions` field), failing if
/// any entry doesn't parse as an integer.
pub fn parse_versions(value: &str) -> Result<Vec<u32>, crate::error::WebSocketError> {
  let mut versions = Vec::new();
  for v in split_comma_list(value) {
    let v: u32 = v.parse().map_err(|_| {
      crate::error::WebSocketError::InvalidHandshake(
        "invalid Sec-WebSocket-Version".into(),
      )
    })?;
    versions.push(v);
  }
  versions.sort_unstable_by(|a, b| b.cmp(a));
  Ok(versions)
}

/// True if `versions` (as parsed by [`parse_versions`]) includes this
/// crate's one supported protocol version. §4.5.1: "the accepted version
/// is the highest member of the intersection of client versions and
/// server versions (this library's server supports only version 13)".
pub fn supports_version(versions: &[u32]) -> bool {
  versions.contains(&SUPPORTED_VERSION)
}

/// RFC 2616 §2.2 `separators`, disallowed inside an HTTP token such as a
/// subprotocol name.
const RFC2616_SEPARATORS: &[char] = &[
  '(', ')', '<', '>', '@', ',', ';', ':', '\\', '"', '/', '[', ']', '?',
  '=', '{', '}', ' ', '\t',
];

/// True if `value` is a valid HTTP token: non-empty, US-ASCII
/// `0x21..=0x7E`, and free of RFC 2616 separator characters. Used to
/// validate subprotocol names on both the request and response side.
pub fn is_valid_token(value: &str) -> bool {
  !value.is_empty()
    && value
      .chars()
      .all(|c| ('\x21'..='\x7e').contains(&c) && !RFC2616_SEPARATORS.contains(&c))
}

/// True if `value` contains a bare CR or LF, which must never be
/// permitted into a generated header value (header/request-line
/// injection).
pub fn contains_crlf(value: &str) -> bool {
  value.contains('\r') || value.contains('\n')
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn known_accept_key_vector() {
    // §8 scenario 6.
    assert_eq!(
      accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
      "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
    );
  }

  #[test]
  fn header_token_matching_is_case_insensitive() {
    assert!(header_contains_token("Upgrade, keep-alive", "upgrade"));
    assert!(!header_contains_token("keep-alive", "upgrade"));
  }

  #[test]
  fn token_validation_rejects_separators() {
    assert!(is_valid_token("chat"));
    assert!(is_valid_token("superchat-v2"));
    assert!(!is_valid_token("chat;v=2"));
    assert!(!is_valid_token(""));
  }
}

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

//! End-to-end check of the raw-byte handshake codec: a client request
//! generated by `handshake::request::generate` parses back to the same
//! values on the server side, and the server's generated success response
//! parses back on the client side.

use ferrosocket::handshake;
use ferrosocket::handshake::request;
use ferrosocket::handshake::response;

#[test]
fn request_round_trips_through_generate_and_parse() {
  let key = handshake::generate_key();
  let opts = request::GenerateOptions {
    host: "example.com:9001",
    resource: "/chat",
    origin: Some("http://example.com"),
    protocols: &["chatv1".to_string(), "chatv2".to_string()],
    extensions: &[],
    extra_headers: &[],
  };

  let bytes = request::generate(&opts, &key).expect("no CRLF injection");
  let parsed = request::parse(&bytes).unwrap();

  assert_eq!(parsed.resource, "/chat");
  assert_eq!(parsed.host, "example.com:9001");
  assert_eq!(parsed.key, key);
  assert_eq!(parsed.versions, vec![13]);
  assert_eq!(parsed.origin.as_deref(), Some("http://example.com"));
  assert_eq!(parsed.protocols, vec!["chatv1", "chatv2"]);
}

#[test]
fn response_round_trips_through_generate_and_parse() {
  let key = handshake::generate_key();
  let bytes = response::generate_success(&key, Some("chatv2"), None, None);

  let offered = vec!["chatv1".to_string(), "chatv2".to_string()];
  let parsed = response::parse(&bytes, &key, &offered).unwrap();

  assert_eq!(parsed.status, 101);
  assert_eq!(parsed.accepted_subprotocol.as_deref(), Some("chatv2"));
  assert_eq!(
    parsed.accept_value.as_deref(),
    Some(handshake::accept_key(&key).as_str())
  );
}

#[test]
fn server_rejects_wrong_version_with_bad_request() {
  let bytes = b"GET /chat HTTP/1.1\r\n\
    Host: example.com\r\n\
    Upgrade: websocket\r\n\
    Connection: Upgrade\r\n\
    Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
    Sec-WebSocket-Version: 8\r\n\r\n";

  let parsed = request::parse(bytes).unwrap();
  assert_eq!(parsed.versions, vec![8]);
  assert_ne!(parsed.versions[0], handshake::SUPPORTED_VERSION);

  let rejection = response::generate_bad_request();
  let text = String::from_utf8(rejection).unwrap();
  assert!(text.contains("400 Bad Request"));
  assert!(text.contains("Sec-WebSocket-Version: 13"));
}

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

//! Client-side handshake over a `hyper` HTTP/1.1 connection.
//!
//! This is the `upgrade`-feature counterpart of [`crate::upgrade`]: where
//! that module lets a `hyper` *server* accept an inbound WebSocket
//! upgrade, this module drives a `hyper` HTTP/1.1 client connection
//! through the opening handshake and hands back an open [`WebSocket`].
//!
//! Accept-key recomputation and token/comma-list parsing reuse
//! [`crate::handshake`]'s shared helpers so this `hyper`-backed path and
//! the raw-byte [`crate::handshake::response`] codec agree on one
//! implementation of those rules; status-code dispatch (101/400/401) is
//! driven here because `hyper` has already parsed the response into
//! typed headers by the time this function sees it.

use std::sync::Arc;

use base64::Engine;
use http_body_util::BodyExt;
use http_body_util::Empty;
use hyper::body::Bytes;
use hyper::body::Incoming;
use hyper::header::HeaderValue;
use hyper::header::AUTHORIZATION;
use hyper::header::CONNECTION;
use hyper::header::UPGRADE;
use hyper::header::HeaderMap;
use hyper::header::WWW_AUTHENTICATE;
use hyper::upgrade::Upgraded;
use hyper::Method;
use hyper::Request;
use hyper::Response;
use hyper::Uri;
use hyper::Version;
use hyper_util::rt::TokioIo;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;

use crate::error::WebSocketError;
use crate::handshake::accept_key;
use crate::Role;
use crate::WebSocket;

/// Resolves HTTP Basic credentials from a `WWW-Authenticate` challenge,
/// per §4.5.2's "drive the HTTP authenticator" and §6.4's
/// `authenticator_callback` config surface entry.
///
/// Returning `None` means no credentials are available for this
/// challenge; the 401 is then surfaced to the caller as
/// [`WebSocketError::HandshakeRefused`] rather than retried.
pub trait Authenticator: Send + Sync {
  /// `www_authenticate` is the challenge header's value verbatim (e.g.
  /// `Basic realm="chat"`). Returns `(username, password)` on success.
  fn credentials(&self, www_authenticate: &str) -> Option<(String, String)>;
}

/// An [`Authenticator`] that always answers with one fixed
/// username/password pair, e.g. credentials parsed out of a `ws://user:
/// pass@host/` URL's userinfo component.
pub struct StaticAuthenticator {
  pub username: String,
  pub password: String,
}

impl Authenticator for StaticAuthenticator {
  fn credentials(&self, _www_authenticate: &str) -> Option<(String, String)> {
    Some((self.username.clone(), self.password.clone()))
  }
}

/// Client-side handshake-time options (§6.4's client config surface).
#[derive(Clone, Default)]
pub struct ClientOptions {
  /// Consulted on a `401 Unauthorized` response. `None` means 401s are
  /// never retried.
  pub authenticator: Option<Arc<dyn Authenticator>>,
}

/// Drives the opening handshake to completion over `stream`, sending
/// `request` (which must already carry `Upgrade: websocket`,
/// `Connection: Upgrade`, `Sec-WebSocket-Key` and
/// `Sec-WebSocket-Version: 13` — see [`crate::handshake::generate_key`])
/// and returning the now-open [`WebSocket`] alongside the raw `hyper`
/// response (useful for reading negotiated extensions/subprotocol
/// headers the caller wants beyond what this crate surfaces).
///
/// Equivalent to [`client_with_options`] with no authenticator
/// configured, so a `401` response is always surfaced as a refusal.
pub async fn client<S, E>(
  executor: &E,
  request: Request<Empty<Bytes>>,
  stream: S,
) -> Result<(WebSocket<TokioIo<Upgraded>>, Response<Incoming>), WebSocketError>
where
  S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
  E: hyper::rt::Executor<
    std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>,
  >,
{
  client_with_options(executor, request, stream, &ClientOptions::default()).await
}

/// Like [`client`], but dispatches on the server's response status per
/// §4.5.2:
///
/// - `101`: validated and returned as an open [`WebSocket`].
/// - `400`: if the server enumerated `Sec-WebSocket-Version`s and ours
///   isn't among them, fails with [`WebSocketError::VersionNotSupported`];
///   otherwise a generic [`WebSocketError::HandshakeRefused`].
/// - `401`: extracts `WWW-Authenticate` and asks `options.authenticator`
///   for credentials. If it resolves some, the rejection body is drained
///   (so a `Content-Length`-framed body doesn't desync the connection's
///   pipelining) and the request is retried once, with a `Basic`
///   `Authorization` header attached, on the same connection. No
///   authenticator, or one that declines, surfaces the 401 as a refusal.
/// - anything else: a generic [`WebSocketError::HandshakeRefused`].
pub async fn client_with_options<S, E>(
  executor: &E,
  request: Request<Empty<Bytes>>,
  stream: S,
  options: &ClientOptions,
) -> Result<(WebSocket<TokioIo<Upgraded>>, Response<Incoming>), WebSocketError>
where
  S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
  E: hyper::rt::Executor<
    std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>,
  >,
{
  let client_key = request
    .headers()
    .get("Sec-WebSocket-Key")
    .and_then(|v| v.to_str().ok())
    .ok_or(WebSocketError::MissingSecWebSocketKey)?
    .to_owned();

  let offered_protocols: Vec<String> = request
    .headers()
    .get_all("Sec-WebSocket-Protocol")
    .iter()
    .filter_map(|v| v.to_str().ok())
    .flat_map(crate::handshake::split_comma_list)
    .collect();

  let method = request.method().clone();
  let uri = request.uri().clone();
  let version = request.version();
  let headers = request.headers().clone();

  let io = TokioIo::new(stream);
  let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
    .await
    .map_err(WebSocketError::HttpError)?;

  executor.execute(Box::pin(async move {
    if let Err(e) = conn.with_upgrades().await {
      tracing::debug!(error = %e, "client connection task ended");
    }
  }));

  let mut current_request = request;
  let mut retried_auth = false;

  loop {
    let response = sender
      .send_request(current_request)
      .await
      .map_err(WebSocketError::HttpError)?;

    let status = response.status().as_u16();
    match status {
      101 => {
        return finish_101(response, &client_key, &offered_protocols).await;
      }
      400 => {
        let advertised =
          response.headers().get("Sec-WebSocket-Version").and_then(|v| v.to_str().ok());
        return match advertised {
          Some(list) => {
            let versions = crate::handshake::parse_versions(list)?;
            if crate::handshake::supports_version(&versions) {
              Err(WebSocketError::HandshakeRefused(
                "server returned 400 Bad Request".into(),
              ))
            } else {
              Err(WebSocketError::VersionNotSupported(list.to_owned()))
            }
          }
          None => Err(WebSocketError::HandshakeRefused(
            "server returned 400 Bad Request".into(),
          )),
        };
      }
      401 if !retried_auth => {
        let challenge = response
          .headers()
          .get(WWW_AUTHENTICATE)
          .and_then(|v| v.to_str().ok())
          .map(str::to_owned);

        let credentials = match (&challenge, &options.authenticator) {
          (Some(challenge), Some(authenticator)) => {
            authenticator.credentials(challenge)
          }
          _ => None,
        };

        let Some((username, password)) = credentials else {
          return Err(WebSocketError::HandshakeRefused(format!(
            "server returned 401 Unauthorized{}",
            challenge
              .map(|c| format!(": {c}"))
              .unwrap_or_default()
          )));
        };

        // The connection is kept alive for the retry; drain whatever
        // body the rejection carried (per its `Content-Length`, if any)
        // so it doesn't desync the next request's framing.
        let _ = response.into_body().collect().await;

        let basic = base64::engine::general_purpose::STANDARD
          .encode(format!("{username}:{password}"));
        let mut retry_headers = headers.clone();
        retry_headers.insert(
          AUTHORIZATION,
          HeaderValue::from_str(&format!("Basic {basic}"))
            .map_err(|_| WebSocketError::InvalidHeaderValue("Authorization".into()))?,
        );

        current_request =
          build_request(&method, &uri, version, &retry_headers)?;
        retried_auth = true;
      }
      other => {
        return Err(WebSocketError::HandshakeRefused(format!(
          "server responded with status {other}"
        )));
      }
    }
  }
}

/// Rebuilds a request from its parts. Used to retry after a 401, since
/// `hyper::Request` isn't `Clone` (its `Extensions` map isn't either).
fn build_request(
  method: &Method,
  uri: &Uri,
  version: Version,
  headers: &HeaderMap,
) -> Result<Request<Empty<Bytes>>, WebSocketError> {
  let mut request = Request::new(Empty::<Bytes>::new());
  *request.method_mut() = method.clone();
  *request.uri_mut() = uri.clone();
  *request.version_mut() = version;
  *request.headers_mut() = headers.clone();
  Ok(request)
}

/// Validates a `101` response against `client_key`/`offered_protocols`
/// (§4.5.2) and completes the upgrade, handing back the open
/// [`WebSocket`].
async fn finish_101(
  response: Response<Incoming>,
  client_key: &str,
  offered_protocols: &[String],
) -> Result<(WebSocket<TokioIo<Upgraded>>, Response<Incoming>), WebSocketError> {
  if response.version() < Version::HTTP_11 {
    return Err(WebSocketError::InvalidHttpVersion);
  }

  let upgrade_header = response
    .headers()
    .get(UPGRADE)
    .and_then(|v| v.to_str().ok())
    .ok_or(WebSocketError::InvalidUpgradeHeader)?;
  if !upgrade_header.eq_ignore_ascii_case("websocket") {
    return Err(WebSocketError::InvalidUpgradeHeader);
  }

  let connection_header = response
    .headers()
    .get(CONNECTION)
    .and_then(|v| v.to_str().ok())
    .ok_or(WebSocketError::InvalidConnectionHeader)?;
  if !crate::handshake::header_contains_token(connection_header, "upgrade") {
    return Err(WebSocketError::InvalidConnectionHeader);
  }

  let accept = response
    .headers()
    .get("Sec-WebSocket-Accept")
    .and_then(|v| v.to_str().ok())
    .ok_or_else(|| {
      WebSocketError::HttpHeaderMissing("Sec-WebSocket-Accept".into())
    })?;
  if accept != accept_key(client_key) {
    return Err(WebSocketError::HandshakeRefused(
      "Sec-WebSocket-Accept mismatch".into(),
    ));
  }

  if let Some(proto) = response
    .headers()
    .get("Sec-WebSocket-Protocol")
    .and_then(|v| v.to_str().ok())
  {
    if !offered_protocols.iter().any(|p| p == proto) {
      return Err(WebSocketError::HandshakeRefused(format!(
        "server accepted unoffered subprotocol: {proto}"
      )));
    }
  }

  let upgraded = hyper::upgrade::on(&response)
    .await
    .map_err(WebSocketError::HttpError)?;

  let ws = WebSocket::after_handshake(TokioIo::new(upgraded), Role::Client);
  Ok((ws, response))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::handshake::response;

  /// Keeps the raw-byte codec reachable from tests that want to exercise
  /// both handshake paths against the same wire bytes without
  /// duplicating the status-dispatch logic.
  fn validate_raw_101(
    bytes: &[u8],
    client_key: &str,
    offered: &[String],
  ) -> Result<response::Response, WebSocketError> {
    response::parse(bytes, client_key, offered)
  }

  #[test]
  fn raw_codec_agrees_with_hyper_accept_key() {
    let key = crate::handshake::generate_key();
    let bytes = response::generate_success(&key, None, None, None);
    let parsed = validate_raw_101(&bytes, &key, &[]).unwrap();
    assert_eq!(parsed.status, 101);
  }

  struct RejectAll;
  impl Authenticator for RejectAll {
    fn credentials(&self, _: &str) -> Option<(String, String)> {
      None
    }
  }

  #[test]
  fn static_authenticator_always_resolves() {
    let auth = StaticAuthenticator {
      username: "alice".into(),
      password: "hunter2".into(),
    };
    assert_eq!(
      auth.credentials("Basic realm=\"chat\""),
      Some(("alice".to_string(), "hunter2".to_string()))
    );
  }

  #[test]
  fn declining_authenticator_yields_none() {
    assert_eq!(RejectAll.credentials("Basic realm=\"chat\""), None);
  }
}

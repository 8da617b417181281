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

//! Server-side HTTP upgrade, built on `hyper`.
//!
//! `hyper` has already parsed the request by the time it reaches
//! [`upgrade`]; this module's job is purely the semantic validation and
//! negotiation §4.5.1 describes (`Upgrade`/`Connection`/`Sec-WebSocket-Key`/
//! `Sec-WebSocket-Version`, subprotocol and origin handling) and wiring
//! `hyper`'s upgrade future to a [`WebSocket`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use http_body_util::Empty;
use hyper::body::Bytes;
use hyper::body::Incoming;
use hyper::header::HeaderValue;
use hyper::upgrade::Upgraded;
use hyper::Request;
use hyper::Response;
use hyper::StatusCode;
use hyper_util::rt::TokioIo;
use pin_project::pin_project;

use crate::error::WebSocketError;
use crate::handshake::accept_key;
use crate::handshake::header_contains_token;
use crate::handshake::response::negotiate_subprotocol;
use crate::handshake::split_comma_list;
use crate::Role;
use crate::WebSocket;

/// Default time budget from accept to a completed upgrade, per §5's
/// stated default.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Server-side handshake-time options (§6.4's server config surface).
#[derive(Clone)]
pub struct ServerOptions {
  /// Subprotocols this server can speak, in preference order.
  pub supported_subprotocols: Vec<String>,
  /// Called with the request's `Origin` header, if present. Returning
  /// `false` causes [`upgrade_with_options`] to produce a 403 response.
  pub origin_allowed: Option<Arc<dyn Fn(&str) -> bool + Send + Sync>>,
  /// Time budget from accept to completed upgrade.
  pub handshake_timeout: Duration,
}

impl Default for ServerOptions {
  fn default() -> Self {
    Self {
      supported_subprotocols: Vec::new(),
      origin_allowed: None,
      handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
    }
  }
}

impl std::fmt::Debug for ServerOptions {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ServerOptions")
      .field("supported_subprotocols", &self.supported_subprotocols)
      .field("origin_allowed", &self.origin_allowed.is_some())
      .field("handshake_timeout", &self.handshake_timeout)
      .finish()
  }
}

fn header_str<'a, B>(request: &'a Request<B>, name: &str) -> Option<&'a str> {
  request.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Performs the pure §4.5.1 semantic validation over an already-parsed
/// `hyper` request, without building a response.
fn validate(request: &Request<impl Sized>) -> Result<String, WebSocketError> {
  if request.method() != hyper::Method::GET {
    return Err(WebSocketError::InvalidMethod);
  }

  let upgrade = header_str(request, "Upgrade")
    .ok_or(WebSocketError::InvalidUpgradeHeader)?;
  if !upgrade.eq_ignore_ascii_case("websocket") {
    return Err(WebSocketError::InvalidUpgradeHeader);
  }

  let connection = header_str(request, "Connection")
    .ok_or(WebSocketError::InvalidConnectionHeader)?;
  if !header_contains_token(connection, "upgrade") {
    return Err(WebSocketError::InvalidConnectionHeader);
  }

  let key = header_str(request, "Sec-WebSocket-Key")
    .ok_or(WebSocketError::MissingSecWebSocketKey)?;
  if key.is_empty() {
    return Err(WebSocketError::MissingSecWebSocketKey);
  }

  let versions_header = header_str(request, "Sec-WebSocket-Version")
    .ok_or_else(|| WebSocketError::InvalidHandshake("missing Sec-WebSocket-Version".into()))?;
  let versions = crate::handshake::parse_versions(versions_header)?;
  if !crate::handshake::supports_version(&versions) {
    return Err(WebSocketError::InvalidHandshake(
      "no common Sec-WebSocket-Version".into(),
    ));
  }

  Ok(key.to_owned())
}

/// Upgrades an incoming `hyper` request to a WebSocket connection with
/// default options (no subprotocol negotiation, no origin check).
///
/// The caller is responsible for returning the produced [`Response`] from
/// their `hyper` service; `fut` resolves to the open [`WebSocket`] once
/// `hyper` completes the upgrade in the background.
///
/// ```
/// use ferrosocket::upgrade::upgrade;
/// use hyper::{Request, body::Incoming, Response};
/// use anyhow::Result;
///
/// async fn server_upgrade(
///   mut req: Request<Incoming>,
/// ) -> Result<Response<http_body_util::Empty<hyper::body::Bytes>>> {
///   let (response, fut) = upgrade(&mut req)?;
///
///   tokio::spawn(async move {
///     let _ws = fut.await;
///     // Do something with the websocket
///   });
///
///   Ok(response)
/// }
/// ```
pub fn upgrade<B>(
  request: &mut Request<B>,
) -> Result<(Response<Empty<Bytes>>, UpgradeFut), WebSocketError> {
  upgrade_with_options(request, &ServerOptions::default())
}

/// Like [`upgrade`], but negotiates a subprotocol and/or checks the
/// request's `Origin` header per `options`.
pub fn upgrade_with_options<B>(
  request: &mut Request<B>,
  options: &ServerOptions,
) -> Result<(Response<Empty<Bytes>>, UpgradeFut), WebSocketError> {
  if let Some(origin_allowed) = &options.origin_allowed {
    if let Some(origin) = header_str(request, "Origin") {
      if !origin_allowed(origin) {
        let response = Response::builder()
          .status(StatusCode::FORBIDDEN)
          .body(Empty::new())
          .expect("static response is well-formed");
        return Ok((response, UpgradeFut::refused()));
      }
    }
  }

  let key = match validate(request) {
    Ok(key) => key,
    Err(_) => {
      let response = Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .header("Sec-WebSocket-Version", "13")
        .body(Empty::new())
        .expect("static response is well-formed");
      return Ok((response, UpgradeFut::refused()));
    }
  };

  let offered_protocols: Vec<String> = header_str(request, "Sec-WebSocket-Protocol")
    .map(split_comma_list)
    .unwrap_or_default();
  let chosen_subprotocol =
    negotiate_subprotocol(&offered_protocols, &options.supported_subprotocols);

  let mut builder = Response::builder()
    .status(StatusCode::SWITCHING_PROTOCOLS)
    .header("Connection", "Upgrade")
    .header("Upgrade", "websocket")
    .header("Sec-WebSocket-Accept", accept_key(&key));

  if let Some(subprotocol) = &chosen_subprotocol {
    builder = builder.header(
      "Sec-WebSocket-Protocol",
      HeaderValue::from_str(subprotocol)
        .map_err(|_| WebSocketError::InvalidHeaderValue(subprotocol.clone()))?,
    );
  }

  let response = builder
    .body(Empty::new())
    .map_err(|e| WebSocketError::InvalidHandshake(e.to_string()))?;

  let on_upgrade = hyper::upgrade::on(request);

  Ok((
    response,
    UpgradeFut {
      inner: UpgradeFutInner::Pending(on_upgrade),
      deadline: None,
      handshake_timeout: options.handshake_timeout,
    },
  ))
}

enum UpgradeFutInner {
  Pending(hyper::upgrade::OnUpgrade),
  Refused,
}

/// Resolves to an open [`WebSocket`] once `hyper` finishes driving the
/// HTTP/1.1 upgrade. Polling a future produced for a refused handshake
/// (400/403) always yields [`WebSocketError::HandshakeRefused`].
///
/// Carries the §5/§6.4 handshake timeout: if `hyper` hasn't completed the
/// upgrade within `handshake_timeout` of this future's first poll, it
/// resolves to [`WebSocketError::HandshakeRefused`] instead of hanging
/// forever on a client that sent a well-formed request but never
/// finished the TCP-level upgrade.
#[pin_project]
pub struct UpgradeFut {
  #[pin]
  inner: UpgradeFutInner,
  #[pin]
  deadline: Option<tokio::time::Sleep>,
  handshake_timeout: Duration,
}

impl UpgradeFut {
  fn refused() -> Self {
    Self {
      inner: UpgradeFutInner::Refused,
      deadline: None,
      handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
    }
  }
}

impl Future for UpgradeFut {
  type Output = Result<WebSocket<TokioIo<Upgraded>>, WebSocketError>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let mut this = self.project();

    if matches!(&*this.inner, UpgradeFutInner::Pending(_)) {
      if this.deadline.is_none() {
        this
          .deadline
          .set(Some(tokio::time::sleep(*this.handshake_timeout)));
      }
      if let Some(deadline) = this.deadline.as_mut().as_pin_mut() {
        if deadline.poll(cx).is_ready() {
          return Poll::Ready(Err(WebSocketError::HandshakeRefused(
            "handshake timed out".into(),
          )));
        }
      }
    }

    match this.inner.get_mut() {
      UpgradeFutInner::Refused => {
        Poll::Ready(Err(WebSocketError::HandshakeRefused(
          "handshake was not accepted".into(),
        )))
      }
      UpgradeFutInner::Pending(on_upgrade) => {
        let upgraded = match Pin::new(on_upgrade).poll(cx) {
          Poll::Ready(Ok(u)) => u,
          Poll::Ready(Err(e)) => return Poll::Ready(Err(WebSocketError::HttpError(e))),
          Poll::Pending => return Poll::Pending,
        };
        let io = TokioIo::new(upgraded);
        Poll::Ready(Ok(WebSocket::after_handshake(io, Role::Server)))
      }
    }
  }
}

/// Type alias matching the body type most `hyper` server examples use
/// for an accepted request.
pub type IncomingRequest = Request<Incoming>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_missing_upgrade_header() {
    let mut req = Request::builder()
      .method("GET")
      .uri("/")
      .header("Connection", "Upgrade")
      .header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
      .body(())
      .unwrap();
    let (response, _fut) = upgrade(&mut req).unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  }

  #[test]
  fn rejects_unsupported_version() {
    let mut req = Request::builder()
      .method("GET")
      .uri("/")
      .header("Upgrade", "websocket")
      .header("Connection", "Upgrade")
      .header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
      .header("Sec-WebSocket-Version", "8")
      .body(())
      .unwrap();
    let (response, _fut) = upgrade(&mut req).unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
      response
        .headers()
        .get("Sec-WebSocket-Version")
        .unwrap()
        .to_str()
        .unwrap(),
      "13"
    );
  }

  #[test]
  fn accepts_well_formed_request() {
    let mut req = Request::builder()
      .method("GET")
      .uri("/")
      .header("Upgrade", "websocket")
      .header("Connection", "Upgrade")
      .header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
      .header("Sec-WebSocket-Version", "13")
      .body(())
      .unwrap();
    let (response, _fut) = upgrade(&mut req).unwrap();
    assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
    assert_eq!(
      response
        .headers()
        .get("Sec-WebSocket-Accept")
        .unwrap()
        .to_str()
        .unwrap(),
      "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
    );
  }
}

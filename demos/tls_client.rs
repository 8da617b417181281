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

//! Connects to a TLS-terminated WebSocket endpoint using `webpki-roots`
//! for certificate validation, sends one message, and prints the echo.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use http_body_util::Empty;
use hyper::header::CONNECTION;
use hyper::header::UPGRADE;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::rustls::OwnedTrustAnchor;
use tokio_rustls::rustls::RootCertStore;
use tokio_rustls::rustls::ServerName;
use tokio_rustls::TlsConnector;

use ferrosocket::handshake;
use ferrosocket::Frame;
use ferrosocket::Payload;

struct SpawnExecutor;

impl<Fut> hyper::rt::Executor<Fut> for SpawnExecutor
where
  Fut: Future + Send + 'static,
  Fut::Output: Send + 'static,
{
  fn execute(&self, fut: Fut) {
    tokio::task::spawn(fut);
  }
}

fn root_store() -> RootCertStore {
  let mut roots = RootCertStore::empty();
  roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
    OwnedTrustAnchor::from_subject_spki_name_constraints(
      ta.subject,
      ta.spki,
      ta.name_constraints,
    )
  }));
  roots
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let mut args = std::env::args().skip(1);
  let host = args.next().unwrap_or_else(|| "localhost".to_string());
  let port: u16 = args
    .next()
    .map(|p| p.parse().expect("port must be a number"))
    .unwrap_or(9002);

  let config = ClientConfig::builder()
    .with_safe_defaults()
    .with_root_certificates(root_store())
    .with_no_client_auth();
  let connector = TlsConnector::from(Arc::new(config));

  let tcp = TcpStream::connect((host.as_str(), port)).await?;
  let server_name = ServerName::try_from(host.as_str())?;
  let tls_stream = connector.connect(server_name, tcp).await?;

  let key = handshake::generate_key();
  let request = Request::builder()
    .method("GET")
    .uri("/")
    .header("Host", format!("{host}:{port}"))
    .header(UPGRADE, "websocket")
    .header(CONNECTION, "upgrade")
    .header("Sec-WebSocket-Key", &key)
    .header("Sec-WebSocket-Version", "13")
    .body(Empty::<Bytes>::new())?;

  let (mut ws, response) =
    handshake::client::client(&SpawnExecutor, request, tls_stream).await?;
  tracing::info!(status = %response.status(), "handshake complete");

  ws.write_frame(Frame::text(Payload::Borrowed(b"hello over tls")))
    .await?;
  let echoed = ws.read_frame().await?;
  println!("{}", String::from_utf8_lossy(echoed.payload.as_ref()));

  ws.write_frame(Frame::close(1000, b"bye")).await?;
  Ok(())
}

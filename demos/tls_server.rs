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

//! The same echo server as `echo_server`, terminating TLS with
//! `tokio-rustls` before the HTTP/1.1 upgrade runs.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use http_body_util::Empty;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper::Response;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_rustls::rustls::Certificate;
use tokio_rustls::rustls::PrivateKey;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use ferrosocket::upgrade::upgrade;
use ferrosocket::Frame;
use ferrosocket::OpCode;
use ferrosocket::Payload;

fn load_config(cert_path: &str, key_path: &str) -> Result<ServerConfig> {
  let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))?
    .into_iter()
    .map(Certificate)
    .collect();

  let mut keys =
    rustls_pemfile::pkcs8_private_keys(&mut BufReader::new(File::open(key_path)?))?;
  let key = PrivateKey(keys.remove(0));

  let config = ServerConfig::builder()
    .with_safe_defaults()
    .with_no_client_auth()
    .with_single_cert(certs, key)?;

  Ok(config)
}

async fn server_upgrade(
  mut req: Request<Incoming>,
) -> Result<Response<Empty<Bytes>>> {
  let (response, fut) = upgrade(&mut req)?;

  tokio::spawn(async move {
    let mut ws = fut.await.unwrap();
    loop {
      let frame = ws.read_frame().await.unwrap();
      match frame.opcode {
        OpCode::Close => break,
        OpCode::Text | OpCode::Binary => {
          let echoed = Frame::new(
            true,
            frame.opcode,
            None,
            Payload::Owned(frame.payload.to_owned()),
          );
          ws.write_frame(echoed).await.unwrap();
        }
        _ => {}
      }
    }
  });

  Ok(response)
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let mut args = std::env::args().skip(1);
  let cert_path = args.next().expect("usage: tls_server <cert.pem> <key.pem>");
  let key_path = args.next().expect("usage: tls_server <cert.pem> <key.pem>");

  let config = load_config(&cert_path, &key_path)?;
  let acceptor = TlsAcceptor::from(Arc::new(config));

  let listener = TcpListener::bind("127.0.0.1:9002").await?;
  tracing::info!(addr = "127.0.0.1:9002", "tls echo server listening");

  loop {
    let (stream, _) = listener.accept().await?;
    let acceptor = acceptor.clone();
    tokio::spawn(async move {
      let tls_stream = match acceptor.accept(stream).await {
        Ok(s) => s,
        Err(e) => {
          tracing::debug!(error = %e, "tls handshake failed");
          return;
        }
      };
      let io = TokioIo::new(tls_stream);
      let conn = http1::Builder::new()
        .serve_connection(io, service_fn(server_upgrade))
        .with_upgrades();
      if let Err(e) = conn.await {
        tracing::debug!(error = %e, "connection task ended");
      }
    });
  }
}

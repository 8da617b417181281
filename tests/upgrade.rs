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

//! Drives a real `hyper` server accept loop and a real `hyper` client
//! connection over a loopback TCP socket through the full opening
//! handshake, then exchanges a message and closes cleanly.

use std::future::Future;
use std::pin::Pin;

use anyhow::Result;
use bytes::Bytes;
use http_body_util::Empty;
use hyper::body::Incoming;
use hyper::header::CONNECTION;
use hyper::header::UPGRADE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper::Response;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::net::TcpStream;

use ferrosocket::handshake;
use ferrosocket::upgrade::upgrade;
use ferrosocket::Frame;
use ferrosocket::OpCode;
use ferrosocket::Payload;
use ferrosocket::WebSocket;

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

async fn echo_once(
  mut req: Request<Incoming>,
) -> Result<Response<Empty<Bytes>>, std::convert::Infallible> {
  let (response, fut) = upgrade(&mut req).unwrap();

  tokio::spawn(async move {
    let mut ws = fut.await.unwrap();
    let frame = ws.read_frame().await.unwrap();
    if frame.opcode == OpCode::Text || frame.opcode == OpCode::Binary {
      ws.write_frame(Frame::new(
        true,
        frame.opcode,
        None,
        Payload::Owned(frame.payload.to_owned()),
      ))
      .await
      .unwrap();
    }
    let close = ws.read_frame().await.unwrap();
    assert_eq!(close.opcode, OpCode::Close);
  });

  Ok(response)
}

#[tokio::test]
async fn client_server_round_trip() {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();

  tokio::spawn(async move {
    let (stream, _) = listener.accept().await.unwrap();
    let io = TokioIo::new(stream);
    http1::Builder::new()
      .serve_connection(io, service_fn(echo_once))
      .with_upgrades()
      .await
      .unwrap();
  });

  let stream = TcpStream::connect(addr).await.unwrap();
  let key = handshake::generate_key();
  let request = Request::builder()
    .method("GET")
    .uri("/")
    .header("Host", addr.to_string())
    .header(UPGRADE, "websocket")
    .header(CONNECTION, "upgrade")
    .header("Sec-WebSocket-Key", &key)
    .header("Sec-WebSocket-Version", "13")
    .body(Empty::<Bytes>::new())
    .unwrap();

  let (mut ws, response) =
    handshake::client::client(&SpawnExecutor, request, stream)
      .await
      .unwrap();
  assert_eq!(response.status(), 101);

  ws.write_frame(Frame::text(Payload::Borrowed(b"hello")))
    .await
    .unwrap();
  let echoed = ws.read_frame().await.unwrap();
  assert_eq!(echoed.payload.as_ref(), b"hello");

  ws.write_frame(Frame::close(1000, b"done")).await.unwrap();
}

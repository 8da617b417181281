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

//! Many concurrent connections against one server task, each echoing its
//! own tagged payload back. Nothing here shares state between connections
//! except the listener itself, so a leak between connections (e.g. the
//! thread-local scratch buffer in `recv` bleeding across tasks) would show
//! up as a mismatched echo.

use std::future::Future;

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

async fn echo(
  mut req: Request<Incoming>,
) -> Result<Response<Empty<Bytes>>, std::convert::Infallible> {
  let (response, fut) = upgrade(&mut req).unwrap();
  tokio::spawn(async move {
    let mut ws = fut.await.unwrap();
    loop {
      let frame = ws.read_frame().await.unwrap();
      if frame.opcode == ferrosocket::OpCode::Close {
        break;
      }
      ws.write_frame(Frame::new(
        true,
        frame.opcode,
        None,
        Payload::Owned(frame.payload.to_owned()),
      ))
      .await
      .unwrap();
    }
  });
  Ok(response)
}

#[tokio::test]
async fn concurrent_connections_do_not_cross_talk() {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();

  tokio::spawn(async move {
    loop {
      let (stream, _) = listener.accept().await.unwrap();
      tokio::spawn(async move {
        let io = TokioIo::new(stream);
        let _ = http1::Builder::new()
          .serve_connection(io, service_fn(echo))
          .with_upgrades()
          .await;
      });
    }
  });

  let mut tasks = Vec::new();
  for i in 0..32u32 {
    tasks.push(tokio::spawn(async move {
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

      let (mut ws, _) =
        handshake::client::client(&SpawnExecutor, request, stream)
          .await
          .unwrap();

      let tag = format!("conn-{i}");
      for round in 0..8 {
        let payload = format!("{tag}-{round}");
        ws.write_frame(Frame::text(Payload::Borrowed(payload.as_bytes())))
          .await
          .unwrap();
        let echoed = ws.read_frame().await.unwrap();
        assert_eq!(echoed.payload.as_ref(), payload.as_bytes());
      }

      ws.write_frame(Frame::close(1000, b"")).await.unwrap();
    }));
  }

  for task in tasks {
    task.await.unwrap();
  }
}

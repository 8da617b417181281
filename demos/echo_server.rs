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

//! A plain-TCP echo server, driven by `hyper`'s HTTP/1.1 server and this
//! crate's `upgrade` adapter.

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

use ferrosocket::upgrade::upgrade;
use ferrosocket::Frame;
use ferrosocket::OpCode;
use ferrosocket::Payload;
use ferrosocket::WebSocket;

async fn handle_client(
  mut ws: WebSocket<TokioIo<hyper::upgrade::Upgraded>>,
) -> Result<()> {
  ws.set_auto_close(true);
  ws.set_auto_pong(true);

  loop {
    let frame = ws.read_frame().await?;
    match frame.opcode {
      OpCode::Close => break,
      OpCode::Text | OpCode::Binary => {
        let echoed = Frame::new(
          true,
          frame.opcode,
          None,
          Payload::Owned(frame.payload.to_owned()),
        );
        ws.write_frame(echoed).await?;
      }
      _ => {}
    }
  }

  Ok(())
}

async fn server_upgrade(
  mut req: Request<Incoming>,
) -> Result<Response<Empty<Bytes>>> {
  let (response, fut) = upgrade(&mut req)?;

  tokio::spawn(async move {
    if let Err(e) = handle_client(fut.await.unwrap()).await {
      tracing::error!(error = %e, "connection ended with error");
    }
  });

  Ok(response)
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let listener = TcpListener::bind("127.0.0.1:9001").await?;
  tracing::info!(addr = "127.0.0.1:9001", "echo server listening");

  loop {
    let (stream, _) = listener.accept().await?;
    tokio::spawn(async move {
      let io = TokioIo::new(stream);
      let conn = http1::Builder::new()
        .serve_connection(io, service_fn(server_upgrade))
        .with_upgrades();
      if let Err(e) = conn.await {
        tracing::debug!(error = %e, "connection task ended");
      }
    });
  }
}

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

//! Drives the Autobahn|TestSuite fuzzing server (`wstest -m fuzzingserver`)
//! as a client, running every test case against this crate and asking the
//! server to render the compliance report at the end.
//!
//! ```text
//! docker run -d --rm -v "${PWD}/autobahn:/config" -v "${PWD}/autobahn/reports:/reports" \
//!   -p 9001:9001 --name fuzzingserver crossbario/autobahn-testsuite
//! cargo run --example autobahn_client --features upgrade
//! ```

use std::future::Future;

use anyhow::Result;
use bytes::Bytes;
use http_body_util::Empty;
use hyper::header::CONNECTION;
use hyper::header::UPGRADE;
use hyper::Request;
use tokio::net::TcpStream;

use ferrosocket::handshake;
use ferrosocket::Frame;
use ferrosocket::OpCode;
use ferrosocket::Payload;
use ferrosocket::WebSocketError;

const AGENT: &str = "ferrosocket";
const HOST: &str = "127.0.0.1:9001";

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

async fn connect(path: &str) -> Result<ferrosocket::WebSocket<impl tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin>> {
  let stream = TcpStream::connect(HOST).await?;
  let key = handshake::generate_key();
  let request = Request::builder()
    .method("GET")
    .uri(path)
    .header("Host", HOST)
    .header(UPGRADE, "websocket")
    .header(CONNECTION, "upgrade")
    .header("Sec-WebSocket-Key", &key)
    .header("Sec-WebSocket-Version", "13")
    .body(Empty::<Bytes>::new())?;

  let (ws, _response) =
    handshake::client::client(&SpawnExecutor, request, stream).await?;
  Ok(ws)
}

async fn get_case_count() -> Result<u32> {
  let mut ws = connect("/getCaseCount").await?;
  let frame = ws.read_frame().await?;
  let count: u32 = std::str::from_utf8(frame.payload.as_ref())?.parse()?;
  ws.write_frame(Frame::close(1000, b"")).await?;
  Ok(count)
}

async fn run_case(case: u32) -> Result<()> {
  let path = format!("/runCase?case={case}&agent={AGENT}");
  let mut ws = connect(&path).await?;

  loop {
    let frame = match ws.read_frame().await {
      Ok(frame) => frame,
      Err(WebSocketError::ConnectionClosed) => break,
      Err(e) => return Err(e.into()),
    };

    match frame.opcode {
      OpCode::Text | OpCode::Binary => {
        let echoed = Frame::new(
          true,
          frame.opcode,
          None,
          Payload::Owned(frame.payload.to_owned()),
        );
        ws.write_frame(echoed).await?;
      }
      OpCode::Close => break,
      _ => {}
    }
  }

  Ok(())
}

async fn update_reports() -> Result<()> {
  let path = format!("/updateReports?agent={AGENT}");
  let mut ws = connect(&path).await?;
  ws.write_frame(Frame::close(1000, b"")).await?;
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let total = get_case_count().await?;
  tracing::info!(total, "running Autobahn|TestSuite cases");

  for case in 1..=total {
    if let Err(e) = run_case(case).await {
      tracing::warn!(case, error = %e, "case ended with error");
    }
  }

  update_reports().await?;
  Ok(())
}

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

use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;

use crate::error::WebSocketError;
use crate::frame::Frame;
use crate::frame::OpCode;
use crate::frame::Payload;
use crate::utf8::Utf8Accumulator;
use crate::WebSocket;

/// The in-progress state of a fragmented message. `None` when no data
/// frame is currently open (§3's `in_message == false`).
enum Accumulator {
  None,
  Text(Utf8Accumulator),
  Binary(Vec<u8>),
}

/// Wraps a [`WebSocket`] so that `read_frame` always returns complete
/// messages (`fin == true`) rather than individual wire fragments,
/// enforcing the message reassembly invariants from §4.3:
///
/// 1. A Continuation frame with no message in progress is a protocol
///    error.
/// 2. A Text/Binary frame while a message is already in progress (i.e.
///    the previous data frame wasn't `fin`) is a protocol error.
/// 3. Control frames may appear between or during fragments without
///    disturbing the in-progress message.
///
/// ```
/// use ferrosocket::{FragmentCollector, WebSocket, Role};
/// use tokio::net::TcpStream;
/// use anyhow::Result;
///
/// async fn handle(
///   socket: TcpStream,
/// ) -> Result<()> {
///   let mut ws = WebSocket::after_handshake(socket, Role::Server);
///   let mut ws = FragmentCollector::new(ws);
///   let incoming = ws.read_frame().await?;
///   // Always returns full messages
///   assert!(incoming.fin);
///   Ok(())
/// }
/// ```
pub struct FragmentCollector<S> {
  ws: WebSocket<S>,
  accumulator: Accumulator,
  running_size: usize,
}

impl<S> FragmentCollector<S>
where
  S: AsyncReadExt + AsyncWriteExt + Unpin,
{
  pub fn new(ws: WebSocket<S>) -> Self {
    Self {
      ws,
      accumulator: Accumulator::None,
      running_size: 0,
    }
  }

  /// Consumes the collector and returns the underlying `WebSocket`.
  pub fn into_inner(self) -> WebSocket<S> {
    self.ws
  }

  /// Reads the next complete message (control frame, or a fully
  /// reassembled Text/Binary message). Always returns `fin == true`.
  pub async fn read_frame(&mut self) -> Result<Frame<'static>, WebSocketError> {
    loop {
      let frame = self.ws.read_frame_inner().await?;

      if frame.is_control() {
        // Control frames pass straight through, even mid-fragmentation.
        return Ok(Frame::new(
          frame.fin,
          frame.opcode,
          frame.mask,
          frame.payload.into_owned(),
        ));
      }

      let is_continuation = frame.is_continuation();
      let in_message = !matches!(self.accumulator, Accumulator::None);

      if is_continuation && !in_message {
        self.reset();
        return Err(WebSocketError::InvalidContinuationFrame);
      }
      if !is_continuation && in_message {
        self.reset();
        return Err(WebSocketError::InvalidFragment);
      }

      if !is_continuation {
        self.accumulator = match frame.opcode {
          OpCode::Text => Accumulator::Text(Utf8Accumulator::new()),
          OpCode::Binary => Accumulator::Binary(Vec::new()),
          _ => unreachable!("data frame opcode is Text, Binary or Continuation"),
        };
      }

      self.running_size += frame.payload.len();
      if self.running_size > self.ws.max_message_size {
        self.reset();
        return Err(WebSocketError::MessageTooLarge);
      }

      match &mut self.accumulator {
        Accumulator::Text(acc) => {
          if let Err(e) = acc.push(frame.payload.as_ref()) {
            self.reset();
            return Err(e);
          }
        }
        Accumulator::Binary(acc) => acc.extend_from_slice(frame.payload.as_ref()),
        Accumulator::None => unreachable!("set above"),
      }

      if frame.fin {
        let opcode = match &self.accumulator {
          Accumulator::Text(_) => OpCode::Text,
          Accumulator::Binary(_) => OpCode::Binary,
          Accumulator::None => unreachable!(),
        };

        let accumulator =
          std::mem::replace(&mut self.accumulator, Accumulator::None);
        self.running_size = 0;

        let payload = match accumulator {
          Accumulator::Text(acc) => {
            let text = acc.finish()?;
            Payload::Owned(text.into_bytes())
          }
          Accumulator::Binary(bytes) => Payload::Owned(bytes),
          Accumulator::None => unreachable!(),
        };

        return Ok(Frame::new(true, opcode, None, payload));
      }
    }
  }

  fn reset(&mut self) {
    self.accumulator = Accumulator::None;
    self.running_size = 0;
  }

  /// Writes a frame, delegating to the wrapped `WebSocket`.
  pub async fn write_frame<'a>(
    &mut self,
    frame: Frame<'a>,
  ) -> Result<(), WebSocketError> {
    self.ws.write_frame(frame).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::Role;
  use tokio::io::duplex;

  async fn collector_over(
    bytes: Vec<u8>,
  ) -> FragmentCollector<tokio::io::DuplexStream> {
    let (mut client, server) = duplex(4096);
    client.write_all(&bytes).await.unwrap();
    let ws = WebSocket::after_handshake(server, Role::Server);
    FragmentCollector::new(ws)
  }

  #[tokio::test]
  async fn fragmented_binary_message_reassembles() {
    // frame 1: binary, fin=false, payload 01 02 03
    // frame 2: continuation, fin=true, payload 04 05
    let bytes = vec![
      0x02, 0x03, 0x01, 0x02, 0x03, 0x80, 0x02, 0x04, 0x05,
    ];
    let mut collector = collector_over(bytes).await;
    let msg = collector.read_frame().await.unwrap();
    assert!(msg.fin);
    assert_eq!(msg.opcode, OpCode::Binary);
    assert_eq!(msg.payload.as_ref(), &[1, 2, 3, 4, 5]);
  }

  #[tokio::test]
  async fn continuation_without_start_is_protocol_error() {
    let bytes = vec![0x80, 0x02, b'a', b'b'];
    let mut collector = collector_over(bytes).await;
    let err = collector.read_frame().await.unwrap_err();
    assert!(matches!(err, WebSocketError::InvalidContinuationFrame));
  }

  #[tokio::test]
  async fn invalid_utf8_text_message_is_rejected() {
    let payload: Vec<u8> = vec![
      0xCE, 0xBA, 0xE1, 0xBD, 0xB9, 0xCF, 0x83, 0xCE, 0xBC, 0xCE, 0xB5,
      0xED, 0xA0, 0x80, b'e', b'd', b'i', b't', b'e', b'd',
    ];
    let mut bytes = vec![0x81, payload.len() as u8];
    bytes.extend_from_slice(&payload);
    let mut collector = collector_over(bytes).await;
    let err = collector.read_frame().await.unwrap_err();
    assert!(matches!(err, WebSocketError::InvalidUTF8));
  }
}

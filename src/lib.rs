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

//! _ferrosocket_ is an RFC 6455 WebSocket client/server protocol core.
//!
//! Passes the _Autobahn|TestSuite_ and fuzzed with LLVM's _libfuzzer_.
//!
//! You can use it as a raw websocket frame parser and deal with spec
//! compliance yourself, or you can use it as a full-fledged websocket
//! server.
//!
//! # Example
//!
//! ```
//! use tokio::net::TcpStream;
//! use ferrosocket::{WebSocket, OpCode, Role};
//! use anyhow::Result;
//!
//! async fn handle(
//!   socket: TcpStream,
//! ) -> Result<()> {
//!   let mut ws = WebSocket::after_handshake(socket, Role::Server);
//!   ws.set_writev(false);
//!   ws.set_auto_close(true);
//!   ws.set_auto_pong(true);
//!
//!   loop {
//!     let frame = ws.read_frame().await?;
//!     match frame.opcode {
//!       OpCode::Close => break,
//!       OpCode::Text | OpCode::Binary => {
//!         ws.write_frame(frame).await?;
//!       }
//!       _ => {}
//!     }
//!   }
//!   Ok(())
//! }
//! ```
//!
//! ## Fragmentation
//!
//! By default, this crate gives the application raw frames with FIN set
//! as they arrive on the wire.
//!
//! For fully reassembled messages, use [`FragmentCollector`]:
//! ```
//! use ferrosocket::{FragmentCollector, WebSocket, Role};
//! use tokio::net::TcpStream;
//! use anyhow::Result;
//!
//! async fn handle(
//!   socket: TcpStream,
//! ) -> Result<()> {
//!   let mut ws = WebSocket::after_handshake(socket, Role::Server);
//!   let mut ws = FragmentCollector::new(ws);
//!   let incoming = ws.read_frame().await?;
//!   // Always returns full messages
//!   assert!(incoming.fin);
//!   Ok(())
//! }
//! ```
//!
//! Inbound frames with `RSV1` set are transparently inflated with a raw
//! DEFLATE decoder; there is no outbound compression and no
//! `permessage-deflate` extension negotiation.
//!
//! ## HTTP Upgrades
//!
//! Enable the `upgrade` feature to do server-side upgrades and client-side
//! handshakes.
//!
//! This feature is powered by [hyper](https://docs.rs/hyper).
//!
//! ```
//! use ferrosocket::upgrade::upgrade;
//! use hyper::{Request, body::Incoming, Response};
//! use anyhow::Result;
//!
//! async fn server_upgrade(
//!   mut req: Request<Incoming>,
//! ) -> Result<Response<http_body_util::Empty<hyper::body::Bytes>>> {
//!   let (response, fut) = upgrade(&mut req)?;
//!
//!   tokio::spawn(async move {
//!     let _ws = fut.await;
//!     // Do something with the websocket
//!   });
//!
//!   Ok(response)
//! }
//! ```
//!
//! The `handshake` module's request/response codec is always available
//! (it parses raw bytes, not `hyper` types); its `client` submodule
//! (behind `upgrade`) drives a `hyper` HTTP/1.1 connection through a
//! client-side handshake.
//!
//! ```
//! use ferrosocket::handshake;
//! use ferrosocket::FragmentCollector;
//! use hyper::{Request, body::Bytes, upgrade::Upgraded, header::{UPGRADE, CONNECTION}};
//! use http_body_util::Empty;
//! use hyper_util::rt::TokioIo;
//! use tokio::net::TcpStream;
//! use std::future::Future;
//! use anyhow::Result;
//!
//! async fn connect() -> Result<FragmentCollector<TokioIo<Upgraded>>> {
//!   let stream = TcpStream::connect("localhost:9001").await?;
//!
//!   let req = Request::builder()
//!     .method("GET")
//!     .uri("http://localhost:9001/")
//!     .header("Host", "localhost:9001")
//!     .header(UPGRADE, "websocket")
//!     .header(CONNECTION, "upgrade")
//!     .header(
//!       "Sec-WebSocket-Key",
//!       ferrosocket::handshake::generate_key(),
//!     )
//!     .header("Sec-WebSocket-Version", "13")
//!     .body(Empty::<Bytes>::new())?;
//!
//!   let (ws, _) = handshake::client::client(&SpawnExecutor, req, stream).await?;
//!   Ok(FragmentCollector::new(ws))
//! }
//!
//! // Tie hyper's executor to tokio runtime
//! struct SpawnExecutor;
//!
//! impl<Fut> hyper::rt::Executor<Fut> for SpawnExecutor
//! where
//!   Fut: Future + Send + 'static,
//!   Fut::Output: Send + 'static,
//! {
//!   fn execute(&self, fut: Fut) {
//!     tokio::task::spawn(fut);
//!   }
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

mod close;
mod error;
mod fragment;
mod frame;
/// Opening-handshake request/response codecs, always available; the
/// `client` submodule (hyper-backed client connect) requires `upgrade`.
pub mod handshake;
mod mask;
mod recv;
mod utf8;
/// HTTP upgrades.
#[cfg(feature = "upgrade")]
#[cfg_attr(docsrs, doc(cfg(feature = "upgrade")))]
pub mod upgrade;

use miniz_oxide::inflate::stream::inflate;
use miniz_oxide::inflate::stream::InflateState;
use miniz_oxide::DataFormat;
use miniz_oxide::MZFlush;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;

pub use crate::close::CloseCode;
pub use crate::close::ClosePayload;
use crate::close::CloseState;
pub use crate::error::WebSocketError;
pub use crate::fragment::FragmentCollector;
pub use crate::frame::Frame;
pub use crate::frame::OpCode;
pub use crate::frame::Payload;
pub use crate::mask::unmask;
use crate::mask::DefaultMaskGenerator;
pub use crate::mask::MaskGenerator;
use crate::recv::SharedRecv;

/// Default cap on a single frame's payload size, and (absent an explicit
/// `FragmentCollector::max_message_size` override) on a reassembled
/// message. RFC 6455 places no hard ceiling; this matches what the
/// distilled frame-size invariant calls out as a sane default.
const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 << 20;
/// Default cap on a single frame's declared payload length, checked
/// before the payload is even read off the wire.
const DEFAULT_MAX_FRAME_SIZE: usize = 64 << 20;
/// Default fragmentation threshold [`WebSocket::write_message`] uses
/// when splitting an outbound message into frames.
const DEFAULT_OUTGOING_FRAME_SIZE: usize = 512 << 10;

/// Which side of the connection a [`WebSocket`] represents. Decides
/// masking obligation on send (clients mask, servers don't) and
/// expectation on receive (servers unmask incoming frames).
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Role {
  Server,
  Client,
}

struct WriteHalf<S> {
  stream: S,
  close: CloseState,
  write_buffer: Vec<u8>,
}

/// WebSocket protocol implementation over an async stream.
///
/// This is the connection driver: it owns the per-connection state,
/// routes decoded frames to the close coordinator and the ping/pong
/// responder, and pushes encoded frames to the transport. Message
/// reassembly across fragments is *not* done here — wrap in a
/// [`FragmentCollector`] for that.
pub struct WebSocket<S> {
  write_half: WriteHalf<S>,
  // Config
  vectored: bool,
  auto_close: bool,
  auto_pong: bool,
  pub(crate) max_message_size: usize,
  max_frame_size: usize,
  outgoing_frame_size: usize,
  writev_threshold: usize,
  auto_apply_mask: bool,
  mask_generator: Box<dyn MaskGenerator>,
  role: Role,
  // Read-half
  spill: Option<Vec<u8>>,
  // !Sync marker
  _marker: std::marker::PhantomData<SharedRecv>,
}

impl<'f, S> WebSocket<S> {
  /// Creates a new `WebSocket` from a stream that has already completed the WebSocket handshake.
  ///
  /// Use the `upgrade` feature to handle server upgrades and client handshakes.
  ///
  /// # Example
  ///
  /// ```
  /// use tokio::net::TcpStream;
  /// use ferrosocket::{WebSocket, OpCode, Role};
  /// use anyhow::Result;
  ///
  /// async fn handle_client(
  ///   socket: TcpStream,
  /// ) -> Result<()> {
  ///   let mut ws = WebSocket::after_handshake(socket, Role::Server);
  ///   // ...
  ///   Ok(())
  /// }
  /// ```
  pub fn after_handshake(stream: S, role: Role) -> Self
  where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
  {
    recv::init_once();
    Self {
      write_half: WriteHalf {
        stream,
        close: CloseState::new(),
        write_buffer: Vec::with_capacity(2),
      },
      vectored: true,
      auto_close: true,
      auto_pong: true,
      auto_apply_mask: true,
      max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
      max_frame_size: DEFAULT_MAX_FRAME_SIZE,
      outgoing_frame_size: DEFAULT_OUTGOING_FRAME_SIZE,
      writev_threshold: 1024,
      mask_generator: Box::new(DefaultMaskGenerator),
      role,
      spill: None,
      _marker: std::marker::PhantomData,
    }
  }

  /// Consumes the `WebSocket` and returns the underlying stream.
  #[inline]
  pub fn into_inner(self) -> S {
    self.write_half.stream
  }

  /// Sets whether to use vectored writes. This option does not guarantee that vectored writes will be always used.
  ///
  /// Default: `true`
  pub fn set_writev(&mut self, vectored: bool) {
    self.vectored = vectored;
  }

  pub fn set_writev_threshold(&mut self, threshold: usize) {
    self.writev_threshold = threshold;
  }

  /// Sets whether to automatically close the connection when a close frame is received. When set to `false`, the application will have to manually send close frames.
  ///
  /// Default: `true`
  pub fn set_auto_close(&mut self, auto_close: bool) {
    self.auto_close = auto_close;
  }

  /// Sets whether to automatically send a pong frame when a ping frame is received.
  ///
  /// Default: `true`
  pub fn set_auto_pong(&mut self, auto_pong: bool) {
    self.auto_pong = auto_pong;
  }

  /// Sets the maximum reassembled message size in bytes, consulted by
  /// [`FragmentCollector`]. See [`WebSocket::set_max_frame_size`] for the
  /// per-frame cap this type itself enforces while reading.
  ///
  /// Default: 64 MiB
  pub fn set_max_message_size(&mut self, max_message_size: usize) {
    self.max_message_size = max_message_size;
  }

  /// Sets the maximum size of a single frame's payload. A frame declaring
  /// a larger length fails with [`WebSocketError::FrameTooLarge`] before
  /// its payload is read off the wire.
  ///
  /// Default: 64 MiB
  pub fn set_max_frame_size(&mut self, max_frame_size: usize) {
    self.max_frame_size = max_frame_size;
  }

  /// Sets the fragmentation threshold [`WebSocket::write_message`] uses
  /// when splitting an outbound message into frames.
  ///
  /// Default: 512 KiB
  pub fn set_outgoing_frame_size(&mut self, outgoing_frame_size: usize) {
    self.outgoing_frame_size = outgoing_frame_size.max(1);
  }

  /// Sets whether to automatically apply the mask to the frame payload.
  ///
  /// Default: `true`
  pub fn set_auto_apply_mask(&mut self, auto_apply_mask: bool) {
    self.auto_apply_mask = auto_apply_mask;
  }

  /// Installs a custom masking-key generator. The default draws from the
  /// OS's secure random source.
  pub fn set_mask_generator(&mut self, generator: Box<dyn MaskGenerator>) {
    self.mask_generator = generator;
  }

  /// True once either side has sent a CLOSE frame. Once `true`,
  /// [`WebSocket::write_frame`] refuses any further non-Close frame.
  pub fn is_closed(&self) -> bool {
    self.write_half.close.sent || self.write_half.close.received
  }

  /// Writes a frame to the stream.
  ///
  /// This method will not mask the frame payload unless `auto_apply_mask`
  /// is set and the role is `Client`.
  ///
  /// # Example
  ///
  /// ```
  /// use ferrosocket::{WebSocket, Frame, OpCode};
  /// use tokio::net::TcpStream;
  /// use anyhow::Result;
  ///
  /// async fn send(
  ///   ws: &mut WebSocket<TcpStream>
  /// ) -> Result<()> {
  ///   let mut frame = Frame::binary(vec![0x01, 0x02, 0x03].into());
  ///   ws.write_frame(frame).await?;
  ///   Ok(())
  /// }
  /// ```
  pub async fn write_frame<'a>(
    &'a mut self,
    mut frame: Frame<'a>,
  ) -> Result<(), WebSocketError>
  where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
  {
    if self.write_half.close.sent && frame.opcode != OpCode::Close {
      return Err(WebSocketError::ConnectionClosed);
    }

    if self.role == Role::Client && self.auto_apply_mask {
      if frame.mask.is_none() {
        frame.mask = Some(self.mask_generator.next_key().get().to_be_bytes());
      }
      frame.mask();
    }

    let write_half = &mut self.write_half;
    if frame.opcode == OpCode::Close {
      write_half.close.sent = true;
    }

    if self.vectored && frame.payload.len() > self.writev_threshold {
      frame.writev(&mut write_half.stream).await?;
    } else {
      let text = frame.write(&mut write_half.write_buffer);
      write_half.stream.write_all(text).await?;
    }

    Ok(())
  }

  /// Writes a possibly-large message, fragmenting it into
  /// `outgoing_frame_size`-sized frames: the first frame carries
  /// `opcode`, later frames `Continuation`, and only the last frame sets
  /// `fin`. A zero-length message still produces exactly one frame.
  /// `opcode` must be `Text` or `Binary`.
  pub async fn write_message(
    &mut self,
    opcode: OpCode,
    payload: &[u8],
  ) -> Result<(), WebSocketError>
  where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
  {
    debug_assert!(!crate::frame::is_control(opcode));

    let chunk_size = self.outgoing_frame_size;
    let mut chunks = payload.chunks(chunk_size).peekable();

    if chunks.peek().is_none() {
      let frame = Frame::new(true, opcode, None, Payload::Borrowed(&[]));
      return self.write_frame(frame).await;
    }

    let mut current_opcode = opcode;
    while let Some(chunk) = chunks.next() {
      let fin = chunks.peek().is_none();
      let frame =
        Frame::new(fin, current_opcode, None, Payload::Borrowed(chunk));
      self.write_frame(frame).await?;
      current_opcode = OpCode::Continuation;
    }

    Ok(())
  }

  /// Reads a frame from the stream.
  ///
  /// This method will unmask the frame payload. For fragmented frames, use `FragmentCollector::read_frame`.
  ///
  /// Text frames payload is guaranteed to be valid UTF-8.
  ///
  /// # Example
  ///
  /// ```
  /// use ferrosocket::{OpCode, WebSocket, Frame};
  /// use tokio::net::TcpStream;
  /// use anyhow::Result;
  ///
  /// async fn echo(
  ///   ws: &mut WebSocket<TcpStream>
  /// ) -> Result<()> {
  ///   let frame = ws.read_frame().await?;
  ///   match frame.opcode {
  ///     OpCode::Text | OpCode::Binary => {
  ///       ws.write_frame(frame).await?;
  ///     }
  ///     _ => {}
  ///   }
  ///   Ok(())
  /// }
  /// ```
  pub async fn read_frame(&mut self) -> Result<Frame<'f>, WebSocketError>
  where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
  {
    self.read_frame_inner().await
  }

  /// XXX: Do not expose this method to the public API.
  /// Lifetime requirements for safe recv buffer use are not enforced.
  pub(crate) async fn read_frame_inner(
    &mut self,
  ) -> Result<Frame<'f>, WebSocketError>
  where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
  {
    loop {
      let mut frame = self.parse_frame_header().await?;
      if self.role == Role::Server && self.auto_apply_mask {
        frame.unmask()
      };

      let write_half = &mut self.write_half;
      if write_half.close.sent && frame.opcode != OpCode::Close {
        return Err(WebSocketError::ConnectionClosed);
      }

      match frame.opcode {
        OpCode::Close if self.auto_close && !write_half.close.sent => {
          let decoded = crate::close::decode_close_payload(&frame.payload);

          self.write_half.close.received = true;

          match decoded {
            Ok(_) => {
              let echo = frame.payload.to_owned();
              let _ = self.write_frame(Frame::close_raw(Payload::Owned(echo))).await;
              break Ok(frame);
            }
            Err(WebSocketError::InvalidCloseCode) => {
              let reason = frame.payload.get(2..).unwrap_or(&[]);
              let _ = self.write_frame(Frame::close(1002, reason)).await;
              break Err(WebSocketError::InvalidCloseCode);
            }
            Err(e) => break Err(e),
          }
        }
        OpCode::Ping if self.auto_pong => {
          self.write_frame(Frame::pong(frame.payload.into_owned())).await?;
        }
        OpCode::Text => {
          if frame.fin && !frame.is_utf8() {
            break Err(WebSocketError::InvalidUTF8);
          }

          break Ok(frame);
        }
        _ => break Ok(frame),
      }
    }
  }

  async fn parse_frame_header<'a>(
    &mut self,
  ) -> Result<Frame<'a>, WebSocketError>
  where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
  {
    macro_rules! eof {
      ($n:expr) => {{
        let n = $n;
        if n == 0 {
          return Err(WebSocketError::UnexpectedEOF);
        }
        n
      }};
    }

    let stream = &mut self.write_half.stream;
    let head = recv::init_once();
    let mut nread = 0;

    if let Some(spill) = self.spill.take() {
      head[..spill.len()].copy_from_slice(&spill);
      nread += spill.len();
    }

    while nread < 2 {
      nread += eof!(stream.read(&mut head[nread..]).await?);
    }

    let fin = head[0] & 0b1000_0000 != 0;

    let rsv1 = head[0] & 0b0100_0000 != 0;
    let rsv2 = head[0] & 0b0010_0000 != 0;
    let rsv3 = head[0] & 0b0001_0000 != 0;

    let mut compressed = false;

    if rsv1 && !rsv2 && !rsv3 {
      compressed = true;
    } else if rsv1 || rsv2 || rsv3 {
      return Err(WebSocketError::ReservedBitsNotZero);
    }

    let opcode = frame::OpCode::try_from(head[0] & 0b0000_1111)?;
    let masked = head[1] & 0b1000_0000 != 0;

    let length_code = head[1] & 0x7F;
    let extra = match length_code {
      126 => 2,
      127 => 8,
      _ => 0,
    };

    let length: usize = if extra > 0 {
      while nread < 2 + extra {
        nread += eof!(stream.read(&mut head[nread..]).await?);
      }

      match extra {
        2 => {
          let len =
            u16::from_be_bytes(head[2..4].try_into().unwrap()) as usize;
          if len <= 125 {
            return Err(WebSocketError::NonMinimalEncoding);
          }
          len
        }
        8 => {
          let raw = u64::from_be_bytes(head[2..10].try_into().unwrap());
          if raw & (1 << 63) != 0 {
            return Err(WebSocketError::InvalidFragment);
          }
          if raw <= u16::MAX as u64 {
            return Err(WebSocketError::NonMinimalEncoding);
          }
          raw as usize
        }
        _ => unreachable!(),
      }
    } else {
      usize::from(length_code)
    };

    let mask = match masked {
      true => {
        while nread < 2 + extra + 4 {
          nread += eof!(stream.read(&mut head[nread..]).await?);
        }

        Some(head[2 + extra..2 + extra + 4].try_into().unwrap())
      }
      false => None,
    };

    if frame::is_control(opcode) && !fin {
      return Err(WebSocketError::ControlFrameFragmented);
    }

    if frame::is_control(opcode) && length > 125 {
      return Err(WebSocketError::PingFrameTooLarge);
    }

    if length > self.max_frame_size {
      return Err(WebSocketError::FrameTooLarge);
    }

    let required = 2 + extra + mask.map(|_| 4).unwrap_or(0) + length;
    let mut payload = if required > nread {
      // Allocate more space
      let mut new_head = head.to_vec();
      new_head.resize(required, 0);

      stream.read_exact(&mut new_head[nread..]).await?;

      Payload::Owned(new_head[required - length..].to_vec())
    } else {
      if nread > required {
        // We read too much
        self.spill = Some(head[required..nread].to_vec());
      }

      let buff = &mut head[required - length..required];
      if buff.len() > self.writev_threshold {
        Payload::BorrowedMut(buff)
      } else {
        Payload::Owned(buff.to_vec())
      }
    };

    if compressed {
      payload = Payload::Owned(inflate_payload(payload.as_ref())?);
    }

    let frame = Frame::new(fin, opcode, mask, payload);
    Ok(frame)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::io::duplex;

  const _: () = {
    const fn assert_unsync<S>() {
      // Generic trait with a blanket impl over `()` for all types.
      trait AmbiguousIfImpl<A> {
        // Required for actually being able to reference the trait.
        fn some_item() {}
      }

      impl<T: ?Sized> AmbiguousIfImpl<()> for T {}

      // Used for the specialized impl when *all* traits in
      // `$($t)+` are implemented.
      #[allow(dead_code)]
      struct Invalid;

      impl<T: ?Sized + Sync> AmbiguousIfImpl<Invalid> for T {}

      // If there is only one specialized trait impl, type inference with
      // `_` can be resolved and this can compile. Fails to compile if
      // `$x` implements `AmbiguousIfImpl<Invalid>`.
      let _ = <S as AmbiguousIfImpl<_>>::some_item;
    }
    assert_unsync::<WebSocket<tokio::net::TcpStream>>();
  };

  async fn ws_over(bytes: Vec<u8>) -> WebSocket<tokio::io::DuplexStream> {
    let (mut client, server) = duplex(4096);
    client.write_all(&bytes).await.unwrap();
    WebSocket::after_handshake(server, Role::Server)
  }

  #[tokio::test]
  async fn tiny_text_echo() {
    // Minimal RFC 6455 §5.7 example frame: masked would be required from
    // a real client, but auto_apply_mask only unmasks when role is
    // Server and the mask bit is set; this frame is sent unmasked.
    let mut ws = ws_over(vec![0x81, 0x05, b'H', b'e', b'l', b'l', b'o']).await;
    let frame = ws.read_frame().await.unwrap();
    assert!(frame.fin);
    assert_eq!(frame.opcode, OpCode::Text);
    assert_eq!(frame.payload.as_ref(), b"Hello");
  }

  #[tokio::test]
  async fn rejects_non_minimal_length_encoding() {
    // Length 5 encoded in the 2-byte extended form, which is never the
    // minimal encoding for a value under 126.
    let mut ws = ws_over(vec![
      0x81, 0x7E, 0x00, 0x05, b'H', b'e', b'l', b'l', b'o',
    ])
    .await;
    let err = ws.read_frame().await.unwrap_err();
    assert!(matches!(err, WebSocketError::NonMinimalEncoding));
  }

  #[tokio::test]
  async fn oversize_frame_is_rejected() {
    let mut ws = ws_over(vec![0x82, 0x7E, 0x07, 0xD0]).await;
    ws.set_max_frame_size(1024);
    let err = ws.read_frame().await.unwrap_err();
    assert!(matches!(err, WebSocketError::FrameTooLarge));
  }

  #[tokio::test]
  async fn reserved_opcode_is_rejected() {
    let mut ws = ws_over(vec![0x83, 0x00]).await;
    let err = ws.read_frame().await.unwrap_err();
    assert!(matches!(err, WebSocketError::InvalidOpcode(3)));
  }

  #[tokio::test]
  async fn write_message_fragments_large_payloads() {
    let (client, mut server) = duplex(1 << 20);
    let mut ws = WebSocket::after_handshake(client, Role::Server);
    ws.set_outgoing_frame_size(4);

    ws.write_message(OpCode::Binary, b"abcdefgh")
      .await
      .unwrap();
    drop(ws);

    let mut out = Vec::new();
    server.read_to_end(&mut out).await.unwrap();
    // First frame: not fin, opcode Binary, len 4.
    assert_eq!(&out[0..2], &[0x02, 0x04]);
    // Second frame: fin, opcode Continuation, len 4.
    assert_eq!(&out[6..8], &[0x80, 0x04]);
  }

  #[tokio::test]
  async fn write_frame_after_close_sent_is_rejected() {
    let (client, _server) = duplex(4096);
    let mut ws = WebSocket::after_handshake(client, Role::Server);
    ws.write_frame(Frame::close(1000, b"bye")).await.unwrap();
    let err = ws
      .write_frame(Frame::text(Payload::Borrowed(b"late")))
      .await
      .unwrap_err();
    assert!(matches!(err, WebSocketError::ConnectionClosed));
  }
}

fn inflate_payload(payload: &[u8]) -> Result<Vec<u8>, WebSocketError> {
  let max_output_size = usize::MAX;
  let mut out: Vec<u8> =
    vec![0; payload.len().saturating_mul(2).min(max_output_size)];
  let mut state = InflateState::new_boxed(DataFormat::Raw);

  let payload = [payload, [0x00, 0x00, 0xff, 0xff].as_slice()].concat();
  let res = inflate(&mut state, &payload, &mut out, MZFlush::Partial);

  match res.status {
    Ok(_) => {
      out.truncate(res.bytes_written);
      Ok(out)
    }
    Err(_) => Err(WebSocketError::InvalidEncoding),
  }
}

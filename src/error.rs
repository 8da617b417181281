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

use crate::close::CloseCode;

/// Errors that can occur during the WebSocket handshake or while the
/// protocol core is reading/writing frames.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WebSocketError {
  #[error("Invalid fragment")]
  InvalidFragment,
  #[error("Invalid UTF-8")]
  InvalidUTF8,
  #[error("Invalid continuation frame")]
  InvalidContinuationFrame,
  #[error("Invalid close frame")]
  InvalidCloseFrame,
  #[error("Invalid close code")]
  InvalidCloseCode,
  #[error("Reserved bits are not zero")]
  ReservedBitsNotZero,
  #[error("Control frames must not be fragmented")]
  ControlFrameFragmented,
  #[error("Ping frame too large")]
  PingFrameTooLarge,
  #[error("Frame too large")]
  FrameTooLarge,
  #[error("Message too large")]
  MessageTooLarge,
  #[error("Datagram too large to encode")]
  DatagramTooLarge,
  #[error("Not minimally encoded")]
  NonMinimalEncoding,
  #[error("Failed to inflate payload")]
  InvalidEncoding,
  #[error("Unexpected EOF")]
  UnexpectedEOF,
  #[error("Connection is closed, but you tried to write a message.")]
  ConnectionClosed,
  #[error("Invalid opcode: {0}")]
  InvalidOpcode(u8),
  #[error("Vector must be continuous")]
  VectorMustBeContinuous,
  #[error("Invalid handshake: {0}")]
  InvalidHandshake(String),
  #[error("Invalid value: {0}")]
  InvalidHeaderValue(String),
  #[error("Handshake incomplete")]
  HandshakeIncomplete,
  #[error("Handshake was refused by peer: {0}")]
  HandshakeRefused(String),
  #[error("Server does not support a compatible protocol version (it advertised: {0})")]
  VersionNotSupported(String),
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[cfg(feature = "upgrade")]
  #[error("HTTP error: {0}")]
  HttpError(#[from] hyper::Error),
  #[cfg(feature = "upgrade")]
  #[error("Http header is invalid")]
  HttpHeaderInvalid(String),
  #[cfg(feature = "upgrade")]
  #[error("Http header is missing: {0}")]
  HttpHeaderMissing(String),
  #[error("Method is not GET")]
  InvalidMethod,
  #[error("HTTP version must be 1.1 or greater")]
  InvalidHttpVersion,
  #[error("Sec-WebSocket-Key header is missing")]
  MissingSecWebSocketKey,
  #[cfg(feature = "upgrade")]
  #[error("Upgrade header is not set")]
  InvalidUpgradeHeader,
  #[cfg(feature = "upgrade")]
  #[error("Connection header is not set")]
  InvalidConnectionHeader,
}

impl WebSocketError {
  /// Maps a protocol-level failure to the close code that should be sent
  /// to the peer before tearing the connection down, if any.
  ///
  /// Handshake-time failures (e.g. [`WebSocketError::HandshakeRefused`])
  /// have no wire close code — the connection never reached `Open` — so
  /// this returns `None` for those.
  pub fn close_code(&self) -> Option<CloseCode> {
    use WebSocketError::*;
    match self {
      InvalidFragment
      | InvalidContinuationFrame
      | ReservedBitsNotZero
      | ControlFrameFragmented
      | PingFrameTooLarge
      | InvalidOpcode(_)
      | NonMinimalEncoding
      | VectorMustBeContinuous => Some(CloseCode::Protocol),
      InvalidUTF8 => Some(CloseCode::Invalid),
      InvalidCloseFrame | InvalidCloseCode => Some(CloseCode::Protocol),
      FrameTooLarge | MessageTooLarge | DatagramTooLarge => {
        Some(CloseCode::Size)
      }
      UnexpectedEOF => Some(CloseCode::Away),
      InvalidEncoding => Some(CloseCode::Error),
      IoError(_) => Some(CloseCode::Away),
      ConnectionClosed => None,
      _ => None,
    }
  }
}

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

use std::borrow::Cow;
use std::ops::Deref;

use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use crate::close::encode_close_payload;
use crate::close::CloseCode;
use crate::error::WebSocketError;
use crate::mask;

/// Largest payload length encodable in the smallest, 7-bit length field.
const MAX_7_BIT_LEN: u64 = 125;
/// Largest payload length encodable in the 16-bit extended length field.
const MAX_16_BIT_LEN: u64 = u16::MAX as u64;
/// Largest payload length a frame may declare, per RFC 6455's 63-bit cap
/// (the top bit of the 8-byte length field must be zero).
const MAX_63_BIT_LEN: u64 = i64::MAX as u64;

/// A WebSocket frame's opcode, identifying the kind of payload it
/// carries. See RFC 6455 §5.2.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
  Continuation,
  Text,
  Binary,
  Close,
  Ping,
  Pong,
}

impl TryFrom<u8> for OpCode {
  type Error = WebSocketError;

  fn try_from(value: u8) -> Result<Self, Self::Error> {
    match value {
      0 => Ok(OpCode::Continuation),
      1 => Ok(OpCode::Text),
      2 => Ok(OpCode::Binary),
      8 => Ok(OpCode::Close),
      9 => Ok(OpCode::Ping),
      10 => Ok(OpCode::Pong),
      other => Err(WebSocketError::InvalidOpcode(other)),
    }
  }
}

impl From<OpCode> for u8 {
  fn from(value: OpCode) -> u8 {
    match value {
      OpCode::Continuation => 0,
      OpCode::Text => 1,
      OpCode::Binary => 2,
      OpCode::Close => 8,
      OpCode::Ping => 9,
      OpCode::Pong => 10,
    }
  }
}

/// Control frames (Close, Ping, Pong) may never be fragmented and are
/// capped at 125 bytes of payload (RFC 6455 §5.5).
pub fn is_control(opcode: OpCode) -> bool {
  matches!(opcode, OpCode::Close | OpCode::Ping | OpCode::Pong)
}

/// A frame's payload bytes. Kept as a `Cow`-like enum so that the hot
/// read path can hand back a view into the connection's scratch buffer
/// (`BorrowedMut`) instead of always copying into a fresh `Vec`.
#[derive(Debug)]
pub enum Payload<'a> {
  Borrowed(&'a [u8]),
  BorrowedMut(&'a mut [u8]),
  Owned(Vec<u8>),
}

impl<'a> Payload<'a> {
  pub fn len(&self) -> usize {
    self.as_ref().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn to_owned(&self) -> Vec<u8> {
    self.as_ref().to_vec()
  }

  pub fn into_owned(self) -> Payload<'static> {
    Payload::Owned(match self {
      Payload::Borrowed(b) => b.to_vec(),
      Payload::BorrowedMut(b) => b.to_vec(),
      Payload::Owned(v) => v,
    })
  }
}

impl<'a> AsRef<[u8]> for Payload<'a> {
  fn as_ref(&self) -> &[u8] {
    match self {
      Payload::Borrowed(b) => b,
      Payload::BorrowedMut(b) => b,
      Payload::Owned(v) => v,
    }
  }
}

impl<'a> Deref for Payload<'a> {
  type Target = [u8];

  fn deref(&self) -> &[u8] {
    self.as_ref()
  }
}

impl<'a> From<Vec<u8>> for Payload<'a> {
  fn from(v: Vec<u8>) -> Self {
    Payload::Owned(v)
  }
}

impl<'a> From<&'a [u8]> for Payload<'a> {
  fn from(v: &'a [u8]) -> Self {
    Payload::Borrowed(v)
  }
}

impl<'a> From<Cow<'a, [u8]>> for Payload<'a> {
  fn from(v: Cow<'a, [u8]>) -> Self {
    match v {
      Cow::Borrowed(b) => Payload::Borrowed(b),
      Cow::Owned(o) => Payload::Owned(o),
    }
  }
}

/// A decoded WebSocket frame, per RFC 6455 §5.2.
#[derive(Debug)]
pub struct Frame<'a> {
  pub fin: bool,
  pub opcode: OpCode,
  pub mask: Option<[u8; 4]>,
  pub payload: Payload<'a>,
}

impl<'a> Frame<'a> {
  pub fn new(
    fin: bool,
    opcode: OpCode,
    mask: Option<[u8; 4]>,
    payload: Payload<'a>,
  ) -> Self {
    Self {
      fin,
      opcode,
      mask,
      payload,
    }
  }

  /// Builds a Text data frame. Does not validate that `payload` is
  /// UTF-8 — callers constructing outbound frames are responsible for
  /// that; inbound Text frames are validated by `is_utf8`/`Utf8Accumulator`.
  pub fn text(payload: Payload<'a>) -> Self {
    Self::new(true, OpCode::Text, None, payload)
  }

  /// Builds a Binary data frame.
  pub fn binary(payload: Payload<'a>) -> Self {
    Self::new(true, OpCode::Binary, None, payload)
  }

  /// Builds a Ping control frame.
  pub fn ping(payload: Payload<'a>) -> Self {
    Self::new(true, OpCode::Ping, None, payload)
  }

  /// Builds a Pong control frame.
  pub fn pong(payload: Payload<'a>) -> Self {
    Self::new(true, OpCode::Pong, None, payload)
  }

  /// Builds a Close frame with an already-encoded payload (code + reason,
  /// or empty). Use this to echo a peer's close payload verbatim.
  pub fn close_raw(payload: Payload<'a>) -> Self {
    Self::new(true, OpCode::Close, None, payload)
  }

  /// Builds a Close frame from a close code and a reason string,
  /// truncating the reason per `close::truncate_reason`.
  pub fn close(code: u16, reason: &[u8]) -> Frame<'static> {
    let reason = std::str::from_utf8(reason).unwrap_or("");
    let payload = encode_close_payload(CloseCode::from(code), reason);
    Frame::new(true, OpCode::Close, None, Payload::Owned(payload))
  }

  /// True for Close, Ping and Pong frames.
  pub fn is_control(&self) -> bool {
    is_control(self.opcode)
  }

  /// True for Continuation frames.
  pub fn is_continuation(&self) -> bool {
    self.opcode == OpCode::Continuation
  }

  /// Validates that a complete, unfragmented Text frame's payload is
  /// well-formed UTF-8. Fragmented Text messages must instead be checked
  /// incrementally via `utf8::Utf8Accumulator`, since this only looks at
  /// one frame's bytes in isolation.
  pub fn is_utf8(&self) -> bool {
    #[cfg(feature = "simd")]
    {
      simdutf8::basic::from_utf8(self.payload.as_ref()).is_ok()
    }
    #[cfg(not(feature = "simd"))]
    {
      std::str::from_utf8(self.payload.as_ref()).is_ok()
    }
  }

  /// Applies the RFC 6455 masking transform to this frame's payload in
  /// place, drawing a fresh key from the default mask generator if one
  /// was not already set.
  pub fn mask(&mut self) {
    let key = self.mask.get_or_insert_with(|| {
      use crate::mask::MaskGenerator;
      crate::mask::DefaultMaskGenerator.next_key().get().to_be_bytes()
    });
    mask::mask(payload_mut(&mut self.payload), *key);
  }

  /// Removes the RFC 6455 masking transform from this frame's payload in
  /// place, using the key already present on `self.mask`. A no-op if the
  /// frame carries no mask.
  pub fn unmask(&mut self) {
    if let Some(key) = self.mask {
      mask::unmask(payload_mut(&mut self.payload), key);
    }
  }

  /// Chooses the smallest length-field encoding for `len`, per RFC 6455
  /// §5.2's minimum-size-encoding rule, and fails outbound payloads that
  /// would overflow the 63-bit length field.
  fn length_prefix(len: u64) -> Result<Vec<u8>, WebSocketError> {
    if len <= MAX_7_BIT_LEN {
      Ok(vec![len as u8])
    } else if len <= MAX_16_BIT_LEN {
      let mut buf = vec![126u8];
      buf.extend_from_slice(&(len as u16).to_be_bytes());
      Ok(buf)
    } else if len <= MAX_63_BIT_LEN {
      let mut buf = vec![127u8];
      buf.extend_from_slice(&len.to_be_bytes());
      Ok(buf)
    } else {
      Err(WebSocketError::DatagramTooLarge)
    }
  }

  /// Serializes this frame's header + payload into `buf`, returning the
  /// written slice. The payload is written as-is: callers must have
  /// already masked it via [`Frame::mask`] if masking is required.
  pub fn write(&self, buf: &mut Vec<u8>) -> &[u8] {
    buf.clear();
    let len = self.payload.len() as u64;

    let mut head = 0u8;
    if self.fin {
      head |= 0b1000_0000;
    }
    head |= u8::from(self.opcode);
    buf.push(head);

    let length_prefix =
      Self::length_prefix(len).expect("payload length already validated");
    let mut first = length_prefix[0];
    if self.mask.is_some() {
      first |= 0b1000_0000;
    }
    buf.push(first);
    buf.extend_from_slice(&length_prefix[1..]);

    if let Some(key) = self.mask {
      buf.extend_from_slice(&key);
    }

    buf.extend_from_slice(self.payload.as_ref());
    buf
  }

  /// Like [`Frame::write`], but writes the header and payload as two
  /// separate vectored writes to avoid a payload copy for large frames.
  pub async fn writev<S>(&self, stream: &mut S) -> Result<(), WebSocketError>
  where
    S: AsyncWrite + Unpin,
  {
    let len = self.payload.len() as u64;

    let mut header = Vec::with_capacity(14);
    let mut head = 0u8;
    if self.fin {
      head |= 0b1000_0000;
    }
    head |= u8::from(self.opcode);
    header.push(head);

    let length_prefix = Self::length_prefix(len)?;
    let mut first = length_prefix[0];
    if self.mask.is_some() {
      first |= 0b1000_0000;
    }
    header.push(first);
    header.extend_from_slice(&length_prefix[1..]);

    if let Some(key) = self.mask {
      header.extend_from_slice(&key);
    }

    stream.write_all(&header).await?;
    stream.write_all(self.payload.as_ref()).await?;
    Ok(())
  }
}

fn payload_mut<'a, 'b>(payload: &'b mut Payload<'a>) -> &'b mut [u8] {
  match payload {
    Payload::Borrowed(b) => {
      // A borrowed, non-mut payload can't be masked in place; promote it.
      *payload = Payload::Owned(b.to_vec());
      match payload {
        Payload::Owned(v) => v.as_mut_slice(),
        _ => unreachable!(),
      }
    }
    Payload::BorrowedMut(b) => b,
    Payload::Owned(v) => v.as_mut_slice(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn minimal_length_prefix_choice() {
    assert_eq!(Frame::length_prefix(0).unwrap(), vec![0]);
    assert_eq!(Frame::length_prefix(125).unwrap(), vec![125]);
    assert_eq!(
      Frame::length_prefix(126).unwrap(),
      vec![126, 0, 126]
    );
    assert_eq!(
      Frame::length_prefix(65535).unwrap(),
      vec![126, 0xFF, 0xFF]
    );
    let mut expect = vec![127u8];
    expect.extend_from_slice(&65536u64.to_be_bytes());
    assert_eq!(Frame::length_prefix(65536).unwrap(), expect);
  }

  #[test]
  fn encode_tiny_text_frame() {
    let frame = Frame::text(Payload::Borrowed(b"Hello"));
    let mut buf = Vec::new();
    let bytes = frame.write(&mut buf);
    assert_eq!(bytes, &[0x81, 0x05, b'H', b'e', b'l', b'l', b'o']);
  }

  #[test]
  fn mask_then_unmask_round_trips() {
    let mut frame = Frame::binary(Payload::Owned(vec![1, 2, 3, 4, 5]));
    frame.mask = Some([0xDE, 0xAD, 0xBE, 0xEF]);
    let original = frame.payload.to_owned();
    frame.mask();
    assert_ne!(frame.payload.as_ref(), original.as_slice());
    frame.unmask();
    assert_eq!(frame.payload.as_ref(), original.as_slice());
  }

  #[test]
  fn datagram_too_large_is_refused() {
    assert!(Frame::length_prefix(u64::MAX).is_err());
  }
}

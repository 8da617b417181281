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

//! Incremental UTF-8 validation for Text messages split across frames.
//!
//! `WebSocket::read_frame` checks a whole, unfragmented Text frame's
//! payload in one shot (see `frame::is_utf8`). A fragmented Text message
//! can split a multi-byte codepoint across a frame boundary, so the
//! `FragmentCollector` assembler instead uses [`Utf8Accumulator`], which
//! carries the `utf-8` crate's incomplete-sequence cursor between calls.

use crate::error::WebSocketError;

/// Accumulates decoded text across a sequence of frame payloads,
/// rejecting as soon as an invalid byte sequence appears and rejecting
/// at [`Utf8Accumulator::finish`] if a codepoint was left truncated at
/// the message's `fin` frame.
#[derive(Debug, Default)]
pub struct Utf8Accumulator {
  incomplete: Option<utf8::Incomplete>,
  text: String,
}

impl Utf8Accumulator {
  pub fn new() -> Self {
    Self {
      incomplete: None,
      text: String::new(),
    }
  }

  /// Feeds the next frame's payload bytes in. Partial trailing sequences
  /// are carried over silently; only a genuinely invalid byte sequence
  /// errors here.
  pub fn push(&mut self, mut buf: &[u8]) -> Result<(), WebSocketError> {
    if let Some(mut incomplete) = self.incomplete.take() {
      match incomplete.try_complete(buf) {
        Some((Ok(s), rest)) => {
          self.text.push_str(s);
          buf = rest;
        }
        Some((Err(_), _)) => return Err(WebSocketError::InvalidUTF8),
        None => {
          // Still incomplete even after folding in the whole of `buf`.
          self.incomplete = Some(incomplete);
          return Ok(());
        }
      }
    }

    loop {
      if buf.is_empty() {
        break;
      }
      match utf8::decode(buf) {
        Ok(s) => {
          self.text.push_str(s);
          break;
        }
        Err(utf8::DecodeError::Incomplete {
          valid_prefix,
          incomplete_suffix,
        }) => {
          self.text.push_str(valid_prefix);
          self.incomplete = Some(incomplete_suffix);
          break;
        }
        Err(utf8::DecodeError::Invalid { valid_prefix, .. }) => {
          self.text.push_str(valid_prefix);
          return Err(WebSocketError::InvalidUTF8);
        }
      }
    }

    Ok(())
  }

  /// Consumes the accumulator, failing if a codepoint is left truncated
  /// at message end (§4.3: "partial trailing bytes at frame boundaries
  /// do NOT fail; only truncation at `fin` fails").
  pub fn finish(self) -> Result<String, WebSocketError> {
    if self.incomplete.is_some() {
      return Err(WebSocketError::InvalidUTF8);
    }
    Ok(self.text)
  }

  pub fn is_empty(&self) -> bool {
    self.text.is_empty() && self.incomplete.is_none()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn single_frame_ascii() {
    let mut acc = Utf8Accumulator::new();
    acc.push(b"Hello").unwrap();
    assert_eq!(acc.finish().unwrap(), "Hello");
  }

  #[test]
  fn codepoint_split_across_frames() {
    // U+03BA (ΚΑΠΠΑ) encodes as 0xCE 0xBA.
    let mut acc = Utf8Accumulator::new();
    acc.push(&[0xCE]).unwrap();
    acc.push(&[0xBA]).unwrap();
    assert_eq!(acc.finish().unwrap(), "\u{3ba}");
  }

  #[test]
  fn truncated_at_fin_is_error() {
    let mut acc = Utf8Accumulator::new();
    acc.push(&[0xCE]).unwrap();
    assert!(acc.finish().is_err());
  }

  #[test]
  fn invalid_sequence_rejected() {
    let mut acc = Utf8Accumulator::new();
    // Overlong / surrogate-adjacent invalid sequence from §8 scenario 3.
    let payload = [
      0xCE, 0xBA, 0xE1, 0xBD, 0xB9, 0xCF, 0x83, 0xCE, 0xBC, 0xCE, 0xB5,
      0xED, 0xA0, 0x80, b'e', b'd', b'i', b't', b'e', b'd',
    ];
    assert!(acc.push(&payload).is_err());
  }
}

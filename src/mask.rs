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

use std::num::NonZeroU32;

use rand::RngCore;

/// Applies (or removes — XOR is its own inverse) the RFC 6455 masking
/// transform to `buf` in place, using `key` interpreted big-endian.
///
/// Masking exists to stop naive HTTP-aware intermediaries from being
/// tricked into caching attacker-controlled bytes as if they were a
/// cacheable HTTP response (RFC 6455 §10.3). Only clients mask.
#[inline]
pub fn mask(buf: &mut [u8], key: [u8; 4]) {
  apply_mask_fast(buf, key)
}

/// Alias kept for call-site clarity: unmasking and masking are the same
/// byte-for-byte XOR operation.
#[inline]
pub fn unmask(buf: &mut [u8], key: [u8; 4]) {
  apply_mask_fast(buf, key)
}

/// Fallback, byte-at-a-time implementation. Used directly when `simd` is
/// off and as the tail handler when it's on.
fn apply_mask_fallback(buf: &mut [u8], key: [u8; 4]) {
  for (i, byte) in buf.iter_mut().enumerate() {
    *byte ^= key[i & 3];
  }
}

/// Masks 4 bytes at a time via a `u32` XOR, falling back to the
/// byte-at-a-time loop for the final partial chunk.
fn apply_mask_fast(buf: &mut [u8], key: [u8; 4]) {
  let key_u32 = u32::from_ne_bytes(key);
  let chunks = buf.chunks_exact_mut(4);
  let remainder_len = chunks.remainder().len();

  for chunk in chunks {
    let masked = u32::from_ne_bytes(chunk.try_into().unwrap()) ^ key_u32;
    chunk.copy_from_slice(&masked.to_ne_bytes());
  }

  if remainder_len > 0 {
    let tail_start = buf.len() - remainder_len;
    apply_mask_fallback(&mut buf[tail_start..], key);
  }
}

/// Draws fresh 32-bit masking keys for outbound client frames.
///
/// Zero is the sentinel this crate (and RFC 6455 implementations in
/// general) uses for "frame is not masked", so a conforming generator
/// must never hand out zero; [`DefaultMaskGenerator`] retries until it
/// draws a non-zero value, which in practice never costs more than one
/// extra call.
pub trait MaskGenerator: Send + Sync {
  /// Returns a fresh, non-zero masking key.
  fn next_key(&self) -> NonZeroU32;
}

/// The default [`MaskGenerator`], seeded from the OS's secure random
/// source via [`rand::rngs::OsRng`] through [`rand::thread_rng`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMaskGenerator;

impl MaskGenerator for DefaultMaskGenerator {
  fn next_key(&self) -> NonZeroU32 {
    let mut rng = rand::thread_rng();
    loop {
      let candidate = rng.next_u32();
      if let Some(key) = NonZeroU32::new(candidate) {
        return key;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn masking_is_an_involution() {
    let key = [0x12, 0x34, 0x56, 0x78];
    let original = b"the quick brown fox jumps over the lazy dog".to_vec();
    let mut buf = original.clone();
    mask(&mut buf, key);
    assert_ne!(buf, original);
    unmask(&mut buf, key);
    assert_eq!(buf, original);
  }

  #[test]
  fn odd_lengths_and_offsets() {
    for len in 0..40 {
      let key = [0xaa, 0xbb, 0xcc, 0xdd];
      let original: Vec<u8> = (0..len as u8).collect();
      let mut buf = original.clone();
      mask(&mut buf, key);
      unmask(&mut buf, key);
      assert_eq!(buf, original);
    }
  }

  #[test]
  fn generator_never_yields_zero() {
    let gen = DefaultMaskGenerator;
    for _ in 0..1000 {
      assert_ne!(gen.next_key().get(), 0);
    }
  }
}

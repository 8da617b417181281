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

//! A small, reusable scratch buffer for the frame header read path.
//!
//! Every `WebSocket::parse_frame_header` call needs somewhere to read the
//! first few header bytes into before it knows the final payload length.
//! Rather than allocate that scratch space per read, each OS thread keeps
//! one reusable buffer behind a `thread_local!`. This is only sound
//! because a given connection's reads never run concurrently on two
//! threads at once (§5 of the spec: single-threaded cooperative per
//! connection) — `WebSocket<S>` carries a `PhantomData<SharedRecv>` marker
//! specifically so it is `!Sync` and can't be shared across threads in a
//! way that would violate that assumption.

use std::cell::UnsafeCell;

/// Large enough for a 2-byte header + 8-byte extended length + 4-byte
/// mask key, with headroom for small payloads to be read in the same
/// syscall.
const SCRATCH_SIZE: usize = 256;

thread_local! {
  static SCRATCH: UnsafeCell<[u8; SCRATCH_SIZE]> =
    const { UnsafeCell::new([0; SCRATCH_SIZE]) };
}

/// Marker type. `WebSocket<S>` holds a `PhantomData<SharedRecv>` to
/// suppress `Sync` — see the module docs for why that matters.
pub struct SharedRecv;

/// Returns a `'static` mutable view of the calling thread's scratch
/// buffer, initializing it (to all zeros — already the case on first
/// access) if this is the first call on this thread.
///
/// # Safety-by-construction
///
/// This hands back a `&'static mut` to thread-local storage, which is
/// only sound because callers are required (via the `!Sync` marker on
/// `WebSocket<S>`) to never call this reentrantly or concurrently from
/// more than one place on the same thread for the same connection. The
/// `WebSocket::parse_frame_header` call path upholds this by borrowing
/// the buffer for the duration of a single header parse and never across
/// an `.await` boundary without having fully consumed it first.
pub(crate) fn init_once() -> &'static mut [u8] {
  SCRATCH.with(|cell| {
    // SAFETY: see the function's doc comment; single-threaded-per-task
    // use is an invariant upheld by `WebSocket<S>`'s `!Sync` marker.
    let ptr = cell.get();
    unsafe { &mut (*ptr)[..] }
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn scratch_buffer_is_reusable() {
    let buf = init_once();
    buf[0] = 0xAB;
    let buf2 = init_once();
    assert_eq!(buf2[0], 0xAB);
  }
}

// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bookkeeping for the result streams open on one connection.
//!
//! Streams live in an arena; callers only ever hold [`StreamHandle`]s.
//! Slots are never freed while the connection lives, so a handle stays
//! readable for its terminal summary or error even after the stream left
//! the registry. At most one stream is *current* (actively paging from
//! the server); all others are paused.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error_::{BoltError, Result};
use crate::record::Record;
use crate::summary::Summary;

/// Opaque handle to a result stream of one specific connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StreamHandle {
    pub(crate) index: usize,
}

#[derive(Debug)]
pub(crate) struct Stream {
    pub(crate) qid: i64,
    pub(crate) fetch_size: i64,
    pub(crate) keys: Arc<Vec<String>>,
    pub(crate) buffer: VecDeque<Record>,
    pub(crate) end_of_batch: bool,
    pub(crate) discarding: bool,
    pub(crate) summary: Option<Arc<Summary>>,
    pub(crate) error: Option<BoltError>,
    pub(crate) t_first: Option<i64>,
}

impl Stream {
    pub(crate) fn new(fetch_size: i64) -> Self {
        Self {
            qid: -1,
            fetch_size,
            keys: Default::default(),
            buffer: VecDeque::new(),
            end_of_batch: false,
            discarding: false,
            summary: None,
            error: None,
            t_first: None,
        }
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.summary.is_some() || self.error.is_some()
    }

    pub(crate) fn drop_buffered_records(&mut self) {
        self.buffer.clear();
    }

    /// The terminal result: the summary, or the stream's error.
    pub(crate) fn terminal_result(&self) -> Result<Option<Arc<Summary>>> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(self.summary.clone()),
        }
    }
}

#[derive(Debug)]
struct Slot {
    stream: Stream,
    live: bool,
}

#[derive(Debug, Default)]
pub(crate) struct StreamPool {
    slots: Vec<Slot>,
    current: Option<usize>,
    live_count: usize,
}

impl StreamPool {
    /// Creates a slot for a stream whose run response is still in flight.
    /// The stream doesn't count as open until [`StreamPool::attach`].
    pub(crate) fn reserve(&mut self, stream: Stream) -> StreamHandle {
        self.slots.push(Slot {
            stream,
            live: false,
        });
        StreamHandle {
            index: self.slots.len() - 1,
        }
    }

    /// Marks the stream open and current.
    pub(crate) fn attach(&mut self, handle: StreamHandle) {
        let slot = &mut self.slots[handle.index];
        if !slot.live {
            slot.live = true;
            self.live_count += 1;
        }
        self.current = Some(handle.index);
    }

    /// Unsets the current stream; it stays open (paused).
    pub(crate) fn pause(&mut self) {
        self.current = None;
    }

    /// Makes a paused stream current again.
    pub(crate) fn resume(&mut self, handle: StreamHandle) {
        self.current = Some(handle.index);
    }

    /// Takes the stream out of the registry. Terminal fields stay readable
    /// through the handle.
    pub(crate) fn remove(&mut self, handle: StreamHandle) {
        let slot = &mut self.slots[handle.index];
        if slot.live {
            slot.live = false;
            self.live_count -= 1;
        }
        if self.current == Some(handle.index) {
            self.current = None;
        }
    }

    /// Records the error on the current stream (unless it already
    /// terminated) and takes it out of the registry.
    pub(crate) fn detach_current(&mut self, error: Option<BoltError>) {
        let Some(index) = self.current else {
            return;
        };
        let stream = &mut self.slots[index].stream;
        if !stream.is_terminated() {
            stream.error = error;
        }
        self.remove(StreamHandle { index });
    }

    /// Invalidates every open stream. Handles remain readable for their
    /// terminal fields, but all wire operations on them will fail.
    pub(crate) fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.live = false;
        }
        self.live_count = 0;
        self.current = None;
    }

    pub(crate) fn live_count(&self) -> usize {
        self.live_count
    }

    pub(crate) fn current_handle(&self) -> Option<StreamHandle> {
        self.current.map(|index| StreamHandle { index })
    }

    pub(crate) fn is_current(&self, handle: StreamHandle) -> bool {
        self.current == Some(handle.index)
    }

    /// Looks the stream up without caring whether it is still part of the
    /// registry. Fails only for handles this pool never issued.
    pub(crate) fn get_unsafe(&self, handle: StreamHandle) -> Result<&Stream> {
        self.slots
            .get(handle.index)
            .map(|slot| &slot.stream)
            .ok_or_else(invalid_stream_error)
    }

    pub(crate) fn get_unsafe_mut(&mut self, handle: StreamHandle) -> Result<&mut Stream> {
        self.slots
            .get_mut(handle.index)
            .map(|slot| &mut slot.stream)
            .ok_or_else(invalid_stream_error)
    }

    /// Asserts the stream is still open on this connection (attached and
    /// not invalidated by a reset).
    pub(crate) fn assert_safe(&self, handle: StreamHandle) -> Result<()> {
        match self.slots.get(handle.index) {
            Some(slot) if slot.live => Ok(()),
            _ => Err(invalid_stream_error()),
        }
    }
}

fn invalid_stream_error() -> BoltError {
    BoltError::invalid_state("invalid stream handle: stream is not open on this connection")
}

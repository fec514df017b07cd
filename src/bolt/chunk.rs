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

//! Bolt message framing: each message travels as a sequence of chunks
//! (u16 big-endian size prefix + payload), terminated by an empty chunk.

use std::cmp;
use std::fmt::{Debug, Formatter};
use std::io::{self, Read};
use std::ops::Deref;
use std::thread::panicking;

use log::{error, log_enabled, trace, Level};
use usize_cast::IntoUsize;

use crate::util::truncate_string;

const MAX_CHUNK_SIZE: usize = 0xFFFF;

/// Splits one encoded message into wire chunks.
#[derive(Debug)]
pub(crate) struct Chunker<'a> {
    message: &'a [u8],
    pending_size: Option<u16>,
    ended: bool,
}

impl<'a> Chunker<'a> {
    pub(crate) fn new(message: &'a [u8]) -> Self {
        Chunker {
            message,
            pending_size: None,
            ended: false,
        }
    }
}

impl<'a> Iterator for Chunker<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.ended {
            return None;
        }
        if let Some(size) = self.pending_size.take() {
            let (chunk, rest) = self.message.split_at(usize::from(size));
            self.message = rest;
            return Some(Chunk::Buffer(chunk));
        }
        if self.message.is_empty() {
            self.ended = true;
            // terminate message with empty chunk
            return Some(Chunk::Size([0, 0]));
        }
        let size = cmp::min(self.message.len(), MAX_CHUNK_SIZE) as u16;
        self.pending_size = Some(size);
        Some(Chunk::Size(size.to_be_bytes()))
    }
}

pub(crate) enum Chunk<'a> {
    Buffer(&'a [u8]),
    Size([u8; 2]),
}

impl Deref for Chunk<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        match self {
            Chunk::Buffer(buf) => {
                trace!("C: <RAW> {:02X?}", buf);
                buf
            }
            Chunk::Size(size) => {
                trace!("C: <RAW> {:02X?}", size);
                size
            }
        }
    }
}

/// Presents the chunked bytes of inbound messages as a contiguous reader.
///
/// Zero-size chunks (including the previous message's terminator) are
/// transparently skipped when looking for the next chunk.
pub(crate) struct Dechunker<R: Read> {
    reader: R,
    chunk_size: usize,
    broken: bool,
    chunk_log_raw: Option<String>,
}

impl<R: Read> Dechunker<R> {
    pub(crate) fn new(reader: R) -> Self {
        let chunk_log_raw = match log_enabled!(Level::Trace) {
            true => Some(String::new()),
            false => None,
        };
        Self {
            reader,
            chunk_size: 0,
            broken: false,
            chunk_log_raw,
        }
    }

    fn error_wrap<T: Debug>(&mut self, res: io::Result<T>) -> io::Result<T> {
        if res.is_err() {
            self.broken = true;
        }
        res
    }
}

impl<R: Read> Read for Dechunker<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.broken {
            panic!("attempted to read from a broken dechunker");
        }
        while self.chunk_size == 0 {
            let mut size_buf = [0; 2];
            let res = self.reader.read_exact(&mut size_buf);
            self.error_wrap(res)?;
            self.chunk_size = u16::from_be_bytes(size_buf).into_usize();
            if log_enabled!(Level::Trace) {
                let log_raw = self.chunk_log_raw.as_mut().unwrap();
                if !log_raw.is_empty() {
                    trace!("{}]", log_raw);
                    log_raw.clear();
                }
                if self.chunk_size > 0 {
                    log_raw.push_str(&format!(
                        "S: <RAW> [{}",
                        truncate_string(&format!("{:02X?}", &size_buf), 1, 1)
                    ));
                } else {
                    trace!("S: <RAW> {:02X?}", &size_buf);
                }
            }
        }
        let new_buf_size = cmp::min(buf.len(), self.chunk_size);
        let buf = &mut buf[..new_buf_size];
        let res = self.reader.read_exact(buf).map(|_| new_buf_size);
        if log_enabled!(Level::Trace) && res.is_ok() {
            let log_raw = self.chunk_log_raw.as_mut().unwrap();
            log_raw.push_str(", ");
            log_raw.push_str(truncate_string(&format!("{:02X?}", buf), 1, 1));
        }
        self.chunk_size -= new_buf_size;
        self.error_wrap(res)
    }
}

impl<R: Read> Debug for Dechunker<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dechunker")
            .field("reader", &"...")
            .field("chunk_size", &self.chunk_size)
            .field("broken", &self.broken)
            .finish()
    }
}

impl<R: Read> Drop for Dechunker<R> {
    fn drop(&mut self) {
        if log_enabled!(Level::Trace) {
            let log_raw = self.chunk_log_raw.as_mut().unwrap();
            if !log_raw.is_empty() {
                trace!("{}]", log_raw);
            }
        }
        if self.chunk_size > 0 && !self.broken {
            match panicking() {
                false => panic!("attempted to drop a dechunker with an unfinished chunk: {self:?}"),
                true => {
                    error!(
                        "attempted to drop a dechunker with an unfinished chunk \
                         while panicking: {self:?}"
                    )
                }
            }
        }
    }
}

// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

/// Largest number of bytes buffered while waiting for a line terminator.
pub const SENTENCE_CAPACITY: usize = 1024;

/// Splits the byte stream of a device into sentences.
///
/// Sentences end with `<LF>`, a preceding `<CR>` is removed and empty lines are
/// skipped. A sentence never spans more than `capacity` bytes: if that many
/// bytes arrive without a terminator the buffered bytes are discarded and
/// everything up to the next terminator is dropped, after which framing resumes
/// with the following sentence. An oversized sentence whose terminator arrives
/// in the same read is dropped the same way.
#[derive(Debug)]
pub struct SentenceCodec {
    capacity: usize,
    /// Position up to which the buffer is known to hold no terminator.
    next_index: usize,
    /// Set while skipping the rest of an oversized line.
    discarding: bool,
}

impl SentenceCodec {
    pub fn new(capacity: usize) -> Self {
        SentenceCodec {
            capacity,
            next_index: 0,
            discarding: false,
        }
    }

    pub fn is_discarding(&self) -> bool {
        self.discarding
    }
}

impl Default for SentenceCodec {
    fn default() -> Self {
        SentenceCodec::new(SENTENCE_CAPACITY)
    }
}

impl Decoder for SentenceCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        loop {
            let terminator = buf[self.next_index..]
                .iter()
                .position(|byte| *byte == b'\n')
                .map(|offset| offset + self.next_index);
            let Some(terminator) = terminator else {
                if buf.len() >= self.capacity {
                    if !self.discarding {
                        warn!(
                            "No sentence terminator within {} bytes, resynchronizing",
                            self.capacity
                        );
                    }
                    buf.clear();
                    self.discarding = true;
                    self.next_index = 0;
                } else {
                    self.next_index = buf.len();
                }
                return Ok(None);
            };

            let line = buf.split_to(terminator + 1);
            self.next_index = 0;
            if self.discarding {
                self.discarding = false;
                debug!("Resynchronized on sentence terminator");
                continue;
            }
            if terminator >= self.capacity {
                warn!(
                    "Dropping sentence of {} bytes, longer than {} bytes",
                    terminator, self.capacity
                );
                continue;
            }

            let mut line = &line[..line.len() - 1];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            if line.is_empty() {
                continue;
            }
            return Ok(Some(String::from_utf8_lossy(line).into_owned()));
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(sentence) = self.decode(buf)? {
            return Ok(Some(sentence));
        }
        if !buf.is_empty() {
            debug!("Dropping {} bytes of an unterminated sentence", buf.len());
            buf.clear();
        }
        self.next_index = 0;
        Ok(None)
    }
}

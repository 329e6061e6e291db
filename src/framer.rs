//! Turns the raw byte stream coming off a link into response messages.
//!
//! Two decoders live here:
//! - [`LineFramer`] for the normal LF-terminated ASCII responses, with every
//!   CR dropped on the way in.
//! - [`BlockDecoder`] for IEEE 488.2 binary blocks (`#<n><length><payload>`),
//!   used when an instrument sends waveform or memory dumps.
//!
//! Both accept data in whatever fragments the transport delivers it.

use crate::error::{Error, Result};

pub const CR: u8 = b'\r';
pub const LF: u8 = b'\n';

/// Outcome of feeding bytes to a [`LineFramer`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineResult {
    /// A full line, without its terminator
    Complete(Vec<u8>),
    /// No terminator seen yet, more data is needed
    Incomplete,
}

#[derive(Clone, Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
}
impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `data` (minus any CR) and return the first complete line, if
    /// there is one. Bytes after the terminator stay buffered.
    pub fn feed(&mut self, data: &[u8]) -> LineResult {
        self.buf.extend(data.iter().copied().filter(|&b| b != CR));

        match self.buf.iter().position(|&b| b == LF) {
            Some(idx) => {
                let mut line: Vec<u8> = self.buf.drain(..=idx).collect();
                line.pop();
                LineResult::Complete(line)
            }
            None => LineResult::Incomplete,
        }
    }

    /// Bytes received but not yet part of a complete line
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

/// Outcome of feeding bytes to a [`BlockDecoder`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockResult {
    Complete(Vec<u8>),
    Incomplete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BlockState {
    /// Waiting for `#`, skipping leading whitespace
    Hash,
    /// Waiting for the digit giving the length-field width
    Width,
    /// Collecting the decimal length field
    Length { digits_left: usize, len: usize },
    /// Collecting a payload of known size
    Payload { len: usize },
    /// Payload complete, waiting for the LF closing the response
    Trailer,
    /// `#0` block, payload runs until LF
    Indefinite,
    Done,
}

/// Incremental decoder for `#<n><n digits><payload>` definite-length blocks
/// and `#0<payload>LF` indefinite-length blocks.
///
/// A definite-length block is only complete once the LF terminating the
/// response has been seen too, so it never lingers for the next read. CRs in
/// front of it are skipped.
#[derive(Clone, Debug)]
pub struct BlockDecoder {
    state: BlockState,
    payload: Vec<u8>,
}
impl Default for BlockDecoder {
    fn default() -> Self {
        Self::new()
    }
}
impl BlockDecoder {
    pub fn new() -> Self {
        Self {
            state: BlockState::Hash,
            payload: vec![],
        }
    }

    pub fn reset(&mut self) {
        self.state = BlockState::Hash;
        self.payload.clear();
    }

    pub fn feed(&mut self, data: &[u8]) -> Result<BlockResult> {
        let mut idx = 0;

        while idx < data.len() {
            let byte = data[idx];
            match self.state {
                BlockState::Hash => {
                    if byte == b'#' {
                        self.state = BlockState::Width;
                    } else if !byte.is_ascii_whitespace() {
                        return Err(Error::BadResponse(format!(
                            "Expected '#' at start of binary block, got 0x{byte:02x}"
                        )));
                    }
                }
                BlockState::Width => {
                    let width = ascii_digit(byte)?;
                    self.state = if width == 0 {
                        BlockState::Indefinite
                    } else {
                        BlockState::Length {
                            digits_left: width,
                            len: 0,
                        }
                    };
                }
                BlockState::Length { digits_left, len } => {
                    let digit = ascii_digit(byte)?;
                    let len = len
                        .checked_mul(10)
                        .and_then(|l| l.checked_add(digit))
                        .ok_or_else(|| {
                            Error::BadResponse("Binary block length overflows".into())
                        })?;

                    if digits_left > 1 {
                        self.state = BlockState::Length {
                            digits_left: digits_left - 1,
                            len,
                        };
                    } else if len == 0 {
                        self.state = BlockState::Trailer;
                    } else {
                        self.state = BlockState::Payload { len };
                    }
                }
                BlockState::Payload { len } => {
                    let want = len - self.payload.len();
                    let take = want.min(data.len() - idx);
                    self.payload.extend_from_slice(&data[idx..idx + take]);
                    idx += take;
                    if self.payload.len() == len {
                        self.state = BlockState::Trailer;
                    }
                    continue;
                }
                BlockState::Trailer => match byte {
                    LF => {
                        self.state = BlockState::Done;
                        return Ok(BlockResult::Complete(std::mem::take(&mut self.payload)));
                    }
                    CR => {}
                    _ => {
                        return Err(Error::BadResponse(format!(
                            "Expected LF after binary block, got 0x{byte:02x}"
                        )));
                    }
                },
                BlockState::Indefinite => {
                    if byte == LF {
                        self.state = BlockState::Done;
                        return Ok(BlockResult::Complete(std::mem::take(&mut self.payload)));
                    }
                    self.payload.push(byte);
                }
                BlockState::Done => break,
            }
            idx += 1;
        }

        Ok(BlockResult::Incomplete)
    }
}

fn ascii_digit(byte: u8) -> Result<usize> {
    if byte.is_ascii_digit() {
        Ok((byte - b'0') as usize)
    } else {
        Err(Error::BadResponse(format!(
            "Expected digit in binary block header, got 0x{byte:02x}"
        )))
    }
}

//! Turns raw block bytes into display lines.
//!
//! Rendering is a pure function of the bytes: each block gets a `BLOCK <n>:` header, its bytes
//! split into fixed-width lines, and a trailing blank line.

use core::fmt;

use crate::config::BLOCK_PRINT_BYTES_PER_LINE;
use crate::error::ErrorKind;
use log::error;

const FIRST_PRINTABLE_ASCII_CHAR: u8 = 0x20;
const ASCII_UNPRINTABLE_REPLACEMENT: char = '.';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Two hex digits per byte, separated by spaces.
    Hex,
    /// Printable bytes as characters, the rest as `.`.
    Chars,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line<'a> {
    Header { block: u32 },
    Data { bytes: &'a [u8], mode: RenderMode },
    Blank,
}

impl<'a> fmt::Display for Line<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Line::Header { block } => write!(f, "BLOCK {}:", block),
            Line::Data {
                bytes,
                mode: RenderMode::Hex,
            } => {
                for (i, b) in bytes.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            Line::Data {
                bytes,
                mode: RenderMode::Chars,
            } => {
                for b in bytes.iter() {
                    let c = if *b >= FIRST_PRINTABLE_ASCII_CHAR {
                        char::from(*b)
                    } else {
                        ASCII_UNPRINTABLE_REPLACEMENT
                    };
                    write!(f, "{}", c)?;
                }
                Ok(())
            }
            Line::Blank => Ok(()),
        }
    }
}

enum State {
    Header,
    Data,
    Blank,
    Done,
}

/// Lazy line sequence over a run of whole blocks. Consumed as it is iterated.
pub struct BlockLines<'a> {
    bytes: &'a [u8],
    first_block: u32,
    block_size: usize,
    bytes_per_line: usize,
    mode: RenderMode,
    pos: usize,
    state: State,
}

impl<'a> BlockLines<'a> {
    /// Use `bytes_per_line` groups per data line instead of the default.
    pub fn with_bytes_per_line(mut self, bytes_per_line: usize) -> Result<Self, ErrorKind> {
        if bytes_per_line == 0 {
            return Err(ErrorKind::InvalidInput);
        }
        self.bytes_per_line = bytes_per_line;
        Ok(self)
    }
}

/// Render `bytes`, whose first block sits at address `first_block`.
pub fn render_blocks(
    bytes: &[u8],
    first_block: u32,
    block_size: usize,
    mode: RenderMode,
) -> Result<BlockLines<'_>, ErrorKind> {
    if block_size == 0 || bytes.len() % block_size != 0 {
        error!(
            "Cannot render {} bytes as {} byte blocks.",
            bytes.len(),
            block_size
        );
        return Err(ErrorKind::InvalidInput);
    }
    let blocks = (bytes.len() / block_size) as u64;
    if blocks > 0 && u64::from(first_block) + blocks - 1 > u64::from(u32::MAX) {
        error!(
            "{} blocks from {} run past the last block address.",
            blocks, first_block
        );
        return Err(ErrorKind::InvalidInput);
    }
    Ok(BlockLines {
        bytes,
        first_block,
        block_size,
        bytes_per_line: BLOCK_PRINT_BYTES_PER_LINE,
        mode,
        pos: 0,
        state: State::Header,
    })
}

impl<'a> Iterator for BlockLines<'a> {
    type Item = Line<'a>;

    fn next(&mut self) -> Option<Line<'a>> {
        match self.state {
            State::Header => {
                if self.pos >= self.bytes.len() {
                    self.state = State::Done;
                    return None;
                }
                self.state = State::Data;
                Some(Line::Header {
                    block: self.first_block + (self.pos / self.block_size) as u32,
                })
            }
            State::Data => {
                let in_block = self.pos % self.block_size;
                let len = core::cmp::min(self.bytes_per_line, self.block_size - in_block);
                let bytes = &self.bytes[self.pos..self.pos + len];
                self.pos += len;
                if self.pos % self.block_size == 0 {
                    self.state = State::Blank;
                }
                Some(Line::Data {
                    bytes,
                    mode: self.mode,
                })
            }
            State::Blank => {
                self.state = State::Header;
                Some(Line::Blank)
            }
            State::Done => None,
        }
    }
}

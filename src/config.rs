use crate::error::ErrorKind;
use log::error;

/// Independent of the block count asked for, at most this many blocks move per device call.
pub const MAX_BLOCKS_IN_BUFFER: usize = 4;

pub const BLOCK_PRINT_BYTES_PER_LINE: usize = 16;

/// Tunables for a transfer engine and its presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Staging buffer capacity in blocks.
    pub max_blocks_in_buffer: usize,
    /// Byte groups printed per line when rendering blocks.
    pub bytes_per_line: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_blocks_in_buffer: MAX_BLOCKS_IN_BUFFER,
            bytes_per_line: BLOCK_PRINT_BYTES_PER_LINE,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ErrorKind> {
        if self.max_blocks_in_buffer == 0 || self.bytes_per_line == 0 {
            error!("Invalid config: {:?}", self);
            return Err(ErrorKind::InvalidInput);
        }
        Ok(())
    }

    /// Bytes the staging buffer must hold for cards with `block_size` byte blocks.
    pub fn staging_len(&self, block_size: usize) -> Result<usize, ErrorKind> {
        self.validate()?;
        if block_size == 0 {
            return Err(ErrorKind::InvalidInput);
        }
        self.max_blocks_in_buffer
            .checked_mul(block_size)
            .ok_or(ErrorKind::InvalidInput)
    }
}

//! Block level access to SD cards.
//!
//! A [`StorageSession`] owns one card behind the [`Storage`] trait and caches its decoded
//! registers. Data moves through a [`BlockTransfer`], which splits requests of any length into
//! chunks that fit a caller-provided staging buffer. Register decoding, capacity arithmetic and
//! line rendering are pure functions usable without a card.

#![cfg_attr(not(test), no_std)]

mod capacity;
mod cid;
mod config;
mod copy;
mod csd;
mod error;
mod register;
mod render;
mod sd_status;
mod session;
mod storage;
mod transfer;
mod util;

#[cfg(test)]
mod tests_util;

pub use crate::capacity::{capacity_breakdown, CapacityBreakdown};
pub use crate::cid::{Cid, RawCid};
pub use crate::config::{Config, BLOCK_PRINT_BYTES_PER_LINE, MAX_BLOCKS_IN_BUFFER};
pub use crate::copy::CopyOutcome;
pub use crate::csd::{Csd, CsdCommon, CsdV1, CsdV2, RawCsd};
pub use crate::error::ErrorKind;
pub use crate::register::{
    decode_geometry, decode_identification, decode_status, format, Formatted, Register,
};
pub use crate::render::{render_blocks, BlockLines, Line, RenderMode};
pub use crate::sd_status::{RawSdStatus, SdStatus};
pub use crate::session::StorageSession;
pub use crate::storage::{Completion, RegisterId, StatusCode, Storage};
pub use crate::transfer::{fill_block, BlockTransfer, FillMode, TransferOutcome};
pub use crate::util::crc7;

/// Block size of SD cards in byte-addressed and block-addressed modes alike.
pub const DEFAULT_BLOCK_SIZE: usize = 512;

//! Chunked block transfers through a bounded staging buffer.
//!
//! A transfer of any length is split into chunks of at most `N` blocks, `N` being how many blocks
//! fit in the staging buffer. Chunks are issued in ascending address order, one device call each,
//! and the first failing chunk ends the transfer.

use crate::error::ErrorKind;
use crate::session::StorageSession;
use crate::storage::{Completion, StatusCode, Storage};
use log::{debug, error, info, trace, warn};

/// How a single-block write fills the bytes past the end of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// Remaining bytes are zero.
    ZeroPad,
    /// The payload is repeated until the block is full.
    Repeat,
}

/// Device-level result of a transfer whose preconditions held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Every requested block moved.
    Complete,
    /// A chunk failed. `blocks_completed` counts whole blocks moved before the failure, across
    /// the whole transfer, and is always below the requested count.
    Failed {
        status: StatusCode,
        blocks_completed: u32,
    },
}

impl TransferOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, TransferOutcome::Complete)
    }

    /// Collapse into a `Result`, dropping the progress count.
    pub fn into_result(self) -> Result<(), ErrorKind> {
        match self {
            TransferOutcome::Complete => Ok(()),
            TransferOutcome::Failed { status, .. } => Err(ErrorKind::Device(status)),
        }
    }
}

/// One run of consecutive blocks moved by a single device call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Chunk {
    /// Offset in blocks from the start of the transfer.
    pub(crate) offset: u32,
    pub(crate) blocks: u32,
}

/// Splits `count` blocks into chunks of at most `max` blocks: `max, max, ..., remainder`.
pub(crate) struct ChunkPlan {
    done: u32,
    count: u32,
    max: u32,
}

impl ChunkPlan {
    pub(crate) fn new(count: u32, max: u32) -> Self {
        debug_assert!(max > 0);
        ChunkPlan {
            done: 0,
            count,
            max,
        }
    }
}

impl Iterator for ChunkPlan {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.done >= self.count {
            return None;
        }
        let blocks = core::cmp::min(self.count - self.done, self.max);
        let chunk = Chunk {
            offset: self.done,
            blocks,
        };
        self.done += blocks;
        Some(chunk)
    }
}

/// Fill `block` from `payload` according to `fill`.
pub fn fill_block(block: &mut [u8], payload: &[u8], fill: FillMode) -> Result<(), ErrorKind> {
    if payload.len() > block.len() {
        error!(
            "Payload of {} bytes exceeds block size {}.",
            payload.len(),
            block.len()
        );
        return Err(ErrorKind::InvalidInput);
    }
    match fill {
        FillMode::ZeroPad => {
            block[..payload.len()].copy_from_slice(payload);
            block[payload.len()..].fill(0);
        }
        FillMode::Repeat => {
            if payload.is_empty() {
                error!("Cannot repeat an empty payload.");
                return Err(ErrorKind::InvalidInput);
            }
            for (dst, src) in block.iter_mut().zip(payload.iter().cycle()) {
                *dst = *src;
            }
        }
    }
    Ok(())
}

/// Moves blocks between a session's card and the host through a caller-provided staging buffer.
///
/// The engine holds the only reference to its buffer for its whole lifetime, so nothing else can
/// observe or disturb a chunk in flight. Contents between calls are unspecified.
pub struct BlockTransfer<'a> {
    staging: &'a mut [u8],
}

impl<'a> BlockTransfer<'a> {
    pub fn new(staging: &'a mut [u8]) -> Self {
        BlockTransfer { staging }
    }

    /// Number of whole blocks of `block_size` the staging buffer holds.
    pub fn capacity_blocks(&self, block_size: usize) -> u32 {
        if block_size == 0 {
            return 0;
        }
        core::cmp::min(self.staging.len() / block_size, u32::MAX as usize) as u32
    }

    fn checked_capacity(&self, block_size: usize) -> Result<u32, ErrorKind> {
        let capacity = self.capacity_blocks(block_size);
        if capacity == 0 {
            error!(
                "Staging buffer of {} bytes cannot hold a {} byte block.",
                self.staging.len(),
                block_size
            );
            return Err(ErrorKind::InvalidInput);
        }
        Ok(capacity)
    }

    fn check_range(start_block: u32, count: u32) -> Result<(), ErrorKind> {
        if count == 0 {
            error!("Transfer of zero blocks requested.");
            return Err(ErrorKind::InvalidInput);
        }
        if start_block.checked_add(count - 1).is_none() {
            error!(
                "Block range {} + {} is not addressable.",
                start_block, count
            );
            return Err(ErrorKind::InvalidInput);
        }
        Ok(())
    }

    /// Progress to report for a chunk the driver failed partway through.
    fn failed_progress(chunk: Chunk, completion: Completion) -> u32 {
        let partial = if completion.blocks >= chunk.blocks {
            warn!(
                "Driver reported {} of {} blocks alongside failure {}.",
                completion.blocks, chunk.blocks, completion.status.0
            );
            chunk.blocks - 1
        } else {
            completion.blocks
        };
        chunk.offset + partial
    }

    /// Read `count` blocks starting at `start_block`.
    ///
    /// Each chunk is handed to `sink` as `(first_block, bytes)` as soon as the device returns it,
    /// so at most one chunk is held in memory. `Err` means a precondition failed and no device
    /// call was made.
    pub fn read<S, F>(
        &mut self,
        session: &mut StorageSession<S>,
        start_block: u32,
        count: u32,
        mut sink: F,
    ) -> Result<TransferOutcome, ErrorKind>
    where
        S: Storage,
        F: FnMut(u32, &[u8]),
    {
        session.ensure_initialized()?;
        Self::check_range(start_block, count)?;
        let block_size = session.block_size();
        let capacity = self.checked_capacity(block_size)?;

        for chunk in ChunkPlan::new(count, capacity) {
            let lba = start_block + chunk.offset;
            let buf = &mut self.staging[..chunk.blocks as usize * block_size];
            debug!("rd chunk lba: {} blocks: {}", lba, chunk.blocks);
            let completion = session
                .storage_mut()
                .read_blocks(lba, buf, block_size, chunk.blocks);

            if !completion.status.is_ok() {
                let blocks_completed = Self::failed_progress(chunk, completion);
                error!(
                    "read error {} (block {}/{})",
                    completion.status.0, blocks_completed, count
                );
                return Ok(TransferOutcome::Failed {
                    status: completion.status,
                    blocks_completed,
                });
            }

            trace!("rd chunk lba: {} delivered", lba);
            sink(lba, buf);
        }

        info!("read {} blocks from {}", count, start_block);
        Ok(TransferOutcome::Complete)
    }

    /// Write one block at `block` built from `payload` and `fill`.
    ///
    /// A payload longer than the block size is rejected before touching the device.
    pub fn write<S: Storage>(
        &mut self,
        session: &mut StorageSession<S>,
        block: u32,
        payload: &[u8],
        fill: FillMode,
    ) -> Result<TransferOutcome, ErrorKind> {
        session.ensure_initialized()?;
        let block_size = session.block_size();
        self.checked_capacity(block_size)?;

        let buf = &mut self.staging[..block_size];
        fill_block(buf, payload, fill)?;

        debug!(
            "wr block: {} payload: {} bytes fill: {:?}",
            block,
            payload.len(),
            fill
        );
        let completion = session
            .storage_mut()
            .write_blocks(block, buf, block_size, 1);
        if !completion.status.is_ok() {
            error!(
                "write error {} (wrote {}/{} blocks)",
                completion.status.0, 0, 1
            );
            return Ok(TransferOutcome::Failed {
                status: completion.status,
                blocks_completed: 0,
            });
        }

        info!("write block {} [OK]", block);
        Ok(TransferOutcome::Complete)
    }

    /// Write `data`, a whole number of blocks, starting at `start_block`.
    ///
    /// Data is staged chunk by chunk exactly like [`BlockTransfer::read`], with the same progress
    /// accounting on failure.
    pub fn write_blocks<S: Storage>(
        &mut self,
        session: &mut StorageSession<S>,
        start_block: u32,
        data: &[u8],
    ) -> Result<TransferOutcome, ErrorKind> {
        session.ensure_initialized()?;
        let block_size = session.block_size();
        let capacity = self.checked_capacity(block_size)?;
        if data.len() % block_size != 0 || data.len() / block_size > u32::MAX as usize {
            error!(
                "Write of {} bytes is not a whole number of {} byte blocks.",
                data.len(),
                block_size
            );
            return Err(ErrorKind::InvalidInput);
        }
        let count = (data.len() / block_size) as u32;
        Self::check_range(start_block, count)?;

        for chunk in ChunkPlan::new(count, capacity) {
            let lba = start_block + chunk.offset;
            let len = chunk.blocks as usize * block_size;
            let from = chunk.offset as usize * block_size;
            let buf = &mut self.staging[..len];
            buf.copy_from_slice(&data[from..from + len]);
            debug!("wr chunk lba: {} blocks: {}", lba, chunk.blocks);
            let completion = session
                .storage_mut()
                .write_blocks(lba, buf, block_size, chunk.blocks);

            if !completion.status.is_ok() {
                let blocks_completed = Self::failed_progress(chunk, completion);
                error!(
                    "write error {} (block {}/{})",
                    completion.status.0, blocks_completed, count
                );
                return Ok(TransferOutcome::Failed {
                    status: completion.status,
                    blocks_completed,
                });
            }
        }

        info!("wrote {} blocks at {}", count, start_block);
        Ok(TransferOutcome::Complete)
    }

    pub(crate) fn staging_block(&mut self, block_size: usize) -> Result<&mut [u8], ErrorKind> {
        self.checked_capacity(block_size)?;
        Ok(&mut self.staging[..block_size])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_util::*;
    use proptest::prelude::*;

    const BS: usize = 512;

    fn collect_read(
        session: &mut StorageSession<RamCard>,
        staging: &mut [u8],
        start: u32,
        count: u32,
    ) -> (Vec<u8>, Vec<u32>, TransferOutcome) {
        let mut bytes = Vec::new();
        let mut firsts = Vec::new();
        let outcome = BlockTransfer::new(staging)
            .read(session, start, count, |first, chunk| {
                firsts.push(first);
                bytes.extend_from_slice(chunk);
            })
            .unwrap();
        (bytes, firsts, outcome)
    }

    #[test]
    fn test_chunk_plan_sizes() {
        let sizes: Vec<u32> = ChunkPlan::new(10, 4).map(|c| c.blocks).collect();
        assert_eq!(sizes, [4, 4, 2]);
        let offsets: Vec<u32> = ChunkPlan::new(10, 4).map(|c| c.offset).collect();
        assert_eq!(offsets, [0, 4, 8]);
        assert_eq!(ChunkPlan::new(8, 4).count(), 2);
        assert_eq!(ChunkPlan::new(0, 4).count(), 0);
    }

    #[test]
    fn test_read_streams_chunks_in_order() {
        init();
        let mut session = initialized_session(RamCard::patterned(32));
        let mut staging = vec![0u8; 4 * BS];
        let (bytes, firsts, outcome) = collect_read(&mut session, &mut staging, 3, 9);
        assert_eq!(outcome, TransferOutcome::Complete);
        assert_eq!(firsts, [3, 7, 11]);
        assert_eq!(bytes.len(), 9 * BS);
        for (i, block) in bytes.chunks(BS).enumerate() {
            assert!(block.iter().all(|b| *b == RamCard::pattern(3 + i as u32)));
        }
        assert_eq!(
            session.detach().ops,
            [
                Op::Read { lba: 3, count: 4 },
                Op::Read { lba: 7, count: 4 },
                Op::Read { lba: 11, count: 1 },
            ]
        );
    }

    #[test]
    fn test_read_stops_at_failing_chunk() {
        init();
        let mut card = RamCard::patterned(64);
        card.fault = Some(Fault {
            lba: 10,
            status: StatusCode(5),
        });
        let mut session = initialized_session(card);
        let mut staging = vec![0u8; 4 * BS];
        let (bytes, firsts, outcome) = collect_read(&mut session, &mut staging, 0, 20);
        // Chunks [0..4) and [4..8) succeed; the driver completes 8 and 9 of the third chunk.
        assert_eq!(
            outcome,
            TransferOutcome::Failed {
                status: StatusCode(5),
                blocks_completed: 10,
            }
        );
        assert_eq!(firsts, [0, 4]);
        assert_eq!(bytes.len(), 8 * BS);
        assert_eq!(session.detach().ops.len(), 3);
    }

    #[test]
    fn test_read_out_of_range_is_device_error() {
        init();
        let mut session = initialized_session(RamCard::new(8));
        let mut staging = vec![0u8; 4 * BS];
        let (_, _, outcome) = collect_read(&mut session, &mut staging, 6, 4);
        assert_eq!(
            outcome,
            TransferOutcome::Failed {
                status: OUT_OF_RANGE,
                blocks_completed: 2,
            }
        );
    }

    #[test]
    fn test_inconsistent_driver_count_is_clamped() {
        init();
        let mut card = RamCard::new(16);
        card.overreport = true;
        card.fault = Some(Fault {
            lba: 1,
            status: StatusCode(9),
        });
        let mut session = initialized_session(card);
        let mut staging = vec![0u8; 4 * BS];
        let (_, _, outcome) = collect_read(&mut session, &mut staging, 0, 4);
        assert_eq!(
            outcome,
            TransferOutcome::Failed {
                status: StatusCode(9),
                blocks_completed: 3,
            }
        );
    }

    #[test]
    fn test_read_preconditions() {
        init();
        let mut session = StorageSession::attach(RamCard::new(8)).unwrap();
        let mut staging = vec![0u8; BS];
        let mut engine = BlockTransfer::new(&mut staging);
        assert_eq!(
            engine.read(&mut session, 0, 1, |_, _| {}),
            Err(ErrorKind::NotInitialized)
        );
        session.init().unwrap();
        assert_eq!(
            engine.read(&mut session, 0, 0, |_, _| {}),
            Err(ErrorKind::InvalidInput)
        );
        assert_eq!(
            engine.read(&mut session, u32::MAX, 2, |_, _| {}),
            Err(ErrorKind::InvalidInput)
        );
        let mut small = vec![0u8; BS - 1];
        assert_eq!(
            BlockTransfer::new(&mut small).read(&mut session, 0, 1, |_, _| {}),
            Err(ErrorKind::InvalidInput)
        );
        assert!(session.detach().ops.is_empty());
    }

    #[test]
    fn test_write_zero_pad_round_trip() {
        init();
        let mut session = initialized_session(RamCard::patterned(8));
        let mut staging = vec![0u8; 2 * BS];
        let txt = rust_counter_strings::generate(100);
        let payload = txt.as_bytes();
        let mut engine = BlockTransfer::new(&mut staging);
        assert_eq!(
            engine.write(&mut session, 5, payload, FillMode::ZeroPad),
            Ok(TransferOutcome::Complete)
        );
        let mut block = Vec::new();
        engine
            .read(&mut session, 5, 1, |_, b| block.extend_from_slice(b))
            .unwrap();
        assert_eq!(&block[..payload.len()], payload);
        assert!(block[payload.len()..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_write_repeat_round_trip() {
        init();
        let mut session = initialized_session(RamCard::new(8));
        let mut staging = vec![0u8; BS];
        let payload = b"RIOT-";
        let mut engine = BlockTransfer::new(&mut staging);
        engine
            .write(&mut session, 2, payload, FillMode::Repeat)
            .unwrap();
        let mut block = Vec::new();
        engine
            .read(&mut session, 2, 1, |_, b| block.extend_from_slice(b))
            .unwrap();
        let full = BS / payload.len();
        for i in 0..full {
            assert_eq!(&block[i * payload.len()..(i + 1) * payload.len()], payload);
        }
        let rest = BS % payload.len();
        assert_eq!(&block[full * payload.len()..], &payload[..rest]);
    }

    #[test]
    fn test_write_rejects_oversized_payload_without_device_calls() {
        init();
        let mut session = initialized_session(RamCard::new(8));
        let mut staging = vec![0u8; 4 * BS];
        let payload = vec![0xAAu8; BS + 1];
        let mut engine = BlockTransfer::new(&mut staging);
        assert_eq!(
            engine.write(&mut session, 0, &payload, FillMode::ZeroPad),
            Err(ErrorKind::InvalidInput)
        );
        assert_eq!(
            engine.write(&mut session, 0, &[], FillMode::Repeat),
            Err(ErrorKind::InvalidInput)
        );
        assert!(session.detach().ops.is_empty());
    }

    #[test]
    fn test_write_empty_zero_pad_clears_block() {
        init();
        let mut session = initialized_session(RamCard::patterned(4));
        let mut staging = vec![0u8; BS];
        BlockTransfer::new(&mut staging)
            .write(&mut session, 1, &[], FillMode::ZeroPad)
            .unwrap();
        let card = session.detach();
        assert!(card.block(1).iter().all(|b| *b == 0));
        assert_eq!(card.ops, [Op::Write { lba: 1, count: 1 }]);
    }

    #[test]
    fn test_write_failure_reported() {
        init();
        let mut card = RamCard::new(8);
        card.fault = Some(Fault {
            lba: 3,
            status: StatusCode(4),
        });
        let mut session = initialized_session(card);
        let mut staging = vec![0u8; BS];
        let outcome = BlockTransfer::new(&mut staging)
            .write(&mut session, 3, b"x", FillMode::ZeroPad)
            .unwrap();
        assert_eq!(
            outcome,
            TransferOutcome::Failed {
                status: StatusCode(4),
                blocks_completed: 0,
            }
        );
        assert_eq!(outcome.into_result(), Err(ErrorKind::Device(StatusCode(4))));
    }

    #[test]
    fn test_write_blocks_chunks_and_lands() {
        init();
        let mut session = initialized_session(RamCard::new(16));
        let mut staging = vec![0u8; 3 * BS];
        let txt = rust_counter_strings::generate(7 * BS);
        let data = txt.as_bytes();
        let outcome = BlockTransfer::new(&mut staging)
            .write_blocks(&mut session, 4, data)
            .unwrap();
        assert!(outcome.is_complete());
        let card = session.detach();
        assert_eq!(
            card.ops,
            [
                Op::Write { lba: 4, count: 3 },
                Op::Write { lba: 7, count: 3 },
                Op::Write { lba: 10, count: 1 },
            ]
        );
        for i in 0..7 {
            assert_eq!(card.block(4 + i as u32), &data[i * BS..(i + 1) * BS]);
        }
    }

    #[test]
    fn test_write_blocks_rejects_partial_block() {
        init();
        let mut session = initialized_session(RamCard::new(16));
        let mut staging = vec![0u8; BS];
        let mut engine = BlockTransfer::new(&mut staging);
        assert_eq!(
            engine.write_blocks(&mut session, 0, &[0u8; BS + 3]),
            Err(ErrorKind::InvalidInput)
        );
        assert_eq!(
            engine.write_blocks(&mut session, 0, &[]),
            Err(ErrorKind::InvalidInput)
        );
        assert!(session.detach().ops.is_empty());
    }

    #[test]
    fn test_write_blocks_stops_at_failing_chunk() {
        init();
        let mut card = RamCard::new(16);
        card.fault = Some(Fault {
            lba: 9,
            status: StatusCode(3),
        });
        let mut session = initialized_session(card);
        let mut staging = vec![0u8; 4 * BS];
        let data = vec![0x5Au8; 12 * BS];
        let outcome = BlockTransfer::new(&mut staging)
            .write_blocks(&mut session, 0, &data)
            .unwrap();
        // Chunks [0..4) and [4..8) land; the third chunk completes block 8 only.
        assert_eq!(
            outcome,
            TransferOutcome::Failed {
                status: StatusCode(3),
                blocks_completed: 9,
            }
        );
        let card = session.detach();
        assert_eq!(
            card.ops,
            [
                Op::Write { lba: 0, count: 4 },
                Op::Write { lba: 4, count: 4 },
                Op::Write { lba: 8, count: 4 },
            ]
        );
        assert!(card.block(8).iter().all(|b| *b == 0x5A));
        assert!(card.block(9).iter().all(|b| *b == 0));
    }

    #[test]
    fn test_write_blocks_clamps_inconsistent_driver_count() {
        init();
        let mut card = RamCard::new(16);
        card.overreport = true;
        card.fault = Some(Fault {
            lba: 5,
            status: StatusCode(8),
        });
        let mut session = initialized_session(card);
        let mut staging = vec![0u8; 4 * BS];
        let data = vec![0x11u8; 8 * BS];
        let outcome = BlockTransfer::new(&mut staging)
            .write_blocks(&mut session, 0, &data)
            .unwrap();
        assert_eq!(
            outcome,
            TransferOutcome::Failed {
                status: StatusCode(8),
                blocks_completed: 7,
            }
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]
        #[test]
        fn test_read_chunk_count(count in 1u32..40, cap in 1usize..8) {
            init();
            let mut session = initialized_session(RamCard::patterned(64));
            let mut staging = vec![0u8; cap * BS];
            let (bytes, _, outcome) = collect_read(&mut session, &mut staging, 0, count);
            prop_assert_eq!(outcome, TransferOutcome::Complete);
            prop_assert_eq!(bytes.len(), count as usize * BS);
            let ops = session.detach().ops;
            let cap = cap as u32;
            prop_assert_eq!(ops.len() as u32, (count + cap - 1) / cap);
            for (i, op) in ops.iter().enumerate() {
                let i = i as u32;
                let expected = core::cmp::min(cap, count - i * cap);
                prop_assert_eq!(*op, Op::Read { lba: i * cap, count: expected });
            }
        }

        #[test]
        fn test_partial_failure_accounting(
            count in 1u32..40,
            cap in 1usize..8,
            fault in 0u32..40,
        ) {
            init();
            let mut card = RamCard::patterned(64);
            card.fault = Some(Fault { lba: fault, status: StatusCode(2) });
            let mut session = initialized_session(card);
            let mut staging = vec![0u8; cap * BS];
            let (bytes, _, outcome) = collect_read(&mut session, &mut staging, 0, count);
            let ops = session.detach().ops;
            let cap = cap as u32;
            if fault >= count {
                prop_assert_eq!(outcome, TransferOutcome::Complete);
            } else {
                prop_assert_eq!(
                    outcome,
                    TransferOutcome::Failed { status: StatusCode(2), blocks_completed: fault }
                );
                // Nothing is issued past the failing chunk.
                prop_assert_eq!(ops.len() as u32, fault / cap + 1);
                prop_assert_eq!(bytes.len() as u32, (fault / cap) * cap * BS as u32);
            }
        }

        #[test]
        fn test_fill_block_repeat(payload in proptest::collection::vec(any::<u8>(), 1..64)) {
            let mut block = vec![0u8; BS];
            fill_block(&mut block, &payload, FillMode::Repeat).unwrap();
            for (i, b) in block.iter().enumerate() {
                prop_assert_eq!(*b, payload[i % payload.len()]);
            }
        }
    }
}

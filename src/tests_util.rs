use crate::session::StorageSession;
use crate::storage::{Completion, RegisterId, StatusCode, Storage};
use crate::util::crc7;

/// Status a `RamCard` reports for blocks past its end.
pub(crate) const OUT_OF_RANGE: StatusCode = StatusCode(6);

const RAM_CARD_BLOCK_SIZE: usize = 512;

pub(crate) fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Read { lba: u32, count: u32 },
    Write { lba: u32, count: u32 },
}

/// Block address that fails every read or write touching it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Fault {
    pub(crate) lba: u32,
    pub(crate) status: StatusCode,
}

/// RAM backed card recording every block operation issued to it.
pub(crate) struct RamCard {
    pub(crate) data: Vec<u8>,
    pub(crate) block_size: usize,
    pub(crate) ops: Vec<Op>,
    pub(crate) fault: Option<Fault>,
    /// Report the whole chunk as done even when failing.
    pub(crate) overreport: bool,
    pub(crate) init_status: StatusCode,
    pub(crate) sds_status: StatusCode,
    pub(crate) cid: [u8; 16],
    pub(crate) csd: [u8; 16],
    pub(crate) sds: [u8; 64],
}

impl RamCard {
    pub(crate) fn new(num_blocks: usize) -> Self {
        let mut cid = *b"\x1bSMRAMCD\x10\x00\x00\x00\x2a\x01\x5a\x00";
        cid[15] = (crc7(&cid[..15]) << 1) | 1;
        RamCard {
            data: vec![0u8; num_blocks * RAM_CARD_BLOCK_SIZE],
            block_size: RAM_CARD_BLOCK_SIZE,
            ops: Vec::new(),
            fault: None,
            overreport: false,
            init_status: StatusCode::OK,
            sds_status: StatusCode::OK,
            cid,
            csd: [
                0x40, 0x0E, 0x00, 0x32, 0x5B, 0x59, 0x00, 0x00, 0x1D, 0x69, 0x7F, 0x80, 0x0A,
                0x40, 0x00, 0x8B,
            ],
            sds: [0u8; 64],
        }
    }

    /// Card whose every byte of block `n` equals `RamCard::pattern(n)`.
    pub(crate) fn patterned(num_blocks: usize) -> Self {
        let mut card = RamCard::new(num_blocks);
        for (i, block) in card.data.chunks_mut(RAM_CARD_BLOCK_SIZE).enumerate() {
            block.fill(RamCard::pattern(i as u32));
        }
        card
    }

    pub(crate) fn pattern(lba: u32) -> u8 {
        (lba as u8).wrapping_mul(31).wrapping_add(7)
    }

    pub(crate) fn block(&self, lba: u32) -> &[u8] {
        let start = lba as usize * self.block_size;
        &self.data[start..start + self.block_size]
    }

    fn num_blocks(&self) -> u32 {
        (self.data.len() / self.block_size) as u32
    }

    /// Blocks that complete before the first failing one, and its status.
    fn first_failure(&self, lba: u32, count: u32) -> Option<(u32, StatusCode)> {
        let mut failure: Option<(u32, StatusCode)> = None;
        if let Some(fault) = self.fault {
            if fault.lba >= lba && fault.lba - lba < count {
                failure = Some((fault.lba - lba, fault.status));
            }
        }
        let end = u64::from(lba) + u64::from(count);
        if end > u64::from(self.num_blocks()) {
            let done = self.num_blocks().saturating_sub(lba);
            if failure.map_or(true, |(blocks, _)| done < blocks) {
                failure = Some((done, OUT_OF_RANGE));
            }
        }
        failure
    }

    /// Byte range of the card that actually moves, and the completion the driver reports.
    fn complete(&self, lba: u32, count: u32) -> (core::ops::Range<usize>, Completion) {
        let (done, status) = self.first_failure(lba, count).unwrap_or((count, StatusCode::OK));
        let moved = if done == 0 {
            0..0
        } else {
            let start = lba as usize * self.block_size;
            start..start + done as usize * self.block_size
        };
        let completion = if status.is_ok() {
            Completion::ok(done)
        } else if self.overreport {
            Completion::failed(count, status)
        } else {
            Completion::failed(done, status)
        };
        (moved, completion)
    }
}

impl Storage for RamCard {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn init(&mut self) -> StatusCode {
        self.init_status
    }

    fn read_blocks(
        &mut self,
        lba: u32,
        data: &mut [u8],
        block_size: usize,
        count: u32,
    ) -> Completion {
        assert_eq!(block_size, self.block_size);
        assert_eq!(data.len(), block_size * count as usize);
        self.ops.push(Op::Read { lba, count });
        let (moved, completion) = self.complete(lba, count);
        data[..moved.len()].copy_from_slice(&self.data[moved]);
        completion
    }

    fn write_blocks(&mut self, lba: u32, data: &[u8], block_size: usize, count: u32) -> Completion {
        assert_eq!(block_size, self.block_size);
        assert_eq!(data.len(), block_size * count as usize);
        self.ops.push(Op::Write { lba, count });
        let (moved, completion) = self.complete(lba, count);
        let len = moved.len();
        self.data[moved].copy_from_slice(&data[..len]);
        completion
    }

    fn read_register(&mut self, id: RegisterId, raw: &mut [u8]) -> StatusCode {
        match id {
            RegisterId::Cid => raw.copy_from_slice(&self.cid),
            RegisterId::Csd => raw.copy_from_slice(&self.csd),
            RegisterId::SdStatus => {
                if !self.sds_status.is_ok() {
                    return self.sds_status;
                }
                raw.copy_from_slice(&self.sds)
            }
        }
        StatusCode::OK
    }

    fn capacity_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    fn sector_count(&self) -> u32 {
        self.num_blocks()
    }
}

pub(crate) fn initialized_session(card: RamCard) -> StorageSession<RamCard> {
    let mut session = StorageSession::attach(card).unwrap();
    session.init().unwrap();
    session
}

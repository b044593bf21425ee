/// Opaque device status tag. Only success vs. failure is interpreted here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub i32);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(0);

    pub fn is_ok(&self) -> bool {
        *self == StatusCode::OK
    }
}

/// Result of one device-level multi-block operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Whole blocks the driver moved before returning.
    pub blocks: u32,
    pub status: StatusCode,
}

impl Completion {
    pub fn ok(blocks: u32) -> Self {
        Completion {
            blocks,
            status: StatusCode::OK,
        }
    }

    pub fn failed(blocks: u32, status: StatusCode) -> Self {
        Completion { blocks, status }
    }
}

/// Self-description registers a card exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterId {
    /// Card identification.
    Cid,
    /// Card specific data (capacity, geometry, timing).
    Csd,
    /// SD status.
    SdStatus,
}

impl RegisterId {
    /// Width of the raw register image in bytes.
    pub const fn width(&self) -> usize {
        match self {
            RegisterId::Cid => 16,
            RegisterId::Csd => 16,
            RegisterId::SdStatus => 64,
        }
    }
}

/// Block transport for a sector addressable card.
///
/// Implementations perform the actual bus transactions. Every call blocks until the device
/// completes or reports a failure.
pub trait Storage {
    /// Size in bytes of one addressable block.
    fn block_size(&self) -> usize;

    /// Bring the card into a usable state.
    fn init(&mut self) -> StatusCode;

    /// Read `count` blocks starting at `lba` into `data`, which holds exactly
    /// `count * block_size` bytes.
    fn read_blocks(&mut self, lba: u32, data: &mut [u8], block_size: usize, count: u32)
        -> Completion;

    /// Write `count` blocks starting at `lba` from `data`, which holds exactly
    /// `count * block_size` bytes.
    fn write_blocks(&mut self, lba: u32, data: &[u8], block_size: usize, count: u32)
        -> Completion;

    /// Fill `raw` (exactly `id.width()` bytes) with the register image, most significant byte
    /// first.
    fn read_register(&mut self, id: RegisterId, raw: &mut [u8]) -> StatusCode;

    fn capacity_bytes(&self) -> u64;

    fn sector_count(&self) -> u32;
}

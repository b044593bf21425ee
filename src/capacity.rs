use core::fmt;

use crate::error::ErrorKind;

const IEC_KIBI: u64 = 1024;
const SI_KILO: u64 = 1000;

/// Card size as binary (GiB) and decimal (GB) magnitudes, each an integer part plus thousandths.
///
/// Every step truncates in a fixed order, so the last digit of the fraction is stable across
/// implementations. Intermediates are `u64`, which cannot wrap for any byte count representable
/// in the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityBreakdown {
    pub gib: u64,
    pub gib_milli: u16,
    pub gb: u64,
    pub gb_milli: u16,
}

impl CapacityBreakdown {
    pub fn new(total_bytes: u64) -> Self {
        let gib = total_bytes / (IEC_KIBI * IEC_KIBI * IEC_KIBI);
        let mib = total_bytes / (IEC_KIBI * IEC_KIBI);
        let gib_milli = ((mib - gib * IEC_KIBI) * SI_KILO) / IEC_KIBI;

        let gb = total_bytes / (SI_KILO * SI_KILO * SI_KILO);
        let gb_milli = (total_bytes / (SI_KILO * SI_KILO)) - gb * SI_KILO;

        CapacityBreakdown {
            gib,
            gib_milli: gib_milli as u16,
            gb,
            gb_milli: gb_milli as u16,
        }
    }

    pub fn from_blocks(num_blocks: u64, block_size: usize) -> Result<Self, ErrorKind> {
        let total = num_blocks
            .checked_mul(block_size as u64)
            .ok_or(ErrorKind::InvalidInput)?;
        Ok(CapacityBreakdown::new(total))
    }
}

pub fn capacity_breakdown(total_bytes: u64) -> CapacityBreakdown {
    CapacityBreakdown::new(total_bytes)
}

impl fmt::Display for CapacityBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{:03} GiB | {},{:03} GB",
            self.gib, self.gib_milli, self.gb, self.gb_milli
        )
    }
}

pub(crate) const CRC7: crc::Crc<u8> = crc::Crc::<u8>::new(&crc::CRC_7_MMC);

/// CRC-7/MMC over `bytes`, as carried in bits [7:1] of the last CID/CSD byte.
pub fn crc7(bytes: &[u8]) -> u8 {
    CRC7.checksum(bytes)
}

/// Extract bits `msb..=lsb` from a register image stored most significant byte first.
///
/// Bit 0 is the least significant bit of the last byte, matching the numbering used by the SD
/// register tables.
pub(crate) fn bits(raw: &[u8], msb: usize, lsb: usize) -> u64 {
    debug_assert!(msb >= lsb && msb - lsb < 64);
    debug_assert!(msb < raw.len() * 8);
    let last = raw.len() - 1;
    let mut value = 0u64;
    for bit in (lsb..=msb).rev() {
        let byte = raw[last - bit / 8];
        value = (value << 1) | u64::from((byte >> (bit % 8)) & 1);
    }
    value
}

pub(crate) fn bit(raw: &[u8], pos: usize) -> bool {
    bits(raw, pos, pos) == 1
}

use crate::error::ErrorKind;
use crate::register::Register;
use crate::util::{bits, crc7};
use log::error;
use zerocopy::{AsBytes, FromBytes, LayoutVerified};

pub(crate) const CID_NUM_BYTES: usize = 16;

/// Raw card identification register, most significant byte first.
#[derive(Debug, AsBytes, FromBytes, Clone, PartialEq, Eq)]
#[repr(C)]
pub struct RawCid {
    pub bytes: [u8; CID_NUM_BYTES],
}

impl TryFrom<&[u8]> for RawCid {
    type Error = ErrorKind;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let raw: Option<LayoutVerified<_, RawCid>> = LayoutVerified::new(bytes);
        if let Some(raw) = raw {
            return Ok((*raw).clone());
        }

        error!("CID image must be {} bytes, got {}.", CID_NUM_BYTES, bytes.len());
        Err(ErrorKind::InvalidInput)
    }
}

impl RawCid {
    /// True when the stored CRC7 matches the preceding 15 bytes.
    pub fn checksum_matches(&self) -> bool {
        crc7(&self.bytes[..CID_NUM_BYTES - 1]) == self.bytes[CID_NUM_BYTES - 1] >> 1
    }
}

/// Decoded card identification register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cid {
    pub manufacturer_id: u8,
    pub oem_id: [u8; 2],
    pub product_name: [u8; 5],
    pub product_revision: u8,
    pub serial_number: u32,
    /// Packed as `yyyy_yyyy_mmmm`, years counted from 2000.
    pub manufacture_date: u16,
    pub crc: u8,
}

impl Cid {
    pub fn manufacture_year(&self) -> u16 {
        2000 + (self.manufacture_date >> 4)
    }

    pub fn manufacture_month(&self) -> u8 {
        (self.manufacture_date & 0xF) as u8
    }
}

impl From<&RawCid> for Cid {
    fn from(raw: &RawCid) -> Self {
        let b = &raw.bytes[..];
        let oid = bits(b, 119, 104) as u16;
        let pnm = bits(b, 103, 64);
        let mut product_name = [0u8; 5];
        for (i, c) in product_name.iter_mut().enumerate() {
            *c = (pnm >> (8 * (4 - i))) as u8;
        }
        Cid {
            manufacturer_id: bits(b, 127, 120) as u8,
            oem_id: oid.to_be_bytes(),
            product_name,
            product_revision: bits(b, 63, 56) as u8,
            serial_number: bits(b, 55, 24) as u32,
            manufacture_date: bits(b, 19, 8) as u16,
            crc: bits(b, 7, 1) as u8,
        }
    }
}

impl TryFrom<&[u8]> for Cid {
    type Error = ErrorKind;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Ok(Cid::from(&RawCid::try_from(bytes)?))
    }
}

impl Register for Cid {
    fn title(&self) -> &'static str {
        "CID"
    }

    fn visit_fields(&self, visit: &mut dyn FnMut(&'static str, u64)) {
        let pnm = self
            .product_name
            .iter()
            .fold(0u64, |acc, c| (acc << 8) | u64::from(*c));
        visit("MID", self.manufacturer_id.into());
        visit("OID", u16::from_be_bytes(self.oem_id).into());
        visit("PNM", pnm);
        visit("PRV", self.product_revision.into());
        visit("PSN", self.serial_number.into());
        visit("MDT", self.manufacture_date.into());
        visit("CRC", self.crc.into());
    }
}

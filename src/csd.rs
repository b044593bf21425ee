use crate::error::ErrorKind;
use crate::register::Register;
use crate::util::{bit, bits, crc7};
use log::{error, trace};
use zerocopy::{AsBytes, FromBytes, LayoutVerified};

pub(crate) const CSD_NUM_BYTES: usize = 16;

const CSD_STRUCTURE_V1: u8 = 0;
const CSD_STRUCTURE_V2: u8 = 1;

/// Raw card specific data register, most significant byte first.
#[derive(Debug, AsBytes, FromBytes, Clone, PartialEq, Eq)]
#[repr(C)]
pub struct RawCsd {
    pub bytes: [u8; CSD_NUM_BYTES],
}

impl TryFrom<&[u8]> for RawCsd {
    type Error = ErrorKind;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let raw: Option<LayoutVerified<_, RawCsd>> = LayoutVerified::new(bytes);
        if let Some(raw) = raw {
            return Ok((*raw).clone());
        }

        error!("CSD image must be {} bytes, got {}.", CSD_NUM_BYTES, bytes.len());
        Err(ErrorKind::InvalidInput)
    }
}

impl RawCsd {
    /// Value of the CSD_STRUCTURE tag, bits [127:126].
    pub fn structure(&self) -> u8 {
        bits(&self.bytes, 127, 126) as u8
    }

    /// True when the stored CRC7 matches the preceding 15 bytes.
    pub fn checksum_matches(&self) -> bool {
        crc7(&self.bytes[..CSD_NUM_BYTES - 1]) == self.bytes[CSD_NUM_BYTES - 1] >> 1
    }
}

/// Fields whose position is identical in both structure versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsdCommon {
    pub taac: u8,
    pub nsac: u8,
    pub tran_speed: u8,
    pub ccc: u16,
    pub read_bl_len: u8,
    pub read_bl_partial: bool,
    pub write_blk_misalign: bool,
    pub read_blk_misalign: bool,
    pub dsr_imp: bool,
    pub erase_blk_en: bool,
    pub sector_size: u8,
    pub wp_grp_size: u8,
    pub wp_grp_enable: bool,
    pub r2w_factor: u8,
    pub write_bl_len: u8,
    pub write_bl_partial: bool,
    pub file_format_grp: bool,
    pub copy: bool,
    pub perm_write_protect: bool,
    pub tmp_write_protect: bool,
    pub file_format: u8,
    pub crc: u8,
}

impl CsdCommon {
    fn decode(b: &[u8]) -> Self {
        CsdCommon {
            taac: bits(b, 119, 112) as u8,
            nsac: bits(b, 111, 104) as u8,
            tran_speed: bits(b, 103, 96) as u8,
            ccc: bits(b, 95, 84) as u16,
            read_bl_len: bits(b, 83, 80) as u8,
            read_bl_partial: bit(b, 79),
            write_blk_misalign: bit(b, 78),
            read_blk_misalign: bit(b, 77),
            dsr_imp: bit(b, 76),
            erase_blk_en: bit(b, 46),
            sector_size: bits(b, 45, 39) as u8,
            wp_grp_size: bits(b, 38, 32) as u8,
            wp_grp_enable: bit(b, 31),
            r2w_factor: bits(b, 28, 26) as u8,
            write_bl_len: bits(b, 25, 22) as u8,
            write_bl_partial: bit(b, 21),
            file_format_grp: bit(b, 15),
            copy: bit(b, 14),
            perm_write_protect: bit(b, 13),
            tmp_write_protect: bit(b, 12),
            file_format: bits(b, 11, 10) as u8,
            crc: bits(b, 7, 1) as u8,
        }
    }
}

/// Standard capacity layout (CSD_STRUCTURE = 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsdV1 {
    pub common: CsdCommon,
    /// 12 bit device size.
    pub c_size: u16,
    pub vdd_r_curr_min: u8,
    pub vdd_r_curr_max: u8,
    pub vdd_w_curr_min: u8,
    pub vdd_w_curr_max: u8,
    pub c_size_mult: u8,
}

/// High capacity layout (CSD_STRUCTURE = 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsdV2 {
    pub common: CsdCommon,
    /// 22 bit device size in units of 512 KiB.
    pub c_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Csd {
    V1(CsdV1),
    V2(CsdV2),
}

impl TryFrom<&RawCsd> for Csd {
    type Error = ErrorKind;

    fn try_from(raw: &RawCsd) -> Result<Self, Self::Error> {
        let b = &raw.bytes[..];
        let structure = raw.structure();
        trace!("csd structure: {}", structure);
        match structure {
            CSD_STRUCTURE_V1 => Ok(Csd::V1(CsdV1 {
                common: CsdCommon::decode(b),
                c_size: bits(b, 73, 62) as u16,
                vdd_r_curr_min: bits(b, 61, 59) as u8,
                vdd_r_curr_max: bits(b, 58, 56) as u8,
                vdd_w_curr_min: bits(b, 55, 53) as u8,
                vdd_w_curr_max: bits(b, 52, 50) as u8,
                c_size_mult: bits(b, 49, 47) as u8,
            })),
            CSD_STRUCTURE_V2 => Ok(Csd::V2(CsdV2 {
                common: CsdCommon::decode(b),
                c_size: bits(b, 69, 48) as u32,
            })),
            _ => {
                error!("Unsupported CSD structure version {}.", structure);
                Err(ErrorKind::UnsupportedVersion)
            }
        }
    }
}

impl TryFrom<&[u8]> for Csd {
    type Error = ErrorKind;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Csd::try_from(&RawCsd::try_from(bytes)?)
    }
}

impl Csd {
    pub fn common(&self) -> &CsdCommon {
        match self {
            Csd::V1(v1) => &v1.common,
            Csd::V2(v2) => &v2.common,
        }
    }

    /// Value of the CSD_STRUCTURE tag this layout was selected by.
    pub fn structure(&self) -> u8 {
        match self {
            Csd::V1(_) => CSD_STRUCTURE_V1,
            Csd::V2(_) => CSD_STRUCTURE_V2,
        }
    }

    /// User data capacity in bytes as advertised by the register.
    pub fn capacity_bytes(&self) -> u64 {
        match self {
            Csd::V1(v1) => {
                let shift = u32::from(v1.c_size_mult) + u32::from(v1.common.read_bl_len) + 2;
                (u64::from(v1.c_size) + 1) << shift
            }
            Csd::V2(v2) => (u64::from(v2.c_size) + 1) * 512 * 1024,
        }
    }

    /// User data capacity in 512 byte blocks.
    pub fn capacity_blocks(&self) -> u64 {
        self.capacity_bytes() / 512
    }
}

impl Register for Csd {
    fn title(&self) -> &'static str {
        match self {
            Csd::V1(_) => "CSD V1",
            Csd::V2(_) => "CSD V2",
        }
    }

    fn visit_fields(&self, visit: &mut dyn FnMut(&'static str, u64)) {
        let c = self.common();
        visit("CSD_STRUCTURE", self.structure().into());
        visit("TAAC", c.taac.into());
        visit("NSAC", c.nsac.into());
        visit("TRAN_SPEED", c.tran_speed.into());
        visit("CCC", c.ccc.into());
        visit("READ_BL_LEN", c.read_bl_len.into());
        visit("READ_BL_PARTIAL", c.read_bl_partial.into());
        visit("WRITE_BLK_MISALIGN", c.write_blk_misalign.into());
        visit("READ_BLK_MISALIGN", c.read_blk_misalign.into());
        visit("DSR_IMP", c.dsr_imp.into());
        match self {
            Csd::V1(v1) => {
                visit("C_SIZE", v1.c_size.into());
                visit("VDD_R_CURR_MIN", v1.vdd_r_curr_min.into());
                visit("VDD_R_CURR_MAX", v1.vdd_r_curr_max.into());
                visit("VDD_W_CURR_MIN", v1.vdd_w_curr_min.into());
                visit("VDD_W_CURR_MAX", v1.vdd_w_curr_max.into());
                visit("C_SIZE_MULT", v1.c_size_mult.into());
            }
            Csd::V2(v2) => visit("C_SIZE", v2.c_size.into()),
        }
        visit("ERASE_BLK_EN", c.erase_blk_en.into());
        visit("SECTOR_SIZE", c.sector_size.into());
        visit("WP_GRP_SIZE", c.wp_grp_size.into());
        visit("WP_GRP_ENABLE", c.wp_grp_enable.into());
        visit("R2W_FACTOR", c.r2w_factor.into());
        visit("WRITE_BL_LEN", c.write_bl_len.into());
        visit("WRITE_BL_PARTIAL", c.write_bl_partial.into());
        visit("FILE_FORMAT_GRP", c.file_format_grp.into());
        visit("COPY", c.copy.into());
        visit("PERM_WRITE_PROTECT", c.perm_write_protect.into());
        visit("TMP_WRITE_PROTECT", c.tmp_write_protect.into());
        visit("FILE_FORMAT", c.file_format.into());
        visit("CRC", c.crc.into());
    }
}

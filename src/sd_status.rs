use crate::error::ErrorKind;
use crate::register::Register;
use crate::util::{bit, bits};
use log::error;
use zerocopy::{AsBytes, FromBytes, LayoutVerified};

pub(crate) const SD_STATUS_NUM_BYTES: usize = 64;

/// Raw 512 bit SD status, most significant byte first.
#[derive(AsBytes, FromBytes, Clone)]
#[repr(C)]
pub struct RawSdStatus {
    pub bytes: [u8; SD_STATUS_NUM_BYTES],
}

impl TryFrom<&[u8]> for RawSdStatus {
    type Error = ErrorKind;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let raw: Option<LayoutVerified<_, RawSdStatus>> = LayoutVerified::new(bytes);
        if let Some(raw) = raw {
            return Ok((*raw).clone());
        }

        error!(
            "SD status image must be {} bytes, got {}.",
            SD_STATUS_NUM_BYTES,
            bytes.len()
        );
        Err(ErrorKind::InvalidInput)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdStatus {
    pub size_of_protected_area: u32,
    pub sus_addr: u32,
    pub vsc_au_size: u16,
    pub sd_card_type: u16,
    pub erase_size: u16,
    pub speed_class: u8,
    pub performance_move: u8,
    pub video_speed_class: u8,
    pub erase_timeout: u8,
    pub erase_offset: u8,
    pub uhs_speed_grade: u8,
    pub uhs_au_size: u8,
    pub au_size: u8,
    pub dat_bus_width: u8,
    pub secured_mode: bool,
}

impl From<&RawSdStatus> for SdStatus {
    fn from(raw: &RawSdStatus) -> Self {
        let b = &raw.bytes[..];
        SdStatus {
            size_of_protected_area: bits(b, 479, 448) as u32,
            sus_addr: bits(b, 367, 346) as u32,
            vsc_au_size: bits(b, 377, 368) as u16,
            sd_card_type: bits(b, 495, 480) as u16,
            erase_size: bits(b, 423, 408) as u16,
            speed_class: bits(b, 447, 440) as u8,
            performance_move: bits(b, 439, 432) as u8,
            video_speed_class: bits(b, 391, 384) as u8,
            erase_timeout: bits(b, 407, 402) as u8,
            erase_offset: bits(b, 401, 400) as u8,
            uhs_speed_grade: bits(b, 399, 396) as u8,
            uhs_au_size: bits(b, 395, 392) as u8,
            au_size: bits(b, 431, 428) as u8,
            dat_bus_width: bits(b, 511, 510) as u8,
            secured_mode: bit(b, 509),
        }
    }
}

impl TryFrom<&[u8]> for SdStatus {
    type Error = ErrorKind;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Ok(SdStatus::from(&RawSdStatus::try_from(bytes)?))
    }
}

impl Register for SdStatus {
    fn title(&self) -> &'static str {
        "SD status:"
    }

    fn visit_fields(&self, visit: &mut dyn FnMut(&'static str, u64)) {
        visit("SIZE_OF_PROTECTED_AREA", self.size_of_protected_area.into());
        visit("SUS_ADDR", self.sus_addr.into());
        visit("VSC_AU_SIZE", self.vsc_au_size.into());
        visit("SD_CARD_TYPE", self.sd_card_type.into());
        visit("ERASE_SIZE", self.erase_size.into());
        visit("SPEED_CLASS", self.speed_class.into());
        visit("PERFORMANCE_MOVE", self.performance_move.into());
        visit("VIDEO_SPEED_CLASS", self.video_speed_class.into());
        visit("ERASE_TIMEOUT", self.erase_timeout.into());
        visit("ERASE_OFFSET", self.erase_offset.into());
        visit("UHS_SPEED_GRADE", self.uhs_speed_grade.into());
        visit("UHS_AU_SIZE", self.uhs_au_size.into());
        visit("AU_SIZE", self.au_size.into());
        visit("DAT_BUS_WIDTH", self.dat_bus_width.into());
        visit("SECURED_MODE", self.secured_mode.into());
    }
}

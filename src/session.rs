use crate::capacity::CapacityBreakdown;
use crate::cid::{Cid, CID_NUM_BYTES};
use crate::csd::{Csd, CSD_NUM_BYTES};
use crate::error::ErrorKind;
use crate::sd_status::{SdStatus, SD_STATUS_NUM_BYTES};
use crate::storage::{RegisterId, Storage};
use log::{error, info, warn};

/// One attached card.
///
/// The session owns the device for as long as it is attached. Transfers borrow it mutably, so a
/// single session can never be driven by two operations at once.
pub struct StorageSession<S: Storage> {
    storage: S,
    block_size: usize,
    num_blocks: u32,
    initialized: bool,
    cid: Option<Cid>,
    csd: Option<Csd>,
    status: Option<SdStatus>,
}

impl<S: Storage> StorageSession<S> {
    pub fn attach(storage: S) -> Result<Self, ErrorKind> {
        let block_size = storage.block_size();
        if block_size == 0 {
            error!("Device reports a zero block size.");
            return Err(ErrorKind::InvalidInput);
        }
        Ok(StorageSession {
            storage,
            block_size,
            num_blocks: 0,
            initialized: false,
            cid: None,
            csd: None,
            status: None,
        })
    }

    /// Run the device handshake and read the identification and geometry registers.
    ///
    /// The session only counts as initialized when every step succeeds.
    pub fn init(&mut self) -> Result<(), ErrorKind> {
        self.initialized = false;
        self.cid = None;
        self.csd = None;
        self.status = None;

        let status = self.storage.init();
        if !status.is_ok() {
            error!("Card handshake failed: {}", status.0);
            return Err(ErrorKind::Device(status));
        }

        let mut raw = [0u8; CID_NUM_BYTES];
        self.read_register(RegisterId::Cid, &mut raw)?;
        let cid = Cid::try_from(&raw[..])?;

        let mut raw = [0u8; CSD_NUM_BYTES];
        self.read_register(RegisterId::Csd, &mut raw)?;
        let csd = Csd::try_from(&raw[..])?;

        self.cid = Some(cid);
        self.csd = Some(csd);
        self.num_blocks = self.storage.sector_count();
        self.initialized = true;
        info!(
            "Card initialized: {} blocks of {} bytes, {:?}",
            self.num_blocks,
            self.block_size,
            self.csd.map(|csd| csd.structure())
        );
        Ok(())
    }

    /// Read and decode the SD status register, replacing any previously cached copy.
    pub fn refresh_status(&mut self) -> Result<SdStatus, ErrorKind> {
        self.ensure_initialized()?;
        let mut raw = [0u8; SD_STATUS_NUM_BYTES];
        self.read_register(RegisterId::SdStatus, &mut raw)?;
        let status = SdStatus::try_from(&raw[..])?;
        self.status = Some(status);
        Ok(status)
    }

    fn read_register(&mut self, id: RegisterId, raw: &mut [u8]) -> Result<(), ErrorKind> {
        debug_assert_eq!(raw.len(), id.width());
        let status = self.storage.read_register(id, raw);
        if !status.is_ok() {
            warn!("Reading {:?} register failed: {}", id, status.0);
            return Err(ErrorKind::Device(status));
        }
        Ok(())
    }

    pub(crate) fn ensure_initialized(&self) -> Result<(), ErrorKind> {
        if !self.initialized {
            error!("Card used before initialization.");
            return Err(ErrorKind::NotInitialized);
        }
        Ok(())
    }

    pub(crate) fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Block count cached at initialization; zero before that.
    pub fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    pub fn identification(&self) -> Option<&Cid> {
        self.cid.as_ref()
    }

    pub fn geometry(&self) -> Option<&Csd> {
        self.csd.as_ref()
    }

    pub fn status(&self) -> Option<&SdStatus> {
        self.status.as_ref()
    }

    pub fn capacity_bytes(&self) -> Result<u64, ErrorKind> {
        self.ensure_initialized()?;
        Ok(self.storage.capacity_bytes())
    }

    pub fn sector_count(&self) -> Result<u32, ErrorKind> {
        self.ensure_initialized()?;
        Ok(self.storage.sector_count())
    }

    pub fn capacity_breakdown(&self) -> Result<CapacityBreakdown, ErrorKind> {
        Ok(CapacityBreakdown::new(self.capacity_bytes()?))
    }

    /// Release the device.
    pub fn detach(self) -> S {
        self.storage
    }
}

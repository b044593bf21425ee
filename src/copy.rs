use crate::error::ErrorKind;
use crate::session::StorageSession;
use crate::storage::{StatusCode, Storage};
use crate::transfer::BlockTransfer;
use log::{error, info};

/// Result of relocating one block. Which side failed decides recovery: re-read the source or pick
/// another destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    Copied,
    /// The source block could not be read; nothing was written.
    SourceFailed(StatusCode),
    /// The source was read but the destination write failed.
    DestinationFailed(StatusCode),
}

impl CopyOutcome {
    pub fn into_result(self) -> Result<(), ErrorKind> {
        match self {
            CopyOutcome::Copied => Ok(()),
            CopyOutcome::SourceFailed(status) | CopyOutcome::DestinationFailed(status) => {
                Err(ErrorKind::Device(status))
            }
        }
    }
}

impl<'a> BlockTransfer<'a> {
    /// Copy block `src` to block `dst` through the first block of the staging buffer.
    pub fn copy<S: Storage>(
        &mut self,
        session: &mut StorageSession<S>,
        src: u32,
        dst: u32,
    ) -> Result<CopyOutcome, ErrorKind> {
        session.ensure_initialized()?;
        let block_size = session.block_size();
        let tmp = self.staging_block(block_size)?;

        let rd = session.storage_mut().read_blocks(src, tmp, block_size, 1);
        if !rd.status.is_ok() {
            error!("read error {} (block {})", rd.status.0, src);
            return Ok(CopyOutcome::SourceFailed(rd.status));
        }

        let wr = session.storage_mut().write_blocks(dst, tmp, block_size, 1);
        if !wr.status.is_ok() {
            error!("write error {} (block {})", wr.status.0, dst);
            return Ok(CopyOutcome::DestinationFailed(wr.status));
        }

        info!("copy block {} to {} [OK]", src, dst);
        Ok(CopyOutcome::Copied)
    }
}

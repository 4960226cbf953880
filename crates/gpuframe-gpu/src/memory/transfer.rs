//! CPU/GPU dirty tracking.
//!
//! An allocation has two copies of its content: the GPU surface and the
//! staging surface the CPU maps. [`TransferState`] records which copy is
//! stale. A map for write marks the other side stale; the stale side is
//! brought up to date lazily, right before its next use.

use super::MapMode;
use crate::error::Result;

/// Copies between the GPU surface and its staging surface.
pub trait StagingTransfer {
    /// GPU surface to staging surface.
    fn download(&mut self) -> Result<()>;

    /// Staging surface to GPU surface.
    fn upload(&mut self) -> Result<()>;
}

/// Two-bit transfer state of one allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferState {
    needs_upload: bool,
    needs_download: bool,
}

impl TransferState {
    /// Staging content is newer than the GPU surface.
    pub fn needs_upload(&self) -> bool {
        self.needs_upload
    }

    /// GPU content is newer than the staging surface.
    pub fn needs_download(&self) -> bool {
        self.needs_download
    }

    /// A staging surface was just created and holds nothing yet.
    pub fn staging_created(&mut self) {
        self.needs_upload = false;
        self.needs_download = true;
    }

    /// The GPU surface was written by something other than a map.
    pub fn gpu_written(&mut self) {
        self.needs_download = true;
    }

    /// Bring staging up to date before a CPU map in `mode`.
    pub fn begin_cpu<T: StagingTransfer + ?Sized>(&mut self, transfer: &mut T, mode: MapMode) -> Result<()> {
        if self.needs_download {
            transfer.download()?;
            self.needs_download = false;
        }
        if mode.writes_cpu() {
            self.needs_upload = true;
        }
        Ok(())
    }

    /// Bring the GPU surface up to date before GPU access in `mode`.
    pub fn begin_gpu<T: StagingTransfer + ?Sized>(&mut self, transfer: &mut T, mode: MapMode) -> Result<()> {
        if self.needs_upload {
            transfer.upload()?;
            self.needs_upload = false;
        }
        if mode.writes_gpu() {
            self.needs_download = true;
        }
        Ok(())
    }
}

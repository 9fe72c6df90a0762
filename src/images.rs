use crate::error::Result;

/// Seam to the external image host holding person cover photos. Deleting a
/// person releases its asset; release failures are logged and never block the
/// graph mutation.
pub trait ImageStore: Send + Sync {
    fn release(&self, asset_id: &str) -> Result<()>;
}

/// No-op backend for deployments without an image host and for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopImageStore;

impl ImageStore for NoopImageStore {
    fn release(&self, _asset_id: &str) -> Result<()> {
        Ok(())
    }
}

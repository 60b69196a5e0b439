pub mod gamma;

use async_trait::async_trait;

use crate::error::CatalogError;
use crate::types::EventDescriptor;

pub use gamma::GammaCatalog;

/// Pull source of fixed-duration event descriptors.
///
/// An empty `Ok` is a valid answer (nothing listed yet); transport and parse
/// failures are `Err`. Descriptors may come back in any order.
#[async_trait]
pub trait EventCatalog: Send + Sync + 'static {
    async fn fetch_upcoming(&self, count: usize) -> Result<Vec<EventDescriptor>, CatalogError>;
}

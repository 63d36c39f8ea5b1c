use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{client::Client, common::LoadError, protocol::LoadResult};

/// A host-side track source, consulted before any node.
///
/// Sources let the host answer queries itself, typically by returning
/// [`DeferredTrack`](crate::tracks::DeferredTrack)-backed results that are
/// resolved on a node only when played. Sources are identified by name.
#[async_trait]
pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    /// Returns `None` if the query is not for this source.
    async fn load_item(&self, client: &Client, query: &str)
    -> Result<Option<LoadResult>, LoadError>;
}

/// Registered sources, in registration order.
#[derive(Default)]
pub struct SourceRegistry {
    sources: RwLock<Vec<Arc<dyn Source>>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if a source with the same name is registered.
    pub fn register(&self, source: Arc<dyn Source>) -> bool {
        let mut sources = self.sources.write();
        if sources.iter().any(|s| s.name() == source.name()) {
            return false;
        }
        sources.push(source);
        true
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut sources = self.sources.write();
        let before = sources.len();
        sources.retain(|s| s.name() != name);
        sources.len() != before
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Source>> {
        self.sources.read().iter().find(|s| s.name() == name).cloned()
    }

    pub fn sources(&self) -> Vec<Arc<dyn Source>> {
        self.sources.read().clone()
    }

    pub fn len(&self) -> usize {
        self.sources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.read().is_empty()
    }
}

//! Cleanup hooks run by the `resourceCleanup` strategy

use std::future::Future;
use std::sync::Arc;

/// Releases connections, flushes caches or otherwise frees resources for a
/// service before it is retried.
#[async_trait::async_trait]
pub trait ResourceCleanup: Send + Sync {
    async fn cleanup(&self, service: &str) -> anyhow::Result<()>;
}

struct FnCleanup<F> {
    cleanup: F,
}

#[async_trait::async_trait]
impl<F, Fut> ResourceCleanup for FnCleanup<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn cleanup(&self, service: &str) -> anyhow::Result<()> {
        (self.cleanup)(service.to_string()).await
    }
}

/// Wrap an async closure as a cleanup hook.
pub fn cleanup_fn<F, Fut>(cleanup: F) -> Arc<dyn ResourceCleanup>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnCleanup { cleanup })
}

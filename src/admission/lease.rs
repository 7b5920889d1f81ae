//! Scoped admission token release

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::context::CallContext;
use crate::error::Result;
use crate::plugin::ResourceNamespace;

use super::ResourceManager;

/// Releases an admission token on every exit path
///
/// Call `release` to release inline and observe the result. If the lease
/// is dropped first, or the inline release fails, the release is spawned
/// onto the current tokio runtime.
pub struct TokenLease {
    manager: Arc<dyn ResourceManager>,
    namespace: ResourceNamespace,
    token_id: String,
    released: bool,
}

impl TokenLease {
    pub(super) fn new(manager: Arc<dyn ResourceManager>, namespace: ResourceNamespace, token_id: String) -> Self {
        Self {
            manager,
            namespace,
            token_id,
            released: false,
        }
    }

    pub fn namespace(&self) -> &ResourceNamespace {
        &self.namespace
    }

    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    /// Release the token now
    pub async fn release(mut self, ctx: &CallContext) -> Result<()> {
        let result = ctx
            .run("release", self.manager.release(&self.namespace, &self.token_id))
            .await
            .map_err(|e| e.into_resource_manager(&self.token_id));
        if result.is_ok() {
            self.released = true;
            debug!(namespace = %self.namespace, token = %self.token_id, "Token released");
        }
        result
    }
}

impl Drop for TokenLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let manager = self.manager.clone();
        let namespace = self.namespace.clone();
        let token_id = std::mem::take(&mut self.token_id);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(namespace = %namespace, token = %token_id, "Releasing token in background");
                handle.spawn(async move {
                    if let Err(e) = manager.release(&namespace, &token_id).await {
                        warn!(namespace = %namespace, token = %token_id, error = %e, "Background token release failed");
                    }
                });
            }
            Err(_) => {
                error!(
                    namespace = %namespace,
                    token = %token_id,
                    "Token lease dropped outside a runtime; token not released"
                );
            }
        }
    }
}

impl std::fmt::Debug for TokenLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenLease")
            .field("namespace", &self.namespace)
            .field("token_id", &self.token_id)
            .field("released", &self.released)
            .finish()
    }
}

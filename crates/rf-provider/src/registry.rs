// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed registry resolving `(provider, model, environment)` to a handler.

use crate::{Handler, ProviderError, WarmStartRuntime};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

type Key = (String, Option<String>, Option<String>);

/// Registry of named [`Handler`]s.
///
/// Registrations may be model- and environment-specific; resolution falls
/// back from the most specific key to the provider default:
/// `(provider, model, environment)` → `(provider, model)` →
/// `(provider, –, environment)` → `(provider)`.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Key, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous registration under the
    /// same key.
    pub fn register(
        &mut self,
        provider: impl Into<String>,
        model: Option<String>,
        environment: Option<String>,
        handler: impl Handler + 'static,
    ) {
        self.handlers
            .insert((provider.into(), model, environment), Arc::new(handler));
    }

    /// Register a provider-wide default handler.
    pub fn register_default(&mut self, provider: impl Into<String>, handler: impl Handler + 'static) {
        self.register(provider, None, None, handler);
    }

    /// Resolve the handler for a tuple.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::HandlerNotFound`] when no registration
    /// matches.
    pub fn resolve(
        &self,
        provider: &str,
        model: &str,
        environment: Option<&str>,
    ) -> Result<Arc<dyn Handler>, ProviderError> {
        let candidates: [Key; 4] = [
            (
                provider.to_string(),
                Some(model.to_string()),
                environment.map(str::to_string),
            ),
            (provider.to_string(), Some(model.to_string()), None),
            (provider.to_string(), None, environment.map(str::to_string)),
            (provider.to_string(), None, None),
        ];
        for key in &candidates {
            if let Some(handler) = self.handlers.get(key) {
                return Ok(Arc::clone(handler));
            }
        }
        Err(ProviderError::HandlerNotFound {
            provider: provider.to_string(),
            model: model.to_string(),
        })
    }

    /// Sorted identity ids of every registered handler.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.values().map(|h| h.identity().id).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Warm-start every registered handler eagerly.
    ///
    /// All handlers are attempted; failures are collected.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::WarmStartFailed`] naming the handlers that
    /// failed.
    pub async fn warm_start_all(&self, runtime: &WarmStartRuntime) -> Result<(), ProviderError> {
        let mut failed = Vec::new();
        for handler in self.handlers.values() {
            let id = handler.identity().id;
            match handler.warm_start(runtime).await {
                Ok(()) => {
                    info!(target: "rf.provider", handler = %id, "warm start ok");
                }
                Err(e) => {
                    warn!(target: "rf.provider", handler = %id, error = %e, "warm start failed");
                    failed.push(id);
                }
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            failed.sort();
            failed.dedup();
            Err(ProviderError::WarmStartFailed { handlers: failed })
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.list())
            .finish()
    }
}

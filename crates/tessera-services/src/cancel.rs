//! In-process cancellation of running imports.
//!
//! The journal's `cancel_requested` flag is authoritative and reaches imports
//! running in other processes by polling. The registry lets a cancel request
//! served by this process interrupt a local run at once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct CancelRegistry {
    tokens: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

/// Deregisters its import when dropped.
pub struct Registration {
    registry: CancelRegistry,
    import_id: Uuid,
    token: CancellationToken,
}

impl Registration {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Ok(mut tokens) = self.registry.tokens.lock() {
            tokens.remove(&self.import_id);
        }
    }
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, import_id: Uuid) -> Registration {
        let token = CancellationToken::new();
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.insert(import_id, token.clone());
        }
        Registration {
            registry: self.clone(),
            import_id,
            token,
        }
    }

    /// `true` when the import was running here.
    pub fn cancel(&self, import_id: Uuid) -> bool {
        let token = self
            .tokens
            .lock()
            .ok()
            .and_then(|tokens| tokens.get(&import_id).cloned());
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, import_id: Uuid) -> bool {
        self.tokens
            .lock()
            .map(|tokens| tokens.contains_key(&import_id))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_reaches_registered_token() {
        let registry = CancelRegistry::new();
        let id = Uuid::new_v4();
        let registration = registry.register(id);
        assert!(registry.is_running(id));
        assert!(registry.cancel(id));
        assert!(registration.token().is_cancelled());

        drop(registration);
        assert!(!registry.is_running(id));
        assert!(!registry.cancel(id));
    }
}

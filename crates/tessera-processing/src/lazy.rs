use std::sync::Arc;

use tokio::sync::OnceCell;

type Init<T> = Box<dyn Fn() -> Option<Arc<T>> + Send + Sync>;

/// A process-wide service created on first use and then reused.
///
/// Initialization runs once; an initializer returning `None` (engine not
/// installed) is remembered too, so later calls don't probe again.
pub struct LazyService<T: ?Sized> {
    cell: OnceCell<Option<Arc<T>>>,
    init: Init<T>,
}

impl<T: ?Sized + Send + Sync> LazyService<T> {
    pub fn new(init: impl Fn() -> Option<Arc<T>> + Send + Sync + 'static) -> Self {
        Self {
            cell: OnceCell::new(),
            init: Box::new(init),
        }
    }

    /// Already-initialized service, mostly for injecting fakes.
    pub fn ready(service: Arc<T>) -> Self {
        Self {
            cell: OnceCell::new_with(Some(Some(service))),
            init: Box::new(|| None),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            cell: OnceCell::new_with(Some(None)),
            init: Box::new(|| None),
        }
    }

    pub async fn get(&self) -> Option<Arc<T>> {
        self.cell
            .get_or_init(|| async { (self.init)() })
            .await
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_initializes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let service: LazyService<str> = LazyService::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(Arc::from("engine"))
        });

        assert_eq!(service.get().await.as_deref(), Some("engine"));
        assert_eq!(service.get().await.as_deref(), Some("engine"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_engine_is_remembered() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let service: LazyService<str> = LazyService::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            None
        });
        assert!(service.get().await.is_none());
        assert!(service.get().await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(LazyService::<str>::unavailable().get().await.is_none());
    }
}

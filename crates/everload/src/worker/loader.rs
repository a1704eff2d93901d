//! Loader trait and closure adapters

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

/// A unit of work that produces the value for a key
///
/// Return values:
/// - `Ok(Some(value))` - success
/// - `Ok(None)` - transient failure; the retrying task tries again
/// - `Err(_)` - fatal failure; delivered to every waiter, never retried
///
/// Loaders that block on I/O should also make that I/O cancellable (close the
/// socket, abort the query) so an interrupted load stops promptly.
///
/// # Example
///
/// ```ignore
/// struct ProfileLoader { client: HttpClient }
///
/// #[async_trait]
/// impl Loader<UserId, Profile> for ProfileLoader {
///     async fn load(&self, key: &UserId) -> anyhow::Result<Option<Profile>> {
///         match self.client.get_profile(key).await {
///             Ok(profile) => Ok(Some(profile)),
///             Err(e) if e.is_timeout() => Ok(None),
///             Err(e) => Err(e.into()),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Loader<K, V>: Send + Sync + 'static {
    /// Load the value for `key`
    async fn load(&self, key: &K) -> anyhow::Result<Option<V>>;
}

/// Loader backed by an async closure
pub struct FnLoader<F, K> {
    f: F,
    _key: PhantomData<fn(K)>,
}

/// Wrap an async closure as a shareable loader
pub fn loader_fn<K, V, F, Fut>(f: F) -> Arc<dyn Loader<K, V>>
where
    K: Clone + Send + Sync + 'static,
    V: Send + 'static,
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<V>>> + Send + 'static,
{
    Arc::new(FnLoader {
        f,
        _key: PhantomData,
    })
}

#[async_trait]
impl<K, V, F, Fut> Loader<K, V> for FnLoader<F, K>
where
    K: Clone + Send + Sync + 'static,
    V: Send + 'static,
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Option<V>>> + Send + 'static,
{
    async fn load(&self, key: &K) -> anyhow::Result<Option<V>> {
        (self.f)(key.clone()).await
    }
}

/// Loader that runs a synchronous function on the blocking thread pool
pub struct BlockingLoader<F, K> {
    f: Arc<F>,
    _key: PhantomData<fn(K)>,
}

/// Wrap a blocking function as a shareable loader
///
/// The function runs through `spawn_blocking`, so it may perform blocking
/// I/O without stalling the async workers.
pub fn blocking_loader<K, V, F>(f: F) -> Arc<dyn Loader<K, V>>
where
    K: Clone + Send + Sync + 'static,
    V: Send + 'static,
    F: Fn(&K) -> anyhow::Result<Option<V>> + Send + Sync + 'static,
{
    Arc::new(BlockingLoader {
        f: Arc::new(f),
        _key: PhantomData,
    })
}

#[async_trait]
impl<K, V, F> Loader<K, V> for BlockingLoader<F, K>
where
    K: Clone + Send + Sync + 'static,
    V: Send + 'static,
    F: Fn(&K) -> anyhow::Result<Option<V>> + Send + Sync + 'static,
{
    async fn load(&self, key: &K) -> anyhow::Result<Option<V>> {
        let f = Arc::clone(&self.f);
        let key = key.clone();
        tokio::task::spawn_blocking(move || f(&key))
            .await
            .map_err(|e| anyhow::anyhow!("blocking loader did not finish: {e}"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loader_fn() {
        let loader = loader_fn(|key: u32| async move { Ok(Some(key * 2)) });
        assert_eq!(loader.load(&21).await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn test_blocking_loader() {
        let loader = blocking_loader(|key: &String| Ok(Some(key.len())));
        assert_eq!(loader.load(&"four".to_string()).await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn test_blocking_loader_error() {
        let loader: Arc<dyn Loader<u8, u8>> =
            blocking_loader(|_key: &u8| Err(anyhow::anyhow!("disk unavailable")));
        let err = loader.load(&1).await.unwrap_err();
        assert_eq!(err.to_string(), "disk unavailable");
    }
}

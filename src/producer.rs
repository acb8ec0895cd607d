//! The computations wrapped by the caching policies.

use futures::future::BoxFuture;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// A computation whose result is cached.
///
/// Implemented for every `Fn(A) -> impl Future<Output = Result<V, E>>`
/// closure. Wrap synchronous functions with [`blocking`].
pub trait Producer<A, V>: Send + Sync + 'static {
    /// The failure raised by the computation.
    type Error: Send + 'static;

    /// Run the computation for `args`.
    fn produce(&self, args: A) -> BoxFuture<'static, Result<V, Self::Error>>;
}

impl<A, V, E, F, Fut> Producer<A, V> for F
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
    E: Send + 'static,
{
    type Error = E;

    fn produce(&self, args: A) -> BoxFuture<'static, Result<V, E>> {
        Box::pin(self(args))
    }
}

/// Producer running a synchronous function on the blocking thread pool.
pub struct Blocking<F, A> {
    f: Arc<F>,
    _marker: PhantomData<fn(A)>,
}

/// Adapt a synchronous function into a [`Producer`].
///
/// Each call runs on `tokio::task::spawn_blocking`, so a slow function does
/// not stall the async workers. A panic inside `f` is resumed in the caller.
///
/// # Example
/// ```ignore
/// let load_config = blocking(|()| std::fs::read_to_string("app.toml"));
/// ```
pub fn blocking<F, A, V, E>(f: F) -> Blocking<F, A>
where
    F: Fn(A) -> Result<V, E> + Send + Sync + 'static,
{
    Blocking {
        f: Arc::new(f),
        _marker: PhantomData,
    }
}

impl<F, A, V, E> Producer<A, V> for Blocking<F, A>
where
    F: Fn(A) -> Result<V, E> + Send + Sync + 'static,
    A: Send + 'static,
    V: Send + 'static,
    E: Send + 'static,
{
    type Error = E;

    fn produce(&self, args: A) -> BoxFuture<'static, Result<V, E>> {
        let f = Arc::clone(&self.f);
        Box::pin(async move {
            match tokio::task::spawn_blocking(move || f(args)).await {
                Ok(result) => result,
                Err(join_error) => std::panic::resume_unwind(join_error.into_panic()),
            }
        })
    }
}

//! # Connection Registry
//!
//! Associates names with opened connection handles inside a [`Context`], one
//! key namespace per connection kind.
//!
//! A context only supports point lookups, so every kind also keeps a
//! [`ConnectionIndex`]: a name→handle map that is layered into the chain the
//! first time a handle of that kind is registered and mutated in place from
//! then on. The index is a shared side table, not part of the immutable
//! chain. Every context that can see it also sees its mutations.
//!
//! Invariant: a name is in the index exactly when it is reachable through a
//! direct context entry of the same kind. `register` and the internal remove
//! keep the two in step.
//!
//! Concurrent register/close/close-all against the same chain is not
//! coordinated. The index lock keeps memory safe, nothing more.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::context::{Context, ContextKey};
use crate::error::{fatal, ConnectionError};

/// A kind of connection (relational, cache, document, ...).
///
/// The implementing type is only a tag: it names the key namespace and says
/// how a handle of this kind is released.
pub trait ConnectionKind: Send + Sync + 'static {
    /// The driver handle. Clones must refer to the same live connection.
    type Handle: Clone + Send + Sync + 'static;

    /// Short name used in log lines and errors.
    const LABEL: &'static str;

    /// Releases the connection behind `handle`.
    fn close(handle: Self::Handle) -> impl Future<Output = Result<(), ConnectionError>> + Send;
}

/// # Connection Index
///
/// The shared name→handle side table of one kind.
pub struct ConnectionIndex<K: ConnectionKind> {
    entries: Arc<Mutex<HashMap<String, K::Handle>>>,
}

impl<K: ConnectionKind> Clone for ConnectionIndex<K> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K: ConnectionKind> ConnectionIndex<K> {
    fn with_entry(name: &str, handle: K::Handle) -> Self {
        let mut entries = HashMap::new();
        entries.insert(name.to_string(), handle);
        Self {
            entries: Arc::new(Mutex::new(entries)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, K::Handle>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, name: &str, handle: K::Handle) {
        self.lock().insert(name.to_string(), handle);
    }

    fn remove(&self, name: &str) {
        self.lock().remove(name);
    }

    /// Snapshot of the registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered names.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no name is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether `self` and `other` are the same shared table.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

/// # Registry
///
/// The per-kind operations. All of them are associated functions taking the
/// context explicitly; nothing is stored in the registry itself.
pub struct Registry<K>(PhantomData<fn() -> K>);

impl<K: ConnectionKind> Registry<K> {
    fn key(name: &str) -> ContextKey {
        ContextKey::named::<K>(name)
    }

    fn index_key() -> ContextKey {
        ContextKey::of::<ConnectionIndex<K>>()
    }

    /// The index of this kind visible from `ctx`, if any handle was ever registered.
    pub fn index(ctx: &Context) -> Option<ConnectionIndex<K>> {
        ctx.get::<ConnectionIndex<K>>(&Self::index_key()).cloned()
    }

    /// Retrieves the handle registered as `name`, or `None`.
    pub fn lookup(ctx: &Context, name: &str) -> Option<K::Handle> {
        ctx.get::<K::Handle>(&Self::key(name)).cloned()
    }

    /// Returns a new context containing `handle` under `name`.
    ///
    /// The first registration of a kind in a chain layers a fresh index into the
    /// context; later ones insert into that index in place. Registering an
    /// existing name overwrites it.
    pub fn register(ctx: &Context, name: &str, handle: K::Handle) -> Context {
        let ctx = match Self::index(ctx) {
            Some(index) => {
                index.insert(name, handle.clone());
                ctx.clone()
            }
            None => {
                debug!("Creating {} connection index", K::LABEL);
                ctx.with_value(Self::index_key(), ConnectionIndex::<K>::with_entry(name, handle.clone()))
            }
        };
        debug!("Registered {} connection '{}'", K::LABEL, name);
        ctx.with_value(Self::key(name), handle)
    }

    /// Closes the connection registered as `name` and returns a context without it.
    ///
    /// An unknown name is a no-op and hands back `ctx` unchanged. On a driver
    /// error neither the context nor the index is touched.
    pub async fn try_close(ctx: &Context, name: &str) -> Result<Context, ConnectionError> {
        let Some(handle) = Self::lookup(ctx, name) else {
            return Ok(ctx.clone());
        };
        K::close(handle).await?;
        debug!("Closed {} connection '{}'", K::LABEL, name);
        Ok(Self::remove(ctx, name))
    }

    /// Like [`Registry::try_close`], but panics if the driver fails to close.
    pub async fn close(ctx: &Context, name: &str) -> Context {
        match Self::try_close(ctx, name).await {
            Ok(ctx) => ctx,
            Err(err) => fatal("close", K::LABEL, name, err),
        }
    }

    /// Closes every connection of this kind and returns a context without them.
    ///
    /// The names are snapshotted before the first close, so the in-place index
    /// removals never race the iteration. Order is unspecified. Stops at the
    /// first driver error; connections closed before it stay closed.
    pub async fn try_close_all(ctx: &Context) -> Result<Context, ConnectionError> {
        let Some(index) = Self::index(ctx) else {
            return Ok(ctx.clone());
        };
        let mut ctx = ctx.clone();
        for name in index.names() {
            ctx = Self::try_close(&ctx, &name).await?;
        }
        Ok(ctx)
    }

    /// Like [`Registry::try_close_all`], but panics on the first driver error.
    pub async fn close_all(ctx: &Context) -> Context {
        let Some(index) = Self::index(ctx) else {
            return ctx.clone();
        };
        let mut ctx = ctx.clone();
        for name in index.names() {
            ctx = Self::close(&ctx, &name).await;
        }
        ctx
    }

    /// Sorted names currently registered for this kind.
    pub fn names(ctx: &Context) -> Vec<String> {
        Self::index(ctx).map(|index| index.names()).unwrap_or_default()
    }

    /// Number of connections currently registered for this kind.
    pub fn len(ctx: &Context) -> usize {
        Self::index(ctx).map_or(0, |index| index.len())
    }

    /// Whether no connection of this kind is registered.
    pub fn is_empty(ctx: &Context) -> bool {
        Self::len(ctx) == 0
    }

    fn remove(ctx: &Context, name: &str) -> Context {
        if let Some(index) = Self::index(ctx) {
            index.remove(name);
        }
        ctx.without(Self::key(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug)]
    struct FakeConn {
        id: u32,
        closes: Arc<AtomicUsize>,
        fail: bool,
    }

    impl FakeConn {
        fn new(id: u32) -> Self {
            Self {
                id,
                closes: Arc::new(AtomicUsize::new(0)),
                fail: false,
            }
        }

        fn failing(id: u32) -> Self {
            Self {
                fail: true,
                ..Self::new(id)
            }
        }

        fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    async fn close_fake(kind: &'static str, handle: FakeConn) -> Result<(), ConnectionError> {
        if handle.fail {
            return Err(ConnectionError::Close {
                kind,
                reason: format!("connection {} refused to close", handle.id),
            });
        }
        handle.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    struct Primary;
    struct Secondary;

    impl ConnectionKind for Primary {
        type Handle = FakeConn;
        const LABEL: &'static str = "primary";

        async fn close(handle: FakeConn) -> Result<(), ConnectionError> {
            close_fake(Self::LABEL, handle).await
        }
    }

    impl ConnectionKind for Secondary {
        type Handle = FakeConn;
        const LABEL: &'static str = "secondary";

        async fn close(handle: FakeConn) -> Result<(), ConnectionError> {
            close_fake(Self::LABEL, handle).await
        }
    }

    type Primaries = Registry<Primary>;
    type Secondaries = Registry<Secondary>;

    #[test]
    fn test_register_then_lookup() {
        let conn = FakeConn::new(1);
        let ctx = Primaries::register(&Context::background(), "main", conn);

        assert_eq!(Primaries::lookup(&ctx, "main").map(|c| c.id), Some(1));
        assert!(Primaries::lookup(&ctx, "other").is_none());
        assert_eq!(Primaries::names(&ctx), vec!["main".to_string()]);
    }

    #[test]
    fn test_lookup_on_empty_context() {
        let ctx = Context::background();
        assert!(Primaries::lookup(&ctx, "main").is_none());
        assert!(Primaries::index(&ctx).is_none());
        assert!(Primaries::is_empty(&ctx));
    }

    #[test]
    fn test_index_is_injected_once_and_shared() {
        let first = Primaries::register(&Context::background(), "a", FakeConn::new(1));
        let second = Primaries::register(&first, "b", FakeConn::new(2));

        // one index layer + two handle layers
        assert_eq!(second.depth(), 3);

        let from_first = Primaries::index(&first).expect("index in first context");
        let from_second = Primaries::index(&second).expect("index in second context");
        assert!(from_first.ptr_eq(&from_second));
        // The older context sees the name added through the newer one.
        assert_eq!(from_first.names(), vec!["a".to_string(), "b".to_string()]);
        assert!(Primaries::lookup(&first, "b").is_none());
    }

    #[test]
    fn test_reregistration_overwrites() {
        let ctx = Primaries::register(&Context::background(), "main", FakeConn::new(1));
        let ctx = Primaries::register(&ctx, "main", FakeConn::new(2));

        assert_eq!(Primaries::lookup(&ctx, "main").map(|c| c.id), Some(2));
        assert_eq!(Primaries::len(&ctx), 1);
    }

    #[test]
    fn test_kinds_use_separate_namespaces() {
        let ctx = Primaries::register(&Context::background(), "x", FakeConn::new(1));
        let ctx = Secondaries::register(&ctx, "x", FakeConn::new(2));

        assert_eq!(Primaries::lookup(&ctx, "x").map(|c| c.id), Some(1));
        assert_eq!(Secondaries::lookup(&ctx, "x").map(|c| c.id), Some(2));
        assert_eq!(Primaries::len(&ctx), 1);
        assert_eq!(Secondaries::len(&ctx), 1);
    }

    #[tokio::test]
    async fn test_close_unknown_name_is_noop() {
        let ctx = Primaries::register(&Context::background(), "main", FakeConn::new(1));
        let closed = Primaries::close(&ctx, "missing").await;

        assert!(closed.ptr_eq(&ctx));
        assert_eq!(Primaries::lookup(&closed, "main").map(|c| c.id), Some(1));

        let empty = Context::background();
        assert!(Primaries::close(&empty, "missing").await.ptr_eq(&empty));
    }

    #[tokio::test]
    async fn test_close_removes_from_context_and_index() {
        let conn = FakeConn::new(1);
        let ctx = Primaries::register(&Context::background(), "main", conn.clone());
        let closed = Primaries::close(&ctx, "main").await;

        assert!(Primaries::lookup(&closed, "main").is_none());
        assert!(Primaries::is_empty(&closed));
        assert_eq!(conn.closes(), 1);

        // Closing again finds nothing to do.
        let again = Primaries::close(&closed, "main").await;
        assert!(again.ptr_eq(&closed));
        assert_eq!(conn.closes(), 1);
    }

    #[tokio::test]
    async fn test_close_leaves_other_kind_alone() {
        let primary = FakeConn::new(1);
        let secondary = FakeConn::new(2);
        let ctx = Primaries::register(&Context::background(), "x", primary.clone());
        let ctx = Secondaries::register(&ctx, "x", secondary.clone());

        let ctx = Primaries::close(&ctx, "x").await;
        assert!(Primaries::lookup(&ctx, "x").is_none());
        assert_eq!(Secondaries::lookup(&ctx, "x").map(|c| c.id), Some(2));
        assert_eq!(secondary.closes(), 0);
    }

    #[tokio::test]
    async fn test_close_all_closes_each_once() {
        let conns: Vec<FakeConn> = (1..=3).map(FakeConn::new).collect();
        let mut ctx = Context::background();
        for (name, conn) in ["A", "B", "C"].iter().zip(&conns) {
            ctx = Primaries::register(&ctx, name, conn.clone());
        }

        let closed = Primaries::close_all(&ctx).await;
        for name in ["A", "B", "C"] {
            assert!(Primaries::lookup(&closed, name).is_none());
        }
        for conn in &conns {
            assert_eq!(conn.closes(), 1);
        }
        assert!(Primaries::names(&closed).is_empty());
    }

    #[tokio::test]
    async fn test_close_all_without_index_returns_same_context() {
        let ctx = Secondaries::register(&Context::background(), "x", FakeConn::new(1));
        let closed = Primaries::close_all(&ctx).await;
        assert!(closed.ptr_eq(&ctx));
    }

    #[tokio::test]
    async fn test_failed_close_keeps_state() {
        let ctx = Primaries::register(&Context::background(), "bad", FakeConn::failing(9));
        let err = Primaries::try_close(&ctx, "bad").await.unwrap_err();

        assert!(matches!(err, ConnectionError::Close { kind: "primary", .. }));
        assert_eq!(Primaries::lookup(&ctx, "bad").map(|c| c.id), Some(9));
        assert_eq!(Primaries::names(&ctx), vec!["bad".to_string()]);
    }

    #[tokio::test]
    #[should_panic(expected = "failed to close primary connection 'bad'")]
    async fn test_close_panics_on_driver_error() {
        let ctx = Primaries::register(&Context::background(), "bad", FakeConn::failing(9));
        Primaries::close(&ctx, "bad").await;
    }

    #[tokio::test]
    async fn test_try_close_all_stops_at_first_error() {
        let good = FakeConn::new(1);
        let ctx = Primaries::register(&Context::background(), "a-good", good.clone());
        let ctx = Primaries::register(&ctx, "b-bad", FakeConn::failing(2));

        // Names are visited in sorted order, so "a-good" is closed before the failure.
        assert!(Primaries::try_close_all(&ctx).await.is_err());
        assert_eq!(good.closes(), 1);
        assert_eq!(Primaries::names(&ctx), vec!["b-bad".to_string()]);
    }
}

//! # Context Chain
//!
//! An immutable, layered key-value environment that is threaded through a call
//! sequence. Every `with_value` returns a new `Context` that wraps the previous
//! one; lookups walk from the newest layer outward and stop at the first layer
//! whose key matches.
//!
//! Nothing is ever removed from a chain. `without` layers an explicit absent
//! marker on top, and a lookup that reaches the marker reports "not present"
//! even if an older layer still holds a value for the same key.
//!
//! Contexts are cheap to clone (a single `Arc`) and share their older layers,
//! so handing a derived context down a call chain never copies stored values.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

type Value = Arc<dyn Any + Send + Sync>;

/// # Context Key
///
/// Identifies one slot of a [`Context`]. A key is made of a namespace, which is
/// a Rust type compared by `TypeId`, and an optional name. Keys built from
/// different namespaces never compare equal, even if their names do.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ContextKey {
    namespace: TypeId,
    label: &'static str,
    name: Option<Arc<str>>,
}

impl ContextKey {
    /// The single unnamed key of namespace `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            namespace: TypeId::of::<T>(),
            label: std::any::type_name::<T>(),
            name: None,
        }
    }

    /// The key `name` inside namespace `T`.
    pub fn named<T: ?Sized + 'static>(name: &str) -> Self {
        Self {
            namespace: TypeId::of::<T>(),
            label: std::any::type_name::<T>(),
            name: Some(Arc::from(name)),
        }
    }

    /// The name part of the key, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl fmt::Debug for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}({:?})", self.label, name),
            None => write!(f, "{}", self.label),
        }
    }
}

struct Layer {
    key: ContextKey,
    // `None` is the absent marker written by `Context::without`.
    value: Option<Value>,
    parent: Option<Arc<Layer>>,
}

impl Drop for Layer {
    // Unlink iteratively so that dropping a very long chain cannot overflow the stack.
    fn drop(&mut self) {
        let mut next = self.parent.take();
        while let Some(layer) = next {
            match Arc::try_unwrap(layer) {
                Ok(mut layer) => next = layer.parent.take(),
                Err(_) => break,
            }
        }
    }
}

/// # Context
///
/// The immutable chain itself. The default value is the empty root
/// ([`Context::background`]).
#[derive(Clone, Default)]
pub struct Context {
    head: Option<Arc<Layer>>,
}

impl Context {
    /// Returns an empty root context.
    pub fn background() -> Self {
        Self::default()
    }

    /// Returns a new context in which `key` maps to `value`. `self` is left untouched.
    pub fn with_value<T>(&self, key: ContextKey, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.push(key, Some(Arc::new(value)))
    }

    /// Returns a new context in which `key` reads as absent.
    pub fn without(&self, key: ContextKey) -> Self {
        self.push(key, None)
    }

    fn push(&self, key: ContextKey, value: Option<Value>) -> Self {
        Self {
            head: Some(Arc::new(Layer {
                key,
                value,
                parent: self.head.clone(),
            })),
        }
    }

    /// Looks up the newest value stored under `key`.
    ///
    /// Returns `None` if no layer carries the key or if the newest layer for it
    /// is an absent marker.
    pub fn value(&self, key: &ContextKey) -> Option<&(dyn Any + Send + Sync)> {
        let mut current = self.head.as_deref();
        while let Some(layer) = current {
            if layer.key == *key {
                return layer.value.as_deref();
            }
            current = layer.parent.as_deref();
        }
        None
    }

    /// Typed variant of [`Context::value`]. A value of another type reads as absent.
    pub fn get<T: Any>(&self, key: &ContextKey) -> Option<&T> {
        self.value(key)?.downcast_ref::<T>()
    }

    /// Number of layers in the chain, absent markers included.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.head.as_deref();
        while let Some(layer) = current {
            depth += 1;
            current = layer.parent.as_deref();
        }
        depth
    }

    /// Whether `self` and `other` are the very same chain.
    pub fn ptr_eq(&self, other: &Context) -> bool {
        match (&self.head, &other.head) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys = Vec::new();
        let mut current = self.head.as_deref();
        while let Some(layer) = current {
            keys.push(&layer.key);
            current = layer.parent.as_deref();
        }
        f.debug_struct("Context").field("layers", &keys).finish()
    }
}

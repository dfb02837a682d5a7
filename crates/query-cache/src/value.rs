//! Values held by cache backends

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// A cached row in its in-memory representation.
///
/// The concrete type is erased so that one cache can hold beans of every
/// table; readers recover it with [`CachedBean::downcast`]. Cloning is cheap.
#[derive(Clone)]
pub struct CachedBean {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl CachedBean {
    /// Wrap a row value
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Wrap an already shared row value
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            inner: value,
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Recover the row as its concrete type
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.inner).downcast::<T>().ok()
    }

    /// Borrow the row as its concrete type
    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.inner.as_ref().downcast_ref::<T>()
    }

    /// Whether the row is a `T`
    pub fn is<T: Any + Send + Sync>(&self) -> bool {
        self.value_type_id() == TypeId::of::<T>()
    }

    /// `TypeId` of the wrapped row, not of the container
    pub fn value_type_id(&self) -> TypeId {
        let value: &dyn Any = self.inner.as_ref();
        value.type_id()
    }

    /// Compiler-provided name of the wrapped type, for diagnostics only
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self.inner.as_ref()
    }

    /// Whether both handles point at the same row allocation
    pub fn ptr_eq(&self, other: &CachedBean) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for CachedBean {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedBean")
            .field("type", &self.type_name)
            .finish()
    }
}

/// Payload stored under one backend key
#[derive(Debug, Clone)]
pub enum CacheValue {
    /// An encoded primary-key list, see [`encode_pk_list`](crate::key::encode_pk_list)
    Ids(Vec<u8>),
    /// A cached row
    Bean(CachedBean),
}

impl CacheValue {
    pub fn kind(&self) -> &'static str {
        match self {
            CacheValue::Ids(_) => "ids",
            CacheValue::Bean(_) => "bean",
        }
    }
}

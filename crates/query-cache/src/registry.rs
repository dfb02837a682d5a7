//! Serializer registry for beans mirrored to a remote backend
//!
//! Beans are type-erased in memory, so a remote backend can only store those
//! whose concrete type was registered up front under a stable name. The name
//! travels with the payload and picks the decoder on the way back.

use crate::value::CachedBean;
use ahash::AHashMap;
use query_core::{CacheError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::sync::Arc;

type EncodeFn = fn(&(dyn Any + Send + Sync)) -> Result<Vec<u8>>;
type DecodeFn = fn(&[u8]) -> Result<CachedBean>;

struct Codec {
    name: String,
    type_id: TypeId,
    encode: EncodeFn,
    decode: DecodeFn,
}

/// Wire form of a bean: the registered type name plus its bincode payload
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    type_name: String,
    payload: Vec<u8>,
}

/// Registry of bean types that can be written to and read from a remote backend
#[derive(Default, Clone)]
pub struct TypeRegistry {
    by_type: AHashMap<TypeId, Arc<Codec>>,
    by_name: AHashMap<String, Arc<Codec>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under `name`.
    ///
    /// Registering the same type under the same name again is a no-op; reusing
    /// a name for another type, or a type under another name, is rejected.
    pub fn register<T>(&mut self, name: &str) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<T>();
        if let Some(existing) = self.by_name.get(name) {
            if existing.type_id == type_id {
                return Ok(());
            }
            return Err(CacheError::InvalidConfig(format!(
                "type name '{}' is already registered for another type",
                name
            )));
        }
        if let Some(existing) = self.by_type.get(&type_id) {
            return Err(CacheError::InvalidConfig(format!(
                "{} is already registered as '{}'",
                std::any::type_name::<T>(),
                existing.name
            )));
        }

        let codec = Arc::new(Codec {
            name: name.to_string(),
            type_id,
            encode: encode_as::<T>,
            decode: decode_as::<T>,
        });
        self.by_type.insert(type_id, Arc::clone(&codec));
        self.by_name.insert(name.to_string(), codec);
        Ok(())
    }

    /// Builder form of [`register`](Self::register)
    pub fn with_type<T>(mut self, name: &str) -> Result<Self>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.register::<T>(name)?;
        Ok(self)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Serialize a bean; fails with `UnregisteredType` if its type is unknown
    pub fn encode(&self, bean: &CachedBean) -> Result<Vec<u8>> {
        let codec = self
            .by_type
            .get(&bean.value_type_id())
            .ok_or_else(|| CacheError::UnregisteredType(bean.type_name().to_string()))?;

        let envelope = Envelope {
            type_name: codec.name.clone(),
            payload: (codec.encode)(bean.as_any())?,
        };
        bincode::serialize(&envelope).map_err(|e| CacheError::Encoding(e.to_string()))
    }

    /// Deserialize a bean written by [`encode`](Self::encode)
    pub fn decode(&self, bytes: &[u8]) -> Result<CachedBean> {
        let envelope: Envelope =
            bincode::deserialize(bytes).map_err(|e| CacheError::Encoding(e.to_string()))?;
        let codec = self
            .by_name
            .get(&envelope.type_name)
            .ok_or(CacheError::UnregisteredType(envelope.type_name))?;
        (codec.decode)(&envelope.payload)
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.by_name.keys().collect();
        names.sort();
        f.debug_struct("TypeRegistry").field("types", &names).finish()
    }
}

fn encode_as<T: Serialize + 'static>(value: &(dyn Any + Send + Sync)) -> Result<Vec<u8>> {
    let value = value.downcast_ref::<T>().ok_or_else(|| {
        CacheError::Encoding(format!("bean is not a {}", std::any::type_name::<T>()))
    })?;
    bincode::serialize(value).map_err(|e| CacheError::Encoding(e.to_string()))
}

fn decode_as<T: DeserializeOwned + Send + Sync + 'static>(bytes: &[u8]) -> Result<CachedBean> {
    let value: T = bincode::deserialize(bytes).map_err(|e| CacheError::Encoding(e.to_string()))?;
    Ok(CachedBean::new(value))
}

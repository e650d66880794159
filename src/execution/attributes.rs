//! Typed attribute bags shared between stages.

use crate::checksum::ChecksumSpecs;
use crate::signing::{SigningClock, SigningMethod};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Clock-skew offset, in seconds, applied when signing.
pub const TIME_OFFSET: AttributeKey<i64> = AttributeKey::new("TimeOffset");

/// Checksum the request must carry, as resolved by marshalling.
pub const RESOLVED_CHECKSUM_SPECS: AttributeKey<ChecksumSpecs> =
    AttributeKey::new("ResolvedChecksumSpecs");

/// The operation carries the legacy `httpChecksumRequired` trait.
pub const HTTP_CHECKSUM_REQUIRED: AttributeKey<bool> = AttributeKey::new("HttpChecksumRequired");

/// How the signer treats the payload.
pub const SIGNING_METHOD: AttributeKey<SigningMethod> = AttributeKey::new("SigningMethod");

/// Identifier of the auth scheme chosen for the call.
pub const SELECTED_AUTH_SCHEME_ID: AttributeKey<String> =
    AttributeKey::new("SelectedAuthSchemeId");

/// Name of the operation being invoked.
pub const OPERATION_NAME: AttributeKey<String> = AttributeKey::new("OperationName");

/// Name of the service being called.
pub const SERVICE_NAME: AttributeKey<String> = AttributeKey::new("ServiceName");

/// Clock a signer should use. Never overridden once present.
pub const SIGNING_CLOCK: AttributeKey<SigningClock> = AttributeKey::new("SigningClock");

/// Bound for values stored in an attribute bag.
pub trait AttributeValue: Any + Clone + PartialEq + fmt::Debug + Send + Sync {}

impl<T> AttributeValue for T where T: Any + Clone + PartialEq + fmt::Debug + Send + Sync {}

/// Name of an attribute together with the type of its value.
pub struct AttributeKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AttributeKey<T> {
    /// Declare a key. Names must be unique within a bag.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// The key's name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for AttributeKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AttributeKey<T> {}

impl<T> fmt::Debug for AttributeKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttributeKey({})", self.name)
    }
}

#[derive(Clone)]
struct Entry {
    value: Arc<dyn Any + Send + Sync>,
    eq: fn(&dyn Any, &dyn Any) -> bool,
    debug: fn(&dyn Any, &mut fmt::Formatter<'_>) -> fmt::Result,
}

fn entry_eq<T: AttributeValue>(left: &dyn Any, right: &dyn Any) -> bool {
    match (left.downcast_ref::<T>(), right.downcast_ref::<T>()) {
        (Some(l), Some(r)) => l == r,
        _ => false,
    }
}

fn entry_debug<T: AttributeValue>(value: &dyn Any, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value.downcast_ref::<T>() {
        Some(v) => fmt::Debug::fmt(v, f),
        None => f.write_str("<?>"),
    }
}

#[derive(Clone, Default)]
struct AttributeMap {
    entries: HashMap<&'static str, Entry>,
}

impl AttributeMap {
    fn get<T: AttributeValue>(&self, key: AttributeKey<T>) -> Option<T> {
        self.entries
            .get(key.name)
            .and_then(|entry| entry.value.downcast_ref::<T>())
            .cloned()
    }

    fn put<T: AttributeValue>(&mut self, key: AttributeKey<T>, value: T) {
        self.entries.insert(
            key.name,
            Entry {
                value: Arc::new(value),
                eq: entry_eq::<T>,
                debug: entry_debug::<T>,
            },
        );
    }

    fn remove<T: AttributeValue>(&mut self, key: AttributeKey<T>) -> Option<T> {
        self.entries
            .remove(key.name)
            .and_then(|entry| entry.value.downcast_ref::<T>().cloned())
    }
}

impl PartialEq for AttributeMap {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self.entries.iter().all(|(name, entry)| {
                other
                    .entries
                    .get(name)
                    .map(|o| (entry.eq)(entry.value.as_ref(), o.value.as_ref()))
                    .unwrap_or(false)
            })
    }
}

struct DebugValue<'a>(&'a Entry);

impl fmt::Debug for DebugValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (self.0.debug)(self.0.value.as_ref(), f)
    }
}

impl fmt::Debug for AttributeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.entries.keys().collect();
        names.sort();
        let mut map = f.debug_map();
        for name in names {
            if let Some(entry) = self.entries.get(name) {
                map.entry(name, &DebugValue(entry));
            }
        }
        map.finish()
    }
}

/// Cross-stage state for one call.
///
/// Entries written by an earlier stage are visible to later ones. Values are
/// immutable once stored; `put` replaces them.
#[derive(Clone, Default, PartialEq)]
pub struct ExecutionAttributes {
    map: AttributeMap,
}

impl ExecutionAttributes {
    /// An empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a value.
    pub fn get<T: AttributeValue>(&self, key: AttributeKey<T>) -> Option<T> {
        self.map.get(key)
    }

    /// Store a value, replacing any previous one.
    pub fn put<T: AttributeValue>(&mut self, key: AttributeKey<T>, value: T) {
        self.map.put(key, value);
    }

    /// Builder-style [`put`](Self::put).
    pub fn with<T: AttributeValue>(mut self, key: AttributeKey<T>, value: T) -> Self {
        self.put(key, value);
        self
    }

    /// Remove a value.
    pub fn remove<T: AttributeValue>(&mut self, key: AttributeKey<T>) -> Option<T> {
        self.map.remove(key)
    }

    /// Returns true if the key is present.
    pub fn contains<T>(&self, key: AttributeKey<T>) -> bool {
        self.map.entries.contains_key(key.name)
    }

    /// An independent copy; later writes to either bag are not shared.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.map.entries.len()
    }

    /// Returns true if no attribute is set.
    pub fn is_empty(&self) -> bool {
        self.map.entries.is_empty()
    }
}

impl fmt::Debug for ExecutionAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExecutionAttributes").field(&self.map).finish()
    }
}

/// Signer-specific properties carried by a selected auth scheme.
#[derive(Clone, Default, PartialEq)]
pub struct SignerProperties {
    map: AttributeMap,
}

impl SignerProperties {
    /// No properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a property.
    pub fn get<T: AttributeValue>(&self, key: AttributeKey<T>) -> Option<T> {
        self.map.get(key)
    }

    /// Store a property.
    pub fn put<T: AttributeValue>(&mut self, key: AttributeKey<T>, value: T) {
        self.map.put(key, value);
    }

    /// Builder-style [`put`](Self::put).
    pub fn with<T: AttributeValue>(mut self, key: AttributeKey<T>, value: T) -> Self {
        self.put(key, value);
        self
    }

    /// Returns true if the property is present.
    pub fn contains<T>(&self, key: AttributeKey<T>) -> bool {
        self.map.entries.contains_key(key.name)
    }
}

impl fmt::Debug for SignerProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SignerProperties").field(&self.map).finish()
    }
}

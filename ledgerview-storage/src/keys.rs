//! Owner-scoped store keys.
//!
//! Several identities can share one process and one durable store. Every key
//! therefore carries the identity it belongs to, and `ScopedKey`'s private
//! constructor makes it impossible to address the store without naming an
//! owner.
//!
//! # String Format
//!
//! `{domain}:{owner}:{key}`
//!
//! - `domain` is a fixed tag per subsystem (`cache`, `governance`)
//! - `owner` is a normalized identity or `shared`
//! - `key` is free-form and may itself contain `:`
//!
//! Identities never contain `:`, so the first two separators are unambiguous
//! and a `{domain}:{owner}:` prefix selects exactly one owner's keys.

use ledgerview_core::{CacheNamespace, Identity};
use std::fmt;

/// Separator between key segments.
const SEPARATOR: char = ':';

/// Owner segment used for data not bound to one identity.
const SHARED_OWNER: &str = "shared";

/// Subsystem that owns a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyDomain {
    Cache,
    Governance,
}

impl KeyDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyDomain::Cache => "cache",
            KeyDomain::Governance => "governance",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "cache" => Some(KeyDomain::Cache),
            "governance" => Some(KeyDomain::Governance),
            _ => None,
        }
    }
}

/// The identity whose view a key belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OwnerContext {
    /// Data visible to every identity (proposals, global aggregates).
    Shared,
    /// Data fetched on behalf of one identity.
    Identity(Identity),
}

impl OwnerContext {
    pub fn as_str(&self) -> &str {
        match self {
            OwnerContext::Shared => SHARED_OWNER,
            OwnerContext::Identity(identity) => identity.as_str(),
        }
    }

    fn parse(s: &str) -> Option<Self> {
        if s == SHARED_OWNER {
            Some(OwnerContext::Shared)
        } else {
            Identity::parse(s).ok().map(OwnerContext::Identity)
        }
    }
}

impl From<Identity> for OwnerContext {
    fn from(identity: Identity) -> Self {
        OwnerContext::Identity(identity)
    }
}

impl fmt::Display for OwnerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A store key scoped to a domain and an owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopedKey {
    /// Private inner data - cannot be constructed externally
    inner: ScopedKeyInner,
}

/// Private inner struct - prevents external construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ScopedKeyInner {
    domain: KeyDomain,
    owner: OwnerContext,
    key: String,
}

impl ScopedKey {
    /// Create a new scoped key. This is the only way to build one.
    pub fn new(domain: KeyDomain, owner: OwnerContext, key: impl Into<String>) -> Self {
        Self {
            inner: ScopedKeyInner {
                domain,
                owner,
                key: key.into(),
            },
        }
    }

    pub fn domain(&self) -> KeyDomain {
        self.inner.domain
    }

    pub fn owner(&self) -> &OwnerContext {
        &self.inner.owner
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Encode to the flat `{domain}:{owner}:{key}` form used by backends.
    pub fn encode(&self) -> String {
        format!(
            "{}{}{}{}{}",
            self.inner.domain.as_str(),
            SEPARATOR,
            self.inner.owner.as_str(),
            SEPARATOR,
            self.inner.key
        )
    }

    /// Decode a flat key.
    ///
    /// Returns `None` if the domain is unknown, the owner is not a valid
    /// identity, or a segment is missing.
    pub fn decode(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(3, SEPARATOR);
        let domain = KeyDomain::parse(parts.next()?)?;
        let owner = OwnerContext::parse(parts.next()?)?;
        let key = parts.next()?;
        Some(Self::new(domain, owner, key))
    }

    /// Prefix selecting every key of one owner within a domain.
    pub fn owner_prefix(domain: KeyDomain, owner: &OwnerContext) -> String {
        format!(
            "{}{}{}{}",
            domain.as_str(),
            SEPARATOR,
            owner.as_str(),
            SEPARATOR
        )
    }
}

impl fmt::Display for ScopedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Key of a cached read-model value: data class, owner and item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: CacheNamespace,
    owner: OwnerContext,
    item: String,
}

impl CacheKey {
    pub fn new(namespace: CacheNamespace, owner: OwnerContext, item: impl Into<String>) -> Self {
        Self {
            namespace,
            owner,
            item: item.into(),
        }
    }

    /// Key for a value fetched on behalf of one identity.
    pub fn for_identity(namespace: CacheNamespace, identity: &Identity, item: impl Into<String>) -> Self {
        Self::new(namespace, OwnerContext::Identity(identity.clone()), item)
    }

    /// Key for a value shared by every identity.
    pub fn shared(namespace: CacheNamespace, item: impl Into<String>) -> Self {
        Self::new(namespace, OwnerContext::Shared, item)
    }

    pub fn namespace(&self) -> CacheNamespace {
        self.namespace
    }

    pub fn owner(&self) -> &OwnerContext {
        &self.owner
    }

    pub fn item(&self) -> &str {
        &self.item
    }

    /// Durable location of this entry.
    pub fn scoped(&self) -> ScopedKey {
        ScopedKey::new(
            KeyDomain::Cache,
            self.owner.clone(),
            format!("{}/{}", self.namespace.as_str(), self.item),
        )
    }

    /// Flat form, also used as the in-memory map key.
    pub fn encode(&self) -> String {
        self.scoped().encode()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

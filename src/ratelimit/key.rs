//! Partition key generation.
//!
//! A key generator maps the caller context of a request to the opaque string
//! whose budget the request consumes. The limiter never inspects the key.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Placeholder used when a context carries no caller address.
pub const UNKNOWN_ADDRESS: &str = "unknown";

/// Separator between the parts of a composite key.
pub const KEY_SEPARATOR: &str = ":";

/// What the serving layer knows about an inbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Caller network address
    #[serde(default)]
    pub address: Option<String>,
    /// Authenticated principal identifier, if any
    #[serde(default)]
    pub principal: Option<String>,
    /// Target route or operation
    #[serde(default)]
    pub route: String,
}

impl RequestContext {
    /// Create a context for an anonymous caller at `address` hitting `route`.
    pub fn new(address: impl Into<String>, route: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            principal: None,
            route: route.into(),
        }
    }

    /// Attach an authenticated principal.
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }
}

/// Function deriving a partition key from a request context.
pub type KeyGenerator = Arc<dyn Fn(&RequestContext) -> String + Send + Sync>;

/// A single component of a partition key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    /// Caller address
    Address,
    /// Authenticated principal, falling back to the address
    Principal,
    /// Target route
    Route,
}

impl KeySource {
    /// Extract this component from `ctx`.
    pub fn extract(&self, ctx: &RequestContext) -> String {
        match self {
            KeySource::Address => address_of(ctx).to_string(),
            KeySource::Principal => match &ctx.principal {
                Some(principal) => principal.clone(),
                None => address_of(ctx).to_string(),
            },
            KeySource::Route => ctx.route.clone(),
        }
    }
}

fn address_of(ctx: &RequestContext) -> &str {
    ctx.address.as_deref().unwrap_or(UNKNOWN_ADDRESS)
}

/// Key by caller address.
pub fn by_address() -> KeyGenerator {
    Arc::new(|ctx: &RequestContext| KeySource::Address.extract(ctx))
}

/// Key by authenticated principal, falling back to the caller address.
pub fn by_principal() -> KeyGenerator {
    Arc::new(|ctx: &RequestContext| KeySource::Principal.extract(ctx))
}

/// Key by target route.
pub fn by_route() -> KeyGenerator {
    Arc::new(|ctx: &RequestContext| KeySource::Route.extract(ctx))
}

/// Key by several components joined with [`KEY_SEPARATOR`].
///
/// An empty list behaves like [`by_address`].
pub fn composite(sources: impl Into<Vec<KeySource>>) -> KeyGenerator {
    let sources: Vec<KeySource> = sources.into();
    if sources.is_empty() {
        return by_address();
    }

    Arc::new(move |ctx: &RequestContext| {
        sources
            .iter()
            .map(|source| source.extract(ctx))
            .collect::<Vec<_>>()
            .join(KEY_SEPARATOR)
    })
}

/// Namespace the keys of `generator` under `prefix`.
///
/// Limiters sharing one store need distinct keys for the same caller.
pub fn prefixed(prefix: impl Into<String>, generator: KeyGenerator) -> KeyGenerator {
    let prefix = prefix.into();
    Arc::new(move |ctx: &RequestContext| {
        format!("{}{}{}", prefix, KEY_SEPARATOR, generator(ctx))
    })
}

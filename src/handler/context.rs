//! Per-request context handed to handlers.
//!
//! A [`Context`] carries opaque embedder data (whatever was passed to
//! `Server::parse` for the connection) plus, when an access-control gate is
//! configured, the set of permissions the gate granted for this request.
//!
//! # Example
//!
//! ```ignore
//! async fn logout(req: Request, res: Response, ctx: Context) -> HandlerResult {
//!     if ctx.permissions().has("user") {
//!         res.send("done")
//!     } else {
//!         res.error(&json!({ "code": 302, "msg": "Logout access denied." }))
//!     }
//! }
//! ```

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::acl::{AccessDecision, Gate};
use crate::error::Result;

/// Set of permission tokens granted by the gate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permissions(HashSet<String>);

impl Permissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Membership test.
    pub fn has(&self, permission: &str) -> bool {
        self.0.contains(permission)
    }

    pub fn insert(&mut self, permission: impl Into<String>) {
        self.0.insert(permission.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for Permissions {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Context passed to handlers and to the access-control gate.
///
/// Cheap to clone: embedder data is shared behind an `Arc`.
#[derive(Clone, Default)]
pub struct Context {
    data: Option<Arc<dyn Any + Send + Sync>>,
    permissions: Permissions,
    gate: Option<Gate>,
}

impl Context {
    /// Context without embedder data.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context carrying embedder data.
    pub fn with_data<T: Any + Send + Sync>(data: T) -> Self {
        Self {
            data: Some(Arc::new(data)),
            ..Self::default()
        }
    }

    /// Borrow the embedder data, if it is a `T`.
    pub fn data<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.data.as_deref().and_then(|d| d.downcast_ref::<T>())
    }

    /// Permissions granted for this request. Empty when no gate ran.
    pub fn permissions(&self) -> &Permissions {
        &self.permissions
    }

    pub(crate) fn set_permissions(&mut self, permissions: Permissions) {
        self.permissions = permissions;
    }

    pub(crate) fn set_gate(&mut self, gate: Option<Gate>) {
        self.gate = gate;
    }

    /// Ask the configured gate whether `permission` is granted on `resource`.
    ///
    /// The gate sees `[permission]` as the resource's acl metadata. Without
    /// a gate every check is allowed.
    pub async fn check_access(&self, resource: &str, permission: &str) -> Result<AccessDecision> {
        match &self.gate {
            None => Ok(AccessDecision::allow()),
            Some(gate) => {
                let acl = Value::Array(vec![Value::String(permission.to_string())]);
                gate.check(resource, &acl, self).await
            }
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("has_data", &self.data.is_some())
            .field("permissions", &self.permissions)
            .field("gated", &self.gate.is_some())
            .finish()
    }
}

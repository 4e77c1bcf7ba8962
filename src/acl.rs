//! Access-control gate contract.
//!
//! The engine ships no policy. An embedder plugs in an [`AccessControl`]
//! implementation, most conveniently an async closure:
//!
//! ```ignore
//! let server = Server::builder()
//!     .methods(tree)
//!     .access_control(|resource: String, acl: Value, ctx: Context| async move {
//!         let user = ctx.data::<Session>().map(|s| s.user.clone());
//!         Ok(policy.decide(&resource, &acl, user.as_deref()))
//!     })
//!     .build();
//! ```
//!
//! The gate is consulted before every non-public operation, once per
//! candidate when the `methods` list is built, and from handlers through
//! [`Context::check_access`](crate::Context::check_access).

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::handler::{BoxFuture, Context};

/// Outcome of one gate check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessDecision {
    pub allowed: bool,
    /// Permissions granted to the caller; copied into the request context.
    pub permissions: Vec<String>,
}

impl AccessDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            permissions: Vec::new(),
        }
    }

    pub fn deny() -> Self {
        Self::default()
    }

    /// Allow and grant `permissions`.
    pub fn allow_with<I, S>(permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: true,
            permissions: permissions.into_iter().map(Into::into).collect(),
        }
    }
}

/// Pluggable access-control predicate.
///
/// `resource` is the full dot-joined operation name, `acl` is the method's
/// acl metadata (`Value::Null` when absent). An `Err` is a gate failure and
/// is reported to the client as code 301; a denial as code 302.
pub trait AccessControl: Send + Sync + 'static {
    fn check(&self, resource: &str, acl: &Value, ctx: &Context) -> BoxFuture<'static, Result<AccessDecision>>;
}

impl<F, Fut> AccessControl for F
where
    F: Fn(String, Value, Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<AccessDecision>> + Send + 'static,
{
    fn check(&self, resource: &str, acl: &Value, ctx: &Context) -> BoxFuture<'static, Result<AccessDecision>> {
        Box::pin((self)(resource.to_string(), acl.clone(), ctx.clone()))
    }
}

/// Shared gate handle.
pub type Gate = Arc<dyn AccessControl>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcError;
    use serde_json::json;

    #[test]
    fn test_decision_constructors() {
        assert!(AccessDecision::allow().allowed);
        assert!(!AccessDecision::deny().allowed);

        let granted = AccessDecision::allow_with(["user", "admin"]);
        assert!(granted.allowed);
        assert_eq!(granted.permissions, vec!["user", "admin"]);
    }

    #[tokio::test]
    async fn test_closure_gate_sees_resource_and_acl() {
        let gate: Gate = Arc::new(|resource: String, acl: Value, _ctx: Context| async move {
            if acl.is_null() {
                return Err(RpcError::Gate(format!("no acl on {resource}")));
            }
            Ok(AccessDecision::allow_with([resource]))
        });

        let ctx = Context::new();
        let decision = gate.check("fwupdate.state", &json!(["user"]), &ctx).await.unwrap();
        assert_eq!(decision.permissions, vec!["fwupdate.state"]);

        let err = gate.check("login", &Value::Null, &ctx).await.unwrap_err();
        assert!(matches!(err, RpcError::Gate(_)));
    }
}

//! Method registry: nested definitions flattened into a dispatch table.
//!
//! A [`MethodTree`] describes methods and namespaces. Inserting a tree
//! walks it depth-first and stores every published callable under its
//! dot-joined path, e.g. `fwupdate.debug.enable`. Unpublished nodes are
//! neither listed nor resolvable, and nothing below an unpublished
//! namespace is reachable.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = MethodRegistry::new();
//! registry.insert_methods(
//!     MethodTree::new().namespace(
//!         "fwupdate",
//!         MethodTree::new()
//!             .method("state", MethodMeta::new().doc("Current state"), state)
//!             .private("reset", reset),
//!     ),
//! );
//!
//! assert!(registry.resolve("fwupdate.state").is_some());
//! assert!(registry.resolve("fwupdate.reset").is_none());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Context, Handler, HandlerResult, Request, Response, TypedHandler};
use crate::acl::Gate;

/// Names starting with this marker are metadata, never dispatch targets.
pub const RESERVED_MARKER: char = '_';

fn is_false(v: &bool) -> bool {
    !*v
}

/// Published metadata of one method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    /// Public methods bypass the access-control gate.
    #[serde(default, skip_serializing_if = "is_false")]
    pub public: bool,
    /// Opaque acl data handed to the gate.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub acl: Value,
    /// Requests accept inbound `push`/`sig` data.
    #[serde(default, skip_serializing_if = "is_false")]
    pub stream: bool,
    /// Published leaf name, overriding the key the method was defined under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MethodMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn public(mut self) -> Self {
        self.public = true;
        self
    }

    pub fn acl(mut self, acl: Value) -> Self {
        self.acl = acl;
        self
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Extra published field.
    pub fn field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Metadata as published by the `methods` operation.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

enum Node {
    Method {
        meta: Option<MethodMeta>,
        handler: Arc<dyn Handler>,
    },
    Namespace {
        published: bool,
        tree: MethodTree,
    },
}

/// Nested method definitions.
#[derive(Default)]
pub struct MethodTree {
    nodes: Vec<(String, Node)>,
}

impl MethodTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Published method.
    pub fn method<F, Fut>(self, name: impl Into<String>, meta: MethodMeta, f: F) -> Self
    where
        F: Fn(Request, Response, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handler(name, meta, Arc::new(f))
    }

    /// Published method whose positional args are decoded into `T`.
    pub fn typed_method<F, T, Fut>(self, name: impl Into<String>, meta: MethodMeta, f: F) -> Self
    where
        F: Fn(T, Response, Context) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handler(name, meta, Arc::new(TypedHandler::new(f)))
    }

    /// Published method from an existing handler object.
    pub fn handler(mut self, name: impl Into<String>, meta: MethodMeta, handler: Arc<dyn Handler>) -> Self {
        self.nodes.push((
            name.into(),
            Node::Method {
                meta: Some(meta),
                handler,
            },
        ));
        self
    }

    /// Callable kept in the tree but never published.
    pub fn private<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Request, Response, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.nodes.push((
            name.into(),
            Node::Method {
                meta: None,
                handler: Arc::new(f),
            },
        ));
        self
    }

    /// Published namespace.
    pub fn namespace(mut self, name: impl Into<String>, tree: MethodTree) -> Self {
        self.nodes.push((
            name.into(),
            Node::Namespace {
                published: true,
                tree,
            },
        ));
        self
    }

    /// Namespace that is not published; nothing below it is reachable.
    pub fn private_namespace(mut self, name: impl Into<String>, tree: MethodTree) -> Self {
        self.nodes.push((
            name.into(),
            Node::Namespace {
                published: false,
                tree,
            },
        ));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Entry for a registered method.
pub struct MethodEntry {
    name: String,
    handler: Arc<dyn Handler>,
    meta: MethodMeta,
}

impl MethodEntry {
    /// Full dot-joined name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meta(&self) -> &MethodMeta {
        &self.meta
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }
}

impl fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodEntry")
            .field("name", &self.name)
            .field("meta", &self.meta)
            .finish()
    }
}

/// Flat dispatch table keyed by dot-joined operation name.
#[derive(Clone, Default)]
pub struct MethodRegistry {
    entries: HashMap<String, Arc<MethodEntry>>,
    /// Operation names in first-registration order.
    order: Vec<String>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a definition tree at the root. Colliding names are replaced.
    pub fn insert_methods(&mut self, tree: MethodTree) {
        self.add_tree("", tree);
    }

    /// Merge a definition tree under `path`.
    pub fn register_namespace(&mut self, path: &str, tree: MethodTree) {
        self.add_tree(path, tree);
    }

    /// Register one method at a full dot-joined path.
    pub fn register_method<F, Fut>(&mut self, path: &str, meta: MethodMeta, f: F)
    where
        F: Fn(Request, Response, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        match path.rsplit_once('.') {
            Some((prefix, leaf)) => {
                self.add_tree(prefix, MethodTree::new().method(leaf, meta, f));
            }
            None => self.add_tree("", MethodTree::new().method(path, meta, f)),
        }
    }

    fn add_tree(&mut self, path: &str, tree: MethodTree) {
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{path}.")
        };

        for (key, node) in tree.nodes {
            if key.is_empty() || key.starts_with(RESERVED_MARKER) {
                tracing::warn!(path, key = %key, "skipping reserved method name");
                continue;
            }

            match node {
                Node::Method {
                    meta: Some(meta),
                    handler,
                } => {
                    let leaf = meta.name.clone().unwrap_or_else(|| key.clone());
                    let full = format!("{prefix}{leaf}");
                    self.insert_entry(full, meta, handler);
                }
                Node::Method { meta: None, .. } => {
                    tracing::debug!(path, key = %key, "method not published");
                }
                Node::Namespace {
                    published: true,
                    tree,
                } => {
                    self.add_tree(&format!("{prefix}{key}"), tree);
                }
                Node::Namespace {
                    published: false, ..
                } => {
                    tracing::debug!(path, key = %key, "namespace not published");
                }
            }
        }
    }

    fn insert_entry(&mut self, name: String, meta: MethodMeta, handler: Arc<dyn Handler>) {
        let entry = Arc::new(MethodEntry {
            name: name.clone(),
            handler,
            meta,
        });

        if self.entries.insert(name.clone(), entry).is_none() {
            self.order.push(name);
        }
    }

    /// Look up an operation.
    pub fn resolve(&self, op: &str) -> Option<Arc<MethodEntry>> {
        self.entries.get(op).cloned()
    }

    pub fn metadata(&self, op: &str) -> Option<&MethodMeta> {
        self.entries.get(op).map(|e| &e.meta)
    }

    /// Registered operation names in registration order.
    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Published metadata of every operation the gate lets `ctx` see.
    ///
    /// Candidates are checked one at a time, starting from the most
    /// recently registered. A gate error or a denial omits the candidate.
    pub async fn list_visible(&self, gate: Option<&Gate>, ctx: &Context) -> Map<String, Value> {
        let mut result = Map::new();

        let Some(gate) = gate else {
            for op in &self.order {
                if let Some(entry) = self.entries.get(op) {
                    result.insert(op.clone(), entry.meta.to_value());
                }
            }
            return result;
        };

        let mut candidates: Vec<Arc<MethodEntry>> = self
            .order
            .iter()
            .filter_map(|op| self.entries.get(op).cloned())
            .collect();

        while let Some(entry) = candidates.pop() {
            match gate.check(&entry.name, &entry.meta.acl, ctx).await {
                Ok(decision) if decision.allowed => {
                    result.insert(entry.name.clone(), entry.meta.to_value());
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(op = %entry.name, error = %e, "gate failed while listing");
                }
            }
        }

        result
    }
}

impl fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("operations", &self.order)
            .finish()
    }
}

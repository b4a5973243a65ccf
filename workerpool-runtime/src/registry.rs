//! The name-keyed method table a worker serves requests from.
//!
//! There is no dynamic dispatch via shipping a function's source text for
//! the worker to evaluate at runtime — Rust has no safe way to evaluate
//! arbitrary source in a compiled binary, so `exec` is name-keyed only,
//! resolved entirely through this registry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use workerpool_core::{PoolError, TERMINATE_METHOD, WorkerOutcome};

use crate::context::WorkerContext;

pub type BoxedHandler =
    Arc<dyn Fn(Vec<Value>, WorkerContext) -> BoxFuture<'static, Result<WorkerOutcome, PoolError>> + Send + Sync>;

/// Name-keyed table of methods a worker can execute.
#[derive(Clone, Default)]
pub struct MethodRegistry {
    methods: HashMap<String, BoxedHandler>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a method under `name`. Panics if `name` collides with the
    /// reserved termination literal — that control message is now carried
    /// by a dedicated frame kind rather than a method name, but the literal
    /// stays reserved so a worker can't shadow it.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(Vec<Value>, WorkerContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<WorkerOutcome, PoolError>> + Send + 'static,
    {
        let name = name.into();
        assert_ne!(
            name, TERMINATE_METHOD,
            "method name {TERMINATE_METHOD:?} is reserved for worker termination"
        );
        self.methods
            .insert(name, Arc::new(move |params, ctx| Box::pin(handler(params, ctx))));
    }

    pub fn get(&self, name: &str) -> Option<BoxedHandler> {
        self.methods.get(name).cloned()
    }

    /// The registered method names, sorted. Used by
    /// [`crate::runtime::WorkerBuilder::build`] to seed the `methods`
    /// built-in.
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_and_lookup() {
        let mut registry = MethodRegistry::new();
        registry.register("ping", |_params, _ctx| async { Ok(WorkerOutcome::Plain(Value::from("pong"))) });

        let handler = registry.get("ping").expect("registered");
        let result = handler(vec![], WorkerContext).await.unwrap();
        match result {
            WorkerOutcome::Plain(value) => assert_eq!(value, Value::from("pong")),
            _ => panic!("expected plain outcome"),
        }
    }

    #[test]
    fn unknown_method_returns_none() {
        let registry = MethodRegistry::new();
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn method_names_sorted() {
        let mut registry = MethodRegistry::new();
        registry.register("zeta", |_p, _c| async { Ok(WorkerOutcome::Plain(Value::Null)) });
        registry.register("alpha", |_p, _c| async { Ok(WorkerOutcome::Plain(Value::Null)) });
        assert_eq!(registry.method_names(), vec!["alpha", "zeta"]);
    }

    #[test]
    #[should_panic(expected = "reserved")]
    fn registering_reserved_terminate_name_panics() {
        let mut registry = MethodRegistry::new();
        registry.register(TERMINATE_METHOD, |_p, _c| async {
            Ok(WorkerOutcome::Plain(Value::Null))
        });
    }
}

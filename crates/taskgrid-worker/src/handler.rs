//! Handler registry: maps task types to the code that processes them.
//!
//! Handlers are supplied by the surrounding application. They read the
//! payload and return a result or an error; they must not touch engine
//! state.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use taskgrid_core::{HandlerError, TaskType};

/// Processes the payload of one task type.
///
/// Called on a blocking thread, so CPU-bound or blocking work is fine.
pub trait TaskHandler: Send + Sync + 'static {
    fn handle(&self, payload: &Value) -> Result<Value, HandlerError>;
}

impl<F> TaskHandler for F
where
    F: Fn(&Value) -> Result<Value, HandlerError> + Send + Sync + 'static,
{
    fn handle(&self, payload: &Value) -> Result<Value, HandlerError> {
        self(payload)
    }
}

/// Type-indexed handler table.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for a task type.
    pub fn register(&mut self, task_type: TaskType, handler: impl TaskHandler) {
        debug!(%task_type, "handler registered");
        self.handlers.insert(task_type, Arc::new(handler));
    }

    /// Register a closure; its signature is inferred from this bound.
    pub fn register_fn<F>(&mut self, task_type: TaskType, f: F)
    where
        F: Fn(&Value) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.register(task_type, f);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, task_type: TaskType, handler: impl TaskHandler) -> Self {
        self.register(task_type, handler);
        self
    }

    /// Builder form of [`register_fn`](Self::register_fn).
    pub fn with_fn<F>(mut self, task_type: TaskType, f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.register_fn(task_type, f);
        self
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&task_type).cloned()
    }

    pub fn supports(&self, task_type: TaskType) -> bool {
        self.handlers.contains_key(&task_type)
    }

    /// Registered task types.
    pub fn task_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.handlers.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("task_types", &self.task_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    impl TaskHandler for Echo {
        fn handle(&self, payload: &Value) -> Result<Value, HandlerError> {
            Ok(payload.clone())
        }
    }

    #[test]
    fn registry_starts_empty() {
        let registry = HandlerRegistry::new();
        assert!(registry.task_types().is_empty());
        assert!(!registry.supports(TaskType::SlideValidation));
        assert!(registry.get(TaskType::SlideValidation).is_none());
    }

    #[test]
    fn closures_and_structs_register() {
        let registry = HandlerRegistry::new()
            .with(TaskType::SlideValidation, Echo)
            .with_fn(TaskType::AutoCorrection, |_| Ok(json!({"fixed": true})));

        assert!(registry.supports(TaskType::SlideValidation));
        assert!(registry.supports(TaskType::AutoCorrection));
        assert_eq!(registry.task_types().len(), 2);

        let echo = registry.get(TaskType::SlideValidation).unwrap();
        assert_eq!(echo.handle(&json!({"a": 1})).unwrap(), json!({"a": 1}));

        let fix = registry.get(TaskType::AutoCorrection).unwrap();
        assert_eq!(fix.handle(&Value::Null).unwrap(), json!({"fixed": true}));
    }

    #[test]
    fn register_replaces_existing() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn(TaskType::ImageExtraction, |_| Ok(json!(1)));
        registry.register_fn(TaskType::ImageExtraction, |_| Ok(json!(2)));
        let h = registry.get(TaskType::ImageExtraction).unwrap();
        assert_eq!(h.handle(&Value::Null).unwrap(), json!(2));
    }
}

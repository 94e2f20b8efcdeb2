//! Job handler trait and registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::types::job::Job;
use crate::{AcceptError, AcceptResult};

/// Something a job can name and a worker can execute.
///
/// Handlers are looked up by name, so a job serialized on one host can be
/// executed by a worker process on another. Everything a handler needs
/// must travel in the arguments.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Name jobs use to refer to this handler.
    fn name(&self) -> &str;

    /// Executes the job and returns its JSON-encoded result.
    async fn execute(&self, job: &Job) -> AcceptResult<Value>;
}

/// Maps handler names to handlers.
#[derive(Clone, Default)]
pub struct JobRegistry {
    handlers: BTreeMap<String, Arc<dyn JobHandler>>,
}

impl JobRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the build and run handlers.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::build::BuildHandler));
        registry.register(Arc::new(super::run::RunHandler));
        registry
    }

    /// Adds a handler, replacing any handler with the same name.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    /// Looks a handler up by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Registered handler names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Runs a job in the current task.
    pub async fn execute(&self, job: &Job) -> AcceptResult<Value> {
        let handler = self
            .get(&job.function)
            .ok_or_else(|| AcceptError::UnknownJob(job.function.clone()))?;
        handler.execute(job).await
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.handlers.keys()).finish()
    }
}

/// Last `lines` lines of a command's output, for error messages.
pub(crate) fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

/// Maps a failure to launch `program` to a user-facing error.
pub(crate) fn launch_error(program: &str, err: std::io::Error) -> AcceptError {
    if err.kind() == std::io::ErrorKind::NotFound {
        AcceptError::user(format!("'{program}' not found; is it installed and on PATH?"))
    } else {
        AcceptError::user(format!("failed to launch '{program}': {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl JobHandler for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn execute(&self, job: &Job) -> AcceptResult<Value> {
            Ok(job.args.clone())
        }
    }

    #[tokio::test]
    async fn test_registry_dispatches_by_name() {
        let mut registry = JobRegistry::new();
        registry.register(Arc::new(Echo));

        let job = Job::new("echo", &json!({"x": 1})).unwrap();
        assert_eq!(registry.execute(&job).await.unwrap(), json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_unknown_handler() {
        let registry = JobRegistry::new();
        let job = Job::new("missing", &json!({})).unwrap();

        let err = registry.execute(&job).await.unwrap_err();
        assert!(matches!(err, AcceptError::UnknownJob(name) if name == "missing"));
    }

    #[test]
    fn test_standard_registry() {
        let registry = JobRegistry::standard();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec!["build", "run"]);
    }

    #[test]
    fn test_tail() {
        assert_eq!(tail("a\nb\nc", 2), "b\nc");
        assert_eq!(tail("a", 5), "a");
        assert_eq!(tail("", 5), "");
    }

    #[test]
    fn test_launch_error_not_found_is_user_facing() {
        let err = launch_error("make", std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(err.is_user_facing());
        assert!(err.to_string().contains("make"));
    }
}

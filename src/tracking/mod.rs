pub mod logger;
mod mlflow;

pub use mlflow::MlflowSink;

use anyhow::Result;
use async_trait::async_trait;

/// Everything recorded about one pipeline run: key/value parameters, scalar
/// metrics, and named text artifacts, grouped under a run name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunDraft {
    pub name: String,
    pub params: Vec<(String, String)>,
    pub metrics: Vec<(String, f64)>,
    pub artifacts: Vec<(String, String)>,
}

impl RunDraft {
    pub fn builder(name: impl Into<String>) -> RunDraftBuilder {
        RunDraftBuilder {
            draft: RunDraft {
                name: name.into(),
                ..Default::default()
            },
        }
    }
}

/// Fluent accumulation of a [`RunDraft`].
#[derive(Debug, Default)]
pub struct RunDraftBuilder {
    draft: RunDraft,
}

impl RunDraftBuilder {
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.draft.params.push((key.into(), value.into()));
        self
    }

    pub fn metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.draft.metrics.push((key.into(), value));
        self
    }

    pub fn artifact(mut self, path: impl Into<String>, contents: impl Into<String>) -> Self {
        self.draft.artifacts.push((path.into(), contents.into()));
        self
    }

    pub fn build(self) -> RunDraft {
        self.draft
    }
}

/// The experiment-tracking capability. Strictly best-effort: callers log
/// and swallow every error, a sink failure never affects a pipeline run.
#[async_trait]
pub trait RunSink: Send + Sync {
    /// Record a draft under a new run and return the sink's run id.
    async fn record(&self, draft: &RunDraft) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates_in_order() {
        let draft = RunDraft::builder("rag-test")
            .param("query", "What are best practices for caching?")
            .param("retrieved_count", "3")
            .metric("avg_retrieval_score", 0.78)
            .artifact("initial_answer.txt", "Use TTLs. [KB001]")
            .build();
        assert_eq!(draft.name, "rag-test");
        assert_eq!(draft.params[0].0, "query");
        assert_eq!(draft.params[1], ("retrieved_count".to_owned(), "3".to_owned()));
        assert_eq!(draft.metrics.len(), 1);
        assert_eq!(draft.artifacts[0].0, "initial_answer.txt");
    }
}

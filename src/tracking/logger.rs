use log::{info, warn};
use uuid::Uuid;

use super::{RunDraft, RunSink};
use crate::{pipeline::RunReport, value::RetrievedDocument};

const PIPELINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Aggregate figures for one battery of queries, logged as a standalone
/// summary run after the battery completes.
#[derive(Clone, Debug, PartialEq)]
pub struct ExperimentSummary {
    pub total_queries: usize,
    pub successful_runs: usize,
    pub refinement_rate: f64,
    pub avg_retrieval_score: f64,
}

/// Number of `[doc_id]` citation markers in `answer`, counted over the ids
/// the run actually retrieved.
pub fn count_citations(answer: &str, docs: &[RetrievedDocument]) -> usize {
    docs.iter()
        .map(|doc| answer.matches(&format!("[{}]", doc.id)).count())
        .sum()
}

/// Turn a finished run into the draft recorded against the sink: the run's
/// inputs as params, derived figures as metrics, and the full texts as
/// artifacts.
pub fn run_draft(report: &RunReport) -> RunDraft {
    let mut builder = RunDraft::builder(format!("rag-{}", Uuid::new_v4()))
        .param("query", &report.query)
        .param("retrieved_count", report.retrieved_docs.len().to_string())
        .param("refinement_needed", report.refinement_needed.to_string())
        .param("critique_result", report.critique.to_string())
        .param("pipeline_version", PIPELINE_VERSION);

    let scores: Vec<f64> = report.retrieved_docs.iter().map(|d| d.score).collect();
    if !scores.is_empty() {
        let sum: f64 = scores.iter().sum();
        builder = builder
            .metric("avg_retrieval_score", sum / scores.len() as f64)
            .metric("max_retrieval_score", scores.iter().cloned().fold(f64::MIN, f64::max))
            .metric("min_retrieval_score", scores.iter().cloned().fold(f64::MAX, f64::min));
    }

    builder = builder
        .metric("initial_answer_length", report.initial_answer.len() as f64)
        .metric(
            "initial_answer_citations",
            count_citations(&report.initial_answer, &report.retrieved_docs) as f64,
        );
    if report.refinement_needed {
        builder = builder
            .metric("refined_answer_length", report.refined_answer.len() as f64)
            .metric(
                "refined_answer_citations",
                count_citations(&report.refined_answer, &report.retrieved_docs) as f64,
            );
    }

    let doc_summaries: Vec<serde_json::Value> = report
        .retrieved_docs
        .iter()
        .map(|doc| {
            serde_json::json!({
                "doc_id": doc.id,
                "score": doc.score,
                "question": doc.metadata.question,
                "source": doc.metadata.source,
                "confidence": doc.metadata.confidence_indicator,
                "last_updated": doc.metadata.last_updated,
            })
        })
        .collect();
    let decision_summary = serde_json::json!({
        "query": report.query,
        "retrieved_count": report.retrieved_docs.len(),
        "critique_result": report.critique.to_string(),
        "refinement_needed": report.refinement_needed,
        "final_answer_length": report.final_answer.len(),
    });

    builder = builder
        .artifact("retrieved_docs.json", pretty(&serde_json::Value::Array(doc_summaries)))
        .artifact("initial_answer.txt", &report.initial_answer);
    if report.refinement_needed {
        builder = builder.artifact("refined_answer.txt", &report.refined_answer);
    }
    builder
        .artifact("final_answer.txt", &report.final_answer)
        .artifact("decision_summary.json", pretty(&decision_summary))
        .build()
}

pub fn summary_draft(summary: &ExperimentSummary) -> RunDraft {
    let success_rate = if summary.total_queries == 0 {
        0.0
    } else {
        summary.successful_runs as f64 / summary.total_queries as f64 * 100.0
    };
    let body = serde_json::json!({
        "total_queries": summary.total_queries,
        "successful_runs": summary.successful_runs,
        "success_rate": success_rate,
        "refinement_rate": summary.refinement_rate,
        "avg_retrieval_score": summary.avg_retrieval_score,
    });
    RunDraft::builder("experiment-summary")
        .param("experiment_type", "agentic_rag_evaluation")
        .param("total_queries", summary.total_queries.to_string())
        .param("successful_runs", summary.successful_runs.to_string())
        .metric("success_rate", success_rate)
        .metric("refinement_rate", summary.refinement_rate)
        .metric("avg_retrieval_score", summary.avg_retrieval_score)
        .artifact("experiment_summary.json", pretty(&body))
        .build()
}

/// Record one run, best-effort. Returns the sink run id when the sink
/// accepted it; a sink failure is logged and swallowed.
pub async fn log_run(sink: &dyn RunSink, report: &RunReport) -> Option<String> {
    match sink.record(&run_draft(report)).await {
        Ok(run_id) => {
            info!("run logged to tracking sink as {run_id}");
            Some(run_id)
        }
        Err(e) => {
            warn!("failed to log run to tracking sink: {e:#}");
            None
        }
    }
}

/// Record the battery summary, best-effort.
pub async fn log_summary(sink: &dyn RunSink, summary: &ExperimentSummary) -> Option<String> {
    match sink.record(&summary_draft(summary)).await {
        Ok(run_id) => {
            info!("experiment summary logged as {run_id}");
            Some(run_id)
        }
        Err(e) => {
            warn!("failed to log experiment summary: {e:#}");
            None
        }
    }
}

fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pipeline::CritiqueVerdict,
        testing::FakeSink,
        value::{Confidence, DocMetadata, RetrievedDocument},
    };

    fn doc(id: &str, score: f64) -> RetrievedDocument {
        RetrievedDocument {
            id: id.to_owned(),
            score,
            metadata: DocMetadata {
                question: format!("question for {id}"),
                answer_snippet: format!("snippet for {id}"),
                source: "guide.md".to_owned(),
                confidence_indicator: Confidence::High,
                last_updated: "2024-01-10".to_owned(),
            },
        }
    }

    fn report() -> RunReport {
        RunReport {
            query: "What are best practices for caching?".to_owned(),
            retrieved_docs: vec![doc("KB001", 0.9), doc("KB002", 0.6)],
            initial_answer: "Use TTLs [KB001] and invalidate explicitly [KB001] [KB002].".to_owned(),
            critique: CritiqueVerdict::Complete,
            refinement_needed: false,
            refined_answer: "Use TTLs [KB001] and invalidate explicitly [KB001] [KB002].".to_owned(),
            final_answer: "Use TTLs [KB001] and invalidate explicitly [KB001] [KB002].".to_owned(),
            error: None,
        }
    }

    #[test]
    fn citations_count_only_retrieved_ids() {
        let docs = vec![doc("KB001", 0.9), doc("KB002", 0.6)];
        let answer = "See [KB001], also [KB001] and [KB002]; ignore [KB999].";
        assert_eq!(count_citations(answer, &docs), 3);
    }

    #[test]
    fn citations_are_zero_without_markers() {
        let docs = vec![doc("KB001", 0.9)];
        assert_eq!(count_citations("no markers here", &docs), 0);
    }

    #[test]
    fn run_draft_carries_params_metrics_and_artifacts() {
        let draft = run_draft(&report());
        assert!(draft.name.starts_with("rag-"));

        let param = |key: &str| {
            draft
                .params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(param("retrieved_count").unwrap(), "2");
        assert_eq!(param("critique_result").unwrap(), "COMPLETE");
        assert_eq!(param("refinement_needed").unwrap(), "false");

        let metric = |key: &str| {
            draft
                .metrics
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| *v)
        };
        assert!((metric("avg_retrieval_score").unwrap() - 0.75).abs() < 1e-9);
        assert!((metric("max_retrieval_score").unwrap() - 0.9).abs() < 1e-9);
        assert!((metric("min_retrieval_score").unwrap() - 0.6).abs() < 1e-9);
        assert!((metric("initial_answer_citations").unwrap() - 3.0).abs() < 1e-9);
        // No refinement happened, so no refined-answer figures.
        assert!(metric("refined_answer_length").is_none());

        let artifact_names: Vec<&str> =
            draft.artifacts.iter().map(|(path, _)| path.as_str()).collect();
        assert_eq!(
            artifact_names,
            vec!["retrieved_docs.json", "initial_answer.txt", "final_answer.txt", "decision_summary.json"],
        );
    }

    #[test]
    fn refined_runs_log_the_refined_answer() {
        let mut r = report();
        r.refinement_needed = true;
        r.critique = CritiqueVerdict::Refine;
        r.refined_answer = "A longer answer [KB001].".to_owned();
        let draft = run_draft(&r);
        assert!(draft.metrics.iter().any(|(k, _)| k == "refined_answer_length"));
        assert!(draft.artifacts.iter().any(|(p, _)| p == "refined_answer.txt"));
    }

    #[tokio::test]
    async fn sink_failures_are_swallowed() {
        let sink = FakeSink::failing();
        assert!(log_run(&sink, &report()).await.is_none());
        assert!(
            log_summary(
                &sink,
                &ExperimentSummary {
                    total_queries: 1,
                    successful_runs: 1,
                    refinement_rate: 0.0,
                    avg_retrieval_score: 0.9,
                },
            )
            .await
            .is_none()
        );
    }

    #[tokio::test]
    async fn successful_logging_returns_the_sink_run_id() {
        let sink = FakeSink::new();
        let run_id = log_run(&sink, &report()).await;
        assert_eq!(run_id.as_deref(), Some("fake-run-1"));
        assert_eq!(sink.recorded().len(), 1);
    }

    #[test]
    fn summary_draft_derives_success_rate() {
        let draft = summary_draft(&ExperimentSummary {
            total_queries: 5,
            successful_runs: 4,
            refinement_rate: 20.0,
            avg_retrieval_score: 0.78,
        });
        assert_eq!(draft.name, "experiment-summary");
        let (_, success_rate) = draft
            .metrics
            .iter()
            .find(|(k, _)| k == "success_rate")
            .unwrap();
        assert!((success_rate - 80.0).abs() < 1e-9);
    }
}

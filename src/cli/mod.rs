use anyhow::Result;
use clap::Parser;
use log::warn;

use crate::{
    clients,
    config::Config,
    kb,
    pipeline::{Pipeline, RunReport},
    tracking::{
        MlflowSink,
        logger::{self, ExperimentSummary, count_citations},
    },
    utils::preview,
};

/// The fixed battery run when no query is given.
pub const SAMPLE_QUERIES: [&str; 5] = [
    "What are best practices for caching?",
    "How should I set up CI/CD pipelines?",
    "What are performance tuning tips?",
    "How do I version my APIs?",
    "What should I consider for error handling?",
];

#[derive(Debug, Parser)]
#[command(
    name = "ragloop",
    version,
    about = "Self-critiquing RAG pipeline over a vector knowledge base"
)]
pub struct Cli {
    /// Question to answer; the built-in sample battery runs when omitted.
    pub query: Option<String>,
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::from_env()?;
    let entries = kb::load_kb(&config.kb_path)?;

    let clients = clients::connect(&config).await?;
    clients.ensure_populated(&entries).await?;

    let sink = match MlflowSink::new(&config.tracking_uri) {
        Ok(sink) => Some(sink),
        Err(e) => {
            warn!("tracking disabled: {e:#}");
            None
        }
    };
    let pipeline = Pipeline::new(clients);

    match cli.query {
        Some(query) => {
            let report = pipeline.run(&query).await;
            let run_id = maybe_log(sink.as_ref(), &report).await;
            print_report(&report, run_id.as_deref());
        }
        None => {
            let mut reports = Vec::with_capacity(SAMPLE_QUERIES.len());
            for (i, query) in SAMPLE_QUERIES.iter().enumerate() {
                println!("Query {}/{}: {query}", i + 1, SAMPLE_QUERIES.len());
                let report = pipeline.run(query).await;
                let run_id = maybe_log(sink.as_ref(), &report).await;
                print_report(&report, run_id.as_deref());
                reports.push(report);
                if i + 1 < SAMPLE_QUERIES.len() {
                    println!("{}", "-".repeat(70));
                }
            }

            let stats = analyze(&reports);
            print_analysis(&stats);
            if let Some(sink) = sink.as_ref() {
                logger::log_summary(sink, &stats.summary).await;
            }
        }
    }
    Ok(())
}

/// Forward a finished run to the sink; error reports are not logged, and a
/// missing or failing sink never affects the outcome.
async fn maybe_log(sink: Option<&MlflowSink>, report: &RunReport) -> Option<String> {
    match sink {
        Some(sink) if report.error.is_none() => logger::log_run(sink, report).await,
        _ => None,
    }
}

fn print_report(report: &RunReport, run_id: Option<&str>) {
    if let Some(error) = &report.error {
        println!("Error: {error}");
        println!("Answer: {}", report.final_answer);
        return;
    }
    println!("Retrieved docs: {}", report.retrieved_docs.len());
    if !report.retrieved_docs.is_empty() {
        println!(
            "Critique: {} (refinement: {})",
            report.critique, report.refinement_needed
        );
    }
    println!("Answer: {}", preview(&report.final_answer, 200));
    if let Some(run_id) = run_id {
        println!("Tracking run: {run_id}");
    }
}

pub(crate) struct BatteryStats {
    pub summary: ExperimentSummary,
    pub avg_citations: Option<f64>,
}

pub(crate) fn analyze(reports: &[RunReport]) -> BatteryStats {
    let total = reports.len();
    let successful: Vec<&RunReport> = reports.iter().filter(|r| r.error.is_none()).collect();
    let refinements = reports.iter().filter(|r| r.refinement_needed).count();

    let run_scores: Vec<f64> = successful
        .iter()
        .filter(|r| !r.retrieved_docs.is_empty())
        .map(|r| {
            r.retrieved_docs.iter().map(|d| d.score).sum::<f64>() / r.retrieved_docs.len() as f64
        })
        .collect();
    let avg_retrieval_score = if run_scores.is_empty() {
        0.0
    } else {
        run_scores.iter().sum::<f64>() / run_scores.len() as f64
    };

    let citations: Vec<f64> = successful
        .iter()
        .map(|r| count_citations(&r.final_answer, &r.retrieved_docs) as f64)
        .collect();
    let avg_citations = if citations.is_empty() {
        None
    } else {
        Some(citations.iter().sum::<f64>() / citations.len() as f64)
    };

    BatteryStats {
        summary: ExperimentSummary {
            total_queries: total,
            successful_runs: successful.len(),
            refinement_rate: if total == 0 {
                0.0
            } else {
                refinements as f64 / total as f64 * 100.0
            },
            avg_retrieval_score,
        },
        avg_citations,
    }
}

fn print_analysis(stats: &BatteryStats) {
    let s = &stats.summary;
    let success_rate = if s.total_queries == 0 {
        0.0
    } else {
        s.successful_runs as f64 / s.total_queries as f64 * 100.0
    };
    println!("{}", "=".repeat(70));
    println!("Queries: {} ({} successful, {success_rate:.1}% success rate)", s.total_queries, s.successful_runs);
    println!("Refinement rate: {:.1}%", s.refinement_rate);
    println!("Average retrieval score: {:.3}", s.avg_retrieval_score);
    if let Some(avg) = stats.avg_citations {
        println!("Average citations per answer: {avg:.1}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pipeline::{CritiqueVerdict, NO_DOCS_ANSWER, RUN_FAILED_ANSWER},
        testing::doc,
    };

    fn answered(query: &str, refined: bool) -> RunReport {
        RunReport {
            query: query.to_owned(),
            retrieved_docs: vec![doc("KB001", 0.8), doc("KB002", 0.6)],
            initial_answer: "Answer. [KB001]".to_owned(),
            critique: if refined {
                CritiqueVerdict::Refine
            } else {
                CritiqueVerdict::Complete
            },
            refinement_needed: refined,
            refined_answer: "Answer. [KB001] [KB002]".to_owned(),
            final_answer: "Answer. [KB001] [KB002]".to_owned(),
            error: None,
        }
    }

    fn no_docs(query: &str) -> RunReport {
        RunReport {
            query: query.to_owned(),
            retrieved_docs: Vec::new(),
            initial_answer: String::new(),
            critique: CritiqueVerdict::Complete,
            refinement_needed: false,
            refined_answer: String::new(),
            final_answer: NO_DOCS_ANSWER.to_owned(),
            error: None,
        }
    }

    fn failed(query: &str) -> RunReport {
        RunReport {
            query: query.to_owned(),
            retrieved_docs: Vec::new(),
            initial_answer: String::new(),
            critique: CritiqueVerdict::Complete,
            refinement_needed: false,
            refined_answer: String::new(),
            final_answer: RUN_FAILED_ANSWER.to_owned(),
            error: Some("boom".to_owned()),
        }
    }

    #[test]
    fn analyze_aggregates_the_battery() {
        let reports = vec![answered("q1", false), answered("q2", true), failed("q3")];
        let stats = analyze(&reports);

        assert_eq!(stats.summary.total_queries, 3);
        assert_eq!(stats.summary.successful_runs, 2);
        assert!((stats.summary.refinement_rate - 100.0 / 3.0).abs() < 1e-9);
        // Both successful runs average (0.8 + 0.6) / 2.
        assert!((stats.summary.avg_retrieval_score - 0.7).abs() < 1e-9);
        // Two citations in each successful final answer.
        assert_eq!(stats.avg_citations, Some(2.0));
    }

    #[test]
    fn no_docs_runs_count_as_successful_but_score_nothing() {
        let stats = analyze(&[no_docs("q1")]);
        assert_eq!(stats.summary.successful_runs, 1);
        assert_eq!(stats.summary.avg_retrieval_score, 0.0);
        assert_eq!(stats.avg_citations, Some(0.0));
    }

    #[test]
    fn empty_battery_divides_nothing() {
        let stats = analyze(&[]);
        assert_eq!(stats.summary.total_queries, 0);
        assert_eq!(stats.summary.refinement_rate, 0.0);
        assert!(stats.avg_citations.is_none());
    }
}

mod stages;

use anyhow::Result;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::{clients::ServiceClients, utils::preview, value::RetrievedDocument};

/// Answer used when retrieval comes back empty. A recognized terminal
/// outcome, not an error.
pub const NO_DOCS_ANSWER: &str =
    "I couldn't find relevant information to answer your question.";

/// Sentinel written by the generate stage when the model call fails.
pub const GENERATION_FAILED_ANSWER: &str = "Error: Could not generate answer.";

/// Answer carried by a run-level error report.
pub const RUN_FAILED_ANSWER: &str = "An error occurred while processing your question.";

/// The critique stage's verdict on the initial answer.
///
/// Defaults to `Complete`: an unparseable critique or a failed critique
/// call must not trigger an extra model call, so the failure direction is
/// "accept the answer as-is".
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum CritiqueVerdict {
    #[default]
    Complete,
    Refine,
}

/// Orchestrator states, in transition order. `NoDocs` is the only early
/// exit; `Refined`/`Skipped` are the two arms of the single branch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
enum Stage {
    Init,
    Retrieved,
    NoDocs,
    Answered,
    Critiqued,
    Refined,
    Skipped,
    Done,
}

/// Per-run state threaded through the stages. Every field is written
/// exactly once, by the stage that owns it; runs are strictly sequential so
/// plain single ownership is enough.
#[derive(Clone, Debug)]
pub struct PipelineRun {
    pub query: String,
    pub retrieved_docs: Vec<RetrievedDocument>,
    pub initial_answer: String,
    pub critique: CritiqueVerdict,
    pub refinement_needed: bool,
    pub refined_answer: String,
}

impl PipelineRun {
    fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            retrieved_docs: Vec::new(),
            initial_answer: String::new(),
            critique: CritiqueVerdict::default(),
            refinement_needed: false,
            refined_answer: String::new(),
        }
    }
}

/// What a finished run hands to callers and the run logger. `final_answer`
/// is always populated; `error` is set only when the orchestrator caught an
/// unexpected failure (the no-docs exit is not an error).
#[derive(Clone, Debug)]
pub struct RunReport {
    pub query: String,
    pub retrieved_docs: Vec<RetrievedDocument>,
    pub initial_answer: String,
    pub critique: CritiqueVerdict,
    pub refinement_needed: bool,
    pub refined_answer: String,
    pub final_answer: String,
    pub error: Option<String>,
}

impl RunReport {
    fn from_run(run: &PipelineRun) -> Self {
        Self {
            query: run.query.clone(),
            retrieved_docs: run.retrieved_docs.clone(),
            initial_answer: run.initial_answer.clone(),
            critique: run.critique,
            refinement_needed: run.refinement_needed,
            refined_answer: run.refined_answer.clone(),
            final_answer: run.refined_answer.clone(),
            error: None,
        }
    }

    fn no_docs(query: &str) -> Self {
        Self {
            query: query.to_owned(),
            retrieved_docs: Vec::new(),
            initial_answer: String::new(),
            critique: CritiqueVerdict::default(),
            refinement_needed: false,
            refined_answer: String::new(),
            final_answer: NO_DOCS_ANSWER.to_owned(),
            error: None,
        }
    }

    fn failed(query: &str, error: String) -> Self {
        Self {
            query: query.to_owned(),
            retrieved_docs: Vec::new(),
            initial_answer: String::new(),
            critique: CritiqueVerdict::default(),
            refinement_needed: false,
            refined_answer: String::new(),
            final_answer: RUN_FAILED_ANSWER.to_owned(),
            error: Some(error),
        }
    }
}

/// The four-stage answering pipeline: retrieve, generate, critique, and a
/// conditional refine pass with one extra snippet.
///
/// Each provider failure is absorbed at its stage (empty retrieval, answer
/// sentinel, fail-open critique, refine fallback); anything unexpected is
/// caught here at the boundary and turned into an error report, so callers
/// never see a raw error.
pub struct Pipeline {
    clients: ServiceClients,
}

impl Pipeline {
    pub fn new(clients: ServiceClients) -> Self {
        Self { clients }
    }

    pub async fn run(&self, query: &str) -> RunReport {
        info!("pipeline start: '{}'", preview(query, 60));
        let mut run = PipelineRun::new(query);
        match self.execute(&mut run).await {
            Ok(report) => report,
            Err(e) => {
                error!("pipeline failed for '{}': {e:#}", preview(query, 60));
                RunReport::failed(query, format!("{e:#}"))
            }
        }
    }

    async fn execute(&self, run: &mut PipelineRun) -> Result<RunReport> {
        debug!("state {}", Stage::Init);
        stages::retrieve(&self.clients, run).await?;
        if run.retrieved_docs.is_empty() {
            debug!("state {}", Stage::NoDocs);
            return Ok(RunReport::no_docs(&run.query));
        }
        debug!("state {}", Stage::Retrieved);

        stages::generate(&self.clients, run).await?;
        debug!("state {}", Stage::Answered);

        stages::critique(&self.clients, run).await?;
        debug!("state {}", Stage::Critiqued);

        if run.refinement_needed {
            stages::refine(&self.clients, run).await?;
            debug!("state {}", Stage::Refined);
        } else {
            run.refined_answer = run.initial_answer.clone();
            debug!("state {}", Stage::Skipped);
        }

        debug!("state {}", Stage::Done);
        Ok(RunReport::from_run(run))
    }
}

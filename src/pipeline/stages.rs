use std::collections::HashSet;

use anyhow::Result;
use dedent::dedent;
use log::{debug, info, warn};

use super::{CritiqueVerdict, GENERATION_FAILED_ANSWER, PipelineRun};
use crate::{clients::ServiceClients, utils::preview, value::RetrievedDocument};

const RETRIEVE_TOP_K: usize = 5;
const REFINE_TOP_K: usize = 6;

/// Both generation calls run at temperature 0 for determinism.
const TEMPERATURE: f64 = 0.0;

const ANSWER_SYSTEM_PROMPT: &str = dedent!(
    r#"
    You are a helpful assistant that answers questions using provided knowledge base snippets.
    Always cite sources by repeating the [doc id] marker of every snippet you draw from.
    Ground your answer only in the given context.
    "#
);

const CRITIQUE_SYSTEM_PROMPT: &str =
    "You are an objective critique assistant. Evaluate answers for completeness and accuracy.";

const REFINE_SYSTEM_PROMPT: &str = dedent!(
    r#"
    You are a helpful assistant that answers questions using provided knowledge base snippets.
    Always cite sources by repeating the [doc id] marker of every snippet you draw from.
    Ground your answer only in the given context.
    This is a refinement pass: the final answer must address the question completely.
    "#
);

pub(super) async fn retrieve(clients: &ServiceClients, run: &mut PipelineRun) -> Result<()> {
    info!("retrieve: searching for '{}'", preview(&run.query, 50));
    run.retrieved_docs = clients.search(&run.query, RETRIEVE_TOP_K).await;
    for doc in &run.retrieved_docs {
        debug!(
            "  {}: {:.4} - {}",
            doc.id,
            doc.score,
            preview(&doc.metadata.question, 50)
        );
    }
    info!("retrieve: {} documents", run.retrieved_docs.len());
    Ok(())
}

pub(super) async fn generate(clients: &ServiceClients, run: &mut PipelineRun) -> Result<()> {
    let context = context_block(&run.retrieved_docs);
    let user_prompt = format!(
        "Knowledge Base Context:\n{context}\n\nQuestion: {}\n\n\
         Provide a comprehensive answer with [doc id] citations.",
        run.query
    );
    match clients.chat(ANSWER_SYSTEM_PROMPT, &user_prompt, TEMPERATURE).await {
        Ok(answer) => {
            info!("generate: answer of {} chars", answer.len());
            debug!("generate: {}", preview(&answer, 150));
            run.initial_answer = answer;
        }
        Err(e) => {
            warn!("generate failed: {e:#}");
            run.initial_answer = GENERATION_FAILED_ANSWER.to_owned();
        }
    }
    Ok(())
}

pub(super) async fn critique(clients: &ServiceClients, run: &mut PipelineRun) -> Result<()> {
    let user_prompt = format!(
        "Evaluate whether this answer is COMPLETE or needs REFINEMENT:\n\n\
         Question: {}\n\n\
         Answer: {}\n\n\
         Respond with ONLY one word:\n\
         - \"COMPLETE\" if the answer fully addresses the question\n\
         - \"REFINE\" if it needs additional information\n\n\
         Verdict:",
        run.query, run.initial_answer
    );
    run.critique = match clients
        .chat(CRITIQUE_SYSTEM_PROMPT, &user_prompt, TEMPERATURE)
        .await
    {
        Ok(raw) => parse_verdict(&raw),
        Err(e) => {
            warn!("critique failed, keeping the answer as-is: {e:#}");
            CritiqueVerdict::Complete
        }
    };
    run.refinement_needed = run.critique == CritiqueVerdict::Refine;
    info!("critique: {} (refinement {})", run.critique, run.refinement_needed);
    Ok(())
}

pub(super) async fn refine(clients: &ServiceClients, run: &mut PipelineRun) -> Result<()> {
    let candidates = clients.search(&run.query, REFINE_TOP_K).await;
    let seen: HashSet<&str> = run.retrieved_docs.iter().map(|d| d.id.as_str()).collect();
    // First unseen candidate wins; the provider's ranking is the tie-break.
    let new_doc = candidates.into_iter().find(|c| !seen.contains(c.id.as_str()));

    let Some(new_doc) = new_doc else {
        info!("refine: no new snippet available, keeping the initial answer");
        run.refined_answer = run.initial_answer.clone();
        return Ok(());
    };
    info!("refine: adding snippet {}", new_doc.id);

    let mut docs = run.retrieved_docs.clone();
    docs.push(new_doc);
    let context = context_block(&docs);
    let user_prompt = format!(
        "Enhanced Knowledge Base Context:\n{context}\n\n\
         Original Question: {}\n\n\
         Original Answer: {}\n\n\
         Provide a COMPLETE and more thorough answer using all available snippets, \
         with [doc id] citations.",
        run.query, run.initial_answer
    );
    match clients.chat(REFINE_SYSTEM_PROMPT, &user_prompt, TEMPERATURE).await {
        Ok(answer) => {
            info!("refine: answer of {} chars", answer.len());
            run.refined_answer = answer;
        }
        Err(e) => {
            warn!("refine failed, keeping the initial answer: {e:#}");
            run.refined_answer = run.initial_answer.clone();
        }
    }
    Ok(())
}

/// Context block handed to the model: one `[doc_id] question: snippet` line
/// per document, blank-line separated, in retrieval order. The order is the
/// ranking and must not be disturbed.
fn context_block(docs: &[RetrievedDocument]) -> String {
    docs.iter()
        .map(|doc| {
            format!(
                "[{}] {}: {}",
                doc.id, doc.metadata.question, doc.metadata.answer_snippet
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Map any model output onto a verdict. Containment-based on purpose, to
/// survive answers like "The verdict is COMPLETE."; the COMPLETE check runs
/// first, so output containing both tokens resolves to Complete.
fn parse_verdict(raw: &str) -> CritiqueVerdict {
    let upper = raw.to_uppercase();
    if upper.contains("COMPLETE") {
        CritiqueVerdict::Complete
    } else if upper.contains("REFINE") {
        CritiqueVerdict::Refine
    } else {
        CritiqueVerdict::Complete
    }
}

use std::{collections::HashSet, fs, path::Path};

use anyhow::{Context, Result, bail};
use log::{debug, info};

use crate::{utils::preview, value::KnowledgeEntry};

/// Load the knowledge base from a JSON array of entries.
///
/// The file is read once at startup. Besides the serde shape check this
/// rejects empty collections, blank ids, and duplicate ids, since the
/// `doc_id` becomes the vector id in the index.
pub fn load_kb(path: impl AsRef<Path>) -> Result<Vec<KnowledgeEntry>> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read knowledge base file {}", path.display()))?;
    let entries: Vec<KnowledgeEntry> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse knowledge base file {}", path.display()))?;
    validate(&entries)?;

    info!("loaded {} knowledge base entries from {}", entries.len(), path.display());
    if let Some(sample) = entries.first() {
        debug!(
            "sample entry {}: {} ({}, {}, updated {})",
            sample.doc_id,
            preview(&sample.answer_snippet, 100),
            sample.source,
            sample.confidence_indicator,
            sample.last_updated,
        );
    }
    Ok(entries)
}

/// The text an entry is embedded under: question and snippet joined by a
/// single space.
pub fn embedding_text(entry: &KnowledgeEntry) -> String {
    format!("{} {}", entry.question, entry.answer_snippet)
}

fn validate(entries: &[KnowledgeEntry]) -> Result<()> {
    if entries.is_empty() {
        bail!("knowledge base is empty");
    }
    let mut seen = HashSet::new();
    for entry in entries {
        if entry.doc_id.trim().is_empty() {
            bail!("knowledge base entry with blank doc_id");
        }
        if entry.question.trim().is_empty() || entry.answer_snippet.trim().is_empty() {
            bail!("knowledge base entry {} has a blank question or snippet", entry.doc_id);
        }
        if !seen.insert(entry.doc_id.as_str()) {
            bail!("duplicate doc_id {} in knowledge base", entry.doc_id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::env;

    use super::*;

    fn write_temp(contents: &str) -> std::path::PathBuf {
        let path = env::temp_dir().join(format!("ragloop-kb-{}.json", uuid::Uuid::new_v4()));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn loads_a_valid_file() {
        let path = write_temp(
            r#"[{
                "doc_id": "KB001",
                "question": "What are best practices for caching?",
                "answer_snippet": "Cache invalidation should be explicit.",
                "source": "caching_guide.md",
                "confidence_indicator": "high",
                "last_updated": "2024-01-10"
            }]"#,
        );
        let entries = load_kb(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].doc_id, "KB001");
        fs::remove_file(path).ok();
    }

    #[test]
    fn rejects_duplicate_doc_ids() {
        let entry = r#"{
            "doc_id": "KB001",
            "question": "q",
            "answer_snippet": "a",
            "source": "s.md",
            "confidence_indicator": "low",
            "last_updated": "2024-01-10"
        }"#;
        let path = write_temp(&format!("[{entry},{entry}]"));
        let err = load_kb(&path).unwrap_err();
        assert!(err.to_string().contains("duplicate doc_id KB001"));
        fs::remove_file(path).ok();
    }

    #[test]
    fn rejects_an_empty_collection() {
        let path = write_temp("[]");
        assert!(load_kb(&path).is_err());
        fs::remove_file(path).ok();
    }

    #[test]
    fn rejects_a_malformed_entry() {
        let path = write_temp(r#"[{"doc_id": "KB001"}]"#);
        assert!(load_kb(&path).is_err());
        fs::remove_file(path).ok();
    }

    #[test]
    fn embedding_text_joins_question_and_snippet() {
        let entry: KnowledgeEntry = serde_json::from_str(
            r#"{
                "doc_id": "KB001",
                "question": "What are best practices for caching?",
                "answer_snippet": "Use TTLs.",
                "source": "s.md",
                "confidence_indicator": "medium",
                "last_updated": "2024-01-10"
            }"#,
        )
        .unwrap();
        assert_eq!(
            embedding_text(&entry),
            "What are best practices for caching? Use TTLs."
        );
    }
}

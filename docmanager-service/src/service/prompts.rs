//! Fixed prompts for summarization and retrieval answers.

use crate::db::Tag;
use crate::keywords::truncate_chars;

pub(crate) const SUMMARY_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that summarizes documents.";

pub(crate) const RAG_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that only answers based on provided context.";

/// Returned without a model call when retrieval finds nothing.
pub(crate) const NO_CONTEXT_ANSWER: &str = "I couldn't find any relevant documents to answer your question. Try rephrasing it or uploading new content.";

pub(crate) fn summary_prompt(text: &str, max_chars: usize) -> String {
    format!(
        "Summarize the following document in 5 concise bullet points. \
         Focus on the main topics, key facts and any conclusions.\n\n\
         Document:\n{}",
        truncate_chars(text, max_chars)
    )
}

/// Context block handed to the model: tag labels first when present, then
/// the retrieved passages separated by blank lines.
pub(crate) fn rag_context(tags: &[Tag], chunks: &[&str]) -> String {
    let mut context = String::new();

    if !tags.is_empty() {
        let labels: Vec<&str> = tags.iter().map(|t| t.label.as_str()).collect();
        context.push_str("[Tags]\n");
        context.push_str(&labels.join(", "));
        context.push_str("\n\n");
    }

    context.push_str(&chunks.join("\n\n"));
    context
}

pub(crate) fn rag_prompt(question: &str, context: &str, max_chars: usize) -> String {
    format!(
        "Answer the question using only the context below. If the context does not \
         contain the answer, say that you don't know.\n\n\
         Context:\n{}\n\nQuestion: {}\n\nAnswer:",
        truncate_chars(context, max_chars),
        question
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn tag(label: &str) -> Tag {
        Tag {
            id: label.to_string(),
            label: label.to_string(),
            description: None,
            embedding: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_rag_context_prefixes_tags() {
        let context = rag_context(&[tag("finance"), tag("quarterly")], &["first", "second"]);
        assert_eq!(context, "[Tags]\nfinance, quarterly\n\nfirst\n\nsecond");
    }

    #[test]
    fn test_rag_context_without_tags() {
        assert_eq!(rag_context(&[], &["only"]), "only");
    }

    #[test]
    fn test_summary_prompt_truncates() {
        let prompt = summary_prompt("abcdefgh", 3);
        assert!(prompt.ends_with("Document:\nabc"));
    }
}

//! Embedding-ranked keyword extraction.
//!
//! Candidates are one and two word phrases with English stop words removed,
//! capped to the most frequent. Each candidate is embedded and ranked by
//! cosine similarity to the document; the final set is the Max-Sum
//! selection: among the [`MAX_SUM_POOL`] best candidates, the `top_n` whose
//! pairwise similarity is lowest, so near-synonyms do not crowd out
//! distinct topics.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::TaggingConfig;
use crate::embeddings::{Embedder, cosine_similarity};
use crate::error::ServiceResult;

/// Best-scoring candidates the Max-Sum search chooses from. The search is
/// exhaustive over this pool, so `tagging.max_tags` may not exceed it.
pub const MAX_SUM_POOL: usize = 20;

const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "almost", "also", "although",
    "always", "am", "among", "an", "and", "another", "any", "anyone", "anything", "are",
    "around", "as", "at", "be", "became", "because", "become", "been", "before", "being",
    "below", "between", "both", "but", "by", "can", "cannot", "could", "did", "do", "does",
    "doing", "done", "down", "due", "during", "each", "either", "else", "enough", "etc",
    "even", "ever", "every", "few", "for", "from", "further", "get", "had", "has", "have",
    "having", "he", "her", "here", "hers", "herself", "him", "himself", "his", "how",
    "however", "i", "ie", "if", "in", "into", "is", "it", "its", "itself", "just", "last",
    "least", "less", "many", "may", "me", "might", "more", "most", "much", "must", "my",
    "myself", "neither", "never", "no", "nor", "not", "now", "of", "off", "often", "on",
    "once", "one", "only", "onto", "or", "other", "others", "otherwise", "our", "ours",
    "ourselves", "out", "over", "own", "per", "perhaps", "please", "rather", "same", "see",
    "seem", "seemed", "seems", "several", "she", "should", "since", "so", "some", "still",
    "such", "than", "that", "the", "their", "theirs", "them", "themselves", "then", "there",
    "therefore", "these", "they", "this", "those", "though", "through", "thus", "to", "too",
    "toward", "under", "until", "up", "upon", "us", "very", "via", "was", "we", "well",
    "were", "what", "whatever", "when", "whence", "where", "whereas", "whether", "which",
    "while", "who", "whole", "whom", "whose", "why", "will", "with", "within", "without",
    "would", "yet", "you", "your", "yours", "yourself", "yourselves",
];

/// A selected phrase and the vector it was ranked with
#[derive(Debug, Clone)]
pub struct Keyword {
    pub phrase: String,
    pub embedding: Vec<f32>,
    /// Cosine similarity to the whole document
    pub score: f32,
}

pub struct KeywordExtractor {
    embedder: Arc<dyn Embedder>,
    top_n: usize,
    max_candidates: usize,
    max_input_chars: usize,
}

impl KeywordExtractor {
    pub fn new(embedder: Arc<dyn Embedder>, config: &TaggingConfig) -> Self {
        Self {
            embedder,
            top_n: config.max_tags,
            max_candidates: config.max_candidates,
            max_input_chars: config.max_input_chars,
        }
    }

    /// Up to `top_n` keywords, best first
    pub async fn extract(&self, text: &str) -> ServiceResult<Vec<Keyword>> {
        let candidates = candidate_phrases(text, self.max_candidates);
        if candidates.is_empty() || self.top_n == 0 {
            return Ok(Vec::new());
        }

        let document = truncate_chars(text, self.max_input_chars);
        let document_embedding = self.embedder.embed(document).await?;
        let candidate_embeddings = self.embedder.embed_batch(&candidates).await?;

        let scores: Vec<f32> = candidate_embeddings
            .iter()
            .map(|e| cosine_similarity(&document_embedding, e))
            .collect();

        let selected = max_sum_selection(&scores, &candidate_embeddings, self.top_n);

        debug!(
            candidates = candidates.len(),
            selected = selected.len(),
            "Ranked keyword candidates"
        );

        let mut candidate_embeddings: Vec<Option<Vec<f32>>> =
            candidate_embeddings.into_iter().map(Some).collect();

        Ok(selected
            .into_iter()
            .filter_map(|i| {
                Some(Keyword {
                    phrase: candidates[i].clone(),
                    embedding: candidate_embeddings[i].take()?,
                    score: scores[i],
                })
            })
            .collect())
    }
}

/// Longest prefix of at most `max_chars` characters
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.binary_search(&word).is_ok()
}

/// Words usable in a phrase; `None` marks a break (stop word or number).
fn tokens(text: &str) -> Vec<Option<String>> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let word = w.to_lowercase();
            let usable = word.chars().count() >= 2
                && word.chars().any(char::is_alphabetic)
                && !is_stop_word(&word);
            usable.then_some(word)
        })
        .collect()
}

/// Unigrams and bigrams ordered by frequency, then first appearance.
pub(crate) fn candidate_phrases(text: &str, max_candidates: usize) -> Vec<String> {
    let tokens = tokens(text);
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let mut order = 0usize;

    let mut record = |phrase: String| {
        let entry = counts.entry(phrase).or_insert((0, order));
        entry.0 += 1;
        order += 1;
    };

    for (i, token) in tokens.iter().enumerate() {
        let Some(word) = token else { continue };
        record(word.clone());
        if let Some(Some(next)) = tokens.get(i + 1) {
            record(format!("{word} {next}"));
        }
    }

    let mut ranked: Vec<(String, usize, usize)> = counts
        .into_iter()
        .map(|(phrase, (count, first))| (phrase, count, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.truncate(max_candidates);

    ranked.into_iter().map(|(phrase, _, _)| phrase).collect()
}

/// Indices of the chosen candidates, best score first.
pub(crate) fn max_sum_selection(scores: &[f32], embeddings: &[Vec<f32>], top_n: usize) -> Vec<usize> {
    let mut by_score: Vec<usize> = (0..scores.len()).collect();
    by_score.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    if top_n == 0 {
        return Vec::new();
    }
    if by_score.len() <= top_n {
        return by_score;
    }

    let pool: Vec<usize> = by_score.into_iter().take(MAX_SUM_POOL.max(top_n)).collect();

    let mut pairwise = vec![vec![0.0f32; pool.len()]; pool.len()];
    for i in 0..pool.len() {
        for j in (i + 1)..pool.len() {
            let sim = cosine_similarity(&embeddings[pool[i]], &embeddings[pool[j]]);
            pairwise[i][j] = sim;
            pairwise[j][i] = sim;
        }
    }

    let mut best: Option<(f32, Vec<usize>)> = None;
    let mut combo: Vec<usize> = (0..top_n).collect();
    loop {
        let mut total = 0.0f32;
        for (a, &i) in combo.iter().enumerate() {
            for &j in &combo[a + 1..] {
                total += pairwise[i][j];
            }
        }
        if best.as_ref().is_none_or(|(score, _)| total < *score) {
            best = Some((total, combo.clone()));
        }

        if !next_combination(&mut combo, pool.len()) {
            break;
        }
    }

    // Pool positions are already in score order
    best.map(|(_, combo)| combo.into_iter().map(|p| pool[p]).collect())
        .unwrap_or_default()
}

/// Advance to the next k-combination of `0..n` in lexicographic order.
fn next_combination(combo: &mut [usize], n: usize) -> bool {
    let k = combo.len();
    for i in (0..k).rev() {
        if combo[i] < n - k + i {
            combo[i] += 1;
            for j in (i + 1)..k {
                combo[j] = combo[j - 1] + 1;
            }
            return true;
        }
    }
    false
}

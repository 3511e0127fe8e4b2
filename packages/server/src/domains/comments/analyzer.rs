//! Default text analysis: keyword frequency plus a lexicon sentiment score.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::kernel::{BaseTextAnalyzer, TextAnalysis};

const DEFAULT_KEYWORD_LIMIT: usize = 5;
const MIN_TOKEN_CHARS: usize = 3;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "him", "his", "how", "its", "let", "who", "why", "this", "that",
    "with", "have", "from", "they", "will", "what", "when", "your", "just", "than", "then",
    "them", "were", "been", "also", "very", "about", "there", "their", "which", "would",
    "это", "как", "так", "что", "все", "она", "они", "был", "было", "для", "его", "уже",
    "или", "еще", "ещё", "тут", "там", "вот", "мне", "нет", "даже", "только",
];

const POSITIVE: &[&str] = &[
    "good", "great", "love", "like", "nice", "excellent", "awesome", "best", "thanks",
    "thank", "happy", "cool", "perfect", "beautiful", "wonderful", "хорошо", "отлично",
    "спасибо", "класс", "супер", "люблю", "нравится", "прекрасно", "круто", "лучший",
];

const NEGATIVE: &[&str] = &[
    "bad", "terrible", "awful", "hate", "worst", "poor", "sad", "angry", "ugly", "boring",
    "broken", "wrong", "плохо", "ужасно", "ненавижу", "отстой", "худший", "грустно", "кошмар",
    "позор", "скучно",
];

/// Offline analyzer used when no external morphology service is configured.
#[derive(Debug, Clone)]
pub struct LexiconAnalyzer {
    keyword_limit: usize,
}

impl LexiconAnalyzer {
    pub fn new() -> Self {
        Self {
            keyword_limit: DEFAULT_KEYWORD_LIMIT,
        }
    }

    pub fn with_keyword_limit(keyword_limit: usize) -> Self {
        Self { keyword_limit }
    }

    pub fn analyze_text(&self, text: &str) -> Result<TextAnalysis> {
        if text.trim().is_empty() {
            anyhow::bail!("empty text");
        }

        let tokens = tokenize(text);
        Ok(TextAnalysis {
            keywords: top_keywords(&tokens, self.keyword_limit),
            sentiment: sentiment(&tokens),
        })
    }
}

impl Default for LexiconAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseTextAnalyzer for LexiconAnalyzer {
    async fn analyze(&self, text: &str) -> Result<TextAnalysis> {
        self.analyze_text(text)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
        .collect()
}

fn top_keywords(tokens: &[String], limit: usize) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for token in tokens {
        if token.chars().count() < MIN_TOKEN_CHARS
            || STOP_WORDS.contains(&token.as_str())
            || token.chars().all(|c| c.is_numeric())
        {
            continue;
        }
        *counts.entry(token.as_str()).or_default() += 1;
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    // Most frequent first; ties alphabetically so output is stable.
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(word, _)| word.to_string())
        .collect()
}

/// `(positive - negative) / (positive + negative)`, `0` with no polar words.
fn sentiment(tokens: &[String]) -> f64 {
    let positive = tokens
        .iter()
        .filter(|t| POSITIVE.contains(&t.as_str()))
        .count() as f64;
    let negative = tokens
        .iter()
        .filter(|t| NEGATIVE.contains(&t.as_str()))
        .count() as f64;

    if positive + negative == 0.0 {
        0.0
    } else {
        (positive - negative) / (positive + negative)
    }
}

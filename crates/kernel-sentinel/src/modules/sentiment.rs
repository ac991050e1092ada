//! Sentiment heuristic: flags content above a hostile-word count
//! threshold.

use futures::future::BoxFuture;
use kernel_common::error::Result;
use kernel_common::traits::{Alert, Judgment, SentinelContext, SentinelModule, Severity};

const HOSTILE_WORDS: &[&str] = &[
    "hate", "kill", "attack", "threat", "violence", "destroy", "assault",
];
const HOSTILE_THRESHOLD: usize = 3;

pub struct SentimentAnalyzer;

impl SentimentAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn hostile_word_count(text: &str) -> usize {
        let lower = text.to_ascii_lowercase();
        let words: Vec<&str> = lower.split_whitespace().collect();
        HOSTILE_WORDS
            .iter()
            .map(|hostile| words.iter().filter(|w| **w == *hostile).count())
            .sum()
    }
}

impl Default for SentimentAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SentinelModule for SentimentAnalyzer {
    fn name(&self) -> &str {
        "sentiment"
    }

    fn analyze<'a>(&'a self, ctx: &'a SentinelContext) -> BoxFuture<'a, Result<Judgment>> {
        Box::pin(async move {
            let Some(data) = ctx.data.as_ref() else {
                return Ok(Judgment::default());
            };
            let count = Self::hostile_word_count(&String::from_utf8_lossy(data));

            let mut judgment = Judgment::default();
            if count >= HOSTILE_THRESHOLD {
                judgment
                    .add_tags
                    .insert("sentiment".to_string(), "hostile".to_string());
                judgment.alert = Some(Alert {
                    code: "HOSTILE_CONTENT".to_string(),
                    severity: Severity::Warning,
                    message: format!("{count} hostile-word hits found"),
                });
            } else {
                judgment
                    .add_tags
                    .insert("sentiment".to_string(), "neutral".to_string());
            }
            Ok(judgment)
        })
    }
}

//! Generative capability used to breed new variants
//!
//! The engine never inspects content. It hands parent content to a
//! [`Generator`] and stores whatever comes back.

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::error::GenerationError;

/// Crossover and mutation over opaque content
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Generator: Send + Sync {
    /// Combine two parents into one offspring
    async fn crossover(&self, first: &str, second: &str) -> Result<String, GenerationError>;

    /// Perturb a single piece of content
    async fn mutate(&self, content: &str) -> Result<String, GenerationError>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Instruction hints appended by [`SpliceGenerator::mutate`]
const MUTATION_HINTS: &[&str] = &[
    "Be concise.",
    "Think step by step before answering.",
    "Answer in a structured list.",
    "State any assumptions explicitly.",
    "Double-check the result before responding.",
    "Use plain language.",
];

/// Offline recombination without a model
///
/// Crossover keeps the first half of the first parent's segments and the
/// second half of the other's. Segments are lines for multi-line content and
/// sentences otherwise. Mutation appends an instruction hint picked by a hash
/// of the content, so it is deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpliceGenerator;

fn segments(content: &str) -> (Vec<String>, &'static str) {
    if content.contains('\n') {
        let lines = content.lines().map(str::to_string).filter(|l| !l.trim().is_empty()).collect();
        (lines, "\n")
    } else {
        let sentences = content
            .split_inclusive(". ")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        (sentences, " ")
    }
}

#[async_trait]
impl Generator for SpliceGenerator {
    async fn crossover(&self, first: &str, second: &str) -> Result<String, GenerationError> {
        let (head, separator) = segments(first);
        let (tail, _) = segments(second);

        let keep_head = head.len().div_ceil(2);
        let skip_tail = tail.len().div_ceil(2);

        let child: Vec<String> = head
            .into_iter()
            .take(keep_head)
            .chain(tail.into_iter().skip(skip_tail))
            .collect();

        if child.is_empty() {
            return Ok(first.to_string());
        }
        Ok(child.join(separator))
    }

    async fn mutate(&self, content: &str) -> Result<String, GenerationError> {
        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        let start = (hasher.finish() % MUTATION_HINTS.len() as u64) as usize;

        let hint = (0..MUTATION_HINTS.len())
            .map(|offset| MUTATION_HINTS[(start + offset) % MUTATION_HINTS.len()])
            .find(|hint| !content.contains(hint));

        Ok(match hint {
            Some(hint) if content.trim().is_empty() => hint.to_string(),
            Some(hint) => format!("{}\n\n{}", content.trim_end(), hint),
            None => content.to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "splice"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_crossover_lines() {
        let a = "You are a reviewer.\nRead the diff.\nList bugs.\nBe strict.";
        let b = "You are a tutor.\nExplain simply.\nGive an example.\nEnd with a quiz.";
        let child = SpliceGenerator.crossover(a, b).await.unwrap();
        assert_eq!(child, "You are a reviewer.\nRead the diff.\nGive an example.\nEnd with a quiz.");
    }

    #[tokio::test]
    async fn test_crossover_sentences() {
        let a = "Summarize the text. Keep it short. Use bullets.";
        let b = "Translate the text. Preserve tone. Cite sources.";
        let child = SpliceGenerator.crossover(a, b).await.unwrap();
        assert_eq!(child, "Summarize the text. Keep it short. Cite sources.");
    }

    #[tokio::test]
    async fn test_crossover_empty_parents_fall_back() {
        let child = SpliceGenerator.crossover("", "").await.unwrap();
        assert_eq!(child, "");
    }

    #[tokio::test]
    async fn test_mutate_is_deterministic_and_changes_content() {
        let content = "Summarize: {{input}}";
        let first = SpliceGenerator.mutate(content).await.unwrap();
        let second = SpliceGenerator.mutate(content).await.unwrap();
        assert_eq!(first, second);
        assert_ne!(first, content);
        assert!(first.starts_with(content));

        // a second mutation adds a different hint
        let again = SpliceGenerator.mutate(&first).await.unwrap();
        assert_ne!(again, first);
    }

    #[tokio::test]
    async fn test_mutate_saturates() {
        let content = MUTATION_HINTS.join(" ");
        assert_eq!(SpliceGenerator.mutate(&content).await.unwrap(), content);
    }
}

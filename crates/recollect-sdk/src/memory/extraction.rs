//! Fact extraction from conversations.
//!
//! The ingestion pipeline receives candidate facts through the
//! `ExtractionService` capability. Production deployments usually plug a
//! language-model extractor in here; the SDK ships two local providers:
//!
//! - `KeywordExtractor`: splits messages into sentences and uses cue
//!   keywords to flag updates and contradictions, with frequency-style
//!   confidence scoring.
//! - `PassthroughExtractor`: every message becomes one candidate verbatim.

use async_trait::async_trait;
use recollect_core::{Metadata, MetadataValue};
use serde::{Deserialize, Serialize};

use crate::SDKResult;

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    #[default]
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// How a candidate relates to what is already known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    #[default]
    New,
    /// Refines or supersedes an earlier fact.
    Update,
    /// States the opposite of an earlier fact.
    Contradiction,
}

/// A fact proposed for storage.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateFact {
    pub content: String,
    pub kind: FactKind,
    /// Extraction confidence (0.0 to 1.0).
    pub confidence: f64,
    pub metadata: Metadata,
}

impl CandidateFact {
    pub fn new(content: impl Into<String>, confidence: f64) -> Self {
        Self {
            content: content.into(),
            kind: FactKind::New,
            confidence: confidence.clamp(0.0, 1.0),
            metadata: Metadata::new(),
        }
    }

    pub fn with_kind(mut self, kind: FactKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Candidate-fact extraction capability.
#[async_trait]
pub trait ExtractionService: Send + Sync {
    /// Extract candidate facts from a conversation.
    async fn extract(&self, conversation: &[Message]) -> SDKResult<Vec<CandidateFact>>;
}

/// Configuration for keyword extraction.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Confidence of a sentence with no cue keywords.
    pub base_confidence: f64,
    /// Confidence boost per matching fact cue.
    pub cue_boost: f64,
    /// Maximum confidence score.
    pub max_confidence: f64,
    /// Minimum sentence length to consider.
    pub min_content_length: usize,
    /// Also extract from assistant messages.
    pub include_assistant: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            base_confidence: 0.5,
            cue_boost: 0.1,
            max_confidence: 0.95,
            min_content_length: 8,
            include_assistant: false,
        }
    }
}

/// Keywords that suggest how a sentence relates to prior knowledge.
struct CueKeywords {
    contradictions: Vec<&'static str>,
    updates: Vec<&'static str>,
    emphasis: Vec<&'static str>,
    facts: Vec<&'static str>,
}

impl Default for CueKeywords {
    fn default() -> Self {
        Self {
            contradictions: vec![
                "actually", "no longer", "not anymore", "anymore", "that's wrong",
                "that is wrong", "incorrect", "not true", "contrary",
            ],
            updates: vec![
                "now ", "changed", "updated", "switched", "moved to", "these days",
                "from now on", "instead", "recently", "new ",
            ],
            emphasis: vec![
                "important", "always", "never", "must", "remember", "critical",
                "allergic",
            ],
            facts: vec![
                "i ", "i'm", "my ", "prefer", "like", "love", "hate", "work",
                "live", "name is", "favorite", "favourite", "use ",
            ],
        }
    }
}

/// Cue-keyword based extractor.
pub struct KeywordExtractor {
    config: ExtractionConfig,
    keywords: CueKeywords,
}

impl Default for KeywordExtractor {
    fn default() -> Self {
        Self::new(ExtractionConfig::default())
    }
}

impl KeywordExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self {
            config,
            keywords: CueKeywords::default(),
        }
    }

    /// Extract candidates from one message.
    fn extract_message(&self, message: &Message) -> Vec<CandidateFact> {
        split_sentences(&message.content)
            .into_iter()
            .filter(|s| s.len() >= self.config.min_content_length && !s.ends_with('?'))
            .map(|sentence| {
                let lower = format!("{} ", sentence.to_lowercase());
                let kind = self.classify(&lower);
                let mut fact = CandidateFact::new(sentence.trim_end_matches(['.', '!']), self.confidence(&lower))
                    .with_kind(kind);
                fact.metadata.insert(
                    "source_role".into(),
                    MetadataValue::Text(message.role.as_str().into()),
                );
                if self.keywords.emphasis.iter().any(|kw| lower.contains(kw)) {
                    fact.metadata
                        .insert("importance".into(), MetadataValue::Text("high".into()));
                }
                fact
            })
            .collect()
    }

    /// Classify a lowercased sentence, most specific cue first.
    fn classify(&self, lower: &str) -> FactKind {
        if self.keywords.contradictions.iter().any(|kw| lower.contains(kw)) {
            return FactKind::Contradiction;
        }
        if self.keywords.updates.iter().any(|kw| lower.contains(kw)) {
            return FactKind::Update;
        }
        FactKind::New
    }

    fn confidence(&self, lower: &str) -> f64 {
        let matches = self.keywords.facts.iter().filter(|kw| lower.contains(*kw)).count();
        (self.config.base_confidence + matches as f64 * self.config.cue_boost)
            .min(self.config.max_confidence)
    }
}

#[async_trait]
impl ExtractionService for KeywordExtractor {
    async fn extract(&self, conversation: &[Message]) -> SDKResult<Vec<CandidateFact>> {
        let facts: Vec<CandidateFact> = conversation
            .iter()
            .filter(|m| match m.role {
                MessageRole::User => true,
                MessageRole::Assistant => self.config.include_assistant,
                MessageRole::System => false,
            })
            .flat_map(|m| self.extract_message(m))
            .collect();

        tracing::debug!(
            messages = conversation.len(),
            facts = facts.len(),
            "Keyword extraction complete"
        );
        Ok(facts)
    }
}

/// Extractor that stores each non-system message verbatim.
#[derive(Debug, Default)]
pub struct PassthroughExtractor;

#[async_trait]
impl ExtractionService for PassthroughExtractor {
    async fn extract(&self, conversation: &[Message]) -> SDKResult<Vec<CandidateFact>> {
        Ok(conversation
            .iter()
            .filter(|m| m.role != MessageRole::System && !m.content.trim().is_empty())
            .map(|m| CandidateFact::new(m.content.trim(), 0.5))
            .collect())
    }
}

/// Split text into sentences, keeping terminal punctuation.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        if c == '\n' {
            push_sentence(&mut sentences, &mut current);
            continue;
        }
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            push_sentence(&mut sentences, &mut current);
        }
    }
    push_sentence(&mut sentences, &mut current);
    sentences
}

fn push_sentence(sentences: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    current.clear();
}

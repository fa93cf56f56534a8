use crate::common::config::{Config, PHRASE_MATCH_THRESHOLD};
use crate::common::{VerifyError, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Ordered synonym groups a challenge phrase is assembled from.
#[derive(Debug, Clone, PartialEq)]
pub struct WordLattice {
    groups: Vec<Vec<String>>,
}

impl Default for WordLattice {
    fn default() -> Self {
        let groups = [
            ["Hello", "Hi", "Greetings"],
            ["my name is", "I am", "this is"],
            ["attending", "checking in", "present"],
            ["today", "now", "here"],
        ];
        Self {
            groups: groups
                .iter()
                .map(|g| g.iter().map(|w| w.to_string()).collect())
                .collect(),
        }
    }
}

impl WordLattice {
    pub fn new<S: Into<String>>(groups: Vec<Vec<S>>) -> Result<Self> {
        let groups: Vec<Vec<String>> = groups
            .into_iter()
            .map(|g| g.into_iter().map(Into::into).collect())
            .collect();

        if groups.is_empty() {
            return Err(VerifyError::InvalidInput("word lattice has no groups".into()));
        }
        for (i, group) in groups.iter().enumerate() {
            if group.is_empty() || group.iter().any(|w| w.trim().is_empty()) {
                return Err(VerifyError::InvalidInput(format!(
                    "word lattice group {} is empty or has a blank entry", i
                )));
            }
        }

        Ok(Self { groups })
    }

    pub fn groups(&self) -> &[Vec<String>] {
        &self.groups
    }

    /// One uniform pick per group, in group order.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ChallengePhrase {
        let words = self
            .groups
            .iter()
            .filter_map(|group| group.choose(rng).cloned())
            .collect();
        ChallengePhrase { words }
    }
}

/// The lattice entries chosen for one challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengePhrase {
    words: Vec<String>,
}

impl ChallengePhrase {
    pub fn from_words<S: Into<String>>(words: Vec<S>) -> Self {
        Self { words: words.into_iter().map(Into::into).collect() }
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn text(&self) -> String {
        self.words.join(" ")
    }
}

/// What the speech engine heard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub confidence: f32,
}

impl Transcript {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self { text: text.into(), confidence }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechMatchResult {
    pub transcript: String,
    pub confidence: f32,
    pub matched: bool,
    pub match_percentage: f32,
}

/// Spoken-phrase challenge/response.
///
/// Each lattice entry chosen for the challenge counts as one target word
/// (so "my name is" is a single unit), and a target word matches when the
/// normalized transcript contains it anywhere, including inside a longer
/// word: "is" matches "this".
#[derive(Debug, Clone)]
pub struct PhraseChallenge {
    lattice: WordLattice,
    threshold: f32,
    target: Option<ChallengePhrase>,
}

impl Default for PhraseChallenge {
    fn default() -> Self {
        Self::new(WordLattice::default())
    }
}

impl PhraseChallenge {
    pub fn new(lattice: WordLattice) -> Self {
        Self {
            lattice,
            threshold: PHRASE_MATCH_THRESHOLD,
            target: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            threshold: config.phrase.match_threshold,
            ..Self::default()
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn target(&self) -> Option<&ChallengePhrase> {
        self.target.as_ref()
    }

    pub fn generate_phrase(&mut self) -> String {
        self.generate_phrase_with(&mut rand::thread_rng())
    }

    /// Pick a new phrase, replacing the previous target.
    pub fn generate_phrase_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> String {
        let phrase = self.lattice.sample(rng);
        let text = phrase.text();
        tracing::debug!("New challenge phrase: {}", text);
        self.target = Some(phrase);
        text
    }

    /// Set the target explicitly, e.g. a phrase issued by another device.
    pub fn set_target(&mut self, phrase: ChallengePhrase) {
        self.target = Some(phrase);
    }

    pub fn clear(&mut self) {
        self.target = None;
    }

    pub fn evaluate(&self, transcript: &Transcript) -> Result<SpeechMatchResult> {
        let target = self
            .target
            .as_ref()
            .filter(|t| !t.words().is_empty())
            .ok_or(VerifyError::NoChallengeActive)?;

        let heard = transcript.text.trim().to_lowercase();
        let total = target.words().len();
        let matched_count = target
            .words()
            .iter()
            .filter(|word| heard.contains(word.to_lowercase().as_str()))
            .count();

        let match_percentage = matched_count as f32 * 100.0 / total as f32;
        let matched = match_percentage >= self.threshold;

        tracing::debug!("Phrase match {}/{} ({:.1}%) -> matched={}",
                        matched_count, total, match_percentage, matched);

        Ok(SpeechMatchResult {
            transcript: heard,
            confidence: transcript.confidence,
            matched,
            match_percentage,
        })
    }
}

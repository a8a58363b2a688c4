//! Token estimation for rendered bundles.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tiktoken_rs::{CoreBPE, cl100k_base, o200k_base};

/// Tokenizer families a bundle can be measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TokenModel {
    /// OpenAI GPT-4o family (o200k encoding).
    #[default]
    OpenAiGpt4o,
    /// Older OpenAI models and a stand-in for Anthropic models (cl100k encoding).
    Cl100k,
    /// Character/word heuristic, no tokenizer tables required.
    CharacterFallback,
}

impl TokenModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenModel::OpenAiGpt4o => "openai:gpt-4o",
            TokenModel::Cl100k => "cl100k",
            TokenModel::CharacterFallback => "fallback:characters",
        }
    }
}

impl fmt::Display for TokenModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenModel {
    type Err = TokenModelParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai:gpt-4o" | "openai:gpt-4o-mini" | "o200k" => Ok(TokenModel::OpenAiGpt4o),
            "cl100k" | "openai:gpt-4" | "anthropic:claude" => Ok(TokenModel::Cl100k),
            "fallback:characters" | "heuristic" | "fallback" => Ok(TokenModel::CharacterFallback),
            other => Err(TokenModelParseError::UnknownModel(other.to_string())),
        }
    }
}

/// Error returned when parsing a [`TokenModel`] fails.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TokenModelParseError {
    #[error("unknown token model '{0}'")]
    UnknownModel(String),
}

const CHARS_PER_TOKEN: f32 = 4.0;
const CODE_TOKEN_MULTIPLIER: f32 = 1.25;

/// Counts tokens with a BPE tokenizer, falling back to a heuristic when tables are unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenEstimator {
    model: TokenModel,
}

impl TokenEstimator {
    pub fn new(model: TokenModel) -> Self {
        Self { model }
    }

    pub fn count(&self, text: &str) -> usize {
        if text.trim().is_empty() {
            return 0;
        }
        match tokenizer_for(self.model) {
            Some(bpe) => bpe.lock().encode_ordinary(text).len(),
            None => heuristic_estimate(text),
        }
    }
}

/// Bundles are mostly source code, so the character estimate is scaled up.
fn heuristic_estimate(text: &str) -> usize {
    let chars = text.chars().count() as f32;
    let words = text.split_whitespace().count() as f32;
    let estimate = (chars / CHARS_PER_TOKEN).ceil().max(words);
    ((estimate * CODE_TOKEN_MULTIPLIER).ceil() as usize).max(1)
}

type SharedBpe = Arc<Mutex<CoreBPE>>;

fn tokenizer_for(model: TokenModel) -> Option<SharedBpe> {
    static O200K: OnceCell<Option<SharedBpe>> = OnceCell::new();
    static CL100K: OnceCell<Option<SharedBpe>> = OnceCell::new();

    let shared = |bpe: CoreBPE| Arc::new(Mutex::new(bpe));
    match model {
        TokenModel::OpenAiGpt4o => O200K.get_or_init(|| o200k_base().ok().map(shared)).clone(),
        TokenModel::Cl100k => CL100K.get_or_init(|| cl100k_base().ok().map(shared)).clone(),
        TokenModel::CharacterFallback => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_token_models_from_strings() {
        assert_eq!(
            TokenModel::from_str("OPENAI:GPT-4O-MINI").unwrap(),
            TokenModel::OpenAiGpt4o
        );
        assert_eq!(TokenModel::from_str("cl100k").unwrap(), TokenModel::Cl100k);
        assert!(TokenModel::from_str("unknown").is_err());
    }

    #[test]
    fn counts_with_bpe_tokenizer() {
        let estimator = TokenEstimator::new(TokenModel::OpenAiGpt4o);
        assert_eq!(estimator.count("Hello world!"), 3);
        assert_eq!(estimator.count("   \n"), 0);
    }

    #[test]
    fn heuristic_scales_with_length() {
        let estimator = TokenEstimator::new(TokenModel::CharacterFallback);
        let short = estimator.count("def f(): pass");
        let long = estimator.count(&"def f(): pass\n".repeat(20));
        assert!(short > 0);
        assert!(long > short * 10);
    }
}

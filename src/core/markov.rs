/// N-gram reference language model — training, serialization, and the
/// collaborator interface used by the decoder.
///
/// Word-level tokens with punctuation split off. Scores for the next
/// position are log transition counts given the previous `n - 1` tokens,
/// backing off to unigram counts when the prefix was never seen.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::core::model::{LanguageModel, ModelError, TokenCodec, TokenId};

#[derive(Debug, Error)]
pub enum MarkovError {
    #[error("n-gram depth must be 2-4, got {0}")]
    InvalidDepth(usize),
    #[error("invalid model: {0}")]
    InvalidModel(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("RON serialization error: {0}")]
    RonWrite(#[from] ron::Error),
}

/// Placeholder for words outside the vocabulary.
pub const UNKNOWN_TOKEN: &str = "<unk>";
/// Document boundary; doubles as the end-of-sequence token.
pub const EOS_TOKEN: &str = "<|endoftext|>";

const UNKNOWN_ID: TokenId = 0;
const EOS_ID: TokenId = 1;

/// Punctuation characters that are tokenized as separate tokens.
const PUNCTUATION: &[char] = &['.', '!', '?', ',', ';', ':', '"', '\''];

/// Default context window for a freshly trained model.
pub const DEFAULT_MAX_CONTEXT: usize = 1024;

/// A trained n-gram model over a word-level vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "StoredModel", into = "StoredModel")]
pub struct MarkovModel {
    n: usize,
    max_context_tokens: usize,
    vocab: Vec<String>,
    index: FxHashMap<String, TokenId>,
    /// Prefix of `n - 1` token ids → [(next token id, count)].
    transitions: HashMap<Vec<TokenId>, Vec<(TokenId, u32)>>,
    unigrams: Vec<u32>,
}

// On-disk shape: everything but the reverse index, which is rebuilt on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredModel {
    n: usize,
    max_context_tokens: usize,
    vocab: Vec<String>,
    transitions: HashMap<Vec<TokenId>, Vec<(TokenId, u32)>>,
    unigrams: Vec<u32>,
}

impl StoredModel {
    fn validate(&self) -> Result<(), MarkovError> {
        if !(2..=4).contains(&self.n) {
            return Err(MarkovError::InvalidDepth(self.n));
        }
        if self.vocab.get(UNKNOWN_ID as usize).map(String::as_str) != Some(UNKNOWN_TOKEN)
            || self.vocab.get(EOS_ID as usize).map(String::as_str) != Some(EOS_TOKEN)
        {
            return Err(MarkovError::InvalidModel(format!(
                "vocabulary must start with {} and {}",
                UNKNOWN_TOKEN, EOS_TOKEN
            )));
        }
        if self.unigrams.len() != self.vocab.len() {
            return Err(MarkovError::InvalidModel(format!(
                "{} unigram counts for {} words",
                self.unigrams.len(),
                self.vocab.len()
            )));
        }

        let vocab_size = self.vocab.len();
        for (prefix, nexts) in &self.transitions {
            if prefix.len() != self.n - 1 {
                return Err(MarkovError::InvalidModel(format!(
                    "prefix of {} tokens in a {}-gram model",
                    prefix.len(),
                    self.n
                )));
            }
            let ids = prefix.iter().chain(nexts.iter().map(|(next, _)| next));
            if let Some(bad) = ids.copied().find(|&id| id as usize >= vocab_size) {
                return Err(MarkovError::InvalidModel(format!(
                    "token id {} outside vocabulary of {}",
                    bad, vocab_size
                )));
            }
        }
        Ok(())
    }
}

impl TryFrom<StoredModel> for MarkovModel {
    type Error = MarkovError;

    fn try_from(stored: StoredModel) -> Result<Self, Self::Error> {
        stored.validate()?;
        let index = build_index(&stored.vocab);
        Ok(Self {
            n: stored.n,
            max_context_tokens: stored.max_context_tokens,
            vocab: stored.vocab,
            index,
            transitions: stored.transitions,
            unigrams: stored.unigrams,
        })
    }
}

impl From<MarkovModel> for StoredModel {
    fn from(model: MarkovModel) -> Self {
        Self {
            n: model.n,
            max_context_tokens: model.max_context_tokens,
            vocab: model.vocab,
            transitions: model.transitions,
            unigrams: model.unigrams,
        }
    }
}

fn build_index(vocab: &[String]) -> FxHashMap<String, TokenId> {
    vocab
        .iter()
        .enumerate()
        .map(|(id, word)| (word.clone(), id as TokenId))
        .collect()
}

/// Cached state between forward steps: the trailing token window and how
/// many tokens the model has consumed so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkovState {
    window: Vec<TokenId>,
    consumed: usize,
}

impl MarkovModel {
    pub fn n(&self) -> usize {
        self.n
    }

    pub fn vocab(&self) -> &[String] {
        &self.vocab
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.values().map(Vec::len).sum()
    }

    pub fn prefix_count(&self) -> usize {
        self.transitions.len()
    }

    pub fn with_max_context_tokens(mut self, max: usize) -> Self {
        self.max_context_tokens = max;
        self
    }

    pub fn token_id(&self, word: &str) -> Option<TokenId> {
        self.index.get(word).copied()
    }

    fn advance(&self, mut state: MarkovState, tokens: &[TokenId]) -> Result<MarkovState, ModelError> {
        for &token in tokens {
            if token as usize >= self.vocab.len() {
                return Err(ModelError::UnknownToken(token));
            }
            state.window.push(token);
        }
        state.consumed += tokens.len();
        if state.consumed > self.max_context_tokens {
            return Err(ModelError::ContextTooLong {
                len: state.consumed,
                max: self.max_context_tokens,
            });
        }
        let keep = self.n - 1;
        if state.window.len() > keep {
            let excess = state.window.len() - keep;
            state.window.drain(..excess);
        }
        Ok(state)
    }

    fn scores_for(&self, window: &[TokenId]) -> Vec<f32> {
        let mut scores = vec![f32::NEG_INFINITY; self.vocab.len()];
        match self.transitions.get(window) {
            Some(options) => {
                for &(token, count) in options {
                    scores[token as usize] = (count as f32).ln();
                }
            }
            None => {
                for (token, &count) in self.unigrams.iter().enumerate() {
                    if count > 0 {
                        scores[token] = (count as f32).ln();
                    }
                }
            }
        }
        scores[UNKNOWN_ID as usize] = f32::NEG_INFINITY;
        scores
    }
}

impl TokenCodec for MarkovModel {
    fn encode(&self, text: &str) -> Vec<TokenId> {
        tokenize(text)
            .iter()
            .map(|tok| self.token_id(tok).unwrap_or(UNKNOWN_ID))
            .collect()
    }

    fn decode(&self, tokens: &[TokenId]) -> String {
        let words: Vec<String> = tokens
            .iter()
            .filter(|&&t| t != UNKNOWN_ID && t != EOS_ID)
            .filter_map(|&t| self.vocab.get(t as usize).cloned())
            .collect();
        reassemble_tokens(&words)
    }

    fn eos_token_id(&self) -> Option<TokenId> {
        Some(EOS_ID)
    }

    fn max_context_tokens(&self) -> usize {
        self.max_context_tokens
    }

    fn vocab_size(&self) -> usize {
        self.vocab.len()
    }
}

impl LanguageModel for MarkovModel {
    type State = MarkovState;

    fn forward(
        &self,
        tokens: &[TokenId],
        state: Option<MarkovState>,
    ) -> Result<(Vec<f32>, MarkovState), ModelError> {
        let state = state.unwrap_or_else(|| MarkovState {
            window: vec![EOS_ID; self.n - 1],
            consumed: 0,
        });
        let state = self.advance(state, tokens)?;
        let scores = self.scores_for(&state.window);
        Ok((scores, state))
    }
}

/// Reassemble tokens into natural text (attach punctuation to previous word).
fn reassemble_tokens(tokens: &[String]) -> String {
    let mut result = String::new();
    for (i, tok) in tokens.iter().enumerate() {
        let is_punct = tok.chars().count() == 1 && tok.starts_with(PUNCTUATION);
        if i > 0 && !is_punct {
            result.push(' ');
        }
        result.push_str(tok);
    }
    result
}

/// Trains Markov models from raw text.
pub struct MarkovTrainer;

impl MarkovTrainer {
    /// Train a model with the given n-gram depth.
    ///
    /// Each non-empty line is one document: it starts from a window of
    /// end-of-text tokens and finishes with one, so sentences inside a line
    /// chain into each other and the model learns where documents stop.
    pub fn train(text: &str, n: usize) -> Result<MarkovModel, MarkovError> {
        if !(2..=4).contains(&n) {
            return Err(MarkovError::InvalidDepth(n));
        }

        let mut vocab = vec![UNKNOWN_TOKEN.to_string(), EOS_TOKEN.to_string()];
        let mut index = build_index(&vocab);
        let mut unigrams = vec![0u32; vocab.len()];
        let mut transitions: HashMap<Vec<TokenId>, Vec<(TokenId, u32)>> = HashMap::new();

        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let mut padded = vec![EOS_ID; n - 1];
            for tok in tokenize(trimmed) {
                let id = *index.entry(tok.clone()).or_insert_with(|| {
                    vocab.push(tok);
                    unigrams.push(0);
                    (vocab.len() - 1) as TokenId
                });
                padded.push(id);
            }
            padded.push(EOS_ID);

            for window in padded.windows(n) {
                let prefix = window[..n - 1].to_vec();
                let next = window[n - 1];
                unigrams[next as usize] += 1;
                add_transition(&mut transitions, prefix, next);
            }
        }

        Ok(MarkovModel {
            n,
            max_context_tokens: DEFAULT_MAX_CONTEXT,
            vocab,
            index,
            transitions,
            unigrams,
        })
    }
}

/// Add a transition to a transition table, incrementing the count.
fn add_transition(
    table: &mut HashMap<Vec<TokenId>, Vec<(TokenId, u32)>>,
    prefix: Vec<TokenId>,
    next: TokenId,
) {
    let entries = table.entry(prefix).or_default();
    if let Some(entry) = entries.iter_mut().find(|(tok, _)| *tok == next) {
        entry.1 += 1;
    } else {
        entries.push((next, 1));
    }
}

/// Tokenize text: split on whitespace, separate punctuation as individual tokens.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.split_whitespace() {
        let mut remaining = word;
        while let Some(first) = remaining.chars().next() {
            if PUNCTUATION.contains(&first) {
                tokens.push(first.to_string());
                remaining = &remaining[first.len_utf8()..];
                continue;
            }

            // Find end of word (before punctuation)
            if let Some(pos) = remaining.find(PUNCTUATION) {
                tokens.push(remaining[..pos].to_string());
                remaining = &remaining[pos..];
            } else {
                tokens.push(remaining.to_string());
                break;
            }
        }
    }
    tokens
}

/// Save a MarkovModel to a RON file.
pub fn save_model(model: &MarkovModel, path: &Path) -> Result<(), MarkovError> {
    let serialized = ron::ser::to_string_pretty(model, ron::ser::PrettyConfig::default())?;
    std::fs::write(path, serialized)?;
    Ok(())
}

/// Load a MarkovModel from a RON file.
pub fn load_model(path: &Path) -> Result<MarkovModel, MarkovError> {
    let contents = std::fs::read_to_string(path)?;
    let model: MarkovModel = ron::from_str(&contents)?;
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn train_test_corpus() -> MarkovModel {
        let corpus = std::fs::read_to_string("tests/fixtures/test_corpus.txt").unwrap();
        MarkovTrainer::train(&corpus, 2).unwrap()
    }

    #[test]
    fn tokenize_basic() {
        let tokens = tokenize("Hello, world.");
        assert_eq!(tokens, vec!["Hello", ",", "world", "."]);
    }

    #[test]
    fn tokenize_quotes() {
        let tokens = tokenize("She said, \"Run!\"");
        assert_eq!(tokens, vec!["She", "said", ",", "\"", "Run", "!", "\""]);
    }

    #[test]
    fn train_rejects_bad_depth() {
        assert!(matches!(
            MarkovTrainer::train("a b c", 5),
            Err(MarkovError::InvalidDepth(5))
        ));
    }

    #[test]
    fn train_builds_vocab_with_specials_first() {
        let model = train_test_corpus();
        assert_eq!(model.vocab()[0], UNKNOWN_TOKEN);
        assert_eq!(model.vocab()[1], EOS_TOKEN);
        assert!(model.token_id("wolf").is_some());
        assert!(model.prefix_count() > 0);
        assert!(model.transition_count() >= model.prefix_count());
    }

    #[test]
    fn encode_decode_known_text() {
        let model = train_test_corpus();
        let tokens = model.encode("The wolf growls.");
        assert!(!tokens.contains(&UNKNOWN_ID));
        assert_eq!(model.decode(&tokens), "The wolf growls.");
    }

    #[test]
    fn unknown_words_map_to_unk_and_vanish_on_decode() {
        let model = train_test_corpus();
        let tokens = model.encode("The zyzzyva growls.");
        assert_eq!(tokens[1], UNKNOWN_ID);
        assert_eq!(model.decode(&tokens), "The growls.");
    }

    #[test]
    fn scores_cover_vocabulary_and_never_pick_unk() {
        let model = train_test_corpus();
        let (scores, _) = model.forward(&model.encode("The"), None).unwrap();
        assert_eq!(scores.len(), model.vocab_size());
        assert_eq!(scores[UNKNOWN_ID as usize], f32::NEG_INFINITY);
        assert!(scores.iter().any(|s| s.is_finite()));
    }

    #[test]
    fn cached_forward_matches_full_forward() {
        let model = MarkovTrainer::train(
            &std::fs::read_to_string("tests/fixtures/test_corpus.txt").unwrap(),
            3,
        )
        .unwrap();
        let tokens = model.encode("You enter the clearing. A wolf");

        let (full, _) = model.forward(&tokens, None).unwrap();

        let (_, mut state) = model.forward(&tokens[..1], None).unwrap();
        let mut last = Vec::new();
        for &token in &tokens[1..] {
            let (scores, next) = model.forward(&[token], Some(state)).unwrap();
            state = next;
            last = scores;
        }
        assert_eq!(full, last);
    }

    #[test]
    fn unseen_prefix_backs_off_to_unigrams() {
        let model = train_test_corpus();
        let unk_only = vec![UNKNOWN_ID];
        let (scores, _) = model.forward(&unk_only, None).unwrap();
        let eos = scores[EOS_ID as usize];
        assert!(eos.is_finite(), "EOS occurs in the corpus so backoff scores it");
    }

    #[test]
    fn context_limit_enforced() {
        let model = train_test_corpus().with_max_context_tokens(3);
        let tokens = model.encode("The wolf growls.");
        assert!(matches!(
            model.forward(&tokens, None),
            Err(ModelError::ContextTooLong { len: 4, max: 3 })
        ));
    }

    #[test]
    fn out_of_vocab_id_rejected() {
        let model = train_test_corpus();
        let bad = model.vocab_size() as TokenId;
        assert!(matches!(
            model.forward(&[bad], None),
            Err(ModelError::UnknownToken(_))
        ));
    }

    #[test]
    fn ron_round_trip_rebuilds_index() {
        let model = train_test_corpus();
        let serialized = ron::to_string(&model).unwrap();
        let deserialized: MarkovModel = ron::from_str(&serialized).unwrap();
        assert_eq!(deserialized.n(), model.n());
        assert_eq!(deserialized.vocab_size(), model.vocab_size());
        assert_eq!(deserialized.token_id("wolf"), model.token_id("wolf"));
        assert_eq!(deserialized.transition_count(), model.transition_count());
    }

    #[test]
    fn save_and_load_model() {
        let model = train_test_corpus();
        let path = std::path::PathBuf::from("target/test_markov_model.ron");
        std::fs::create_dir_all("target").unwrap();

        save_model(&model, &path).unwrap();
        let loaded = load_model(&path).unwrap();

        assert_eq!(loaded.n(), model.n());
        assert_eq!(loaded.encode("The wolf"), model.encode("The wolf"));

        let _ = std::fs::remove_file(&path);
    }

    const SPECIALS: &str = r#"["<unk>", "<|endoftext|>"]"#;

    fn stored(n: usize, vocab: &str, transitions: &str, unigrams: &str) -> String {
        format!(
            "(n: {}, max_context_tokens: 16, vocab: {}, transitions: {}, unigrams: {})",
            n, vocab, transitions, unigrams
        )
    }

    #[test]
    fn well_formed_stored_model_loads() {
        let ron_text = stored(2, SPECIALS, "{[1]: [(1, 1)]}", "[0, 1]");
        let model: MarkovModel = ron::from_str(&ron_text).unwrap();
        let (scores, _) = model.forward(&[EOS_ID], None).unwrap();
        assert!(scores[EOS_ID as usize].is_finite());
    }

    #[test]
    fn malformed_stored_models_rejected() {
        let cases = [
            stored(0, SPECIALS, "{}", "[0, 0]"),
            stored(5, SPECIALS, "{}", "[0, 0]"),
            stored(2, SPECIALS, "{[1]: [(7, 1)]}", "[0, 1]"),
            stored(2, SPECIALS, "{[9]: [(1, 1)]}", "[0, 1]"),
            stored(2, SPECIALS, "{[1, 1]: [(1, 1)]}", "[0, 1]"),
            stored(2, SPECIALS, "{}", "[0]"),
            stored(2, r#"["<|endoftext|>", "<unk>"]"#, "{}", "[0, 0]"),
            stored(2, "[]", "{}", "[]"),
        ];
        for case in &cases {
            let err = ron::from_str::<MarkovModel>(case).unwrap_err();
            assert!(
                err.to_string().contains("invalid model") || err.to_string().contains("depth"),
                "{}: {}",
                case,
                err
            );
        }
    }

    #[test]
    fn load_model_reports_invalid_file() {
        let path = std::path::PathBuf::from("target/test_markov_model_invalid.ron");
        std::fs::create_dir_all("target").unwrap();
        std::fs::write(&path, stored(0, SPECIALS, "{}", "[0, 0]")).unwrap();

        let result = load_model(&path);
        let _ = std::fs::remove_file(&path);
        assert!(matches!(result, Err(MarkovError::Ron(_))));
    }

    #[test]
    fn every_corpus_line_ends_with_eos() {
        let model = MarkovTrainer::train("A b. C d.\nE f.", 2).unwrap();
        let stop = model.token_id(".").unwrap();
        let next: Vec<TokenId> = model.transitions[&vec![stop]]
            .iter()
            .map(|&(id, _)| id)
            .collect();
        assert!(next.contains(&model.token_id("C").unwrap()));
        assert!(next.contains(&EOS_ID));
        assert_eq!(model.unigrams[EOS_ID as usize], 2);
    }

    #[test]
    fn reassemble_attaches_punctuation() {
        let tokens = vec![
            "Hello".to_string(),
            ",".to_string(),
            "world".to_string(),
            ".".to_string(),
        ];
        assert_eq!(reassemble_tokens(&tokens), "Hello, world.");
    }
}

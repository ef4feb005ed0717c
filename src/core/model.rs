/// Language-model collaborator interface.
///
/// The engine never loads weights or builds tokenizers itself. Anything
/// that can turn text into token ids and score the next position can
/// drive a session.

use thiserror::Error;

/// Identifier of a unit of text in a model's vocabulary.
pub type TokenId = u32;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model ran out of resources: {0}")]
    OutOfResources(String),
    #[error("context of {len} tokens exceeds the model maximum of {max}")]
    ContextTooLong { len: usize, max: usize },
    #[error("token id {0} is outside the vocabulary")]
    UnknownToken(TokenId),
    #[error("model invocation failed: {0}")]
    Backend(String),
}

/// Text <-> token conversion plus the fixed facts about a loaded model.
pub trait TokenCodec {
    fn encode(&self, text: &str) -> Vec<TokenId>;

    /// Decode tokens back to text, skipping special tokens.
    fn decode(&self, tokens: &[TokenId]) -> String;

    fn eos_token_id(&self) -> Option<TokenId>;

    fn max_context_tokens(&self) -> usize;

    fn vocab_size(&self) -> usize;
}

/// One evaluation step of an autoregressive model.
pub trait LanguageModel: TokenCodec {
    /// Whatever the model carries between steps (key/value cache, n-gram
    /// window, ...).
    type State: Send;

    /// Score the position after `tokens`.
    ///
    /// With `state == None`, `tokens` is the whole sequence so far. With a
    /// cached state, `tokens` holds only what the state has not seen yet,
    /// normally just the newest sampled token. Returns one score per
    /// vocabulary entry together with the updated state.
    fn forward(
        &self,
        tokens: &[TokenId],
        state: Option<Self::State>,
    ) -> Result<(Vec<f32>, Self::State), ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_error_messages() {
        let err = ModelError::ContextTooLong { len: 2048, max: 1024 };
        assert_eq!(
            err.to_string(),
            "context of 2048 tokens exceeds the model maximum of 1024"
        );
        assert!(ModelError::OutOfResources("cuda".to_string())
            .to_string()
            .contains("cuda"));
    }
}

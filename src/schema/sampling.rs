use serde::{Deserialize, Serialize};

use crate::core::model::{TokenCodec, TokenId};

/// Per-call sampling policy for the decoder.
///
/// Each knob has a value that turns it off: `temperature <= 0` skips
/// scaling, `top_k == 0` disables top-k, `top_p` of 0 or 1 disables the
/// nucleus filter and `repetition_penalty == 1` leaves scores alone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParameters {
    pub temperature: f32,
    pub top_k: usize,
    pub top_p: f32,
    pub repetition_penalty: f32,
}

impl SamplingParameters {
    /// Parameters under which every filtering stage is a no-op.
    pub fn unfiltered() -> Self {
        Self {
            temperature: 1.0,
            top_k: 0,
            top_p: 1.0,
            repetition_penalty: 1.0,
        }
    }
}

impl Default for SamplingParameters {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_k: 40,
            top_p: 0.9,
            repetition_penalty: 1.1,
        }
    }
}

/// Read-only facts about the loaded model, fixed for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelContext {
    pub max_context_tokens: usize,
    /// Tokens reserved for generation out of the context window.
    pub generation_length: usize,
    /// Token that ends a sequence; the decoder stops when it is drawn.
    pub eos_token_id: Option<TokenId>,
}

impl ModelContext {
    pub fn for_codec<C: TokenCodec + ?Sized>(codec: &C, generation_length: usize) -> Self {
        Self {
            max_context_tokens: codec.max_context_tokens(),
            generation_length,
            eos_token_id: codec.eos_token_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::core::sampler::process_scores;

    #[test]
    fn unfiltered_leaves_scores_alone() {
        let mut scores = vec![0.5, -1.0, 3.0, f32::NEG_INFINITY];
        process_scores(&mut scores, &[2, 2], &SamplingParameters::unfiltered());
        assert_eq!(scores, vec![0.5, -1.0, 3.0, f32::NEG_INFINITY]);
    }

    #[test]
    fn ron_round_trip() {
        let params = SamplingParameters::default();
        let serialized = ron::to_string(&params).unwrap();
        let deserialized: SamplingParameters = ron::from_str(&serialized).unwrap();
        assert_eq!(deserialized, params);
    }
}

/// Autoregressive sampling — score processing and the decode loop.
///
/// Each step scales scores by temperature, dampens tokens already in the
/// sequence, applies the top-k and nucleus filters, then draws one token
/// from the resulting distribution.

use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::FxHashSet;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::model::{LanguageModel, ModelError, TokenId};
use crate::schema::sampling::{ModelContext, SamplingParameters};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation exceeded its {limit:?} time limit after {elapsed:?}")]
    TimedOut { elapsed: Duration, limit: Duration },
    #[error("model invocation failed: {0}")]
    Failed(#[from] ModelError),
    #[error("no token left with non-zero probability")]
    EmptyDistribution,
}

/// Divide every score by `temperature`. Non-positive temperatures leave
/// the scores untouched.
pub fn apply_temperature(scores: &mut [f32], temperature: f32) {
    if temperature <= 0.0 {
        return;
    }
    for score in scores.iter_mut() {
        *score /= temperature;
    }
}

/// Divide the score of every distinct token present in `history` by
/// `penalty`. A token seen many times is penalized exactly once.
pub fn apply_repetition_penalty(scores: &mut [f32], history: &[TokenId], penalty: f32) {
    if penalty == 1.0 {
        return;
    }
    let seen: FxHashSet<TokenId> = history.iter().copied().collect();
    for token in seen {
        if let Some(score) = scores.get_mut(token as usize) {
            *score /= penalty;
        }
    }
}

/// Keep the `k` highest scores; everything strictly below the k-th largest
/// value drops to negative infinity. Ties with the k-th value all survive,
/// so more than `k` tokens may remain.
pub fn top_k_filter(scores: &mut [f32], k: usize) {
    if k == 0 || k >= scores.len() {
        return;
    }
    let mut sorted = scores.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let kth = sorted[k - 1];
    for score in scores.iter_mut() {
        if *score < kth {
            *score = f32::NEG_INFINITY;
        }
    }
}

/// Nucleus filter: walk tokens from most to least likely and drop every
/// token after the one that pushes cumulative probability over `p`. The
/// most likely token always survives. A `p` of 0 or at least 1 disables
/// the filter.
pub fn top_p_filter(scores: &mut [f32], p: f32) {
    if p <= 0.0 || p >= 1.0 || scores.is_empty() {
        return;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let sorted: Vec<f32> = order.iter().map(|&i| scores[i]).collect();
    let probs = softmax(&sorted);

    // Decide removal in sorted order, shifted right by one so the token
    // that crosses the threshold is kept.
    let mut remove = vec![false; sorted.len()];
    let mut cumulative = 0.0f32;
    for rank in 0..sorted.len() {
        if rank > 0 {
            remove[rank] = cumulative > p;
        }
        cumulative += probs[rank];
    }

    for (rank, &index) in order.iter().enumerate() {
        if remove[rank] {
            scores[index] = f32::NEG_INFINITY;
        }
    }
}

/// Normalize scores into a probability distribution. Tokens at negative
/// infinity get probability zero; if every score is negative infinity the
/// result is all zeros. Scores that overflowed to positive infinity share
/// the whole distribution evenly.
pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let overflowed = scores.iter().filter(|&&s| s == f32::INFINITY).count();
    if overflowed > 0 {
        let share = 1.0 / overflowed as f32;
        return scores
            .iter()
            .map(|&s| if s == f32::INFINITY { share } else { 0.0 })
            .collect();
    }

    let max = scores
        .iter()
        .copied()
        .filter(|s| s.is_finite())
        .fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        return vec![0.0; scores.len()];
    }

    let exps: Vec<f32> = scores
        .iter()
        .map(|&s| if s == f32::NEG_INFINITY { 0.0 } else { (s - max).exp() })
        .collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// Run steps 1-4 of a decode step over raw scores, in order: temperature,
/// repetition penalty, top-k, top-p.
pub fn process_scores(scores: &mut [f32], history: &[TokenId], params: &SamplingParameters) {
    apply_temperature(scores, params.temperature);
    apply_repetition_penalty(scores, history, params.repetition_penalty);
    top_k_filter(scores, params.top_k);
    top_p_filter(scores, params.top_p);
}

/// Draw a token id from a probability distribution.
pub fn sample_token(probs: &[f32], rng: &mut StdRng) -> Result<TokenId, GenerationError> {
    let dist = WeightedIndex::new(probs).map_err(|_| GenerationError::EmptyDistribution)?;
    Ok(dist.sample(rng) as TokenId)
}

/// The autoregressive generation loop.
#[derive(Debug, Clone)]
pub struct SamplingDecoder {
    params: SamplingParameters,
    generation_length: usize,
    batch_size: usize,
    stop_at_eos: bool,
    eos: Option<TokenId>,
    timeout: Option<Duration>,
    seed: Option<u64>,
}

impl SamplingDecoder {
    pub fn new(params: SamplingParameters, generation_length: usize) -> Self {
        Self {
            params,
            generation_length,
            batch_size: 1,
            stop_at_eos: true,
            eos: None,
            timeout: None,
            seed: None,
        }
    }

    /// Decoder sized and stopped by the facts of a loaded model.
    pub fn for_context(params: SamplingParameters, context: &ModelContext) -> Self {
        Self::new(params, context.generation_length).eos_token(context.eos_token_id)
    }

    pub fn eos_token(mut self, eos: Option<TokenId>) -> Self {
        self.eos = eos;
        self
    }

    /// Number of sequences generated from the same prompt and concatenated.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn stop_at_eos(mut self, stop: bool) -> Self {
        self.stop_at_eos = stop;
        self
    }

    /// Wall-clock limit for the whole call, across every step and sequence.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fix the random source. Without a seed every call draws fresh entropy.
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn params(&self) -> &SamplingParameters {
        &self.params
    }

    /// Generate up to `generation_length` tokens per sequence after `prompt`.
    ///
    /// On timeout or model failure nothing generated so far is returned.
    pub fn generate<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        prompt: &[TokenId],
    ) -> Result<Vec<Vec<TokenId>>, GenerationError> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let started = Instant::now();
        let eos = self.eos.filter(|_| self.stop_at_eos);

        debug!(
            prompt_tokens = prompt.len(),
            generation_length = self.generation_length,
            batch_size = self.batch_size,
            "decode started"
        );

        let mut batch = Vec::with_capacity(self.batch_size);
        for _ in 0..self.batch_size {
            let produced = self.generate_sequence(model, prompt, eos, started, &mut rng)?;
            batch.push(produced);
        }

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            tokens = batch.iter().map(Vec::len).sum::<usize>(),
            "decode finished"
        );
        Ok(batch)
    }

    /// Generate and decode, concatenating every sequence of the batch.
    pub fn generate_text<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        prompt: &[TokenId],
    ) -> Result<String, GenerationError> {
        let batch = self.generate(model, prompt)?;
        Ok(batch
            .iter()
            .map(|sequence| model.decode(sequence))
            .collect::<String>())
    }

    fn generate_sequence<M: LanguageModel + ?Sized>(
        &self,
        model: &M,
        prompt: &[TokenId],
        eos: Option<TokenId>,
        started: Instant,
        rng: &mut StdRng,
    ) -> Result<Vec<TokenId>, GenerationError> {
        let mut sequence = prompt.to_vec();
        let mut produced = Vec::with_capacity(self.generation_length);
        let mut pending = prompt.to_vec();
        let mut state = None;

        for _ in 0..self.generation_length {
            self.check_deadline(started)?;

            let (mut scores, next_state) = model.forward(&pending, state.take())?;
            state = Some(next_state);

            process_scores(&mut scores, &sequence, &self.params);
            let probs = softmax(&scores);
            let token = sample_token(&probs, rng)?;

            sequence.push(token);
            if eos == Some(token) {
                break;
            }
            produced.push(token);
            pending.clear();
            pending.push(token);
        }

        Ok(produced)
    }

    fn check_deadline(&self, started: Instant) -> Result<(), GenerationError> {
        if let Some(limit) = self.timeout {
            let elapsed = started.elapsed();
            if elapsed > limit {
                warn!(?elapsed, ?limit, "decode timed out; discarding partial output");
                return Err(GenerationError::TimedOut { elapsed, limit });
            }
        }
        Ok(())
    }
}

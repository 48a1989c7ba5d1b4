// Token sampling from the sorted probability buffer.
//
// The native module publishes a (token id, probability) list per position.
// Samplers read the entries for the last input position and choose the next
// token. Greedy is the baseline; StochasticSampler adds temperature, top-k
// and top-p (nucleus) filtering behind the same trait. Uses a simple XorShift
// RNG to avoid adding the `rand` crate dependency.

use std::collections::HashSet;

use tracing::warn;

use crate::native::ModelLink;

/// Token returned when no distribution is available.
pub const SENTINEL_TOKEN: u32 = 0;

/// Sampling configuration for playback.
#[derive(Debug, Clone)]
pub struct SamplingConfig {
    /// Temperature applied to probabilities. 0.0 = greedy.
    pub temperature: f32,
    /// Top-K: keep only the top-k highest probability tokens. 0 = disabled.
    pub top_k: usize,
    /// Top-P (nucleus): cumulative probability cutoff. 1.0 = disabled.
    pub top_p: f32,
    /// Random seed for reproducibility.
    pub seed: Option<u64>,
    /// Penalty for tokens already in the input sequence. 1.0 = disabled.
    pub repetition_penalty: f32,
}

impl SamplingConfig {
    fn penalizes_repetition(&self) -> bool {
        self.repetition_penalty.is_finite()
            && self.repetition_penalty > 0.0
            && self.repetition_penalty != 1.0
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_k: 0,
            top_p: 1.0,
            seed: None,
            repetition_penalty: 1.0,
        }
    }
}

/// Simple XorShift64 RNG to avoid adding the `rand` crate dependency.
pub struct XorShiftRng {
    state: u64,
}

impl XorShiftRng {
    /// Create a new RNG from a seed. Seed of 0 is adjusted to 1.
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    /// Generate the next u64 value.
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Generate a random f32 in [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }
}

/// Strategy for choosing the next token from the model's distribution.
pub trait TokenSampler: Send {
    /// Choose the next token. Never fails: a missing or short distribution
    /// yields [`SENTINEL_TOKEN`] and a warning.
    fn sample(&mut self, link: &ModelLink<'_>) -> u32;

    fn name(&self) -> &'static str;
}

/// Decode `(id, prob)` pairs, skipping entries that are not valid ids.
fn candidates(entries: &[f32]) -> Vec<(u32, f32)> {
    entries
        .chunks_exact(2)
        .filter(|pair| pair[0].is_finite() && pair[0] >= 0.0 && pair[1].is_finite())
        .map(|pair| (pair[0] as u32, pair[1]))
        .collect()
}

/// Entries for the last input position, or `None` with a diagnostic.
fn last_position(link: &ModelLink<'_>, sampler: &str) -> Option<Vec<(u32, f32)>> {
    let Some(entries) = link.last_position_entries() else {
        warn!(
            sampler,
            input_len = link.input_len,
            buf_len = link.sorted_buf.len(),
            stride = link.shape.sorted_stride(),
            "Probability buffer empty or undersized; returning sentinel token"
        );
        return None;
    };
    let cands = candidates(entries);
    if cands.is_empty() {
        warn!(sampler, input_len = link.input_len, "No valid probability entries; returning sentinel token");
        return None;
    }
    Some(cands)
}

/// Down-weight candidates whose ids already appear in the sequence:
/// `p -> p^penalty`, i.e. the log-probability is scaled by `penalty`.
fn apply_repetition_penalty(cands: &mut [(u32, f32)], link: &ModelLink<'_>, penalty: f32) {
    let seen: HashSet<u32> = link.context_tokens().collect();
    if seen.is_empty() {
        return;
    }
    for c in cands.iter_mut() {
        if seen.contains(&c.0) {
            c.1 = c.1.max(0.0).powf(penalty);
        }
    }
}

/// Always picks the highest-probability entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct GreedySampler;

impl TokenSampler for GreedySampler {
    fn sample(&mut self, link: &ModelLink<'_>) -> u32 {
        let Some(cands) = last_position(link, self.name()) else {
            return SENTINEL_TOKEN;
        };
        // Scan instead of trusting the sort order; first entry wins ties.
        let mut best = cands[0];
        for &c in &cands[1..] {
            if c.1 > best.1 {
                best = c;
            }
        }
        best.0
    }

    fn name(&self) -> &'static str {
        "greedy"
    }
}

/// Temperature / top-k / top-p sampling over the probability entries.
pub struct StochasticSampler {
    config: SamplingConfig,
    rng: XorShiftRng,
}

impl StochasticSampler {
    pub fn new(config: SamplingConfig) -> Self {
        let rng = XorShiftRng::new(config.seed.unwrap_or(42));
        Self { config, rng }
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }
}

impl TokenSampler for StochasticSampler {
    /// Steps:
    /// 0. Repetition penalty on ids already in the sequence.
    /// 1. Sort candidates by probability, descending.
    /// 2. Top-K: keep the top-k candidates.
    /// 3. Temperature: p^(1/t), renormalized.
    /// 4. Top-P: cumulative probability cutoff, renormalized.
    /// 5. Sample from the categorical distribution.
    fn sample(&mut self, link: &ModelLink<'_>) -> u32 {
        let Some(mut probs) = last_position(link, self.name()) else {
            return SENTINEL_TOKEN;
        };

        if self.config.penalizes_repetition() {
            apply_repetition_penalty(&mut probs, link, self.config.repetition_penalty);
        }

        probs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        if self.config.top_k > 0 && self.config.top_k < probs.len() {
            probs.truncate(self.config.top_k);
        }

        // Greedy when temperature is off.
        if self.config.temperature <= 0.0 {
            return probs[0].0;
        }

        let inv_t = 1.0 / self.config.temperature;
        for c in &mut probs {
            c.1 = c.1.max(0.0).powf(inv_t);
        }
        let sum: f32 = probs.iter().map(|c| c.1).sum();
        if sum <= 0.0 || !sum.is_finite() {
            return probs[0].0;
        }
        for c in &mut probs {
            c.1 /= sum;
        }

        if self.config.top_p < 1.0 {
            let mut cumulative = 0.0f32;
            let mut cutoff_idx = probs.len();
            for (i, &(_, p)) in probs.iter().enumerate() {
                cumulative += p;
                if cumulative >= self.config.top_p {
                    cutoff_idx = i + 1;
                    break;
                }
            }
            probs.truncate(cutoff_idx);

            // Renormalize
            let sum2: f32 = probs.iter().map(|c| c.1).sum();
            for c in &mut probs {
                c.1 /= sum2;
            }
        }

        let r = self.rng.next_f32();
        let mut cumulative = 0.0f32;
        for &(idx, p) in &probs {
            cumulative += p;
            if r < cumulative {
                return idx;
            }
        }

        // Fallback: return last candidate
        probs.last().map(|c| c.0).unwrap_or(SENTINEL_TOKEN)
    }

    fn name(&self) -> &'static str {
        "stochastic"
    }
}

/// Pick a sampler for `config`: greedy unless a positive temperature or a
/// repetition penalty is set.
pub fn sampler_from_config(config: &SamplingConfig) -> Box<dyn TokenSampler> {
    if config.temperature <= 0.0 && !config.penalizes_repetition() {
        Box::new(GreedySampler)
    } else {
        Box::new(StochasticSampler::new(config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelShape;

    fn shape(vocab_size: usize) -> ModelShape {
        ModelShape {
            n_layer: 1,
            n_head: 1,
            n_embd: 4,
            vocab_size,
            block_size: 4,
        }
    }

    #[test]
    fn test_greedy_picks_highest_probability() {
        let s = shape(2);
        let buf = [5.0, 0.9, 3.0, 0.05];
        let link = ModelLink::new(&s, 1, &buf);
        assert_eq!(GreedySampler.sample(&link), 5);
    }

    #[test]
    fn test_greedy_reads_last_input_position() {
        let s = shape(2);
        // Position 0 prefers 1, position 1 prefers 0.
        let buf = [1.0, 0.8, 0.0, 0.2, 0.0, 0.7, 1.0, 0.3];
        assert_eq!(GreedySampler.sample(&ModelLink::new(&s, 1, &buf)), 1);
        assert_eq!(GreedySampler.sample(&ModelLink::new(&s, 2, &buf)), 0);
    }

    #[test]
    fn test_greedy_does_not_trust_sort_order() {
        let s = shape(3);
        let buf = [2.0, 0.1, 1.0, 0.7, 0.0, 0.2];
        assert_eq!(GreedySampler.sample(&ModelLink::new(&s, 1, &buf)), 1);
    }

    #[test]
    fn test_empty_buffer_returns_sentinel() {
        let s = shape(2);
        let link = ModelLink::new(&s, 1, &[]);
        assert_eq!(GreedySampler.sample(&link), SENTINEL_TOKEN);
    }

    #[test]
    fn test_undersized_buffer_returns_sentinel() {
        let s = shape(2);
        let buf = [5.0, 0.9, 3.0, 0.05];
        // input_len 2 needs 8 entries.
        let link = ModelLink::new(&s, 2, &buf);
        assert_eq!(GreedySampler.sample(&link), SENTINEL_TOKEN);
        let mut stochastic = StochasticSampler::new(SamplingConfig {
            temperature: 1.0,
            ..Default::default()
        });
        assert_eq!(stochastic.sample(&link), SENTINEL_TOKEN);
    }

    #[test]
    fn test_zero_input_len_returns_sentinel() {
        let s = shape(2);
        let buf = [5.0, 0.9, 3.0, 0.05];
        assert_eq!(GreedySampler.sample(&ModelLink::new(&s, 0, &buf)), SENTINEL_TOKEN);
    }

    #[test]
    fn test_stochastic_deterministic_with_seed() {
        let s = shape(4);
        let buf = [3.0, 0.4, 1.0, 0.3, 2.0, 0.2, 0.0, 0.1];
        let link = ModelLink::new(&s, 1, &buf);
        let config = SamplingConfig {
            temperature: 1.0,
            top_k: 0,
            top_p: 1.0,
            seed: Some(42),
            repetition_penalty: 1.0,
        };
        let mut a = StochasticSampler::new(config.clone());
        let mut b = StochasticSampler::new(config);
        for _ in 0..20 {
            assert_eq!(a.sample(&link), b.sample(&link), "Same seed should produce same token");
        }
    }

    #[test]
    fn test_top_k_one_is_greedy() {
        let s = shape(4);
        let buf = [3.0, 0.3, 1.0, 0.4, 2.0, 0.2, 0.0, 0.1];
        let link = ModelLink::new(&s, 1, &buf);
        let mut sampler = StochasticSampler::new(SamplingConfig {
            temperature: 1.0,
            top_k: 1,
            top_p: 1.0,
            seed: Some(7),
            repetition_penalty: 1.0,
        });
        for _ in 0..20 {
            assert_eq!(sampler.sample(&link), 1);
        }
    }

    #[test]
    fn test_low_top_p_keeps_only_top_token() {
        let s = shape(3);
        let buf = [2.0, 0.98, 0.0, 0.01, 1.0, 0.01];
        let link = ModelLink::new(&s, 1, &buf);
        let mut sampler = StochasticSampler::new(SamplingConfig {
            temperature: 1.0,
            top_k: 0,
            top_p: 0.5,
            seed: Some(3),
            repetition_penalty: 1.0,
        });
        for _ in 0..20 {
            assert_eq!(sampler.sample(&link), 2);
        }
    }

    #[test]
    fn test_low_temperature_favors_top_token() {
        let s = shape(4);
        let buf = [3.0, 0.4, 1.0, 0.3, 2.0, 0.2, 0.0, 0.1];
        let link = ModelLink::new(&s, 1, &buf);
        let mut sampler = StochasticSampler::new(SamplingConfig {
            temperature: 0.05,
            top_k: 0,
            top_p: 1.0,
            seed: Some(42),
            repetition_penalty: 1.0,
        });
        let count_top = (0..100).filter(|_| sampler.sample(&link) == 3).count();
        assert!(count_top > 90, "Low temp should favor top token, got {}/100", count_top);
    }

    #[test]
    fn test_stochastic_returns_vocab_ids() {
        let s = shape(4);
        let buf = [3.0, 0.25, 1.0, 0.25, 2.0, 0.25, 0.0, 0.25];
        let link = ModelLink::new(&s, 1, &buf);
        let mut sampler = StochasticSampler::new(SamplingConfig {
            temperature: 1.0,
            ..Default::default()
        });
        for _ in 0..100 {
            let token = sampler.sample(&link);
            assert!(token < 4, "Token out of range: {}", token);
        }
    }

    #[test]
    fn test_repetition_penalty_demotes_seen_token() {
        let s = shape(2);
        let buf = [5.0, 0.5, 3.0, 0.45];
        let input = [5.0];
        let link = ModelLink::new(&s, 1, &buf).with_input_tokens(&input);
        let config = SamplingConfig {
            repetition_penalty: 2.0,
            ..Default::default()
        };
        let mut sampler = sampler_from_config(&config);
        assert_eq!(sampler.name(), "stochastic");
        // 0.5^2 = 0.25 drops below 0.45.
        assert_eq!(sampler.sample(&link), 3);
        assert_eq!(GreedySampler.sample(&link), 5, "Greedy ignores the penalty");
    }

    #[test]
    fn test_repetition_penalty_ignores_tokens_past_input_len() {
        let s = shape(2);
        let buf = [5.0, 0.5, 3.0, 0.45];
        // Only the first entry is part of the sequence.
        let input = [1.0, 5.0];
        let link = ModelLink::new(&s, 1, &buf).with_input_tokens(&input);
        let mut sampler = StochasticSampler::new(SamplingConfig {
            repetition_penalty: 2.0,
            ..Default::default()
        });
        assert_eq!(sampler.sample(&link), 5);
    }

    #[test]
    fn test_unit_repetition_penalty_is_off() {
        let config = SamplingConfig {
            repetition_penalty: 1.0,
            ..Default::default()
        };
        assert_eq!(sampler_from_config(&config).name(), "greedy");
        let config = SamplingConfig {
            repetition_penalty: f32::NAN,
            ..Default::default()
        };
        assert_eq!(sampler_from_config(&config).name(), "greedy");
    }

    #[test]
    fn test_sampler_from_config() {
        assert_eq!(sampler_from_config(&SamplingConfig::default()).name(), "greedy");
        let config = SamplingConfig {
            temperature: 0.8,
            ..Default::default()
        };
        assert_eq!(sampler_from_config(&config).name(), "stochastic");
    }

    #[test]
    fn test_xorshift_rng_f32_range() {
        let mut rng = XorShiftRng::new(42);
        for _ in 0..1000 {
            let v = rng.next_f32();
            assert!((0.0..1.0).contains(&v), "next_f32 out of range: {}", v);
        }
    }

    #[test]
    fn test_xorshift_zero_seed() {
        let mut rng = XorShiftRng::new(0);
        assert_ne!(rng.next_u64(), 0);
    }
}

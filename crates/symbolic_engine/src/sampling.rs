//! Token sampling with temperature and top-k

use candle_core::{Error, Result};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

/// Minimum temperature for sampling; anything below is greedy.
pub const TEMP_MIN: f64 = 1e-6;

/// Draws the next token id from raw `logits`.
///
/// `top_k == 0` disables the top-k filter.
pub fn sample_token<R: Rng + ?Sized>(
    logits: &[f32],
    temperature: f64,
    top_k: usize,
    rng: &mut R,
) -> Result<u32> {
    if logits.is_empty() {
        return Err(Error::Msg("cannot sample from empty logits".to_string()));
    }

    let mut order: Vec<usize> = (0..logits.len()).collect();
    order.sort_by(|&a, &b| {
        logits[b]
            .partial_cmp(&logits[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    if temperature < TEMP_MIN {
        return Ok(order[0] as u32);
    }

    if top_k > 0 && top_k < order.len() {
        order.truncate(top_k);
    }

    let max = logits[order[0]] as f64;
    let weights: Vec<f64> = order
        .iter()
        .map(|&i| ((logits[i] as f64 - max) / temperature).exp())
        .collect();
    let dist = WeightedIndex::new(&weights).map_err(|e| Error::Msg(e.to_string()))?;
    Ok(order[dist.sample(rng)] as u32)
}

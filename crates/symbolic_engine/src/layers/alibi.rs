//! ALiBi - Attention with Linear Biases
//!
//! Position information enters attention only as a per-head penalty that
//! grows linearly with the query/key distance, so the residual stream carries
//! no positional vectors.

use candle_core::{Device, Result, Tensor};

/// Geometric per-head slopes.
///
/// For a power-of-two head count `n` the slopes are `2^(-8/n * i)` for
/// `i = 1..=n`. Otherwise the closest lower power of two is used and the
/// remaining heads take every other slope of the doubled sequence.
pub fn alibi_slopes(n_head: usize) -> Vec<f32> {
    fn power_of_two_slopes(n: usize) -> Vec<f32> {
        let start = 2f32.powf(-8.0 / n as f32);
        (1..=n).map(|i| start.powi(i as i32)).collect()
    }

    if n_head == 0 {
        return Vec::new();
    }
    if n_head.is_power_of_two() {
        return power_of_two_slopes(n_head);
    }

    let closest = n_head.next_power_of_two() / 2;
    let mut slopes = power_of_two_slopes(closest);
    slopes.extend(
        power_of_two_slopes(2 * closest)
            .into_iter()
            .step_by(2)
            .take(n_head - closest),
    );
    slopes
}

/// Causal ALiBi bias of shape `[1, n_head, seq_len, seq_len]`.
///
/// Entry `(h, i, j)` is `-slope_h * (i - j)` for `j <= i` and `-inf` for
/// future positions.
pub fn alibi_bias(slopes: &[f32], seq_len: usize, device: &Device) -> Result<Tensor> {
    let n_head = slopes.len();
    let mut data = Vec::with_capacity(n_head * seq_len * seq_len);
    for &slope in slopes {
        for i in 0..seq_len {
            for j in 0..seq_len {
                if j > i {
                    data.push(f32::NEG_INFINITY);
                } else {
                    data.push(-slope * (i - j) as f32);
                }
            }
        }
    }
    Tensor::from_vec(data, (1, n_head, seq_len, seq_len), device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slopes_power_of_two() {
        let slopes = alibi_slopes(8);
        assert_eq!(slopes.len(), 8);
        assert!((slopes[0] - 0.5).abs() < 1e-6);
        assert!((slopes[7] - 1.0 / 256.0).abs() < 1e-7);
        assert!(slopes.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_slopes_non_power_of_two() {
        let slopes = alibi_slopes(6);
        assert_eq!(slopes.len(), 6);
        // First four come from n=4, the rest from every other slope of n=8.
        assert_eq!(&slopes[..4], alibi_slopes(4).as_slice());
        let eight = alibi_slopes(8);
        assert_eq!(slopes[4], eight[0]);
        assert_eq!(slopes[5], eight[2]);
    }

    #[test]
    fn test_bias_is_causal() -> anyhow::Result<()> {
        let bias = alibi_bias(&[0.5], 3, &Device::Cpu)?;
        assert_eq!(bias.dims(), &[1, 1, 3, 3]);
        let rows = bias.squeeze(0)?.squeeze(0)?.to_vec2::<f32>()?;
        assert_eq!(rows[0][0], 0.0);
        assert!(rows[0][1].is_infinite() && rows[0][1] < 0.0);
        assert_eq!(rows[2][0], -1.0);
        assert_eq!(rows[2][1], -0.5);
        assert_eq!(rows[2][2], 0.0);
        Ok(())
    }
}

use candle_core::Tensor;

pub fn median(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) * 0.5
    } else {
        sorted[mid]
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

pub fn mse(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f32>() / n as f32
}

/// Mean Shannon entropy (nats) of the `K`-vectors of a `(B, M, K, 1)` code tensor.
pub fn mean_entropy(codes: &Tensor) -> candle_core::Result<f32> {
    let (_, _, k, _) = codes.dims4()?;
    let values = codes.flatten_all()?.to_vec1::<f32>()?;
    let slots = values.len() / k.max(1);
    if slots == 0 {
        return Ok(0.0);
    }
    let total: f32 = values.chunks(k).map(entropy).sum();
    Ok(total / slots as f32)
}

fn entropy(distribution: &[f32]) -> f32 {
    -distribution
        .iter()
        .filter(|p| **p > 0.0)
        .map(|p| p * p.ln())
        .sum::<f32>()
}

fn slot_histograms(codes: &[u32], m: usize, k: usize) -> Vec<Vec<usize>> {
    let mut histograms = vec![vec![0usize; k]; m];
    for word in codes.chunks(m.max(1)) {
        for (slot, code) in word.iter().enumerate() {
            if let Some(count) = histograms[slot].get_mut(*code as usize) {
                *count += 1;
            }
        }
    }
    histograms
}

/// `exp(H)` of the symbol usage in each slot of a row-major `(N, M)` code matrix; `K` means
/// every symbol is used equally, 1 means the slot is constant.
pub fn slot_perplexity(codes: &[u32], m: usize, k: usize) -> Vec<f32> {
    slot_histograms(codes, m, k)
        .into_iter()
        .map(|counts| {
            let total: usize = counts.iter().sum();
            if total == 0 {
                return 0.0;
            }
            let usage: Vec<f32> = counts.iter().map(|c| *c as f32 / total as f32).collect();
            entropy(&usage).exp()
        })
        .collect()
}

/// Fraction of the `K` symbols that appear at least once, per slot.
pub fn slot_utilisation(codes: &[u32], m: usize, k: usize) -> Vec<f32> {
    slot_histograms(codes, m, k)
        .into_iter()
        .map(|counts| counts.iter().filter(|c| **c > 0).count() as f32 / k.max(1) as f32)
        .collect()
}

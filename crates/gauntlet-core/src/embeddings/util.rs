//! Vector codec and similarity math. Vectors are stored as little-endian
//! f32 blobs; the math runs in f64.

pub fn encode_vec_f32(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

pub fn decode_vec_f32(bytes: &[u8]) -> anyhow::Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        anyhow::bail!("invalid embedding blob size {}", bytes.len());
    }
    let mut v = Vec::with_capacity(bytes.len() / 4);
    for chunk in bytes.chunks_exact(4) {
        v.push(f32::from_le_bytes(chunk.try_into().unwrap()));
    }
    Ok(v)
}

/// Arithmetic mean of the vectors. All inputs must share one dimension.
pub fn centroid(vectors: &[Vec<f32>]) -> anyhow::Result<Vec<f64>> {
    let Some(first) = vectors.first() else {
        anyhow::bail!("cannot compute centroid of zero vectors");
    };
    let dims = first.len();
    let mut acc = vec![0.0f64; dims];
    for v in vectors {
        if v.len() != dims {
            anyhow::bail!("embedding dims mismatch ({} vs {})", v.len(), dims);
        }
        for (a, x) in acc.iter_mut().zip(v) {
            *a += *x as f64;
        }
    }
    let n = vectors.len() as f64;
    for a in &mut acc {
        *a /= n;
    }
    Ok(acc)
}

pub fn cosine_similarity(a: &[f64], b: &[f64]) -> anyhow::Result<f64> {
    if a.is_empty() || a.len() != b.len() {
        anyhow::bail!("embedding dims mismatch (a={}, b={})", a.len(), b.len());
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for i in 0..a.len() {
        dot += a[i] * b[i];
        na += a[i] * a[i];
        nb += b[i] * b[i];
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom == 0.0 {
        anyhow::bail!("zero-norm embedding");
    }
    Ok(dot / denom)
}

/// Variance of cosine similarities over all distinct vector pairs on one
/// side. None when fewer than two vectors.
pub fn pairwise_similarity_variance(vectors: &[Vec<f32>]) -> Option<f64> {
    if vectors.len() < 2 {
        return None;
    }
    let as_f64: Vec<Vec<f64>> = vectors
        .iter()
        .map(|v| v.iter().map(|x| *x as f64).collect())
        .collect();
    let mut sims = Vec::new();
    for i in 0..as_f64.len() {
        for j in (i + 1)..as_f64.len() {
            if let Ok(s) = cosine_similarity(&as_f64[i], &as_f64[j]) {
                sims.push(s);
            }
        }
    }
    if sims.is_empty() {
        return None;
    }
    let mean = sims.iter().sum::<f64>() / sims.len() as f64;
    Some(sims.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / sims.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() -> anyhow::Result<()> {
        let v = vec![0.1_f32, -0.2, 3.5];
        let out = decode_vec_f32(&encode_vec_f32(&v))?;
        assert_eq!(v.len(), out.len());
        for i in 0..v.len() {
            assert!((v[i] - out[i]).abs() < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn decode_rejects_ragged_blob() {
        assert!(decode_vec_f32(&[0u8; 5]).is_err());
    }

    #[test]
    fn centroid_is_elementwise_mean() -> anyhow::Result<()> {
        let c = centroid(&[vec![1.0, 0.0], vec![3.0, 2.0]])?;
        assert!((c[0] - 2.0).abs() < 1e-9);
        assert!((c[1] - 1.0).abs() < 1e-9);
        assert!(centroid(&[]).is_err());
        assert!(centroid(&[vec![1.0], vec![1.0, 2.0]]).is_err());
        Ok(())
    }

    #[test]
    fn cosine_identical_is_one() -> anyhow::Result<()> {
        let s = cosine_similarity(&[1.0, 0.0, 0.0], &[1.0, 0.0, 0.0])?;
        assert!((s - 1.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn cosine_orthogonal_is_zero() -> anyhow::Result<()> {
        let s = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])?;
        assert!(s.abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn pairwise_variance_of_identical_vectors_is_zero() {
        let vs = vec![vec![1.0_f32, 0.0], vec![1.0, 0.0], vec![1.0, 0.0]];
        let var = pairwise_similarity_variance(&vs).unwrap();
        assert!(var.abs() < 1e-9);
        assert!(pairwise_similarity_variance(&vs[..1]).is_none());
    }
}

//! Exact vector math shared by the ANN index and the re-ranker.
//!
//! Accumulation happens in `f64` so that long vectors don't drift; results are
//! returned as `f32` to match the stored embeddings.

/// L2 norm of a vector.
pub fn magnitude(v: &[f32]) -> f32 {
    v.iter()
        .map(|x| f64::from(*x) * f64::from(*x))
        .sum::<f64>()
        .sqrt() as f32
}

/// Dot product. Extra trailing components of the longer slice are ignored.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum::<f64>() as f32
}

/// Cosine similarity in `[-1, 1]`. Returns `0.0` if either vector is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    cosine_similarity_with_magnitudes(a, magnitude(a), b, magnitude(b))
}

/// Cosine similarity using precomputed magnitudes.
pub fn cosine_similarity_with_magnitudes(a: &[f32], a_mag: f32, b: &[f32], b_mag: f32) -> f32 {
    if a_mag <= f32::EPSILON || b_mag <= f32::EPSILON {
        return 0.0;
    }
    (dot(a, b) / (a_mag * b_mag)).clamp(-1.0, 1.0)
}

/// Cosine distance (`1 - similarity`), the metric used for graph traversal.
pub fn cosine_distance_with_magnitudes(a: &[f32], a_mag: f32, b: &[f32], b_mag: f32) -> f32 {
    1.0 - cosine_similarity_with_magnitudes(a, a_mag, b, b_mag)
}

/// Euclidean (L2) distance.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum::<f64>()
        .sqrt() as f32
}

/// Map a raw cosine similarity onto the `[0, 1]` score range of ranked results.
pub fn to_score(similarity: f32) -> f64 {
    f64::from(similarity.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_similarity_is_one() {
        for v in [
            vec![1.0, 0.0, 0.0],
            vec![0.3, -2.5, 7.1, 0.001],
            vec![1e-3; 384],
            vec![-4.0, -4.0],
        ] {
            assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-5, "v = {v:?}");
        }
    }

    #[test]
    fn orthogonal_and_opposite_vectors() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_has_zero_similarity() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn cached_magnitudes_agree_with_direct_computation() {
        let a = [0.2, 0.9, -0.4];
        let b = [0.7, 0.1, 0.3];
        let direct = cosine_similarity(&a, &b);
        let cached = cosine_similarity_with_magnitudes(&a, magnitude(&a), &b, magnitude(&b));
        assert!((direct - cached).abs() < 1e-6);
        assert!((cosine_distance_with_magnitudes(&a, magnitude(&a), &b, magnitude(&b)) - (1.0 - direct)).abs() < 1e-6);
    }

    #[test]
    fn euclidean_distance_basics() {
        assert!((euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-6);
        assert_eq!(euclidean_distance(&[1.5, -2.0], &[1.5, -2.0]), 0.0);
    }

    #[test]
    fn score_is_clamped_to_unit_range() {
        assert_eq!(to_score(-0.4), 0.0);
        assert_eq!(to_score(1.0), 1.0);
        assert!((to_score(0.5) - 0.5).abs() < 1e-9);
    }
}

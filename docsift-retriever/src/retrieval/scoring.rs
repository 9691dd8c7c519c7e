//! Distance metrics and relevance normalization.

use serde::{Deserialize, Serialize};

/// Vector distance used for ordering candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`
    #[default]
    Cosine,
    /// Euclidean distance
    L2,
    /// Negative inner product, so smaller is closer
    InnerProduct,
}

impl DistanceMetric {
    /// Distance between two vectors; mismatched lengths are infinitely far.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return f32::INFINITY;
        }
        match self {
            DistanceMetric::Cosine => {
                let mut dot = 0.0f32;
                let mut norm_a = 0.0f32;
                let mut norm_b = 0.0f32;
                for (x, y) in a.iter().zip(b) {
                    dot += x * y;
                    norm_a += x * x;
                    norm_b += y * y;
                }
                if norm_a == 0.0 || norm_b == 0.0 {
                    1.0
                } else {
                    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
                }
            }
            DistanceMetric::L2 => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
            DistanceMetric::InnerProduct => -a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>(),
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DistanceMetric::Cosine => write!(f, "cosine"),
            DistanceMetric::L2 => write!(f, "l2"),
            DistanceMetric::InnerProduct => write!(f, "inner_product"),
        }
    }
}

impl std::str::FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cosine" | "cos" => Ok(DistanceMetric::Cosine),
            "l2" | "euclidean" => Ok(DistanceMetric::L2),
            "inner_product" | "ip" | "dot" => Ok(DistanceMetric::InnerProduct),
            _ => Err(format!("Invalid distance metric: {s}")),
        }
    }
}

/// Map a raw distance onto a relevance score in `[0, 1]`.
///
/// Cosine uses `1 - d`; every other metric uses `1 / (1 + d)`. Both are
/// non-increasing in `d`. NaN maps to 0.
pub fn relevance_score(distance: f64, metric: DistanceMetric) -> f64 {
    if distance.is_nan() {
        return 0.0;
    }
    let raw = match metric {
        DistanceMetric::Cosine => 1.0 - distance,
        DistanceMetric::L2 | DistanceMetric::InnerProduct => {
            let denominator = 1.0 + distance;
            // 1/(1+d) flips sign below d = -1; anything that close is a perfect match
            if denominator <= 0.0 {
                1.0
            } else {
                1.0 / denominator
            }
        }
    };
    raw.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_scores() {
        assert_eq!(relevance_score(0.0, DistanceMetric::Cosine), 1.0);
        assert!((relevance_score(0.25, DistanceMetric::Cosine) - 0.75).abs() < 1e-12);
        assert_eq!(relevance_score(1.5, DistanceMetric::Cosine), 0.0);
        assert_eq!(relevance_score(-0.1, DistanceMetric::Cosine), 1.0);
    }

    #[test]
    fn test_l2_scores() {
        assert_eq!(relevance_score(0.0, DistanceMetric::L2), 1.0);
        assert!((relevance_score(1.0, DistanceMetric::L2) - 0.5).abs() < 1e-12);
        assert!(relevance_score(f64::INFINITY, DistanceMetric::L2) == 0.0);
    }

    #[test]
    fn test_scores_are_bounded_and_monotonic() {
        for metric in [
            DistanceMetric::Cosine,
            DistanceMetric::L2,
            DistanceMetric::InnerProduct,
        ] {
            let mut previous = f64::INFINITY;
            for step in 0..400 {
                let distance = step as f64 * 0.05;
                let score = relevance_score(distance, metric);
                assert!((0.0..=1.0).contains(&score), "{metric} {distance} -> {score}");
                assert!(score <= previous, "{metric} not monotonic at {distance}");
                previous = score;
            }
        }
    }

    #[test]
    fn test_nan_distance_scores_zero() {
        assert_eq!(relevance_score(f64::NAN, DistanceMetric::Cosine), 0.0);
    }

    #[test]
    fn test_distances() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        assert!((DistanceMetric::Cosine.distance(&a, &a)).abs() < 1e-6);
        assert!((DistanceMetric::Cosine.distance(&a, &b) - 1.0).abs() < 1e-6);
        assert!((DistanceMetric::L2.distance(&a, &b) - 2f32.sqrt()).abs() < 1e-6);
        assert_eq!(DistanceMetric::InnerProduct.distance(&a, &a), -1.0);
        assert_eq!(DistanceMetric::L2.distance(&a, &[1.0]), f32::INFINITY);
    }

    #[test]
    fn test_metric_parsing() {
        assert_eq!("COSINE".parse::<DistanceMetric>(), Ok(DistanceMetric::Cosine));
        assert_eq!("ip".parse::<DistanceMetric>(), Ok(DistanceMetric::InnerProduct));
        assert!("manhattan".parse::<DistanceMetric>().is_err());
    }
}

use std::f32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DistanceMetric {
    InnerProduct,
    L2,
}

impl DistanceMetric {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InnerProduct => "inner_product",
            Self::L2 => "euclidean_squared",
        }
    }

    /// Converts an internal ranking distance (lower is closer) into the value
    /// reported to callers. Inner product is reported as a similarity.
    pub fn reported(self, dist: f32) -> f32 {
        match self {
            Self::InnerProduct => -dist,
            Self::L2 => dist,
        }
    }
}

/// Ranking distance: lower is always closer, whatever the metric.
#[inline]
pub fn distance(a: &[f32], b: &[f32], metric: DistanceMetric) -> f32 {
    match metric {
        DistanceMetric::InnerProduct => -dot_product(a, b),
        DistanceMetric::L2 => euclidean_squared(a, b),
    }
}

pub fn euclidean_squared(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::MAX;
    }

    let mut sum = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        let diff = x - y;
        sum += diff * diff;
    }
    sum
}

pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::MIN;
    }

    let mut sum = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        sum += x * y;
    }
    sum
}

//! 벡터/스코어 유틸리티

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 두 벡터 간의 코사인 유사도를 계산합니다.
/// 결과는 -1.0 ~ 1.0 범위이며, 길이가 다르거나 영벡터면 0.0입니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// 최대값 기준 정규화
///
/// 최대값이 0보다 크면 모든 값을 최대값으로 나눕니다.
/// 그렇지 않으면 (전부 0 또는 음수) 그대로 반환합니다.
pub fn normalize_by_max(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    if max > 0.0 {
        scores.iter().map(|s| s / max).collect()
    } else {
        scores.to_vec()
    }
}

// ============================================================================
// Tests
// ============================================================================

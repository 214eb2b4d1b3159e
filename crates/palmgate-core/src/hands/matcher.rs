use std::cmp::Ordering;

use palmgate_config::MatchPreset;
use serde::{Deserialize, Serialize};

use crate::hands::extractor::FeatureVector;
use crate::hands::landmarks::Handedness;

/// Thresholds and weights applied by [`verify`].
///
/// Two presets exist because deployments disagree on how strict the
/// variance gate and final cutoff should be; neither is authoritative, the
/// caller picks one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchPolicy {
    pub preset: MatchPreset,
    pub consensus_top_k: usize,
    pub consensus_min_votes: usize,
    pub consensus_similarity: f64,
    pub centroid_similarity: f64,
    pub std_floor: f64,
    pub variance_threshold: f64,
    /// When false the embedding gate always passes and fusion uses geometry alone.
    pub use_embedding: bool,
    pub embedding_similarity: f64,
    pub geometric_weight: f64,
    pub embedding_weight: f64,
    pub verification_threshold: f64,
    pub borderline_score: f64,
    pub low_confidence_score: f64,
    pub handedness_mismatch_confidence: f64,
}

impl MatchPolicy {
    pub fn hybrid_fused() -> Self {
        Self {
            preset: MatchPreset::HybridFused,
            consensus_top_k: 3,
            consensus_min_votes: 2,
            consensus_similarity: 0.94,
            centroid_similarity: 0.95,
            std_floor: 0.01,
            variance_threshold: 2.5,
            use_embedding: true,
            embedding_similarity: 0.85,
            geometric_weight: 0.7,
            embedding_weight: 0.3,
            verification_threshold: 0.93,
            borderline_score: 0.88,
            low_confidence_score: 0.80,
            handedness_mismatch_confidence: 0.1,
        }
    }

    pub fn strict_geometric() -> Self {
        Self {
            preset: MatchPreset::StrictGeometric,
            variance_threshold: 1.8,
            use_embedding: false,
            verification_threshold: 0.88,
            ..Self::hybrid_fused()
        }
    }

    pub fn from_preset(preset: MatchPreset) -> Self {
        match preset {
            MatchPreset::StrictGeometric => Self::strict_geometric(),
            MatchPreset::HybridFused => Self::hybrid_fused(),
        }
    }

    pub fn with_overrides(
        mut self,
        variance_threshold: Option<f64>,
        verification_threshold: Option<f64>,
    ) -> Self {
        if let Some(value) = variance_threshold {
            self.variance_threshold = value;
        }
        if let Some(value) = verification_threshold {
            self.verification_threshold = value;
        }
        self
    }
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self::hybrid_fused()
    }
}

/// Verification-time capture.
#[derive(Debug, Clone, PartialEq)]
pub struct Probe {
    pub features: FeatureVector,
    pub handedness: Option<Handedness>,
    pub embedding: Option<Vec<f64>>,
}

/// Plaintext enrollment data for one identity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnrollmentTemplate {
    pub vectors: Vec<FeatureVector>,
    pub handedness: Option<Handedness>,
    pub embeddings: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Verified,
    Rejected,
    ReRegister,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Verified => "VERIFIED",
            MatchStatus::Rejected => "REJECTED",
            MatchStatus::ReRegister => "RE_REGISTER",
        }
    }
}

/// Per-gate audit record. Written for every fully scored comparison,
/// whatever the final status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub preset: MatchPreset,
    pub geometric_score: f64,
    pub embedding_score: f64,
    pub embedding_available: bool,
    pub final_score: f64,
    pub avg_z_score: f64,
    pub top_similarities: Vec<f64>,
    pub consensus_votes: usize,
    pub consensus_passed: bool,
    pub centroid_passed: bool,
    pub variance_passed: bool,
    pub geometric_passed: bool,
    pub embedding_passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchDecision {
    Verified {
        confidence_score: f64,
        reason: String,
        telemetry: Telemetry,
    },
    Rejected {
        confidence_score: f64,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        telemetry: Option<Telemetry>,
    },
    /// The stored template was built with a different signature layout.
    ReRegister {
        confidence_score: f64,
        reason: String,
        probe_len: usize,
        template_len: usize,
    },
}

impl MatchDecision {
    pub fn status(&self) -> MatchStatus {
        match self {
            MatchDecision::Verified { .. } => MatchStatus::Verified,
            MatchDecision::Rejected { .. } => MatchStatus::Rejected,
            MatchDecision::ReRegister { .. } => MatchStatus::ReRegister,
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, MatchDecision::Verified { .. })
    }

    pub fn confidence_score(&self) -> f64 {
        match self {
            MatchDecision::Verified {
                confidence_score, ..
            }
            | MatchDecision::Rejected {
                confidence_score, ..
            }
            | MatchDecision::ReRegister {
                confidence_score, ..
            } => *confidence_score,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            MatchDecision::Verified { reason, .. }
            | MatchDecision::Rejected { reason, .. }
            | MatchDecision::ReRegister { reason, .. } => reason,
        }
    }

    pub fn telemetry(&self) -> Option<&Telemetry> {
        match self {
            MatchDecision::Verified { telemetry, .. } => Some(telemetry),
            MatchDecision::Rejected { telemetry, .. } => telemetry.as_ref(),
            MatchDecision::ReRegister { .. } => None,
        }
    }
}

/// Decides whether `probe` belongs to the identity enrolled as `template`.
///
/// Checks run in priority order and the first deciding branch wins: empty
/// template, handedness mismatch, dimension mismatch, then the geometric and
/// embedding gates followed by score fusion.
pub fn verify(
    probe: &Probe,
    template: &EnrollmentTemplate,
    policy: &MatchPolicy,
) -> MatchDecision {
    if template.vectors.is_empty() {
        return MatchDecision::Rejected {
            confidence_score: 0.0,
            reason: "Biometric profile empty or corrupt.".into(),
            telemetry: None,
        };
    }

    if let (Some(current), Some(enrolled)) = (probe.handedness, template.handedness) {
        if current != enrolled {
            return MatchDecision::Rejected {
                confidence_score: policy.handedness_mismatch_confidence,
                reason: format!(
                    "Skeletal mismatch: enrolled hand is {enrolled}, but {current} hand was detected."
                ),
                telemetry: None,
            };
        }
    }

    let probe_len = probe.features.len();
    if let Some(stored) = template.vectors.iter().find(|v| v.len() != probe_len) {
        return MatchDecision::ReRegister {
            confidence_score: 0.0,
            reason: format!(
                "Biometric profile outdated: enrolled signature has {} values, probe has {probe_len}. Please re-register.",
                stored.len()
            ),
            probe_len,
            template_len: stored.len(),
        };
    }

    let embedding_pair = match (&probe.embedding, policy.use_embedding) {
        (Some(embedding), true) if !template.embeddings.is_empty() => {
            Some((embedding.as_slice(), template.embeddings.as_slice()))
        }
        _ => None,
    };
    if let Some((embedding, stored)) = embedding_pair {
        if let Some(mismatch) = stored.iter().find(|e| e.len() != embedding.len()) {
            return MatchDecision::ReRegister {
                confidence_score: 0.0,
                reason: format!(
                    "Biometric profile outdated: enrolled embedding has {} values, probe has {}. Please re-register.",
                    mismatch.len(),
                    embedding.len()
                ),
                probe_len: embedding.len(),
                template_len: mismatch.len(),
            };
        }
    }

    let probe_values = probe.features.as_slice();
    let stored: Vec<&[f64]> = template.vectors.iter().map(FeatureVector::as_slice).collect();

    let mut similarities: Vec<f64> = stored
        .iter()
        .map(|vector| cosine_similarity(probe_values, vector))
        .collect();
    similarities.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
    similarities.truncate(policy.consensus_top_k);
    let consensus_votes = similarities
        .iter()
        .filter(|&&s| s >= policy.consensus_similarity)
        .count();
    let consensus_passed = consensus_votes >= policy.consensus_min_votes;

    let (mean, std) = column_stats(&stored, probe_len, policy.std_floor);
    let geometric_score = cosine_similarity(probe_values, &mean);
    let centroid_passed = geometric_score >= policy.centroid_similarity;

    let avg_z_score = average_z_score(probe_values, &mean, &std);
    let variance_passed = avg_z_score < policy.variance_threshold;

    let geometric_passed = consensus_passed && centroid_passed && variance_passed;

    let (embedding_score, embedding_passed, embedding_available) = match embedding_pair {
        Some((embedding, stored)) => {
            let best = stored
                .iter()
                .map(|candidate| cosine_similarity(embedding, candidate))
                .fold(f64::NEG_INFINITY, f64::max);
            (best, best > policy.embedding_similarity, true)
        }
        None => (geometric_score, true, false),
    };

    let final_score =
        policy.geometric_weight * geometric_score + policy.embedding_weight * embedding_score;
    let verified =
        geometric_passed && embedding_passed && final_score > policy.verification_threshold;

    let telemetry = Telemetry {
        preset: policy.preset,
        geometric_score,
        embedding_score,
        embedding_available,
        final_score,
        avg_z_score,
        top_similarities: similarities,
        consensus_votes,
        consensus_passed,
        centroid_passed,
        variance_passed,
        geometric_passed,
        embedding_passed,
    };
    let confidence_score = final_score.clamp(0.0, 1.0);

    if verified {
        let reason = if embedding_available {
            "Hybrid identity confirmed."
        } else {
            "Geometric identity confirmed."
        };
        MatchDecision::Verified {
            confidence_score,
            reason: reason.into(),
            telemetry,
        }
    } else {
        MatchDecision::Rejected {
            confidence_score,
            reason: rejection_reason(final_score, policy).into(),
            telemetry: Some(telemetry),
        }
    }
}

fn rejection_reason(final_score: f64, policy: &MatchPolicy) -> &'static str {
    if final_score > policy.borderline_score {
        "Borderline match. Ensure your palm is fully flat and centrally aligned."
    } else if final_score > policy.low_confidence_score {
        "Low confidence match. Lighting or orientation may be suboptimal."
    } else {
        "Identity mismatch. The scanned hand does not align with the enrolled profile."
    }
}

/// Cosine similarity of two equal-length vectors; 0.0 when either has no magnitude.
pub fn cosine_similarity(lhs: &[f64], rhs: &[f64]) -> f64 {
    let mut dot = 0.0;
    let mut norm_lhs = 0.0;
    let mut norm_rhs = 0.0;

    for (l, r) in lhs.iter().zip(rhs.iter()) {
        dot += l * r;
        norm_lhs += l * l;
        norm_rhs += r * r;
    }

    let denominator = norm_lhs.sqrt() * norm_rhs.sqrt();
    if denominator <= f64::EPSILON {
        return 0.0;
    }
    dot / denominator
}

/// Per-dimension mean and population standard deviation, std floored.
fn column_stats(vectors: &[&[f64]], len: usize, std_floor: f64) -> (Vec<f64>, Vec<f64>) {
    let count = vectors.len() as f64;
    let mut mean = vec![0.0; len];
    for vector in vectors {
        for (acc, value) in mean.iter_mut().zip(vector.iter()) {
            *acc += value;
        }
    }
    for value in &mut mean {
        *value /= count;
    }

    let mut std = vec![0.0; len];
    for vector in vectors {
        for ((acc, value), m) in std.iter_mut().zip(vector.iter()).zip(mean.iter()) {
            *acc += (value - m).powi(2);
        }
    }
    for value in &mut std {
        *value = (*value / count).sqrt();
        if *value < std_floor {
            *value = std_floor;
        }
    }

    (mean, std)
}

fn average_z_score(probe: &[f64], mean: &[f64], std: &[f64]) -> f64 {
    if probe.is_empty() {
        return 0.0;
    }
    let total: f64 = probe
        .iter()
        .zip(mean.iter().zip(std.iter()))
        .map(|(value, (m, s))| (value - m).abs() / s)
        .sum();
    total / probe.len() as f64
}

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::hands::landmarks::{
    EmbeddingProvider, Handedness, JsonCaptureProvider, Landmark, LandmarkProvider, LandmarkSet,
    LANDMARK_COUNT, MIDDLE_BASE, WRIST,
};

/// Length of the geometric signature produced by [`extract_features`].
pub const FEATURE_LEN: usize = 48;

const FINGERTIPS: [usize; 5] = [4, 8, 12, 16, 20];
/// `[base, PIP, DIP, tip]` for index, middle, ring and pinky.
const FINGER_JOINTS: [[usize; 4]; 4] = [
    [5, 6, 7, 8],
    [9, 10, 11, 12],
    [13, 14, 15, 16],
    [17, 18, 19, 20],
];
const PALM_WIDTH: (usize, usize) = (5, 17);
const WRIST_TRIANGLES: [(usize, usize); 3] = [(5, 9), (9, 13), (13, 17)];
const SEGMENT_RATIO_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }
}

impl From<Vec<f64>> for FeatureVector {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

/// Derives the 48-value scale and rotation invariant hand signature.
///
/// Layout, in order:
/// * 20 wrist-to-landmark distances for landmarks 1..=20
/// * 4 angles at the wrist between consecutive fingertips, thumb to pinky
/// * 5 segment features for each of index, middle, ring and pinky: the
///   tip-DIP, DIP-PIP and PIP-base lengths plus the two adjacent segment ratios
/// * palm width (index base to pinky base)
/// * 3 wrist triangle areas over consecutive finger bases
///
/// Lengths are divided by the wrist to middle-finger-base distance and areas
/// by its square. Only `x` and `y` participate.
pub fn extract_features(landmarks: &LandmarkSet) -> AppResult<FeatureVector> {
    let pts = landmarks.points();
    let wrist = pts[WRIST];
    let reference = distance(wrist, pts[MIDDLE_BASE]);
    if reference == 0.0 || !reference.is_finite() {
        return Err(AppError::DegenerateInput {
            message: format!(
                "wrist and middle finger base coincide (reference distance {reference})"
            ),
        });
    }

    let mut features = Vec::with_capacity(FEATURE_LEN);

    for point in &pts[1..LANDMARK_COUNT] {
        features.push(distance(wrist, *point) / reference);
    }

    for pair in FINGERTIPS.windows(2) {
        features.push(angle_at(pts[pair[0]], wrist, pts[pair[1]]));
    }

    for [base, pip, dip, tip] in FINGER_JOINTS {
        let tip_dip = distance(pts[tip], pts[dip]);
        let dip_pip = distance(pts[dip], pts[pip]);
        let pip_base = distance(pts[pip], pts[base]);
        features.push(tip_dip / reference);
        features.push(dip_pip / reference);
        features.push(pip_base / reference);
        features.push(tip_dip / (dip_pip + SEGMENT_RATIO_EPSILON));
        features.push(dip_pip / (pip_base + SEGMENT_RATIO_EPSILON));
    }

    features.push(distance(pts[PALM_WIDTH.0], pts[PALM_WIDTH.1]) / reference);

    let reference_sq = reference * reference;
    for (a, b) in WRIST_TRIANGLES {
        features.push(triangle_area(wrist, pts[a], pts[b]) / reference_sq);
    }

    debug_assert_eq!(features.len(), FEATURE_LEN);
    Ok(FeatureVector(features))
}

#[derive(Debug, Clone)]
pub struct HandExtractionConfig {
    pub capture: PathBuf,
    pub output: Option<PathBuf>,
}

impl HandExtractionConfig {
    pub fn default_output_path(&self) -> PathBuf {
        self.capture.with_extension("features.json")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandExtractionSummary {
    pub capture_path: String,
    pub output_path: String,
    pub handedness: Option<Handedness>,
    pub feature_len: usize,
    pub features: FeatureVector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f64>>,
}

#[derive(Debug)]
pub struct HandExtractionOutcome {
    pub summary: HandExtractionSummary,
    pub logs: Vec<String>,
}

pub fn run_hand_extraction(config: &HandExtractionConfig) -> AppResult<HandExtractionOutcome> {
    let provider = JsonCaptureProvider;
    run_hand_extraction_with(config, &provider, &provider)
}

pub fn run_hand_extraction_with<L, E>(
    config: &HandExtractionConfig,
    landmarks: &L,
    embeddings: &E,
) -> AppResult<HandExtractionOutcome>
where
    L: LandmarkProvider,
    E: EmbeddingProvider,
{
    let mut logs = Vec::new();
    let capture = &config.capture;

    let set = landmarks
        .detect(capture)?
        .ok_or_else(|| AppError::NoHandDetected {
            path: capture.clone(),
        })?;
    logs.push(format!(
        "Detected {} hand in {}",
        set.handedness().map(|h| h.as_str()).unwrap_or("unlabelled"),
        capture.display()
    ));

    let features = extract_features(&set)?;
    debug!(capture = %capture.display(), len = features.len(), "extracted hand features");
    logs.push(format!("Feature vector length: {}", features.len()));

    let embedding = embeddings.embed(capture)?;
    if let Some(embedding) = &embedding {
        logs.push(format!("Embedding vector length: {}", embedding.len()));
    }

    let output_path = config
        .output
        .clone()
        .unwrap_or_else(|| config.default_output_path());

    let summary = HandExtractionSummary {
        capture_path: capture.display().to_string(),
        output_path: output_path.display().to_string(),
        handedness: set.handedness(),
        feature_len: features.len(),
        features,
        embedding,
    };

    persist_summary(&summary, &output_path)?;
    logs.push(format!("Saved feature data to {}", output_path.display()));

    Ok(HandExtractionOutcome { summary, logs })
}

fn persist_summary(summary: &HandExtractionSummary, output_path: &Path) -> AppResult<()> {
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent).map_err(|err| AppError::FeatureWrite {
            path: parent.to_path_buf(),
            source: err,
        })?;
    }

    let file = File::create(output_path).map_err(|err| AppError::FeatureWrite {
        path: output_path.to_path_buf(),
        source: err,
    })?;

    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, summary)?;
    writer.flush().map_err(|err| AppError::FeatureWrite {
        path: output_path.to_path_buf(),
        source: err,
    })?;

    Ok(())
}

fn distance(a: Landmark, b: Landmark) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

/// Angle at `vertex` between the rays towards `a` and `b`, in radians.
fn angle_at(a: Landmark, vertex: Landmark, b: Landmark) -> f64 {
    let (ax, ay) = (a.x - vertex.x, a.y - vertex.y);
    let (bx, by) = (b.x - vertex.x, b.y - vertex.y);
    let norm_a = ax.hypot(ay);
    let norm_b = bx.hypot(by);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let cos = (ax / norm_a) * (bx / norm_b) + (ay / norm_a) * (by / norm_b);
    cos.clamp(-1.0, 1.0).acos()
}

fn triangle_area(origin: Landmark, a: Landmark, b: Landmark) -> f64 {
    let (ax, ay) = (a.x - origin.x, a.y - origin.y);
    let (bx, by) = (b.x - origin.x, b.y - origin.y);
    0.5 * (ax * by - ay * bx).abs()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// A plausible open right hand in normalized image coordinates.
    pub(crate) fn sample_hand() -> Vec<Landmark> {
        [
            (0.50, 0.90),
            (0.42, 0.84),
            (0.36, 0.77),
            (0.32, 0.70),
            (0.29, 0.64),
            (0.44, 0.62),
            (0.43, 0.52),
            (0.425, 0.46),
            (0.42, 0.41),
            (0.50, 0.60),
            (0.50, 0.49),
            (0.50, 0.42),
            (0.50, 0.36),
            (0.56, 0.62),
            (0.57, 0.52),
            (0.575, 0.46),
            (0.58, 0.41),
            (0.61, 0.66),
            (0.63, 0.58),
            (0.64, 0.54),
            (0.65, 0.50),
        ]
        .iter()
        .map(|&(x, y)| Landmark { x, y, z: 0.0 })
        .collect()
    }

    fn transformed(points: &[Landmark], scale: f64, radians: f64) -> Vec<Landmark> {
        let origin = points[WRIST];
        let (sin, cos) = radians.sin_cos();
        points
            .iter()
            .map(|p| {
                let dx = (p.x - origin.x) * scale;
                let dy = (p.y - origin.y) * scale;
                Landmark {
                    x: origin.x + dx * cos - dy * sin,
                    y: origin.y + dx * sin + dy * cos,
                    z: p.z,
                }
            })
            .collect()
    }

    fn features_for(points: Vec<Landmark>) -> Vec<f64> {
        let set = LandmarkSet::new(points, Some(Handedness::Right)).unwrap();
        extract_features(&set).unwrap().into_inner()
    }

    #[test]
    fn produces_full_length_finite_values() {
        let features = features_for(sample_hand());
        assert_eq!(features.len(), FEATURE_LEN);
        assert!(features.iter().all(|v| v.is_finite()));
        // Landmark 9 is the reference point itself.
        assert!((features[MIDDLE_BASE - 1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn uniform_scaling_about_wrist_is_invariant() {
        let base = features_for(sample_hand());
        let scaled = features_for(transformed(&sample_hand(), 0.37, 0.0));
        for (idx, (a, b)) in base.iter().zip(scaled.iter()).enumerate() {
            assert!((a - b).abs() < 1e-3, "feature {idx} drifted: {a} vs {b}");
        }
    }

    #[test]
    fn rotation_about_wrist_is_invariant() {
        let base = features_for(sample_hand());
        let rotated = features_for(transformed(&sample_hand(), 1.0, 0.8));
        for (idx, (a, b)) in base.iter().zip(rotated.iter()).enumerate() {
            assert!((a - b).abs() < 1e-9, "feature {idx} drifted: {a} vs {b}");
        }
    }

    #[test]
    fn extraction_is_deterministic() {
        assert_eq!(features_for(sample_hand()), features_for(sample_hand()));
    }

    #[test]
    fn coincident_wrist_and_middle_base_is_degenerate() {
        let mut points = sample_hand();
        points[MIDDLE_BASE] = points[WRIST];
        let set = LandmarkSet::new(points, None).unwrap();
        let err = extract_features(&set).unwrap_err();
        assert!(matches!(err, AppError::DegenerateInput { .. }));
    }

    #[test]
    fn coincident_fingertip_yields_zero_angle() {
        let wrist = Landmark::new(0.5, 0.5);
        assert_eq!(angle_at(wrist, wrist, Landmark::new(0.7, 0.5)), 0.0);
        let right_angle = angle_at(Landmark::new(0.6, 0.5), wrist, Landmark::new(0.5, 0.6));
        assert!((right_angle - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn triangle_area_ignores_orientation() {
        let o = Landmark::new(0.0, 0.0);
        let a = Landmark::new(1.0, 0.0);
        let b = Landmark::new(0.0, 1.0);
        assert_eq!(triangle_area(o, a, b), 0.5);
        assert_eq!(triangle_area(o, b, a), 0.5);
    }

    #[test]
    fn extraction_writes_summary_next_to_capture() {
        let tmp = TempDir::new().unwrap();
        let capture = tmp.path().join("hand.json");
        let payload = serde_json::json!({
            "handedness": "Left",
            "landmarks": sample_hand(),
            "embedding": [0.25, 0.75],
        });
        std::fs::write(&capture, payload.to_string()).unwrap();

        let config = HandExtractionConfig {
            capture: capture.clone(),
            output: None,
        };
        let outcome = run_hand_extraction(&config).unwrap();
        assert_eq!(outcome.summary.feature_len, FEATURE_LEN);
        assert_eq!(outcome.summary.handedness, Some(Handedness::Left));

        let written = std::fs::read_to_string(tmp.path().join("hand.features.json")).unwrap();
        let parsed: HandExtractionSummary = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed.features, outcome.summary.features);
        assert_eq!(parsed.embedding, Some(vec![0.25, 0.75]));
    }

    #[test]
    fn extraction_without_hand_fails() {
        let tmp = TempDir::new().unwrap();
        let capture = tmp.path().join("empty.json");
        std::fs::write(&capture, r#"{"landmarks": []}"#).unwrap();
        let config = HandExtractionConfig {
            capture,
            output: Some(tmp.path().join("out.json")),
        };
        let err = run_hand_extraction(&config).unwrap_err();
        assert!(matches!(err, AppError::NoHandDetected { .. }));
        assert!(!tmp.path().join("out.json").exists());
    }
}

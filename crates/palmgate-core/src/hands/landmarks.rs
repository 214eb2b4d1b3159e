use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

/// Number of tracked points in one hand skeleton.
pub const LANDMARK_COUNT: usize = 21;

pub const WRIST: usize = 0;
pub const MIDDLE_BASE: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Handedness {
    #[serde(alias = "left", alias = "LEFT")]
    Left,
    #[serde(alias = "right", alias = "RIGHT")]
    Right,
}

impl Handedness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Handedness::Left => "Left",
            Handedness::Right => "Right",
        }
    }
}

impl fmt::Display for Handedness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Handedness {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(Handedness::Left),
            "right" => Ok(Handedness::Right),
            other => Err(format!("unknown hand type '{other}'")),
        }
    }
}

/// The 21 landmarks of one detected hand plus the detector's hand label.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    points: [Landmark; LANDMARK_COUNT],
    handedness: Option<Handedness>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Landmark>, handedness: Option<Handedness>) -> Result<Self, String> {
        let found = points.len();
        let points: [Landmark; LANDMARK_COUNT] = points
            .try_into()
            .map_err(|_| format!("expected {LANDMARK_COUNT} landmarks, found {found}"))?;
        Ok(Self { points, handedness })
    }

    pub fn point(&self, index: usize) -> Landmark {
        self.points[index]
    }

    pub fn points(&self) -> &[Landmark; LANDMARK_COUNT] {
        &self.points
    }

    pub fn handedness(&self) -> Option<Handedness> {
        self.handedness
    }
}

/// On-disk payload produced by the external hand landmark detector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandCapture {
    #[serde(default)]
    pub handedness: Option<Handedness>,
    #[serde(default)]
    pub landmarks: Vec<Landmark>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f64>>,
}

pub fn load_capture(path: &Path) -> AppResult<HandCapture> {
    if !path.exists() {
        return Err(AppError::MissingInput {
            path: path.to_path_buf(),
        });
    }
    let file = File::open(path).map_err(|source| AppError::FeatureRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|err| AppError::InvalidCapture {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

pub trait LandmarkProvider {
    /// Returns `None` when the source contains no detectable hand.
    fn detect(&self, source: &Path) -> AppResult<Option<LandmarkSet>>;
}

pub trait EmbeddingProvider {
    fn embed(&self, source: &Path) -> AppResult<Option<Vec<f64>>>;
}

/// Reads detector output from JSON capture files.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCaptureProvider;

impl LandmarkProvider for JsonCaptureProvider {
    fn detect(&self, source: &Path) -> AppResult<Option<LandmarkSet>> {
        let capture = load_capture(source)?;
        if capture.landmarks.is_empty() {
            return Ok(None);
        }
        LandmarkSet::new(capture.landmarks, capture.handedness)
            .map(Some)
            .map_err(|message| AppError::InvalidCapture {
                path: source.to_path_buf(),
                message,
            })
    }
}

impl EmbeddingProvider for JsonCaptureProvider {
    fn embed(&self, source: &Path) -> AppResult<Option<Vec<f64>>> {
        let capture = load_capture(source)?;
        match capture.embedding {
            Some(embedding) if embedding.is_empty() => Err(AppError::InvalidCapture {
                path: source.to_path_buf(),
                message: "embedding vector is empty".into(),
            }),
            other => Ok(other),
        }
    }
}

/// Embedding provider for deployments without an embedding model.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEmbeddings;

impl EmbeddingProvider for NoEmbeddings {
    fn embed(&self, _source: &Path) -> AppResult<Option<Vec<f64>>> {
        Ok(None)
    }
}

pub(crate) fn display_sources(sources: &[PathBuf]) -> String {
    sources
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_json(dir: &TempDir, name: &str, value: serde_json::Value) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();
        path
    }

    fn points(count: usize) -> Vec<serde_json::Value> {
        (0..count)
            .map(|i| json!({ "x": 0.1 + i as f64 * 0.01, "y": 0.2, "z": -0.01 }))
            .collect()
    }

    #[test]
    fn landmark_set_requires_exactly_21_points() {
        let err = LandmarkSet::new(vec![Landmark::new(0.0, 0.0); 20], None).unwrap_err();
        assert!(err.contains("found 20"));
        assert!(LandmarkSet::new(vec![Landmark::new(0.0, 0.0); 21], None).is_ok());
    }

    #[test]
    fn handedness_parses_case_insensitively() {
        assert_eq!("LEFT".parse::<Handedness>().unwrap(), Handedness::Left);
        assert_eq!(" right ".parse::<Handedness>().unwrap(), Handedness::Right);
        assert!("both".parse::<Handedness>().is_err());
        let parsed: Handedness = serde_json::from_str("\"left\"").unwrap();
        assert_eq!(parsed, Handedness::Left);
    }

    #[test]
    fn provider_reads_landmarks_and_embedding() {
        let tmp = TempDir::new().unwrap();
        let path = write_json(
            &tmp,
            "capture.json",
            json!({ "handedness": "Right", "landmarks": points(21), "embedding": [0.5, 0.5] }),
        );

        let provider = JsonCaptureProvider;
        let set = provider.detect(&path).unwrap().expect("hand expected");
        assert_eq!(set.handedness(), Some(Handedness::Right));
        assert!((set.point(3).x - 0.13).abs() < 1e-12);
        assert_eq!(provider.embed(&path).unwrap(), Some(vec![0.5, 0.5]));
    }

    #[test]
    fn provider_reports_no_hand_for_empty_landmarks() {
        let tmp = TempDir::new().unwrap();
        let path = write_json(&tmp, "empty.json", json!({ "landmarks": [] }));
        assert!(JsonCaptureProvider.detect(&path).unwrap().is_none());
        assert!(JsonCaptureProvider.embed(&path).unwrap().is_none());
    }

    #[test]
    fn provider_rejects_wrong_landmark_count() {
        let tmp = TempDir::new().unwrap();
        let path = write_json(&tmp, "short.json", json!({ "landmarks": points(5) }));
        let err = JsonCaptureProvider.detect(&path).unwrap_err();
        assert!(matches!(err, AppError::InvalidCapture { .. }));
    }

    #[test]
    fn missing_capture_is_reported() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("missing.json");
        match JsonCaptureProvider.detect(&missing).unwrap_err() {
            AppError::MissingInput { path } => assert_eq!(path, missing),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}

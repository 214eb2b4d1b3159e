use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use palmgate_config::DEFAULT_MIN_ENROLLMENT_SAMPLES;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::hands::extractor::extract_features;
use crate::hands::landmarks::{
    display_sources, EmbeddingProvider, Handedness, JsonCaptureProvider, LandmarkProvider,
};
use crate::hands::store::{
    user_store_path, EnrolledSample, EnvStoreDirResolver, FilesystemTemplateStore,
    StoreDirResolver, StoredTemplate, TemplateStore,
};
use crate::secret_service::{KeyProvider, SecretServiceKeyProvider};

#[derive(Debug, Clone)]
pub struct HandEnrollmentConfig {
    pub user: String,
    pub captures: Vec<PathBuf>,
    pub store_dir: Option<PathBuf>,
    pub min_samples: usize,
}

impl HandEnrollmentConfig {
    pub fn new(user: impl Into<String>, captures: Vec<PathBuf>) -> Self {
        Self {
            user: user.into(),
            captures,
            store_dir: None,
            min_samples: DEFAULT_MIN_ENROLLMENT_SAMPLES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HandRemovalConfig {
    pub user: String,
    pub sample_ids: Vec<String>,
    pub remove_all: bool,
    pub store_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrollmentRecord {
    pub id: String,
    pub feature_len: usize,
    pub has_embedding: bool,
    pub source: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkippedCapture {
    pub source: String,
    pub reason: String,
}

#[derive(Debug)]
pub struct HandEnrollmentOutcome {
    pub user: String,
    pub store_path: PathBuf,
    pub handedness: Option<Handedness>,
    pub enrolled: Vec<EnrollmentRecord>,
    pub skipped: Vec<SkippedCapture>,
    pub replaced: usize,
    pub logs: Vec<String>,
}

#[derive(Debug)]
pub struct HandRemovalOutcome {
    pub user: String,
    pub store_path: PathBuf,
    pub removed_ids: Vec<String>,
    pub remaining: usize,
    pub cleared: bool,
    pub logs: Vec<String>,
}

pub fn run_hand_enrollment(config: &HandEnrollmentConfig) -> AppResult<HandEnrollmentOutcome> {
    let store = FilesystemTemplateStore;
    let resolver = EnvStoreDirResolver;
    let keys = SecretServiceKeyProvider;
    let provider = JsonCaptureProvider;
    run_hand_enrollment_with(config, &store, &keys, &resolver, &provider, &provider)
}

/// Builds a fresh template from `config.captures` and replaces whatever the
/// user had enrolled before.
///
/// Captures that show no hand, carry no handedness label or have degenerate
/// geometry are skipped and reported in the outcome. Every other error aborts
/// the enrollment without touching the store.
pub fn run_hand_enrollment_with<S, K, R, L, E>(
    config: &HandEnrollmentConfig,
    store: &S,
    keys: &K,
    resolver: &R,
    landmarks: &L,
    embeddings: &E,
) -> AppResult<HandEnrollmentOutcome>
where
    S: TemplateStore,
    K: KeyProvider,
    R: StoreDirResolver,
    L: LandmarkProvider,
    E: EmbeddingProvider,
{
    validate_user_name(&config.user)?;

    let mut logs = Vec::new();
    logs.push(format!(
        "Reading {} capture(s): {}",
        config.captures.len(),
        display_sources(&config.captures)
    ));

    let mut samples = Vec::with_capacity(config.captures.len());
    let mut skipped = Vec::new();
    let mut hand_types: Vec<(Handedness, String)> = Vec::new();

    for capture in &config.captures {
        let source = capture.display().to_string();
        let Some(set) = landmarks.detect(capture)? else {
            warn!(user = %config.user, capture = %source, "no hand detected; skipping sample");
            logs.push(format!("Skipped {source}: no hand detected"));
            skipped.push(SkippedCapture {
                source,
                reason: "no hand detected".into(),
            });
            continue;
        };

        let Some(hand) = set.handedness() else {
            warn!(
                user = %config.user,
                capture = %source,
                "handedness not reported; skipping sample"
            );
            logs.push(format!("Skipped {source}: handedness not reported"));
            skipped.push(SkippedCapture {
                source,
                reason: "handedness not reported".into(),
            });
            continue;
        };

        let features = match extract_features(&set) {
            Ok(features) => features,
            Err(AppError::DegenerateInput { message }) => {
                warn!(
                    user = %config.user,
                    capture = %source,
                    %message,
                    "degenerate hand geometry; skipping sample"
                );
                logs.push(format!("Skipped {source}: {message}"));
                skipped.push(SkippedCapture {
                    source,
                    reason: message,
                });
                continue;
            }
            Err(err) => return Err(err),
        };

        hand_types.push((hand, source.clone()));

        let embedding = embeddings.embed(capture)?;
        debug!(
            user = %config.user,
            capture = %source,
            feature_len = features.len(),
            embedding_len = embedding.as_ref().map(Vec::len),
            "accepted enrollment sample"
        );

        samples.push(EnrolledSample {
            id: Uuid::new_v4().to_string(),
            features,
            embedding,
            source,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        });
    }

    let required = config.min_samples.max(1);
    if samples.len() < required {
        return Err(AppError::InsufficientSamples {
            required,
            found: samples.len(),
        });
    }

    let handedness = single_handedness(&hand_types)?;
    ensure_uniform_embeddings(&samples)?;

    let store_path = user_store_path(resolver, config.store_dir.as_deref(), &config.user);
    let current_key = keys.current_key(&config.user)?;
    let replaced = store
        .load(&store_path, current_key.as_deref())?
        .map(|previous| previous.samples.len())
        .unwrap_or(0);

    let enrolled = samples
        .iter()
        .map(|sample| EnrollmentRecord {
            id: sample.id.clone(),
            feature_len: sample.features.len(),
            has_embedding: sample.embedding.is_some(),
            source: sample.source.clone(),
            created_at: sample.created_at.clone(),
        })
        .collect::<Vec<_>>();

    let template = StoredTemplate {
        user: config.user.clone(),
        handedness,
        samples,
        updated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    };

    let new_key = keys.generate();
    store.save(&store_path, &template, Some(new_key.as_bytes()))?;
    keys.store(&config.user, &new_key)?;

    if replaced > 0 {
        logs.push(format!("Replaced previous template with {replaced} sample(s)"));
    }
    logs.push(format!(
        "Enrolled {} sample(s) for user {}{}",
        enrolled.len(),
        config.user,
        handedness
            .map(|hand| format!(" ({hand} hand)"))
            .unwrap_or_default()
    ));
    logs.push(format!("Template store: {}", store_path.display()));
    logs.push(format!(
        "Rotated Secret Service template key for user {}",
        config.user
    ));

    Ok(HandEnrollmentOutcome {
        user: config.user.clone(),
        store_path,
        handedness,
        enrolled,
        skipped,
        replaced,
        logs,
    })
}

pub fn run_hand_removal(config: &HandRemovalConfig) -> AppResult<HandRemovalOutcome> {
    let store = FilesystemTemplateStore;
    let resolver = EnvStoreDirResolver;
    let keys = SecretServiceKeyProvider;
    run_hand_removal_with(config, &store, &keys, &resolver)
}

pub fn run_hand_removal_with<S, K, R>(
    config: &HandRemovalConfig,
    store: &S,
    keys: &K,
    resolver: &R,
) -> AppResult<HandRemovalOutcome>
where
    S: TemplateStore,
    K: KeyProvider,
    R: StoreDirResolver,
{
    validate_user_name(&config.user)?;

    let mut logs = Vec::new();
    let store_path = user_store_path(resolver, config.store_dir.as_deref(), &config.user);
    let key_bytes = keys.current_key(&config.user)?;

    let existing = store.load(&store_path, key_bytes.as_deref())?;
    let sample_count = existing.as_ref().map_or(0, |t| t.samples.len());
    logs.push(format!(
        "Loaded {} sample(s) for user {}",
        sample_count, config.user
    ));

    if config.remove_all {
        let removed_ids = existing
            .map(|template| template.samples.into_iter().map(|s| s.id).collect())
            .unwrap_or_default();
        store.delete(&store_path)?;
        logs.push(format!("Removed template for user {}", config.user));
        return Ok(HandRemovalOutcome {
            user: config.user.clone(),
            store_path,
            removed_ids,
            remaining: 0,
            cleared: true,
            logs,
        });
    }

    let Some(mut template) = existing else {
        return Err(match config.sample_ids.first() {
            Some(first) => AppError::SampleNotFound {
                user: config.user.clone(),
                sample_id: first.clone(),
            },
            None => AppError::TemplateNotFound {
                user: config.user.clone(),
            },
        });
    };

    let requested: HashSet<&str> = config.sample_ids.iter().map(String::as_str).collect();
    if let Some(missing) = requested
        .iter()
        .find(|id| !template.samples.iter().any(|s| s.id == **id))
    {
        return Err(AppError::SampleNotFound {
            user: config.user.clone(),
            sample_id: missing.to_string(),
        });
    }

    let mut removed_ids = Vec::new();
    template.samples.retain(|sample| {
        let remove = requested.contains(sample.id.as_str());
        if remove {
            removed_ids.push(sample.id.clone());
        }
        !remove
    });

    let remaining = template.samples.len();
    let cleared = remaining == 0;
    if cleared {
        store.delete(&store_path)?;
        logs.push(format!(
            "Removed last sample; template for user {} deleted",
            config.user
        ));
    } else {
        template.updated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        store.save(&store_path, &template, key_bytes.as_deref())?;
    }

    logs.push(format!(
        "Removed {} sample(s) for user {}",
        removed_ids.len(),
        config.user
    ));
    logs.push(format!("Template now contains {remaining} sample(s)"));

    Ok(HandRemovalOutcome {
        user: config.user.clone(),
        store_path,
        removed_ids,
        remaining,
        cleared,
        logs,
    })
}

pub fn validate_user_name(user: &str) -> AppResult<()> {
    if user.is_empty() {
        return Err(AppError::InvalidUser {
            user: user.to_string(),
            message: "user name cannot be empty".into(),
        });
    }

    if !user
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
    {
        return Err(AppError::InvalidUser {
            user: user.to_string(),
            message: "use ASCII letters, numbers, '-' or '_' only".into(),
        });
    }

    Ok(())
}

fn single_handedness(hand_types: &[(Handedness, String)]) -> AppResult<Option<Handedness>> {
    let Some((first, first_source)) = hand_types.first() else {
        return Ok(None);
    };
    if let Some((other, source)) = hand_types.iter().find(|(hand, _)| hand != first) {
        return Err(AppError::InconsistentHandedness {
            message: format!(
                "{first_source} shows a {first} hand but {source} shows a {other} hand"
            ),
        });
    }
    Ok(Some(*first))
}

fn ensure_uniform_embeddings(samples: &[EnrolledSample]) -> AppResult<()> {
    let mut lengths = samples
        .iter()
        .filter_map(|sample| sample.embedding.as_ref().map(|e| (e.len(), &sample.source)));
    let Some((expected, _)) = lengths.next() else {
        return Ok(());
    };
    if let Some((found, source)) = lengths.find(|(len, _)| *len != expected) {
        return Err(AppError::InvalidCapture {
            path: PathBuf::from(source),
            message: format!(
                "embedding length mismatch across samples (expected {expected}, found {found})"
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::Path;

    use crate::hands::extractor::tests::sample_hand;
    use crate::hands::extractor::FEATURE_LEN;
    use crate::hands::landmarks::{LandmarkSet, NoEmbeddings, WRIST, MIDDLE_BASE};
    use crate::secret_service::{TemplateKey, TemplateKeyStatus};

    #[test]
    fn enroll_replaces_template_and_rotates_key() {
        let captures = capture_paths(5);
        let landmarks = StubLandmarks::right_hands(&captures);
        let store = InMemoryStore::with_existing(3);
        let keys = StubKeyProvider::default();
        let resolver = FixedStoreResolver(PathBuf::from("/templates"));
        let config = HandEnrollmentConfig::new("alice", captures);

        let outcome =
            run_hand_enrollment_with(&config, &store, &keys, &resolver, &landmarks, &NoEmbeddings)
                .unwrap();

        assert_eq!(outcome.enrolled.len(), 5);
        assert_eq!(outcome.replaced, 3);
        assert_eq!(outcome.handedness, Some(Handedness::Right));
        assert_eq!(outcome.store_path, PathBuf::from("/templates/alice.json"));

        let saved = store.saved.borrow();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].samples.len(), 5);
        assert!(saved[0].samples.iter().all(|s| s.features.len() == FEATURE_LEN));
        assert_eq!(keys.saved_keys.borrow().len(), 1);
    }

    #[test]
    fn enroll_skips_missing_hands_and_requires_minimum() {
        let captures = capture_paths(5);
        let mut landmarks = StubLandmarks::right_hands(&captures);
        landmarks.sets.insert(captures[1].clone(), None);
        let mut degenerate = sample_hand();
        degenerate[MIDDLE_BASE] = degenerate[WRIST];
        landmarks.sets.insert(
            captures[2].clone(),
            Some(LandmarkSet::new(degenerate, Some(Handedness::Right)).unwrap()),
        );
        let store = InMemoryStore::default();
        let keys = StubKeyProvider::default();
        let resolver = FixedStoreResolver(PathBuf::from("/templates"));
        let config = HandEnrollmentConfig::new("alice", captures);

        let err =
            run_hand_enrollment_with(&config, &store, &keys, &resolver, &landmarks, &NoEmbeddings)
                .unwrap_err();
        match err {
            AppError::InsufficientSamples { required, found } => {
                assert_eq!(required, 5);
                assert_eq!(found, 3);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(store.saved.borrow().is_empty());
        assert!(keys.saved_keys.borrow().is_empty());
    }

    #[test]
    fn enroll_skips_captures_without_handedness() {
        let captures = capture_paths(6);
        let mut landmarks = StubLandmarks::right_hands(&captures);
        landmarks.sets.insert(
            captures[0].clone(),
            Some(LandmarkSet::new(sample_hand(), None).unwrap()),
        );
        let store = InMemoryStore::default();
        let keys = StubKeyProvider::default();
        let resolver = FixedStoreResolver(PathBuf::from("/templates"));
        let config = HandEnrollmentConfig::new("alice", captures.clone());

        let outcome =
            run_hand_enrollment_with(&config, &store, &keys, &resolver, &landmarks, &NoEmbeddings)
                .unwrap();

        assert_eq!(outcome.enrolled.len(), 5);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].source, captures[0].display().to_string());
        assert_eq!(outcome.skipped[0].reason, "handedness not reported");
        assert_eq!(store.saved.borrow()[0].handedness, Some(Handedness::Right));
    }

    #[test]
    fn enroll_rejects_mixed_hands() {
        let captures = capture_paths(5);
        let mut landmarks = StubLandmarks::right_hands(&captures);
        landmarks.sets.insert(
            captures[4].clone(),
            Some(LandmarkSet::new(sample_hand(), Some(Handedness::Left)).unwrap()),
        );
        let store = InMemoryStore::default();
        let keys = StubKeyProvider::default();
        let resolver = FixedStoreResolver(PathBuf::from("/templates"));
        let config = HandEnrollmentConfig::new("alice", captures);

        let err =
            run_hand_enrollment_with(&config, &store, &keys, &resolver, &landmarks, &NoEmbeddings)
                .unwrap_err();
        assert!(matches!(err, AppError::InconsistentHandedness { .. }));
    }

    #[test]
    fn enroll_rejects_invalid_user() {
        let config = HandEnrollmentConfig::new("../root", capture_paths(5));
        let err = run_hand_enrollment_with(
            &config,
            &InMemoryStore::default(),
            &StubKeyProvider::default(),
            &FixedStoreResolver(PathBuf::from("/templates")),
            &StubLandmarks::default(),
            &NoEmbeddings,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidUser { .. }));
    }

    #[test]
    fn removal_requires_existing_sample_when_not_removing_all() {
        let config = HandRemovalConfig {
            user: "alice".into(),
            sample_ids: vec!["missing".into()],
            remove_all: false,
            store_dir: None,
        };
        let store = InMemoryStore::with_existing(2);
        let keys = StubKeyProvider::default();
        let resolver = FixedStoreResolver(PathBuf::from("/templates"));
        let err = run_hand_removal_with(&config, &store, &keys, &resolver).unwrap_err();
        assert!(matches!(err, AppError::SampleNotFound { .. }));
    }

    #[test]
    fn removal_by_id_keeps_remaining_samples() {
        let store = InMemoryStore::with_existing(2);
        let config = HandRemovalConfig {
            user: "alice".into(),
            sample_ids: vec!["old-0".into()],
            remove_all: false,
            store_dir: None,
        };
        let outcome = run_hand_removal_with(
            &config,
            &store,
            &StubKeyProvider::default(),
            &FixedStoreResolver(PathBuf::from("/templates")),
        )
        .unwrap();
        assert_eq!(outcome.removed_ids, vec!["old-0".to_string()]);
        assert_eq!(outcome.remaining, 1);
        assert!(!outcome.cleared);
        assert_eq!(store.saved.borrow()[0].samples[0].id, "old-1");
    }

    #[test]
    fn removal_of_everything_deletes_store() {
        let store = InMemoryStore::with_existing(2);
        let config = HandRemovalConfig {
            user: "alice".into(),
            sample_ids: Vec::new(),
            remove_all: true,
            store_dir: None,
        };
        let outcome = run_hand_removal_with(
            &config,
            &store,
            &StubKeyProvider::default(),
            &FixedStoreResolver(PathBuf::from("/templates")),
        )
        .unwrap();
        assert!(outcome.cleared);
        assert_eq!(outcome.removed_ids.len(), 2);
        assert_eq!(*store.deleted.borrow(), 1);
    }

    #[test]
    fn user_names_are_restricted() {
        assert!(validate_user_name("alice_01-b").is_ok());
        assert!(validate_user_name("").is_err());
        assert!(validate_user_name("al ice").is_err());
    }

    fn capture_paths(count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|idx| PathBuf::from(format!("/captures/{idx}.json")))
            .collect()
    }

    #[derive(Default)]
    struct StubLandmarks {
        sets: HashMap<PathBuf, Option<LandmarkSet>>,
    }

    impl StubLandmarks {
        fn right_hands(captures: &[PathBuf]) -> Self {
            let sets = captures
                .iter()
                .map(|path| {
                    let set = LandmarkSet::new(sample_hand(), Some(Handedness::Right)).unwrap();
                    (path.clone(), Some(set))
                })
                .collect();
            Self { sets }
        }
    }

    impl LandmarkProvider for StubLandmarks {
        fn detect(&self, source: &Path) -> AppResult<Option<LandmarkSet>> {
            Ok(self.sets.get(source).cloned().flatten())
        }
    }

    #[derive(Default)]
    struct InMemoryStore {
        loaded: Option<StoredTemplate>,
        saved: RefCell<Vec<StoredTemplate>>,
        deleted: RefCell<usize>,
    }

    impl InMemoryStore {
        fn with_existing(count: usize) -> Self {
            let samples = (0..count)
                .map(|idx| EnrolledSample {
                    id: format!("old-{idx}"),
                    features: vec![1.0; FEATURE_LEN].into(),
                    embedding: None,
                    source: "old.json".into(),
                    created_at: "2024-01-01T00:00:00.000Z".into(),
                })
                .collect();
            Self {
                loaded: Some(StoredTemplate {
                    user: "alice".into(),
                    handedness: Some(Handedness::Right),
                    samples,
                    updated_at: "2024-01-01T00:00:00.000Z".into(),
                }),
                ..Self::default()
            }
        }
    }

    impl TemplateStore for InMemoryStore {
        fn load(&self, _path: &Path, _key: Option<&[u8]>) -> AppResult<Option<StoredTemplate>> {
            Ok(self.loaded.clone())
        }

        fn save(
            &self,
            _path: &Path,
            template: &StoredTemplate,
            _key: Option<&[u8]>,
        ) -> AppResult<()> {
            self.saved.borrow_mut().push(template.clone());
            Ok(())
        }

        fn delete(&self, _path: &Path) -> AppResult<()> {
            *self.deleted.borrow_mut() += 1;
            Ok(())
        }
    }

    #[derive(Clone)]
    struct FixedStoreResolver(PathBuf);

    impl StoreDirResolver for FixedStoreResolver {
        fn resolve(&self, _override_dir: Option<&Path>) -> PathBuf {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct StubKeyProvider {
        saved_keys: RefCell<Vec<Vec<u8>>>,
    }

    impl KeyProvider for StubKeyProvider {
        fn fetch(&self, _user: &str) -> AppResult<TemplateKeyStatus> {
            Ok(TemplateKeyStatus::Missing)
        }

        fn store(&self, _user: &str, key: &TemplateKey) -> AppResult<()> {
            self.saved_keys.borrow_mut().push(key.as_bytes().to_vec());
            Ok(())
        }
    }
}

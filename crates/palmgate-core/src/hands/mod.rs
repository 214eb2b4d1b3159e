pub mod enrollment;
pub mod extractor;
pub mod landmarks;
pub mod matcher;
pub mod store;
pub mod verification;

pub use enrollment::{
    run_hand_enrollment, run_hand_enrollment_with, run_hand_removal, run_hand_removal_with,
    validate_user_name, EnrollmentRecord, HandEnrollmentConfig, HandEnrollmentOutcome,
    HandRemovalConfig, HandRemovalOutcome, SkippedCapture,
};

pub use crate::secret_service::{KeyProvider, SecretServiceKeyProvider};

pub use extractor::{
    extract_features, run_hand_extraction, run_hand_extraction_with, FeatureVector,
    HandExtractionConfig, HandExtractionOutcome, HandExtractionSummary, FEATURE_LEN,
};

pub use landmarks::{
    load_capture, EmbeddingProvider, HandCapture, Handedness, JsonCaptureProvider, Landmark,
    LandmarkProvider, LandmarkSet, NoEmbeddings, LANDMARK_COUNT,
};

pub use matcher::{
    cosine_similarity, verify, EnrollmentTemplate, MatchDecision, MatchPolicy, MatchStatus, Probe,
    Telemetry,
};

pub use store::{
    read_template_store, user_store_path, write_template_store, EnrolledSample,
    EnvStoreDirResolver, FilesystemTemplateStore, StoreDirResolver, StoredTemplate,
    TemplateStore,
};

pub use verification::{
    run_hand_verification, run_hand_verification_with, HandVerificationConfig,
    HandVerificationOutcome, StepUpTier, AUDIT_TARGET,
};

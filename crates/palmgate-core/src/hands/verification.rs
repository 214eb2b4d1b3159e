use std::fmt;
use std::path::PathBuf;

use palmgate_config::{DEFAULT_OTP_TIER_MIN_AMOUNT, DEFAULT_PIN_TIER_MIN_AMOUNT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::{AppError, AppResult};
use crate::hands::enrollment::validate_user_name;
use crate::hands::extractor::extract_features;
use crate::hands::landmarks::{EmbeddingProvider, JsonCaptureProvider, LandmarkProvider};
use crate::hands::matcher::{verify, MatchDecision, MatchPolicy, Probe};
use crate::hands::store::{
    user_store_path, EnvStoreDirResolver, FilesystemTemplateStore, StoreDirResolver,
    TemplateStore,
};
use crate::secret_service::{KeyProvider, SecretServiceKeyProvider};

/// Target used for the per-attempt audit trail.
pub const AUDIT_TARGET: &str = "palmgate::audit";

#[derive(Debug, Clone)]
pub struct HandVerificationConfig {
    pub user: String,
    pub capture: PathBuf,
    pub store_dir: Option<PathBuf>,
    pub policy: MatchPolicy,
    pub amount: Option<f64>,
    pub pin_tier_min_amount: f64,
    pub otp_tier_min_amount: f64,
}

impl HandVerificationConfig {
    pub fn new(user: impl Into<String>, capture: impl Into<PathBuf>) -> Self {
        Self {
            user: user.into(),
            capture: capture.into(),
            store_dir: None,
            policy: MatchPolicy::default(),
            amount: None,
            pin_tier_min_amount: DEFAULT_PIN_TIER_MIN_AMOUNT,
            otp_tier_min_amount: DEFAULT_OTP_TIER_MIN_AMOUNT,
        }
    }
}

/// Additional factor a verified payment still needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepUpTier {
    PalmOnly,
    Pin,
    EmailOtp,
}

impl StepUpTier {
    /// `amount < pin_min` needs nothing more, `pin_min..=otp_min` a PIN and
    /// anything above `otp_min` an emailed one-time code.
    pub fn for_amount(amount: f64, pin_min: f64, otp_min: f64) -> Self {
        if amount > otp_min {
            StepUpTier::EmailOtp
        } else if amount >= pin_min {
            StepUpTier::Pin
        } else {
            StepUpTier::PalmOnly
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepUpTier::PalmOnly => "PALM_ONLY",
            StepUpTier::Pin => "PIN",
            StepUpTier::EmailOtp => "EMAIL_OTP",
        }
    }
}

impl fmt::Display for StepUpTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct HandVerificationOutcome {
    pub user: String,
    pub store_path: PathBuf,
    pub decision: MatchDecision,
    pub amount: Option<f64>,
    pub step_up: Option<StepUpTier>,
    pub logs: Vec<String>,
}

pub fn run_hand_verification(
    config: &HandVerificationConfig,
) -> AppResult<HandVerificationOutcome> {
    let store = FilesystemTemplateStore;
    let resolver = EnvStoreDirResolver;
    let keys = SecretServiceKeyProvider;
    let provider = JsonCaptureProvider;
    run_hand_verification_with(config, &store, &keys, &resolver, &provider, &provider)
}

pub fn run_hand_verification_with<S, K, R, L, E>(
    config: &HandVerificationConfig,
    store: &S,
    keys: &K,
    resolver: &R,
    landmarks: &L,
    embeddings: &E,
) -> AppResult<HandVerificationOutcome>
where
    S: TemplateStore,
    K: KeyProvider,
    R: StoreDirResolver,
    L: LandmarkProvider,
    E: EmbeddingProvider,
{
    validate_user_name(&config.user)?;
    if let Some(amount) = config.amount {
        validate_amount(amount)?;
    }

    let mut logs = Vec::new();
    let store_path = user_store_path(resolver, config.store_dir.as_deref(), &config.user);
    let key_bytes = keys.current_key(&config.user)?;
    let stored = store
        .load(&store_path, key_bytes.as_deref())?
        .ok_or_else(|| AppError::TemplateNotFound {
            user: config.user.clone(),
        })?;
    logs.push(format!(
        "Loaded {} enrolled sample(s) for user {} from {}",
        stored.samples.len(),
        config.user,
        store_path.display()
    ));

    let capture = &config.capture;
    let Some(set) = landmarks.detect(capture)? else {
        audit_failure(&config.user, "NO_HAND", "no hand detected in capture");
        return Err(AppError::NoHandDetected {
            path: capture.clone(),
        });
    };

    let features = match extract_features(&set) {
        Ok(features) => features,
        Err(err @ AppError::DegenerateInput { .. }) => {
            audit_failure(&config.user, "DEGENERATE_INPUT", &err.to_string());
            return Err(err);
        }
        Err(err) => return Err(err),
    };
    logs.push(format!(
        "Extracted {} feature(s) from {}",
        features.len(),
        capture.display()
    ));

    let embedding = if config.policy.use_embedding {
        embeddings.embed(capture)?
    } else {
        None
    };
    debug!(
        user = %config.user,
        preset = %config.policy.preset,
        embedding = embedding.is_some(),
        "running matching engine"
    );

    let probe = Probe {
        features,
        handedness: set.handedness(),
        embedding,
    };
    let decision = verify(&probe, &stored.to_enrollment_template(), &config.policy);
    audit_decision(&config.user, &decision);

    logs.push(format!(
        "Decision: {} ({})",
        decision.status().as_str(),
        decision.reason()
    ));

    let step_up = match (config.amount, decision.is_verified()) {
        (Some(amount), true) => {
            let tier = StepUpTier::for_amount(
                amount,
                config.pin_tier_min_amount,
                config.otp_tier_min_amount,
            );
            logs.push(format!("Amount {amount:.2} requires step-up tier {tier}"));
            Some(tier)
        }
        _ => None,
    };

    Ok(HandVerificationOutcome {
        user: config.user.clone(),
        store_path,
        decision,
        amount: config.amount,
        step_up,
        logs,
    })
}

fn validate_amount(amount: f64) -> AppResult<()> {
    if amount.is_finite() && amount >= 0.0 {
        Ok(())
    } else {
        Err(AppError::InvalidAmount { amount })
    }
}

fn audit_decision(user: &str, decision: &MatchDecision) {
    let status = decision.status().as_str();
    match decision.telemetry() {
        Some(t) => info!(
            target: AUDIT_TARGET,
            user,
            status,
            confidence = decision.confidence_score(),
            preset = %t.preset,
            geometric_score = t.geometric_score,
            embedding_score = t.embedding_score,
            embedding_available = t.embedding_available,
            final_score = t.final_score,
            avg_z_score = t.avg_z_score,
            consensus_votes = t.consensus_votes,
            consensus_passed = t.consensus_passed,
            centroid_passed = t.centroid_passed,
            variance_passed = t.variance_passed,
            geometric_passed = t.geometric_passed,
            embedding_passed = t.embedding_passed,
            reason = decision.reason(),
            "hand verification attempt"
        ),
        None => info!(
            target: AUDIT_TARGET,
            user,
            status,
            confidence = decision.confidence_score(),
            reason = decision.reason(),
            "hand verification attempt"
        ),
    }
}

fn audit_failure(user: &str, status: &str, reason: &str) {
    warn!(target: AUDIT_TARGET, user, status, reason, "hand verification attempt");
}

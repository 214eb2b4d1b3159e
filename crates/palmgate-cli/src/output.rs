use std::error::Error;
use std::io::{self, Write};

use serde::Serialize;
use serde_json::{json, Value};

use crate::cli::OutputMode;
use crate::errors::{AppError, AppResult};
use crate::hands::{
    HandEnrollmentOutcome, HandExtractionOutcome, HandRemovalOutcome, HandVerificationOutcome,
    MatchDecision,
};
use crate::keyring::KeyringCheckSummary;

fn write_json_line<T: Serialize + ?Sized>(payload: &T) -> AppResult<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    let payload = serde_json::to_string(payload)?;
    handle.write_all(payload.as_bytes())?;
    handle.write_all(b"\n")?;
    Ok(())
}

pub fn render_hand_extract(outcome: &HandExtractionOutcome, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            for line in &outcome.logs {
                println!("{line}");
            }
            println!(
                "Feature extraction successful: {} ({} values)",
                outcome.summary.output_path, outcome.summary.feature_len
            );
        }
        OutputMode::Json => write_json_line(&outcome.summary)?,
    }
    Ok(())
}

pub fn render_hand_enroll(outcome: &HandEnrollmentOutcome, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            for line in &outcome.logs {
                println!("{line}");
            }
            println!(
                "Enrollment successful: {} sample(s) stored in {}",
                outcome.enrolled.len(),
                outcome.store_path.display()
            );
        }
        OutputMode::Json => write_json_line(&json!({
            "user": outcome.user,
            "store_path": outcome.store_path.display().to_string(),
            "handedness": outcome.handedness,
            "enrolled": outcome.enrolled,
            "skipped": outcome.skipped,
            "replaced": outcome.replaced,
        }))?,
    }
    Ok(())
}

pub fn render_hand_remove(outcome: &HandRemovalOutcome, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            for line in &outcome.logs {
                println!("{line}");
            }
            println!(
                "Removal successful: removed {} sample(s); remaining {}",
                outcome.removed_ids.len(),
                outcome.remaining
            );
        }
        OutputMode::Json => write_json_line(&json!({
            "user": outcome.user,
            "store_path": outcome.store_path.display().to_string(),
            "removed_ids": outcome.removed_ids,
            "remaining": outcome.remaining,
            "cleared": outcome.cleared,
        }))?,
    }
    Ok(())
}

pub fn render_verification(outcome: &HandVerificationOutcome, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            for line in &outcome.logs {
                println!("{line}");
            }
            let decision = &outcome.decision;
            println!(
                "{} for user {} (confidence {:.4}): {}",
                decision.status().as_str(),
                outcome.user,
                decision.confidence_score(),
                decision.reason()
            );
            if let Some(tier) = outcome.step_up {
                println!("Step-up required: {tier}");
            }
        }
        OutputMode::Json => write_json_line(&verification_json_payload(outcome)?)?,
    }
    Ok(())
}

fn verification_json_payload(outcome: &HandVerificationOutcome) -> AppResult<Value> {
    let mut payload = serde_json::to_value(&outcome.decision)?;
    if let Value::Object(map) = &mut payload {
        map.insert("user".into(), json!(outcome.user));
        if let Some(amount) = outcome.amount {
            map.insert("amount".into(), json!(amount));
        }
        if let Some(tier) = outcome.step_up {
            map.insert("step_up".into(), json!(tier));
        }
    }
    Ok(payload)
}

pub fn render_keyring_check(summary: &KeyringCheckSummary, mode: OutputMode) -> AppResult<()> {
    match mode {
        OutputMode::Human => {
            println!(
                "Secret Service available for user '{}' (service '{}')",
                summary.user, summary.service
            );
            if summary.template_key_present {
                println!("Template key: present");
            } else {
                println!("Template key: not yet created (enroll to generate one)");
            }
        }
        OutputMode::Json => write_json_line(&json!({
            "status": "ok",
            "user": summary.user,
            "service": summary.service,
            "template_key_present": summary.template_key_present,
        }))?,
    }
    Ok(())
}

pub fn render_error(err: &AppError, mode: OutputMode) {
    if let AppError::SecretServiceUnavailable {
        user,
        service,
        message,
    } = err
    {
        match mode {
            OutputMode::Human => {
                eprintln!(
                    "Secret Service unavailable for user '{user}' (service '{service}'): {message}"
                );
            }
            OutputMode::Json => {
                let payload = json!({
                    "status": "error",
                    "user": user,
                    "service": service,
                    "error": message,
                });
                println!("{payload}");
            }
        }
        return;
    }

    match mode {
        OutputMode::Human => {
            eprintln!("error: {}", err.human_message());
        }
        OutputMode::Json => {
            let payload = json!({
                "success": false,
                "error": err.human_message(),
            });
            if let Ok(json) = serde_json::to_string(&payload) {
                println!("{json}");
            }
        }
    }
    if let Some(source) = err.source() {
        eprintln!("cause: {source}");
    }
}

/// Process exit status for a completed verification.
pub fn decision_exit_code(decision: &MatchDecision) -> u8 {
    match decision {
        MatchDecision::Verified { .. } => 0,
        MatchDecision::Rejected { .. } => 5,
        MatchDecision::ReRegister { .. } => 6,
    }
}

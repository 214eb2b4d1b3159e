use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use palmgate_cli::cli::{HandEnrollArgs, HandExtractArgs, HandsCommands, OutputMode};
use palmgate_cli::commands::{CommandHandler, HandsHandler, HandsHandlerDeps};
use palmgate_cli::config::{load_settings_with_sources, CliSettings};
use palmgate_cli::errors::AppError;
use palmgate_cli::hands::{self, HandEnrollmentConfig, HandEnrollmentOutcome};
use tempfile::TempDir;

fn stub_deps() -> HandsHandlerDeps {
    HandsHandlerDeps {
        load_settings: Box::new(|| Ok(CliSettings::default())),
        require_secret_service: Box::new(|_user| panic!("keyring check should not run")),
        extract: Box::new(|_config| panic!("extract should not run")),
        enroll: Box::new(|_config| panic!("enroll should not run")),
        remove: Box::new(|_config| panic!("remove should not run")),
        render_extract: Box::new(|_outcome, _mode| panic!("extract render should not run")),
        render_enroll: Box::new(|_outcome, _mode| panic!("enroll render should not run")),
        render_remove: Box::new(|_outcome, _mode| panic!("remove render should not run")),
    }
}

fn enroll_args(store_dir: Option<PathBuf>) -> HandEnrollArgs {
    HandEnrollArgs {
        user: "alice".into(),
        captures: (0..3)
            .map(|idx| PathBuf::from(format!("capture-{idx}.json")))
            .collect(),
        store_dir,
        min_samples: None,
    }
}

#[test]
fn hands_handler_extract_runs_real_extractor() {
    let tmp = TempDir::new().unwrap();
    let capture = tmp.path().join("hand.json");
    let landmarks = (0..21)
        .map(|i| {
            let step = i as f64;
            let x = 0.5 + 0.02 * step * (step * 0.15).cos();
            serde_json::json!({ "x": x, "y": 0.9 - 0.02 * step })
        })
        .collect::<Vec<_>>();
    fs::write(
        &capture,
        serde_json::json!({ "handedness": "Right", "landmarks": landmarks }).to_string(),
    )
    .unwrap();

    let rendered = Arc::new(Mutex::new(Vec::new()));
    let mut deps = stub_deps();
    deps.extract = Box::new(hands::run_hand_extraction);
    deps.render_extract = Box::new({
        let rendered = Arc::clone(&rendered);
        move |outcome, _mode| {
            rendered.lock().unwrap().push(outcome.summary.feature_len);
            Ok(())
        }
    });

    let output = tmp.path().join("features.json");
    let handler = HandsHandler::with_dependencies(
        HandsCommands::Extract(HandExtractArgs {
            capture,
            output: Some(output.clone()),
        }),
        deps,
    );

    let code = handler.execute(OutputMode::Human, false).unwrap();
    assert_eq!(code, ExitCode::SUCCESS);
    assert_eq!(*rendered.lock().unwrap(), vec![hands::FEATURE_LEN]);
    assert!(output.exists());
}

#[test]
fn hands_handler_enroll_applies_config_defaults() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("config.toml");
    fs::write(
        &config_path,
        "template_store_dir = \"/srv/palmgate\"\nmin_enrollment_samples = 3\n",
    )
    .unwrap();

    let seen = Arc::new(Mutex::new(None::<HandEnrollmentConfig>));
    let mut deps = stub_deps();
    deps.load_settings = Box::new(move || load_settings_with_sources(&[config_path.clone()]));
    deps.enroll = Box::new({
        let seen = Arc::clone(&seen);
        move |config| {
            *seen.lock().unwrap() = Some(config.clone());
            Ok(HandEnrollmentOutcome {
                user: config.user.clone(),
                store_path: PathBuf::from("/srv/palmgate/alice.json"),
                handedness: None,
                enrolled: vec![],
                skipped: vec![],
                replaced: 0,
                logs: vec![],
            })
        }
    });
    deps.render_enroll = Box::new(|_outcome, _mode| Ok(()));

    let handler = HandsHandler::with_dependencies(HandsCommands::Enroll(enroll_args(None)), deps);
    handler.execute(OutputMode::Json, false).unwrap();

    let config = seen.lock().unwrap().clone().expect("enroll called");
    assert_eq!(config.store_dir, Some(PathBuf::from("/srv/palmgate")));
    assert_eq!(config.min_samples, 3);
    assert_eq!(config.captures.len(), 3);
}

#[test]
fn hands_handler_enroll_checks_keyring_when_required() {
    let mut deps = stub_deps();
    deps.load_settings = Box::new(|| {
        let mut settings = CliSettings::default();
        settings.resolved.require_secret_service = true;
        Ok(settings)
    });
    deps.require_secret_service = Box::new(|user| {
        Err(AppError::SecretServiceUnavailable {
            user: user.to_string(),
            service: "palmgate".into(),
            message: "no session bus".into(),
        })
    });

    let handler = HandsHandler::with_dependencies(
        HandsCommands::Enroll(enroll_args(Some(PathBuf::from("/tmp")))),
        deps,
    );
    let err = handler.execute(OutputMode::Human, false).unwrap_err();
    match err {
        AppError::SecretServiceUnavailable { user, .. } => assert_eq!(user, "alice"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn hands_handler_enroll_surfaces_errors() {
    let mut deps = stub_deps();
    deps.enroll = Box::new(|_config| {
        Err(AppError::InsufficientSamples {
            required: 5,
            found: 3,
        })
    });

    let handler = HandsHandler::with_dependencies(
        HandsCommands::Enroll(enroll_args(Some(PathBuf::from("/tmp")))),
        deps,
    );
    let err = handler.execute(OutputMode::Json, false).unwrap_err();
    assert!(matches!(
        err,
        AppError::InsufficientSamples {
            required: 5,
            found: 3
        }
    ));
}

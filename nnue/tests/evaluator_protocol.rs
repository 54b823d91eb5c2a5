use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use candle_core::Device;
use nnue::config::{CreluConfig, ModelConfig, ScreluConfig};
use nnue::encoding::encode_fen;
use nnue::error::ValidationError;
use nnue::network::EvaluatorModel;
use nnue::quantize::ExportedBinary;
use nnue::run::{RunDirectory, MODEL_CONFIG};
use nnue::validate::{ConsistencyValidator, EvaluatorCommand, NativeEvaluator, Replica};

const POSITIONS: &[&str] = &[
    "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
    "r1bqkbnr/pppppppp/2n5/8/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 1 2",
    "r1bqkb1r/pppp1ppp/2n2n2/4p3/2B1P3/5N2/PPPP1PPP/RNBQK2R w KQkq - 4 4",
    "rnbqkb1r/pp1p1ppp/4pn2/2p5/2PP4/2N5/PP2PPPP/R1BQKBNR b KQkq - 0 4",
    "8/8/8/8/8/5k2/8/4K2R w - - 0 1",
    "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
    "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
    "6k1/5ppp/8/8/8/8/1q3PPP/3R2K1 b - - 0 1",
];

fn evaluator() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_evaluate"))
}

fn fens() -> Vec<String> {
    POSITIONS.iter().map(|fen| fen.to_string()).collect()
}

/// Exports a freshly initialized network with its config beside it.
fn export(dir: &Path, config: &ModelConfig) -> (EvaluatorModel, ExportedBinary, PathBuf) {
    let (model, _varmap) = EvaluatorModel::with_varmap(config, &Device::Cpu).unwrap();
    let exported = model.export_quantized().unwrap();

    let artifact = dir.join("best.nnue");
    exported.write_atomic(&artifact).unwrap();
    fs::write(dir.join(MODEL_CONFIG), config.to_toml().unwrap()).unwrap();

    (model, exported, artifact)
}

#[test]
fn test_evaluator_matches_replica() {
    let config = ModelConfig::Screlu(ScreluConfig {
        hidden_size: 32,
        ..ScreluConfig::default()
    });
    let dir = tempfile::tempdir().unwrap();
    let (_model, exported, artifact) = export(dir.path(), &config);

    let replica = Replica::new(&config, &exported.layers);
    let mut native = NativeEvaluator::spawn(&evaluator(), &[], Some(&artifact)).unwrap();

    for fen in POSITIONS {
        let expected = replica.evaluate(&encode_fen(fen).unwrap());
        assert_eq!(native.evaluate(fen).unwrap(), expected, "{}", fen);
    }
    native.finish().unwrap();
}

#[test]
fn test_full_validation_with_explicit_config() {
    let config = ModelConfig::Crelu(CreluConfig {
        hidden_size: 32,
        hidden_layers: vec![8],
        ..CreluConfig::default()
    });
    let dir = tempfile::tempdir().unwrap();
    let (model, exported, artifact) = export(dir.path(), &config);

    // The config beside the artifact is ignored in favour of --config
    let config_path = dir.path().join("crelu.toml");
    fs::write(&config_path, config.to_toml().unwrap()).unwrap();
    fs::write(
        dir.path().join(MODEL_CONFIG),
        ModelConfig::default().to_toml().unwrap(),
    )
    .unwrap();

    let command = EvaluatorCommand {
        program: evaluator(),
        args: vec![
            "--config".to_string(),
            config_path.to_string_lossy().to_string(),
        ],
    };
    let report = ConsistencyValidator::new(&model, &exported)
        .run(&fens(), Some((&command, &artifact)))
        .unwrap();

    assert_eq!(report.positions, POSITIONS.len());
    assert_eq!(report.external_checked, POSITIONS.len());
}

#[test]
fn test_invalid_position_fails_the_session() {
    let config = ModelConfig::default();
    let dir = tempfile::tempdir().unwrap();
    let (_model, _exported, artifact) = export(dir.path(), &config);

    let mut native = NativeEvaluator::spawn(&evaluator(), &[], Some(&artifact)).unwrap();
    assert!(native.evaluate(POSITIONS[0]).is_ok());

    let result = native.evaluate("8/8/8/8/8/8/8/8 w - - 0 1");
    assert!(
        matches!(
            result,
            Err(ValidationError::Stderr(_)) | Err(ValidationError::ExitStatus(_))
        ),
        "unexpected result: {:?}",
        result.map_err(|e| e.to_string())
    );
}

#[test]
fn test_wrong_layout_is_rejected_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let (_model, _exported, artifact) = export(dir.path(), &ModelConfig::default());

    let other = dir.path().join("other.toml");
    let crelu = ModelConfig::Crelu(CreluConfig::default());
    fs::write(&other, crelu.to_toml().unwrap()).unwrap();

    let args = vec!["--config".to_string(), other.to_string_lossy().to_string()];
    assert!(NativeEvaluator::spawn(&evaluator(), &args, Some(&artifact)).is_err());
}

#[test]
fn test_run_without_export_is_reported() {
    let runs = tempfile::tempdir().unwrap();
    let run = RunDirectory::create(runs.path()).unwrap();

    let output = Command::new(evaluator())
        .arg("--runs")
        .arg(runs.path())
        .stdin(Stdio::null())
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("has no exported network"), "{}", stderr);
    assert!(stderr.contains(&run.root().display().to_string()), "{}", stderr);
    assert!(output.stdout.is_empty());
}

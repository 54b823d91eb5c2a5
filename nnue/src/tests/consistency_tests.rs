use candle_core::Device;
use cozy_chess::{Board, Move};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::checkpoint::{self, TrainingState};
use crate::config::{CreluConfig, ModelConfig, ScreluConfig};
use crate::encoding::{encode_fen, Features};
use crate::inference::IntegerNetwork;
use crate::network::EvaluatorModel;
use crate::optimizer::{ClampedAdam, ParamsAdam};
use crate::validate::{ConsistencyValidator, Replica, DEFAULT_ERROR_BOUND};

fn screlu() -> ModelConfig {
    ModelConfig::Screlu(ScreluConfig {
        hidden_size: 16,
        ..ScreluConfig::default()
    })
}

fn crelu() -> ModelConfig {
    ModelConfig::Crelu(CreluConfig {
        hidden_size: 16,
        hidden_layers: vec![8, 4],
        ..CreluConfig::default()
    })
}

/// FENs of a random game from the start position. Consecutive positions
/// differ by one move, which is what the incremental accumulators expect.
fn random_game(seed: u64, plies: usize) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut board = Board::default();
    let mut fens = vec![format!("{}", board)];

    for _ in 0..plies {
        let mut moves: Vec<Move> = Vec::new();
        board.generate_moves(|batch| {
            moves.extend(batch);
            false
        });
        let Some(&mv) = moves.choose(&mut rng) else {
            break;
        };
        board.play_unchecked(mv);
        fens.push(format!("{}", board));
    }
    fens
}

fn encode_all(fens: &[String]) -> Vec<Features> {
    fens.iter().map(|fen| encode_fen(fen).unwrap()).collect()
}

#[test]
fn test_incremental_evaluator_matches_replica() {
    for config in [screlu(), crelu()] {
        let (model, _varmap) = EvaluatorModel::with_varmap(&config, &Device::Cpu).unwrap();
        let exported = model.export_quantized().unwrap();

        let replica = Replica::new(&config, &exported.layers);
        let mut network = IntegerNetwork::from_bytes(&config, &exported.bytes).unwrap();

        for seed in 0..4 {
            for fen in random_game(seed, 120) {
                let features = encode_fen(&fen).unwrap();
                assert_eq!(
                    network.evaluate(&features),
                    replica.evaluate(&features),
                    "{} disagrees on {}",
                    config.architecture(),
                    fen
                );
            }
        }
    }
}

#[test]
fn test_evaluation_does_not_depend_on_history() {
    let config = crelu();
    let (model, _varmap) = EvaluatorModel::with_varmap(&config, &Device::Cpu).unwrap();
    let exported = model.export_quantized().unwrap();

    let fens = random_game(7, 60);
    let mut sequential = IntegerNetwork::from_bytes(&config, &exported.bytes).unwrap();
    let scores: Vec<i32> = fens
        .iter()
        .map(|fen| sequential.evaluate_fen(fen).unwrap())
        .collect();

    // Reverse order: every update now jumps across the whole game
    let mut jumping = IntegerNetwork::from_bytes(&config, &exported.bytes).unwrap();
    for (fen, &expected) in fens.iter().zip(&scores).rev() {
        assert_eq!(jumping.evaluate_fen(fen).unwrap(), expected, "{}", fen);
    }

    jumping.reset();
    assert_eq!(jumping.evaluate_fen(&fens[30]).unwrap(), scores[30]);
}

#[test]
fn test_quantization_error_is_bounded() {
    let config = screlu();
    let (model, _varmap) = EvaluatorModel::with_varmap(&config, &Device::Cpu).unwrap();
    let exported = model.export_quantized().unwrap();
    assert_eq!(exported.overflow_total(), 0);

    let fens: Vec<String> = (10..14).flat_map(|seed| random_game(seed, 40)).collect();
    let report = ConsistencyValidator::new(&model, &exported)
        .run(&fens, None)
        .unwrap();

    assert_eq!(report.positions, fens.len());
    assert!(
        report.errors.mean_abs < DEFAULT_ERROR_BOUND,
        "mean abs error {}",
        report.errors.mean_abs
    );
    assert!(report.passed);
}

#[test]
fn test_float_and_replica_agree_in_sign_on_large_scores() {
    let config = screlu();
    let (model, _varmap) = EvaluatorModel::with_varmap(&config, &Device::Cpu).unwrap();
    let exported = model.export_quantized().unwrap();

    let fens = random_game(21, 80);
    let positions = encode_all(&fens);
    let validator = ConsistencyValidator::new(&model, &exported);
    let float = validator.float_scores(&positions).unwrap();
    let replica = validator.replica_scores(&positions);

    for ((fen, &f), &q) in fens.iter().zip(&float).zip(&replica) {
        if f.abs() > 100.0 {
            assert_eq!(f > 0.0, q > 0, "{}: float {} vs integer {}", fen, f, q);
        }
    }
}

#[test]
fn test_crelu_quantization_error_is_bounded() {
    // Shift truncation compounds per hidden layer; a smaller output scale
    // keeps the same relative error inside the centipawn bound
    let config = ModelConfig::Crelu(CreluConfig {
        hidden_size: 16,
        hidden_layers: vec![8, 4],
        output_scale: 100,
        ..CreluConfig::default()
    });
    let (model, _varmap) = EvaluatorModel::with_varmap(&config, &Device::Cpu).unwrap();
    let exported = model.export_quantized().unwrap();
    assert_eq!(exported.overflow_total(), 0);

    let fens: Vec<String> = (30..34).flat_map(|seed| random_game(seed, 40)).collect();
    let validator = ConsistencyValidator::new(&model, &exported);
    let report = validator.run(&fens, None).unwrap();

    assert_eq!(report.positions, fens.len());
    assert!(
        report.errors.mean_abs < DEFAULT_ERROR_BOUND,
        "mean abs error {}",
        report.errors.mean_abs
    );
    assert!(report.passed);

    let positions = encode_all(&fens);
    let float = validator.float_scores(&positions).unwrap();
    let replica = validator.replica_scores(&positions);
    for ((fen, &f), &q) in fens.iter().zip(&float).zip(&replica) {
        if f.abs() > 2.0 * DEFAULT_ERROR_BOUND as f32 {
            assert_eq!(f > 0.0, q > 0, "{}: float {} vs integer {}", fen, f, q);
        }
    }
}

#[test]
fn test_export_is_deterministic() {
    for config in [screlu(), crelu()] {
        let (model, _varmap) = EvaluatorModel::with_varmap(&config, &Device::Cpu).unwrap();
        let first = model.export_quantized().unwrap();
        let second = model.export_quantized().unwrap();
        assert_eq!(first.bytes, second.bytes);
        assert_eq!(first.bytes.len(), crate::quantize::expected_size(&config.layer_specs()));
    }
}

#[test]
fn test_resumed_checkpoint_exports_the_same_network() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("best.safetensors");

    let config = crelu();
    let (model, varmap) = EvaluatorModel::with_varmap(&config, &Device::Cpu).unwrap();
    let opt = ClampedAdam::new(model.parameter_groups(&varmap).unwrap(), ParamsAdam::default())
        .unwrap();
    let state = TrainingState {
        epoch: 1,
        last_loss: 0.5,
        best_loss: 0.5,
    };
    checkpoint::save(&path, &varmap, &opt, &state).unwrap();

    let (restored, restored_map) = EvaluatorModel::with_varmap(&config, &Device::Cpu).unwrap();
    checkpoint::load_parameters(&path, &restored_map).unwrap();

    assert_eq!(
        restored.export_quantized().unwrap().bytes,
        model.export_quantized().unwrap().bytes
    );
}

#[test]
fn test_clamped_training_never_saturates_export() {
    let config = crelu();
    let (model, varmap) = EvaluatorModel::with_varmap(&config, &Device::Cpu).unwrap();
    let mut opt = ClampedAdam::new(
        model.parameter_groups(&varmap).unwrap(),
        ParamsAdam {
            lr: 0.5,
            ..Default::default()
        },
    )
    .unwrap();

    // Large steps towards a huge target push the clamped layers to their limits
    let positions = encode_all(&random_game(3, 16));
    let (w, b, stm) = crate::network::batch_tensors(&positions, &Device::Cpu).unwrap();
    for _ in 0..5 {
        let loss = ((model.forward(&w, &b, &stm).unwrap() - 1e6).unwrap())
            .sqr()
            .unwrap()
            .mean_all()
            .unwrap();
        opt.backward_step(&loss).unwrap();
    }

    let exported = model.export_quantized().unwrap();
    let hidden_overflow: usize = exported.layers[1..]
        .iter()
        .map(|l| l.overflow.total())
        .sum();
    assert_eq!(hidden_overflow, 0);
}

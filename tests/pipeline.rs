//! End-to-end training and evaluation scenarios

use histoflow::data::{AnnotationSet, Shard, SlideAnnotation, Tile};
use histoflow::hparams::{Balance, EarlyStopMethod, HyperParameters, Loss};
use histoflow::metrics::read_results_log;
use histoflow::model::ReferenceExecutor;
use histoflow::train::{EvalOptions, TrainOptions, TrainingController};
use ndarray::Array3;

fn shard(slide: &str, tiles: usize, intensity: f32) -> Shard {
    let tiles = (0..tiles)
        .map(|i| {
            Tile::new(Array3::from_shape_fn((4, 4, 3), |(y, x, _)| {
                intensity + 0.01 * ((i + y + x) % 7) as f32
            }))
        })
        .collect();
    Shard::new(slide, tiles)
}

fn annotations() -> AnnotationSet {
    let mut set = AnnotationSet::new();
    set.insert("slide_a", SlideAnnotation::new("patient_1", vec![0.0]));
    set.insert("slide_b", SlideAnnotation::new("patient_2", vec![1.0]));
    set.insert("slide_c", SlideAnnotation::new("patient_3", vec![1.0]));
    set
}

fn hp() -> HyperParameters {
    HyperParameters::new()
        .with_tile_size(4, 302)
        .with_batch_size(16)
        .with_finetune_epochs(vec![1])
        .with_hidden_layers(1, 8)
        .with_learning_rate(0.01)
}

fn checkpoint_dirs(outdir: &std::path::Path) -> Vec<String> {
    let mut dirs: Vec<String> = std::fs::read_dir(outdir)
        .unwrap()
        .filter_map(|e| {
            let entry = e.unwrap();
            let name = entry.file_name().into_string().unwrap();
            (entry.path().is_dir() && name.contains("_epoch")).then_some(name)
        })
        .collect();
    dirs.sort();
    dirs
}

/// Two training shards totaling 100 tiles plus one 20-tile validation shard
/// with a single checkpoint epoch produce exactly one checkpoint directory
/// and an `epoch1` record carrying train and validation metrics.
#[test]
fn train_writes_single_checkpoint_and_results() {
    let dir = tempfile::tempdir().unwrap();
    let outdir = dir.path().join("out");
    let train_shards = vec![shard("slide_a", 60, 0.1), shard("slide_b", 40, 0.8)];
    let val_shards = vec![shard("slide_c", 20, 0.8)];

    let mut controller = TrainingController::build(
        hp().checked().unwrap(),
        annotations(),
        &outdir,
        ReferenceExecutor::with_seed(1),
    )
    .unwrap();
    let results = controller
        .train(
            &train_shards,
            &val_shards,
            TrainOptions { seed: Some(1), ..Default::default() },
        )
        .unwrap();

    assert_eq!(checkpoint_dirs(&outdir), vec!["trained_model_epoch1".to_string()]);
    let record = results.get("epoch1").expect("epoch1 record");
    assert!(record.train_metrics.contains_key("loss"));
    assert!(record.train_metrics.contains_key("accuracy"));
    assert!(record.val_metrics.contains_key("loss"));

    let log = read_results_log(&outdir.join("results_log.csv")).unwrap();
    assert!(log["trained_model"]["epoch1"]["val_metrics"]["loss"].is_number());
}

/// Checkpoint sidecars are byte-identical copies of the run's top-level
/// `hyperparameters.json` and `slide_manifest.log`.
#[test]
fn checkpoint_sidecars_match_run_files() {
    let dir = tempfile::tempdir().unwrap();
    let outdir = dir.path().join("out");
    let train_shards = vec![shard("slide_a", 40, 0.1), shard("slide_b", 40, 0.8)];
    let val_shards = vec![shard("slide_c", 10, 0.8)];

    let mut controller = TrainingController::build(
        hp().checked().unwrap(),
        annotations(),
        &outdir,
        ReferenceExecutor::with_seed(2),
    )
    .unwrap();
    controller
        .train(&train_shards, &val_shards, TrainOptions { seed: Some(2), ..Default::default() })
        .unwrap();

    let checkpoint = outdir.join("trained_model_epoch1");
    for sidecar in ["hyperparameters.json", "slide_manifest.log"] {
        let top = std::fs::read(outdir.join(sidecar)).unwrap();
        let copy = std::fs::read(checkpoint.join(sidecar)).unwrap();
        assert_eq!(top, copy, "{sidecar} should be copied unchanged");
    }
    let manifest = std::fs::read_to_string(outdir.join("slide_manifest.log")).unwrap();
    assert!(manifest.contains("slide_a,training,0"));
    assert!(manifest.contains("slide_c,validation,1"));
}

/// A trained model evaluates with dataset metrics plus tile/slide/patient
/// rollups, appending to the results log under `eval_model`.
#[test]
fn evaluate_after_training_produces_rollups() {
    let dir = tempfile::tempdir().unwrap();
    let outdir = dir.path().join("out");
    let train_shards = vec![shard("slide_a", 40, 0.1), shard("slide_b", 40, 0.8)];

    let mut controller = TrainingController::build(
        hp().checked().unwrap(),
        annotations(),
        &outdir,
        ReferenceExecutor::with_seed(3),
    )
    .unwrap();
    controller
        .train(&train_shards, &[], TrainOptions { seed: Some(3), ..Default::default() })
        .unwrap();

    let eval_shards =
        vec![shard("slide_a", 10, 0.1), shard("slide_b", 10, 0.8), shard("slide_c", 10, 0.8)];
    let metrics =
        controller.evaluate(&eval_shards, EvalOptions { seed: Some(3), ..Default::default() }).unwrap();
    assert!(metrics.contains_key("loss"));
    assert!(metrics.contains_key("accuracy"));
    assert!(metrics.contains_key("tile_Outcome 0"));
    assert!(metrics.contains_key("slide_Outcome 0"));
    assert!(metrics.contains_key("patient_Outcome 0"));

    let log = read_results_log(&outdir.join("results_log.csv")).unwrap();
    assert!(log["eval_model"]["eval"]["loss"].is_number());
}

/// Training resumes from a saved checkpoint directory and checkpoints the
/// later epoch.
#[test]
fn resume_from_checkpoint_continues_epochs() {
    let dir = tempfile::tempdir().unwrap();
    let outdir = dir.path().join("out");
    let train_shards = vec![shard("slide_a", 40, 0.1), shard("slide_b", 40, 0.8)];
    let val_shards = vec![shard("slide_c", 10, 0.8)];

    let mut first = TrainingController::build(
        hp().checked().unwrap(),
        annotations(),
        &outdir,
        ReferenceExecutor::with_seed(4),
    )
    .unwrap();
    first
        .train(&train_shards, &val_shards, TrainOptions { seed: Some(4), ..Default::default() })
        .unwrap();
    let checkpoint = outdir.join("trained_model_epoch1");
    assert!(checkpoint.exists());

    let mut second = TrainingController::build(
        hp().with_finetune_epochs(vec![2]).checked().unwrap(),
        annotations(),
        &outdir,
        ReferenceExecutor::with_seed(4),
    )
    .unwrap();
    let results = second
        .train(
            &train_shards,
            &val_shards,
            TrainOptions {
                resume_from: Some(checkpoint),
                starting_epoch: 1,
                seed: Some(4),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(results.get("epoch2").is_some());
    assert!(outdir.join("trained_model_epoch2").exists());
}

/// Mid-epoch validation with an aggressive cadence drives the EMA monitor;
/// a tiny window and zero patience make an early stop reachable, and a
/// triggered stop still writes a checkpoint and an epoch record.
#[test]
fn early_stop_checkpoints_and_evaluates() {
    let dir = tempfile::tempdir().unwrap();
    let outdir = dir.path().join("out");
    let train_shards = vec![shard("slide_a", 200, 0.1), shard("slide_b", 200, 0.8)];
    let val_shards = vec![shard("slide_c", 20, 0.8)];

    let hp = hp()
        .with_batch_size(4)
        .with_finetune_epochs(vec![50])
        .with_learning_rate(0.5)
        .with_early_stop(EarlyStopMethod::Loss, 0)
        .checked()
        .unwrap();
    let mut controller = TrainingController::build(
        hp,
        annotations(),
        &outdir,
        ReferenceExecutor::with_seed(5),
    )
    .unwrap();
    let results = controller
        .train(
            &train_shards,
            &val_shards,
            TrainOptions {
                validate_on_batch: 2,
                validation_steps: 2,
                ema_observations: 3,
                ema_smoothing: 2.0,
                seed: Some(5),
                ..Default::default()
            },
        )
        .unwrap();

    // Whether or not the stop fired before epoch 50, every recorded epoch
    // carries validation metrics and a matching checkpoint directory.
    assert!(!results.epochs.is_empty());
    for (label, record) in &results.epochs {
        assert!(record.val_metrics.contains_key("loss"), "{label} lacks val loss");
        let epoch: usize = label.trim_start_matches("epoch").parse().unwrap();
        assert!(outdir.join(format!("trained_model_epoch{epoch}")).exists());
    }
}

/// A survival hyperparameter set without slide-level features fails before
/// training starts, naming the missing event input.
#[test]
fn survival_requires_event_input() {
    let dir = tempfile::tempdir().unwrap();
    let mut set = AnnotationSet::new();
    set.insert("slide_a", SlideAnnotation::new("patient_1", vec![12.0]));
    set.insert("slide_b", SlideAnnotation::new("patient_2", vec![30.0]));

    let hp = hp()
        .with_loss(Loss::NegativeLogLikelihood)
        .with_balanced_training(Balance::None)
        .checked()
        .unwrap();
    let mut controller = TrainingController::build(
        hp,
        set,
        dir.path().join("out"),
        ReferenceExecutor::with_seed(6),
    )
    .unwrap();
    let shards = vec![shard("slide_a", 20, 0.1), shard("slide_b", 20, 0.8)];
    let err = controller
        .train(&shards, &[], TrainOptions { seed: Some(6), ..Default::default() })
        .unwrap_err();
    assert!(matches!(err, histoflow::Error::Model(_)));
    assert!(format!("{err}").contains("event input"));
}

/// Survival training with event inputs runs end to end
#[test]
fn survival_model_trains_with_event_features() {
    let dir = tempfile::tempdir().unwrap();
    let outdir = dir.path().join("out");
    let mut set = AnnotationSet::new();
    set.insert(
        "slide_a",
        SlideAnnotation::new("patient_1", vec![12.0]).with_features(vec![1.0]),
    );
    set.insert(
        "slide_b",
        SlideAnnotation::new("patient_2", vec![30.0]).with_features(vec![0.0]),
    );
    set.insert(
        "slide_c",
        SlideAnnotation::new("patient_3", vec![8.0]).with_features(vec![1.0]),
    );

    let hp = hp()
        .with_loss(Loss::NegativeLogLikelihood)
        .with_balanced_training(Balance::Patient)
        .with_balanced_validation(Balance::None)
        .checked()
        .unwrap();
    let mut controller = TrainingController::build(
        hp,
        set,
        &outdir,
        ReferenceExecutor::with_seed(7),
    )
    .unwrap()
    .with_slide_features(&[1], Some(vec!["event".to_string()]))
    .unwrap();

    let train_shards = vec![shard("slide_a", 30, 0.1), shard("slide_b", 30, 0.8)];
    let val_shards = vec![shard("slide_c", 10, 0.4)];
    let results = controller
        .train(&train_shards, &val_shards, TrainOptions { seed: Some(7), ..Default::default() })
        .unwrap();
    let record = results.get("epoch1").unwrap();
    assert!(record.val_metrics.contains_key("loss"));
    // Survival models report no accuracy
    assert!(!record.val_metrics.contains_key("accuracy"));
}

/// `load` replaces the handle wholesale; evaluation works on a fresh
/// controller that never trained.
#[test]
fn load_then_evaluate_fresh_controller() {
    let dir = tempfile::tempdir().unwrap();
    let outdir = dir.path().join("out");
    let train_shards = vec![shard("slide_a", 40, 0.1), shard("slide_b", 40, 0.8)];

    let mut trained = TrainingController::build(
        hp().checked().unwrap(),
        annotations(),
        &outdir,
        ReferenceExecutor::with_seed(8),
    )
    .unwrap();
    trained
        .train(&train_shards, &[], TrainOptions { seed: Some(8), ..Default::default() })
        .unwrap();

    let eval_dir = dir.path().join("eval");
    let mut fresh = TrainingController::build(
        hp().checked().unwrap(),
        annotations(),
        &eval_dir,
        ReferenceExecutor::with_seed(8),
    )
    .unwrap();
    // Unready state first
    assert!(matches!(
        fresh.evaluate(&train_shards, EvalOptions::default()),
        Err(histoflow::Error::User(_))
    ));
    fresh.load(&outdir.join("trained_model_epoch1")).unwrap();
    let metrics = fresh
        .evaluate(&train_shards, EvalOptions { seed: Some(8), ..Default::default() })
        .unwrap();
    assert!(metrics.contains_key("loss"));
}

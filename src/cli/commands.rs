//! CLI command implementations
//!
//! The `train` and `evaluate` commands run against a small synthetic
//! dataset so the pipeline can be exercised without slide data on disk;
//! real dataset ingest lives with the caller.

use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cli::{Cli, Command, EvaluateArgs, InfoArgs, TrainArgs, ValidateArgs};
use crate::data::{AnnotationSet, Shard, SlideAnnotation, Tile};
use crate::error::Result;
use crate::hparams::HyperParameters;
use crate::model::ReferenceExecutor;
use crate::studio::{is_mil_model, MilParams};
use crate::train::{load_model, EvalOptions, TrainOptions, TrainingController};

/// Execute a parsed CLI invocation
pub fn run_command(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Validate(args) => run_validate(args),
        Command::Info(args) => run_info(args),
        Command::Train(args) => run_train(args),
        Command::Evaluate(args) => run_evaluate(args),
    }
}

fn run_validate(args: ValidateArgs) -> Result<()> {
    let hp = HyperParameters::from_file(&args.hyperparameters)?;
    println!("hyperparameters are valid");
    println!("  model type: {:?}", hp.model_type());
    println!("  architecture: {:?}", hp.architecture);
    println!("  batch size: {}", hp.batch_size);
    println!("  checkpoint epochs: {:?}", hp.finetune_epochs);
    Ok(())
}

fn run_info(args: InfoArgs) -> Result<()> {
    let model = load_model(&args.model)?;
    println!("model type: {:?}", model.model_type);
    println!("outcomes: {}", model.outcome_names.join(", "));
    println!("layers: {}", model.graph.layers.len());
    println!("weight tensors: {}", model.weights.len());
    if is_mil_model(&args.model) {
        let mil = MilParams::load(&args.model)?;
        println!("MIL trainer: {}", mil.trainer);
        println!("MIL input shape: {:?}", mil.input_shape);
        println!("MIL output shape: {:?}", mil.output_shape);
    }
    Ok(())
}

fn run_train(args: TrainArgs) -> Result<()> {
    let hp = match &args.hp {
        Some(path) => HyperParameters::from_file(path)?,
        None => demo_hyperparameters().checked()?,
    };
    let (shards, annotations) = demo_dataset(args.seed.unwrap_or(42));
    let (train_shards, val_shards) = shards.split_at(shards.len() - 2);

    let mut controller =
        TrainingController::build(hp, annotations, &args.outdir, ReferenceExecutor::new())?;
    let results = controller.train(
        train_shards,
        val_shards,
        TrainOptions { seed: args.seed, ..Default::default() },
    )?;

    println!("training complete");
    for (epoch, record) in &results.epochs {
        let loss = record.val_metrics.get("loss").copied().unwrap_or(f64::NAN);
        println!("  {epoch}: val loss {loss:.4}");
    }
    println!("results written to {}", args.outdir.display());
    Ok(())
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    let (shards, annotations) = demo_dataset(args.seed.unwrap_or(42));
    let hp = demo_hyperparameters().checked()?;
    let mut controller =
        TrainingController::build(hp, annotations, &args.outdir, ReferenceExecutor::new())?;
    controller.load(&args.model)?;
    let metrics = controller.evaluate(
        &shards,
        EvalOptions { seed: args.seed, ..Default::default() },
    )?;
    for (metric, value) in &metrics {
        println!("{metric}: {value:.4}");
    }
    Ok(())
}

fn demo_hyperparameters() -> HyperParameters {
    HyperParameters::new()
        .with_tile_size(8, 302)
        .with_batch_size(8)
        .with_finetune_epochs(vec![2])
        .with_hidden_layers(1, 16)
        .with_learning_rate(0.01)
        .with_augment(false)
}

/// Two-class synthetic dataset: a handful of slides per class with
/// class-shifted tile intensities
fn demo_dataset(seed: u64) -> (Vec<Shard>, AnnotationSet) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut shards = Vec::new();
    let mut annotations = AnnotationSet::new();
    for class in 0..2u32 {
        for si in 0..3u32 {
            let slide = format!("slide_{class}_{si}");
            let patient = format!("patient_{class}_{si}");
            let tiles = (0..24)
                .map(|_| {
                    let base = class as f32 * 0.6;
                    Tile::new(Array3::from_shape_fn((8, 8, 3), |_| {
                        base + rng.random_range(0.0..0.4)
                    }))
                })
                .collect();
            shards.push(Shard::new(slide.clone(), tiles));
            annotations.insert(slide, SlideAnnotation::new(patient, vec![class as f32]));
        }
    }
    (shards, annotations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_dataset_is_balanced_and_annotated() {
        let (shards, annotations) = demo_dataset(1);
        assert_eq!(shards.len(), 6);
        for shard in &shards {
            assert!(annotations.contains(&shard.slide));
            assert_eq!(shard.tiles.len(), 24);
        }
        assert_eq!(annotations.outcome_width().unwrap(), 1);
        assert_eq!(annotations.classes_per_outcome().unwrap()[&0], 2);
    }

    #[test]
    fn test_demo_hyperparameters_validate() {
        assert!(demo_hyperparameters().validate().is_ok());
    }
}

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::Parser;
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use serde_derive::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fmrec::data::Dataset;
use fmrec::datasets::SplitPaths;
use fmrec::evaluation::{hit_ratio_and_ndcg, Metrics};
use fmrec::matrix::AdjacencyMatrix;
use fmrec::models::Hyperparameters;
use fmrec::serving::Device;

/// Random search over factorization machine hyperparameters.
#[derive(Parser)]
#[command(name = "fm_hyperopt", version, long_about = None)]
struct Cli {
    /// Dataset prefix; reads `{prefix}.train.rating` and `{prefix}.test.rating`
    data: PathBuf,

    /// Where results accumulate, best last
    #[arg(long, default_value = "factorization_results.json")]
    results: PathBuf,

    #[arg(long, default_value_t = 1000)]
    trials: usize,

    #[arg(long, default_value_t = 4)]
    train_negatives: usize,

    #[arg(long, default_value_t = 99)]
    test_negatives: usize,

    #[arg(long, default_value_t = 10)]
    topk: usize,

    #[arg(long, default_value_t = 0)]
    threads: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct TrialResult {
    train_loss: f32,
    test: Metrics,
    elapsed: Duration,
    hyperparameters: Hyperparameters,
}

struct Split {
    train: Dataset,
    test: Dataset,
    matrix: AdjacencyMatrix,
    field_dim: usize,
}

fn load(cli: &Cli, rng: &mut XorShiftRng) -> Result<Split, failure::Error> {
    let (mut train, mut test) = SplitPaths::from_prefix(&cli.data).read()?;

    let id_diff = train.normalize_ids(None)?;
    test.normalize_ids(Some(&id_diff))?;

    let field_dim = train
        .idrange()
        .map(|idrange| idrange.total())
        .ok_or_else(|| failure::err_msg("training data was not normalized"))?;

    let matrix = train.create_adjacency_matrix()?;
    train.add_negative_sampling(&matrix, cli.train_negatives, rng)?;
    test.add_negative_sampling(&matrix, cli.test_negatives, rng)?;

    Ok(Split {
        train,
        test,
        matrix,
        field_dim,
    })
}

fn read_results(path: &Path) -> Result<Vec<TrialResult>, failure::Error> {
    match File::open(path) {
        Ok(file) => Ok(serde_json::from_reader(BufReader::new(file))?),
        Err(_) => Ok(Vec::new()),
    }
}

fn run(
    cli: &Cli,
    split: &Split,
    hyper: Hyperparameters,
    device: &Device,
) -> Result<TrialResult, failure::Error> {
    let start = Instant::now();

    let mut model = hyper.clone().build(split.field_dim, Some(&split.matrix))?;
    let train_loss = model.fit(&split.train)?;
    let test = hit_ratio_and_ndcg(
        &model,
        &split.test,
        cli.test_negatives + 1,
        cli.topk,
        device,
    )?;

    Ok(TrialResult {
        train_loss,
        test,
        elapsed: start.elapsed(),
        hyperparameters: hyper,
    })
}

fn main() -> Result<(), failure::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let device = Device::new(cli.threads)?;
    let mut rng = XorShiftRng::seed_from_u64(cli.seed);

    let split = load(&cli, &mut rng)?;
    info!(
        train = split.train.len(),
        test = split.test.len(),
        ids = split.field_dim,
        "loaded data"
    );

    for trial in 0..cli.trials {
        let mut results = read_results(&cli.results)?;

        let hyper = Hyperparameters::random(&mut rng);
        info!(trial = trial, hyperparameters = ?hyper, "running trial");

        let result = match run(&cli, &split, hyper, &device) {
            Ok(result) => result,
            Err(error) => {
                warn!(trial = trial, error = %error, "trial failed");
                continue;
            }
        };

        info!(
            trial = trial,
            loss = result.train_loss,
            hit_ratio = result.test.hit_ratio,
            ndcg = result.test.ndcg,
            elapsed = ?result.elapsed,
            "finished trial"
        );

        if !result.test.ndcg.is_nan() {
            results.push(result);
            results.sort_by(|a, b| a.test.ndcg.total_cmp(&b.test.ndcg));
        }

        if let Some(best) = results.last() {
            info!(
                hit_ratio = best.test.hit_ratio,
                ndcg = best.test.ndcg,
                hyperparameters = ?best.hyperparameters,
                "best so far"
            );
        }

        let mut writer = BufWriter::new(File::create(&cli.results)?);
        serde_json::to_writer_pretty(&mut writer, &results)?;
        writer.flush()?;
    }

    Ok(())
}

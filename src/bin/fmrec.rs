use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use failure::bail;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use tracing::{error, info, info_span};
use tracing_subscriber::EnvFilter;

use fmrec::bundle::ModelBundle;
use fmrec::catalog::{Catalog, CatalogOptions};
use fmrec::data::ITEM_COLUMN;
use fmrec::datasets::SplitPaths;
use fmrec::evaluation::hit_ratio_and_ndcg;
use fmrec::models::{AttentionConfig, EmbeddingKind, Hyperparameters, Optimizer};
use fmrec::serving::{Device, Finder, Recommender, DEFAULT_BATCH_SIZE};

#[derive(Parser)]
#[command(name = "fmrec", version)]
#[command(about = "Train and query factorization machine recommenders", long_about = None)]
struct Cli {
    /// Worker threads; 0 uses one per CPU
    #[arg(long, default_value_t = 0, global = true)]
    threads: usize,

    /// Rows scored per parallel task
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE, global = true)]
    batch_size: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train a model on a train/test split and save it as a bundle
    Train(TrainArgs),
    /// Recommend items similar to the ones named on the command line
    Recommend(RecommendArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EmbeddingArg {
    Plain,
    Spectral,
    Attention,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OptimizerArg {
    Sgd,
    Adam,
}

impl From<OptimizerArg> for Optimizer {
    fn from(arg: OptimizerArg) -> Self {
        match arg {
            OptimizerArg::Sgd => Optimizer::Sgd,
            OptimizerArg::Adam => Optimizer::Adam,
        }
    }
}

#[derive(Args)]
struct TrainArgs {
    /// Dataset prefix; reads `{prefix}.train.rating` and `{prefix}.test.rating`
    data: PathBuf,

    /// Where to write the model bundle
    #[arg(short, long, default_value = "model.json")]
    output: PathBuf,

    #[arg(long, value_enum, default_value = "plain")]
    embedding: EmbeddingArg,

    #[arg(long, default_value_t = 64)]
    embed_dim: usize,

    /// Attention heads, for attention embeddings
    #[arg(long, default_value_t = 8)]
    heads: usize,

    /// Attention dropout, for attention embeddings
    #[arg(long, default_value_t = 0.6)]
    dropout: f32,

    #[arg(long, default_value_t = 20)]
    epochs: usize,

    #[arg(long, default_value_t = 0.001)]
    learning_rate: f32,

    #[arg(long, default_value_t = 0.0)]
    l2_penalty: f32,

    #[arg(long, value_enum, default_value = "adam")]
    optimizer: OptimizerArg,

    #[arg(long, default_value_t = 256)]
    minibatch_size: usize,

    /// Negatives sampled per training interaction
    #[arg(long, default_value_t = 4)]
    train_negatives: usize,

    /// Negatives sampled per held-out interaction
    #[arg(long, default_value_t = 99)]
    test_negatives: usize,

    /// Cutoff for hit ratio and NDCG
    #[arg(long, default_value_t = 10)]
    topk: usize,

    #[arg(long)]
    seed: Option<u64>,

    /// Delimited item catalog to store in the bundle
    #[arg(long)]
    items: Option<PathBuf>,

    #[arg(long, default_value_t = ',')]
    items_delimiter: char,

    #[arg(long, default_value = "id")]
    items_id_column: String,

    /// Column names, for catalogs without a header row
    #[arg(long, value_delimiter = ',')]
    items_columns: Vec<String>,
}

#[derive(Args)]
struct RecommendArgs {
    /// Model bundle written by `train`
    bundle: PathBuf,

    /// Text identifying a liked item; repeat for several queries
    #[arg(short, long = "item")]
    items: Vec<String>,

    /// Catalog fields to search; all fields when omitted
    #[arg(short, long = "field")]
    fields: Vec<String>,

    #[arg(long, default_value_t = 3)]
    topk: usize,
}

fn train(args: &TrainArgs, device: &Device) -> Result<(), failure::Error> {
    let paths = SplitPaths::from_prefix(&args.data);
    if !paths.exist() {
        bail!(
            "missing dataset files {} and {}",
            paths.train.display(),
            paths.test.display()
        );
    }

    let seed = args.seed.unwrap_or_else(|| rand::thread_rng().gen());
    let mut rng = XorShiftRng::seed_from_u64(seed);

    let (mut train, mut test) = paths.read()?;
    let id_diff = train.normalize_ids(None)?;
    test.normalize_ids(Some(&id_diff))?;

    let idrange = train
        .idrange()
        .cloned()
        .ok_or_else(|| failure::err_msg("training data was not normalized"))?;

    let matrix = train.create_adjacency_matrix()?;
    train.add_negative_sampling(&matrix, args.train_negatives, &mut rng)?;
    test.add_negative_sampling(&matrix, args.test_negatives, &mut rng)?;

    info!(
        train = train.len(),
        test = test.len(),
        ids = idrange.total(),
        edges = matrix.nnz(),
        "prepared datasets"
    );

    let embedding = match args.embedding {
        EmbeddingArg::Plain => EmbeddingKind::Plain,
        EmbeddingArg::Spectral => EmbeddingKind::Spectral,
        EmbeddingArg::Attention => EmbeddingKind::Attention(
            AttentionConfig::default()
                .heads(args.heads)
                .dropout(args.dropout),
        ),
    };

    let mut model = Hyperparameters::new(args.embed_dim)
        .embedding(embedding)
        .learning_rate(args.learning_rate)
        .l2_penalty(args.l2_penalty)
        .optimizer(args.optimizer.into())
        .minibatch_size(args.minibatch_size)
        .num_epochs(args.epochs)
        .from_seed(rng.gen())
        .build(idrange.total(), Some(&matrix))?;

    let mut examples = train.to_examples()?;
    let group_size = args.test_negatives + 1;

    for epoch in 0..args.epochs {
        let loss = model.fit_epoch(&mut examples)?;
        let metrics = hit_ratio_and_ndcg(&model, &test, group_size, args.topk, device)?;

        info!(
            epoch = epoch,
            loss = loss,
            hit_ratio = metrics.hit_ratio,
            ndcg = metrics.ndcg,
            "finished epoch"
        );
    }

    model.eval();

    let item_interval = idrange.interval(ITEM_COLUMN);
    let items = match args.items {
        Some(ref path) => {
            if !args.items_delimiter.is_ascii() {
                bail!("catalog delimiter {:?} is not ASCII", args.items_delimiter);
            }

            let mut options = CatalogOptions::default()
                .delimiter(args.items_delimiter as u8)
                .id_column(&args.items_id_column);
            if !args.items_columns.is_empty() {
                options = options.columns(&args.items_columns);
            }

            let mut catalog = Catalog::from_path(path, &options, &id_diff)?;
            let dropped = catalog.retain_ids(&item_interval);
            if dropped > 0 {
                info!(dropped = dropped, "dropped catalog items the model never saw");
            }
            catalog
        }
        None => Catalog::from_ids(item_interval),
    };

    ModelBundle::new(model, idrange, items)?.save(&args.output)?;

    Ok(())
}

fn recommend(args: &RecommendArgs, device: &Device) -> Result<(), failure::Error> {
    let mut bundle = match ModelBundle::load(&args.bundle) {
        Ok(bundle) => bundle,
        Err(error) => {
            error!(error = %error, "cannot load model");
            return Ok(());
        }
    };
    bundle.items_mut().drop_empty_columns();

    if args.items.is_empty() {
        info!("no items to look up");
        return Ok(());
    }

    let finder = match Finder::new(bundle.items(), &args.fields, info_span!("finder")) {
        Ok(finder) => finder,
        Err(error) => {
            error!(error = %error, "cannot search the catalog");
            return Ok(());
        }
    };
    let recommender = Recommender::new(&bundle, device, info_span!("recommender"));

    for query in &args.items {
        let span = info_span!("query", query = %query);
        let _enter = span.enter();

        let liked = match finder.find(query) {
            Ok(item) => item,
            Err(error) => {
                error!(error = %error, "lookup failed");
                continue;
            }
        };

        info!(id = liked.id(), "found item");
        println!("found:\n{}", bundle.items().describe(liked));

        match recommender.recommend(liked.id(), args.topk) {
            Ok(recommendations) => {
                for (item, score) in recommendations {
                    println!("rating:{:.4}\n{}", score, bundle.items().describe(item));
                }
            }
            Err(error) => error!(error = %error, "recommendation failed"),
        }
    }

    Ok(())
}

fn main() -> Result<(), failure::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let device = Device::new(cli.threads)?.batch_size(cli.batch_size);

    info!(threads = device.num_threads(), "started");

    match cli.command {
        Command::Train(ref args) => train(args, &device),
        Command::Recommend(ref args) => recommend(args, &device),
    }
}

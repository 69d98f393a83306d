#[macro_use]
extern crate criterion;

use criterion::Criterion;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;

use fmrec::data::{Dataset, Interaction};
use fmrec::models::{AttentionConfig, EmbeddingKind, Hyperparameters};

fn synthetic(num_users: i64, num_items: i64, per_user: usize) -> Dataset {
    let mut rng = XorShiftRng::seed_from_u64(1);
    let interactions = (0..num_users)
        .flat_map(|user| (0..per_user).map(move |idx| (user, idx)))
        .map(|(user, idx)| Interaction::new(user, rng.gen_range(0..num_items), 1.0, idx as i64))
        .collect();

    let mut dataset = Dataset::new(interactions);
    dataset.normalize_ids(None).unwrap();
    dataset
}

fn bench_matrix(c: &mut Criterion) {
    let dataset = synthetic(1000, 2000, 20);

    c.bench_function("adjacency_matrix", |b| {
        b.iter(|| dataset.create_adjacency_matrix().unwrap())
    });

    let matrix = dataset.create_adjacency_matrix().unwrap();
    c.bench_function("negative_sampling", |b| {
        let mut rng = XorShiftRng::seed_from_u64(2);
        b.iter(|| {
            let mut augmented = dataset.clone();
            augmented.add_negative_sampling(&matrix, 4, &mut rng).unwrap();
            augmented
        })
    });
}

fn bench_fit(c: &mut Criterion) {
    let mut dataset = synthetic(300, 500, 10);
    let matrix = dataset.create_adjacency_matrix().unwrap();
    dataset
        .add_negative_sampling(&matrix, 4, &mut XorShiftRng::seed_from_u64(3))
        .unwrap();
    let field_dim = dataset.idrange().unwrap().total();

    for &(name, kind) in &[
        ("fit_plain", EmbeddingKind::Plain),
        ("fit_spectral", EmbeddingKind::Spectral),
        (
            "fit_attention",
            EmbeddingKind::Attention(AttentionConfig::default().heads(4)),
        ),
    ] {
        let mut model = Hyperparameters::new(32)
            .embedding(kind)
            .learning_rate(0.01)
            .num_epochs(1)
            .from_seed(4)
            .build(field_dim, Some(&matrix))
            .unwrap();

        c.bench_function(name, |b| b.iter(|| model.fit(&dataset).unwrap()));
    }
}

fn bench_score(c: &mut Criterion) {
    let mut dataset = synthetic(300, 500, 10);
    let matrix = dataset.create_adjacency_matrix().unwrap();
    dataset
        .add_negative_sampling(&matrix, 99, &mut XorShiftRng::seed_from_u64(5))
        .unwrap();
    let examples = dataset.to_examples().unwrap();

    let model = Hyperparameters::new(32)
        .embedding(EmbeddingKind::Spectral)
        .from_seed(6)
        .build(dataset.idrange().unwrap().total(), Some(&matrix))
        .unwrap();

    c.bench_function("score_spectral", |b| {
        b.iter(|| model.score(examples.fields()).unwrap())
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_matrix, bench_fit, bench_score
}
criterion_main!(benches);

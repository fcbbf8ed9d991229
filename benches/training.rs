use bikeshare_mlops::dataset::FeatureBuilder;
use bikeshare_mlops::training::RandomForest;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

/// Rows shaped like the encoded hourly table: 7 numeric columns then one-hot groups
fn create_hourly_features(n_rows: usize) -> (Array2<f64>, Array1<f64>) {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let n_features = FeatureBuilder::feature_names().len();
    let mut x = Array2::zeros((n_rows, n_features));
    let mut y = Array1::zeros(n_rows);

    for i in 0..n_rows {
        for j in 0..7 {
            x[[i, j]] = rng.gen::<f64>();
        }
        let hr = rng.gen_range(0..24);
        if hr > 0 {
            x[[i, n_features - 24 + hr]] = 1.0;
        }
        let rush = (7..=9).contains(&hr) || (16..=19).contains(&hr);
        y[i] = if rush || x[[i, 3]] > 0.9 { 1.0 } else { 0.0 };
    }
    (x, y)
}

fn bench_training(c: &mut Criterion) {
    let mut group = c.benchmark_group("training");
    group.sample_size(10);

    for n_rows in [1000, 5000, 10000].iter() {
        let (x, y) = create_hourly_features(*n_rows);

        group.bench_with_input(BenchmarkId::new("fit", n_rows), &(x, y), |b, (x, y)| {
            b.iter(|| {
                let mut forest = RandomForest::new(80).with_max_depth(10);
                forest.fit(black_box(x), black_box(y)).unwrap();
                forest
            })
        });
    }

    group.finish();
}

fn bench_prediction(c: &mut Criterion) {
    let mut group = c.benchmark_group("prediction");

    let (train_x, train_y) = create_hourly_features(5000);
    let mut forest = RandomForest::new(80).with_max_depth(10);
    forest.fit(&train_x, &train_y).unwrap();

    for n_rows in [1, 100, 1000].iter() {
        let (x, _) = create_hourly_features(*n_rows);

        group.bench_with_input(BenchmarkId::new("predict_proba", n_rows), &x, |b, x| {
            b.iter(|| forest.predict_proba(black_box(x)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_training, bench_prediction);
criterion_main!(benches);

//! Two-class Gaussian blob dataset

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::config::DataConfig;
use crate::training::{BatchIter, DataSource};

/// One mini-batch of feature rows with 0/1 labels
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub features: Vec<Vec<f64>>,
    pub labels: Vec<f64>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct GaussianBlobs {
    train: Vec<(Vec<f64>, f64)>,
    test: Vec<(Vec<f64>, f64)>,
    batch_size: usize,
}

impl GaussianBlobs {
    /// Generate the dataset. The same `seed` always yields the same samples.
    pub fn new(config: &DataConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let train = sample_blobs(&mut rng, config, config.train_samples);
        let test = sample_blobs(&mut rng, config, config.test_samples);
        Self {
            train,
            test,
            batch_size: config.batch_size.max(1),
        }
    }

    pub fn features(&self) -> usize {
        self.train
            .first()
            .or_else(|| self.test.first())
            .map(|(x, _)| x.len())
            .unwrap_or(0)
    }

    fn batches<'a>(&'a self, rows: &'a [(Vec<f64>, f64)], order: Vec<usize>) -> BatchIter<'a, Batch> {
        let batch_size = self.batch_size;
        let chunks: Vec<Vec<usize>> = order.chunks(batch_size).map(|c| c.to_vec()).collect();
        Box::new(chunks.into_iter().map(move |chunk| {
            let (features, labels) = chunk
                .iter()
                .map(|&i| (rows[i].0.clone(), rows[i].1))
                .unzip();
            Ok(Batch { features, labels })
        }))
    }
}

/// Half the samples around `-separation/2`, half around `+separation/2`
fn sample_blobs(rng: &mut StdRng, config: &DataConfig, count: usize) -> Vec<(Vec<f64>, f64)> {
    let offset = config.separation / 2.0;
    (0..count)
        .map(|i| {
            let label = (i % 2) as f64;
            let centre = if label > 0.5 { offset } else { -offset };
            let x = (0..config.features)
                .map(|_| centre + config.noise * standard_normal(rng))
                .collect();
            (x, label)
        })
        .collect()
}

/// Box-Muller transform
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

impl DataSource for GaussianBlobs {
    type Batch = Batch;

    fn train_batch_count(&self) -> usize {
        self.train.len().div_ceil(self.batch_size)
    }

    fn test_batch_count(&self) -> usize {
        self.test.len().div_ceil(self.batch_size)
    }

    fn train_batches(&self, epoch: usize, seed: u64) -> BatchIter<'_, Batch> {
        let mut order: Vec<usize> = (0..self.train.len()).collect();
        let mut rng = StdRng::seed_from_u64(seed ^ epoch as u64);
        order.shuffle(&mut rng);
        self.batches(&self.train, order)
    }

    fn test_batches(&self) -> BatchIter<'_, Batch> {
        self.batches(&self.test, (0..self.test.len()).collect())
    }
}

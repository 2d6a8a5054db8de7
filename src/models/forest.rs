//! Isolation forest outlier model.
//!
//! Each tree recursively cuts a random subsample on a random feature at a
//! random value until points are alone. Anomalies sit in sparse regions and
//! get isolated after few cuts, so short average path length means a high
//! score: `s(x) = 2^(-E[h(x)] / c(psi))`.

use crate::error::TrainingError;
use crate::feature_extractor::{FeatureExtractor, FeatureProfile, FeatureVector, FEATURE_COUNT};
use crate::types::transaction::Transaction;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Index of the amount in the feature vector
const AMOUNT: usize = 0;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Average path length of an unsuccessful BST search over `n` points, used
/// both to normalise scores and to extend paths that end in unsplit leaves.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Forest construction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_samples: usize,
    pub min_training_samples: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_samples: 256,
            min_training_samples: 50,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum IsolationNode {
    Split {
        feature: usize,
        value: f64,
        /// Training range of `feature` among the points that reached this node
        low: f64,
        high: f64,
        left: Box<IsolationNode>,
        right: Box<IsolationNode>,
    },
    Leaf {
        size: usize,
    },
}

impl IsolationNode {
    fn build(points: &[FeatureVector], depth: usize, limit: usize, rng: &mut StdRng) -> Self {
        if depth >= limit || points.len() <= 1 {
            return IsolationNode::Leaf { size: points.len() };
        }

        let splittable: Vec<(usize, f64, f64)> = (0..FEATURE_COUNT)
            .filter_map(|f| {
                let (low, high) = feature_range(points, f);
                (high > low).then_some((f, low, high))
            })
            .collect();
        if splittable.is_empty() {
            return IsolationNode::Leaf { size: points.len() };
        }

        let (feature, low, high) = splittable[rng.gen_range(0..splittable.len())];
        let value = rng.gen_range(low..high);
        let (left, right): (Vec<FeatureVector>, Vec<FeatureVector>) =
            points.iter().partition(|p| p.get(feature) < value);

        IsolationNode::Split {
            feature,
            value,
            low,
            high,
            left: Box::new(Self::build(&left, depth + 1, limit, rng)),
            right: Box::new(Self::build(&right, depth + 1, limit, rng)),
        }
    }

    /// Expected path length of `x` from this node.
    ///
    /// A value outside the node's training range would, had it been present
    /// during training, have been cut off here with probability
    /// `gap / (range + gap)`. Blending that in keeps extrapolated values from
    /// inheriting the path length of the nearest boundary point.
    fn path_length(&self, x: &FeatureVector, depth: f64) -> f64 {
        match self {
            IsolationNode::Leaf { size } => depth + average_path_length(*size),
            IsolationNode::Split {
                feature,
                value,
                low,
                high,
                left,
                right,
            } => {
                let v = x.get(*feature);
                let child = if v < *value { left } else { right };
                let rest = child.path_length(x, depth + 1.0);

                let gap = if v < *low {
                    low - v
                } else if v > *high {
                    v - high
                } else {
                    0.0
                };
                if gap > 0.0 {
                    let p_isolated = gap / (high - low + gap);
                    p_isolated * (depth + 1.0) + (1.0 - p_isolated) * rest
                } else {
                    rest
                }
            }
        }
    }
}

fn feature_range(points: &[FeatureVector], feature: usize) -> (f64, f64) {
    points.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
        (lo.min(p.get(feature)), hi.max(p.get(feature)))
    })
}

/// Ensemble of isolation trees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsolationNode>,
    subsample_size: usize,
}

impl IsolationForest {
    pub fn fit(points: &[FeatureVector], params: &ForestParams) -> Self {
        let mut rng = StdRng::seed_from_u64(params.seed);
        let subsample_size = params.max_samples.min(points.len()).max(1);
        let limit = (subsample_size as f64).log2().ceil() as usize;

        let trees = (0..params.n_trees.max(1))
            .map(|_| {
                let sample: Vec<FeatureVector> =
                    rand::seq::index::sample(&mut rng, points.len(), subsample_size)
                        .into_iter()
                        .map(|i| points[i])
                        .collect();
                IsolationNode::build(&sample, 0, limit, &mut rng)
            })
            .collect();

        Self {
            trees,
            subsample_size,
        }
    }

    /// Anomaly score in (0, 1]; around 0.5 or below is unremarkable.
    pub fn score(&self, x: &FeatureVector) -> f64 {
        let mean_path = self
            .trees
            .iter()
            .map(|t| t.path_length(x, 0.0))
            .sum::<f64>()
            / self.trees.len() as f64;
        let norm = average_path_length(self.subsample_size);
        if norm <= 0.0 {
            return 0.5;
        }
        2f64.powf(-mean_path / norm)
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }
}

/// Trained, immutable outlier model snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringModel {
    pub version: u64,
    forest: IsolationForest,
    profile: FeatureProfile,
    /// Indices of features that varied across the training window
    active_features: Vec<usize>,
    pub contamination: f64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub sample_count: usize,
    /// Scores strictly above this are outliers
    pub threshold: f64,
    pub trained_at: DateTime<Utc>,
}

/// Outlier score of one transaction under one model version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierScore {
    pub transaction_id: String,
    pub model_version: u64,
    pub raw_score: f64,
    pub is_outlier: bool,
}

impl ScoringModel {
    /// Names of the features the forest can split on
    pub fn active_feature_names(&self) -> Vec<&'static str> {
        let names = FeatureExtractor::new().feature_names();
        self.active_features.iter().map(|&i| names[i]).collect()
    }
}

/// Train a new model version on `training`.
pub fn train(
    training: &[Transaction],
    contamination: f64,
    params: &ForestParams,
    version: u64,
) -> Result<ScoringModel, TrainingError> {
    if !(contamination > 0.0 && contamination <= 0.5) {
        return Err(TrainingError::InvalidContamination { rate: contamination });
    }
    let required = params.min_training_samples.max(2);
    if training.len() < required {
        return Err(TrainingError::InsufficientSamples {
            actual: training.len(),
            required,
        });
    }

    let extractor = FeatureExtractor::new();
    let profile = extractor.fit(training);
    let points: Vec<FeatureVector> = training.iter().map(|tx| profile.extract(tx)).collect();

    // Constant context features are never split on; a single-agency feed or
    // all-unique recipients only shrinks the usable feature set. A constant
    // amount leaves nothing to score against.
    let active_features: Vec<usize> = (0..FEATURE_COUNT)
        .filter(|&index| {
            let (low, high) = feature_range(&points, index);
            high > low
        })
        .collect();
    if active_features.first() != Some(&AMOUNT) {
        return Err(TrainingError::DegenerateFeature {
            feature: extractor.feature_names()[AMOUNT],
        });
    }

    let forest = IsolationForest::fit(&points, params);

    let mut scores: Vec<f64> = points.iter().map(|p| forest.score(p)).collect();
    scores.sort_by(|a, b| a.total_cmp(b));
    let flagged = ((contamination * scores.len() as f64).round() as usize).min(scores.len() - 1);
    let threshold = scores[scores.len() - 1 - flagged];

    debug!(
        version = version,
        samples = training.len(),
        active_features = active_features.len(),
        trees = forest.tree_count(),
        threshold = threshold,
        "Isolation forest trained"
    );

    Ok(ScoringModel {
        version,
        forest,
        window_start: profile.window_start,
        window_end: profile.window_end,
        profile,
        active_features,
        contamination,
        sample_count: training.len(),
        threshold,
        trained_at: Utc::now(),
    })
}

/// Score a single transaction. Depends on nothing but `tx` and `model`.
pub fn score(tx: &Transaction, model: &ScoringModel) -> OutlierScore {
    let features = model.profile.extract(tx);
    let raw_score = model.forest.score(&features);

    OutlierScore {
        transaction_id: tx.transaction_id.clone(),
        model_version: model.version,
        raw_score,
        is_outlier: raw_score > model.threshold,
    }
}

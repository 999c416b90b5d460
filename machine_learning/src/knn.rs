use comms::specs::moco::KnnSpec;
use log::debug;
use ndarray::{Array2, ArrayView2, Axis, Zip, concatenate};

use crate::{
    MlErr, Result,
    arch::Encoder,
    dataset::LabeledSet,
    moco::Moco,
};

/// The embedded reference set the monitor votes with.
#[derive(Debug, Clone)]
pub struct FeatureBank {
    /// `dim x len`, one unit feature per column.
    features: Array2<f32>,
    labels: Vec<usize>,
    classes: usize,
}

impl FeatureBank {
    pub fn features(&self) -> ArrayView2<'_, f32> {
        self.features.view()
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn classes(&self) -> usize {
        self.classes
    }
}

/// Embeds every sample of `set` once with the query encoder.
///
/// # Arguments
/// * `moco` - The engine whose query encoder embeds the samples.
/// * `set` - The labeled reference samples.
/// * `batch_size` - How many samples are embedded at a time.
pub fn build_feature_bank<E: Encoder>(
    moco: &Moco<E>,
    set: &LabeledSet,
    batch_size: usize,
) -> Result<FeatureBank> {
    let chunks = set
        .batches(batch_size)
        .map(|(x, _)| moco.embed(x))
        .collect::<Result<Vec<_>>>()?;

    let views: Vec<_> = chunks.iter().map(|chunk| chunk.view()).collect();
    let features = if views.is_empty() {
        Array2::zeros((moco.encoders().encoder().output_dim(), 0))
    } else {
        concatenate(Axis(0), &views)?.reversed_axes()
    };

    Ok(FeatureBank {
        features,
        labels: set.labels().to_vec(),
        classes: set.classes(),
    })
}

/// Ranks the classes of every query row by a temperature weighted vote of its `k` most
/// similar bank entries.
///
/// # Arguments
/// * `features` - The `B x D` unit query features.
/// * `bank` - The `D x N` unit reference features.
/// * `labels` - The class of every bank column.
/// * `classes` - The amount of classes.
/// * `k` - The amount of neighbours voting, clamped to the bank size.
/// * `t` - The temperature of the `exp(similarity / t)` vote weight.
///
/// # Returns
/// A `B x classes` matrix, row `i` holding the classes by descending vote.
pub fn knn_predict(
    features: ArrayView2<f32>,
    bank: ArrayView2<f32>,
    labels: &[usize],
    classes: usize,
    k: usize,
    t: f32,
) -> Result<Array2<usize>> {
    if features.ncols() != bank.nrows() {
        return Err(MlErr::SizeMismatch {
            what: "knn feature dimension",
            got: features.ncols(),
            expected: bank.nrows(),
        });
    }

    if labels.len() != bank.ncols() {
        return Err(MlErr::SizeMismatch {
            what: "knn bank labels",
            got: labels.len(),
            expected: bank.ncols(),
        });
    }

    if let Some(&label) = labels.iter().find(|&&label| label >= classes) {
        return Err(MlErr::LabelOutOfRange { label, classes });
    }

    let sim = features.dot(&bank);
    let k = k.min(bank.ncols());
    let mut ranking = Array2::zeros((features.nrows(), classes));

    Zip::from(ranking.rows_mut())
        .and(sim.rows())
        .par_for_each(|mut ranked, sim| {
            let mut neighbours: Vec<usize> = (0..sim.len()).collect();
            neighbours.sort_by(|&a, &b| sim[b].total_cmp(&sim[a]));

            let mut votes = vec![0f32; classes];
            for &j in &neighbours[..k] {
                votes[labels[j]] += (sim[j] / t).exp();
            }

            let mut order: Vec<usize> = (0..classes).collect();
            order.sort_by(|&a, &b| votes[b].total_cmp(&votes[a]));

            for (slot, class) in ranked.iter_mut().zip(order) {
                *slot = class;
            }
        });

    Ok(ranking)
}

/// Top-1 and top-5 accuracies of a monitor pass, as percentages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KnnAccuracy {
    pub top1: f32,
    pub top5: f32,
    pub total: usize,
}

/// Tracks representation quality by classifying a held-out set with the nearest
/// neighbours of an embedded reference set.
#[derive(Debug, Clone, Copy)]
pub struct KnnMonitor {
    k: usize,
    t: f32,
}

impl KnnMonitor {
    pub fn new(spec: KnnSpec) -> Self {
        Self {
            k: spec.k,
            t: spec.t,
        }
    }

    /// Runs a full monitor pass.
    ///
    /// # Arguments
    /// * `moco` - The engine being evaluated.
    /// * `memory` - The reference set, embedded into the feature bank.
    /// * `test` - The held-out set that is classified.
    /// * `batch_size` - How many samples are embedded at a time.
    pub fn evaluate<E: Encoder>(
        &self,
        moco: &Moco<E>,
        memory: &LabeledSet,
        test: &LabeledSet,
        batch_size: usize,
    ) -> Result<KnnAccuracy> {
        let bank = build_feature_bank(moco, memory, batch_size)?;
        let top = bank.classes.min(5);
        let (mut top1, mut top5) = (0, 0);

        for (x, labels) in test.batches(batch_size) {
            let features = moco.embed(x)?;
            let ranking = knn_predict(
                features.view(),
                bank.features(),
                bank.labels(),
                bank.classes,
                self.k,
                self.t,
            )?;

            for (ranked, &label) in ranking.rows().into_iter().zip(labels) {
                top1 += usize::from(ranked[0] == label);
                top5 += usize::from(ranked.iter().take(top).any(|&c| c == label));
            }
        }

        let total = test.len();
        let percent = |hits: usize| hits as f32 / total.max(1) as f32 * 100.;
        let accuracy = KnnAccuracy {
            top1: percent(top1),
            top5: percent(top5),
            total,
        };

        debug!(top1 = accuracy.top1, top5 = accuracy.top5; "knn monitor pass");
        Ok(accuracy)
    }
}

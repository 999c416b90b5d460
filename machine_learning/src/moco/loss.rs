use ndarray::{Array2, ArrayView2, Axis, Zip, s};

use crate::{MlErr, Result};

/// Builds the `N x (1 + K)` InfoNCE logits: column 0 holds `q[i] . k[i]` and the rest
/// `q[i] . queue[:, j]`, everything divided by the temperature.
///
/// # Arguments
/// * `q` - The `N x D` unit query features.
/// * `k` - The `N x D` unit key features, row `i` being the positive of `q[i]`.
/// * `queue` - The `D x K` negatives.
/// * `temperature` - The softmax temperature.
pub fn logits(
    q: ArrayView2<f32>,
    k: ArrayView2<f32>,
    queue: ArrayView2<f32>,
    temperature: f32,
) -> Result<Array2<f32>> {
    if q.dim() != k.dim() {
        return Err(MlErr::SizeMismatch {
            what: "positive pairs",
            got: k.nrows(),
            expected: q.nrows(),
        });
    }

    if queue.nrows() != q.ncols() {
        return Err(MlErr::SizeMismatch {
            what: "queue feature dimension",
            got: queue.nrows(),
            expected: q.ncols(),
        });
    }

    let n = q.nrows();
    let negatives = queue.ncols();
    let mut logits = Array2::zeros((n, 1 + negatives));

    Zip::from(logits.column_mut(0))
        .and(q.rows())
        .and(k.rows())
        .for_each(|l, q, k| *l = q.dot(&k));

    logits.slice_mut(s![.., 1..]).assign(&q.dot(&queue));
    logits /= temperature;
    Ok(logits)
}

/// Computes the mean cross-entropy of `logits` taking class 0 as the target of every row.
///
/// # Returns
/// The loss and its derivative with respect to the logits, `(softmax - onehot(0)) / N`.
pub fn cross_entropy(logits: ArrayView2<f32>) -> (f32, Array2<f32>) {
    let n = logits.nrows();
    let mut dlogits = logits.to_owned();
    let mut loss = 0.;

    for mut row in dlogits.axis_iter_mut(Axis(0)) {
        let positive = row[0];
        let max = row.fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));
        row.mapv_inplace(|x| (x - max).exp());

        let sum = row.sum();
        loss += sum.ln() + max - positive;

        row /= sum;
        row[0] -= 1.;
    }

    let scale = 1. / n.max(1) as f32;
    dlogits *= scale;
    (loss * scale, dlogits)
}

#[cfg(test)]
mod tests {
    use ndarray::{Array1, array};

    use super::*;

    #[test]
    fn positives_lead_the_row() {
        let q = array![[1., 0.], [0., 1.]];
        let k = array![[1., 0.], [1., 0.]];
        let queue = array![[0., 1., -1.], [1., 0., 0.]];

        let logits = logits(q.view(), k.view(), queue.view(), 0.5).unwrap();
        assert_eq!(logits, array![[2., 0., 2., -2.], [0., 2., 0., 0.]]);
    }

    #[test]
    fn equal_similarities_give_log_of_classes() {
        let negatives = 15;
        let logits = Array2::from_elem((4, 1 + negatives), 0.3);

        let (loss, _) = cross_entropy(logits.view());
        assert!((loss - (1. + negatives as f32).ln()).abs() < 1e-5);
    }

    #[test]
    fn dominant_positive_gives_zero_loss() {
        let mut logits = Array2::from_elem((3, 9), -1. / 0.07);
        logits.column_mut(0).fill(1. / 0.07);

        let (loss, dlogits) = cross_entropy(logits.view());
        assert!(loss < 1e-6);
        assert!(dlogits.iter().all(|d| d.abs() < 1e-6));
    }

    #[test]
    fn gradient_rows_sum_to_zero() {
        let logits = array![[0.5, -1., 2.], [3., 0., 0.1]];
        let (_, dlogits) = cross_entropy(logits.view());

        let sums: Array1<f32> = dlogits.sum_axis(Axis(1));
        assert!(sums.iter().all(|s| s.abs() < 1e-6));
        assert!(dlogits[[0, 0]] < 0.);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let logits = array![[0.5f32, -1., 2.], [3., 0., 0.1]];
        let (_, dlogits) = cross_entropy(logits.view());
        let eps = 1e-2;

        for i in 0..2 {
            for j in 0..3 {
                let mut plus = logits.clone();
                let mut minus = logits.clone();
                plus[[i, j]] += eps;
                minus[[i, j]] -= eps;

                let numeric =
                    (cross_entropy(plus.view()).0 - cross_entropy(minus.view()).0) / (2. * eps);
                assert!((numeric - dlogits[[i, j]]).abs() < 1e-3);
            }
        }
    }
}

use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};

const EPS: f32 = 1e-12;

fn row_norms(x: &ArrayView2<f32>) -> Array1<f32> {
    x.map_axis(Axis(1), |row| row.dot(&row).sqrt())
}

/// L2-normalizes every row of `x`, dividing by `max(||row||, 1e-12)`.
pub fn normalize(x: ArrayView2<f32>) -> Array2<f32> {
    let norms = row_norms(&x);
    let mut y = x.to_owned();

    for (mut row, &norm) in y.axis_iter_mut(Axis(0)).zip(norms.iter()) {
        row /= norm.max(EPS);
    }

    y
}

/// Computes the gradient with respect to the unnormalized rows.
///
/// # Arguments
/// * `x` - The rows that were given to `normalize`.
/// * `d` - The derivative of the loss with respect to the normalized rows.
///
/// # Returns
/// The derivative of the loss with respect to `x`.
pub fn normalize_backward(x: ArrayView2<f32>, d: ArrayView2<f32>) -> Array2<f32> {
    let norms = row_norms(&x);
    let mut dx = d.to_owned();

    Zip::from(dx.rows_mut())
        .and(x.rows())
        .and(&norms)
        .for_each(|mut dx, x, &norm| {
            if norm <= EPS {
                // Below eps the norm is clamped to a constant.
                dx /= EPS;
                return;
            }

            let y = &x / norm;
            let proj = dx.dot(&y);
            dx.zip_mut_with(&y, |d, &y| *d = (*d - y * proj) / norm);
        });

    dx
}

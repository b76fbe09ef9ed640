use crate::Float;
use nalgebra as na;

/// Least squares line `y = k * x + b`, returns `[k, b]`.
pub fn linear_ls<T: Float>(x: &na::DVector<T>, y: &na::DVector<T>) -> Option<na::Vector2<T>> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }

    let n = T::from_usize(x.len())?;
    let s_x = x.sum();
    let s_x2 = x.map(|x| x * x).sum();
    let s_xy = x.zip_map(y, |x, y| x * y).sum();
    let s_y = y.sum();

    let a = na::Matrix2::new(s_x2, s_x, s_x, n);
    let b = na::Vector2::new(s_xy, s_y);

    let qr_result = a.qr();
    let qty = qr_result.q().transpose() * b;

    qr_result.r().solve_upper_triangular(&qty)
}

/// Least squares parabola `y = a * x^2 + b * x + c`, returns `[a, b, c]`.
pub fn quadratic_ls<T: Float>(x: &na::DVector<T>, y: &na::DVector<T>) -> Option<na::Vector3<T>> {
    if x.len() != y.len() || x.len() < 3 {
        return None;
    }

    let n = T::from_usize(x.len())?;

    let s_x1 = x.sum();
    let x2 = x.map(|x| x * x);
    let s_x2 = x2.sum();
    let x3 = x2.zip_map(x, |a, b| a * b);
    let s_x3 = x3.sum();
    let s_x4 = x3.zip_map(x, |a, b| a * b).sum();
    let s_x2y = x2.zip_map(y, |x, y| x * y).sum();
    let s_xy = x.zip_map(y, |x, y| x * y).sum();
    let s_y = y.sum();

    let a = na::Matrix3::new(s_x4, s_x3, s_x2, s_x3, s_x2, s_x1, s_x2, s_x1, n);
    let b = na::Vector3::new(s_x2y, s_xy, s_y);

    let qr_result = a.qr();
    let qty = qr_result.q().transpose() * b;

    qr_result.r().solve_upper_triangular(&qty)
}

/// Coefficient of determination of `fitted` against the observations `y`.
pub fn r_squared<T: Float>(y: &na::DVector<T>, fitted: &na::DVector<T>) -> Option<T> {
    if y.len() != fitted.len() || y.is_empty() {
        return None;
    }

    let eps = T::from_f64(1e-12)?;
    let mean = y.sum() / T::from_usize(y.len())?;
    let ss_res = y.zip_map(fitted, |y, f| (y - f) * (y - f)).sum();
    let ss_tot = y.map(|y| (y - mean) * (y - mean)).sum();

    if ss_tot <= eps {
        // flat observations: a perfect fit is still perfect
        return Some(if ss_res <= eps { T::one() } else { T::zero() });
    }

    Some(T::one() - ss_res / ss_tot)
}

pub fn gauss(x: f32, c: f32) -> f32 {
    (-((x * x) / (2.0 * c * c))).exp()
}

#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

pub fn median(values: &mut [f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }

    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;

    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) * 0.5
    } else {
        values[mid]
    })
}

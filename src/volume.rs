// src/volume.rs

use crate::series::trapezoid;
use tracing::warn;

/// Scale a raw flow series so its trapezoidal integral matches a manually
/// measured volume. Returns the corrected flows, the integral before
/// correction, and the factor applied.
///
/// Degenerate inputs are left untouched with factor 1.0: fewer than two
/// samples cannot be integrated, and a non-positive integral means the
/// detector saw no flow; scaling zeros up to a manual volume would only
/// amplify noise.
pub fn normalize_flow_by_volume(
    flows: &[f64],
    times: &[f64],
    manual_total_volume_ml: f64,
) -> (Vec<f64>, f64, f64) {
    if flows.len() < 2 {
        return (flows.to_vec(), 0.0, 1.0);
    }

    let calculated_total = trapezoid(flows, times);
    if calculated_total <= 0.0 {
        warn!(
            "Computed volume {:.2} ml is non-positive, skipping normalization to {:.1} ml",
            calculated_total, manual_total_volume_ml
        );
        return (flows.to_vec(), calculated_total, 1.0);
    }

    let correction_factor = manual_total_volume_ml / calculated_total;
    let corrected = flows.iter().map(|f| f * correction_factor).collect();
    (corrected, calculated_total, correction_factor)
}

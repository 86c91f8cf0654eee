//! Per-element magnetostatic kernel by face-charge quadrature.
//!
//! A cell uniformly magnetised along the source axis $u$ is equivalent to
//! two sheets of surface charge $\sigma = \pm 1$ on its faces normal to $u$.
//! The field component $c$ they produce at displacement $\mathbf{r}$ from the
//! cell centre is
//!
//! $$
//! K_{cu}(\mathbf{r}) = \frac{1}{4\pi} \sum_{\sigma = \pm 1} \sigma
//! \iint_{\text{face}_\sigma} \frac{(\mathbf{r} - \mathbf{r}')_c}{|\mathbf{r} - \mathbf{r}'|^3}
//! \, dA'
//! $$
//!
//! so that $\mathbf{H} = \mathbf{K} \cdot \mathbf{M}$. The observation point
//! always sits at least half a cell away from either face, even for the
//! self-cell, so the integrand is smooth and a fixed-order tensor-product
//! Gauss rule converges without a singular closed form.

use std::f64::consts::PI;

use crate::quadrature::QuadratureTable;
use crate::types::{CellSize, ComponentPair};

const FRAC_1_4PI: f64 = 1.0 / (4.0 * PI);

/// Physical displacement of a lattice offset.
#[inline]
fn displacement(offset: [i64; 3], cell: &CellSize) -> [f64; 3] {
    let size = cell.dims();
    [
        offset[0] as f64 * size[0],
        offset[1] as f64 * size[1],
        offset[2] as f64 * size[2],
    ]
}

/// Component `c` of $\mathbf{d} / |\mathbf{d}|^3$.
#[inline]
fn coulomb(d: &[f64; 3], c: usize) -> f64 {
    let r2 = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];
    d[c] / (r2 * r2.sqrt())
}

/// Integrate the (field, source) kernel entry for a source cell at lattice
/// `offset` from the observation point.
///
/// The reference nodes of `quadrature` are mapped from [-1, 1] onto each
/// face's transverse extent; the Jacobian of that map is
/// $(\Delta_v / 2)(\Delta_w / 2)$.
pub fn face_kernel_element(
    pair: ComponentPair,
    offset: [i64; 3],
    cell: &CellSize,
    quadrature: &QuadratureTable,
) -> f64 {
    let c = pair.field.index();
    let u = pair.source.index();
    let (v, w) = pair.source.transverse();

    let size = cell.dims();
    let half = [0.5 * size[0], 0.5 * size[1], 0.5 * size[2]];
    let r = displacement(offset, cell);

    let mut acc = 0.0;
    let mut d = [0.0_f64; 3];
    for (pv, wv) in quadrature.nodes() {
        d[v] = r[v] - half[v] * pv;
        for (pw, ww) in quadrature.nodes() {
            d[w] = r[w] - half[w] * pw;

            // + face
            d[u] = r[u] - half[u];
            let plus = coulomb(&d, c);

            // - face
            d[u] = r[u] + half[u];
            let minus = coulomb(&d, c);

            acc += wv * ww * (plus - minus);
        }
    }

    acc * half[v] * half[w] * FRAC_1_4PI
}

/// Closed-form point-dipole kernel entry for a source cell at `offset`.
///
/// $K_{cs} = \frac{V}{4\pi} \left( \frac{3 r_c r_s}{r^5} - \frac{\delta_{cs}}{r^3} \right)$
///
/// # Panics
/// Panics if `offset` is zero (the point dipole is singular there).
pub fn point_dipole_element(pair: ComponentPair, offset: [i64; 3], cell: &CellSize) -> f64 {
    assert!(
        offset != [0, 0, 0],
        "Self-interaction: the point-dipole tensor is singular at zero offset"
    );
    let r = displacement(offset, cell);
    let c = pair.field.index();
    let s = pair.source.index();

    let r2 = r[0] * r[0] + r[1] * r[1] + r[2] * r[2];
    let inv_r3 = 1.0 / (r2 * r2.sqrt());
    let delta = if c == s { 1.0 } else { 0.0 };

    cell.volume() * FRAC_1_4PI * (3.0 * r[c] * r[s] / r2 - delta) * inv_r3
}

/// Single-term kernel entry with the near/far split applied.
///
/// Offsets whose physical distance reaches `far_field_radius` times the
/// longest cell side use the point-dipole tensor; all others (and every
/// offset when the radius is `None` or zero) are integrated over the source
/// faces.
pub fn kernel_element(
    pair: ComponentPair,
    offset: [i64; 3],
    cell: &CellSize,
    quadrature: &QuadratureTable,
    far_field_radius: Option<u32>,
) -> f64 {
    if let Some(radius) = far_field_radius.filter(|&r| r > 0) {
        let r = displacement(offset, cell);
        let r2 = r[0] * r[0] + r[1] * r[1] + r[2] * r[2];
        let limit = f64::from(radius) * cell.max_side();
        if r2 >= limit * limit {
            return point_dipole_element(pair, offset, cell);
        }
    }
    face_kernel_element(pair, offset, cell, quadrature)
}

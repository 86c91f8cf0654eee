//! Periodic image summation.
//!
//! Periodic boundary conditions are approximated by truncating the lattice
//! sum over images of the source cell. Along an axis with `per` repetitions
//! the source is repeated at shifts of $k N$ cells, $k \in [-per, per]$,
//! where $N$ is the kernel extent along that axis. Axes with `per = 0`
//! contribute only the $k = 0$ term, i.e. open boundaries.
//!
//! Images are visited in a fixed nested order (axis 0 outermost, each index
//! ascending), so the floating-point sum of one element does not depend on
//! which device evaluates it.

use crate::kernel::face::kernel_element;
use crate::quadrature::QuadratureTable;
use crate::types::{ComponentPair, GridExtent, KernelParams, Periodicity};

/// Visit every periodic image of `offset` in summation order.
pub fn for_each_image<F>(
    offset: [i64; 3],
    extent: &GridExtent,
    periodicity: &Periodicity,
    mut f: F,
) where
    F: FnMut([i64; 3]),
{
    let window = |axis: usize| {
        let per = periodicity.repetitions(axis) as i64;
        (-per..=per, extent.axis(axis) as i64)
    };
    let ((ra, na), (rb, nb), (rc, nc)) = (window(0), window(1), window(2));

    for a in ra {
        for b in rb.clone() {
            for c in rc.clone() {
                f([offset[0] + a * na, offset[1] + b * nb, offset[2] + c * nc]);
            }
        }
    }
}

/// Lattice offsets of every periodic image of `offset`, in summation order.
pub fn image_offsets(
    offset: [i64; 3],
    extent: &GridExtent,
    periodicity: &Periodicity,
) -> Vec<[i64; 3]> {
    let mut images = Vec::with_capacity(periodicity.image_count());
    for_each_image(offset, extent, periodicity, |image| images.push(image));
    images
}

/// Kernel entry at `offset` summed over the periodic image window of
/// `params`.
pub fn periodic_kernel_element(
    pair: ComponentPair,
    offset: [i64; 3],
    params: &KernelParams,
    quadrature: &QuadratureTable,
) -> f64 {
    let mut sum = 0.0;
    for_each_image(offset, &params.extent, &params.periodicity, |image| {
        sum += kernel_element(
            pair,
            image,
            &params.cell_size,
            quadrature,
            params.far_field_radius,
        );
    });
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CellSize, Component};
    use approx::assert_abs_diff_eq;

    fn params(per: [usize; 3]) -> KernelParams {
        KernelParams::new(
            GridExtent::new([4, 6, 2]).unwrap(),
            CellSize::new([1.0, 1.0, 2.0]).unwrap(),
        )
        .with_periodicity(Periodicity::new(per))
    }

    #[test]
    fn test_open_axes_yield_single_image() {
        let p = params([0, 0, 0]);
        let images = image_offsets([1, -2, 0], &p.extent, &p.periodicity);
        assert_eq!(images, vec![[1, -2, 0]]);
    }

    #[test]
    fn test_image_window_order_and_count() {
        let p = params([1, 0, 2]);
        let images = image_offsets([0, 1, 0], &p.extent, &p.periodicity);
        assert_eq!(images.len(), p.periodicity.image_count());
        assert_eq!(images.first(), Some(&[-4, 1, -4]));
        assert_eq!(images[1], [-4, 1, -2]);
        assert_eq!(images.last(), Some(&[4, 1, 4]));
    }

    #[test]
    fn test_non_periodic_sum_matches_single_term() {
        let p = params([0, 0, 0]);
        let quad = QuadratureTable::gauss_legendre_10();
        let pair = ComponentPair::new(Component::X, Component::Y);
        for offset in [[0, 0, 0], [1, 1, 0], [-1, 2, 1]] {
            let single = kernel_element(pair, offset, &p.cell_size, &quad, p.far_field_radius);
            assert_eq!(periodic_kernel_element(pair, offset, &p, &quad), single);
        }
    }

    #[test]
    fn test_sum_follows_image_order() {
        let p = params([1, 2, 1]);
        let quad = QuadratureTable::gauss_legendre_10();
        let pair = ComponentPair::new(Component::X, Component::Z);
        let offset = [-1, 3, 1];

        let mut expected = 0.0;
        for image in image_offsets(offset, &p.extent, &p.periodicity) {
            expected += kernel_element(pair, image, &p.cell_size, &quad, p.far_field_radius);
        }
        assert_eq!(periodic_kernel_element(pair, offset, &p, &quad), expected);
    }

    #[test]
    fn test_one_repetition_adds_two_images() {
        let quad = QuadratureTable::gauss_legendre_10();
        let pair = ComponentPair::new(Component::Y, Component::Y);
        let open = params([0, 0, 0]);
        let pbc = params([0, 1, 0]);
        let offset = [1, 2, 0];

        let delta = periodic_kernel_element(pair, offset, &pbc, &quad)
            - periodic_kernel_element(pair, offset, &open, &quad);
        let images = kernel_element(pair, [1, 2 - 6, 0], &open.cell_size, &quad, None)
            + kernel_element(pair, [1, 2 + 6, 0], &open.cell_size, &quad, None);
        assert_abs_diff_eq!(delta, images, epsilon = 1e-14);
    }
}

use crate::block::BlockMatrix;
use crate::prelude::*;
use anyhow::{Result, bail};

/* #region builder capability */

/// Coulomb and exchange matrices produced by one two-electron pass.
///
/// `j` is built from the total density, `ka`/`kb` from the per-spin densities.
pub struct JkMatrices {
    pub j: BlockMatrix,
    pub ka: BlockMatrix,
    pub kb: BlockMatrix,
}

/// Two-electron integral engine seam.
///
/// The SCF loop hands over the current densities, orbital coefficients and
/// per-irrep occupation counts and receives fully formed Coulomb/exchange
/// matrices back; whatever parallelism the engine uses internally is its own
/// business. Errors are passed through to the caller untouched.
pub trait JkBuilder {
    fn build(
        &self,
        da: &BlockMatrix,
        db: &BlockMatrix,
        ca: &BlockMatrix,
        nalpha_pi: &[usize],
        nbeta_pi: &[usize],
    ) -> Result<JkMatrices>;
}

/* #endregion */

/* #region dense in-core builder */

/// In-core builder contracting a full `(pq|rs)` tensor against the densities.
/// Only meaningful without symmetry blocking, so it insists on one irrep.
pub struct DenseJkBuilder {
    int2e: Tsr,
}

impl DenseJkBuilder {
    pub fn new(int2e: Tsr) -> Self {
        Self { int2e }
    }

    pub fn from_cint(cint_data: &CInt) -> Self {
        Self::new(intor_row_major(cint_data, "int2e"))
    }
}

impl JkBuilder for DenseJkBuilder {
    fn build(
        &self,
        da: &BlockMatrix,
        db: &BlockMatrix,
        _ca: &BlockMatrix,
        _nalpha_pi: &[usize],
        _nbeta_pi: &[usize],
    ) -> Result<JkMatrices> {
        if da.nirrep() != 1 {
            bail!("dense J/K builder handles a single irrep, got {}", da.nirrep());
        }
        let dt = da.block(0) + db.block(0);
        let j = (&self.int2e * &dt).sum_axes([-1, -2]);
        let ka = (self.int2e.swapaxes(1, 2) * da.block(0)).sum_axes([-1, -2]);
        let kb = (self.int2e.swapaxes(1, 2) * db.block(0)).sum_axes([-1, -2]);
        Ok(JkMatrices {
            j: BlockMatrix::from_blocks(vec![j]),
            ka: BlockMatrix::from_blocks(vec![ka]),
            kb: BlockMatrix::from_blocks(vec![kb]),
        })
    }
}

/* #endregion */

/* #region libcint adapters */

/// Obtain integrals (in row-major, same to PySCF but reverse of libcint).
pub fn intor_row_major(cint_data: &CInt, intor: &str) -> Tsr {
    let device = DeviceTsr::default();
    let (out, shape) = cint_data.integrate_row_major(intor, None, None).into();
    rt::asarray((out, shape.c(), &device))
}

/// Point-charge repulsion from the geometry carried by the integral handle.
pub fn energy_nuc(cint_data: &CInt) -> f64 {
    let device = DeviceTsr::default();

    let atom_coords = {
        let coords = cint_data.atom_coords();
        let coords = coords.into_iter().flatten().collect::<Vec<f64>>();
        rt::asarray((coords, &device)).into_shape((-1, 3))
    };
    let atom_charges = rt::asarray((cint_data.atom_charges(), &device));
    let mut dist = rt::sci::cdist((atom_coords.view(), atom_coords.view()));
    dist.diagonal_mut(None).fill(f64::INFINITY);
    0.5 * (&atom_charges * atom_charges.i((.., None)) / dist).sum()
}

/* #endregion */

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn dense_builder_contracts_coulomb_and_exchange() {
        let device = DeviceTsr::default();
        // 1-orbital system: (00|00) = 0.625, D_a = 1, D_b = 0
        let int2e = rt::asarray((vec![0.625], vec![1, 1, 1, 1], &device));
        let da = BlockMatrix::from_blocks(vec![rt::asarray((vec![1.0], vec![1, 1], &device))]);
        let db = da.zeros_like();
        let ca = da.clone();

        let jk = DenseJkBuilder::new(int2e).build(&da, &db, &ca, &[1], &[0]).unwrap();
        assert_abs_diff_eq!(jk.j.get(0, 0, 0), 0.625, epsilon = 1e-14);
        assert_abs_diff_eq!(jk.ka.get(0, 0, 0), 0.625, epsilon = 1e-14);
        assert_abs_diff_eq!(jk.kb.get(0, 0, 0), 0.0, epsilon = 1e-14);
    }

    #[test]
    fn dense_builder_rejects_symmetry_blocking() {
        let device = DeviceTsr::default();
        let int2e = rt::asarray((vec![0.625], vec![1, 1, 1, 1], &device));
        let da = BlockMatrix::zeros(&[1, 1], &device);
        let err = DenseJkBuilder::new(int2e).build(&da, &da.clone(), &da.clone(), &[1, 0], &[0, 0]);
        assert!(err.is_err());
    }
}

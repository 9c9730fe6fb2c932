use crate::prelude::*;
use std::fmt;

/* #region BlockMatrix */

/// Symmetry-blocked square matrix.
///
/// One dense block per irrep; block `h` is `dims[h] x dims[h]`. The block
/// dimensions are fixed for the lifetime of a calculation, so all binary
/// operations assume (and debug-assert) matching dimension tables.
#[derive(Debug, Clone)]
pub struct BlockMatrix {
    blocks: Vec<Tsr>,
    dims: Vec<usize>,
}

impl BlockMatrix {
    pub fn zeros(dims: &[usize], device: &DeviceTsr) -> Self {
        let blocks = dims.iter().map(|&n| rt::zeros(([n, n], device))).collect();
        Self { blocks, dims: dims.to_vec() }
    }

    /// Wrap pre-built square blocks, taking the dimension table from their shapes.
    pub fn from_blocks(blocks: Vec<Tsr>) -> Self {
        let dims = blocks.iter().map(|b| b.shape()[0]).collect();
        Self { blocks, dims }
    }

    pub fn zeros_like(&self) -> Self {
        Self::zeros(&self.dims, &self.device())
    }

    pub fn nirrep(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Total element count over all blocks.
    pub fn size(&self) -> usize {
        self.dims.iter().map(|n| n * n).sum()
    }

    pub fn device(&self) -> DeviceTsr {
        self.blocks[0].device().clone()
    }

    pub fn block(&self, h: usize) -> &Tsr {
        &self.blocks[h]
    }

    pub fn block_mut(&mut self, h: usize) -> &mut Tsr {
        &mut self.blocks[h]
    }

    pub fn get(&self, h: usize, i: usize, j: usize) -> f64 {
        self.blocks[h][[i, j]]
    }

    pub fn set(&mut self, h: usize, i: usize, j: usize, val: f64) {
        self.blocks[h][[i, j]] = val;
    }

    pub fn add(&self, other: &Self) -> Self {
        debug_assert_eq!(self.dims, other.dims);
        let blocks = self.blocks.iter().zip(other.blocks.iter()).map(|(a, b)| a + b).collect();
        Self { blocks, dims: self.dims.clone() }
    }

    pub fn sub(&self, other: &Self) -> Self {
        debug_assert_eq!(self.dims, other.dims);
        let blocks = self.blocks.iter().zip(other.blocks.iter()).map(|(a, b)| a - b).collect();
        Self { blocks, dims: self.dims.clone() }
    }

    pub fn scale(&mut self, fac: f64) {
        for b in self.blocks.iter_mut() {
            *b = fac * &*b;
        }
    }

    /// `self += fac * other`, blockwise.
    pub fn axpy(&mut self, fac: f64, other: &Self) {
        debug_assert_eq!(self.dims, other.dims);
        for (b, o) in self.blocks.iter_mut().zip(other.blocks.iter()) {
            *b += fac * o;
        }
    }

    /// Blockwise matrix product `self * other`.
    pub fn matmul(&self, other: &Self) -> Self {
        debug_assert_eq!(self.dims, other.dims);
        let blocks =
            self.blocks.iter().zip(other.blocks.iter()).map(|(a, b)| a.view() % b.view()).collect();
        Self { blocks, dims: self.dims.clone() }
    }

    /// Similarity transform `C^T M C`, blockwise.
    pub fn transform(&self, c: &Self) -> Self {
        debug_assert_eq!(self.dims, c.dims);
        let blocks = self
            .blocks
            .iter()
            .zip(c.blocks.iter())
            .map(|(m, cb)| cb.t() % (m.view() % cb.view()))
            .collect();
        Self { blocks, dims: self.dims.clone() }
    }

    /// Eigenvalues and eigenvectors of each (symmetric) block, ascending
    /// within a block. Zero-dimension blocks pass through untouched.
    pub fn diagonalize(&self) -> (BlockVector, BlockMatrix) {
        let device = self.device();
        let mut evals = Vec::with_capacity(self.nirrep());
        let mut evecs = Vec::with_capacity(self.nirrep());
        for (h, &n) in self.dims.iter().enumerate() {
            if n == 0 {
                evals.push(rt::zeros(([0], &device)));
                evecs.push(rt::zeros(([0, 0], &device)));
                continue;
            }
            let (w, v) = rt::linalg::eigh(self.blocks[h].view()).into();
            evals.push(w);
            evecs.push(v);
        }
        (
            BlockVector { blocks: evals, dims: self.dims.clone() },
            BlockMatrix { blocks: evecs, dims: self.dims.clone() },
        )
    }

    pub fn diagonal(&self) -> BlockVector {
        let blocks = self.blocks.iter().map(|b| b.diagonal(None).to_owned()).collect();
        BlockVector { blocks, dims: self.dims.clone() }
    }

    pub fn zero_diagonal(&mut self) {
        for b in self.blocks.iter_mut() {
            b.diagonal_mut(None).fill(0.0);
        }
    }

    /// Frobenius dot product accumulated over all blocks.
    pub fn vector_dot(&self, other: &Self) -> f64 {
        debug_assert_eq!(self.dims, other.dims);
        self.blocks.iter().zip(other.blocks.iter()).map(|(a, b)| (a * b).sum()).sum()
    }

    /// Root-mean-square of all elements across all blocks.
    pub fn rms(&self) -> f64 {
        let sumsq: f64 = self.blocks.iter().map(|b| (b * b).sum()).sum();
        (sumsq / self.size() as f64).sqrt()
    }
}

impl fmt::Display for BlockMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (h, &n) in self.dims.iter().enumerate() {
            writeln!(f, "  irrep {h} ({n} x {n})")?;
            for i in 0..n {
                write!(f, "   ")?;
                for j in 0..n {
                    write!(f, " {:14.8}", self.get(h, i, j))?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

/* #endregion */

/* #region BlockVector */

/// Symmetry-blocked vector, e.g. orbital energies per irrep.
#[derive(Debug, Clone)]
pub struct BlockVector {
    blocks: Vec<Tsr>,
    dims: Vec<usize>,
}

impl BlockVector {
    pub fn zeros(dims: &[usize], device: &DeviceTsr) -> Self {
        let blocks = dims.iter().map(|&n| rt::zeros(([n], device))).collect();
        Self { blocks, dims: dims.to_vec() }
    }

    pub fn nirrep(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn block(&self, h: usize) -> &Tsr {
        &self.blocks[h]
    }

    pub fn get(&self, h: usize, i: usize) -> f64 {
        self.blocks[h][[i]]
    }

    pub fn set(&mut self, h: usize, i: usize, val: f64) {
        self.blocks[h][[i]] = val;
    }

    /// Flatten to `(irrep, value)` pairs in block order.
    pub fn iter_with_irrep(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.dims
            .iter()
            .enumerate()
            .flat_map(move |(h, &n)| (0..n).map(move |i| (h, self.get(h, i))))
    }
}

/* #endregion */

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sample() -> BlockMatrix {
        let device = DeviceTsr::default();
        let b0 = rt::asarray((vec![2.0, 1.0, 1.0, 3.0], [2, 2].to_vec(), &device));
        let b1 = rt::asarray((vec![4.0], [1, 1].to_vec(), &device));
        BlockMatrix::from_blocks(vec![b0, b1])
    }

    #[test]
    fn reductions_span_all_blocks() {
        let m = sample();
        assert_eq!(m.size(), 5);
        assert_abs_diff_eq!(m.vector_dot(&m), 4.0 + 1.0 + 1.0 + 9.0 + 16.0, epsilon = 1e-12);
        assert_abs_diff_eq!(m.rms(), (31.0_f64 / 5.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn diagonalize_reconstructs_blocks() {
        let m = sample();
        let (w, v) = m.diagonalize();
        // V diag(w) V^T == M, checked elementwise through the accessors
        for h in 0..m.nirrep() {
            let n = m.dims()[h];
            for i in 0..n {
                for j in 0..n {
                    let mut acc = 0.0;
                    for k in 0..n {
                        acc += v.get(h, i, k) * w.get(h, k) * v.get(h, j, k);
                    }
                    assert_abs_diff_eq!(acc, m.get(h, i, j), epsilon = 1e-10);
                }
            }
        }
    }

    #[test]
    fn transform_with_identity_is_noop() {
        let m = sample();
        let device = DeviceTsr::default();
        let eye0 = rt::asarray((vec![1.0, 0.0, 0.0, 1.0], [2, 2].to_vec(), &device));
        let eye1 = rt::asarray((vec![1.0], [1, 1].to_vec(), &device));
        let eye = BlockMatrix::from_blocks(vec![eye0, eye1]);
        let t = m.transform(&eye);
        for h in 0..m.nirrep() {
            let n = m.dims()[h];
            for i in 0..n {
                for j in 0..n {
                    assert_abs_diff_eq!(t.get(h, i, j), m.get(h, i, j), epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn empty_irrep_blocks_are_tolerated() {
        let device = DeviceTsr::default();
        let m = BlockMatrix::zeros(&[2, 0, 1], &device);
        let (w, v) = m.diagonalize();
        assert_eq!(w.dims(), &[2, 0, 1][..]);
        assert_eq!(v.dims(), &[2, 0, 1][..]);
        assert_eq!(m.zeros_like().size(), 5);
    }
}

use crate::block::BlockMatrix;
use crate::prelude::*;
use log::warn;
use std::collections::HashMap;

/// Which stored vector gets evicted once the space is full.
pub enum DiisPopStrategy {
    /// Drop the vector with the smallest iteration number (FIFO).
    Iteration,

    /// Drop the vector with the largest diagonal element of the error
    /// overlap matrix, i.e. the worst stored iterate.
    ErrDiagonal,
}

pub struct DiisFlags {
    /// Maximum number of stored vectors. Default is 6.
    pub space: usize,

    /// Minimum number of vectors before extrapolation kicks in. Default is 2.
    pub min_space: usize,

    /// Eviction policy. Default is `DiisPopStrategy::ErrDiagonal`.
    pub pop_strategy: DiisPopStrategy,
}

impl Default for DiisFlags {
    fn default() -> Self {
        Self { space: 6, min_space: 2, pop_strategy: DiisPopStrategy::ErrDiagonal }
    }
}

/// Bounded-history DIIS extrapolator over symmetry-blocked matrices.
///
/// Owned by a single SCF calculation and dropped with it. The overlap matrix
/// is bordered: row/column 0 is the auxiliary `[0, 1, ..., 1]` vector of the
/// DIIS linear system, so stored-vector slots are 1-based.
pub struct Diis {
    pub flags: DiisFlags,

    /// Slot of the most recently inserted vector.
    prev: Option<usize>,

    /// Bordered error-overlap matrix.
    ovlp: Tsr,

    /// Mapping: slot -> error matrix.
    err_map: HashMap<usize, BlockMatrix>,

    /// Mapping: slot -> solution matrix to be extrapolated.
    vec_map: HashMap<usize, BlockMatrix>,

    /// Mapping: slot -> iteration number.
    niter_map: HashMap<usize, usize>,
}

impl Diis {
    pub fn new(flags: DiisFlags, device: &DeviceTsr) -> Self {
        let mut ovlp = rt::zeros(([flags.space + 1, flags.space + 1], device));
        ovlp.i_mut((0, 1..)).fill(1.0);
        ovlp.i_mut((1.., 0)).fill(1.0);
        Self {
            flags,
            prev: None,
            ovlp,
            err_map: HashMap::new(),
            vec_map: HashMap::new(),
            niter_map: HashMap::new(),
        }
    }

    /// Number of vectors currently stored.
    pub fn len(&self) -> usize {
        self.err_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.err_map.is_empty()
    }

    fn head_by_iteration(&self) -> Option<usize> {
        let cur_space = self.err_map.len();
        if cur_space == 0 {
            None
        } else if cur_space < self.flags.space {
            Some(cur_space + 1)
        } else {
            // at least one stored vector, so unwrap here
            let key = self.niter_map.iter().min_by(|a, b| a.1.cmp(b.1));
            Some(*key.unwrap().0)
        }
    }

    fn head_by_diagonal(&self) -> Option<usize> {
        let cur_space = self.err_map.len();
        if cur_space == 0 {
            None
        } else if cur_space < self.flags.space {
            Some(cur_space + 1)
        } else {
            // slot of the largest error-overlap diagonal element
            let diagonal = self.ovlp.diagonal(None).abs();
            let idx_argmax = diagonal.argmax();
            if idx_argmax == 0 || idx_argmax > self.flags.space {
                // all stored errors are virtually zero; fall back to FIFO
                return self.head_by_iteration();
            }
            Some(idx_argmax)
        }
    }

    /// Slot the next vector will occupy, `None` while the space is empty.
    fn head(&self) -> Option<usize> {
        match self.flags.pop_strategy {
            DiisPopStrategy::Iteration => self.head_by_iteration(),
            DiisPopStrategy::ErrDiagonal => self.head_by_diagonal(),
        }
    }

    /// Evict the vector in `head` and clear its overlap row/column.
    fn pop(&mut self, head: usize) {
        self.err_map.remove(&head);
        self.vec_map.remove(&head);
        self.niter_map.remove(&head);
        self.ovlp.i_mut((head, 1..)).fill(0.0);
        self.ovlp.i_mut((1.., head)).fill(0.0);
    }

    /// Store a solution/error pair and refresh the overlap matrix.
    pub fn insert(&mut self, vec: BlockMatrix, err: BlockMatrix, iteration: usize) {
        let head = self.head();

        // If the chosen slot is the one just inserted, the last extrapolated
        // vector has the maximum error; evicting it again would spin forever.
        let head = if head == self.prev && head.is_some() {
            warn!(
                "DIIS slot to evict is the previously inserted vector; the last \
                 extrapolation increased the error. Falling back to FIFO eviction."
            );
            self.head_by_iteration()
        } else {
            head
        };

        let head = head.unwrap_or(1);

        if self.err_map.len() >= self.flags.space {
            self.pop(head);
        }

        self.err_map.insert(head, err);
        self.vec_map.insert(head, vec);
        self.niter_map.insert(head, iteration);
        self.prev = Some(head);

        let num_space = self.err_map.len();
        let err_cur = self.err_map.get(&head).unwrap();
        let row: Vec<f64> = (1..=num_space)
            .into_par_iter()
            .map(|i| err_cur.vector_dot(self.err_map.get(&i).unwrap()))
            .collect();
        for (i, dot) in row.iter().enumerate() {
            self.ovlp[[head, i + 1]] = *dot;
            self.ovlp[[i + 1, head]] = *dot;
        }
    }

    /// Solve the DIIS system and mix the stored vectors.
    ///
    /// Below `min_space` the most recent vector is returned unchanged.
    pub fn extrapolate(&self) -> BlockMatrix {
        let num_space = self.err_map.len();
        if num_space == 0 {
            panic!("no vectors in the DIIS space; insert before extrapolating");
        }

        if num_space < self.flags.min_space {
            let prev = self.prev.unwrap();
            return self.vec_map.get(&prev).unwrap().clone();
        }

        let ovlp = &self.ovlp.i((..num_space + 1, ..num_space + 1));
        let (w, v) = rt::linalg::eigh(ovlp).into();

        // screen near-singular directions, then take reciprocals
        let eps = 30.0 * f64::EPSILON;
        let w = w.mapv(|x| if x.abs() < eps { 0.0 } else { 1.0 / x });

        // right-hand side: [1, 0, ..., 0]
        let mut g: Tsr = rt::zeros(([num_space + 1], self.ovlp.device()));
        g[[0]] = 1.0;

        let c = (v.view() * w) % v.t() % g;

        let mut vec = self.vec_map.get(&1).unwrap().zeros_like();
        for idx in 1..=num_space {
            vec.axpy(c[[idx]], self.vec_map.get(&idx).unwrap());
        }
        vec
    }

    pub fn update(&mut self, vec: BlockMatrix, err: BlockMatrix, iteration: usize) -> BlockMatrix {
        self.insert(vec, err, iteration);
        self.extrapolate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn mat(vals: [f64; 4]) -> BlockMatrix {
        let device = DeviceTsr::default();
        BlockMatrix::from_blocks(vec![rt::asarray((vals.to_vec(), vec![2, 2], &device))])
    }

    #[test]
    fn below_min_space_passes_the_vector_through() {
        let device = DeviceTsr::default();
        let mut diis = Diis::new(DiisFlags::default(), &device);
        let v = mat([1.0, 2.0, 3.0, 4.0]);
        let e = mat([0.1, 0.0, 0.0, -0.1]);
        let out = diis.update(v.clone(), e, 0);
        for i in 0..2 {
            for j in 0..2 {
                assert_abs_diff_eq!(out.get(0, i, j), v.get(0, i, j), epsilon = 1e-14);
            }
        }
    }

    #[test]
    fn history_stays_bounded() {
        let device = DeviceTsr::default();
        let flags = DiisFlags { space: 3, ..Default::default() };
        let mut diis = Diis::new(flags, &device);
        for it in 0..8 {
            let s = it as f64 + 1.0;
            diis.insert(mat([s, 0.0, 0.0, s]), mat([1.0 / s, 0.0, 0.0, -1.0 / s]), it);
        }
        assert_eq!(diis.len(), 3);
    }

    #[test]
    fn extrapolation_solves_a_linear_mixing_problem() {
        // two stored vectors with opposite errors mix 50/50: the extrapolated
        // coefficients must cancel the error exactly
        let device = DeviceTsr::default();
        let mut diis = Diis::new(DiisFlags::default(), &device);
        diis.insert(mat([1.0, 0.0, 0.0, 1.0]), mat([0.2, 0.0, 0.0, 0.2]), 0);
        let out = diis.update(mat([3.0, 0.0, 0.0, 3.0]), mat([-0.2, 0.0, 0.0, -0.2]), 1);
        for i in 0..2 {
            assert_abs_diff_eq!(out.get(0, i, i), 2.0, epsilon = 1e-10);
        }
    }
}

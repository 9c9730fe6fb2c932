use crate::block::{BlockMatrix, BlockVector};
use crate::diis::{Diis, DiisFlags};
use crate::jk::JkBuilder;
use crate::prelude::*;
use itertools::Itertools;
use log::{debug, info};
use std::fmt;

/* #region config, errors, results */

pub struct RohfConfig {
    /// Convergence threshold on the total-energy change.
    pub e_convergence: f64,

    /// Convergence threshold on the RMS change of the total density.
    pub d_convergence: f64,

    /// SCF iteration budget.
    pub max_cycle: usize,

    /// Whether DIIS acceleration is applied at all.
    pub diis: bool,

    /// Maximum number of stored DIIS vectors.
    pub max_diis_vectors: usize,

    /// Total number of doubly occupied orbitals.
    pub ndocc: usize,

    /// Total number of singly occupied orbitals.
    pub nsocc: usize,

    /// Print verbosity; levels above 3 dump matrices to the debug log.
    pub print: u32,

    /// Dump the converged molecular orbitals.
    pub print_mos: bool,
}

impl Default for RohfConfig {
    fn default() -> Self {
        Self {
            e_convergence: 1.0e-8,
            d_convergence: 1.0e-8,
            max_cycle: 100,
            diis: true,
            max_diis_vectors: 6,
            ndocc: 0,
            nsocc: 0,
            print: 1,
            print_mos: false,
        }
    }
}

#[derive(Debug)]
pub enum ScfError {
    /// The iteration budget ran out with either criterion unmet. Carries the
    /// residuals of the last iteration so the caller can decide what to do.
    NotConverged { iterations: usize, energy_diff: f64, density_rms: f64 },

    /// A failure from the two-electron engine, passed through untouched.
    Collaborator(anyhow::Error),
}

impl fmt::Display for ScfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScfError::NotConverged { iterations, energy_diff, density_rms } => write!(
                f,
                "SCF did not converge in {iterations} iterations \
                 (last dE = {energy_diff:.3e}, dRMS = {density_rms:.3e})"
            ),
            ScfError::Collaborator(e) => write!(f, "two-electron engine failed: {e}"),
        }
    }
}

impl std::error::Error for ScfError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScfError::Collaborator(e) => {
                let source: &(dyn std::error::Error + 'static) = e.as_ref();
                Some(source)
            }
            _ => None,
        }
    }
}

impl From<anyhow::Error> for ScfError {
    fn from(e: anyhow::Error) -> Self {
        ScfError::Collaborator(e)
    }
}

/// Converged state handed to downstream property/gradient code.
pub struct RohfResults {
    pub e_tot: f64,
    pub e_elec: f64,
    pub e_nuc: f64,
    pub mo_coeff: BlockMatrix,
    pub mo_energy: BlockVector,
    pub da: BlockMatrix,
    pub db: BlockMatrix,
    pub dt: BlockMatrix,
    pub doccpi: Vec<usize>,
    pub soccpi: Vec<usize>,
    pub iterations: usize,
}

/* #endregion */

/* #region standalone pieces */

/// `S^{-1/2}` per irrep via the symmetric (Loewdin) route.
fn orthogonalizer(s: &BlockMatrix) -> BlockMatrix {
    let mut out = s.zeros_like();
    for h in 0..s.nirrep() {
        if s.dims()[h] == 0 {
            continue;
        }
        let (w, v) = rt::linalg::eigh(s.block(h).view()).into();
        let w_invsqrt = w.mapv(|x| 1.0 / x.sqrt());
        *out.block_mut(h) = (v.view() * w_invsqrt) % v.t();
    }
    out
}

/// Assemble the effective Fock matrix from the MO-basis spin Fock matrices.
///
/// With `Fc = (Fa + Fb) / 2` and `Fo = Fa / 2`, the matrix is `Fc`
/// everywhere except the couplings between orbital classes:
///
/// ```text
///          |  closed     open    virtual
///  ----------------------------------------
///  closed  |    Fc     2(Fc-Fo)    Fc
///  open    | 2(Fc-Fo)     Fc      2Fo
///  virtual |    Fc       2Fo       Fc
/// ```
///
/// where `2(Fc - Fo) = Fb` and `2 Fo = Fa`, so those blocks are copied
/// straight out of the spin matrices. Orbital classes are the contiguous
/// ranges `[0, docc)`, `[docc, docc+socc)` and `[docc+socc, nmo)` per irrep.
pub fn form_effective_fock(
    mo_fa: &BlockMatrix,
    mo_fb: &BlockMatrix,
    doccpi: &[usize],
    soccpi: &[usize],
) -> BlockMatrix {
    let mut feff = mo_fa.add(mo_fb);
    feff.scale(0.5);
    for h in 0..feff.nirrep() {
        let nmo = feff.dims()[h];
        let docc = doccpi[h];
        let socc = soccpi[h];
        for i in docc..docc + socc {
            for j in 0..docc {
                let val = mo_fb.get(h, i, j);
                feff.set(h, i, j, val);
                feff.set(h, j, i, val);
            }
            for j in docc + socc..nmo {
                let val = mo_fa.get(h, i, j);
                feff.set(h, i, j, val);
                feff.set(h, j, i, val);
            }
        }
    }
    feff
}

/// Electronic part of the total energy.
pub fn electronic_energy(
    da: &BlockMatrix,
    db: &BlockMatrix,
    h: &BlockMatrix,
    fa: &BlockMatrix,
    fb: &BlockMatrix,
) -> f64 {
    let dh = da.vector_dot(h) + db.vector_dot(h);
    let dfa = da.vector_dot(fa);
    let dfb = db.vector_dot(fb);
    0.5 * (dh + dfa + dfb)
}

/// Both criteria must hold simultaneously.
pub fn converged(energy_diff: f64, density_rms: f64, e_threshold: f64, d_threshold: f64) -> bool {
    energy_diff.abs() < e_threshold && density_rms < d_threshold
}

/* #endregion */

/* #region the SCF engine */

/// Restricted open-shell Hartree-Fock driver.
///
/// One instance owns the full per-iteration matrix state of a single
/// calculation; nothing here is shared between concurrent calculations.
/// Alpha and beta electrons occupy one common orbital set, so a single
/// coefficient matrix and a single orbital-energy vector serve both spins.
pub struct Rohf {
    config: RohfConfig,
    jk: Box<dyn JkBuilder>,

    nirrep: usize,
    nmopi: Vec<usize>,
    e_nuc: f64,
    h: BlockMatrix,
    shalf: BlockMatrix,

    fa: BlockMatrix,
    fb: BlockMatrix,
    mo_fa: BlockMatrix,
    mo_fb: BlockMatrix,
    feff: BlockMatrix,
    ga: BlockMatrix,
    gb: BlockMatrix,
    ca: BlockMatrix,
    da: BlockMatrix,
    db: BlockMatrix,
    dt: BlockMatrix,
    dt_old: BlockMatrix,
    epsilon: BlockVector,
    doccpi: Vec<usize>,
    soccpi: Vec<usize>,
    e: f64,
    e_old: f64,

    guess: Option<BlockMatrix>,
    diis: Option<Diis>,
}

impl Rohf {
    /// `h` is the core Hamiltonian, `s` the overlap matrix, both blocked the
    /// same way; `e_nuc` the nuclear repulsion.
    pub fn new(
        h: BlockMatrix,
        s: BlockMatrix,
        e_nuc: f64,
        jk: Box<dyn JkBuilder>,
        config: RohfConfig,
    ) -> Self {
        let nmopi = h.dims().to_vec();
        let nirrep = nmopi.len();
        let device = h.device();
        let shalf = orthogonalizer(&s);
        let zeros = h.zeros_like();
        let diis = config
            .diis
            .then(|| Diis::new(DiisFlags { space: config.max_diis_vectors, ..Default::default() }, &device));
        Self {
            jk,
            nirrep,
            e_nuc,
            shalf,
            fa: zeros.clone(),
            fb: zeros.clone(),
            mo_fa: zeros.clone(),
            mo_fb: zeros.clone(),
            feff: zeros.clone(),
            ga: zeros.clone(),
            gb: zeros.clone(),
            ca: zeros.clone(),
            da: zeros.clone(),
            db: zeros.clone(),
            dt: zeros.clone(),
            dt_old: zeros,
            epsilon: BlockVector::zeros(&nmopi, &device),
            doccpi: vec![0; nirrep],
            soccpi: vec![0; nirrep],
            e: 0.0,
            e_old: 0.0,
            guess: None,
            diis,
            nmopi,
            h,
            config,
        }
    }

    /// Start from a user-provided coefficient matrix instead of the core
    /// Hamiltonian guess.
    pub fn set_guess(&mut self, ca: BlockMatrix) {
        self.guess = Some(ca);
    }

    /// Run the fixed-point loop to convergence.
    pub fn compute(&mut self) -> Result<RohfResults, ScfError> {
        info!(
            "ROHF: {} doubly and {} singly occupied orbitals over {} irreps",
            self.config.ndocc, self.config.nsocc, self.nirrep
        );
        info!("DIIS {}.", if self.config.diis { "enabled" } else { "disabled" });

        match self.guess.take() {
            Some(ca) => {
                // occupations for a read-in guess come from the MO-basis core
                // Hamiltonian diagonal
                self.epsilon = self.h.transform(&ca).diagonal();
                self.ca = ca;
                self.find_occupation();
            }
            None => self.form_initial_c(),
        }
        self.form_initial_f();
        self.form_d();
        self.e = self.compute_e();

        let mut energy_diff = f64::INFINITY;
        let mut density_rms = f64::INFINITY;
        for niter in 1..=self.config.max_cycle {
            self.save_density_and_energy();
            self.form_g()?;
            self.form_f();
            if self.config.diis {
                self.diis_feff(niter);
            }
            self.form_c();
            self.form_d();
            self.e = self.compute_e();

            energy_diff = self.e - self.e_old;
            density_rms = self.dt.sub(&self.dt_old).rms();
            info!(
                "iter {:3}: E = {:.10}  dE = {:+.3e}  dRMS = {:.3e}",
                niter, self.e, energy_diff, density_rms
            );

            if converged(
                energy_diff,
                density_rms,
                self.config.e_convergence,
                self.config.d_convergence,
            ) {
                info!("ROHF converged in {niter} iterations.");
                self.log_occupations();
                if self.config.print_mos {
                    info!("molecular orbitals:\n{}", self.ca);
                }
                return Ok(self.results(niter));
            }
        }

        Err(ScfError::NotConverged {
            iterations: self.config.max_cycle,
            energy_diff,
            density_rms,
        })
    }

    /* #region single iteration steps */

    /// Core-Hamiltonian guess: diagonalize `H` in the orthonormalized basis
    /// and back-transform the eigenvectors.
    fn form_initial_c(&mut self) {
        let temp = self.h.transform(&self.shalf);
        let (eps, cprime) = temp.diagonalize();
        self.epsilon = eps;
        self.find_occupation();
        self.ca = self.shalf.matmul(&cprime);
        if self.config.print > 3 {
            debug!("initial C:\n{}", self.ca);
        }
    }

    fn form_initial_f(&mut self) {
        self.fa = self.h.clone();
        self.fb = self.h.clone();
    }

    fn save_density_and_energy(&mut self) {
        self.dt_old = self.dt.clone();
        self.e_old = self.e;
    }

    /// Two-electron contributions through the injected builder:
    /// `Ga = J - Ka`, `Gb = J - Kb`.
    fn form_g(&mut self) -> Result<(), ScfError> {
        let nalpha_pi: Vec<usize> =
            self.doccpi.iter().zip(self.soccpi.iter()).map(|(d, s)| d + s).collect();
        let nbeta_pi = self.doccpi.clone();
        let jk = self.jk.build(&self.da, &self.db, &self.ca, &nalpha_pi, &nbeta_pi)?;
        self.ga = jk.j.sub(&jk.ka);
        self.gb = jk.j.sub(&jk.kb);
        Ok(())
    }

    /// Spin Fock matrices, their MO-basis images, and the effective Fock.
    fn form_f(&mut self) {
        self.fa = self.h.add(&self.ga);
        self.fb = self.h.add(&self.gb);
        self.mo_fa = self.fa.transform(&self.ca);
        self.mo_fb = self.fb.transform(&self.ca);
        self.feff = form_effective_fock(&self.mo_fa, &self.mo_fb, &self.doccpi, &self.soccpi);
        if self.config.print > 4 {
            debug!("Fa:\n{}", self.fa);
            debug!("Fb:\n{}", self.fb);
            debug!("F effective (MO basis):\n{}", self.feff);
        }
    }

    /// Record the current effective Fock and extrapolate it in place. The
    /// error matrix is the MO-basis effective Fock with its diagonal zeroed;
    /// it vanishes at self-consistency.
    fn diis_feff(&mut self, iteration: usize) {
        let mut err = self.feff.clone();
        err.zero_diagonal();
        if let Some(diis) = self.diis.as_mut() {
            self.feff = diis.update(self.feff.clone(), err, iteration);
        }
    }

    /// New orbitals from the effective Fock. The eigenvectors come out in the
    /// current MO basis and are carried back to the AO basis through the
    /// previous coefficients.
    fn form_c(&mut self) {
        let (eps, eigvec) = self.feff.diagonalize();
        self.epsilon = eps;
        self.find_occupation();
        self.ca = self.ca.matmul(&eigvec);
        if self.config.print > 4 {
            debug!("C:\n{}", self.ca);
        }
    }

    /// Densities from the occupied coefficient columns. Beta counts only the
    /// doubly occupied orbitals; alpha adds the singly occupied ones on top.
    /// The total density is their sum.
    fn form_d(&mut self) {
        for h in 0..self.nirrep {
            let n = self.nmopi[h];
            if n == 0 {
                continue;
            }
            let docc = self.doccpi[h];
            let socc = self.soccpi[h];
            let c = self.ca.block(h);
            let mut db: Tsr = c.zeros_like();
            if docc > 0 {
                db = c.i((.., ..docc)) % c.i((.., ..docc)).t();
            }
            let mut da = db.clone();
            if socc > 0 {
                da = &db + c.i((.., docc..docc + socc)) % c.i((.., docc..docc + socc)).t();
            }
            *self.db.block_mut(h) = db;
            *self.da.block_mut(h) = da;
        }
        self.dt = self.da.add(&self.db);
    }

    fn compute_e(&self) -> f64 {
        self.e_nuc + electronic_energy(&self.da, &self.db, &self.h, &self.fa, &self.fb)
    }

    /// Distribute the requested doubly/singly occupied totals over irreps by
    /// ascending orbital energy across all irreps combined.
    fn find_occupation(&mut self) {
        let pairs: Vec<(f64, usize)> = self
            .epsilon
            .iter_with_irrep()
            .map(|(h, e)| (e, h))
            .sorted_by(|a, b| a.0.partial_cmp(&b.0).unwrap())
            .collect();
        let mut doccpi = vec![0; self.nirrep];
        let mut soccpi = vec![0; self.nirrep];
        for &(_, h) in pairs.iter().take(self.config.ndocc) {
            doccpi[h] += 1;
        }
        for &(_, h) in pairs.iter().skip(self.config.ndocc).take(self.config.nsocc) {
            soccpi[h] += 1;
        }
        self.doccpi = doccpi;
        self.soccpi = soccpi;
    }

    /* #endregion */

    fn log_occupations(&self) {
        info!("final DOCC vector = {:?}", self.doccpi);
        info!("final SOCC vector = {:?}", self.soccpi);
        let energies: Vec<(f64, usize)> = self
            .epsilon
            .iter_with_irrep()
            .map(|(h, e)| (e, h))
            .sorted_by(|a, b| a.0.partial_cmp(&b.0).unwrap())
            .collect();
        let ndocc = self.config.ndocc;
        let nsocc = self.config.nsocc;
        let fmt_range = |range: &[(f64, usize)]| {
            range.iter().map(|(e, h)| format!("{e:12.6} (irrep {h})")).join("  ")
        };
        info!("doubly occupied orbital energies: {}", fmt_range(&energies[..ndocc]));
        info!("singly occupied orbital energies: {}", fmt_range(&energies[ndocc..ndocc + nsocc]));
        info!("virtual orbital energies:         {}", fmt_range(&energies[ndocc + nsocc..]));
    }

    fn results(&self, iterations: usize) -> RohfResults {
        RohfResults {
            e_tot: self.e,
            e_elec: self.e - self.e_nuc,
            e_nuc: self.e_nuc,
            mo_coeff: self.ca.clone(),
            mo_energy: self.epsilon.clone(),
            da: self.da.clone(),
            db: self.db.clone(),
            dt: self.dt.clone(),
            doccpi: self.doccpi.clone(),
            soccpi: self.soccpi.clone(),
            iterations,
        }
    }
}

/* #endregion */

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn block_from(vals: &[f64], n: usize) -> BlockMatrix {
        let device = DeviceTsr::default();
        BlockMatrix::from_blocks(vec![rt::asarray((vals.to_vec(), vec![n, n], &device))])
    }

    #[test]
    fn effective_fock_block_structure() {
        // one irrep, three orbitals: 1 closed, 1 open, 1 virtual
        let fa = block_from(&[1.0, 0.2, 0.3, 0.2, 2.0, 0.4, 0.3, 0.4, 3.0], 3);
        let fb = block_from(&[1.5, 0.6, 0.7, 0.6, 2.5, 0.8, 0.7, 0.8, 3.5], 3);
        let feff = form_effective_fock(&fa, &fb, &[1], &[1]);

        // closed-open couplings come straight from Fb
        assert_abs_diff_eq!(feff.get(0, 1, 0), fb.get(0, 1, 0), epsilon = 1e-14);
        assert_abs_diff_eq!(feff.get(0, 0, 1), fb.get(0, 1, 0), epsilon = 1e-14);
        // open-virtual couplings come straight from Fa
        assert_abs_diff_eq!(feff.get(0, 1, 2), fa.get(0, 1, 2), epsilon = 1e-14);
        assert_abs_diff_eq!(feff.get(0, 2, 1), fa.get(0, 1, 2), epsilon = 1e-14);
        // everything else is the closed-shell average
        for (i, j) in [(0, 0), (1, 1), (2, 2), (0, 2), (2, 0)] {
            let fc = 0.5 * (fa.get(0, i, j) + fb.get(0, i, j));
            assert_abs_diff_eq!(feff.get(0, i, j), fc, epsilon = 1e-14);
        }
    }

    #[test]
    fn closed_shell_effective_fock_has_no_open_couplings() {
        let fa = block_from(&[1.0, 0.2, 0.2, 2.0], 2);
        let fb = block_from(&[3.0, 0.4, 0.4, 4.0], 2);
        let feff = form_effective_fock(&fa, &fb, &[1], &[0]);
        for i in 0..2 {
            for j in 0..2 {
                let fc = 0.5 * (fa.get(0, i, j) + fb.get(0, i, j));
                assert_abs_diff_eq!(feff.get(0, i, j), fc, epsilon = 1e-14);
            }
        }
    }

    #[test]
    fn energy_formula_matches_closed_form() {
        let h = block_from(&[-1.0, -0.2, -0.2, -0.8], 2);
        let fa = block_from(&[-0.5, -0.1, -0.1, -0.3], 2);
        let fb = block_from(&[-0.6, -0.15, -0.15, -0.4], 2);
        let da = block_from(&[0.7, 0.3, 0.3, 0.2], 2);
        let db = block_from(&[0.6, 0.25, 0.25, 0.1], 2);
        let e_nuc = 0.9;

        let dot = |a: &BlockMatrix, b: &BlockMatrix| -> f64 {
            let mut acc = 0.0;
            for i in 0..2 {
                for j in 0..2 {
                    acc += a.get(0, i, j) * b.get(0, i, j);
                }
            }
            acc
        };
        let expected =
            e_nuc + 0.5 * (dot(&da, &h) + dot(&db, &h) + dot(&da, &fa) + dot(&db, &fb));
        let got = e_nuc + electronic_energy(&da, &db, &h, &fa, &fb);
        assert_abs_diff_eq!(got, expected, epsilon = 1e-10);
    }

    #[test]
    fn convergence_needs_both_criteria() {
        let e_thr = 1.0e-6;
        let d_thr = 1.0e-5;
        assert!(converged(9.0e-7, 9.0e-6, e_thr, d_thr));
        assert!(converged(-9.0e-7, 9.0e-6, e_thr, d_thr));
        // energy just above threshold
        assert!(!converged(1.1e-6, 9.0e-6, e_thr, d_thr));
        // density just above threshold
        assert!(!converged(9.0e-7, 1.1e-5, e_thr, d_thr));
        assert!(!converged(1.1e-6, 1.1e-5, e_thr, d_thr));
    }

    #[test]
    fn occupation_ties_break_by_energy_across_irreps() {
        let device = DeviceTsr::default();
        let h = BlockMatrix::zeros(&[2, 2], &device);
        let s = {
            let mut s = BlockMatrix::zeros(&[2, 2], &device);
            for hh in 0..2 {
                for i in 0..2 {
                    s.set(hh, i, i, 1.0);
                }
            }
            s
        };
        struct NullJk;
        impl JkBuilder for NullJk {
            fn build(
                &self,
                da: &BlockMatrix,
                _db: &BlockMatrix,
                _ca: &BlockMatrix,
                _nalpha_pi: &[usize],
                _nbeta_pi: &[usize],
            ) -> anyhow::Result<JkMatrices> {
                Ok(JkMatrices { j: da.zeros_like(), ka: da.zeros_like(), kb: da.zeros_like() })
            }
        }
        let config = RohfConfig { ndocc: 2, nsocc: 1, ..Default::default() };
        let mut rohf = Rohf::new(h, s, 0.0, Box::new(NullJk), config);
        // irrep 0 holds the lowest and highest levels, irrep 1 the middle two
        rohf.epsilon.set(0, 0, -2.0);
        rohf.epsilon.set(0, 1, 1.0);
        rohf.epsilon.set(1, 0, -1.0);
        rohf.epsilon.set(1, 1, -0.5);
        rohf.find_occupation();
        assert_eq!(rohf.doccpi, vec![1, 1]);
        assert_eq!(rohf.soccpi, vec![0, 1]);
    }
}

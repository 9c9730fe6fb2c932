#![allow(clippy::deref_addrof)]

pub mod prelude;

pub mod basis;
pub mod block;
pub mod diis;
pub mod jk;
pub mod molecule;
pub mod rohf;

/// Minimal-basis two-orbital system (H2-like): overlap, core Hamiltonian,
/// full two-electron tensor, nuclear repulsion.
#[cfg(test)]
fn two_orbital_integrals() -> (crate::prelude::Tsr, crate::prelude::Tsr, crate::prelude::Tsr, f64)
{
    use crate::prelude::*;

    let device = DeviceTsr::default();
    let s12 = 0.6593;
    let h11 = -1.1204;
    let h12 = -0.9584;
    let ovlp = rt::asarray((vec![1.0, s12, s12, 1.0], vec![2, 2], &device));
    let hcore = rt::asarray((vec![h11, h12, h12, h11], vec![2, 2], &device));

    let (g1111, g1122, g1112, g1212) = (0.7746, 0.5697, 0.4441, 0.2970);
    let mut eri = vec![0.0; 16];
    for p in 0..2usize {
        for q in 0..2 {
            for r in 0..2 {
                for s in 0..2 {
                    let val = if p == q && r == s {
                        if p == r { g1111 } else { g1122 }
                    } else if p != q && r != s {
                        g1212
                    } else {
                        g1112
                    };
                    eri[((p * 2 + q) * 2 + r) * 2 + s] = val;
                }
            }
        }
    }
    let int2e = rt::asarray((eri, vec![2, 2, 2, 2], &device));

    (hcore, ovlp, int2e, 1.0 / 1.4)
}

#[test]
fn rohf_reduces_to_closed_shell_scf() {
    use crate::prelude::*;
    use approx::assert_abs_diff_eq;

    let (hcore, ovlp, int2e, e_nuc) = two_orbital_integrals();

    // reference: plain closed-shell SCF iterated to its fixed point on the
    // same integrals
    let nocc = 1;
    let mut dm = ovlp.zeros_like();
    let mut mo_coeff: Tsr = rt::zeros(([2, 2], &DeviceTsr::default()));
    for _ in 0..40 {
        let fock = &hcore
            + ((1.0_f64 * &int2e - 0.5_f64 * int2e.swapaxes(1, 2)) * &dm).sum_axes([-1, -2]);
        let (_, c): (Tsr, Tsr) = rt::linalg::eigh((fock.view(), ovlp.view())).into();
        mo_coeff = c;
        dm = 2.0_f64 * mo_coeff.i((.., ..nocc)) % mo_coeff.i((.., ..nocc)).t();
    }
    let eng_scratch = &hcore
        + ((0.5_f64 * &int2e - 0.25_f64 * int2e.swapaxes(1, 2)) * &dm).sum_axes([-1, -2]);
    let e_ref = e_nuc + (&dm * &eng_scratch).sum();

    let config = RohfConfig {
        ndocc: 1,
        nsocc: 0,
        e_convergence: 1.0e-10,
        d_convergence: 1.0e-9,
        ..Default::default()
    };
    let jk = Box::new(DenseJkBuilder::new(int2e));
    let mut rohf = Rohf::new(
        BlockMatrix::from_blocks(vec![hcore]),
        BlockMatrix::from_blocks(vec![ovlp]),
        e_nuc,
        jk,
        config,
    );
    let results = rohf.compute().unwrap();

    assert_abs_diff_eq!(results.e_tot, e_ref, epsilon = 1e-8);
    // with no singly occupied orbitals the open-shell bookkeeping is inert
    assert_eq!(results.doccpi, vec![1]);
    assert_eq!(results.soccpi, vec![0]);
    for i in 0..2 {
        for j in 0..2 {
            assert_abs_diff_eq!(results.dt.get(0, i, j), dm[[i, j]], epsilon = 1e-6);
        }
    }
}

#[test]
fn one_electron_doublet_matches_the_exact_orbital_energy() {
    use crate::prelude::*;
    use approx::assert_abs_diff_eq;

    let (hcore, ovlp, int2e, e_nuc) = two_orbital_integrals();

    // a single electron feels no net self-interaction, so the converged
    // energy is the lowest generalized eigenvalue of the core Hamiltonian
    let h11 = hcore[[0, 0]];
    let h12 = hcore[[0, 1]];
    let s12 = ovlp[[0, 1]];
    let e_exact = e_nuc + (h11 + h12) / (1.0 + s12);

    let config = RohfConfig { ndocc: 0, nsocc: 1, ..Default::default() };
    let jk = Box::new(DenseJkBuilder::new(int2e));
    let mut rohf = Rohf::new(
        BlockMatrix::from_blocks(vec![hcore]),
        BlockMatrix::from_blocks(vec![ovlp]),
        e_nuc,
        jk,
        config,
    );
    let results = rohf.compute().unwrap();

    assert_abs_diff_eq!(results.e_tot, e_exact, epsilon = 1e-6);
    assert_eq!(results.doccpi, vec![0]);
    assert_eq!(results.soccpi, vec![1]);
}

#[test]
fn iteration_budget_exhaustion_is_reported() {
    use crate::prelude::*;

    let (hcore, ovlp, int2e, e_nuc) = two_orbital_integrals();
    let config = RohfConfig {
        ndocc: 1,
        nsocc: 0,
        max_cycle: 1,
        e_convergence: 1.0e-12,
        d_convergence: 1.0e-12,
        ..Default::default()
    };
    let jk = Box::new(DenseJkBuilder::new(int2e));
    let mut rohf = Rohf::new(
        BlockMatrix::from_blocks(vec![hcore]),
        BlockMatrix::from_blocks(vec![ovlp]),
        e_nuc,
        jk,
        config,
    );
    match rohf.compute() {
        Err(ScfError::NotConverged { iterations, .. }) => assert_eq!(iterations, 1),
        other => panic!("expected non-convergence, got {:?}", other.map(|r| r.e_tot)),
    }
}

use crate::molecule::Molecule;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/* #region errors */

#[derive(Debug)]
pub enum BasisError {
    /// The structured input carried no atom records at all.
    EmptyEcpInput,
    /// A shell's parallel primitive arrays disagree in length.
    RaggedShell { l: i32, ncoef: usize, nexp: usize, nn: usize, nsubl: usize },
    /// No shell list registered for a (basis, label) pair an atom refers to.
    MissingShellEntry { basis: String, label: String },
    /// Sizing pass and assembly pass disagree on an atom's primitive count.
    PrimitiveCountMismatch { atom: usize, expected: usize, consumed: usize },
}

impl fmt::Display for BasisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BasisError::EmptyEcpInput => {
                write!(f, "empty ECP information being used to construct a core-potential basis")
            }
            BasisError::RaggedShell { l, ncoef, nexp, nn, nsubl } => write!(
                f,
                "ECP shell with l = {l} has mismatched primitive arrays \
                 (coefs {ncoef}, exps {nexp}, powers {nn}, sub-l {nsubl})"
            ),
            BasisError::MissingShellEntry { basis, label } => {
                write!(f, "no ECP shells registered for basis {basis:?} on atom label {label:?}")
            }
            BasisError::PrimitiveCountMismatch { atom, expected, consumed } => write!(
                f,
                "problem with nprimitive in basis set construction: atom {atom} consumed \
                 {consumed} unique primitives, expected {expected}"
            ),
        }
    }
}

impl std::error::Error for BasisError {}

/* #endregion */

/* #region shell descriptors */

/// Per-shell description of an effective-core-potential term.
///
/// Unlike an ordinary Gaussian shell, every primitive carries its own radial
/// power and its own effective angular momentum, so one stored shell may mix
/// primitives that act on different angular channels.
#[derive(Debug, Clone, PartialEq)]
pub struct EcpShellInfo {
    l: i32,
    coefs: Vec<f64>,
    exps: Vec<f64>,
    ns: Vec<i32>,
    sub_ls: Vec<i32>,
    atom: usize,
    center: [f64; 3],
    start: usize,
}

impl EcpShellInfo {
    pub fn new(
        l: i32,
        coefs: Vec<f64>,
        exps: Vec<f64>,
        ns: Vec<i32>,
        sub_ls: Vec<i32>,
        atom: usize,
        center: [f64; 3],
        start: usize,
    ) -> Result<Self, BasisError> {
        if coefs.len() != exps.len() || coefs.len() != ns.len() || coefs.len() != sub_ls.len() {
            return Err(BasisError::RaggedShell {
                l,
                ncoef: coefs.len(),
                nexp: exps.len(),
                nn: ns.len(),
                nsubl: sub_ls.len(),
            });
        }
        Ok(Self { l, coefs, exps, ns, sub_ls, atom, center, start })
    }

    pub fn am(&self) -> i32 {
        self.l
    }

    pub fn nprimitive(&self) -> usize {
        self.exps.len()
    }

    pub fn exp(&self, i: usize) -> f64 {
        self.exps[i]
    }

    pub fn coef(&self, i: usize) -> f64 {
        self.coefs[i]
    }

    pub fn n(&self, i: usize) -> i32 {
        self.ns[i]
    }

    pub fn subl(&self, i: usize) -> i32 {
        self.sub_ls[i]
    }

    pub fn center_atom(&self) -> usize {
        self.atom
    }

    pub fn center(&self) -> [f64; 3] {
        self.center
    }

    /// Index of the first basis function this shell contributes.
    pub fn function_index(&self) -> usize {
        self.start
    }

    /// ECP shells are Cartesian.
    pub fn ncartesian(&self) -> usize {
        let l = self.l as usize;
        (l + 1) * (l + 2) / 2
    }

    pub fn nfunction(&self) -> usize {
        self.ncartesian()
    }
}

/// Shell lists keyed as `shell_map[basis][atom label]`.
pub type ShellMap = BTreeMap<String, BTreeMap<String, Vec<EcpShellInfo>>>;

/* #endregion */

/* #region unique-primitive pool */

/// Flat storage for the unique primitives of every (basis, label) pair.
///
/// Immutable once assembled; shells reference half-open index ranges into it
/// instead of copying primitive data.
#[derive(Debug, Default)]
pub struct PrimitivePool {
    pub exps: Vec<f64>,
    pub coefs: Vec<f64>,
    pub ns: Vec<i32>,
    pub sub_ls: Vec<i32>,
}

impl PrimitivePool {
    pub fn len(&self) -> usize {
        self.exps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exps.is_empty()
    }

    fn push(&mut self, exp: f64, coef: f64, n: i32, sub_l: i32) {
        self.exps.push(exp);
        self.coefs.push(coef);
        self.ns.push(n);
        self.sub_ls.push(sub_l);
    }
}

/// An assembled shell viewing its primitives inside the shared pool.
#[derive(Debug, Clone)]
pub struct EcpShell {
    l: i32,
    prims: Range<usize>,
    atom: usize,
    center: [f64; 3],
    start: usize,
    pool: Arc<PrimitivePool>,
}

impl EcpShell {
    pub fn am(&self) -> i32 {
        self.l
    }

    pub fn nprimitive(&self) -> usize {
        self.prims.len()
    }

    pub fn center_atom(&self) -> usize {
        self.atom
    }

    pub fn center(&self) -> [f64; 3] {
        self.center
    }

    /// Index of the first basis function this shell contributes.
    pub fn function_index(&self) -> usize {
        self.start
    }

    pub fn ncartesian(&self) -> usize {
        let l = self.l as usize;
        (l + 1) * (l + 2) / 2
    }

    pub fn nfunction(&self) -> usize {
        self.ncartesian()
    }

    pub fn exp(&self, i: usize) -> f64 {
        self.pool.exps[self.prims.start + i]
    }

    pub fn coef(&self, i: usize) -> f64 {
        self.pool.coefs[self.prims.start + i]
    }

    pub fn n(&self, i: usize) -> i32 {
        self.pool.ns[self.prims.start + i]
    }

    pub fn subl(&self, i: usize) -> i32 {
        self.pool.sub_ls[self.prims.start + i]
    }

    /// Radial potential `U_l(r)`: sums only the primitives whose stored
    /// sub-angular-momentum equals the requested `l`.
    pub fn evaluate(&self, r: f64, l: i32) -> f64 {
        let r2 = r * r;
        let mut value = 0.0;
        for i in self.prims.clone() {
            if self.pool.sub_ls[i] == l {
                value += r.powi(self.pool.ns[i]) * self.pool.coefs[i] * (-self.pool.exps[i] * r2).exp();
            }
        }
        value
    }
}

/* #endregion */

/* #region structured input records */

#[derive(Debug, Clone, Deserialize)]
pub struct EcpPrimitiveRecord {
    pub exp: f64,
    pub coef: f64,
    pub n: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EcpShellRecord {
    pub am: i32,
    pub primitives: Vec<EcpPrimitiveRecord>,
}

/// One atom's worth of structured ECP input: which label it applies to, a
/// content hash for bookkeeping, how many core electrons the potential
/// replaces, and the shell list.
#[derive(Debug, Clone, Deserialize)]
pub struct EcpAtomRecord {
    pub label: String,
    pub hash: String,
    pub ncore: i32,
    pub shells: Vec<EcpShellRecord>,
}

/// Text-format ECP blocks are not handled yet; callers must go through the
/// structured-record path.
// TODO: work out how to parse the Gaussian94 ECP block format
pub fn parse_gaussian94_ecp(_symbol: &str, _lines: &[String]) -> Vec<EcpShellRecord> {
    Vec::new()
}

/* #endregion */

/* #region assembled basis set */

/// Shell list an atom pulls in through its (basis, label) pair.
fn lookup_shells<'a>(
    mol: &'a Molecule,
    shell_map: &'a ShellMap,
    key: &str,
    n: usize,
) -> Result<(&'a str, &'a [EcpShellInfo]), BasisError> {
    let basis = mol.basis_on_atom(n, key).unwrap_or_default();
    let label = mol.label(n);
    shell_map
        .get(basis)
        .and_then(|symbol_map| symbol_map.get(label))
        .map(|shells| (basis, shells.as_slice()))
        .ok_or_else(|| BasisError::MissingShellEntry {
            basis: basis.to_string(),
            label: label.to_string(),
        })
}

/// Flat, assembled core-potential basis: deduplicated primitive storage plus
/// the index tables integral engines size their buffers from. Immutable after
/// construction and cheap to share across calculations.
#[derive(Debug)]
pub struct EcpBasisSet {
    pub name: String,
    pub key: String,
    pool: Arc<PrimitivePool>,
    shells: Vec<EcpShell>,
    nprimitive: usize,
    nao: usize,
    nbf: usize,
    ao_to_shell: Vec<usize>,
    function_to_shell: Vec<usize>,
    function_center: Vec<usize>,
    shell_center: Vec<usize>,
    shell_first_ao: Vec<usize>,
    shell_first_bf: Vec<usize>,
    center_to_nshell: Vec<usize>,
    center_to_shell: Vec<usize>,
    xyz: Vec<f64>,
    max_am: i32,
    max_nprimitive: usize,
}

impl EcpBasisSet {
    /// Assemble from a shell map and the molecule's atom list.
    ///
    /// Walks the map once to flatten all primitives into the unique pool,
    /// sizes the index tables from the atom list, then builds per-atom shell
    /// records referencing contiguous pool sub-ranges.
    pub fn new(
        key: &str,
        name: &str,
        mol: &Molecule,
        shell_map: &ShellMap,
    ) -> Result<Self, BasisError> {
        let natom = mol.natom();

        // Pass 1: unique primitives, with the half-open pool range consumed
        // by each (basis, label) pair.
        let mut pool = PrimitivePool::default();
        let mut primitive_range: BTreeMap<(String, String), Range<usize>> = BTreeMap::new();
        for (basis, symbol_map) in shell_map.iter() {
            for (label, shells) in symbol_map.iter() {
                let start = pool.len();
                for shell in shells.iter() {
                    for prim in 0..shell.nprimitive() {
                        pool.push(shell.exp(prim), shell.coef(prim), shell.n(prim), shell.subl(prim));
                    }
                }
                primitive_range.insert((basis.clone(), label.clone()), start..pool.len());
            }
        }
        let pool = Arc::new(pool);

        // Pass 2: sizing.
        let mut nshell = 0;
        let mut nprimitive = 0;
        let mut nao = 0;
        let mut nbf = 0;
        for n in 0..natom {
            let (_, shells) = lookup_shells(mol, shell_map, key, n)?;
            for shell in shells.iter() {
                nprimitive += shell.nprimitive();
                nshell += 1;
                nao += shell.ncartesian();
                nbf += shell.nfunction();
            }
        }

        // Pass 3: per-atom shell records pointing at the unique data.
        let mut basis_set = Self {
            name: name.to_string(),
            key: key.to_string(),
            pool: pool.clone(),
            shells: Vec::with_capacity(nshell),
            nprimitive,
            nao,
            nbf,
            ao_to_shell: Vec::with_capacity(nao),
            function_to_shell: Vec::with_capacity(nbf),
            function_center: Vec::with_capacity(nbf),
            shell_center: Vec::with_capacity(nshell),
            shell_first_ao: Vec::with_capacity(nshell),
            shell_first_bf: Vec::with_capacity(nshell),
            center_to_nshell: Vec::with_capacity(natom),
            center_to_shell: Vec::with_capacity(natom),
            xyz: Vec::with_capacity(3 * natom),
            max_am: 0,
            max_nprimitive: 0,
        };

        let mut shell_count = 0;
        let mut ao_count = 0;
        let mut bf_count = 0;
        for n in 0..natom {
            let (basis, shells) = lookup_shells(mol, shell_map, key, n)?;
            let urange = primitive_range[&(basis.to_string(), mol.label(n).to_string())].clone();
            let xyz = mol.xyz(n);
            basis_set.center_to_nshell.push(shells.len());
            basis_set.center_to_shell.push(shell_count);
            let mut atom_nprim = 0;
            for shell in shells.iter() {
                let shell_nprim = shell.nprimitive();
                basis_set.shell_first_ao.push(ao_count);
                basis_set.shell_first_bf.push(bf_count);
                basis_set.shell_center.push(n);
                basis_set.max_nprimitive = basis_set.max_nprimitive.max(shell_nprim);
                basis_set.max_am = basis_set.max_am.max(shell.am());
                let prim_start = urange.start + atom_nprim;
                basis_set.shells.push(EcpShell {
                    l: shell.am(),
                    prims: prim_start..prim_start + shell_nprim,
                    atom: n,
                    center: xyz,
                    start: bf_count,
                    pool: pool.clone(),
                });
                for _ in 0..shell.nfunction() {
                    basis_set.function_to_shell.push(shell_count);
                    basis_set.function_center.push(n);
                    bf_count += 1;
                }
                for _ in 0..shell.ncartesian() {
                    basis_set.ao_to_shell.push(shell_count);
                    ao_count += 1;
                }
                atom_nprim += shell_nprim;
                shell_count += 1;
            }
            basis_set.xyz.extend_from_slice(&xyz);
            if atom_nprim != urange.len() {
                return Err(BasisError::PrimitiveCountMismatch {
                    atom: n,
                    expected: urange.len(),
                    consumed: atom_nprim,
                });
            }
        }

        Ok(basis_set)
    }

    /// Build from structured per-atom records and attach the result to `mol`:
    /// registers the basis name and content hashes, subtracts each record's
    /// core-electron count from the matching atoms' nuclear charges (exactly
    /// once per atom, before the geometry refresh so the shared molecule is
    /// consistent for every basis set pointing at it), then assembles.
    pub fn from_records(
        mol: &mut Molecule,
        key: &str,
        name: &str,
        records: &[EcpAtomRecord],
    ) -> Result<Self, BasisError> {
        if records.is_empty() {
            return Err(BasisError::EmptyEcpInput);
        }

        mol.set_basis_all_atoms(name, key);

        let mut symbol_map: BTreeMap<String, Vec<EcpShellInfo>> = BTreeMap::new();
        let mut ncore_by_label: BTreeMap<String, i32> = BTreeMap::new();
        for record in records {
            let mut shells = Vec::with_capacity(record.shells.len());
            for shell in &record.shells {
                let nprim = shell.primitives.len();
                let mut coefs = Vec::with_capacity(nprim);
                let mut exps = Vec::with_capacity(nprim);
                let mut ns = Vec::with_capacity(nprim);
                for prim in &shell.primitives {
                    exps.push(prim.exp);
                    coefs.push(prim.coef);
                    ns.push(prim.n);
                }
                // The center is resolved per atom at assembly time.
                shells.push(EcpShellInfo::new(
                    shell.am,
                    coefs,
                    exps,
                    ns,
                    vec![shell.am; nprim],
                    0,
                    [0.0; 3],
                    0,
                )?);
            }
            mol.set_shell_by_label(&record.label, &record.hash, key);
            ncore_by_label.insert(record.label.clone(), record.ncore);
            symbol_map.insert(record.label.clone(), shells);
        }

        let mut shell_map = ShellMap::new();
        shell_map.insert(name.to_string(), symbol_map);

        for n in 0..mol.natom() {
            let ncore = ncore_by_label.get(mol.label(n)).copied().unwrap_or(0);
            let z = mol.charge(n) - f64::from(ncore);
            mol.set_nuclear_charge(n, z);
        }
        mol.update_geometry();

        Self::new(key, name, mol, &shell_map)
    }

    pub fn nshell(&self) -> usize {
        self.shells.len()
    }

    pub fn nprimitive(&self) -> usize {
        self.nprimitive
    }

    pub fn nunique_primitive(&self) -> usize {
        self.pool.len()
    }

    pub fn nao(&self) -> usize {
        self.nao
    }

    pub fn nbf(&self) -> usize {
        self.nbf
    }

    pub fn max_am(&self) -> i32 {
        self.max_am
    }

    pub fn max_nprimitive(&self) -> usize {
        self.max_nprimitive
    }

    pub fn shell(&self, i: usize) -> &EcpShell {
        &self.shells[i]
    }

    pub fn shells_on_center(&self, n: usize) -> &[EcpShell] {
        let first = self.center_to_shell[n];
        &self.shells[first..first + self.center_to_nshell[n]]
    }

    pub fn ao_to_shell(&self) -> &[usize] {
        &self.ao_to_shell
    }

    pub fn function_to_shell(&self) -> &[usize] {
        &self.function_to_shell
    }

    pub fn function_center(&self) -> &[usize] {
        &self.function_center
    }

    pub fn shell_center(&self) -> &[usize] {
        &self.shell_center
    }

    pub fn shell_first_ao(&self) -> &[usize] {
        &self.shell_first_ao
    }

    pub fn shell_first_bf(&self) -> &[usize] {
        &self.shell_first_bf
    }

    pub fn center_to_nshell(&self) -> &[usize] {
        &self.center_to_nshell
    }

    pub fn center_to_shell(&self) -> &[usize] {
        &self.center_to_shell
    }

    /// Flattened per-atom Cartesian coordinates, 3 entries per atom.
    pub fn xyz(&self) -> &[f64] {
        &self.xyz
    }
}

/* #endregion */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::molecule::Atom;
    use approx::assert_abs_diff_eq;

    fn na_cl_records() -> Vec<EcpAtomRecord> {
        vec![
            EcpAtomRecord {
                label: "NA".into(),
                hash: "na-hash".into(),
                ncore: 10,
                shells: vec![
                    EcpShellRecord {
                        am: 0,
                        primitives: vec![
                            EcpPrimitiveRecord { exp: 1.2, coef: 3.0, n: 2 },
                            EcpPrimitiveRecord { exp: 0.8, coef: -1.5, n: 0 },
                        ],
                    },
                    EcpShellRecord {
                        am: 1,
                        primitives: vec![EcpPrimitiveRecord { exp: 2.5, coef: 0.7, n: 2 }],
                    },
                ],
            },
            EcpAtomRecord {
                label: "CL".into(),
                hash: "cl-hash".into(),
                ncore: 10,
                shells: vec![EcpShellRecord {
                    am: 0,
                    primitives: vec![EcpPrimitiveRecord { exp: 4.0, coef: 1.1, n: 1 }],
                }],
            },
        ]
    }

    fn na_cl_molecule() -> Molecule {
        Molecule::new(vec![
            Atom::new("NA", 11.0, [0.0, 0.0, 0.0]),
            Atom::new("CL", 17.0, [0.0, 0.0, 4.5]),
        ])
    }

    #[test]
    fn empty_input_is_fatal() {
        let mut mol = na_cl_molecule();
        let err = EcpBasisSet::from_records(&mut mol, "ECP", "TEST-ECP", &[]).unwrap_err();
        assert!(matches!(err, BasisError::EmptyEcpInput));
    }

    #[test]
    fn counts_and_index_tables_are_consistent() {
        let mut mol = na_cl_molecule();
        let bs = EcpBasisSet::from_records(&mut mol, "ECP", "TEST-ECP", &na_cl_records()).unwrap();

        assert_eq!(bs.nshell(), 3);
        assert_eq!(bs.nprimitive(), 4);
        assert_eq!(bs.nunique_primitive(), 4);
        // s + p on NA, s on CL: 1 + 3 + 1 Cartesian functions
        assert_eq!(bs.nao(), 5);
        assert_eq!(bs.nbf(), 5);
        assert_eq!(bs.max_am(), 1);
        assert_eq!(bs.max_nprimitive(), 2);

        assert_eq!(bs.center_to_nshell().iter().sum::<usize>(), bs.nshell());
        for w in bs.function_to_shell().windows(2) {
            assert!(w[0] <= w[1]);
        }
        for w in bs.ao_to_shell().windows(2) {
            assert!(w[0] <= w[1]);
        }
        for i in 0..bs.nshell() {
            assert_eq!(bs.function_to_shell()[bs.shell_first_bf()[i]], i);
            assert_eq!(bs.ao_to_shell()[bs.shell_first_ao()[i]], i);
        }
        // every shell's range consumes exactly its declared primitive count
        let declared: usize = (0..bs.nshell()).map(|i| bs.shell(i).nprimitive()).sum();
        assert_eq!(declared, bs.nprimitive());
        assert_eq!(bs.xyz().len(), 3 * mol.natom());
    }

    #[test]
    fn charges_are_adjusted_exactly_once() {
        let mut mol = na_cl_molecule();
        let _bs = EcpBasisSet::from_records(&mut mol, "ECP", "TEST-ECP", &na_cl_records()).unwrap();
        assert_abs_diff_eq!(mol.charge(0), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(mol.charge(1), 7.0, epsilon = 1e-12);
        // the cached nuclear repulsion reflects the effective charges
        assert_abs_diff_eq!(mol.nuclear_repulsion_energy(), 7.0 / 4.5, epsilon = 1e-12);
    }

    #[test]
    fn shells_round_trip_through_the_flat_pool() {
        let mut mol = na_cl_molecule();
        let records = na_cl_records();
        let bs = EcpBasisSet::from_records(&mut mol, "ECP", "TEST-ECP", &records).unwrap();

        for n in 0..mol.natom() {
            let record = records.iter().find(|r| r.label == mol.label(n)).unwrap();
            let shells = bs.shells_on_center(n);
            assert_eq!(shells.len(), record.shells.len());
            for (shell, rec) in shells.iter().zip(record.shells.iter()) {
                assert_eq!(shell.am(), rec.am);
                assert_eq!(shell.nprimitive(), rec.primitives.len());
                for (i, prim) in rec.primitives.iter().enumerate() {
                    assert_abs_diff_eq!(shell.exp(i), prim.exp, epsilon = 1e-15);
                    assert_abs_diff_eq!(shell.coef(i), prim.coef, epsilon = 1e-15);
                    assert_eq!(shell.n(i), prim.n);
                    assert_eq!(shell.subl(i), rec.am);
                }
            }
        }
    }

    #[test]
    fn evaluate_filters_on_sub_angular_momentum() {
        // one storage shell mixing s and p channel primitives
        let info = EcpShellInfo::new(
            1,
            vec![2.0, 5.0],
            vec![0.5, 1.0],
            vec![2, 0],
            vec![0, 1],
            0,
            [0.0; 3],
            0,
        )
        .unwrap();
        let mut symbol_map = BTreeMap::new();
        symbol_map.insert("X".to_string(), vec![info]);
        let mut shell_map = ShellMap::new();
        shell_map.insert("MIX".to_string(), symbol_map);

        let mut mol = Molecule::new(vec![Atom::new("X", 1.0, [0.0; 3])]);
        mol.set_basis_all_atoms("MIX", "ECP");
        let bs = EcpBasisSet::new("ECP", "MIX", &mol, &shell_map).unwrap();

        let r = 1.3_f64;
        let s_ref = r.powi(2) * 2.0 * (-0.5 * r * r).exp();
        let p_ref = 5.0 * (-1.0 * r * r).exp();
        assert_abs_diff_eq!(bs.shell(0).evaluate(r, 0), s_ref, epsilon = 1e-14);
        assert_abs_diff_eq!(bs.shell(0).evaluate(r, 1), p_ref, epsilon = 1e-14);
        assert_abs_diff_eq!(bs.shell(0).evaluate(r, 2), 0.0, epsilon = 1e-14);
    }

    #[test]
    fn ragged_shell_is_rejected() {
        let err = EcpShellInfo::new(0, vec![1.0], vec![1.0, 2.0], vec![0], vec![0], 0, [0.0; 3], 0)
            .unwrap_err();
        assert!(matches!(err, BasisError::RaggedShell { .. }));
    }

    #[test]
    fn gaussian94_text_path_yields_no_shells() {
        assert!(parse_gaussian94_ecp("NA", &["ECP block".to_string()]).is_empty());
    }
}

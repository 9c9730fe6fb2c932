use std::collections::HashMap;

/// One nucleus with its basis-set assignments.
///
/// `charge` is the effective nuclear charge; core-potential construction
/// lowers it below the element's atomic number.
#[derive(Debug, Clone)]
pub struct Atom {
    pub label: String,
    pub charge: f64,
    pub xyz: [f64; 3],
    basis: HashMap<String, String>,
    shell_hash: HashMap<String, String>,
}

impl Atom {
    pub fn new(label: impl Into<String>, charge: f64, xyz: [f64; 3]) -> Self {
        Self { label: label.into(), charge, xyz, basis: HashMap::new(), shell_hash: HashMap::new() }
    }
}

/// Geometry and per-atom bookkeeping shared by all basis sets of a calculation.
#[derive(Debug, Clone, Default)]
pub struct Molecule {
    atoms: Vec<Atom>,
    com: [f64; 3],
    e_nuc: f64,
}

impl Molecule {
    pub fn new(atoms: Vec<Atom>) -> Self {
        let mut mol = Self { atoms, com: [0.0; 3], e_nuc: 0.0 };
        mol.update_geometry();
        mol
    }

    pub fn natom(&self) -> usize {
        self.atoms.len()
    }

    pub fn label(&self, n: usize) -> &str {
        &self.atoms[n].label
    }

    pub fn charge(&self, n: usize) -> f64 {
        self.atoms[n].charge
    }

    pub fn set_nuclear_charge(&mut self, n: usize, charge: f64) {
        self.atoms[n].charge = charge;
    }

    pub fn xyz(&self, n: usize) -> [f64; 3] {
        self.atoms[n].xyz
    }

    /// Basis-set name assigned to atom `n` under the given key, e.g. "BASIS"
    /// or "ECP".
    pub fn basis_on_atom(&self, n: usize, key: &str) -> Option<&str> {
        self.atoms[n].basis.get(key).map(String::as_str)
    }

    pub fn set_basis_all_atoms(&mut self, name: &str, key: &str) {
        for atom in self.atoms.iter_mut() {
            atom.basis.insert(key.to_string(), name.to_string());
        }
    }

    /// Attach a basis content hash to every atom carrying `label`.
    pub fn set_shell_by_label(&mut self, label: &str, hash: &str, key: &str) {
        for atom in self.atoms.iter_mut() {
            if atom.label == label {
                atom.shell_hash.insert(key.to_string(), hash.to_string());
            }
        }
    }

    pub fn shell_hash(&self, n: usize, key: &str) -> Option<&str> {
        self.atoms[n].shell_hash.get(key).map(String::as_str)
    }

    /// Recompute geometry-derived quantities (charge-weighted center and
    /// nuclear repulsion). Must be re-run after any charge mutation.
    pub fn update_geometry(&mut self) {
        let qtot: f64 = self.atoms.iter().map(|a| a.charge).sum();
        let mut com = [0.0; 3];
        if qtot > 0.0 {
            for atom in &self.atoms {
                for k in 0..3 {
                    com[k] += atom.charge * atom.xyz[k] / qtot;
                }
            }
        }
        self.com = com;
        self.e_nuc = self.compute_nuclear_repulsion();
    }

    pub fn center_of_charge(&self) -> [f64; 3] {
        self.com
    }

    /// Cached at the last `update_geometry` call.
    pub fn nuclear_repulsion_energy(&self) -> f64 {
        self.e_nuc
    }

    fn compute_nuclear_repulsion(&self) -> f64 {
        let mut e = 0.0;
        for i in 0..self.atoms.len() {
            for j in 0..i {
                let a = &self.atoms[i];
                let b = &self.atoms[j];
                let r = (0..3).map(|k| (a.xyz[k] - b.xyz[k]).powi(2)).sum::<f64>().sqrt();
                e += a.charge * b.charge / r;
            }
        }
        e
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn h2() -> Molecule {
        Molecule::new(vec![
            Atom::new("H", 1.0, [0.0, 0.0, 0.0]),
            Atom::new("H", 1.0, [0.0, 0.0, 1.4]),
        ])
    }

    #[test]
    fn nuclear_repulsion_tracks_charge_mutation() {
        let mut mol = h2();
        assert_abs_diff_eq!(mol.nuclear_repulsion_energy(), 1.0 / 1.4, epsilon = 1e-12);
        mol.set_nuclear_charge(0, 0.0);
        mol.update_geometry();
        assert_abs_diff_eq!(mol.nuclear_repulsion_energy(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn basis_assignment_by_key_and_label() {
        let mut mol = h2();
        mol.set_basis_all_atoms("CUSTOM-ECP", "ECP");
        mol.set_shell_by_label("H", "abc123", "ECP");
        assert_eq!(mol.basis_on_atom(0, "ECP"), Some("CUSTOM-ECP"));
        assert_eq!(mol.basis_on_atom(1, "ECP"), Some("CUSTOM-ECP"));
        assert_eq!(mol.shell_hash(1, "ECP"), Some("abc123"));
        assert_eq!(mol.basis_on_atom(0, "BASIS"), None);
    }
}

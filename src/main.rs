use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use libcint::prelude::*;
use rohf_ecp::jk::{DenseJkBuilder, energy_nuc, intor_row_major};
use rohf_ecp::prelude::*;
use rstsr::prelude::*;
use serde::Deserialize;

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct CliParser {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct RohfArgs {
    #[clap(short, long = "mol", help = "Path to the json file containing molecular data")]
    mol_file: String,

    #[clap(long, default_value_t = 0, help = "Number of singly occupied orbitals")]
    socc: usize,

    #[clap(long, help = "Number of doubly occupied orbitals (default: from electron count)")]
    docc: Option<usize>,

    #[clap(long, default_value_t = 1.0e-8, help = "Energy convergence threshold")]
    conv_e: f64,

    #[clap(long, default_value_t = 1.0e-8, help = "Density RMS convergence threshold")]
    conv_d: f64,

    #[clap(long, default_value_t = 100, help = "Maximum number of SCF iterations")]
    max_cycle: usize,

    #[clap(long, default_value_t = 6, help = "Maximum number of DIIS vectors")]
    diis_space: usize,

    #[clap(long, help = "Disable DIIS extrapolation")]
    no_diis: bool,

    #[clap(long, help = "Path to a .npy MO coefficient matrix used as the initial guess")]
    guess: Option<String>,

    #[clap(long, default_value_t = 1, help = "Print verbosity")]
    print: u32,

    #[clap(long, help = "Dump the converged molecular orbitals")]
    print_mos: bool,
}

#[derive(Args, Debug)]
struct EcpArgs {
    #[clap(short, long = "mol", help = "Path to the json file containing the atom list")]
    mol_file: String,

    #[clap(short, long = "ecp", help = "Path to the json file containing the ECP records")]
    ecp_file: String,

    #[clap(long, default_value = "ECP", help = "Basis key the potential is registered under")]
    key: String,

    #[clap(long, default_value = "CUSTOM-ECP", help = "Name of the assembled basis")]
    name: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[clap(name = "rohf", about = "Run a restricted open-shell Hartree-Fock calculation")]
    Rohf(RohfArgs),

    #[clap(name = "ecp", about = "Assemble a core-potential basis from structured records")]
    Ecp(EcpArgs),
}

fn tensor_from_file(fname: &str) -> Result<Tsr> {
    // c-contiguous numpy array to f-contiguous rstsr
    let device = DeviceTsr::default();
    let bytes = std::fs::read(fname).with_context(|| format!("reading {fname}"))?;
    let npy = npyz::NpyFile::new(&bytes[..])?;
    let shape = npy.shape().iter().map(|x| *x as usize).rev().collect::<Vec<usize>>();
    let data = npy.into_vec()?;
    Ok(rt::asarray((data, shape, &device)))
}

fn run_rohf(args: RohfArgs) -> Result<()> {
    let cint_data = CInt::from_json(&args.mol_file);

    let hcore = intor_row_major(&cint_data, "int1e_kin") + intor_row_major(&cint_data, "int1e_nuc");
    let ovlp = intor_row_major(&cint_data, "int1e_ovlp");
    let e_nuc = energy_nuc(&cint_data);

    let nelec = cint_data.atom_charges().into_iter().sum::<f64>() as usize;
    let nsocc = args.socc;
    anyhow::ensure!(nsocc <= nelec, "more singly occupied orbitals ({nsocc}) than electrons ({nelec})");
    let ndocc = args.docc.unwrap_or((nelec - nsocc) / 2);

    let config = RohfConfig {
        e_convergence: args.conv_e,
        d_convergence: args.conv_d,
        max_cycle: args.max_cycle,
        diis: !args.no_diis,
        max_diis_vectors: args.diis_space,
        ndocc,
        nsocc,
        print: args.print,
        print_mos: args.print_mos,
    };

    let h = BlockMatrix::from_blocks(vec![hcore]);
    let s = BlockMatrix::from_blocks(vec![ovlp]);
    let jk = Box::new(DenseJkBuilder::from_cint(&cint_data));

    let mut rohf = Rohf::new(h, s, e_nuc, jk, config);
    if let Some(fname) = &args.guess {
        rohf.set_guess(BlockMatrix::from_blocks(vec![tensor_from_file(fname)?]));
    }
    let results = rohf.compute()?;

    println!("Nuclear repulsion energy: {}", results.e_nuc);
    println!("Total elec energy: {}", results.e_elec);
    println!("Total ROHF energy: {}", results.e_tot);
    Ok(())
}

#[derive(Debug, Deserialize)]
struct AtomInput {
    label: String,
    charge: f64,
    xyz: [f64; 3],
}

fn run_ecp(args: EcpArgs) -> Result<()> {
    let atoms: Vec<AtomInput> = serde_json::from_str(
        &std::fs::read_to_string(&args.mol_file).with_context(|| format!("reading {}", args.mol_file))?,
    )?;
    let records: Vec<EcpAtomRecord> = serde_json::from_str(
        &std::fs::read_to_string(&args.ecp_file).with_context(|| format!("reading {}", args.ecp_file))?,
    )?;

    let mut mol =
        Molecule::new(atoms.into_iter().map(|a| Atom::new(a.label, a.charge, a.xyz)).collect());
    let basis = EcpBasisSet::from_records(&mut mol, &args.key, &args.name, &records)?;

    println!("Assembled ECP basis {:?} under key {:?}", basis.name, basis.key);
    println!("  shells:            {}", basis.nshell());
    println!("  primitives:        {}", basis.nprimitive());
    println!("  unique primitives: {}", basis.nunique_primitive());
    println!("  basis functions:   {}", basis.nbf());
    println!("  max am:            {}", basis.max_am());
    println!("  max nprimitive:    {}", basis.max_nprimitive());
    for n in 0..mol.natom() {
        println!("  atom {:3} {:4}  Z_eff = {}", n, mol.label(n), mol.charge(n));
    }
    println!("Nuclear repulsion energy (effective charges): {}", mol.nuclear_repulsion_energy());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = CliParser::parse();
    match args.command {
        Command::Rohf(rohf_args) => run_rohf(rohf_args),
        Command::Ecp(ecp_args) => run_ecp(ecp_args),
    }
}

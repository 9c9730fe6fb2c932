#![allow(unused)]

use std::path::PathBuf;

/// Candidate library directories assembled from path-list environment
/// variables plus the usual system roots.
fn openblas_search_paths() -> Vec<PathBuf> {
    let split_char = if cfg!(windows) { ";" } else { ":" };
    let env_candidates = ["REST_EXT_DIR", "LD_LIBRARY_PATH", "DYLD_LIBRARY_PATH", "PATH"];
    let sub_dirs = ["", "lib", "lib64", "lib/x86_64-linux-gnu"];

    let mut roots: Vec<String> = env_candidates
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .flat_map(|paths| paths.split(split_char).map(str::to_string).collect::<Vec<_>>())
        .filter(|path| !path.is_empty())
        .collect();
    roots.extend(["/usr", "/usr/local", "/usr/local/share", "/opt"].map(str::to_string));

    roots
        .iter()
        .flat_map(|root| sub_dirs.iter().map(move |sub| PathBuf::from(root).join(sub)))
        .filter(|path| path.exists())
        .filter_map(|path| std::fs::canonicalize(path).ok())
        .collect()
}

fn link_openblas() {
    for path in openblas_search_paths() {
        println!("cargo:rustc-link-search=native={}", path.display());
    }
    println!("cargo:rustc-link-lib=openblas");
    println!("cargo:rustc-link-lib=gomp");
}

fn main() {
    #[cfg(feature = "use_openblas")]
    link_openblas();
}

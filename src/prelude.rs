#![allow(unused)]

/* #region for API callers */

pub use crate::basis::{
    BasisError, EcpAtomRecord, EcpBasisSet, EcpPrimitiveRecord, EcpShell, EcpShellInfo,
    EcpShellRecord, PrimitivePool, ShellMap,
};
pub use crate::block::{BlockMatrix, BlockVector};
pub use crate::diis::{Diis, DiisFlags, DiisPopStrategy};
pub use crate::jk::{DenseJkBuilder, JkBuilder, JkMatrices};
pub use crate::molecule::{Atom, Molecule};
pub use crate::rohf::{Rohf, RohfConfig, RohfResults, ScfError};

/* #endregion */

/* #region for developers */

// RSTSR backend specification
#[cfg(not(feature = "use_openblas"))]
pub type DeviceTsr = DeviceFaer;
#[cfg(feature = "use_openblas")]
pub type DeviceTsr = DeviceOpenBLAS;

pub(crate) use libcint::prelude::*;
pub(crate) use rayon::prelude::*;
pub(crate) use rstsr::prelude::*;

pub(crate) use crate::*;

pub type Tsr<D = IxD> = Tensor<f64, DeviceTsr, D>;
pub type TsrView<'a, D = IxD> = TensorView<'a, f64, DeviceTsr, D>;
pub type TsrMut<'a, D = IxD> = TensorMut<'a, f64, DeviceTsr, D>;

/* #endregion */

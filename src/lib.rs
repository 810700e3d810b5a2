pub mod method;
pub mod model;
pub mod ndarray;
pub mod stats;
pub mod util;

#[cfg(feature = "python")]
pub mod python;

#[cfg(feature = "python")]
use pyo3::prelude::*;

/// A Python module implemented in Rust. The name of this function must match
/// the `lib.name` setting in the `Cargo.toml`, else Python will not be able to
/// import the module.
#[cfg(feature = "python")]
#[pymodule]
fn rs_phylosens(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<python::sensitivity::PySensitivity>()?;
    m.add_function(wrap_pyfunction!(python::sensitivity::file_md5_py, m)?)?;
    Ok(())
}

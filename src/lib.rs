pub mod core;
pub mod jupyter;

pub use core::{
    context::{InputProvider, InvocationContext},
    errors::KernelError,
    traits::KernelConnector,
    types::*,
};
pub use jupyter::{JupyterConnector, JupyterKernelBuilder};

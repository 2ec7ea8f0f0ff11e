pub mod error;
#[cfg(feature = "http")]
pub mod http;
pub mod log;
pub mod provider;
pub mod registry;

pub use error::ProviderError;
#[cfg(feature = "http")]
pub use http::{FunctionConfig, HttpFunction};
pub use log::LogFunction;
pub use provider::{DynProvider, Provider};
pub use registry::ProviderRegistry;

//! Client module: model registry, transports and the endpoint router.

mod bedrock;
mod registry;
mod router;
mod transport;

pub use bedrock::*;
pub use registry::*;
pub use router::*;
pub use transport::*;

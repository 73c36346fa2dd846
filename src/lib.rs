mod download;
mod error;
mod files;
mod logging;
mod properties;
mod query;
mod registry;
mod store;
mod supervisor;

pub use download::*;
pub use error::*;
pub use files::*;
pub use logging::*;
pub use query::*;
pub use registry::*;
pub use store::*;
pub use supervisor::*;

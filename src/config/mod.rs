pub mod loader;
pub mod policy;
pub mod schema;

pub use loader::load;
pub use policy::HostPolicy;
pub use schema::{Config, LogFormat};

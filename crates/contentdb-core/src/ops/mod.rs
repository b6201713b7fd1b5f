pub mod handlers;
pub mod mutate;
mod phases;
pub mod store;

pub use handlers::{BuiltinHandler, Phase, ResourceHandler};
pub use mutate::Reaction;
pub use store::{Store, StoreStats, TypeKey};

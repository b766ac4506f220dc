mod collection;
pub mod registry;
pub mod trash;

pub use registry::{GroupInfo, StructureRegistry, ZoneInfo};
pub use trash::{Trash, TrashEntry};

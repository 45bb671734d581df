//! Collaborator trait definitions

mod directory;
mod manager;
mod records;

pub use directory::{Directory, DirectoryRecord};
pub use manager::ManagerQuery;
pub use records::{DefaultRecordBuilder, RecordBuilder};

//! Data model shared by the loader components

pub mod batch;
pub mod stream;
pub mod table;

pub use batch::StagedBatch;
pub use stream::StreamSchemaMessage;
pub use table::{TableDescriptor, TableKind};

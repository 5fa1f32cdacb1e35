mod base;
mod extraction;
mod object_storage;
mod replication;
mod replicator;
mod source;
mod table;
mod warehouse;

pub use base::*;
pub use extraction::*;
pub use object_storage::*;
pub use replication::*;
pub use replicator::*;
pub use source::*;
pub use table::*;
pub use warehouse::*;

//! Repository traits for metadata operations.

pub mod ids;
pub mod resources;
pub mod snapshot;

pub use ids::IdRepo;
pub use resources::ResourceRepo;
pub use snapshot::SnapshotRepo;

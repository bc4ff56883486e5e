//! Concrete upgrade steps.

pub mod bootstrap;
pub mod cleanup;
pub mod paged;
pub mod reindex;
pub mod restore;

pub use bootstrap::{BootstrapStep, BootstrapTemplate, MutationProposal};
pub use cleanup::FlushStore;
pub use reindex::ReindexDataJobViaNodesCll;
pub use restore::RestoreIndicesStep;

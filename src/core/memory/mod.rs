pub mod bus;
pub mod factory;
pub mod in_memory;
pub mod sqlite;
pub mod traits;
pub mod types;
pub mod write_gate;

pub use bus::{MemoryBus, SharedWrite, StoredWrite, WriteOutcome};
pub use factory::{CompartmentStores, create_stores};
pub use traits::{EpisodicStore, SharedReferenceStore, SynthesisStore, WorkingSetStore};
pub use types::{
    Compartment, EpisodeEntry, EpisodeQuery, NewEpisode, NewPattern, SharedReference,
    SynthesizedPattern, WorkingEntry, WorkingSet, episode_types, input_signature,
};
pub use write_gate::{WriteDecision, WriteRequest};

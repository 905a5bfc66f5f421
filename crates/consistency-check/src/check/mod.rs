//! Check descriptors, id allocation and chunk planning.

mod chunk;
mod descriptor;
mod ids;

pub use chunk::{effective_chunk_size, next_power_of_two, Chunk, ChunkPlan};
pub use descriptor::{CheckDescriptor, CheckMethod, CheckRange, DESCRIPTOR_MAGIC};
pub use ids::IdAllocator;

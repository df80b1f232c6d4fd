//! Turn lifecycle: validation, lease acquisition, generation, and commit.

mod coordinator;
mod error;

pub use coordinator::{
    ChunkSequencer, CompletedTurn, StreamingTurn, TurnCoordinator, TurnLimits,
};
pub(crate) use coordinator::commit;
pub use error::TurnError;

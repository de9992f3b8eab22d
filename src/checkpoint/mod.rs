//! Human-in-the-loop checkpoints
//!
//! Every produced artifact passes through a checkpoint: rules first,
//! then a human. Nothing is accepted without an explicit approval.

mod gate;
mod types;

pub use gate::CheckpointGate;
pub use types::{Checkpoint, Decision, GateState, GateTransition, Verdict};

//! The phase-tagged progress stream of an analysis.
//!
//! An analysis reports its progress as a sequence of [`Frame`]s. A live run announces every
//! phase it goes through, while a cached result is replayed with a shorter, synthetic sequence.
//! Either way, a stream always ends in exactly one of `[DONE]` or `[ERROR]`, and every frame
//! is validated against the [`StreamState`] machine before it is written.

mod emit;
mod frame;
mod state;
mod writer;

pub use emit::{emit_live, emit_replay};
pub use frame::{Frame, Marker};
pub use state::{ProtocolError, StreamState, validate};
pub use writer::{EventSink, PhaseWriter};

use std::fmt;

use tokio::sync::mpsc;

use super::{Frame, Marker, ProtocolError, StreamState};

/// The receiving end of a progress stream, usually a client connection.
pub trait EventSink: Send {
    /// Delivers one frame.
    ///
    /// Sinks whose receiver went away drop frames silently. A computation keeps running for
    /// the callers that share it, even if the caller that started it is gone.
    fn emit(&mut self, frame: Frame);
}

impl EventSink for mpsc::UnboundedSender<Frame> {
    fn emit(&mut self, frame: Frame) {
        self.send(frame).ok();
    }
}

/// Writes frames to an [`EventSink`], enforcing the [`StreamState`] protocol.
///
/// A frame that is not valid in the current state is rejected with a [`ProtocolError`] and
/// never reaches the sink.
pub struct PhaseWriter {
    sink: Box<dyn EventSink>,
    state: StreamState,
}

impl fmt::Debug for PhaseWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseWriter")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl PhaseWriter {
    pub fn new(sink: impl EventSink + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            state: StreamState::Start,
        }
    }

    /// The state after the last written frame.
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Writes a single frame.
    pub fn write(&mut self, frame: Frame) -> Result<(), ProtocolError> {
        self.state = self.state.transition(&frame)?;
        self.sink.emit(frame);
        Ok(())
    }

    /// Writes a phase marker.
    pub fn marker(&mut self, marker: Marker) -> Result<(), ProtocolError> {
        self.write(Frame::Marker(marker))
    }

    /// Writes a payload event.
    pub fn event(&mut self, payload: impl Into<String>) -> Result<(), ProtocolError> {
        self.write(Frame::Event(payload.into()))
    }

    /// Terminates the stream with an error.
    pub fn error(&mut self, cause: impl fmt::Display) -> Result<(), ProtocolError> {
        self.write(Frame::Error(cause.to_string()))
    }
}

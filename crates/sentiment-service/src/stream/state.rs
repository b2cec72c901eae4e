use super::{Frame, Marker};

/// The receiver's view of a progress stream.
///
/// The valid transitions are:
///
/// ```text
/// Start      --[OVERVIEW]-->   Overview --[PNEWS]--> PolygonNews --[GNEWS]--> GoogleNews
/// GoogleNews --[MODEL]-->      Model    --[MODELBEGIN]--> ModelBegin
/// Start      --[TICKNEWS]-->   TickNews --[MODELBEGIN]--> ModelBegin
/// ModelBegin --[RANAT]-->      RanAt    --[DONE]--> Done
/// any non-terminal state --[ERROR]--> Failed
/// ```
///
/// Payload events are only valid in `PolygonNews`, `TickNews`, `ModelBegin` and `RanAt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    /// Nothing was written yet.
    #[default]
    Start,
    Overview,
    PolygonNews,
    GoogleNews,
    Model,
    ModelBegin,
    TickNews,
    RanAt,
    /// Terminal, the stream completed.
    Done,
    /// Terminal, the stream was aborted by an error.
    Failed,
}

/// A frame that is not valid in the current state of the stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unexpected {marker} marker in state {state:?}")]
    UnexpectedMarker { state: StreamState, marker: Marker },
    #[error("unexpected payload in state {state:?}")]
    UnexpectedEvent { state: StreamState },
    #[error("stream already terminated in state {state:?}")]
    Terminated { state: StreamState },
}

impl StreamState {
    /// Returns `true` once nothing more may be written.
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamState::Done | StreamState::Failed)
    }

    /// Returns `true` if payload events are valid in this state.
    pub fn accepts_events(self) -> bool {
        matches!(
            self,
            StreamState::PolygonNews
                | StreamState::TickNews
                | StreamState::ModelBegin
                | StreamState::RanAt
        )
    }

    /// Computes the state after `frame`, or rejects the frame.
    pub fn transition(self, frame: &Frame) -> Result<Self, ProtocolError> {
        if self.is_terminal() {
            return Err(ProtocolError::Terminated { state: self });
        }

        match frame {
            Frame::Error(_) => Ok(StreamState::Failed),
            Frame::Event(_) if self.accepts_events() => Ok(self),
            Frame::Event(_) => Err(ProtocolError::UnexpectedEvent { state: self }),
            Frame::Marker(marker) => self.advance(*marker),
        }
    }

    fn advance(self, marker: Marker) -> Result<Self, ProtocolError> {
        use StreamState::*;

        let next = match (self, marker) {
            (Start, Marker::Overview) => Overview,
            (Overview, Marker::PolygonNews) => PolygonNews,
            (PolygonNews, Marker::GoogleNews) => GoogleNews,
            (GoogleNews, Marker::Model) => Model,
            (Model, Marker::ModelBegin) => ModelBegin,
            (Start, Marker::TickNews) => TickNews,
            (TickNews, Marker::ModelBegin) => ModelBegin,
            (ModelBegin, Marker::RanAt) => RanAt,
            (RanAt, Marker::Done) => Done,
            (state, marker) => return Err(ProtocolError::UnexpectedMarker { state, marker }),
        };

        Ok(next)
    }
}

/// Validates a complete sequence of frames, returning the final state.
pub fn validate<'a>(
    frames: impl IntoIterator<Item = &'a Frame>,
) -> Result<StreamState, ProtocolError> {
    frames
        .into_iter()
        .try_fold(StreamState::Start, |state, frame| state.transition(frame))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(payload: &str) -> Frame {
        Frame::Event(payload.into())
    }

    fn marker(marker: Marker) -> Frame {
        Frame::Marker(marker)
    }

    #[test]
    fn test_live_sequence() {
        let frames: &[Frame] = &[
            marker(Marker::Overview),
            marker(Marker::PolygonNews),
            event("[]"),
            marker(Marker::GoogleNews),
            marker(Marker::Model),
            marker(Marker::ModelBegin),
            event("{\"overview\""),
            event(":\"x\"}"),
            marker(Marker::RanAt),
            event("1719239465000"),
            marker(Marker::Done),
        ];
        assert_eq!(validate(frames), Ok(StreamState::Done));
    }

    #[test]
    fn test_replay_sequence() {
        let frames: &[Frame] = &[
            marker(Marker::TickNews),
            event("[]"),
            marker(Marker::ModelBegin),
            event("{}"),
            marker(Marker::RanAt),
            event("1719239465000"),
            marker(Marker::Done),
        ];
        assert_eq!(validate(frames), Ok(StreamState::Done));
    }

    #[test]
    fn test_no_skipping() {
        let frames: &[Frame] = &[marker(Marker::Overview), marker(Marker::GoogleNews)];
        assert_eq!(
            validate(frames),
            Err(ProtocolError::UnexpectedMarker {
                state: StreamState::Overview,
                marker: Marker::GoogleNews
            })
        );

        // the replay path never announces the data gathering phases
        let frames: &[Frame] = &[marker(Marker::TickNews), marker(Marker::Model)];
        assert!(validate(frames).is_err());

        let frames: &[Frame] = &[marker(Marker::Done)];
        assert!(validate(frames).is_err());
    }

    #[test]
    fn test_events_only_in_payload_phases() {
        assert!(validate(&[event("x")]).is_err());
        assert!(validate(&[marker(Marker::Overview), event("x")]).is_err());
        assert_eq!(
            validate(&[
                marker(Marker::Overview),
                marker(Marker::PolygonNews),
                marker(Marker::GoogleNews),
                marker(Marker::Model),
                event("x"),
            ]),
            Err(ProtocolError::UnexpectedEvent {
                state: StreamState::Model
            })
        );
    }

    #[test]
    fn test_error_is_terminal() {
        let prefixes: [&[Frame]; 3] = [
            &[],
            &[marker(Marker::Overview)],
            &[marker(Marker::TickNews), event("[]")],
        ];
        for prefix in prefixes {
            let mut frames = prefix.to_vec();
            frames.push(Frame::Error("boom".into()));
            assert_eq!(validate(&frames), Ok(StreamState::Failed));

            frames.push(marker(Marker::Done));
            assert_eq!(
                validate(&frames),
                Err(ProtocolError::Terminated {
                    state: StreamState::Failed
                })
            );
        }
    }

    #[test]
    fn test_nothing_after_done() {
        let mut state = StreamState::RanAt;
        state = state.transition(&marker(Marker::Done)).unwrap();
        assert!(state.is_terminal());
        assert!(state.transition(&Frame::Error("late".into())).is_err());
        assert!(state.transition(&event("late")).is_err());
    }
}

use std::fmt;

/// Prefix of the frame that terminates a stream with an error.
const ERROR_PREFIX: &str = "[ERROR]";

/// A phase marker, announcing which stage of an analysis the stream has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    /// The company overview is being fetched.
    Overview,
    /// Recent news are being fetched from the market data API.
    PolygonNews,
    /// Headlines are being scraped.
    GoogleNews,
    /// The language model was asked.
    Model,
    /// The language model started answering.
    ModelBegin,
    /// Cached news follow, the data gathering phases did not run for this stream.
    TickNews,
    /// The completion timestamp follows.
    RanAt,
    /// The stream completed successfully.
    Done,
}

impl Marker {
    pub const ALL: [Marker; 8] = [
        Marker::Overview,
        Marker::PolygonNews,
        Marker::GoogleNews,
        Marker::Model,
        Marker::ModelBegin,
        Marker::TickNews,
        Marker::RanAt,
        Marker::Done,
    ];

    /// The token of this marker on the wire.
    pub fn token(self) -> &'static str {
        match self {
            Marker::Overview => "[OVERVIEW]",
            Marker::PolygonNews => "[PNEWS]",
            Marker::GoogleNews => "[GNEWS]",
            Marker::Model => "[MODEL]",
            Marker::ModelBegin => "[MODELBEGIN]",
            Marker::TickNews => "[TICKNEWS]",
            Marker::RanAt => "[RANAT]",
            Marker::Done => "[DONE]",
        }
    }

    /// Parses a wire token.
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|marker| marker.token() == token)
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// A single frame of a progress stream.
///
/// Every frame is transported as the `data` of one server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A phase marker.
    Marker(Marker),
    /// A payload: serialized sources, a fragment of the model's answer, the final answer or a
    /// millisecond timestamp.
    Event(String),
    /// The stream failed with the given human readable cause.
    Error(String),
}

impl Frame {
    /// The `data` payload of this frame.
    pub fn data(&self) -> String {
        match self {
            Frame::Marker(marker) => marker.token().to_owned(),
            Frame::Event(payload) => payload.clone(),
            Frame::Error(message) => format!("{ERROR_PREFIX} {message}"),
        }
    }

    /// Parses the `data` payload of an event back into a frame.
    pub fn from_data(data: &str) -> Self {
        if let Some(marker) = Marker::from_token(data) {
            return Frame::Marker(marker);
        }
        match data.strip_prefix(ERROR_PREFIX) {
            Some(message) if message.is_empty() || message.starts_with(' ') => {
                Frame::Error(message.trim_start().to_owned())
            }
            _ => Frame::Event(data.to_owned()),
        }
    }

    /// Returns `true` for [`Marker::Done`] and [`Frame::Error`], after which nothing follows.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Frame::Marker(Marker::Done) | Frame::Error(_))
    }
}

impl From<Marker> for Frame {
    fn from(marker: Marker) -> Self {
        Frame::Marker(marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_tokens() {
        let tokens: Vec<_> = Marker::ALL.iter().map(|m| m.token()).collect();
        insta::assert_debug_snapshot!(tokens, @r#"
        [
            "[OVERVIEW]",
            "[PNEWS]",
            "[GNEWS]",
            "[MODEL]",
            "[MODELBEGIN]",
            "[TICKNEWS]",
            "[RANAT]",
            "[DONE]",
        ]
        "#);

        for marker in Marker::ALL {
            assert_eq!(Frame::from_data(marker.token()), Frame::Marker(marker));
        }
    }

    #[test]
    fn test_error_frames() {
        let frame = Frame::Error("polygon responded with 500".into());
        assert_eq!(frame.data(), "[ERROR] polygon responded with 500");
        assert_eq!(Frame::from_data(&frame.data()), frame);
        assert_eq!(Frame::from_data("[ERROR]"), Frame::Error(String::new()));
        assert!(frame.is_terminal());
    }

    #[test]
    fn test_payloads() {
        // model fragments that merely look like tokens stay payloads
        assert_eq!(
            Frame::from_data("[ERRORS]"),
            Frame::Event("[ERRORS]".into())
        );
        assert_eq!(
            Frame::from_data(r#"{"overview":"#),
            Frame::Event(r#"{"overview":"#.into())
        );
        assert_eq!(Frame::from_data(""), Frame::Event(String::new()));
        assert!(!Frame::Event("[DONE] ".into()).is_terminal());
    }
}

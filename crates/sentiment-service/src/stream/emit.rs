use anyhow::{Context, Result};
use futures::future::BoxFuture;

use super::{Marker, PhaseWriter};
use crate::types::SentimentReport;

/// Runs a live computation and terminates the stream according to its outcome.
///
/// The computation writes the phases up to and including `[MODELBEGIN]` and the streamed
/// answer itself. On success, this writes `[RANAT]`, the completion timestamp and `[DONE]`.
/// On failure, it writes exactly one `[ERROR]` with the rendered cause and nothing else.
pub async fn emit_live<F>(writer: &mut PhaseWriter, computation: F) -> Result<SentimentReport>
where
    F: for<'w> FnOnce(&'w mut PhaseWriter) -> BoxFuture<'w, Result<SentimentReport>>,
{
    let result = computation(&mut *writer).await;
    let result = result.and_then(|report| {
        finish(writer, &report)?;
        Ok(report)
    });

    if let Err(ref err) = result {
        fail(writer, err);
    }
    result
}

/// Writes the replay of a cached result.
///
/// The sequence is `[TICKNEWS]`, the sources, `[MODELBEGIN]`, the final answer, `[RANAT]`,
/// the completion timestamp and `[DONE]`. The data gathering phases are not announced, as
/// they did not run for this stream. Any failure is written as a single `[ERROR]`.
pub fn emit_replay(writer: &mut PhaseWriter, report: &SentimentReport) -> Result<()> {
    let result = replay(writer, report);
    if let Err(ref err) = result {
        fail(writer, err);
    }
    result
}

fn replay(writer: &mut PhaseWriter, report: &SentimentReport) -> Result<()> {
    let news = serde_json::to_string(&report.news).context("failed to serialize news")?;
    let chat = serde_json::to_string(&report.chat).context("failed to serialize answer")?;

    writer.marker(Marker::TickNews)?;
    writer.event(news)?;
    writer.marker(Marker::ModelBegin)?;
    writer.event(chat)?;
    finish(writer, report)
}

fn finish(writer: &mut PhaseWriter, report: &SentimentReport) -> Result<()> {
    writer.marker(Marker::RanAt)?;
    writer.event(report.ran_at.timestamp_millis().to_string())?;
    writer.marker(Marker::Done)?;
    Ok(())
}

fn fail(writer: &mut PhaseWriter, err: &anyhow::Error) {
    if let Err(protocol_err) = writer.error(format!("{err:#}")) {
        tracing::error!(
            error = %protocol_err,
            cause = %format!("{err:#}"),
            "could not report failure on terminated stream",
        );
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tokio::sync::mpsc;

    use super::*;
    use crate::stream::{Frame, StreamState};
    use crate::types::{ChatSentiment, Sentiment, SqueezePotential};

    fn report() -> SentimentReport {
        SentimentReport {
            news: vec![],
            chat: ChatSentiment {
                overview: "A company.".into(),
                technical_sentiment: Sentiment::Bullish,
                news_sentiment: Sentiment::Neutral,
                squeeze_potential: SqueezePotential::Low,
                known_catalyst: "None.".into(),
                notes: "Thin float.".into(),
            },
            ran_at: chrono::Utc
                .with_ymd_and_hms(2024, 6, 24, 14, 31, 5)
                .unwrap(),
        }
    }

    fn writer() -> (PhaseWriter, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PhaseWriter::new(tx), rx)
    }

    fn collect(mut rx: mpsc::UnboundedReceiver<Frame>) -> Vec<String> {
        let mut frames = vec![];
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame.data());
        }
        frames
    }

    fn gather(writer: &mut PhaseWriter) -> Result<()> {
        writer.marker(Marker::Overview)?;
        writer.marker(Marker::PolygonNews)?;
        writer.event("[]")?;
        writer.marker(Marker::GoogleNews)?;
        writer.marker(Marker::Model)?;
        Ok(())
    }

    #[tokio::test]
    async fn test_live_success() {
        let (mut writer, rx) = writer();

        let report = emit_live(&mut writer, |w| {
            Box::pin(async move {
                gather(w)?;
                w.marker(Marker::ModelBegin)?;
                w.event("{\"overview\":")?;
                w.event("\"A company.\"}")?;
                anyhow::Ok(report())
            })
        })
        .await
        .unwrap();

        assert_eq!(report, self::report());
        assert_eq!(writer.state(), StreamState::Done);
        insta::assert_debug_snapshot!(collect(rx), @r#"
        [
            "[OVERVIEW]",
            "[PNEWS]",
            "[]",
            "[GNEWS]",
            "[MODEL]",
            "[MODELBEGIN]",
            "{\"overview\":",
            "\"A company.\"}",
            "[RANAT]",
            "1719239465000",
            "[DONE]",
        ]
        "#);
    }

    #[tokio::test]
    async fn test_live_failure() {
        let (mut writer, rx) = writer();

        let result = emit_live(&mut writer, |w| {
            Box::pin(async move {
                gather(w)?;
                w.marker(Marker::ModelBegin)?;
                w.event("{\"overview\":")?;
                Err::<SentimentReport, _>(
                    anyhow::anyhow!("connection reset").context("model stream failed"),
                )
            })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(writer.state(), StreamState::Failed);
        let frames = collect(rx);
        assert_eq!(
            frames.last().map(String::as_str),
            Some("[ERROR] model stream failed: connection reset")
        );
        assert!(!frames.iter().any(|f| f == "[RANAT]" || f == "[DONE]"));
    }

    #[tokio::test]
    async fn test_live_without_answer() {
        let (mut writer, rx) = writer();

        // a computation that never saw the model begin cannot be completed
        let result = emit_live(&mut writer, |w| {
            Box::pin(async move {
                gather(w)?;
                anyhow::Ok(report())
            })
        })
        .await;

        assert!(result.is_err());
        insta::assert_debug_snapshot!(collect(rx), @r#"
        [
            "[OVERVIEW]",
            "[PNEWS]",
            "[]",
            "[GNEWS]",
            "[MODEL]",
            "[ERROR] unexpected [RANAT] marker in state Model",
        ]
        "#);
    }

    #[tokio::test]
    async fn test_live_failure_after_error() {
        let (mut writer, rx) = writer();

        let result = emit_live(&mut writer, |w| {
            Box::pin(async move {
                w.error("reported early")?;
                Err::<SentimentReport, _>(anyhow::anyhow!("reported early"))
            })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(collect(rx), ["[ERROR] reported early"]);
    }

    #[test]
    fn test_replay() {
        let (mut writer, rx) = writer();

        emit_replay(&mut writer, &report()).unwrap();

        assert_eq!(writer.state(), StreamState::Done);
        insta::assert_debug_snapshot!(collect(rx), @r#"
        [
            "[TICKNEWS]",
            "[]",
            "[MODELBEGIN]",
            "{\"overview\":\"A company.\",\"technical_sentiment\":\"bullish\",\"news_sentiment\":\"neutral\",\"squeeze_potential\":\"low\",\"known_catalyst\":\"None.\",\"notes\":\"Thin float.\"}",
            "[RANAT]",
            "1719239465000",
            "[DONE]",
        ]
        "#);
    }

    #[test]
    fn test_replay_on_used_stream() {
        let (mut writer, rx) = writer();
        writer.marker(Marker::Overview).unwrap();

        assert!(emit_replay(&mut writer, &report()).is_err());
        assert_eq!(writer.state(), StreamState::Failed);
        assert_eq!(
            collect(rx),
            [
                "[OVERVIEW]",
                "[ERROR] unexpected [TICKNEWS] marker in state Overview"
            ]
        );
    }
}

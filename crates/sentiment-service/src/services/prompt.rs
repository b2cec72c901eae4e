//! The instructions for the language model, and the schema its answer has to follow.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value, json};

use crate::types::{Ticker, TickerNews, TickerOverview};

/// The name under which the answer schema is registered with the model.
pub const SCHEMA_NAME: &str = "chat_sentiment_response";

/// Describes the answer schema to the model.
pub const SCHEMA_DESCRIPTION: &str =
    "Technical and news based analysis for a small cap stock ticker";

pub const SYSTEM_PROMPT: &str = "\
You are an experienced momentum day trader and technical analyst who evaluates small cap \
stocks under time pressure. Judge each ticker by its price action, volume, float, key \
technical levels and signs of short pressure, and decide whether momentum is likely to \
continue or to fail. Favor setups with real squeeze potential, but call out weak setups \
and fakeouts plainly. Your reader is an active trader who needs a sharp and actionable \
read on the ticker for today, not a general audience.";

/// Builds the user message for an analysis of `ticker`.
///
/// The news are embedded by their descriptions only, one JSON string per line.
pub fn user_prompt(
    ticker: &Ticker,
    overview: &TickerOverview,
    news: &[TickerNews],
    headlines: &str,
    today: DateTime<Utc>,
) -> Result<String> {
    let overview = serde_json::to_string(overview).context("failed to serialize overview")?;

    let mut descriptions = String::new();
    for item in news {
        let description = item.description.as_deref().unwrap_or_default();
        descriptions.push_str(&serde_json::to_string(description)?);
        descriptions.push('\n');
    }

    Ok(format!(
        "Ticker: {ticker}\n\
         \n\
         Polygon company overview:\n\
         {overview}\n\
         \n\
         Polygon news descriptions:\n\
         {descriptions}\n\
         Google News scraped headlines:\n\
         {headlines}\n\
         \n\
         Today's date (for news relevancy, do not rely on outdated news):\n\
         {today}\n\
         \n\
         Give your analysis:",
        today = today.to_rfc3339_opts(SecondsFormat::Secs, true),
    ))
}

/// The strict JSON schema of [`ChatSentiment`](crate::types::ChatSentiment).
pub fn answer_schema() -> Value {
    const SENTIMENTS: &[&str] = &["bullish", "bearish", "neutral", "unknown"];

    json!({
        "type": "object",
        "properties": {
            "overview": text_property(
                "A very brief two or three sentence overview of the company",
            ),
            "technical_sentiment": enum_property(
                SENTIMENTS,
                "The technical analysis driven sentiment on whether this stock is worth watching for squeezes",
            ),
            "news_sentiment": enum_property(
                SENTIMENTS,
                "The news driven sentiment on whether this stock is worth watching for squeezes",
            ),
            "squeeze_potential": enum_property(
                &["high", "medium", "low", "unknown"],
                "The potential for an upcoming gamma or momentum squeeze today",
            ),
            "known_catalyst": text_property(
                "Whether there is a known catalyst and briefly what it is, or that there is none",
            ),
            "notes": text_property(
                "Other brief and important notes about this stock or the market today, including why these sentiments were given",
            ),
        },
        "required": [
            "overview",
            "technical_sentiment",
            "news_sentiment",
            "squeeze_potential",
            "known_catalyst",
            "notes",
        ],
        "additionalProperties": false,
    })
}

fn text_property(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

fn enum_property(values: &[&str], description: &str) -> Value {
    json!({ "type": "string", "enum": values, "description": description })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::types::{ChatSentiment, Publisher};

    fn news(description: Option<&str>) -> TickerNews {
        TickerNews {
            id: "1".into(),
            title: "Headline".into(),
            author: String::new(),
            publisher: Publisher::default(),
            published_utc: Utc.with_ymd_and_hms(2024, 6, 24, 9, 0, 0).unwrap(),
            article_url: "https://example.com/1".into(),
            description: description.map(Into::into),
            keywords: vec![],
            tickers: vec!["ABC".into()],
            image_url: None,
        }
    }

    #[test]
    fn test_user_prompt() {
        let overview = TickerOverview {
            ticker: "ABC".into(),
            name: "Abc Inc.".into(),
            total_employees: Some(12),
            ..Default::default()
        };
        let news = [news(Some("Signed a \"large\" deal.")), news(None)];
        let today = Utc.with_ymd_and_hms(2024, 6, 24, 14, 31, 5).unwrap();

        let prompt = user_prompt(
            &"abc".parse().unwrap(),
            &overview,
            &news,
            "Headlines: Abc soars\nTimes:1 hour ago\n",
            today,
        )
        .unwrap();

        insta::assert_snapshot!(prompt, @r#"
        Ticker: ABC

        Polygon company overview:
        {"ticker":"ABC","name":"Abc Inc.","total_employees":12}

        Polygon news descriptions:
        "Signed a \"large\" deal."
        ""

        Google News scraped headlines:
        Headlines: Abc soars
        Times:1 hour ago


        Today's date (for news relevancy, do not rely on outdated news):
        2024-06-24T14:31:05Z

        Give your analysis:
        "#);
    }

    #[test]
    fn test_schema_matches_answer() {
        let schema = answer_schema();
        let required: Vec<_> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_owned())
            .collect();

        let answer = sentiment_test::read_fixture_string("openai/answer.json");
        let chat: ChatSentiment = serde_json::from_str(&answer).unwrap();
        let value = serde_json::to_value(chat).unwrap();
        let fields: Vec<_> = value.as_object().unwrap().keys().cloned().collect();

        let mut expected = required.clone();
        expected.sort();
        let mut fields = fields;
        fields.sort();
        assert_eq!(fields, expected);
        assert_eq!(
            schema["properties"]["squeeze_potential"]["enum"],
            json!(["high", "medium", "low", "unknown"])
        );
    }
}

use async_trait::async_trait;
use chrono::Local;

use crate::{Tool, ToolArgs, ToolResult};

/// Reports the current time or date in a TTS-friendly sentence.
pub struct TimeDate;

#[async_trait]
impl Tool for TimeDate {
    fn name(&self) -> &str {
        "time_date"
    }

    fn description(&self) -> &str {
        "Get the current time or date. Pass a query like 'time' or 'date'; defaults to time."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to report: mention 'date' for today's date, anything else returns the time."
                }
            },
            "required": []
        })
    }

    async fn execute(&self, args: ToolArgs) -> ToolResult {
        let query = args.arg_string_or("query", "").to_lowercase();
        let now = Local::now();

        if ["date", "day", "today"].iter().any(|w| query.contains(w)) {
            return ToolResult::success(format!("Today is {}.", now.format("%A, %B %-d, %Y")));
        }
        ToolResult::success(format!("It's {}.", now.format("%-I:%M %p")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn time_reply_is_tts_friendly() {
        let result = TimeDate.execute(ToolArgs::parse(r#"{"query": "time"}"#)).await;
        assert!(!result.is_error);
        let re = regex_lite(&result.content);
        assert!(re, "unexpected time format: {}", result.content);
    }

    #[tokio::test]
    async fn date_keyword_switches_to_date() {
        let result = TimeDate
            .execute(ToolArgs::parse(r#"{"query": "what is the date"}"#))
            .await;
        assert!(result.content.starts_with("Today is "));
    }

    /// Matches /^It's \d{1,2}:\d{2} [AP]M\.$/ without pulling in a regex crate.
    fn regex_lite(s: &str) -> bool {
        let Some(rest) = s.strip_prefix("It's ") else {
            return false;
        };
        let Some(rest) = rest.strip_suffix(".") else {
            return false;
        };
        let Some((clock, ampm)) = rest.rsplit_once(' ') else {
            return false;
        };
        if !matches!(ampm, "AM" | "PM") {
            return false;
        }
        let Some((h, m)) = clock.split_once(':') else {
            return false;
        };
        (1..=2).contains(&h.len())
            && h.chars().all(|c| c.is_ascii_digit())
            && m.len() == 2
            && m.chars().all(|c| c.is_ascii_digit())
    }
}

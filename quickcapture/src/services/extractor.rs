//! Content extraction
//!
//! The remote extractor is an opaque collaborator. `PatternExtractor` is the
//! cheap local fallback: regex detection of phone numbers, emails, URLs,
//! street addresses, bound names and relative time phrases.

use crate::config::{DEFAULT_DUE_HOUR, TONIGHT_HOUR};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Local, NaiveTime, TimeZone, Utc, Weekday};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+\d{1,3}[\s.-]?)?(?:\(\d{3}\)|\d{3})[\s.-]?\d{3}[\s.-]?\d{4}\b")
        .expect("phone pattern")
});

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email pattern")
});

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s<>]+").expect("url pattern"));

static ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b\d{1,5}\s+(?:[A-Z][A-Za-z]*\s+){1,3}(?:St|Street|Ave|Avenue|Rd|Road|Blvd|Boulevard|Dr|Drive|Ln|Lane|Way|Ct|Court|Pl|Place)\b\.?",
    )
    .expect("address pattern")
});

static DAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(today|tonight|tomorrow|next week|(?:next\s+)?(?:mon|tues|wednes|thurs|fri|satur|sun)day)\b",
    )
    .expect("day pattern")
});

static CLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bat\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)?\b").expect("clock pattern")
});

const INTENT_VERBS: &[&str] = &[
    "buy", "call", "email", "text", "meet", "book", "pay", "send", "pick", "schedule", "read",
    "visit", "check", "order", "cancel", "renew",
];

/// Structured fields pulled out of an entry's text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractedFields {
    pub title: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    /// Person the phone / email belongs to
    pub name: Option<String>,
    /// Time phrase as written, e.g. "tomorrow at 5pm"
    pub time: Option<String>,
    /// `time` resolved to an absolute instant
    pub due_date: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub action_intent: Option<String>,
    pub urls: Vec<String>,
}

#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<ExtractedFields>;
}

/// Local regex-based extractor
#[derive(Debug, Clone, Default)]
pub struct PatternExtractor;

impl PatternExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract relative to a fixed `now`, so results are reproducible
    pub fn extract_at(&self, text: &str, now: DateTime<Local>) -> ExtractedFields {
        let phone = PHONE_RE.find(text).map(|m| m.as_str().trim().to_string());
        let email = EMAIL_RE.find(text).map(|m| m.as_str().to_string());
        let urls: Vec<String> = URL_RE
            .find_iter(text)
            .map(|m| m.as_str().trim_end_matches(['.', ',', ')']).to_string())
            .collect();
        let location = ADDRESS_RE.find(text).map(|m| m.as_str().trim().to_string());

        let time_spans = time_spans(text);
        let time = if time_spans.is_empty() {
            None
        } else {
            Some(
                time_spans
                    .iter()
                    .map(|&(start, end)| &text[start..end])
                    .collect::<Vec<_>>()
                    .join(" "),
            )
        };
        let due_date = time.as_deref().and_then(|t| resolve_time_phrase(t, now));

        let mut stripped = text.to_string();
        for (start, end) in time_spans.iter().rev() {
            stripped.replace_range(*start..*end, " ");
        }
        let title = tidy(&URL_RE.replace_all(&stripped, " "));

        let name = if phone.is_some() || email.is_some() {
            bound_name(text, phone.as_deref(), email.as_deref(), &urls, location.as_deref())
        } else {
            None
        };

        let action_intent = text
            .split_whitespace()
            .next()
            .map(str::to_lowercase)
            .filter(|w| INTENT_VERBS.contains(&w.as_str()));

        ExtractedFields {
            title: (!title.is_empty()).then_some(title),
            phone,
            email,
            name,
            time,
            due_date,
            location,
            action_intent,
            urls,
        }
    }
}

#[async_trait]
impl ContentExtractor for PatternExtractor {
    async fn extract(&self, text: &str) -> Result<ExtractedFields> {
        Ok(self.extract_at(text, Local::now()))
    }
}

/// Byte spans of the day keyword and clock phrase, in text order
fn time_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    if let Some(m) = DAY_RE.find(text) {
        spans.push((m.start(), m.end()));
    }
    if let Some(caps) = CLOCK_RE.captures(text) {
        // "at 5" alone is too ambiguous; require minutes or am/pm.
        if caps.get(2).is_some() || caps.get(3).is_some() {
            if let Some(m) = caps.get(0) {
                spans.push((m.start(), m.end()));
            }
        }
    }
    spans.sort_unstable();
    spans
}

/// Resolve a relative time phrase ("tomorrow", "friday at 5pm", "at 17:30")
pub fn resolve_time_phrase(phrase: &str, now: DateTime<Local>) -> Option<DateTime<Utc>> {
    let today = now.date_naive();
    let day = DAY_RE.find(phrase).map(|m| m.as_str().to_lowercase());
    let clock = CLOCK_RE.captures(phrase).and_then(|caps| {
        let minutes = caps.get(2);
        let meridiem = caps.get(3).map(|m| m.as_str().to_lowercase());
        if minutes.is_none() && meridiem.is_none() {
            return None;
        }
        let mut hour: u32 = caps.get(1)?.as_str().parse().ok()?;
        let minute: u32 = minutes.map_or(Some(0), |m| m.as_str().parse().ok())?;
        match meridiem.as_deref() {
            Some("pm") if hour < 12 => hour += 12,
            Some("am") if hour == 12 => hour = 0,
            _ => {}
        }
        NaiveTime::from_hms_opt(hour, minute, 0)
    });

    let (date, default_hour) = match day.as_deref() {
        Some("today") => (today, DEFAULT_DUE_HOUR),
        Some("tonight") => (today, TONIGHT_HOUR),
        Some("tomorrow") => (today + Duration::days(1), DEFAULT_DUE_HOUR),
        Some("next week") => (today + Duration::days(7), DEFAULT_DUE_HOUR),
        Some(word) => {
            let target = parse_weekday(word.trim_start_matches("next").trim())?;
            let ahead = (7 + target.num_days_from_monday() as i64
                - today.weekday().num_days_from_monday() as i64)
                % 7;
            let ahead = if ahead == 0 { 7 } else { ahead };
            (today + Duration::days(ahead), DEFAULT_DUE_HOUR)
        }
        None => {
            let time = clock?;
            // A bare clock time that already passed means tomorrow.
            let date = if time <= now.time() {
                today + Duration::days(1)
            } else {
                today
            };
            (date, DEFAULT_DUE_HOUR)
        }
    };

    let time = match clock {
        Some(time) => time,
        None => NaiveTime::from_hms_opt(default_hour, 0, 0)?,
    };

    Local
        .from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_weekday(word: &str) -> Option<Weekday> {
    match word {
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Capitalized words left over once the structured parts are removed
fn bound_name(
    text: &str,
    phone: Option<&str>,
    email: Option<&str>,
    urls: &[String],
    location: Option<&str>,
) -> Option<String> {
    let mut rest = text.to_string();
    for part in phone.into_iter().chain(email).chain(location) {
        rest = rest.replace(part, " ");
    }
    for url in urls {
        rest = rest.replace(url.as_str(), " ");
    }

    let words: Vec<&str> = rest
        .split(|c: char| c.is_whitespace() || c == ',' || c == ';' || c == ':')
        .filter(|w| !w.is_empty() && *w != "-")
        .collect();

    let looks_like_name = !words.is_empty()
        && words.len() <= 3
        && words.iter().all(|w| {
            let mut chars = w.chars();
            chars.next().is_some_and(char::is_uppercase)
                && chars.all(|c| c.is_alphabetic() || c == '\'' || c == '-' || c == '.')
        });

    looks_like_name.then(|| words.join(" "))
}

fn tidy(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches([',', ';', ':', '-'])
        .trim()
        .to_string()
}

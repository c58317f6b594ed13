//! Episode formatting
//!
//! Maps raw catalog records onto the canonical [`Episode`] shape. Formatting a
//! record never fails: every field is produced by a rule in [`FIELD_RULES`], and a
//! rule whose parser fails falls back to a fixed literal or to the raw value.

use crate::episode::{self, Episode, RawEpisode};
use chrono::NaiveDate;
use serde_json::Map;
use thiserror::Error;
use tracing::warn;

/// Title used when the record has none
pub const PLACEHOLDER_TITLE: &str = "Unknown Title";

/// Title of the placeholder produced for records that cannot be formatted
pub const ERROR_TITLE: &str = "Episode formatting error";

/// Length used when the duration is unknown
pub const DEFAULT_LENGTH: &str = "00:00";

/// Descriptions longer than this many characters are truncated
pub const MAX_DESCRIPTION_CHARS: usize = 1000;

/// Reasons a single field could not be derived from the raw record
#[derive(Debug, Error)]
pub enum FieldError {
    #[error("missing value")]
    Missing,

    #[error("invalid date '{value}': {source}")]
    InvalidDate {
        value: String,
        source: chrono::ParseError,
    },
}

/// Reasons a batch could not be numbered
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("no episode numbers left for {count} new episode(s) of '{series}' after #{highest}")]
    NumbersExhausted {
        series: String,
        highest: u32,
        count: usize,
    },
}

/// Fields derived from the raw record through the rule table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Description,
    Date,
    Length,
}

/// What a rule produces when its parser fails
#[derive(Debug, Clone, Copy)]
enum Fallback {
    /// A fixed value
    Literal(&'static str),
    /// The raw value, unmodified
    Passthrough,
}

/// One row of the coercion table
struct FieldRule {
    field: Field,
    parse: fn(&RawEpisode) -> Result<String, FieldError>,
    fallback: Fallback,
}

/// The complete set of field coercions applied to every record.
const FIELD_RULES: &[FieldRule] = &[
    FieldRule {
        field: Field::Title,
        parse: parse_title,
        fallback: Fallback::Literal(PLACEHOLDER_TITLE),
    },
    FieldRule {
        field: Field::Description,
        parse: parse_description,
        fallback: Fallback::Literal(""),
    },
    FieldRule {
        field: Field::Date,
        parse: parse_date,
        fallback: Fallback::Passthrough,
    },
    FieldRule {
        field: Field::Length,
        parse: parse_length,
        fallback: Fallback::Literal(DEFAULT_LENGTH),
    },
];

/// Output of the coercion table for one record
#[derive(Debug, Default)]
struct CoercedFields {
    title: String,
    description: String,
    date: String,
    length: String,
}

impl CoercedFields {
    fn slot(&mut self, field: Field) -> &mut String {
        match field {
            Field::Title => &mut self.title,
            Field::Description => &mut self.description,
            Field::Date => &mut self.date,
            Field::Length => &mut self.length,
        }
    }
}

fn parse_title(raw: &RawEpisode) -> Result<String, FieldError> {
    raw.name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or(FieldError::Missing)
}

fn parse_description(raw: &RawEpisode) -> Result<String, FieldError> {
    Ok(raw
        .description
        .as_deref()
        .map(clean_description)
        .unwrap_or_default())
}

fn parse_date(raw: &RawEpisode) -> Result<String, FieldError> {
    let value = raw.release_date.as_deref().ok_or(FieldError::Missing)?;
    format_date(value)
}

fn parse_length(raw: &RawEpisode) -> Result<String, FieldError> {
    raw.duration_ms
        .map(format_duration)
        .ok_or(FieldError::Missing)
}

/// Raw value of a field, used by [`Fallback::Passthrough`]
fn raw_value(field: Field, raw: &RawEpisode) -> String {
    let value = match field {
        Field::Title => raw.name.as_deref(),
        Field::Description => raw.description.as_deref(),
        Field::Date => raw.release_date.as_deref(),
        Field::Length => None,
    };
    value.unwrap_or_default().to_string()
}

/// Applies every rule of [`FIELD_RULES`] to the record.
fn coerce_fields(raw: &RawEpisode) -> CoercedFields {
    let mut fields = CoercedFields::default();

    for rule in FIELD_RULES {
        let value = (rule.parse)(raw).unwrap_or_else(|error| {
            warn!(
                title = raw.display_title(),
                field = ?rule.field,
                error = %error,
                "substituting field value"
            );
            match rule.fallback {
                Fallback::Literal(value) => value.to_string(),
                Fallback::Passthrough => raw_value(rule.field, raw),
            }
        });
        *fields.slot(rule.field) = value;
    }

    fields
}

/// Converts a release timestamp to `DD-MM-YY`.
///
/// Accepts `YYYY-MM-DD` optionally followed by a `T` time part.
pub fn format_date(value: &str) -> Result<String, FieldError> {
    let date_part = value.split('T').next().unwrap_or_default();
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map(|date| date.format("%d-%m-%y").to_string())
        .map_err(|source| FieldError::InvalidDate {
            value: value.to_string(),
            source,
        })
}

/// Converts milliseconds to `M:SS`, or `H:MM:SS` from one hour on.
pub fn format_duration(duration_ms: u64) -> String {
    let total_seconds = duration_ms / 1000;
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;

    if minutes >= 60 {
        format!("{}:{:02}:{:02}", minutes / 60, minutes % 60, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

/// Rewrites every opening anchor tag to a bare `<a>`.
///
/// Without an href the converter emits only the link text.
fn strip_anchor_attributes(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(pos) = rest.find('<') {
        out.push_str(&rest[..pos]);
        let tag = &rest[pos..];
        let bytes = tag.as_bytes();
        let is_anchor = bytes.len() > 2
            && bytes[1].eq_ignore_ascii_case(&b'a')
            && bytes[2].is_ascii_whitespace();

        match tag.find('>') {
            Some(end) if is_anchor => {
                out.push_str("<a>");
                rest = &tag[end + 1..];
            }
            _ => {
                out.push('<');
                rest = &tag[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Strips HTML, collapses whitespace and truncates long descriptions.
///
/// Tags are removed and their inner text kept; link targets are dropped.
pub fn clean_description(description: &str) -> String {
    let text = nanohtml2text::html2text(&strip_anchor_attributes(description));
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() > MAX_DESCRIPTION_CHARS {
        let mut truncated: String = collapsed.chars().take(MAX_DESCRIPTION_CHARS - 3).collect();
        truncated.push_str("...");
        truncated
    } else {
        collapsed
    }
}

/// Legacy display path of a series, e.g. `data\Shalom Bayis_episodes.csv`.
pub fn display_path(series: &str) -> String {
    let display_name = series
        .split('-')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ");

    format!("data\\{}_episodes.csv", display_name)
}

/// Next free episode number after the existing episodes.
///
/// `None` once the highest stored number leaves no room for another.
pub fn next_episode_number(existing: &[Episode]) -> Option<u32> {
    existing
        .iter()
        .map(|e| e.episode_number)
        .max()
        .map_or(Some(1), |max| max.checked_add(1))
}

/// Formats raw catalog records into canonical episodes
#[derive(Debug, Clone)]
pub struct Formatter {
    embed_base_url: String,
}

impl Formatter {
    /// Creates a formatter generating embed URLs under `embed_base_url`.
    pub fn new(embed_base_url: impl Into<String>) -> Self {
        Self {
            embed_base_url: embed_base_url.into(),
        }
    }

    /// Formats a single record.
    ///
    /// Always returns an episode. A record without a usable identifier yields
    /// a placeholder whose embed URL has no key, which the updater refuses to
    /// persist.
    pub fn format_episode(&self, raw: &RawEpisode, series: &str, episode_number: u32) -> Episode {
        let fields = coerce_fields(raw);

        let Some(id) = raw.identity_key() else {
            warn!(
                series = %series,
                title = raw.display_title(),
                "record has no usable identifier"
            );
            return Episode {
                title: ERROR_TITLE.to_string(),
                description: format!(
                    "Error processing episode '{}': missing or invalid catalog id",
                    fields.title
                ),
                date: fields.date,
                length: fields.length,
                embed_url: episode::embed_url(&self.embed_base_url, ""),
                series: series.to_string(),
                episode_number,
                file_path: display_path(series),
                extra: Map::new(),
            };
        };

        Episode {
            title: fields.title,
            description: fields.description,
            date: fields.date,
            length: fields.length,
            embed_url: episode::embed_url(&self.embed_base_url, id),
            series: series.to_string(),
            episode_number,
            file_path: display_path(series),
            extra: Map::new(),
        }
    }

    /// Formats a batch of new records for a series.
    ///
    /// Records are numbered from the next free number after `existing`,
    /// newest release first. Every record consumes a number. Fails without
    /// formatting anything if the numbers would pass `u32::MAX`.
    pub fn format_batch(
        &self,
        raw_episodes: &[RawEpisode],
        series: &str,
        existing: &[Episode],
    ) -> Result<Vec<Episode>, FormatError> {
        if raw_episodes.is_empty() {
            return Ok(Vec::new());
        }

        let exhausted = || FormatError::NumbersExhausted {
            series: series.to_string(),
            highest: existing.iter().map(|e| e.episode_number).max().unwrap_or(0),
            count: raw_episodes.len(),
        };
        let start = next_episode_number(existing).ok_or_else(exhausted)?;
        let last = u32::try_from(raw_episodes.len() - 1)
            .ok()
            .and_then(|offset| start.checked_add(offset))
            .ok_or_else(exhausted)?;

        let mut sorted: Vec<&RawEpisode> = raw_episodes.iter().collect();
        sorted.sort_by(|a, b| {
            let a = a.release_date.as_deref().unwrap_or_default();
            let b = b.release_date.as_deref().unwrap_or_default();
            b.cmp(a)
        });

        Ok(sorted
            .into_iter()
            .zip(start..=last)
            .map(|(raw, number)| self.format_episode(raw, series, number))
            .collect())
    }
}

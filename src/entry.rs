use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;
use strum::{Display, EnumIter, EnumString};
use time::format_description::well_known::Rfc3339;
use thiserror::Error;
use time::{Date, OffsetDateTime};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Mood {
    Happy,
    Sad,
    Neutral,
    Excited,
    Anxious,
    Calm,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Weather {
    Sunny,
    Cloudy,
    Rainy,
    Snowy,
    Windy,
    Stormy,
}

/// One diary record as it is persisted, imported and exported.
///
/// Fields the crate does not know about are kept in `extra` so an import
/// followed by an export hands them back unchanged. Deserialising only
/// requires `id`, `date`, `title` and `content`; see [`DiaryEntry::try_from`].
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "Map<String, Value>")]
pub struct DiaryEntry {
    pub id: String,
    pub date: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub image_url: Option<String>,
    pub mood: Option<Mood>,
    pub weather: Option<Weather>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DiaryEntry {
    pub fn timestamp(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::parse(&self.date, &Rfc3339).ok()
    }

    /// Calendar day as written in the timestamp, ignoring its offset.
    pub fn day(&self) -> Option<Date> {
        self.timestamp().map(|ts| ts.date())
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|existing| existing == tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("entry is missing a usable `{0}`")]
pub struct MissingField(pub &'static str);

/// Accepts any object with non-empty `id`, `date` and `title` strings and a
/// non-null `content`. Nothing else is type-checked: non-string content is
/// kept as its JSON text, a tag string is split on commas, and a mood,
/// weather or image value the crate cannot represent stays in `extra` under
/// its original key.
impl TryFrom<Map<String, Value>> for DiaryEntry {
    type Error = MissingField;

    fn try_from(object: Map<String, Value>) -> Result<Self, Self::Error> {
        let mut id = None;
        let mut date = None;
        let mut title = None;
        let mut content = None;
        let mut tags = Vec::new();
        let mut image_url = None;
        let mut mood = None;
        let mut weather = None;
        let mut extra = Map::new();

        for (key, value) in object {
            let leftover = match key.as_str() {
                "id" => {
                    id = non_empty_text(value);
                    None
                }
                "date" => {
                    date = non_empty_text(value);
                    None
                }
                "title" => {
                    title = non_empty_text(value);
                    None
                }
                "content" => {
                    content = lenient_text(value);
                    None
                }
                "tags" => {
                    tags = lenient_tags(value);
                    None
                }
                "imageUrl" => match value {
                    Value::String(url) => {
                        image_url = Some(url);
                        None
                    }
                    other => Some(other).filter(|v| !v.is_null()),
                },
                "mood" => match parse_choice::<Mood>(&value) {
                    Some(parsed) => {
                        mood = Some(parsed);
                        None
                    }
                    None => Some(value).filter(|v| !v.is_null()),
                },
                "weather" => match parse_choice::<Weather>(&value) {
                    Some(parsed) => {
                        weather = Some(parsed);
                        None
                    }
                    None => Some(value).filter(|v| !v.is_null()),
                },
                _ => Some(value),
            };
            if let Some(value) = leftover {
                extra.insert(key, value);
            }
        }

        Ok(Self {
            id: id.ok_or(MissingField("id"))?,
            date: date.ok_or(MissingField("date"))?,
            title: title.ok_or(MissingField("title"))?,
            content: content.ok_or(MissingField("content"))?,
            tags,
            image_url,
            mood,
            weather,
            extra,
        })
    }
}

fn non_empty_text(value: Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text),
        _ => None,
    }
}

fn lenient_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

fn lenient_tags(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(tag) => Some(tag),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Value::String(raw) => parse_tag_string(&raw),
        _ => Vec::new(),
    }
}

fn parse_choice<T: FromStr>(value: &Value) -> Option<T> {
    value.as_str().and_then(|raw| T::from_str(raw.trim()).ok())
}

/// Input for a new entry. Tags arrive as the freeform comma-separated string
/// the user typed.
#[derive(Debug, Clone, Default)]
pub struct EntryDraft {
    pub title: String,
    pub content: String,
    pub tags: String,
    pub mood: Option<Mood>,
    pub weather: Option<Weather>,
    pub image_url: Option<String>,
}

impl EntryDraft {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = tags.into();
        self
    }

    pub fn with_mood(mut self, mood: Mood) -> Self {
        self.mood = Some(mood);
        self
    }

    pub fn with_weather(mut self, weather: Weather) -> Self {
        self.weather = Some(weather);
        self
    }

    pub(crate) fn into_entry(self, id: String, date: String) -> DiaryEntry {
        DiaryEntry {
            id,
            date,
            title: self.title.trim().to_string(),
            content: self.content,
            tags: parse_tag_string(&self.tags),
            image_url: self.image_url.filter(|url| !url.trim().is_empty()),
            mood: self.mood,
            weather: self.weather,
            extra: Map::new(),
        }
    }
}

/// Splits a comma-separated tag string into trimmed, non-empty, unique tags,
/// keeping first-seen order.
pub fn parse_tag_string(raw: &str) -> Vec<String> {
    normalize_tags(raw.split(','))
}

pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for tag in tags {
        let trimmed = tag.as_ref().trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            out.push(trimmed.to_string());
        }
    }
    out
}

pub fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn tag_string_is_trimmed_and_deduplicated() {
        let tags = parse_tag_string(" work, life ,, work,  ,travel");
        assert_eq!(tags, vec!["work", "life", "travel"]);
    }

    #[test]
    fn entry_round_trips_unknown_fields() -> anyhow::Result<()> {
        let raw = r#"{"id":"a","date":"2024-01-01T00:00:00Z","title":"T","content":"C","tags":["x"],"mood":"happy","pinned":true}"#;
        let entry: DiaryEntry = serde_json::from_str(raw)?;
        assert_eq!(entry.mood, Some(Mood::Happy));
        assert_eq!(entry.extra.get("pinned"), Some(&Value::Bool(true)));

        let back = serde_json::to_value(&entry)?;
        assert_eq!(back["pinned"], Value::Bool(true));
        assert!(back.get("imageUrl").is_none(), "unset optionals are omitted");
        Ok(())
    }

    #[test]
    fn missing_tags_default_to_empty() -> anyhow::Result<()> {
        let raw = r#"{"id":"a","date":"2024-01-01T00:00:00Z","title":"T","content":""}"#;
        let entry: DiaryEntry = serde_json::from_str(raw)?;
        assert!(entry.tags.is_empty());
        Ok(())
    }

    #[test]
    fn day_ignores_offset() -> anyhow::Result<()> {
        let entry = DiaryEntry {
            id: "a".into(),
            date: "2024-03-05T23:30:00-08:00".into(),
            title: "Late".into(),
            content: String::new(),
            tags: Vec::new(),
            image_url: None,
            mood: None,
            weather: None,
            extra: Map::new(),
        };
        assert_eq!(entry.day(), Some(time::macros::date!(2024 - 03 - 05)));
        Ok(())
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn unrepresentable_mood_and_weather_stay_in_extra() -> anyhow::Result<()> {
        let raw = json!({
            "id": "m", "date": "2024-01-01T00:00:00Z", "title": "T", "content": "C",
            "mood": "grateful", "weather": "foggy", "imageUrl": 7
        });
        let entry: DiaryEntry = serde_json::from_value(raw)?;
        assert_eq!(entry.mood, None);
        assert_eq!(entry.weather, None);
        assert_eq!(entry.image_url, None);

        let back = serde_json::to_value(&entry)?;
        assert_eq!(back["mood"], json!("grateful"));
        assert_eq!(back["weather"], json!("foggy"));
        assert_eq!(back["imageUrl"], json!(7));
        Ok(())
    }

    #[test]
    fn loose_tags_and_content_are_coerced() -> anyhow::Result<()> {
        let entry = DiaryEntry::try_from(object(json!({
            "id": "t", "date": "2024-01-01T00:00:00Z", "title": "T",
            "content": 42, "tags": "a, b", "mood": "Calm"
        })))?;
        assert_eq!(entry.content, "42");
        assert_eq!(entry.tags, vec!["a", "b"]);
        assert_eq!(entry.mood, Some(Mood::Calm));

        let entry = DiaryEntry::try_from(object(json!({
            "id": "u", "date": "2024-01-01T00:00:00Z", "title": "T",
            "content": "", "tags": ["x", 3, null, {"y": 1}]
        })))?;
        assert_eq!(entry.tags, vec!["x", "3"]);
        Ok(())
    }

    #[test]
    fn required_fields_are_still_required() {
        let base = json!({"id": "a", "date": "2024-01-01T00:00:00Z", "title": "T", "content": "C"});
        for (field, replacement) in [
            ("id", json!("")),
            ("date", json!(null)),
            ("title", json!(5)),
            ("content", json!(null)),
        ] {
            let mut map = object(base.clone());
            map.insert(field.to_string(), replacement);
            assert_matches!(DiaryEntry::try_from(map), Err(MissingField(name)) if name == field);
        }
    }

    #[test]
    fn mood_parses_case_insensitively() -> anyhow::Result<()> {
        assert_eq!(Mood::from_str("Calm")?, Mood::Calm);
        assert_eq!(Weather::from_str("STORMY")?, Weather::Stormy);
        assert_eq!(Mood::Anxious.to_string(), "anxious");
        Ok(())
    }
}

use indexmap::IndexMap;
use serde_json::Value;

use crate::entry::DiaryEntry;

#[derive(Debug, Default)]
pub(crate) struct Candidates {
    pub accepted: Vec<DiaryEntry>,
    pub rejected: usize,
}

/// Keeps the elements that look like entries. Later elements with the same id
/// replace earlier ones but keep the earlier position.
pub(crate) fn collect(input: &Value) -> Candidates {
    let Some(items) = input.as_array() else {
        tracing::warn!("import input is not an array, nothing to import");
        return Candidates {
            accepted: Vec::new(),
            rejected: usize::from(!input.is_null()),
        };
    };

    let mut by_id: IndexMap<String, DiaryEntry> = IndexMap::new();
    let mut rejected = 0;
    for (index, item) in items.iter().enumerate() {
        let Some(object) = item.as_object() else {
            tracing::warn!(index, "dropping import element that is not an object");
            rejected += 1;
            continue;
        };
        match DiaryEntry::try_from(object.clone()) {
            Ok(entry) => {
                by_id.insert(entry.id.clone(), entry);
            }
            Err(err) => {
                tracing::warn!(index, %err, "dropping import element");
                rejected += 1;
            }
        }
    }

    Candidates {
        accepted: by_id.into_values().collect(),
        rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drops_exactly_the_invalid_elements() {
        let input = json!([
            {"id": "a", "date": "2024-01-01T00:00:00Z", "title": "T", "content": "C", "tags": []},
            {"id": "b", "date": "2024-01-01T00:00:00Z", "content": "no title"},
            {"id": "", "date": "2024-01-01T00:00:00Z", "title": "T", "content": "C"},
            {"id": "c", "date": "2024-01-01T00:00:00Z", "title": "T"},
            {"id": "d", "date": "2024-01-01T00:00:00Z", "title": "T", "content": ""},
            "not an object",
        ]);
        let candidates = collect(&input);
        let ids: Vec<_> = candidates.accepted.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "d"]);
        assert_eq!(candidates.rejected, 4);
    }

    #[test]
    fn loosely_typed_fields_do_not_reject_an_element() {
        let input = json!([
            {"id": "m", "date": "2024-01-01T00:00:00Z", "title": "T", "content": "C", "mood": "grateful"},
            {"id": "w", "date": "2024-01-01T00:00:00Z", "title": "T", "content": "C", "weather": "foggy"},
            {"id": "t", "date": "2024-01-01T00:00:00Z", "title": "T", "content": "C", "tags": "a,b"},
            {"id": "n", "date": "2024-01-01T00:00:00Z", "title": "T", "content": 42},
        ]);
        let candidates = collect(&input);
        let ids: Vec<_> = candidates.accepted.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["m", "w", "t", "n"]);
        assert_eq!(candidates.rejected, 0);
        assert_eq!(candidates.accepted[0].extra.get("mood"), Some(&json!("grateful")));
        assert_eq!(candidates.accepted[2].tags, vec!["a", "b"]);
        assert_eq!(candidates.accepted[3].content, "42");
    }

    #[test]
    fn non_array_input_yields_nothing() {
        let candidates = collect(&json!({"id": "a"}));
        assert!(candidates.accepted.is_empty());
        assert_eq!(candidates.rejected, 1);
    }

    #[test]
    fn later_duplicates_win_in_import_order() {
        let input = json!([
            {"id": "a", "date": "2024-01-01T00:00:00Z", "title": "first", "content": ""},
            {"id": "b", "date": "2024-01-01T00:00:00Z", "title": "other", "content": ""},
            {"id": "a", "date": "2024-01-01T00:00:00Z", "title": "second", "content": ""},
        ]);
        let candidates = collect(&input);
        let titles: Vec<_> = candidates.accepted.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["second", "other"]);
    }
}

use crate::model::{is_truthy, DocumentSnapshot, UnitSource, Value, WorkUnit};
use std::path::PathBuf;
use tracing::debug;

/// File paths named by a `files` setting: a list of strings or a single string.
pub fn file_list(value: &Value) -> Vec<PathBuf> {
    match value {
        Value::String(s) if !s.is_empty() => vec![PathBuf::from(s)],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(PathBuf::from)
            .collect(),
        _ => Vec::new(),
    }
}

fn char_slice(text: &str, begin: usize, end: usize) -> &str {
    let byte_at = |chars: usize| {
        text.char_indices()
            .nth(chars)
            .map(|(i, _)| i)
            .unwrap_or(text.len())
    };
    &text[byte_at(begin)..byte_at(end)]
}

/// Split an invocation into work units.
///
/// With a `files` list (or a non-empty path) present, one unit per listed path that is
/// an existing file. Otherwise one unit per non-empty selection in document order, or a
/// single unit with the whole document when nothing is selected.
pub fn partition(files: Option<&Value>, document: &DocumentSnapshot) -> Vec<WorkUnit> {
    let files = files.filter(|v| {
        let listed = v.is_array() || is_truthy(v);
        if !listed {
            debug!(files = %v, "ignoring files setting that names no files");
        }
        listed
    });
    if let Some(files) = files {
        return file_list(files)
            .into_iter()
            .filter(|p| p.is_file())
            .enumerate()
            .map(|(i, path)| WorkUnit {
                ordinal: i + 1,
                source: UnitSource::File(path),
            })
            .collect();
    }

    let len = document.text.chars().count();
    let mut regions: Vec<(usize, usize)> = document
        .selections
        .iter()
        .map(|s| (s.begin().min(len), s.end().min(len)))
        .filter(|(b, e)| b < e)
        .collect();
    regions.sort_unstable();

    if regions.is_empty() {
        return vec![WorkUnit {
            ordinal: 1,
            source: UnitSource::Query(document.text.clone()),
        }];
    }

    regions
        .into_iter()
        .enumerate()
        .map(|(i, (b, e))| WorkUnit {
            ordinal: i + 1,
            source: UnitSource::Query(char_slice(&document.text, b, e).to_string()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Selection;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn doc(text: &str, selections: &[(usize, usize)]) -> DocumentSnapshot {
        DocumentSnapshot {
            text: text.to_string(),
            selections: selections.iter().map(|&(a, b)| Selection::new(a, b)).collect(),
        }
    }

    fn queries(units: &[WorkUnit]) -> Vec<(usize, String)> {
        units
            .iter()
            .map(|u| match &u.source {
                UnitSource::Query(q) => (u.ordinal, q.clone()),
                UnitSource::File(p) => panic!("unexpected file unit {}", p.display()),
            })
            .collect()
    }

    #[test]
    fn no_selection_means_whole_document() {
        let units = partition(None, &doc("select 1;\nselect 2;", &[(4, 4)]));
        assert_eq!(queries(&units), vec![(1, "select 1;\nselect 2;".to_string())]);
    }

    #[test]
    fn empty_document_still_yields_one_unit() {
        let units = partition(None, &doc("", &[]));
        assert_eq!(queries(&units), vec![(1, String::new())]);
    }

    #[test]
    fn one_unit_per_non_empty_selection_in_document_order() {
        let text = "select 1;\nselect 2;\nselect 3;";
        let units = partition(None, &doc(text, &[(20, 29), (0, 9), (12, 12), (19, 10)]));
        assert_eq!(
            queries(&units),
            vec![
                (1, "select 1;".to_string()),
                (2, "select 2;".to_string()),
                (3, "select 3;".to_string()),
            ]
        );
    }

    #[test]
    fn selections_use_character_offsets() {
        let units = partition(None, &doc("ÿé select 'ß';", &[(3, 14), (100, 200)]));
        assert_eq!(queries(&units), vec![(1, "select 'ß';".to_string())]);
    }

    #[test]
    fn existing_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.sql");
        let b = dir.path().join("b.sql");
        std::fs::write(&a, "select 1;").unwrap();
        std::fs::write(&b, "select 2;").unwrap();
        let missing = dir.path().join("missing.sql");
        let files = json!([a, missing, dir.path(), b]);

        let units = partition(Some(&files), &doc("ignored", &[(0, 3)]));
        assert_eq!(
            units,
            vec![
                WorkUnit {
                    ordinal: 1,
                    source: UnitSource::File(a)
                },
                WorkUnit {
                    ordinal: 2,
                    source: UnitSource::File(b)
                },
            ]
        );
    }

    #[test]
    fn empty_file_list_runs_nothing() {
        assert!(partition(Some(&json!([])), &doc("select 1", &[])).is_empty());
    }

    #[test]
    fn falsy_files_setting_falls_back_to_the_document() {
        for files in [json!(false), json!(null), json!("")] {
            let units = partition(Some(&files), &doc("select 1", &[]));
            assert_eq!(
                units,
                vec![WorkUnit {
                    ordinal: 1,
                    source: UnitSource::Query("select 1".into()),
                }]
            );
        }
    }

    #[test]
    fn file_list_accepts_a_single_path() {
        assert_eq!(file_list(&json!("x.sql")), vec![PathBuf::from("x.sql")]);
        assert!(file_list(&json!(3)).is_empty());
    }
}

//! Triple file reader.
//!
//! One triple per line: `head relation tail`, tab separated, or space separated
//! when tabs yield fewer than three fields. A trailing `.` field is accepted.

use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::GraphError;

use super::ids::IdRegistry;
use super::{GraphResult, Triple, TripleSet};

/// Split one line into its three labels, or `None` if the line is skipped.
pub fn parse_line(line: &str) -> Option<[String; 3]> {
    if line.len() <= 2 {
        return None;
    }
    let mut tokens: Vec<&str> = line.split('\t').collect();
    while tokens.last().is_some_and(|t| t.is_empty()) {
        tokens.pop();
    }
    if tokens.len() < 3 {
        tokens = line.split(' ').collect();
        while tokens.last().is_some_and(|t| t.is_empty()) {
            tokens.pop();
        }
    }
    match tokens.len() {
        3 => Some([tokens[0].to_string(), tokens[1].to_string(), tokens[2].to_string()]),
        4 if tokens[3] == "." => Some([tokens[0].to_string(), tokens[1].to_string(), tokens[2].to_string()]),
        5 => Some([
            tokens[0].replace(' ', "_"),
            tokens[1].replace(' ', "_"),
            tokens[2].replace(' ', "_"),
        ]),
        _ => {
            tracing::warn!(line, "could not parse triple line");
            None
        }
    }
}

/// Read a triple file into `set`, registering labels on the way.
///
/// Returns the number of new triples.
pub fn read_into(path: &Path, registry: &IdRegistry, set: &mut TripleSet) -> GraphResult<usize> {
    let read_err = |e| GraphError::Read {
        path: path.display().to_string(),
        source: e,
    };
    let file = std::fs::File::open(path).map_err(read_err)?;
    let reader = BufReader::new(file);

    let mut added = 0usize;
    for (n, line) in reader.lines().enumerate() {
        let line = line.map_err(read_err)?;
        if (n + 1) % 1_000_000 == 0 {
            tracing::debug!(lines = n + 1, path = %path.display(), "parsing triples");
        }
        let Some([h, r, t]) = parse_line(&line) else {
            continue;
        };
        let triple = Triple::new(registry.entity(&h), registry.relation(&r)?, registry.entity(&t));
        if set.insert(triple) {
            added += 1;
        }
    }
    tracing::info!(path = %path.display(), triples = added, "loaded triples");
    Ok(added)
}

/// Read a triple file into a fresh [`TripleSet`].
pub fn load_triples(path: &Path, registry: &IdRegistry) -> GraphResult<TripleSet> {
    let mut set = TripleSet::new();
    read_into(path, registry, &mut set)?;
    Ok(set)
}

/// Like [`load_triples`], but a missing file yields an empty set.
///
/// Validation and test splits are optional for some runs.
pub fn load_optional(path: &Path, registry: &IdRegistry) -> GraphResult<TripleSet> {
    if path.exists() {
        load_triples(path, registry)
    } else {
        tracing::warn!(path = %path.display(), "triple file not found, using an empty set");
        Ok(TripleSet::new())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn accepts_tabs_spaces_and_trailing_dot() {
        assert_eq!(
            parse_line("a\tr\tb"),
            Some(["a".to_string(), "r".to_string(), "b".to_string()])
        );
        assert_eq!(
            parse_line("a r b"),
            Some(["a".to_string(), "r".to_string(), "b".to_string()])
        );
        assert_eq!(
            parse_line("a\tr\tb\t."),
            Some(["a".to_string(), "r".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn skips_short_and_malformed_lines() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("ab"), None);
        assert_eq!(parse_line("a\tr\tb\tx"), None);
        assert_eq!(parse_line("a r"), None);
        assert_eq!(parse_line("a b c d e f"), None);
    }

    #[test]
    fn five_fields_join_words_with_underscores() {
        assert_eq!(
            parse_line("new york\tlocated in\tusa\tx\ty"),
            Some(["new_york".to_string(), "located_in".to_string(), "usa".to_string()])
        );
    }

    #[test]
    fn loads_and_deduplicates() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("train.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "a\tr\tb").unwrap();
        writeln!(f, "a\tr\tb").unwrap();
        writeln!(f).unwrap();
        writeln!(f, "b r c .").unwrap();
        drop(f);

        let reg = IdRegistry::new();
        let set = load_triples(&path, &reg).unwrap();
        assert_eq!(set.len(), 2);
        let r = reg.lookup_relation("r").unwrap();
        assert!(set.is_true(reg.entity("b"), r, reg.entity("c")));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let reg = IdRegistry::new();
        let err = load_triples(Path::new("/nonexistent/train.txt"), &reg).unwrap_err();
        assert!(matches!(err, GraphError::Read { .. }));
        assert!(load_optional(Path::new("/nonexistent/valid.txt"), &reg).unwrap().is_empty());
    }
}

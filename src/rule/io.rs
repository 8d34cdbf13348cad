//! Rule files: one rule per line.
//!
//! ```text
//! predicted<TAB>correct<TAB>confidence<TAB>head <= atom, atom, ...
//! ```
//!
//! Atoms are written `relation(left,right)`; single uppercase letters are
//! variables. The rule shape is recovered from the structure on reading.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::ApplyConfig;
use crate::error::RuleError;
use crate::graph::IdRegistry;

use super::{Atom, Body, Rule, RuleShape, RuleStats};

pub type RuleResult<T> = std::result::Result<T, RuleError>;

/// `relation(args)`: the relation runs to the first `(`, the arguments to the
/// final `)`. Constants may themselves contain parentheses and commas.
static RE_ATOM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*([^\s(),][^(]*)\((.*)\)\s*$").unwrap());

/// One line of a rule file.
pub fn format_rule(rule: &Rule, registry: &IdRegistry) -> String {
    let stats = rule.stats();
    format!(
        "{}\t{}\t{:?}\t{}",
        stats.predicted,
        stats.correctly_predicted,
        stats.confidence,
        rule.display(registry)
    )
}

/// Write rules, one per line.
pub fn write_rules<'a>(
    path: &Path,
    rules: impl IntoIterator<Item = &'a Rule>,
    registry: &IdRegistry,
) -> RuleResult<usize> {
    let write_err = |e| RuleError::Write {
        path: path.display().to_string(),
        source: e,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    let file = std::fs::File::create(path).map_err(write_err)?;
    let mut out = BufWriter::new(file);
    let mut written = 0;
    for rule in rules {
        writeln!(out, "{}", format_rule(rule, registry)).map_err(write_err)?;
        written += 1;
    }
    out.flush().map_err(write_err)?;
    Ok(written)
}

fn is_variable_label(term: &str) -> bool {
    let mut chars = term.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if c.is_ascii_uppercase())
}

/// Split `left,right`. Every written atom has a variable on at least one
/// side, which locates the separating comma even when the constant holds
/// commas of its own.
fn split_args(args: &str) -> Option<(&str, &str)> {
    let (left, right) = match args.split_once(',') {
        Some((left, right)) if is_variable_label(left) => (left, right),
        _ => match args.rsplit_once(',') {
            Some((left, right)) if is_variable_label(right) => (left, right),
            _ => {
                let mut depth = 0i32;
                let at = args.char_indices().find_map(|(i, c)| {
                    match c {
                        '(' => depth += 1,
                        ')' => depth -= 1,
                        ',' if depth == 0 => return Some(i),
                        _ => {}
                    }
                    None
                })?;
                (&args[..at], &args[at + 1..])
            }
        },
    };
    (!left.is_empty() && !right.is_empty()).then_some((left, right))
}

fn balanced(term: &str) -> bool {
    let mut depth = 0i32;
    for c in term.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return false;
        }
    }
    depth == 0
}

/// `(relation, left, right)` labels of one atom. With `strict`, constants
/// must have balanced parentheses.
fn atom_parts(text: &str, strict: bool) -> Option<(&str, &str, &str)> {
    let caps = RE_ATOM.captures(text)?;
    let relation = caps.get(1)?.as_str().trim_end();
    let (left, right) = split_args(caps.get(2)?.as_str())?;
    if strict && !(balanced(left) && balanced(right)) {
        return None;
    }
    Some((relation, left, right))
}

/// Split a body into atom texts. Atoms are joined by `, `, so every `), `
/// is a candidate boundary; the first split under which every piece is an
/// atom wins.
fn split_body(text: &str, strict: bool) -> Option<Vec<&str>> {
    if text.trim().is_empty() {
        return Some(Vec::new());
    }
    for (i, _) in text.match_indices(')') {
        let (atom, rest) = text.split_at(i + 1);
        if atom_parts(atom, strict).is_none() {
            continue;
        }
        if rest.trim().is_empty() {
            return Some(vec![atom]);
        }
        if let Some(rest) = rest.strip_prefix(',').filter(|r| !r.trim().is_empty()) {
            if let Some(mut atoms) = split_body(rest, strict) {
                atoms.insert(0, atom);
                return Some(atoms);
            }
        }
    }
    None
}

fn build_atom(text: &str, registry: &IdRegistry, line: &str) -> RuleResult<Atom> {
    let parse_err = || RuleError::Parse {
        line: line.to_string(),
    };
    let (relation, left, right) = atom_parts(text, true)
        .or_else(|| atom_parts(text, false))
        .ok_or_else(parse_err)?;
    let relation = registry.relation(relation).map_err(|_| parse_err())?;
    Ok(Atom::new(registry.term(left), relation, registry.term(right)))
}

fn parse_body(text: &str, registry: &IdRegistry, line: &str) -> RuleResult<Vec<Atom>> {
    let atoms = split_body(text, true)
        .or_else(|| split_body(text, false))
        .ok_or_else(|| RuleError::Parse {
            line: line.to_string(),
        })?;
    atoms.into_iter().map(|a| build_atom(a, registry, line)).collect()
}

/// Shape implied by the structure of a parsed rule.
fn infer_shape(head: &Atom, body: &Body) -> RuleShape {
    if body.is_empty() {
        RuleShape::Zero
    } else if head.left().is_variable() && head.right().is_variable() {
        RuleShape::Cyclic
    } else if body.last().is_some_and(|a| a.constant().is_some()) {
        RuleShape::AcyclicAnchored
    } else {
        RuleShape::AcyclicFree
    }
}

/// Parse one rule line.
pub fn parse_rule(line: &str, registry: &IdRegistry) -> RuleResult<Rule> {
    let parse_err = || RuleError::Parse {
        line: line.to_string(),
    };
    let mut fields = line.splitn(4, '\t');
    let (Some(predicted), Some(correct), Some(confidence), Some(text)) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(parse_err());
    };
    let predicted: u64 = predicted.trim().parse().map_err(|_| parse_err())?;
    let correct: u64 = correct.trim().parse().map_err(|_| parse_err())?;
    let confidence: f64 = confidence.trim().parse().map_err(|_| parse_err())?;

    let (head_text, body_text) = text.split_once(" <=").ok_or_else(parse_err)?;
    let head = build_atom(head_text, registry, line)?;
    let body = Body::new(parse_body(body_text, registry, line)?);
    let shape = infer_shape(&head, &body);

    Ok(Rule::new(head, body, shape).with_stats(RuleStats {
        predicted,
        correctly_predicted: correct,
        confidence,
    }))
}

/// Which rules a rule file contributes at prediction time.
#[derive(Debug, Clone)]
pub struct RuleFilter {
    pub min_confidence: f64,
    pub min_correct: u64,
    pub max_length: usize,
    pub cyclic: bool,
    pub acyclic_anchored: bool,
    pub acyclic_free: bool,
    pub zero: bool,
}

impl RuleFilter {
    pub fn from_config(config: &ApplyConfig) -> Self {
        Self {
            min_confidence: config.read_threshold_confidence,
            min_correct: u64::from(config.read_threshold_correct_predictions),
            max_length: config.read_threshold_max_length,
            cyclic: config.read_cyclic,
            acyclic_anchored: config.read_acyclic_anchored,
            acyclic_free: config.read_acyclic_free,
            zero: config.read_zero,
        }
    }

    /// Keep everything.
    pub fn all() -> Self {
        Self {
            min_confidence: 0.0,
            min_correct: 0,
            max_length: usize::MAX,
            cyclic: true,
            acyclic_anchored: true,
            acyclic_free: true,
            zero: true,
        }
    }

    pub fn accepts(&self, rule: &Rule) -> bool {
        let stats = rule.stats();
        let shape_on = match rule.shape() {
            RuleShape::Cyclic => self.cyclic,
            RuleShape::AcyclicAnchored => self.acyclic_anchored,
            RuleShape::AcyclicFree => self.acyclic_free,
            RuleShape::Zero => self.zero,
        };
        shape_on
            && stats.confidence >= self.min_confidence
            && stats.correctly_predicted >= self.min_correct
            && rule.len() <= self.max_length
    }
}

/// Read a rule file, keeping the rules `filter` accepts. Blank lines and `#`
/// comments are skipped; malformed lines are logged and skipped.
pub fn read_rules(path: &Path, registry: &IdRegistry, filter: &RuleFilter) -> RuleResult<Vec<Rule>> {
    let read_err = |e| RuleError::Read {
        path: path.display().to_string(),
        source: e,
    };
    let file = std::fs::File::open(path).map_err(read_err)?;
    let mut rules = Vec::new();
    let mut filtered = 0usize;
    let mut malformed = 0usize;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(read_err)?;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_rule(&line, registry) {
            Ok(rule) if filter.accepts(&rule) => rules.push(rule),
            Ok(_) => filtered += 1,
            Err(e) => {
                tracing::warn!(error = %e, "skipping rule line");
                malformed += 1;
            }
        }
    }
    tracing::info!(path = %path.display(), rules = rules.len(), filtered, malformed, "read rules");
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EntityId;

    #[test]
    fn lines_round_trip() {
        let reg = IdRegistry::new();
        let line = "10\t6\t0.6\tr1(X,Y) <= r2(X,A), r3(A,Y)";
        let rule = parse_rule(line, &reg).unwrap();
        assert_eq!(rule.shape(), RuleShape::Cyclic);
        assert_eq!(rule.stats().predicted, 10);
        assert_eq!(format_rule(&rule, &reg), line);
    }

    #[test]
    fn whole_number_confidence_keeps_its_decimal() {
        let reg = IdRegistry::new();
        let rule = parse_rule("3\t3\t1.0\tr(X,b) <= ", &reg).unwrap();
        assert_eq!(rule.shape(), RuleShape::Zero);
        assert_eq!(format_rule(&rule, &reg), "3\t3\t1.0\tr(X,b) <= ");
    }

    #[test]
    fn shapes_follow_structure() {
        let reg = IdRegistry::new();
        let anchored = parse_rule("4\t2\t0.5\tr(X,germany) <= s(X,berlin)", &reg).unwrap();
        assert_eq!(anchored.shape(), RuleShape::AcyclicAnchored);
        assert!(anchored.is_x_rule());
        assert_eq!(anchored.head_constant(), reg.lookup_entity("germany"));

        let free = parse_rule("4\t2\t0.5\tr(X,germany) <= s(X,A)", &reg).unwrap();
        assert_eq!(free.shape(), RuleShape::AcyclicFree);
        assert_eq!(free.body().atoms()[0].right(), EntityId::variable_for('A'));
    }

    #[test]
    fn malformed_lines_are_rejected() {
        let reg = IdRegistry::new();
        assert!(matches!(parse_rule("r(X,Y) <= s(X,Y)", &reg), Err(RuleError::Parse { .. })));
        assert!(parse_rule("1\t1\tnope\tr(X,Y) <= s(X,Y)", &reg).is_err());
        assert!(parse_rule("1\t1\t1.0\tno atoms here", &reg).is_err());
    }

    #[test]
    fn constants_may_hold_parentheses_and_commas() {
        let reg = IdRegistry::new();
        for line in [
            "5\t3\t0.6\tr(X,Georgia_(country)) <= ",
            "5\t3\t0.6\tr(X,georgia) <= s(X,Tbilisi_(city))",
            "5\t3\t0.6\tr(Washington,_D.C.,Y) <= s(Y,A), t(A,Paris,_Texas)",
            "5\t3\t0.6\tr(X,a_(b),_c) <= s(X,(x)), t(A,x)_y)",
        ] {
            let rule = parse_rule(line, &reg).unwrap();
            assert_eq!(format_rule(&rule, &reg), line);
        }

        let rule = parse_rule("5\t3\t0.6\tr(X,georgia) <= s(X,Tbilisi_(city))", &reg).unwrap();
        assert_eq!(rule.shape(), RuleShape::AcyclicAnchored);
        assert_eq!(rule.body().len(), 1);
        assert_eq!(rule.body().atoms()[0].right(), reg.lookup_entity("Tbilisi_(city)").unwrap());
        let head = parse_rule("5\t3\t0.6\tr(X,Georgia_(country)) <= ", &reg).unwrap();
        assert_eq!(head.head_constant(), reg.lookup_entity("Georgia_(country)"));

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rules");
        write_rules(&path, [&rule, &head], &reg).unwrap();
        assert_eq!(read_rules(&path, &reg, &RuleFilter::all()).unwrap(), vec![rule, head]);
    }

    #[test]
    fn leftover_body_text_is_an_error() {
        let reg = IdRegistry::new();
        assert!(parse_rule("5\t3\t0.6\tr(X,a) <= s(X,b) junk", &reg).is_err());
        assert!(parse_rule("5\t3\t0.6\tr(X,a) <= s(X,b), ", &reg).is_err());
    }

    #[test]
    fn file_round_trip_with_filter() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rules/rules-10");
        let reg = IdRegistry::new();
        let rules = vec![
            parse_rule("10\t9\t0.9\tr1(X,Y) <= r2(X,Y)", &reg).unwrap(),
            parse_rule("10\t1\t0.1\tr1(X,Y) <= r3(X,Y)", &reg).unwrap(),
            parse_rule("100\t50\t0.5\tr1(X,c) <= ", &reg).unwrap(),
        ];
        assert_eq!(write_rules(&path, &rules, &reg).unwrap(), 3);

        let all = read_rules(&path, &reg, &RuleFilter::all()).unwrap();
        assert_eq!(all, rules);

        let filter = RuleFilter {
            min_confidence: 0.2,
            zero: false,
            ..RuleFilter::all()
        };
        let kept = read_rules(&path, &reg, &filter).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].stats().correctly_predicted, 9);
    }

    #[test]
    fn comments_and_garbage_are_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rules");
        std::fs::write(
            &path,
            "# mined rules\n\n10\t9\t0.9\tr1(X,Y) <= r2(X,Y)\nnot a rule\n",
        )
        .unwrap();
        let reg = IdRegistry::new();
        let rules = read_rules(&path, &reg, &RuleFilter::all()).unwrap();
        assert_eq!(rules.len(), 1);
    }
}

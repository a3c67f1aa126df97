//! Deny-list rules: dangerous call patterns and global identifiers.

use crate::config::DenyRule;
use crate::validator::Violation;

const PATTERN_RULE: &str = "denied pattern";
const GLOBAL_RULE: &str = "denied global identifier";

/// Check `code` against the deny-list. Pattern hits come before global hits,
/// each ordered by line; a given entry is reported at most once per line.
pub fn check(code: &str, rule: &DenyRule) -> Vec<Violation> {
    if rule.is_empty() {
        return Vec::new();
    }

    let mut violations = scan(code, &rule.patterns, Boundary::Leading, PATTERN_RULE);
    violations.extend(scan(code, &rule.globals, Boundary::WholeWord, GLOBAL_RULE));
    violations
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    /// A pattern starting with an identifier character must not continue one
    Leading,
    /// Identifier characters may not touch the match on either side
    WholeWord,
}

fn scan(code: &str, entries: &[String], boundary: Boundary, rule: &str) -> Vec<Violation> {
    let mut hits = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        hits.extend(matches(code, entry, boundary).map(|start| (line_of(code, start), index)));
    }
    hits.sort_unstable();
    hits.dedup();

    hits.into_iter()
        .map(|(line, index)| Violation::new(entries[index].as_str(), rule, line))
        .collect()
}

fn line_of(code: &str, offset: usize) -> usize {
    code[..offset].matches('\n').count() + 1
}

fn is_ident(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Byte offsets where `needle` occurs in `code`.
///
/// A needle ending in `(` is a call: anything `skip_trivia` drops may sit
/// between the name and the parenthesis.
fn matches<'a>(
    code: &'a str,
    needle: &'a str,
    boundary: Boundary,
) -> impl Iterator<Item = usize> + 'a {
    let (stem, call) = match needle.strip_suffix('(') {
        Some(stem) if !stem.is_empty() => (stem, true),
        _ => (needle, false),
    };
    let starts_ident = stem.chars().next().is_some_and(is_ident);
    let ends_ident = stem.chars().next_back().is_some_and(is_ident);

    code.match_indices(stem).filter_map(move |(start, matched)| {
        let before = code[..start].chars().next_back();
        if starts_ident && before.is_some_and(is_ident) {
            return None;
        }

        let rest = &code[start + matched.len()..];
        let hit = if call {
            skip_trivia(rest).starts_with('(')
        } else {
            match boundary {
                Boundary::Leading => true,
                Boundary::WholeWord => !(ends_ident && rest.chars().next().is_some_and(is_ident)),
            }
        };
        hit.then_some(start)
    })
}

/// `rest` without leading whitespace, line continuations and block comments
fn skip_trivia(mut rest: &str) -> &str {
    loop {
        let trimmed = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '\\');
        match trimmed.strip_prefix("/*") {
            Some(comment) => rest = comment.find("*/").map_or("", |end| &comment[end + 2..]),
            None => return trimmed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(patterns: &[&str], globals: &[&str]) -> DenyRule {
        DenyRule {
            patterns: patterns.iter().map(|s| s.to_string()).collect(),
            globals: globals.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn empty_rule_reports_nothing() {
        assert!(check("eval(1)", &DenyRule::default()).is_empty());
    }

    #[test]
    fn pattern_matches_call() {
        let violations = check("x = 1\ny = eval('2')\n", &rule(&["eval("], &[]));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].construct, "eval(");
        assert_eq!(violations[0].line, 2);
        assert_eq!(violations[0].rule, PATTERN_RULE);
    }

    #[test]
    fn pattern_requires_leading_boundary() {
        let deny = rule(&["eval(", "open("], &[]);
        assert!(check("myeval(1)\nreopen(f)\n", &deny).is_empty());
        assert_eq!(check("obj.eval(1)", &deny).len(), 1);
        assert_eq!(check(" open('f')", &deny).len(), 1);
    }

    #[test]
    fn pattern_is_open_at_the_end() {
        let deny = rule(&["subprocess", "pcntl_"], &[]);
        assert_eq!(check("import subprocess.run", &deny).len(), 1);
        assert_eq!(check("pcntl_fork();", &deny).len(), 1);
    }

    #[test]
    fn pattern_starting_with_punctuation_has_no_boundary() {
        let deny = rule(&["`", "\"net\""], &[]);
        assert_eq!(check("x = `ls`", &deny).len(), 1);
        assert_eq!(check("import \"net\"", &deny).len(), 1);
    }

    #[test]
    fn global_is_whole_word() {
        let deny = rule(&[], &["process", "global"]);
        assert!(check("const processed = 1; globalize();", &deny).is_empty());
        assert!(check("const $process = 1; my_global = 2;", &deny).is_empty());

        let violations = check("process.exit(1)\nglobal.x = 1", &deny);
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].construct, "process");
        assert_eq!(violations[1].construct, "global");
        assert_eq!(violations[1].rule, GLOBAL_RULE);
    }

    #[test]
    fn reported_once_per_line() {
        let violations = check("eval(1); eval(2)\neval(3)", &rule(&["eval("], &[]));
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].line, 1);
        assert_eq!(violations[1].line, 2);
    }

    #[test]
    fn patterns_before_globals() {
        let violations = check("process\neval(1)", &rule(&["eval("], &["process"]));
        assert_eq!(violations[0].construct, "eval(");
        assert_eq!(violations[1].construct, "process");
    }

    #[test]
    fn later_occurrence_can_match_after_a_rejected_one() {
        // First hit is inside an identifier, second is a real call
        let violations = check("myeval(1) + eval(2)", &rule(&["eval("], &[]));
        assert_eq!(violations.len(), 1);
    }

    #[test]
    fn call_pattern_allows_space_before_paren() {
        let deny = rule(&["eval(", "exec(", "system(", "popen("], &[]);
        let violations = check("print(eval ('1+1'))\nexec\t('x')\n", &deny);
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].construct, "eval(");
        assert_eq!(violations[1].construct, "exec(");
        assert_eq!(violations[1].line, 2);

        let violations = check("int main(){ return system (\"ls\"); }", &deny);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].construct, "system(");
        assert_eq!(check("FILE *f = popen /* x */ (\"ls\", \"r\");", &deny).len(), 1);
    }

    #[test]
    fn call_pattern_split_across_lines() {
        let deny = rule(&["eval("], &[]);
        let violations = check("x = 1\ny = (eval\n    ('2'))\n", &deny);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].line, 2);

        assert_eq!(check("y = eval \\\n('2')", &deny).len(), 1);
    }

    #[test]
    fn call_pattern_needs_a_call() {
        let deny = rule(&["eval("], &[]);
        assert!(check("evaluate(1)\nmy_eval (2)\neval = 3\n", &deny).is_empty());
    }
}

#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn matches_never_panics(code in "\\PC*", needle in "\\PC+") {
            let _ = matches(&code, &needle, Boundary::Leading).count();
            let _ = matches(&code, &needle, Boundary::WholeWord).count();
        }

        #[test]
        fn identifier_suffix_never_matches_global(prefix in "[a-z_]{1,5}", word in "[a-z]{2,8}") {
            let line = format!("{prefix}{word} = 1");
            prop_assert_eq!(matches(&line, &word, Boundary::WholeWord).count(), 0);
        }
    }
}

//! Import allow-list rules, one per import syntax family.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::ImportRule;
use crate::validator::Violation;

static PY_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^import\s+(.+)$").expect("valid regex"));
static PY_FROM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^from\s+(\S+)\s+import\b").expect("valid regex"));

static C_INCLUDE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*#\s*include\b\s*(.*)$").expect("valid regex"));
static C_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^(?:<([^>]+)>|"([^"]+)")"#).expect("valid regex"));

static JAVA_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*import\s+(?:static\s+)?([\w.]+?)(?:\.\*)?\s*;").expect("valid regex")
});

/// Static module specifiers: `require('m')`, `require 'm'`, `from 'm'`,
/// `import 'm'` and `import('m')`
static REQUIRE_SPECIFIERS: LazyLock<[Regex; 5]> = LazyLock::new(|| {
    [
        r#"\brequire(?:_relative)?\s*\(\s*['"`]([^'"`]+)['"`]\s*\)"#,
        r#"\b(?:require|require_relative|load)\s+['"]([^'"]+)['"]"#,
        r#"\bfrom\s+['"]([^'"]+)['"]"#,
        r#"^\s*import\s+['"]([^'"]+)['"]"#,
        r#"\bimport\s*\(\s*['"`]([^'"`]+)['"`]\s*\)"#,
    ]
    .map(|pattern| Regex::new(pattern).expect("valid regex"))
});

/// `require(expr)` / `import(expr)` with a computed specifier
static DYNAMIC_REQUIRE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(require|import)\s*\(\s*([^'"`\s)][^)]*)\)"#).expect("valid regex")
});

/// Check every import in `code` against the allow-list
pub fn check(code: &str, rule: &ImportRule) -> Vec<Violation> {
    match rule {
        ImportRule::Modules(allowed) => check_modules(code, allowed),
        ImportRule::Headers(allowed) => check_headers(code, allowed),
        ImportRule::Packages(allowed) => check_packages(code, allowed),
        ImportRule::Requires(allowed) => check_requires(code, allowed),
        ImportRule::Unrestricted => Vec::new(),
    }
}

fn is_listed(allowed: &[String], name: &str) -> bool {
    allowed.iter().any(|a| a == name)
}

fn not_allowed(kind: &str, name: &str) -> String {
    format!("{kind} '{name}' is not in the allow-list")
}

fn check_modules(code: &str, allowed: &[String]) -> Vec<Violation> {
    let mut violations = Vec::new();

    for (index, line) in code.lines().enumerate() {
        let line_no = index + 1;
        if line.trim_start().starts_with('#') {
            continue;
        }

        for statement in line.split(';').map(str::trim) {
            let Some(imported) = clauses(statement).find_map(python_import) else {
                continue;
            };

            match imported {
                PythonImport::Relative(module) => violations.push(Violation::new(
                    module,
                    "relative imports are not allowed",
                    line_no,
                )),
                PythonImport::Modules(modules) => {
                    for module in modules.into_iter().filter(|m| !m.is_empty()) {
                        let root = module.split('.').next().unwrap_or(module);
                        if !is_listed(allowed, root) {
                            violations.push(Violation::new(
                                module,
                                not_allowed("module", root),
                                line_no,
                            ));
                        }
                    }
                }
            }
        }
    }

    violations
}

enum PythonImport<'a> {
    Modules(Vec<&'a str>),
    Relative(&'a str),
}

/// A statement, then every clause following a `:` in it, so the body of a
/// one-line compound statement (`if x: import os`, `try: import os`) is seen
fn clauses(statement: &str) -> impl Iterator<Item = &str> {
    std::iter::once(statement).chain(
        statement
            .match_indices(':')
            .map(move |(at, _)| statement[at + 1..].trim_start()),
    )
}

fn python_import(clause: &str) -> Option<PythonImport<'_>> {
    if let Some(caps) = PY_IMPORT.captures(clause) {
        let names = caps.get(1).map_or("", |m| m.as_str());
        let modules = names
            .split(',')
            // `a.b as c` imports `a.b`
            .filter_map(|item| item.split_whitespace().next())
            .map(|module| module.trim_matches(|c| c == '(' || c == ')'))
            .collect();
        return Some(PythonImport::Modules(modules));
    }

    let caps = PY_FROM.captures(clause)?;
    let module = caps.get(1).map_or("", |m| m.as_str());
    if module.starts_with('.') {
        Some(PythonImport::Relative(module))
    } else {
        Some(PythonImport::Modules(vec![module]))
    }
}

fn check_headers(code: &str, allowed: &[String]) -> Vec<Violation> {
    let mut violations = Vec::new();

    for (index, line) in code.lines().enumerate() {
        let Some(caps) = C_INCLUDE.captures(line) else {
            continue;
        };
        let target = caps[1].trim();

        match C_HEADER.captures(target) {
            Some(header) => {
                let name = header
                    .get(1)
                    .or_else(|| header.get(2))
                    .map_or("", |m| m.as_str().trim());
                if !is_listed(allowed, name) {
                    violations.push(Violation::new(
                        name,
                        not_allowed("header", name),
                        index + 1,
                    ));
                }
            }
            None => violations.push(Violation::new(
                target,
                "computed includes are not allowed",
                index + 1,
            )),
        }
    }

    violations
}

fn check_packages(code: &str, allowed: &[String]) -> Vec<Violation> {
    let mut violations = Vec::new();

    for (index, line) in code.lines().enumerate() {
        let Some(caps) = JAVA_IMPORT.captures(line) else {
            continue;
        };
        let path = &caps[1];

        let permitted = allowed.iter().any(|package| {
            path == package
                || path
                    .strip_prefix(package.as_str())
                    .is_some_and(|rest| rest.starts_with('.'))
        });
        if !permitted {
            violations.push(Violation::new(
                path,
                format!("package '{path}' is outside the allowed packages"),
                index + 1,
            ));
        }
    }

    violations
}

fn check_requires(code: &str, allowed: &[String]) -> Vec<Violation> {
    let mut violations = Vec::new();

    for (index, line) in code.lines().enumerate() {
        let line_no = index + 1;
        let mut seen: Vec<&str> = Vec::new();

        for regex in REQUIRE_SPECIFIERS.iter() {
            for caps in regex.captures_iter(line) {
                let Some(specifier) = caps.get(1).map(|m| m.as_str()) else {
                    continue;
                };
                let module = specifier.strip_prefix("node:").unwrap_or(specifier);
                if seen.contains(&module) {
                    continue;
                }
                seen.push(module);

                if !is_listed(allowed, module) {
                    violations.push(Violation::new(
                        module,
                        not_allowed("module", module),
                        line_no,
                    ));
                }
            }
        }

        for caps in DYNAMIC_REQUIRE.captures_iter(line) {
            violations.push(Violation::new(
                format!("{}({})", &caps[1], caps[2].trim()),
                "computed module specifiers are not allowed",
                line_no,
            ));
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn constructs(violations: &[Violation]) -> Vec<&str> {
        violations.iter().map(|v| v.construct.as_str()).collect()
    }

    #[test]
    fn unrestricted_never_reports() {
        assert!(check("import os\n#include <x>", &ImportRule::Unrestricted).is_empty());
    }

    #[test]
    fn python_allowed_imports() {
        let rule = ImportRule::Modules(allow(&["math", "collections"]));
        let code = "import math\nfrom collections import deque\nimport collections.abc as abc\n";
        assert!(check(code, &rule).is_empty());
    }

    #[test]
    fn python_multiple_imports_on_one_line() {
        let rule = ImportRule::Modules(allow(&["math"]));
        let violations = check("import math, os.path as p, sys", &rule);
        assert_eq!(constructs(&violations), vec!["os.path", "sys"]);
        assert!(violations[0].rule.contains("'os'"));
    }

    #[test]
    fn python_statements_split_on_semicolons() {
        let rule = ImportRule::Modules(allow(&["math"]));
        let violations = check("x = 1; import socket; from math import pi", &rule);
        assert_eq!(constructs(&violations), vec!["socket"]);
        assert_eq!(violations[0].line, 1);
    }

    #[test]
    fn python_relative_import_rejected() {
        let rule = ImportRule::Modules(allow(&["math"]));
        let violations = check("from . import secrets\nfrom ..pkg import x", &rule);
        assert_eq!(constructs(&violations), vec![".", "..pkg"]);
        assert_eq!(violations[1].line, 2);
    }

    #[test]
    fn python_indented_import_is_checked() {
        let rule = ImportRule::Modules(allow(&["math"]));
        let violations = check("def f():\n    import os\n", &rule);
        assert_eq!(constructs(&violations), vec!["os"]);
        assert_eq!(violations[0].line, 2);
    }

    #[test]
    fn python_compound_statement_imports_are_checked() {
        let rule = ImportRule::Modules(allow(&["math"]));
        for code in [
            "if True: import os",
            "try: import os\nexcept Exception: pass",
            "def f(): import os",
            "class C: import os",
            "while True: from os import path",
            "with ctx() as c: import os.path",
            "else:import os",
        ] {
            let violations = check(code, &rule);
            assert_eq!(violations.len(), 1, "{code}");
            assert!(violations[0].construct.starts_with("os"), "{code}");
            assert_eq!(violations[0].line, 1);
        }

        assert!(check("if x: import math", &rule).is_empty());
        assert!(check("d = {'a': 1}\nif x: y = d['a']", &rule).is_empty());
    }

    #[test]
    fn python_compound_statement_relative_import() {
        let rule = ImportRule::Modules(allow(&["math"]));
        let violations = check("if True: from . import secrets", &rule);
        assert_eq!(constructs(&violations), vec!["."]);
    }

    #[test]
    fn python_comments_are_skipped() {
        let rule = ImportRule::Modules(allow(&[]));
        assert!(check("# import os\n", &rule).is_empty());
    }

    #[test]
    fn python_identifier_starting_with_import_is_ignored() {
        let rule = ImportRule::Modules(allow(&[]));
        assert!(check("imported = 3\nfromage = 1\n", &rule).is_empty());
    }

    #[test]
    fn c_headers() {
        let rule = ImportRule::Headers(allow(&["stdio.h", "bits/stdc++.h"]));
        let code = "#include <stdio.h>\n#include <bits/stdc++.h>\n# include \"unistd.h\"\n#include <sys/socket.h>\n";
        let violations = check(code, &rule);
        assert_eq!(constructs(&violations), vec!["unistd.h", "sys/socket.h"]);
        assert_eq!(violations[0].line, 3);
        assert_eq!(violations[1].line, 4);
    }

    #[test]
    fn c_computed_include_rejected() {
        let rule = ImportRule::Headers(allow(&["stdio.h"]));
        let violations = check("#define H <unistd.h>\n#include H\n", &rule);
        assert_eq!(constructs(&violations), vec!["H"]);
    }

    #[test]
    fn java_packages_prefix_match() {
        let rule = ImportRule::Packages(allow(&["java.util"]));
        let code = "import java.util.Scanner;\nimport java.util.*;\nimport static java.util.Arrays.sort;\nimport java.utility.Foo;\nimport java.io.File;\n";
        let violations = check(code, &rule);
        assert_eq!(constructs(&violations), vec!["java.utility.Foo", "java.io.File"]);
        assert_eq!(violations[0].line, 4);
    }

    #[test]
    fn java_wildcard_of_forbidden_package() {
        let rule = ImportRule::Packages(allow(&["java.util"]));
        let violations = check("import java.io.*;", &rule);
        assert_eq!(constructs(&violations), vec!["java.io"]);
    }

    #[test]
    fn requires_commonjs_and_es_modules() {
        let rule = ImportRule::Requires(allow(&["util", "events"]));
        let code = "const util = require('util');\nconst fs = require(\"node:fs\");\nimport { EventEmitter } from 'events';\nimport net from \"net\";\nimport 'http';\nconst cp = await import('child_process');\n";
        let violations = check(code, &rule);
        assert_eq!(
            constructs(&violations),
            vec!["fs", "net", "http", "child_process"]
        );
    }

    #[test]
    fn requires_node_prefix_is_stripped() {
        let rule = ImportRule::Requires(allow(&["util"]));
        assert!(check("const u = require('node:util');", &rule).is_empty());
    }

    #[test]
    fn requires_ruby_forms() {
        let rule = ImportRule::Requires(allow(&["set", "json"]));
        let code = "require 'set'\nrequire \"json\"\nrequire 'socket'\nrequire_relative 'helper'\nload 'other.rb'\n";
        let violations = check(code, &rule);
        assert_eq!(constructs(&violations), vec!["socket", "helper", "other.rb"]);
    }

    #[test]
    fn requires_dynamic_specifier_rejected() {
        let rule = ImportRule::Requires(allow(&["util"]));
        let violations = check("const m = require(name);\nconst n = await import(path);\n", &rule);
        assert_eq!(constructs(&violations), vec!["require(name)", "import(path)"]);
        assert!(violations[0].rule.contains("computed"));
        assert_eq!(violations[1].line, 2);
    }

    #[test]
    fn requires_reported_once_per_line() {
        let rule = ImportRule::Requires(allow(&[]));
        let violations = check("require('fs'); require('fs');", &rule);
        assert_eq!(violations.len(), 1);
    }
}

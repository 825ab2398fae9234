//! Shell-style pattern matching for deployment paths.
//!
//! Patterns follow `fnmatch` semantics rather than path-aware globbing:
//!
//! - `*` matches any run of characters, including `/`
//! - `?` matches exactly one character
//! - `[...]` and `[!...]` match character classes
//!
//! Matching is case-sensitive and no path normalization is performed, so
//! callers must supply paths in walker form (`./sub/dir/file.py`).

use glob::{MatchOptions, Pattern};

/// Options that give `glob::Pattern` the `fnmatch` behaviour.
const FNMATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// An ordered set of compiled shell-glob patterns.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<CompiledPattern>,
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    source: String,
    pattern: Pattern,
}

impl PatternSet {
    /// Compile `patterns`, keeping their order.
    ///
    /// An unclosed `[` stands for a literal bracket, as in `fnmatch`; the
    /// rest of the pattern keeps its wildcards.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns = patterns
            .into_iter()
            .map(|source| CompiledPattern::compile(source.into()))
            .collect();
        Self { patterns }
    }

    /// Returns `true` if `path` matches at least one pattern.
    ///
    /// Patterns are evaluated left to right and evaluation stops at the first
    /// match.
    pub fn matches(&self, path: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| p.pattern.matches_with(path, FNMATCH_OPTIONS))
    }

    /// Source text of the pattern that matches `path` first, if any.
    pub fn first_match(&self, path: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|p| p.pattern.matches_with(path, FNMATCH_OPTIONS))
            .map(|p| p.source.as_str())
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Iterate over the pattern sources in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|p| p.source.as_str())
    }
}

impl CompiledPattern {
    fn compile(source: String) -> Self {
        let normalized = collapse_stars(&source);
        let pattern = Pattern::new(&normalized)
            .or_else(|_| Pattern::new(&escape_unclosed_brackets(&normalized)))
            .unwrap_or_else(|_| literal_pattern(&source));
        Self { source, pattern }
    }
}

/// `fnmatch` treats `**` like `*`, while `glob` rejects `**` that is not a
/// whole path component.
fn collapse_stars(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut previous_star = false;
    for c in pattern.chars() {
        if c == '*' {
            if !previous_star {
                out.push(c);
            }
            previous_star = true;
        } else {
            out.push(c);
            previous_star = false;
        }
    }
    out
}

/// `fnmatch` reads a `[` without a closing `]` as a literal bracket, while
/// `glob` rejects the whole pattern. Rewrite each such `[` as the class `[[]`
/// and leave the rest of the pattern untouched.
fn escape_unclosed_brackets(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '[' {
            out.push(chars[i]);
            i += 1;
            continue;
        }

        // A `]` right after `[` or `[!` belongs to the class.
        let mut j = i + 1;
        if j < chars.len() && chars[j] == '!' {
            j += 1;
        }
        if j < chars.len() && chars[j] == ']' {
            j += 1;
        }

        match chars[j..].iter().position(|&c| c == ']') {
            Some(offset) => {
                let end = j + offset;
                out.extend(&chars[i..=end]);
                i = end + 1;
            }
            None => {
                out.push_str("[[]");
                i += 1;
            }
        }
    }
    out
}

fn literal_pattern(source: &str) -> Pattern {
    // Escaped text is always a valid pattern.
    Pattern::new(&Pattern::escape(source)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    mod wildcards {
        use super::*;

        #[test]
        fn test_star_matches_extension() {
            let set = PatternSet::new(["*.py"]);
            assert!(set.matches("./app/main.py"));
            assert!(!set.matches("./app/notes.txt"));
        }

        #[test]
        fn test_star_crosses_separators() {
            let set = PatternSet::new(["*/.*"]);
            assert!(set.matches("./.ignore"));
            assert!(set.matches("./app/.cache/tmp"));
            assert!(set.matches("./sub/.hidden"));
            assert!(!set.matches("./app/main.py"));
        }

        #[test]
        fn test_question_mark_matches_single_char() {
            let set = PatternSet::new(["./file?.txt"]);
            assert!(set.matches("./file1.txt"));
            assert!(!set.matches("./file10.txt"));
        }

        #[test]
        fn test_character_class() {
            let set = PatternSet::new(["./[ab].txt"]);
            assert!(set.matches("./a.txt"));
            assert!(set.matches("./b.txt"));
            assert!(!set.matches("./c.txt"));
        }

        #[test]
        fn test_negated_character_class() {
            let set = PatternSet::new(["./[!ab].txt"]);
            assert!(set.matches("./c.txt"));
            assert!(!set.matches("./a.txt"));
        }

        #[test]
        fn test_double_star_behaves_like_single_star() {
            let set = PatternSet::new(["./**.pyc"]);
            assert!(set.matches("./pkg/module.pyc"));
        }

        #[test]
        fn test_matching_is_case_sensitive() {
            let set = PatternSet::new(["*.py"]);
            assert!(!set.matches("./MAIN.PY"));
        }
    }

    mod literal_fallback {
        use super::*;

        #[test]
        fn test_exact_path_pattern() {
            let set = PatternSet::new(["./deploy.py"]);
            assert!(set.matches("./deploy.py"));
            assert!(!set.matches("./app/deploy.py"));
        }

        #[test]
        fn test_unclosed_bracket_is_literal() {
            let set = PatternSet::new(["./weird[name"]);
            assert!(set.matches("./weird[name"));
            assert!(!set.matches("./weirdname"));
        }

        #[test]
        fn test_unclosed_bracket_keeps_wildcards() {
            let set = PatternSet::new(["*[1/*.log"]);
            assert!(set.matches("./build[1/out.log"));
            assert!(set.matches("./a/b[1/c/d.log"));
            assert!(!set.matches("./build1/out.log"));
        }

        #[test]
        fn test_unclosed_bracket_next_to_valid_class() {
            let set = PatternSet::new(["./[ab]-[x*"]);
            assert!(set.matches("./a-[xyz"));
            assert!(set.matches("./b-[x"));
            assert!(!set.matches("./c-[x"));
        }

        #[test]
        fn test_empty_pattern_matches_only_empty_path() {
            let set = PatternSet::new([""]);
            assert!(set.matches(""));
            assert!(!set.matches("./a.txt"));
        }
    }

    mod set_semantics {
        use super::*;

        #[test]
        fn test_empty_set_matches_nothing() {
            let set = PatternSet::new(Vec::<String>::new());
            assert!(set.is_empty());
            assert!(!set.matches("./a.txt"));
        }

        #[test]
        fn test_order_does_not_change_result() {
            let paths = ["./a.py", "./b.sh", "./c.txt", "./.env", "./d/e.sh"];
            let forward = PatternSet::new(["*.py", "*.sh", "*/.*"]);
            let reverse = PatternSet::new(["*/.*", "*.sh", "*.py"]);
            for path in paths {
                assert_eq!(forward.matches(path), reverse.matches(path), "{path}");
            }
        }

        #[test]
        fn test_first_match_reports_leftmost_pattern() {
            let set = PatternSet::new(["*.txt", "./a*", "*"]);
            assert_eq!(set.first_match("./a.txt"), Some("*.txt"));
            assert_eq!(set.first_match("./a.md"), Some("./a*"));
            assert_eq!(set.first_match("./b.md"), Some("*"));
        }

        #[test]
        fn test_iter_preserves_order() {
            let set = PatternSet::new(["b", "a", "c"]);
            let sources: Vec<_> = set.iter().collect();
            assert_eq!(sources, vec!["b", "a", "c"]);
            assert_eq!(set.len(), 3);
        }
    }

    #[test]
    fn test_collapse_stars() {
        assert_eq!(collapse_stars("a**b***c"), "a*b*c");
        assert_eq!(collapse_stars("*.py"), "*.py");
    }

    #[test]
    fn test_escape_unclosed_brackets() {
        assert_eq!(escape_unclosed_brackets("*[1/*.log"), "*[[]1/*.log");
        assert_eq!(escape_unclosed_brackets("[ab]"), "[ab]");
        assert_eq!(escape_unclosed_brackets("[]x]"), "[]x]");
        assert_eq!(escape_unclosed_brackets("[!]"), "[[]!]");
        assert_eq!(escape_unclosed_brackets("a["), "a[[]");
    }
}

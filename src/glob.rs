use regex::Regex;

/// Whether a class name pattern contains wildcards and needs a matcher.
pub(crate) fn is_glob(pattern: &str) -> bool {
    pattern.contains('*')
}

/// Full-string matcher over dotted binary class names.
///
/// A single `*` matches within one package segment, `**` matches across segments,
/// and a trailing `.**` also matches the bare prefix (`java.**` matches `java`).
#[derive(Clone, Debug, Default)]
pub(crate) struct GlobMatcher {
    regex: Option<Regex>,
}

impl GlobMatcher {
    pub(crate) fn new<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let alternatives: Vec<String> = patterns
            .into_iter()
            .map(|pattern| glob_to_regex(pattern.as_ref()))
            .collect();
        if alternatives.is_empty() {
            return Ok(Self { regex: None });
        }
        let regex = Regex::new(&format!("^(?:{})$", alternatives.join("|")))?;
        Ok(Self { regex: Some(regex) })
    }

    pub(crate) fn is_match(&self, name: &str) -> bool {
        self.regex
            .as_ref()
            .map(|regex| regex.is_match(name))
            .unwrap_or(false)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.regex.is_none()
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut i = 0;
    while i < chars.len() {
        let rest = &chars[i..];
        if rest.starts_with(&['.', '*', '*']) {
            out.push_str(r"(?:\..*)?");
            i += 3;
        } else if rest.starts_with(&['*', '*']) {
            out.push_str(".*");
            i += 2;
        } else if rest[0] == '*' {
            out.push_str("[^.]*");
            i += 1;
        } else {
            out.push_str(&regex::escape(rest[0].encode_utf8(&mut [0; 4])));
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glob(pattern: &str) -> GlobMatcher {
        GlobMatcher::new([pattern]).expect("compile glob")
    }

    #[test]
    fn classifies_wildcard_patterns() {
        assert!(!is_glob("java.lang.String"));
        assert!(!is_glob("java.util.Map$Entry"));
        assert!(is_glob("java.lang.*"));
        assert!(is_glob("java.**"));
        assert!(is_glob("*"));
    }

    #[test]
    fn single_star_stays_within_segment() {
        let matcher = glob("a.b.c.*");
        assert!(matcher.is_match("a.b.c.d"));
        assert!(matcher.is_match("a.b.c.def"));
        assert!(!matcher.is_match("a.b.c"));
        assert!(!matcher.is_match("a.b.c.d.e"));
    }

    #[test]
    fn double_star_crosses_segments() {
        let matcher = glob("a.b.c.**");
        assert!(matcher.is_match("a.b.c"));
        assert!(matcher.is_match("a.b.c.d"));
        assert!(matcher.is_match("a.b.c.def"));
        assert!(matcher.is_match("a.b.c.d.e"));
        assert!(!matcher.is_match("a.b.cd"));
    }

    #[test]
    fn matching_is_anchored_and_literal() {
        let matcher = glob("java.lang.Str*");
        assert!(matcher.is_match("java.lang.String"));
        assert!(!matcher.is_match("xjava.lang.String"));
        assert!(!matcher.is_match("javaxlang.String"));

        let inner = glob("java.util.Map$*");
        assert!(inner.is_match("java.util.Map$Entry"));
    }

    #[test]
    fn multiple_patterns_are_alternatives() {
        let matcher = GlobMatcher::new(["java.**", "org.w3c.dom.**"]).expect("compile");
        assert!(matcher.is_match("java.lang.Object"));
        assert!(matcher.is_match("org.w3c.dom.Node"));
        assert!(!matcher.is_match("sun.misc.Unsafe"));
    }

    #[test]
    fn empty_matcher_matches_nothing() {
        let matcher = GlobMatcher::new(Vec::<String>::new()).expect("compile");
        assert!(matcher.is_empty());
        assert!(!matcher.is_match(""));
    }
}

//! Glob patterns in the dialect Redis uses for `KEYS` and `SCAN MATCH`.
//!
//! - `*` any run of bytes (including none)
//! - `?` exactly one byte
//! - `[abc]`, `[a-z]`, `[^a]` byte classes
//! - `\x` the literal byte `x`

/// A compiled glob pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    pattern: Vec<u8>,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.as_bytes().to_vec(),
        }
    }

    /// Matches the whole of `text` against the pattern.
    pub fn matches(&self, text: &str) -> bool {
        let (p, t) = (&self.pattern[..], text.as_bytes());
        let (mut pi, mut ti) = (0, 0);
        // Position to resume from after the most recent `*`
        let mut star: Option<(usize, usize)> = None;

        while ti < t.len() {
            let step = match p.get(pi) {
                Some(b'*') => {
                    star = Some((pi, ti));
                    pi += 1;
                    continue;
                }
                Some(b'?') => Some(1),
                Some(b'[') => match_class(&p[pi..], t[ti]),
                Some(b'\\') if pi + 1 < p.len() => (p[pi + 1] == t[ti]).then_some(2),
                Some(&c) => (c == t[ti]).then_some(1),
                None => None,
            };

            match (step, star) {
                (Some(width), _) => {
                    pi += width;
                    ti += 1;
                }
                (None, Some((star_pi, star_ti))) => {
                    pi = star_pi + 1;
                    ti = star_ti + 1;
                    star = Some((star_pi, star_ti + 1));
                }
                (None, None) => return false,
            }
        }

        p[pi..].iter().all(|&c| c == b'*')
    }
}

/// Matches one byte against the class at the start of `class`.
///
/// Returns the width of the class in the pattern on success.
fn match_class(class: &[u8], byte: u8) -> Option<usize> {
    let mut i = 1;
    let negate = class.get(1) == Some(&b'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < class.len() && class[i] != b']' {
        if i + 2 < class.len() && class[i + 1] == b'-' && class[i + 2] != b']' {
            if (class[i]..=class[i + 2]).contains(&byte) {
                matched = true;
            }
            i += 3;
        } else {
            if class[i] == byte {
                matched = true;
            }
            i += 1;
        }
    }

    // Unterminated class never matches
    if i >= class.len() || matched == negate {
        return None;
    }
    Some(i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcards() {
        let pattern = GlobPattern::new("h*llo");
        assert!(pattern.matches("hello"));
        assert!(pattern.matches("hllo"));
        assert!(pattern.matches("heeeello"));
        assert!(!pattern.matches("world"));

        let pattern = GlobPattern::new("h?llo");
        assert!(pattern.matches("hallo"));
        assert!(!pattern.matches("hllo"));

        let pattern = GlobPattern::new("*");
        assert!(pattern.matches(""));
        assert!(pattern.matches("anything"));
    }

    #[test]
    fn test_classes() {
        let pattern = GlobPattern::new("h[ae]llo");
        assert!(pattern.matches("hello"));
        assert!(!pattern.matches("hillo"));

        let pattern = GlobPattern::new("key[0-9]");
        assert!(pattern.matches("key7"));
        assert!(!pattern.matches("keyx"));

        let pattern = GlobPattern::new("[^a]b");
        assert!(pattern.matches("cb"));
        assert!(!pattern.matches("ab"));
    }

    #[test]
    fn test_backtracking() {
        let pattern = GlobPattern::new("PathDict|*|k*");
        assert!(pattern.matches("PathDict|users/1|key"));
        assert!(pattern.matches("PathDict|a|b|kk"));
        assert!(!pattern.matches("PathDict|a|b"));
    }
}

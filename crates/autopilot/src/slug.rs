//! Slug rules from spec §6: lowercase, spaces to underscore, strip
//! everything outside `[a-z0-9_-]`, collapse separator runs, strip
//! leading/trailing separators, truncate to 30 chars, empty -> "unknown".

const MAX_LEN: usize = 30;

pub fn slugify(input: &str) -> String {
    let lower = input.trim().to_lowercase();
    let mut out = String::with_capacity(lower.len());
    let mut last_was_sep = false;

    for ch in lower.chars() {
        let mapped = if ch.is_ascii_alphanumeric() {
            Some(ch)
        } else if ch == '_' || ch == '-' {
            Some(ch)
        } else if ch.is_whitespace() || ch.is_ascii_punctuation() {
            Some('_')
        } else {
            None
        };

        match mapped {
            Some(c) if c == '_' || c == '-' => {
                if !last_was_sep {
                    out.push(c);
                    last_was_sep = true;
                }
            }
            Some(c) => {
                out.push(c);
                last_was_sep = false;
            }
            None => {
                // Non-ASCII / unmappable characters are dropped outright,
                // not treated as separators, so "café" -> "caf" not "caf_".
            }
        }
    }

    let trimmed = out.trim_matches(|c| c == '_' || c == '-').to_string();
    let truncated: String = trimmed.chars().take(MAX_LEN).collect();
    let truncated = truncated.trim_matches(|c| c == '_' || c == '-').to_string();

    if truncated.is_empty() {
        "unknown".to_string()
    } else {
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_phrase() {
        assert_eq!(slugify("  Hello, World!  "), "hello_world");
    }

    #[test]
    fn empty_input() {
        assert_eq!(slugify(""), "unknown");
        assert_eq!(slugify("   "), "unknown");
    }

    #[test]
    fn truncates_to_30() {
        let input = "a".repeat(50);
        let slug = slugify(&input);
        assert_eq!(slug.len(), 30);
    }

    #[test]
    fn matches_safety_pattern() {
        let cases = ["EBS Storage!!", "Unit (GB/TB)", "---weird---", "a_b__c"];
        for c in cases {
            let s = slugify(c);
            assert!(
                s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-'),
                "slug {s:?} violates safety pattern"
            );
            assert!(s.len() <= MAX_LEN);
        }
    }

    #[test]
    fn collapses_separator_runs() {
        assert_eq!(slugify("a   b___c"), "a_b_c");
    }
}

//! Trigger gate (§4.1 step 3, §9 "trigger pattern"): case-insensitive
//! `@<name>` word-boundary matching against the agent's name and any
//! configured aliases.

/// `true` if `text` contains `@<name>` (or `@<alias>`) at a word boundary,
/// case-insensitively. A word boundary after the match means the next
/// character (if any) is not alphanumeric/underscore — `@pynchybot` must
/// not match a trigger for `pynchy`.
pub fn matches_mention(text: &str, name: &str, aliases: &[String]) -> bool {
    std::iter::once(name).chain(aliases.iter().map(String::as_str)).any(|candidate| mentions(text, candidate))
}

fn mentions(text: &str, name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let lower_text = text.to_lowercase();
    let needle = format!("@{}", name.to_lowercase());
    let mut start = 0;
    while let Some(pos) = lower_text[start..].find(&needle) {
        let abs = start + pos;
        let end = abs + needle.len();
        let boundary_ok = lower_text[end..].chars().next().map(|c| !is_word_char(c)).unwrap_or(true);
        if boundary_ok {
            return true;
        }
        start = abs + 1;
    }
    false
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Batch-level trigger check (§4.1 step 3): any message in the batch
/// matches, or the last message is a magic command (checked separately by
/// the caller — this function only covers the mention half).
pub fn batch_has_mention(contents: &[&str], name: &str, aliases: &[String]) -> bool {
    contents.iter().any(|c| matches_mention(c, name, aliases))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_plain_mention() {
        assert!(matches_mention("hey @pynchy summarize", "pynchy", &[]));
    }

    #[test]
    fn rejects_prefix_of_longer_name() {
        assert!(!matches_mention("hey @pynchybot do it", "pynchy", &[]));
    }

    #[test]
    fn is_case_insensitive() {
        assert!(matches_mention("@PYNCHY hi", "pynchy", &[]));
    }

    #[test]
    fn checks_aliases_too() {
        assert!(matches_mention("@bot help", "pynchy", &["bot".to_string()]));
    }

    #[test]
    fn requires_at_sign() {
        assert!(!matches_mention("pynchy, help", "pynchy", &[]));
    }
}

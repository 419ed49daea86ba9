//! Special-command interception (§4.1 step 6, §9 "magic commands must
//! accept both orderings and a configurable alias list with case-
//! insensitive word-boundary matching; do not extend semantics without an
//! explicit test case").

use pynchy_core::config::CommandsConfig;

use crate::types::MagicCommand;

/// Classifies the last message of a batch as a magic command, if any.
/// Verb/noun phrases match in both orderings (`"reset context"` and
/// `"context reset"`); bare aliases match the whole trimmed message.
pub fn classify(content: &str, commands: &CommandsConfig) -> Option<MagicCommand> {
    let trimmed = content.trim();
    let lower = trimmed.to_lowercase();

    if let Some(rest) = lower.strip_prefix("approve ") {
        let short = rest.trim();
        if !short.is_empty() {
            return Some(MagicCommand::Approve(short.to_string()));
        }
    }
    if let Some(rest) = lower.strip_prefix("deny ") {
        let short = rest.trim();
        if !short.is_empty() {
            return Some(MagicCommand::Deny(short.to_string()));
        }
    }

    if is_alias_or_phrase(&lower, &commands.reset_aliases, &commands.reset_verbs, &commands.reset_nouns) {
        return Some(MagicCommand::ContextReset);
    }
    if is_alias_or_phrase(
        &lower,
        &commands.end_session_aliases,
        &commands.end_session_verbs,
        &commands.end_session_nouns,
    ) {
        return Some(MagicCommand::EndSession);
    }
    if commands.redeploy_aliases.iter().any(|a| a.eq_ignore_ascii_case(&lower)) {
        return Some(MagicCommand::Redeploy);
    }

    None
}

fn is_alias_or_phrase(lower: &str, aliases: &[String], verbs: &[String], nouns: &[String]) -> bool {
    if aliases.iter().any(|a| a.eq_ignore_ascii_case(lower)) {
        return true;
    }
    let words: Vec<&str> = lower.split_whitespace().collect();
    if words.len() != 2 {
        return false;
    }
    let (a, b) = (words[0], words[1]);
    let verb_then_noun = verbs.iter().any(|v| v == a) && nouns.iter().any(|n| n == b);
    let noun_then_verb = nouns.iter().any(|n| n == a) && verbs.iter().any(|v| v == b);
    verb_then_noun || noun_then_verb
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> CommandsConfig {
        CommandsConfig::default()
    }

    #[test]
    fn recognizes_bare_alias() {
        assert_eq!(classify("boom", &cfg()), Some(MagicCommand::ContextReset));
    }

    #[test]
    fn recognizes_verb_noun_ordering() {
        assert_eq!(classify("reset context", &cfg()), Some(MagicCommand::ContextReset));
    }

    #[test]
    fn recognizes_noun_verb_ordering() {
        assert_eq!(classify("context reset", &cfg()), Some(MagicCommand::ContextReset));
    }

    #[test]
    fn recognizes_end_session_alias() {
        assert_eq!(classify("bye", &cfg()), Some(MagicCommand::EndSession));
    }

    #[test]
    fn recognizes_approval_commands() {
        assert_eq!(classify("approve ab", &cfg()), Some(MagicCommand::Approve("ab".to_string())));
        assert_eq!(classify("deny ZZ", &cfg()), Some(MagicCommand::Deny("zz".to_string())));
    }

    #[test]
    fn ordinary_messages_are_not_commands() {
        assert_eq!(classify("summarize the repo", &cfg()), None);
    }
}

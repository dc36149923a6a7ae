/// Splits a shell-ish command string into trimmed, non-empty tokens.
pub fn split_command_tokens(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(ToOwned::to_owned).collect()
}

pub fn normalize_command_tokens<I, S>(tokens: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tokens
        .into_iter()
        .map(|token| token.as_ref().trim().to_owned())
        .filter(|token| !token.is_empty())
        .collect()
}

/// True when some remembered entry is a token-wise prefix of `command`.
/// Empty entries never match, so a malformed entry cannot accept everything.
pub fn command_matches_allowlist(command: &[String], allowlist: &[Vec<String>]) -> bool {
    if command.is_empty() {
        return false;
    }
    allowlist
        .iter()
        .any(|entry| !entry.is_empty() && command.starts_with(entry))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(raw: &str) -> Vec<String> {
        split_command_tokens(raw)
    }

    #[test]
    fn allowlist_matches_token_prefixes() {
        let allowlist = vec![tokens("git status"), tokens("cargo test")];
        assert!(command_matches_allowlist(&tokens("git status"), &allowlist));
        assert!(command_matches_allowlist(
            &tokens("cargo test -p skein_domain"),
            &allowlist
        ));
        assert!(!command_matches_allowlist(&tokens("git push"), &allowlist));
        assert!(!command_matches_allowlist(&tokens("cargo"), &allowlist));
    }

    #[test]
    fn allowlist_matches_whole_tokens_only() {
        let allowlist = vec![tokens("rm")];
        assert!(!command_matches_allowlist(&tokens("rmdir build"), &allowlist));
        assert!(command_matches_allowlist(&tokens("rm -rf build"), &allowlist));
    }

    #[test]
    fn empty_entries_and_commands_never_match() {
        let allowlist = vec![Vec::new()];
        assert!(!command_matches_allowlist(&tokens("ls"), &allowlist));
        assert!(!command_matches_allowlist(&[], &[tokens("ls")]));
    }

    #[test]
    fn normalize_drops_blank_tokens() {
        assert_eq!(
            normalize_command_tokens([" git ", "", "  ", "log"]),
            vec!["git".to_owned(), "log".to_owned()]
        );
    }
}

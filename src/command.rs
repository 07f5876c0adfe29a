//! Parsed FTP control-channel commands.
//!
//! A [`Command`] is one line of the control stream: a case-insensitive verb
//! and whatever followed it. Parsing keeps the argument byte-for-byte so
//! handlers decide how to interpret it.

/// One parsed command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    verb: String,
    argument: String,
}

impl Command {
    /// Create a command from an explicit verb and argument.
    #[must_use]
    pub fn new(verb: impl Into<String>, argument: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            argument: argument.into(),
        }
    }

    /// Parse a single decoded line into a command.
    ///
    /// The first whitespace-delimited token is the verb; the remainder with
    /// one leading space stripped is the argument. Blank lines produce no
    /// command.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim_start();
        if trimmed.is_empty() {
            return None;
        }

        match trimmed.find(char::is_whitespace) {
            Some(split) => {
                let (verb, rest) = trimmed.split_at(split);
                Some(Self::new(verb, rest[1..].to_owned()))
            }
            None => Some(Self::new(trimmed, "")),
        }
    }

    /// The command verb as received (case preserved).
    #[must_use]
    pub fn verb(&self) -> &str { &self.verb }

    /// The raw argument; empty when the line held only a verb.
    #[must_use]
    pub fn argument(&self) -> &str { &self.argument }

    /// Whether the verb matches `name`, ignoring ASCII case.
    #[must_use]
    pub fn is(&self, name: &str) -> bool { self.verb.eq_ignore_ascii_case(name) }
}

impl std::fmt::Display for Command {
    /// Renders `VERB argument`, masking `PASS` arguments so credentials never
    /// reach the logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.argument.is_empty() {
            f.write_str(&self.verb)
        } else if self.is("PASS") {
            write!(f, "{} **************** (password omitted)", self.verb)
        } else {
            write!(f, "{} {}", self.verb, self.argument)
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::Command;

    #[rstest]
    #[case("NOOP", "NOOP", "")]
    #[case("USER anonymous", "USER", "anonymous")]
    #[case("SITE UTIME file 20240101000000", "SITE", "UTIME file 20240101000000")]
    #[case("  TYPE I", "TYPE", "I")]
    fn parses_verb_and_argument(#[case] line: &str, #[case] verb: &str, #[case] argument: &str) {
        let command = Command::parse(line).expect("line should parse");
        assert_eq!(command.verb(), verb);
        assert_eq!(command.argument(), argument);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    fn blank_lines_produce_no_command(#[case] line: &str) {
        assert!(Command::parse(line).is_none());
    }

    #[test]
    fn verb_match_ignores_case() {
        let command = Command::parse("feat").expect("line should parse");
        assert!(command.is("FEAT"));
    }

    #[test]
    fn display_masks_passwords() {
        let command = Command::new("pass", "secret");
        assert!(!command.to_string().contains("secret"));
    }
}

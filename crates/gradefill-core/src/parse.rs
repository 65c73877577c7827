use std::sync::OnceLock;

use regex::Regex;
use tracing::trace;

static PREFIXED_LEVEL: OnceLock<Regex> = OnceLock::new();
static BARE_LEVEL: OnceLock<Regex> = OnceLock::new();
static SUBJECT: OnceLock<Regex> = OnceLock::new();

// `\w` is restricted to ASCII word characters, as in the host store.
fn prefixed_level() -> &'static Regex {
    PREFIXED_LEVEL
        .get_or_init(|| Regex::new(r"^G([0-9A-Za-z_]+) ").expect("not a valid level pattern"))
}

fn bare_level() -> &'static Regex {
    BARE_LEVEL.get_or_init(|| Regex::new(r"^([0-9A-Za-z_]+) ").expect("not a valid level pattern"))
}

fn subject() -> &'static Regex {
    SUBJECT.get_or_init(|| Regex::new(r" (.+)").expect("not a valid subject pattern"))
}

/// The two values derived from a record name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    /// Level token with any leading uppercase `G` removed.
    pub level: String,
    pub subject: String,
}

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum ParseError {
    #[error("no level token at the start of {name:?}")]
    #[diagnostic(
        code(gradefill::parse::missing_level),
        help("Names start with a level token and a space, like \"G5 Mathematics\" or \"K Reading\".")
    )]
    MissingLevel { name: String },

    #[error("no subject text after the level token in {name:?}")]
    #[diagnostic(
        code(gradefill::parse::missing_subject),
        help("The level token has to be followed by a space and the subject.")
    )]
    MissingSubject { name: String },
}

/// Splits a name like `"G5 Mathematics"` into its level token and subject.
///
/// A leading uppercase `G` directly followed by a word is dropped from the
/// level token; any other leading word is used as is. The subject is the
/// text after the first space of the whole name, which is looked up again
/// on the full string instead of continuing after the level token.
pub fn parse_name(name: &str) -> Result<ParsedName, ParseError> {
    let level = prefixed_level()
        .captures(name)
        .or_else(|| bare_level().captures(name))
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| ParseError::MissingLevel {
            name: name.to_string(),
        })?
        .as_str()
        .to_string();

    let subject = subject()
        .captures(name)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| ParseError::MissingSubject {
            name: name.to_string(),
        })?
        .as_str()
        .to_string();

    trace!(%name, %level, %subject, "Parsed record name");

    Ok(ParsedName { level, subject })
}

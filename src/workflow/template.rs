//! Command and Path Templates
//!
//! Templates are plain strings with embedded directives:
//!
//! - `{p:name}` - a parameter value
//! - `{i:name}` - the path of an input port
//! - `{o:name}` - the path of an output port
//!
//! Any directive may carry one or more suffix-strip modifiers, applied left
//! to right: `{i:jfDB|%.jf}` removes a trailing `.jf` from the input path.
//! Other brace text (`${HOME}`, `{a,b}`) is copied through untouched.
//!
//! Templates are parsed once when a process is declared; resolution is a
//! pure function of the lookup it is given.

use std::fmt;

use super::error::TemplateError;

/// What a directive refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TokenKind {
    Param,
    Input,
    Output,
}

impl TokenKind {
    /// The single-letter prefix used in template syntax.
    pub fn prefix(self) -> char {
        match self {
            Self::Param => 'p',
            Self::Input => 'i',
            Self::Output => 'o',
        }
    }

    fn from_prefix(c: u8) -> Option<Self> {
        match c {
            b'p' => Some(Self::Param),
            b'i' => Some(Self::Input),
            b'o' => Some(Self::Output),
            _ => None,
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = match self {
            Self::Param => "parameter",
            Self::Input => "input",
            Self::Output => "output",
        };
        f.write_str(word)
    }
}

/// A parsed `{kind:name|%suffix...}` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub name: String,
    /// Suffixes to strip, in application order.
    pub suffixes: Vec<String>,
}

impl Token {
    /// Applies this token's suffix modifiers to a concrete value.
    pub fn apply(&self, value: &str) -> String {
        self.suffixes
            .iter()
            .fold(value.to_string(), |acc, suffix| strip_suffix(&acc, suffix))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}:{}", self.kind.prefix(), self.name)?;
        for suffix in &self.suffixes {
            write!(f, "|%{}", suffix)?;
        }
        f.write_str("}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Reference(Token),
}

/// A parsed template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    raw: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parses a template, rejecting malformed directives.
    ///
    /// # Example
    ///
    /// ```
    /// use kleuren_pipeline::workflow::template::{Template, TokenKind};
    ///
    /// let template = Template::parse("{p:jellyfish} dump -o {o:kmers} {i:jfDB}").unwrap();
    /// let kinds: Vec<_> = template.references().map(|t| t.kind).collect();
    /// assert_eq!(kinds, vec![TokenKind::Param, TokenKind::Output, TokenKind::Input]);
    /// ```
    pub fn parse(raw: impl Into<String>) -> Result<Self, TemplateError> {
        let raw = raw.into();
        let bytes = raw.as_bytes();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut i = 0;

        while i < bytes.len() {
            let is_directive = bytes[i] == b'{'
                && i + 2 < bytes.len()
                && bytes[i + 2] == b':'
                && TokenKind::from_prefix(bytes[i + 1]).is_some();

            if !is_directive {
                // Copy a whole UTF-8 character so multi-byte text survives.
                let ch_len = raw[i..].chars().next().map(char::len_utf8).unwrap_or(1);
                literal.push_str(&raw[i..i + ch_len]);
                i += ch_len;
                continue;
            }

            let close = raw[i..]
                .find('}')
                .map(|offset| i + offset)
                .ok_or_else(|| malformed(&raw, i, "unclosed directive"))?;
            if raw[i + 1..close].contains('{') {
                return Err(malformed(&raw, i, "nested '{' inside directive"));
            }

            let token = parse_token(&raw, i, &raw[i + 3..close])?;
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Reference(token));
            i = close + 1;
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { raw, segments })
    }

    /// Returns the original template text.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Iterates over every directive in the template, in order.
    pub fn references(&self) -> impl Iterator<Item = &Token> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Reference(token) => Some(token),
            Segment::Literal(_) => None,
        })
    }

    /// Returns true if the template contains no directives.
    pub fn is_literal(&self) -> bool {
        self.references().next().is_none()
    }

    /// Substitutes every directive using `lookup`.
    ///
    /// `lookup` receives the directive kind and name and returns the
    /// concrete value, or `None` when the name has no value.
    pub fn resolve<F>(&self, lookup: F) -> Result<String, TemplateError>
    where
        F: Fn(TokenKind, &str) -> Option<String>,
    {
        let mut out = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Reference(token) => {
                    let value = lookup(token.kind, &token.name).ok_or_else(|| {
                        TemplateError::Unresolved {
                            kind: token.kind,
                            name: token.name.clone(),
                        }
                    })?;
                    out.push_str(&token.apply(&value));
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parses the `name|%suffix...` body of a directive starting at `start`.
fn parse_token(raw: &str, start: usize, body: &str) -> Result<Token, TemplateError> {
    let kind = TokenKind::from_prefix(raw.as_bytes()[start + 1])
        .ok_or_else(|| malformed(raw, start, "unknown directive kind"))?;

    let mut parts = body.split('|');
    let name = parts.next().unwrap_or_default().trim();
    if name.is_empty() {
        return Err(malformed(raw, start, "empty name"));
    }

    let mut suffixes = Vec::new();
    for modifier in parts {
        let suffix = modifier
            .strip_prefix('%')
            .ok_or_else(|| malformed(raw, start, "unknown modifier (expected '%suffix')"))?;
        if suffix.is_empty() {
            return Err(malformed(raw, start, "empty suffix"));
        }
        suffixes.push(suffix.to_string());
    }

    Ok(Token {
        kind,
        name: name.to_string(),
        suffixes,
    })
}

fn malformed(raw: &str, position: usize, reason: &str) -> TemplateError {
    TemplateError::Malformed {
        template: raw.to_string(),
        position,
        reason: reason.to_string(),
    }
}

/// Removes `suffix` from the end of `value`.
///
/// When the whole suffix is not trailing, its dotted extensions are peeled
/// off from the right for as long as they match, so `.fasta.jf` applied to
/// `genome.fasta.9.jf` removes only the `.jf`.
pub fn strip_suffix(value: &str, suffix: &str) -> String {
    if let Some(stripped) = value.strip_suffix(suffix) {
        return stripped.to_string();
    }

    let mut current = value;
    for ext in suffix.rsplit('.').filter(|ext| !ext.is_empty()) {
        match current
            .strip_suffix(ext)
            .and_then(|rest| rest.strip_suffix('.'))
        {
            Some(rest) => current = rest,
            None => break,
        }
    }
    current.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(kind: TokenKind, name: &str) -> Option<String> {
        match (kind, name) {
            (TokenKind::Param, "k") => Some("9".to_string()),
            (TokenKind::Input, "jfDB") => Some("genome1.fasta.9.jf".to_string()),
            (TokenKind::Output, "kmers") => Some("genome1.kmers.txt".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_parse_literal_only() {
        let template = Template::parse("echo hello").unwrap();
        assert!(template.is_literal());
        assert_eq!(template.resolve(lookup).unwrap(), "echo hello");
    }

    #[test]
    fn test_resolve_param() {
        let template = Template::parse("jellyfish count -m {p:k}").unwrap();
        assert_eq!(template.resolve(lookup).unwrap(), "jellyfish count -m 9");
    }

    #[test]
    fn test_resolve_suffix_peels_trailing_extension() {
        let template = Template::parse("{i:jfDB|%.fasta.jf}").unwrap();
        assert_eq!(template.resolve(lookup).unwrap(), "genome1.fasta.9");
    }

    #[test]
    fn test_resolve_suffix_whole_match() {
        let template = Template::parse("{i:jfDB|%.9.jf}.kmers.{p:k}.txt").unwrap();
        assert_eq!(
            template.resolve(lookup).unwrap(),
            "genome1.fasta.kmers.9.txt"
        );
    }

    #[test]
    fn test_resolve_chained_suffixes() {
        let template = Template::parse("{i:jfDB|%.jf|%.9}").unwrap();
        assert_eq!(template.resolve(lookup).unwrap(), "genome1.fasta");
    }

    #[test]
    fn test_strip_suffix_absent_is_noop() {
        assert_eq!(strip_suffix("reads.fastq", ".bam"), "reads.fastq");
        assert_eq!(strip_suffix("reads.fastq", "_sorted"), "reads.fastq");
    }

    #[test]
    fn test_resolve_unresolved_reference() {
        let template = Template::parse("cat {i:missing}").unwrap();
        let err = template.resolve(lookup).unwrap_err();
        assert_eq!(
            err,
            TemplateError::Unresolved {
                kind: TokenKind::Input,
                name: "missing".to_string()
            }
        );
    }

    #[test]
    fn test_shell_braces_are_literal() {
        let template = Template::parse("echo ${HOME} {a,b} > {o:kmers}").unwrap();
        assert_eq!(template.references().count(), 1);
        assert_eq!(
            template.resolve(lookup).unwrap(),
            "echo ${HOME} {a,b} > genome1.kmers.txt"
        );
    }

    #[test]
    fn test_parse_rejects_unclosed_directive() {
        let err = Template::parse("cat {i:reads").unwrap_err();
        assert!(matches!(err, TemplateError::Malformed { position: 4, .. }));
    }

    #[test]
    fn test_parse_rejects_empty_name() {
        assert!(Template::parse("cat {i:}").is_err());
        assert!(Template::parse("cat {i:|%.txt}").is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_modifier() {
        let err = Template::parse("{i:reads|s/a/b/}").unwrap_err();
        assert!(err.to_string().contains("unknown modifier"));
    }

    #[test]
    fn test_parse_rejects_empty_suffix() {
        assert!(Template::parse("{i:reads|%}").is_err());
    }

    #[test]
    fn test_token_display_round_trips_syntax() {
        let template = Template::parse("{i:jfDB|%.fasta.jf}").unwrap();
        let token = template.references().next().unwrap();
        assert_eq!(token.to_string(), "{i:jfDB|%.fasta.jf}");
    }

    #[test]
    fn test_utf8_literals_preserved() {
        let template = Template::parse("echo größe {p:k}").unwrap();
        assert_eq!(template.resolve(lookup).unwrap(), "echo größe 9");
    }
}

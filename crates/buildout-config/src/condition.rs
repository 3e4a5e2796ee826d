//! Boolean gating expressions for `[section: expression]` headers.
//!
//! The language has identifiers naming environment facts,
//! `not`/`and`/`or`, parentheses, `true`/`false`, and `fact == "literal"` /
//! `fact != "literal"` against string facts.

use std::collections::BTreeMap;

/// Facts about the running platform that gating expressions may test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentFacts {
    flags: BTreeMap<String, bool>,
    values: BTreeMap<String, String>,
}

impl Default for EnvironmentFacts {
    fn default() -> Self {
        Self::detect()
    }
}

impl EnvironmentFacts {
    /// Facts with nothing defined. Useful as a base for tests.
    pub fn empty() -> Self {
        Self {
            flags: BTreeMap::new(),
            values: BTreeMap::new(),
        }
    }

    /// Facts for the platform this binary was compiled for.
    pub fn detect() -> Self {
        use std::env::consts::{ARCH, FAMILY, OS};

        let mut facts = Self::empty()
            .with_flag("linux", OS == "linux")
            .with_flag("macosx", OS == "macos")
            .with_flag("windows", OS == "windows")
            .with_flag("posix", FAMILY == "unix")
            .with_flag("unix", FAMILY == "unix")
            .with_flag("bits32", cfg!(target_pointer_width = "32"))
            .with_flag("bits64", cfg!(target_pointer_width = "64"))
            .with_flag("little_endian", cfg!(target_endian = "little"))
            .with_flag("big_endian", cfg!(target_endian = "big"))
            .with_flag("x86_64", ARCH == "x86_64")
            .with_flag("aarch64", ARCH == "aarch64")
            .with_flag("rust", true);
        facts = facts
            .with_value("os", OS)
            .with_value("arch", ARCH)
            .with_value("family", FAMILY);
        facts
    }

    #[must_use]
    pub fn with_flag(mut self, name: &str, value: bool) -> Self {
        self.flags.insert(name.to_owned(), value);
        self
    }

    #[must_use]
    pub fn with_value(mut self, name: &str, value: &str) -> Self {
        self.values.insert(name.to_owned(), value.to_owned());
        self
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        self.flags.get(name).copied()
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Evaluate a gating expression. The error string explains why the
    /// expression was rejected; callers attach location information.
    pub fn evaluate(&self, expression: &str) -> Result<bool, String> {
        let tokens = tokenize(expression)?;
        if tokens.is_empty() {
            return Err("empty expression".to_owned());
        }
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            facts: self,
        };
        let value = parser.or_expr()?;
        if parser.pos != tokens.len() {
            return Err(format!("unexpected token {}", tokens[parser.pos]));
        }
        Ok(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    Eq,
    Ne,
    LParen,
    RParen,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "'{s}'"),
            Token::Str(s) => write!(f, "\"{s}\""),
            Token::Eq => f.write_str("'=='"),
            Token::Ne => f.write_str("'!='"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(i, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                tokens.push(Token::LParen);
                chars.next();
            }
            ')' => {
                tokens.push(Token::RParen);
                chars.next();
            }
            '=' | '!' => {
                chars.next();
                match chars.next() {
                    Some((_, '=')) => tokens.push(if c == '=' { Token::Eq } else { Token::Ne }),
                    _ => return Err(format!("expected '=' after '{c}' at offset {i}")),
                }
            }
            '"' | '\'' => {
                chars.next();
                let mut literal = String::new();
                let mut closed = false;
                for (_, ch) in chars.by_ref() {
                    if ch == c {
                        closed = true;
                        break;
                    }
                    literal.push(ch);
                }
                if !closed {
                    return Err(format!("unterminated string literal at offset {i}"));
                }
                tokens.push(Token::Str(literal));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(format!("unexpected character '{other}' at offset {i}")),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    facts: &'a EnvironmentFacts,
}

impl Parser<'_> {
    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.tokens.get(self.pos), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(keyword))
    }

    fn or_expr(&mut self) -> Result<bool, String> {
        let mut value = self.and_expr()?;
        while self.peek_keyword("or") {
            self.pos += 1;
            let rhs = self.and_expr()?;
            value = value || rhs;
        }
        Ok(value)
    }

    fn and_expr(&mut self) -> Result<bool, String> {
        let mut value = self.unary()?;
        while self.peek_keyword("and") {
            self.pos += 1;
            let rhs = self.unary()?;
            value = value && rhs;
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<bool, String> {
        if self.peek_keyword("not") {
            self.pos += 1;
            return Ok(!self.unary()?);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<bool, String> {
        let Some(token) = self.tokens.get(self.pos) else {
            return Err("unexpected end of expression".to_owned());
        };
        self.pos += 1;
        match token {
            Token::LParen => {
                let value = self.or_expr()?;
                match self.tokens.get(self.pos) {
                    Some(Token::RParen) => {
                        self.pos += 1;
                        Ok(value)
                    }
                    _ => Err("missing ')'".to_owned()),
                }
            }
            Token::Ident(name) if name.eq_ignore_ascii_case("true") => Ok(true),
            Token::Ident(name) if name.eq_ignore_ascii_case("false") => Ok(false),
            Token::Ident(name) => match self.tokens.get(self.pos) {
                Some(op @ (Token::Eq | Token::Ne)) => {
                    self.pos += 1;
                    let Some(Token::Str(literal)) = self.tokens.get(self.pos) else {
                        return Err(format!("expected a string literal after {op}"));
                    };
                    self.pos += 1;
                    let actual = self
                        .facts
                        .value(name)
                        .ok_or_else(|| format!("unknown value '{name}'"))?;
                    let equal = actual == literal;
                    Ok(if *op == Token::Eq { equal } else { !equal })
                }
                _ => self
                    .facts
                    .flag(name)
                    .ok_or_else(|| format!("unknown name '{name}'")),
            },
            other => Err(format!("unexpected token {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts() -> EnvironmentFacts {
        EnvironmentFacts::empty()
            .with_flag("linux", true)
            .with_flag("windows", false)
            .with_flag("bits64", true)
            .with_value("os", "linux")
    }

    #[test]
    fn single_flag() {
        assert!(facts().evaluate("linux").unwrap());
        assert!(!facts().evaluate("windows").unwrap());
    }

    #[test]
    fn boolean_operators_and_precedence() {
        let f = facts();
        assert!(f.evaluate("windows or linux and bits64").unwrap());
        assert!(!f.evaluate("(windows or linux) and not bits64").unwrap());
        assert!(f.evaluate("not windows").unwrap());
        assert!(f.evaluate("True and linux").unwrap());
        assert!(!f.evaluate("false").unwrap());
    }

    #[test]
    fn string_comparisons() {
        let f = facts();
        assert!(f.evaluate("os == \"linux\"").unwrap());
        assert!(f.evaluate("os != 'darwin'").unwrap());
        assert!(!f.evaluate("os == 'darwin'").unwrap());
    }

    #[test]
    fn rejects_unknown_names() {
        let err = facts().evaluate("solaris").unwrap_err();
        assert!(err.contains("solaris"));
    }

    #[test]
    fn rejects_malformed_expressions() {
        let f = facts();
        assert!(f.evaluate("").is_err());
        assert!(f.evaluate("(linux").is_err());
        assert!(f.evaluate("linux windows").is_err());
        assert!(f.evaluate("linux = 'x'").is_err());
        assert!(f.evaluate("os == linux").is_err());
        assert!(f.evaluate("os == 'unterminated").is_err());
        assert!(f.evaluate("sys.platform").is_err());
    }

    #[test]
    fn detected_facts_are_consistent() {
        let f = EnvironmentFacts::detect();
        assert_ne!(f.flag("bits32"), f.flag("bits64"));
        assert_ne!(f.flag("little_endian"), f.flag("big_endian"));
        assert_eq!(f.flag("rust"), Some(true));
        assert!(f.value("os").is_some());
    }
}

use crate::version::Version;
use crate::ResolveError;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// A project name. Two names are the same project when their keys match:
/// case is ignored and `_` and `.` are treated as `-`.
#[derive(Debug, Clone)]
pub struct ProjectName {
    display: String,
    key: String,
}

impl ProjectName {
    pub fn new(name: &str) -> Self {
        let display = name.trim().to_owned();
        let key = display
            .chars()
            .map(|c| match c {
                '_' | '.' => '-',
                c => c.to_ascii_lowercase(),
            })
            .collect();
        Self { display, key }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn as_str(&self) -> &str {
        &self.display
    }
}

impl PartialEq for ProjectName {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ProjectName {}

impl Hash for ProjectName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for ProjectName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProjectName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

impl Serialize for ProjectName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.display)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Op::Eq => "==",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
        })
    }
}

/// One `(operator, version)` bound.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Spec {
    pub op: Op,
    pub version: Version,
}

impl Spec {
    pub fn new(op: Op, version: Version) -> Self {
        Self { op, version }
    }

    pub fn matches(&self, version: &Version) -> bool {
        match self.op {
            Op::Eq => version == &self.version,
            Op::Lt => version < &self.version,
            Op::Le => version <= &self.version,
            Op::Gt => version > &self.version,
            Op::Ge => version >= &self.version,
        }
    }

    /// Parse `==1.0`, `>= 2`, etc. A bare version is read as `==`.
    pub fn parse(text: &str) -> Result<Self, ResolveError> {
        let text = text.trim();
        let (op, rest) = if let Some(r) = text.strip_prefix("==") {
            (Op::Eq, r)
        } else if let Some(r) = text.strip_prefix(">=") {
            (Op::Ge, r)
        } else if let Some(r) = text.strip_prefix("<=") {
            (Op::Le, r)
        } else if let Some(r) = text.strip_prefix('>') {
            (Op::Gt, r)
        } else if let Some(r) = text.strip_prefix('<') {
            (Op::Lt, r)
        } else if text.starts_with(['!', '~', '=']) {
            return Err(ResolveError::InvalidRequirement {
                text: text.to_owned(),
                reason: "unsupported operator".to_owned(),
            });
        } else {
            (Op::Eq, text)
        };
        Ok(Self::new(op, Version::parse(rest)?))
    }
}

impl fmt::Display for Spec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op, self.version)
    }
}

/// A project name plus the bounds and extras a dependent asks for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Requirement {
    pub project: ProjectName,
    pub specs: Vec<Spec>,
    pub extras: Vec<String>,
}

impl Requirement {
    pub fn new(project: &str) -> Self {
        Self {
            project: ProjectName::new(project),
            specs: Vec::new(),
            extras: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_spec(mut self, op: Op, version: Version) -> Self {
        self.specs.push(Spec::new(op, version));
        self
    }

    pub fn key(&self) -> &str {
        self.project.key()
    }

    /// Whether `version` satisfies every bound.
    pub fn contains(&self, version: &Version) -> bool {
        self.specs.iter().all(|s| s.matches(version))
    }

    /// The version named by an `==` bound, if any.
    pub fn exact(&self) -> Option<&Version> {
        self.specs
            .iter()
            .find(|s| s.op == Op::Eq)
            .map(|s| &s.version)
    }

    pub fn parse(text: &str) -> Result<Self, ResolveError> {
        let invalid = |reason: &str| ResolveError::InvalidRequirement {
            text: text.to_owned(),
            reason: reason.to_owned(),
        };
        let trimmed = text.trim();
        let name_len = trimmed
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
            .unwrap_or(trimmed.len());
        if name_len == 0 {
            return Err(invalid("missing project name"));
        }
        let (name, mut rest) = trimmed.split_at(name_len);
        rest = rest.trim_start();

        let mut extras = Vec::new();
        if let Some(after) = rest.strip_prefix('[') {
            let (inner, tail) = after
                .split_once(']')
                .ok_or_else(|| invalid("unterminated extras list"))?;
            for extra in inner.split(',').map(str::trim).filter(|e| !e.is_empty()) {
                extras.push(extra.to_owned());
            }
            rest = tail.trim_start();
        }

        let mut specs = Vec::new();
        if !rest.is_empty() {
            for part in rest.split(',') {
                let part = part.trim();
                if part.is_empty() {
                    return Err(invalid("empty version bound"));
                }
                if !part.starts_with(['=', '<', '>', '!', '~']) {
                    return Err(invalid("expected a comparison operator"));
                }
                specs.push(Spec::parse(part)?);
            }
        }

        Ok(Self {
            project: ProjectName::new(name),
            specs,
            extras,
        })
    }
}

impl FromStr for Requirement {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.project)?;
        if !self.extras.is_empty() {
            write!(f, "[{}]", self.extras.join(","))?;
        }
        let specs: Vec<String> = self.specs.iter().map(ToString::to_string).collect();
        f.write_str(&specs.join(","))
    }
}

impl Serialize for Requirement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_normalize() {
        assert_eq!(ProjectName::new("Zope.Interface"), ProjectName::new("zope_interface"));
        assert_eq!(ProjectName::new("Foo").to_string(), "Foo");
    }

    #[test]
    fn parses_bare_and_bounded() {
        let r = Requirement::parse("foo").unwrap();
        assert!(r.specs.is_empty());

        let r = Requirement::parse("foo >=1.0, <2").unwrap();
        assert_eq!(r.specs.len(), 2);
        assert!(r.contains(&Version::parse("1.5").unwrap()));
        assert!(!r.contains(&Version::parse("2.0").unwrap()));
        assert_eq!(r.to_string(), "foo>=1.0,<2");
    }

    #[test]
    fn parses_extras() {
        let r = Requirement::parse("web [tests, docs] ==3.1").unwrap();
        assert_eq!(r.extras, vec!["tests", "docs"]);
        assert_eq!(r.exact().unwrap().to_string(), "3.1");
        assert_eq!(r.to_string(), "web[tests,docs]==3.1");
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", ">=1", "foo 1.0", "foo[x", "foo ==", "foo !=1", "foo >=1,"] {
            assert!(Requirement::parse(bad).is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn bare_spec_is_exact() {
        let s = Spec::parse("1.4").unwrap();
        assert_eq!(s.op, Op::Eq);
        assert!(s.matches(&Version::parse("1.4.0").unwrap()));
    }
}

use crate::ResolveError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// A distribution version.
///
/// Parsing is lenient: `1`, `1.2` and `1.2.3` are padded to three numeric
/// components, and the suffixes `aN`, `bN`, `rcN`/`cN` and `.devN` become
/// semver pre-release identifiers. Comparison uses the semver form; display
/// keeps the text the version was written with.
#[derive(Debug, Clone)]
pub struct Version {
    parsed: semver::Version,
    text: String,
}

impl Version {
    pub fn parse(text: &str) -> Result<Self, ResolveError> {
        let invalid = || ResolveError::InvalidVersion(text.to_owned());
        let trimmed = text.trim();
        let body = trimmed.strip_prefix('v').unwrap_or(trimmed);

        let (body, build) = match body.split_once('+') {
            Some((b, meta)) => (b, Some(meta)),
            None => (body, None),
        };
        let release_len = body
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(body.len());
        let (release, suffix) = body.split_at(release_len);
        let release = release.trim_end_matches('.');
        let had_dot = body[release.len()..release_len].contains('.');

        let mut numbers = Vec::new();
        for part in release.split('.') {
            numbers.push(part.parse::<u64>().map_err(|_| invalid())?);
        }
        if numbers.is_empty() || numbers.len() > 3 {
            return Err(invalid());
        }
        numbers.resize(3, 0);

        let mut parsed = semver::Version::new(numbers[0], numbers[1], numbers[2]);
        let pre = prerelease(suffix, had_dot).ok_or_else(invalid)?;
        if !pre.is_empty() {
            parsed.pre = semver::Prerelease::new(&pre).map_err(|_| invalid())?;
        }
        if let Some(meta) = build {
            parsed.build = semver::BuildMetadata::new(meta).map_err(|_| invalid())?;
        }
        Ok(Self {
            parsed,
            text: trimmed.to_owned(),
        })
    }

    /// A final version has no pre-release component.
    pub fn is_final(&self) -> bool {
        self.parsed.pre.is_empty()
    }

    pub fn semver(&self) -> &semver::Version {
        &self.parsed
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// Map a version suffix onto semver pre-release identifiers.
fn prerelease(suffix: &str, after_dot: bool) -> Option<String> {
    if suffix.is_empty() {
        return Some(String::new());
    }
    if let Some(rest) = suffix.strip_prefix('-') {
        return (!rest.is_empty()).then(|| rest.to_owned());
    }
    let split = suffix
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(suffix.len());
    let (tag, number) = suffix.split_at(split);
    let number = if number.is_empty() { "0" } else { number };
    if !number.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let number = number.trim_start_matches('0');
    let number = if number.is_empty() { "0" } else { number };
    let tag = match tag.to_ascii_lowercase().as_str() {
        // `0dev` sorts ahead of the alphabetic tags, as dev releases should
        "dev" if after_dot => "0dev",
        "a" | "alpha" if !after_dot => "a",
        "b" | "beta" if !after_dot => "b",
        "c" | "rc" | "pre" | "preview" if !after_dot => "rc",
        _ => return None,
    };
    Some(format!("{tag}.{number}"))
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for Version {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.parsed == other.parsed
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parsed.hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parsed.cmp(&other.parsed)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

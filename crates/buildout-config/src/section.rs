use crate::raw::Annotation;
use crate::resolver::{ConfigResolver, SectionId};
use crate::ConfigError;
use std::collections::BTreeMap;

/// A mapping-like view over one resolved section.
#[derive(Clone, Copy)]
pub struct Section<'a> {
    resolver: &'a ConfigResolver,
    id: SectionId,
}

impl std::fmt::Debug for Section<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Section").field("name", &self.name()).finish()
    }
}

impl<'a> Section<'a> {
    pub(crate) fn new(resolver: &'a ConfigResolver, id: SectionId) -> Self {
        Self { resolver, id }
    }

    pub fn name(&self) -> String {
        self.resolver.name_of(self.id)
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        self.resolver.resolve_id(self.id, key)
    }

    /// Like [`Section::get`] but an absent option is an error.
    pub fn require(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key)?.ok_or_else(|| ConfigError::MissingOption {
            section: self.name(),
            option: key.to_owned(),
        })
    }

    pub fn get_or(&self, key: &str, default: &str) -> Result<String, ConfigError> {
        Ok(self.get(key)?.unwrap_or_else(|| default.to_owned()))
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        let Some(value) = self.get(key)? else {
            return Ok(default);
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(ConfigError::InvalidBool {
                section: self.name(),
                option: key.to_owned(),
                value,
            }),
        }
    }

    /// Whitespace-separated words of an option; absent options are empty.
    pub fn get_list(&self, key: &str) -> Result<Vec<String>, ConfigError> {
        Ok(self
            .get(key)?
            .map(|v| v.split_whitespace().map(str::to_owned).collect())
            .unwrap_or_default())
    }

    /// Set a runtime value. It wins over the configuration files and is
    /// visible to every substitution resolved afterwards.
    pub fn set(&self, key: &str, value: impl Into<String>) {
        self.resolver.set_runtime(self.id, key, value.into());
    }

    /// Set `key` only if it has no value yet; returns the effective value.
    pub fn set_default(&self, key: &str, value: &str) -> Result<String, ConfigError> {
        if let Some(existing) = self.get(key)? {
            return Ok(existing);
        }
        self.set(key, value);
        Ok(value.to_owned())
    }

    pub fn contains(&self, key: &str) -> Result<bool, ConfigError> {
        Ok(self.keys()?.iter().any(|k| k == key))
    }

    pub fn keys(&self) -> Result<Vec<String>, ConfigError> {
        self.resolver.keys_of(self.id)
    }

    /// Every option fully resolved, pseudo-options excluded.
    pub fn snapshot(&self) -> Result<BTreeMap<String, String>, ConfigError> {
        let mut out = BTreeMap::new();
        for key in self.keys()? {
            if key.starts_with('<') {
                continue;
            }
            if let Some(value) = self.get(&key)? {
                out.insert(key, value);
            }
        }
        Ok(out)
    }

    /// Sections this one has referenced through `${...}` so far.
    pub fn references(&self) -> Vec<String> {
        self.resolver.references_of(self.id)
    }

    pub fn provenance(&self, key: &str) -> Result<Vec<Annotation>, ConfigError> {
        self.resolver.history_of(self.id, key)
    }
}

#[cfg(test)]
mod tests {
    use crate::condition::EnvironmentFacts;
    use crate::loader::ConfigLoader;
    use crate::resolver::ConfigResolver;
    use std::path::Path;

    fn resolver(text: &str) -> ConfigResolver {
        let data = ConfigLoader::new()
            .with_facts(EnvironmentFacts::empty())
            .load_str(text, Path::new("/work"))
            .unwrap();
        ConfigResolver::new(data)
    }

    #[test]
    fn typed_accessors() {
        let r = resolver("[s]\nflag = Yes\nbad = maybe\nwords = a\n  b c\n");
        let s = r.section("s").unwrap();
        assert!(s.get_bool("flag", false).unwrap());
        assert!(!s.get_bool("absent", false).unwrap());
        assert!(s.get_bool("bad", false).is_err());
        assert_eq!(s.get_list("words").unwrap(), vec!["a", "b", "c"]);
        assert!(s.get_list("absent").unwrap().is_empty());
        assert!(s.require("absent").is_err());
    }

    #[test]
    fn runtime_values_take_priority() {
        let r = resolver("[s]\nk = file\nuse = ${:k}\n");
        let s = r.section("s").unwrap();
        s.set("k", "runtime");
        assert_eq!(s.get("use").unwrap().as_deref(), Some("runtime"));
        assert_eq!(s.set_default("k", "ignored").unwrap(), "runtime");
        assert_eq!(s.set_default("new", "d").unwrap(), "d");
        assert!(s.contains("new").unwrap());
    }

    #[test]
    fn snapshot_excludes_pseudo_options() {
        let r = resolver("[base]\na = 1\n[s]\n< = base\n<part-dependencies> = x\nb = ${:a}2\n");
        let snap = r.section("s").unwrap().snapshot().unwrap();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap["a"], "1");
        assert_eq!(snap["b"], "12");
    }

    #[test]
    fn defaults_resolve_against_directory() {
        let r = resolver("[buildout]\nparts =\n");
        let b = r.buildout().unwrap();
        assert_eq!(b.require("parts-directory").unwrap(), "/work/parts");
        assert_eq!(b.require("installed").unwrap(), "/work/.installed.cfg");
        assert!(b.get_bool("prefer-final", false).unwrap());
    }
}

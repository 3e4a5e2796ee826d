use crate::distribution::Distribution;
use crate::requirement::ProjectName;
use crate::ResolveError;
use std::collections::HashMap;

/// An ordered set of distributions holding at most one per project.
#[derive(Debug, Clone, Default)]
pub struct WorkingSet {
    dists: Vec<Distribution>,
    by_key: HashMap<String, usize>,
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, dist: Distribution) -> Result<(), ResolveError> {
        if self.by_key.contains_key(dist.key()) {
            return Err(ResolveError::DuplicateProject(dist.project.to_string()));
        }
        self.by_key.insert(dist.key().to_owned(), self.dists.len());
        self.dists.push(dist);
        Ok(())
    }

    pub fn get(&self, project: &ProjectName) -> Option<&Distribution> {
        self.by_key.get(project.key()).map(|&i| &self.dists[i])
    }

    pub fn contains(&self, project: &ProjectName) -> bool {
        self.by_key.contains_key(project.key())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Distribution> {
        self.dists.iter()
    }

    pub fn len(&self) -> usize {
        self.dists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dists.is_empty()
    }

    /// Sorted `name==version:fingerprint` lines for signature hashing.
    pub fn fingerprints(&self) -> Result<Vec<String>, ResolveError> {
        let mut out = Vec::with_capacity(self.dists.len());
        for dist in &self.dists {
            out.push(format!(
                "{}=={}:{}",
                dist.key(),
                dist.version,
                dist.fingerprint()?
            ));
        }
        out.sort();
        Ok(out)
    }
}

impl<'a> IntoIterator for &'a WorkingSet {
    type Item = &'a Distribution;
    type IntoIter = std::slice::Iter<'a, Distribution>;

    fn into_iter(self) -> Self::IntoIter {
        self.dists.iter()
    }
}

impl FromIterator<Distribution> for WorkingSet {
    /// Later duplicates are dropped.
    fn from_iter<I: IntoIterator<Item = Distribution>>(iter: I) -> Self {
        let mut ws = WorkingSet::new();
        for dist in iter {
            let _ = ws.add(dist);
        }
        ws
    }
}

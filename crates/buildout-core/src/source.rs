use crate::settings::BuildoutSettings;
use crate::CoreError;
use buildout_resolve::{
    CatalogIndex, Distribution, DistributionResolver, PackageIndex, Pins, ProjectName,
    Requirement, Resolution, ResolveError, ResolverPolicy, Version, WorkingSet,
};
use std::collections::BTreeMap;
use tracing::debug;

/// Everything a run needs to turn requirements into working sets: the
/// index, the policy, the pins and the distributions already present.
///
/// Picked versions are collected across every resolution of the run.
pub struct DistributionSource {
    index: Box<dyn PackageIndex>,
    policy: ResolverPolicy,
    pins: Pins,
    present: WorkingSet,
    picked: BTreeMap<ProjectName, Version>,
}

impl DistributionSource {
    pub fn new(
        index: Box<dyn PackageIndex>,
        policy: ResolverPolicy,
        pins: Pins,
        present: WorkingSet,
    ) -> Self {
        Self {
            index,
            policy,
            pins,
            present,
            picked: BTreeMap::new(),
        }
    }

    /// A catalog index over the configured `find-links`, with the eggs
    /// directory as artifact cache. Develop distributions and `builtin`
    /// ones are present from the start.
    pub fn from_settings(
        settings: &BuildoutSettings,
        builtin: Vec<Distribution>,
    ) -> Result<Self, CoreError> {
        let mut index = CatalogIndex::new(&settings.layout.eggs_directory);
        index.add_find_links(&settings.find_links)?;

        let mut present = WorkingSet::new();
        for dist in CatalogIndex::develop_distributions(&settings.develop)? {
            debug!("develop distribution {dist}");
            present.add(dist)?;
        }
        for dist in builtin {
            if !present.contains(&dist.project) {
                present.add(dist)?;
            }
        }
        Ok(Self::new(
            Box::new(index),
            settings.policy,
            settings.pins.clone(),
            present,
        ))
    }

    pub fn policy(&self) -> ResolverPolicy {
        self.policy
    }

    pub fn present(&self) -> &WorkingSet {
        &self.present
    }

    /// Resolve `requirements` on behalf of `requester`.
    pub fn resolve(
        &mut self,
        requester: &str,
        requirements: &[Requirement],
    ) -> Result<Resolution, ResolveError> {
        let resolution = DistributionResolver::new(self.index.as_mut(), self.policy)
            .with_requester(requester)
            .resolve(requirements, &self.pins, &self.present)?;
        for (project, version) in &resolution.picked {
            self.picked.insert(project.clone(), version.clone());
        }
        Ok(resolution)
    }

    /// Versions chosen without an exact pin so far, sorted by project.
    pub fn picked(&self) -> Vec<(ProjectName, Version)> {
        self.picked
            .iter()
            .map(|(p, v)| (p.clone(), v.clone()))
            .collect()
    }
}

impl std::fmt::Debug for DistributionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributionSource")
            .field("policy", &self.policy)
            .field("present", &self.present.len())
            .finish_non_exhaustive()
    }
}

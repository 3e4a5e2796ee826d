//! Fixed-point resolution of requirements into a working set.
//!
//! Each round drains the requirement queue against the working set and the
//! present distributions. A requirement nothing local can satisfy ends the
//! round with [`Step::NeedsFetch`]; the driver obtains a candidate from the
//! index, adds it, and starts the next round. A requirement that contradicts
//! an already-chosen distribution ends resolution with a conflict report.

use crate::constraint::Pins;
use crate::distribution::{Distribution, Location};
use crate::index::{select_best, PackageIndex};
use crate::requirement::{ProjectName, Requirement};
use crate::version::Version;
use crate::working_set::WorkingSet;
use crate::ResolveError;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info, trace};

/// Resolution settings, read once from `[buildout]` and passed by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolverPolicy {
    pub prefer_final: bool,
    pub newest: bool,
    pub offline: bool,
    pub allow_picked_versions: bool,
    pub use_dependency_links: bool,
    pub max_rounds: usize,
}

impl Default for ResolverPolicy {
    fn default() -> Self {
        Self {
            prefer_final: true,
            newest: true,
            offline: false,
            allow_picked_versions: true,
            use_dependency_links: true,
            max_rounds: 1000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub working_set: WorkingSet,
    /// Distributions chosen without an exact pin, in the order chosen.
    pub picked: Vec<(ProjectName, Version)>,
}

#[derive(Debug, Clone)]
struct Pending {
    requirement: Requirement,
    chain: Vec<String>,
}

enum Step {
    Resolved,
    NeedsFetch(Pending),
    Conflict { project: String, report: String },
}

#[derive(Default)]
struct State {
    ws: WorkingSet,
    queue: VecDeque<Pending>,
    chosen_by: HashMap<String, Vec<String>>,
    extras_done: HashSet<(String, String)>,
    picked: Vec<(ProjectName, Version)>,
}

impl State {
    fn note_requirer(&mut self, dist: &Distribution, chain: &[String]) {
        let text = chain.join(" -> ");
        let by = self.chosen_by.entry(dist.key().to_owned()).or_default();
        if !by.contains(&text) {
            by.push(text);
        }
    }
}

pub struct DistributionResolver<'a> {
    index: &'a mut dyn PackageIndex,
    policy: ResolverPolicy,
    requester: String,
}

impl<'a> DistributionResolver<'a> {
    pub fn new(index: &'a mut dyn PackageIndex, policy: ResolverPolicy) -> Self {
        Self {
            index,
            policy,
            requester: "buildout".to_owned(),
        }
    }

    /// Name the root of every requirement chain, e.g. the part asking.
    #[must_use]
    pub fn with_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = requester.into();
        self
    }

    pub fn policy(&self) -> ResolverPolicy {
        self.policy
    }

    /// Resolve `requirements`, tightened by `pins`, reusing `present`
    /// distributions where the policy allows.
    pub fn resolve(
        &mut self,
        requirements: &[Requirement],
        pins: &Pins,
        present: &WorkingSet,
    ) -> Result<Resolution, ResolveError> {
        let mut state = State::default();
        for requirement in requirements {
            state.queue.push_back(Pending {
                requirement: requirement.clone(),
                chain: vec![self.requester.clone()],
            });
        }

        for round in 0..self.policy.max_rounds {
            match self.finalize(&mut state, pins, present)? {
                Step::Resolved => {
                    debug!(
                        "resolved {} distribution(s) in {} round(s)",
                        state.ws.len(),
                        round + 1
                    );
                    return Ok(Resolution {
                        working_set: state.ws,
                        picked: state.picked,
                    });
                }
                Step::NeedsFetch(pending) => {
                    trace!("round {round}: need {}", pending.requirement);
                    self.obtain(&mut state, pending, present)?;
                }
                Step::Conflict { project, report } => {
                    return Err(ResolveError::VersionConflict { project, report });
                }
            }
        }
        Err(ResolveError::TooManyRounds(self.policy.max_rounds))
    }

    fn finalize(
        &mut self,
        state: &mut State,
        pins: &Pins,
        present: &WorkingSet,
    ) -> Result<Step, ResolveError> {
        while let Some(pending) = state.queue.pop_front() {
            let requirement = pins.apply(&pending.requirement)?;

            if let Some(chosen) = state.ws.get(&requirement.project).cloned() {
                if chosen.is_develop() || requirement.contains(&chosen.version) {
                    state.note_requirer(&chosen, &pending.chain);
                    self.queue_extras(state, &chosen, &requirement, &pending.chain)?;
                    continue;
                }
                return Ok(Step::Conflict {
                    project: chosen.project.to_string(),
                    report: conflict_report(state, pins, &requirement, &pending.chain, &chosen),
                });
            }

            if let Some(dist) = self.reusable(present, &requirement)? {
                debug!("using present {dist} for {requirement}");
                self.choose(state, dist, &requirement, &pending.chain)?;
                continue;
            }

            return Ok(Step::NeedsFetch(Pending {
                requirement,
                chain: pending.chain,
            }));
        }
        Ok(Step::Resolved)
    }

    /// A present distribution usable without asking the index.
    fn reusable(
        &self,
        present: &WorkingSet,
        requirement: &Requirement,
    ) -> Result<Option<Distribution>, ResolveError> {
        let Some(dist) = present.get(&requirement.project) else {
            return Ok(None);
        };
        if dist.is_develop() {
            return Ok(Some(dist.clone()));
        }
        if !requirement.contains(&dist.version) {
            return Ok(None);
        }
        let exact = requirement.exact().is_some();
        if self.policy.newest && !self.policy.offline && !exact {
            return Ok(None);
        }
        if self.policy.prefer_final
            && !dist.version.is_final()
            && !exact
            && self.final_candidate_exists(requirement)?
        {
            return Ok(None);
        }
        Ok(Some(dist.clone()))
    }

    fn final_candidate_exists(&self, requirement: &Requirement) -> Result<bool, ResolveError> {
        Ok(self
            .index
            .candidates(&requirement.project)?
            .iter()
            .any(|d| {
                d.version.is_final()
                    && requirement.contains(&d.version)
                    && (!self.policy.offline || self.index.is_cached(d))
            }))
    }

    fn obtain(
        &mut self,
        state: &mut State,
        pending: Pending,
        present: &WorkingSet,
    ) -> Result<(), ResolveError> {
        let requirement = &pending.requirement;
        let mut best = self.index.obtain(requirement, &self.policy)?;
        if let Some(dist) = present.get(&requirement.project) {
            let index = &*self.index;
            let candidates = best.into_iter().chain([dist.clone()]).collect();
            best = select_best(candidates, requirement, self.policy.prefer_final, |d| {
                index.is_local(d)
            });
        }
        let Some(mut dist) = best else {
            return Err(ResolveError::MissingDistribution {
                requirement: requirement.to_string(),
                requirer: pending.chain.join(" -> "),
            });
        };

        if let Location::Url(url) = &dist.location {
            if !self.policy.offline {
                let path = self.index.fetch(url, dist.checksum.as_deref())?;
                dist.location = Location::Path(path);
            }
        }
        self.choose(state, dist, requirement, &pending.chain)
    }

    fn choose(
        &mut self,
        state: &mut State,
        dist: Distribution,
        requirement: &Requirement,
        chain: &[String],
    ) -> Result<(), ResolveError> {
        if !dist.is_develop() && requirement.exact().is_none() {
            if !self.policy.allow_picked_versions {
                return Err(ResolveError::PickedVersion {
                    project: dist.project.to_string(),
                    version: dist.version.to_string(),
                });
            }
            info!("picked {} = {}", dist.project, dist.version);
            state.picked.push((dist.project.clone(), dist.version.clone()));
        }

        if self.policy.use_dependency_links && !dist.metadata.dependency_links.is_empty() {
            self.index.add_find_links(&dist.metadata.dependency_links)?;
        }

        let mut child = chain.to_vec();
        child.push(dist.to_string());
        for dep in &dist.metadata.requires {
            state.queue.push_back(Pending {
                requirement: dep.clone(),
                chain: child.clone(),
            });
        }
        state.note_requirer(&dist, chain);
        self.queue_extras(state, &dist, requirement, chain)?;
        state.ws.add(dist)
    }

    fn queue_extras(
        &self,
        state: &mut State,
        dist: &Distribution,
        requirement: &Requirement,
        chain: &[String],
    ) -> Result<(), ResolveError> {
        for extra in &requirement.extras {
            if !state
                .extras_done
                .insert((dist.key().to_owned(), extra.clone()))
            {
                continue;
            }
            let deps = dist.extra(extra).ok_or_else(|| ResolveError::UnknownExtra {
                project: dist.project.to_string(),
                extra: extra.clone(),
            })?;
            let mut child = chain.to_vec();
            child.push(format!("{dist}[{extra}]"));
            for dep in deps {
                state.queue.push_back(Pending {
                    requirement: dep.clone(),
                    chain: child.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Describe a conflict: who chose the distribution, who asked for an
/// incompatible one, and every other dependency in the working set that the
/// chosen versions fail to satisfy.
fn conflict_report(
    state: &State,
    pins: &Pins,
    requirement: &Requirement,
    chain: &[String],
    chosen: &Distribution,
) -> String {
    let mut lines = Vec::new();
    let chosen_by = state
        .chosen_by
        .get(chosen.key())
        .map(|by| by.join(" and "))
        .unwrap_or_default();
    lines.push(format!("{chosen} was chosen for: {chosen_by}"));
    lines.push(format!(
        "{} requires {requirement}, which is incompatible with already-chosen {chosen}",
        chain.join(" -> ")
    ));

    for dist in &state.ws {
        for dep in &dist.metadata.requires {
            let Some(other) = state.ws.get(&dep.project) else {
                continue;
            };
            let dep = pins.apply(dep).unwrap_or_else(|_| dep.clone());
            if other.is_develop() || dep.contains(&other.version) {
                continue;
            }
            let line = format!(
                "{dist} requires {dep}, which is incompatible with already-chosen {other}"
            );
            if !lines.contains(&line) {
                lines.push(line);
            }
        }
    }
    lines
        .iter()
        .map(|l| format!("  {l}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::Precedence;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    #[derive(Default)]
    struct FakeIndex {
        dists: Vec<Distribution>,
        cached: Vec<String>,
        fetched: Vec<String>,
        links: Vec<String>,
    }

    impl FakeIndex {
        fn offer(mut self, name: &str, version: &str, requires: &[&str]) -> Self {
            let dist = Distribution::new(
                name,
                Version::parse(version).unwrap(),
                Location::Url(format!("mem://{name}-{version}")),
                Precedence::Prebuilt,
            )
            .with_requires(requires.iter().map(|r| Requirement::parse(r).unwrap()).collect());
            self.dists.push(dist);
            self
        }
    }

    impl PackageIndex for FakeIndex {
        fn candidates(&self, project: &ProjectName) -> Result<Vec<Distribution>, ResolveError> {
            Ok(self
                .dists
                .iter()
                .filter(|d| &d.project == project)
                .cloned()
                .collect())
        }

        fn is_cached(&self, dist: &Distribution) -> bool {
            matches!(&dist.location, Location::Url(u) if self.cached.contains(u))
        }

        fn fetch(&mut self, url: &str, _checksum: Option<&str>) -> Result<PathBuf, ResolveError> {
            self.fetched.push(url.to_owned());
            Ok(PathBuf::from("/cache").join(url.trim_start_matches("mem://")))
        }

        fn add_find_links(&mut self, links: &[String]) -> Result<(), ResolveError> {
            self.links.extend(links.iter().cloned());
            Ok(())
        }
    }

    fn reqs(items: &[&str]) -> Vec<Requirement> {
        items.iter().map(|r| Requirement::parse(r).unwrap()).collect()
    }

    fn versions(res: &Resolution) -> BTreeMap<String, String> {
        res.working_set
            .iter()
            .map(|d| (d.key().to_owned(), d.version.to_string()))
            .collect()
    }

    #[test]
    fn resolves_transitive_dependencies() {
        let mut index = FakeIndex::default()
            .offer("app", "1.0", &["lib>=2"])
            .offer("lib", "1.0", &[])
            .offer("lib", "2.0", &["core"])
            .offer("lib", "3.0b1", &[])
            .offer("core", "0.5", &[]);
        let res = DistributionResolver::new(&mut index, ResolverPolicy::default())
            .resolve(&reqs(&["app"]), &Pins::new(), &WorkingSet::new())
            .unwrap();
        let v = versions(&res);
        assert_eq!(v["app"], "1.0");
        assert_eq!(v["lib"], "2.0");
        assert_eq!(v["core"], "0.5");
        assert_eq!(res.picked.len(), 3);
        assert_eq!(index.fetched.len(), 3);
    }

    #[test]
    fn conflict_names_both_requirers() {
        let mut index = FakeIndex::default()
            .offer("foo", "1", &[])
            .offer("foo", "2", &[])
            .offer("bar", "1.0", &["foo==2"]);
        let err = DistributionResolver::new(&mut index, ResolverPolicy::default())
            .with_requester("part x")
            .resolve(&reqs(&["foo==1", "bar"]), &Pins::new(), &WorkingSet::new())
            .unwrap_err();
        match err {
            ResolveError::VersionConflict { project, report } => {
                assert_eq!(project, "foo");
                assert!(report.contains("foo 1 was chosen for: part x"), "{report}");
                assert!(report.contains("part x -> bar 1.0 requires foo==2"), "{report}");
            }
            other => panic!("expected a conflict, got {other}"),
        }
    }

    #[test]
    fn missing_distribution_names_requirer() {
        let mut index = FakeIndex::default().offer("app", "1.0", &["ghost>=1"]);
        let err = DistributionResolver::new(&mut index, ResolverPolicy::default())
            .resolve(&reqs(&["app"]), &Pins::new(), &WorkingSet::new())
            .unwrap_err();
        match err {
            ResolveError::MissingDistribution {
                requirement,
                requirer,
            } => {
                assert_eq!(requirement, "ghost>=1");
                assert_eq!(requirer, "buildout -> app 1.0");
            }
            other => panic!("expected a missing distribution, got {other}"),
        }
    }

    #[test]
    fn pins_choose_versions_and_are_not_picked() {
        let mut index = FakeIndex::default()
            .offer("foo", "1.0", &[])
            .offer("foo", "2.0", &[]);
        let mut pins = Pins::new();
        pins.insert("foo", vec![crate::Spec::parse("1.0").unwrap()]);
        let res = DistributionResolver::new(&mut index, ResolverPolicy::default())
            .resolve(&reqs(&["foo"]), &pins, &WorkingSet::new())
            .unwrap();
        assert_eq!(versions(&res)["foo"], "1.0");
        assert!(res.picked.is_empty());
    }

    #[test]
    fn incompatible_pin_is_a_constraint_error() {
        let mut index = FakeIndex::default().offer("foo", "1.0", &[]);
        let mut pins = Pins::new();
        pins.insert("foo", vec![crate::Spec::parse("3.0").unwrap()]);
        let err = DistributionResolver::new(&mut index, ResolverPolicy::default())
            .resolve(&reqs(&["foo<2"]), &pins, &WorkingSet::new())
            .unwrap_err();
        assert!(matches!(err, ResolveError::Constraint { .. }));
    }

    #[test]
    fn picking_can_be_forbidden() {
        let mut index = FakeIndex::default().offer("foo", "1.0", &[]);
        let policy = ResolverPolicy {
            allow_picked_versions: false,
            ..ResolverPolicy::default()
        };
        let err = DistributionResolver::new(&mut index, policy)
            .resolve(&reqs(&["foo"]), &Pins::new(), &WorkingSet::new())
            .unwrap_err();
        assert!(matches!(err, ResolveError::PickedVersion { .. }));
    }

    #[test]
    fn develop_distributions_win_unconditionally() {
        let mut index = FakeIndex::default().offer("foo", "9.0", &[]);
        let develop = Distribution::new(
            "foo",
            Version::parse("0.1.dev1").unwrap(),
            Location::Path(PathBuf::from("/src/foo")),
            Precedence::Develop,
        );
        let present: WorkingSet = std::iter::once(develop).collect();
        let res = DistributionResolver::new(&mut index, ResolverPolicy::default())
            .resolve(&reqs(&["foo>=1"]), &Pins::new(), &present)
            .unwrap();
        assert!(res.working_set.iter().next().unwrap().is_develop());
        assert!(index.fetched.is_empty());
        assert!(res.picked.is_empty());
    }

    #[test]
    fn present_distribution_is_reused_when_not_newest() {
        let mut index = FakeIndex::default().offer("foo", "2.0", &[]);
        let installed = Distribution::new(
            "foo",
            Version::parse("1.0").unwrap(),
            Location::Path(PathBuf::from("/eggs/foo")),
            Precedence::Prebuilt,
        );
        let present: WorkingSet = std::iter::once(installed).collect();

        let policy = ResolverPolicy {
            newest: false,
            ..ResolverPolicy::default()
        };
        let res = DistributionResolver::new(&mut index, policy)
            .resolve(&reqs(&["foo"]), &Pins::new(), &present)
            .unwrap();
        assert_eq!(versions(&res)["foo"], "1.0");

        let res = DistributionResolver::new(&mut index, ResolverPolicy::default())
            .resolve(&reqs(&["foo"]), &Pins::new(), &present)
            .unwrap();
        assert_eq!(versions(&res)["foo"], "2.0");
    }

    #[test]
    fn offline_only_uses_cached_candidates() {
        let mut index = FakeIndex::default()
            .offer("foo", "1.0", &[])
            .offer("foo", "2.0", &[]);
        index.cached.push("mem://foo-1.0".to_owned());
        let policy = ResolverPolicy {
            offline: true,
            ..ResolverPolicy::default()
        };
        let res = DistributionResolver::new(&mut index, policy)
            .resolve(&reqs(&["foo"]), &Pins::new(), &WorkingSet::new())
            .unwrap();
        assert_eq!(versions(&res)["foo"], "1.0");
        assert!(index.fetched.is_empty());
    }

    #[test]
    fn extras_pull_in_requirements() {
        let mut web = Distribution::new(
            "web",
            Version::parse("1.0").unwrap(),
            Location::Url("mem://web-1.0".into()),
            Precedence::Prebuilt,
        );
        web.metadata
            .extras
            .insert("tests".into(), reqs(&["checker"]));
        web.metadata.dependency_links.push("/links".into());
        let mut index = FakeIndex::default().offer("checker", "0.1", &[]);
        index.dists.push(web);

        let res = DistributionResolver::new(&mut index, ResolverPolicy::default())
            .resolve(&reqs(&["web[tests]"]), &Pins::new(), &WorkingSet::new())
            .unwrap();
        assert!(versions(&res).contains_key("checker"));
        assert_eq!(index.links, vec!["/links".to_owned()]);

        let err = DistributionResolver::new(&mut index, ResolverPolicy::default())
            .resolve(&reqs(&["web[docs]"]), &Pins::new(), &WorkingSet::new())
            .unwrap_err();
        assert!(matches!(err, ResolveError::UnknownExtra { .. }));
    }

    #[test]
    fn round_limit_is_enforced() {
        let mut index = FakeIndex::default()
            .offer("a", "1", &["b"])
            .offer("b", "1", &[]);
        let policy = ResolverPolicy {
            max_rounds: 1,
            ..ResolverPolicy::default()
        };
        let err = DistributionResolver::new(&mut index, policy)
            .resolve(&reqs(&["a"]), &Pins::new(), &WorkingSet::new())
            .unwrap_err();
        assert!(matches!(err, ResolveError::TooManyRounds(1)));
    }
}

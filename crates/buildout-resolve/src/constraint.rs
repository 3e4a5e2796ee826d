//! Version pins and their interval intersection with requirements.
//!
//! Every set of bounds is read as one interval with optional lower and upper
//! ends. Applying a pin intersects the requirement's interval with the pin's
//! and writes the result back as bounds: a single point becomes `==`, an
//! empty intersection is an error.

use crate::requirement::{Op, ProjectName, Requirement, Spec};
use crate::version::Version;
use crate::ResolveError;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Bound {
    version: Version,
    inclusive: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Interval {
    lower: Option<Bound>,
    upper: Option<Bound>,
}

impl Interval {
    fn from_specs(specs: &[Spec]) -> Option<Self> {
        let mut interval = Interval::default();
        for spec in specs {
            let bound = |inclusive| Bound {
                version: spec.version.clone(),
                inclusive,
            };
            match spec.op {
                Op::Eq => {
                    interval.raise_lower(bound(true));
                    interval.lower_upper(bound(true));
                }
                Op::Gt => interval.raise_lower(bound(false)),
                Op::Ge => interval.raise_lower(bound(true)),
                Op::Lt => interval.lower_upper(bound(false)),
                Op::Le => interval.lower_upper(bound(true)),
            }
        }
        (!interval.is_empty()).then_some(interval)
    }

    fn raise_lower(&mut self, bound: Bound) {
        let tighter = match &self.lower {
            None => true,
            Some(cur) => {
                bound.version > cur.version || (bound.version == cur.version && !bound.inclusive)
            }
        };
        if tighter {
            self.lower = Some(bound);
        }
    }

    fn lower_upper(&mut self, bound: Bound) {
        let tighter = match &self.upper {
            None => true,
            Some(cur) => {
                bound.version < cur.version || (bound.version == cur.version && !bound.inclusive)
            }
        };
        if tighter {
            self.upper = Some(bound);
        }
    }

    fn intersect(&self, other: &Interval) -> Option<Interval> {
        let mut out = self.clone();
        if let Some(lower) = &other.lower {
            out.raise_lower(lower.clone());
        }
        if let Some(upper) = &other.upper {
            out.lower_upper(upper.clone());
        }
        (!out.is_empty()).then_some(out)
    }

    fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Some(lo), Some(hi)) => {
                lo.version > hi.version
                    || (lo.version == hi.version && !(lo.inclusive && hi.inclusive))
            }
            _ => false,
        }
    }

    fn to_specs(&self) -> Vec<Spec> {
        if let (Some(lo), Some(hi)) = (&self.lower, &self.upper) {
            if lo.version == hi.version {
                return vec![Spec::new(Op::Eq, lo.version.clone())];
            }
        }
        let mut specs = Vec::new();
        if let Some(lo) = &self.lower {
            let op = if lo.inclusive { Op::Ge } else { Op::Gt };
            specs.push(Spec::new(op, lo.version.clone()));
        }
        if let Some(hi) = &self.upper {
            let op = if hi.inclusive { Op::Le } else { Op::Lt };
            specs.push(Spec::new(op, hi.version.clone()));
        }
        specs
    }
}

fn describe(specs: &[Spec]) -> String {
    specs
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a pin value: a bare version, or comma-separated bounds.
pub fn parse_pin(text: &str) -> Result<Vec<Spec>, ResolveError> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Spec::parse)
        .collect()
}

/// Tighten `requirement` by `pin`.
pub fn apply_pin(requirement: &Requirement, pin: &[Spec]) -> Result<Requirement, ResolveError> {
    let incompatible = || ResolveError::Constraint {
        requirement: requirement.to_string(),
        pin: describe(pin),
    };
    let own = Interval::from_specs(&requirement.specs).ok_or_else(incompatible)?;
    let pinned = Interval::from_specs(pin).ok_or_else(incompatible)?;
    let merged = own.intersect(&pinned).ok_or_else(incompatible)?;
    Ok(Requirement {
        project: requirement.project.clone(),
        specs: merged.to_specs(),
        extras: requirement.extras.clone(),
    })
}

/// Project → pinned bounds, usually read from the `[versions]` section.
#[derive(Debug, Clone, Default)]
pub struct Pins {
    pins: BTreeMap<String, (ProjectName, Vec<Spec>)>,
}

impl Pins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, ResolveError> {
        let mut pins = Self::new();
        for (name, value) in pairs {
            let specs = parse_pin(value)?;
            if !specs.is_empty() {
                pins.insert(name, specs);
            }
        }
        Ok(pins)
    }

    pub fn insert(&mut self, project: &str, specs: Vec<Spec>) {
        let name = ProjectName::new(project);
        self.pins.insert(name.key().to_owned(), (name, specs));
    }

    pub fn get(&self, project: &ProjectName) -> Option<&[Spec]> {
        self.pins.get(project.key()).map(|(_, s)| s.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    /// `requirement` tightened by its pin, or unchanged when unpinned.
    pub fn apply(&self, requirement: &Requirement) -> Result<Requirement, ResolveError> {
        match self.get(&requirement.project) {
            Some(pin) => apply_pin(requirement, pin),
            None => Ok(requirement.clone()),
        }
    }
}

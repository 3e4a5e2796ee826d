use buildout_resolve::{
    CatalogIndex, DistributionResolver, Location, PackageIndex, Pins, Requirement, ResolveError,
    ResolverPolicy, WorkingSet,
};
use std::fs;
use std::path::Path;

fn write_catalog(dir: &Path, entries: &[(&str, &str, &[&str])]) {
    let mut text = String::new();
    for (name, version, requires) in entries {
        let file = format!("{name}-{version}.tar");
        fs::write(dir.join(&file), format!("{name} {version}")).unwrap();
        let requires: Vec<String> = requires.iter().map(|r| format!("\"{r}\"")).collect();
        text.push_str(&format!(
            "[[dist]]\nname = \"{name}\"\nversion = \"{version}\"\nurl = \"{file}\"\nrequires = [{}]\n\n",
            requires.join(", ")
        ));
    }
    fs::write(dir.join("index.toml"), text).unwrap();
}

fn reqs(items: &[&str]) -> Vec<Requirement> {
    items.iter().map(|r| r.parse().unwrap()).collect()
}

#[test]
fn resolves_and_caches_from_a_catalog() {
    let links = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    write_catalog(
        links.path(),
        &[
            ("app", "1.0", &["lib>=1,<2"]),
            ("lib", "1.2", &[]),
            ("lib", "1.4rc1", &[]),
            ("lib", "2.0", &[]),
        ],
    );

    let mut index = CatalogIndex::new(cache.path());
    index.load_catalog(&links.path().to_string_lossy()).unwrap();

    let resolution = DistributionResolver::new(&mut index, ResolverPolicy::default())
        .resolve(&reqs(&["app"]), &Pins::new(), &WorkingSet::new())
        .unwrap();
    let lib = resolution
        .working_set
        .iter()
        .find(|d| d.key() == "lib")
        .unwrap();
    assert_eq!(lib.version.to_string(), "1.2");
    assert!(matches!(&lib.location, Location::Path(p) if p.starts_with(cache.path())));
    assert!(cache.path().join("lib-1.2.tar").is_file());

    // a second, offline run only sees what the first one cached
    let offline = ResolverPolicy {
        offline: true,
        ..ResolverPolicy::default()
    };
    let resolution = DistributionResolver::new(&mut index, offline)
        .resolve(&reqs(&["lib"]), &Pins::new(), &WorkingSet::new())
        .unwrap();
    assert_eq!(
        resolution.working_set.iter().next().unwrap().version.to_string(),
        "1.2"
    );
}

#[test]
fn offline_without_cache_is_missing() {
    let links = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    write_catalog(links.path(), &[("foo", "1.0", &[])]);
    let mut index = CatalogIndex::new(cache.path());
    index.load_catalog(&links.path().to_string_lossy()).unwrap();

    let policy = ResolverPolicy {
        offline: true,
        ..ResolverPolicy::default()
    };
    let err = DistributionResolver::new(&mut index, policy)
        .resolve(&reqs(&["foo"]), &Pins::new(), &WorkingSet::new())
        .unwrap_err();
    assert!(matches!(err, ResolveError::MissingDistribution { .. }));
}

#[test]
fn develop_manifests_are_loaded() {
    let src = tempfile::tempdir().unwrap();
    fs::write(
        src.path().join("dist.toml"),
        "name = \"mylib\"\nversion = \"0.3.dev0\"\nrequires = []\n",
    )
    .unwrap();
    let dists = CatalogIndex::develop_distributions(&[src.path().to_path_buf()]).unwrap();
    assert_eq!(dists.len(), 1);
    assert!(dists[0].is_develop());
    assert!(!dists[0].version.is_final());
}

#[test]
fn malformed_catalog_is_reported() {
    let links = tempfile::tempdir().unwrap();
    fs::write(links.path().join("index.toml"), "[[dist]]\nname = 3\n").unwrap();
    let cache = tempfile::tempdir().unwrap();
    let mut index = CatalogIndex::new(cache.path());
    let err = index
        .add_find_links(&[links.path().to_string_lossy().into_owned()])
        .unwrap_err();
    assert!(matches!(err, ResolveError::Catalog { .. }));
}

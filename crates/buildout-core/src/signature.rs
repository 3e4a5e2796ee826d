use crate::CoreError;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Serialize)]
struct SignatureInput<'a> {
    options: &'a BTreeMap<String, String>,
    distributions: &'a [String],
}

/// Fingerprint of a part: its resolved options plus the fingerprints of the
/// distributions its recipe came from.
///
/// `distributions` must already be sorted; the options map is ordered by
/// construction, so the canonical JSON is stable across runs.
pub fn part_signature(
    options: &BTreeMap<String, String>,
    distributions: &[String],
) -> Result<String, CoreError> {
    let canonical = serde_json::to_vec(&SignatureInput {
        options,
        distributions,
    })?;
    Ok(blake3::hash(&canonical).to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn stable_for_equal_input() {
        let a = part_signature(&opts(&[("recipe", "r"), ("x", "1")]), &["d==1:f".into()]).unwrap();
        let b = part_signature(&opts(&[("x", "1"), ("recipe", "r")]), &["d==1:f".into()]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn options_and_distributions_both_count() {
        let base = part_signature(&opts(&[("x", "1")]), &["d==1:f".into()]).unwrap();
        let changed_opt = part_signature(&opts(&[("x", "2")]), &["d==1:f".into()]).unwrap();
        let changed_dist = part_signature(&opts(&[("x", "1")]), &["d==2:f".into()]).unwrap();
        assert_ne!(base, changed_opt);
        assert_ne!(base, changed_dist);
    }
}

//! Annotated view of a resolved configuration, for `inspect --config`.

use crate::loader::BUILDOUT_SECTION;
use crate::raw::Annotation;
use crate::resolver::ConfigResolver;
use crate::ConfigError;
use serde::Serialize;
use std::fmt::Write as _;

#[derive(Debug, Clone, Serialize)]
pub struct AnnotatedOption {
    pub section: String,
    pub option: String,
    pub value: String,
    pub history: Vec<Annotation>,
}

/// Resolve every option of every section together with its provenance.
/// `[buildout]` comes first, the remaining sections in name order.
pub fn annotate(resolver: &ConfigResolver) -> Result<Vec<AnnotatedOption>, ConfigError> {
    let mut names = resolver.section_names();
    names.sort_by(|a, b| {
        (a != BUILDOUT_SECTION)
            .cmp(&(b != BUILDOUT_SECTION))
            .then_with(|| a.cmp(b))
    });

    let mut out = Vec::new();
    for name in names {
        let section = resolver.section(&name)?;
        for option in section.keys()? {
            let value = section.get(&option)?.unwrap_or_default();
            out.push(AnnotatedOption {
                section: name.clone(),
                option: option.clone(),
                value,
                history: section.provenance(&option)?,
            });
        }
    }
    Ok(out)
}

/// Render annotated options as ini text with the provenance under each value.
pub fn render(options: &[AnnotatedOption]) -> String {
    let mut out = String::new();
    let mut current: Option<&str> = None;
    for opt in options {
        if current != Some(opt.section.as_str()) {
            if current.is_some() {
                out.push('\n');
            }
            let _ = writeln!(out, "[{}]", opt.section);
            current = Some(&opt.section);
        }
        let mut lines = opt.value.lines();
        let _ = writeln!(out, "{} = {}", opt.option, lines.next().unwrap_or(""));
        for line in lines {
            let _ = writeln!(out, "    {line}");
        }
        for annotation in &opt.history {
            let _ = writeln!(out, "    @{annotation}");
        }
    }
    out
}

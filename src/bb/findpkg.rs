// Purpose: Expand user command specifications into loaded, named Commands.
// Inputs/Outputs: Path/wildcard/import-path specs in; a deterministic command list out.
// Invariants: Output is ordered by import path; dispatch names are unique; library
// packages named by a spec are dropped silently.
// Gotchas: Wildcard candidates are probed cheaply before loading so that a glob over
// a mixed tree does not pull every library package through the loader.

use anyhow::bail;
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::pkg::load::{collect_gs_files, last_segment, Loader, PkgRole};
use crate::pkg::suggest::did_you_mean;

#[derive(Debug, Clone)]
pub struct Command {
    pub name: String,
    pub pkg_id: String,
    pub import_path: String,
}

/// Resolve every spec, load the results in one batch, keep the program-entry
/// packages, and name them.
pub fn find(loader: &mut Loader, specs: &[String]) -> anyhow::Result<Vec<Command>> {
    let mut ids = BTreeSet::new();
    for spec in specs {
        for id in expand_spec(loader, spec)? {
            ids.insert(id);
        }
    }

    let mut cmds = Vec::new();
    for id in &ids {
        let pkg = match loader.get(id) {
            Some(p) => p,
            None => continue,
        };
        if pkg.role != PkgRole::Program {
            continue;
        }
        cmds.push(Command {
            name: last_segment(&pkg.import_path).to_string(),
            pkg_id: pkg.id.clone(),
            import_path: pkg.import_path.clone(),
        });
    }
    if cmds.is_empty() {
        bail!("no valid commands given");
    }
    cmds.sort_by(|a, b| a.import_path.cmp(&b.import_path));

    let mut seen: std::collections::BTreeMap<&str, &str> = Default::default();
    for cmd in &cmds {
        if let Some(other) = seen.insert(&cmd.name, &cmd.import_path) {
            bail!(
                "duplicate command {} ({} and {})",
                cmd.name,
                other,
                cmd.import_path
            );
        }
    }
    Ok(cmds)
}

fn expand_spec(loader: &mut Loader, spec: &str) -> anyhow::Result<Vec<String>> {
    if spec.contains('*') {
        let dirs = expand_wildcard(spec)?;
        let mut ids = Vec::new();
        for dir in dirs {
            ids.push(loader.load_dir(&dir)?);
        }
        return Ok(ids);
    }
    if is_path_spec(spec) {
        let dir = PathBuf::from(spec);
        if !dir.is_dir() {
            bail!("{}: not found{}", spec, sibling_hint(&dir));
        }
        return Ok(vec![loader.load_dir(&dir)?]);
    }
    Ok(vec![loader.load_import_path(spec)?])
}

fn is_path_spec(spec: &str) -> bool {
    spec.starts_with('/')
        || spec.starts_with("./")
        || spec.starts_with("../")
        || Path::new(spec).is_dir()
}

/// Walk below the non-wildcard prefix and collect directories whose relative
/// path matches the pattern and that look like program-entry packages.
fn expand_wildcard(spec: &str) -> anyhow::Result<Vec<PathBuf>> {
    let (prefix, pattern) = split_wildcard(spec);
    let root = if prefix.is_empty() {
        PathBuf::from(".")
    } else {
        PathBuf::from(&prefix)
    };
    if !root.is_dir() {
        bail!("{}: not found", spec);
    }
    let re = wildcard_regex(&pattern);
    let mut matches = Vec::new();
    walk_dirs(&root, &PathBuf::new(), &mut |rel, dir| {
        let rel_str = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        if re.is_match(&rel_str) && is_command_dir(dir) {
            matches.push(dir.to_path_buf());
        }
    })?;
    matches.sort();
    if matches.is_empty() {
        bail!("{}: not found", spec);
    }
    Ok(matches)
}

fn split_wildcard(spec: &str) -> (String, String) {
    let mut prefix: Vec<&str> = Vec::new();
    let mut rest: Vec<&str> = Vec::new();
    let mut in_pattern = false;
    for comp in spec.split('/') {
        if in_pattern || comp.contains('*') {
            in_pattern = true;
            rest.push(comp);
        } else {
            prefix.push(comp);
        }
    }
    (prefix.join("/"), rest.join("/"))
}

fn wildcard_regex(pattern: &str) -> Regex {
    let mut out = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => out.push_str("[^/]*"),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out).unwrap()
}

fn walk_dirs(
    dir: &Path,
    rel: &Path,
    visit: &mut dyn FnMut(&Path, &Path),
) -> anyhow::Result<()> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    entries.sort();
    for entry in entries {
        let name = match entry.file_name() {
            Some(n) => n.to_os_string(),
            None => continue,
        };
        let child_rel = rel.join(&name);
        visit(&child_rel, &entry);
        walk_dirs(&entry, &child_rel, visit)?;
    }
    Ok(())
}

/// Cheap program-entry probe: does any source file in the directory carry a
/// `module main` clause?
pub fn is_command_dir(dir: &Path) -> bool {
    let re = Regex::new(r"(?m)^\s*module\s+main\b").unwrap();
    let files = match collect_gs_files(dir) {
        Ok(f) => f,
        Err(_) => return false,
    };
    for f in files {
        if let Ok(text) = fs::read_to_string(&f) {
            if re.is_match(&text) {
                return true;
            }
        }
    }
    false
}

fn sibling_hint(dir: &Path) -> String {
    let parent = match dir.parent() {
        Some(p) => p,
        None => return String::new(),
    };
    let leaf = dir
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let candidates: Vec<String> = fs::read_dir(parent)
        .ok()
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_dir())
                .filter_map(|e| e.file_name().to_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    match did_you_mean(&leaf, candidates) {
        Some(hint) => format!("\nhelp: {}", hint),
        None => String::new(),
    }
}

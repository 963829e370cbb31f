// Purpose: Work out which modules are local to this build, detect conflicts, and
// compute the set of dependency packages that must be copied into the tree.
// Inputs/Outputs: The loaded command set in; a local-module map keyed by module path
// and a deduplicated copy set out.
// Invariants: One module path maps to exactly one on-disk root per build; every
// conflict error carries an `add replace` suggestion line a tool can parse.
// Gotchas: Remote requirements come from manifests, never from source walks; remote
// module source is not on disk.

use anyhow::{bail, Context};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::bb::findpkg::Command;
use crate::pkg::load::{first_segment_has_dot, Loader, Module, Package, PkgRole, SUM_NAME};
use crate::pkg::modfile::ModFile;

#[derive(Debug, Clone)]
pub struct LocalModule {
    pub module: Module,
    pub provenance: String,
}

/// All modules the generated tree must carry a copy of: the commands' own
/// modules, plus every module some command reaches through a local replace
/// directive.
pub fn collect_local(
    loader: &Loader,
    cmds: &[Command],
) -> anyhow::Result<BTreeMap<String, LocalModule>> {
    let mut locals: BTreeMap<String, LocalModule> = BTreeMap::new();

    for cmd in cmds {
        let pkg = command_pkg(loader, cmd);
        let module = match &pkg.module {
            Some(m) => m,
            None => continue,
        };
        record_local(
            &mut locals,
            module,
            format!(
                "your request to compile {} from {}",
                module.path,
                module.dir.display()
            ),
            module,
        )?;
    }

    for cmd in cmds {
        let pkg = command_pkg(loader, cmd);
        let own_module = match &pkg.module {
            Some(m) => m.clone(),
            None => continue,
        };
        for dep in loader.transitive(&cmd.pkg_id) {
            let module = match &dep.module {
                Some(m) => m,
                None => continue,
            };
            if !module.has_local_replace() {
                continue;
            }
            record_local(
                &mut locals,
                module,
                format!(
                    "{}'s {} ({})",
                    own_module.path,
                    crate::pkg::load::MANIFEST_NAME,
                    own_module.modfile.display()
                ),
                &own_module,
            )?;
        }
    }

    // A command may also expect one of these modules remotely: its manifest
    // requires the module without replacing it locally. The synthetic
    // manifest will force the local copy on it, so surface the conflict now.
    for cmd in cmds {
        let pkg = command_pkg(loader, cmd);
        let module = match &pkg.module {
            Some(m) => m,
            None => continue,
        };
        let manifest = read_manifest(&module.modfile)?;
        for req in &manifest.require {
            if manifest.local_replace_for(&req.module).is_some() {
                continue;
            }
            if let Some(local) = locals.get(&req.module) {
                let rel = relative_to(&module.dir, &local.module.dir);
                tracing::warn!(
                    "conflicting module dependencies on {}:", req.module
                );
                tracing::warn!("  {} uses version {}", module.path, req.version);
                tracing::warn!(
                    "  {} uses directory {}",
                    local.provenance,
                    local.module.dir.display()
                );
                bail!(
                    "conflicting module dependencies: {} => {{version {}, {}}}\n\
                     add replace {} => {} to {}",
                    req.module,
                    req.version,
                    local.module.dir.display(),
                    req.module,
                    rel.display(),
                    module.modfile.display()
                );
            }
        }
    }

    Ok(locals)
}

fn record_local(
    locals: &mut BTreeMap<String, LocalModule>,
    module: &Module,
    provenance: String,
    offender: &Module,
) -> anyhow::Result<()> {
    if let Some(existing) = locals.get(&module.path) {
        if existing.module.dir != module.dir {
            let rel = relative_to(&offender.dir, &existing.module.dir);
            bail!(
                "two conflicting versions of module {} have been requested; \
                 one from {}, the other from {}\n\
                 conflicting module dependencies: {} => {{{}, {}}}\n\
                 add replace {} => {} to {}",
                module.path,
                existing.provenance,
                provenance,
                module.path,
                existing.module.dir.display(),
                module.dir.display(),
                module.path,
                rel.display(),
                offender.modfile.display()
            );
        }
        return Ok(());
    }
    locals.insert(
        module.path.clone(),
        LocalModule {
            module: module.clone(),
            provenance,
        },
    );
    Ok(())
}

/// Dependency packages to copy verbatim into the tree, deduplicated by
/// package id and ordered deterministically.
pub fn collect_copy_set<'l>(
    loader: &'l Loader,
    cmds: &[Command],
    locals: &BTreeMap<String, LocalModule>,
) -> Vec<&'l Package> {
    let mut out: BTreeMap<&str, &'l Package> = BTreeMap::new();
    for cmd in cmds {
        let cmd_pkg = command_pkg(loader, cmd);
        let module_mode = cmd_pkg.module.is_some();
        for dep in loader.transitive(&cmd.pkg_id) {
            if dep.role != PkgRole::Library {
                continue;
            }
            let wanted = if module_mode {
                dep.module
                    .as_ref()
                    .map(|m| locals.contains_key(&m.path))
                    .unwrap_or(false)
                    || locals
                        .keys()
                        .any(|p| dep.import_path.starts_with(&format!("{}/", p)))
            } else {
                // First import path component contains a dot: the poor man's
                // standard-library test.
                first_segment_has_dot(&dep.import_path)
            };
            if wanted {
                out.entry(dep.id.as_str()).or_insert(dep);
            }
        }
    }
    out.into_values().collect()
}

/// Copy dependency package sources byte-for-byte under `src_dir`.
pub fn copy_packages(src_dir: &Path, pkgs: &[&Package]) -> anyhow::Result<()> {
    for pkg in pkgs {
        let dst = src_dir.join(&pkg.import_path);
        fs::create_dir_all(&dst).with_context(|| format!("create {}", dst.display()))?;
        for file in &pkg.files {
            fs::copy(&file.path, dst.join(&file.name))
                .with_context(|| format!("copy {}", file.path.display()))?;
        }
    }
    Ok(())
}

/// Copy each local module's manifest (and checksum file, when present) to its
/// place in the tree.
pub fn copy_module_files(
    src_dir: &Path,
    locals: &BTreeMap<String, LocalModule>,
) -> anyhow::Result<()> {
    for local in locals.values() {
        let module = &local.module;
        let dst = src_dir.join(&module.path);
        fs::create_dir_all(&dst).with_context(|| format!("create {}", dst.display()))?;
        if module.modfile.exists() {
            fs::copy(&module.modfile, dst.join(crate::pkg::load::MANIFEST_NAME))
                .with_context(|| format!("copy {}", module.modfile.display()))?;
        }
        let sum = module.sumfile();
        if sum.exists() {
            fs::copy(&sum, dst.join(SUM_NAME))
                .with_context(|| format!("copy {}", sum.display()))?;
        }
    }
    Ok(())
}

pub fn read_manifest(path: &Path) -> anyhow::Result<ModFile> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    ModFile::parse(&text).with_context(|| format!("parse {}", path.display()))
}

fn command_pkg<'l>(loader: &'l Loader, cmd: &Command) -> &'l Package {
    loader
        .get(&cmd.pkg_id)
        .unwrap_or_else(|| panic!("command package {} vanished from the loader", cmd.pkg_id))
}

/// `to`, expressed relative to `from`. Falls back to the absolute path when
/// the two share no usable prefix.
fn relative_to(from: &Path, to: &Path) -> PathBuf {
    let from: Vec<Component> = from.components().collect();
    let to_parts: Vec<Component> = to.components().collect();
    let mut common = 0;
    while common < from.len() && common < to_parts.len() && from[common] == to_parts[common] {
        common += 1;
    }
    if common == 0 {
        return to.to_path_buf();
    }
    let mut out = PathBuf::new();
    for _ in common..from.len() {
        out.push("..");
    }
    for part in &to_parts[common..] {
        out.push(part.as_os_str());
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

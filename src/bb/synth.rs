// Purpose: Produce the synthetic top-level module: its manifest and checksum file.
// Inputs/Outputs: The local-module map and the command manifests in; gs.mod and
// gs.sum in the busybox directory out.
// Invariants: Output is byte-stable across runs: requires and replaces are emitted
// sorted, sum lines keep first-seen order over a sorted module walk.
// Gotchas: The synthetic module path must never resolve online; every local module
// needs both a require and a local replace or the toolchain will go looking for it.

use anyhow::{bail, Context};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;

use crate::bb::deps::LocalModule;
use crate::pkg::load::{last_segment, MANIFEST_NAME, SUM_NAME};
use crate::pkg::modfile::{ModFile, Replace, Require};
use crate::pkg::sumfile::SumFile;

/// Fixed path of the generated top-level module. Something that'll never be
/// online, lest the toolchain decides to go looking for it.
pub const SYNTH_MODULE_PATH: &str = "bb.gsbox.dev/bb";

/// Import path of the dispatch registry inside the synthetic module.
pub fn registry_import() -> String {
    format!("{}/pkg/bbmain", SYNTH_MODULE_PATH)
}

/// Build the synthetic manifest: a require plus a tree-relative replace per
/// local module, and the union of the commands' own non-local replace
/// directives.
pub fn synthesize_manifest(
    locals: &BTreeMap<String, LocalModule>,
    cmd_manifests: &[(String, ModFile)],
) -> anyhow::Result<ModFile> {
    let mut mf = ModFile {
        module: SYNTH_MODULE_PATH.to_string(),
        require: Vec::new(),
        replace: Vec::new(),
    };

    for (path, local) in locals {
        let version = if local.module.version.is_empty() {
            // A generated version number gets past manifest validation when
            // the real one is unknown.
            if has_major_version_suffix(path) {
                bail!(
                    "module {} carries a major-version suffix; a real version is required",
                    path
                );
            }
            "v0.0.0".to_string()
        } else {
            local.module.version.clone()
        };
        mf.require.push(Require {
            module: path.clone(),
            version,
        });
        mf.replace.push(Replace {
            module: path.clone(),
            path: format!("../../{}", path),
            version: None,
        });
    }

    // Carry over the commands' own non-local replaces. Local ones are already
    // realized above; between conflicting copies the first writer wins.
    //
    // TODO: reconcile conflicting non-local replace directives instead of
    // keeping the first.
    let mut copied: BTreeMap<String, Replace> = BTreeMap::new();
    for (cmd_module, manifest) in cmd_manifests {
        for r in &manifest.replace {
            if r.is_local() || locals.contains_key(&r.module) {
                continue;
            }
            match copied.get(&r.module) {
                Some(existing)
                    if existing.path != r.path || existing.version != r.version =>
                {
                    tracing::warn!(
                        "conflicting replace directives for {}: keeping {} => {}, ignoring {} => {} from {}",
                        r.module,
                        existing.module,
                        existing.path,
                        r.module,
                        r.path,
                        cmd_module
                    );
                }
                Some(_) => {}
                None => {
                    copied.insert(r.module.clone(), r.clone());
                }
            }
        }
    }
    mf.replace.extend(copied.into_values());

    mf.sort_deterministic();
    Ok(mf)
}

/// Write gs.mod and the concatenated gs.sum into the busybox directory.
pub fn write_module_files(
    bb_dir: &Path,
    locals: &BTreeMap<String, LocalModule>,
    cmd_manifests: &[(String, ModFile)],
) -> anyhow::Result<()> {
    let mf = synthesize_manifest(locals, cmd_manifests)?;
    let mod_path = bb_dir.join(MANIFEST_NAME);
    std::fs::write(&mod_path, mf.to_pretty_toml())
        .with_context(|| format!("write {}", mod_path.display()))?;

    let mut sum = SumFile::new();
    for local in locals.values() {
        sum.append_from(&local.module.sumfile())?;
    }
    sum.write_to(&bb_dir.join(SUM_NAME))?;
    Ok(())
}

fn has_major_version_suffix(module_path: &str) -> bool {
    let re = Regex::new(r"^v[0-9]+$").unwrap();
    re.is_match(last_segment(module_path))
}

#[cfg(test)]
mod tests {
    use super::{synthesize_manifest, SYNTH_MODULE_PATH};
    use crate::bb::deps::LocalModule;
    use crate::pkg::load::Module;
    use crate::pkg::modfile::{ModFile, Replace};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn local(path: &str, version: &str, dir: &str) -> (String, LocalModule) {
        (
            path.to_string(),
            LocalModule {
                module: Module {
                    path: path.to_string(),
                    version: version.to_string(),
                    dir: PathBuf::from(dir),
                    modfile: PathBuf::from(dir).join("gs.mod"),
                    replace: None,
                },
                provenance: format!("test module {}", path),
            },
        )
    }

    #[test]
    fn requires_and_replaces_every_local_module() {
        let locals: BTreeMap<_, _> = [
            local("example.com/mod2", "v0.2.0", "/work/mod2"),
            local("example.com/mod1", "", "/work/mod1"),
        ]
        .into_iter()
        .collect();
        let mf = synthesize_manifest(&locals, &[]).expect("synthesize");
        assert_eq!(mf.module, SYNTH_MODULE_PATH);
        assert_eq!(mf.require.len(), 2);
        assert_eq!(mf.require[0].module, "example.com/mod1");
        assert_eq!(mf.require[0].version, "v0.0.0");
        assert_eq!(mf.require[1].version, "v0.2.0");
        assert_eq!(mf.replace[0].path, "../../example.com/mod1");
        assert_eq!(mf.replace[1].path, "../../example.com/mod2");
    }

    #[test]
    fn major_version_suffix_requires_real_version() {
        let locals: BTreeMap<_, _> = [local("example.com/lib/v2", "", "/work/lib")]
            .into_iter()
            .collect();
        let err = synthesize_manifest(&locals, &[]).unwrap_err();
        assert!(err.to_string().contains("major-version suffix"));

        let locals: BTreeMap<_, _> = [local("example.com/lib/v2", "v2.1.0", "/work/lib")]
            .into_iter()
            .collect();
        assert!(synthesize_manifest(&locals, &[]).is_ok());
    }

    #[test]
    fn non_local_replaces_union_first_writer_wins() {
        let locals: BTreeMap<_, _> = [local("example.com/mod1", "", "/work/mod1")]
            .into_iter()
            .collect();
        let mut a = ModFile::parse("module = \"example.com/mod1\"").expect("parse");
        a.replace.push(Replace {
            module: "remote.example/dep".into(),
            path: "fork.example/dep".into(),
            version: Some("v1.0.0".into()),
        });
        a.replace.push(Replace {
            module: "example.com/mod1".into(),
            path: "../elsewhere".into(),
            version: None,
        });
        let mut b = ModFile::parse("module = \"example.com/modb\"").expect("parse");
        b.replace.push(Replace {
            module: "remote.example/dep".into(),
            path: "other.example/dep".into(),
            version: Some("v2.0.0".into()),
        });

        let mf = synthesize_manifest(
            &locals,
            &[
                ("example.com/mod1".to_string(), a),
                ("example.com/modb".to_string(), b),
            ],
        )
        .expect("synthesize");

        let copied: Vec<&Replace> = mf
            .replace
            .iter()
            .filter(|r| r.module == "remote.example/dep")
            .collect();
        assert_eq!(copied.len(), 1);
        assert_eq!(copied[0].path, "fork.example/dep");
        // The local replace from the input manifest is realized by the
        // tree-relative one, not copied.
        let mod1: Vec<&Replace> = mf
            .replace
            .iter()
            .filter(|r| r.module == "example.com/mod1")
            .collect();
        assert_eq!(mod1.len(), 1);
        assert_eq!(mod1[0].path, "../../example.com/mod1");
    }

    #[test]
    fn manifest_output_is_byte_stable() {
        let locals: BTreeMap<_, _> = [
            local("example.com/mod2", "v0.2.0", "/work/mod2"),
            local("example.com/mod1", "", "/work/mod1"),
        ]
        .into_iter()
        .collect();
        let one = synthesize_manifest(&locals, &[]).expect("a").to_pretty_toml();
        let two = synthesize_manifest(&locals, &[]).expect("b").to_pretty_toml();
        assert_eq!(one, two);
        assert!(one.contains("module = \"bb.gsbox.dev/bb\""));
    }
}

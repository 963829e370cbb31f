// Purpose: Build one busybox binary out of many gs command sources.
// Inputs/Outputs: Opts in; a generated source tree and (unless generate-only) a
// compiled binary out. The tree is deleted on success and preserved on failure.
// Invariants: The generated tree is exclusively owned by one build; iteration over
// modules and packages is sorted so trees are byte-identical across runs.
// Gotchas: In non-module builds the workspace root handed to the compiler is the
// generated tree itself, not the user's root.

pub mod deps;
pub mod env;
pub mod findpkg;
pub mod rewrite;
pub mod stub;
pub mod synth;

use anyhow::{bail, Context};
use fs2::FileExt;
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bb::env::{BuildOpts, Environ, GsToolchain, Toolchain};
use crate::pkg::load::{Loader, ModMode};
use crate::pkg::modfile::ModFile;

/// A compile failure of the generated tree with modules enabled.
#[derive(Debug, Error)]
#[error("module build failed in {}: {err:#}", .dir.display())]
pub struct ModuleBuildError {
    pub dir: PathBuf,
    pub err: anyhow::Error,
}

/// A compile failure of the generated tree in workspace (non-module) mode.
#[derive(Debug, Error)]
#[error("non-module build failed in {} (root {}): {err:#}", .dir.display(), .root.display())]
pub struct PathBuildError {
    pub dir: PathBuf,
    pub root: PathBuf,
    pub err: anyhow::Error,
}

/// The arguments to build_busybox.
pub struct Opts {
    /// Environment used for compilation and package discovery.
    pub env: Environ,
    /// An empty or nonexistent directory to generate source in. A temporary
    /// directory is used when absent.
    pub gen_src_dir: Option<PathBuf>,
    /// Command specs: directories, wildcard patterns, or import paths.
    pub command_paths: Vec<String>,
    /// Output file for the compiled binary.
    pub binary_path: Option<PathBuf>,
    /// Forwarded to the compiler untouched.
    pub build_opts: BuildOpts,
    /// Permit mixing module-bearing commands with non-module commands.
    pub allow_mixed_mode: bool,
    /// Lay out the tree and stop before compiling. Requires gen_src_dir.
    pub generate_only: bool,
    /// Compiler override, mainly for tests. Defaults to the real gs adapter.
    pub toolchain: Option<Box<dyn Toolchain>>,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            env: Environ::default(),
            gen_src_dir: None,
            command_paths: Vec::new(),
            binary_path: None,
            build_opts: BuildOpts::default(),
            allow_mixed_mode: false,
            generate_only: false,
            toolchain: None,
        }
    }
}

/// Build a busybox of many gs commands. See the module docs for the layout of
/// the generated tree.
pub fn build_busybox(opts: &Opts) -> anyhow::Result<()> {
    opts.env.valid()?;
    if opts.generate_only && opts.gen_src_dir.is_none() {
        bail!("generate-only requires a generated-source directory");
    }
    if !opts.generate_only && opts.binary_path.is_none() {
        bail!("no binary path given");
    }

    let mut tmp_guard: Option<tempfile::TempDir> = None;
    let tree_root = match &opts.gen_src_dir {
        Some(dir) => {
            if dir.exists() {
                let children = fs::read_dir(dir)
                    .with_context(|| format!("read generated-source dir {}", dir.display()))?
                    .count();
                if children > 0 {
                    bail!(
                        "directory supplied for generated source is not an empty directory"
                    );
                }
            } else {
                fs::create_dir_all(dir)
                    .with_context(|| format!("create generated-source dir {}", dir.display()))?;
            }
            dir.canonicalize()?
        }
        None => {
            let td = tempfile::Builder::new()
                .prefix("bb-")
                .tempdir()
                .context("create temporary generated-source dir")?;
            let root = td.path().to_path_buf();
            tmp_guard = Some(td);
            root
        }
    };

    match build_in_tree(opts, &tree_root) {
        Ok(()) => Ok(()),
        Err(err) => {
            let kept = match tmp_guard.take() {
                Some(td) => td.keep(),
                None => tree_root,
            };
            warn!(
                "preserving generated source tree at {} due to error",
                kept.display()
            );
            Err(err)
        }
    }
}

fn build_in_tree(opts: &Opts, tree_root: &Path) -> anyhow::Result<()> {
    let _lock = TreeLock::acquire(tree_root)?;

    let src_dir = tree_root.join("src");
    let bb_dir = src_dir.join(synth::SYNTH_MODULE_PATH);
    fs::create_dir_all(&bb_dir).with_context(|| format!("create {}", bb_dir.display()))?;

    // One loader for the whole batch so shared dependencies parse once.
    let mut loader = Loader::new(opts.env.mod_mode, opts.env.src_root());
    let cmds = findpkg::find(&mut loader, &opts.command_paths)
        .context("finding packages failed")?;
    info!("building busybox of {} commands", cmds.len());

    // Mixed module/non-module input is only valid when asked for explicitly.
    let mut module_paths = BTreeSet::new();
    let mut num_no_module = 0usize;
    for cmd in &cmds {
        match loader.get(&cmd.pkg_id).and_then(|p| p.module.as_ref()) {
            Some(m) => {
                module_paths.insert(m.path.clone());
            }
            None => num_no_module += 1,
        }
    }
    if !opts.allow_mixed_mode && !module_paths.is_empty() && num_no_module > 0 {
        bail!(
            "mixed module/non-module compilation is not supported -- commands contain main modules {}",
            module_paths.into_iter().collect::<Vec<_>>().join(", ")
        );
    }

    let registry = synth::registry_import();
    for cmd in &cmds {
        let pkg = loader
            .get(&cmd.pkg_id)
            .with_context(|| format!("command package {} vanished", cmd.pkg_id))?;
        let dest = src_dir.join(&cmd.import_path);
        rewrite::rewrite_package(pkg, &cmd.name, &dest, &registry)
            .with_context(|| format!("rewriting command {} failed", cmd.import_path))?;
        debug!("rewrote {} as {}", cmd.import_path, cmd.name);
    }

    let locals = deps::collect_local(&loader, &cmds)?;
    let copies = deps::collect_copy_set(&loader, &cmds, &locals);
    deps::copy_packages(&src_dir, &copies)
        .context("collecting and putting dependencies in place failed")?;
    deps::copy_module_files(&src_dir, &locals)?;

    let modules_enabled = opts.env.mod_mode == ModMode::On || !locals.is_empty();
    if modules_enabled {
        let cmd_manifests = command_manifests(&loader, &cmds)?;
        synth::write_module_files(&bb_dir, &locals, &cmd_manifests)?;
    }

    let import_paths: Vec<String> = cmds.iter().map(|c| c.import_path.clone()).collect();
    stub::write_stub(&bb_dir, &import_paths)?;

    if opts.generate_only {
        return Ok(());
    }

    let binary_path = opts
        .binary_path
        .as_ref()
        .context("no binary path given")?;
    let workspace_mode = opts.env.mod_mode == ModMode::Off || num_no_module > 0;
    let mut build_env = opts.env.clone();
    if workspace_mode {
        build_env.root = Some(tree_root.to_path_buf());
    }
    let default_toolchain = GsToolchain;
    let toolchain: &dyn Toolchain = match &opts.toolchain {
        Some(t) => t.as_ref(),
        None => &default_toolchain,
    };
    if let Err(err) = toolchain.build_dir(&build_env, &bb_dir, binary_path, &opts.build_opts) {
        if workspace_mode {
            return Err(PathBuildError {
                dir: bb_dir,
                root: tree_root.to_path_buf(),
                err,
            }
            .into());
        }
        return Err(ModuleBuildError { dir: bb_dir, err }.into());
    }
    Ok(())
}

/// The manifests of the commands' own modules, in command order, each module
/// read once.
fn command_manifests(
    loader: &Loader,
    cmds: &[findpkg::Command],
) -> anyhow::Result<Vec<(String, ModFile)>> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for cmd in cmds {
        let module = match loader.get(&cmd.pkg_id).and_then(|p| p.module.as_ref()) {
            Some(m) => m,
            None => continue,
        };
        if !seen.insert(module.path.clone()) {
            continue;
        }
        let manifest = deps::read_manifest(&module.modfile)?;
        out.push((module.path.clone(), manifest));
    }
    Ok(out)
}

/// Exclusive ownership of the generated tree for the duration of a build.
struct TreeLock {
    _file: File,
    path: PathBuf,
}

impl TreeLock {
    fn acquire(root: &Path) -> anyhow::Result<Self> {
        let path = root.join(".gsbox-lock");
        let f = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        f.try_lock_exclusive()
            .with_context(|| format!("generated tree {} is in use by another build", root.display()))?;
        Ok(Self { _file: f, path })
    }
}

impl Drop for TreeLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::{build_busybox, ModuleBuildError, Opts, PathBuildError};
    use crate::bb::env::{BuildOpts, Environ, Toolchain};
    use crate::pkg::load::ModMode;
    use anyhow::bail;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    fn write(path: &Path, text: &str) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, text).expect("write");
    }

    struct FakeToolchain {
        calls: Arc<Mutex<Vec<(PathBuf, PathBuf)>>>,
        fail: bool,
    }

    impl Toolchain for FakeToolchain {
        fn build_dir(
            &self,
            _env: &Environ,
            dir: &Path,
            bin: &Path,
            _opts: &BuildOpts,
        ) -> anyhow::Result<()> {
            self.calls
                .lock()
                .expect("lock")
                .push((dir.to_path_buf(), bin.to_path_buf()));
            if self.fail {
                bail!("simulated compiler failure");
            }
            Ok(())
        }
    }

    fn hello_project(tmp: &Path) -> PathBuf {
        let root = tmp.join("proj");
        write(&root.join("gs.mod"), "module = \"example.com/proj\"\n");
        write(
            &root.join("cmds/hello/main.gs"),
            "module main\n\nfn main() {\n\tprintln(\"hi\")\n}\n",
        );
        root
    }

    #[test]
    fn generate_only_lays_out_the_tree() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let root = hello_project(tmp.path());
        let gen = tmp.path().join("gen");
        let opts = Opts {
            gen_src_dir: Some(gen.clone()),
            command_paths: vec![root.join("cmds/hello").display().to_string()],
            generate_only: true,
            ..Opts::default()
        };
        build_busybox(&opts).expect("build");

        let bb = gen.join("src/bb.gsbox.dev/bb");
        assert!(bb.join("main.gs").is_file());
        assert!(bb.join("gs.mod").is_file());
        assert!(bb.join("gs.sum").is_file());
        assert!(bb.join("pkg/bbmain/register.gs").is_file());
        let rewritten = gen.join("src/example.com/proj/cmds/hello");
        assert!(rewritten.join("main.gs").is_file());
        assert!(rewritten.join("zz_bb_register.gs").is_file());
        // The command's own module manifest is copied alongside its code.
        assert!(gen.join("src/example.com/proj/gs.mod").is_file());

        let manifest = fs::read_to_string(bb.join("gs.mod")).expect("manifest");
        assert!(manifest.contains("module = \"bb.gsbox.dev/bb\""));
        assert!(manifest.contains("module = \"example.com/proj\""));
        assert!(manifest.contains("path = \"../../example.com/proj\""));
    }

    #[test]
    fn generated_trees_are_deterministic() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let root = hello_project(tmp.path());
        let mut outputs = Vec::new();
        for name in ["gen1", "gen2"] {
            let gen = tmp.path().join(name);
            let opts = Opts {
                gen_src_dir: Some(gen.clone()),
                command_paths: vec![root.join("cmds/hello").display().to_string()],
                generate_only: true,
                ..Opts::default()
            };
            build_busybox(&opts).expect("build");
            let mut files: Vec<(String, String)> = Vec::new();
            collect_tree(&gen, &gen, &mut files);
            files.sort();
            outputs.push(files);
        }
        assert_eq!(outputs[0], outputs[1]);
    }

    fn collect_tree(root: &Path, dir: &Path, out: &mut Vec<(String, String)>) {
        for entry in fs::read_dir(dir).expect("read_dir") {
            let path = entry.expect("entry").path();
            if path.is_dir() {
                collect_tree(root, &path, out);
            } else {
                let rel = path
                    .strip_prefix(root)
                    .expect("rel")
                    .to_string_lossy()
                    .into_owned();
                out.push((rel, fs::read_to_string(&path).expect("read")));
            }
        }
    }

    #[test]
    fn successful_build_invokes_the_toolchain_and_cleans_up() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let root = hello_project(tmp.path());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let opts = Opts {
            command_paths: vec![root.join("cmds/hello").display().to_string()],
            binary_path: Some(tmp.path().join("bb")),
            toolchain: Some(Box::new(FakeToolchain {
                calls: Arc::clone(&calls),
                fail: false,
            })),
            ..Opts::default()
        };
        build_busybox(&opts).expect("build");
        let calls = calls.lock().expect("lock");
        assert_eq!(calls.len(), 1);
        let (dir, bin) = &calls[0];
        assert!(dir.ends_with("src/bb.gsbox.dev/bb"));
        assert_eq!(bin, &tmp.path().join("bb"));
        // Temporary tree is gone on success.
        assert!(!dir.exists());
    }

    #[test]
    fn module_failure_carries_the_tree_dir() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let root = hello_project(tmp.path());
        let opts = Opts {
            command_paths: vec![root.join("cmds/hello").display().to_string()],
            binary_path: Some(tmp.path().join("bb")),
            toolchain: Some(Box::new(FakeToolchain {
                calls: Arc::new(Mutex::new(Vec::new())),
                fail: true,
            })),
            ..Opts::default()
        };
        let err = build_busybox(&opts).unwrap_err();
        let build_err = err.downcast_ref::<ModuleBuildError>().expect("typed error");
        assert!(build_err.dir.exists(), "tree is preserved on failure");
        fs::remove_dir_all(build_err.dir.ancestors().nth(3).expect("tree root")).ok();
    }

    #[test]
    fn workspace_failure_is_the_other_error_kind() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let ws = tmp.path().join("ws");
        write(
            &ws.join("src/vendor.example/cmds/echo/main.gs"),
            "module main\n\nfn main() {}\n",
        );
        let opts = Opts {
            env: Environ {
                root: Some(ws.clone()),
                mod_mode: ModMode::Off,
                ..Environ::default()
            },
            command_paths: vec!["vendor.example/cmds/echo".to_string()],
            binary_path: Some(tmp.path().join("bb")),
            toolchain: Some(Box::new(FakeToolchain {
                calls: Arc::new(Mutex::new(Vec::new())),
                fail: true,
            })),
            ..Opts::default()
        };
        let err = build_busybox(&opts).unwrap_err();
        let build_err = err.downcast_ref::<PathBuildError>().expect("typed error");
        assert!(build_err.root.exists());
        fs::remove_dir_all(&build_err.root).ok();
    }

    #[test]
    fn mixed_mode_is_rejected_by_default() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let root = hello_project(tmp.path());
        let ws = tmp.path().join("ws");
        write(
            &ws.join("src/vendor.example/cmds/echo/main.gs"),
            "module main\n\nfn main() {}\n",
        );
        let opts = Opts {
            env: Environ {
                root: Some(ws),
                ..Environ::default()
            },
            command_paths: vec![
                root.join("cmds/hello").display().to_string(),
                "vendor.example/cmds/echo".to_string(),
            ],
            binary_path: Some(tmp.path().join("bb")),
            ..Opts::default()
        };
        let err = build_busybox(&opts).unwrap_err().to_string();
        assert!(err.contains("mixed module/non-module"));
        assert!(err.contains("example.com/proj"));
    }

    #[test]
    fn non_empty_gen_dir_is_refused() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let root = hello_project(tmp.path());
        let gen = tmp.path().join("gen");
        write(&gen.join("stale.txt"), "leftover");
        let opts = Opts {
            gen_src_dir: Some(gen),
            command_paths: vec![root.join("cmds/hello").display().to_string()],
            generate_only: true,
            ..Opts::default()
        };
        let err = build_busybox(&opts).unwrap_err().to_string();
        assert!(err.contains("not an empty directory"));
    }

    #[test]
    fn generate_only_without_gen_dir_is_a_config_error() {
        let opts = Opts {
            command_paths: vec!["whatever".to_string()],
            generate_only: true,
            ..Opts::default()
        };
        let err = build_busybox(&opts).unwrap_err().to_string();
        assert!(err.contains("generate-only requires"));
    }
}

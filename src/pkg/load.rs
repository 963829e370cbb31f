// Purpose: Load gs packages from disk: parse sources, attach module data, resolve imports.
// Inputs/Outputs: Directories or import paths in; a shared graph of parsed packages out.
// Invariants: One canonical directory loads exactly once per build; identical ids mean
// identical on-disk packages. Module/import precedence: own module, local replace, remote.
// Gotchas: Two distinct directories may claim the same import path (conflicting local
// modules); ids are disambiguated here and the conflict is reported by the collector.

use anyhow::{bail, Context};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::frontend::ast::FileAst;
use crate::frontend::parser::parse_source;
use crate::pkg::modfile::{is_local_path, ModFile};
use crate::pkg::suggest::did_you_mean;

pub const MANIFEST_NAME: &str = "gs.mod";
pub const SUM_NAME: &str = "gs.sum";
pub const SOURCE_EXT: &str = "gs";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModMode {
    On,
    Auto,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkgRole {
    Program,
    Library,
}

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub path: PathBuf,
    pub ast: FileAst,
}

#[derive(Debug, Clone)]
pub struct Module {
    pub path: String,
    pub version: String,
    pub dir: PathBuf,
    pub modfile: PathBuf,
    /// Set when this module was reached through a `replace` directive; the
    /// replacement's `path` may be a file system path.
    pub replace: Option<Box<Module>>,
}

impl Module {
    pub fn sumfile(&self) -> PathBuf {
        self.dir.join(SUM_NAME)
    }

    pub fn has_local_replace(&self) -> bool {
        self.replace
            .as_ref()
            .map(|r| is_local_path(&r.path))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct Package {
    pub id: String,
    pub import_path: String,
    pub name: String,
    pub role: PkgRole,
    pub dir: PathBuf,
    pub files: Vec<SourceFile>,
    /// Direct import paths as written in the sources, sorted and deduplicated.
    pub imports: Vec<String>,
    /// Ids of imports that resolved to loaded packages.
    pub deps: Vec<String>,
    pub module: Option<Module>,
}

/// Import-resolution scope: the module a package belongs to plus its parsed
/// manifest, which supplies require/replace directives for that module's code.
#[derive(Debug)]
struct ModuleScope {
    module: Module,
    manifest: ModFile,
}

pub struct Loader {
    mode: ModMode,
    src_root: Option<PathBuf>,
    pub packages: BTreeMap<String, Package>,
    dir_ids: BTreeMap<PathBuf, String>,
    scopes: BTreeMap<PathBuf, Rc<ModuleScope>>,
    loading: BTreeSet<PathBuf>,
}

impl Loader {
    pub fn new(mode: ModMode, src_root: Option<PathBuf>) -> Self {
        let src_root = src_root.map(|r| r.canonicalize().unwrap_or(r));
        Self {
            mode,
            src_root,
            packages: BTreeMap::new(),
            dir_ids: BTreeMap::new(),
            scopes: BTreeMap::new(),
            loading: BTreeSet::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Package> {
        self.packages.get(id)
    }

    /// Load the package rooted at `dir`, plus its on-disk dependency closure.
    /// Returns the package id.
    pub fn load_dir(&mut self, dir: &Path) -> anyhow::Result<String> {
        let dir = dir
            .canonicalize()
            .with_context(|| format!("package directory {}", dir.display()))?;
        if let Some(id) = self.dir_ids.get(&dir) {
            return Ok(id.clone());
        }
        let scope = match self.mode {
            ModMode::Off => None,
            ModMode::On | ModMode::Auto => match find_module_root(&dir) {
                Some(root) => Some(self.module_scope(&root, None)?),
                None if self.mode == ModMode::On => {
                    bail!("no {} found for {}", MANIFEST_NAME, dir.display())
                }
                None => None,
            },
        };
        self.load_package(&dir, scope)
    }

    /// Resolve an import-path spec against the non-module source root.
    pub fn load_import_path(&mut self, import: &str) -> anyhow::Result<String> {
        let root = match &self.src_root {
            Some(r) => r.clone(),
            None => bail!("import path {}: not found (no source root configured)", import),
        };
        let dir = root.join(import);
        if !dir.is_dir() {
            bail!("{}", import_not_found(import, &dir));
        }
        self.load_dir(&dir)
    }

    /// The dependency closure of `id`, the package itself included, in
    /// deterministic id order.
    pub fn transitive(&self, id: &str) -> Vec<&Package> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![id.to_string()];
        while let Some(cur) = stack.pop() {
            if !seen.insert(cur.clone()) {
                continue;
            }
            if let Some(pkg) = self.packages.get(&cur) {
                for dep in &pkg.deps {
                    stack.push(dep.clone());
                }
            }
        }
        seen.iter()
            .filter_map(|id| self.packages.get(id.as_str()))
            .collect()
    }

    fn module_scope(
        &mut self,
        root: &Path,
        forced: Option<Module>,
    ) -> anyhow::Result<Rc<ModuleScope>> {
        if let Some(scope) = self.scopes.get(root) {
            return Ok(Rc::clone(scope));
        }
        let modfile_path = root.join(MANIFEST_NAME);
        let manifest = if modfile_path.exists() {
            let text = fs::read_to_string(&modfile_path)
                .with_context(|| format!("read {}", modfile_path.display()))?;
            ModFile::parse(&text).with_context(|| format!("parse {}", modfile_path.display()))?
        } else {
            ModFile::default()
        };
        let module = match forced {
            Some(m) => m,
            None => Module {
                path: manifest.module.clone(),
                version: String::new(),
                dir: root.to_path_buf(),
                modfile: modfile_path,
                replace: None,
            },
        };
        if module.path.is_empty() {
            bail!(
                "module path missing in {}",
                module.modfile.display()
            );
        }
        let scope = Rc::new(ModuleScope { module, manifest });
        self.scopes.insert(root.to_path_buf(), Rc::clone(&scope));
        Ok(scope)
    }

    fn load_package(
        &mut self,
        dir: &Path,
        scope: Option<Rc<ModuleScope>>,
    ) -> anyhow::Result<String> {
        if let Some(id) = self.dir_ids.get(dir) {
            return Ok(id.clone());
        }
        if !self.loading.insert(dir.to_path_buf()) {
            bail!("import cycle through {}", dir.display());
        }
        let result = self.load_package_inner(dir, scope);
        self.loading.remove(dir);
        result
    }

    fn load_package_inner(
        &mut self,
        dir: &Path,
        scope: Option<Rc<ModuleScope>>,
    ) -> anyhow::Result<String> {
        let import_path = self.import_path_for(dir, scope.as_deref())?;

        let paths = collect_gs_files(dir)?;
        if paths.is_empty() {
            bail!("no .{} files found in {}", SOURCE_EXT, dir.display());
        }
        let mut files = Vec::new();
        let mut name: Option<String> = None;
        for path in paths {
            let source = fs::read_to_string(&path)
                .with_context(|| format!("read {}", path.display()))?;
            let display = path.display().to_string();
            let ast = parse_source(&source, Some(&display))?;
            match &name {
                None => name = Some(ast.module.clone()),
                Some(prev) if *prev != ast.module => bail!(
                    "package {}: files declare different modules ({} and {})",
                    dir.display(),
                    prev,
                    ast.module
                ),
                Some(_) => {}
            }
            files.push(SourceFile {
                name: path
                    .file_name()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                path,
                ast,
            });
        }
        let name = name.unwrap_or_default();
        let role = if name == "main" {
            PkgRole::Program
        } else {
            PkgRole::Library
        };
        if role == PkgRole::Library {
            let leaf = last_segment(&import_path);
            if is_identifier(leaf) && name != leaf {
                bail!(
                    "package {}: module name mismatch (expected {}, found {})",
                    dir.display(),
                    leaf,
                    name
                );
            }
        }

        let mut imports = BTreeSet::new();
        for f in &files {
            for imp in &f.ast.imports {
                imports.insert(imp.path.clone());
            }
        }
        let imports: Vec<String> = imports.into_iter().collect();

        let mut deps = Vec::new();
        for import in &imports {
            if let Some(dep_id) = self.resolve_import(import, scope.as_ref())? {
                deps.push(dep_id);
            }
        }
        deps.sort();
        deps.dedup();

        let id = self.alloc_id(&import_path);
        let pkg = Package {
            id: id.clone(),
            import_path,
            name,
            role,
            dir: dir.to_path_buf(),
            files,
            imports,
            deps,
            module: scope.as_deref().map(|s| s.module.clone()),
        };
        self.dir_ids.insert(dir.to_path_buf(), id.clone());
        self.packages.insert(id.clone(), pkg);
        Ok(id)
    }

    fn import_path_for(&self, dir: &Path, scope: Option<&ModuleScope>) -> anyhow::Result<String> {
        if let Some(scope) = scope {
            let rel = dir.strip_prefix(&scope.module.dir).with_context(|| {
                format!(
                    "package {} lies outside module {} at {}",
                    dir.display(),
                    scope.module.path,
                    scope.module.dir.display()
                )
            })?;
            return Ok(join_import(&scope.module.path, rel));
        }
        let root = match &self.src_root {
            Some(r) => r.clone(),
            None => bail!(
                "cannot determine import path for {} (no module and no source root)",
                dir.display()
            ),
        };
        let rel = dir.strip_prefix(&root).with_context(|| {
            format!(
                "package {} is outside {} in non-module mode",
                dir.display(),
                root.display()
            )
        })?;
        Ok(path_to_import(rel))
    }

    /// Resolve one import in the given scope. Returns the id of a loaded
    /// package, or None when the import is satisfied elsewhere (toolchain
    /// packages, remote modules declared in manifests).
    fn resolve_import(
        &mut self,
        import: &str,
        scope: Option<&Rc<ModuleScope>>,
    ) -> anyhow::Result<Option<String>> {
        if !first_segment_has_dot(import) {
            // Toolchain-provided package (std and friends).
            return Ok(None);
        }
        let scope = match scope {
            Some(s) => s,
            None => {
                // Non-module mode: everything non-std must live under the
                // source root.
                let root = match &self.src_root {
                    Some(r) => r.clone(),
                    None => bail!(
                        "import {}: not found (no source root configured)",
                        import
                    ),
                };
                let dir = root.join(import);
                if !dir.is_dir() {
                    bail!("{}", import_not_found(import, &dir));
                }
                let dir = dir.canonicalize()?;
                return self.load_package(&dir, None).map(Some);
            }
        };

        // Inside the importing package's own module?
        if import == scope.module.path
            || import.starts_with(&format!("{}/", scope.module.path))
        {
            let rel = import
                .strip_prefix(&scope.module.path)
                .unwrap_or("")
                .trim_start_matches('/');
            let dir = scope.module.dir.join(rel);
            if !dir.is_dir() {
                bail!("{}", import_not_found(import, &dir));
            }
            let dir = dir.canonicalize()?;
            let scope = Rc::clone(scope);
            return self.load_package(&dir, Some(scope)).map(Some);
        }

        // A require (or replace) of the surrounding module?
        let mod_path = match longest_module_prefix(&scope.manifest, import) {
            Some(p) => p,
            None => bail!(
                "import {}: no module provides it (missing require in {})",
                import,
                scope.module.modfile.display()
            ),
        };

        let replace = scope.manifest.local_replace_for(&mod_path);
        let replace = match replace {
            Some(r) => r,
            // Remote module: declared in the manifest, resolved by the
            // toolchain from the synthetic manifest later.
            None => return Ok(None),
        };

        let replaced_root = scope.module.dir.join(&replace.path);
        let replaced_root = replaced_root
            .canonicalize()
            .with_context(|| format!("replace path {}", replaced_root.display()))?;
        let version = scope
            .manifest
            .require
            .iter()
            .find(|r| r.module == mod_path)
            .map(|r| r.version.clone())
            .unwrap_or_default();
        let dep_module = Module {
            path: mod_path.clone(),
            version,
            dir: replaced_root.clone(),
            modfile: replaced_root.join(MANIFEST_NAME),
            replace: Some(Box::new(Module {
                path: replace.path.clone(),
                version: replace.version.clone().unwrap_or_default(),
                dir: replaced_root.clone(),
                modfile: replaced_root.join(MANIFEST_NAME),
                replace: None,
            })),
        };
        let dep_scope = self.module_scope(&replaced_root, Some(dep_module))?;
        let rel = import
            .strip_prefix(&mod_path)
            .unwrap_or("")
            .trim_start_matches('/');
        let dir = replaced_root.join(rel);
        if !dir.is_dir() {
            bail!("{}", import_not_found(import, &dir));
        }
        let dir = dir.canonicalize()?;
        self.load_package(&dir, Some(dep_scope)).map(Some)
    }

    fn alloc_id(&self, import_path: &str) -> String {
        if !self.packages.contains_key(import_path) {
            return import_path.to_string();
        }
        let mut n = 1usize;
        loop {
            let candidate = format!("{}+{}", import_path, n);
            if !self.packages.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

pub fn find_module_root(mut p: &Path) -> Option<PathBuf> {
    loop {
        if p.join(MANIFEST_NAME).exists() {
            return Some(p.to_path_buf());
        }
        p = p.parent()?;
    }
}

pub fn collect_gs_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut v = vec![];
    if !dir.exists() {
        return Ok(v);
    }
    for ent in fs::read_dir(dir).with_context(|| format!("read_dir {}", dir.display()))? {
        let ent = ent?;
        let p = ent.path();
        if p.extension().and_then(|s| s.to_str()) == Some(SOURCE_EXT) {
            v.push(p);
        }
    }
    v.sort();
    Ok(v)
}

pub fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub fn first_segment_has_dot(import: &str) -> bool {
    let first = import.split('/').next().unwrap_or(import);
    first.contains('.')
}

pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn join_import(module_path: &str, rel: &Path) -> String {
    let rel = path_to_import(rel);
    if rel.is_empty() {
        module_path.to_string()
    } else {
        format!("{}/{}", module_path, rel)
    }
}

fn path_to_import(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn longest_module_prefix(manifest: &ModFile, import: &str) -> Option<String> {
    let mut best: Option<&str> = None;
    for m in manifest
        .require
        .iter()
        .map(|r| r.module.as_str())
        .chain(manifest.replace.iter().map(|r| r.module.as_str()))
    {
        let matches = import == m || import.starts_with(&format!("{}/", m));
        if matches && best.map(|b| b.len()).unwrap_or(0) < m.len() {
            best = Some(m);
        }
    }
    best.map(str::to_string)
}

fn import_not_found(import: &str, dir: &Path) -> String {
    let base = format!("import {}: directory not found: {}", import, dir.display());
    let parent = match dir.parent() {
        Some(p) => p,
        None => return base,
    };
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
    let leaf = last_segment(import);
    match did_you_mean(leaf, candidates) {
        Some(hint) => format!("{}\nhelp: {}", base, hint),
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use super::{Loader, ModMode, PkgRole};
    use std::fs;
    use std::path::Path;

    fn write(path: &Path, text: &str) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, text).expect("write");
    }

    #[test]
    fn loads_command_with_module_and_internal_dep() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let root = tmp.path().join("proj");
        write(&root.join("gs.mod"), "module = \"example.com/proj\"\n");
        write(
            &root.join("cmd/hello/main.gs"),
            "module main\n\nimport \"example.com/proj/pkg/words\"\n\nfn main() {\n\tprintln(words.pick())\n}\n",
        );
        write(
            &root.join("pkg/words/words.gs"),
            "module words\n\npub fn pick() -> string {\n\treturn \"hi\"\n}\n",
        );

        let mut loader = Loader::new(ModMode::Auto, None);
        let id = loader.load_dir(&root.join("cmd/hello")).expect("load");
        let pkg = loader.get(&id).expect("pkg");
        assert_eq!(pkg.import_path, "example.com/proj/cmd/hello");
        assert_eq!(pkg.role, PkgRole::Program);
        assert_eq!(pkg.deps, vec!["example.com/proj/pkg/words".to_string()]);
        let module = pkg.module.as_ref().expect("module");
        assert_eq!(module.path, "example.com/proj");

        let closure = loader.transitive(&id);
        assert_eq!(closure.len(), 2);
    }

    #[test]
    fn resolves_local_replace_into_other_module() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let m1 = tmp.path().join("mod1");
        let m2 = tmp.path().join("mod2");
        write(
            &m1.join("gs.mod"),
            "module = \"example.com/mod1\"\n\n[[require]]\nmodule = \"example.com/mod2\"\nversion = \"v0.1.0\"\n\n[[replace]]\nmodule = \"example.com/mod2\"\npath = \"../mod2\"\n",
        );
        write(
            &m1.join("cmd/tool/main.gs"),
            "module main\n\nimport \"example.com/mod2/pkg/extra\"\n\nfn main() {\n\textra.go()\n}\n",
        );
        write(&m2.join("gs.mod"), "module = \"example.com/mod2\"\n");
        write(
            &m2.join("pkg/extra/extra.gs"),
            "module extra\n\npub fn go() {}\n",
        );

        let mut loader = Loader::new(ModMode::Auto, None);
        let id = loader.load_dir(&m1.join("cmd/tool")).expect("load");
        let pkg = loader.get(&id).expect("pkg");
        assert_eq!(pkg.deps, vec!["example.com/mod2/pkg/extra".to_string()]);

        let dep = loader.get("example.com/mod2/pkg/extra").expect("dep");
        let dep_module = dep.module.as_ref().expect("module");
        assert_eq!(dep_module.path, "example.com/mod2");
        assert_eq!(dep_module.version, "v0.1.0");
        assert!(dep_module.has_local_replace());
    }

    #[test]
    fn remote_requires_are_not_loaded() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let m1 = tmp.path().join("proj");
        write(
            &m1.join("gs.mod"),
            "module = \"example.com/proj\"\n\n[[require]]\nmodule = \"remote.example/dep\"\nversion = \"v1.0.0\"\n",
        );
        write(
            &m1.join("cmd/x/main.gs"),
            "module main\n\nimport \"remote.example/dep/pkg/a\"\n\nfn main() {}\n",
        );

        let mut loader = Loader::new(ModMode::Auto, None);
        let id = loader.load_dir(&m1.join("cmd/x")).expect("load");
        let pkg = loader.get(&id).expect("pkg");
        assert!(pkg.deps.is_empty());
        assert_eq!(pkg.imports, vec!["remote.example/dep/pkg/a".to_string()]);
    }

    #[test]
    fn module_name_mismatch_is_an_error() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let root = tmp.path().join("proj");
        write(&root.join("gs.mod"), "module = \"example.com/proj\"\n");
        write(
            &root.join("pkg/words/words.gs"),
            "module vocabulary\n\npub fn pick() -> string {\n\treturn \"hi\"\n}\n",
        );
        write(
            &root.join("cmd/h/main.gs"),
            "module main\n\nimport \"example.com/proj/pkg/words\"\n\nfn main() {}\n",
        );

        let mut loader = Loader::new(ModMode::Auto, None);
        let err = loader.load_dir(&root.join("cmd/h")).unwrap_err();
        assert!(err.to_string().contains("module name mismatch"));
    }

    #[test]
    fn non_module_mode_resolves_under_source_root() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let src = tmp.path().join("src");
        write(
            &src.join("vendor.example/cmds/ls/main.gs"),
            "module main\n\nimport \"vendor.example/lib/walk\"\n\nfn main() {}\n",
        );
        write(
            &src.join("vendor.example/lib/walk/walk.gs"),
            "module walk\n\npub fn walk() {}\n",
        );

        let mut loader = Loader::new(ModMode::Off, Some(src.clone()));
        let id = loader
            .load_dir(&src.join("vendor.example/cmds/ls"))
            .expect("load");
        let pkg = loader.get(&id).expect("pkg");
        assert_eq!(pkg.import_path, "vendor.example/cmds/ls");
        assert!(pkg.module.is_none());
        assert_eq!(pkg.deps, vec!["vendor.example/lib/walk".to_string()]);
    }
}

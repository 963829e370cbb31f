// Purpose: Hold build settings and adapt the external gs toolchain behind a trait.
// Inputs/Outputs: Environment variables and Opts fields in; compiler invocations out.
// Invariants: valid() must reject configurations the toolchain would choke on later.
// Gotchas: In non-module builds the orchestrator points `root` at the generated tree;
// the adapter must pass that root through, not the user's original one.

use anyhow::{bail, Context};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::pkg::load::ModMode;

#[derive(Clone, Debug)]
pub struct Environ {
    /// Workspace root for non-module resolution; packages live under
    /// `<root>/src/<import-path>`.
    pub root: Option<PathBuf>,
    pub mod_mode: ModMode,
    /// Disable native code generation in the compiler.
    pub no_native: bool,
    /// The gs compiler executable.
    pub compiler: String,
}

impl Default for Environ {
    fn default() -> Self {
        Self {
            root: None,
            mod_mode: ModMode::Auto,
            no_native: false,
            compiler: "gs".to_string(),
        }
    }
}

impl Environ {
    /// Settings from the process environment: GSPATH, GSMODULES, GS.
    pub fn from_env() -> Self {
        let mut env = Self::default();
        if let Ok(root) = std::env::var("GSPATH") {
            if !root.is_empty() {
                env.root = Some(PathBuf::from(root));
            }
        }
        if let Ok(mode) = std::env::var("GSMODULES") {
            match mode.as_str() {
                "on" => env.mod_mode = ModMode::On,
                "off" => env.mod_mode = ModMode::Off,
                _ => env.mod_mode = ModMode::Auto,
            }
        }
        if let Ok(compiler) = std::env::var("GS") {
            if !compiler.is_empty() {
                env.compiler = compiler;
            }
        }
        env
    }

    pub fn valid(&self) -> anyhow::Result<()> {
        if self.compiler.is_empty() {
            bail!("no gs compiler configured");
        }
        if let Some(root) = &self.root {
            if !root.is_dir() {
                bail!("workspace root {} is not a directory", root.display());
            }
        }
        if self.mod_mode == ModMode::Off && self.root.is_none() {
            bail!("GSMODULES=off requires a workspace root (GSPATH)");
        }
        Ok(())
    }

    pub fn src_root(&self) -> Option<PathBuf> {
        self.root.as_ref().map(|r| r.join("src"))
    }

    pub fn mod_mode_str(&self) -> &'static str {
        match self.mod_mode {
            ModMode::On => "on",
            ModMode::Auto => "auto",
            ModMode::Off => "off",
        }
    }
}

/// Options forwarded opaquely to the compiler.
#[derive(Clone, Debug, Default)]
pub struct BuildOpts {
    pub args: Vec<String>,
}

/// The compiler seam: the orchestrator only ever talks to this trait, so
/// tests can substitute a fake.
pub trait Toolchain {
    fn build_dir(
        &self,
        env: &Environ,
        dir: &Path,
        bin: &Path,
        opts: &BuildOpts,
    ) -> anyhow::Result<()>;
}

/// The real thing: spawns `gs build`.
pub struct GsToolchain;

impl Toolchain for GsToolchain {
    fn build_dir(
        &self,
        env: &Environ,
        dir: &Path,
        bin: &Path,
        opts: &BuildOpts,
    ) -> anyhow::Result<()> {
        let mut cmd = Command::new(&env.compiler);
        cmd.arg("build").arg("-o").arg(bin);
        if env.no_native {
            cmd.arg("--no-native");
        }
        cmd.args(&opts.args);
        cmd.arg(".");
        cmd.current_dir(dir);
        cmd.env("GSMODULES", env.mod_mode_str());
        if let Some(root) = &env.root {
            cmd.env("GSPATH", root);
        }
        let out = cmd
            .output()
            .with_context(|| format!("failed to execute {}", env.compiler))?;
        if !out.status.success() {
            bail!(
                "{} build in {} failed: {}",
                env.compiler,
                dir.display(),
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Environ, ModMode};

    #[test]
    fn off_mode_requires_root() {
        let env = Environ {
            mod_mode: ModMode::Off,
            ..Environ::default()
        };
        assert!(env.valid().is_err());
    }

    #[test]
    fn default_is_valid() {
        assert!(Environ::default().valid().is_ok());
    }

    #[test]
    fn missing_root_dir_is_rejected() {
        let env = Environ {
            root: Some("/does/not/exist/gsbox".into()),
            ..Environ::default()
        };
        assert!(env.valid().is_err());
    }
}

// Purpose: Parse and write gs.mod definitions and dependency directives.
// Inputs/Outputs: Converts TOML module config into typed structures for the collector.
// Invariants: Parsed model must preserve semantic intent of require/replace directives.
// Gotchas: Formatting/order changes can affect diffs; keep the writer deterministic.

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModFile {
    pub module: String,
    #[serde(default)]
    pub require: Vec<Require>,
    #[serde(default)]
    pub replace: Vec<Replace>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Require {
    pub module: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Replace {
    pub module: String,
    pub path: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl Replace {
    /// A replacement is local when its path is a file system path rather than
    /// a module path.
    pub fn is_local(&self) -> bool {
        is_local_path(&self.path)
    }
}

pub fn is_local_path(p: &str) -> bool {
    p.starts_with("./") || p.starts_with("../") || p.starts_with('/')
}

impl ModFile {
    pub fn parse(toml_text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str::<ModFile>(toml_text)?)
    }

    pub fn to_pretty_toml(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("module = {:?}\n", self.module));

        if !self.require.is_empty() {
            out.push('\n');
            for r in &self.require {
                out.push_str("[[require]]\n");
                out.push_str(&format!("module = {:?}\n", r.module));
                out.push_str(&format!("version = {:?}\n\n", r.version));
            }
        }

        if !self.replace.is_empty() {
            out.push('\n');
            for r in &self.replace {
                out.push_str("[[replace]]\n");
                out.push_str(&format!("module = {:?}\n", r.module));
                out.push_str(&format!("path = {:?}\n", r.path));
                if let Some(v) = &r.version {
                    out.push_str(&format!("version = {:?}\n", v));
                }
                out.push('\n');
            }
        }

        if !out.ends_with('\n') {
            out.push('\n');
        }
        out
    }

    pub fn sort_deterministic(&mut self) {
        self.require.sort_by(|a, b| a.module.cmp(&b.module));
        self.replace.sort_by(|a, b| a.module.cmp(&b.module));
    }

    pub fn local_replace_for(&self, module: &str) -> Option<&Replace> {
        self.replace
            .iter()
            .find(|r| r.module == module && r.is_local())
    }
}

#[cfg(test)]
mod tests {
    use super::ModFile;

    #[test]
    fn parses_require_and_replace() {
        let text = r#"
module = "example.com/mod1"

[[require]]
module = "example.com/mod2"
version = "v1.2.0"

[[replace]]
module = "example.com/mod2"
path = "../mod2"
"#;
        let mf = ModFile::parse(text).expect("parse");
        assert_eq!(mf.module, "example.com/mod1");
        assert_eq!(mf.require.len(), 1);
        assert!(mf.replace[0].is_local());
        assert!(mf.local_replace_for("example.com/mod2").is_some());
    }

    #[test]
    fn writer_roundtrips_and_sorts() {
        let text = "module = \"m\"\n\n[[require]]\nmodule = \"b.example/x\"\nversion = \"v0.2.0\"\n\n[[require]]\nmodule = \"a.example/y\"\nversion = \"v0.1.0\"\n";
        let mut mf = ModFile::parse(text).expect("parse");
        mf.sort_deterministic();
        let out = mf.to_pretty_toml();
        let again = ModFile::parse(&out).expect("reparse");
        assert_eq!(again.require[0].module, "a.example/y");
        assert_eq!(again.require[1].module, "b.example/x");
    }

    #[test]
    fn remote_replace_keeps_version() {
        let mut mf = ModFile::parse("module = \"m\"").expect("parse");
        mf.replace.push(super::Replace {
            module: "example.com/old".into(),
            path: "example.com/fork".into(),
            version: Some("v1.0.1".into()),
        });
        assert!(!mf.replace[0].is_local());
        let out = mf.to_pretty_toml();
        let again = ModFile::parse(&out).expect("reparse");
        assert_eq!(again.replace[0].version.as_deref(), Some("v1.0.1"));
    }
}

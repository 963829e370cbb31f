// Purpose: Read and combine gs.sum checksum files.
// Inputs/Outputs: Accumulates sum lines from many modules into one synthetic file.
// Invariants: Lines keep first-seen order; duplicates are dropped; missing
// source files are skipped silently.

use anyhow::Context;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

#[derive(Default)]
pub struct SumFile {
    lines: Vec<String>,
    seen: BTreeSet<String>,
}

impl SumFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the contents of one gs.sum. A missing file is not an error:
    /// modules without dependencies don't have or need one.
    pub fn append_from(&mut self, path: &Path) -> anyhow::Result<()> {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
        };
        for line in text.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            if self.seen.insert(line.to_string()) {
                self.lines.push(line.to_string());
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn write_to(&self, path: &Path) -> anyhow::Result<()> {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        fs::write(path, out).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::SumFile;
    use std::fs;

    #[test]
    fn concatenates_and_dedups() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let a = dir.path().join("a.sum");
        let b = dir.path().join("b.sum");
        fs::write(&a, "m1 v1.0.0 h1:abc\nm2 v0.1.0 h1:def\n").expect("write a");
        fs::write(&b, "m2 v0.1.0 h1:def\nm3 v2.0.0 h1:ghi\n").expect("write b");

        let mut sum = SumFile::new();
        sum.append_from(&a).expect("append a");
        sum.append_from(&b).expect("append b");
        sum.append_from(&dir.path().join("missing.sum")).expect("missing ok");

        let out = dir.path().join("out.sum");
        sum.write_to(&out).expect("write");
        let text = fs::read_to_string(&out).expect("read");
        assert_eq!(text, "m1 v1.0.0 h1:abc\nm2 v0.1.0 h1:def\nm3 v2.0.0 h1:ghi\n");
    }
}

// Purpose: Emit the fixed dispatch program: the registry package and the main
// source that selects a command from argv[0].
// Inputs/Outputs: The command import list in; register.gs and main.gs in the tree out.
// Invariants: main.gs must not depend on anything but the registry and the
// toolchain's standard packages; command imports are injected sorted and blank.
// Gotchas: The import injection goes through parse-and-print, not string splicing,
// so a template edit that breaks the grammar fails the build instead of the user.

use anyhow::Context;
use std::fs;
use std::path::Path;

use crate::bb::synth::registry_import;
use crate::frontend::ast::{Import, Span};
use crate::frontend::parser::parse_source;
use crate::frontend::printer::write_file;

/// The dispatch registry package. Rewritten commands register themselves here
/// from their synthesized init.
const REGISTER_SRC: &str = r#"module bbmain

struct command {
	setup: fn(),
	entry: fn(),
}

let commands: map[string]command = map[string]command{}
let default_cmd: command = command{setup: noop, entry: list_cmds}

pub fn noop() {}

pub fn list_cmds() {
	eprintln("supported commands:")
	for name in sorted(keys(commands)) {
		eprintln("\t" + name)
	}
}

pub fn register(name: string, setup: fn(), entry: fn()) {
	if contains(commands, name) {
		panic("two commands registered as " + name)
	}
	commands[name] = command{setup: setup, entry: entry}
}

pub fn register_default(setup: fn(), entry: fn()) {
	default_cmd = command{setup: setup, entry: entry}
}

pub fn run(name: string) {
	match lookup(commands, name) {
		Some(c) => {
			c.setup()
			c.entry()
		}
		None => {
			default_cmd.setup()
			default_cmd.entry()
		}
	}
}
"#;

/// The busybox main template. Command imports are injected below the registry
/// import so every command's registration init runs at startup.
const MAIN_SRC: &str = r##"module main

import "std/os"
import "std/path"
import "bb.gsbox.dev/bb/pkg/bbmain"

fn abs_symlink(original: string, target: string) -> string {
	if !path.is_abs(original) {
		original = path.abs(original)
	}
	if !path.is_abs(target) {
		return path.join(path.dir(original), target)
	}
	return target
}

fn is_target_symlink(original: string, target: string) -> bool {
	return os.is_symlink(abs_symlink(original, target))
}

fn resolve_until_last_symlink(p: string) -> string {
	let target: string = os.readlink(p)
	while target != "" && is_target_symlink(p, target) {
		p = abs_symlink(p, target)
		target = os.readlink(p)
	}
	return p
}

fn run(name: string) {
	bbmain.run(name)
}

fn run_unknown() {
	if os.arg_count() == 1 {
		fatal("invalid busybox command: " + os.arg(0))
	}
	os.shift_args(1)
	run(path.base(os.arg(0)))
}

fn main() {
	os.set_arg(0, resolve_until_last_symlink(os.arg(0)))
	run(path.base(os.arg(0)))
}

fn init() {
	if os.arg_count() > 2 && starts_with(os.arg(1), "#!") {
		os.shift_args(2)
	}
	bbmain.register("bbdiagnose", bbmain.noop, bbmain.list_cmds)
	bbmain.register_default(bbmain.noop, run_unknown)
}
"##;

/// Emit the registry under pkg/bbmain/ and the dispatch main with one blank
/// import per command.
pub fn write_stub(bb_dir: &Path, cmd_import_paths: &[String]) -> anyhow::Result<()> {
    let bbmain_dir = bb_dir.join("pkg/bbmain");
    fs::create_dir_all(&bbmain_dir)
        .with_context(|| format!("create {}", bbmain_dir.display()))?;
    fs::write(bbmain_dir.join("register.gs"), REGISTER_SRC)
        .context("write register.gs")?;

    let main_src = main_source(cmd_import_paths)?;
    fs::write(bb_dir.join("main.gs"), main_src).context("write main.gs")?;
    Ok(())
}

pub fn main_source(cmd_import_paths: &[String]) -> anyhow::Result<String> {
    let mut ast = parse_source(MAIN_SRC, Some("main.gs")).context("dispatch main template")?;
    debug_assert!(ast
        .imports
        .iter()
        .any(|i| i.path == registry_import()));

    let mut paths: Vec<&String> = cmd_import_paths.iter().collect();
    paths.sort();
    for path in paths {
        ast.imports.push(Import {
            path: path.clone(),
            blank: true,
            span: Span {
                start: 0,
                end: 0,
                line: 0,
                column: 0,
            },
        });
    }
    Ok(write_file(&ast))
}

#[cfg(test)]
mod tests {
    use super::{main_source, write_stub, MAIN_SRC, REGISTER_SRC};
    use crate::frontend::parser::parse_source;

    #[test]
    fn templates_hold_the_dispatch_contract() {
        assert!(REGISTER_SRC.contains("pub fn register(name: string"));
        assert!(REGISTER_SRC.contains("pub fn register_default("));
        assert!(REGISTER_SRC.contains("pub fn run(name: string)"));
        assert!(MAIN_SRC.contains("resolve_until_last_symlink"));
        assert!(MAIN_SRC.contains("\"#!\""));
    }

    #[test]
    fn command_imports_are_injected_sorted_and_blank() {
        let src = main_source(&[
            "example.com/proj/cmds/ls".to_string(),
            "example.com/proj/cmds/cat".to_string(),
        ])
        .expect("main source");
        let cat = src.find("import _ \"example.com/proj/cmds/cat\"").expect("cat import");
        let ls = src.find("import _ \"example.com/proj/cmds/ls\"").expect("ls import");
        assert!(cat < ls);
        let reparsed = parse_source(&src, None).expect("generated main parses");
        assert_eq!(reparsed.module, "main");
    }

    #[test]
    fn stub_lands_in_the_expected_layout() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        write_stub(tmp.path(), &["example.com/p/c".to_string()]).expect("write");
        assert!(tmp.path().join("pkg/bbmain/register.gs").is_file());
        let main = std::fs::read_to_string(tmp.path().join("main.gs")).expect("main");
        assert!(main.contains("import \"bb.gsbox.dev/bb/pkg/bbmain\""));
        assert!(main.contains("import _ \"example.com/p/c\""));
    }
}

use std::path::PathBuf;

use crate::bb::env::{BuildOpts, Environ};
use crate::bb::Opts;
use crate::pkg::load::ModMode;

pub fn run_cli<I>(args: I) -> i32
where
    I: IntoIterator<Item = String>,
{
    let mut specs: Vec<String> = Vec::new();
    let mut env = Environ::from_env();
    let mut binary_path: Option<PathBuf> = None;
    let mut gen_src_dir: Option<PathBuf> = None;
    let mut generate_only = false;
    let mut allow_mixed_mode = false;
    let mut build_args: Vec<String> = Vec::new();

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-o" => match args.next() {
                Some(path) => binary_path = Some(PathBuf::from(path)),
                None => {
                    eprintln!("expected output path after -o");
                    return 1;
                }
            },
            "--gen-src" => match args.next() {
                Some(dir) => gen_src_dir = Some(PathBuf::from(dir)),
                None => {
                    eprintln!("expected directory after --gen-src");
                    return 1;
                }
            },
            "--root" => match args.next() {
                Some(dir) => env.root = Some(PathBuf::from(dir)),
                None => {
                    eprintln!("expected directory after --root");
                    return 1;
                }
            },
            "--mod" => match args.next().as_deref() {
                Some("on") => env.mod_mode = ModMode::On,
                Some("auto") => env.mod_mode = ModMode::Auto,
                Some("off") => env.mod_mode = ModMode::Off,
                _ => {
                    eprintln!("expected on, auto, or off after --mod");
                    return 1;
                }
            },
            "--generate-only" => generate_only = true,
            "--allow-mixed" => allow_mixed_mode = true,
            "--no-native" => env.no_native = true,
            "--version" => {
                println!("gsbox {}", version());
                return 0;
            }
            "-h" | "--help" => {
                print_usage();
                return 0;
            }
            "--" => {
                build_args.extend(args.by_ref());
                break;
            }
            _ => {
                if arg.starts_with('-') {
                    eprintln!("unknown argument: {}", arg);
                    return 1;
                }
                specs.push(arg);
            }
        }
    }

    if specs.is_empty() {
        print_usage();
        return 1;
    }
    if binary_path.is_none() && !generate_only {
        binary_path = Some(PathBuf::from("bb"));
    }

    let opts = Opts {
        env,
        gen_src_dir,
        command_paths: specs,
        binary_path,
        build_opts: BuildOpts { args: build_args },
        allow_mixed_mode,
        generate_only,
        toolchain: None,
    };
    match crate::bb::build_busybox(&opts) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("gsbox: {:#}", err);
            1
        }
    }
}

fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

fn print_usage() {
    eprintln!("usage: gsbox [flags] <command-spec>... [-- <compiler args>]");
    eprintln!();
    eprintln!("command specs are directories, wildcard patterns, or import paths");
    eprintln!();
    eprintln!("flags:");
    eprintln!("  -o <path>          output binary (default ./bb)");
    eprintln!("  --gen-src <dir>    empty directory for the generated source tree");
    eprintln!("  --generate-only    lay out the tree and stop (requires --gen-src)");
    eprintln!("  --allow-mixed      permit mixing module and non-module commands");
    eprintln!("  --mod <mode>       module mode: on, auto, or off");
    eprintln!("  --root <dir>       workspace root for non-module resolution");
    eprintln!("  --no-native        disable native code generation");
    eprintln!("  --version          print version and exit");
}

#[cfg(test)]
mod tests {
    use super::run_cli;

    #[test]
    fn no_specs_prints_usage_and_fails() {
        assert_eq!(run_cli(Vec::<String>::new()), 1);
    }

    #[test]
    fn unknown_flag_fails() {
        assert_eq!(run_cli(vec!["--frobnicate".to_string()]), 1);
    }

    #[test]
    fn version_flag_succeeds() {
        assert_eq!(run_cli(vec!["--version".to_string()]), 0);
    }
}

// Purpose: Transform one command package into an importable, side-effect-free library.
// Inputs/Outputs: A loaded program package in; rewritten source files plus a synthesized
// registration file in the destination directory.
// Invariants: The registration chain must invoke initializers in exactly the order the
// standalone program would run them; renames never capture existing names.
// Gotchas: Classification errs toward non-constant: moving a constant initializer into
// the chain is harmless, leaving an effectful one in place is not.

use anyhow::{bail, Context};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::frontend::ast::{Expr, FileAst, Function, Import, Item};
use crate::frontend::parser::parse_source;
use crate::frontend::printer::write_file;
use crate::pkg::load::{last_segment, Package};

pub const REGISTER_FILE: &str = "zz_bb_register.gs";

/// Rewrite `pkg` into the directory `dest`, registering it under `name` with
/// the dispatch registry imported from `register_import`.
pub fn rewrite_package(
    pkg: &Package,
    name: &str,
    dest: &Path,
    register_import: &str,
) -> anyhow::Result<()> {
    let mut names: BTreeSet<String> = BTreeSet::new();
    let mut consts: BTreeSet<String> = BTreeSet::new();
    for f in &pkg.files {
        names.extend(f.ast.declared_names());
        consts.extend(f.ast.const_names());
    }

    let mut namer = Namer { taken: names };
    let entry_name = namer.fresh("registered_main");

    let module_name = sanitize_package_ident(last_segment(&pkg.import_path));
    let mut entry_count = 0usize;
    let mut init_index = 0usize;
    let mut chain: Vec<String> = Vec::new();
    let mut outputs: Vec<(String, String)> = Vec::new();

    for file in &pkg.files {
        let mut ast = file.ast.clone();
        ast.module = module_name.clone();
        let mut moved: Vec<(String, String)> = Vec::new();

        for item in &mut ast.items {
            match item {
                Item::Function(f) if f.name == "main" => {
                    f.name = entry_name.clone();
                    entry_count += 1;
                }
                Item::Function(f) if f.name == "init" => {
                    let renamed = namer.fresh(&format!("init{}", init_index));
                    init_index += 1;
                    f.name = renamed.clone();
                    chain.push(renamed);
                }
                Item::Global(g) => {
                    let constant = match &g.init {
                        Some(init) => is_trivially_const(&init.expr, &consts),
                        None => true,
                    };
                    if !constant {
                        let init = g.init.take().map(|i| i.src).unwrap_or_default();
                        moved.push((g.name.clone(), init));
                    }
                }
                _ => {}
            }
        }

        if !moved.is_empty() {
            let fn_name = namer.fresh(&format!("init{}", init_index));
            init_index += 1;
            let mut body = String::from("() {\n");
            for (var, src) in &moved {
                body.push_str(&format!("\t{} = {}\n", var, src));
            }
            body.push('}');
            ast.items.push(Item::Function(Function {
                name: fn_name.clone(),
                is_pub: false,
                tail: body,
                span: zero_span(),
            }));
            chain.push(fn_name);
        }

        outputs.push((file.name.clone(), write_file(&ast)));
    }

    if entry_count == 0 {
        bail!("no entry in {}", pkg.import_path);
    }

    outputs.push((
        REGISTER_FILE.to_string(),
        registration_source(
            &module_name,
            name,
            register_import,
            &entry_name,
            &chain,
            &mut namer,
        ),
    ));

    fs::create_dir_all(dest).with_context(|| format!("create {}", dest.display()))?;
    for (file_name, text) in &outputs {
        parse_source(text, Some(file_name)).with_context(|| {
            format!(
                "rewritten source for {} in {} does not re-parse",
                file_name, pkg.import_path
            )
        })?;
        let out_path = dest.join(file_name);
        fs::write(&out_path, text).with_context(|| format!("write {}", out_path.display()))?;
    }
    Ok(())
}

/// The synthesized registration file: the only load-time side effect the
/// rewritten package keeps is registering itself.
fn registration_source(
    module_name: &str,
    cmd_name: &str,
    register_import: &str,
    entry_name: &str,
    chain: &[String],
    namer: &mut Namer,
) -> String {
    let registry = last_segment(register_import);
    let mut ast = FileAst {
        module: module_name.to_string(),
        imports: vec![Import {
            path: register_import.to_string(),
            blank: false,
            span: zero_span(),
        }],
        items: Vec::new(),
    };

    let chain_arg = if chain.is_empty() {
        format!("{}.noop", registry)
    } else {
        let chain_name = namer.fresh("bb_init_chain");
        let mut body = String::from("() {\n");
        for init in chain {
            body.push_str(&format!("\t{}()\n", init));
        }
        body.push('}');
        ast.items.push(Item::Function(Function {
            name: chain_name.clone(),
            is_pub: false,
            tail: body,
            span: zero_span(),
        }));
        chain_name
    };

    ast.items.push(Item::Function(Function {
        name: "init".to_string(),
        is_pub: false,
        tail: format!(
            "() {{\n\t{}.register({:?}, {}, {})\n}}",
            registry, cmd_name, chain_arg, entry_name
        ),
        span: zero_span(),
    }));

    write_file(&ast)
}

struct Namer {
    taken: BTreeSet<String>,
}

impl Namer {
    /// Pick `base`, or `base_bbN` for the first N that collides with nothing
    /// declared in the package.
    fn fresh(&mut self, base: &str) -> String {
        let mut candidate = base.to_string();
        let mut n = 0usize;
        while self.taken.contains(&candidate) {
            candidate = format!("{}_bb{}", base, n);
            n += 1;
        }
        self.taken.insert(candidate.clone());
        candidate
    }
}

/// Whether the compiler would fold this initializer at load time without
/// observable effects. Calls are never constant, however pure they look.
pub fn is_trivially_const(expr: &Expr, consts: &BTreeSet<String>) -> bool {
    match expr {
        Expr::Bool(_)
        | Expr::Int(_)
        | Expr::Float(_)
        | Expr::Char(_)
        | Expr::Str(_)
        | Expr::Nil => true,
        Expr::Ident(name) => consts.contains(name),
        Expr::Paren(inner) | Expr::Unary(inner) => is_trivially_const(inner, consts),
        Expr::Binary(a, b) => is_trivially_const(a, consts) && is_trivially_const(b, consts),
        Expr::Composite(elems) => elems.iter().all(|e| is_trivially_const(e, consts)),
        Expr::Call(_, _) | Expr::Field(_, _) | Expr::Index(_, _) => false,
    }
}

/// Last import path segment, with non-identifier characters replaced by `_`.
pub fn sanitize_package_ident(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for (i, c) in segment.chars().enumerate() {
        let ok = c.is_ascii_alphabetic() || c == '_' || (i > 0 && c.is_ascii_digit());
        out.push(if ok { c } else { '_' });
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}

fn zero_span() -> crate::frontend::ast::Span {
    crate::frontend::ast::Span {
        start: 0,
        end: 0,
        line: 0,
        column: 0,
    }
}

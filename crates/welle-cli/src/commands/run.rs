//! Run command: execute a program under either engine

use crate::config::{effective_limit, ProjectContext};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use welle_runtime::{
    disassemble, Lexer, Loader, Runner, MODULE_EXTENSION, VM,
};

/// Arguments shared by `welle <path>` and `welle run <path>`.
#[derive(clap::Args, Default)]
pub struct RunArgs {
    /// Program to execute: a file path or an import spec (bare name,
    /// std:NAME). Defaults to the manifest's `entry`.
    pub path: Option<String>,

    /// Dump the token stream and exit
    #[arg(long)]
    pub tokens: bool,

    /// Dump the AST and exit
    #[arg(long)]
    pub ast: bool,

    /// Execute on the bytecode VM instead of the evaluator
    #[arg(long)]
    pub vm: bool,

    /// Disassemble the compiled entry module and exit
    #[arg(long)]
    pub dis: bool,

    /// Optimize the entry module's bytecode
    #[arg(short = 'O', long = "optimize")]
    pub optimize: bool,

    /// Max call depth; -1 unset, 0 unlimited
    #[arg(long, default_value_t = -1, value_name = "N", allow_hyphen_values = true)]
    pub max_recursion: i64,

    /// Max VM dispatch steps; -1 unset, 0 unlimited
    #[arg(long, default_value_t = -1, value_name = "N", allow_hyphen_values = true)]
    pub max_steps: i64,

    /// Max bytes of tracked allocation; -1 unset, 0 unlimited
    #[arg(long, value_name = "N", allow_hyphen_values = true)]
    pub max_mem: Option<i64>,

    /// Second spelling of --max-mem; giving both with different values is
    /// an error
    #[arg(long, value_name = "N", allow_hyphen_values = true)]
    pub max_memory: Option<i64>,
}

/// Merge the two spellings of the memory flag. Both given with differing
/// non-negative values is a usage error; matching values, or one spelling
/// left unset (or explicitly `-1`), collapse to one.
fn merge_memory_flags(max_mem: Option<i64>, max_memory: Option<i64>) -> Result<i64, String> {
    match (max_mem, max_memory) {
        (None, None) => Ok(-1),
        (Some(value), None) | (None, Some(value)) => Ok(value),
        (Some(a), Some(b)) => {
            if a >= 0 && b >= 0 && a != b {
                Err(format!("--max-mem {a} conflicts with --max-memory {b}"))
            } else if a >= 0 {
                Ok(a)
            } else {
                Ok(b)
            }
        }
    }
}

pub fn run(args: RunArgs) -> Result<i32> {
    let max_mem_flag = match merge_memory_flags(args.max_mem, args.max_memory) {
        Ok(flag) => flag,
        Err(message) => {
            eprintln!("usage: {message}");
            return Ok(2);
        }
    };

    // Project context anchors at the target file's directory when one was
    // given, the current directory otherwise.
    let start = match &args.path {
        Some(raw) => {
            let candidate = as_file_path(raw);
            match candidate.as_deref().and_then(Path::parent) {
                Some(parent) if parent.as_os_str().is_empty() => PathBuf::from("."),
                Some(parent) => parent.to_path_buf(),
                None => PathBuf::from("."),
            }
        }
        None => PathBuf::from("."),
    };
    let project = ProjectContext::discover(&start)?;
    let resolver = project.resolver();

    let entry = match &args.path {
        Some(raw) => match as_file_path(raw) {
            Some(path) => path
                .canonicalize()
                .with_context(|| format!("resolving {}", path.display()))?,
            None => {
                // Not a file on disk: treat it as an import spec.
                let from = std::env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join("__cli__");
                match resolver.resolve(&from, raw) {
                    Ok(path) => path,
                    Err(err) => {
                        eprintln!("error: {err}");
                        return Ok(1);
                    }
                }
            }
        },
        None => match &project.manifest.entry {
            Some(entry) => {
                let path = project.root.join(entry);
                path.canonicalize()
                    .with_context(|| format!("resolving entry {}", path.display()))?
            }
            None => {
                eprintln!("usage: welle [run] <path> (or set `entry` in welle.toml)");
                return Ok(2);
            }
        },
    };

    let max_recursion = effective_limit(args.max_recursion, project.manifest.max_recursion);
    let max_steps = effective_limit(args.max_steps, project.manifest.max_steps);
    let max_mem = effective_limit(max_mem_flag, project.manifest.max_mem);

    if args.tokens {
        return dump_tokens(&entry);
    }
    if args.ast {
        return dump_ast(&entry);
    }

    let loader = Loader::new(resolver.clone());
    if args.dis {
        match loader.load_entry(&entry, args.optimize) {
            Ok((bytecode, _)) => {
                print!("{}", disassemble(&bytecode));
                return Ok(0);
            }
            Err(err) => {
                eprintln!("error: {err}");
                return Ok(1);
            }
        }
    }

    if args.vm {
        let (bytecode, _) = match loader.load_entry(&entry, args.optimize) {
            Ok(loaded) => loaded,
            Err(err) => {
                eprintln!("error: {err}");
                return Ok(1);
            }
        };
        let mut vm = VM::new(&bytecode);
        vm.set_importer(loader.importer());
        vm.set_max_recursion(max_recursion);
        vm.set_max_steps(max_steps);
        vm.set_max_memory(max_mem);
        match vm.run() {
            Ok(_) => Ok(0),
            Err(err) => {
                eprintln!("error: {err}");
                Ok(1)
            }
        }
    } else {
        let mut runner = Runner::new();
        runner.set_resolver(resolver);
        runner.enable_imports();
        runner.set_max_recursion(max_recursion);
        runner.set_max_memory(max_mem);
        match runner.run_file(&entry) {
            Ok(_) => Ok(0),
            Err(err) => {
                eprintln!("error: {err}");
                Ok(1)
            }
        }
    }
}

/// Interpret the argument as a file on disk, appending the module extension
/// when missing. Returns None when nothing exists there.
fn as_file_path(raw: &str) -> Option<PathBuf> {
    let direct = PathBuf::from(raw);
    if direct.is_file() {
        return Some(direct);
    }
    if direct.extension().is_none() {
        let with_ext = direct.with_extension(MODULE_EXTENSION);
        if with_ext.is_file() {
            return Some(with_ext);
        }
    }
    None
}

fn dump_tokens(entry: &Path) -> Result<i32> {
    let source = std::fs::read_to_string(entry)
        .with_context(|| format!("reading {}", entry.display()))?;
    let (tokens, errors) = Lexer::new(&source).tokenize();
    for token in &tokens {
        println!("{} {:?} {:?}", token.span, token.kind, token.lexeme);
    }
    if !errors.is_empty() {
        for error in &errors {
            eprintln!("error: {}:{error}", entry.display());
        }
        return Ok(1);
    }
    Ok(0)
}

fn dump_ast(entry: &Path) -> Result<i32> {
    let source = std::fs::read_to_string(entry)
        .with_context(|| format!("reading {}", entry.display()))?;
    match welle_runtime::parse_source(&source) {
        Ok(program) => {
            println!("{program:#?}");
            Ok(0)
        }
        Err(errors) => {
            for error in &errors {
                eprintln!("error: {}:{error}", entry.display());
            }
            Ok(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_single_spelling_passes_through() {
        assert_eq!(merge_memory_flags(None, None), Ok(-1));
        assert_eq!(merge_memory_flags(Some(1000), None), Ok(1000));
        assert_eq!(merge_memory_flags(None, Some(0)), Ok(0));
    }

    #[test]
    fn test_merge_matching_values_are_allowed() {
        assert_eq!(merge_memory_flags(Some(1000), Some(1000)), Ok(1000));
        assert_eq!(merge_memory_flags(Some(0), Some(0)), Ok(0));
    }

    #[test]
    fn test_merge_differing_values_conflict() {
        let err = merge_memory_flags(Some(10), Some(1000)).unwrap_err();
        assert_eq!(err, "--max-mem 10 conflicts with --max-memory 1000");
    }

    #[test]
    fn test_merge_explicit_unset_defers_to_the_other() {
        assert_eq!(merge_memory_flags(Some(-1), Some(1000)), Ok(1000));
        assert_eq!(merge_memory_flags(Some(1000), Some(-1)), Ok(1000));
        assert_eq!(merge_memory_flags(Some(-1), Some(-1)), Ok(-1));
    }
}

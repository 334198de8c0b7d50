//! welle — CLI for the welle scripting language
//!
//! EXAMPLES:
//!     welle main.wll               Run a program (tree-walking evaluator)
//!     welle run main.wll --vm      Run on the bytecode VM
//!     welle repl                   Start an interactive session
//!     welle init --name demo       Scaffold a project
//!     welle test                   Run *.test.wll and tests/**/*.wll
//!
//! Exit codes: 0 success, 1 program error, 2 usage error.

use clap::{Parser, Subcommand};

mod commands;
mod config;
mod testing;

/// Welle language runner.
#[derive(Parser)]
#[command(name = "welle")]
#[command(version)]
#[command(about = "Run, test, and explore welle programs")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// `welle <path>` runs directly, without the `run` subcommand.
    #[command(flatten)]
    run: commands::run::RunArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a program
    ///
    /// The path may be a file or an import spec (bare name, std:NAME).
    /// Without a path, the manifest's `entry` runs. Limits accept -1
    /// (unset), 0 (unlimited), or a positive cap; CLI flags override the
    /// manifest.
    #[command(visible_alias = "r")]
    Run(commands::run::RunArgs),

    /// Start an interactive REPL
    ///
    /// Entries share one compiled world: globals, functions, and imported
    /// modules persist until :reset.
    Repl,

    /// Scaffold a project (welle.toml plus an entry file)
    Init(commands::init::InitArgs),

    /// Run test files
    ///
    /// Discovers *.test.wll anywhere plus tests/**/*.wll (excluding
    /// tests/fixtures/**), checks their `// expect:` directives, and exits
    /// 1 on any failure.
    #[command(visible_alias = "t")]
    Test(commands::test::TestArgs),
}

fn main() {
    let cli = Cli::parse();
    let result = match cli.command {
        Some(Commands::Run(args)) => commands::run::run(args),
        Some(Commands::Repl) => commands::repl::run(),
        Some(Commands::Init(args)) => commands::init::run(args),
        Some(Commands::Test(args)) => commands::test::run(args),
        None => commands::run::run(cli.run),
    };
    let code = match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            1
        }
    };
    std::process::exit(code);
}

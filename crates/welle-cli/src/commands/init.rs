//! Project scaffolding

use anyhow::{bail, Context, Result};
use welle_config::MANIFEST_FILE;

#[derive(clap::Args)]
pub struct InitArgs {
    /// Project name (defaults to the directory name)
    #[arg(long)]
    pub name: Option<String>,

    /// Entry file name
    #[arg(long, default_value = "main.wll")]
    pub entry: String,

    /// Overwrite existing files
    #[arg(long)]
    pub force: bool,
}

pub fn run(args: InitArgs) -> Result<i32> {
    let cwd = std::env::current_dir().context("reading current directory")?;
    let name = match args.name {
        Some(name) => name,
        None => cwd
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("welle-project")
            .to_string(),
    };

    let manifest_path = cwd.join(MANIFEST_FILE);
    if manifest_path.exists() && !args.force {
        bail!(
            "project already initialized: {} exists (use --force to overwrite)",
            manifest_path.display()
        );
    }
    let entry_path = cwd.join(&args.entry);
    if entry_path.exists() && !args.force {
        bail!(
            "{} exists (use --force to overwrite)",
            entry_path.display()
        );
    }

    let manifest = format!("name = \"{name}\"\nentry = \"{}\"\n", args.entry);
    std::fs::write(&manifest_path, manifest)
        .with_context(|| format!("writing {}", manifest_path.display()))?;

    let entry_source = format!("print(\"hello from {name}\")\n");
    std::fs::write(&entry_path, entry_source)
        .with_context(|| format!("writing {}", entry_path.display()))?;

    println!("created {}", manifest_path.display());
    println!("created {}", entry_path.display());
    println!("run it with: welle {}", args.entry);
    Ok(0)
}

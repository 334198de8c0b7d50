//! Interactive REPL
//!
//! Line-edited with persistent history. Multiline input continues while
//! delimiters are unbalanced. Each entry extends the same compiled world;
//! errors print and the loop continues.

use crate::config::ProjectContext;
use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::{Path, PathBuf};
use welle_runtime::repl::needs_continuation;
use welle_runtime::{Loader, ReplSession, Value};

const PROMPT: &str = "welle> ";
const CONTINUATION: &str = "....> ";

pub fn run() -> Result<i32> {
    let mut editor = DefaultEditor::new()?;
    let history = history_path();
    if let Some(path) = &history {
        let _ = editor.load_history(path);
    }

    let project = ProjectContext::discover(Path::new("."))?;
    let mut session = ReplSession::with_loader(Loader::new(project.resolver()));

    println!("welle v{}", welle_runtime::VERSION);
    println!("Type expressions or statements; :help for commands");

    loop {
        let mut buffer = String::new();
        let mut prompt = PROMPT;
        let line = loop {
            match editor.readline(prompt) {
                Ok(line) => {
                    if !buffer.is_empty() {
                        buffer.push('\n');
                    }
                    buffer.push_str(&line);
                    if needs_continuation(&buffer) {
                        prompt = CONTINUATION;
                        continue;
                    }
                    break Some(std::mem::take(&mut buffer));
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    break None;
                }
                Err(ReadlineError::Eof) => {
                    save_history(&mut editor, &history);
                    return Ok(0);
                }
                Err(err) => {
                    eprintln!("error: {err}");
                    save_history(&mut editor, &history);
                    return Ok(1);
                }
            }
        };
        let Some(input) = line else { continue };
        let trimmed = input.trim();
        if trimmed.is_empty() {
            continue;
        }

        match trimmed {
            ":quit" | ":q" => {
                save_history(&mut editor, &history);
                return Ok(0);
            }
            ":reset" => {
                session.reset();
                println!("session reset");
                continue;
            }
            ":help" | ":h" => {
                print_help();
                continue;
            }
            _ => {}
        }

        let _ = editor.add_history_entry(trimmed);
        match session.eval_line(&input) {
            Ok(Value::Nil) => {}
            Ok(value) => println!("{value}"),
            Err(message) => println!("error: {message}"),
        }
    }
}

fn print_help() {
    println!("  :quit, :q    exit");
    println!("  :reset       drop all definitions and modules");
    println!("  :help, :h    this help");
}

fn history_path() -> Option<PathBuf> {
    let mut path = dirs::data_dir()?;
    path.push("welle");
    std::fs::create_dir_all(&path).ok()?;
    path.push("history.txt");
    Some(path)
}

fn save_history(editor: &mut DefaultEditor, history: &Option<PathBuf>) {
    if let Some(path) = history {
        let _ = editor.save_history(path);
    }
}

//! Test execution
//!
//! Runs one annotated program under the chosen engine with its stdout
//! captured, then checks the `// expect:` directives. Each test gets a
//! fresh runner or VM so module caches never leak between files.

use crate::config::ProjectContext;
use std::path::Path;
use welle_runtime::spectest::{self, Expectation, Outcome};
use welle_runtime::{buffer_contents, buffer_writer, Loader, Runner, VM};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Interpreter,
    Vm,
}

/// Run a single test file. `Ok(())` means the expectation held.
pub fn run_test_file(path: &Path, engine: Engine) -> Result<(), String> {
    let source =
        std::fs::read_to_string(path).map_err(|e| format!("cannot read test file: {e}"))?;
    let expectation = spectest::parse_directives(&source)
        .map_err(|e| e.to_string())?
        .unwrap_or(Expectation {
            outcome: Outcome::Ok,
            stdout: None,
        });

    let start = path.parent().unwrap_or_else(|| Path::new("."));
    let project = ProjectContext::discover(start).map_err(|e| e.to_string())?;
    let resolver = project.resolver();

    let (writer, buffer) = buffer_writer();
    let run_result: Result<(), String> = match engine {
        Engine::Interpreter => {
            let mut runner = Runner::new();
            runner.set_resolver(resolver);
            runner.enable_imports();
            runner.set_output(writer);
            runner.run_file(path).map(|_| ()).map_err(|e| e.to_string())
        }
        Engine::Vm => {
            let loader = Loader::new(resolver);
            match loader.load_entry(path, false) {
                Ok((bytecode, _)) => {
                    let mut vm = VM::new(&bytecode);
                    vm.set_importer(loader.importer());
                    vm.set_output(writer);
                    vm.run().map(|_| ()).map_err(|e| e.to_string())
                }
                Err(e) => Err(e.to_string()),
            }
        }
    };

    let stdout = buffer_contents(&buffer);
    let result_ref = match &run_result {
        Ok(()) => Ok(()),
        Err(message) => Err(message.as_str()),
    };
    spectest::check(&expectation, result_ref, &stdout, start)
}

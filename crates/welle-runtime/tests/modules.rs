//! Module system end-to-end: resolution, caching, exports, cycles, and
//! engine parity for imported programs.

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use welle_runtime::{
    buffer_contents, buffer_writer, Loader, Resolver, Runner, VM,
};

fn write_module(dir: &Path, rel: &str, source: &str) -> PathBuf {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, source).unwrap();
    path
}

fn resolver(root: &Path) -> Resolver {
    Resolver::new(root.join("std"), vec![root.join("modules"), root.to_path_buf()])
}

/// Run an entry file on the VM with imports wired through a loader.
fn run_vm(root: &Path, entry: &Path) -> (String, Option<String>) {
    let loader = Loader::new(resolver(root));
    let (writer, buffer) = buffer_writer();
    let result = match loader.load_entry(entry, false) {
        Ok((bytecode, _)) => {
            let mut vm = VM::new(&bytecode);
            vm.set_importer(loader.importer());
            vm.set_output(writer);
            vm.run().map(|_| ()).map_err(|e| e.to_string())
        }
        Err(e) => Err(e.to_string()),
    };
    (buffer_contents(&buffer), result.err())
}

/// Run an entry file on the evaluator with imports enabled.
fn run_interp(root: &Path, entry: &Path) -> (String, Option<String>) {
    let (writer, buffer) = buffer_writer();
    let mut runner = Runner::new();
    runner.set_resolver(resolver(root));
    runner.enable_imports();
    runner.set_output(writer);
    let result = runner.run_file(entry).map(|_| ()).map_err(|e| e.to_string());
    (buffer_contents(&buffer), result.err())
}

fn assert_parity(root: &Path, entry: &Path) -> (String, Option<String>) {
    let vm = run_vm(root, entry);
    let interp = run_interp(root, entry);
    assert_eq!(vm.0, interp.0, "stdout diverged for {}", entry.display());
    assert_eq!(
        vm.1.is_some(),
        interp.1.is_some(),
        "outcome diverged for {}: vm={:?} interp={:?}",
        entry.display(),
        vm.1,
        interp.1
    );
    vm
}

#[test]
fn test_import_binds_exports_in_both_engines() {
    let tmp = TempDir::new().unwrap();
    write_module(
        tmp.path(),
        "math.wll",
        "export pi = 3\nexport fn sq(x) { return x * x }\nhidden = 99\n",
    );
    let entry = write_module(
        tmp.path(),
        "main.wll",
        "import \"./math\" as m\nprint(m.pi)\nprint(m.sq(5))\nprint(m.hidden)\n",
    );
    let (stdout, err) = assert_parity(tmp.path(), &entry);
    assert_eq!(err, None);
    // non-exported bindings are invisible: m.hidden is nil
    assert_eq!(stdout, "3\n25\nnil\n");
}

#[test]
fn test_module_body_runs_exactly_once() {
    let tmp = TempDir::new().unwrap();
    write_module(
        tmp.path(),
        "noisy.wll",
        "print(\"loading\")\nexport x = 1\n",
    );
    write_module(tmp.path(), "a.wll", "import \"./noisy\" as n\nexport ax = n.x\n");
    write_module(tmp.path(), "b.wll", "import \"./noisy\" as n\nexport bx = n.x\n");
    let entry = write_module(
        tmp.path(),
        "main.wll",
        "import \"./a\" as a\nimport \"./b\" as b\nimport \"./noisy\" as n\nprint(a.ax + b.bx + n.x)\n",
    );
    let (stdout, err) = assert_parity(tmp.path(), &entry);
    assert_eq!(err, None);
    assert_eq!(stdout, "loading\n3\n");
}

#[test]
fn test_import_cycle_reports_chain_in_both_engines() {
    let tmp = TempDir::new().unwrap();
    write_module(tmp.path(), "a.wll", "import \"./b\" as b\n");
    write_module(tmp.path(), "b.wll", "import \"./a\" as a\n");
    let entry = tmp.path().join("a.wll");

    for (_, err) in [run_vm(tmp.path(), &entry), run_interp(tmp.path(), &entry)] {
        let message = err.expect("cycle must fail");
        assert!(message.contains("WM0001 import cycle: "), "got: {message}");
        // full chain a -> b -> a
        let chain = message.split("import cycle: ").nth(1).unwrap();
        let a_abs = tmp.path().join("a.wll").canonicalize().unwrap();
        let b_abs = tmp.path().join("b.wll").canonicalize().unwrap();
        assert_eq!(chain.matches(&*a_abs.display().to_string()).count(), 2);
        assert_eq!(chain.matches(&*b_abs.display().to_string()).count(), 1);
        assert!(chain.contains(" -> "));
    }
}

#[test]
fn test_duplicate_export_fails_in_both_engines() {
    let tmp = TempDir::new().unwrap();
    write_module(tmp.path(), "dup.wll", "export x = 1\nexport x = 2\n");
    let entry = tmp.path().join("dup.wll");

    for (_, err) in [run_vm(tmp.path(), &entry), run_interp(tmp.path(), &entry)] {
        let message = err.expect("duplicate export must fail");
        assert!(message.contains("duplicate export \"x\""), "got: {message}");
        assert!(message.contains("dup.wll:1"));
        assert!(message.contains("dup.wll:2"));
    }
}

#[test]
fn test_std_and_search_path_resolution() {
    let tmp = TempDir::new().unwrap();
    write_module(tmp.path(), "std/mathx.wll", "export two = 2\n");
    write_module(tmp.path(), "modules/util.wll", "export three = 3\n");
    let entry = write_module(
        tmp.path(),
        "main.wll",
        "import \"std:mathx\" as m\nimport \"util\" as u\nprint(m.two + u.three)\n",
    );
    let (stdout, err) = assert_parity(tmp.path(), &entry);
    assert_eq!(err, None);
    assert_eq!(stdout, "5\n");
}

#[test]
fn test_transitive_imports() {
    let tmp = TempDir::new().unwrap();
    write_module(tmp.path(), "base.wll", "export one = 1\n");
    write_module(
        tmp.path(),
        "mid.wll",
        "import \"./base\" as b\nexport two = b.one + 1\n",
    );
    let entry = write_module(
        tmp.path(),
        "main.wll",
        "import \"./mid\" as m\nprint(m.two)\n",
    );
    let (stdout, err) = assert_parity(tmp.path(), &entry);
    assert_eq!(err, None);
    assert_eq!(stdout, "2\n");
}

#[test]
fn test_exported_function_reads_its_module_globals() {
    // an exported closure called from the entry must address its own
    // module's globals, not the caller's
    let tmp = TempDir::new().unwrap();
    write_module(
        tmp.path(),
        "counterlib.wll",
        "offset = 100\nexport fn bump(n) { return n + offset }\n",
    );
    let entry = write_module(
        tmp.path(),
        "main.wll",
        "offset = 5\nimport \"./counterlib\" as c\nprint(c.bump(1))\nprint(offset)\n",
    );
    let (stdout, err) = assert_parity(tmp.path(), &entry);
    assert_eq!(err, None);
    assert_eq!(stdout, "101\n5\n");
}

#[test]
fn test_missing_import_error_lists_attempts() {
    let tmp = TempDir::new().unwrap();
    let entry = write_module(tmp.path(), "main.wll", "import \"ghost\" as g\n");
    for (_, err) in [run_vm(tmp.path(), &entry), run_interp(tmp.path(), &entry)] {
        let message = err.expect("missing module must fail");
        assert!(message.contains("cannot resolve import \"ghost\""));
        assert!(message.contains("tried:"));
    }
}

#[test]
fn test_parse_error_in_dependency_is_fatal() {
    let tmp = TempDir::new().unwrap();
    write_module(tmp.path(), "broken.wll", "fn oops( {\n");
    let entry = write_module(tmp.path(), "main.wll", "import \"./broken\" as b\n");
    for (_, err) in [run_vm(tmp.path(), &entry), run_interp(tmp.path(), &entry)] {
        let message = err.expect("broken dependency must fail");
        assert!(message.contains("WP0001 parse error"), "got: {message}");
        assert!(message.contains("broken.wll"));
    }
}

#[test]
fn test_module_evaluation_order_follows_first_import() {
    let tmp = TempDir::new().unwrap();
    write_module(tmp.path(), "one.wll", "print(\"one\")\nexport x = 1\n");
    write_module(tmp.path(), "two.wll", "print(\"two\")\nexport x = 2\n");
    let entry = write_module(
        tmp.path(),
        "main.wll",
        "import \"./one\" as a\nimport \"./two\" as b\nimport \"./one\" as again\nprint(\"done\")\n",
    );
    let (stdout, err) = assert_parity(tmp.path(), &entry);
    assert_eq!(err, None);
    assert_eq!(stdout, "one\ntwo\ndone\n");
}

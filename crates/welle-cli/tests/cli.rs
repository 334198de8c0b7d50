//! End-to-end CLI tests: run, limits, modules, init, and the test command,
//! under both engines.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn welle() -> Command {
    Command::cargo_bin("welle").expect("welle binary builds")
}

fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

#[test]
fn run_prints_and_exits_zero() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "main.wll", "print(\"ok\")\n");

    for engine_flag in [None, Some("--vm")] {
        let mut cmd = welle();
        cmd.current_dir(tmp.path()).arg("main.wll");
        if let Some(flag) = engine_flag {
            cmd.arg(flag);
        }
        cmd.assert()
            .success()
            .stdout(predicate::str::contains("ok"));
    }
}

#[test]
fn run_subcommand_and_bare_path_are_equivalent() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "main.wll", "print(40 + 2)\n");

    welle()
        .current_dir(tmp.path())
        .args(["run", "main.wll"])
        .assert()
        .success()
        .stdout(predicate::str::contains("42"));
    welle()
        .current_dir(tmp.path())
        .arg("main.wll")
        .assert()
        .success()
        .stdout(predicate::str::contains("42"));
}

#[test]
fn program_error_exits_one() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "main.wll", "print(1 / 0)\n");

    welle()
        .current_dir(tmp.path())
        .arg("main.wll")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("division by zero"));
}

#[test]
fn usage_error_exits_two() {
    let tmp = TempDir::new().unwrap();
    // no path, no manifest entry
    welle().current_dir(tmp.path()).assert().code(2);
    // unknown flag is a clap usage error
    welle()
        .current_dir(tmp.path())
        .args(["run", "--no-such-flag"])
        .assert()
        .code(2);
}

#[test]
fn manifest_memory_limit_fails_the_program() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "welle.toml", "name = \"demo\"\nmax_mem = 10\n");
    write(tmp.path(), "main.wll", "print(\"ok\")\n");

    for engine_flag in [None, Some("--vm")] {
        let mut cmd = welle();
        cmd.current_dir(tmp.path()).arg("main.wll");
        if let Some(flag) = engine_flag {
            cmd.arg(flag);
        }
        cmd.assert()
            .code(1)
            .stderr(predicate::str::contains("max memory exceeded (10 bytes)"));
    }
}

#[test]
fn cli_memory_flag_overrides_manifest() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "welle.toml", "name = \"demo\"\nmax_mem = 10\n");
    write(tmp.path(), "main.wll", "print(\"ok\")\n");

    welle()
        .current_dir(tmp.path())
        .args(["main.wll", "--max-mem", "1000"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ok"));
    // the second spelling behaves identically
    welle()
        .current_dir(tmp.path())
        .args(["main.wll", "--max-memory", "1000"])
        .assert()
        .success();
}

#[test]
fn differing_max_mem_and_max_memory_values_are_an_error() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "main.wll", "print(\"ok\")\n");

    welle()
        .current_dir(tmp.path())
        .args(["main.wll", "--max-mem", "10", "--max-memory", "1000"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("conflicts"));
}

#[test]
fn matching_max_mem_and_max_memory_values_are_allowed() {
    let tmp = TempDir::new().unwrap();
    // the manifest's tiny budget proves the merged CLI value took effect
    write(tmp.path(), "welle.toml", "name = \"demo\"\nmax_mem = 10\n");
    write(tmp.path(), "main.wll", "print(\"ok\")\n");

    welle()
        .current_dir(tmp.path())
        .args(["main.wll", "--max-mem", "1000", "--max-memory", "1000"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ok"));
}

#[test]
fn import_cycle_reports_wm0001_chain() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "a.wll", "import \"./b\" as b\n");
    write(tmp.path(), "b.wll", "import \"./a\" as a\n");

    for engine_flag in [None, Some("--vm")] {
        let mut cmd = welle();
        cmd.current_dir(tmp.path()).arg("a.wll");
        if let Some(flag) = engine_flag {
            cmd.arg(flag);
        }
        cmd.assert()
            .code(1)
            .stderr(
                predicate::str::contains("WM0001 import cycle")
                    .and(predicate::str::contains("a.wll"))
                    .and(predicate::str::contains("b.wll"))
                    .and(predicate::str::contains(" -> ")),
            );
    }
}

#[test]
fn duplicate_export_names_both_locations() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "dup.wll", "export x = 1\nexport x = 2\n");

    for engine_flag in [None, Some("--vm")] {
        let mut cmd = welle();
        cmd.current_dir(tmp.path()).arg("dup.wll");
        if let Some(flag) = engine_flag {
            cmd.arg(flag);
        }
        cmd.assert()
            .code(1)
            .stderr(
                predicate::str::contains("duplicate export \"x\"")
                    .and(predicate::str::contains("dup.wll:1"))
                    .and(predicate::str::contains("dup.wll:2")),
            );
    }
}

#[test]
fn custom_std_root_and_module_paths_resolve() {
    let tmp = TempDir::new().unwrap();
    write(
        tmp.path(),
        "welle.toml",
        "name = \"demo\"\nstd_root = \"custom_std\"\nmodule_paths = [\"modules\"]\n",
    );
    write(tmp.path(), "custom_std/math.wll", "export two = 2\n");
    write(tmp.path(), "modules/util.wll", "export three = 3\n");
    write(
        tmp.path(),
        "main.wll",
        "import \"std:math\" as m\nimport \"util\" as u\nprint(m.two + u.three)\n",
    );

    for engine_flag in [None, Some("--vm")] {
        let mut cmd = welle();
        cmd.current_dir(tmp.path()).arg("main.wll");
        if let Some(flag) = engine_flag {
            cmd.arg(flag);
        }
        cmd.assert()
            .success()
            .stdout(predicate::str::contains("5"));
    }
}

#[test]
fn manifest_entry_runs_without_a_path() {
    let tmp = TempDir::new().unwrap();
    write(
        tmp.path(),
        "welle.toml",
        "name = \"demo\"\nentry = \"app.wll\"\n",
    );
    write(tmp.path(), "app.wll", "print(\"entry\")\n");

    welle()
        .current_dir(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("entry"));
}

#[test]
fn init_scaffolds_a_runnable_project() {
    let tmp = TempDir::new().unwrap();
    welle()
        .current_dir(tmp.path())
        .args(["init", "--name", "demo"])
        .assert()
        .success();
    assert!(tmp.path().join("welle.toml").exists());
    assert!(tmp.path().join("main.wll").exists());

    welle()
        .current_dir(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("hello from demo"));

    // refuses to overwrite without --force
    welle().current_dir(tmp.path()).arg("init").assert().code(1);
    welle()
        .current_dir(tmp.path())
        .args(["init", "--force"])
        .assert()
        .success();
}

#[test]
fn spectest_stdout_exact_passes_under_both_engines() {
    let tmp = TempDir::new().unwrap();
    write(
        tmp.path(),
        "stdout_exact.test.wll",
        "// expect: ok\n// expect: stdout \"alpha\\n\"\nprint(\"alpha\")\n",
    );

    welle()
        .current_dir(tmp.path())
        .arg("test")
        .assert()
        .success()
        .stdout(predicate::str::contains("PASS"));
    welle()
        .current_dir(tmp.path())
        .args(["test", "--vm"])
        .assert()
        .success()
        .stdout(predicate::str::contains("PASS"));
}

#[test]
fn test_command_checks_error_expectations() {
    let tmp = TempDir::new().unwrap();
    write(
        tmp.path(),
        "div.test.wll",
        "// expect: error contains \"division by zero\"\nprint(1 / 0)\n",
    );
    write(
        tmp.path(),
        "tests/loop.wll",
        "// expect: stdout \"0\\n1\\n2\\n\"\nfor i in range(3) { print(i) }\n",
    );
    write(tmp.path(), "tests/fixtures/skipme.wll", "ghost_identifier\n");

    welle()
        .current_dir(tmp.path())
        .arg("test")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("div.test.wll").and(predicate::str::contains("loop.wll")),
        );
}

#[test]
fn test_command_fails_on_expectation_mismatch() {
    let tmp = TempDir::new().unwrap();
    write(
        tmp.path(),
        "bad.test.wll",
        "// expect: stdout \"beta\\n\"\nprint(\"alpha\")\n",
    );

    welle()
        .current_dir(tmp.path())
        .arg("test")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("FAIL"));
}

#[test]
fn dis_flag_prints_disassembly() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "main.wll", "1 + 2\n");

    welle()
        .current_dir(tmp.path())
        .args(["main.wll", "--dis"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Constant").and(predicate::str::contains("Add")),
        );

    // -O folds the addition away
    welle()
        .current_dir(tmp.path())
        .args(["main.wll", "--dis", "-O"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Add").not());
}

#[test]
fn tokens_and_ast_flags_dump_and_exit() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "main.wll", "x = 1\n");

    welle()
        .current_dir(tmp.path())
        .args(["main.wll", "--tokens"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Ident").and(predicate::str::contains("Int")));
    welle()
        .current_dir(tmp.path())
        .args(["main.wll", "--ast"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Assign"));
}

#[test]
fn parse_error_carries_wp0001() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "main.wll", "x = = 1\n");

    welle()
        .current_dir(tmp.path())
        .args(["main.wll", "--vm"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("WP0001 parse error"));
}

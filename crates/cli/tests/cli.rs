//! End-to-end tests for the `romset` binary: exit codes, stdout contract
//! and on-disk results, driven through real processes.

use assert_cmd::Command;
use predicates::prelude::*;
use sha1::{Digest, Sha1};
use std::path::Path;
use tempfile::TempDir;

fn romset_cmd() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_romset"));
    cmd.env("RUST_LOG", "error");
    cmd
}

fn rom_entry(name: &str, content: &[u8]) -> String {
    format!(
        r#"<rom name="{name}" size="{}" crc="{:08x}" sha1="{}"/>"#,
        content.len(),
        crc32fast::hash(content),
        hex::encode(Sha1::digest(content)),
    )
}

fn dat(games: &[(&str, Vec<String>)]) -> String {
    let mut doc = String::from("<datafile><header><name>Test</name></header>");
    for (game, roms) in games {
        doc.push_str(&format!(r#"<game name="{game}">"#));
        for rom in roms {
            doc.push_str(rom);
        }
        doc.push_str("</game>");
    }
    doc.push_str("</datafile>");
    doc
}

fn touch(path: &Path, content: &[u8]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

#[test]
fn verify_complete_set_exits_zero() {
    let root = TempDir::new().unwrap();
    touch(&root.path().join("x/r.bin"), b"test");

    romset_cmd()
        .arg("verify")
        .arg(root.path())
        .write_stdin(dat(&[("G", vec![rom_entry("r.bin", b"test")])]))
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn verify_incomplete_set_prints_residual() {
    let root = TempDir::new().unwrap();
    touch(&root.path().join("r.bin"), b"abcd");

    romset_cmd()
        .arg("verify")
        .arg(root.path())
        .write_stdin(dat(&[("G", vec![rom_entry("r.bin", b"test")])]))
        .assert()
        .code(2)
        .stdout(predicate::str::contains(r#"<game name="G">"#))
        .stdout(predicate::str::contains("r.bin"));
}

#[test]
fn export_builds_deterministic_target() {
    let source = TempDir::new().unwrap();
    touch(&source.path().join("foo.smc"), b"test");
    let manifest = dat(&[("Foo (USA)", vec![rom_entry("foo.smc", b"test")])]);

    let mut archives = Vec::new();
    for _ in 0..2 {
        let target = TempDir::new().unwrap();
        romset_cmd()
            .arg("export")
            .arg(target.path())
            .arg(source.path())
            .write_stdin(manifest.clone())
            .assert()
            .success()
            .stdout(predicate::str::is_empty());
        archives.push(std::fs::read(target.path().join("Foo (USA).zip")).unwrap());
    }

    assert_eq!(archives[0], archives[1]);
}

#[test]
fn export_cleans_stray_files_from_target() {
    let source = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    touch(&source.path().join("foo.smc"), b"test");
    touch(&target.path().join("stray.bin"), b"stray");

    romset_cmd()
        .arg("export")
        .arg(target.path())
        .arg(source.path())
        .write_stdin(dat(&[("Foo (USA)", vec![rom_entry("foo.smc", b"test")])]))
        .assert()
        .success();

    assert!(target.path().join("Foo (USA).zip").exists());
    assert!(!target.path().join("stray.bin").exists());
}

#[test]
fn export_dry_run_leaves_target_untouched() {
    let source = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();
    touch(&source.path().join("foo.smc"), b"test");

    romset_cmd()
        .arg("export")
        .arg("-n")
        .arg(target.path())
        .arg(source.path())
        .write_stdin(dat(&[("Foo (USA)", vec![rom_entry("foo.smc", b"test")])]))
        .assert()
        .success();

    assert_eq!(std::fs::read_dir(target.path()).unwrap().count(), 0);
}

#[test]
fn export_missing_source_content_exits_two() {
    let source = TempDir::new().unwrap();
    let target = TempDir::new().unwrap();

    romset_cmd()
        .arg("export")
        .arg(target.path())
        .arg(source.path())
        .write_stdin(dat(&[("Foo (USA)", vec![rom_entry("foo.smc", b"test")])]))
        .assert()
        .code(2)
        .stdout(predicate::str::contains("Foo (USA)"));
}

#[test]
fn merge_combines_games_and_overrides_header() {
    let dir = TempDir::new().unwrap();
    for (index, game) in ["One", "Two", "Three"].iter().enumerate() {
        let content = format!("content {index}");
        touch(
            &dir.path().join(format!("m{index}.dat")),
            dat(&[(game, vec![rom_entry("r.bin", content.as_bytes())])]).as_bytes(),
        );
    }

    let assert = romset_cmd()
        .arg("merge")
        .arg("--set-name")
        .arg("Combined")
        .arg(dir.path().join("m0.dat"))
        .arg(dir.path().join("m1.dat"))
        .arg(dir.path().join("m2.dat"))
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    for game in ["One", "Two", "Three"] {
        assert!(stdout.contains(&format!(r#"<game name="{game}">"#)));
    }
    assert!(stdout.contains("<name>Combined</name>"));
    // Only the base file's header survives, under the overridden name.
    assert_eq!(stdout.matches("<header>").count(), 1);
}

#[test]
fn malformed_dat_exits_one() {
    let root = TempDir::new().unwrap();

    romset_cmd()
        .arg("verify")
        .arg(root.path())
        .write_stdin("this is not a dat file")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("romset:"));
}

#[test]
fn usage_error_exits_one() {
    // Exit code 2 is reserved for the incomplete-manifest outcome, so bad
    // usage must not produce it.
    romset_cmd().arg("export").assert().code(1);
    romset_cmd().arg("frobnicate").assert().code(1);
}

#[test]
fn unknown_layout_exits_one() {
    let target = TempDir::new().unwrap();
    let source = TempDir::new().unwrap();

    romset_cmd()
        .arg("export")
        .arg("--layout")
        .arg("everdrive")
        .arg(target.path())
        .arg(source.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("expected one of"));
}

//! End-to-end tests of the butterfly-convert binary

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use butterfly_io::{open_path, Action, Kind, Limits, Object};
use predicates::prelude::*;

const SMALL_TABLES: &str = "--hash-memory=1-1-1";

const THREE_NODES: &str = r#"<?xml version='1.0' encoding='UTF-8'?>
<osm version="0.6" generator="test">
  <node id="1" lat="0.5" lon="0.5"/>
  <node id="2" lat="2.0" lon="2.0"/>
  <node id="3" lat="0.9" lon="0.1">
    <tag k="name" v="Caf&#233; &amp; Bar"/>
  </node>
  <way id="10">
    <nd ref="1"/>
    <nd ref="2"/>
  </way>
  <way id="11">
    <nd ref="2"/>
  </way>
</osm>
"#;

fn convert() -> Command {
    let mut cmd = Command::cargo_bin("butterfly-convert").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

fn read(path: &Path) -> Vec<Object> {
    let mut reader = open_path(path, Limits::default()).unwrap();
    std::iter::from_fn(|| reader.read_next().unwrap()).collect()
}

#[test]
fn help_and_version() {
    convert()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("--complete-ways"));
    convert()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn bbox_extract_to_o5m() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.osm");
    let output = dir.path().join("out.o5m");
    fs::write(&input, THREE_NODES).unwrap();

    convert()
        .arg(&input)
        .arg("-b=0,0,1,1")
        .arg(SMALL_TABLES)
        .arg("-o")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let objects = read(&output);
    let keys: Vec<(Kind, i64)> = objects.iter().map(|o| (o.kind(), o.id)).collect();
    assert_eq!(keys, vec![(Kind::Node, 1), (Kind::Node, 3), (Kind::Way, 10)]);
    assert_eq!(objects[1].tag("name"), Some("Café & Bar"));
}

#[test]
fn object_and_tag_filters() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.osm");
    let output = dir.path().join("out.o5m");
    fs::write(&input, THREE_NODES).unwrap();

    convert()
        .arg(&input)
        .arg("--keep=name=")
        .arg("--drop-tags=name=")
        .arg(SMALL_TABLES)
        .arg("-o")
        .arg(&output)
        .assert()
        .success();

    let objects = read(&output);
    let keys: Vec<(Kind, i64)> = objects.iter().map(|o| (o.kind(), o.id)).collect();
    assert_eq!(keys, vec![(Kind::Node, 3)]);
    assert!(objects[0].tags.is_empty());
}

#[test]
fn xml_delete_becomes_a_bare_o5c_record() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.osc");
    let output = dir.path().join("out.o5c");
    fs::write(
        &input,
        "<osmChange version=\"0.6\">\n<delete>\n  <node id=\"5\"/>\n</delete>\n</osmChange>\n",
    )
    .unwrap();

    convert().arg(&input).arg("-o").arg(&output).assert().success();

    let bytes = fs::read(&output).unwrap();
    assert_eq!(
        bytes,
        [0xff, 0xe0, 0x04, b'o', b'5', b'c', b'2', 0xff, 0x10, 0x02, 0x0a, 0x00, 0xfe]
    );
    let objects = read(&output);
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].action, Action::Delete);
}

#[test]
fn writes_xml_to_stdout_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.osm");
    fs::write(&input, THREE_NODES).unwrap();

    convert()
        .arg(&input)
        .arg("--drop-ways")
        .arg("--emulate-osmosis")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("<?xml version='1.0' encoding='UTF-8'?>"))
        .stdout(predicate::str::contains("<node id=\"3\""))
        .stdout(predicate::str::contains("<way").not());
}

#[test]
fn reads_standard_input() {
    convert()
        .arg("-")
        .arg("-b=0,0,1,1")
        .arg(SMALL_TABLES)
        .arg("--out-osm")
        .write_stdin(THREE_NODES)
        .assert()
        .success()
        .stdout(predicate::str::contains("<node id=\"1\""))
        .stdout(predicate::str::contains("<node id=\"2\"").not());
}

#[test]
fn diff_of_identical_files_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.osm");
    let output = dir.path().join("change.osc");
    fs::write(&input, THREE_NODES).unwrap();

    convert()
        .arg("--diff")
        .arg(&input)
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .assert()
        .success();
    assert!(read(&output).is_empty());

    convert()
        .arg("--diff-contents")
        .arg(&input)
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--diff-contents needs o5m inputs"));
}

#[test]
fn bad_arguments_exit_with_2() {
    convert()
        .args(["a.osm", "--out-o5m", "--out-pbf"])
        .assert()
        .code(2);
    convert()
        .args(["a.osm", "b.osm", "--diff", "--out-pbf"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--diff"));
    convert().args(["a.osm", "-b=1,2"]).assert().code(2);
}

#[test]
fn missing_input_exits_with_3() {
    convert()
        .arg("/nonexistent/input.osm")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("/nonexistent/input.osm"));
}

#[test]
fn malformed_input_exits_with_4() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("bad.osm");
    fs::write(&input, "<osm><node id=\"x1\" lat=\"0\" lon=\"0\"/></osm>").unwrap();
    convert()
        .arg(&input)
        .assert()
        .code(4)
        .stderr(predicate::str::contains("Malformed xml input"));
}

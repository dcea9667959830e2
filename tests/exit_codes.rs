use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn forbidden_apis() -> Command {
    let binary = std::env::var("CARGO_BIN_EXE_forbidden-apis").unwrap_or_else(|_| {
        let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        path.push("target");
        path.push("debug");
        path.push("forbidden-apis");
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path.to_string_lossy().to_string()
    });
    let mut command = Command::new(binary);
    command.env_remove("JAVA_HOME").env_remove("RUST_LOG");
    command
}

fn run(command: &mut Command) -> Output {
    command.output().expect("run forbidden-apis")
}

/// A class file without members: just names, hierarchy and access flags.
fn class_bytes(name: &str, super_name: Option<&str>) -> Vec<u8> {
    fn utf8(pool: &mut Vec<u8>, value: &str) {
        pool.push(1);
        pool.extend((value.len() as u16).to_be_bytes());
        pool.extend(value.as_bytes());
    }

    let mut pool = Vec::new();
    utf8(&mut pool, name);
    pool.extend([7, 0, 1]);
    let mut count: u16 = 3;
    let super_index = match super_name {
        Some(super_name) => {
            utf8(&mut pool, super_name);
            pool.extend([7, 0, 3]);
            count += 2;
            4
        }
        None => 0,
    };

    let mut bytes = vec![0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 52];
    bytes.extend(count.to_be_bytes());
    bytes.extend(pool);
    bytes.extend(0x0021u16.to_be_bytes());
    bytes.extend(2u16.to_be_bytes());
    bytes.extend((super_index as u16).to_be_bytes());
    bytes.extend([0, 0, 0, 0, 0, 0, 0, 0]);
    bytes
}

/// Checked classes in `classes/`, a stand-in runtime in `runtime/`.
fn project(root: &Path) -> (PathBuf, PathBuf) {
    let classes = root.join("classes");
    let runtime = root.join("runtime");
    fs::create_dir_all(classes.join("com/example")).expect("classes dir");
    fs::create_dir_all(runtime.join("java/lang")).expect("runtime dir");
    fs::write(
        classes.join("com/example/Worker.class"),
        class_bytes("com/example/Worker", Some("java/lang/Thread")),
    )
    .expect("write Worker");
    fs::write(
        runtime.join("java/lang/Object.class"),
        class_bytes("java/lang/Object", None),
    )
    .expect("write Object");
    fs::write(
        runtime.join("java/lang/Thread.class"),
        class_bytes("java/lang/Thread", Some("java/lang/Object")),
    )
    .expect("write Thread");
    (classes, runtime)
}

#[test]
fn missing_input_is_a_usage_error() {
    let output = run(forbidden_apis()
        .arg("--input")
        .arg("missing.class")
        .arg("--signature")
        .arg("java.lang.Thread"));

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn no_signatures_is_a_usage_error() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let (classes, runtime) = project(temp_dir.path());
    let output = run(forbidden_apis()
        .arg("--input")
        .arg(&classes)
        .arg("--bootclasspath")
        .arg(&runtime));

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn violations_exit_with_one() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let (classes, runtime) = project(temp_dir.path());
    let output = run(forbidden_apis()
        .arg("--input")
        .arg(&classes)
        .arg("--bootclasspath")
        .arg(&runtime)
        .arg("--signature")
        .arg("java.lang.Thread @ Use an executor instead"));

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Forbidden class use: java.lang.Thread [Use an executor instead]"),
        "{stderr}"
    );
}

#[test]
fn signatures_can_name_checked_classes() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let (classes, runtime) = project(temp_dir.path());
    fs::write(
        classes.join("com/example/Pool.class"),
        class_bytes("com/example/Pool", Some("com/example/Worker")),
    )
    .expect("write Pool");
    let output = run(forbidden_apis()
        .arg("--input")
        .arg(&classes)
        .arg("--bootclasspath")
        .arg(&runtime)
        .arg("--signature")
        .arg("com.example.Worker @ Internal worker"));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.code(), Some(1), "{stderr}");
    assert!(
        stderr.contains("Forbidden class use: com.example.Worker [Internal worker]"),
        "{stderr}"
    );
}

#[test]
fn violations_can_be_reported_without_failing() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let (classes, runtime) = project(temp_dir.path());
    let sarif = temp_dir.path().join("report.sarif");
    let output = run(forbidden_apis()
        .arg("--input")
        .arg(&classes)
        .arg("--bootclasspath")
        .arg(&runtime)
        .arg("--signature")
        .arg("java.lang.Thread")
        .arg("--no-fail-on-violation")
        .arg("--sarif")
        .arg(&sarif));

    assert_eq!(output.status.code(), Some(0));
    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&sarif).expect("read sarif")).expect("json");
    let results = report["runs"][0]["results"].as_array().expect("results");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["ruleId"], "FORBIDDEN_API");
}

#[test]
fn bundled_jdk_signatures_need_a_runtime() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let (classes, _) = project(temp_dir.path());
    let output = run(forbidden_apis()
        .arg("--input")
        .arg(&classes)
        .arg("--allow-missing-classes")
        .arg("--bundled-signatures")
        .arg("jdk-unsafe-17"));

    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn lists_bundled_signatures() {
    let output = run(forbidden_apis().arg("--list-bundled-signatures"));

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.lines().any(|line| line == "jdk-unsafe-1.8"), "{stdout}");
    assert!(stdout.lines().any(|line| line == "jdk-deprecated-21"), "{stdout}");
}

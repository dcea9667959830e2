use std::fs;
use std::path::Path;

fn main() {
    println!("cargo:rerun-if-changed=signatures/");

    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();
    let signatures_dir = Path::new(&manifest_dir).join("signatures");

    let mut names: Vec<String> = fs::read_dir(&signatures_dir)
        .expect("signatures/ directory not found")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter_map(|name| name.strip_suffix(".txt").map(str::to_string))
        .collect();
    names.sort();

    let entries: String = names
        .iter()
        .map(|name| {
            let path = signatures_dir.join(format!("{name}.txt"));
            format!("    ({:?}, include_str!({:?})),\n", name, path)
        })
        .collect();
    let content = format!("static BUNDLED_SIGNATURES: &[(&str, &str)] = &[\n{entries}];\n");

    let out_dir = std::env::var("OUT_DIR").unwrap();
    let dest = Path::new(&out_dir).join("bundled_signatures.rs");
    fs::write(dest, content).unwrap();
}

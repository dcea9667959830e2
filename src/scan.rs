use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use opentelemetry::KeyValue;
use serde_json::Value;
use serde_sarif::sarif::{Artifact, ArtifactLocation, ArtifactRoles};
use zip::ZipArchive;

use crate::telemetry::{Telemetry, with_span};

/// Class file bytes to check, with where they came from.
pub(crate) struct InputClass {
    /// `path` or `jar!entry`, used in error messages.
    pub(crate) origin: String,
    pub(crate) bytes: Vec<u8>,
}

/// Classes and artifacts discovered under the inputs.
pub(crate) struct ScanOutput {
    pub(crate) artifacts: Vec<Artifact>,
    pub(crate) classes: Vec<InputClass>,
    /// Jars named by the `Class-Path` manifest attribute of input jars.
    pub(crate) manifest_classpath: Vec<PathBuf>,
}

pub(crate) fn scan_inputs(inputs: &[PathBuf], telemetry: Option<&Telemetry>) -> Result<ScanOutput> {
    let mut output = ScanOutput {
        artifacts: Vec::new(),
        classes: Vec::new(),
        manifest_classpath: Vec::new(),
    };
    // Keep deterministic ordering by sorting inputs and directory listings.
    let mut inputs = inputs.to_vec();
    inputs.sort_by_key(|path| path_key(path));
    inputs.dedup();
    for input in &inputs {
        if !input.exists() {
            anyhow::bail!("input not found: {}", input.display());
        }
        scan_path(input, true, telemetry, &mut output)?;
        if is_jar_path(input) {
            output.manifest_classpath.extend(manifest_classpath(input)?);
        }
    }
    Ok(output)
}

fn scan_path(
    path: &Path,
    strict: bool,
    telemetry: Option<&Telemetry>,
    output: &mut ScanOutput,
) -> Result<()> {
    if path.is_dir() {
        return scan_dir(path, telemetry, output);
    }

    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    match extension {
        "class" => scan_class_file(path, telemetry, output),
        "jar" => scan_jar_file(path, telemetry, output),
        _ => {
            if strict {
                anyhow::bail!("unsupported input file: {}", path.display())
            } else {
                Ok(())
            }
        }
    }
}

fn scan_dir(path: &Path, telemetry: Option<&Telemetry>, output: &mut ScanOutput) -> Result<()> {
    let mut entries = Vec::new();
    for entry in
        fs::read_dir(path).with_context(|| format!("failed to read directory {}", path.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
        entries.push(entry.path());
    }

    entries.sort_by_key(|entry| path_key(entry));

    for entry in entries {
        if entry.is_dir() {
            scan_dir(&entry, telemetry, output)?;
        } else if entry.extension().and_then(|ext| ext.to_str()) == Some("class") {
            scan_path(&entry, false, telemetry, output)?;
        }
    }

    Ok(())
}

fn scan_class_file(path: &Path, telemetry: Option<&Telemetry>, output: &mut ScanOutput) -> Result<()> {
    if is_module_info(&path.to_string_lossy()) {
        return Ok(());
    }
    let attributes = [KeyValue::new(
        "forbidden_apis.class_path",
        path.display().to_string(),
    )];
    let bytes = with_span(telemetry, "class.read", &attributes, || {
        fs::read(path).with_context(|| format!("failed to read {}", path.display()))
    })?;
    push_path_artifact(path, bytes.len() as u64, &mut output.artifacts)?;
    output.classes.push(InputClass {
        origin: path.display().to_string(),
        bytes,
    });
    Ok(())
}

fn scan_jar_file(path: &Path, telemetry: Option<&Telemetry>, output: &mut ScanOutput) -> Result<()> {
    let jar_attributes = [KeyValue::new(
        "forbidden_apis.jar_path",
        path.display().to_string(),
    )];
    let mut archive = with_span(telemetry, "jar.open", &jar_attributes, || {
        let file =
            fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))
    })?;

    let jar_len = fs::metadata(path)
        .with_context(|| format!("failed to read {}", path.display()))?
        .len();
    push_path_artifact(path, jar_len, &mut output.artifacts)?;

    let mut entry_names = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        // TODO: Handle multi-release entries under META-INF/versions/ in a future release.
        if name.ends_with(".class") && !is_module_info(&name) && !name.starts_with("META-INF/versions/")
        {
            entry_names.push(name);
        }
    }

    entry_names.sort();

    for name in entry_names {
        let class_attributes = [
            KeyValue::new("forbidden_apis.jar_path", path.display().to_string()),
            KeyValue::new("forbidden_apis.jar_entry", name.clone()),
        ];
        let bytes = with_span(telemetry, "class.read", &class_attributes, || -> Result<Vec<u8>> {
            let mut entry = archive
                .by_name(&name)
                .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
            Ok(data)
        })?;
        output.classes.push(InputClass {
            origin: format!("{}!{}", path.display(), name),
            bytes,
        });
    }

    Ok(())
}

fn is_module_info(name: &str) -> bool {
    name.ends_with("module-info.class")
}

fn push_path_artifact(path: &Path, len: u64, artifacts: &mut Vec<Artifact>) -> Result<()> {
    let roles: Vec<Value> = vec![
        serde_json::to_value(ArtifactRoles::AnalysisTarget)
            .context("failed to serialize artifact role")?,
    ];
    let location = ArtifactLocation::builder().uri(path_to_uri(path)).build();
    artifacts.push(
        Artifact::builder()
            .location(location)
            .length(len as i64)
            .roles(roles)
            .build(),
    );
    Ok(())
}

fn path_to_uri(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("file://{}", absolute.to_string_lossy())
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Breadth-first expansion of classpath entries through jar manifests; entries keep their order.
pub(crate) fn expand_classpath(initial: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    let mut queue: VecDeque<PathBuf> = initial.into_iter().collect();
    let mut seen = BTreeSet::new();
    let mut result = Vec::new();
    while let Some(entry) = queue.pop_front() {
        let key = path_key(&entry);
        if !seen.insert(key) {
            continue;
        }
        if !entry.exists() {
            anyhow::bail!("classpath entry not found: {}", entry.display());
        }
        result.push(entry.clone());
        if is_jar_path(&entry) {
            let mut referenced = manifest_classpath(&entry)?;
            referenced.sort_by_key(|path| path_key(path));
            queue.extend(referenced);
        }
    }

    Ok(result)
}

fn manifest_classpath(path: &Path) -> Result<Vec<PathBuf>> {
    let file =
        fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;
    let mut entry = match archive.by_name("META-INF/MANIFEST.MF") {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .with_context(|| format!("failed to read {}", entry.name()))?;
    Ok(parse_manifest_classpath(path, &content))
}

fn parse_manifest_classpath(jar_path: &Path, content: &str) -> Vec<PathBuf> {
    let mut class_path = None;
    let mut current_key = None;
    let mut current_value = String::new();

    for raw_line in content.lines() {
        let line = raw_line.trim_end_matches('\r');
        if let Some(continuation) = line.strip_prefix(' ') {
            if current_key.is_some() {
                current_value.push_str(continuation);
            }
            continue;
        }

        if let Some(key) = current_key.take() {
            if key == "Class-Path" {
                class_path = Some(current_value.clone());
            }
            current_value.clear();
        }

        if let Some((key, value)) = line.split_once(':') {
            current_key = Some(key.trim().to_string());
            current_value.push_str(value.trim_start());
        }
    }

    if let Some(key) = current_key.take() {
        if key == "Class-Path" {
            class_path = Some(current_value.clone());
        }
    }

    let Some(class_path) = class_path else {
        return Vec::new();
    };

    let base_dir = jar_path.parent().unwrap_or_else(|| Path::new(""));
    class_path
        .split_whitespace()
        .map(|entry| {
            let entry_path = PathBuf::from(entry);
            if entry_path.is_absolute() {
                entry_path
            } else {
                base_dir.join(entry_path)
            }
        })
        .collect()
}

fn is_jar_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("jar"))
        .unwrap_or(false)
}

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Settings read from a JSON configuration file.
///
/// Every field is optional; command line values are merged on top.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct FileConfig {
    pub(crate) inputs: Vec<PathBuf>,
    pub(crate) classpath: Vec<PathBuf>,
    pub(crate) bootclasspath: Vec<PathBuf>,
    pub(crate) jdk_home: Option<PathBuf>,
    pub(crate) signatures_files: Vec<PathBuf>,
    pub(crate) bundled_signatures: Vec<String>,
    pub(crate) signatures: Vec<String>,
    pub(crate) suppress_annotations: Vec<String>,
    pub(crate) target: Option<String>,
    pub(crate) fail_on_missing_classes: Option<bool>,
    pub(crate) fail_on_unresolvable_signatures: Option<bool>,
    pub(crate) ignore_signatures_of_missing_classes: Option<bool>,
    pub(crate) forbid_internal_runtime: Option<bool>,
    pub(crate) fail_on_violation: Option<bool>,
    pub(crate) disable_lookup_cache: Option<bool>,
}

/// Relative paths in the file are resolved against the file's directory.
pub(crate) fn load_config(path: &Path) -> Result<FileConfig> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut config = parse_config(&content)
        .with_context(|| format!("invalid configuration file {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    config.make_paths_absolute(base);
    Ok(config)
}

pub(crate) fn parse_config(content: &str) -> Result<FileConfig> {
    let deserializer = &mut serde_json::Deserializer::from_str(content);
    serde_path_to_error::deserialize(deserializer).map_err(|err| {
        let path = err.path().to_string();
        anyhow::anyhow!("{} at {}", err.into_inner(), path)
    })
}

impl FileConfig {
    fn make_paths_absolute(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        self.inputs.iter_mut().for_each(resolve);
        self.classpath.iter_mut().for_each(resolve);
        self.bootclasspath.iter_mut().for_each(resolve);
        self.signatures_files.iter_mut().for_each(resolve);
        self.jdk_home.iter_mut().for_each(resolve);
    }
}

/// Effective settings for one run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Settings {
    pub(crate) inputs: Vec<PathBuf>,
    pub(crate) classpath: Vec<PathBuf>,
    pub(crate) bootclasspath: Vec<PathBuf>,
    pub(crate) jdk_home: Option<PathBuf>,
    pub(crate) signatures_files: Vec<PathBuf>,
    pub(crate) bundled_signatures: Vec<String>,
    pub(crate) signatures: Vec<String>,
    pub(crate) suppress_annotations: Vec<String>,
    pub(crate) target: Option<String>,
    pub(crate) options: CheckOptions,
}

/// The switches that shape signature parsing and scanning.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct CheckOptions {
    pub(crate) fail_on_missing_classes: bool,
    pub(crate) fail_on_unresolvable_signatures: bool,
    pub(crate) ignore_signatures_of_missing_classes: bool,
    pub(crate) forbid_internal_runtime: bool,
    pub(crate) fail_on_violation: bool,
    pub(crate) disable_lookup_cache: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            fail_on_missing_classes: true,
            fail_on_unresolvable_signatures: true,
            ignore_signatures_of_missing_classes: false,
            forbid_internal_runtime: false,
            fail_on_violation: true,
            disable_lookup_cache: false,
        }
    }
}

/// Command line values, as far as they overlap with the configuration file.
#[derive(Clone, Debug, Default)]
pub(crate) struct CliSettings {
    pub(crate) inputs: Vec<PathBuf>,
    pub(crate) classpath: Vec<PathBuf>,
    pub(crate) bootclasspath: Vec<PathBuf>,
    pub(crate) jdk_home: Option<PathBuf>,
    pub(crate) signatures_files: Vec<PathBuf>,
    pub(crate) bundled_signatures: Vec<String>,
    pub(crate) signatures: Vec<String>,
    pub(crate) suppress_annotations: Vec<String>,
    pub(crate) target: Option<String>,
    pub(crate) allow_missing_classes: bool,
    pub(crate) allow_unresolvable_signatures: bool,
    pub(crate) ignore_signatures_of_missing_classes: bool,
    pub(crate) forbid_internal_runtime: bool,
    pub(crate) no_fail_on_violation: bool,
    pub(crate) disable_lookup_cache: bool,
}

/// Merge command line values over the file: lists append, scalars override,
/// and each flag only moves its setting in the direction it names.
pub(crate) fn merge(file: FileConfig, cli: CliSettings) -> Settings {
    let defaults = CheckOptions::default();
    let options = CheckOptions {
        fail_on_missing_classes: !cli.allow_missing_classes
            && file
                .fail_on_missing_classes
                .unwrap_or(defaults.fail_on_missing_classes),
        fail_on_unresolvable_signatures: !cli.allow_unresolvable_signatures
            && file
                .fail_on_unresolvable_signatures
                .unwrap_or(defaults.fail_on_unresolvable_signatures),
        ignore_signatures_of_missing_classes: cli.ignore_signatures_of_missing_classes
            || file
                .ignore_signatures_of_missing_classes
                .unwrap_or(defaults.ignore_signatures_of_missing_classes),
        forbid_internal_runtime: cli.forbid_internal_runtime
            || file
                .forbid_internal_runtime
                .unwrap_or(defaults.forbid_internal_runtime),
        fail_on_violation: !cli.no_fail_on_violation
            && file.fail_on_violation.unwrap_or(defaults.fail_on_violation),
        disable_lookup_cache: cli.disable_lookup_cache
            || file
                .disable_lookup_cache
                .unwrap_or(defaults.disable_lookup_cache),
    };
    Settings {
        inputs: append(file.inputs, cli.inputs),
        classpath: append(file.classpath, cli.classpath),
        bootclasspath: append(file.bootclasspath, cli.bootclasspath),
        jdk_home: cli.jdk_home.or(file.jdk_home),
        signatures_files: append(file.signatures_files, cli.signatures_files),
        bundled_signatures: append(file.bundled_signatures, cli.bundled_signatures),
        signatures: append(file.signatures, cli.signatures),
        suppress_annotations: append(file.suppress_annotations, cli.suppress_annotations),
        target: cli.target.or(file.target),
        options,
    }
}

fn append<T>(mut base: Vec<T>, extra: Vec<T>) -> Vec<T> {
    base.extend(extra);
    base
}

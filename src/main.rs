mod checker;
mod class_scanner;
mod classfile;
mod classpath;
mod config;
mod descriptor;
mod glob;
mod ir;
mod opcodes;
mod report;
mod scan;
mod signatures;
mod telemetry;
#[cfg(test)]
mod testutil;
mod violation;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use opentelemetry::KeyValue;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::checker::{CheckReport, Checker, CheckerError};
use crate::classpath::{ClassSource, open_source, runtime_sources};
use crate::config::{CliSettings, FileConfig, Settings, load_config, merge};
use crate::report::{InvocationStats, build_invocation, build_results, build_sarif, write_sarif};
use crate::scan::{ScanOutput, expand_classpath, scan_inputs};
use crate::signatures::bundled_names;
use crate::telemetry::{LogLevel, Telemetry, init_logging, with_span};

const EXIT_VIOLATIONS: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_UNSUPPORTED_JDK: u8 = 3;
const EXIT_FAILURE: u8 = 4;

/// CLI arguments for forbidden-apis execution.
#[derive(Parser, Debug)]
#[command(
    name = "forbidden-apis",
    about = "Detects invocations of forbidden APIs in JVM class files and JAR files.",
    version
)]
struct Cli {
    /// Class directories, JAR files or single .class files to check.
    #[arg(long, value_name = "PATH")]
    input: Vec<PathBuf>,
    /// Classpath entries used to resolve the hierarchy of checked classes.
    #[arg(long, value_name = "PATH")]
    classpath: Vec<PathBuf>,
    /// JDK installation providing the runtime classes; defaults to JAVA_HOME.
    #[arg(long, value_name = "PATH")]
    jdk_home: Option<PathBuf>,
    /// Additional runtime classpath entries.
    #[arg(long, value_name = "PATH")]
    bootclasspath: Vec<PathBuf>,
    #[arg(long, value_name = "PATH")]
    signatures_file: Vec<PathBuf>,
    #[arg(long, value_name = "NAME")]
    bundled_signatures: Vec<String>,
    /// Inline signature line, parsed like a line of a signatures file.
    #[arg(long, value_name = "SIGNATURE")]
    signature: Vec<String>,
    /// Annotation class glob that suppresses checks in the annotated scope.
    #[arg(long, value_name = "GLOB")]
    suppress_annotation: Vec<String>,
    /// Target Java version used to complete unversioned bundled signature names.
    #[arg(long, value_name = "VERSION")]
    target: Option<String>,
    #[arg(long)]
    allow_missing_classes: bool,
    #[arg(long)]
    allow_unresolvable_signatures: bool,
    #[arg(long)]
    ignore_signatures_of_missing_classes: bool,
    #[arg(long)]
    forbid_internal_runtime: bool,
    #[arg(long)]
    no_fail_on_violation: bool,
    #[arg(long)]
    disable_lookup_cache: bool,
    /// JSON configuration file; command line values are merged on top.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Write a SARIF report to PATH (`-` for stdout).
    #[arg(long, value_name = "PATH")]
    sarif: Option<PathBuf>,
    #[arg(long)]
    list_bundled_signatures: bool,
    #[arg(long, conflicts_with = "debug")]
    quiet: bool,
    #[arg(long)]
    debug: bool,
    #[arg(long)]
    timing: bool,
    /// OTLP HTTP collector endpoint for trace export.
    #[arg(long, value_name = "URL")]
    otel: Option<String>,
}

impl Cli {
    fn log_level(&self) -> LogLevel {
        if self.quiet {
            LogLevel::Quiet
        } else if self.debug {
            LogLevel::Debug
        } else {
            LogLevel::Normal
        }
    }

    fn settings(&self) -> CliSettings {
        CliSettings {
            inputs: self.input.clone(),
            classpath: self.classpath.clone(),
            bootclasspath: self.bootclasspath.clone(),
            jdk_home: self.jdk_home.clone(),
            signatures_files: self.signatures_file.clone(),
            bundled_signatures: self.bundled_signatures.clone(),
            signatures: self.signature.clone(),
            suppress_annotations: self.suppress_annotation.clone(),
            target: self.target.clone(),
            allow_missing_classes: self.allow_missing_classes,
            allow_unresolvable_signatures: self.allow_unresolvable_signatures,
            ignore_signatures_of_missing_classes: self.ignore_signatures_of_missing_classes,
            forbid_internal_runtime: self.forbid_internal_runtime,
            no_fail_on_violation: self.no_fail_on_violation,
            disable_lookup_cache: self.disable_lookup_cache,
        }
    }
}

/// Invalid command line or configuration.
#[derive(Debug, Error)]
#[error("{0}")]
struct UsageError(String);

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    init_logging(cli.log_level());
    match run(cli) {
        Ok(report) if report.failed => ExitCode::from(EXIT_VIOLATIONS),
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<UsageError>().is_some() {
        return EXIT_USAGE;
    }
    match err.downcast_ref::<CheckerError>() {
        Some(CheckerError::NoSignatures | CheckerError::InvalidTarget { .. }) => EXIT_USAGE,
        Some(CheckerError::UnsupportedJdk(_)) => EXIT_UNSUPPORTED_JDK,
        _ => EXIT_FAILURE,
    }
}

fn run(cli: Cli) -> Result<CheckReport> {
    if cli.list_bundled_signatures {
        for name in bundled_names() {
            println!("{name}");
        }
        return Ok(CheckReport::default());
    }

    let file = match &cli.config {
        Some(path) => load_config(path).map_err(|err| UsageError(format!("{err:#}")))?,
        None => FileConfig::default(),
    };
    let settings = merge(file, cli.settings());
    validate(&settings)?;

    let telemetry = cli.otel.clone().map(Telemetry::new).transpose()?;
    let result = check(&cli, &settings, telemetry.as_ref());
    if let Some(telemetry) = &telemetry {
        if let Err(err) = telemetry.shutdown() {
            warn!("{err:#}");
        }
    }
    result
}

fn validate(settings: &Settings) -> Result<()> {
    if settings.inputs.is_empty() {
        return Err(UsageError("no inputs given; use --input".to_string()).into());
    }
    for input in &settings.inputs {
        if !input.exists() {
            return Err(UsageError(format!("input not found: {}", input.display())).into());
        }
    }
    for file in &settings.signatures_files {
        if !file.is_file() {
            return Err(UsageError(format!("signatures file not found: {}", file.display())).into());
        }
    }
    Ok(())
}

fn check(cli: &Cli, settings: &Settings, telemetry: Option<&Telemetry>) -> Result<CheckReport> {
    let started_at = Instant::now();
    let keep_open = !settings.options.disable_lookup_cache;
    let jdk_home = settings
        .jdk_home
        .clone()
        .or_else(|| std::env::var_os("JAVA_HOME").map(PathBuf::from));

    let scan_started_at = Instant::now();
    let scan = scan_inputs(&settings.inputs, telemetry)?;
    let scan_duration_ms = scan_started_at.elapsed().as_millis();

    let sources = with_span(telemetry, "classpath.open", &[], || {
        class_sources(settings, jdk_home.as_deref(), &scan, keep_open)
    })?;
    let target = settings
        .target
        .clone()
        .or_else(|| jdk_home.as_deref().and_then(release_version));
    let mut checker = Checker::new(sources, settings.options, target.as_deref())?;

    // Signatures may name classes that only exist among the inputs.
    info!("Loading classes to check...");
    for class in &scan.classes {
        checker.add_class_to_check(&class.bytes, &class.origin)?;
    }
    with_span(telemetry, "signatures.parse", &[], || {
        load_signatures(&mut checker, settings)
    })?;
    for pattern in &settings.suppress_annotations {
        checker.add_suppress_annotation(pattern);
    }
    let report = with_span(
        telemetry,
        "check",
        &[KeyValue::new(
            "forbidden_apis.class_count",
            checker.class_count() as i64,
        )],
        || checker.run(telemetry),
    )?;

    if let Some(path) = &cli.sarif {
        let stats = InvocationStats {
            scanned_classes: report.scanned_classes,
            related_classes: report.related_classes,
            errors: report.errors,
            elapsed_ms: started_at.elapsed().as_millis(),
        };
        let invocation = build_invocation(&stats, !report.failed);
        let sarif = build_sarif(scan.artifacts, invocation, build_results(&report.classes));
        write_sarif(path, &sarif)?;
    }

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} scan_ms={} check_ms={} classes={} related_classes={}",
            started_at.elapsed().as_millis(),
            scan_duration_ms,
            report.elapsed.as_millis(),
            report.scanned_classes,
            report.related_classes
        );
    }

    Ok(report)
}

/// Runtime classes first, then the boot classpath, then the user classpath.
fn class_sources(
    settings: &Settings,
    jdk_home: Option<&Path>,
    scan: &ScanOutput,
    keep_open: bool,
) -> Result<Vec<Box<dyn ClassSource>>> {
    let mut sources: Vec<Box<dyn ClassSource>> = Vec::new();
    match jdk_home {
        Some(home) => match runtime_sources(home, keep_open) {
            Ok(runtime) => sources.extend(runtime),
            Err(err) => warn!("{err:#}"),
        },
        None => warn!("no JDK given (--jdk-home or JAVA_HOME); runtime classes are unavailable"),
    }
    for entry in &settings.bootclasspath {
        sources.push(open_source(entry, true, keep_open)?);
    }
    let mut classpath = settings.classpath.clone();
    classpath.extend(scan.manifest_classpath.iter().cloned());
    for entry in expand_classpath(classpath)? {
        sources.push(open_source(&entry, false, keep_open)?);
    }
    Ok(sources)
}

fn load_signatures(checker: &mut Checker, settings: &Settings) -> Result<(), CheckerError> {
    for name in &settings.bundled_signatures {
        checker.add_bundled_signatures(name)?;
    }
    for path in &settings.signatures_files {
        checker.add_signatures_file(path)?;
    }
    if !settings.signatures.is_empty() {
        checker.add_signatures_text(&settings.signatures.join("\n"))?;
    }
    Ok(())
}

/// Java version from `<jdk_home>/release`, reduced to `1.8` or `17` form.
fn release_version(jdk_home: &Path) -> Option<String> {
    let content = fs::read_to_string(jdk_home.join("release")).ok()?;
    let value = content
        .lines()
        .find_map(|line| line.strip_prefix("JAVA_VERSION="))?;
    parse_release_version(value)
}

fn parse_release_version(value: &str) -> Option<String> {
    let version = value.trim().trim_matches('"');
    let mut parts = version.split(|c: char| !c.is_ascii_digit());
    match parts.next()? {
        "" => None,
        "1" => parts
            .next()
            .filter(|minor| !minor.is_empty())
            .map(|minor| format!("1.{minor}")),
        major => Some(major.to_string()),
    }
}

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;
use serde_sarif::sarif::{
    Artifact, ArtifactLocation, Invocation, Location, LogicalLocation, Message,
    MultiformatMessageString, PhysicalLocation, PropertyBag, Region, ReportingDescriptor,
    Result as SarifResult, Run, SCHEMA_URL, Sarif, Tool, ToolComponent,
};

use crate::violation::ClassViolations;

pub(crate) const RULE_ID: &str = "FORBIDDEN_API";

/// Metadata captured for SARIF invocation properties.
pub(crate) struct InvocationStats {
    pub(crate) scanned_classes: usize,
    pub(crate) related_classes: usize,
    pub(crate) errors: usize,
    pub(crate) elapsed_ms: u128,
}

pub(crate) fn build_invocation(stats: &InvocationStats, successful: bool) -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");
    let mut properties = BTreeMap::new();
    properties.insert(
        "forbidden_apis.scanned_classes".to_string(),
        json!(stats.scanned_classes),
    );
    properties.insert(
        "forbidden_apis.related_classes".to_string(),
        json!(stats.related_classes),
    );
    properties.insert("forbidden_apis.errors".to_string(), json!(stats.errors));
    properties.insert("forbidden_apis.elapsed_ms".to_string(), json!(stats.elapsed_ms));

    Invocation::builder()
        .execution_successful(successful)
        .arguments(arguments)
        .command_line(command_line)
        .properties(PropertyBag::builder().additional_properties(properties).build())
        .build()
}

/// One SARIF result per violation, in report order.
pub(crate) fn build_results(classes: &[ClassViolations]) -> Vec<SarifResult> {
    let mut results = Vec::new();
    for class in classes {
        for violation in &class.violations {
            let message = Message::builder()
                .text(violation.format(&class.class_name, class.source_file.as_deref()))
                .build();
            let line = violation.has_line().then_some(violation.line);
            let location = class_location(&class.class_name, class.source_file.as_deref(), line);
            let mut result = SarifResult::builder()
                .message(message)
                .locations(vec![location])
                .build();
            result.rule_id = Some(RULE_ID.to_string());
            results.push(result);
        }
    }
    results
}

fn class_location(class_name: &str, source_file: Option<&str>, line: Option<i32>) -> Location {
    let logical = LogicalLocation::builder()
        .name(class_name)
        .kind("type")
        .build();
    let Some(source_file) = source_file else {
        return Location::builder().logical_locations(vec![logical]).build();
    };
    let artifact_location = ArtifactLocation::builder()
        .uri(source_uri(class_name, source_file))
        .build();
    let physical = match line {
        Some(line) => PhysicalLocation::builder()
            .artifact_location(artifact_location)
            .region(Region::builder().start_line(i64::from(line)).build())
            .build(),
        None => PhysicalLocation::builder()
            .artifact_location(artifact_location)
            .build(),
    };
    Location::builder()
        .logical_locations(vec![logical])
        .physical_location(physical)
        .build()
}

/// Source path relative to a source root: the class package plus the `SourceFile` name.
fn source_uri(class_name: &str, source_file: &str) -> String {
    match class_name.rsplit_once('.') {
        Some((package, _)) => format!("{}/{source_file}", package.replace('.', "/")),
        None => source_file.to_string(),
    }
}

fn rule_descriptor() -> ReportingDescriptor {
    ReportingDescriptor::builder()
        .id(RULE_ID)
        .name("ForbiddenApiUse")
        .short_description(
            MultiformatMessageString::builder()
                .text("Use of an API listed in the forbidden signatures")
                .build(),
        )
        .build()
}

pub(crate) fn build_sarif(
    artifacts: Vec<Artifact>,
    invocation: Invocation,
    results: Vec<SarifResult>,
) -> Sarif {
    let driver = ToolComponent::builder()
        .name("forbidden-apis")
        .version(env!("CARGO_PKG_VERSION"))
        .rules(vec![rule_descriptor()])
        .build();
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let run = if artifacts.is_empty() {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .build()
    } else {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .artifacts(artifacts)
            .build()
    };

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}

/// Write the document to `path`; `-` means stdout.
pub(crate) fn write_sarif(path: &Path, sarif: &Sarif) -> Result<()> {
    let mut writer = output_writer(path)?;
    serde_json::to_writer_pretty(&mut writer, sarif).context("failed to serialize SARIF output")?;
    writer
        .write_all(b"\n")
        .context("failed to write SARIF output")?;
    writer.flush().context("failed to write SARIF output")
}

fn output_writer(path: &Path) -> Result<Box<dyn Write>> {
    if path == Path::new("-") {
        return Ok(Box::new(io::stdout()));
    }
    Ok(Box::new(
        File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
    ))
}

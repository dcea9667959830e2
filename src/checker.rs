use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::class_scanner::{PORTABLE_RUNTIME_PACKAGES, ScanContext, ScanError, scan_class};
use crate::classfile::{ClassFile, ClassFormatError, parse_class};
use crate::classpath::{ClassResolver, ClassSignature, ClassSource, RelatedClassError};
use crate::config::CheckOptions;
use crate::descriptor::binary_name;
use crate::glob::GlobMatcher;
use crate::signatures::{
    ParseError, RegistryOptions, SignatureRegistry, UnresolvableReporting, normalize_version,
};
use crate::telemetry::{Telemetry, with_span};
use crate::violation::ClassViolations;

const OBJECT: &str = "java/lang/Object";

#[derive(Debug, Error)]
pub(crate) enum CheckerError {
    #[error(transparent)]
    Signatures(ParseError),
    #[error("invalid target version '{target}'")]
    InvalidTarget {
        target: String,
        #[source]
        source: ParseError,
    },
    #[error("check for forbidden API calls failed while scanning class '{class}' ({location})")]
    RelatedClass {
        class: String,
        location: String,
        #[source]
        source: RelatedClassError,
    },
    #[error("failed to parse class file {origin}")]
    ClassFormat {
        origin: String,
        #[source]
        source: ClassFormatError,
    },
    #[error("no API signatures given; use signature files, bundled signatures or inline signatures")]
    NoSignatures,
    #[error(
        "bundled signatures '{0}' require a supported JDK runtime; java.lang.Object was not found on the boot classpath"
    )]
    UnsupportedJdk(String),
    #[error("failed to scan class '{class}'")]
    Scan {
        class: String,
        #[source]
        source: ScanError,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ParseError> for CheckerError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::UnsupportedJdk(name) => CheckerError::UnsupportedJdk(name),
            other => CheckerError::Signatures(other),
        }
    }
}

struct CheckedClass {
    class: ClassFile,
    origin: String,
}

/// Outcome of one `Checker::run`.
#[derive(Clone, Debug, Default)]
pub(crate) struct CheckReport {
    /// Classes with at least one violation, ordered by binary name.
    pub(crate) classes: Vec<ClassViolations>,
    pub(crate) scanned_classes: usize,
    pub(crate) related_classes: usize,
    pub(crate) errors: usize,
    pub(crate) missing_classes: Vec<String>,
    pub(crate) elapsed: Duration,
    /// Violations were found and the run is configured to fail on them.
    pub(crate) failed: bool,
    /// Nothing was scanned because no signatures were available.
    pub(crate) skipped: bool,
}

/// Owns everything one check needs: class lookup, forbidden signatures and the classes to check.
pub(crate) struct Checker {
    resolver: ClassResolver,
    registry: SignatureRegistry,
    classes: BTreeMap<String, CheckedClass>,
    suppress_patterns: Vec<String>,
    portable_runtime: GlobMatcher,
    options: CheckOptions,
}

impl Checker {
    /// `sources` are searched in order; runtime sources must come first.
    pub(crate) fn new(
        sources: Vec<Box<dyn ClassSource>>,
        options: CheckOptions,
        target: Option<&str>,
    ) -> Result<Self, CheckerError> {
        let resolver = ClassResolver::new(sources, options.fail_on_missing_classes);
        let jdk_supported = resolver
            .resolve(OBJECT)
            .is_some_and(|object| object.is_runtime);
        if !jdk_supported {
            debug!("java.lang.Object is not a runtime class; bundled JDK signatures are unavailable");
        }
        let target_version = target
            .map(|target| {
                normalize_version(target).map_err(|source| CheckerError::InvalidTarget {
                    target: target.to_string(),
                    source,
                })
            })
            .transpose()?;
        let reporting = if options.fail_on_unresolvable_signatures {
            UnresolvableReporting::Fail
        } else {
            UnresolvableReporting::Warn
        };
        let mut registry = SignatureRegistry::new(RegistryOptions {
            reporting,
            ignore_missing_classes: options.ignore_signatures_of_missing_classes,
            target_version,
            jdk_supported,
        });
        registry.set_forbid_internal_runtime(options.forbid_internal_runtime);
        let portable_runtime = GlobMatcher::new(PORTABLE_RUNTIME_PACKAGES)
            .map_err(|err| anyhow::anyhow!("invalid portable runtime pattern: {err}"))?;
        Ok(Self {
            resolver,
            registry,
            classes: BTreeMap::new(),
            suppress_patterns: Vec::new(),
            portable_runtime,
            options,
        })
    }

    /// Parse a class to check and make it visible to hierarchy lookups.
    pub(crate) fn add_class_to_check(&mut self, bytes: &[u8], origin: &str) -> Result<(), CheckerError> {
        let class = parse_class(bytes).map_err(|source| CheckerError::ClassFormat {
            origin: origin.to_string(),
            source,
        })?;
        self.resolver
            .add_checked(ClassSignature::from_class(&class, false));
        let name = binary_name(&class.name);
        if let Some(previous) = self.classes.get(&name) {
            debug!("class {} from {} replaces {}", name, origin, previous.origin);
        }
        self.classes.insert(
            name,
            CheckedClass {
                class,
                origin: origin.to_string(),
            },
        );
        Ok(())
    }

    pub(crate) fn add_signatures_text(&mut self, text: &str) -> Result<(), CheckerError> {
        Ok(self.registry.add_signatures_text(text, &self.resolver)?)
    }

    pub(crate) fn add_signatures_file(&mut self, path: &Path) -> Result<(), CheckerError> {
        Ok(self.registry.add_signatures_file(path, &self.resolver)?)
    }

    pub(crate) fn add_bundled_signatures(&mut self, name: &str) -> Result<(), CheckerError> {
        Ok(self.registry.add_bundled_signatures(name, &self.resolver)?)
    }

    pub(crate) fn add_suppress_annotation(&mut self, pattern: &str) {
        self.suppress_patterns.push(pattern.to_string());
    }

    pub(crate) fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Scan every class added so far.
    ///
    /// Repeated runs reuse the lookup cache and produce the same report.
    pub(crate) fn run(&self, telemetry: Option<&Telemetry>) -> Result<CheckReport, CheckerError> {
        let started_at = Instant::now();
        if self.registry.has_no_signatures() {
            if self.options.fail_on_unresolvable_signatures {
                return Err(CheckerError::NoSignatures);
            }
            info!("Skipping execution because no API signatures are available.");
            return Ok(CheckReport {
                skipped: true,
                ..CheckReport::default()
            });
        }

        let counts = self.registry.counts();
        debug!(
            "signatures: {} class(es), {} class pattern(s), {} method(s), {} field(s)",
            counts.classes, counts.class_patterns, counts.methods, counts.fields
        );
        let suppress_annotations = GlobMatcher::new(&self.suppress_patterns)
            .map_err(|err| anyhow::anyhow!("invalid suppression annotation pattern: {err}"))?;
        let context = ScanContext {
            resolver: &self.resolver,
            registry: &self.registry,
            suppress_annotations: &suppress_annotations,
            portable_runtime: &self.portable_runtime,
        };

        info!("Scanning classes for violations...");
        let mut classes = Vec::new();
        let mut errors = 0;
        for (name, checked) in &self.classes {
            let attributes = [KeyValue::new("forbidden_apis.class", name.clone())];
            let violations = with_span(telemetry, "class.check", &attributes, || {
                scan_class(context, &checked.class)
            })
            .map_err(|err| self.scan_error(name, checked, err))?;
            for text in violations.formatted() {
                for line in text.lines() {
                    error!("{line}");
                }
            }
            errors += violations.len();
            if !violations.is_empty() {
                classes.push(violations);
            }
        }

        let elapsed = started_at.elapsed();
        let failed = self.options.fail_on_violation && errors > 0;
        let summary = format!(
            "Scanned {} class file(s) for forbidden API invocations (in {:.2}s), {} error(s).",
            self.classes.len(),
            elapsed.as_secs_f64(),
            errors
        );
        if failed {
            error!("{summary}");
        } else {
            info!("{summary}");
        }
        let related_classes = self.resolver.related_count();
        debug!("loaded {} related class(es) from the classpath", related_classes);
        let missing_classes = self.resolver.missing_classes();
        if !missing_classes.is_empty() {
            warn!(
                "{} referenced class(es) could not be loaded: {}",
                missing_classes.len(),
                missing_classes.join(", ")
            );
        }

        Ok(CheckReport {
            classes,
            scanned_classes: self.classes.len(),
            related_classes,
            errors,
            missing_classes,
            elapsed,
            failed,
            skipped: false,
        })
    }

    fn scan_error(&self, name: &str, checked: &CheckedClass, err: ScanError) -> CheckerError {
        match err {
            ScanError::RelatedClass(source) => CheckerError::RelatedClass {
                class: name.to_string(),
                location: checked
                    .class
                    .source_file
                    .clone()
                    .unwrap_or_else(|| checked.origin.clone()),
                source,
            },
            other => CheckerError::Scan {
                class: name.to_string(),
                source: other,
            },
        }
    }
}

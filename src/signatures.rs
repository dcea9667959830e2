use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};

use crate::classpath::ClassResolver;
use crate::descriptor::{binary_name, internal_name, java_to_descriptor};
use crate::glob::{GlobMatcher, is_glob};
use crate::ir::MethodSig;

include!(concat!(env!("OUT_DIR"), "/bundled_signatures.rs"));

/// Bundled names that only switch on the internal runtime class check.
const INTERNAL_RUNTIME_BUNDLES: [&str; 2] = ["jdk-non-portable", "jdk-internal"];

/// Errors raised while reading signatures.
#[derive(Debug, Error)]
pub(crate) enum ParseError {
    #[error("{message} while parsing signature: {signature}")]
    Signature { message: String, signature: String },
    #[error("invalid directive in signatures: {0}")]
    InvalidDirective(String),
    #[error("invalid bundled signatures name '{0}'")]
    InvalidBundleName(String),
    #[error("unknown bundled signatures '{0}'")]
    UnknownBundle(String),
    #[error("invalid version '{0}': expected a major version with at most one minor component")]
    InvalidVersion(String),
    #[error("bundled signatures '{0}' need a supported JDK runtime")]
    UnsupportedJdk(String),
    #[error("failed to read signatures file {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// What to do with a signature that names a class or member that cannot be found.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum UnresolvableReporting {
    Fail,
    Warn,
    Silent,
}

/// One forbidden API entry.
#[derive(Clone, Debug)]
pub(crate) enum SignatureRule {
    Class {
        class: String,
        printout: String,
    },
    Method {
        owner: String,
        method: MethodSig,
        printout: String,
    },
    Field {
        owner: String,
        field: String,
        printout: String,
    },
    ClassPattern {
        matcher: GlobMatcher,
        message: Option<String>,
    },
}

impl SignatureRule {
    /// Text shown after "Forbidden ... use: " for a hit on `binary_name`.
    pub(crate) fn printout(&self, binary_name: &str) -> String {
        match self {
            SignatureRule::Class { printout, .. }
            | SignatureRule::Method { printout, .. }
            | SignatureRule::Field { printout, .. } => printout.clone(),
            SignatureRule::ClassPattern { message, .. } => with_message(binary_name, message.as_deref()),
        }
    }
}

fn with_message(signature: &str, message: Option<&str>) -> String {
    match message {
        Some(message) => format!("{signature} [{message}]"),
        None => signature.to_string(),
    }
}

#[derive(Clone, Debug)]
pub(crate) struct RegistryOptions {
    pub(crate) reporting: UnresolvableReporting,
    pub(crate) ignore_missing_classes: bool,
    /// Normalized target version used to complete unversioned `jdk-*` bundle names.
    pub(crate) target_version: Option<String>,
    pub(crate) jdk_supported: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            reporting: UnresolvableReporting::Fail,
            ignore_missing_classes: false,
            target_version: None,
            jdk_supported: true,
        }
    }
}

/// Rule counts per table.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct RuleCounts {
    pub(crate) classes: usize,
    pub(crate) class_patterns: usize,
    pub(crate) methods: usize,
    pub(crate) fields: usize,
}

/// Forbidden signatures resolved against the classpath.
pub(crate) struct SignatureRegistry {
    options: RegistryOptions,
    classes: HashMap<String, SignatureRule>,
    class_patterns: Vec<SignatureRule>,
    methods: HashMap<(String, MethodSig), SignatureRule>,
    fields: HashMap<(String, String), SignatureRule>,
    forbid_internal_runtime: bool,
    bundled: BTreeSet<String>,
}

/// Per-file parse state changed by directives.
struct FileState {
    default_message: Option<String>,
    reporting: UnresolvableReporting,
    ignore_missing_classes: bool,
}

impl SignatureRegistry {
    pub(crate) fn new(options: RegistryOptions) -> Self {
        Self {
            options,
            classes: HashMap::new(),
            class_patterns: Vec::new(),
            methods: HashMap::new(),
            fields: HashMap::new(),
            forbid_internal_runtime: false,
            bundled: BTreeSet::new(),
        }
    }

    pub(crate) fn set_forbid_internal_runtime(&mut self, forbid: bool) {
        self.forbid_internal_runtime |= forbid;
    }

    pub(crate) fn forbid_internal_runtime(&self) -> bool {
        self.forbid_internal_runtime
    }

    pub(crate) fn has_no_signatures(&self) -> bool {
        self.classes.is_empty()
            && self.class_patterns.is_empty()
            && self.methods.is_empty()
            && self.fields.is_empty()
            && !self.forbid_internal_runtime
    }

    pub(crate) fn counts(&self) -> RuleCounts {
        RuleCounts {
            classes: self.classes.len(),
            class_patterns: self.class_patterns.len(),
            methods: self.methods.len(),
            fields: self.fields.len(),
        }
    }

    pub(crate) fn add_signatures_file(
        &mut self,
        path: &Path,
        resolver: &ClassResolver,
    ) -> Result<(), ParseError> {
        let text = fs::read_to_string(path).map_err(|source| ParseError::Io {
            path: path.display().to_string(),
            source,
        })?;
        info!("Reading API signatures: {}", path.display());
        self.add_signatures_text(&text, resolver)
    }

    /// Parse signature text: rules, comments and directives.
    pub(crate) fn add_signatures_text(
        &mut self,
        text: &str,
        resolver: &ClassResolver,
    ) -> Result<(), ParseError> {
        let mut state = FileState {
            default_message: None,
            reporting: self.options.reporting,
            ignore_missing_classes: self.options.ignore_missing_classes,
        };
        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('@') {
                let (directive, argument) = match line.split_once(char::is_whitespace) {
                    Some((directive, argument)) => (directive, argument.trim()),
                    None => (line, ""),
                };
                match directive {
                    "@includeBundled" => self.add_bundled_signatures(argument, resolver)?,
                    "@defaultMessage" => {
                        state.default_message =
                            Some(argument.to_string()).filter(|message| !message.is_empty());
                    }
                    "@ignoreUnresolvable" => state.reporting = UnresolvableReporting::Silent,
                    "@ignoreMissingClasses" => state.ignore_missing_classes = true,
                    _ => return Err(ParseError::InvalidDirective(line.to_string())),
                }
                continue;
            }
            self.add_signature(line, &state, resolver)?;
        }
        Ok(())
    }

    pub(crate) fn add_bundled_signatures(
        &mut self,
        name: &str,
        resolver: &ClassResolver,
    ) -> Result<(), ParseError> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        {
            return Err(ParseError::InvalidBundleName(name.to_string()));
        }
        if name.starts_with("jdk-") && !self.options.jdk_supported {
            return Err(ParseError::UnsupportedJdk(name.to_string()));
        }
        if INTERNAL_RUNTIME_BUNDLES.contains(&name) {
            self.forbid_internal_runtime = true;
            return Ok(());
        }
        let mut name = fix_target_version(name)?;
        if bundled_text(&name).is_none() && name.starts_with("jdk-") {
            if let Some(target) = &self.options.target_version {
                name = format!("{name}-{target}");
            }
        }
        if self.bundled.contains(&name) {
            return Ok(());
        }
        let text = bundled_text(&name).ok_or_else(|| ParseError::UnknownBundle(name.clone()))?;
        self.bundled.insert(name.clone());
        info!("Reading bundled API signatures: {}", name);
        self.add_signatures_text(text, resolver)
    }

    fn add_signature(
        &mut self,
        line: &str,
        state: &FileState,
        resolver: &ClassResolver,
    ) -> Result<(), ParseError> {
        let (signature, message) = match line.split_once('@') {
            Some((signature, message)) => (
                signature.trim(),
                Some(message.trim())
                    .filter(|message| !message.is_empty())
                    .or(state.default_message.as_deref()),
            ),
            None => (line.trim(), state.default_message.as_deref()),
        };
        if signature.is_empty() {
            return Err(signature_error("Empty signature", line));
        }
        let printout = with_message(signature, message);

        let (class, member) = match signature.split_once('#') {
            Some((class, member)) => (class.trim(), Some(member.trim())),
            None => (signature, None),
        };
        if is_glob(class) {
            if member.is_some() {
                return Err(signature_error(
                    "Class level glob pattern cannot be combined with methods/fields",
                    signature,
                ));
            }
            let matcher = GlobMatcher::new([class])
                .map_err(|_| signature_error("Invalid class pattern", signature))?;
            self.add_rule(SignatureRule::ClassPattern {
                matcher,
                message: message.map(str::to_string),
            });
            return Ok(());
        }

        let method = match member {
            Some(member) if member.contains('(') => Some(parse_method(member, signature)?),
            _ => None,
        };

        let owner = internal_name(class);
        let Some(resolved) = resolver.resolve(&owner) else {
            if state.ignore_missing_classes {
                return Ok(());
            }
            return report_unresolvable(
                state.reporting,
                &format!("Class '{class}' not found on classpath"),
                signature,
            );
        };

        let rule = match (member, method) {
            (_, Some(method)) => {
                if !resolved.declares_method(&method) {
                    return report_unresolvable(
                        state.reporting,
                        &format!("Method not found: {}", method.name),
                        signature,
                    );
                }
                SignatureRule::Method {
                    owner,
                    method,
                    printout,
                }
            }
            (Some(field), None) => {
                if !resolved.declares_field(field) {
                    return report_unresolvable(
                        state.reporting,
                        &format!("Field not found: {field}"),
                        signature,
                    );
                }
                SignatureRule::Field {
                    owner,
                    field: field.to_string(),
                    printout,
                }
            }
            (None, None) => SignatureRule::Class {
                class: owner,
                printout,
            },
        };
        self.add_rule(rule);
        Ok(())
    }

    fn add_rule(&mut self, rule: SignatureRule) {
        match &rule {
            SignatureRule::Class { class, .. } => {
                self.classes.insert(class.clone(), rule);
            }
            SignatureRule::Method { owner, method, .. } => {
                self.methods.insert((owner.clone(), method.clone()), rule);
            }
            SignatureRule::Field { owner, field, .. } => {
                self.fields.insert((owner.clone(), field.clone()), rule);
            }
            SignatureRule::ClassPattern { .. } => self.class_patterns.push(rule),
        }
    }

    /// Exact class rules first, then patterns against the binary name.
    pub(crate) fn class_rule(&self, internal_name: &str) -> Option<&SignatureRule> {
        if let Some(rule) = self.classes.get(internal_name) {
            return Some(rule);
        }
        if self.class_patterns.is_empty() {
            return None;
        }
        let binary = binary_name(internal_name);
        self.class_patterns.iter().find(|rule| match rule {
            SignatureRule::ClassPattern { matcher, .. } => matcher.is_match(&binary),
            _ => false,
        })
    }

    pub(crate) fn method_rule(&self, owner: &str, method: &MethodSig) -> Option<&SignatureRule> {
        self.methods.get(&(owner.to_string(), method.clone()))
    }

    pub(crate) fn field_rule(&self, owner: &str, field: &str) -> Option<&SignatureRule> {
        self.fields.get(&(owner.to_string(), field.to_string()))
    }
}

fn signature_error(message: &str, signature: &str) -> ParseError {
    ParseError::Signature {
        message: message.to_string(),
        signature: signature.to_string(),
    }
}

fn report_unresolvable(
    reporting: UnresolvableReporting,
    message: &str,
    signature: &str,
) -> Result<(), ParseError> {
    match reporting {
        UnresolvableReporting::Fail => Err(signature_error(message, signature)),
        UnresolvableReporting::Warn => {
            warn!(
                "{} while parsing signature: {} [signature ignored]",
                message, signature
            );
            Ok(())
        }
        UnresolvableReporting::Silent => Ok(()),
    }
}

/// Parse `name(type, type[])` into a method key with an erased parameter descriptor.
fn parse_method(member: &str, signature: &str) -> Result<MethodSig, ParseError> {
    let Some((name, rest)) = member.split_once('(') else {
        return Err(signature_error("Invalid method signature", signature));
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(signature_error(
            "Invalid method signature (method name missing)",
            signature,
        ));
    }
    let Some(arguments) = rest.trim_end().strip_suffix(')') else {
        return Err(signature_error(
            "Invalid method signature (missing closing parenthesis)",
            signature,
        ));
    };
    let mut params = String::from("(");
    if !arguments.trim().is_empty() {
        for argument in arguments.split(',') {
            let descriptor = java_to_descriptor(argument).ok_or_else(|| {
                signature_error(
                    &format!("Invalid method signature (parameter type '{}')", argument.trim()),
                    signature,
                )
            })?;
            params.push_str(&descriptor);
        }
    }
    params.push(')');
    Ok(MethodSig::new(name, params))
}

/// Normalize a Java version token: `7` and `1.7` become `1.7`, `9` and later stay as given.
pub(crate) fn normalize_version(version: &str) -> Result<String, ParseError> {
    let invalid = || ParseError::InvalidVersion(version.to_string());
    let mut parts = version.split('.');
    let major = parts.next().ok_or_else(invalid)?;
    let minor = parts.next();
    if parts.next().is_some() {
        return Err(invalid());
    }
    let is_number = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    if !is_number(major) || minor.is_some_and(|minor| !is_number(minor)) {
        return Err(invalid());
    }
    let major: u32 = major.parse().map_err(|_| invalid())?;
    let minor: Option<u32> = minor
        .map(|minor| minor.parse::<u32>().map_err(|_| invalid()))
        .transpose()?;
    match (major, minor) {
        (1, Some(minor)) if minor >= 9 => Ok(minor.to_string()),
        (1, Some(minor)) => Ok(format!("1.{minor}")),
        (2..=8, None) => Ok(format!("1.{major}")),
        (9.., None) => Ok(major.to_string()),
        _ => Err(invalid()),
    }
}

/// Normalize the version suffix of a `jdk-<family>-<version>` bundle name.
fn fix_target_version(name: &str) -> Result<String, ParseError> {
    let Some((prefix, version)) = name.rsplit_once('-') else {
        return Ok(name.to_string());
    };
    let versioned = prefix.starts_with("jdk-")
        && version.starts_with(|c: char| c.is_ascii_digit())
        && version.chars().all(|c| c.is_ascii_digit() || c == '.');
    if !versioned {
        return Ok(name.to_string());
    }
    Ok(format!("{prefix}-{}", normalize_version(version)?))
}

fn bundled_text(name: &str) -> Option<&'static str> {
    BUNDLED_SIGNATURES
        .iter()
        .find(|(bundled, _)| *bundled == name)
        .map(|(_, text)| *text)
}

/// Names of all bundled signature sets.
pub(crate) fn bundled_names() -> impl Iterator<Item = &'static str> {
    BUNDLED_SIGNATURES.iter().map(|(name, _)| *name)
}

use std::str::FromStr;

use anyhow::{Context, Result};
use jdescriptor::{MethodDescriptor, TypeDescriptor};

/// Class names referenced by a field or method descriptor, return type first.
///
/// Array types contribute their element class; primitives contribute nothing.
pub(crate) fn referenced_classes(descriptor: &str) -> Result<Vec<String>> {
    let method = if descriptor.starts_with('(') {
        MethodDescriptor::from_str(descriptor)
            .with_context(|| format!("parse method descriptor {descriptor}"))?
    } else {
        MethodDescriptor::from_str(&format!("({descriptor})V"))
            .with_context(|| format!("parse field descriptor {descriptor}"))?
    };
    let mut classes = Vec::new();
    if descriptor.starts_with('(') {
        push_class(&method.return_type(), &mut classes);
    }
    for param in method.parameter_types() {
        push_class(&param, &mut classes);
    }
    Ok(classes)
}

fn push_class(ty: &TypeDescriptor, classes: &mut Vec<String>) {
    match ty {
        TypeDescriptor::Object(class) => classes.push(class.to_string()),
        TypeDescriptor::Array(inner, _) => push_class(inner.as_ref(), classes),
        _ => {}
    }
}

/// The `(...)` part of a method descriptor; the return type is dropped.
pub(crate) fn param_part(descriptor: &str) -> &str {
    match descriptor.find(')') {
        Some(end) => &descriptor[..=end],
        None => descriptor,
    }
}

/// Split the parameter part of a method descriptor into field descriptors.
pub(crate) fn split_params(descriptor: &str) -> Option<Vec<&str>> {
    let inner = param_part(descriptor)
        .strip_prefix('(')?
        .strip_suffix(')')?;
    let bytes = inner.as_bytes();
    let mut params = Vec::new();
    let mut start = 0;
    let mut pos = 0;
    while pos < bytes.len() {
        match bytes[pos] {
            b'[' => {
                pos += 1;
                continue;
            }
            b'L' => {
                let end = inner[pos..].find(';')?;
                pos += end + 1;
            }
            b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' => pos += 1,
            _ => return None,
        }
        params.push(&inner[start..pos]);
        start = pos;
    }
    if start != bytes.len() {
        return None;
    }
    Some(params)
}

/// Java source spelling of a field descriptor (`[Ljava/lang/String;` -> `java.lang.String[]`).
pub(crate) fn java_type_name(descriptor: &str) -> String {
    let dims = descriptor.bytes().take_while(|b| *b == b'[').count();
    let element = &descriptor[dims..];
    let base = match element {
        "B" => "byte".to_string(),
        "C" => "char".to_string(),
        "D" => "double".to_string(),
        "F" => "float".to_string(),
        "I" => "int".to_string(),
        "J" => "long".to_string(),
        "S" => "short".to_string(),
        "Z" => "boolean".to_string(),
        "V" => "void".to_string(),
        other => binary_name(
            other
                .strip_prefix('L')
                .and_then(|name| name.strip_suffix(';'))
                .unwrap_or(other),
        ),
    };
    format!("{base}{}", "[]".repeat(dims))
}

/// Human readable method signature used in violation locations: `name(java.lang.String, int)`.
pub(crate) fn human_method(name: &str, descriptor: &str) -> String {
    let params = split_params(descriptor)
        .map(|params| {
            params
                .into_iter()
                .map(java_type_name)
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();
    format!("{name}({params})")
}

/// Convert a Java type as written in signature files into a field descriptor.
///
/// Unqualified class names are taken from `java.lang`.
pub(crate) fn java_to_descriptor(java_type: &str) -> Option<String> {
    let mut base = java_type.trim();
    let mut dims = 0;
    while let Some(stripped) = base.strip_suffix("[]") {
        base = stripped.trim_end();
        dims += 1;
    }
    if base.is_empty() || base.contains(|c: char| c.is_whitespace() || c == '[' || c == ']') {
        return None;
    }
    let element = match base {
        "byte" => "B".to_string(),
        "char" => "C".to_string(),
        "double" => "D".to_string(),
        "float" => "F".to_string(),
        "int" => "I".to_string(),
        "long" => "J".to_string(),
        "short" => "S".to_string(),
        "boolean" => "Z".to_string(),
        "void" => return None,
        class if class.contains('.') => format!("L{};", internal_name(class)),
        class => format!("Ljava/lang/{class};"),
    };
    Some(format!("{}{element}", "[".repeat(dims)))
}

/// Element type of an array descriptor, or the input when it is not an array.
pub(crate) fn strip_array(descriptor: &str) -> &str {
    descriptor.trim_start_matches('[')
}

/// Internal class name for an object descriptor (`Ljava/lang/String;`), if it is one.
pub(crate) fn object_class(descriptor: &str) -> Option<&str> {
    descriptor.strip_prefix('L')?.strip_suffix(';')
}

pub(crate) fn binary_name(internal: &str) -> String {
    internal.replace('/', ".")
}

pub(crate) fn internal_name(binary: &str) -> String {
    binary.replace('.', "/")
}

use crate::ir::MethodSig;

/// One forbidden API use found while scanning a class.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ForbiddenViolation {
    /// Declaration the violation is reported under: 0 for the class, then one per member.
    pub(crate) group_id: usize,
    /// Method whose body produced the violation, used to re-attribute lambda bodies.
    pub(crate) target: Option<MethodSig>,
    pub(crate) description: String,
    pub(crate) location: String,
    /// Source line, or -1 when unknown.
    pub(crate) line: i32,
}

impl ForbiddenViolation {
    pub(crate) fn new(
        group_id: usize,
        target: Option<MethodSig>,
        description: impl Into<String>,
        location: impl Into<String>,
        line: i32,
    ) -> Self {
        Self {
            group_id,
            target,
            description: description.into(),
            location: location.into(),
            line,
        }
    }

    pub(crate) fn sort_key(&self) -> (usize, i32) {
        (self.group_id, self.line)
    }

    pub(crate) fn has_line(&self) -> bool {
        self.line >= 0
    }

    /// Render as reported: the description, then where it was found.
    pub(crate) fn format(&self, class_name: &str, source_file: Option<&str>) -> String {
        let position = match source_file {
            Some(source) if self.has_line() => format!("{source}:{}", self.line),
            Some(source) => format!("{source}, {}", self.location),
            None => self.location.clone(),
        };
        format!("{}\n  in {class_name} ({position})", self.description)
    }
}

/// Finalized violations of one scanned class, sorted by group and line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ClassViolations {
    /// Binary name of the scanned class.
    pub(crate) class_name: String,
    pub(crate) source_file: Option<String>,
    pub(crate) violations: Vec<ForbiddenViolation>,
}

impl ClassViolations {
    pub(crate) fn formatted(&self) -> impl Iterator<Item = String> + '_ {
        self.violations
            .iter()
            .map(|violation| violation.format(&self.class_name, self.source_file.as_deref()))
    }

    pub(crate) fn len(&self) -> usize {
        self.violations.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }
}

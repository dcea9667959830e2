use std::collections::{BTreeSet, HashMap, HashSet};
use std::rc::Rc;

use thiserror::Error;
use tracing::debug;

use crate::classfile::{ACC_SYNTHETIC, ClassFile};
use crate::classpath::{ClassResolver, ClassSignature, RelatedClassError};
use crate::descriptor::{binary_name, human_method, object_class, referenced_classes, strip_array};
use crate::glob::GlobMatcher;
use crate::ir::{AnnotationKind, Constant, Handle, Instruction, MethodSig, Record};
use crate::signatures::SignatureRegistry;
use crate::violation::{ClassViolations, ForbiddenViolation};

const DEPRECATED: &str = "java/lang/Deprecated";
const OBJECT: &str = "java/lang/Object";
const CLASS_INIT: &str = "<clinit>";
const CONSTRUCTOR: &str = "<init>";
const LAMBDA_PREFIX: &str = "lambda$";

/// Runtime packages that are part of the public platform API.
pub(crate) const PORTABLE_RUNTIME_PACKAGES: [&str; 6] = [
    "java.**",
    "javax.**",
    "org.ietf.jgss.**",
    "org.omg.**",
    "org.w3c.dom.**",
    "org.xml.sax.**",
];

#[derive(Debug, Error)]
pub(crate) enum ScanError {
    #[error(transparent)]
    RelatedClass(#[from] RelatedClassError),
    #[error("invalid descriptor '{0}'")]
    InvalidDescriptor(String),
    #[error("unexpected {record} record while {state}")]
    OutOfOrder {
        record: &'static str,
        state: &'static str,
    },
}

/// Shared, read-only inputs of a scan.
#[derive(Clone, Copy)]
pub(crate) struct ScanContext<'a> {
    pub(crate) resolver: &'a ClassResolver,
    pub(crate) registry: &'a SignatureRegistry,
    pub(crate) suppress_annotations: &'a GlobMatcher,
    pub(crate) portable_runtime: &'a GlobMatcher,
}

/// Scan a parsed class end to end.
pub(crate) fn scan_class(context: ScanContext<'_>, class: &ClassFile) -> Result<ClassViolations, ScanError> {
    let mut scanner = ClassScanner::new(context);
    for record in class.records() {
        scanner.visit(record)?;
    }
    scanner.finish()
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ScanState {
    NotStarted,
    Declaration,
    Members,
    Finalized,
}

impl ScanState {
    fn describe(self) -> &'static str {
        match self {
            ScanState::NotStarted => "expecting the class declaration",
            ScanState::Declaration => "visiting the class declaration",
            ScanState::Members => "visiting members",
            ScanState::Finalized => "already finalized",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum MemberKind {
    Field,
    Method,
}

/// The field or method whose records are being visited.
struct CurrentMember {
    kind: MemberKind,
    /// Quoted member name used in locations: `'out'` or `'println(java.lang.String)'`.
    display: String,
    signature: Option<MethodSig>,
    deprecated: bool,
    line: i32,
}

/// Outcome of one step of a member walk up the hierarchy.
enum Walk {
    Found(String),
    Stop,
    Continue,
}

/// Record-driven scanner for one class.
pub(crate) struct ClassScanner<'a> {
    context: ScanContext<'a>,
    state: ScanState,
    class_name: String,
    source_file: Option<String>,
    class_deprecated: bool,
    class_suppressed: bool,
    group_id: usize,
    member: Option<CurrentMember>,
    suppressed_groups: BTreeSet<usize>,
    lambdas: HashMap<MethodSig, usize>,
    violations: Vec<ForbiddenViolation>,
}

impl<'a> ClassScanner<'a> {
    pub(crate) fn new(context: ScanContext<'a>) -> Self {
        Self {
            context,
            state: ScanState::NotStarted,
            class_name: String::new(),
            source_file: None,
            class_deprecated: false,
            class_suppressed: false,
            group_id: 0,
            member: None,
            suppressed_groups: BTreeSet::new(),
            lambdas: HashMap::new(),
            violations: Vec::new(),
        }
    }

    pub(crate) fn visit(&mut self, record: Record<'_>) -> Result<(), ScanError> {
        match record {
            Record::Class {
                name,
                super_name,
                interfaces,
                source_file,
                deprecated,
            } => {
                self.expect(ScanState::NotStarted, "class")?;
                self.visit_class(name, super_name, interfaces, source_file, deprecated)
            }
            Record::Field {
                name,
                descriptor,
                access,
                deprecated,
            } => {
                self.expect_members("field")?;
                self.visit_member(MemberKind::Field, name, descriptor, access, deprecated)
            }
            Record::Method {
                name,
                descriptor,
                access,
                deprecated,
            } => {
                self.expect_members("method")?;
                self.visit_member(MemberKind::Method, name, descriptor, access, deprecated)
            }
            Record::Annotation { kind, descriptor } => {
                self.expect_members("annotation")?;
                self.visit_annotation(kind, descriptor)
            }
            Record::Line(line) => {
                self.expect_method_body("line")?;
                if let Some(member) = self.member.as_mut() {
                    member.line = line;
                }
                Ok(())
            }
            Record::Insn(instruction) => {
                self.expect_method_body("instruction")?;
                self.visit_instruction(instruction)
            }
            Record::End => {
                self.expect_members("end")?;
                self.state = ScanState::Finalized;
                Ok(())
            }
        }
    }

    fn expect(&self, state: ScanState, record: &'static str) -> Result<(), ScanError> {
        if self.state == state {
            return Ok(());
        }
        Err(ScanError::OutOfOrder {
            record,
            state: self.state.describe(),
        })
    }

    fn expect_members(&self, record: &'static str) -> Result<(), ScanError> {
        match self.state {
            ScanState::Declaration | ScanState::Members => Ok(()),
            state => Err(ScanError::OutOfOrder {
                record,
                state: state.describe(),
            }),
        }
    }

    fn expect_method_body(&self, record: &'static str) -> Result<(), ScanError> {
        let in_method = self.state == ScanState::Members
            && self
                .member
                .as_ref()
                .is_some_and(|member| member.kind == MemberKind::Method);
        if in_method {
            return Ok(());
        }
        Err(ScanError::OutOfOrder {
            record,
            state: self.state.describe(),
        })
    }

    /// Sort, attribute and filter the collected violations.
    pub(crate) fn finish(mut self) -> Result<ClassViolations, ScanError> {
        self.expect(ScanState::Finalized, "finish")?;
        for violation in &mut self.violations {
            let lambda_group = violation
                .target
                .as_ref()
                .and_then(|target| self.lambdas.get(target));
            if let Some(group_id) = lambda_group {
                violation.group_id = *group_id;
            }
        }
        if self.class_suppressed {
            self.violations.clear();
        } else {
            let suppressed = &self.suppressed_groups;
            self.violations
                .retain(|violation| !suppressed.contains(&violation.group_id));
        }
        self.violations.sort_by_key(ForbiddenViolation::sort_key);
        Ok(ClassViolations {
            class_name: binary_name(&self.class_name),
            source_file: self.source_file,
            violations: self.violations,
        })
    }

    fn visit_class(
        &mut self,
        name: &str,
        super_name: Option<&str>,
        interfaces: &[String],
        source_file: Option<&str>,
        deprecated: bool,
    ) -> Result<(), ScanError> {
        self.state = ScanState::Declaration;
        self.class_name = name.to_string();
        self.source_file = source_file.map(str::to_string);
        self.class_deprecated = deprecated;

        let mut visited = HashSet::from([name.to_string()]);
        if let Some(message) = self.check_ancestors(super_name, interfaces, &mut visited)? {
            self.report(message, "class declaration".to_string(), -1);
        }
        if deprecated {
            self.report_deprecation("deprecation on class declaration".to_string())?;
        }
        Ok(())
    }

    fn visit_member(
        &mut self,
        kind: MemberKind,
        name: &str,
        descriptor: &str,
        access: u16,
        deprecated: bool,
    ) -> Result<(), ScanError> {
        self.state = ScanState::Members;
        self.group_id += 1;
        let (display, signature) = match kind {
            MemberKind::Field => (format!("'{name}'"), None),
            MemberKind::Method => (
                format!("'{}'", human_method(name, descriptor)),
                Some(MethodSig::from_descriptor(name, descriptor)),
            ),
        };
        self.member = Some(CurrentMember {
            kind,
            display,
            signature,
            deprecated,
            line: -1,
        });
        if self.class_suppressed {
            return Ok(());
        }

        if access & ACC_SYNTHETIC == 0 {
            if let Some(message) = self.check_descriptor(descriptor)? {
                let location = self.declaration_location("declaration");
                self.report(message, location, -1);
            }
        }
        if deprecated {
            let location = self.declaration_location("deprecation on");
            self.report_deprecation(location)?;
        }
        Ok(())
    }

    /// `java.lang.Deprecated` from the attribute goes through the type check and suppression.
    fn report_deprecation(&mut self, location: String) -> Result<(), ScanError> {
        if let Some(message) = self.check_type(DEPRECATED)? {
            self.report(message, location, -1);
        }
        self.suppress_if_matches(DEPRECATED);
        Ok(())
    }

    fn visit_annotation(&mut self, kind: AnnotationKind, descriptor: &str) -> Result<(), ScanError> {
        if self.class_suppressed {
            return Ok(());
        }
        let Some(class) = object_class(descriptor) else {
            return Err(ScanError::InvalidDescriptor(descriptor.to_string()));
        };
        let scope_deprecated = match &self.member {
            Some(member) => member.deprecated,
            None => self.class_deprecated,
        };
        if kind == AnnotationKind::Declaration && class == DEPRECATED && scope_deprecated {
            return Ok(());
        }
        if matches!(kind, AnnotationKind::Declaration | AnnotationKind::Parameter) {
            self.suppress_if_matches(class);
        }
        if let Some(message) = self.check_class_use(class, "annotation", false) {
            let location = match kind {
                AnnotationKind::Declaration => self.declaration_location("annotation on"),
                AnnotationKind::Parameter => self.declaration_location("parameter annotation on"),
                AnnotationKind::TypeUse => self.declaration_location("type annotation on"),
                AnnotationKind::BodyTypeUse => self.body_location("type annotation in"),
            };
            let line = match kind {
                AnnotationKind::BodyTypeUse => self.current_line(),
                _ => -1,
            };
            self.report(message, location, line);
        }
        Ok(())
    }

    fn suppress_if_matches(&mut self, class: &str) {
        let matcher = self.context.suppress_annotations;
        if matcher.is_empty() || !matcher.is_match(&binary_name(class)) {
            return;
        }
        if self.member.is_some() {
            debug!(
                "suppressing violations of {} member group {}",
                binary_name(&self.class_name),
                self.group_id
            );
            self.suppressed_groups.insert(self.group_id);
        } else {
            debug!("suppressing violations of {}", binary_name(&self.class_name));
            self.class_suppressed = true;
        }
    }

    fn visit_instruction(&mut self, instruction: &Instruction) -> Result<(), ScanError> {
        if self.class_suppressed {
            return Ok(());
        }
        let message = match instruction {
            Instruction::Invoke {
                kind,
                owner,
                name,
                descriptor,
            } => self.check_method(owner, &MethodSig::from_descriptor(name, descriptor), kind.is_virtual())?,
            Instruction::FieldAccess { owner, name, .. } => self.check_field(owner, name)?,
            Instruction::NewArray(descriptor) => self.check_type_descriptor(descriptor)?,
            Instruction::Ldc(constant) => self.check_constant(constant)?,
            Instruction::InvokeDynamic {
                bootstrap,
                arguments,
            } => {
                let mut messages = Vec::new();
                messages.extend(self.check_handle(bootstrap)?);
                for argument in arguments {
                    self.record_lambda(argument);
                    messages.extend(self.check_constant(argument)?);
                }
                join_messages(messages)
            }
        };
        if let Some(message) = message {
            let location = self.body_location("method body of");
            let line = self.current_line();
            self.report(message, location, line);
        }
        Ok(())
    }

    /// A handle to a `lambda$` method of this class ties its body to the current member.
    fn record_lambda(&mut self, argument: &Constant) {
        let Constant::Handle(handle) = argument else {
            return;
        };
        if handle.kind.is_field()
            || handle.owner != self.class_name
            || !handle.name.starts_with(LAMBDA_PREFIX)
        {
            return;
        }
        self.lambdas.insert(
            MethodSig::from_descriptor(&handle.name, &handle.descriptor),
            self.group_id,
        );
    }

    fn check_constant(&self, constant: &Constant) -> Result<Option<String>, ScanError> {
        match constant {
            Constant::Type(descriptor) => self.check_type_descriptor(descriptor),
            Constant::MethodType(descriptor) => self.check_descriptor(descriptor),
            Constant::Handle(handle) => self.check_handle(handle),
            Constant::Dynamic {
                descriptor,
                bootstrap,
                arguments,
            } => {
                let mut messages = Vec::new();
                messages.extend(self.check_type_descriptor(descriptor)?);
                messages.extend(self.check_handle(bootstrap)?);
                for argument in arguments {
                    messages.extend(self.check_constant(argument)?);
                }
                Ok(join_messages(messages))
            }
            Constant::Value => Ok(None),
        }
    }

    fn check_handle(&self, handle: &Handle) -> Result<Option<String>, ScanError> {
        match handle.kind.call_kind() {
            Some(call) => self.check_method(
                &handle.owner,
                &MethodSig::from_descriptor(&handle.name, &handle.descriptor),
                call.is_virtual(),
            ),
            None => self.check_field(&handle.owner, &handle.name),
        }
    }

    /// Check an invoked method on its owner and, unless it is a constructor, up the hierarchy.
    fn check_method(
        &self,
        owner: &str,
        method: &MethodSig,
        virtual_call: bool,
    ) -> Result<Option<String>, ScanError> {
        if method.name == CLASS_INIT {
            return Ok(None);
        }
        let owner = if owner.starts_with('[') {
            if let Some(message) = self.check_type_descriptor(owner)? {
                return Ok(Some(message));
            }
            OBJECT
        } else {
            if let Some(message) = self.check_class_use(owner, "class/interface", true) {
                return Ok(Some(message));
            }
            owner
        };
        if method.name == CONSTRUCTOR {
            return Ok(self
                .context
                .registry
                .method_rule(owner, method)
                .map(|rule| format!("Forbidden method invocation: {}", rule.printout(""))));
        }
        let mut visited = HashSet::new();
        match self.walk_method(owner, method, virtual_call, &mut visited)? {
            Walk::Found(message) => Ok(Some(message)),
            Walk::Stop | Walk::Continue => Ok(None),
        }
    }

    /// Super type before interfaces; non-virtual calls stop at the declaring class.
    fn walk_method(
        &self,
        class: &str,
        method: &MethodSig,
        virtual_call: bool,
        visited: &mut HashSet<String>,
    ) -> Result<Walk, ScanError> {
        if !visited.insert(class.to_string()) {
            return Ok(Walk::Continue);
        }
        let Some(signature) = self.lookup_related(class)? else {
            return Ok(Walk::Continue);
        };
        let polymorphic = signature.polymorphic_form(method);
        let lookup = polymorphic.as_ref().unwrap_or(method);
        if let Some(rule) = self.context.registry.method_rule(class, lookup) {
            return Ok(Walk::Found(format!(
                "Forbidden method invocation: {}",
                rule.printout("")
            )));
        }
        if !virtual_call && signature.declares_method(lookup) {
            return Ok(Walk::Stop);
        }
        for ancestor in signature.ancestors() {
            match self.walk_method(ancestor, method, virtual_call, visited)? {
                Walk::Continue => {}
                done => return Ok(done),
            }
        }
        Ok(Walk::Continue)
    }

    fn check_field(&self, owner: &str, field: &str) -> Result<Option<String>, ScanError> {
        if owner.starts_with('[') {
            return self.check_type_descriptor(owner);
        }
        if let Some(message) = self.check_class_use(owner, "class/interface", true) {
            return Ok(Some(message));
        }
        let mut visited = HashSet::new();
        match self.walk_field(owner, field, &mut visited)? {
            Walk::Found(message) => Ok(Some(message)),
            Walk::Stop | Walk::Continue => Ok(None),
        }
    }

    /// Interfaces before the super type; the first declaring class hides everything above it.
    fn walk_field(
        &self,
        class: &str,
        field: &str,
        visited: &mut HashSet<String>,
    ) -> Result<Walk, ScanError> {
        if !visited.insert(class.to_string()) {
            return Ok(Walk::Continue);
        }
        let Some(signature) = self.lookup_related(class)? else {
            return Ok(Walk::Continue);
        };
        if let Some(rule) = self.context.registry.field_rule(class, field) {
            return Ok(Walk::Found(format!(
                "Forbidden field access: {}",
                rule.printout("")
            )));
        }
        if signature.declares_field(field) {
            return Ok(Walk::Stop);
        }
        let ancestors = signature
            .interfaces
            .iter()
            .map(String::as_str)
            .chain(signature.super_name.as_deref());
        for ancestor in ancestors {
            match self.walk_field(ancestor, field, visited)? {
                Walk::Continue => {}
                done => return Ok(done),
            }
        }
        Ok(Walk::Continue)
    }

    /// Every class named by a field or method descriptor, return type first.
    fn check_descriptor(&self, descriptor: &str) -> Result<Option<String>, ScanError> {
        let classes = referenced_classes(descriptor)
            .map_err(|_| ScanError::InvalidDescriptor(descriptor.to_string()))?;
        let mut messages = Vec::new();
        for class in classes {
            messages.extend(self.check_type(&class)?);
        }
        Ok(join_messages(messages))
    }

    fn check_type_descriptor(&self, descriptor: &str) -> Result<Option<String>, ScanError> {
        match object_class(strip_array(descriptor)) {
            Some(class) => self.check_type(class),
            None => Ok(None),
        }
    }

    /// A referenced type: the class itself, then everything it extends or implements.
    fn check_type(&self, class: &str) -> Result<Option<String>, ScanError> {
        if let Some(message) = self.check_class_use(class, "class/interface", true) {
            return Ok(Some(message));
        }
        let Some(signature) = self.lookup_related(class)? else {
            return Ok(None);
        };
        let mut visited = HashSet::from([class.to_string()]);
        self.check_ancestors(
            signature.super_name.as_deref(),
            &signature.interfaces,
            &mut visited,
        )
    }

    fn check_ancestors(
        &self,
        super_name: Option<&str>,
        interfaces: &[String],
        visited: &mut HashSet<String>,
    ) -> Result<Option<String>, ScanError> {
        let ancestors = super_name
            .map(|name| (name, "class"))
            .into_iter()
            .chain(interfaces.iter().map(|name| (name.as_str(), "interface")));
        for (ancestor, what) in ancestors {
            if !visited.insert(ancestor.to_string()) {
                continue;
            }
            if let Some(message) = self.check_class_use(ancestor, what, true) {
                return Ok(Some(message));
            }
            let Some(signature) = self.lookup_related(ancestor)? else {
                continue;
            };
            if let Some(message) = self.check_ancestors(
                signature.super_name.as_deref(),
                &signature.interfaces,
                visited,
            )? {
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    /// Class rules, then the internal runtime check when it is enabled.
    fn check_class_use(&self, class: &str, what: &str, check_runtime: bool) -> Option<String> {
        let binary = binary_name(class);
        if let Some(rule) = self.context.registry.class_rule(class) {
            return Some(format!("Forbidden {what} use: {}", rule.printout(&binary)));
        }
        if !check_runtime || !self.context.registry.forbid_internal_runtime() {
            return None;
        }
        let signature = self.context.resolver.resolve(class)?;
        if signature.is_runtime && !self.context.portable_runtime.is_match(&binary) {
            return Some(format!(
                "Forbidden {what} use: {binary} [non-portable or internal runtime class]"
            ));
        }
        None
    }

    fn lookup_related(&self, class: &str) -> Result<Option<Rc<ClassSignature>>, ScanError> {
        Ok(self.context.resolver.lookup_related(class, &self.class_name)?)
    }

    fn current_line(&self) -> i32 {
        self.member.as_ref().map_or(-1, |member| member.line)
    }

    fn declaration_location(&self, prefix: &str) -> String {
        match &self.member {
            None if prefix == "declaration" => "class declaration".to_string(),
            None => format!("{prefix} class declaration"),
            Some(member) => {
                let kind = match member.kind {
                    MemberKind::Field => "field",
                    MemberKind::Method => "method",
                };
                if prefix == "declaration" {
                    format!("{kind} declaration of {}", member.display)
                } else {
                    format!("{prefix} {kind} declaration of {}", member.display)
                }
            }
        }
    }

    fn body_location(&self, prefix: &str) -> String {
        let display = self
            .member
            .as_ref()
            .map(|member| member.display.as_str())
            .unwrap_or_default();
        format!("{prefix} {display}")
    }

    fn report(&mut self, message: String, location: String, line: i32) {
        let target = self
            .member
            .as_ref()
            .and_then(|member| member.signature.clone());
        self.violations.push(ForbiddenViolation::new(
            self.group_id,
            target,
            message,
            location,
            line,
        ));
    }
}

fn join_messages(messages: Vec<String>) -> Option<String> {
    if messages.is_empty() {
        None
    } else {
        Some(messages.join("\n"))
    }
}

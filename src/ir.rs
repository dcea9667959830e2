use std::fmt;

use crate::descriptor::param_part;

/// Method identity used for matching: name plus erased parameter descriptor.
///
/// The return type is not part of the key, so covariant overrides collapse into one entry.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub(crate) struct MethodSig {
    pub(crate) name: String,
    pub(crate) params: String,
}

impl MethodSig {
    pub(crate) fn new(name: impl Into<String>, params: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: params.into(),
        }
    }

    pub(crate) fn from_descriptor(name: &str, descriptor: &str) -> Self {
        Self::new(name, param_part(descriptor))
    }
}

impl fmt::Display for MethodSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.params)
    }
}

/// Structural records of one class file, in traversal order.
#[derive(Clone, Debug)]
pub(crate) enum Record<'a> {
    Class {
        name: &'a str,
        super_name: Option<&'a str>,
        interfaces: &'a [String],
        source_file: Option<&'a str>,
        deprecated: bool,
    },
    Field {
        name: &'a str,
        descriptor: &'a str,
        access: u16,
        deprecated: bool,
    },
    Method {
        name: &'a str,
        descriptor: &'a str,
        access: u16,
        deprecated: bool,
    },
    Annotation {
        kind: AnnotationKind,
        descriptor: &'a str,
    },
    Line(i32),
    Insn(&'a Instruction),
    End,
}

/// Where an annotation was attached.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum AnnotationKind {
    Declaration,
    Parameter,
    TypeUse,
    BodyTypeUse,
}

/// Bytecode instruction that references a symbol.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Instruction {
    Invoke {
        kind: CallKind,
        owner: String,
        name: String,
        descriptor: String,
    },
    FieldAccess {
        owner: String,
        name: String,
        descriptor: String,
    },
    /// `anewarray`/`multianewarray`; the operand as a field descriptor.
    NewArray(String),
    Ldc(Constant),
    InvokeDynamic {
        bootstrap: Handle,
        arguments: Vec<Constant>,
    },
}

/// Call opcode classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum CallKind {
    Virtual,
    Interface,
    Special,
    Static,
}

impl CallKind {
    pub(crate) fn is_virtual(self) -> bool {
        matches!(self, CallKind::Virtual | CallKind::Interface)
    }
}

/// Loadable constant that can reference a symbol.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Constant {
    /// Class literal, as a field descriptor.
    Type(String),
    MethodType(String),
    Handle(Handle),
    Dynamic {
        descriptor: String,
        bootstrap: Handle,
        arguments: Vec<Constant>,
    },
    /// Numbers and strings.
    Value,
}

/// `CONSTANT_MethodHandle` reference.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Handle {
    pub(crate) kind: HandleKind,
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum HandleKind {
    GetField,
    GetStatic,
    PutField,
    PutStatic,
    InvokeVirtual,
    InvokeStatic,
    InvokeSpecial,
    NewInvokeSpecial,
    InvokeInterface,
}

impl HandleKind {
    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        let kind = match tag {
            1 => HandleKind::GetField,
            2 => HandleKind::GetStatic,
            3 => HandleKind::PutField,
            4 => HandleKind::PutStatic,
            5 => HandleKind::InvokeVirtual,
            6 => HandleKind::InvokeStatic,
            7 => HandleKind::InvokeSpecial,
            8 => HandleKind::NewInvokeSpecial,
            9 => HandleKind::InvokeInterface,
            _ => return None,
        };
        Some(kind)
    }

    pub(crate) fn is_field(self) -> bool {
        matches!(
            self,
            HandleKind::GetField | HandleKind::GetStatic | HandleKind::PutField | HandleKind::PutStatic
        )
    }

    /// The invocation a method handle stands for; `None` for field handles.
    pub(crate) fn call_kind(self) -> Option<CallKind> {
        match self {
            HandleKind::InvokeVirtual => Some(CallKind::Virtual),
            HandleKind::InvokeInterface => Some(CallKind::Interface),
            HandleKind::InvokeSpecial | HandleKind::NewInvokeSpecial => Some(CallKind::Special),
            HandleKind::InvokeStatic => Some(CallKind::Static),
            _ => None,
        }
    }
}

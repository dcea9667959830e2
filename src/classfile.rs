use std::collections::BTreeMap;

use jclassfile::attributes::{Annotation, Attribute};
use jclassfile::class_file;
use jclassfile::constant_pool::ConstantPool;
use thiserror::Error;
use tracing::debug;

use crate::ir::{AnnotationKind, CallKind, Constant, Handle, HandleKind, Instruction, Record};
use crate::opcodes;

pub(crate) const ACC_VARARGS: u16 = 0x0080;
pub(crate) const ACC_NATIVE: u16 = 0x0100;
pub(crate) const ACC_SYNTHETIC: u16 = 0x1000;

const MAGIC: u32 = 0xCAFE_BABE;
const MAX_NESTING: usize = 32;

/// Structural error in a class file.
#[derive(Debug, Error)]
pub(crate) enum ClassFormatError {
    #[error("{0}")]
    Parse(String),
    #[error("unexpected end of class data at offset {offset}")]
    UnexpectedEof { offset: usize },
    #[error("invalid class file magic 0x{0:08x}")]
    InvalidMagic(u32),
    #[error("unsupported constant pool tag {tag} at index {index}")]
    UnsupportedConstant { tag: u8, index: u16 },
    #[error("invalid constant pool index {index}")]
    InvalidConstantIndex { index: u16 },
    #[error("constant pool entry {index} is not a {expected}")]
    UnexpectedConstant { index: u16, expected: &'static str },
    #[error("invalid method handle kind {0}")]
    InvalidHandleKind(u8),
    #[error("invalid bootstrap method index {0}")]
    InvalidBootstrapIndex(u16),
    #[error("unsupported opcode 0x{opcode:02x} at offset {offset}")]
    UnsupportedOpcode { opcode: u8, offset: usize },
    #[error("invalid {what} at bytecode offset {offset}")]
    InvalidCode { what: &'static str, offset: usize },
    #[error("constants nested too deeply")]
    NestingTooDeep,
}

type Result<T> = std::result::Result<T, ClassFormatError>;

/// A parsed class file, reduced to what symbol checks need.
#[derive(Clone, Debug, Default)]
pub(crate) struct ClassFile {
    pub(crate) name: String,
    pub(crate) super_name: Option<String>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) source_file: Option<String>,
    pub(crate) deprecated: bool,
    pub(crate) annotations: Vec<String>,
    pub(crate) type_annotations: Vec<String>,
    pub(crate) fields: Vec<Member>,
    pub(crate) methods: Vec<Member>,
}

/// Field or method with its attributes and, for methods, decoded code.
#[derive(Clone, Debug, Default)]
pub(crate) struct Member {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) access: u16,
    pub(crate) deprecated: bool,
    pub(crate) annotations: Vec<String>,
    pub(crate) parameter_annotations: Vec<String>,
    pub(crate) type_annotations: Vec<String>,
    pub(crate) code_type_annotations: Vec<String>,
    pub(crate) code: Vec<CodeEvent>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum CodeEvent {
    Line(i32),
    Insn(Instruction),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ParseMode {
    /// Names, hierarchy and member declarations only.
    Skeleton,
    Full,
}

/// Parse everything the scanner needs, including method bodies.
pub(crate) fn parse_class(bytes: &[u8]) -> Result<ClassFile> {
    parse(bytes, ParseMode::Full)
}

/// Parse names, hierarchy and declared members; attributes are skipped.
pub(crate) fn parse_class_skeleton(bytes: &[u8]) -> Result<ClassFile> {
    parse(bytes, ParseMode::Skeleton)
}

impl ClassFile {
    /// Pull-style traversal of the class structure.
    pub(crate) fn records(&self) -> impl Iterator<Item = Record<'_>> {
        let mut records = vec![Record::Class {
            name: &self.name,
            super_name: self.super_name.as_deref(),
            interfaces: &self.interfaces,
            source_file: self.source_file.as_deref(),
            deprecated: self.deprecated,
        }];
        push_annotations(&mut records, AnnotationKind::Declaration, &self.annotations);
        push_annotations(&mut records, AnnotationKind::TypeUse, &self.type_annotations);
        for field in &self.fields {
            records.push(Record::Field {
                name: &field.name,
                descriptor: &field.descriptor,
                access: field.access,
                deprecated: field.deprecated,
            });
            push_annotations(&mut records, AnnotationKind::Declaration, &field.annotations);
            push_annotations(&mut records, AnnotationKind::TypeUse, &field.type_annotations);
        }
        for method in &self.methods {
            records.push(Record::Method {
                name: &method.name,
                descriptor: &method.descriptor,
                access: method.access,
                deprecated: method.deprecated,
            });
            push_annotations(&mut records, AnnotationKind::Declaration, &method.annotations);
            push_annotations(
                &mut records,
                AnnotationKind::Parameter,
                &method.parameter_annotations,
            );
            push_annotations(&mut records, AnnotationKind::TypeUse, &method.type_annotations);
            push_annotations(
                &mut records,
                AnnotationKind::BodyTypeUse,
                &method.code_type_annotations,
            );
            for event in &method.code {
                records.push(match event {
                    CodeEvent::Line(line) => Record::Line(*line),
                    CodeEvent::Insn(insn) => Record::Insn(insn),
                });
            }
        }
        records.push(Record::End);
        records.into_iter()
    }
}

fn push_annotations<'a>(records: &mut Vec<Record<'a>>, kind: AnnotationKind, types: &'a [String]) {
    records.extend(
        types
            .iter()
            .map(|descriptor| Record::Annotation { kind, descriptor }),
    );
}

fn parse(bytes: &[u8], mode: ParseMode) -> Result<ClassFile> {
    let class_file = match class_file::parse(bytes) {
        Ok(parsed) => parsed,
        Err(err) => {
            let message = err.to_string();
            if message.contains("unmatched attribute") {
                debug!("reading declarations only: {message}");
                return parse_declarations(bytes);
            }
            return Err(ClassFormatError::Parse(message));
        }
    };
    let mut pool = Pool::new(class_file.constant_pool());
    let mut class = ClassFile {
        name: pool.class_name(class_file.this_class())?.to_string(),
        super_name: match class_file.super_class() {
            0 => None,
            index => Some(pool.class_name(index)?.to_string()),
        },
        ..ClassFile::default()
    };
    for interface in class_file.interfaces() {
        class.interfaces.push(pool.class_name(*interface)?.to_string());
    }

    if mode == ParseMode::Full {
        for attribute in class_file.attributes() {
            match attribute {
                Attribute::SourceFile {
                    sourcefile_index, ..
                } => {
                    class.source_file = Some(pool.utf8(*sourcefile_index)?.to_string());
                }
                Attribute::Deprecated => class.deprecated = true,
                Attribute::BootstrapMethods {
                    bootstrap_methods, ..
                } => {
                    pool.bootstrap_methods = bootstrap_methods
                        .iter()
                        .map(|method| BootstrapMethod {
                            handle: method.bootstrap_method_ref(),
                            arguments: method.bootstrap_arguments().to_vec(),
                        })
                        .collect();
                }
                _ => match annotation_types(&pool, attribute)? {
                    Some((AnnotationKind::TypeUse, types)) => class.type_annotations.extend(types),
                    Some((_, types)) => class.annotations.extend(types),
                    None => {}
                },
            }
        }
    }

    for field in class_file.fields() {
        let member = Member {
            name: pool.utf8(field.name_index())?.to_string(),
            descriptor: pool.utf8(field.descriptor_index())?.to_string(),
            access: field.access_flags().bits(),
            ..Member::default()
        };
        class
            .fields
            .push(read_member_attributes(&pool, member, field.attributes(), mode)?);
    }
    for method in class_file.methods() {
        let member = Member {
            name: pool.utf8(method.name_index())?.to_string(),
            descriptor: pool.utf8(method.descriptor_index())?.to_string(),
            access: method.access_flags().bits(),
            ..Member::default()
        };
        class
            .methods
            .push(read_member_attributes(&pool, member, method.attributes(), mode)?);
    }
    Ok(class)
}

fn read_member_attributes(
    pool: &Pool<'_>,
    mut member: Member,
    attributes: &[Attribute],
    mode: ParseMode,
) -> Result<Member> {
    if mode == ParseMode::Skeleton {
        return Ok(member);
    }
    for attribute in attributes {
        match attribute {
            Attribute::Deprecated => member.deprecated = true,
            Attribute::Synthetic => member.access |= ACC_SYNTHETIC,
            Attribute::Code {
                code, attributes, ..
            } => {
                member.code = decode_body(pool, code, attributes, &mut member.code_type_annotations)?;
            }
            _ => match annotation_types(pool, attribute)? {
                Some((AnnotationKind::Parameter, types)) => member.parameter_annotations.extend(types),
                Some((AnnotationKind::TypeUse, types)) => member.type_annotations.extend(types),
                Some((_, types)) => member.annotations.extend(types),
                None => {}
            },
        }
    }
    Ok(member)
}

/// Annotation types of an annotation attribute, tagged with the kind of attribute.
///
/// Element values are not inspected.
fn annotation_types(
    pool: &Pool<'_>,
    attribute: &Attribute,
) -> Result<Option<(AnnotationKind, Vec<String>)>> {
    let (kind, annotations): (AnnotationKind, Vec<&Annotation>) = match attribute {
        Attribute::RuntimeVisibleAnnotations { annotations, .. }
        | Attribute::RuntimeInvisibleAnnotations { annotations, .. } => {
            (AnnotationKind::Declaration, annotations.iter().collect())
        }
        Attribute::RuntimeVisibleParameterAnnotations {
            parameter_annotations,
            ..
        }
        | Attribute::RuntimeInvisibleParameterAnnotations {
            parameter_annotations,
            ..
        } => (
            AnnotationKind::Parameter,
            parameter_annotations.iter().flatten().collect(),
        ),
        Attribute::RuntimeVisibleTypeAnnotations {
            type_annotations, ..
        }
        | Attribute::RuntimeInvisibleTypeAnnotations {
            type_annotations, ..
        } => (
            AnnotationKind::TypeUse,
            type_annotations
                .iter()
                .map(|annotation| annotation.annotation())
                .collect(),
        ),
        _ => return Ok(None),
    };
    let types = annotations
        .into_iter()
        .map(|annotation| pool.utf8(annotation.type_index()).map(str::to_string))
        .collect::<Result<Vec<_>>>()?;
    Ok(Some((kind, types)))
}

/// Decode a `Code` attribute: line markers, symbol-bearing instructions and type annotations.
fn decode_body(
    pool: &Pool<'_>,
    code: &[u8],
    attributes: &[Attribute],
    code_type_annotations: &mut Vec<String>,
) -> Result<Vec<CodeEvent>> {
    let mut lines = BTreeMap::new();
    for attribute in attributes {
        match attribute {
            Attribute::LineNumberTable { line_number_table } => {
                for record in line_number_table {
                    lines.insert(record.start_pc() as usize, record.line_number() as i32);
                }
            }
            _ => {
                if let Some((_, types)) = annotation_types(pool, attribute)? {
                    code_type_annotations.extend(types);
                }
            }
        }
    }
    decode_code(code, &lines, pool)
}

fn decode_code(code: &[u8], lines: &BTreeMap<usize, i32>, pool: &Pool<'_>) -> Result<Vec<CodeEvent>> {
    let mut events = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        if let Some(line) = lines.get(&offset) {
            events.push(CodeEvent::Line(*line));
        }
        let opcode = code[offset];
        let length = opcode_length(code, offset)?;
        if offset + length > code.len() {
            return Err(ClassFormatError::InvalidCode {
                what: "instruction length",
                offset,
            });
        }
        let insn = match opcode {
            opcodes::GETSTATIC..=opcodes::PUTFIELD => {
                let (owner, name, descriptor) = pool.member_ref(read_u16(code, offset + 1)?)?;
                Some(Instruction::FieldAccess {
                    owner: owner.to_string(),
                    name: name.to_string(),
                    descriptor: descriptor.to_string(),
                })
            }
            opcodes::INVOKEVIRTUAL..=opcodes::INVOKEINTERFACE => {
                let kind = match opcode {
                    opcodes::INVOKEVIRTUAL => CallKind::Virtual,
                    opcodes::INVOKESPECIAL => CallKind::Special,
                    opcodes::INVOKESTATIC => CallKind::Static,
                    _ => CallKind::Interface,
                };
                let (owner, name, descriptor) = pool.member_ref(read_u16(code, offset + 1)?)?;
                Some(Instruction::Invoke {
                    kind,
                    owner: owner.to_string(),
                    name: name.to_string(),
                    descriptor: descriptor.to_string(),
                })
            }
            opcodes::INVOKEDYNAMIC => {
                let (bootstrap, arguments) = pool.invoke_dynamic(read_u16(code, offset + 1)?)?;
                Some(Instruction::InvokeDynamic {
                    bootstrap,
                    arguments,
                })
            }
            opcodes::ANEWARRAY => {
                let element = pool.class_name(read_u16(code, offset + 1)?)?;
                Some(Instruction::NewArray(format!("[{}", class_descriptor(element))))
            }
            opcodes::MULTIANEWARRAY => {
                let array = pool.class_name(read_u16(code, offset + 1)?)?;
                Some(Instruction::NewArray(class_descriptor(array)))
            }
            opcodes::LDC => Some(Instruction::Ldc(pool.loadable(u16::from(code[offset + 1]), 0)?)),
            opcodes::LDC_W | opcodes::LDC2_W => {
                Some(Instruction::Ldc(pool.loadable(read_u16(code, offset + 1)?, 0)?))
            }
            _ => None,
        };
        if let Some(insn) = insn {
            events.push(CodeEvent::Insn(insn));
        }
        offset += length;
    }
    Ok(events)
}

/// Field descriptor for a `CONSTANT_Class` name, which may already be an array descriptor.
fn class_descriptor(name: &str) -> String {
    if name.starts_with('[') {
        name.to_string()
    } else {
        format!("L{name};")
    }
}

pub(crate) fn opcode_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code[offset];
    let length = match opcode {
        0x00..=0x0f => 1,
        0x10 => 2,
        0x11 => 3,
        opcodes::LDC => 2,
        opcodes::LDC_W | opcodes::LDC2_W => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x83 => 1,
        opcodes::IINC => 3,
        0x85..=0x98 => 1,
        0x99..=0xa6 => 3,
        opcodes::GOTO | opcodes::JSR => 3,
        opcodes::RET => 2,
        opcodes::TABLESWITCH => tableswitch_length(code, offset)?,
        opcodes::LOOKUPSWITCH => lookupswitch_length(code, offset)?,
        0xac..=0xb1 => 1,
        opcodes::GETSTATIC..=opcodes::PUTFIELD => 3,
        opcodes::INVOKEVIRTUAL | opcodes::INVOKESPECIAL | opcodes::INVOKESTATIC => 3,
        opcodes::INVOKEINTERFACE | opcodes::INVOKEDYNAMIC => 5,
        opcodes::NEW => 3,
        opcodes::NEWARRAY => 2,
        opcodes::ANEWARRAY => 3,
        0xbe | 0xbf => 1,
        opcodes::CHECKCAST | opcodes::INSTANCEOF => 3,
        0xc2 | 0xc3 => 1,
        opcodes::WIDE => wide_length(code, offset)?,
        opcodes::MULTIANEWARRAY => 4,
        0xc6 | 0xc7 => 3,
        opcodes::GOTO_W | opcodes::JSR_W => 5,
        0xca | 0xfe | 0xff => 1,
        _ => return Err(ClassFormatError::UnsupportedOpcode { opcode, offset }),
    };
    Ok(length)
}

fn tableswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let low = read_i32(code, base + 4)?;
    let high = read_i32(code, base + 8)?;
    let count = high
        .checked_sub(low)
        .and_then(|v| v.checked_add(1))
        .filter(|count| *count >= 0)
        .ok_or(ClassFormatError::InvalidCode {
            what: "tableswitch range",
            offset,
        })?;
    Ok(1 + padding + 12 + (count as usize) * 4)
}

fn lookupswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let npairs = read_i32(code, base + 4)?;
    if npairs < 0 {
        return Err(ClassFormatError::InvalidCode {
            what: "lookupswitch pair count",
            offset,
        });
    }
    Ok(1 + padding + 8 + (npairs as usize) * 8)
}

fn wide_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code
        .get(offset + 1)
        .copied()
        .ok_or(ClassFormatError::UnexpectedEof { offset: offset + 1 })?;
    if opcode == opcodes::IINC { Ok(6) } else { Ok(4) }
}

fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

fn read_u16(code: &[u8], offset: usize) -> Result<u16> {
    let slice = code
        .get(offset..offset + 2)
        .ok_or(ClassFormatError::UnexpectedEof { offset })?;
    Ok(u16::from_be_bytes([slice[0], slice[1]]))
}

fn read_i32(code: &[u8], offset: usize) -> Result<i32> {
    let slice = code
        .get(offset..offset + 4)
        .ok_or(ClassFormatError::UnexpectedEof { offset })?;
    Ok(i32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

/// `BootstrapMethods` entry: constant pool indices of the handle and its static arguments.
struct BootstrapMethod {
    handle: u16,
    arguments: Vec<u16>,
}

/// Constant pool plus bootstrap table, enough to resolve every symbolic operand.
struct Pool<'a> {
    entries: &'a [ConstantPool],
    bootstrap_methods: Vec<BootstrapMethod>,
}

impl<'a> Pool<'a> {
    fn new(entries: &'a [ConstantPool]) -> Self {
        Self {
            entries,
            bootstrap_methods: Vec::new(),
        }
    }

    fn get(&self, index: u16) -> Result<&'a ConstantPool> {
        self.entries
            .get(index as usize)
            .ok_or(ClassFormatError::InvalidConstantIndex { index })
    }

    fn utf8(&self, index: u16) -> Result<&'a str> {
        match self.get(index)? {
            ConstantPool::Utf8 { value } => Ok(value.as_str()),
            _ => Err(ClassFormatError::UnexpectedConstant {
                index,
                expected: "CONSTANT_Utf8",
            }),
        }
    }

    fn class_name(&self, index: u16) -> Result<&'a str> {
        match self.get(index)? {
            ConstantPool::Class { name_index } => self.utf8(*name_index),
            _ => Err(ClassFormatError::UnexpectedConstant {
                index,
                expected: "CONSTANT_Class",
            }),
        }
    }

    fn name_and_type(&self, index: u16) -> Result<(&'a str, &'a str)> {
        match self.get(index)? {
            ConstantPool::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            _ => Err(ClassFormatError::UnexpectedConstant {
                index,
                expected: "CONSTANT_NameAndType",
            }),
        }
    }

    /// Owner, name and descriptor of a field, method or interface method reference.
    fn member_ref(&self, index: u16) -> Result<(&'a str, &'a str, &'a str)> {
        match self.get(index)? {
            ConstantPool::Fieldref {
                class_index,
                name_and_type_index,
            }
            | ConstantPool::Methodref {
                class_index,
                name_and_type_index,
            }
            | ConstantPool::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => {
                let owner = self.class_name(*class_index)?;
                let (name, descriptor) = self.name_and_type(*name_and_type_index)?;
                Ok((owner, name, descriptor))
            }
            _ => Err(ClassFormatError::UnexpectedConstant {
                index,
                expected: "member reference",
            }),
        }
    }

    fn handle(&self, index: u16) -> Result<Handle> {
        match self.get(index)? {
            ConstantPool::MethodHandle {
                reference_kind,
                reference_index,
            } => {
                let kind = HandleKind::from_tag(*reference_kind)
                    .ok_or(ClassFormatError::InvalidHandleKind(*reference_kind))?;
                let (owner, name, descriptor) = self.member_ref(*reference_index)?;
                Ok(Handle {
                    kind,
                    owner: owner.to_string(),
                    name: name.to_string(),
                    descriptor: descriptor.to_string(),
                })
            }
            _ => Err(ClassFormatError::UnexpectedConstant {
                index,
                expected: "CONSTANT_MethodHandle",
            }),
        }
    }

    fn invoke_dynamic(&self, index: u16) -> Result<(Handle, Vec<Constant>)> {
        match self.get(index)? {
            ConstantPool::InvokeDynamic {
                bootstrap_method_attr_index,
                ..
            } => self.bootstrap(*bootstrap_method_attr_index, 0),
            _ => Err(ClassFormatError::UnexpectedConstant {
                index,
                expected: "CONSTANT_InvokeDynamic",
            }),
        }
    }

    fn bootstrap(&self, index: u16, depth: usize) -> Result<(Handle, Vec<Constant>)> {
        let method = self
            .bootstrap_methods
            .get(index as usize)
            .ok_or(ClassFormatError::InvalidBootstrapIndex(index))?;
        let handle = self.handle(method.handle)?;
        let arguments = method
            .arguments
            .iter()
            .map(|argument| self.loadable(*argument, depth + 1))
            .collect::<Result<Vec<_>>>()?;
        Ok((handle, arguments))
    }

    fn loadable(&self, index: u16, depth: usize) -> Result<Constant> {
        if depth > MAX_NESTING {
            return Err(ClassFormatError::NestingTooDeep);
        }
        let constant = match self.get(index)? {
            ConstantPool::Class { name_index } => Constant::Type(class_descriptor(self.utf8(*name_index)?)),
            ConstantPool::MethodType { descriptor_index } => {
                Constant::MethodType(self.utf8(*descriptor_index)?.to_string())
            }
            ConstantPool::MethodHandle { .. } => Constant::Handle(self.handle(index)?),
            ConstantPool::Dynamic {
                bootstrap_method_attr_index,
                name_and_type_index,
            } => {
                let (_, descriptor) = self.name_and_type(*name_and_type_index)?;
                let (bootstrap, arguments) = self.bootstrap(*bootstrap_method_attr_index, depth)?;
                Constant::Dynamic {
                    descriptor: descriptor.to_string(),
                    bootstrap,
                    arguments,
                }
            }
            ConstantPool::Integer { .. }
            | ConstantPool::Float { .. }
            | ConstantPool::Long { .. }
            | ConstantPool::Double { .. }
            | ConstantPool::String { .. } => Constant::Value,
            _ => {
                return Err(ClassFormatError::UnexpectedConstant {
                    index,
                    expected: "loadable constant",
                });
            }
        };
        Ok(constant)
    }
}

/// Read names, hierarchy and member declarations straight from the bytes.
///
/// Used when `jclassfile` rejects an attribute it does not know; attributes are skipped.
fn parse_declarations(bytes: &[u8]) -> Result<ClassFile> {
    let mut reader = ClassReader::new(bytes);
    let magic = reader.read_u4()?;
    if magic != MAGIC {
        return Err(ClassFormatError::InvalidMagic(magic));
    }
    let _minor_version = reader.read_u2()?;
    let _major_version = reader.read_u2()?;
    let names = DeclarationNames::parse(&mut reader)?;
    let _access = reader.read_u2()?;
    let this_class = reader.read_u2()?;
    let super_class = reader.read_u2()?;
    let mut class = ClassFile {
        name: names.class_name(this_class)?.to_string(),
        super_name: match super_class {
            0 => None,
            index => Some(names.class_name(index)?.to_string()),
        },
        ..ClassFile::default()
    };
    for _ in 0..reader.read_u2()? {
        class.interfaces.push(names.class_name(reader.read_u2()?)?.to_string());
    }
    for members in [&mut class.fields, &mut class.methods] {
        for _ in 0..reader.read_u2()? {
            let access = reader.read_u2()?;
            let name = names.utf8(reader.read_u2()?)?.to_string();
            let descriptor = names.utf8(reader.read_u2()?)?.to_string();
            for _ in 0..reader.read_u2()? {
                reader.skip(2)?;
                let length = reader.read_u4()? as usize;
                reader.skip(length)?;
            }
            members.push(Member {
                name,
                descriptor,
                access,
                ..Member::default()
            });
        }
    }
    Ok(class)
}

/// The UTF-8 and class entries of a constant pool; everything else is skipped.
struct DeclarationNames {
    utf8: BTreeMap<u16, String>,
    classes: BTreeMap<u16, u16>,
}

impl DeclarationNames {
    fn parse(reader: &mut ClassReader<'_>) -> Result<Self> {
        let mut names = Self {
            utf8: BTreeMap::new(),
            classes: BTreeMap::new(),
        };
        let count = reader.read_u2()?;
        let mut index = 1u16;
        while index < count {
            let tag = reader.read_u1()?;
            match tag {
                1 => {
                    let length = reader.read_u2()? as usize;
                    let value = String::from_utf8_lossy(reader.read_slice(length)?).to_string();
                    names.utf8.insert(index, value);
                }
                7 => {
                    names.classes.insert(index, reader.read_u2()?);
                }
                8 | 16 | 19 | 20 => reader.skip(2)?,
                15 => reader.skip(3)?,
                3 | 4 | 9..=12 | 17 | 18 => reader.skip(4)?,
                5 | 6 => {
                    reader.skip(8)?;
                    index += 1;
                }
                _ => return Err(ClassFormatError::UnsupportedConstant { tag, index }),
            }
            index += 1;
        }
        Ok(names)
    }

    fn utf8(&self, index: u16) -> Result<&str> {
        self.utf8
            .get(&index)
            .map(String::as_str)
            .ok_or(ClassFormatError::UnexpectedConstant {
                index,
                expected: "CONSTANT_Utf8",
            })
    }

    fn class_name(&self, index: u16) -> Result<&str> {
        let name_index = self
            .classes
            .get(&index)
            .ok_or(ClassFormatError::UnexpectedConstant {
                index,
                expected: "CONSTANT_Class",
            })?;
        self.utf8(*name_index)
    }
}

/// Big-endian cursor over class file bytes.
struct ClassReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ClassReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn read_u1(&mut self) -> Result<u8> {
        Ok(self.read_slice(1)?[0])
    }

    fn read_u2(&mut self) -> Result<u16> {
        let bytes = self.read_slice(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u4(&mut self) -> Result<u32> {
        let bytes = self.read_slice(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(ClassFormatError::UnexpectedEof {
                offset: self.offset,
            })?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> Result<()> {
        self.read_slice(len).map(|_| ())
    }
}

//! Class file writer and in-memory class sources for unit tests.

use std::collections::HashMap;

use anyhow::Result;

use crate::classpath::ClassSource;

/// Minimal class file writer covering the constructs the scanner inspects.
pub(crate) struct ClassFileBuilder {
    cp: Vec<CpEntry>,
    access: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<MemberEntry>,
    methods: Vec<MemberEntry>,
    attributes: Vec<(u16, Vec<u8>)>,
    bootstrap_methods: Vec<(u16, Vec<u16>)>,
}

/// Field or method declaration for [`ClassFileBuilder`].
pub(crate) struct MemberSpec {
    access: u16,
    name: String,
    descriptor: String,
    annotations: Vec<String>,
    parameter_annotations: Vec<String>,
    type_annotations: Vec<String>,
    code_type_annotations: Vec<String>,
    deprecated: bool,
    code: Option<Vec<u8>>,
    lines: Vec<(u16, u16)>,
}

impl MemberSpec {
    pub(crate) fn new(access: u16, name: &str, descriptor: &str) -> Self {
        Self {
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            annotations: Vec::new(),
            parameter_annotations: Vec::new(),
            type_annotations: Vec::new(),
            code_type_annotations: Vec::new(),
            deprecated: false,
            code: None,
            lines: Vec::new(),
        }
    }

    pub(crate) fn annotated(mut self, descriptor: &str) -> Self {
        self.annotations.push(descriptor.to_string());
        self
    }

    pub(crate) fn parameter_annotated(mut self, descriptor: &str) -> Self {
        self.parameter_annotations.push(descriptor.to_string());
        self
    }

    /// Type annotation on the field type or the method return type.
    pub(crate) fn type_annotated(mut self, descriptor: &str) -> Self {
        self.type_annotations.push(descriptor.to_string());
        self
    }

    /// Type annotation on a `new` expression at offset 0 of the body.
    pub(crate) fn code_type_annotated(mut self, descriptor: &str) -> Self {
        self.code_type_annotations.push(descriptor.to_string());
        self
    }

    pub(crate) fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    /// Method body; a trailing `return` is the caller's responsibility.
    pub(crate) fn code(mut self, code: Vec<u8>) -> Self {
        self.code = Some(code);
        self
    }

    pub(crate) fn line(mut self, start_pc: u16, line: u16) -> Self {
        self.lines.push((start_pc, line));
        self
    }
}

struct MemberEntry {
    access: u16,
    name_index: u16,
    descriptor_index: u16,
    attributes: Vec<(u16, Vec<u8>)>,
}

impl ClassFileBuilder {
    pub(crate) fn new(class_name: &str, super_name: Option<&str>) -> Self {
        let mut builder = Self {
            cp: Vec::new(),
            access: 0x0021,
            this_class: 0,
            super_class: 0,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
            bootstrap_methods: Vec::new(),
        };
        builder.this_class = builder.add_class(class_name);
        if let Some(super_name) = super_name {
            builder.super_class = builder.add_class(super_name);
        }
        builder
    }

    pub(crate) fn set_access(&mut self, access: u16) {
        self.access = access;
    }

    pub(crate) fn add_interface(&mut self, name: &str) {
        let index = self.add_class(name);
        self.interfaces.push(index);
    }

    pub(crate) fn set_source_file(&mut self, name: &str) {
        let attribute = self.add_utf8("SourceFile");
        let value = self.add_utf8(name);
        self.attributes.push((attribute, value.to_be_bytes().to_vec()));
    }

    pub(crate) fn set_deprecated(&mut self) {
        let attribute = self.add_utf8("Deprecated");
        self.attributes.push((attribute, Vec::new()));
    }

    pub(crate) fn add_annotation(&mut self, descriptor: &str) {
        let attribute = self.annotations_attribute(&[descriptor.to_string()]);
        self.attributes.push(attribute);
    }

    pub(crate) fn add_utf8(&mut self, value: &str) -> u16 {
        self.push(CpEntry::Utf8(value.to_string()))
    }

    pub(crate) fn add_class(&mut self, name: &str) -> u16 {
        let name_index = self.add_utf8(name);
        self.push(CpEntry::Class(name_index))
    }

    pub(crate) fn add_string(&mut self, value: &str) -> u16 {
        let value_index = self.add_utf8(value);
        self.push(CpEntry::String(value_index))
    }

    fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.push(CpEntry::NameAndType(name_index, descriptor_index))
    }

    pub(crate) fn add_field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.push(CpEntry::Ref(9, class_index, name_and_type))
    }

    pub(crate) fn add_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.push(CpEntry::Ref(10, class_index, name_and_type))
    }

    pub(crate) fn add_interface_method_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.push(CpEntry::Ref(11, class_index, name_and_type))
    }

    pub(crate) fn add_method_handle(&mut self, kind: u8, reference: u16) -> u16 {
        self.push(CpEntry::MethodHandle(kind, reference))
    }

    pub(crate) fn add_method_type(&mut self, descriptor: &str) -> u16 {
        let descriptor_index = self.add_utf8(descriptor);
        self.push(CpEntry::MethodType(descriptor_index))
    }

    pub(crate) fn add_invoke_dynamic(
        &mut self,
        bootstrap_handle: u16,
        arguments: Vec<u16>,
        name: &str,
        descriptor: &str,
    ) -> u16 {
        let bootstrap = self.bootstrap_methods.len() as u16;
        self.bootstrap_methods.push((bootstrap_handle, arguments));
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.push(CpEntry::InvokeDynamic(bootstrap, name_and_type))
    }

    pub(crate) fn add_dynamic_constant(
        &mut self,
        bootstrap_handle: u16,
        arguments: Vec<u16>,
        name: &str,
        descriptor: &str,
    ) -> u16 {
        let bootstrap = self.bootstrap_methods.len() as u16;
        self.bootstrap_methods.push((bootstrap_handle, arguments));
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.push(CpEntry::Dynamic(bootstrap, name_and_type))
    }

    /// `invokedynamic` target shaped like javac's lambda translation.
    pub(crate) fn add_lambda(
        &mut self,
        owner: &str,
        implementation: &str,
        implementation_descriptor: &str,
        interface_method: &str,
        factory_descriptor: &str,
    ) -> u16 {
        let metafactory = self.add_method_ref(
            "java/lang/invoke/LambdaMetafactory",
            "metafactory",
            "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodHandle;Ljava/lang/invoke/MethodType;)Ljava/lang/invoke/CallSite;",
        );
        let bootstrap = self.add_method_handle(6, metafactory);
        let erased = self.add_method_type(implementation_descriptor);
        let target = self.add_method_ref(owner, implementation, implementation_descriptor);
        let target_handle = self.add_method_handle(6, target);
        let instantiated = self.add_method_type(implementation_descriptor);
        self.add_invoke_dynamic(
            bootstrap,
            vec![erased, target_handle, instantiated],
            interface_method,
            factory_descriptor,
        )
    }

    pub(crate) fn add_field(&mut self, spec: MemberSpec) {
        let entry = self.member_entry(spec);
        self.fields.push(entry);
    }

    pub(crate) fn add_method(&mut self, spec: MemberSpec) {
        let entry = self.member_entry(spec);
        self.methods.push(entry);
    }

    fn member_entry(&mut self, spec: MemberSpec) -> MemberEntry {
        let name_index = self.add_utf8(&spec.name);
        let descriptor_index = self.add_utf8(&spec.descriptor);
        let mut attributes = Vec::new();
        if spec.deprecated {
            attributes.push((self.add_utf8("Deprecated"), Vec::new()));
        }
        if !spec.annotations.is_empty() {
            attributes.push(self.annotations_attribute(&spec.annotations));
        }
        if !spec.parameter_annotations.is_empty() {
            let name = self.add_utf8("RuntimeInvisibleParameterAnnotations");
            let mut data = vec![1];
            write_u16(&mut data, spec.parameter_annotations.len() as u16);
            for descriptor in &spec.parameter_annotations {
                let type_index = self.add_utf8(descriptor);
                write_u16(&mut data, type_index);
                write_u16(&mut data, 0);
            }
            attributes.push((name, data));
        }
        if !spec.type_annotations.is_empty() {
            // method_return or field target, both without target info.
            let target = if spec.descriptor.starts_with('(') { 0x14 } else { 0x13 };
            let attribute = self.type_annotations_attribute(&spec.type_annotations, &[target]);
            attributes.push(attribute);
        }
        if let Some(code) = spec.code {
            let code_name = self.add_utf8("Code");
            let mut data = Vec::new();
            write_u16(&mut data, 8);
            write_u16(&mut data, 8);
            write_u32(&mut data, code.len() as u32);
            data.extend_from_slice(&code);
            write_u16(&mut data, 0);
            let mut code_attributes = Vec::new();
            if !spec.lines.is_empty() {
                let mut table = Vec::new();
                write_u16(&mut table, spec.lines.len() as u16);
                for (start_pc, line) in &spec.lines {
                    write_u16(&mut table, *start_pc);
                    write_u16(&mut table, *line);
                }
                code_attributes.push((self.add_utf8("LineNumberTable"), table));
            }
            if !spec.code_type_annotations.is_empty() {
                // new expression at offset 0.
                let attribute =
                    self.type_annotations_attribute(&spec.code_type_annotations, &[0x44, 0, 0]);
                code_attributes.push(attribute);
            }
            write_attributes(&mut data, &code_attributes);
            attributes.push((code_name, data));
        }
        MemberEntry {
            access: spec.access,
            name_index,
            descriptor_index,
            attributes,
        }
    }

    fn annotations_attribute(&mut self, descriptors: &[String]) -> (u16, Vec<u8>) {
        let name = self.add_utf8("RuntimeVisibleAnnotations");
        let mut data = Vec::new();
        write_u16(&mut data, descriptors.len() as u16);
        for descriptor in descriptors {
            let type_index = self.add_utf8(descriptor);
            write_u16(&mut data, type_index);
            write_u16(&mut data, 0);
        }
        (name, data)
    }

    /// `RuntimeVisibleTypeAnnotations` with one target and an empty type path per annotation.
    fn type_annotations_attribute(&mut self, descriptors: &[String], target: &[u8]) -> (u16, Vec<u8>) {
        let name = self.add_utf8("RuntimeVisibleTypeAnnotations");
        let mut data = Vec::new();
        write_u16(&mut data, descriptors.len() as u16);
        for descriptor in descriptors {
            data.extend_from_slice(target);
            data.push(0);
            let type_index = self.add_utf8(descriptor);
            write_u16(&mut data, type_index);
            write_u16(&mut data, 0);
        }
        (name, data)
    }

    fn push(&mut self, entry: CpEntry) -> u16 {
        self.cp.push(entry);
        self.cp.len() as u16
    }

    pub(crate) fn finish(mut self) -> Vec<u8> {
        if !self.bootstrap_methods.is_empty() {
            let name = self.add_utf8("BootstrapMethods");
            let mut data = Vec::new();
            write_u16(&mut data, self.bootstrap_methods.len() as u16);
            for (handle, arguments) in &self.bootstrap_methods {
                write_u16(&mut data, *handle);
                write_u16(&mut data, arguments.len() as u16);
                for argument in arguments {
                    write_u16(&mut data, *argument);
                }
            }
            self.attributes.push((name, data));
        }

        let mut bytes = Vec::new();
        write_u32(&mut bytes, 0xCAFEBABE);
        write_u16(&mut bytes, 0);
        write_u16(&mut bytes, 52);
        write_u16(&mut bytes, (self.cp.len() + 1) as u16);
        for entry in &self.cp {
            entry.write(&mut bytes);
        }
        write_u16(&mut bytes, self.access);
        write_u16(&mut bytes, self.this_class);
        write_u16(&mut bytes, self.super_class);
        write_u16(&mut bytes, self.interfaces.len() as u16);
        for interface in &self.interfaces {
            write_u16(&mut bytes, *interface);
        }
        for members in [&self.fields, &self.methods] {
            write_u16(&mut bytes, members.len() as u16);
            for member in members {
                write_u16(&mut bytes, member.access);
                write_u16(&mut bytes, member.name_index);
                write_u16(&mut bytes, member.descriptor_index);
                write_attributes(&mut bytes, &member.attributes);
            }
        }
        write_attributes(&mut bytes, &self.attributes);
        bytes
    }
}

/// Constant pool entries needed by test class files.
enum CpEntry {
    Utf8(String),
    Class(u16),
    String(u16),
    NameAndType(u16, u16),
    /// Field, method or interface method reference, by tag.
    Ref(u8, u16, u16),
    MethodHandle(u8, u16),
    MethodType(u16),
    Dynamic(u16, u16),
    InvokeDynamic(u16, u16),
}

impl CpEntry {
    fn write(&self, bytes: &mut Vec<u8>) {
        match self {
            CpEntry::Utf8(value) => {
                bytes.push(1);
                write_u16(bytes, value.len() as u16);
                bytes.extend_from_slice(value.as_bytes());
            }
            CpEntry::Class(name_index) => {
                bytes.push(7);
                write_u16(bytes, *name_index);
            }
            CpEntry::String(value_index) => {
                bytes.push(8);
                write_u16(bytes, *value_index);
            }
            CpEntry::NameAndType(name_index, descriptor_index) => {
                bytes.push(12);
                write_u16(bytes, *name_index);
                write_u16(bytes, *descriptor_index);
            }
            CpEntry::Ref(tag, class_index, name_and_type) => {
                bytes.push(*tag);
                write_u16(bytes, *class_index);
                write_u16(bytes, *name_and_type);
            }
            CpEntry::MethodHandle(kind, reference) => {
                bytes.push(15);
                bytes.push(*kind);
                write_u16(bytes, *reference);
            }
            CpEntry::MethodType(descriptor_index) => {
                bytes.push(16);
                write_u16(bytes, *descriptor_index);
            }
            CpEntry::Dynamic(bootstrap, name_and_type) => {
                bytes.push(17);
                write_u16(bytes, *bootstrap);
                write_u16(bytes, *name_and_type);
            }
            CpEntry::InvokeDynamic(bootstrap, name_and_type) => {
                bytes.push(18);
                write_u16(bytes, *bootstrap);
                write_u16(bytes, *name_and_type);
            }
        }
    }
}

fn write_attributes(bytes: &mut Vec<u8>, attributes: &[(u16, Vec<u8>)]) {
    write_u16(bytes, attributes.len() as u16);
    for (name, data) in attributes {
        write_u16(bytes, *name);
        write_u32(bytes, data.len() as u32);
        bytes.extend_from_slice(data);
    }
}

fn write_u16(bytes: &mut Vec<u8>, value: u16) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

fn write_u32(bytes: &mut Vec<u8>, value: u32) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn high(value: u16) -> u8 {
    (value >> 8) as u8
}

pub(crate) fn low(value: u16) -> u8 {
    (value & 0xff) as u8
}

/// `invoke*` instruction bytes for a constant pool reference.
pub(crate) fn invoke(opcode: u8, index: u16) -> Vec<u8> {
    if opcode == crate::opcodes::INVOKEINTERFACE {
        vec![opcode, high(index), low(index), 1, 0]
    } else {
        vec![opcode, high(index), low(index)]
    }
}

/// Class source backed by a map of internal names to class bytes.
#[derive(Default)]
pub(crate) struct MemorySource {
    classes: HashMap<String, Vec<u8>>,
    runtime: bool,
}

impl MemorySource {
    pub(crate) fn runtime() -> Self {
        Self {
            classes: HashMap::new(),
            runtime: true,
        }
    }

    pub(crate) fn with(mut self, bytes: Vec<u8>) -> Self {
        let class = crate::classfile::parse_class_skeleton(&bytes).expect("valid test class");
        self.classes.insert(class.name, bytes);
        self
    }
}

impl ClassSource for MemorySource {
    fn find(&self, internal_name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.classes.get(internal_name).cloned())
    }

    fn is_runtime(&self) -> bool {
        self.runtime
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// A tiny stand-in for the platform runtime with the classes most tests touch.
pub(crate) fn mini_jdk() -> MemorySource {
    let mut object = ClassFileBuilder::new("java/lang/Object", None);
    object.add_method(MemberSpec::new(0x0001, "<init>", "()V"));
    object.add_method(MemberSpec::new(0x0001, "toString", "()Ljava/lang/String;"));
    object.add_method(MemberSpec::new(0x0001, "hashCode", "()I"));
    object.add_method(MemberSpec::new(0x0001, "wait", "()V"));
    object.add_method(MemberSpec::new(0x0104, "clone", "()Ljava/lang/Object;"));

    let mut string = ClassFileBuilder::new("java/lang/String", Some("java/lang/Object"));
    string.add_interface("java/lang/CharSequence");
    string.add_method(MemberSpec::new(0x0001, "toString", "()Ljava/lang/String;"));
    string.add_method(MemberSpec::new(0x0001, "toUpperCase", "()Ljava/lang/String;"));

    let mut char_sequence = ClassFileBuilder::new("java/lang/CharSequence", Some("java/lang/Object"));
    char_sequence.set_access(0x0601);
    char_sequence.add_method(MemberSpec::new(0x0401, "length", "()I"));

    let mut runnable = ClassFileBuilder::new("java/lang/Runnable", Some("java/lang/Object"));
    runnable.set_access(0x0601);
    runnable.add_method(MemberSpec::new(0x0401, "run", "()V"));

    let mut thread = ClassFileBuilder::new("java/lang/Thread", Some("java/lang/Object"));
    thread.add_interface("java/lang/Runnable");
    thread.add_method(MemberSpec::new(0x0001, "run", "()V"));
    thread.add_method(MemberSpec::new(0x0011, "stop", "()V"));

    let mut deprecated = ClassFileBuilder::new("java/lang/Deprecated", Some("java/lang/Object"));
    deprecated.set_access(0x2601);
    deprecated.add_interface("java/lang/annotation/Annotation");

    let mut annotation =
        ClassFileBuilder::new("java/lang/annotation/Annotation", Some("java/lang/Object"));
    annotation.set_access(0x0601);

    let mut system = ClassFileBuilder::new("java/lang/System", Some("java/lang/Object"));
    system.add_field(MemberSpec::new(0x0019, "out", "Ljava/io/PrintStream;"));
    system.add_method(MemberSpec::new(0x0009, "exit", "(I)V"));

    let mut print_stream = ClassFileBuilder::new("java/io/PrintStream", Some("java/lang/Object"));
    print_stream.add_method(MemberSpec::new(0x0001, "println", "(Ljava/lang/String;)V"));

    let mut unsafe_class = ClassFileBuilder::new("sun/misc/Unsafe", Some("java/lang/Object"));
    unsafe_class.add_method(MemberSpec::new(0x0101, "getInt", "(J)I"));

    let mut method_handle =
        ClassFileBuilder::new("java/lang/invoke/MethodHandle", Some("java/lang/Object"));
    method_handle.add_method(MemberSpec::new(
        0x0191,
        "invokeExact",
        "([Ljava/lang/Object;)Ljava/lang/Object;",
    ));
    method_handle.add_method(MemberSpec::new(
        0x0191,
        "invoke",
        "([Ljava/lang/Object;)Ljava/lang/Object;",
    ));

    MemorySource::runtime()
        .with(object.finish())
        .with(string.finish())
        .with(char_sequence.finish())
        .with(runnable.finish())
        .with(thread.finish())
        .with(deprecated.finish())
        .with(annotation.finish())
        .with(system.finish())
        .with(print_stream.finish())
        .with(unsafe_class.finish())
        .with(method_handle.finish())
}

//! Shared helpers: assemble small class files through the public codec API.

#![allow(dead_code)]

use mutabyte::classfile::opcode::*;
use mutabyte::classfile::{
    Attribute, AttributeInfo, ClassFile, CodeAttribute, Constant, ConstantPool, LineNumberEntry,
    MemberInfo,
};

pub const ILOAD_1: u8 = 0x1b;
pub const ILOAD_2: u8 = 0x1c;

/// Builder over the public `classfile` types.
pub struct ClassBuilder {
    pool: ConstantPool,
    this_class: u16,
    super_class: u16,
    methods: Vec<MemberInfo>,
    code_name: u16,
    lnt_name: u16,
}

impl ClassBuilder {
    pub fn new(class_name: &str) -> Self {
        let mut pool = ConstantPool::default();
        let this_utf8 = pool.push(Constant::Utf8(class_name.as_bytes().to_vec()));
        let super_utf8 = pool.push(Constant::Utf8(b"java/lang/Object".to_vec()));
        let this_class = pool.push(Constant::Class {
            name_index: this_utf8,
        });
        let super_class = pool.push(Constant::Class {
            name_index: super_utf8,
        });
        let code_name = pool.push(Constant::Utf8(b"Code".to_vec()));
        let lnt_name = pool.push(Constant::Utf8(b"LineNumberTable".to_vec()));
        Self {
            pool,
            this_class,
            super_class,
            methods: Vec::new(),
            code_name,
            lnt_name,
        }
    }

    pub fn constant(&mut self, constant: Constant) -> u16 {
        self.pool.push(constant)
    }

    pub fn method(&mut self, name: &str, descriptor: &str, line: u16, code: Vec<u8>) -> &mut Self {
        let name_index = self.pool.push(Constant::Utf8(name.as_bytes().to_vec()));
        let descriptor_index = self
            .pool
            .push(Constant::Utf8(descriptor.as_bytes().to_vec()));
        let code_attr = CodeAttribute {
            max_stack: 4,
            max_locals: 8,
            code,
            exception_table: Vec::new(),
            attributes: vec![Attribute {
                name_index: self.lnt_name,
                info: AttributeInfo::LineNumberTable(vec![LineNumberEntry { start_pc: 0, line }]),
            }],
        };
        self.methods.push(MemberInfo {
            access_flags: 0,
            name_index,
            descriptor_index,
            attributes: vec![Attribute {
                name_index: self.code_name,
                info: AttributeInfo::Code(code_attr),
            }],
        });
        self
    }

    pub fn finish(self) -> ClassFile {
        ClassFile {
            minor_version: 0,
            major_version: 52,
            pool: self.pool,
            access_flags: 0x0021,
            this_class: self.this_class,
            super_class: self.super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: self.methods,
            attributes: Vec::new(),
        }
    }

    pub fn bytes(self) -> Vec<u8> {
        self.finish().emit()
    }
}

/// `int answer() { return 42; }`
pub fn answer_class() -> Vec<u8> {
    let mut b = ClassBuilder::new("itest/Answer");
    b.method("answer", "()I", 5, vec![BIPUSH, 42, IRETURN]);
    b.bytes()
}

/// `int choose(int x) { return x > 0 ? 1 : 0; }`
pub fn choose_class() -> Vec<u8> {
    let mut b = ClassBuilder::new("itest/Choose");
    b.method(
        "choose",
        "(I)I",
        9,
        vec![ILOAD_1, IFLE, 0x00, 0x05, ICONST_1, IRETURN, ICONST_0, IRETURN],
    );
    b.bytes()
}

/// Write class bytes under `dir` at the package path for `name`.
pub fn write_class(dir: &std::path::Path, name: &str, bytes: &[u8]) -> String {
    let path = dir.join(format!("{}.class", name.replace('.', "/")));
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
    dir.display().to_string()
}

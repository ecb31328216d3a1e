//! Test-only class-file assembly helpers.

use crate::classfile::opcode::*;
use crate::classfile::{
    Attribute, AttributeInfo, ClassFile, CodeAttribute, Constant, ConstantPool, LineNumberEntry,
    LocalVariableEntry, MemberInfo,
};

/// Assembles small, valid class files through the codec's own types.
pub struct ClassBuilder {
    pool: ConstantPool,
    this_class: u16,
    super_class: u16,
    methods: Vec<MemberInfo>,
    code_name: u16,
    lnt_name: u16,
    lvt_name: u16,
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
        let lvt_name = pool.push(Constant::Utf8(b"LocalVariableTable".to_vec()));
        Self {
            pool,
            this_class,
            super_class,
            methods: Vec::new(),
            code_name,
            lnt_name,
            lvt_name,
        }
    }

    pub fn utf8(&mut self, text: &str) -> u16 {
        self.pool.push(Constant::Utf8(text.as_bytes().to_vec()))
    }

    pub fn constant(&mut self, constant: Constant) -> u16 {
        self.pool.push(constant)
    }

    pub fn string_constant(&mut self, text: &str) -> u16 {
        let utf8_index = self.utf8(text);
        self.pool.push(Constant::String { utf8_index })
    }

    pub fn field_ref(&mut self, class_name: &str, field: &str, descriptor: &str) -> u16 {
        let class_utf8 = self.utf8(class_name);
        let class_index = self.pool.push(Constant::Class {
            name_index: class_utf8,
        });
        let name_index = self.utf8(field);
        let descriptor_index = self.utf8(descriptor);
        let name_and_type_index = self.pool.push(Constant::NameAndType {
            name_index,
            descriptor_index,
        });
        self.pool.push(Constant::FieldRef {
            class_index,
            name_and_type_index,
        })
    }

    /// Add a method with a one-row line table mapping the whole body to
    /// `line`.
    pub fn method(&mut self, name: &str, descriptor: &str, line: u16, code: Vec<u8>) -> usize {
        self.method_with_rows(name, descriptor, line, code, Vec::new(), 0)
    }

    /// Add a method with local-variable rows `(slot, descriptor)` scoped over
    /// the whole body.
    pub fn method_with_locals(
        &mut self,
        name: &str,
        descriptor: &str,
        line: u16,
        code: Vec<u8>,
        locals: &[(u16, &str)],
    ) -> usize {
        let length = code.len() as u16;
        let rows: Vec<(u16, u16, u16, String)> = locals
            .iter()
            .map(|(slot, desc)| (*slot, 0, length, desc.to_string()))
            .collect();
        let rows: Vec<LocalVariableEntry> = rows
            .into_iter()
            .map(|(slot, start_pc, len, desc)| {
                let name_index = self.utf8(&format!("v{slot}"));
                let descriptor_index = self.utf8(&desc);
                LocalVariableEntry {
                    start_pc,
                    length: len,
                    name_index,
                    descriptor_index,
                    index: slot,
                }
            })
            .collect();
        self.method_with_rows(name, descriptor, line, code, rows, 0)
    }

    /// Add a method with explicit access flags.
    pub fn method_flagged(
        &mut self,
        name: &str,
        descriptor: &str,
        line: u16,
        code: Vec<u8>,
        access_flags: u16,
    ) -> usize {
        self.method_with_rows(name, descriptor, line, code, Vec::new(), access_flags)
    }

    fn method_with_rows(
        &mut self,
        name: &str,
        descriptor: &str,
        line: u16,
        code: Vec<u8>,
        locals: Vec<LocalVariableEntry>,
        access_flags: u16,
    ) -> usize {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let mut attributes = vec![Attribute {
            name_index: self.lnt_name,
            info: AttributeInfo::LineNumberTable(vec![LineNumberEntry { start_pc: 0, line }]),
        }];
        if !locals.is_empty() {
            attributes.push(Attribute {
                name_index: self.lvt_name,
                info: AttributeInfo::LocalVariableTable(locals),
            });
        }
        let code_attr = CodeAttribute {
            max_stack: 4,
            max_locals: 8,
            code,
            exception_table: Vec::new(),
            attributes,
        };
        self.methods.push(MemberInfo {
            access_flags,
            name_index,
            descriptor_index,
            attributes: vec![Attribute {
                name_index: self.code_name,
                info: AttributeInfo::Code(code_attr),
            }],
        });
        self.methods.len() - 1
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

/// `int choose(int x) { return x > 0 ? 1 : 0; }` plus `int sum(int, int)`
/// and an excluded `main`.
pub fn calc_class() -> Vec<u8> {
    let mut b = ClassBuilder::new("fixture/Calc");
    b.method(
        "choose",
        "(I)I",
        11,
        vec![ILOAD_1, IFLE, 0x00, 0x05, ICONST_1, IRETURN, ICONST_0, IRETURN],
    );
    b.method("sum", "(II)I", 15, vec![ILOAD_1, ILOAD_2, IADD, IRETURN]);
    b.method(
        "main",
        "([Ljava/lang/String;)V",
        20,
        vec![RETURN],
    );
    b.bytes()
}

const ILOAD_1: u8 = 0x1b;
const ILOAD_2: u8 = 0x1c;

/// A method whose only body is a compiler-expanded `assert`.
pub fn assertion_class() -> Vec<u8> {
    let mut b = ClassBuilder::new("fixture/Guarded");
    let flag = b.field_ref("fixture/Guarded", "$assertionsDisabled", "Z");
    let [hi, lo] = flag.to_be_bytes();
    // getstatic; ifne +10; iload_1; ifgt +6; iconst_1 (stand-in for the
    // AssertionError construction); athrow-less fall through; return
    b.method(
        "validate",
        "(I)V",
        30,
        vec![
            GETSTATIC, hi, lo, // 0
            IFNE, 0x00, 0x0a, // 3, target 13
            ILOAD_1,   // 6
            IFGT, 0x00, 0x06, // 7, target 13
            ICONST_1,  // 10
            NOP,       // 11
            NOP,       // 12
            RETURN,    // 13
        ],
    );
    b.bytes()
}

//! Lossless class-file codec.
//!
//! Parses the class-file binary format into an editable in-memory image and
//! emits it back byte-identically. Supported edits are deliberately narrow:
//! append a constant, replace one instruction with another of identical
//! length, rewrite a numeric or string pool entry. Anything that would shift
//! bytecode offsets is rejected, because branch targets, exception ranges
//! and line-number rows all address byte offsets.

pub mod attr;
#[allow(missing_docs)]
pub mod opcode;
pub mod pool;

use thiserror::Error;

pub use attr::{
    Attribute, AttributeInfo, CodeAttribute, ExceptionHandler, LineNumberEntry, LocalVariableEntry,
};
pub use pool::{Constant, ConstantPool};

const MAGIC: u32 = 0xcafe_babe;

/// Methods and fields marked by the compiler rather than the source.
pub const ACC_SYNTHETIC: u16 = 0x1000;
/// Static members have no receiver in local slot 0.
pub const ACC_STATIC: u16 = 0x0008;
/// Abstract methods carry no code.
pub const ACC_ABSTRACT: u16 = 0x0400;
/// Native methods carry no code.
pub const ACC_NATIVE: u16 = 0x0100;

/// Codec failures. All are fatal for the class they occur in.
#[derive(Debug, Error)]
pub enum ClassFileError {
    /// Input ended before the structure did.
    #[error("truncated class file at byte {at}")]
    Truncated {
        /// Byte position of the failed read.
        at: usize,
    },
    /// The leading magic number is wrong.
    #[error("bad magic {found:#010x}")]
    BadMagic {
        /// The value found in place of the magic.
        found: u32,
    },
    /// A constant pool tag outside the supported set.
    #[error("unsupported constant pool tag {tag} at index {index}")]
    UnsupportedTag {
        /// The offending tag byte.
        tag: u8,
        /// Pool index at which it appeared.
        index: u16,
    },
    /// A pool index that does not address an entry.
    #[error("constant pool index {index} out of range")]
    BadPoolIndex {
        /// The offending index.
        index: u16,
    },
    /// A pool entry of an unexpected kind.
    #[error("constant pool index {index} is not a {expected} entry")]
    WrongConstant {
        /// The offending index.
        index: u16,
        /// What the caller required.
        expected: &'static str,
    },
    /// An opcode the instruction walker does not know.
    #[error("unknown opcode {opcode:#04x} at offset {offset}")]
    UnknownOpcode {
        /// The opcode byte.
        opcode: u8,
        /// Offset within the method code.
        offset: usize,
    },
    /// An offset that is not an instruction boundary or is out of range.
    #[error("no instruction at offset {offset}")]
    BadOffset {
        /// The offending offset.
        offset: usize,
    },
    /// An instruction replacement whose length differs from the original.
    #[error("replacement is {replacement} bytes, instruction at offset {offset} is {original}")]
    EditLengthMismatch {
        /// Offset of the edited instruction.
        offset: usize,
        /// Length of the instruction being replaced.
        original: usize,
        /// Length of the proposed replacement.
        replacement: usize,
    },
    /// Bytes left over after the class structure ended.
    #[error("{extra} trailing bytes after class structure")]
    TrailingBytes {
        /// How many bytes were left unread.
        extra: usize,
    },
    /// A method index that does not address a method.
    #[error("method index {index} out of range")]
    BadMethodIndex {
        /// The offending index.
        index: usize,
    },
}

/// Big-endian cursor over a byte slice.
#[derive(Debug)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Cursor at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Read one byte.
    pub fn u8(&mut self) -> Result<u8, ClassFileError> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or(ClassFileError::Truncated { at: self.pos })?;
        self.pos += 1;
        Ok(b)
    }

    /// Read a big-endian u16.
    pub fn u16(&mut self) -> Result<u16, ClassFileError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    /// Read a big-endian u32.
    pub fn u32(&mut self) -> Result<u32, ClassFileError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    /// Read a big-endian u64.
    pub fn u64(&mut self) -> Result<u64, ClassFileError> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    /// Read `len` raw bytes.
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], ClassFileError> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(ClassFileError::Truncated { at: self.pos })?;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or(ClassFileError::Truncated { at: self.pos })?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ClassFileError> {
        Ok(self.bytes(N)?.try_into().expect("length-checked slice"))
    }
}

/// A field or method declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberInfo {
    /// Access and property flags.
    pub access_flags: u16,
    /// Pool index of the name `Utf8`.
    pub name_index: u16,
    /// Pool index of the descriptor `Utf8`.
    pub descriptor_index: u16,
    /// Member attributes.
    pub attributes: Vec<Attribute>,
}

impl MemberInfo {
    fn parse(r: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<Self, ClassFileError> {
        let access_flags = r.u16()?;
        let name_index = r.u16()?;
        let descriptor_index = r.u16()?;
        let count = r.u16()?;
        let mut attributes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            attributes.push(Attribute::parse(r, pool)?);
        }
        Ok(Self {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        })
    }

    fn emit(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.access_flags.to_be_bytes());
        out.extend_from_slice(&self.name_index.to_be_bytes());
        out.extend_from_slice(&self.descriptor_index.to_be_bytes());
        out.extend_from_slice(&(self.attributes.len() as u16).to_be_bytes());
        for a in &self.attributes {
            a.emit(out);
        }
    }

    /// The member's `Code` attribute, when present.
    pub fn code(&self) -> Option<&CodeAttribute> {
        self.attributes.iter().find_map(|a| match &a.info {
            AttributeInfo::Code(code) => Some(code),
            _ => None,
        })
    }

    /// Mutable access to the member's `Code` attribute.
    pub fn code_mut(&mut self) -> Option<&mut CodeAttribute> {
        self.attributes.iter_mut().find_map(|a| match &mut a.info {
            AttributeInfo::Code(code) => Some(code),
            _ => None,
        })
    }
}

/// In-memory image of one compiled class.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassFile {
    /// Minor format version.
    pub minor_version: u16,
    /// Major format version.
    pub major_version: u16,
    /// The constant pool.
    pub pool: ConstantPool,
    /// Class access flags.
    pub access_flags: u16,
    /// Pool index of this class.
    pub this_class: u16,
    /// Pool index of the superclass, or 0.
    pub super_class: u16,
    /// Pool indices of directly implemented interfaces.
    pub interfaces: Vec<u16>,
    /// Declared fields.
    pub fields: Vec<MemberInfo>,
    /// Declared methods, in declaration order.
    pub methods: Vec<MemberInfo>,
    /// Class-level attributes.
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Parse a complete class file. Trailing bytes are an error.
    pub fn parse(bytes: &[u8]) -> Result<Self, ClassFileError> {
        let mut r = ByteReader::new(bytes);
        let magic = r.u32()?;
        if magic != MAGIC {
            return Err(ClassFileError::BadMagic { found: magic });
        }
        let minor_version = r.u16()?;
        let major_version = r.u16()?;
        let pool = ConstantPool::parse(&mut r)?;
        let access_flags = r.u16()?;
        let this_class = r.u16()?;
        let super_class = r.u16()?;
        let interface_count = r.u16()?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            interfaces.push(r.u16()?);
        }
        let field_count = r.u16()?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            fields.push(MemberInfo::parse(&mut r, &pool)?);
        }
        let method_count = r.u16()?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            methods.push(MemberInfo::parse(&mut r, &pool)?);
        }
        let attr_count = r.u16()?;
        let mut attributes = Vec::with_capacity(attr_count as usize);
        for _ in 0..attr_count {
            attributes.push(Attribute::parse(&mut r, &pool)?);
        }
        if r.remaining() != 0 {
            return Err(ClassFileError::TrailingBytes {
                extra: r.remaining(),
            });
        }
        Ok(Self {
            minor_version,
            major_version,
            pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    /// Emit the class file. For any parsed input, `emit` returns the input
    /// bytes unchanged.
    pub fn emit(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC.to_be_bytes());
        out.extend_from_slice(&self.minor_version.to_be_bytes());
        out.extend_from_slice(&self.major_version.to_be_bytes());
        self.pool.emit(&mut out);
        out.extend_from_slice(&self.access_flags.to_be_bytes());
        out.extend_from_slice(&self.this_class.to_be_bytes());
        out.extend_from_slice(&self.super_class.to_be_bytes());
        out.extend_from_slice(&(self.interfaces.len() as u16).to_be_bytes());
        for i in &self.interfaces {
            out.extend_from_slice(&i.to_be_bytes());
        }
        out.extend_from_slice(&(self.fields.len() as u16).to_be_bytes());
        for f in &self.fields {
            f.emit(&mut out);
        }
        out.extend_from_slice(&(self.methods.len() as u16).to_be_bytes());
        for m in &self.methods {
            m.emit(&mut out);
        }
        out.extend_from_slice(&(self.attributes.len() as u16).to_be_bytes());
        for a in &self.attributes {
            a.emit(&mut out);
        }
        out
    }

    /// This class's name in internal (`a/b/C`) form.
    pub fn class_name(&self) -> Result<&str, ClassFileError> {
        self.pool.class_name(self.this_class)
    }

    /// Name of the method at `index`.
    pub fn method_name(&self, index: usize) -> Result<&str, ClassFileError> {
        let method = self
            .methods
            .get(index)
            .ok_or(ClassFileError::BadMethodIndex { index })?;
        self.pool.utf8(method.name_index)
    }

    /// Descriptor of the method at `index`.
    pub fn method_descriptor(&self, index: usize) -> Result<&str, ClassFileError> {
        let method = self
            .methods
            .get(index)
            .ok_or(ClassFileError::BadMethodIndex { index })?;
        self.pool.utf8(method.descriptor_index)
    }

    /// Replace the instruction at `offset` in the method at `method_index`
    /// with `replacement`. The replacement must have exactly the length of
    /// the instruction it displaces.
    pub fn replace_instruction(
        &mut self,
        method_index: usize,
        offset: usize,
        replacement: &[u8],
    ) -> Result<(), ClassFileError> {
        let method = self
            .methods
            .get_mut(method_index)
            .ok_or(ClassFileError::BadMethodIndex {
                index: method_index,
            })?;
        let code = method
            .code_mut()
            .ok_or(ClassFileError::BadOffset { offset })?;
        let original = opcode::instruction_len(&code.code, offset)?;
        if offset + original > code.code.len() {
            return Err(ClassFileError::Truncated { at: offset });
        }
        if replacement.len() != original {
            return Err(ClassFileError::EditLengthMismatch {
                offset,
                original,
                replacement: replacement.len(),
            });
        }
        code.code[offset..offset + original].copy_from_slice(replacement);
        Ok(())
    }
}

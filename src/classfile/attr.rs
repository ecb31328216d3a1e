//! Attribute parsing and emission.
//!
//! `Code`, `LineNumberTable` and `LocalVariableTable` are parsed
//! structurally because the mutater reads them; everything else is kept as
//! raw bytes so emission stays byte-identical.

use super::pool::ConstantPool;
use super::{ByteReader, ClassFileError};

/// One attribute with its name index and decoded body.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// Pool index of the attribute name `Utf8`.
    pub name_index: u16,
    /// Decoded body.
    pub info: AttributeInfo,
}

/// Attribute bodies the codec understands, plus a raw fallback.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeInfo {
    /// A method body.
    Code(CodeAttribute),
    /// Bytecode offset to source line mapping.
    LineNumberTable(Vec<LineNumberEntry>),
    /// Local variable scopes and descriptors.
    LocalVariableTable(Vec<LocalVariableEntry>),
    /// Unparsed attribute body.
    Raw(Vec<u8>),
}

/// The `Code` attribute of a method.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeAttribute {
    /// Operand stack depth limit.
    pub max_stack: u16,
    /// Local variable slot count.
    pub max_locals: u16,
    /// The bytecode stream.
    pub code: Vec<u8>,
    /// Exception handler ranges.
    pub exception_table: Vec<ExceptionHandler>,
    /// Nested attributes (line numbers, local variables, stack maps).
    pub attributes: Vec<Attribute>,
}

/// One exception handler row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Start of the protected range, inclusive.
    pub start_pc: u16,
    /// End of the protected range, exclusive.
    pub end_pc: u16,
    /// Handler entry offset.
    pub handler_pc: u16,
    /// `Class` pool index of the caught type, or 0 for any.
    pub catch_type: u16,
}

/// One `LineNumberTable` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumberEntry {
    /// First bytecode offset of the line.
    pub start_pc: u16,
    /// Source line number.
    pub line: u16,
}

/// One `LocalVariableTable` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariableEntry {
    /// First offset at which the variable is live.
    pub start_pc: u16,
    /// Length of the live range in bytes.
    pub length: u16,
    /// Pool index of the variable name `Utf8`.
    pub name_index: u16,
    /// Pool index of the type descriptor `Utf8`.
    pub descriptor_index: u16,
    /// Local slot number.
    pub index: u16,
}

impl LocalVariableEntry {
    /// Whether the variable is in scope at `pc`.
    pub fn covers(&self, pc: usize) -> bool {
        let start = self.start_pc as usize;
        start <= pc && pc < start + self.length as usize
    }
}

impl Attribute {
    /// Parse one attribute, decoding known bodies by pool name.
    pub fn parse(r: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<Self, ClassFileError> {
        let name_index = r.u16()?;
        let length = r.u32()? as usize;
        let body = r.bytes(length)?;
        let name = pool.utf8(name_index).unwrap_or("");
        let info = match name {
            "Code" => AttributeInfo::Code(CodeAttribute::parse(&mut ByteReader::new(body), pool)?),
            "LineNumberTable" => {
                let mut br = ByteReader::new(body);
                let count = br.u16()?;
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    entries.push(LineNumberEntry {
                        start_pc: br.u16()?,
                        line: br.u16()?,
                    });
                }
                AttributeInfo::LineNumberTable(entries)
            }
            "LocalVariableTable" => {
                let mut br = ByteReader::new(body);
                let count = br.u16()?;
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    entries.push(LocalVariableEntry {
                        start_pc: br.u16()?,
                        length: br.u16()?,
                        name_index: br.u16()?,
                        descriptor_index: br.u16()?,
                        index: br.u16()?,
                    });
                }
                AttributeInfo::LocalVariableTable(entries)
            }
            _ => AttributeInfo::Raw(body.to_vec()),
        };
        Ok(Self { name_index, info })
    }

    /// Emit the attribute including its length word.
    pub fn emit(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.name_index.to_be_bytes());
        let mut body = Vec::new();
        match &self.info {
            AttributeInfo::Code(code) => code.emit(&mut body),
            AttributeInfo::LineNumberTable(entries) => {
                body.extend_from_slice(&(entries.len() as u16).to_be_bytes());
                for e in entries {
                    body.extend_from_slice(&e.start_pc.to_be_bytes());
                    body.extend_from_slice(&e.line.to_be_bytes());
                }
            }
            AttributeInfo::LocalVariableTable(entries) => {
                body.extend_from_slice(&(entries.len() as u16).to_be_bytes());
                for e in entries {
                    body.extend_from_slice(&e.start_pc.to_be_bytes());
                    body.extend_from_slice(&e.length.to_be_bytes());
                    body.extend_from_slice(&e.name_index.to_be_bytes());
                    body.extend_from_slice(&e.descriptor_index.to_be_bytes());
                    body.extend_from_slice(&e.index.to_be_bytes());
                }
            }
            AttributeInfo::Raw(bytes) => body.extend_from_slice(bytes),
        }
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
    }
}

impl CodeAttribute {
    fn parse(r: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<Self, ClassFileError> {
        let max_stack = r.u16()?;
        let max_locals = r.u16()?;
        let code_length = r.u32()? as usize;
        let code = r.bytes(code_length)?.to_vec();
        let handler_count = r.u16()?;
        let mut exception_table = Vec::with_capacity(handler_count as usize);
        for _ in 0..handler_count {
            exception_table.push(ExceptionHandler {
                start_pc: r.u16()?,
                end_pc: r.u16()?,
                handler_pc: r.u16()?,
                catch_type: r.u16()?,
            });
        }
        let attr_count = r.u16()?;
        let mut attributes = Vec::with_capacity(attr_count as usize);
        for _ in 0..attr_count {
            attributes.push(Attribute::parse(r, pool)?);
        }
        Ok(Self {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }

    fn emit(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.max_stack.to_be_bytes());
        out.extend_from_slice(&self.max_locals.to_be_bytes());
        out.extend_from_slice(&(self.code.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.code);
        out.extend_from_slice(&(self.exception_table.len() as u16).to_be_bytes());
        for h in &self.exception_table {
            out.extend_from_slice(&h.start_pc.to_be_bytes());
            out.extend_from_slice(&h.end_pc.to_be_bytes());
            out.extend_from_slice(&h.handler_pc.to_be_bytes());
            out.extend_from_slice(&h.catch_type.to_be_bytes());
        }
        out.extend_from_slice(&(self.attributes.len() as u16).to_be_bytes());
        for a in &self.attributes {
            a.emit(out);
        }
    }

    /// Line-number entries, when the method carries a table.
    pub fn line_number_table(&self) -> Option<&[LineNumberEntry]> {
        self.attributes.iter().find_map(|a| match &a.info {
            AttributeInfo::LineNumberTable(entries) => Some(entries.as_slice()),
            _ => None,
        })
    }

    /// Local-variable entries, when the method carries a table.
    pub fn local_variable_table(&self) -> Option<&[LocalVariableEntry]> {
        self.attributes.iter().find_map(|a| match &a.info {
            AttributeInfo::LocalVariableTable(entries) => Some(entries.as_slice()),
            _ => None,
        })
    }

    /// Source line of the instruction at `offset`: the row with the greatest
    /// `start_pc` not beyond the offset.
    pub fn line_for_offset(&self, offset: usize) -> Option<u16> {
        let table = self.line_number_table()?;
        table
            .iter()
            .filter(|e| e.start_pc as usize <= offset)
            .max_by_key(|e| e.start_pc)
            .map(|e| e.line)
    }
}

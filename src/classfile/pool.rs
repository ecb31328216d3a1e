//! Constant pool model and codec.

use super::{ByteReader, ClassFileError};

/// Constant pool tags accepted by the codec.
#[allow(missing_docs)]
pub mod tag {
    pub const UTF8: u8 = 1;
    pub const INTEGER: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const DOUBLE: u8 = 6;
    pub const CLASS: u8 = 7;
    pub const STRING: u8 = 8;
    pub const FIELD_REF: u8 = 9;
    pub const METHOD_REF: u8 = 10;
    pub const INTERFACE_METHOD_REF: u8 = 11;
    pub const NAME_AND_TYPE: u8 = 12;
}

/// One constant pool entry. `Utf8` keeps the raw modified-UTF-8 bytes so
/// emission is byte-identical even for inputs outside valid UTF-8. `Float`
/// and `Double` keep raw bits for the same reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    /// Raw modified-UTF-8 bytes.
    Utf8(Vec<u8>),
    /// 32-bit integer constant.
    Integer(i32),
    /// 32-bit float constant, stored as raw bits.
    Float(u32),
    /// 64-bit integer constant. Occupies two pool slots.
    Long(i64),
    /// 64-bit float constant, stored as raw bits. Occupies two pool slots.
    Double(u64),
    /// Class reference pointing at a `Utf8` internal name.
    Class {
        /// Index of the `Utf8` holding the internal class name.
        name_index: u16,
    },
    /// String constant pointing at a `Utf8` entry.
    String {
        /// Index of the `Utf8` holding the string bytes.
        utf8_index: u16,
    },
    /// Field reference.
    FieldRef {
        /// Index of the owning `Class` entry.
        class_index: u16,
        /// Index of the `NameAndType` entry.
        name_and_type_index: u16,
    },
    /// Method reference.
    MethodRef {
        /// Index of the owning `Class` entry.
        class_index: u16,
        /// Index of the `NameAndType` entry.
        name_and_type_index: u16,
    },
    /// Interface method reference.
    InterfaceMethodRef {
        /// Index of the owning `Class` entry.
        class_index: u16,
        /// Index of the `NameAndType` entry.
        name_and_type_index: u16,
    },
    /// Name and descriptor pair.
    NameAndType {
        /// Index of the `Utf8` holding the simple name.
        name_index: u16,
        /// Index of the `Utf8` holding the descriptor.
        descriptor_index: u16,
    },
    /// Second slot of a `Long` or `Double` entry. Never emitted.
    Unusable,
}

impl Constant {
    fn slots(&self) -> u16 {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

/// The constant pool, indexed from 1 as in the binary format.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    /// Parse `count - 1` slots from the reader.
    pub fn parse(r: &mut ByteReader<'_>) -> Result<Self, ClassFileError> {
        let count = r.u16()?;
        let mut entries = Vec::with_capacity(count.saturating_sub(1) as usize);
        let mut index: u16 = 1;
        while index < count {
            let tag = r.u8()?;
            let constant = match tag {
                tag::UTF8 => {
                    let len = r.u16()? as usize;
                    Constant::Utf8(r.bytes(len)?.to_vec())
                }
                tag::INTEGER => Constant::Integer(r.u32()? as i32),
                tag::FLOAT => Constant::Float(r.u32()?),
                tag::LONG => Constant::Long(r.u64()? as i64),
                tag::DOUBLE => Constant::Double(r.u64()?),
                tag::CLASS => Constant::Class { name_index: r.u16()? },
                tag::STRING => Constant::String { utf8_index: r.u16()? },
                tag::FIELD_REF => Constant::FieldRef {
                    class_index: r.u16()?,
                    name_and_type_index: r.u16()?,
                },
                tag::METHOD_REF => Constant::MethodRef {
                    class_index: r.u16()?,
                    name_and_type_index: r.u16()?,
                },
                tag::INTERFACE_METHOD_REF => Constant::InterfaceMethodRef {
                    class_index: r.u16()?,
                    name_and_type_index: r.u16()?,
                },
                tag::NAME_AND_TYPE => Constant::NameAndType {
                    name_index: r.u16()?,
                    descriptor_index: r.u16()?,
                },
                other => return Err(ClassFileError::UnsupportedTag { tag: other, index }),
            };
            let slots = constant.slots();
            entries.push(constant);
            if slots == 2 {
                entries.push(Constant::Unusable);
            }
            index += slots;
        }
        Ok(Self { entries })
    }

    /// Emit the pool including its count word.
    pub fn emit(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.entries.len() as u16 + 1).to_be_bytes());
        for entry in &self.entries {
            match entry {
                Constant::Utf8(bytes) => {
                    out.push(tag::UTF8);
                    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
                    out.extend_from_slice(bytes);
                }
                Constant::Integer(v) => {
                    out.push(tag::INTEGER);
                    out.extend_from_slice(&v.to_be_bytes());
                }
                Constant::Float(bits) => {
                    out.push(tag::FLOAT);
                    out.extend_from_slice(&bits.to_be_bytes());
                }
                Constant::Long(v) => {
                    out.push(tag::LONG);
                    out.extend_from_slice(&v.to_be_bytes());
                }
                Constant::Double(bits) => {
                    out.push(tag::DOUBLE);
                    out.extend_from_slice(&bits.to_be_bytes());
                }
                Constant::Class { name_index } => {
                    out.push(tag::CLASS);
                    out.extend_from_slice(&name_index.to_be_bytes());
                }
                Constant::String { utf8_index } => {
                    out.push(tag::STRING);
                    out.extend_from_slice(&utf8_index.to_be_bytes());
                }
                Constant::FieldRef {
                    class_index,
                    name_and_type_index,
                } => {
                    out.push(tag::FIELD_REF);
                    out.extend_from_slice(&class_index.to_be_bytes());
                    out.extend_from_slice(&name_and_type_index.to_be_bytes());
                }
                Constant::MethodRef {
                    class_index,
                    name_and_type_index,
                } => {
                    out.push(tag::METHOD_REF);
                    out.extend_from_slice(&class_index.to_be_bytes());
                    out.extend_from_slice(&name_and_type_index.to_be_bytes());
                }
                Constant::InterfaceMethodRef {
                    class_index,
                    name_and_type_index,
                } => {
                    out.push(tag::INTERFACE_METHOD_REF);
                    out.extend_from_slice(&class_index.to_be_bytes());
                    out.extend_from_slice(&name_and_type_index.to_be_bytes());
                }
                Constant::NameAndType {
                    name_index,
                    descriptor_index,
                } => {
                    out.push(tag::NAME_AND_TYPE);
                    out.extend_from_slice(&name_index.to_be_bytes());
                    out.extend_from_slice(&descriptor_index.to_be_bytes());
                }
                Constant::Unusable => {}
            }
        }
    }

    /// Entry at a 1-based index.
    pub fn get(&self, index: u16) -> Result<&Constant, ClassFileError> {
        if index == 0 {
            return Err(ClassFileError::BadPoolIndex { index });
        }
        self.entries
            .get(index as usize - 1)
            .ok_or(ClassFileError::BadPoolIndex { index })
    }

    /// Mutable entry at a 1-based index.
    pub fn get_mut(&mut self, index: u16) -> Result<&mut Constant, ClassFileError> {
        if index == 0 {
            return Err(ClassFileError::BadPoolIndex { index });
        }
        self.entries
            .get_mut(index as usize - 1)
            .ok_or(ClassFileError::BadPoolIndex { index })
    }

    /// The `Utf8` entry at `index` as a string slice, when it is valid UTF-8.
    pub fn utf8(&self, index: u16) -> Result<&str, ClassFileError> {
        match self.get(index)? {
            Constant::Utf8(bytes) => std::str::from_utf8(bytes).map_err(|_| {
                ClassFileError::WrongConstant {
                    index,
                    expected: "utf8 text",
                }
            }),
            _ => Err(ClassFileError::WrongConstant {
                index,
                expected: "Utf8",
            }),
        }
    }

    /// Class name (internal form) of a `Class` entry.
    pub fn class_name(&self, index: u16) -> Result<&str, ClassFileError> {
        match self.get(index)? {
            Constant::Class { name_index } => self.utf8(*name_index),
            _ => Err(ClassFileError::WrongConstant {
                index,
                expected: "Class",
            }),
        }
    }

    /// Simple name of the member referenced by a field/method ref entry.
    pub fn member_name(&self, index: u16) -> Result<&str, ClassFileError> {
        let name_and_type = match self.get(index)? {
            Constant::FieldRef {
                name_and_type_index,
                ..
            }
            | Constant::MethodRef {
                name_and_type_index,
                ..
            }
            | Constant::InterfaceMethodRef {
                name_and_type_index,
                ..
            } => *name_and_type_index,
            _ => {
                return Err(ClassFileError::WrongConstant {
                    index,
                    expected: "member reference",
                })
            }
        };
        match self.get(name_and_type)? {
            Constant::NameAndType { name_index, .. } => self.utf8(*name_index),
            _ => Err(ClassFileError::WrongConstant {
                index: name_and_type,
                expected: "NameAndType",
            }),
        }
    }

    /// Append a constant and return its 1-based index. `Long` and `Double`
    /// take the following slot as well; no existing slot moves.
    pub fn push(&mut self, constant: Constant) -> u16 {
        let index = self.entries.len() as u16 + 1;
        let slots = constant.slots();
        self.entries.push(constant);
        if slots == 2 {
            self.entries.push(Constant::Unusable);
        }
        index
    }

    /// Number of occupied slots (the binary count word minus one).
    pub fn slot_count(&self) -> u16 {
        self.entries.len() as u16
    }

    /// Iterate `(index, entry)` over real entries, skipping `Unusable` slots.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, c)| !matches!(c, Constant::Unusable))
            .map(|(i, c)| (i as u16 + 1, c))
    }
}

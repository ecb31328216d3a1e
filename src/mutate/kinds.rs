//! Mutation kinds and their opcode pairings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::classfile::opcode::*;

/// The closed set of mutation kinds. Declaration order is the tie-break
/// order when several kinds apply at one bytecode offset, so enumeration is
/// deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationKind {
    /// Flip a conditional branch predicate.
    NegateConditional,
    /// Swap an arithmetic operator for its counterpart.
    SwapArith,
    /// Negate the constant of an in-place local increment.
    Increments,
    /// Alter the value produced immediately before a return.
    ReturnValues,
    /// Perturb a small integer literal in the instruction stream.
    InlineConstants,
    /// Perturb a pool constant referenced only by the mutated method.
    ConstantPool,
    /// Swap switch case targets or redirect the default.
    Switch,
    /// Redirect a local store to an adjacent local of the same type.
    Stores,
}

impl MutationKind {
    /// All kinds, in tie-break order.
    pub const ALL: [MutationKind; 8] = [
        MutationKind::NegateConditional,
        MutationKind::SwapArith,
        MutationKind::Increments,
        MutationKind::ReturnValues,
        MutationKind::InlineConstants,
        MutationKind::ConstantPool,
        MutationKind::Switch,
        MutationKind::Stores,
    ];

    /// Stable name used on the wire and in CLI flags.
    pub fn name(self) -> &'static str {
        match self {
            MutationKind::NegateConditional => "negate-conditional",
            MutationKind::SwapArith => "swap-arith",
            MutationKind::Increments => "increments",
            MutationKind::ReturnValues => "return-values",
            MutationKind::InlineConstants => "inline-constants",
            MutationKind::ConstantPool => "constant-pool",
            MutationKind::Switch => "switch",
            MutationKind::Stores => "stores",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MutationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MutationKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| format!("unknown mutation kind: {s}"))
    }
}

/// A set of enabled mutation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindSet(u8);

impl KindSet {
    /// The empty set.
    pub fn empty() -> Self {
        Self(0)
    }

    /// Every kind enabled.
    pub fn all() -> Self {
        let mut set = Self::empty();
        for kind in MutationKind::ALL {
            set.insert(kind);
        }
        set
    }

    /// The baseline set: `negate-conditional` and `swap-arith`. These two
    /// are always on regardless of flags.
    pub fn baseline() -> Self {
        let mut set = Self::empty();
        set.insert(MutationKind::NegateConditional);
        set.insert(MutationKind::SwapArith);
        set
    }

    /// Enable a kind.
    pub fn insert(&mut self, kind: MutationKind) {
        self.0 |= 1 << kind as u8;
    }

    /// Whether a kind is enabled.
    pub fn contains(self, kind: MutationKind) -> bool {
        self.0 & (1 << kind as u8) != 0
    }

    /// Enabled kinds in tie-break order.
    pub fn iter(self) -> impl Iterator<Item = MutationKind> {
        MutationKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }
}

impl Default for KindSet {
    fn default() -> Self {
        Self::baseline()
    }
}

impl fmt::Display for KindSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(MutationKind::name).collect();
        f.write_str(&names.join(","))
    }
}

impl FromStr for KindSet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = Self::empty();
        for token in s.split(',').filter(|t| !t.is_empty()) {
            set.insert(token.parse()?);
        }
        Ok(set)
    }
}

/// Logical inverse of a conditional branch opcode. Branch operands are
/// untouched, so the rewrite is always equal-length.
pub fn conditional_inverse(op: u8) -> Option<u8> {
    Some(match op {
        IFEQ => IFNE,
        IFNE => IFEQ,
        IFLT => IFGE,
        IFGE => IFLT,
        IFGT => IFLE,
        IFLE => IFGT,
        IF_ICMPEQ => IF_ICMPNE,
        IF_ICMPNE => IF_ICMPEQ,
        IF_ICMPLT => IF_ICMPGE,
        IF_ICMPGE => IF_ICMPLT,
        IF_ICMPGT => IF_ICMPLE,
        IF_ICMPLE => IF_ICMPGT,
        IF_ACMPEQ => IF_ACMPNE,
        IF_ACMPNE => IF_ACMPEQ,
        IFNULL => IFNONNULL,
        IFNONNULL => IFNULL,
        _ => return None,
    })
}

/// Counterpart of an arithmetic opcode. Where an opcode belongs to more than
/// one pair, the listed counterpart wins so enumeration stays deterministic:
/// `+↔−`, `×↔÷`, `%→×`, `shl↔shr`, `ushr→shl`, `&→|`, `|→^`, `^→|`.
pub fn arith_counterpart(op: u8) -> Option<u8> {
    Some(match op {
        IADD => ISUB,
        LADD => LSUB,
        FADD => FSUB,
        DADD => DSUB,
        ISUB => IADD,
        LSUB => LADD,
        FSUB => FADD,
        DSUB => DADD,
        IMUL => IDIV,
        LMUL => LDIV,
        FMUL => FDIV,
        DMUL => DDIV,
        IDIV => IMUL,
        LDIV => LMUL,
        FDIV => FMUL,
        DDIV => DMUL,
        IREM => IMUL,
        LREM => LMUL,
        FREM => FMUL,
        DREM => DMUL,
        ISHL => ISHR,
        LSHL => LSHR,
        ISHR => ISHL,
        LSHR => LSHL,
        IUSHR => ISHL,
        LUSHR => LSHL,
        IAND => IOR,
        LAND => LOR,
        IOR => IXOR,
        LOR => LXOR,
        IXOR => IOR,
        LXOR => LOR,
        _ => return None,
    })
}

/// Perturb a small signed value: `0 → 1`, otherwise negate, wrapping at the
/// representable edge.
pub fn perturb_i8(value: i8) -> i8 {
    if value == 0 {
        1
    } else {
        value.checked_neg().unwrap_or_else(|| value.wrapping_add(1))
    }
}

/// As [`perturb_i8`] for 16-bit operands.
pub fn perturb_i16(value: i16) -> i16 {
    if value == 0 {
        1
    } else {
        value.checked_neg().unwrap_or_else(|| value.wrapping_add(1))
    }
}

/// Replacement for an inline integer constant instruction starting at
/// `code[offset]`, with the old and new values for the description. `n → n+1`
/// with `0 ↔ 1` and wrap-around at the top of each family's range.
pub fn inline_constant_replacement(code: &[u8], offset: usize) -> Option<(Vec<u8>, i32, i32)> {
    let op = *code.get(offset)?;
    match op {
        ICONST_M1..=ICONST_5 => {
            let value = op as i32 - ICONST_0 as i32;
            let next = match value {
                0 => 1,
                1 => 0,
                5 => -1, // wrap within the iconst family
                n => n + 1,
            };
            let new_op = (next + ICONST_0 as i32) as u8;
            Some((vec![new_op], value, next))
        }
        BIPUSH => {
            let value = *code.get(offset + 1)? as i8;
            let next = match value {
                0 => 1,
                1 => 0,
                n => n.wrapping_add(1),
            };
            Some((vec![BIPUSH, next as u8], value as i32, next as i32))
        }
        SIPUSH => {
            let hi = *code.get(offset + 1)?;
            let lo = *code.get(offset + 2)?;
            let value = i16::from_be_bytes([hi, lo]);
            let next = match value {
                0 => 1,
                1 => 0,
                n => n.wrapping_add(1),
            };
            let bytes = next.to_be_bytes();
            Some((vec![SIPUSH, bytes[0], bytes[1]], value as i32, next as i32))
        }
        _ => None,
    }
}

/// Stack category of a field descriptor, aligned with the store opcode
/// families: `I` covers the small integer types.
pub fn descriptor_category(descriptor: &str) -> Option<char> {
    match descriptor.chars().next()? {
        'I' | 'Z' | 'B' | 'C' | 'S' => Some('I'),
        'J' => Some('J'),
        'F' => Some('F'),
        'D' => Some('D'),
        'L' | '[' => Some('A'),
        _ => None,
    }
}

//! Mutation-point enumeration and application.
//!
//! A mutation point is `(method, bytecode offset, kind)`. Enumeration walks
//! methods in declaration order, offsets ascending, kinds in
//! [`MutationKind::ALL`] order, so the ordinal of every point is stable for
//! unchanged class bytes. Counting and applying share one walk, which is
//! what makes restarts at `--first-mutation` sound.

pub mod kinds;

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::classfile::opcode::{self, *};
use crate::classfile::{ClassFile, ClassFileError, CodeAttribute, Constant, ACC_STATIC, ACC_SYNTHETIC};

pub use kinds::{KindSet, MutationKind};

/// Method names never mutated unless the caller overrides the exclusion set.
pub const DEFAULT_EXCLUDED_METHODS: &[&str] = &["main", "integrity"];

/// Mutation failures. Malformed class bytes are fatal for the target.
#[derive(Debug, Error)]
pub enum MutateError {
    /// The class bytes did not parse or re-emit.
    #[error("malformed class bytes: {0}")]
    ClassFile(#[from] ClassFileError),
}

/// One applied mutation: the rewritten class image plus everything a
/// listener needs to describe it.
#[derive(Debug, Clone)]
pub struct Mutation {
    /// Ordinal of the mutation point.
    pub index: usize,
    /// The mutated class image.
    pub bytes: Vec<u8>,
    /// Dotted name of the mutated class.
    pub class_name: String,
    /// Name of the mutated method.
    pub method: String,
    /// Descriptor of the mutated method.
    pub descriptor: String,
    /// Bytecode offset of the mutation point.
    pub offset: usize,
    /// Source line, when the method carries a line-number table.
    pub line: Option<u16>,
    /// The kind that produced this mutation.
    pub kind: MutationKind,
    /// Human-readable description of the edit.
    pub description: String,
}

impl Mutation {
    /// `Class.method:line` location string, falling back to the bytecode
    /// offset when no line table exists.
    pub fn location(&self) -> String {
        match self.line {
            Some(line) => format!("{}.{}:{}", self.class_name, self.method, line),
            None => format!("{}.{}@{}", self.class_name, self.method, self.offset),
        }
    }
}

#[derive(Debug)]
enum EditOp {
    Code { offset: usize, bytes: Vec<u8> },
    PoolBump { index: u16 },
    PoolEmptyString { index: u16 },
}

#[derive(Debug)]
struct Candidate {
    kind: MutationKind,
    offset: usize,
    description: String,
    op: EditOp,
}

struct Hit {
    method_index: usize,
    candidate: Candidate,
}

struct Scan {
    count: usize,
    hit: Option<Hit>,
}

struct InsnCtx<'a> {
    class: &'a ClassFile,
    code: &'a CodeAttribute,
    offset: usize,
    len: usize,
    prev: Option<(usize, usize)>,
    ldc_first_exclusive_ref: Option<u16>,
    instance_method: bool,
}

/// Enumerates and applies bytecode mutations for one class image.
#[derive(Debug, Clone)]
pub struct Mutater {
    kinds: KindSet,
    excluded: BTreeSet<String>,
}

impl Mutater {
    /// A mutater for the given kinds with the default method exclusions.
    pub fn new(kinds: KindSet) -> Self {
        Self {
            kinds,
            excluded: DEFAULT_EXCLUDED_METHODS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Add method names to the exclusion set.
    pub fn with_excluded<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded.extend(methods.into_iter().map(Into::into));
        self
    }

    /// Total number of mutation points in the class.
    pub fn count_points(&self, bytes: &[u8]) -> Result<usize, MutateError> {
        let class = ClassFile::parse(bytes)?;
        Ok(self.scan(&class, None)?.count)
    }

    /// Apply the mutation at `index`. Returns `None` when `index` is past
    /// the last point, which is how callers learn enumeration has ended.
    pub fn mutate(&self, bytes: &[u8], index: usize) -> Result<Option<Mutation>, MutateError> {
        let mut class = ClassFile::parse(bytes)?;
        let scan = self.scan(&class, Some(index))?;
        let Some(hit) = scan.hit else {
            return Ok(None);
        };

        let class_name = class.class_name()?.replace('/', ".");
        let method = class.method_name(hit.method_index)?.to_string();
        let descriptor = class.method_descriptor(hit.method_index)?.to_string();
        let line = class.methods[hit.method_index]
            .code()
            .and_then(|c| c.line_for_offset(hit.candidate.offset));

        match &hit.candidate.op {
            EditOp::Code { offset, bytes } => {
                class.replace_instruction(hit.method_index, *offset, bytes)?;
            }
            EditOp::PoolBump { index } => bump_pool_constant(&mut class, *index)?,
            EditOp::PoolEmptyString { index } => {
                let empty = class.pool.push(Constant::Utf8(Vec::new()));
                match class.pool.get_mut(*index)? {
                    Constant::String { utf8_index } => *utf8_index = empty,
                    _ => {
                        return Err(ClassFileError::WrongConstant {
                            index: *index,
                            expected: "String",
                        }
                        .into())
                    }
                }
            }
        }

        Ok(Some(Mutation {
            index,
            bytes: class.emit(),
            class_name,
            method,
            descriptor,
            offset: hit.candidate.offset,
            line,
            kind: hit.candidate.kind,
            description: hit.candidate.description,
        }))
    }

    fn scan(&self, class: &ClassFile, stop: Option<usize>) -> Result<Scan, MutateError> {
        let pool_refs = pool_references_by_method(class)?;
        let mut ordinal = 0usize;

        for (method_index, method) in class.methods.iter().enumerate() {
            let name = class.pool.utf8(method.name_index)?;
            if method.access_flags & ACC_SYNTHETIC != 0 || self.excluded.contains(name) {
                continue;
            }
            let Some(code) = method.code() else { continue };
            let instance_method = method.access_flags & ACC_STATIC == 0;
            let guarded = assertion_guard_ranges(class, code)?;
            let mut seen_pool: BTreeSet<u16> = BTreeSet::new();
            let mut prev: Option<(usize, usize)> = None;
            let mut offset = 0usize;

            while offset < code.code.len() {
                let len = opcode::instruction_len(&code.code, offset)?;
                if offset + len > code.code.len() {
                    return Err(ClassFileError::Truncated { at: offset }.into());
                }

                // Pool references are consumed even inside assertion guards
                // so a guarded first reference never resurfaces later as a
                // constant-pool point.
                let ldc_first_exclusive_ref = ldc_pool_index(&code.code, offset)
                    .filter(|ix| seen_pool.insert(*ix))
                    .filter(|ix| {
                        pool_refs
                            .get(ix)
                            .is_some_and(|methods| methods.len() == 1)
                    });

                let in_guard = guarded.iter().any(|&(s, e)| offset >= s && offset < e);
                if !in_guard {
                    let ctx = InsnCtx {
                        class,
                        code,
                        offset,
                        len,
                        prev,
                        ldc_first_exclusive_ref,
                        instance_method,
                    };
                    for kind in self.kinds.iter() {
                        if let Some(candidate) = candidate(kind, &ctx) {
                            if stop == Some(ordinal) {
                                return Ok(Scan {
                                    count: ordinal,
                                    hit: Some(Hit {
                                        method_index,
                                        candidate,
                                    }),
                                });
                            }
                            ordinal += 1;
                        }
                    }
                }

                prev = Some((offset, len));
                offset += len;
            }
        }

        Ok(Scan {
            count: ordinal,
            hit: None,
        })
    }
}

fn candidate(kind: MutationKind, ctx: &InsnCtx<'_>) -> Option<Candidate> {
    let code = &ctx.code.code;
    let op = code[ctx.offset];
    match kind {
        MutationKind::NegateConditional => {
            let inverse = kinds::conditional_inverse(op)?;
            let mut bytes = code[ctx.offset..ctx.offset + 3].to_vec();
            bytes[0] = inverse;
            Some(Candidate {
                kind,
                offset: ctx.offset,
                description: format!(
                    "negated conditional ({} -> {})",
                    mnemonic(op),
                    mnemonic(inverse)
                ),
                op: EditOp::Code {
                    offset: ctx.offset,
                    bytes,
                },
            })
        }
        MutationKind::SwapArith => {
            let counterpart = kinds::arith_counterpart(op)?;
            Some(Candidate {
                kind,
                offset: ctx.offset,
                description: format!(
                    "changed arithmetic operator ({} -> {})",
                    mnemonic(op),
                    mnemonic(counterpart)
                ),
                op: EditOp::Code {
                    offset: ctx.offset,
                    bytes: vec![counterpart],
                },
            })
        }
        MutationKind::Increments => {
            if op != IINC {
                return None;
            }
            let amount = code[ctx.offset + 2] as i8;
            if amount == 0 || amount == i8::MIN {
                return None;
            }
            Some(Candidate {
                kind,
                offset: ctx.offset,
                description: format!("negated increment ({} -> {})", amount, -amount),
                op: EditOp::Code {
                    offset: ctx.offset,
                    bytes: vec![IINC, code[ctx.offset + 1], (-amount) as u8],
                },
            })
        }
        MutationKind::ReturnValues => {
            if !(IRETURN..=ARETURN).contains(&op) {
                return None;
            }
            let (prev_offset, prev_len) = ctx.prev?;
            let prev_bytes = &code[prev_offset..prev_offset + prev_len];
            let (bytes, description) = return_value_replacement(prev_bytes, op)?;
            Some(Candidate {
                kind,
                offset: ctx.offset,
                description,
                op: EditOp::Code {
                    offset: prev_offset,
                    bytes,
                },
            })
        }
        MutationKind::InlineConstants => {
            let (bytes, old, new) = kinds::inline_constant_replacement(code, ctx.offset)?;
            Some(Candidate {
                kind,
                offset: ctx.offset,
                description: format!("changed inline constant ({old} -> {new})"),
                op: EditOp::Code {
                    offset: ctx.offset,
                    bytes,
                },
            })
        }
        MutationKind::ConstantPool => {
            // The null literal has no pool slot; the non-null stand-in is
            // the receiver, so only instance methods qualify under the
            // equal-length constraint.
            if op == ACONST_NULL {
                if !ctx.instance_method {
                    return None;
                }
                return Some(Candidate {
                    kind,
                    offset: ctx.offset,
                    description: format!(
                        "replaced null with a non-null reference ({} -> {})",
                        mnemonic(ACONST_NULL),
                        mnemonic(ALOAD_0)
                    ),
                    op: EditOp::Code {
                        offset: ctx.offset,
                        bytes: vec![ALOAD_0],
                    },
                });
            }
            let index = ctx.ldc_first_exclusive_ref?;
            match ctx.class.pool.get(index).ok()? {
                Constant::Integer(n) => Some(Candidate {
                    kind,
                    offset: ctx.offset,
                    description: format!("changed pool integer ({n} -> {})", n.wrapping_add(1)),
                    op: EditOp::PoolBump { index },
                }),
                Constant::Long(n) => Some(Candidate {
                    kind,
                    offset: ctx.offset,
                    description: format!("changed pool long ({n} -> {})", n.wrapping_add(1)),
                    op: EditOp::PoolBump { index },
                }),
                Constant::Float(bits) => {
                    let value = f32::from_bits(*bits);
                    Some(Candidate {
                        kind,
                        offset: ctx.offset,
                        description: format!("changed pool float ({value} -> {})", value + 1.0),
                        op: EditOp::PoolBump { index },
                    })
                }
                Constant::Double(bits) => {
                    let value = f64::from_bits(*bits);
                    Some(Candidate {
                        kind,
                        offset: ctx.offset,
                        description: format!("changed pool double ({value} -> {})", value + 1.0),
                        op: EditOp::PoolBump { index },
                    })
                }
                Constant::String { utf8_index } => {
                    let text = ctx.class.pool.utf8(*utf8_index).unwrap_or("<binary>");
                    let shown: String = text.chars().take(20).collect();
                    Some(Candidate {
                        kind,
                        offset: ctx.offset,
                        description: format!("replaced string constant \"{shown}\" with \"\""),
                        op: EditOp::PoolEmptyString { index },
                    })
                }
                _ => None,
            }
        }
        MutationKind::Switch => switch_candidate(ctx),
        MutationKind::Stores => store_candidate(ctx),
    }
}

fn return_value_replacement(prev: &[u8], return_op: u8) -> Option<(Vec<u8>, String)> {
    let producer = prev[0];
    let describe = |bytes: &[u8]| {
        format!(
            "changed return value ({} -> {})",
            mnemonic(producer),
            mnemonic(bytes[0])
        )
    };
    match return_op {
        IRETURN => match producer {
            ICONST_0 => {
                let bytes = vec![ICONST_1];
                let desc = describe(&bytes);
                Some((bytes, desc))
            }
            ICONST_M1..=ICONST_5 | ILOAD_0..=ILOAD_3 => {
                let bytes = vec![ICONST_0];
                let desc = describe(&bytes);
                Some((bytes, desc))
            }
            BIPUSH => {
                let old = prev[1] as i8;
                let new = kinds::perturb_i8(old);
                Some((
                    vec![BIPUSH, new as u8],
                    format!("changed return value (bipush {old} -> bipush {new})"),
                ))
            }
            SIPUSH => {
                let old = i16::from_be_bytes([prev[1], prev[2]]);
                let new = kinds::perturb_i16(old);
                let be = new.to_be_bytes();
                Some((
                    vec![SIPUSH, be[0], be[1]],
                    format!("changed return value (sipush {old} -> sipush {new})"),
                ))
            }
            _ => None,
        },
        LRETURN => {
            let replacement = match producer {
                LCONST_0 => LCONST_1,
                LCONST_1 | LLOAD_0..=LLOAD_3 => LCONST_0,
                _ => return None,
            };
            let bytes = vec![replacement];
            let desc = describe(&bytes);
            Some((bytes, desc))
        }
        FRETURN => {
            let replacement = match producer {
                FCONST_0 => FCONST_1,
                FCONST_1 | FCONST_2 | FLOAD_0..=FLOAD_3 => FCONST_0,
                _ => return None,
            };
            let bytes = vec![replacement];
            let desc = describe(&bytes);
            Some((bytes, desc))
        }
        DRETURN => {
            let replacement = match producer {
                DCONST_0 => DCONST_1,
                DCONST_1 | DLOAD_0..=DLOAD_3 => DCONST_0,
                _ => return None,
            };
            let bytes = vec![replacement];
            let desc = describe(&bytes);
            Some((bytes, desc))
        }
        ARETURN => match producer {
            ALOAD_0..=ALOAD_3 => {
                let bytes = vec![ACONST_NULL];
                let desc = describe(&bytes);
                Some((bytes, desc))
            }
            _ => None,
        },
        _ => None,
    }
}

struct SwitchLayout {
    // Positions are relative to the start of the instruction.
    default_pos: usize,
    target_positions: Vec<usize>,
}

fn switch_layout(code: &[u8], offset: usize) -> Option<SwitchLayout> {
    let pad = opcode::switch_pad(offset);
    let base = 1 + pad;
    match code[offset] {
        TABLESWITCH => {
            let lo = read_i32_at(code, offset + base + 4)?;
            let hi = read_i32_at(code, offset + base + 8)?;
            let cases = (hi as i64 - lo as i64 + 1).max(0) as usize;
            Some(SwitchLayout {
                default_pos: base,
                target_positions: (0..cases).map(|k| base + 12 + k * 4).collect(),
            })
        }
        LOOKUPSWITCH => {
            let npairs = read_i32_at(code, offset + base + 4)?.max(0) as usize;
            Some(SwitchLayout {
                default_pos: base,
                target_positions: (0..npairs).map(|k| base + 8 + k * 8 + 4).collect(),
            })
        }
        _ => None,
    }
}

fn switch_candidate(ctx: &InsnCtx<'_>) -> Option<Candidate> {
    let code = &ctx.code.code;
    let layout = switch_layout(code, ctx.offset)?;
    let mut instruction = code[ctx.offset..ctx.offset + ctx.len].to_vec();
    let target_at = |pos: usize| read_i32_at(&instruction, pos).unwrap_or(0);
    let targets: Vec<i32> = layout.target_positions.iter().map(|&p| target_at(p)).collect();

    // First adjacent pair with distinct targets, else redirect the default.
    if let Some(k) = (0..targets.len().saturating_sub(1)).find(|&k| targets[k] != targets[k + 1]) {
        let (a, b) = (layout.target_positions[k], layout.target_positions[k + 1]);
        let first = targets[k].to_be_bytes();
        let second = targets[k + 1].to_be_bytes();
        instruction[a..a + 4].copy_from_slice(&second);
        instruction[b..b + 4].copy_from_slice(&first);
        return Some(Candidate {
            kind: MutationKind::Switch,
            offset: ctx.offset,
            description: format!("swapped switch case targets {k} and {}", k + 1),
            op: EditOp::Code {
                offset: ctx.offset,
                bytes: instruction,
            },
        });
    }

    let first_case = *targets.first()?;
    let default = target_at(layout.default_pos);
    if default != first_case {
        instruction[layout.default_pos..layout.default_pos + 4]
            .copy_from_slice(&first_case.to_be_bytes());
        return Some(Candidate {
            kind: MutationKind::Switch,
            offset: ctx.offset,
            description: "redirected switch default to first case".to_string(),
            op: EditOp::Code {
                offset: ctx.offset,
                bytes: instruction,
            },
        });
    }
    None
}

fn store_candidate(ctx: &InsnCtx<'_>) -> Option<Candidate> {
    let code = &ctx.code.code;
    let op = code[ctx.offset];
    let (slot, category, short_form) = match op {
        ISTORE..=ASTORE => {
            let category = ['I', 'J', 'F', 'D', 'A'][(op - ISTORE) as usize];
            (code[ctx.offset + 1] as u16, category, false)
        }
        ISTORE_0..=ASTORE_3 => {
            let family = ((op - ISTORE_0) / 4) as usize;
            let category = ['I', 'J', 'F', 'D', 'A'][family];
            (((op - ISTORE_0) % 4) as u16, category, true)
        }
        _ => return None,
    };

    let step = if category == 'J' || category == 'D' { 2 } else { 1 };
    let neighbour = adjacent_store_slot(ctx, slot, category, step)?;

    let bytes = if short_form {
        if neighbour > 3 {
            return None; // no equal-length short form for that slot
        }
        let family = ((op - ISTORE_0) / 4) as u8;
        vec![ISTORE_0 + family * 4 + neighbour as u8]
    } else {
        if neighbour > u8::MAX as u16 {
            return None;
        }
        vec![op, neighbour as u8]
    };

    Some(Candidate {
        kind: MutationKind::Stores,
        offset: ctx.offset,
        description: format!("redirected store (local {slot} -> local {neighbour})"),
        op: EditOp::Code {
            offset: ctx.offset,
            bytes,
        },
    })
}

fn adjacent_store_slot(ctx: &InsnCtx<'_>, slot: u16, category: char, step: u16) -> Option<u16> {
    if let Some(table) = ctx.code.local_variable_table() {
        let mut live: Vec<u16> = table
            .iter()
            .filter(|e| e.index != slot && e.covers(ctx.offset))
            .filter(|e| {
                ctx.class
                    .pool
                    .utf8(e.descriptor_index)
                    .ok()
                    .and_then(kinds::descriptor_category)
                    == Some(category)
            })
            .map(|e| e.index)
            .collect();
        live.sort_unstable();
        live.iter()
            .copied()
            .find(|&i| i > slot)
            .or_else(|| live.iter().rev().copied().find(|&i| i < slot))
    } else {
        let max = ctx.code.max_locals;
        if slot + 2 * step <= max {
            Some(slot + step)
        } else if slot >= step {
            Some(slot - step)
        } else {
            None
        }
    }
}

fn bump_pool_constant(class: &mut ClassFile, index: u16) -> Result<(), ClassFileError> {
    match class.pool.get_mut(index)? {
        Constant::Integer(n) => *n = n.wrapping_add(1),
        Constant::Long(n) => *n = n.wrapping_add(1),
        Constant::Float(bits) => *bits = (f32::from_bits(*bits) + 1.0).to_bits(),
        Constant::Double(bits) => *bits = (f64::from_bits(*bits) + 1.0).to_bits(),
        _ => {
            return Err(ClassFileError::WrongConstant {
                index,
                expected: "numeric",
            })
        }
    }
    Ok(())
}

fn pool_references_by_method(
    class: &ClassFile,
) -> Result<BTreeMap<u16, BTreeSet<usize>>, ClassFileError> {
    let mut map: BTreeMap<u16, BTreeSet<usize>> = BTreeMap::new();
    for (method_index, method) in class.methods.iter().enumerate() {
        let Some(code) = method.code() else { continue };
        let mut offset = 0usize;
        while offset < code.code.len() {
            let len = opcode::instruction_len(&code.code, offset)?;
            if offset + len > code.code.len() {
                return Err(ClassFileError::Truncated { at: offset });
            }
            if let Some(index) = ldc_pool_index(&code.code, offset) {
                map.entry(index).or_default().insert(method_index);
            }
            offset += len;
        }
    }
    Ok(map)
}

fn ldc_pool_index(code: &[u8], offset: usize) -> Option<u16> {
    match code[offset] {
        LDC => code.get(offset + 1).map(|b| *b as u16),
        LDC_W | LDC2_W => Some(u16::from_be_bytes([
            *code.get(offset + 1)?,
            *code.get(offset + 2)?,
        ])),
        _ => None,
    }
}

fn read_i32_at(code: &[u8], at: usize) -> Option<i32> {
    let bytes: [u8; 4] = code.get(at..at + 4)?.try_into().ok()?;
    Some(i32::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::opcode;
    use crate::fixture::{assertion_class, calc_class, ClassBuilder};

    const ILOAD_1: u8 = 0x1b;
    const ISTORE_1: u8 = 0x3c;
    const ISTORE_2: u8 = 0x3d;

    fn all_kinds() -> Mutater {
        Mutater::new(KindSet::all())
    }

    #[test]
    fn baseline_kinds_find_only_the_conditional_and_the_add() {
        let bytes = calc_class();
        let mutater = Mutater::new(KindSet::baseline());
        assert_eq!(mutater.count_points(&bytes).unwrap(), 2);
    }

    #[test]
    fn enumeration_is_deterministic() {
        let bytes = calc_class();
        let mutater = all_kinds();
        let n = mutater.count_points(&bytes).unwrap();
        assert_eq!(mutater.count_points(&bytes).unwrap(), n);
        for index in 0..n {
            let first = mutater.mutate(&bytes, index).unwrap().unwrap();
            let again = mutater.mutate(&bytes, index).unwrap().unwrap();
            assert_eq!(first.description, again.description);
            assert_eq!(first.offset, again.offset);
            assert_eq!(first.bytes, again.bytes);
        }
    }

    #[test]
    fn every_mutation_preserves_image_length() {
        let bytes = calc_class();
        let mutater = all_kinds();
        let n = mutater.count_points(&bytes).unwrap();
        assert!(n >= 5);
        for index in 0..n {
            let mutation = mutater.mutate(&bytes, index).unwrap().unwrap();
            assert_eq!(mutation.bytes.len(), bytes.len(), "index {index}");
            assert_ne!(mutation.bytes, bytes, "index {index}");
        }
    }

    #[test]
    fn index_past_the_end_returns_none() {
        let bytes = calc_class();
        let mutater = all_kinds();
        let n = mutater.count_points(&bytes).unwrap();
        assert!(mutater.mutate(&bytes, n).unwrap().is_none());
        assert!(mutater.mutate(&bytes, n + 100).unwrap().is_none());
    }

    #[test]
    fn negated_conditional_flips_the_opcode_and_keeps_the_target() {
        let bytes = calc_class();
        let mutater = Mutater::new(KindSet::baseline());
        let mutation = mutater.mutate(&bytes, 0).unwrap().unwrap();
        assert_eq!(mutation.kind, MutationKind::NegateConditional);
        assert_eq!(mutation.method, "choose");
        assert_eq!(mutation.line, Some(11));
        assert!(mutation.description.contains("ifle -> ifgt"));

        let mutated = ClassFile::parse(&mutation.bytes).unwrap();
        let code = &mutated.methods[0].code().unwrap().code;
        assert_eq!(code[1], opcode::IFGT);
        assert_eq!(&code[2..4], &[0x00, 0x05]);
    }

    #[test]
    fn arithmetic_swap_targets_the_published_counterpart() {
        let bytes = calc_class();
        let mutater = Mutater::new(KindSet::baseline());
        let mutation = mutater.mutate(&bytes, 1).unwrap().unwrap();
        assert_eq!(mutation.kind, MutationKind::SwapArith);
        assert_eq!(mutation.method, "sum");
        let mutated = ClassFile::parse(&mutation.bytes).unwrap();
        assert_eq!(mutated.methods[1].code().unwrap().code[2], opcode::ISUB);
    }

    #[test]
    fn excluded_and_synthetic_methods_are_not_walked() {
        let mut b = ClassBuilder::new("fixture/Edge");
        b.method("main", "([Ljava/lang/String;)V", 1, vec![ILOAD_1, opcode::IFLE, 0, 4, opcode::RETURN]);
        b.method("integrity", "()I", 2, vec![opcode::ICONST_0, opcode::IRETURN]);
        b.method_flagged(
            "bridge$x",
            "()I",
            3,
            vec![opcode::ICONST_0, opcode::IRETURN],
            crate::classfile::ACC_SYNTHETIC,
        );
        let bytes = b.bytes();
        assert_eq!(all_kinds().count_points(&bytes).unwrap(), 0);
    }

    #[test]
    fn assertion_guard_suppresses_all_points() {
        let bytes = assertion_class();
        assert_eq!(all_kinds().count_points(&bytes).unwrap(), 0);
        assert_eq!(
            Mutater::new(KindSet::baseline())
                .count_points(&bytes)
                .unwrap(),
            0
        );
    }

    #[test]
    fn increment_negation_rewrites_the_operand_in_place() {
        let mut b = ClassBuilder::new("fixture/Inc");
        b.method("step", "()V", 7, vec![opcode::IINC, 1, 5, opcode::RETURN]);
        let bytes = b.bytes();
        let mutater = Mutater::new(KindSet::all());
        assert_eq!(mutater.count_points(&bytes).unwrap(), 1);
        let mutation = mutater.mutate(&bytes, 0).unwrap().unwrap();
        assert_eq!(mutation.kind, MutationKind::Increments);
        assert!(mutation.description.contains("5 -> -5"));
        let mutated = ClassFile::parse(&mutation.bytes).unwrap();
        assert_eq!(
            mutated.methods[0].code().unwrap().code[2] as i8 as i32,
            -5
        );
    }

    #[test]
    fn constant_pool_integer_is_bumped_once_per_method() {
        let mut b = ClassBuilder::new("fixture/Pool");
        let value = b.constant(Constant::Integer(41));
        b.method(
            "magic",
            "()I",
            9,
            vec![opcode::LDC, value as u8, opcode::IRETURN, opcode::LDC, value as u8, opcode::IRETURN],
        );
        let bytes = b.bytes();
        let mutater = Mutater::new({
            let mut k = KindSet::empty();
            k.insert(MutationKind::ConstantPool);
            k
        });
        // Two ldc sites, one pool point: the second reference is not a fresh
        // mutation point.
        assert_eq!(mutater.count_points(&bytes).unwrap(), 1);
        let mutation = mutater.mutate(&bytes, 0).unwrap().unwrap();
        let mutated = ClassFile::parse(&mutation.bytes).unwrap();
        assert!(matches!(mutated.pool.get(value), Ok(Constant::Integer(42))));
    }

    #[test]
    fn constant_pool_entry_shared_across_methods_is_untouchable() {
        let mut b = ClassBuilder::new("fixture/Shared");
        let value = b.constant(Constant::Integer(41));
        b.method("one", "()I", 3, vec![opcode::LDC, value as u8, opcode::IRETURN]);
        b.method("two", "()I", 5, vec![opcode::LDC, value as u8, opcode::IRETURN]);
        let bytes = b.bytes();
        let mutater = Mutater::new({
            let mut k = KindSet::empty();
            k.insert(MutationKind::ConstantPool);
            k
        });
        assert_eq!(mutater.count_points(&bytes).unwrap(), 0);
    }

    #[test]
    fn string_constant_becomes_empty_through_an_appended_utf8() {
        let mut b = ClassBuilder::new("fixture/Str");
        let value = b.string_constant("hello");
        b.method("greet", "()Ljava/lang/String;", 4, vec![opcode::LDC, value as u8, opcode::ARETURN]);
        let bytes = b.bytes();
        let mutater = Mutater::new({
            let mut k = KindSet::empty();
            k.insert(MutationKind::ConstantPool);
            k
        });
        let mutation = mutater.mutate(&bytes, 0).unwrap().unwrap();
        assert!(mutation.description.contains("hello"));
        let mutated = ClassFile::parse(&mutation.bytes).unwrap();
        let utf8_index = match mutated.pool.get(value).unwrap() {
            Constant::String { utf8_index } => *utf8_index,
            other => panic!("expected String, got {other:?}"),
        };
        assert_eq!(mutated.pool.utf8(utf8_index).unwrap(), "");
        // Appended, not repacked: one more slot than the original pool.
        assert_eq!(
            mutated.pool.slot_count(),
            ClassFile::parse(&bytes).unwrap().pool.slot_count() + 1
        );
    }

    #[test]
    fn null_literal_becomes_the_receiver_in_instance_methods() {
        let mut b = ClassBuilder::new("fixture/Nul");
        b.method(
            "maybe",
            "()Ljava/lang/String;",
            4,
            vec![opcode::ACONST_NULL, opcode::ARETURN],
        );
        b.method_flagged(
            "fixed",
            "()Ljava/lang/String;",
            6,
            vec![opcode::ACONST_NULL, opcode::ARETURN],
            crate::classfile::ACC_STATIC,
        );
        let bytes = b.bytes();
        let mutater = Mutater::new({
            let mut k = KindSet::empty();
            k.insert(MutationKind::ConstantPool);
            k
        });
        // Static methods have no receiver to stand in for null.
        assert_eq!(mutater.count_points(&bytes).unwrap(), 1);
        let mutation = mutater.mutate(&bytes, 0).unwrap().unwrap();
        assert_eq!(mutation.kind, MutationKind::ConstantPool);
        assert_eq!(mutation.method, "maybe");
        assert!(mutation.description.contains("aconst_null -> aload_0"));
        let mutated = ClassFile::parse(&mutation.bytes).unwrap();
        assert_eq!(mutated.methods[0].code().unwrap().code[0], 0x2a);
    }

    #[test]
    fn return_value_mutation_replaces_the_producer() {
        let mut b = ClassBuilder::new("fixture/Ret");
        b.method("answer", "()I", 6, vec![opcode::BIPUSH, 42, opcode::IRETURN]);
        let bytes = b.bytes();
        let mutater = Mutater::new({
            let mut k = KindSet::empty();
            k.insert(MutationKind::ReturnValues);
            k
        });
        assert_eq!(mutater.count_points(&bytes).unwrap(), 1);
        let mutation = mutater.mutate(&bytes, 0).unwrap().unwrap();
        assert!(mutation.description.contains("bipush 42 -> bipush -42"));
        let mutated = ClassFile::parse(&mutation.bytes).unwrap();
        assert_eq!(mutated.methods[0].code().unwrap().code[1] as i8 as i32, -42);
    }

    #[test]
    fn stores_follow_the_local_variable_table() {
        let mut b = ClassBuilder::new("fixture/Store");
        b.method_with_locals(
            "shuffle",
            "()V",
            8,
            vec![opcode::ICONST_3, ISTORE_1, opcode::ICONST_4, ISTORE_2, opcode::RETURN],
            &[(1, "I"), (2, "I")],
        );
        let bytes = b.bytes();
        let mutater = Mutater::new({
            let mut k = KindSet::empty();
            k.insert(MutationKind::Stores);
            k
        });
        assert_eq!(mutater.count_points(&bytes).unwrap(), 2);
        let mutation = mutater.mutate(&bytes, 0).unwrap().unwrap();
        assert!(mutation.description.contains("local 1 -> local 2"));
        let mutated = ClassFile::parse(&mutation.bytes).unwrap();
        assert_eq!(mutated.methods[0].code().unwrap().code[1], ISTORE_2);
    }

    #[test]
    fn switch_mutation_swaps_the_first_distinct_adjacent_pair() {
        let mut b = ClassBuilder::new("fixture/Sw");
        // iload_1; tableswitch{lo=0, hi=1} with distinct case targets.
        let mut code = vec![ILOAD_1, opcode::TABLESWITCH, 0, 0];
        code.extend_from_slice(&25i32.to_be_bytes()); // default -> offset 26
        code.extend_from_slice(&0i32.to_be_bytes()); // lo
        code.extend_from_slice(&1i32.to_be_bytes()); // hi
        code.extend_from_slice(&23i32.to_be_bytes()); // case 0 -> offset 24
        code.extend_from_slice(&24i32.to_be_bytes()); // case 1 -> offset 25
        code.push(opcode::RETURN); // offset 24
        code.push(opcode::RETURN); // offset 25
        code.push(opcode::RETURN); // offset 26
        b.method("route", "(I)V", 12, code);
        let bytes = b.bytes();
        let mutater = Mutater::new({
            let mut k = KindSet::empty();
            k.insert(MutationKind::Switch);
            k
        });
        assert_eq!(mutater.count_points(&bytes).unwrap(), 1);
        let mutation = mutater.mutate(&bytes, 0).unwrap().unwrap();
        assert!(mutation.description.contains("swapped switch case targets"));
        let mutated = ClassFile::parse(&mutation.bytes).unwrap();
        let code = &mutated.methods[0].code().unwrap().code;
        // Case targets live after the 12-byte header that follows 2 pad bytes.
        let first = i32::from_be_bytes(code[16..20].try_into().unwrap());
        let second = i32::from_be_bytes(code[20..24].try_into().unwrap());
        assert_eq!((first, second), (24, 23));
    }

    #[test]
    fn malformed_bytes_are_a_fatal_error() {
        let err = all_kinds().count_points(&[0xca, 0xfe]).unwrap_err();
        assert!(matches!(err, MutateError::ClassFile(_)));
    }
}

/// Byte ranges covered by compiler-synthesised assertion guards: from the
/// `getstatic $assertionsDisabled` up to the `ifne` skip target.
fn assertion_guard_ranges(
    class: &ClassFile,
    code: &CodeAttribute,
) -> Result<Vec<(usize, usize)>, ClassFileError> {
    let mut ranges = Vec::new();
    let mut offset = 0usize;
    while offset < code.code.len() {
        let len = opcode::instruction_len(&code.code, offset)?;
        if code.code[offset] == GETSTATIC && offset + 3 <= code.code.len() {
            let field = u16::from_be_bytes([code.code[offset + 1], code.code[offset + 2]]);
            let is_flag = class
                .pool
                .member_name(field)
                .map(|n| n == "$assertionsDisabled")
                .unwrap_or(false);
            let next = offset + len;
            if is_flag && next + 3 <= code.code.len() && code.code[next] == IFNE {
                let rel = i16::from_be_bytes([code.code[next + 1], code.code[next + 2]]) as isize;
                let target = next as isize + rel;
                if target > offset as isize {
                    ranges.push((offset, target as usize));
                }
            }
        }
        offset += len;
    }
    Ok(ranges)
}

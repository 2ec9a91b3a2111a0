//! Bytecode image layout and binary I/O
//!
//! File layout, all integers little-endian, code section 8-byte aligned:
//!
//! ```text
//! magic "CBO1" | u8 major | u8 minor
//! u32 constant count | { u8 tag, payload }*
//! u32 routine count  | { u32 name_const, u32 code_offset, u32 code_length,
//!                        u16 local_count, u8 arg_count, u8 flags }*
//! padding to 8 bytes
//! code section (contiguous routine bodies)
//! u32 export count   | { u32 name_const, u32 routine_idx }*
//! u32 debug count    | { u32 code_offset, u32 line }*
//! ```
//!
//! Constant tags: 0 i64, 1 f64, 2 string, 3 identifier, 4 decimal, 5 bool.

use cot_common::{CotError, CotResult};
use hashbrown::HashMap;

pub const MAGIC: &[u8; 4] = b"CBO1";
pub const VERSION_MAJOR: u8 = 1;
pub const VERSION_MINOR: u8 = 0;

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    I64(i64),
    F64(f64),
    Str(String),
    Ident(String),
    Decimal(String),
    Bool(bool),
}

impl Constant {
    fn tag(&self) -> u8 {
        match self {
            Constant::I64(_) => 0,
            Constant::F64(_) => 1,
            Constant::Str(_) => 2,
            Constant::Ident(_) => 3,
            Constant::Decimal(_) => 4,
            Constant::Bool(_) => 5,
        }
    }
}

/// Interning key: `f64` constants are deduplicated by bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    I64(i64),
    F64(u64),
    Str(String),
    Ident(String),
    Decimal(String),
    Bool(bool),
}

/// The constant pool grows during emission as constants are interned.
#[derive(Debug, Default)]
pub struct ConstPool {
    entries: Vec<Constant>,
    dedup: HashMap<ConstKey, u32>,
}

impl ConstPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn intern(&mut self, key: ConstKey, constant: Constant) -> u32 {
        if let Some(&idx) = self.dedup.get(&key) {
            return idx;
        }
        let idx = self.entries.len() as u32;
        self.entries.push(constant);
        self.dedup.insert(key, idx);
        idx
    }

    pub fn intern_i64(&mut self, v: i64) -> u32 {
        self.intern(ConstKey::I64(v), Constant::I64(v))
    }

    pub fn intern_f64(&mut self, v: f64) -> u32 {
        self.intern(ConstKey::F64(v.to_bits()), Constant::F64(v))
    }

    pub fn intern_str(&mut self, s: &str) -> u32 {
        self.intern(ConstKey::Str(s.to_string()), Constant::Str(s.to_string()))
    }

    pub fn intern_ident(&mut self, s: &str) -> u32 {
        self.intern(ConstKey::Ident(s.to_string()), Constant::Ident(s.to_string()))
    }

    pub fn intern_decimal(&mut self, s: &str) -> u32 {
        self.intern(ConstKey::Decimal(s.to_string()), Constant::Decimal(s.to_string()))
    }

    pub fn intern_bool(&mut self, v: bool) -> u32 {
        self.intern(ConstKey::Bool(v), Constant::Bool(v))
    }

    pub fn entries(&self) -> &[Constant] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Routine {
    pub name_const: u32,
    pub code_offset: u32,
    pub code_length: u32,
    pub local_count: u16,
    pub arg_count: u8,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Export {
    pub name_const: u32,
    pub routine_idx: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebugLineEntry {
    pub code_offset: u32,
    pub line: u32,
}

/// A complete bytecode image.
#[derive(Debug, Default)]
pub struct Image {
    pub constants: Vec<Constant>,
    pub routines: Vec<Routine>,
    pub code: Vec<u8>,
    pub exports: Vec<Export>,
    pub debug_lines: Vec<DebugLineEntry>,
}

impl Image {
    /// Serialize to the on-disk format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.code.len() + 256);
        out.extend_from_slice(MAGIC);
        out.push(VERSION_MAJOR);
        out.push(VERSION_MINOR);

        out.extend_from_slice(&(self.constants.len() as u32).to_le_bytes());
        for constant in &self.constants {
            out.push(constant.tag());
            match constant {
                Constant::I64(v) => out.extend_from_slice(&v.to_le_bytes()),
                Constant::F64(v) => out.extend_from_slice(&v.to_le_bytes()),
                Constant::Str(s) | Constant::Ident(s) | Constant::Decimal(s) => {
                    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                    out.extend_from_slice(s.as_bytes());
                }
                Constant::Bool(v) => out.push(*v as u8),
            }
        }

        out.extend_from_slice(&(self.routines.len() as u32).to_le_bytes());
        for routine in &self.routines {
            out.extend_from_slice(&routine.name_const.to_le_bytes());
            out.extend_from_slice(&routine.code_offset.to_le_bytes());
            out.extend_from_slice(&routine.code_length.to_le_bytes());
            out.extend_from_slice(&routine.local_count.to_le_bytes());
            out.push(routine.arg_count);
            out.push(routine.flags);
        }

        while out.len() % 8 != 0 {
            out.push(0);
        }
        out.extend_from_slice(&self.code);

        out.extend_from_slice(&(self.exports.len() as u32).to_le_bytes());
        for export in &self.exports {
            out.extend_from_slice(&export.name_const.to_le_bytes());
            out.extend_from_slice(&export.routine_idx.to_le_bytes());
        }

        out.extend_from_slice(&(self.debug_lines.len() as u32).to_le_bytes());
        for entry in &self.debug_lines {
            out.extend_from_slice(&entry.code_offset.to_le_bytes());
            out.extend_from_slice(&entry.line.to_le_bytes());
        }

        out
    }

    /// Decode an image. Exists for round-trip tests and external tooling;
    /// the compiler itself only writes.
    pub fn from_bytes(bytes: &[u8]) -> CotResult<Image> {
        let mut r = Reader { bytes, pos: 0 };

        let magic = r.take(4)?;
        if magic != MAGIC {
            return Err(CotError::emit_error("bad magic; not a Cot bytecode image"));
        }
        let major = r.u8()?;
        let _minor = r.u8()?;
        if major != VERSION_MAJOR {
            return Err(CotError::emit_error(format!(
                "unsupported bytecode version {}",
                major
            )));
        }

        let const_count = r.u32()?;
        let mut constants = Vec::with_capacity(const_count as usize);
        for _ in 0..const_count {
            let tag = r.u8()?;
            let constant = match tag {
                0 => Constant::I64(i64::from_le_bytes(r.take(8)?.try_into().unwrap())),
                1 => Constant::F64(f64::from_le_bytes(r.take(8)?.try_into().unwrap())),
                2 | 3 | 4 => {
                    let len = r.u32()? as usize;
                    let s = String::from_utf8(r.take(len)?.to_vec())
                        .map_err(|_| CotError::emit_error("invalid UTF-8 in constant pool"))?;
                    match tag {
                        2 => Constant::Str(s),
                        3 => Constant::Ident(s),
                        _ => Constant::Decimal(s),
                    }
                }
                5 => Constant::Bool(r.u8()? != 0),
                _ => return Err(CotError::emit_error(format!("unknown constant tag {}", tag))),
            };
            constants.push(constant);
        }

        let routine_count = r.u32()?;
        let mut routines = Vec::with_capacity(routine_count as usize);
        let mut code_len = 0usize;
        for _ in 0..routine_count {
            let routine = Routine {
                name_const: r.u32()?,
                code_offset: r.u32()?,
                code_length: r.u32()?,
                local_count: r.u16()?,
                arg_count: r.u8()?,
                flags: r.u8()?,
            };
            code_len = code_len.max((routine.code_offset + routine.code_length) as usize);
            routines.push(routine);
        }

        while r.pos % 8 != 0 {
            r.u8()?;
        }
        let code = r.take(code_len)?.to_vec();

        let export_count = r.u32()?;
        let mut exports = Vec::with_capacity(export_count as usize);
        for _ in 0..export_count {
            exports.push(Export { name_const: r.u32()?, routine_idx: r.u32()? });
        }

        let debug_count = r.u32()?;
        let mut debug_lines = Vec::with_capacity(debug_count as usize);
        for _ in 0..debug_count {
            debug_lines.push(DebugLineEntry { code_offset: r.u32()?, line: r.u32()? });
        }

        Ok(Image { constants, routines, code, exports, debug_lines })
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> CotResult<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(CotError::emit_error("truncated bytecode image"));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> CotResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> CotResult<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> CotResult<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_image_round_trips() {
        let image = Image::default();
        let bytes = image.to_bytes();
        assert_eq!(&bytes[0..4], MAGIC);
        let decoded = Image::from_bytes(&bytes).unwrap();
        assert!(decoded.constants.is_empty());
        assert!(decoded.routines.is_empty());
        assert!(decoded.exports.is_empty());
    }

    #[test]
    fn constants_round_trip() {
        let mut pool = ConstPool::new();
        pool.intern_i64(i64::MAX);
        pool.intern_f64(3.25);
        pool.intern_str("hello");
        pool.intern_ident("main");
        pool.intern_decimal("1.50");
        pool.intern_bool(true);

        let image = Image {
            constants: pool.entries().to_vec(),
            ..Default::default()
        };
        let decoded = Image::from_bytes(&image.to_bytes()).unwrap();
        assert_eq!(decoded.constants, image.constants);
    }

    #[test]
    fn pool_interning_deduplicates() {
        let mut pool = ConstPool::new();
        let a = pool.intern_str("x");
        let b = pool.intern_str("x");
        let c = pool.intern_ident("x");
        assert_eq!(a, b);
        assert_ne!(a, c, "strings and identifiers are distinct entries");
    }

    #[test]
    fn code_section_is_eight_byte_aligned() {
        let mut pool = ConstPool::new();
        pool.intern_str("odd");
        let image = Image {
            constants: pool.entries().to_vec(),
            routines: vec![Routine {
                name_const: 0,
                code_offset: 0,
                code_length: 3,
                local_count: 1,
                arg_count: 0,
                flags: 0,
            }],
            code: vec![0x45, 0x00, 0x46],
            ..Default::default()
        };
        let bytes = image.to_bytes();
        let decoded = Image::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.code, image.code);
        assert_eq!(decoded.routines, image.routines);
    }
}

//! Type descriptors and the type registry
//!
//! Type identity is by [`TypeId`]. The registry deduplicates structural
//! types (pointers, optionals, arrays, slices, functions, ranges, generic
//! instances) by shape, so `*Foo` always resolves to the same id. Nominal
//! types (structs, enums, generic definitions) get a fresh id when declared.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for types
pub type TypeId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveType {
    Void,
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    String,
    Decimal,
}

impl PrimitiveType {
    pub const ALL: [PrimitiveType; 14] = [
        PrimitiveType::Void,
        PrimitiveType::Bool,
        PrimitiveType::I8,
        PrimitiveType::I16,
        PrimitiveType::I32,
        PrimitiveType::I64,
        PrimitiveType::U8,
        PrimitiveType::U16,
        PrimitiveType::U32,
        PrimitiveType::U64,
        PrimitiveType::F32,
        PrimitiveType::F64,
        PrimitiveType::String,
        PrimitiveType::Decimal,
    ];

    pub fn from_name(name: &str) -> Option<PrimitiveType> {
        let p = match name {
            "void" => PrimitiveType::Void,
            "bool" => PrimitiveType::Bool,
            "i8" => PrimitiveType::I8,
            "i16" => PrimitiveType::I16,
            "i32" => PrimitiveType::I32,
            "i64" => PrimitiveType::I64,
            "u8" => PrimitiveType::U8,
            "u16" => PrimitiveType::U16,
            "u32" => PrimitiveType::U32,
            "u64" => PrimitiveType::U64,
            "f32" => PrimitiveType::F32,
            "f64" => PrimitiveType::F64,
            "string" => PrimitiveType::String,
            "decimal" => PrimitiveType::Decimal,
            _ => return None,
        };
        Some(p)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            PrimitiveType::I8
                | PrimitiveType::I16
                | PrimitiveType::I32
                | PrimitiveType::I64
                | PrimitiveType::U8
                | PrimitiveType::U16
                | PrimitiveType::U32
                | PrimitiveType::U64
        )
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            PrimitiveType::I8 | PrimitiveType::I16 | PrimitiveType::I32 | PrimitiveType::I64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, PrimitiveType::F32 | PrimitiveType::F64)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float() || matches!(self, PrimitiveType::Decimal)
    }

    /// Rank used by the widening table: the wider operand wins.
    pub fn numeric_rank(&self) -> u8 {
        match self {
            PrimitiveType::I8 | PrimitiveType::U8 => 1,
            PrimitiveType::I16 | PrimitiveType::U16 => 2,
            PrimitiveType::I32 | PrimitiveType::U32 => 3,
            PrimitiveType::I64 | PrimitiveType::U64 => 4,
            PrimitiveType::F32 => 5,
            PrimitiveType::F64 => 6,
            PrimitiveType::Decimal => 7,
            _ => 0,
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrimitiveType::Void => "void",
            PrimitiveType::Bool => "bool",
            PrimitiveType::I8 => "i8",
            PrimitiveType::I16 => "i16",
            PrimitiveType::I32 => "i32",
            PrimitiveType::I64 => "i64",
            PrimitiveType::U8 => "u8",
            PrimitiveType::U16 => "u16",
            PrimitiveType::U32 => "u32",
            PrimitiveType::U64 => "u64",
            PrimitiveType::F32 => "f32",
            PrimitiveType::F64 => "f64",
            PrimitiveType::String => "string",
            PrimitiveType::Decimal => "decimal",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnumVariant {
    pub name: String,
    pub payload: Vec<TypeId>,
}

/// The type descriptor variants
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeDesc {
    Primitive(PrimitiveType),
    Pointer(TypeId),
    Optional(TypeId),
    Array { element: TypeId, size: u64 },
    Slice(TypeId),
    Function { params: Vec<TypeId>, ret: TypeId },
    Struct { name: String, fields: Vec<(String, TypeId)> },
    Enum { name: String, variants: Vec<EnumVariant> },
    GenericDef { name: String, params: Vec<String> },
    GenericInstance { base: TypeId, args: Vec<TypeId> },
    Range { inclusive: bool },
    /// Poison sentinel; produced once per error, suppresses cascades.
    Error,
}

/// Process-scoped mapping `TypeId -> TypeDesc`, owned by one compilation.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    descriptors: Vec<TypeDesc>,
    dedup: HashMap<TypeDesc, TypeId>,
    pub list_def: TypeId,
    pub map_def: TypeId,
    pub void_ty: TypeId,
    pub error_ty: TypeId,
}

impl TypeRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            descriptors: Vec::new(),
            dedup: HashMap::new(),
            list_def: 0,
            map_def: 0,
            void_ty: 0,
            error_ty: 0,
        };
        for prim in PrimitiveType::ALL {
            registry.intern(TypeDesc::Primitive(prim));
        }
        registry.void_ty = registry.intern(TypeDesc::Primitive(PrimitiveType::Void));
        registry.error_ty = registry.intern(TypeDesc::Error);
        registry.list_def = registry.declare(TypeDesc::GenericDef {
            name: "List".to_string(),
            params: vec!["T".to_string()],
        });
        registry.map_def = registry.declare(TypeDesc::GenericDef {
            name: "Map".to_string(),
            params: vec!["K".to_string(), "V".to_string()],
        });
        registry
    }

    /// Intern a structural type; identical shapes share one id.
    pub fn intern(&mut self, desc: TypeDesc) -> TypeId {
        if let Some(&id) = self.dedup.get(&desc) {
            return id;
        }
        let id = self.descriptors.len() as TypeId;
        self.descriptors.push(desc.clone());
        self.dedup.insert(desc, id);
        id
    }

    /// Register a nominal type under a fresh id, never deduplicated.
    pub fn declare(&mut self, desc: TypeDesc) -> TypeId {
        let id = self.descriptors.len() as TypeId;
        self.descriptors.push(desc);
        id
    }

    /// Replace a previously declared descriptor (used to fill in struct
    /// fields after forward declaration).
    pub fn define(&mut self, id: TypeId, desc: TypeDesc) {
        self.descriptors[id as usize] = desc;
    }

    pub fn get(&self, id: TypeId) -> &TypeDesc {
        &self.descriptors[id as usize]
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn primitive(&mut self, prim: PrimitiveType) -> TypeId {
        self.intern(TypeDesc::Primitive(prim))
    }

    pub fn void(&mut self) -> TypeId {
        self.primitive(PrimitiveType::Void)
    }

    pub fn bool_type(&mut self) -> TypeId {
        self.primitive(PrimitiveType::Bool)
    }

    pub fn i64_type(&mut self) -> TypeId {
        self.primitive(PrimitiveType::I64)
    }

    pub fn f64_type(&mut self) -> TypeId {
        self.primitive(PrimitiveType::F64)
    }

    pub fn string_type(&mut self) -> TypeId {
        self.primitive(PrimitiveType::String)
    }

    pub fn error_type(&mut self) -> TypeId {
        self.intern(TypeDesc::Error)
    }

    pub fn pointer_to(&mut self, inner: TypeId) -> TypeId {
        self.intern(TypeDesc::Pointer(inner))
    }

    pub fn optional_of(&mut self, inner: TypeId) -> TypeId {
        self.intern(TypeDesc::Optional(inner))
    }

    pub fn slice_of(&mut self, element: TypeId) -> TypeId {
        self.intern(TypeDesc::Slice(element))
    }

    pub fn range_type(&mut self, inclusive: bool) -> TypeId {
        self.intern(TypeDesc::Range { inclusive })
    }

    /// Instantiate a generic definition; instances are deduplicated by
    /// `(base, args)`.
    pub fn instantiate(&mut self, base: TypeId, args: Vec<TypeId>) -> TypeId {
        self.intern(TypeDesc::GenericInstance { base, args })
    }

    pub fn is_error(&self, id: TypeId) -> bool {
        matches!(self.get(id), TypeDesc::Error)
    }

    pub fn as_primitive(&self, id: TypeId) -> Option<PrimitiveType> {
        match self.get(id) {
            TypeDesc::Primitive(p) => Some(*p),
            _ => None,
        }
    }

    pub fn is_integer(&self, id: TypeId) -> bool {
        self.as_primitive(id).map_or(false, |p| p.is_integer())
    }

    pub fn is_numeric(&self, id: TypeId) -> bool {
        self.as_primitive(id).map_or(false, |p| p.is_numeric())
    }

    pub fn is_bool(&self, id: TypeId) -> bool {
        matches!(self.get(id), TypeDesc::Primitive(PrimitiveType::Bool))
    }

    pub fn is_string(&self, id: TypeId) -> bool {
        matches!(self.get(id), TypeDesc::Primitive(PrimitiveType::String))
    }

    pub fn is_void(&self, id: TypeId) -> bool {
        matches!(self.get(id), TypeDesc::Primitive(PrimitiveType::Void))
    }

    /// Heap-allocated, reference-counted at runtime: strings, collections,
    /// records, variants with payload, closures, pointers and slices.
    pub fn is_refcounted(&self, id: TypeId) -> bool {
        match self.get(id) {
            TypeDesc::Primitive(PrimitiveType::String) => true,
            TypeDesc::Pointer(_) => true,
            TypeDesc::Slice(_) => true,
            TypeDesc::GenericInstance { .. } => true,
            TypeDesc::Struct { .. } => true,
            TypeDesc::Enum { variants, .. } => variants.iter().any(|v| !v.payload.is_empty()),
            TypeDesc::Function { .. } => true,
            TypeDesc::Optional(inner) => self.is_refcounted(*inner),
            _ => false,
        }
    }

    /// Struct fields, resolving through one pointer level.
    pub fn struct_fields(&self, id: TypeId) -> Option<&[(String, TypeId)]> {
        match self.get(id) {
            TypeDesc::Struct { fields, .. } => Some(fields),
            TypeDesc::Pointer(inner) | TypeDesc::Optional(inner) => match self.get(*inner) {
                TypeDesc::Struct { fields, .. } => Some(fields),
                _ => None,
            },
            _ => None,
        }
    }

    /// Number of value slots a type occupies when stored inline: structs
    /// take one slot per field, everything else takes one.
    pub fn slot_count(&self, id: TypeId) -> usize {
        match self.get(id) {
            TypeDesc::Struct { fields, .. } => fields.len().max(1),
            _ => 1,
        }
    }

    pub fn display(&self, id: TypeId) -> String {
        match self.get(id) {
            TypeDesc::Primitive(p) => p.to_string(),
            TypeDesc::Pointer(inner) => format!("*{}", self.display(*inner)),
            TypeDesc::Optional(inner) => format!("?{}", self.display(*inner)),
            TypeDesc::Array { element, size } => {
                format!("[{}]{}", size, self.display(*element))
            }
            TypeDesc::Slice(element) => format!("[]{}", self.display(*element)),
            TypeDesc::Function { params, ret } => {
                let params: Vec<String> = params.iter().map(|p| self.display(*p)).collect();
                format!("fn({}) {}", params.join(", "), self.display(*ret))
            }
            TypeDesc::Struct { name, .. } => name.clone(),
            TypeDesc::Enum { name, .. } => name.clone(),
            TypeDesc::GenericDef { name, .. } => name.clone(),
            TypeDesc::GenericInstance { base, args } => {
                let args: Vec<String> = args.iter().map(|a| self.display(*a)).collect();
                format!("{}<{}>", self.display(*base), args.join(", "))
            }
            TypeDesc::Range { inclusive } => {
                if *inclusive {
                    "range(..=)".to_string()
                } else {
                    "range(..)".to_string()
                }
            }
            TypeDesc::Error => "<error>".to_string(),
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_types_are_deduplicated() {
        let mut reg = TypeRegistry::new();
        let i64_t = reg.i64_type();
        let p1 = reg.pointer_to(i64_t);
        let p2 = reg.pointer_to(i64_t);
        assert_eq!(p1, p2);

        let o1 = reg.optional_of(p1);
        let o2 = reg.optional_of(p2);
        assert_eq!(o1, o2);
    }

    #[test]
    fn generic_instances_dedup_by_base_and_args() {
        let mut reg = TypeRegistry::new();
        let i64_t = reg.i64_type();
        let s = reg.string_type();
        let list_def = reg.list_def;
        let a = reg.instantiate(list_def, vec![i64_t]);
        let b = reg.instantiate(list_def, vec![i64_t]);
        let c = reg.instantiate(list_def, vec![s]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn nominal_types_are_never_merged() {
        let mut reg = TypeRegistry::new();
        let a = reg.declare(TypeDesc::Struct { name: "Foo".into(), fields: vec![] });
        let b = reg.declare(TypeDesc::Struct { name: "Foo".into(), fields: vec![] });
        assert_ne!(a, b);
    }

    #[test]
    fn refcount_discipline_covers_heap_types() {
        let mut reg = TypeRegistry::new();
        let s = reg.string_type();
        let i = reg.i64_type();
        let list_def = reg.list_def;
        let list = reg.instantiate(list_def, vec![i]);
        assert!(reg.is_refcounted(s));
        assert!(reg.is_refcounted(list));
        assert!(!reg.is_refcounted(i));
        let b = reg.bool_type();
        assert!(!reg.is_refcounted(b));
    }
}

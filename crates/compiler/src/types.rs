//! Datatypes and declarations for the Spyre compiler.
//!
//! A [`Datatype`] is a sum over primitives, struct references, and function
//! signatures. Struct member tables live in the user-type registry keyed by
//! type name (see [`StructInfo`]); a struct-typed `Datatype` only carries
//! the name. That keeps datatypes cheap owned values and makes
//! self-referential structs (`Node { next: Node }`) representable.

use spyre_core::SpyreMap;
use std::fmt;

pub const INT_NAME: &str = "int";
pub const FLOAT_NAME: &str = "float";
pub const CHAR_NAME: &str = "char";
pub const BOOL_NAME: &str = "bool";

pub const INT_SIZE: usize = 8;
pub const FLOAT_SIZE: usize = 8;
pub const BOOL_SIZE: usize = 8;
pub const CHAR_SIZE: usize = 1;

/// Which family a datatype belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum DatatypeKind {
    Primitive,
    /// A record type; members are looked up by `type_name` in the user-type
    /// registry.
    Struct,
    Function(Box<FunctionDescriptor>),
}

/// A resolved type: name, array dimension (`[]` suffix count), reserved
/// pointer dimension, primitive byte size, and const qualifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Datatype {
    /// Type name. `None` only for anonymous function types.
    pub type_name: Option<String>,
    pub arrdim: usize,
    pub ptrdim: usize,
    pub primsize: usize,
    pub is_const: bool,
    pub kind: DatatypeKind,
}

impl Datatype {
    pub fn primitive(name: &str, primsize: usize) -> Self {
        Datatype {
            type_name: Some(name.to_string()),
            arrdim: 0,
            ptrdim: 0,
            primsize,
            is_const: false,
            kind: DatatypeKind::Primitive,
        }
    }

    /// A reference to a user struct type; members live in the registry.
    pub fn struct_ref(name: &str) -> Self {
        Datatype {
            type_name: Some(name.to_string()),
            arrdim: 0,
            ptrdim: 0,
            primsize: 0,
            is_const: false,
            kind: DatatypeKind::Struct,
        }
    }

    pub fn function(desc: FunctionDescriptor) -> Self {
        Datatype {
            type_name: None,
            arrdim: 0,
            ptrdim: 0,
            primsize: 0,
            is_const: false,
            kind: DatatypeKind::Function(Box::new(desc)),
        }
    }

    /// Strict type equality: same family, pointer dimension, array
    /// dimension, const qualifier, and type name. Used by every operator
    /// rule in the type checker; there are no implicit conversions.
    pub fn strict_eq(&self, other: &Datatype) -> bool {
        std::mem::discriminant(&self.kind) == std::mem::discriminant(&other.kind)
            && self.ptrdim == other.ptrdim
            && self.arrdim == other.arrdim
            && self.is_const == other.is_const
            && self.type_name == other.type_name
    }

    /// A bare struct value (not an array of structs).
    pub fn is_struct(&self) -> bool {
        matches!(self.kind, DatatypeKind::Struct) && self.arrdim == 0
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, DatatypeKind::Function(_))
    }

    pub fn function_descriptor(&self) -> Option<&FunctionDescriptor> {
        match &self.kind {
            DatatypeKind::Function(desc) => Some(desc),
            _ => None,
        }
    }

    /// Printable name for diagnostics ("<function>" for anonymous function
    /// types).
    pub fn display_name(&self) -> String {
        format!("{}", self)
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.type_name {
            Some(name) => write!(f, "{}", name)?,
            None => write!(f, "<function>")?,
        }
        for _ in 0..self.ptrdim {
            write!(f, "^")?;
        }
        for _ in 0..self.arrdim {
            write!(f, "[]")?;
        }
        Ok(())
    }
}

/// The signature of a `func` or `cfunc`: ordered arguments and an optional
/// return type (absent means void).
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDescriptor {
    pub arguments: Vec<Declaration>,
    pub return_type: Option<Datatype>,
    pub nargs: usize,
}

/// A named slot: a function argument, a block-scoped local, or a struct
/// member. `index` is the stack slot (in 8-byte units, relative to the
/// frame base) for arguments and locals, and the member position for
/// struct fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub name: String,
    pub dt: Datatype,
    pub index: usize,
}

impl Declaration {
    pub fn new(name: &str, dt: Datatype) -> Self {
        Declaration {
            name: name.to_string(),
            dt,
            index: 0,
        }
    }
}

/// A user struct definition: the member table plus insertion order via each
/// member's `index`.
#[derive(Debug, Clone)]
pub struct StructInfo {
    pub name: String,
    pub members: SpyreMap<Declaration>,
    pub nmembers: usize,
}

impl StructInfo {
    pub fn new(name: &str) -> Self {
        StructInfo {
            name: name.to_string(),
            members: SpyreMap::new(),
            nmembers: 0,
        }
    }

    /// Members in declaration order (by struct index).
    pub fn members_in_order(&self) -> Vec<Declaration> {
        let mut out: Vec<Declaration> = Vec::with_capacity(self.nmembers);
        self.members.foreach(|_, decl| out.push(decl.clone()));
        out.sort_by_key(|d| d.index);
        out
    }
}

/// The built-in primitive types, constructed once per compile session.
#[derive(Debug, Clone)]
pub struct Builtins {
    pub int_t: Datatype,
    pub float_t: Datatype,
    pub char_t: Datatype,
    pub bool_t: Datatype,
}

impl Builtins {
    pub fn new() -> Self {
        Builtins {
            int_t: Datatype::primitive(INT_NAME, INT_SIZE),
            float_t: Datatype::primitive(FLOAT_NAME, FLOAT_SIZE),
            char_t: Datatype::primitive(CHAR_NAME, CHAR_SIZE),
            bool_t: Datatype::primitive(BOOL_NAME, BOOL_SIZE),
        }
    }

    /// Look up a builtin primitive by name.
    pub fn by_name(&self, name: &str) -> Option<&Datatype> {
        match name {
            INT_NAME => Some(&self.int_t),
            FLOAT_NAME => Some(&self.float_t),
            CHAR_NAME => Some(&self.char_t),
            BOOL_NAME => Some(&self.bool_t),
            _ => None,
        }
    }
}

impl Default for Builtins {
    fn default() -> Self {
        Self::new()
    }
}

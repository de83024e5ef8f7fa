// types.rs — Scalar data types carried by stamps and LIR instructions

use std::fmt;

use serde::{Deserialize, Serialize};

/// Scalar type tag of a value. Tuples appear only as constructor results.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Integer,
    Float,
    String,
    Boolean,
    Tuple(Vec<DType>),
}

impl DType {
    /// Parse a surface type name (`integer`, `float`, `string`, `boolean`).
    pub fn from_name(name: &str) -> Option<DType> {
        match name {
            "integer" => Some(DType::Integer),
            "float" => Some(DType::Float),
            "string" => Some(DType::String),
            "boolean" => Some(DType::Boolean),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DType::Integer | DType::Float)
    }

    /// Numeric promotion: integer ⊔ float = float. Equal types unify to
    /// themselves; anything else has no common type.
    pub fn promote(a: &DType, b: &DType) -> Option<DType> {
        if a == b {
            return Some(a.clone());
        }
        if a.is_numeric() && b.is_numeric() {
            return Some(DType::Float);
        }
        None
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::Integer => f.write_str("integer"),
            DType::Float => f.write_str("float"),
            DType::String => f.write_str("string"),
            DType::Boolean => f.write_str("boolean"),
            DType::Tuple(elems) => {
                f.write_str("(")?;
                for (i, t) in elems.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", t)?;
                }
                f.write_str(")")
            }
        }
    }
}

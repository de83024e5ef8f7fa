// registry.rs — Input table and function spec table
//
// Both tables are produced upstream and read-only for the compiler passes.
// The function table ships with a builtin set and can be extended from JSON
// manifests (`--functions`). Storage is ordered so `canonical_json()` is
// stable and usable as a provenance fingerprint.
//
// Preconditions: none.
// Postconditions: every function id maps to exactly one spec.
// Failure modes: I/O or JSON errors while loading manifests; duplicate ids;
//   duplicate input paths.
// Side effects: reads manifest files.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ast::{FieldPath, InputDecl, Literal, Span};
use crate::axes::Axes;
use crate::diag::{codes, Diagnostic};
use crate::types::DType;

// ── Input table ─────────────────────────────────────────────────────────────

/// Declared shape and type of one input field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSpec {
    pub axes: Axes,
    pub dtype: DType,
    pub span: Span,
}

/// Canonical field path → declared axes and dtype.
#[derive(Debug, Clone, Default)]
pub struct InputTable {
    entries: BTreeMap<FieldPath, InputSpec>,
}

impl InputTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_decls(decls: &[InputDecl]) -> Result<Self, Diagnostic> {
        let mut table = InputTable::new();
        for decl in decls {
            if table.entries.contains_key(&decl.path) {
                return Err(Diagnostic::error(
                    codes::E0110,
                    decl.span,
                    format!("input `{}` is declared twice", decl.path),
                ));
            }
            table.insert(
                decl.path.clone(),
                InputSpec {
                    axes: decl.axes.clone(),
                    dtype: decl.dtype.clone(),
                    span: decl.span,
                },
            );
        }
        Ok(table)
    }

    pub fn insert(&mut self, path: FieldPath, spec: InputSpec) {
        self.entries.insert(path, spec);
    }

    pub fn get(&self, path: &FieldPath) -> Option<&InputSpec> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Function specs ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FnKind {
    Elementwise,
    Reduce,
    Constructor,
}

impl fmt::Display for FnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FnKind::Elementwise => f.write_str("elementwise"),
            FnKind::Reduce => f.write_str("reduce"),
            FnKind::Constructor => f.write_str("constructor"),
        }
    }
}

/// Pure rule from named argument dtypes to the result dtype.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DtypeRule {
    /// Type of the named parameter (for a variadic list, all elements agree).
    Same(String),
    Fixed(DType),
    /// Numeric promotion over every argument.
    Promote,
    /// Tuple of every argument type, in order.
    TupleOf,
}

/// Identity element of a reduction, materialized at the result dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceIdentity {
    Zero,
    One,
    NegInfinity,
    PosInfinity,
    True,
    False,
}

impl ReduceIdentity {
    pub fn literal(self, dtype: &DType) -> Option<Literal> {
        match (self, dtype) {
            (ReduceIdentity::Zero, DType::Integer) => Some(Literal::Integer(0)),
            (ReduceIdentity::Zero, DType::Float) => Some(Literal::Float(0.0)),
            (ReduceIdentity::One, DType::Integer) => Some(Literal::Integer(1)),
            (ReduceIdentity::One, DType::Float) => Some(Literal::Float(1.0)),
            (ReduceIdentity::NegInfinity, DType::Integer) => Some(Literal::Integer(i64::MIN)),
            (ReduceIdentity::NegInfinity, DType::Float) => {
                Some(Literal::Float(f64::NEG_INFINITY))
            }
            (ReduceIdentity::PosInfinity, DType::Integer) => Some(Literal::Integer(i64::MAX)),
            (ReduceIdentity::PosInfinity, DType::Float) => Some(Literal::Float(f64::INFINITY)),
            (ReduceIdentity::True, DType::Boolean) => Some(Literal::Boolean(true)),
            (ReduceIdentity::False, DType::Boolean) => Some(Literal::Boolean(false)),
            _ => None,
        }
    }
}

/// Argument dtypes named for a dtype rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamedArgTypes {
    /// One entry per declared parameter, in order.
    Named(Vec<(String, DType)>),
    /// Variadic call: every argument type under a single name.
    Variadic { name: String, types: Vec<DType> },
}

impl NamedArgTypes {
    fn all(&self) -> Vec<&DType> {
        match self {
            NamedArgTypes::Named(pairs) => pairs.iter().map(|(_, t)| t).collect(),
            NamedArgTypes::Variadic { types, .. } => types.iter().collect(),
        }
    }
}

impl DtypeRule {
    pub fn apply(&self, args: &NamedArgTypes) -> Result<DType, String> {
        match self {
            DtypeRule::Fixed(t) => Ok(t.clone()),
            DtypeRule::Same(param) => match args {
                NamedArgTypes::Named(pairs) => pairs
                    .iter()
                    .find(|(name, _)| name == param)
                    .map(|(_, t)| t.clone())
                    .ok_or_else(|| format!("no parameter named `{}`", param)),
                NamedArgTypes::Variadic { name, types } => {
                    if name != param {
                        return Err(format!("no parameter named `{}`", param));
                    }
                    let first = types
                        .first()
                        .ok_or_else(|| format!("`{}` is empty", name))?;
                    if let Some(other) = types.iter().find(|t| *t != first) {
                        return Err(format!(
                            "`{}` mixes {} and {}",
                            name, first, other
                        ));
                    }
                    Ok(first.clone())
                }
            },
            DtypeRule::Promote => {
                let all = args.all();
                let mut acc: Option<DType> = None;
                for t in all {
                    if !t.is_numeric() {
                        return Err(format!("cannot promote non-numeric {}", t));
                    }
                    acc = match acc {
                        None => Some(t.clone()),
                        Some(prev) => DType::promote(&prev, t),
                    };
                }
                acc.ok_or_else(|| "no arguments to promote".to_string())
            }
            DtypeRule::TupleOf => Ok(DType::Tuple(args.all().into_iter().cloned().collect())),
        }
    }
}

/// Metadata for one function id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub id: String,
    pub kind: FnKind,
    pub params: Vec<String>,
    #[serde(default)]
    pub variadic: bool,
    pub dtype_rule: DtypeRule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<ReduceIdentity>,
}

impl FunctionSpec {
    /// Name argument dtypes after the declared parameters.
    pub fn name_args(&self, types: &[DType]) -> Result<NamedArgTypes, String> {
        if self.variadic {
            let name = self
                .params
                .first()
                .cloned()
                .unwrap_or_else(|| "args".to_string());
            return Ok(NamedArgTypes::Variadic {
                name,
                types: types.to_vec(),
            });
        }
        if types.len() != self.params.len() {
            return Err(format!(
                "`{}` takes {} argument(s), got {}",
                self.id,
                self.params.len(),
                types.len()
            ));
        }
        Ok(NamedArgTypes::Named(
            self.params
                .iter()
                .cloned()
                .zip(types.iter().cloned())
                .collect(),
        ))
    }
}

// ── Errors ──────────────────────────────────────────────────────────────────

/// Errors that can occur while loading function manifests.
#[derive(Debug)]
pub enum RegistryError {
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseError {
        file: PathBuf,
        message: String,
    },
    DuplicateFunction {
        id: String,
        file: PathBuf,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::IoError { path, source } => {
                write!(f, "{}: {}", path.display(), source)
            }
            RegistryError::ParseError { file, message } => {
                write!(f, "{}: {}", file.display(), message)
            }
            RegistryError::DuplicateFunction { id, file } => {
                write!(f, "duplicate function '{}' in {}", id, file.display())
            }
        }
    }
}

impl std::error::Error for RegistryError {}

#[derive(Debug, Deserialize)]
struct Manifest {
    functions: Vec<FunctionSpec>,
}

// ── Registry ────────────────────────────────────────────────────────────────

/// Function spec table, keyed by function id.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    functions: BTreeMap<String, FunctionSpec>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the builtin kernels and reducers.
    pub fn with_builtins() -> Self {
        let mut registry = Registry::new();
        for spec in builtin_functions() {
            registry.functions.insert(spec.id.clone(), spec);
        }
        registry
    }

    pub fn get(&self, id: &str) -> Option<&FunctionSpec> {
        self.functions.get(id)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Load a JSON manifest file. Returns the number of functions added.
    pub fn load_manifest(&mut self, path: &Path) -> Result<usize, RegistryError> {
        let text = std::fs::read_to_string(path).map_err(|source| RegistryError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_manifest_str(&text, path)
    }

    /// Load manifest text; `origin` is only used in error messages.
    pub fn load_manifest_str(&mut self, text: &str, origin: &Path) -> Result<usize, RegistryError> {
        let manifest: Manifest =
            serde_json::from_str(text).map_err(|e| RegistryError::ParseError {
                file: origin.to_path_buf(),
                message: e.to_string(),
            })?;
        // All-or-nothing: reject the manifest before touching the table.
        let mut ids = BTreeSet::new();
        for spec in &manifest.functions {
            if self.functions.contains_key(&spec.id) || !ids.insert(spec.id.as_str()) {
                return Err(RegistryError::DuplicateFunction {
                    id: spec.id.clone(),
                    file: origin.to_path_buf(),
                });
            }
        }
        let count = manifest.functions.len();
        for spec in manifest.functions {
            self.functions.insert(spec.id.clone(), spec);
        }
        Ok(count)
    }

    /// Compact JSON of every spec, ordered by id.
    pub fn canonical_json(&self) -> String {
        let specs: Vec<&FunctionSpec> = self.functions.values().collect();
        serde_json::to_string(&specs).unwrap_or_default()
    }
}

fn elementwise(id: &str, params: &[&str], rule: DtypeRule) -> FunctionSpec {
    FunctionSpec {
        id: id.to_string(),
        kind: FnKind::Elementwise,
        params: params.iter().map(|p| p.to_string()).collect(),
        variadic: false,
        dtype_rule: rule,
        identity: None,
    }
}

fn reducer(id: &str, rule: DtypeRule, identity: ReduceIdentity) -> FunctionSpec {
    FunctionSpec {
        id: id.to_string(),
        kind: FnKind::Reduce,
        params: vec!["source".to_string()],
        variadic: false,
        dtype_rule: rule,
        identity: Some(identity),
    }
}

fn builtin_functions() -> Vec<FunctionSpec> {
    let same_source = || DtypeRule::Same("source".to_string());
    vec![
        elementwise("add", &["left", "right"], DtypeRule::Promote),
        elementwise("subtract", &["left", "right"], DtypeRule::Promote),
        elementwise("multiply", &["left", "right"], DtypeRule::Promote),
        elementwise(
            "divide",
            &["left", "right"],
            DtypeRule::Fixed(DType::Float),
        ),
        elementwise("gt", &["left", "right"], DtypeRule::Fixed(DType::Boolean)),
        elementwise("lt", &["left", "right"], DtypeRule::Fixed(DType::Boolean)),
        elementwise("ge", &["left", "right"], DtypeRule::Fixed(DType::Boolean)),
        elementwise("le", &["left", "right"], DtypeRule::Fixed(DType::Boolean)),
        elementwise("eq", &["left", "right"], DtypeRule::Fixed(DType::Boolean)),
        elementwise("and", &["left", "right"], DtypeRule::Fixed(DType::Boolean)),
        elementwise("or", &["left", "right"], DtypeRule::Fixed(DType::Boolean)),
        elementwise("not", &["value"], DtypeRule::Fixed(DType::Boolean)),
        elementwise("concat", &["left", "right"], DtypeRule::Fixed(DType::String)),
        reducer("sum", same_source(), ReduceIdentity::Zero),
        reducer("product", same_source(), ReduceIdentity::One),
        reducer("max", same_source(), ReduceIdentity::NegInfinity),
        reducer("min", same_source(), ReduceIdentity::PosInfinity),
        reducer("count", DtypeRule::Fixed(DType::Integer), ReduceIdentity::Zero),
        reducer("any", DtypeRule::Fixed(DType::Boolean), ReduceIdentity::False),
        reducer("all", DtypeRule::Fixed(DType::Boolean), ReduceIdentity::True),
        FunctionSpec {
            id: "array".to_string(),
            kind: FnKind::Constructor,
            params: vec!["elements".to_string()],
            variadic: true,
            dtype_rule: DtypeRule::TupleOf,
            identity: None,
        },
    ]
}

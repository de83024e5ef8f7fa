// carrier.rs — Carrier map: which field path a loop over each axis vector walks
//
// Every input reference with axes `[a0, .., am]` and path `[t0, t1, ..]`
// realizes the axis prefix `[a0, .., ak)` through the path prefix
// `[t0, .., tk)`. Observations from the whole module must agree: one axis
// vector, one carrier.
//
// Preconditions: a fully stamped module.
// Postconditions: the map is total over every axis prefix observed at an
//   input reference whose path is long enough to carry it.
// Failure modes: E0201 when two different paths carry the same axis vector.
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt;

use crate::ast::{FieldPath, Span};
use crate::axes::Axes;
use crate::diag::{codes, Diagnostic};
use crate::stamp::{StampedExpr, StampedKind, StampedModule};

/// Axis vector → carrier path. Built once per module, then read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CarrierMap {
    entries: BTreeMap<Axes, FieldPath>,
}

impl CarrierMap {
    pub fn get(&self, axes: &Axes) -> Option<&FieldPath> {
        self.entries.get(axes)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Axes, &FieldPath)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for CarrierMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (axes, path) in &self.entries {
            writeln!(f, "{} -> {}", axes, path)?;
        }
        Ok(())
    }
}

/// First observation of a carrier, kept for error reporting.
struct Observation {
    carrier: FieldPath,
    origin: FieldPath,
    decl: String,
    span: Span,
}

/// Scan every input reference in the module and record its carriers.
pub fn build_carrier_map(module: &StampedModule) -> Result<CarrierMap, Diagnostic> {
    let mut seen: BTreeMap<Axes, Observation> = BTreeMap::new();
    for decl in module.declarations() {
        collect(&decl.body, &decl.name, &mut seen)?;
    }
    Ok(CarrierMap {
        entries: seen
            .into_iter()
            .map(|(axes, obs)| (axes, obs.carrier))
            .collect(),
    })
}

fn collect(
    expr: &StampedExpr,
    decl: &str,
    seen: &mut BTreeMap<Axes, Observation>,
) -> Result<(), Diagnostic> {
    if let StampedKind::Input(path) = &expr.kind {
        let depth = expr.axes().len().min(path.len());
        for k in 1..=depth {
            let axes = expr.axes().prefix(k);
            let carrier = path.prefix(k);
            match seen.get(&axes) {
                Some(prev) if prev.carrier != carrier => {
                    return Err(Diagnostic::error(
                        codes::E0201,
                        expr.span,
                        format!(
                            "ambiguous carrier for {}: `{}` (via {}) and `{}` (via {})",
                            axes, prev.carrier, prev.origin, carrier, path
                        ),
                    )
                    .with_related(
                        prev.span,
                        format!("`{}` first seen here, in `{}`", prev.origin, prev.decl),
                    )
                    .with_hint("load each axis from a single field path")
                    .in_decl(decl));
                }
                Some(_) => {}
                None => {
                    seen.insert(
                        axes,
                        Observation {
                            carrier,
                            origin: path.clone(),
                            decl: decl.to_string(),
                            span: expr.span,
                        },
                    );
                }
            }
        }
    }
    for child in expr.children() {
        collect(child, decl, seen)?;
    }
    Ok(())
}

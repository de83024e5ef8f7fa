// axes.rs — Axis tokens and axis vectors
//
// An axis vector lists the loop dimensions a value varies over, outermost
// first. Broadcasting never reorders or invents axes: two vectors combine only
// when one is a literal prefix of the other (LUB-by-prefix).
//
// Preconditions: none.
// Postconditions: `lub_by_prefix` returns the longest candidate, and every
//   other candidate is a prefix of it.
// Failure modes: non-prefix-related candidates are reported as a pair.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A named loop dimension, one level of array nesting in the source data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Axis(pub String);

impl Axis {
    pub fn new(name: impl Into<String>) -> Self {
        Axis(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered axis vector, outermost first.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Axes(Vec<Axis>);

impl Axes {
    pub fn new(axes: Vec<Axis>) -> Self {
        Axes(axes)
    }

    /// The empty vector: a value that varies over nothing.
    pub fn scalar() -> Self {
        Axes(Vec::new())
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Axes(names.into_iter().map(|n| Axis(n.into())).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Axis> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Axis] {
        &self.0
    }

    pub fn last(&self) -> Option<&Axis> {
        self.0.last()
    }

    /// True if `self` equals `other` index-wise up to `self.len()`.
    pub fn is_prefix_of(&self, other: &Axes) -> bool {
        self.0.len() <= other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| a == b)
    }

    pub fn common_prefix_len(&self, other: &Axes) -> usize {
        self.0
            .iter()
            .zip(&other.0)
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// The first `k` axes (clamped to the vector's length).
    pub fn prefix(&self, k: usize) -> Axes {
        Axes(self.0[..k.min(self.0.len())].to_vec())
    }

    pub fn concat(&self, tail: &Axes) -> Axes {
        let mut out = self.0.clone();
        out.extend(tail.0.iter().cloned());
        Axes(out)
    }

    /// Remove `suffix` from the end, if `self` ends with it.
    pub fn strip_suffix(&self, suffix: &Axes) -> Option<Axes> {
        if suffix.0.len() > self.0.len() {
            return None;
        }
        let split = self.0.len() - suffix.0.len();
        if self.0[split..] == suffix.0[..] {
            Some(Axes(self.0[..split].to_vec()))
        } else {
            None
        }
    }

    /// Split off the innermost axis. Scalars yield `(scalar, None)`.
    pub fn split_last(&self) -> (Axes, Option<Axis>) {
        match self.0.split_last() {
            Some((last, rest)) => (Axes(rest.to_vec()), Some(last.clone())),
            None => (Axes::scalar(), None),
        }
    }
}

impl fmt::Display for Axes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, axis) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", axis)?;
        }
        f.write_str("]")
    }
}

impl<'a> IntoIterator for &'a Axes {
    type Item = &'a Axis;
    type IntoIter = std::slice::Iter<'a, Axis>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Two axis vectors that failed to combine under LUB-by-prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixConflict {
    pub candidate: Axes,
    pub other: Axes,
}

impl fmt::Display for PrefixConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "axis vectors {} and {} are not prefix-related",
            self.other, self.candidate
        )
    }
}

/// Least upper bound of axis vectors under the prefix order.
///
/// The longest vector (first one on ties) is the candidate; every other vector
/// must be a literal prefix of it. An empty input yields the scalar vector.
pub fn lub_by_prefix<'a, I>(vectors: I) -> Result<Axes, PrefixConflict>
where
    I: IntoIterator<Item = &'a Axes>,
{
    let vectors: Vec<&Axes> = vectors.into_iter().collect();
    let candidate = match vectors.iter().copied().reduce(|best, v| {
        if v.len() > best.len() {
            v
        } else {
            best
        }
    }) {
        Some(c) => c,
        None => return Ok(Axes::scalar()),
    };
    for v in &vectors {
        if !v.is_prefix_of(candidate) {
            return Err(PrefixConflict {
                candidate: candidate.clone(),
                other: (*v).clone(),
            });
        }
    }
    Ok(candidate.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ax(names: &[&str]) -> Axes {
        Axes::from_names(names.iter().copied())
    }

    #[test]
    fn prefix_relation() {
        assert!(ax(&[]).is_prefix_of(&ax(&["a"])));
        assert!(ax(&["a"]).is_prefix_of(&ax(&["a", "b"])));
        assert!(ax(&["a", "b"]).is_prefix_of(&ax(&["a", "b"])));
        assert!(!ax(&["b"]).is_prefix_of(&ax(&["a", "b"])));
        assert!(!ax(&["a", "b"]).is_prefix_of(&ax(&["a"])));
    }

    #[test]
    fn lub_picks_longest() {
        let a = ax(&["orders"]);
        let b = ax(&["orders", "lines"]);
        let s = ax(&[]);
        assert_eq!(lub_by_prefix([&a, &b, &s]).unwrap(), b);
    }

    #[test]
    fn lub_of_nothing_is_scalar() {
        assert_eq!(lub_by_prefix(std::iter::empty()).unwrap(), Axes::scalar());
    }

    #[test]
    fn lub_rejects_siblings() {
        let a = ax(&["orders", "lines"]);
        let b = ax(&["orders", "payments"]);
        let err = lub_by_prefix([&a, &b]).unwrap_err();
        assert_eq!(err.candidate, a);
        assert_eq!(err.other, b);
        assert_eq!(
            err.to_string(),
            "axis vectors [orders, payments] and [orders, lines] are not prefix-related"
        );
    }

    #[test]
    fn strip_suffix_and_split_last() {
        let v = ax(&["a", "b", "c"]);
        assert_eq!(v.strip_suffix(&ax(&["b", "c"])), Some(ax(&["a"])));
        assert_eq!(v.strip_suffix(&ax(&["b"])), None);
        assert_eq!(v.split_last(), (ax(&["a", "b"]), Some(Axis::new("c"))));
        assert_eq!(ax(&[]).split_last(), (ax(&[]), None));
    }

    #[test]
    fn common_prefix() {
        assert_eq!(ax(&["a", "b"]).common_prefix_len(&ax(&["a", "c"])), 1);
        assert_eq!(ax(&["a"]).common_prefix_len(&ax(&["a", "b"])), 1);
        assert_eq!(ax(&["x"]).common_prefix_len(&ax(&["a"])), 0);
    }

    #[test]
    fn display() {
        assert_eq!(ax(&["items", "lines"]).to_string(), "[items, lines]");
        assert_eq!(Axes::scalar().to_string(), "[]");
    }
}

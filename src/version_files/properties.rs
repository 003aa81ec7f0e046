//! Property bags and the reconciliation rules used when two sides of a flow
//! changed the same version property.

use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A single typed property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Bool(bool),
    Integer(i64),
    String(String),
    List(Vec<String>),
}

impl PropertyValue {
    /// Infer the type of a raw value read from a version file.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("true") {
            PropertyValue::Bool(true)
        } else if trimmed.eq_ignore_ascii_case("false") {
            PropertyValue::Bool(false)
        } else if let Ok(number) = trimmed.parse::<i64>() {
            PropertyValue::Integer(number)
        } else {
            PropertyValue::String(trimmed.to_string())
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            PropertyValue::Bool(_) => "boolean",
            PropertyValue::Integer(_) => "integer",
            PropertyValue::String(_) => "string",
            PropertyValue::List(_) => "list",
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(b) => write!(f, "{}", b),
            PropertyValue::Integer(i) => write!(f, "{}", i),
            PropertyValue::String(s) => write!(f, "{}", s),
            PropertyValue::List(items) => write!(f, "{}", items.join(";")),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::parse(value)
    }
}

/// Ordered name → value map, the common form of every version file.
pub type PropertyBag = BTreeMap<String, PropertyValue>;

/// How a property differs between two copies of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyChange {
    Added { name: String, value: PropertyValue },
    Removed { name: String },
    Updated { name: String, value: PropertyValue },
}

impl PropertyChange {
    pub fn name(&self) -> &str {
        match self {
            PropertyChange::Added { name, .. }
            | PropertyChange::Removed { name }
            | PropertyChange::Updated { name, .. } => name,
        }
    }
}

/// Changes that turn `base` into `changed`, ordered by property name.
pub fn diff_properties(base: &PropertyBag, changed: &PropertyBag) -> Vec<PropertyChange> {
    let names: BTreeSet<&String> = base.keys().chain(changed.keys()).collect();
    names
        .into_iter()
        .filter_map(|name| match (base.get(name), changed.get(name)) {
            (None, Some(value)) => Some(PropertyChange::Added {
                name: name.clone(),
                value: value.clone(),
            }),
            (Some(_), None) => Some(PropertyChange::Removed { name: name.clone() }),
            (Some(old), Some(new)) if old != new => Some(PropertyChange::Updated {
                name: name.clone(),
                value: new.clone(),
            }),
            _ => None,
        })
        .collect()
}

fn mismatch(name: &str, a: &PropertyValue, b: &PropertyValue, message: &str) -> Error {
    Error::Reconciliation {
        property: name.to_string(),
        left: a.to_string(),
        right: b.to_string(),
        message: message.to_string(),
    }
}

/// Pick the value that survives when both sides hold the property.
///
/// Booleans must agree, integers pick the larger value and strings are
/// compared as semantic versions. Values of equal precedence keep `a`.
pub fn select_winning_property(
    name: &str,
    a: Option<&PropertyValue>,
    b: Option<&PropertyValue>,
) -> Result<Option<PropertyValue>> {
    let (a, b) = match (a, b) {
        (None, None) => return Ok(None),
        (Some(a), None) => return Ok(Some(a.clone())),
        (None, Some(b)) => return Ok(Some(b.clone())),
        (Some(a), Some(b)) => (a, b),
    };

    match (a, b) {
        (PropertyValue::List(_), _) | (_, PropertyValue::List(_)) => {
            Err(mismatch(name, a, b, "list values cannot be reconciled"))
        }
        (PropertyValue::Bool(x), PropertyValue::Bool(y)) => {
            if x == y {
                Ok(Some(a.clone()))
            } else {
                Err(mismatch(name, a, b, "conflicting boolean values"))
            }
        }
        (PropertyValue::Integer(x), PropertyValue::Integer(y)) => {
            Ok(Some(if y > x { b.clone() } else { a.clone() }))
        }
        (PropertyValue::String(x), PropertyValue::String(y)) => {
            let left = semver::Version::parse(x)
                .map_err(|_| mismatch(name, a, b, "not a semantic version"))?;
            let right = semver::Version::parse(y)
                .map_err(|_| mismatch(name, a, b, "not a semantic version"))?;
            Ok(Some(if compare_precedence(&right, &left).is_gt() {
                b.clone()
            } else {
                a.clone()
            }))
        }
        _ => Err(mismatch(
            name,
            a,
            b,
            &format!("type mismatch ({} vs {})", a.kind(), b.kind()),
        )),
    }
}

/// Semantic version precedence, ignoring build metadata.
pub fn compare_precedence(a: &semver::Version, b: &semver::Version) -> std::cmp::Ordering {
    (a.major, a.minor, a.patch, &a.pre).cmp(&(b.major, b.minor, b.patch, &b.pre))
}

/// Three-way merge of property bags.
///
/// A property changed on only one side takes that side's value. When both
/// sides changed it to different values, [`select_winning_property`] picks
/// the winner. Removing a property on one side while the other updates it
/// is an error.
pub fn merge_properties(
    base: &PropertyBag,
    ours: &PropertyBag,
    theirs: &PropertyBag,
) -> Result<PropertyBag> {
    let names: BTreeSet<&String> = base
        .keys()
        .chain(ours.keys())
        .chain(theirs.keys())
        .collect();

    let mut merged = PropertyBag::new();
    for name in names {
        let original = base.get(name);
        let mine = ours.get(name);
        let other = theirs.get(name);

        let value = match (mine != original, other != original) {
            (false, false) => original.cloned(),
            (true, false) => mine.cloned(),
            (false, true) => other.cloned(),
            (true, true) if mine == other => mine.cloned(),
            (true, true) => match (mine, other) {
                (Some(m), Some(o)) => select_winning_property(name, Some(m), Some(o))?,
                (Some(present), None) | (None, Some(present)) => {
                    return Err(Error::Reconciliation {
                        property: name.clone(),
                        left: mine.map(|v| v.to_string()).unwrap_or_default(),
                        right: other.map(|v| v.to_string()).unwrap_or_default(),
                        message: format!(
                            "removed on one side and changed to '{}' on the other",
                            present
                        ),
                    });
                }
                (None, None) => None,
            },
        };

        if let Some(value) = value {
            merged.insert(name.clone(), value);
        }
    }
    Ok(merged)
}

//! Typed tags attached to documents.

use crate::error::{CoreError, CoreResult};
use std::collections::btree_map::{self, BTreeMap};
use std::fmt;

/// The four tag value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    /// Boolean tag.
    Bool,
    /// 64-bit signed integer tag.
    Int,
    /// 64-bit float tag.
    Float,
    /// UTF-8 string tag.
    Str,
}

impl TagKind {
    /// Name of the log function that assigns a tag of this type.
    #[must_use]
    pub const fn function_name(self) -> &'static str {
        match self {
            Self::Bool => "btg",
            Self::Int => "itg",
            Self::Float => "ftg",
            Self::Str => "stg",
        }
    }

    /// Resolves a log function name.
    #[must_use]
    pub fn from_function_name(name: &[u8]) -> Option<Self> {
        match name {
            b"btg" => Some(Self::Bool),
            b"itg" => Some(Self::Int),
            b"ftg" => Some(Self::Float),
            b"stg" => Some(Self::Str),
            _ => None,
        }
    }
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "string",
        })
    }
}

/// A typed tag value.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// String value.
    Str(String),
}

impl TagValue {
    /// Returns the type of this value.
    #[must_use]
    pub fn kind(&self) -> TagKind {
        match self {
            Self::Bool(_) => TagKind::Bool,
            Self::Int(_) => TagKind::Int,
            Self::Float(_) => TagKind::Float,
            Self::Str(_) => TagKind::Str,
        }
    }

    /// Equality as used by the tag indices.
    ///
    /// Floats compare by canonical bit pattern, so `NaN` equals `NaN` and
    /// `-0.0` equals `0.0`.
    #[must_use]
    pub fn index_eq(&self, other: &TagValue) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => FloatKey::new(*a) == FloatKey::new(*b),
            _ => self == other,
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl TryFrom<&serde_json::Value> for TagValue {
    type Error = CoreError;

    fn try_from(value: &serde_json::Value) -> CoreResult<Self> {
        use serde_json::Value;
        match value {
            Value::Bool(v) => Ok(Self::Bool(*v)),
            Value::Number(n) => match n.as_i64() {
                Some(v) => Ok(Self::Int(v)),
                None => n
                    .as_f64()
                    .map(Self::Float)
                    .ok_or_else(|| CoreError::invalid_tag_type(format!("unrepresentable number {n}"))),
            },
            Value::String(v) => Ok(Self::Str(v.clone())),
            Value::Null => Err(CoreError::invalid_tag_type("null cannot be a tag value")),
            Value::Array(_) => Err(CoreError::invalid_tag_type("array cannot be a tag value")),
            Value::Object(_) => Err(CoreError::invalid_tag_type("object cannot be a tag value")),
        }
    }
}

/// Hashable identity of a float tag value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FloatKey(u64);

impl FloatKey {
    /// Canonicalizes `-0.0` to `0.0` and every `NaN` to one bit pattern.
    #[must_use]
    pub fn new(value: f64) -> Self {
        let canonical = if value == 0.0 {
            0.0
        } else if value.is_nan() {
            f64::NAN
        } else {
            value
        };
        Self(canonical.to_bits())
    }

    /// Returns the float value.
    #[must_use]
    pub fn value(self) -> f64 {
        f64::from_bits(self.0)
    }
}

/// Checks that a tag name can be written to the log.
///
/// Names must be non-empty and must not contain `,`, `(`, `)`, CR or LF.
///
/// # Errors
///
/// Returns [`CoreError::InvalidTagName`] otherwise.
pub fn validate_tag_name(name: &str) -> CoreResult<()> {
    let forbidden = |c: char| matches!(c, ',' | '(' | ')' | '\r' | '\n');
    if name.is_empty() || name.contains(forbidden) {
        return Err(CoreError::InvalidTagName {
            name: name.to_owned(),
        });
    }
    Ok(())
}

/// A named, typed tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    name: String,
    value: TagValue,
}

impl Tag {
    /// Creates a tag from a name and value.
    pub fn new(name: impl Into<String>, value: impl Into<TagValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Creates a boolean tag.
    pub fn bool(name: impl Into<String>, value: bool) -> Self {
        Self::new(name, TagValue::Bool(value))
    }

    /// Creates an integer tag.
    pub fn int(name: impl Into<String>, value: i64) -> Self {
        Self::new(name, TagValue::Int(value))
    }

    /// Creates a float tag.
    pub fn float(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, TagValue::Float(value))
    }

    /// Creates a string tag.
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, TagValue::Str(value.into()))
    }

    /// Returns the tag name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the tag value.
    #[must_use]
    pub fn value(&self) -> &TagValue {
        &self.value
    }

    /// Splits the tag into name and value.
    #[must_use]
    pub fn into_parts(self) -> (String, TagValue) {
        (self.name, self.value)
    }
}

/// The tags of one document, keyed by name.
///
/// A name holds exactly one typed value. Rebinding a name to a value of a
/// different type fails with [`CoreError::ConflictingTagType`]; remove the
/// tag first to change its type. Iteration is in name order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagSet {
    tags: BTreeMap<String, TagValue>,
}

impl TagSet {
    /// Creates an empty tag set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a tag set from tags.
    ///
    /// # Errors
    ///
    /// Fails on an invalid name or when one name is given two types.
    pub fn from_tags(tags: impl IntoIterator<Item = Tag>) -> CoreResult<Self> {
        let mut set = Self::new();
        for tag in tags {
            set.insert(tag)?;
        }
        Ok(set)
    }

    /// Builds a tag set from a JSON object.
    ///
    /// Booleans, numbers and strings are accepted; integral numbers become
    /// [`TagValue::Int`], other numbers [`TagValue::Float`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidTagType`] for null, array or object values.
    pub fn from_json_map(map: &serde_json::Map<String, serde_json::Value>) -> CoreResult<Self> {
        let mut set = Self::new();
        for (name, value) in map {
            let value = TagValue::try_from(value).map_err(|err| match err {
                CoreError::InvalidTagType { message } => {
                    CoreError::invalid_tag_type(format!("tag {name}: {message}"))
                }
                other => other,
            })?;
            set.insert(Tag::new(name.clone(), value))?;
        }
        Ok(set)
    }

    /// Builder form of [`TagSet::insert`].
    ///
    /// # Errors
    ///
    /// See [`TagSet::insert`].
    pub fn with(mut self, tag: Tag) -> CoreResult<Self> {
        self.insert(tag)?;
        Ok(self)
    }

    /// Binds a tag, returning the previous value under the same name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidTagName`] for names the log cannot carry
    /// and [`CoreError::ConflictingTagType`] if the name is bound to a value
    /// of another type.
    pub fn insert(&mut self, tag: Tag) -> CoreResult<Option<TagValue>> {
        validate_tag_name(tag.name())?;
        self.check_compatible(&tag)?;
        let (name, value) = tag.into_parts();
        Ok(self.tags.insert(name, value))
    }

    /// Binds several tags, all or none.
    ///
    /// # Errors
    ///
    /// See [`TagSet::insert`]. On error the set is unchanged.
    pub fn merge(&mut self, tags: &[Tag]) -> CoreResult<()> {
        let mut merged = self.clone();
        for tag in tags {
            merged.insert(tag.clone())?;
        }
        *self = merged;
        Ok(())
    }

    fn check_compatible(&self, tag: &Tag) -> CoreResult<()> {
        match self.tags.get(tag.name()) {
            Some(existing) if existing.kind() != tag.value().kind() => {
                Err(CoreError::ConflictingTagType {
                    name: tag.name().to_owned(),
                    existing: existing.kind(),
                    requested: tag.value().kind(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Removes a tag by name.
    pub fn remove(&mut self, name: &str) -> Option<TagValue> {
        self.tags.remove(name)
    }

    /// Returns the value bound to `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TagValue> {
        self.tags.get(name)
    }

    /// Returns a boolean tag.
    #[must_use]
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some(TagValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    /// Returns an integer tag.
    #[must_use]
    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(TagValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Returns a float tag.
    #[must_use]
    pub fn get_float(&self, name: &str) -> Option<f64> {
        match self.get(name) {
            Some(TagValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    /// Returns a string tag.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(TagValue::Str(v)) => Some(v),
            _ => None,
        }
    }

    /// Returns true if a tag with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tags.contains_key(name)
    }

    /// Iterates over `(name, value)` pairs in name order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, TagValue> {
        self.tags.iter()
    }

    /// Returns the number of tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Returns true if there are no tags.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Returns the tags as owned [`Tag`]s in name order.
    #[must_use]
    pub fn to_tags(&self) -> Vec<Tag> {
        self.iter()
            .map(|(name, value)| Tag::new(name.clone(), value.clone()))
            .collect()
    }
}

impl<'a> IntoIterator for &'a TagSet {
    type Item = (&'a String, &'a TagValue);
    type IntoIter = btree_map::Iter<'a, String, TagValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

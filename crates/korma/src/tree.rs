//! The manifest object model.
//!
//! Manifest trees are built from [`Node`]s, open containers of string-keyed
//! children. How a node turns into JSON is decided by its [`NodeKind`], which
//! is picked at construction time: plain maps, arrays of named records (the
//! shape Kubernetes uses for `env`, `volumes` and friends) and workload
//! containers with registry-qualified images.

use indexmap::IndexMap;
use serde_json::{Map, Value as JsonValue};
use snafu::{OptionExt, Snafu};

use crate::render::RenderContext;

/// Marks a container image as final, bypassing registry injection.
pub const IMAGE_SIGIL: char = '!';

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Snafu)]
pub enum Error {
    #[snafu(display("key {key:?} holds a plain value, not a nested node"))]
    NotANode { key: String },

    #[snafu(display("expected a JSON object, got {value}"))]
    NotAnObject { value: JsonValue },

    #[snafu(display("container is missing the image field"))]
    MissingImage,

    #[snafu(display("container image must be a string, got {image}"))]
    ImageNotAString { image: JsonValue },

    #[snafu(display("list entry {key:?} expands to the non-record element {element}"))]
    RecordExpected { key: String, element: JsonValue },
}

/// The serialization law of a [`Node`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NodeKind {
    /// A JSON object, children serialized in insertion order.
    #[default]
    Map,

    /// An array of `{name, ..}` records, one (or, for raw-list children, one
    /// per element) for each key. Scalar children become `{name, value}`.
    List,

    /// Like [`NodeKind::List`], but scalar children become
    /// `{name, containerPort}`.
    Ports,

    /// A JSON object whose `image` field gets the active registry prepended,
    /// unless it carries the [`IMAGE_SIGIL`] prefix.
    Container,
}

impl NodeKind {
    fn scalar_key(self) -> &'static str {
        match self {
            Self::Ports => "containerPort",
            _ => "value",
        }
    }
}

/// One child slot of a [`Node`].
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// A plain scalar, passed through serialization unchanged.
    Scalar(JsonValue),

    /// A raw list, passed through unless the parent is a record list.
    Items(Vec<JsonValue>),

    /// A nested node, serialized recursively.
    Node(Node),
}

impl Value {
    fn serialize(&self, ctx: &RenderContext) -> Result<JsonValue> {
        match self {
            Self::Scalar(value) => Ok(value.clone()),
            Self::Items(items) => Ok(JsonValue::Array(items.clone())),
            Self::Node(node) => node.serialize(ctx),
        }
    }

    /// Returns the nested node, if this slot holds one.
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Self::Node(node) => Some(node),
            _ => None,
        }
    }
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        match value {
            // JSON objects always enter the tree as nodes, so overlays can
            // keep drilling into them.
            JsonValue::Object(map) => Self::Node(Node::from(map)),
            JsonValue::Array(items) => Self::Items(items),
            other => Self::Scalar(other),
        }
    }
}

impl From<Node> for Value {
    fn from(node: Node) -> Self {
        Self::Node(node)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Scalar(JsonValue::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Scalar(JsonValue::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Scalar(JsonValue::from(value))
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Scalar(JsonValue::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Scalar(JsonValue::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Scalar(JsonValue::from(value))
    }
}

/// An open, insertion-ordered container of manifest fields.
///
/// Cloning a node is a structural deep copy, the clone shares no children
/// with the original. Serialization borrows the tree immutably and can
/// therefore never create children as a side effect; the only entry points
/// that do are [`Node::child`] and [`Node::at`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Node {
    kind: NodeKind,
    children: IndexMap<String, Value>,
}

impl Node {
    /// An empty node serializing as a JSON object.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty node serializing as an array of named records.
    pub fn list() -> Self {
        Self {
            kind: NodeKind::List,
            children: IndexMap::new(),
        }
    }

    /// An empty node serializing as an array of container port records.
    pub fn ports() -> Self {
        Self {
            kind: NodeKind::Ports,
            children: IndexMap::new(),
        }
    }

    /// An empty node serializing as a workload container.
    pub fn container() -> Self {
        Self {
            kind: NodeKind::Container,
            children: IndexMap::new(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Replaces the serialization law, keeping the stored children.
    pub fn into_kind(mut self, kind: NodeKind) -> Self {
        self.kind = kind;
        self
    }

    pub(crate) fn set_kind(&mut self, kind: NodeKind) {
        self.kind = kind;
    }

    /// Looks up a child without creating it.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.children.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.children.get_mut(key)
    }

    /// Returns the nested node stored under `key`, if any.
    pub fn get_node(&self, key: &str) -> Option<&Node> {
        self.get(key).and_then(Value::as_node)
    }

    /// Returns the nested node stored under `key`, creating an empty one if
    /// the key is absent.
    ///
    /// This is the only auto-vivifying access path. A key that already holds
    /// a scalar or raw list cannot be descended into and fails with
    /// [`Error::NotANode`].
    pub fn child(&mut self, key: impl Into<String>) -> Result<&mut Self> {
        let key = key.into();
        let slot = self
            .children
            .entry(key.clone())
            .or_insert_with(|| Value::Node(Self::new()));
        match slot {
            Value::Node(node) => Ok(node),
            _ => NotANodeSnafu { key }.fail(),
        }
    }

    /// [`Node::child`] folded over a path, vivifying one level per step.
    pub fn at<'a>(&mut self, path: impl IntoIterator<Item = &'a str>) -> Result<&mut Self> {
        let mut node = self;
        for key in path {
            node = node.child(key)?;
        }
        Ok(node)
    }

    /// Stores a value under `key`. JSON objects are wrapped as nested nodes.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.children.insert(key.into(), value.into());
    }

    /// Shallow-merges `entries` into this node, last write wins per key.
    pub fn update<K, V>(&mut self, entries: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<Value>,
    {
        for (key, value) in entries {
            self.children.insert(key.into(), value.into());
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.children.shift_remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.children.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Renders the tree into plain JSON according to the node's kind.
    pub fn serialize(&self, ctx: &RenderContext) -> Result<JsonValue> {
        match self.kind {
            NodeKind::Map => Ok(JsonValue::Object(self.serialize_map(ctx)?)),
            NodeKind::Container => self.serialize_container(ctx),
            NodeKind::List | NodeKind::Ports => self.serialize_records(ctx),
        }
    }

    fn serialize_map(&self, ctx: &RenderContext) -> Result<Map<String, JsonValue>> {
        let mut fields = Map::new();
        for (key, value) in &self.children {
            fields.insert(key.clone(), value.serialize(ctx)?);
        }
        Ok(fields)
    }

    fn serialize_records(&self, ctx: &RenderContext) -> Result<JsonValue> {
        let mut records = Vec::with_capacity(self.children.len());
        for (key, value) in &self.children {
            match value {
                Value::Node(node) => {
                    let mut record = named_record(key);
                    match node.serialize(ctx)? {
                        JsonValue::Object(fields) => record.extend(fields),
                        element => {
                            return RecordExpectedSnafu {
                                key: key.clone(),
                                element,
                            }
                            .fail();
                        }
                    }
                    records.push(JsonValue::Object(record));
                }
                // A raw list expands into one record per element, which
                // allows e.g. mounting the same named volume several times.
                Value::Items(items) => {
                    for item in items {
                        let JsonValue::Object(fields) = item else {
                            return RecordExpectedSnafu {
                                key: key.clone(),
                                element: item.clone(),
                            }
                            .fail();
                        };
                        let mut record = named_record(key);
                        record.extend(fields.clone());
                        records.push(JsonValue::Object(record));
                    }
                }
                Value::Scalar(scalar) => {
                    let mut record = named_record(key);
                    record.insert(self.kind.scalar_key().to_owned(), scalar.clone());
                    records.push(JsonValue::Object(record));
                }
            }
        }
        Ok(JsonValue::Array(records))
    }

    fn serialize_container(&self, ctx: &RenderContext) -> Result<JsonValue> {
        let mut fields = self.serialize_map(ctx)?;
        let image = fields.get("image").context(MissingImageSnafu)?;
        let image = image
            .as_str()
            .context(ImageNotAStringSnafu {
                image: image.clone(),
            })?
            .to_owned();

        let resolved = match image.strip_prefix(IMAGE_SIGIL) {
            Some(verbatim) => verbatim.to_owned(),
            None => format!("{registry}/{image}", registry = ctx.registry),
        };
        fields.insert("image".to_owned(), JsonValue::String(resolved));
        Ok(JsonValue::Object(fields))
    }
}

fn named_record(key: &str) -> Map<String, JsonValue> {
    let mut record = Map::new();
    record.insert("name".to_owned(), JsonValue::String(key.to_owned()));
    record
}

impl From<Map<String, JsonValue>> for Node {
    fn from(map: Map<String, JsonValue>) -> Self {
        let mut node = Self::new();
        for (key, value) in map {
            node.set(key, value);
        }
        node
    }
}

impl TryFrom<JsonValue> for Node {
    type Error = Error;

    fn try_from(value: JsonValue) -> Result<Self> {
        match value {
            JsonValue::Object(map) => Ok(Self::from(map)),
            value => NotAnObjectSnafu { value }.fail(),
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Node
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut node = Self::new();
        node.update(iter);
        node
    }
}

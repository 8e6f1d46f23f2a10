use std::{fs, path::PathBuf};

use base64::{Engine, engine::general_purpose::STANDARD};
use indexmap::IndexMap;
use serde_json::{Map, Value as JsonValue};
use snafu::{ResultExt, Snafu, ensure};

use crate::{
    builder::base_metadata,
    render::{RenderContext, RenderError},
    resource::{Kind, envelope},
    tree::{self, Node},
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("`data` and `binary_data` cannot contain the same keys: {keys:?}"))]
    DuplicateKeys { keys: Vec<String> },

    #[snafu(display("failed to read config file {path}", path = path.display()))]
    ReadFile {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to render config file {file:?}"))]
    RenderFile { source: RenderError, file: String },

    #[snafu(display("failed to serialize ConfigMap metadata"))]
    Metadata { source: tree::Error },
}

/// One entry of the text `data` map.
#[derive(Clone, Debug, PartialEq)]
pub enum DataValue {
    /// An inline scalar, stringified on serialization.
    Inline(JsonValue),

    /// A file below the config directory, rendered through the template
    /// collaborator with `context` before being inlined.
    File {
        file: String,
        context: IndexMap<String, JsonValue>,
    },
}

impl From<JsonValue> for DataValue {
    fn from(value: JsonValue) -> Self {
        Self::Inline(value)
    }
}

impl From<&str> for DataValue {
    fn from(value: &str) -> Self {
        Self::Inline(JsonValue::from(value))
    }
}

impl From<String> for DataValue {
    fn from(value: String) -> Self {
        Self::Inline(JsonValue::from(value))
    }
}

/// One entry of the `binary_data` map, base64-encoded on serialization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BinaryValue {
    Inline(Vec<u8>),
    File { file: String },
}

impl From<Vec<u8>> for BinaryValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Inline(bytes)
    }
}

impl From<&[u8]> for BinaryValue {
    fn from(bytes: &[u8]) -> Self {
        Self::Inline(bytes.to_vec())
    }
}

/// A config map. Unlike the workload kinds it owns flat `data` and
/// `binary_data` maps instead of a spec tree; file-backed entries are only
/// resolved at serialization time.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigMap {
    name: String,
    pub metadata: Node,
    pub data: IndexMap<String, DataValue>,
    pub binary_data: IndexMap<String, BinaryValue>,
    pub immutable: bool,
}

impl ConfigMap {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets `metadata.name`, the only name path a config map carries.
    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.metadata.set("name", name.as_str());
        self.name = name;
    }

    pub fn serialize(&self, ctx: &RenderContext) -> Result<JsonValue> {
        let duplicates: Vec<String> = self
            .data
            .keys()
            .filter(|key| self.binary_data.contains_key(*key))
            .cloned()
            .collect();
        ensure!(duplicates.is_empty(), DuplicateKeysSnafu { keys: duplicates });

        let mut manifest = envelope(Kind::ConfigMap);
        manifest.insert(
            "metadata".to_owned(),
            self.metadata.serialize(ctx).context(MetadataSnafu)?,
        );
        if !self.data.is_empty() {
            manifest.insert("data".to_owned(), JsonValue::Object(self.prepare_data(ctx)?));
        }
        if !self.binary_data.is_empty() {
            manifest.insert(
                "binaryData".to_owned(),
                JsonValue::Object(self.prepare_binary_data(ctx)?),
            );
        }
        if self.immutable {
            manifest.insert("immutable".to_owned(), JsonValue::Bool(true));
        }
        Ok(JsonValue::Object(manifest))
    }

    fn prepare_data(&self, ctx: &RenderContext) -> Result<Map<String, JsonValue>> {
        let mut prepared = Map::new();
        for (key, value) in &self.data {
            let rendered = match value {
                DataValue::Inline(JsonValue::String(text)) => text.clone(),
                DataValue::Inline(scalar) => scalar.to_string(),
                DataValue::File { file, context } => {
                    let path = ctx.config_dir.join(file);
                    let template =
                        fs::read_to_string(&path).context(ReadFileSnafu { path: path.clone() })?;
                    ctx.renderer
                        .render(&template, context)
                        .context(RenderFileSnafu { file: file.clone() })?
                }
            };
            prepared.insert(key.clone(), JsonValue::String(rendered));
        }
        Ok(prepared)
    }

    fn prepare_binary_data(&self, ctx: &RenderContext) -> Result<Map<String, JsonValue>> {
        let mut prepared = Map::new();
        for (key, value) in &self.binary_data {
            let encoded = match value {
                BinaryValue::Inline(bytes) => STANDARD.encode(bytes),
                BinaryValue::File { file } => {
                    let path = ctx.config_dir.join(file);
                    let bytes = fs::read(&path).context(ReadFileSnafu { path: path.clone() })?;
                    STANDARD.encode(bytes)
                }
            };
            prepared.insert(key.clone(), JsonValue::String(encoded));
        }
        Ok(prepared)
    }
}

/// A builder to build [`ConfigMap`] objects.
#[derive(Clone, Debug)]
pub struct ConfigMapBuilder {
    name: String,
    data: IndexMap<String, DataValue>,
    binary_data: IndexMap<String, BinaryValue>,
    immutable: bool,
    annotations: IndexMap<String, String>,
    metadata: Option<Node>,
}

impl ConfigMapBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: IndexMap::new(),
            binary_data: IndexMap::new(),
            immutable: false,
            annotations: IndexMap::new(),
            metadata: None,
        }
    }

    pub fn add_data(&mut self, key: impl Into<String>, value: impl Into<DataValue>) -> &mut Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn add_data_file(
        &mut self,
        key: impl Into<String>,
        file: impl Into<String>,
        context: IndexMap<String, JsonValue>,
    ) -> &mut Self {
        self.data.insert(
            key.into(),
            DataValue::File {
                file: file.into(),
                context,
            },
        );
        self
    }

    pub fn add_binary_data(
        &mut self,
        key: impl Into<String>,
        value: impl Into<BinaryValue>,
    ) -> &mut Self {
        self.binary_data.insert(key.into(), value.into());
        self
    }

    pub fn add_binary_data_file(
        &mut self,
        key: impl Into<String>,
        file: impl Into<String>,
    ) -> &mut Self {
        self.binary_data
            .insert(key.into(), BinaryValue::File { file: file.into() });
        self
    }

    pub fn immutable(&mut self, immutable: bool) -> &mut Self {
        self.immutable = immutable;
        self
    }

    pub fn add_annotation(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn metadata(&mut self, metadata: Node) -> &mut Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn build(&self) -> ConfigMap {
        let mut config_map = ConfigMap {
            name: String::new(),
            metadata: base_metadata(self.metadata.clone(), &self.annotations),
            data: self.data.clone(),
            binary_data: self.binary_data.clone(),
            immutable: self.immutable,
        };
        config_map.set_name(&self.name);
        config_map
    }
}

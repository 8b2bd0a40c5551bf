//! HCL manifest target.
//!
//! Resources accumulate in memory while tasks run and are written out once
//! at the end as `main.tf` plus a `data/` directory of attached blobs. All
//! collections are ordered, so the same task set always renders the same
//! bytes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::cloud::Cloud;
use crate::error::{Error, Result};
use crate::model::{Attr, Kind, Tags};

/// Manifest file name.
pub const MANIFEST_FILE: &str = "main.tf";
/// Directory holding attached blobs, relative to the manifest.
pub const DATA_DIR: &str = "data";

/// A value on the right-hand side of an attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum HclValue {
    String(String),
    Number(i64),
    Bool(bool),
    /// An interpolated reference, written as `"${expr}"`.
    Ref(String),
    /// An expression written verbatim, e.g. a `file(...)` call.
    Raw(String),
    List(Vec<HclValue>),
    Map(BTreeMap<String, HclValue>),
}

impl From<&str> for HclValue {
    fn from(s: &str) -> Self {
        HclValue::String(s.to_string())
    }
}

impl From<String> for HclValue {
    fn from(s: String) -> Self {
        HclValue::String(s)
    }
}

impl From<&String> for HclValue {
    fn from(s: &String) -> Self {
        HclValue::String(s.clone())
    }
}

impl From<i64> for HclValue {
    fn from(n: i64) -> Self {
        HclValue::Number(n)
    }
}

impl From<bool> for HclValue {
    fn from(b: bool) -> Self {
        HclValue::Bool(b)
    }
}

impl From<&Tags> for HclValue {
    fn from(tags: &Tags) -> Self {
        HclValue::Map(
            tags.iter()
                .map(|(k, v)| (k.clone(), HclValue::String(v.clone())))
                .collect(),
        )
    }
}

impl<T: Into<HclValue>> From<Vec<T>> for HclValue {
    fn from(items: Vec<T>) -> Self {
        HclValue::List(items.into_iter().map(Into::into).collect())
    }
}

/// A block body: sorted attributes followed by nested blocks in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HclBlock {
    attributes: BTreeMap<String, HclValue>,
    blocks: Vec<(String, HclBlock)>,
}

impl HclBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: impl Into<HclValue>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// Set `key` only when a value is present.
    pub fn set_opt<V: Into<HclValue>>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(key, v),
            None => self,
        }
    }

    pub fn block(mut self, name: &str, body: HclBlock) -> Self {
        self.blocks.push((name.to_string(), body));
        self
    }

    pub fn get(&self, key: &str) -> Option<&HclValue> {
        self.attributes.get(key)
    }

    fn write(&self, out: &mut String, indent: usize) {
        let pad = " ".repeat(indent);
        for (key, value) in &self.attributes {
            out.push_str(&pad);
            out.push_str(key);
            out.push_str(" = ");
            write_value(out, value, indent);
            out.push('\n');
        }
        for (name, body) in &self.blocks {
            out.push_str(&pad);
            out.push_str(name);
            out.push_str(" {\n");
            body.write(out, indent + 2);
            out.push_str(&pad);
            out.push_str("}\n");
        }
    }
}

fn quote(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('"');
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            '$' if chars.peek() == Some(&'{') => quoted.push_str("$$"),
            '%' if chars.peek() == Some(&'{') => quoted.push_str("%%"),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}

fn write_value(out: &mut String, value: &HclValue, indent: usize) {
    match value {
        HclValue::String(s) => out.push_str(&quote(s)),
        HclValue::Number(n) => out.push_str(&n.to_string()),
        HclValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        HclValue::Ref(expr) => {
            out.push_str("\"${");
            out.push_str(expr);
            out.push_str("}\"");
        }
        HclValue::Raw(expr) => out.push_str(expr),
        HclValue::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(out, item, indent);
            }
            out.push(']');
        }
        HclValue::Map(entries) if entries.is_empty() => out.push_str("{}"),
        HclValue::Map(entries) => {
            let pad = " ".repeat(indent + 2);
            out.push_str("{\n");
            for (key, value) in entries {
                out.push_str(&pad);
                out.push_str(&quote(key));
                out.push_str(" = ");
                write_value(out, value, indent + 2);
                out.push('\n');
            }
            out.push_str(&" ".repeat(indent));
            out.push('}');
        }
    }
}

/// Resource name as it may appear in an HCL address.
pub fn resource_name(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if sanitized
        .chars()
        .next()
        .map_or(true, |c| c.is_ascii_digit() || c == '-')
    {
        sanitized.insert(0, '_');
    }
    sanitized
}

#[derive(Default)]
struct HclState {
    resources: BTreeMap<(&'static str, String), HclBlock>,
    files: BTreeMap<String, String>,
    outputs: BTreeMap<String, HclValue>,
}

/// Renders tasks as an HCL resource graph.
pub struct HclTarget {
    region: String,
    cloud: Option<Arc<dyn Cloud>>,
    state: Mutex<HclState>,
}

impl HclTarget {
    pub fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
            cloud: None,
            state: Mutex::new(HclState::default()),
        }
    }

    /// Provider access for looking up shared resources.
    pub fn with_cloud(mut self, cloud: Arc<dyn Cloud>) -> Self {
        self.cloud = Some(cloud);
        self
    }

    pub fn cloud(&self) -> Option<&Arc<dyn Cloud>> {
        self.cloud.as_ref()
    }

    /// Reference to an attribute of another rendered resource.
    pub fn reference(kind: Kind, name: &str, attr: Attr) -> HclValue {
        HclValue::Ref(format!(
            "{}.{}.{}",
            kind.hcl_type(),
            resource_name(name),
            attr.hcl_name()
        ))
    }

    /// Emit a resource. Immutable-version kinds get `create_before_destroy`.
    pub async fn render_resource(&self, kind: Kind, name: &str, body: HclBlock) -> Result<()> {
        let body = if kind.is_versioned() {
            body.block(
                "lifecycle",
                HclBlock::new().set("create_before_destroy", true),
            )
        } else {
            body
        };
        self.render_typed(kind.hcl_type(), name, body).await
    }

    /// Emit a resource of a type that has no kind of its own (listeners,
    /// attachments).
    pub async fn render_typed(
        &self,
        hcl_type: &'static str,
        name: &str,
        body: HclBlock,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let key = (hcl_type, resource_name(name));
        if state.resources.contains_key(&key) {
            return Err(Error::Render(format!(
                "resource {}.{} rendered twice",
                key.0, key.1
            )));
        }
        state.resources.insert(key, body);
        Ok(())
    }

    /// Set an attribute on a resource rendered earlier in the run.
    pub async fn set_attribute(
        &self,
        kind: Kind,
        name: &str,
        key: &str,
        value: HclValue,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let address = (kind.hcl_type(), resource_name(name));
        let body = state.resources.get_mut(&address).ok_or_else(|| {
            Error::Render(format!(
                "resource {}.{} has not been rendered",
                address.0, address.1
            ))
        })?;
        body.attributes.insert(key.to_string(), value);
        Ok(())
    }

    /// Attach a blob and return the expression that reads it.
    pub async fn add_file(&self, kind: Kind, name: &str, key: &str, contents: &str) -> HclValue {
        let file = format!("{}_{}_{}", kind.hcl_type(), resource_name(name), key);
        let mut state = self.state.lock().await;
        state.files.insert(file.clone(), contents.to_string());
        HclValue::Raw(format!("file(\"${{path.module}}/{}/{}\")", DATA_DIR, file))
    }

    pub async fn add_output(&self, name: &str, value: HclValue) {
        let mut state = self.state.lock().await;
        state.outputs.insert(resource_name(name), value);
    }

    /// The manifest and attached blobs, keyed by relative path.
    pub async fn files(&self) -> BTreeMap<String, String> {
        let state = self.state.lock().await;
        let mut manifest = String::new();
        manifest.push_str("provider \"aws\" {\n");
        manifest.push_str(&format!("  region = {}\n", quote(&self.region)));
        manifest.push_str("}\n");

        for ((hcl_type, name), body) in &state.resources {
            manifest.push('\n');
            manifest.push_str(&format!("resource {} {} {{\n", quote(hcl_type), quote(name)));
            body.write(&mut manifest, 2);
            manifest.push_str("}\n");
        }

        for (name, value) in &state.outputs {
            manifest.push('\n');
            manifest.push_str(&format!("output {} {{\n", quote(name)));
            HclBlock::new()
                .set("value", value.clone())
                .write(&mut manifest, 2);
            manifest.push_str("}\n");
        }

        let mut files = BTreeMap::new();
        files.insert(MANIFEST_FILE.to_string(), manifest);
        for (name, contents) in &state.files {
            files.insert(format!("{}/{}", DATA_DIR, name), contents.clone());
        }
        files
    }

    /// Write the rendered tree under `dir`.
    pub async fn write_to(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for (relative, contents) in self.files().await {
            let path = dir.join(&relative);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, contents).await?;
            written.push(path);
        }
        Ok(written)
    }
}

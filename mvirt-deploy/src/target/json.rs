//! JSON stack template target.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::sync::Mutex;

use crate::cloud::Cloud;
use crate::error::{Error, Result};
use crate::model::{Attr, Kind, Tags};

/// Stack document file name.
pub const STACK_FILE: &str = "stack.json";

/// Logical resource ID: `{type}{name}` with punctuation removed.
pub fn resource_key(kind: Kind, name: &str) -> String {
    kind.cfn_type()
        .chars()
        .chain(name.chars())
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Tags in the stack's `[{"Key": .., "Value": ..}]` shape.
pub fn tag_list(tags: &Tags) -> Value {
    Value::Array(
        tags.iter()
            .map(|(k, v)| json!({ "Key": k, "Value": v }))
            .collect(),
    )
}

/// Sort key for appended list items: a rule target's `Id`, else the item itself.
fn list_order(item: &Value) -> String {
    match item.get("Id").and_then(Value::as_str) {
        Some(id) => id.to_string(),
        None => item.to_string(),
    }
}

#[derive(Default)]
struct JsonState {
    resources: BTreeMap<String, Value>,
    outputs: BTreeMap<String, Value>,
}

/// Renders tasks as a single stack document.
pub struct JsonTarget {
    cloud: Option<Arc<dyn Cloud>>,
    state: Mutex<JsonState>,
}

impl JsonTarget {
    pub fn new() -> Self {
        Self {
            cloud: None,
            state: Mutex::new(JsonState::default()),
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

    /// `Ref` for IDs, `Fn::GetAtt` for everything else.
    pub fn reference(kind: Kind, name: &str, attr: Attr) -> Value {
        let key = resource_key(kind, name);
        match attr.cfn_name() {
            None => json!({ "Ref": key }),
            Some(attribute) => json!({ "Fn::GetAtt": [key, attribute] }),
        }
    }

    /// Emit a resource of the kind's own type.
    pub async fn render_resource(
        &self,
        kind: Kind,
        name: &str,
        properties: Map<String, Value>,
    ) -> Result<()> {
        self.render_typed(kind.cfn_type(), kind, name, properties)
            .await
    }

    /// Emit a resource whose stack type differs from the kind's default.
    pub async fn render_typed(
        &self,
        resource_type: &str,
        kind: Kind,
        name: &str,
        properties: Map<String, Value>,
    ) -> Result<()> {
        let key = resource_key(kind, name);
        let mut state = self.state.lock().await;
        if state.resources.contains_key(&key) {
            return Err(Error::Render(format!("resource {} rendered twice", key)));
        }
        state.resources.insert(
            key,
            json!({ "Type": resource_type, "Properties": Value::Object(properties) }),
        );
        Ok(())
    }

    /// Append `value` to a list property of an already rendered resource.
    ///
    /// Used by kinds that exist as a property of another resource in the
    /// stack format (profile roles, rule targets).
    pub async fn append_property(
        &self,
        kind: Kind,
        name: &str,
        property: &str,
        value: Value,
    ) -> Result<()> {
        let key = resource_key(kind, name);
        let mut state = self.state.lock().await;
        let properties = state
            .resources
            .get_mut(&key)
            .and_then(|r| r.get_mut("Properties"))
            .and_then(Value::as_object_mut)
            .ok_or_else(|| Error::Render(format!("resource {} has not been rendered", key)))?;
        match properties
            .entry(property.to_string())
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            Value::Array(items) => {
                // Appends arrive in task completion order.
                items.push(value);
                items.sort_by_cached_key(list_order);
                Ok(())
            }
            _ => Err(Error::Render(format!(
                "property {} of {} is not a list",
                property, key
            ))),
        }
    }

    pub async fn add_output(&self, name: &str, value: Value) {
        let key: String = name.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
        let mut state = self.state.lock().await;
        state.outputs.insert(key, json!({ "Value": value }));
    }

    /// The stack document.
    pub async fn document(&self) -> Value {
        let state = self.state.lock().await;
        let mut doc = Map::new();
        doc.insert(
            "Resources".to_string(),
            Value::Object(state.resources.clone().into_iter().collect()),
        );
        if !state.outputs.is_empty() {
            doc.insert(
                "Outputs".to_string(),
                Value::Object(state.outputs.clone().into_iter().collect()),
            );
        }
        Value::Object(doc)
    }

    /// The stack document, pretty-printed with sorted keys.
    pub async fn render(&self) -> Result<String> {
        let mut text = serde_json::to_string_pretty(&self.document().await)?;
        text.push('\n');
        Ok(text)
    }

    pub async fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(STACK_FILE);
        tokio::fs::write(&path, self.render().await?).await?;
        Ok(path)
    }
}

impl Default for JsonTarget {
    fn default() -> Self {
        Self::new()
    }
}

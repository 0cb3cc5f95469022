use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::ExtractError;

/// Strategy for deriving a schema's reference name from the target type.
///
/// The reference name becomes the tool/function name in tool-call modes and
/// the schema name in server-side response-format modes, so it must stay
/// unique across every target type used in one process.
#[derive(Clone, Default)]
pub enum SchemaNamer {
    /// The type's short name, disambiguated with a hash of its fully
    /// qualified identity. Two distinct types that share a short name get
    /// distinct reference names.
    #[default]
    Qualified,
    /// The type's short name as-is
    Short,
    /// Caller-supplied naming function, receiving `(short_name, full_id)`
    Custom(Arc<dyn Fn(&str, &str) -> String + Send + Sync>),
}

impl std::fmt::Debug for SchemaNamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaNamer::Qualified => f.write_str("Qualified"),
            SchemaNamer::Short => f.write_str("Short"),
            SchemaNamer::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl SchemaNamer {
    fn name_for(&self, short_name: &str, full_id: &str) -> String {
        match self {
            SchemaNamer::Qualified => {
                let mut hasher = DefaultHasher::new();
                full_id.hash(&mut hasher);
                format!("{}_{:x}", short_name, hasher.finish())
            }
            SchemaNamer::Short => short_name.to_string(),
            SchemaNamer::Custom(f) => f(short_name, full_id),
        }
    }
}

/// A named function/tool definition derived from the schema
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub parameters: Value,
}

/// An immutable structured schema for one target type.
///
/// Holds the canonical pretty-printed rendering (embedded verbatim in
/// prompts, so it must be stable across calls), the deterministic reference
/// name, and the function definitions used by tool-call modes.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    name: String,
    root: Value,
    rendered: String,
    functions: Vec<FunctionDefinition>,
}

impl Schema {
    /// Reflect `T` into a schema using the given naming strategy.
    ///
    /// Pure function of the type and namer; the result never changes for a
    /// given `(type, namer)` pair and is safe to cache.
    pub fn of<T: schemars::JsonSchema>(namer: &SchemaNamer) -> Result<Self, ExtractError> {
        let generated = schemars::schema_for!(T);
        let root = serde_json::to_value(&generated)
            .map_err(|e| ExtractError::schema_reflection(e.to_string()))?;
        Self::from_value(root, &T::schema_name(), &T::schema_id(), namer)
    }

    /// Build a schema around an already-reflected root value.
    ///
    /// Used by the stream path, which wraps the element schema in an
    /// `items`-array envelope before requesting it.
    pub fn from_value(
        root: Value,
        short_name: &str,
        full_id: &str,
        namer: &SchemaNamer,
    ) -> Result<Self, ExtractError> {
        if !root.is_object() {
            return Err(ExtractError::schema_reflection(format!(
                "expected an object schema for {full_id}"
            )));
        }
        let rendered = serde_json::to_string_pretty(&root)
            .map_err(|e| ExtractError::schema_reflection(e.to_string()))?;
        let name = namer.name_for(short_name, full_id);

        let description = root
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut parameters = root.clone();
        if let Some(obj) = parameters.as_object_mut() {
            // Metadata keys are noise in a tool declaration
            obj.remove("$schema");
            obj.remove("title");
        }
        let functions = vec![FunctionDefinition {
            name: name.clone(),
            description,
            parameters,
        }];

        Ok(Self {
            name,
            root,
            rendered,
            functions,
        })
    }

    /// The deterministic reference name for the target type
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw schema document
    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Stable pretty-printed rendering for prompt injection
    pub fn rendered(&self) -> &str {
        &self.rendered
    }

    /// Function/tool definitions, in declaration order
    pub fn functions(&self) -> &[FunctionDefinition] {
        &self.functions
    }

    /// Wrap this element schema in an `{"items": [...]}` envelope.
    ///
    /// Streaming JSON extraction asks the model for an object holding an
    /// array of elements, then peels elements off as they complete.
    pub fn wrap_as_items(&self, namer: &SchemaNamer) -> Result<Self, ExtractError> {
        let wrapped = serde_json::json!({
            "type": "object",
            "properties": {
                "items": {
                    "type": "array",
                    "items": self.root,
                }
            },
            "required": ["items"],
        });
        let short = format!("{}_list", self.name);
        Self::from_value(wrapped, &short, &short, namer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;

    #[derive(JsonSchema)]
    #[allow(dead_code)]
    struct Person {
        name: String,
        age: u32,
    }

    mod second {
        use schemars::JsonSchema;

        #[derive(JsonSchema)]
        #[allow(dead_code)]
        pub struct Person {
            pub title: String,
        }
    }

    #[test]
    fn rendering_is_stable() {
        let a = Schema::of::<Person>(&SchemaNamer::default()).unwrap();
        let b = Schema::of::<Person>(&SchemaNamer::default()).unwrap();
        assert_eq!(a.rendered(), b.rendered());
        assert_eq!(a.name(), b.name());
    }

    #[test]
    fn qualified_namer_disambiguates_colliding_short_names() {
        let outer = Schema::of::<Person>(&SchemaNamer::Qualified).unwrap();
        let inner = Schema::of::<second::Person>(&SchemaNamer::Qualified).unwrap();
        assert_ne!(outer.name(), inner.name());
        assert!(outer.name().starts_with("Person_"));
    }

    #[test]
    fn short_namer_keeps_the_plain_name() {
        let schema = Schema::of::<Person>(&SchemaNamer::Short).unwrap();
        assert_eq!(schema.name(), "Person");
    }

    #[test]
    fn custom_namer_is_applied() {
        let namer = SchemaNamer::Custom(Arc::new(|name, _| format!("extract_{name}")));
        let schema = Schema::of::<Person>(&namer).unwrap();
        assert_eq!(schema.name(), "extract_Person");
        assert_eq!(schema.functions()[0].name, "extract_Person");
    }

    #[test]
    fn function_parameters_drop_metadata_keys() {
        let schema = Schema::of::<Person>(&SchemaNamer::Short).unwrap();
        let params = &schema.functions()[0].parameters;
        assert!(params.get("$schema").is_none());
        assert!(params.get("properties").is_some());
    }

    #[test]
    fn items_wrapper_requires_the_array() {
        let schema = Schema::of::<Person>(&SchemaNamer::Short).unwrap();
        let wrapped = schema.wrap_as_items(&SchemaNamer::Short).unwrap();
        assert_eq!(wrapped.root()["required"][0], "items");
        assert_eq!(
            wrapped.root()["properties"]["items"]["type"],
            serde_json::json!("array")
        );
    }
}

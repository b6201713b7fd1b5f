//! Serializer and deserializer registry
//!
//! Codecs are looked up by `(kind, format)`. Formats are normalized
//! (lower-cased, whitespace removed) on registration and on lookup, so
//! `"JSON"`, `" json "` and `"js on"` all name the same codec.
//!
//! A deserializer populates an existing resource in place. The id is applied
//! first, so a payload that tries to change the id of a registered entity is
//! rejected before any other field is touched.

use serde::{Deserialize, Deserializer as SerdeDeserializer};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::errors::{CodecError, Result};
use crate::model::{EntityId, Kind, Resource};
use crate::reactive::Property;

/// Encodes a resource into a payload
pub type Serializer = Rc<dyn Fn(&Resource) -> Result<Vec<u8>>>;

/// Populates a resource from a payload
pub type Deserializer = Rc<dyn Fn(&[u8], &mut Resource) -> Result<()>>;

pub const JSON: &str = "json";

#[derive(Default, Clone)]
pub struct CodecRegistry {
    serializers: HashMap<(Kind, String), Serializer>,
    deserializers: HashMap<(Kind, String), Deserializer>,
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut serializers: Vec<_> = self.serializers.keys().collect();
        serializers.sort();
        let mut deserializers: Vec<_> = self.deserializers.keys().collect();
        deserializers.sort();
        f.debug_struct("CodecRegistry")
            .field("serializers", &serializers)
            .field("deserializers", &deserializers)
            .finish()
    }
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `json` codecs of every kind
    pub fn with_json() -> Self {
        let mut registry = Self::new();
        for kind in Kind::ALL {
            registry.serializers.insert(
                (kind, JSON.to_string()),
                Rc::new(move |resource: &Resource| encode_json(kind, resource)),
            );
            registry.deserializers.insert(
                (kind, JSON.to_string()),
                Rc::new(move |bytes: &[u8], resource: &mut Resource| {
                    decode_json(kind, bytes, resource)
                }),
            );
        }
        registry
    }

    /// Canonical form of a format key
    ///
    /// # Errors
    ///
    /// `InvalidCodecKey` if nothing remains after removing whitespace.
    pub fn normalize(format: &str) -> Result<String> {
        let normalized: String = format
            .chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect();
        if normalized.is_empty() {
            return Err(CodecError::InvalidCodecKey {
                format: format.to_string(),
            }
            .into());
        }
        Ok(normalized)
    }

    /// Register (or replace) the serializer of `kind` in `format`
    ///
    /// # Errors
    ///
    /// `InvalidCodecKey` for a blank format.
    pub fn register_serializer<F>(&mut self, kind: Kind, format: &str, serializer: F) -> Result<()>
    where
        F: Fn(&Resource) -> Result<Vec<u8>> + 'static,
    {
        let format = Self::normalize(format)?;
        self.serializers.insert((kind, format), Rc::new(serializer));
        Ok(())
    }

    /// Register (or replace) the deserializer of `kind` in `format`
    ///
    /// # Errors
    ///
    /// `InvalidCodecKey` for a blank format.
    pub fn register_deserializer<F>(&mut self, kind: Kind, format: &str, deserializer: F) -> Result<()>
    where
        F: Fn(&[u8], &mut Resource) -> Result<()> + 'static,
    {
        let format = Self::normalize(format)?;
        self.deserializers.insert((kind, format), Rc::new(deserializer));
        Ok(())
    }

    /// # Errors
    ///
    /// `InvalidCodecKey` or `SerializerNotFound`.
    pub fn serializer(&self, kind: Kind, format: &str) -> Result<Serializer> {
        let format = Self::normalize(format)?;
        match self.serializers.get(&(kind, format.clone())) {
            Some(serializer) => Ok(Rc::clone(serializer)),
            None => Err(CodecError::SerializerNotFound { kind, format }.into()),
        }
    }

    /// # Errors
    ///
    /// `InvalidCodecKey` or `DeserializerNotFound`.
    pub fn deserializer(&self, kind: Kind, format: &str) -> Result<Deserializer> {
        let format = Self::normalize(format)?;
        match self.deserializers.get(&(kind, format.clone())) {
            Some(deserializer) => Ok(Rc::clone(deserializer)),
            None => Err(CodecError::DeserializerNotFound { kind, format }.into()),
        }
    }
}

fn malformed(kind: Kind, message: impl fmt::Display) -> CodecError {
    CodecError::Malformed {
        kind,
        format: JSON.to_string(),
        message: message.to_string(),
    }
}

fn encode_json(kind: Kind, resource: &Resource) -> Result<Vec<u8>> {
    if resource.kind() != kind {
        return Err(malformed(kind, format!("cannot encode a {}", resource.kind())).into());
    }
    serde_json::to_vec(resource).map_err(|e| malformed(kind, e).into())
}

fn decode_json(kind: Kind, bytes: &[u8], resource: &mut Resource) -> Result<()> {
    if resource.kind() != kind {
        return Err(malformed(kind, format!("cannot populate a {}", resource.kind())).into());
    }
    let patch: Patch = serde_json::from_slice(bytes).map_err(|e| malformed(kind, e))?;
    let stray: Vec<&str> = patch
        .present_fields()
        .into_iter()
        .filter(|field| !fields_of(kind).contains(field))
        .collect();
    if !stray.is_empty() {
        return Err(malformed(kind, format!("unknown fields for {kind}: {}", stray.join(", "))).into());
    }
    patch.apply(resource)
}

/// JSON field names accepted for each kind, `id` included
fn fields_of(kind: Kind) -> &'static [&'static str] {
    match kind {
        Kind::ContentType => &["id", "name", "base_ids", "attribute_type_ids"],
        Kind::AttributeType => &["id", "name", "kind_id", "kind_properties", "default_value"],
        Kind::ContentInstance => &["id", "type_id", "attribute_ids"],
        Kind::AttributeInstance => &["id", "type_id", "value", "source_id"],
        Kind::FilterType | Kind::SorterType => &["id", "name", "attribute_type_ids"],
        Kind::FilterInstance | Kind::SorterInstance => &["id", "type_id", "kind_params"],
        Kind::ViewType => &["id", "name", "content_type_ids", "filter_type_ids", "sorter_type_ids"],
        Kind::ViewInstance => &["id", "type_id", "filter_ids", "sorter_ids", "result_id"],
        Kind::ViewResult => &["id", "content_instance_ids"],
    }
}

/// Keeps an explicit `null` as `Some(null)` instead of "absent"
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: SerdeDeserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Union of every kind's fields; `None` means "leave as is"
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Patch {
    #[serde(default, deserialize_with = "present")]
    id: Option<EntityId>,
    #[serde(default, deserialize_with = "present")]
    name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    base_ids: Option<Vec<EntityId>>,
    #[serde(default, deserialize_with = "present")]
    attribute_type_ids: Option<Vec<EntityId>>,
    #[serde(default, deserialize_with = "present")]
    kind_id: Option<String>,
    #[serde(default, deserialize_with = "present")]
    kind_properties: Option<JsonValue>,
    #[serde(default, deserialize_with = "present")]
    default_value: Option<JsonValue>,
    #[serde(default, deserialize_with = "present")]
    type_id: Option<EntityId>,
    #[serde(default, deserialize_with = "present")]
    attribute_ids: Option<Vec<EntityId>>,
    #[serde(default, deserialize_with = "present")]
    value: Option<JsonValue>,
    #[serde(default, deserialize_with = "present")]
    source_id: Option<Option<EntityId>>,
    #[serde(default, deserialize_with = "present")]
    kind_params: Option<JsonValue>,
    #[serde(default, deserialize_with = "present")]
    content_type_ids: Option<Vec<EntityId>>,
    #[serde(default, deserialize_with = "present")]
    filter_type_ids: Option<Vec<EntityId>>,
    #[serde(default, deserialize_with = "present")]
    sorter_type_ids: Option<Vec<EntityId>>,
    #[serde(default, deserialize_with = "present")]
    filter_ids: Option<Vec<EntityId>>,
    #[serde(default, deserialize_with = "present")]
    sorter_ids: Option<Vec<EntityId>>,
    #[serde(default, deserialize_with = "present")]
    result_id: Option<Option<EntityId>>,
    #[serde(default, deserialize_with = "present")]
    content_instance_ids: Option<Vec<EntityId>>,
}

fn put<T: PartialEq>(property: &mut Property<T>, value: Option<T>) {
    if let Some(value) = value {
        property.set(value);
    }
}

impl Patch {
    fn present_fields(&self) -> Vec<&'static str> {
        let flags = [
            ("id", self.id.is_some()),
            ("name", self.name.is_some()),
            ("base_ids", self.base_ids.is_some()),
            ("attribute_type_ids", self.attribute_type_ids.is_some()),
            ("kind_id", self.kind_id.is_some()),
            ("kind_properties", self.kind_properties.is_some()),
            ("default_value", self.default_value.is_some()),
            ("type_id", self.type_id.is_some()),
            ("attribute_ids", self.attribute_ids.is_some()),
            ("value", self.value.is_some()),
            ("source_id", self.source_id.is_some()),
            ("kind_params", self.kind_params.is_some()),
            ("content_type_ids", self.content_type_ids.is_some()),
            ("filter_type_ids", self.filter_type_ids.is_some()),
            ("sorter_type_ids", self.sorter_type_ids.is_some()),
            ("filter_ids", self.filter_ids.is_some()),
            ("sorter_ids", self.sorter_ids.is_some()),
            ("result_id", self.result_id.is_some()),
            ("content_instance_ids", self.content_instance_ids.is_some()),
        ];
        flags
            .into_iter()
            .filter_map(|(field, set)| set.then_some(field))
            .collect()
    }

    fn apply(self, resource: &mut Resource) -> Result<()> {
        if let Some(id) = self.id {
            resource.identity_mut().assign(id)?;
        }
        match resource {
            Resource::ContentType(e) => {
                put(&mut e.name, self.name);
                put(&mut e.base_ids, self.base_ids);
                put(&mut e.attribute_type_ids, self.attribute_type_ids);
            }
            Resource::AttributeType(e) => {
                put(&mut e.name, self.name);
                put(&mut e.kind_id, self.kind_id);
                put(&mut e.kind_properties, self.kind_properties);
                put(&mut e.default_value, self.default_value);
            }
            Resource::ContentInstance(e) => {
                put(&mut e.type_id, self.type_id);
                put(&mut e.attribute_ids, self.attribute_ids);
            }
            Resource::AttributeInstance(e) => {
                put(&mut e.type_id, self.type_id);
                put(&mut e.value, self.value);
                put(&mut e.source_id, self.source_id);
            }
            Resource::FilterType(e) => {
                put(&mut e.name, self.name);
                put(&mut e.attribute_type_ids, self.attribute_type_ids);
            }
            Resource::SorterType(e) => {
                put(&mut e.name, self.name);
                put(&mut e.attribute_type_ids, self.attribute_type_ids);
            }
            Resource::FilterInstance(e) => {
                put(&mut e.type_id, self.type_id);
                put(&mut e.kind_params, self.kind_params);
            }
            Resource::SorterInstance(e) => {
                put(&mut e.type_id, self.type_id);
                put(&mut e.kind_params, self.kind_params);
            }
            Resource::ViewType(e) => {
                put(&mut e.name, self.name);
                put(&mut e.content_type_ids, self.content_type_ids);
                put(&mut e.filter_type_ids, self.filter_type_ids);
                put(&mut e.sorter_type_ids, self.sorter_type_ids);
            }
            Resource::ViewInstance(e) => {
                put(&mut e.type_id, self.type_id);
                put(&mut e.filter_ids, self.filter_ids);
                put(&mut e.sorter_ids, self.sorter_ids);
                put(&mut e.result_id, self.result_id);
            }
            Resource::ViewResult(e) => {
                put(&mut e.content_instance_ids, self.content_instance_ids);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttributeInstance, ContentType};
    use serde_json::json;

    #[test]
    fn test_format_keys_are_normalized() {
        assert_eq!(CodecRegistry::normalize(" J SON\n").unwrap(), "json");
        let err = CodecRegistry::normalize(" \t ").unwrap_err();
        assert_eq!(err.code(), "ERR_INVALID_CODEC_KEY");

        let registry = CodecRegistry::with_json();
        assert!(registry.serializer(Kind::ViewType, "Json").is_ok());
        let err = registry.deserializer(Kind::ViewType, "yaml").err().unwrap();
        assert_eq!(err.code(), "ERR_DESERIALIZER_NOT_FOUND");
    }

    #[test]
    fn test_json_encode_uses_plain_field_names() {
        let registry = CodecRegistry::with_json();
        let resource: Resource = ContentType::new("Base")
            .with_attribute_types(["a1".into()])
            .with_id("c1")
            .into();
        let bytes = registry.serializer(Kind::ContentType, "json").unwrap()(&resource).unwrap();
        let encoded: JsonValue = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            encoded,
            json!({"id": "c1", "name": "Base", "base_ids": [], "attribute_type_ids": ["a1"]})
        );
    }

    #[test]
    fn test_json_decode_keeps_explicit_null() {
        let registry = CodecRegistry::with_json();
        let decode = registry.deserializer(Kind::AttributeInstance, "json").unwrap();
        let mut resource: Resource = AttributeInstance::new("t", json!("x"))
            .with_source("other")
            .into();
        decode(br#"{"value": null, "source_id": null}"#, &mut resource).unwrap();

        let attribute = resource.as_attribute_instance().unwrap();
        assert_eq!(attribute.value.get(), &JsonValue::Null);
        assert_eq!(attribute.source_id.get(), &None);
        assert_eq!(attribute.type_id.get().as_str(), "t");
    }

    #[test]
    fn test_json_decode_rejects_fields_of_other_kinds() {
        let registry = CodecRegistry::with_json();
        let decode = registry.deserializer(Kind::ContentType, "json").unwrap();
        let mut resource = Resource::blank(Kind::ContentType);
        let err = decode(br#"{"name": "X", "value": 1}"#, &mut resource).unwrap_err();
        assert_eq!(err.code(), "ERR_MALFORMED");
        assert_eq!(resource.name(), Some(""));

        let err = decode(b"not json", &mut resource).unwrap_err();
        assert_eq!(err.code(), "ERR_MALFORMED");
    }
}

//! Metadata bootstrap
//!
//! Parses the EDMX `$metadata` document into a `ServiceMetadata` model. The
//! client only depends on the version string (to pick v2 or v4 mode); the rest
//! of the model is exposed to callers for discovery.

use super::error::ODataError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;

/// Property of an entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityType {
    pub name: String,
    pub key: Vec<String>,
    pub properties: Vec<Property>,
    pub navigation_properties: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySet {
    pub name: String,
    pub entity_type: String,
}

/// Function or action import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionImport {
    pub name: String,
    /// v2 `m:HttpMethod`; `None` means the caller chooses
    pub http_method: Option<String>,
    pub return_type: Option<String>,
    /// v4 action imports are always invoked with POST
    pub is_action: bool,
}

/// Parsed service model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceMetadata {
    pub service_root: String,
    pub version: String,
    pub namespace: Option<String>,
    pub entity_types: BTreeMap<String, EntityType>,
    pub entity_sets: BTreeMap<String, EntitySet>,
    pub function_imports: BTreeMap<String, FunctionImport>,
    #[serde(skip, default = "SystemTime::now")]
    pub parsed_at: SystemTime,
}

impl ServiceMetadata {
    /// Minimal model used when `$metadata` cannot be parsed
    pub fn minimal(service_root: &str) -> Self {
        Self {
            service_root: service_root.to_string(),
            version: "2.0".to_string(),
            namespace: None,
            entity_types: BTreeMap::new(),
            entity_sets: BTreeMap::new(),
            function_imports: BTreeMap::new(),
            parsed_at: SystemTime::now(),
        }
    }

    /// Entity type backing an entity set, matched by unqualified name
    pub fn entity_type_for(&self, entity_set: &str) -> Option<&EntityType> {
        let set = self.entity_sets.get(entity_set)?;
        let type_name = set.entity_type.rsplit('.').next().unwrap_or(&set.entity_type);
        self.entity_types.get(type_name)
    }
}

fn attr(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, ODataError> {
    for attribute in element.attributes() {
        let attribute = attribute
            .map_err(|e| ODataError::ParseError(format!("invalid metadata attribute: {}", e)))?;
        if attribute.key.local_name().as_ref() == name {
            let raw = String::from_utf8_lossy(&attribute.value);
            let value = quick_xml::escape::unescape(&raw)
                .map_err(|e| ODataError::ParseError(format!("invalid metadata attribute: {}", e)))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn required_attr(element: &BytesStart<'_>, name: &[u8]) -> Result<String, ODataError> {
    attr(element, name)?.ok_or_else(|| {
        ODataError::ParseError(format!(
            "<{}> is missing attribute {}",
            String::from_utf8_lossy(element.local_name().as_ref()),
            String::from_utf8_lossy(name)
        ))
    })
}

/// Parse a `$metadata` document
pub fn parse_metadata(data: &[u8], service_root: &str) -> Result<ServiceMetadata, ODataError> {
    let xml = String::from_utf8_lossy(data);
    let mut reader = Reader::from_str(&xml);
    reader.config_mut().trim_text(true);

    let mut edmx_version: Option<String> = None;
    let mut data_service_version: Option<String> = None;
    let mut metadata = ServiceMetadata::minimal(service_root);
    let mut current_type: Option<EntityType> = None;
    let mut in_key = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ODataError::ParseError(format!("invalid metadata XML: {}", e)))?;

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                match e.local_name().as_ref() {
                    b"Edmx" => edmx_version = attr(e, b"Version")?,
                    b"DataServices" => data_service_version = attr(e, b"DataServiceVersion")?,
                    b"Schema" => {
                        if metadata.namespace.is_none() {
                            metadata.namespace = attr(e, b"Namespace")?;
                        }
                    }
                    b"EntityType" => {
                        let entity_type = EntityType {
                            name: required_attr(e, b"Name")?,
                            ..Default::default()
                        };
                        if is_empty {
                            metadata
                                .entity_types
                                .insert(entity_type.name.clone(), entity_type);
                        } else {
                            current_type = Some(entity_type);
                        }
                    }
                    b"Key" if !is_empty => in_key = true,
                    b"PropertyRef" if in_key => {
                        if let Some(ref mut t) = current_type {
                            t.key.push(required_attr(e, b"Name")?);
                        }
                    }
                    b"Property" => {
                        if let Some(ref mut t) = current_type {
                            t.properties.push(Property {
                                name: required_attr(e, b"Name")?,
                                type_name: attr(e, b"Type")?.unwrap_or_default(),
                                nullable: attr(e, b"Nullable")?
                                    .map_or(true, |v| !v.eq_ignore_ascii_case("false")),
                            });
                        }
                    }
                    b"NavigationProperty" => {
                        if let Some(ref mut t) = current_type {
                            t.navigation_properties.push(required_attr(e, b"Name")?);
                        }
                    }
                    b"EntitySet" => {
                        let name = required_attr(e, b"Name")?;
                        let entity_type = required_attr(e, b"EntityType")?;
                        metadata
                            .entity_sets
                            .insert(name.clone(), EntitySet { name, entity_type });
                    }
                    b"FunctionImport" => {
                        let name = required_attr(e, b"Name")?;
                        let import = FunctionImport {
                            name: name.clone(),
                            http_method: attr(e, b"HttpMethod")?,
                            return_type: attr(e, b"ReturnType")?,
                            is_action: false,
                        };
                        metadata.function_imports.insert(name, import);
                    }
                    b"ActionImport" => {
                        let name = required_attr(e, b"Name")?;
                        let import = FunctionImport {
                            name: name.clone(),
                            http_method: Some("POST".to_string()),
                            return_type: None,
                            is_action: true,
                        };
                        metadata.function_imports.insert(name, import);
                    }
                    _ => {}
                }
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"Key" => in_key = false,
                b"EntityType" => {
                    if let Some(t) = current_type.take() {
                        metadata.entity_types.insert(t.name.clone(), t);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    let edmx_version = edmx_version
        .ok_or_else(|| ODataError::ParseError("metadata has no Edmx root element".to_string()))?;

    metadata.version = if edmx_version.starts_with('4') {
        edmx_version
    } else {
        data_service_version.unwrap_or_else(|| "2.0".to_string())
    };

    Ok(metadata)
}

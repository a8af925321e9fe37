//! Recipe definitions: the persisted, serializable form of a recipe.
//!
//! A recipe pairs one trigger template with one action template, each
//! parameterised by ingredient values. The live trigger and action objects
//! are built from a definition by the app layer's cookbooks.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::id::RecipeId;

/// Current definition format version.
pub const RECIPE_VERSION: &str = "1";

/// Reference to a cookbook template plus the raw values for its ingredients.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TemplateRef {
    pub id: String,
    #[serde(default)]
    pub ingredients: Map<String, Value>,
}

impl TemplateRef {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ingredients: Map::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, ingredient: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ingredients.insert(ingredient.into(), value.into());
        self
    }
}

/// Everything needed to rebuild a recipe after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeDefinition {
    pub id: RecipeId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub version: String,
    pub enabled: bool,
    pub trigger: TemplateRef,
    pub action: TemplateRef,
}

/// User input describing a recipe that does not exist yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecipe {
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub trigger: TemplateRef,
    pub action: TemplateRef,
}

impl NewRecipe {
    /// Read the generic JSON description of a recipe:
    /// `{name, description, enabled, trigger: {id, ingredients}, action: {id, ingredients}}`.
    ///
    /// Only the envelope is checked here; ingredient values are validated
    /// against their cookbook template later.
    ///
    /// # Errors
    ///
    /// Returns an [`UnmarshalRecipeError`] naming the offending field.
    pub fn from_value(value: &Value) -> Result<Self, UnmarshalRecipeError> {
        let object = value.as_object().ok_or_else(|| {
            UnmarshalRecipeError::invalid_type("recipe", "recipe must be a JSON object")
        })?;

        let name = match object.get("name") {
            Some(Value::String(name)) if !name.is_empty() => name.clone(),
            Some(Value::String(_) | Value::Null) | None => {
                return Err(UnmarshalRecipeError::required("name"));
            }
            Some(_) => {
                return Err(UnmarshalRecipeError::invalid_type("name", "name must be a string"));
            }
        };
        let description = match object.get("description") {
            Some(Value::String(description)) => description.clone(),
            Some(Value::Null) | None => String::new(),
            Some(_) => {
                return Err(UnmarshalRecipeError::invalid_type(
                    "description",
                    "description must be a string",
                ));
            }
        };
        let enabled = match object.get("enabled") {
            Some(Value::Bool(enabled)) => *enabled,
            Some(Value::Null) | None => false,
            Some(_) => {
                return Err(UnmarshalRecipeError::invalid_type(
                    "enabled",
                    "enabled must be a boolean",
                ));
            }
        };

        Ok(Self {
            name,
            description,
            enabled,
            trigger: template_ref(object, "trigger")?,
            action: template_ref(object, "action")?,
        })
    }
}

fn template_ref(object: &Map<String, Value>, field: &str) -> Result<TemplateRef, UnmarshalRecipeError> {
    let Some(value) = object.get(field).filter(|v| !v.is_null()) else {
        return Err(UnmarshalRecipeError::required(field));
    };
    let Some(inner) = value.as_object() else {
        return Err(UnmarshalRecipeError::invalid_type(
            field,
            format!("{field} must be an object"),
        ));
    };
    let id = match inner.get("id") {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        _ => return Err(UnmarshalRecipeError::required(field)),
    };
    let ingredients = match inner.get("ingredients") {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Null) | None => Map::new(),
        Some(_) => {
            return Err(UnmarshalRecipeError::invalid_type(
                field,
                "ingredients must be an object",
            ));
        }
    };
    Ok(TemplateRef { id, ingredients })
}

/// Category of an [`UnmarshalRecipeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmarshalErrorType {
    Required,
    InvalidType,
    InvalidValue,
    UnknownTemplate,
}

impl fmt::Display for UnmarshalErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Required => "required",
            Self::InvalidType => "invalid_type",
            Self::InvalidValue => "invalid_value",
            Self::UnknownTemplate => "unknown_template",
        })
    }
}

/// Structured failure to build a recipe from user input.
///
/// Serializes as `{paramId, errorType, description}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{param_id}: {error_type}: {description}")]
pub struct UnmarshalRecipeError {
    pub param_id: String,
    pub error_type: UnmarshalErrorType,
    pub description: String,
}

impl UnmarshalRecipeError {
    #[must_use]
    pub fn required(param_id: impl Into<String>) -> Self {
        let param_id = param_id.into();
        Self {
            description: format!("{param_id} is required"),
            param_id,
            error_type: UnmarshalErrorType::Required,
        }
    }

    #[must_use]
    pub fn invalid_type(param_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            param_id: param_id.into(),
            error_type: UnmarshalErrorType::InvalidType,
            description: description.into(),
        }
    }

    #[must_use]
    pub fn invalid_value(param_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            param_id: param_id.into(),
            error_type: UnmarshalErrorType::InvalidValue,
            description: description.into(),
        }
    }

    #[must_use]
    pub fn unknown_template(param_id: impl Into<String>, template_id: &str) -> Self {
        Self {
            param_id: param_id.into(),
            error_type: UnmarshalErrorType::UnknownTemplate,
            description: format!("no cookbook provides template {template_id}"),
        }
    }
}

//! CookBook: the catalog of trigger and action templates a recipe can use.
//!
//! A template declares typed [`Ingredient`]s. [`Template::parse`] turns the
//! raw JSON values of a [`TemplateRef`](crate::recipe::TemplateRef) into
//! typed [`Ingredients`], reporting the first offending ingredient.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::recipe::UnmarshalRecipeError;

/// Declared type of an ingredient value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngredientType {
    String,
    Integer,
    Float,
    Boolean,
    /// Seconds, as a non-negative number.
    Duration,
}

/// A typed parameter of a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: IngredientType,
    pub required: bool,
}

impl Ingredient {
    #[must_use]
    pub fn required(id: &str, name: &str, description: &str, kind: IngredientType) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            kind,
            required: true,
        }
    }

    #[must_use]
    pub fn optional(id: &str, name: &str, description: &str, kind: IngredientType) -> Self {
        Self {
            required: false,
            ..Self::required(id, name, description, kind)
        }
    }

    /// Convert a raw JSON value to this ingredient's type.
    ///
    /// Numbers and booleans are also accepted in their string form, as
    /// submitted by HTML forms.
    ///
    /// # Errors
    ///
    /// `invalid_type` when the JSON type cannot hold the declared type,
    /// `invalid_value` when a string does not parse or a duration is negative.
    pub fn parse(&self, value: &Value) -> Result<IngredientValue, UnmarshalRecipeError> {
        let invalid_type = || {
            UnmarshalRecipeError::invalid_type(
                &self.id,
                format!("{} must be of type {:?}", self.id, self.kind),
            )
        };
        let invalid_value = |raw: &str| {
            UnmarshalRecipeError::invalid_value(
                &self.id,
                format!("{raw:?} is not a valid {:?} for {}", self.kind, self.id),
            )
        };

        match (self.kind, value) {
            (IngredientType::String, Value::String(s)) => Ok(IngredientValue::String(s.clone())),
            (IngredientType::Integer, Value::Number(n)) => {
                n.as_i64().map(IngredientValue::Integer).ok_or_else(invalid_type)
            }
            (IngredientType::Integer, Value::String(s)) => s
                .trim()
                .parse()
                .map(IngredientValue::Integer)
                .map_err(|_| invalid_value(s)),
            (IngredientType::Float, Value::Number(n)) => {
                n.as_f64().map(IngredientValue::Float).ok_or_else(invalid_type)
            }
            (IngredientType::Float, Value::String(s)) => s
                .trim()
                .parse()
                .map(IngredientValue::Float)
                .map_err(|_| invalid_value(s)),
            (IngredientType::Boolean, Value::Bool(b)) => Ok(IngredientValue::Boolean(*b)),
            (IngredientType::Boolean, Value::String(s)) => s
                .trim()
                .parse()
                .map(IngredientValue::Boolean)
                .map_err(|_| invalid_value(s)),
            (IngredientType::Duration, Value::Number(n)) => {
                let secs = n.as_f64().ok_or_else(invalid_type)?;
                duration_from_secs(secs).ok_or_else(|| invalid_value(&n.to_string()))
            }
            (IngredientType::Duration, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(duration_from_secs)
                .ok_or_else(|| invalid_value(s)),
            _ => Err(invalid_type()),
        }
    }
}

fn duration_from_secs(secs: f64) -> Option<IngredientValue> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .map(IngredientValue::Duration)
}

/// A parsed ingredient value.
#[derive(Debug, Clone, PartialEq)]
pub enum IngredientValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Duration(Duration),
}

/// Parsed ingredient values of one template instance, keyed by ingredient id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ingredients(HashMap<String, IngredientValue>);

impl Ingredients {
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&IngredientValue> {
        self.0.get(id)
    }

    #[must_use]
    pub fn string(&self, id: &str) -> Option<&str> {
        match self.0.get(id) {
            Some(IngredientValue::String(s)) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn integer(&self, id: &str) -> Option<i64> {
        match self.0.get(id) {
            Some(IngredientValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn float(&self, id: &str) -> Option<f64> {
        match self.0.get(id) {
            Some(IngredientValue::Float(f)) => Some(*f),
            #[allow(clippy::cast_precision_loss)]
            Some(IngredientValue::Integer(i)) => Some(*i as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn boolean(&self, id: &str) -> Option<bool> {
        match self.0.get(id) {
            Some(IngredientValue::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn duration(&self, id: &str) -> Option<Duration> {
        match self.0.get(id) {
            Some(IngredientValue::Duration(d)) => Some(*d),
            _ => None,
        }
    }
}

/// A trigger or action template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub description: String,
    pub ingredients: Vec<Ingredient>,
}

impl Template {
    #[must_use]
    pub fn new(id: &str, name: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            ingredients: Vec::new(),
        }
    }

    #[must_use]
    pub fn ingredient(mut self, ingredient: Ingredient) -> Self {
        self.ingredients.push(ingredient);
        self
    }

    /// Validate raw values against the declared ingredients.
    ///
    /// Unknown keys are ignored. A missing, `null` or empty-string value for a
    /// required ingredient is reported as `required`.
    ///
    /// # Errors
    ///
    /// Returns the first [`UnmarshalRecipeError`] in declaration order.
    pub fn parse(&self, raw: &Map<String, Value>) -> Result<Ingredients, UnmarshalRecipeError> {
        let mut values = HashMap::with_capacity(self.ingredients.len());
        for ingredient in &self.ingredients {
            let value = raw.get(&ingredient.id).filter(|v| match v {
                Value::Null => false,
                Value::String(s) => !s.is_empty(),
                _ => true,
            });
            match value {
                Some(value) => {
                    values.insert(ingredient.id.clone(), ingredient.parse(value)?);
                }
                None if ingredient.required => {
                    return Err(UnmarshalRecipeError::required(&ingredient.id));
                }
                None => {}
            }
        }
        Ok(Ingredients(values))
    }
}

/// A named collection of trigger and action templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookBook {
    pub id: String,
    pub name: String,
    pub description: String,
    pub triggers: Vec<Template>,
    pub actions: Vec<Template>,
}

impl CookBook {
    #[must_use]
    pub fn trigger(&self, id: &str) -> Option<&Template> {
        self.triggers.iter().find(|t| t.id == id)
    }

    #[must_use]
    pub fn action(&self, id: &str) -> Option<&Template> {
        self.actions.iter().find(|t| t.id == id)
    }
}

// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Request validation
//!
//! Validators are registered per request message name and run on the bound
//! request JSON before the handler sees it.

use crate::gateway::Status;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type Validator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ValidationContext {
    validators: HashMap<String, Vec<Validator>>,
}

impl ValidationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a validator for requests of `message`; the error text becomes the status message
    pub fn with<F>(mut self, message: impl Into<String>, validator: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validators.entry(message.into()).or_default().push(Arc::new(validator));
        self
    }

    /// Require `fields` to be present, non-null and non-empty
    pub fn require(self, message: impl Into<String>, fields: &[&str]) -> Self {
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        self.with(message, move |value| {
            for field in &fields {
                let present = match value.get(field) {
                    None | Some(Value::Null) => false,
                    Some(Value::String(s)) => !s.is_empty(),
                    Some(Value::Array(a)) => !a.is_empty(),
                    Some(_) => true,
                };
                if !present {
                    return Err(format!("{} is required", field));
                }
            }
            Ok(())
        })
    }

    pub fn validate(&self, message: &str, value: &Value) -> Result<(), Status> {
        let Some(validators) = self.validators.get(message) else {
            return Ok(());
        };
        for validator in validators {
            validator(value).map_err(|reason| Status::invalid_argument(format!("invalid {}: {}", message, reason)))?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

impl fmt::Debug for ValidationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationContext").field("messages", &self.validators.keys().collect::<Vec<_>>()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_no_validator_passes() {
        let ctx = ValidationContext::new();
        assert!(ctx.validate("Anything", &json!({})).is_ok());
    }

    #[test]
    fn test_required_fields() {
        let ctx = ValidationContext::new().require("CreateUser", &["name", "roles"]);
        assert!(ctx.validate("CreateUser", &json!({"name": "ada", "roles": ["admin"]})).is_ok());

        let err = ctx.validate("CreateUser", &json!({"name": "", "roles": ["admin"]})).unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
        assert_eq!(err.message(), "invalid CreateUser: name is required");
        assert!(ctx.validate("CreateUser", &json!({"name": "ada"})).is_err());
    }

    #[test]
    fn test_custom_validator() {
        let ctx = ValidationContext::new().with("Transfer", |value| match value["amount"].as_i64() {
            Some(n) if n > 0 => Ok(()),
            _ => Err("amount must be positive".to_string()),
        });
        assert!(ctx.validate("Transfer", &json!({"amount": 5})).is_ok());
        assert!(ctx.validate("Transfer", &json!({"amount": -5})).is_err());
        assert!(ctx.validate("Other", &json!({"amount": -5})).is_ok());
    }
}

//! Document schema validation

use serde_json::{Map, Value};

use peersync_core::ValidationError;

/// Document object as produced by replay
pub type Document = Map<String, Value>;

/// Parse and check the structural rules every stored document must meet.
pub fn validate(bytes: &[u8]) -> Result<Document, ValidationError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ValidationError::NotUtf8)?;
    let value: Value =
        serde_json::from_str(text).map_err(|e| ValidationError::InvalidJson(e.to_string()))?;
    validate_value(value)
}

pub fn validate_value(value: Value) -> Result<Document, ValidationError> {
    let Value::Object(doc) = value else {
        return Err(ValidationError::NotAnObject);
    };

    if let Some(keys) = doc.get("publicKey") {
        let keys = keys.as_array().ok_or(ValidationError::WrongType {
            field: "publicKey",
            expected: "an array",
        })?;
        for key in keys {
            let key = key.as_object().ok_or(ValidationError::WrongType {
                field: "publicKey",
                expected: "an array of objects",
            })?;
            match key.get("id") {
                Some(Value::String(_)) => {}
                Some(_) => {
                    return Err(ValidationError::WrongType {
                        field: "publicKey.id",
                        expected: "a string",
                    })
                }
                None => return Err(ValidationError::MissingField("publicKey.id")),
            }
        }
    }

    if let Some(auth) = doc.get("authentication") {
        if !auth.is_array() {
            return Err(ValidationError::WrongType {
                field: "authentication",
                expected: "an array",
            });
        }
    }

    if let Some(authz) = doc.get("authorization") {
        if !authz.is_object() {
            return Err(ValidationError::WrongType {
                field: "authorization",
                expected: "an object",
            });
        }
    }

    Ok(doc)
}

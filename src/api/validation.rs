use serde_json::Value;

use super::ApiError;
use super::types::{FormItem, FormsField};
use crate::spreadsheet::Row;

/// Upper bound on rows accepted in a single request.
const MAX_FORMS_PER_REQUEST: usize = 10_000;

/// Checks that `forms` is a non-empty array of objects and flattens each
/// object into a row of cell strings, keeping key order.
pub fn validate_forms(forms: Option<FormsField>) -> Result<Vec<Row>, ApiError> {
    let items = match forms {
        None | Some(FormsField::Other(Value::Null)) => {
            return Err(ApiError::validation("The forms field is required."));
        }
        Some(FormsField::Other(_)) => {
            return Err(ApiError::validation("The forms field must be an array."));
        }
        Some(FormsField::List(items)) => items,
    };

    if items.is_empty() {
        return Err(ApiError::validation("The forms field must not be empty."));
    }

    if items.len() > MAX_FORMS_PER_REQUEST {
        return Err(ApiError::validation(format!(
            "Too many forms: {}. At most {MAX_FORMS_PER_REQUEST} per request",
            items.len()
        )));
    }

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            FormItem::Object(fields) => Ok(fields
                .into_iter()
                .map(|(key, value)| (key, cell_value(value)))
                .collect()),
            FormItem::Other(_) => Err(ApiError::validation(format!(
                "The forms.{index} field must be an object."
            ))),
        })
        .collect()
}

/// Parses a `forms` value sent as text, e.g. a multipart field.
pub fn parse_forms_text(text: &str) -> Result<Vec<Row>, ApiError> {
    let forms: FormsField = serde_json::from_str(text)
        .map_err(|e| ApiError::validation(format!("The forms field must be valid JSON: {e}")))?;
    validate_forms(Some(forms))
}

fn cell_value(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        nested @ (Value::Array(_) | Value::Object(_)) => nested.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::FormsRequest;

    fn forms(body: &str) -> Option<FormsField> {
        serde_json::from_str::<FormsRequest>(body).unwrap().forms
    }

    #[test]
    fn objects_become_rows_in_key_order() {
        let rows = validate_forms(forms(
            r#"{"forms":[{"name":"John","email":"j@x.com","age":31,"agree":true,"note":null}]}"#,
        ))
        .unwrap();

        let keys: Vec<&str> = rows[0].keys().map(String::as_str).collect();
        assert_eq!(keys, ["name", "email", "age", "agree", "note"]);
        assert_eq!(rows[0]["age"], "31");
        assert_eq!(rows[0]["agree"], "true");
        assert_eq!(rows[0]["note"], "");
    }

    #[test]
    fn rejects_missing_empty_and_non_array() {
        assert!(validate_forms(forms("{}")).is_err());
        assert!(validate_forms(forms(r#"{"forms":null}"#)).is_err());
        assert!(validate_forms(forms(r#"{"forms":[]}"#)).is_err());
        assert!(validate_forms(forms(r#"{"forms":{"name":"x"}}"#)).is_err());
    }

    #[test]
    fn rejects_non_object_items() {
        let err = validate_forms(forms(r#"{"forms":[{"a":"1"},"oops"]}"#)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation error: The forms.1 field must be an object."
        );
    }

    #[test]
    fn parses_forms_sent_as_text() {
        let rows = parse_forms_text(r#"[{"b":"2","a":"1"}]"#).unwrap();
        let keys: Vec<&str> = rows[0].keys().map(String::as_str).collect();
        assert_eq!(keys, ["b", "a"]);
        assert!(parse_forms_text("not json").is_err());
    }
}

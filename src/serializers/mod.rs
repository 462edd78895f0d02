use serde::{Deserialize, Deserializer};
use serde_json::Value;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::models::{Account, NewAccount, NewStudent, Student};
use crate::utils::error::{AppError, FieldErrors};

pub const REQUIRED: &str = "This field is required.";
pub const BLANK: &str = "This field may not be blank.";
pub const INVALID_INTEGER: &str = "A valid integer is required.";

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some(BLANK.into());
        return Err(err);
    }
    Ok(())
}

/// String fields are trimmed before any rule sees them
fn trimmed<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(|s| s.trim().to_string()))
}

/// `20`, `20.0` and `"20"` are integers; anything else is not
pub fn as_int(value: &Value) -> Option<i32> {
    let n = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }?;
    i32::try_from(n).ok()
}

fn valid_age(value: &Value) -> Result<(), ValidationError> {
    match as_int(value) {
        None => {
            let mut err = ValidationError::new("invalid");
            err.message = Some(INVALID_INTEGER.into());
            Err(err)
        }
        Some(n) if n < 0 => {
            let mut err = ValidationError::new("min_value");
            err.message = Some("Ensure this value is greater than or equal to 0.".into());
            Err(err)
        }
        Some(_) => Ok(()),
    }
}

/// Flatten validator output into `{"field": ["message"]}`.
///
/// With `partial`, missing fields are not errors. A blank value reports only
/// the blank message.
pub fn collect_errors(errors: &ValidationErrors, partial: bool) -> FieldErrors {
    let mut out = FieldErrors::new();

    for (field, errs) in errors.field_errors() {
        let relevant: Vec<&ValidationError> = errs
            .iter()
            .filter(|e| !(partial && e.code == "required"))
            .collect();
        let chosen: Vec<&ValidationError> = match relevant.iter().find(|e| e.code == "blank") {
            Some(blank) => vec![*blank],
            None => relevant,
        };

        let messages: Vec<String> = chosen
            .iter()
            .map(|e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid value ({}).", e.code))
            })
            .collect();

        if !messages.is_empty() {
            out.insert(field.to_string(), messages);
        }
    }

    out
}

/// Run the declared rules; `Err` carries the field error map
pub fn check<T: Validate>(input: &T, partial: bool) -> Result<(), AppError> {
    match input.validate() {
        Ok(()) => Ok(()),
        Err(errors) => {
            let fields = collect_errors(&errors, partial);
            if fields.is_empty() {
                Ok(())
            } else {
                Err(AppError::Validation(fields))
            }
        }
    }
}

/// Writable student fields
#[derive(Debug, Default, Clone, Deserialize, Validate)]
pub struct StudentInput {
    #[serde(default, deserialize_with = "trimmed")]
    #[validate(
        required(message = "This field is required."),
        custom(function = "not_blank"),
        length(max = 100, message = "Ensure this field has no more than 100 characters.")
    )]
    pub name: Option<String>,

    /// Kept untyped so a bad value is a field error, not a parse failure
    #[validate(required(message = "This field is required."), custom(function = "valid_age"))]
    pub age: Option<Value>,

    #[serde(default, deserialize_with = "trimmed")]
    #[validate(
        required(message = "This field is required."),
        custom(function = "not_blank"),
        email(message = "Enter a valid email address.")
    )]
    pub email: Option<String>,
}

impl StudentInput {
    /// Apply the provided fields on top of `base` (an empty record for creates)
    pub fn apply(self, base: Option<&Student>) -> NewStudent {
        let mut merged = base.cloned().map(NewStudent::from).unwrap_or(NewStudent {
            name: String::new(),
            age: 0,
            email: String::new(),
        });

        if let Some(name) = self.name {
            merged.name = name;
        }
        if let Some(age) = self.age.as_ref().and_then(as_int) {
            merged.age = age;
        }
        if let Some(email) = self.email {
            merged.email = email;
        }
        merged
    }
}

/// Writable account fields; `created` is read-only
#[derive(Debug, Default, Clone, Deserialize, Validate)]
pub struct AccountInput {
    #[serde(default, deserialize_with = "trimmed")]
    #[validate(
        required(message = "This field is required."),
        custom(function = "not_blank"),
        length(max = 100, message = "Ensure this field has no more than 100 characters.")
    )]
    pub account_name: Option<String>,

    pub users: Option<Vec<i64>>,
}

impl AccountInput {
    pub fn apply(self, base: Option<&Account>) -> NewAccount {
        let mut merged = match base {
            Some(account) => NewAccount {
                account_name: account.account_name.clone(),
                users: account.users.clone(),
            },
            None => NewAccount {
                account_name: String::new(),
                users: Vec::new(),
            },
        };

        if let Some(name) = self.account_name {
            merged.account_name = name;
        }
        if let Some(users) = self.users {
            merged.users = users;
        }
        merged
    }
}

/// Username/password pair for every credential exchange endpoint
#[derive(Debug, Default, Deserialize, Validate)]
pub struct CredentialsInput {
    #[serde(default, deserialize_with = "trimmed")]
    #[validate(required(message = "This field is required."), custom(function = "not_blank"))]
    pub username: Option<String>,

    #[validate(required(message = "This field is required."), custom(function = "not_blank"))]
    pub password: Option<String>,
}

impl CredentialsInput {
    /// Validated `(username, password)`
    pub fn into_pair(self) -> Result<(String, String), AppError> {
        check(&self, false)?;
        Ok((
            self.username.unwrap_or_default(),
            self.password.unwrap_or_default(),
        ))
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct RefreshInput {
    #[validate(required(message = "This field is required."), custom(function = "not_blank"))]
    pub refresh: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct VerifyInput {
    #[validate(required(message = "This field is required."), custom(function = "not_blank"))]
    pub token: Option<String>,
}

//! Upstream payload normalization.
//!
//! The user endpoints answer in one of four shapes. [`ParsedShape::parse`]
//! classifies a payload into exactly one of them (first match wins, in the
//! order of the enum variants) and [`normalize`] maps the classified payload
//! onto the canonical [`UserRecord`].
//!
//! Normalization never fails: an unrecognized payload is read leniently and
//! whatever does not fit is dropped, so callers always get a record whose
//! collections are arrays and whose strings are strings.

use crate::record::{StudentProfile, UserId, UserRecord};
use serde_json::{Map, Value};

/// Classified upstream payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParsedShape<'a> {
    /// `{ "user": { ... } }`. Already canonical, read without remapping.
    Wrapped(&'a Map<String, Value>),
    /// Flat object carrying `id` or `email` directly.
    Flat(&'a Map<String, Value>),
    /// `{ "data": { ... } }` or `{ "success": true, ... }`. `None` when the
    /// envelope has no usable `data` object.
    Envelope(Option<&'a Map<String, Value>>),
    /// Anything else.
    Unrecognized(&'a Value),
}

/// How field names are resolved while copying into the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldNames {
    Canonical,
    SnakeFallback,
}

impl<'a> ParsedShape<'a> {
    pub fn parse(raw: &'a Value) -> Self {
        let Some(obj) = raw.as_object() else {
            return Self::Unrecognized(raw);
        };

        if let Some(user) = obj.get("user").and_then(Value::as_object) {
            return Self::Wrapped(user);
        }

        if is_present(obj.get("id")) || is_present(obj.get("email")) {
            return Self::Flat(obj);
        }

        let has_data = obj.contains_key("data");
        let succeeded = obj.get("success").and_then(Value::as_bool) == Some(true);
        if has_data || succeeded {
            return Self::Envelope(obj.get("data").and_then(Value::as_object));
        }

        Self::Unrecognized(raw)
    }

    /// The object the record's fields are copied from.
    pub fn primary(&self) -> Option<&'a Map<String, Value>> {
        match self {
            Self::Wrapped(obj) | Self::Flat(obj) => Some(obj),
            Self::Envelope(data) => *data,
            Self::Unrecognized(raw) => raw.as_object(),
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }

    fn field_names(&self) -> FieldNames {
        match self {
            Self::Wrapped(_) | Self::Unrecognized(_) => FieldNames::Canonical,
            Self::Flat(_) | Self::Envelope(_) => FieldNames::SnakeFallback,
        }
    }
}

/// Normalize any upstream user payload into a [`UserRecord`].
///
/// `normalize(&serde_json::to_value(normalize(x)))` equals `normalize(x)`.
pub fn normalize(raw: &Value) -> UserRecord {
    let shape = ParsedShape::parse(raw);
    let empty = Map::new();
    let primary = shape.primary().unwrap_or(&empty);
    let reader = FieldReader {
        obj: primary,
        names: shape.field_names(),
    };

    let mut record = UserRecord {
        id: reader.id(),
        first_name: reader.string("firstName", "first_name"),
        last_name: reader.string("lastName", "last_name"),
        email: reader.string("email", "email"),
        phone: reader.string("phone", "phone_number"),
        profile_picture_url: reader.string("profilePictureUrl", "profile_picture_url"),
        birth_date: reader.string("birthDate", "birth_date"),
        nationality: reader.nullable_string("nationality", "nationality"),
        age: reader.age(),
        theme: reader.nullable_string("theme", "theme"),
        specialization: reader.nullable_string("specialization", "specialization"),
        roles: reader.roles(),
        diplomas: reader.array("diplomas", "diplomas"),
        addresses: reader.array("addresses", "addresses"),
        documents: reader.array("documents", "documents"),
        student_profile: reader.student_profile(),
        stats: reader.object("stats", "stats"),
        created_at: reader.string("createdAt", "created_at"),
        updated_at: reader.string("updatedAt", "updated_at"),
    };

    recover_portfolio_url(&mut record, shape.primary(), raw);
    record
}

/// Fill a missing portfolio URL from, in order: the primary source, the raw
/// top level, the raw `data` wrapper. The first location that defines the
/// key wins, even when it defines it as null.
fn recover_portfolio_url(record: &mut UserRecord, primary: Option<&Map<String, Value>>, raw: &Value) {
    if record.portfolio_url().is_some() {
        return;
    }

    let raw_obj = raw.as_object();
    let data_obj = raw_obj
        .and_then(|obj| obj.get("data"))
        .and_then(Value::as_object);

    let recovered = [primary, raw_obj, data_obj]
        .into_iter()
        .flatten()
        .find_map(portfolio_url_in);

    if let Some(Some(url)) = recovered {
        record
            .student_profile
            .get_or_insert_with(StudentProfile::default)
            .portfolio_url = Some(url);
    }
}

/// `Some(None)` when the key exists but holds no string.
fn portfolio_url_in(obj: &Map<String, Value>) -> Option<Option<String>> {
    obj.get("studentProfile")
        .and_then(Value::as_object)
        .and_then(|profile| profile.get("portfolioUrl"))
        .map(|url| url.as_str().map(str::to_string))
}

fn is_present(value: Option<&Value>) -> bool {
    value.is_some_and(|v| !v.is_null())
}

struct FieldReader<'a> {
    obj: &'a Map<String, Value>,
    names: FieldNames,
}

impl<'a> FieldReader<'a> {
    /// Canonical value, or the snake_case one when the canonical value is
    /// missing, null or an empty string.
    fn lookup(&self, camel: &str, snake: &str) -> Option<&'a Value> {
        let usable = |v: &&Value| !v.is_null() && v.as_str() != Some("");
        let canonical = self.obj.get(camel).filter(usable);
        match self.names {
            FieldNames::Canonical => canonical,
            FieldNames::SnakeFallback => canonical.or_else(|| self.obj.get(snake).filter(usable)),
        }
    }

    fn string(&self, camel: &str, snake: &str) -> String {
        self.lookup(camel, snake).and_then(scalar_to_string).unwrap_or_default()
    }

    fn nullable_string(&self, camel: &str, snake: &str) -> Option<String> {
        self.lookup(camel, snake).and_then(scalar_to_string)
    }

    fn array(&self, camel: &str, snake: &str) -> Vec<Value> {
        self.lookup(camel, snake)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    fn object(&self, camel: &str, snake: &str) -> Map<String, Value> {
        self.lookup(camel, snake)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    fn id(&self) -> Option<UserId> {
        match self.lookup("id", "user_id")? {
            Value::Number(n) => n.as_i64().map(UserId::Int),
            Value::String(s) => Some(UserId::Text(s.clone())),
            _ => None,
        }
    }

    fn age(&self) -> Option<u32> {
        match self.lookup("age", "age")? {
            Value::Number(n) => n.as_u64().and_then(|age| u32::try_from(age).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Roles arrive as strings or as `{ "name": ... }` objects.
    fn roles(&self) -> Vec<String> {
        let Some(value) = self.lookup("roles", "role") else {
            return Vec::new();
        };
        match value {
            Value::Array(items) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(role) => Some(role.clone()),
                    Value::Object(obj) => obj.get("name").and_then(Value::as_str).map(str::to_string),
                    _ => None,
                })
                .collect(),
            Value::String(role) => vec![role.clone()],
            _ => Vec::new(),
        }
    }

    fn student_profile(&self) -> Option<StudentProfile> {
        let profile = self
            .lookup("studentProfile", "student_profile")?
            .as_object()?;

        let portfolio_url = match self.names {
            FieldNames::Canonical => profile.get("portfolioUrl"),
            FieldNames::SnakeFallback => profile
                .get("portfolioUrl")
                .filter(|v| !v.is_null())
                .or_else(|| profile.get("portfolio_url")),
        }
        .and_then(Value::as_str)
        .map(str::to_string);

        let extra = profile
            .iter()
            .filter(|(key, _)| key.as_str() != "portfolioUrl" && key.as_str() != "portfolio_url")
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Some(StudentProfile {
            portfolio_url,
            extra,
        })
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

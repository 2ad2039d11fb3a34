//! ROSTER Test Utilities
//!
//! Shared test infrastructure for the ROSTER workspace:
//! - A scriptable mock API (counting, delayed, gated, failing)
//! - Proptest generators for the raw payload shapes the normalizer accepts
//! - Fixtures for common payloads and collaborator sets

// Re-export the in-process collaborators from their source crate
pub use roster_cache::{Collaborators, InMemoryQueryCache, MemoryStore, StaticSession};

// Re-export core types for convenience
pub use roster_core::{
    normalize, CacheKey, CachePolicy, FetchError, RosterError, RosterResult, StudentProfile,
    UserId, UserRecord,
};

use async_trait::async_trait;
use roster_cache::{RequestOptions, UserApi};
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

// ============================================================================
// MOCK API
// ============================================================================

/// Mock user API for testing.
///
/// Responses are served from a queue first, then from a fixed fallback. Each
/// call is counted before any delay or gate, so tests can observe callers
/// that are still waiting.
pub struct MockUserApi {
    queued: Mutex<VecDeque<RosterResult<Value>>>,
    fallback: Mutex<RosterResult<Value>>,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
    paths: Mutex<Vec<String>>,
    options: Mutex<Vec<RequestOptions>>,
}

impl MockUserApi {
    /// Always answer with `raw`.
    pub fn returning(raw: Value) -> Self {
        Self::with_fallback(Ok(raw))
    }

    /// Always fail with `err`.
    pub fn failing(err: FetchError) -> Self {
        Self::with_fallback(Err(err.into()))
    }

    fn with_fallback(fallback: RosterResult<Value>) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            delay: None,
            gate: None,
            calls: AtomicUsize::new(0),
            paths: Mutex::new(Vec::new()),
            options: Mutex::new(Vec::new()),
        }
    }

    /// Sleep for `delay` before answering. Honors paused Tokio time.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Hold every call until a permit is available on `gate`.
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Answer the next call with `response`, ahead of the fallback.
    pub fn push_response(&self, response: RosterResult<Value>) {
        lock(&self.queued).push_back(response);
    }

    pub fn set_fallback(&self, response: RosterResult<Value>) {
        *lock(&self.fallback) = response;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requested_paths(&self) -> Vec<String> {
        lock(&self.paths).clone()
    }

    pub fn requested_options(&self) -> Vec<RequestOptions> {
        lock(&self.options).clone()
    }
}

#[async_trait]
impl UserApi for MockUserApi {
    async fn get(&self, path: &str, options: &RequestOptions) -> RosterResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.paths).push(path.to_string());
        lock(&self.options).push(options.clone());

        if let Some(gate) = &self.gate {
            if gate.acquire().await.is_err() {
                return Err(FetchError::Aborted {
                    key: path.to_string(),
                    reason: "mock gate closed".to_string(),
                }
                .into());
            }
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = lock(&self.queued).pop_front();
        match next {
            Some(response) => response,
            None => lock(&self.fallback).clone(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for raw user payloads.

    use super::*;
    use proptest::prelude::*;

    fn key(snake_case: bool, camel: &str, snake: &str) -> String {
        let name = if snake_case { snake } else { camel };
        name.to_string()
    }

    /// Generate an id as either a number or a numeric-ish string.
    pub fn arb_id() -> impl Strategy<Value = Value> {
        prop_oneof![
            (1i64..1_000_000).prop_map(Value::from),
            "[a-z0-9]{1,8}".prop_map(Value::from),
        ]
    }

    /// Generate an age as a number or a numeric string.
    pub fn arb_age() -> impl Strategy<Value = Value> {
        prop_oneof![
            (0u32..120).prop_map(Value::from),
            (0u32..120).prop_map(|age| Value::from(age.to_string())),
        ]
    }

    /// Generate roles as plain strings or `{ name }` objects.
    pub fn arb_roles() -> impl Strategy<Value = Vec<Value>> {
        prop::collection::vec(
            prop_oneof![
                "[a-z]{3,8}".prop_map(Value::from),
                "[a-z]{3,8}".prop_map(|name| json!({ "name": name })),
            ],
            0..3,
        )
    }

    prop_compose! {
        /// Generate a user object's fields, named in camelCase or snake_case.
        pub fn arb_user_fields(snake_case: bool)(
            id in prop::option::of(arb_id()),
            email in prop::option::of("[a-z]{1,8}@example\\.com"),
            first_name in prop::option::of("[A-Za-z]{0,10}"),
            last_name in prop::option::of("[A-Za-z]{0,10}"),
            phone in prop::option::of("[0-9]{6,10}"),
            theme in prop::option::of(prop_oneof![Just("light"), Just("dark")]),
            age in prop::option::of(arb_age()),
            roles in arb_roles(),
            nulls in any::<bool>(),
            portfolio in prop::option::of(prop::option::of("https://[a-z]{3,8}\\.dev")),
        ) -> Map<String, Value> {
            let mut fields = Map::new();
            if let Some(id) = id {
                fields.insert(key(snake_case, "id", "user_id"), id);
            }
            if let Some(email) = email {
                fields.insert("email".to_string(), Value::from(email));
            }
            if let Some(first_name) = first_name {
                fields.insert(key(snake_case, "firstName", "first_name"), Value::from(first_name));
            }
            if let Some(last_name) = last_name {
                fields.insert(key(snake_case, "lastName", "last_name"), Value::from(last_name));
            }
            if let Some(phone) = phone {
                fields.insert(key(snake_case, "phone", "phone_number"), Value::from(phone));
            }
            if let Some(theme) = theme {
                fields.insert("theme".to_string(), Value::from(theme));
            }
            if let Some(age) = age {
                fields.insert("age".to_string(), age);
            }
            if !roles.is_empty() {
                fields.insert("roles".to_string(), Value::Array(roles));
            }
            if nulls {
                fields.insert("diplomas".to_string(), Value::Null);
                fields.insert("stats".to_string(), Value::Null);
            }
            if let Some(portfolio) = portfolio {
                let mut profile = Map::new();
                profile.insert(key(snake_case, "portfolioUrl", "portfolio_url"), Value::from(portfolio));
                profile.insert("major".to_string(), Value::from("design"));
                fields.insert(key(snake_case, "studentProfile", "student_profile"), Value::Object(profile));
            }
            fields
        }
    }

    /// `{ user: { ... } }` with camelCase fields.
    pub fn arb_wrapped_response() -> impl Strategy<Value = Value> {
        arb_user_fields(false).prop_map(|fields| json!({ "user": fields }))
    }

    /// A flat user object that always carries an email.
    pub fn arb_flat_response() -> impl Strategy<Value = Value> {
        (any::<bool>().prop_flat_map(arb_user_fields), "[a-z]{1,8}@example\\.com").prop_map(
            |(mut fields, email)| {
                fields.entry("email").or_insert(Value::from(email));
                Value::Object(fields)
            },
        )
    }

    /// `{ data: { ... } }`, optionally with `success: true`, or a bare
    /// `{ success: true }` with no data.
    pub fn arb_envelope_response() -> impl Strategy<Value = Value> {
        prop_oneof![
            (any::<bool>().prop_flat_map(arb_user_fields), any::<bool>()).prop_map(
                |(fields, success)| {
                    let mut envelope = Map::new();
                    envelope.insert("data".to_string(), Value::Object(fields));
                    if success {
                        envelope.insert("success".to_string(), Value::Bool(true));
                    }
                    Value::Object(envelope)
                }
            ),
            Just(json!({ "success": true, "message": "ok" })),
        ]
    }

    /// Payloads no recognized shape matches.
    pub fn arb_unrecognized_response() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<i64>().prop_map(Value::from),
            "[a-z ]{0,12}".prop_map(Value::from),
            prop::collection::vec(any::<i32>(), 0..4).prop_map(|items| json!(items)),
            prop::collection::btree_map("x_[a-z]{1,6}", any::<i64>(), 0..4)
                .prop_map(|fields| json!(fields)),
            "[A-Za-z]{1,10}".prop_map(|name| json!({ "firstName": name, "success": false })),
        ]
    }

    /// Any of the four payload shapes.
    pub fn arb_raw_response() -> impl Strategy<Value = Value> {
        prop_oneof![
            arb_wrapped_response(),
            arb_flat_response(),
            arb_envelope_response(),
            arb_unrecognized_response(),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built payloads and collaborator sets.

    use super::*;

    /// Flat snake_case payload, as the profile endpoint sends it.
    pub fn raw_flat_user() -> Value {
        json!({
            "id": 42,
            "email": "ada@example.com",
            "first_name": "Ada",
            "last_name": "Lovelace",
            "phone_number": "5550100",
            "profile_picture_url": "https://cdn.example.com/ada.png",
            "roles": [{ "name": "student" }, "mentor"],
            "age": "36",
            "student_profile": { "portfolio_url": "https://ada.dev", "major": "math" },
            "diplomas": null,
            "created_at": "2024-01-02T03:04:05Z",
        })
    }

    /// `{ user: ... }` payload with camelCase fields.
    pub fn raw_wrapped_user() -> Value {
        json!({
            "user": {
                "id": 42,
                "email": "ada@example.com",
                "firstName": "Ada",
                "lastName": "Lovelace",
                "roles": ["student"],
                "theme": "dark",
                "studentProfile": { "portfolioUrl": "https://ada.dev" },
            }
        })
    }

    /// `{ success, data }` envelope with snake_case fields inside.
    pub fn raw_envelope_user() -> Value {
        json!({
            "success": true,
            "data": {
                "user_id": "u-42",
                "email": "ada@example.com",
                "first_name": "Ada",
                "specialization": "Analysis",
            }
        })
    }

    /// A payload none of the recognized shapes match.
    pub fn raw_unrecognized() -> Value {
        json!({ "status": "pending", "firstName": "Ada" })
    }

    /// The record [`raw_flat_user`] normalizes to.
    pub fn sample_record() -> UserRecord {
        normalize(&raw_flat_user())
    }

    pub fn transport_error(path: &str) -> FetchError {
        FetchError::Transport {
            path: path.to_string(),
            reason: "connection reset".to_string(),
        }
    }

    /// Collaborators over a mock API and in-memory store and query cache.
    pub fn collaborators(
        api: Arc<MockUserApi>,
        store: Arc<MemoryStore>,
        session: Arc<StaticSession>,
    ) -> Collaborators {
        Collaborators::new(api, store, session)
    }

    /// Policy with the default route and a short cooldown.
    pub fn short_throttle_policy() -> CachePolicy {
        CachePolicy::new().with_throttle_window(Duration::from_secs(1))
    }
}

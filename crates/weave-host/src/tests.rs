// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::*;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;
use weave_core::{CoreError, FieldMap, Resource, ResourceType, TypeKey, Value, fields};
use weave_engine::{CallError, Engine, Frame, Invokable};
use weave_store::Store;

// ── test fixtures ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
struct AddRequest {
    a: i64,
    b: i64,
}

impl Resource for AddRequest {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn field_names(&self) -> Vec<String> {
        vec!["a".to_string(), "b".to_string()]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![Value::Int(self.a), Value::Int(self.b)]
    }
}

impl ResourceType for AddRequest {
    const TYPE_NAME: &'static str = "host.AddRequest";

    fn from_fields(mut f: FieldMap) -> Result<Self, CoreError> {
        Ok(Self {
            a: fields::take_int(&mut f, Self::TYPE_NAME, "a")?,
            b: fields::take_int(&mut f, Self::TYPE_NAME, "b")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Adder;

impl Resource for Adder {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn field_names(&self) -> Vec<String> {
        vec![]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![]
    }
}

impl ResourceType for Adder {
    const TYPE_NAME: &'static str = "host.Adder";

    fn from_fields(_f: FieldMap) -> Result<Self, CoreError> {
        Ok(Self)
    }
}

impl Invokable for Adder {
    fn as_resource(&self) -> &dyn Resource {
        self
    }

    fn input_type(&self) -> Option<TypeKey> {
        Some(AddRequest::type_key())
    }

    fn call(&self, _cx: &mut Frame<'_>, input: Value) -> Result<Value, CallError> {
        let request = input
            .as_resource()
            .ok_or_else(|| CallError::raise("type", "expected an AddRequest"))?;
        let mut values = request.field_values().into_iter();
        let a = values.next().and_then(|v| v.as_int()).unwrap_or(0);
        let b = values.next().and_then(|v| v.as_int()).unwrap_or(0);
        Ok(Value::Int(a + b))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Failing;

impl Resource for Failing {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn field_names(&self) -> Vec<String> {
        vec![]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![]
    }
}

impl ResourceType for Failing {
    const TYPE_NAME: &'static str = "host.Failing";

    fn from_fields(_f: FieldMap) -> Result<Self, CoreError> {
        Ok(Self)
    }
}

impl Invokable for Failing {
    fn as_resource(&self) -> &dyn Resource {
        self
    }

    fn call(&self, _cx: &mut Frame<'_>, _input: Value) -> Result<Value, CallError> {
        Err(CallError::raise("teapot", "cannot brew"))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Waiting;

impl Resource for Waiting {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn field_names(&self) -> Vec<String> {
        vec![]
    }

    fn field_values(&self) -> Vec<Value> {
        vec![]
    }
}

impl ResourceType for Waiting {
    const TYPE_NAME: &'static str = "host.Waiting";

    fn from_fields(_f: FieldMap) -> Result<Self, CoreError> {
        Ok(Self)
    }
}

impl Invokable for Waiting {
    fn as_resource(&self) -> &dyn Resource {
        self
    }

    fn call(&self, cx: &mut Frame<'_>, _input: Value) -> Result<Value, CallError> {
        cx.request_input(
            TypeKey::from_name("weave.ValueCell"),
            None,
            Value::Str("which flavor?".to_string()),
        )
    }
}

fn app() -> Router {
    let store = Store::in_memory();
    store.registry().register::<AddRequest>().unwrap();
    let engine = Engine::new(store);
    Host::new(engine)
        .expose("add", Arc::new(Adder))
        .expose("fail", Arc::new(Failing))
        .expose("wait", Arc::new(Waiting))
        .router()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ── endpoints ──────────────────────────────────────────────────────

#[tokio::test]
async fn invoking_with_a_typed_body_returns_the_packed_output() {
    let response = app()
        .oneshot(post_json("/invoke/add", serde_json::json!({"a": 2, "b": 40})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, serde_json::json!(42));
}

#[tokio::test]
async fn unknown_invokables_are_404() {
    let response = app()
        .oneshot(post_json("/invoke/missing", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn malformed_input_is_400() {
    let response = app()
        .oneshot(post_json("/invoke/add", serde_json::json!({"a": 2})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn failed_invocations_are_422_with_the_raised_resource() {
    let response = app()
        .oneshot(post_json("/invoke/fail", serde_json::json!(null)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["code"], "invocation_failed");
    assert_eq!(body["raised"]["fields"]["kind"], "teapot");
}

#[tokio::test]
async fn suspended_invocations_are_409() {
    let response = app()
        .oneshot(post_json("/invoke/wait", serde_json::json!(null)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["code"], "input_required");
}

#[tokio::test]
async fn health_reports_exposed_invokables() {
    let response = app()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["invokables"], 3);
}

//! Action registry and response dispatch.
//!
//! Every API action binds exactly one [`DecodeStrategy`] describing how its
//! raw response becomes a caller-facing result. The registry is built once
//! at client construction and read-only afterwards; dispatch looks the
//! strategy up by action name and applies it.

use crate::error::{self, Result};
use crate::types::{self, Resource, ResourceKind};
use crate::Transport;
use log::warn;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// The response field carrying the API's own success flag.
const SUCCESS_FIELD: &str = "return";

/// Boxed future used by custom decode functions.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A custom decoder. It receives the raw response and the transport handle
/// and may perform one follow-up round trip before producing its outcome;
/// it must not retry or loop.
pub type CustomDecode =
    for<'a> fn(&'a Value, &'a dyn Transport) -> BoxFuture<'a, Result<Outcome>>;

/// How to turn a raw decoded response into a caller-facing result.
#[derive(Clone)]
pub enum DecodeStrategy {
    /// Interpret the API's own success flag as a true/false result.
    Boolean,
    /// Pull a single field out of the response, e.g. a fresh identifier.
    FieldExtract(&'static str),
    /// Interpret a named list field as a sequence of records. Absent or
    /// empty fields decode as an empty sequence.
    FetchItems {
        list_key: &'static str,
        target: ResourceKind,
    },
    /// Interpret a named field as a single record, absent as `None`.
    FetchOne {
        object_key: &'static str,
        target: ResourceKind,
    },
    /// Arbitrary decode with access to the transport for one follow-up
    /// call.
    Custom(CustomDecode),
}

impl fmt::Debug for DecodeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeStrategy::Boolean => write!(f, "Boolean"),
            DecodeStrategy::FieldExtract(key) => write!(f, "FieldExtract({})", key),
            DecodeStrategy::FetchItems { list_key, target } => {
                write!(f, "FetchItems({}, {:?})", list_key, target)
            }
            DecodeStrategy::FetchOne { object_key, target } => {
                write!(f, "FetchOne({}, {:?})", object_key, target)
            }
            DecodeStrategy::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// The caller-facing result of a dispatched response.
#[derive(Debug, Clone)]
pub enum Outcome {
    Flag(bool),
    Field(Option<String>),
    One(Option<Resource>),
    Many(Vec<Resource>),
}

impl Outcome {
    pub fn flag(self, action: &str) -> Result<bool> {
        match self {
            Outcome::Flag(value) => Ok(value),
            _ => error::UnexpectedResponse {
                action,
                expected: "a boolean flag",
            }
            .fail(),
        }
    }

    pub fn field(self, action: &str) -> Result<Option<String>> {
        match self {
            Outcome::Field(value) => Ok(value),
            _ => error::UnexpectedResponse {
                action,
                expected: "a scalar field",
            }
            .fail(),
        }
    }

    pub fn one(self, action: &str) -> Result<Option<Resource>> {
        match self {
            Outcome::One(value) => Ok(value),
            _ => error::UnexpectedResponse {
                action,
                expected: "a single record",
            }
            .fail(),
        }
    }

    pub fn many(self, action: &str) -> Result<Vec<Resource>> {
        match self {
            Outcome::Many(records) => Ok(records),
            _ => error::UnexpectedResponse {
                action,
                expected: "a record list",
            }
            .fail(),
        }
    }
}

/// Maps action names to decode strategies.
///
/// Built during client initialization and never mutated afterwards, so
/// concurrent dispatches share it freely.
#[derive(Debug, Default)]
pub struct ActionRegistry {
    entries: HashMap<&'static str, DecodeStrategy>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        ActionRegistry {
            entries: HashMap::new(),
        }
    }

    /// Binds `action` to `strategy`. A later registration for the same
    /// action replaces the earlier one; legal, but loud, since nothing
    /// validates which registration should logically win.
    pub fn register(&mut self, action: &'static str, strategy: DecodeStrategy) {
        if self.entries.insert(action, strategy).is_some() {
            warn!("replaced decode strategy for action `{}`", action);
        }
    }

    pub fn contains(&self, action: &str) -> bool {
        self.entries.contains_key(action)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn strategy(&self, action: &str) -> Result<&DecodeStrategy> {
        match self.entries.get(action) {
            Some(strategy) => Ok(strategy),
            None => error::UnregisteredAction { action }.fail(),
        }
    }

    /// Applies the strategy bound to `action` to a raw response.
    ///
    /// Transport errors raised by a `Custom` strategy's follow-up call are
    /// forwarded unchanged.
    pub async fn dispatch(
        &self,
        action: &str,
        raw: &Value,
        transport: &dyn Transport,
    ) -> Result<Outcome> {
        match self.strategy(action)? {
            DecodeStrategy::Boolean => {
                let flag = raw.get(SUCCESS_FIELD).and_then(Value::as_str) == Some("true");
                Ok(Outcome::Flag(flag))
            }
            DecodeStrategy::FieldExtract(key) => Ok(Outcome::Field(extract_scalar(raw, key))),
            DecodeStrategy::FetchItems { list_key, target } => {
                let mut records = Vec::new();
                for item in types::item_values(raw.get(*list_key)) {
                    records.push(target.decode(&item)?);
                }
                Ok(Outcome::Many(records))
            }
            DecodeStrategy::FetchOne { object_key, target } => match raw.get(*object_key) {
                Some(value) if !value.is_null() => {
                    Ok(Outcome::One(Some(target.decode(value)?)))
                }
                _ => Ok(Outcome::One(None)),
            },
            DecodeStrategy::Custom(decode) => decode(raw, transport).await,
        }
    }
}

fn extract_scalar(raw: &Value, key: &str) -> Option<String> {
    match raw.get(key) {
        Some(Value::String(value)) => Some(value.clone()),
        Some(Value::Number(value)) => Some(value.to_string()),
        Some(Value::Bool(value)) => Some(value.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::params::Parameter;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A transport that answers every call with a canned value.
    struct CannedTransport {
        response: Value,
        calls: AtomicUsize,
    }

    impl CannedTransport {
        fn new(response: Value) -> Self {
            CannedTransport {
                response,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Transport for CannedTransport {
        async fn call(&self, _action: &str, _params: &[Parameter]) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    fn no_transport() -> CannedTransport {
        CannedTransport::new(Value::Null)
    }

    #[tokio::test]
    async fn boolean_strategy_reads_the_return_flag() {
        let mut registry = ActionRegistry::new();
        registry.register("DeleteSecurityGroup", DecodeStrategy::Boolean);
        let transport = no_transport();

        let raw = json!({ "return": "true" });
        let outcome = registry
            .dispatch("DeleteSecurityGroup", &raw, &transport)
            .await
            .unwrap();
        assert!(outcome.flag("DeleteSecurityGroup").unwrap());

        let raw = json!({ "return": "false" });
        let outcome = registry
            .dispatch("DeleteSecurityGroup", &raw, &transport)
            .await
            .unwrap();
        assert!(!outcome.flag("DeleteSecurityGroup").unwrap());

        // an absent flag is false, not an error
        let raw = json!({});
        let outcome = registry
            .dispatch("DeleteSecurityGroup", &raw, &transport)
            .await
            .unwrap();
        assert!(!outcome.flag("DeleteSecurityGroup").unwrap());
    }

    #[tokio::test]
    async fn fetch_items_tolerates_absent_list() {
        let mut registry = ActionRegistry::new();
        registry.register(
            "DescribeImages",
            DecodeStrategy::FetchItems {
                list_key: "imagesSet",
                target: ResourceKind::Image,
            },
        );
        let transport = no_transport();
        let outcome = registry
            .dispatch("DescribeImages", &json!({}), &transport)
            .await
            .unwrap();
        assert!(outcome.many("DescribeImages").unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetch_items_unwraps_single_item_object() {
        let mut registry = ActionRegistry::new();
        registry.register(
            "DescribeImages",
            DecodeStrategy::FetchItems {
                list_key: "imagesSet",
                target: ResourceKind::Image,
            },
        );
        let transport = no_transport();
        let raw = json!({ "imagesSet": { "item": { "imageId": "ami-1" } } });
        let records = registry
            .dispatch("DescribeImages", &raw, &transport)
            .await
            .unwrap()
            .many("DescribeImages")
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn field_extract_returns_none_when_absent() {
        let mut registry = ActionRegistry::new();
        registry.register("CreateImage", DecodeStrategy::FieldExtract("imageId"));
        let transport = no_transport();
        let outcome = registry
            .dispatch("CreateImage", &json!({}), &transport)
            .await
            .unwrap();
        assert_eq!(outcome.field("CreateImage").unwrap(), None);
    }

    #[tokio::test]
    async fn re_registration_replaces_the_strategy() {
        let mut registry = ActionRegistry::new();
        registry.register("CreateCustomerGateway", DecodeStrategy::Boolean);
        registry.register(
            "CreateCustomerGateway",
            DecodeStrategy::FieldExtract("customerGatewayId"),
        );
        assert_eq!(registry.len(), 1);
        let transport = no_transport();
        let raw = json!({ "customerGatewayId": "cgw-1", "return": "true" });
        let outcome = registry
            .dispatch("CreateCustomerGateway", &raw, &transport)
            .await
            .unwrap();
        // the later registration wins
        assert_eq!(
            outcome.field("CreateCustomerGateway").unwrap().as_deref(),
            Some("cgw-1")
        );
    }

    #[tokio::test]
    async fn unregistered_action_is_an_error() {
        let registry = ActionRegistry::new();
        let transport = no_transport();
        let err = registry
            .dispatch("DescribeVolumes", &json!({}), &transport)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnregisteredAction { .. }));
    }

    #[tokio::test]
    async fn custom_strategy_gets_one_follow_up_call() {
        fn resolve<'a>(
            raw: &'a Value,
            transport: &'a dyn Transport,
        ) -> BoxFuture<'a, Result<Outcome>> {
            Box::pin(async move {
                let id = raw
                    .get("reservedInstancesId")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let resp = transport
                    .call("DescribeReservedInstances", &[Parameter::new(
                        "ReservedInstancesId.1",
                        id,
                    )])
                    .await?;
                let items = types::item_values(resp.get("reservedInstancesSet"));
                match items.first() {
                    Some(item) => Ok(Outcome::One(Some(
                        ResourceKind::ReservedInstances.decode(item)?,
                    ))),
                    None => Ok(Outcome::One(None)),
                }
            })
        }

        let mut registry = ActionRegistry::new();
        registry.register(
            "PurchaseReservedInstancesOffering",
            DecodeStrategy::Custom(resolve),
        );
        let transport = CannedTransport::new(json!({
            "reservedInstancesSet": { "item": { "reservedInstancesId": "ri-1" } }
        }));
        let raw = json!({ "reservedInstancesId": "ri-1" });
        let outcome = registry
            .dispatch("PurchaseReservedInstancesOffering", &raw, &transport)
            .await
            .unwrap();
        let record = outcome
            .one("PurchaseReservedInstancesOffering")
            .unwrap()
            .unwrap()
            .into_reserved_instances()
            .unwrap();
        assert_eq!(record.reserved_instances_id.as_deref(), Some("ri-1"));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }
}

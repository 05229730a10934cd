// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! One-shot requests against the current session.
//!
//! Every [`AttributeReader`] operation fetches the current session, issues
//! exactly one request bounded by `request_timeout`, and hands any failure to
//! [`SessionSupervisor::report_error`] before returning it. Nothing is retried
//! here; calling again after a recycle naturally uses the new session.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::time;
use tracing::{debug, trace};

use crate::client::session::{Session, SessionSupervisor};
use crate::client::transport::{DataValue, ProtocolClient, ReadValueId, ReferenceDescription, Variant};
use crate::error::{OpcUaError, OpcUaResult, Operation, RequestError};
use crate::types::{AttributeId, BrowseFilter, NodeId};

// =============================================================================
// Reference
// =============================================================================

/// A browsed reference with its synthesized id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reference {
    /// `"{source}->{referenceType}->{target}"`.
    pub id: String,

    /// The reference as returned by the server.
    #[serde(flatten)]
    pub description: ReferenceDescription,
}

impl Reference {
    fn new(source: &NodeId, description: ReferenceDescription) -> Self {
        let id = format!(
            "{}->{}->{}",
            source, description.reference_type_id, description.node_id
        );
        Self { id, description }
    }
}

// =============================================================================
// AttributeReader
// =============================================================================

/// Stateless request helper over a [`SessionSupervisor`].
pub struct AttributeReader<C: ProtocolClient> {
    supervisor: Arc<SessionSupervisor<C>>,
}

impl<C: ProtocolClient> Clone for AttributeReader<C> {
    fn clone(&self) -> Self {
        Self {
            supervisor: Arc::clone(&self.supervisor),
        }
    }
}

impl<C: ProtocolClient> AttributeReader<C> {
    /// Creates a reader.
    pub fn new(supervisor: Arc<SessionSupervisor<C>>) -> Self {
        Self { supervisor }
    }

    /// Returns the supervisor.
    pub fn supervisor(&self) -> &Arc<SessionSupervisor<C>> {
        &self.supervisor
    }

    /// Reads one attribute.
    ///
    /// # Errors
    ///
    /// A bad value status fails with `RequestFailed` carrying that status.
    pub async fn read_attribute(
        &self,
        node_id: &NodeId,
        attribute: AttributeId,
    ) -> OpcUaResult<DataValue> {
        let request = vec![ReadValueId::new(node_id.clone(), attribute)];
        let node = node_id.to_string();

        self.execute(Operation::Read, node_id, move |client, session| async move {
            let mut results = client.read(session.handle(), &request).await?;
            if results.is_empty() {
                return Err(OpcUaError::request(RequestError::rejected(
                    Operation::Read,
                    node,
                    "server returned no results",
                )));
            }
            let value = results.swap_remove(0);
            if value.is_bad() {
                return Err(OpcUaError::request_failed(Operation::Read, node, value.status));
            }
            Ok(value)
        })
        .await
    }

    /// Reads several attributes of one node in a single request.
    ///
    /// Per-attribute bad statuses are returned in place, except statuses that
    /// invalidate the session, which fail the whole call.
    pub async fn read_attributes(
        &self,
        node_id: &NodeId,
        attributes: &[AttributeId],
    ) -> OpcUaResult<Vec<DataValue>> {
        let request: Vec<ReadValueId> = attributes
            .iter()
            .map(|attribute| ReadValueId::new(node_id.clone(), *attribute))
            .collect();
        let node = node_id.to_string();

        self.execute(Operation::Read, node_id, move |client, session| async move {
            let results = client.read(session.handle(), &request).await?;
            if results.len() != request.len() {
                return Err(OpcUaError::request(RequestError::rejected(
                    Operation::Read,
                    node,
                    format!("expected {} results, got {}", request.len(), results.len()),
                )));
            }
            if let Some(invalid) = results.iter().find(|v| v.status.is_session_invalid()) {
                return Err(OpcUaError::request_failed(Operation::Read, node, invalid.status));
            }
            Ok(results)
        })
        .await
    }

    /// Reads the Value attribute and returns the bare value.
    pub async fn read_value(&self, node_id: &NodeId) -> OpcUaResult<Variant> {
        self.read_attribute(node_id, AttributeId::Value)
            .await
            .map(|data| data.value)
    }

    /// Writes one attribute.
    pub async fn write_attribute(
        &self,
        node_id: &NodeId,
        attribute: AttributeId,
        value: Variant,
    ) -> OpcUaResult<()> {
        let target = node_id.clone();
        let node = node_id.to_string();

        self.execute(Operation::Write, node_id, move |client, session| async move {
            let status = client.write(session.handle(), &target, attribute, value).await?;
            if status.is_bad() {
                return Err(OpcUaError::request_failed(Operation::Write, node, status));
            }
            Ok(())
        })
        .await
    }

    /// Calls `method_id` on `object_id` and returns the output arguments.
    pub async fn invoke(
        &self,
        object_id: &NodeId,
        method_id: &NodeId,
        arguments: Vec<Variant>,
    ) -> OpcUaResult<Vec<Variant>> {
        let object = object_id.clone();
        let method = method_id.clone();

        self.execute(Operation::Call, object_id, move |client, session| async move {
            let result = client.call(session.handle(), &object, &method, arguments).await?;
            if result.status.is_bad() {
                return Err(OpcUaError::request_failed(
                    Operation::Call,
                    method.to_string(),
                    result.status,
                ));
            }
            Ok(result.output_arguments)
        })
        .await
    }

    /// Browses the references of a node.
    pub async fn browse_references(
        &self,
        node_id: &NodeId,
        filter: &BrowseFilter,
    ) -> OpcUaResult<Vec<Reference>> {
        let source = node_id.clone();
        let filter = filter.clone();

        self.execute(Operation::Browse, node_id, move |client, session| async move {
            let result = client.browse(session.handle(), &source, &filter).await?;
            if result.status.is_bad() {
                return Err(OpcUaError::request_failed(
                    Operation::Browse,
                    source.to_string(),
                    result.status,
                ));
            }
            Ok(result
                .references
                .into_iter()
                .map(|description| Reference::new(&source, description))
                .collect())
        })
        .await
    }

    /// Runs one request against the current session.
    async fn execute<T, F, Fut>(
        &self,
        operation: Operation,
        node_id: &NodeId,
        request: F,
    ) -> OpcUaResult<T>
    where
        F: FnOnce(Arc<C>, Arc<Session>) -> Fut + Send,
        Fut: Future<Output = OpcUaResult<T>> + Send,
        T: Send,
    {
        let session = self.supervisor.current_session().await?;
        let timeout = self.supervisor.config().request_timeout;
        trace!(%operation, node_id = %node_id, session = %session, "Issuing request");

        let outcome = match time::timeout(
            timeout,
            request(self.supervisor.client(), Arc::clone(&session)),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(OpcUaError::request_timeout(
                operation,
                node_id.to_string(),
                timeout,
            )),
        };

        if let Err(error) = &outcome {
            let recycled = self.supervisor.report_error(&session, error);
            debug!(
                %operation,
                node_id = %node_id,
                error = %error,
                recycled,
                "Request failed"
            );
        }
        outcome
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::simulated::{RequestFault, SimulatedClient};
    use crate::types::{NodeClass, OpcUaConfig, StatusCode};
    use std::time::Duration;
    use uaql_core::BackoffPolicy;

    async fn setup() -> (
        Arc<SimulatedClient>,
        Arc<SessionSupervisor<SimulatedClient>>,
        AttributeReader<SimulatedClient>,
    ) {
        let client = Arc::new(SimulatedClient::with_demo_address_space());
        let config = OpcUaConfig::builder()
            .endpoint("opc.tcp://sim:4840")
            .request_timeout(Duration::from_millis(100))
            .reconnect(BackoffPolicy::fixed(Duration::from_millis(5)))
            .build()
            .unwrap();
        let supervisor = Arc::new(SessionSupervisor::new(Arc::clone(&client), config));
        supervisor.start().unwrap();
        let reader = AttributeReader::new(Arc::clone(&supervisor));
        (client, supervisor, reader)
    }

    fn temperature() -> NodeId {
        NodeId::string(2, "Temperature")
    }

    #[tokio::test]
    async fn test_read_and_write() {
        let (_client, supervisor, reader) = setup().await;

        let value = reader.read_value(&temperature()).await.unwrap();
        assert_eq!(value, Variant::Double(21.5));

        reader
            .write_attribute(&temperature(), AttributeId::Value, Variant::Double(30.0))
            .await
            .unwrap();
        assert_eq!(
            reader.read_value(&temperature()).await.unwrap(),
            Variant::Double(30.0)
        );

        let name = reader
            .read_attribute(&temperature(), AttributeId::DisplayName)
            .await
            .unwrap();
        assert_eq!(name.value, Variant::from("Temperature"));

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_read_attributes_single_request() {
        let (client, supervisor, reader) = setup().await;
        reader.read_value(&temperature()).await.unwrap();
        let before = client.stats().requests;

        let values = reader
            .read_attributes(
                &temperature(),
                &[AttributeId::BrowseName, AttributeId::Value, AttributeId::Executable],
            )
            .await
            .unwrap();

        assert_eq!(values.len(), 3);
        assert!(values[1].is_good());
        assert_eq!(values[2].status, StatusCode::BAD_ATTRIBUTE_ID_INVALID);
        assert_eq!(client.stats().requests, before + 1);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_benign_failure_keeps_session() {
        let (_client, supervisor, reader) = setup().await;
        let session = supervisor.current_session().await.unwrap();

        let error = reader
            .read_value(&NodeId::string(2, "Missing"))
            .await
            .unwrap_err();
        assert_eq!(error.status(), Some(StatusCode::BAD_NODE_ID_UNKNOWN));
        assert!(!error.is_session_fatal());

        let error = reader
            .write_attribute(&temperature(), AttributeId::Value, Variant::from("hot"))
            .await
            .unwrap_err();
        assert_eq!(error.status(), Some(StatusCode::BAD_TYPE_MISMATCH));

        assert!(supervisor.is_current(&session));
        assert_eq!(supervisor.stats().recycles, 0);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_timeout_is_fatal() {
        let (client, supervisor, reader) = setup().await;
        let session = supervisor.current_session().await.unwrap();

        client.inject_request_fault(RequestFault::Hang);
        let error = reader.read_value(&temperature()).await.unwrap_err();
        assert!(matches!(
            error,
            OpcUaError::Request(RequestError::TimedOut { .. })
        ));
        assert!(error.is_session_fatal());

        let mut current = supervisor.current_session().await.unwrap();
        while current.generation() == session.generation() {
            tokio::time::sleep(Duration::from_millis(5)).await;
            current = supervisor.current_session().await.unwrap();
        }
        assert_eq!(supervisor.stats().recycles, 1);
        assert!(reader.read_value(&temperature()).await.is_ok());

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_invoke() {
        let (_client, supervisor, reader) = setup().await;
        let device = NodeId::string(2, "Device");

        let outputs = reader
            .invoke(
                &device,
                &NodeId::string(2, "Device.Add"),
                vec![Variant::Double(1.5), Variant::Double(2.0)],
            )
            .await
            .unwrap();
        assert_eq!(outputs, vec![Variant::Double(3.5)]);

        let error = reader
            .invoke(&device, &NodeId::string(2, "Device.Missing"), vec![])
            .await
            .unwrap_err();
        assert_eq!(error.status(), Some(StatusCode::BAD_METHOD_INVALID));

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_browse_synthesizes_ids() {
        let (_client, supervisor, reader) = setup().await;
        let device = NodeId::string(2, "Device");

        let references = reader
            .browse_references(&device, &BrowseFilter::new().node_classes(&[NodeClass::Variable]))
            .await
            .unwrap();

        assert!(!references.is_empty());
        assert!(references
            .iter()
            .all(|r| r.description.node_class == NodeClass::Variable));
        let temperature = references
            .iter()
            .find(|r| r.description.node_id == temperature())
            .unwrap();
        assert_eq!(temperature.id, "ns=2;s=Device->i=47->ns=2;s=Temperature");

        let error = reader
            .browse_references(&NodeId::string(2, "Missing"), &BrowseFilter::default())
            .await
            .unwrap_err();
        assert_eq!(error.status(), Some(StatusCode::BAD_NODE_ID_UNKNOWN));

        supervisor.shutdown().await;
    }
}

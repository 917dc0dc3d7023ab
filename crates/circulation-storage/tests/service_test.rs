// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Storage service tests over loopback TCP with sealed envelopes.

mod common;

use std::sync::Arc;
use std::time::Duration;

use circulation_protocol::{
    CodecKeys, CommandResult, Endpoint, Envelope, EnvelopeCodec, RequestClient,
    RequestClientConfig, RequestServer,
};
use circulation_storage::persistence::{CirculationStore, SqliteStore};
use circulation_storage::service::StorageService;

use common::{Harness, SwitchableStore, copies, memory_store};

fn keys() -> CodecKeys {
    CodecKeys::new("storage-test-encryption", "storage-test-mac").with_rounds(1_000)
}

struct Running {
    codec: EnvelopeCodec,
    client: RequestClient,
    server: tokio::task::JoinHandle<()>,
}

impl Running {
    async fn call(&mut self, envelope: &Envelope) -> CommandResult {
        let wire = self.codec.encode_envelope(envelope).unwrap();
        let reply = self.client.request(&wire).await.unwrap();
        self.codec.decode_result(&reply).unwrap()
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn start(harness: &Harness) -> Running {
    let service = StorageService::new(EnvelopeCodec::new(&keys()), harness.gateway.clone());
    let server = RequestServer::bind(&Endpoint::parse("tcp://127.0.0.1:0").unwrap())
        .await
        .unwrap();
    let endpoint = Endpoint::from(server.local_addr().unwrap());
    let server = tokio::spawn(async move {
        let _ = server.serve(service).await;
    });

    Running {
        codec: EnvelopeCodec::new(&keys()),
        client: RequestClient::new(
            endpoint,
            RequestClientConfig::uniform(Duration::from_secs(2)),
        ),
        server,
    }
}

async fn stocked(copies: i32) -> Arc<SqliteStore> {
    let store = memory_store().await;
    store.upsert_inventory("B1", "BK1", copies).await.unwrap();
    store
}

#[tokio::test]
async fn test_loan_scenario_over_the_wire() {
    let primary = stocked(1).await;
    let harness = Harness::new(primary.clone(), memory_store().await);
    let mut running = start(&harness).await;

    let first = running.call(&Envelope::loan("B1", "U1", "BK1")).await;
    assert!(first.ok, "{first}");
    assert!(first.message.contains("created"));
    assert_eq!(copies(primary.as_ref(), "B1", "BK1").await, 0);

    let second = running.call(&Envelope::loan("B1", "U1", "BK1")).await;
    assert!(second.ok, "{second}");
    assert_eq!(second.message, "loan already active, nothing to do");
    assert_eq!(copies(primary.as_ref(), "B1", "BK1").await, 0);

    let other_user = running.call(&Envelope::loan("B1", "U2", "BK1")).await;
    assert!(!other_user.ok);
    assert_eq!(other_user.message, "no copies available");
}

#[tokio::test]
async fn test_return_and_renew_over_the_wire() {
    let primary = stocked(1).await;
    let harness = Harness::new(primary.clone(), memory_store().await);
    let mut running = start(&harness).await;

    let missing = running.call(&Envelope::return_book("B1", "U1", "BK1")).await;
    assert_eq!(missing, CommandResult::failure("no loan to return"));

    running.call(&Envelope::loan("B1", "U1", "BK1")).await;
    let renewed = running.call(&Envelope::renew("B1", "U1", "BK1")).await;
    assert!(renewed.ok);
    assert!(renewed.message.contains("(1/2)"));

    let returned = running.call(&Envelope::return_book("B1", "U1", "BK1")).await;
    assert!(returned.ok);
    assert_eq!(copies(primary.as_ref(), "B1", "BK1").await, 1);

    let again = running.call(&Envelope::return_book("B1", "U1", "BK1")).await;
    assert_eq!(
        again,
        CommandResult::success("loan already returned, nothing to do")
    );
}

#[tokio::test]
async fn test_undecodable_requests_get_sealed_failures() {
    let harness = Harness::new(stocked(1).await, memory_store().await);
    let mut running = start(&harness).await;

    // Sealed with different keys: authentication fails.
    let foreign = EnvelopeCodec::new(&CodecKeys::new("other", "keys").with_rounds(1_000));
    let wire = foreign
        .encode_envelope(&Envelope::loan("B1", "U1", "BK1"))
        .unwrap();
    let reply = running.client.request(&wire).await.unwrap();
    let result = running.codec.decode_result(&reply).unwrap();
    assert!(!result.ok);

    // Well sealed but with an unknown operation.
    let wire = running.codec.seal("LEND|B1|U1|BK1").unwrap();
    let reply = running.client.request(&wire).await.unwrap();
    let result = running.codec.decode_result(&reply).unwrap();
    assert!(!result.ok);

    // Garbage.
    let reply = running.client.request("not an envelope").await.unwrap();
    assert!(!running.codec.decode_result(&reply).unwrap().ok);

    // The service keeps serving afterwards.
    let ok = running.call(&Envelope::loan("B1", "U1", "BK1")).await;
    assert!(ok.ok);
}

#[tokio::test]
async fn test_unavailable_storage_is_a_failure_result() {
    let primary = Arc::new(SwitchableStore::down(memory_store().await));
    let secondary = Arc::new(SwitchableStore::down(memory_store().await));
    let harness = Harness::new(primary, secondary);
    let mut running = start(&harness).await;

    let result = running.call(&Envelope::loan("B1", "U1", "BK1")).await;
    assert!(!result.ok);
    assert!(
        result
            .message
            .starts_with("storage unavailable after 5 attempts"),
        "{result}"
    );
}

#[tokio::test]
async fn test_process_without_transport() {
    let harness = Harness::new(stocked(1).await, memory_store().await);
    let service = StorageService::new(EnvelopeCodec::new(&keys()), harness.gateway.clone());

    let result = service.process(&Envelope::loan("B1", "U1", "BK1")).await;
    assert!(result.ok);

    let codec = EnvelopeCodec::new(&keys());
    let wire = codec
        .encode_envelope(&Envelope::renew("B1", "U9", "BK1"))
        .unwrap();
    let reply = service.handle_raw(&wire).await.unwrap();
    assert_eq!(
        codec.decode_result(&reply).unwrap(),
        CommandResult::failure("no loan")
    );
}

//! Integration test: one request from creation to eviction.
//!
//! The chain view is advanced tick by tick. The agent proposes, disputes a
//! wrong answer, pledges, settles once the escalation window closes, finalizes
//! with its own response and finally drops the actor once the epoch is over.

use std::sync::Arc;

use ebo_agent::notify::Notifier;
use ebo_agent::testing::*;
use ebo_agent::{EboProcessor, EboRegistry, ProtocolError};
use ebo_common::{DisputeStatus, RequestStatus};

const CORRECT_BLOCK: u64 = 1000;

fn setup() -> (Arc<MockProtocol>, EboProcessor) {
    let protocol = Arc::new(MockProtocol::new());
    let processor = EboProcessor::new(
        processor_config(Vec::new()),
        protocol.clone(),
        Arc::new(FixedBlockNumberService::new(CORRECT_BLOCK)),
        Arc::new(Notifier::noop()),
    );
    (protocol, processor)
}

#[tokio::test]
async fn wrong_answer_is_disputed_settled_and_replaced() {
    let (protocol, processor) = setup();

    // Tick 1: request created, a wrong answer shows up.
    protocol.push_events(vec![
        request_created(request_id(1), arbitrum(), 3, 120, 0),
        response_proposed(request_id(1), response_id(1), 999, 121, 0),
    ]);
    protocol.set_last_finalized_block(130);
    processor.sync().await.unwrap();

    // Tick 2: the wrong answer is disputed and our own proposal lands.
    protocol.push_events(vec![
        response_disputed(request_id(1), response_id(1), dispute_id(1), 135, 0),
        response_proposed(request_id(1), response_id(2), CORRECT_BLOCK, 136, 0),
    ]);
    protocol.set_last_finalized_block(140);
    processor.sync().await.unwrap();

    // Tick 3: escalation window (135 + 20) is over, proposal window is not.
    protocol.set_last_finalized_block(200);
    processor.sync().await.unwrap();

    // Tick 4: dispute won; all windows are over.
    protocol.push_events(vec![dispute_status_updated(
        request_id(1),
        dispute_id(1),
        DisputeStatus::Won.code(),
        201,
        0,
    )]);
    protocol.set_last_finalized_block(300);
    processor.sync().await.unwrap();

    let actor = processor.get_actor(&request_id(1)).await.unwrap();
    assert_eq!(
        actor.with_registry(|r| r.get_dispute(&dispute_id(1)).map(|d| d.status)),
        Some(DisputeStatus::Won)
    );

    // Tick 5: finalized on chain, next epoch begins.
    protocol.set_current_epoch(epoch_fixture(4, 305));
    protocol.push_events(vec![request_finalized(
        request_id(1),
        Some(response_id(2)),
        310,
        0,
    )]);
    protocol.set_last_finalized_block(320);
    let stats = processor.sync().await.unwrap();

    assert_eq!(actor.request().map(|r| r.status), Some(RequestStatus::Finalized));
    assert_eq!(stats.actors_terminated, 1);
    assert!(processor.get_actor(&request_id(1)).await.is_none());

    assert_eq!(
        protocol.calls_for(&request_id(1)),
        vec![
            ProtocolCall::ProposeResponse {
                request_id: request_id(1),
                block: CORRECT_BLOCK,
            },
            ProtocolCall::DisputeResponse {
                request_id: request_id(1),
                response_id: response_id(1),
                proposer: proposer(),
            },
            ProtocolCall::PledgeForDispute {
                request_id: request_id(1),
                dispute_id: dispute_id(1),
            },
            ProtocolCall::SettleDispute {
                request_id: request_id(1),
                dispute_id: dispute_id(1),
            },
            ProtocolCall::Finalize {
                request_id: request_id(1),
                response_id: response_id(2),
            },
        ]
    );
}

#[tokio::test]
async fn tied_dispute_is_escalated_instead_of_settled() {
    let (protocol, processor) = setup();

    protocol.push_events(vec![
        request_created(request_id(1), arbitrum(), 3, 120, 0),
        response_proposed(request_id(1), response_id(1), 999, 121, 0),
        response_disputed(request_id(1), response_id(1), dispute_id(1), 125, 0),
    ]);
    protocol.set_last_finalized_block(140);
    processor.sync().await.unwrap();

    protocol.fail_next(
        "settle_dispute",
        ProtocolError::revert("BondEscalationModule_ShouldBeEscalated", ""),
    );
    protocol.set_last_finalized_block(150);
    let stats = processor.sync().await.unwrap();
    assert_eq!(stats.request_failures, 0);

    // The escalation event has not arrived yet: nothing is sent again.
    protocol.set_last_finalized_block(160);
    processor.sync().await.unwrap();

    let actions: Vec<_> = protocol
        .calls_for(&request_id(1))
        .iter()
        .map(|call| call.action())
        .collect();
    assert_eq!(
        actions,
        vec![
            "propose_response",
            "dispute_response",
            "pledge_for_dispute",
            "settle_dispute",
            "escalate_dispute",
        ]
    );
}

#[tokio::test]
async fn correct_answer_by_someone_else_is_defended_and_finalized() {
    let (protocol, processor) = setup();

    protocol.push_events(vec![
        request_created(request_id(1), arbitrum(), 3, 120, 0),
        response_proposed(request_id(1), response_id(1), CORRECT_BLOCK, 121, 0),
        response_disputed(request_id(1), response_id(1), dispute_id(1), 125, 0),
    ]);
    protocol.set_last_finalized_block(140);
    processor.sync().await.unwrap();

    // Disputer loses: the response stands and can be finalized.
    protocol.push_events(vec![dispute_status_updated(
        request_id(1),
        dispute_id(1),
        DisputeStatus::Lost.code(),
        141,
        0,
    )]);
    protocol.set_last_finalized_block(230);
    processor.sync().await.unwrap();

    let actions: Vec<_> = protocol
        .calls_for(&request_id(1))
        .iter()
        .map(|call| call.action())
        .collect();
    assert_eq!(
        actions,
        vec!["propose_response", "pledge_against_dispute", "finalize"]
    );
}

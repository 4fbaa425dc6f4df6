//! Access control, browsing modes and one-shot actions.

mod fixtures;

use fixtures::{Harness, ADMIN};
use supply_relay::actions::ActionCode;
use supply_relay::domain::{load_request, load_response, ResponseStatus, Role};
use supply_relay::render::FALLBACK_HINT;
use supply_relay::Inbound;

const CONSUMER: i64 = 1;
const SUPPLIER: i64 = 2;
const OTHER_CONSUMER: i64 = 3;

async fn marketplace() -> Harness {
    let harness = Harness::new();
    harness.register(CONSUMER, Role::Consumer).await;
    harness.register(SUPPLIER, Role::Supplier).await;
    harness.register(OTHER_CONSUMER, Role::Consumer).await;
    harness
}

#[tokio::test]
async fn supplier_cannot_open_a_request() {
    let h = marketplace().await;

    h.action(SUPPLIER, ActionCode::CreateRequest).await;

    assert_eq!(
        h.transport.last_text(SUPPLIER).as_deref(),
        Some("This action is only available to a registered consumer.")
    );
    assert!(!h.has_session(SUPPLIER).await);
    assert!(!h.is_busy(SUPPLIER).await);
}

#[tokio::test]
async fn consumer_cannot_reply_to_requests() {
    let h = marketplace().await;
    h.create_request(CONSUMER, "need 10 pipes").await;

    h.action(OTHER_CONSUMER, ActionCode::SupplierReply(1)).await;

    assert_eq!(
        h.transport.last_text(OTHER_CONSUMER).as_deref(),
        Some("This action is only available to a registered supplier.")
    );
    assert!(!h.is_busy(OTHER_CONSUMER).await);
}

#[tokio::test]
async fn unregistered_subject_is_pointed_at_start() {
    let h = Harness::new();

    h.text(50, "hello").await;
    assert_eq!(h.transport.last_text(50).as_deref(), Some(FALLBACK_HINT));

    h.command(50, "/menu").await;
    assert_eq!(
        h.transport.last_text(50).as_deref(),
        Some("Please register first with /start.")
    );
}

#[tokio::test]
async fn unknown_action_gets_the_fallback_hint() {
    let h = marketplace().await;

    h.send(Inbound::new(
        CONSUMER,
        supply_relay::InboundPayload::Action {
            data: "bogus:thing".into(),
        },
    ))
    .await;

    assert_eq!(h.transport.last_text(CONSUMER).as_deref(), Some(FALLBACK_HINT));
}

#[tokio::test]
async fn stray_workflow_button_is_answered() {
    let h = marketplace().await;

    h.action(CONSUMER, ActionCode::Confirm).await;

    assert_eq!(
        h.transport.last_text(CONSUMER).as_deref(),
        Some("This action is no longer available.")
    );
}

#[tokio::test]
async fn consumer_browses_and_closes_their_requests() {
    let h = marketplace().await;
    h.create_request(CONSUMER, "need 10 pipes").await;
    h.create_request(CONSUMER, "need valves").await;
    h.transport.clear();

    h.action(CONSUMER, ActionCode::MyRequests).await;
    assert!(h.is_busy(CONSUMER).await);
    let listed = h.transport.for_subject(CONSUMER);
    assert!(listed[0].text.contains("need valves"));
    assert!(listed[1].text.contains("need 10 pipes"));
    assert_eq!(listed[1].actions, vec!["req:view:1", "req:close:1"]);

    h.action(CONSUMER, ActionCode::CloseRequest(1)).await;
    let request = load_request(h.store.as_ref(), 1).await.unwrap().unwrap();
    assert!(!request.is_open());

    h.action(CONSUMER, ActionCode::ExitProcess).await;
    assert!(!h.is_busy(CONSUMER).await);
}

#[tokio::test]
async fn only_the_owner_can_close_a_request() {
    let h = marketplace().await;
    h.create_request(CONSUMER, "need 10 pipes").await;

    h.action(OTHER_CONSUMER, ActionCode::CloseRequest(1)).await;

    assert_eq!(
        h.transport.last_text(OTHER_CONSUMER).as_deref(),
        Some("Request not found.")
    );
    let request = load_request(h.store.as_ref(), 1).await.unwrap().unwrap();
    assert!(request.is_open());
}

#[tokio::test]
async fn open_requests_with_nothing_to_show_does_not_hold_the_gate() {
    let h = marketplace().await;

    h.action(SUPPLIER, ActionCode::OpenRequests).await;

    assert_eq!(
        h.transport.last_text(SUPPLIER).as_deref(),
        Some("There are no open requests.")
    );
    assert!(!h.is_busy(SUPPLIER).await);
}

#[tokio::test]
async fn browsing_open_requests_holds_the_long_window() {
    let h = marketplace().await;
    h.create_request(CONSUMER, "need 10 pipes").await;

    h.action(SUPPLIER, ActionCode::OpenRequests).await;
    assert!(h.is_busy(SUPPLIER).await);
    let record = h.relay.gate.record(SUPPLIER).await.unwrap();
    assert_eq!(record.reason, "supplier_view_open");

    h.create_request(OTHER_CONSUMER, "need valves").await;
    assert_eq!(h.relay.gate.pending_len(SUPPLIER).await, 1);

    h.clock.advance_secs(301);
    assert!(h.is_busy(SUPPLIER).await);
    h.clock.advance_secs(299);
    let report = h.relay.watcher.sweep().await;
    assert_eq!(report.expired, vec![SUPPLIER]);
    assert!(h.transport.saw(SUPPLIER, "need valves"));
}

#[tokio::test]
async fn selecting_a_response_hands_over_contacts() {
    let h = marketplace().await;
    h.create_request(CONSUMER, "need 10 pipes").await;
    h.reply_to(SUPPLIER, 1, "1000").await;

    h.action(SUPPLIER, ActionCode::MyResponses).await;
    assert!(h.transport.saw(SUPPLIER, "Delivery time: 3 days"));

    h.action(CONSUMER, ActionCode::ViewResponses(1)).await;
    let listed = h.transport.for_subject(CONSUMER).pop().unwrap();
    assert_eq!(listed.actions, vec!["resp:contact:1", "resp:stop:1"]);

    h.action(CONSUMER, ActionCode::ContactSupplier(1)).await;
    assert!(h.transport.saw(CONSUMER, "Supplier contact:\n77011234567"));
    let response = load_response(h.store.as_ref(), 1).await.unwrap().unwrap();
    assert_eq!(response.status, ResponseStatus::Selected);
    assert!(!h.transport.saw(SUPPLIER, "Your response was selected!"));

    h.action(SUPPLIER, ActionCode::ExitProcess).await;
    assert!(h.transport.saw(SUPPLIER, "Your response was selected!"));
    assert!(h.transport.saw(SUPPLIER, "Consumer contact: 77011234567"));
}

#[tokio::test]
async fn stranger_cannot_select_a_response() {
    let h = marketplace().await;
    h.create_request(CONSUMER, "need 10 pipes").await;
    h.reply_to(SUPPLIER, 1, "1000").await;

    h.action(OTHER_CONSUMER, ActionCode::ContactSupplier(1)).await;

    assert_eq!(
        h.transport.last_text(OTHER_CONSUMER).as_deref(),
        Some("Response not found.")
    );
    let response = load_response(h.store.as_ref(), 1).await.unwrap().unwrap();
    assert_eq!(response.status, ResponseStatus::Pending);
}

#[tokio::test]
async fn admin_panel_is_refused_to_non_admins() {
    let h = marketplace().await;

    h.command(CONSUMER, "/admin").await;
    assert_eq!(h.transport.last_text(CONSUMER).as_deref(), Some("Access denied."));

    h.action(CONSUMER, ActionCode::AdminSetRole).await;
    assert_eq!(h.transport.last_text(CONSUMER).as_deref(), Some("Access denied."));
    assert!(!h.has_session(CONSUMER).await);
}

#[tokio::test]
async fn admin_assigns_a_role() {
    let h = marketplace().await;

    h.command(ADMIN, "/admin").await;
    assert!(h.transport.saw(ADMIN, "Admin panel:"));

    h.action(ADMIN, ActionCode::AdminSetRole).await;
    h.text(ADMIN, "two").await;
    assert!(h.transport.saw(ADMIN, "Please enter a numeric id."));
    h.text(ADMIN, "3").await;
    h.text(ADMIN, "supplier").await;
    assert!(h.transport.saw(ADMIN, "Change this role?"));
    h.action(ADMIN, ActionCode::Confirm).await;

    assert_eq!(h.user(OTHER_CONSUMER).await.unwrap().role, Role::Supplier);
    assert!(h.transport.saw(ADMIN, "Role of user 3 changed to supplier."));
    assert!(!h.is_busy(ADMIN).await);
}

#[tokio::test]
async fn overflowing_target_id_is_reprompted_in_place() {
    let h = marketplace().await;

    h.action(ADMIN, ActionCode::AdminSetRole).await;
    h.text(ADMIN, "99999999999999999999").await;

    assert!(h.transport.saw(ADMIN, "Please enter a numeric id."));
    assert!(h.has_session(ADMIN).await);
    assert!(h.is_busy(ADMIN).await);

    h.text(ADMIN, "3").await;
    h.text(ADMIN, "supplier").await;
    h.action(ADMIN, ActionCode::Confirm).await;

    assert_eq!(h.user(OTHER_CONSUMER).await.unwrap().role, Role::Supplier);
    assert!(!h.has_session(ADMIN).await);
}

#[tokio::test]
async fn role_change_for_unknown_user_is_reported() {
    let h = marketplace().await;

    h.action(ADMIN, ActionCode::AdminSetRole).await;
    h.text(ADMIN, "4242").await;
    h.text(ADMIN, "admin").await;
    h.action(ADMIN, ActionCode::Confirm).await;

    assert_eq!(h.transport.last_text(ADMIN).as_deref(), Some("User not found."));
    assert!(!h.has_session(ADMIN).await);
}

#[tokio::test]
async fn broadcast_queues_behind_busy_subjects() {
    let h = marketplace().await;
    h.action(SUPPLIER, ActionCode::MyResponses).await;

    h.action(ADMIN, ActionCode::AdminBroadcast).await;
    h.text(ADMIN, "maintenance tonight").await;
    h.action(ADMIN, ActionCode::Confirm).await;

    assert!(h.transport.saw(CONSUMER, "Broadcast:\n\nmaintenance tonight"));
    assert!(h.transport.saw(OTHER_CONSUMER, "maintenance tonight"));
    assert!(!h.transport.saw(SUPPLIER, "maintenance tonight"));
    assert!(h.transport.saw(ADMIN, "Broadcast finished. Delivered: 2, queued: 1."));

    h.action(SUPPLIER, ActionCode::ExitProcess).await;
    assert!(h.transport.saw(SUPPLIER, "maintenance tonight"));
}

#[tokio::test]
async fn admin_sees_statistics() {
    let h = marketplace().await;
    h.create_request(CONSUMER, "need 10 pipes").await;

    h.action(ADMIN, ActionCode::AdminStats).await;

    let stats = h.transport.last_text(ADMIN).unwrap();
    assert!(stats.contains("- Users: 4"));
    assert!(stats.contains("- Consumers: 3"));
    assert!(stats.contains("- Suppliers: 1"));
    assert!(stats.contains("- Requests: 1"));
    assert!(stats.contains("- Responses: 0"));
}

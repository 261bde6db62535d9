//! End-to-end flow over the pure pipeline stages: upstream payload parsing,
//! funnel filtering, wire-message shape and the consumer's ack/reject rules.

use serde_json::json;
use visits_service::models::{RawVisit, VisitMessage};
use visits_service::services::filter::filter_relevant;

#[test]
fn qualifying_visit_flows_from_fetch_to_wire_message() {
    // The shape Matomo returns for one visit
    let upstream = json!([{
        "id": "a1",
        "visitorId": "v1",
        "userId": "u1",
        "actionDetails": [
            {"url": "https://www.karnaval.ir/domestic-flights/123", "pageTitle": "Flights"},
            {"url": "https://www.karnaval.ir/hotels/tehran"}
        ],
        "country": "IR"
    }]);

    let visits: Vec<RawVisit> = serde_json::from_value(upstream).unwrap();
    assert_eq!(visits.len(), 1);
    let visit = &visits[0];

    // Filter keeps exactly the funnel action
    let qualifying = filter_relevant(&visit.action_details);
    assert_eq!(qualifying.len(), 1);
    assert_eq!(
        qualifying[0].url_str(),
        Some("https://www.karnaval.ir/domestic-flights/123")
    );

    // The published message carries only the qualifying actions
    let message = VisitMessage {
        visitor_id: visit.visitor_id.clone(),
        user_id: visit.user_id.clone(),
        action_details: qualifying,
    };
    let wire = serde_json::to_vec(&message).unwrap();

    let decoded: serde_json::Value = serde_json::from_slice(&wire).unwrap();
    assert_eq!(decoded["visitorId"], "v1");
    assert_eq!(decoded["userId"], "u1");
    assert_eq!(decoded["actionDetails"].as_array().unwrap().len(), 1);
    assert_eq!(decoded["actionDetails"][0]["pageTitle"], "Flights");

    // A consumer parsing the same bytes sees the qualifying action again
    let received: VisitMessage = serde_json::from_slice(&wire).unwrap();
    let still_qualifying = filter_relevant(&received.action_details);
    assert_eq!(still_qualifying.len(), 1);
}

#[test]
fn non_funnel_visit_produces_no_message() {
    let upstream = json!([{
        "id": "b2",
        "visitorId": "v2",
        "actionDetails": [{"url": "https://other.example.com/x"}]
    }]);

    let visits: Vec<RawVisit> = serde_json::from_value(upstream).unwrap();
    let qualifying = filter_relevant(&visits[0].action_details);

    assert!(qualifying.is_empty());
}

#[test]
fn raw_visit_round_trips_opaque_upstream_fields() {
    let upstream = json!({
        "id": "c3",
        "visitorId": "v3",
        "actionDetails": [],
        "serverDate": "2026-08-07",
        "visitDuration": 17,
        "plugins": {"flash": false}
    });

    let visit: RawVisit = serde_json::from_value(upstream.clone()).unwrap();
    let info = visit.visit_info();

    assert_eq!(info["serverDate"], "2026-08-07");
    assert_eq!(info["visitDuration"], 17);
    assert_eq!(info["plugins"]["flash"], false);
    assert!(info.get("actionDetails").is_none());
}

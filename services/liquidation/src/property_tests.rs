//! Property-based tests for review session ordering.

use aduana_models::{
    Classification, ImageRef, LineItem, LineItemPatch, QuantityFields, SupplementaryText,
    TariffCode,
};
use aduana_utils::AduanaError;
use proptest::prelude::*;

use crate::session::{ReclassifyStart, ReviewSession};

#[derive(Debug, Clone)]
enum Op {
    /// Issue a new ticket
    Begin,
    /// Deliver a classification for one of the tickets still in flight
    Complete(usize),
    /// Deliver a service failure for one of the tickets still in flight
    Fail(usize),
    /// User edits the display name
    Rename,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Begin),
        3 => any::<usize>().prop_map(Op::Complete),
        1 => any::<usize>().prop_map(Op::Fail),
        1 => Just(Op::Rename),
    ]
}

fn item() -> LineItem {
    LineItem {
        id: "a".into(),
        image: ImageRef::inline("iVBORw0KGgo"),
        display_name: "parlante".into(),
        tariff_code: TariffCode::sanitize("8518", 10),
        classification_confidence: None,
        classification_reason: String::new(),
        classification_stale: false,
        quantities: QuantityFields::default(),
        text: SupplementaryText::default(),
    }
}

fn code_for(ticket: u64) -> String {
    (85_000_000 + ticket).to_string()
}

fn classification(ticket: u64) -> Classification {
    Classification {
        tariff_code: code_for(ticket),
        normalized_name: format!("Producto {}", ticket),
        confidence: Some(0.9),
        reason: "visto en imagen".into(),
        ..Default::default()
    }
}

proptest! {
    /// Results land only when their ticket is newer than every result already
    /// handled and every ticket issued before the latest name edit. Whatever
    /// order results arrive in, the item shows the last accepted one.
    #[test]
    fn prop_last_issued_ticket_wins(ops in proptest::collection::vec(op(), 1..60)) {
        let mut session = ReviewSession::new("PI-2291", vec![item()], 10);
        let mut in_flight: Vec<u64> = Vec::new();
        let mut last_issued = 0u64;
        let mut floor = 0u64;
        let mut expected_code = "8518".to_string();
        let mut renames = 0usize;

        for op in &ops {
            match op {
                Op::Begin => match session.begin_reclassify("a") {
                    ReclassifyStart::Ready { ticket, .. } => {
                        prop_assert!(ticket > last_issued);
                        last_issued = ticket;
                        in_flight.push(ticket);
                    }
                    ReclassifyStart::Rejected(outcome) => {
                        prop_assert!(false, "unexpected rejection: {:?}", outcome);
                    }
                },
                Op::Complete(k) | Op::Fail(k) => {
                    if in_flight.is_empty() {
                        continue;
                    }
                    let ticket = in_flight.remove(k % in_flight.len());
                    let succeeds = matches!(op, Op::Complete(_));
                    let result = if succeeds {
                        Ok(classification(ticket))
                    } else {
                        Err(AduanaError::external_service("vlm", "timeout"))
                    };

                    let outcome = session.complete_reclassify("a", ticket, result);

                    if ticket > floor {
                        floor = ticket;
                        if succeeds {
                            prop_assert_eq!(outcome.label(), "applied");
                            expected_code = code_for(ticket);
                        } else {
                            prop_assert_eq!(outcome.label(), "failed");
                        }
                    } else {
                        prop_assert_eq!(outcome.label(), "stale");
                    }
                }
                Op::Rename => {
                    renames += 1;
                    let patch = LineItemPatch {
                        display_name: Some(format!("nombre {}", renames)),
                        ..Default::default()
                    };
                    session.apply_edit("a", &patch).unwrap();
                    floor = floor.max(last_issued);
                    prop_assert!(session.item("a").unwrap().classification_stale);
                }
            }

            prop_assert_eq!(session.item("a").unwrap().tariff_code.as_str(), expected_code.as_str());
        }
    }
}

use super::message::{DeliveryToken, Destination, Outcome};

#[test]
fn destination_display() {
    assert_eq!(Destination::topic("orders").to_string(), "orders");
    assert_eq!(
        Destination::exchange("billing", "invoice.created").to_string(),
        "billing/invoice.created"
    );
}

#[test]
fn token_display() {
    let token = DeliveryToken::Offset {
        topic: "orders".to_string(),
        partition: 2,
        offset: 41,
    };
    assert_eq!(token.to_string(), "orders[2]@41");
    assert_eq!(DeliveryToken::Tag(7).to_string(), "tag 7");
}

#[test]
fn outcome_from_accepted() {
    assert_eq!(Outcome::from_accepted(true), Outcome::Ack);
    assert_eq!(Outcome::from_accepted(false), Outcome::Reject);
}

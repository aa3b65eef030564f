mod common;

use carddrop_api::entities::purchase_record;
use carddrop_api::errors::ServiceError;
use carddrop_api::services::fulfillment::{FulfillmentOutcome, PaymentEvent};
use common::{single_event, TestApp};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

fn parse_event(body: &str) -> PaymentEvent {
    serde_json::from_str(body).expect("event body parses")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_orders_never_oversell_a_capped_card() {
    let app = TestApp::new().await;
    let card = app
        .seed_card(Uuid::new_v4(), "Capped Drop", Decimal::from(20), Some(10))
        .await;

    // 20 buyers race for 10 units.
    let mut tasks = Vec::new();
    for i in 0..20 {
        let fulfillment = app.state.fulfillment.clone();
        let body = single_event(&format!("evt_race_{i}"), Uuid::new_v4(), card.id, 1);
        tasks.push(tokio::spawn(async move {
            fulfillment.process_event(parse_event(&body)).await
        }));
    }

    let mut successes = 0;
    let mut out_of_stock = 0;
    for task in tasks {
        match task.await.expect("task completes") {
            Ok(FulfillmentOutcome::Processed(summary)) => {
                assert_eq!(summary.fulfilled(), 1);
                successes += 1;
            }
            Err(ServiceError::OutOfStock(_)) => out_of_stock += 1,
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    assert_eq!(successes, 10, "exactly the cap is sold");
    assert_eq!(out_of_stock, 10);

    let card_row = app.reload_card(card.id).await;
    assert_eq!(card_row.current_supply, 10, "supply never exceeds the cap");

    // Completed records are exactly serials 1..=10, no duplicates, no gaps.
    let mut serials: Vec<i32> = purchase_record::Entity::find()
        .filter(purchase_record::Column::CardId.eq(card.id))
        .all(&*app.state.db)
        .await
        .expect("query records")
        .into_iter()
        .map(|r| r.serial_number)
        .collect();
    serials.sort_unstable();
    assert_eq!(serials, (1..=10).collect::<Vec<i32>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_buyers_race_for_the_last_unit() {
    let app = TestApp::new().await;
    let card = app
        .seed_card(Uuid::new_v4(), "Last Unit", Decimal::from(50), Some(1))
        .await;
    let user_1 = Uuid::new_v4();
    let user_2 = Uuid::new_v4();

    let f1 = app.state.fulfillment.clone();
    let f2 = app.state.fulfillment.clone();
    let body_1 = single_event("evt_last_u1", user_1, card.id, 1);
    let body_2 = single_event("evt_last_u2", user_2, card.id, 1);

    let t1 = tokio::spawn(async move { f1.process_event(parse_event(&body_1)).await });
    let t2 = tokio::spawn(async move { f2.process_event(parse_event(&body_2)).await });

    let results = [t1.await.expect("join"), t2.await.expect("join")];

    let winners = results
        .iter()
        .filter(|r| matches!(r, Ok(FulfillmentOutcome::Processed(_))))
        .count();
    let losers = results
        .iter()
        .filter(|r| matches!(r, Err(ServiceError::OutOfStock(_))))
        .count();
    assert_eq!(winners, 1, "exactly one buyer gets the unit");
    assert_eq!(losers, 1, "the other is refused");

    assert_eq!(app.reload_card(card.id).await.current_supply, 1);

    let records = purchase_record::Entity::find()
        .filter(purchase_record::Column::CardId.eq(card.id))
        .all(&*app.state.db)
        .await
        .expect("query records");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].serial_number, 1);
    assert!(records[0].user_id == user_1 || records[0].user_id == user_2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_redelivery_of_one_event_allocates_once() {
    let app = TestApp::new().await;
    let card = app
        .seed_card(Uuid::new_v4(), "Redelivered", Decimal::from(7), Some(10))
        .await;
    let user = Uuid::new_v4();

    let body = single_event("evt_dup_race", user, card.id, 3);

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let fulfillment = app.state.fulfillment.clone();
        let body = body.clone();
        tasks.push(tokio::spawn(async move {
            fulfillment.process_event(parse_event(&body)).await
        }));
    }

    let mut fulfilled = 0;
    let mut skipped = 0;
    for task in tasks {
        match task.await.expect("task completes").expect("delivery ok") {
            FulfillmentOutcome::Processed(summary) => {
                fulfilled += summary.fulfilled();
                skipped += summary.skipped();
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    assert_eq!(fulfilled, 1, "only one delivery allocates");
    assert_eq!(skipped, 3, "the rest are suppressed by the guard");

    assert_eq!(app.reload_card(card.id).await.current_supply, 3);
    let count = purchase_record::Entity::find()
        .filter(purchase_record::Column::CardId.eq(card.id))
        .all(&*app.state.db)
        .await
        .expect("query records")
        .len();
    assert_eq!(count, 3, "three units from a single allocation");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unrelated_cards_allocate_independently() {
    let app = TestApp::new().await;
    let card_a = app
        .seed_card(Uuid::new_v4(), "Lane A", Decimal::from(5), Some(50))
        .await;
    let card_b = app
        .seed_card(Uuid::new_v4(), "Lane B", Decimal::from(5), Some(50))
        .await;

    let mut tasks = Vec::new();
    for i in 0..10 {
        let target = if i % 2 == 0 { card_a.id } else { card_b.id };
        let fulfillment = app.state.fulfillment.clone();
        let body = single_event(&format!("evt_lane_{i}"), Uuid::new_v4(), target, 1);
        tasks.push(tokio::spawn(async move {
            fulfillment.process_event(parse_event(&body)).await
        }));
    }

    for task in tasks {
        task.await
            .expect("task completes")
            .expect("every allocation fits under both caps");
    }

    assert_eq!(app.reload_card(card_a.id).await.current_supply, 5);
    assert_eq!(app.reload_card(card_b.id).await.current_supply, 5);
}

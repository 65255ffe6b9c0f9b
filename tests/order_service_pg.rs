//! Transactional matching tests against a real Postgres instance.
//!
//! These run under `#[sqlx::test]`, which provisions a fresh database per
//! test from `DATABASE_URL` and applies ./migrations. They are ignored by
//! default so the suite passes on machines without Postgres; run them with
//! `cargo test -- --ignored`.

use rust_decimal_macros::dec;
use sqlx::PgPool;
use uuid::Uuid;

use clob_backend::models::{OrderIntent, OrderSide, OrderStatus, OrderType, Outcome};
use clob_backend::services::orders::{OrderService, OrderServiceError, PlaceStatus};

fn shares(n: u64) -> String {
    format!("{}000000000000000000", n)
}

fn intent(
    maker: &str,
    market_id: Uuid,
    side: OrderSide,
    order_type: OrderType,
    price_ticks: Option<u32>,
    size_shares: u64,
) -> OrderIntent {
    OrderIntent {
        maker: maker.into(),
        market_id,
        outcome: Outcome::Yes,
        side,
        order_type,
        price_ticks,
        size: shares(size_shares).parse().unwrap(),
        signature: "0xsig".into(),
        salt: None,
        expiry: None,
        order_hash: None,
    }
}

#[sqlx::test]
#[ignore = "requires a postgres instance via DATABASE_URL"]
async fn crossing_insert_matches_at_maker_price(pool: PgPool) {
    let service = OrderService::new(pool);
    let market = Uuid::new_v4();

    let resting = service
        .create_order_and_match(intent(
            "0xmaker",
            market,
            OrderSide::Sell,
            OrderType::Limit,
            Some(4000),
            10,
        ))
        .await
        .unwrap();
    assert_eq!(resting.status, PlaceStatus::Open);

    let taker = service
        .create_order_and_match(intent(
            "0xtaker",
            market,
            OrderSide::Buy,
            OrderType::Limit,
            Some(4500),
            10,
        ))
        .await
        .unwrap();

    assert_eq!(taker.status, PlaceStatus::Matched);
    assert_eq!(taker.fills.len(), 1);
    assert_eq!(taker.fills[0].maker_order_id, resting.order.order_id);
    // Maker's resting price wins, not the taker's 45c limit.
    assert_eq!(taker.fills[0].fill_price_cents, dec!(40.00));
    assert_eq!(taker.fills[0].fill_size, dec!(10));

    let maker_row = service.get_order(resting.order.order_id).await.unwrap();
    assert_eq!(maker_row.status, OrderStatus::Filled);
    assert_eq!(maker_row.remaining, dec!(0));

    let fills = service
        .get_market_fills(market, Outcome::Yes, 10)
        .await
        .unwrap();
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].fill_price_cents, dec!(40.00));
    assert_eq!(fills[0].fill_size, dec!(10));
}

#[sqlx::test]
#[ignore = "requires a postgres instance via DATABASE_URL"]
async fn partial_fill_rests_the_remainder(pool: PgPool) {
    let service = OrderService::new(pool);
    let market = Uuid::new_v4();

    service
        .create_order_and_match(intent(
            "0xmaker",
            market,
            OrderSide::Sell,
            OrderType::Limit,
            Some(4000),
            4,
        ))
        .await
        .unwrap();

    let taker = service
        .create_order_and_match(intent(
            "0xtaker",
            market,
            OrderSide::Buy,
            OrderType::Limit,
            Some(4500),
            10,
        ))
        .await
        .unwrap();

    assert_eq!(taker.status, PlaceStatus::PartiallyFilled);
    assert_eq!(taker.order.filled, dec!(4));
    assert_eq!(taker.order.remaining, dec!(6));
    assert_eq!(taker.order.status, OrderStatus::PartiallyFilled);

    // The remainder rests as the best bid.
    let book = service
        .get_order_book(market, Outcome::Yes, 10)
        .await
        .unwrap();
    assert_eq!(book.bids.len(), 1);
    assert_eq!(book.bids[0].remaining, dec!(6));
    assert!(book.asks.is_empty());
}

#[sqlx::test]
#[ignore = "requires a postgres instance via DATABASE_URL"]
async fn non_crossing_insert_rests_open(pool: PgPool) {
    let service = OrderService::new(pool);
    let market = Uuid::new_v4();

    service
        .create_order_and_match(intent(
            "0xa",
            market,
            OrderSide::Sell,
            OrderType::Limit,
            Some(6000),
            10,
        ))
        .await
        .unwrap();

    let bid = service
        .create_order_and_match(intent(
            "0xb",
            market,
            OrderSide::Buy,
            OrderType::Limit,
            Some(5000),
            10,
        ))
        .await
        .unwrap();

    assert_eq!(bid.status, PlaceStatus::Open);
    assert!(bid.fills.is_empty());
}

#[sqlx::test]
#[ignore = "requires a postgres instance via DATABASE_URL"]
async fn market_order_sweeps_and_cancels_remainder(pool: PgPool) {
    let service = OrderService::new(pool);
    let market = Uuid::new_v4();

    service
        .create_order_and_match(intent(
            "0xa",
            market,
            OrderSide::Sell,
            OrderType::Limit,
            Some(4000),
            5,
        ))
        .await
        .unwrap();
    service
        .create_order_and_match(intent(
            "0xb",
            market,
            OrderSide::Sell,
            OrderType::Limit,
            Some(4200),
            3,
        ))
        .await
        .unwrap();

    let market_order = service
        .create_order_and_match(intent(
            "0xtaker",
            market,
            OrderSide::Buy,
            OrderType::Market,
            None,
            10,
        ))
        .await
        .unwrap();

    // 8 of 10 fill across two levels, cheapest first; the rest cancels.
    assert_eq!(market_order.status, PlaceStatus::PartiallyFilled);
    assert_eq!(market_order.fills.len(), 2);
    assert_eq!(market_order.fills[0].fill_price_cents, dec!(40.00));
    assert_eq!(market_order.fills[0].fill_size, dec!(5));
    assert_eq!(market_order.fills[1].fill_price_cents, dec!(42.00));
    assert_eq!(market_order.fills[1].fill_size, dec!(3));
    assert_eq!(market_order.order.status, OrderStatus::Cancelled);
    assert_eq!(market_order.order.filled, dec!(8));
    assert_eq!(market_order.order.remaining, dec!(0));
}

#[sqlx::test]
#[ignore = "requires a postgres instance via DATABASE_URL"]
async fn market_order_with_no_liquidity_is_rejected(pool: PgPool) {
    let service = OrderService::new(pool);
    let result = service
        .create_order_and_match(intent(
            "0xtaker",
            Uuid::new_v4(),
            OrderSide::Buy,
            OrderType::Market,
            None,
            10,
        ))
        .await;
    assert!(matches!(result, Err(OrderServiceError::NoLiquidity)));

    // The rejection rolled back; no order row survives.
    let orders = service.get_user_orders("0xtaker", None, 10).await.unwrap();
    assert!(orders.is_empty());
}

#[sqlx::test]
#[ignore = "requires a postgres instance via DATABASE_URL"]
async fn user_orders_filter_by_market(pool: PgPool) {
    let service = OrderService::new(pool);
    let market_a = Uuid::new_v4();
    let market_b = Uuid::new_v4();

    service
        .create_order_and_match(intent(
            "0xowner",
            market_a,
            OrderSide::Buy,
            OrderType::Limit,
            Some(4000),
            5,
        ))
        .await
        .unwrap();
    service
        .create_order_and_match(intent(
            "0xowner",
            market_b,
            OrderSide::Buy,
            OrderType::Limit,
            Some(4100),
            5,
        ))
        .await
        .unwrap();

    let all = service.get_user_orders("0xowner", None, 10).await.unwrap();
    assert_eq!(all.len(), 2);

    let only_a = service
        .get_user_orders("0xowner", Some(market_a), 10)
        .await
        .unwrap();
    assert_eq!(only_a.len(), 1);
    assert_eq!(only_a[0].market_id, market_a);

    let other_user = service.get_user_orders("0xother", None, 10).await.unwrap();
    assert!(other_user.is_empty());
}

#[sqlx::test]
#[ignore = "requires a postgres instance via DATABASE_URL"]
async fn time_priority_at_equal_price(pool: PgPool) {
    let service = OrderService::new(pool);
    let market = Uuid::new_v4();

    let first = service
        .create_order_and_match(intent(
            "0xfirst",
            market,
            OrderSide::Sell,
            OrderType::Limit,
            Some(4000),
            5,
        ))
        .await
        .unwrap();
    service
        .create_order_and_match(intent(
            "0xsecond",
            market,
            OrderSide::Sell,
            OrderType::Limit,
            Some(4000),
            5,
        ))
        .await
        .unwrap();

    let taker = service
        .create_order_and_match(intent(
            "0xtaker",
            market,
            OrderSide::Buy,
            OrderType::Limit,
            Some(4000),
            5,
        ))
        .await
        .unwrap();

    assert_eq!(taker.fills.len(), 1);
    assert_eq!(taker.fills[0].maker_order_id, first.order.order_id);
}

#[sqlx::test]
#[ignore = "requires a postgres instance via DATABASE_URL"]
async fn cancel_taxonomy(pool: PgPool) {
    let service = OrderService::new(pool);
    let market = Uuid::new_v4();

    let placed = service
        .create_order_and_match(intent(
            "0xowner",
            market,
            OrderSide::Buy,
            OrderType::Limit,
            Some(4000),
            10,
        ))
        .await
        .unwrap();
    let id = placed.order.order_id;

    assert!(matches!(
        service.cancel_order(Uuid::new_v4(), "0xowner").await,
        Err(OrderServiceError::NotFound)
    ));
    assert!(matches!(
        service.cancel_order(id, "0xsomeoneelse").await,
        Err(OrderServiceError::Unauthorized)
    ));

    let cancelled = service.cancel_order(id, "0xowner").await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);

    // Cancelling twice is a state conflict.
    assert!(matches!(
        service.cancel_order(id, "0xowner").await,
        Err(OrderServiceError::Conflict(_))
    ));
}

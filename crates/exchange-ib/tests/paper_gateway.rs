//! End-to-end tests: the full client stack against the in-process paper gateway.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use options_exec_ib::paper::PaperPortfolioRow;
use options_exec_ib::protocol::{Contract, GatewayRequest, MarketDataType};
use options_exec_ib::{
    ExecutionStore, IBClient, IBConfig, IbError, InMemoryExecutionStore, Instrument, OptionRight,
    OptionsContract, OrderSide, OrderStatus, OrderType, PaperGateway, PaperMarket, PositionSource,
    SecType, Strategy, StrategyLeg,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn expiry() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 12, 18).unwrap()
}

fn spy(strike: Decimal, right: OptionRight) -> OptionsContract {
    OptionsContract::new("SPY", expiry(), strike, right)
}

fn leg(contract: &OptionsContract, side: OrderSide, price: Decimal) -> StrategyLeg {
    StrategyLeg {
        instrument: Instrument::Option(contract.clone()),
        side,
        quantity: 1,
        price,
    }
}

/// SPY with a small listed chain and a funded account.
fn spy_market() -> PaperMarket {
    let strikes = [dec!(670), dec!(675), dec!(680), dec!(685), dec!(690)];
    let mut market = PaperMarket::new()
        .with_stock("SPY", 756_733)
        .with_chain("SPY", "SMART", &[expiry()], &strikes)
        .with_live_value("NetLiquidation", "50000")
        .with_summary_value("NetLiquidation", "50000");
    for (i, strike) in strikes.iter().enumerate() {
        market = market
            .with_option(&spy(*strike, OptionRight::Call), 800_000 + i as i64)
            .with_option(&spy(*strike, OptionRight::Put), 900_000 + i as i64);
    }
    market
}

/// A listed underlying outside the penny-pilot program.
fn xyz_market() -> PaperMarket {
    let strikes = [dec!(40), dec!(45), dec!(50)];
    let mut market = PaperMarket::new()
        .with_stock("XYZ", 123_456)
        .with_chain("XYZ", "SMART", &[expiry()], &strikes)
        .with_live_value("NetLiquidation", "50000");
    for (i, strike) in strikes.iter().enumerate() {
        let call = OptionsContract::new("XYZ", expiry(), *strike, OptionRight::Call);
        market = market.with_option(&call, 600_000 + i as i64);
    }
    market
}

async fn connected(market: PaperMarket) -> (IBClient, Arc<PaperGateway>) {
    let gateway = Arc::new(PaperGateway::new(market));
    let client = IBClient::new(IBConfig::paper(), gateway.clone());
    client.connect().await.unwrap();
    (client, gateway)
}

async fn placed_orders(gateway: &PaperGateway) -> Vec<(i64, Contract, options_exec_ib::protocol::OrderTicket)> {
    // Let the paper gateway task drain requests queued on the outbound channel.
    tokio::time::sleep(Duration::from_millis(10)).await;
    gateway
        .requests()
        .into_iter()
        .filter_map(|request| match request {
            GatewayRequest::PlaceOrder {
                order_id,
                contract,
                order,
            } => Some((order_id, contract, order)),
            _ => None,
        })
        .collect()
}

// ==================== Connection Tests ====================

#[tokio::test]
async fn test_orders_refused_before_handshake() {
    let gateway = Arc::new(PaperGateway::new(spy_market()));
    let client = IBClient::new(IBConfig::paper(), gateway);

    let err = client
        .place_order(
            &Instrument::Stock {
                symbol: "SPY".into(),
            },
            OrderSide::Buy,
            1,
            OrderType::Market,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, IbError::NotReady(_)));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_connection_loss_fails_new_work() {
    let (client, gateway) = connected(spy_market()).await;
    assert!(client.is_connected());

    gateway.drop_connection();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!client.is_connected());
    assert!(client.positions().await.is_err());
}

#[tokio::test]
async fn test_reconnect_reseeds_order_ids_and_live_state() {
    let (client, gateway) = connected(spy_market()).await;
    assert!(client.session().live().wait_usable(Duration::from_secs(1)).await);

    let stock = Instrument::Stock {
        symbol: "SPY".into(),
    };
    let first = client
        .place_order(&stock, OrderSide::Buy, 1, OrderType::Market, None)
        .unwrap();
    assert_eq!(first, 1);

    client.disconnect().await.unwrap();
    assert!(!client.session().live().is_ready());
    assert!(!client.session().order_ids().is_known());
    assert!(matches!(
        client.place_order(&stock, OrderSide::Buy, 1, OrderType::Market, None),
        Err(IbError::NotReady(_))
    ));

    gateway.update(|market| {
        market.next_order_id = 500;
        market.live_values = vec![("NetLiquidation".into(), "60000".into())];
    });
    client.reconnect().await.unwrap();
    assert!(client.is_connected());
    assert!(client.session().live().wait_usable(Duration::from_secs(1)).await);
    assert_eq!(client.session().live().account().summary.net_liquidation, dec!(60000));

    let second = client
        .place_order(&stock, OrderSide::Buy, 1, OrderType::Market, None)
        .unwrap();
    assert_eq!(second, 500);
}

// ==================== Account Tests ====================

#[tokio::test(start_paused = true)]
async fn test_live_account_beats_one_shot() {
    let mut market = spy_market();
    market.summary_values = vec![("NetLiquidation".into(), "0".into())];
    let (client, _gateway) = connected(market).await;

    let summary = client.account_summary().await.unwrap();
    assert_eq!(summary.net_liquidation, dec!(50000));
}

#[tokio::test(start_paused = true)]
async fn test_one_shot_used_without_live_data() {
    let mut market = spy_market();
    market.live_updates = false;
    market.summary_values = vec![
        ("NetLiquidation".into(), "75000".into()),
        ("BuyingPower".into(), "150000".into()),
    ];
    let (client, _gateway) = connected(market).await;

    let summary = client.account_summary().await.unwrap();
    assert_eq!(summary.net_liquidation, dec!(75000));
    assert_eq!(summary.buying_power, dec!(150000));
}

#[tokio::test(start_paused = true)]
async fn test_account_summary_times_out_without_any_source() {
    let mut market = spy_market();
    market.live_updates = false;
    market.silent_account_summary = true;
    let (client, _gateway) = connected(market).await;

    let err = client.account_summary().await.unwrap_err();
    assert!(matches!(err, IbError::RequestTimeout { .. }));
}

#[tokio::test]
async fn test_full_portfolio_prefers_live_rows() {
    let held = spy(dec!(680), OptionRight::Call);
    let market = spy_market()
        .with_portfolio_row(PaperPortfolioRow {
            contract: Contract::option(&held),
            position: dec!(2),
            market_price: dec!(2.50),
            avg_cost: dec!(210),
            unrealized_pnl: dec!(80),
        })
        .with_position(Contract::option(&held), dec!(2), dec!(200))
        .with_position(Contract::stock("AAPL"), dec!(100), dec!(231.40));
    let (client, _gateway) = connected(market).await;

    let portfolio = client.full_portfolio().await.unwrap();
    assert_eq!(portfolio.account.net_liquidation, dec!(50000));
    assert_eq!(portfolio.positions.len(), 2);

    let option = portfolio
        .positions
        .iter()
        .find(|p| p.key.sec_type == SecType::Option)
        .unwrap();
    assert_eq!(option.source, PositionSource::Live);
    assert_eq!(option.avg_cost, dec!(210));
    assert_eq!(option.market_value, Some(dec!(500)));

    let stock = portfolio
        .positions
        .iter()
        .find(|p| p.key.symbol == "AAPL")
        .unwrap();
    assert_eq!(stock.source, PositionSource::Snapshot);
    assert_eq!(stock.market_value, None);
}

// ==================== Market Data Tests ====================

#[tokio::test]
async fn test_two_sided_quote_restores_real_time() {
    let call = spy(dec!(680), OptionRight::Call);
    let (client, gateway) = connected(spy_market().with_quote(&call, dec!(2.40), dec!(2.60))).await;

    let quote = client.option_nbbo(&call).await.unwrap();
    assert_eq!(quote.bid, dec!(2.40));
    assert_eq!(quote.ask, dec!(2.60));
    assert_eq!(quote.mid, dec!(2.50));
    assert!(!quote.synthesized);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(gateway
        .requests()
        .contains(&GatewayRequest::MarketDataType(MarketDataType::DelayedFrozen)));
    assert_eq!(gateway.market_data_type(), Some(MarketDataType::RealTime));
}

#[tokio::test(start_paused = true)]
async fn test_last_only_quote_is_synthesized() {
    let call = spy(dec!(685), OptionRight::Call);
    let (client, _gateway) = connected(spy_market().with_last_only(&call, dec!(2.00))).await;

    let quote = client.option_nbbo(&call).await.unwrap();
    assert!(quote.synthesized);
    assert_eq!(quote.bid, dec!(1.90));
    assert_eq!(quote.ask, dec!(2.10));
    assert_eq!(quote.mid, dec!(2.00));
    assert_eq!(quote.last, Some(dec!(2.00)));
}

#[tokio::test(start_paused = true)]
async fn test_synthesized_quotes_stay_inside_market() {
    let last_only = spy(dec!(675), OptionRight::Call);
    let close_only = spy(dec!(690), OptionRight::Put);
    let market = spy_market()
        .with_last_only(&last_only, dec!(0.07))
        .with_close_only(&close_only, dec!(3.335));
    let (client, _gateway) = connected(market).await;

    for contract in [&last_only, &close_only] {
        let quote = client.option_nbbo(contract).await.unwrap();
        assert!(quote.synthesized);
        assert!(quote.bid <= quote.mid && quote.mid <= quote.ask, "{quote:?}");
    }
    let close = client.option_nbbo(&close_only).await.unwrap();
    assert_eq!(close.mid, dec!(3.34));
    assert_eq!(close.last, None);
}

#[tokio::test]
async fn test_entitlement_error_yields_no_quote() {
    let put = spy(dec!(670), OptionRight::Put);
    let (client, _gateway) = connected(spy_market().with_quote_error(&put, 354)).await;

    assert_eq!(client.option_nbbo(&put).await, None);
}

#[tokio::test]
async fn test_batch_quotes_keyed_by_contract() {
    let call = spy(dec!(680), OptionRight::Call);
    let put = spy(dec!(670), OptionRight::Put);
    let market = spy_market()
        .with_quote(&call, dec!(2.40), dec!(2.60))
        .with_quote_error(&put, 10090);
    let (client, _gateway) = connected(market).await;

    let quotes = client
        .option_nbbo_batch(&[call.clone(), put.clone(), call.clone()], Some(2))
        .await;
    assert_eq!(quotes.len(), 2);
    assert!(quotes[&call.key()].is_some());
    assert!(quotes[&put.key()].is_none());
}

// ==================== Chain Tests ====================

#[tokio::test(start_paused = true)]
async fn test_chain_params_cached_until_ttl() {
    let (client, gateway) = connected(spy_market()).await;
    let chain_requests = || {
        gateway
            .requests()
            .iter()
            .filter(|r| matches!(r, GatewayRequest::OptionParameters { .. }))
            .count()
    };

    let chain = client.option_chain_params("SPY").await.unwrap();
    assert_eq!(chain.strikes.len(), 5);
    client.option_chain_params("SPY").await.unwrap();
    assert_eq!(chain_requests(), 1);

    tokio::time::advance(Duration::from_secs(301)).await;
    client.option_chain_params("SPY").await.unwrap();
    assert_eq!(chain_requests(), 2);
}

#[tokio::test]
async fn test_unlisted_strike_resolves_to_nearest() {
    let (client, _gateway) = connected(spy_market()).await;

    let resolved = client
        .resolve_option_contract("SPY", dec!(682.40), NaiveDate::from_ymd_opt(2026, 12, 20).unwrap())
        .await
        .unwrap();
    assert_eq!(resolved.strike, dec!(680));
    assert_eq!(resolved.expiry, expiry());

    assert_eq!(client.option_chain_params("QQQ").await, None);
}

// ==================== Strategy Submission Tests ====================

#[tokio::test]
async fn test_debit_spread_goes_out_as_one_combo() {
    let long = spy(dec!(680), OptionRight::Call);
    let short = spy(dec!(690), OptionRight::Call);
    let market = spy_market()
        .with_quote(&long, dec!(1.95), dec!(2.05))
        .with_quote(&short, dec!(0.45), dec!(0.55));
    let (client, gateway) = connected(market).await;

    let strategy = Strategy {
        name: "bull call spread".into(),
        legs: vec![
            leg(&long, OrderSide::Buy, dec!(2.10)),
            leg(&short, OrderSide::Sell, dec!(0.40)),
        ],
    };
    let result = client.submit_strategy(&strategy, OrderType::Limit).await;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.order_ids.len(), 1);

    let orders = placed_orders(&gateway).await;
    assert_eq!(orders.len(), 1);
    let (_, contract, ticket) = &orders[0];
    assert_eq!(contract.sec_type, SecType::Bag);
    assert_eq!(contract.combo_legs.len(), 2);
    assert_eq!(contract.combo_legs[0].action, OrderSide::Buy);
    assert_eq!(contract.combo_legs[1].action, OrderSide::Sell);
    assert_eq!(ticket.action, OrderSide::Buy);
    assert_eq!(ticket.total_quantity, dec!(1));
    assert_eq!(ticket.limit_price, Some(dec!(1.50)));
}

#[tokio::test]
async fn test_combo_limit_keeps_cents_above_three_dollars() {
    let long = spy(dec!(680), OptionRight::Call);
    let short = spy(dec!(690), OptionRight::Call);
    let market = spy_market()
        .with_quote(&long, dec!(3.95), dec!(4.05))
        .with_quote(&short, dec!(0.70), dec!(0.76));
    let (client, gateway) = connected(market).await;

    let strategy = Strategy {
        name: "wide call spread".into(),
        legs: vec![
            leg(&long, OrderSide::Buy, dec!(4.00)),
            leg(&short, OrderSide::Sell, dec!(0.73)),
        ],
    };
    let result = client.submit_strategy(&strategy, OrderType::Limit).await;
    assert!(result.success, "{}", result.message);
    assert!(result.message.ends_with("@ 3.27"), "{}", result.message);

    let (_, contract, ticket) = &placed_orders(&gateway).await[0];
    assert_eq!(contract.sec_type, SecType::Bag);
    assert_eq!(ticket.action, OrderSide::Buy);
    assert_eq!(ticket.limit_price, Some(dec!(3.27)));
}

#[tokio::test]
async fn test_combo_limit_keeps_cents_outside_penny_pilot() {
    let long = OptionsContract::new("XYZ", expiry(), dec!(40), OptionRight::Call);
    let short = OptionsContract::new("XYZ", expiry(), dec!(50), OptionRight::Call);
    let market = xyz_market()
        .with_quote(&long, dec!(1.99), dec!(2.05))
        .with_quote(&short, dec!(0.48), dec!(0.52));
    let (client, gateway) = connected(market).await;

    let strategy = Strategy {
        name: "xyz call spread".into(),
        legs: vec![
            leg(&long, OrderSide::Buy, dec!(2.00)),
            leg(&short, OrderSide::Sell, dec!(0.50)),
        ],
    };
    let result = client.submit_strategy(&strategy, OrderType::Limit).await;
    assert!(result.success, "{}", result.message);

    let orders = placed_orders(&gateway).await;
    assert_eq!(orders.len(), 1);
    let (_, contract, ticket) = &orders[0];
    assert_eq!(contract.sec_type, SecType::Bag);
    assert_eq!(ticket.limit_price, Some(dec!(1.52)));
}

#[tokio::test]
async fn test_zero_net_combo_falls_back_to_legs() {
    let first = spy(dec!(680), OptionRight::Call);
    let second = spy(dec!(685), OptionRight::Call);
    let market = spy_market()
        .with_quote(&first, dec!(1.95), dec!(2.05))
        .with_quote(&second, dec!(1.95), dec!(2.05));
    let (client, gateway) = connected(market).await;

    let strategy = Strategy {
        name: "flat package".into(),
        legs: vec![
            leg(&first, OrderSide::Buy, dec!(2.00)),
            leg(&second, OrderSide::Sell, dec!(2.00)),
        ],
    };
    let result = client.submit_strategy(&strategy, OrderType::Limit).await;
    assert!(result.success, "{}", result.message);
    assert!(result.message.contains("Combo unavailable"), "{}", result.message);
    assert!(result.message.contains("2/2 legs submitted"), "{}", result.message);

    let orders = placed_orders(&gateway).await;
    assert_eq!(orders.len(), 2);
    assert!(orders.iter().all(|(_, c, t)| {
        c.sec_type == SecType::Option && t.limit_price.is_some_and(|p| p > Decimal::ZERO)
    }));
}

#[tokio::test]
async fn test_credit_spread_sold_with_inverted_legs() {
    let short = spy(dec!(680), OptionRight::Put);
    let long = spy(dec!(670), OptionRight::Put);
    let market = spy_market()
        .with_quote(&short, dec!(3.10), dec!(3.30))
        .with_quote(&long, dec!(1.15), dec!(1.25));
    let (client, gateway) = connected(market).await;

    let strategy = Strategy {
        name: "bull put spread".into(),
        legs: vec![
            leg(&short, OrderSide::Sell, dec!(3.20)),
            leg(&long, OrderSide::Buy, dec!(1.20)),
        ],
    };
    let result = client.submit_strategy(&strategy, OrderType::Limit).await;
    assert!(result.success, "{}", result.message);

    let (_, contract, ticket) = &placed_orders(&gateway).await[0];
    assert_eq!(ticket.action, OrderSide::Sell);
    assert_eq!(ticket.limit_price, Some(dec!(2.00)));
    assert_eq!(contract.combo_legs[0].action, OrderSide::Buy);
    assert_eq!(contract.combo_legs[1].action, OrderSide::Sell);
}

#[tokio::test]
async fn test_rejected_combo_falls_back_to_legs() {
    let long = spy(dec!(680), OptionRight::Call);
    let short = spy(dec!(690), OptionRight::Call);
    let mut market = spy_market()
        .with_quote(&long, dec!(1.95), dec!(2.05))
        .with_quote(&short, dec!(0.45), dec!(0.55));
    market.reject_combos = true;
    let (client, gateway) = connected(market).await;

    let strategy = Strategy {
        name: "bull call spread".into(),
        legs: vec![
            leg(&long, OrderSide::Buy, dec!(2.00)),
            leg(&short, OrderSide::Sell, dec!(0.50)),
        ],
    };
    let result = client.submit_strategy(&strategy, OrderType::Limit).await;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.order_ids.len(), 2);
    assert!(result.message.contains("2/2 legs submitted"), "{}", result.message);
    assert!(result.message.contains("201"), "{}", result.message);

    let orders = placed_orders(&gateway).await;
    assert_eq!(orders.len(), 3);
    let combo_id = orders[0].0;
    assert!(matches!(
        client.orders().iter().find(|o| o.id == combo_id).map(|o| o.status.clone()),
        Some(OrderStatus::Rejected { .. })
    ));
    assert!(orders[1..].iter().all(|(_, c, _)| c.sec_type == SecType::Option));
}

#[tokio::test]
async fn test_unresolvable_leg_reports_partial_submission() {
    let listed = spy(dec!(680), OptionRight::Call);
    let unknown = OptionsContract::new("ZZZZ", expiry(), dec!(10), OptionRight::Call);
    let (client, gateway) = connected(spy_market().with_quote(&listed, dec!(1.95), dec!(2.05))).await;

    let strategy = Strategy {
        name: "broken spread".into(),
        legs: vec![
            leg(&listed, OrderSide::Buy, dec!(2.00)),
            leg(&unknown, OrderSide::Sell, dec!(0.50)),
        ],
    };
    let result = client.submit_strategy(&strategy, OrderType::Limit).await;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.order_ids.len(), 1);
    assert!(result.message.contains("Combo unavailable"), "{}", result.message);
    assert!(result.message.contains("1/2 legs submitted"), "{}", result.message);
    assert!(result.message.contains("ZZZZ"), "{}", result.message);

    let orders = placed_orders(&gateway).await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].1.symbol, "SPY");
    assert_eq!(orders[0].1.sec_type, SecType::Option);
}

#[tokio::test]
async fn test_stale_buy_limit_replaced_by_mid() {
    let call = spy(dec!(680), OptionRight::Call);
    let (client, gateway) = connected(spy_market().with_quote(&call, dec!(1.00), dec!(2.00))).await;

    let strategy = Strategy {
        name: "long call".into(),
        legs: vec![leg(&call, OrderSide::Buy, dec!(9.00))],
    };
    let result = client.submit_strategy(&strategy, OrderType::Limit).await;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.message, "1/1 legs submitted");

    let (_, _, ticket) = &placed_orders(&gateway).await[0];
    assert_eq!(ticket.limit_price, Some(dec!(1.50)));
}

#[tokio::test]
async fn test_unlisted_strike_snapped_before_placement() {
    let call = spy(dec!(681.30), OptionRight::Call);
    let (client, gateway) = connected(spy_market()).await;

    let strategy = Strategy {
        name: "long call".into(),
        legs: vec![leg(&call, OrderSide::Buy, dec!(2.123))],
    };
    let result = client.submit_strategy(&strategy, OrderType::Limit).await;
    assert!(result.success, "{}", result.message);

    let (_, contract, ticket) = &placed_orders(&gateway).await[0];
    assert_eq!(contract.strike, Some(dec!(680)));
    assert_eq!(ticket.limit_price, Some(dec!(2.12)));
}

#[tokio::test]
async fn test_empty_strategy_fails() {
    let (client, gateway) = connected(spy_market()).await;
    let result = client
        .submit_strategy(
            &Strategy {
                name: "nothing".into(),
                legs: vec![],
            },
            OrderType::Market,
        )
        .await;
    assert!(!result.success);
    assert!(result.order_ids.is_empty());
    assert!(placed_orders(&gateway).await.is_empty());
}

// ==================== Order Report Tests ====================

#[tokio::test]
async fn test_executions_persisted_once() {
    let store = Arc::new(InMemoryExecutionStore::new());
    let gateway = Arc::new(PaperGateway::new(spy_market()));
    let client = IBClient::new(IBConfig::paper(), gateway).with_execution_store(store.clone());
    client.connect().await.unwrap();

    let call = spy(dec!(680), OptionRight::Call);
    client
        .place_order(
            &Instrument::Option(call),
            OrderSide::Buy,
            3,
            OrderType::Limit,
            Some(dec!(2.45)),
        )
        .unwrap();

    let first = client.executions().await.unwrap();
    let second = client.executions().await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(first[0].price, dec!(2.45));
    assert_eq!(first[0].commission, Some(dec!(1.95)));
    assert_eq!(store.len(), 1);
    assert_eq!(store.list().await.unwrap()[0].exec_id, first[0].exec_id);
}

#[tokio::test]
async fn test_cancel_resting_order() {
    let mut market = spy_market();
    market.rest_orders = true;
    let (client, _gateway) = connected(market).await;

    let order_id = client
        .place_order(
            &Instrument::Stock {
                symbol: "SPY".into(),
            },
            OrderSide::Buy,
            10,
            OrderType::Limit,
            Some(dec!(600)),
        )
        .unwrap();

    let open = client.open_orders().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].order_id, order_id);

    client.cancel_order(order_id).unwrap();
    let completed = client.completed_orders().await.unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].status, OrderStatus::Cancelled);
    assert_eq!(
        client.orders().iter().find(|o| o.id == order_id).map(|o| o.status.clone()),
        Some(OrderStatus::Cancelled)
    );
    assert!(client.open_orders().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_limit_order_requires_price() {
    let (client, _gateway) = connected(spy_market()).await;
    let err = client
        .place_order(
            &Instrument::Stock {
                symbol: "SPY".into(),
            },
            OrderSide::Sell,
            1,
            OrderType::Limit,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, IbError::InvalidOrder(_)));
}

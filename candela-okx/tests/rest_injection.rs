use candela_core::connector::OhlcvProvider;
use candela_core::error::CandelaError;
use candela_core::types::{Symbol, Timeframe};
use candela_okx::{OkxConfig, OkxConnector};
use httpmock::prelude::*;

const H: i64 = 3_600_000;
const BASE: i64 = 1_699_999_200_000; // a 1h boundary

fn connector(server: &MockServer) -> OkxConnector {
    OkxConnector::new(OkxConfig {
        rest_url: Some(server.base_url()),
        rate_limit_ms: 0,
        ..OkxConfig::default()
    })
    .expect("connector")
}

fn row(ts: i64, close: &str, confirm: &str) -> serde_json::Value {
    serde_json::json!([
        ts.to_string(),
        "42000",
        "42100",
        "41900",
        close,
        "12.5",
        "525000",
        "525000",
        confirm
    ])
}

#[tokio::test]
async fn pages_are_normalized_to_ascending_confirmed_rows() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/api/v5/market/candles")
            .query_param("instId", "BTC-USDT-SWAP")
            .query_param("bar", "1H")
            .query_param("before", &(BASE - 1).to_string())
            .query_param("limit", "1000");
        then.status(200).json_body(serde_json::json!({
            "code": "0",
            "msg": "",
            // venue pages newest-first; the newest bucket is still open
            "data": [
                row(BASE + 2 * H, "42060", "0"),
                row(BASE + H, "42050", "1"),
                row(BASE, "42040", "1"),
            ]
        }));
    });

    let okx = connector(&server);
    let candles = okx
        .fetch_ohlcv(&Symbol::from("BTC-USDT-SWAP"), Timeframe::H1, BASE, 1000)
        .await
        .unwrap();

    mock.assert();
    let ts: Vec<i64> = candles.iter().map(|c| c.timestamp_ms).collect();
    assert_eq!(ts, vec![BASE, BASE + H]);
    assert_eq!(candles[1].close.to_string(), "42050");
}

#[tokio::test]
async fn rows_older_than_since_are_dropped() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/v5/market/candles");
        then.status(200).json_body(serde_json::json!({
            "code": "0",
            "msg": "",
            "data": [row(BASE, "42040", "1"), row(BASE - H, "42030", "1")]
        }));
    });

    let okx = connector(&server);
    let candles = okx
        .fetch_ohlcv(&Symbol::from("BTC-USDT-SWAP"), Timeframe::H1, BASE, 1000)
        .await
        .unwrap();
    assert_eq!(candles.len(), 1);
    assert_eq!(candles[0].timestamp_ms, BASE);
}

#[tokio::test]
async fn venue_error_codes_surface_as_venue_errors() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/v5/market/candles");
        then.status(200).json_body(serde_json::json!({
            "code": "51001",
            "msg": "Instrument ID does not exist",
            "data": []
        }));
    });

    let okx = connector(&server);
    let err = okx
        .fetch_ohlcv(&Symbol::from("NOPE-USDT"), Timeframe::M5, BASE, 100)
        .await
        .unwrap_err();
    assert!(matches!(err, CandelaError::Venue { venue: "okx", .. }));
    assert!(err.to_string().contains("51001"));
}

#[tokio::test]
async fn http_429_maps_to_rate_limited() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/v5/market/candles");
        then.status(429).body("slow down");
    });

    let okx = connector(&server);
    let err = okx
        .fetch_ohlcv(&Symbol::from("BTC-USDT-SWAP"), Timeframe::H1, BASE, 100)
        .await
        .unwrap_err();
    assert!(matches!(err, CandelaError::RateLimited { venue: "okx" }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn empty_pages_are_fine() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/v5/market/candles");
        then.status(200)
            .json_body(serde_json::json!({"code": "0", "msg": "", "data": []}));
    });

    let okx = connector(&server);
    let candles = okx
        .fetch_ohlcv(&Symbol::from("BTC-USDT-SWAP"), Timeframe::D1, BASE, 50)
        .await
        .unwrap();
    assert!(candles.is_empty());
}

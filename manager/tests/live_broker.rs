//! End-to-end smoke tests against real infrastructure.
//!
//! Requires a broker on localhost:1883 and a running manager with default
//! configuration. Run with: cargo test -p smartbin-manager -- --ignored

use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::time::timeout;

async fn round_trip(bin_id: &str, kind: &str, payload: &str) -> serde_json::Value {
    let mut mqtt_options = MqttOptions::new(format!("live-test-{bin_id}"), "localhost", 1883);
    mqtt_options.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 10);
    client
        .subscribe("municipal/bins/alarm", QoS::AtMostOnce)
        .await
        .unwrap();

    timeout(Duration::from_secs(10), async {
        loop {
            match eventloop.poll().await.unwrap() {
                Event::Incoming(Packet::SubAck(_)) => {
                    client
                        .publish(
                            format!("municipal/bins/{bin_id}/{kind}"),
                            QoS::AtMostOnce,
                            false,
                            payload,
                        )
                        .await
                        .unwrap();
                }
                Event::Incoming(Packet::Publish(publish)) => {
                    let notice: serde_json::Value =
                        serde_json::from_slice(&publish.payload).unwrap();
                    if notice["bin_id"] == *bin_id {
                        return notice;
                    }
                }
                _ => {}
            }
        }
    })
    .await
    .expect("no alarm notice within 10 seconds")
}

#[tokio::test]
#[ignore]
async fn test_high_fill_round_trip() {
    let bin_id = format!("bin_{}", 1000 + rand::random::<u16>() % 9000);

    let notice = round_trip(&bin_id, "fill_level", "91.5").await;

    assert_eq!(notice["type"], "HIGH_FILL");
    assert_eq!(notice["message"], format!("Bin {bin_id} is 91.5% full"));
    assert!(notice["timestamp"].is_string());
}

#[tokio::test]
#[ignore]
async fn test_actuator_error_round_trip() {
    let bin_id = format!("bin_{}", 1000 + rand::random::<u16>() % 9000);

    let notice = round_trip(&bin_id, "actuator_state", "ERROR").await;

    assert_eq!(notice["type"], "ACTUATOR_ERROR");
    assert_eq!(
        notice["message"],
        format!("Bin {bin_id} actuator reported an error")
    );
}

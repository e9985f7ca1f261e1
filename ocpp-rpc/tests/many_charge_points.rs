//! One central system, many charge points

mod common;

use std::collections::HashMap;

use common::*;
use ocpp_rpc::ocpp::*;
use ocpp_rpc::{ChargePoint, ChargePointEvent};
use rand::seq::SliceRandom;
use tokio_util::sync::CancellationToken;

const CHARGE_POINTS: usize = 100;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hundred_charge_points_connect_and_leave_in_random_order() {
    let server = TestCentralSystem::start(central_system_handler()).await;
    let mut events = server.cs.events();
    let mut rng = rand::thread_rng();

    let mut identities: Vec<String> = (0..CHARGE_POINTS).map(|i| format!("CP{:03}", i)).collect();
    identities.shuffle(&mut rng);

    let mut charge_points = HashMap::new();
    for identity in &identities {
        let cp = ChargePoint::connect(
            server.charge_point_config(identity),
            charge_point_handler(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(
            next_event(&mut events).await,
            ChargePointEvent::Connected(identity.clone())
        );
        charge_points.insert(identity.clone(), cp);
    }
    assert_eq!(server.cs.connected_charge_points().len(), CHARGE_POINTS);

    // Each session carries its own identity in both directions
    for identity in identities.iter().take(10) {
        let reply = charge_points[identity]
            .service()
            .unwrap()
            .data_transfer(DataTransferRequest {
                vendor_id: "ek".into(),
                message_id: None,
                data: Some("hello".into()),
            })
            .await
            .unwrap();
        assert_eq!(reply.data, Some(format!("{}:hello", identity)));

        let reply = server
            .cs
            .charge_point(identity)
            .unwrap()
            .data_transfer(DataTransferRequest {
                vendor_id: "ek".into(),
                message_id: None,
                data: None,
            })
            .await
            .unwrap();
        assert_eq!(reply.data, Some(format!("{}:ek", identity)));
    }

    identities.shuffle(&mut rng);
    for identity in &identities {
        let cp = charge_points.remove(identity).unwrap();
        cp.shutdown().await;
        assert_eq!(
            next_event(&mut events).await,
            ChargePointEvent::Disconnected(identity.clone())
        );
    }

    assert!(server.cs.connected_charge_points().is_empty());
    assert!(events.try_recv().is_err());
    server.stop().await;
}

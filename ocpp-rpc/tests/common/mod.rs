//! Shared fixtures for the loopback integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ocpp_rpc::ocpp::*;
use ocpp_rpc::{
    handler_fn, CentralSystem, CentralSystemConfig, ChargePointConfig, ChargePointEvent, Handler,
    HandlerError, RequestMetadata,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn fixed_time() -> DateTime<Utc> {
    "2026-01-20T12:00:00Z".parse().unwrap()
}

/// A central system on a loopback port, running on its own task
pub struct TestCentralSystem {
    pub cs: Arc<CentralSystem>,
    pub url: String,
    pub task: JoinHandle<Result<(), OcppError>>,
}

impl TestCentralSystem {
    pub async fn start<H>(handler: H) -> Self
    where
        H: Handler<ChargePointRequest>,
    {
        Self::start_with(CentralSystemConfig::new("127.0.0.1:0".parse().unwrap()), handler).await
    }

    pub async fn start_with<H>(config: CentralSystemConfig, handler: H) -> Self
    where
        H: Handler<ChargePointRequest>,
    {
        let cs = Arc::new(CentralSystem::bind(config).await.unwrap());
        let url = format!("ws://{}/ocpp", cs.local_addr());
        let task = tokio::spawn({
            let cs = cs.clone();
            async move { cs.run(handler).await }
        });
        Self { cs, url, task }
    }

    /// Shut down and wait until the listening socket is released
    pub async fn stop(self) {
        self.cs.shutdown();
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("central system did not stop")
            .unwrap()
            .unwrap();
    }

    pub fn charge_point_config(&self, identity: &str) -> ChargePointConfig {
        ChargePointConfig::new(identity, self.url.clone())
            .with_reconnect_interval(Duration::from_millis(100))
    }
}

/// Central system handler answering every charge point request
pub fn central_system_handler() -> impl Handler<ChargePointRequest> {
    handler_fn(|req: ChargePointRequest, meta: RequestMetadata| async move {
        match req {
            ChargePointRequest::Heartbeat(_) => Ok(ChargePointResponse::Heartbeat(
                HeartbeatResponse {
                    current_time: fixed_time(),
                },
            )),
            ChargePointRequest::BootNotification(_) => Ok(ChargePointResponse::BootNotification(
                BootNotificationResponse {
                    current_time: fixed_time(),
                    interval: 300,
                    status: RegistrationStatus::Accepted,
                },
            )),
            ChargePointRequest::Authorize(req) if req.id_tag == "DENIED" => Err(
                HandlerError::with_code(ErrorCode::SecurityError, "id tag denied")
                    .with_detail("idTag", req.id_tag),
            ),
            ChargePointRequest::Authorize(_) => Ok(ChargePointResponse::Authorize(
                AuthorizeResponse {
                    id_tag_info: IdTagInfo {
                        status: AuthorizationStatus::Accepted,
                        expiry_date: None,
                        parent_id_tag: None,
                    },
                },
            )),
            ChargePointRequest::DataTransfer(req) => {
                let delay = req
                    .message_id
                    .as_deref()
                    .and_then(|ms| ms.parse::<u64>().ok())
                    .unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                if req.vendor_id == "hang" {
                    std::future::pending::<()>().await;
                }
                Ok(ChargePointResponse::DataTransfer(DataTransferResponse {
                    status: DataTransferStatus::Accepted,
                    data: Some(format!(
                        "{}:{}",
                        meta.charge_point_id,
                        req.data.unwrap_or_default()
                    )),
                }))
            }
            ChargePointRequest::StatusNotification(_) => Ok(
                ChargePointResponse::StatusNotification(StatusNotificationResponse {}),
            ),
        }
    })
}

/// Charge point handler answering Reset and DataTransfer
pub fn charge_point_handler() -> impl Handler<CentralSystemRequest> {
    handler_fn(|req: CentralSystemRequest, meta: RequestMetadata| async move {
        match req {
            CentralSystemRequest::Reset(_) => Ok(CentralSystemResponse::Reset(ResetResponse {
                status: ResetStatus::Accepted,
            })),
            CentralSystemRequest::DataTransfer(req) => Ok(CentralSystemResponse::DataTransfer(
                DataTransferResponse {
                    status: DataTransferStatus::Accepted,
                    data: Some(format!("{}:{}", meta.charge_point_id, req.vendor_id)),
                },
            )),
            _ => Err(HandlerError::new("not supported")),
        }
    })
}

/// Wait for the next event, failing the test after [`WAIT`]
pub async fn next_event(events: &mut broadcast::Receiver<ChargePointEvent>) -> ChargePointEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("no charge point event")
        .unwrap()
}

/// Wait until `identity` is connected to the central system
pub async fn wait_registered(cs: &CentralSystem, identity: &str) {
    tokio::time::timeout(WAIT, async {
        while cs.charge_point(identity).is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("charge point never registered");
}

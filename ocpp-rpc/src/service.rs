//! Typed RPC handles
//!
//! [`CentralSystemService`] is a charge point's handle on its central system;
//! [`ChargePointService`] is a central system's handle on one charge point. Either runs
//! over a WebSocket [`Connection`] or a [`SoapClient`]; callers cannot tell which.

use std::sync::Arc;

use crate::config::CallOptions;
use crate::ocpp::*;
use crate::soap::SoapClient;
use crate::ws::Connection;

#[derive(Debug, Clone)]
enum Route {
    Json(Arc<Connection>),
    Soap {
        client: SoapClient,
        options: CallOptions,
    },
}

impl Route {
    async fn send<R: RequestFamily>(&self, request: R) -> Result<R::Response, OcppError> {
        match self {
            Route::Json(connection) => connection.send_request(request).await,
            Route::Soap { client, options } => client.call(request, options).await,
        }
    }
}

fn unexpected(action: Action) -> OcppError {
    OcppError::UnexpectedResponse {
        action: action.to_string(),
    }
}

/// Calls from a charge point to its central system
#[derive(Debug, Clone)]
pub struct CentralSystemService {
    route: Route,
}

impl CentralSystemService {
    pub fn from_connection(connection: Arc<Connection>) -> Self {
        Self {
            route: Route::Json(connection),
        }
    }

    pub fn soap(client: SoapClient, options: CallOptions) -> Self {
        Self {
            route: Route::Soap { client, options },
        }
    }

    pub async fn send(
        &self,
        request: impl Into<ChargePointRequest>,
    ) -> Result<ChargePointResponse, OcppError> {
        self.route.send(request.into()).await
    }

    pub async fn authorize(&self, id_tag: impl Into<String>) -> Result<AuthorizeResponse, OcppError> {
        let request = AuthorizeRequest {
            id_tag: id_tag.into(),
        };
        match self.send(request).await? {
            ChargePointResponse::Authorize(r) => Ok(r),
            _ => Err(unexpected(Action::Authorize)),
        }
    }

    pub async fn boot_notification(
        &self,
        request: BootNotificationRequest,
    ) -> Result<BootNotificationResponse, OcppError> {
        match self.send(request).await? {
            ChargePointResponse::BootNotification(r) => Ok(r),
            _ => Err(unexpected(Action::BootNotification)),
        }
    }

    pub async fn data_transfer(
        &self,
        request: DataTransferRequest,
    ) -> Result<DataTransferResponse, OcppError> {
        match self.send(request).await? {
            ChargePointResponse::DataTransfer(r) => Ok(r),
            _ => Err(unexpected(Action::DataTransfer)),
        }
    }

    pub async fn heartbeat(&self) -> Result<HeartbeatResponse, OcppError> {
        match self.send(HeartbeatRequest {}).await? {
            ChargePointResponse::Heartbeat(r) => Ok(r),
            _ => Err(unexpected(Action::Heartbeat)),
        }
    }

    pub async fn status_notification(
        &self,
        request: StatusNotificationRequest,
    ) -> Result<StatusNotificationResponse, OcppError> {
        match self.send(request).await? {
            ChargePointResponse::StatusNotification(r) => Ok(r),
            _ => Err(unexpected(Action::StatusNotification)),
        }
    }
}

/// Calls from the central system to one charge point
#[derive(Debug, Clone)]
pub struct ChargePointService {
    identity: String,
    route: Route,
}

impl ChargePointService {
    pub fn from_connection(connection: Arc<Connection>) -> Self {
        Self {
            identity: connection.identity().to_string(),
            route: Route::Json(connection),
        }
    }

    pub fn soap(identity: impl Into<String>, client: SoapClient, options: CallOptions) -> Self {
        Self {
            identity: identity.into(),
            route: Route::Soap { client, options },
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub async fn send(
        &self,
        request: impl Into<CentralSystemRequest>,
    ) -> Result<CentralSystemResponse, OcppError> {
        self.route.send(request.into()).await
    }

    pub async fn change_availability(
        &self,
        connector_id: i32,
        availability_type: AvailabilityType,
    ) -> Result<ChangeAvailabilityResponse, OcppError> {
        let request = ChangeAvailabilityRequest {
            connector_id,
            availability_type,
        };
        match self.send(request).await? {
            CentralSystemResponse::ChangeAvailability(r) => Ok(r),
            _ => Err(unexpected(Action::ChangeAvailability)),
        }
    }

    pub async fn data_transfer(
        &self,
        request: DataTransferRequest,
    ) -> Result<DataTransferResponse, OcppError> {
        match self.send(request).await? {
            CentralSystemResponse::DataTransfer(r) => Ok(r),
            _ => Err(unexpected(Action::DataTransfer)),
        }
    }

    pub async fn remote_start_transaction(
        &self,
        request: RemoteStartTransactionRequest,
    ) -> Result<RemoteStartTransactionResponse, OcppError> {
        match self.send(request).await? {
            CentralSystemResponse::RemoteStartTransaction(r) => Ok(r),
            _ => Err(unexpected(Action::RemoteStartTransaction)),
        }
    }

    pub async fn remote_stop_transaction(
        &self,
        transaction_id: i32,
    ) -> Result<RemoteStopTransactionResponse, OcppError> {
        match self
            .send(RemoteStopTransactionRequest { transaction_id })
            .await?
        {
            CentralSystemResponse::RemoteStopTransaction(r) => Ok(r),
            _ => Err(unexpected(Action::RemoteStopTransaction)),
        }
    }

    pub async fn reset(&self, reset_type: ResetType) -> Result<ResetResponse, OcppError> {
        match self.send(ResetRequest { reset_type }).await? {
            CentralSystemResponse::Reset(r) => Ok(r),
            _ => Err(unexpected(Action::Reset)),
        }
    }
}

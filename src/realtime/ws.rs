//! WebSocket endpoint for real-time observers.
//!
//! Outbound frames are `{"event":"sensorData","data":{...}}`. Inbound frames
//! `{"event":"calibrate"|"reset","data":<json>}` are relayed to the sensors.

use std::convert::Infallible;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        FromRequestParts, Query, State,
    },
    http::request::Parts,
    response::Response,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::ObserverId;
use crate::{actuation::MaintenanceKind, api::AppState};

/// Who a connecting observer is.
///
/// Taken from the `?user=` query parameter as presented, with no credential
/// check: any client can claim any user and will see that user's devices.
/// Deploy behind an authenticating proxy, or replace this extractor with one
/// that reads a verified identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverIdentity(pub Option<String>);

#[derive(Debug, Deserialize)]
struct UserParam {
    user: Option<String>,
}

impl<S: Send + Sync> FromRequestParts<S> for ObserverIdentity {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = Query::<UserParam>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(p)| p.user)
            .map(|u| u.trim().to_owned())
            .filter(|u| !u.is_empty());
        Ok(Self(user))
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    /// Device to follow; defaults to the user's first registered device.
    pub device: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InboundMessage {
    event: String,
    #[serde(default)]
    data: Value,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    identity: ObserverIdentity,
    Query(params): Query<ConnectParams>,
) -> Response {
    ws.on_upgrade(move |socket| serve_observer(socket, state, identity, params))
}

async fn serve_observer(
    mut socket: WebSocket,
    state: AppState,
    ObserverIdentity(user): ObserverIdentity,
    params: ConnectParams,
) {
    let device_id = state
        .directory
        .resolve(user.as_deref(), params.device.as_deref());
    if params.device.is_some() && device_id.is_none() {
        warn!(user = ?user, device = ?params.device, "Observer requested a device it does not own");
    }

    let mut handle = state.broadcaster.connect(user, device_id).await;

    loop {
        tokio::select! {
            event = handle.events.recv() => {
                let Some(event) = event else { break };
                let frame = event.to_frame().to_string();
                if socket.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => handle_inbound(&state, handle.id, text.as_str()).await,
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    state.broadcaster.disconnect(handle.id).await;
}

async fn handle_inbound(state: &AppState, observer: ObserverId, text: &str) {
    let message = match serde_json::from_str::<InboundMessage>(text) {
        Ok(m) => m,
        Err(e) => {
            debug!(observer = %observer, error = %e, "Ignoring unparseable observer message");
            return;
        }
    };

    let kind = match message.event.parse::<MaintenanceKind>() {
        Ok(kind) => kind,
        Err(e) => {
            debug!(observer = %observer, error = %e, "Ignoring observer message");
            return;
        }
    };

    match state.publisher.forward(kind, &message.data).await {
        Ok(()) => debug!(observer = %observer, kind = %kind, "Maintenance request forwarded"),
        Err(e) => warn!(observer = %observer, kind = %kind, error = %e, "Failed to forward maintenance request"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{
        realtime::{Broadcaster, ProfileFilter, StaticProfileDirectory},
        store::MemoryReadingStore,
        testing::RecordingPublisher,
    };

    fn state(publisher: Arc<RecordingPublisher>) -> AppState {
        let directory = Arc::new(StaticProfileDirectory::default());
        AppState {
            store: Arc::new(MemoryReadingStore::new()),
            broadcaster: Broadcaster::new(Arc::new(ProfileFilter::new(directory.clone())), 4),
            directory,
            publisher,
        }
    }

    async fn identity(uri: &str) -> ObserverIdentity {
        let (mut parts, ()) = axum::http::Request::builder()
            .uri(uri)
            .body(())
            .unwrap()
            .into_parts();
        ObserverIdentity::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn identity_comes_from_user_param() {
        assert_eq!(identity("/ws?user=alice&device=A").await, ObserverIdentity(Some("alice".into())));
        assert_eq!(identity("/ws?user=%20").await, ObserverIdentity(None));
        assert_eq!(identity("/ws").await, ObserverIdentity(None));
    }

    #[tokio::test]
    async fn calibrate_and_reset_are_forwarded_with_their_data() {
        let publisher = RecordingPublisher::new();
        let state = state(publisher.clone());

        handle_inbound(&state, ObserverId(1), r#"{"event":"calibrate","data":{"dry":800}}"#).await;
        handle_inbound(&state, ObserverId(1), r#"{"event":"reset"}"#).await;

        let forwarded = publisher.forwarded.lock().unwrap().clone();
        assert_eq!(
            forwarded,
            vec![
                (MaintenanceKind::Calibrate, json!({ "dry": 800 })),
                (MaintenanceKind::Reset, Value::Null),
            ]
        );
    }

    #[tokio::test]
    async fn unknown_or_garbled_messages_are_ignored() {
        let publisher = RecordingPublisher::new();
        let state = state(publisher.clone());

        handle_inbound(&state, ObserverId(1), r#"{"event":"water_now"}"#).await;
        handle_inbound(&state, ObserverId(1), "not json").await;

        assert!(publisher.forwarded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn forward_failure_does_not_panic() {
        let publisher = RecordingPublisher::failing();
        let state = state(publisher.clone());

        handle_inbound(&state, ObserverId(7), r#"{"event":"reset","data":{}}"#).await;

        assert_eq!(publisher.forwarded.lock().unwrap().len(), 1);
    }
}

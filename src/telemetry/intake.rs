use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, Outgoing, Packet, QoS};
use tokio::{sync::oneshot, time};
use tracing::{debug, error, info, warn};

use crate::ingest::Dispatcher;

/// Pause before polling again after a connection error. rumqttc reconnects on
/// the next poll.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// How long to keep polling for the DISCONNECT to be written at shutdown.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// What `handle_event` did with one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Subscribed,
    SubscribeFailed,
    Dispatched,
    Ignored,
}

/// React to one event loop event: (re)subscribe on every ConnAck so the
/// subscription survives broker restarts, and hand every publish to
/// `dispatcher`. Never waits.
pub fn handle_event(
    event: Event,
    client: &AsyncClient,
    topic: &str,
    dispatcher: &mut Dispatcher,
) -> Handled {
    match event {
        Event::Incoming(Packet::ConnAck(_)) => {
            info!("Connected to MQTT broker");
            match client.try_subscribe(topic, QoS::AtLeastOnce) {
                Ok(()) => {
                    info!(topic = %topic, "Subscribed to telemetry topic");
                    Handled::Subscribed
                }
                Err(e) => {
                    error!(topic = %topic, error = %e, "Failed to subscribe");
                    Handled::SubscribeFailed
                }
            }
        }
        Event::Incoming(Packet::Publish(publish)) => {
            debug!(topic = %publish.topic, bytes = publish.payload.len(), "Telemetry received");
            dispatcher.dispatch(&publish.payload);
            Handled::Dispatched
        }
        _ => Handled::Ignored,
    }
}

/// Drive the MQTT event loop and feed every telemetry publish to `dispatcher`
/// until `shutdown` fires (or its sender is dropped).
///
/// On shutdown the subscription is dropped and the lanes are drained while
/// the event loop is still polled, so control commands issued by the last
/// readings reach the broker. Only then is the connection closed.
pub async fn run(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topic: String,
    mut dispatcher: Dispatcher,
    mut shutdown: oneshot::Receiver<()>,
) {
    info!(topic = %topic, "Telemetry intake started");

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            event = poll(&mut eventloop) => {
                if let Some(event) = event {
                    handle_event(event, &client, &topic, &mut dispatcher);
                }
            }
        }
    }

    info!("Telemetry intake stopping");
    if let Err(e) = client.try_unsubscribe(topic.as_str()) {
        debug!(error = %e, "MQTT unsubscribe not queued");
    }
    drain_while_polling(&mut eventloop, &mut dispatcher).await;
    disconnect(&mut eventloop, &client).await;
    info!("Telemetry intake stopped");
}

/// Drain `dispatcher` while keeping the connection serviced. Telemetry that
/// still arrives in the meantime is not dispatched.
pub async fn drain_while_polling(eventloop: &mut EventLoop, dispatcher: &mut Dispatcher) {
    let drain = dispatcher.drain();
    tokio::pin!(drain);

    loop {
        tokio::select! {
            () = &mut drain => break,
            event = poll(eventloop) => {
                if let Some(Event::Incoming(Packet::Publish(publish))) = event {
                    debug!(topic = %publish.topic, "Telemetry ignored during shutdown");
                }
            }
        }
    }
}

async fn disconnect(eventloop: &mut EventLoop, client: &AsyncClient) {
    if let Err(e) = client.try_disconnect() {
        debug!(error = %e, "MQTT disconnect not queued");
        return;
    }

    let flushed = time::timeout(DISCONNECT_GRACE, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    if flushed.is_err() {
        warn!("MQTT disconnect not written before the grace period ended");
    }
}

/// One poll. A connection error is logged and followed by `RECONNECT_DELAY`.
async fn poll(eventloop: &mut EventLoop) -> Option<Event> {
    match eventloop.poll().await {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "MQTT connection error; retrying");
            time::sleep(RECONNECT_DELAY).await;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use rumqttc::{ConnAck, ConnectReturnCode, MqttOptions, Publish};

    use super::*;
    use crate::{
        actuation::{ActuationPublisher, ControlCommand, MaintenanceKind, MqttPublisher},
        error::PipelineError,
        inference::InferenceOutcome,
        ingest::IngestionCoordinator,
        realtime::{Broadcaster, ProfileFilter, StaticProfileDirectory},
        store::MemoryReadingStore,
        testing::{FakeInference, RecordingPublisher, Scripted},
    };

    const REFERENCE: &[u8] =
        br#"{"deviceId":"dev1","temp":22,"humidity":55,"soilValue":300,"soilPercent":35}"#;

    /// A client whose event loop has nothing to connect to.
    fn offline_client(capacity: usize) -> (AsyncClient, EventLoop) {
        AsyncClient::new(MqttOptions::new("intake-test", "127.0.0.1", 1), capacity)
    }

    fn dispatcher(
        inference: Arc<FakeInference>,
        store: &MemoryReadingStore,
        publisher: Arc<dyn ActuationPublisher>,
    ) -> Dispatcher {
        let coordinator = Arc::new(IngestionCoordinator::new(
            inference,
            Arc::new(store.clone()),
            Broadcaster::new(
                Arc::new(ProfileFilter::new(Arc::new(StaticProfileDirectory::default()))),
                4,
            ),
            publisher,
            Duration::from_secs(1),
        ));
        Dispatcher::new(coordinator, Duration::from_secs(60))
    }

    fn conn_ack() -> Event {
        Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
        }))
    }

    /// Forwards to an `MqttPublisher` and remembers each result.
    struct Tap {
        inner: MqttPublisher,
        results: Mutex<Vec<Result<(), PipelineError>>>,
    }

    #[async_trait]
    impl ActuationPublisher for Tap {
        async fn publish(&self, command: &ControlCommand) -> Result<(), PipelineError> {
            let result = self.inner.publish(command).await;
            self.results.lock().unwrap().push(result.clone());
            result
        }

        async fn forward(
            &self,
            kind: MaintenanceKind,
            payload: &serde_json::Value,
        ) -> Result<(), PipelineError> {
            self.inner.forward(kind, payload).await
        }
    }

    #[tokio::test]
    async fn every_conn_ack_subscribes_again() {
        let (client, _eventloop) = offline_client(8);
        let store = MemoryReadingStore::new();
        let mut d = dispatcher(
            FakeInference::always(Ok(InferenceOutcome::no_irrigation())),
            &store,
            RecordingPublisher::new(),
        );

        assert_eq!(handle_event(conn_ack(), &client, "sensor/data", &mut d), Handled::Subscribed);
        assert_eq!(handle_event(conn_ack(), &client, "sensor/data", &mut d), Handled::Subscribed);
    }

    #[tokio::test]
    async fn subscribe_failure_is_reported() {
        let (client, _eventloop) = offline_client(1);
        let store = MemoryReadingStore::new();
        let mut d = dispatcher(
            FakeInference::always(Ok(InferenceOutcome::no_irrigation())),
            &store,
            RecordingPublisher::new(),
        );

        assert_eq!(handle_event(conn_ack(), &client, "sensor/data", &mut d), Handled::Subscribed);
        assert_eq!(
            handle_event(conn_ack(), &client, "sensor/data", &mut d),
            Handled::SubscribeFailed
        );
    }

    #[tokio::test]
    async fn publish_reaches_the_pipeline() {
        let (client, _eventloop) = offline_client(8);
        let store = MemoryReadingStore::new();
        let mut d = dispatcher(
            FakeInference::always(Ok(InferenceOutcome::no_irrigation())),
            &store,
            RecordingPublisher::new(),
        );

        let event = Event::Incoming(Packet::Publish(Publish::new(
            "sensor/data",
            QoS::AtLeastOnce,
            REFERENCE.to_vec(),
        )));
        assert_eq!(handle_event(event, &client, "sensor/data", &mut d), Handled::Dispatched);
        assert_eq!(
            handle_event(Event::Incoming(Packet::PingResp), &client, "sensor/data", &mut d),
            Handled::Ignored
        );

        d.drain().await;
        let records = store.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].device_id, "dev1");
    }

    #[tokio::test]
    async fn drained_readings_can_still_actuate() {
        let (client, mut eventloop) = offline_client(16);
        let tap = Arc::new(Tap {
            inner: MqttPublisher::new(client.clone(), "pump/control"),
            results: Mutex::new(Vec::new()),
        });
        let store = MemoryReadingStore::new();
        let inference = FakeInference::scripted(
            vec![Scripted {
                delay: Duration::from_millis(50),
                result: Ok(InferenceOutcome::irrigate(30.0)),
            }],
            Ok(InferenceOutcome::irrigate(30.0)),
        );
        let mut d = dispatcher(inference, &store, tap.clone());

        for _ in 0..3 {
            d.dispatch(REFERENCE);
        }
        time::timeout(Duration::from_secs(5), drain_while_polling(&mut eventloop, &mut d))
            .await
            .expect("drain should finish");

        assert_eq!(store.records().await.len(), 3);
        let results = tap.results.lock().unwrap().clone();
        assert_eq!(results, vec![Ok(()), Ok(()), Ok(())]);

        // The event loop is still alive, so the publisher keeps accepting commands.
        let cmd = ControlCommand::from_outcome("dev1", &InferenceOutcome::no_irrigation()).unwrap();
        assert_eq!(tap.inner.publish(&cmd).await, Ok(()));
    }

    #[tokio::test]
    async fn run_returns_once_shutdown_fires() {
        let (client, eventloop) = offline_client(8);
        let store = MemoryReadingStore::new();
        let d = dispatcher(
            FakeInference::always(Ok(InferenceOutcome::no_irrigation())),
            &store,
            RecordingPublisher::new(),
        );

        let (tx, rx) = oneshot::channel();
        tx.send(()).unwrap();

        time::timeout(
            Duration::from_secs(5),
            run(eventloop, client, "sensor/data".into(), d, rx),
        )
        .await
        .expect("intake should stop promptly");
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{HistoryPeriod, PersistedRecord, ReadingStore};
use crate::{error::PipelineError, inference::InferenceOutcome, telemetry::SensorReading};

/// In-process `ReadingStore`, used when no database is configured.
///
/// Wrapped in `Arc` so it can be cheaply cloned and shared across tasks.
/// Records are kept in append order and lost on restart.
#[derive(Clone, Default)]
pub struct MemoryReadingStore {
    inner: Arc<RwLock<Vec<PersistedRecord>>>,
}

impl MemoryReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record in append order.
    pub async fn records(&self) -> Vec<PersistedRecord> {
        self.inner.read().await.clone()
    }

    #[cfg(test)]
    pub(crate) async fn push(&self, record: PersistedRecord) {
        self.inner.write().await.push(record);
    }
}

#[async_trait]
impl ReadingStore for MemoryReadingStore {
    async fn append(
        &self,
        reading: &SensorReading,
        outcome: Option<&InferenceOutcome>,
    ) -> Result<PersistedRecord, PipelineError> {
        let record = PersistedRecord {
            id: Uuid::new_v4(),
            device_id: reading.device_id.clone(),
            soil_moisture_raw: reading.soil_moisture_raw,
            soil_moisture_percent: reading.soil_moisture_percent,
            air_temperature: reading.air_temperature,
            air_humidity: reading.air_humidity,
            received_at: reading.received_at,
            prediction: outcome.and_then(InferenceOutcome::prediction),
            duration_seconds: outcome.and_then(InferenceOutcome::time),
            inference_error: outcome.and_then(|o| o.error.clone()),
            recorded_at: Utc::now(),
        };
        self.inner.write().await.push(record.clone());
        Ok(record)
    }

    async fn find(&self, limit: i64) -> Result<Vec<PersistedRecord>, PipelineError> {
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(self
            .inner
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_by_period(
        &self,
        period: HistoryPeriod,
    ) -> Result<Vec<PersistedRecord>, PipelineError> {
        let since = period.since(Utc::now());
        Ok(self
            .inner
            .read()
            .await
            .iter()
            .rev()
            .filter(|r| r.recorded_at >= since)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn reading(device_id: &str) -> SensorReading {
        SensorReading {
            device_id: device_id.to_owned(),
            soil_moisture_raw: 300.0,
            soil_moisture_percent: 35.0,
            air_temperature: 22.0,
            air_humidity: 55.0,
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn empty_store_returns_nothing() {
        let store = MemoryReadingStore::new();
        assert!(store.find(100).await.unwrap().is_empty());
        assert!(store.find_by_period(HistoryPeriod::Day).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_encodes_outcome() {
        let store = MemoryReadingStore::new();

        let ok = store
            .append(&reading("dev1"), Some(&InferenceOutcome::irrigate(90.0)))
            .await
            .unwrap();
        assert_eq!(ok.prediction, Some(1));
        assert_eq!(ok.duration_seconds, Some(90.0));

        let off = store
            .append(&reading("dev1"), Some(&InferenceOutcome::no_irrigation()))
            .await
            .unwrap();
        assert_eq!(off.prediction, Some(0));
        assert_eq!(off.duration_seconds, None);

        let failed = store
            .append(&reading("dev1"), Some(&InferenceOutcome::failed("boom")))
            .await
            .unwrap();
        assert_eq!(failed.prediction, None);
        assert_eq!(failed.inference_error.as_deref(), Some("boom"));

        let none = store.append(&reading("dev1"), None).await.unwrap();
        assert_eq!(none.prediction, None);
        assert!(none.inference_error.is_none());

        assert_ne!(ok.id, off.id);
        assert_eq!(store.records().await.len(), 4);
    }

    #[tokio::test]
    async fn find_is_newest_first_and_limited() {
        let store = MemoryReadingStore::new();
        for device in ["a", "b", "c"] {
            store.append(&reading(device), None).await.unwrap();
        }

        let rows = store.find(2).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.device_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn find_by_period_excludes_older_rows() {
        let store = MemoryReadingStore::new();
        let mut old = store.append(&reading("old"), None).await.unwrap();
        // Replace the fresh row with a copy recorded ten days ago.
        store.inner.write().await.clear();
        old.recorded_at = Utc::now() - Duration::days(10);
        store.push(old).await;
        store.append(&reading("new"), None).await.unwrap();

        let day = store.find_by_period(HistoryPeriod::Day).await.unwrap();
        assert_eq!(day.len(), 1);
        assert_eq!(day[0].device_id, "new");

        let month = store.find_by_period(HistoryPeriod::Month).await.unwrap();
        assert_eq!(month.len(), 2);
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let store = MemoryReadingStore::new();
        let clone = store.clone();
        store.append(&reading("dev1"), None).await.unwrap();
        assert_eq!(clone.records().await.len(), 1);
    }
}

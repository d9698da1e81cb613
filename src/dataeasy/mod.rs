use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use crate::models::{AlignmentError, ChannelSchema, MeterRecord, ReadingSet};
use crate::mqtt::Transmission;

pub mod client;
pub mod registry_parser;
pub mod channel_parser;
pub mod reading_parser;

/// The DataEasy web server answers with this text instead of a 5xx status
pub(crate) const ERROR_MARKER: &str = "ERROR";

#[derive(Error, Debug)]
pub enum DataEasyError {
    #[error("Meter registry is unusable: {0}")]
    RegistryFormat(String),
    #[error("Unable to fetch meter registry: {0}")]
    RegistryFetch(String),
    #[error("Unable to fetch channel database: {0}")]
    ChannelFetch(String),
    #[error("Unable to fetch last readings: {0}")]
    ReadingsFetch(String),
    #[error(transparent)]
    Misaligned(#[from] AlignmentError),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("MQTT task is gone")]
    PublisherClosed,
}

/// Source of meter data, the DataEasy web server in production
#[async_trait]
pub trait MeterSource: Send + Sync {
    async fn get_meters(&self) -> Result<Vec<MeterRecord>, DataEasyError>;

    async fn get_meter_channels(&self, meter: &MeterRecord) -> Result<ChannelSchema, DataEasyError>;

    async fn get_last_meter_readings(&self, meter: &MeterRecord, channels: &ChannelSchema) -> Result<ReadingSet, DataEasyError>;
}

/// Read the registry and keep the meters listed in `wanted`.
///
/// Failing to read the registry is fatal, there is nothing to poll without it.
pub async fn select_meters<S: MeterSource + ?Sized>(source: &S, wanted: &[String]) -> Result<Vec<MeterRecord>, DataEasyError> {
    let meters = source.get_meters().await?;
    info!("Registry lists {} meters", meters.len());

    let mut selected: Vec<MeterRecord> = Vec::new();
    for meter in meters {
        let serial = meter.serial();
        if !wanted.iter().any(|w| w == serial) {
            debug!("Skipped device {serial}");
            continue;
        }
        if selected.iter().any(|m| m.serial() == serial) {
            warn!("Device {serial} is listed twice in the registry, keeping the first entry");
            continue;
        }
        info!("Found requested device with SN {serial}");
        selected.push(meter);
    }

    for serial in wanted {
        if !selected.iter().any(|m| m.serial() == serial) {
            warn!("Requested device {serial} is not part of the registry");
        }
    }

    return Ok(selected);
}

/// Polls one meter: discovers its channels once, then publishes the last readings on every tick
pub struct DevicePoller<S: MeterSource + ?Sized> {
    source: Arc<S>,
    sender: Sender<Transmission>,
    meter: MeterRecord,
    channels: Option<ChannelSchema>,
    interval: Duration,
}

impl<S: MeterSource + ?Sized + 'static> DevicePoller<S> {
    pub fn new(source: Arc<S>, sender: Sender<Transmission>, meter: MeterRecord, interval: Duration) -> Self {
        return DevicePoller {
            source,
            sender,
            meter,
            channels: None,
            interval,
        };
    }

    pub fn is_discovered(&self) -> bool {
        return self.channels.is_some();
    }

    pub async fn start_thread(&mut self) {
        info!("Polling device {} every {} seconds", self.meter.serial(), self.interval.as_secs());
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.run_cycle().await {
                Ok(_) => {},
                Err(DataEasyError::PublisherClosed) => {
                    error!("Device {}: MQTT task is gone, stopping", self.meter.serial());
                    return;
                },
                Err(e) => {
                    error!("Error while fetching data for device {}: {e}", self.meter.serial());
                },
            }
        }
    }

    /// One poll: discovery if still needed, then fetch, decode and hand over the readings
    pub async fn run_cycle(&mut self) -> Result<(), DataEasyError> {
        if self.channels.is_none() {
            let channels = self.source.get_meter_channels(&self.meter).await?;
            info!("Fetched {} channels for meter {}", channels.len(), self.meter.serial());

            self.sender.send(Transmission::RegisterDevice {
                meter: self.meter.clone(),
                channels: channels.clone(),
            }).await.map_err(|_| DataEasyError::PublisherClosed)?;
            self.channels = Some(channels);
        }

        let Some(channels) = self.channels.as_ref() else {
            return Ok(());
        };
        let readings = self.source.get_last_meter_readings(&self.meter, channels).await?;
        info!("Got readings for meter {}", self.meter.serial());

        self.sender.send(Transmission::Readings {
            meter: self.meter.clone(),
            readings,
        }).await.map_err(|_| DataEasyError::PublisherClosed)?;
        return Ok(());
    }
}

/// Spawn one poller task per meter
pub fn start_pollers<S: MeterSource + ?Sized + 'static>(source: Arc<S>, meters: Vec<MeterRecord>, interval: Duration, sender: Sender<Transmission>) -> Vec<JoinHandle<()>> {
    let mut threads = Vec::new();
    for meter in meters {
        let mut poller = DevicePoller::new(source.clone(), sender.clone(), meter, interval);
        threads.push(tokio::spawn(async move {
            poller.start_thread().await;
        }));
    }
    return threads;
}

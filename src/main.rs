use dataeasy2mqtt::{dataeasy::{select_meters, start_pollers}, Config, DataEasyClient, MqttManager};
use tokio::task::JoinHandle;
use std::{sync::Arc, time::Duration};
use log::{error, info};


#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    let default_filter = std::env::var("DE2M_LOG_LEVEL").unwrap_or("info".to_string());
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(default_filter));

    let config = Config::load()?;

    // the pollers use this channel to hand discovery and readings to the MQTT task
    let (mut mqtt, tx) = MqttManager::new(&config.mqtt)?;

    let mut threads: Vec<JoinHandle<()>> = Vec::new();
    threads.push(tokio::spawn(async move {
        mqtt.start_thread().await;
    }));

    let client = Arc::new(DataEasyClient::new(&config.api)?);

    /* Without the registry there is nothing to poll */
    let meters = match select_meters(&*client, &config.devices).await {
        Ok(meters) => meters,
        Err(e) => {
            error!("Reading the meter registry failed: {e}");
            for task in threads.iter() {
                task.abort();
            }
            return Err(e.into());
        }
    };

    if meters.is_empty() {
        error!("None of the configured devices is known to the DataEasy, exiting");
        for task in threads.iter() {
            task.abort();
        }
        return Ok(());
    }

    info!("Starting {} device pollers", meters.len());
    threads.extend(start_pollers(client, meters, config.refresh_interval(), tx));

    info!("All modules started, now waiting for a signal to exit");
    loop {
        tokio::time::sleep(Duration::from_secs(10)).await;
        let mut kill_all_tasks = false;
        for task in threads.iter() {
            if task.is_finished() {
                kill_all_tasks = true;
            }
        }

        if kill_all_tasks {
            error!("A task stopped unexpectedly, shutting down");
            for task in threads.iter_mut() {
                task.abort();
            }
            break;
        }
    }
    Ok(())
}

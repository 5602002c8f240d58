use serde::{Deserialize, Serialize};
use theta_state::prelude::*;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PersistentState)]
#[state(type_name = "Demo.Counter")]
struct Counter {
    value: i64,
}

/// Load, apply `amount`, save. Retries from a fresh read when another activation won.
async fn increment(
    storage: &impl StateStorage,
    key: &str,
    amount: i64,
) -> Result<i64, PersistenceError> {
    loop {
        let mut container = StateContainer::<Counter>::default();
        storage
            .read_state(Counter::TYPE_NAME, key, &mut container)
            .await?;

        container.state.value += amount;

        match storage
            .write_state(Counter::TYPE_NAME, key, &mut container)
            .await
        {
            Ok(()) => return Ok(container.state.value),
            Err(e) if e.is_conflict() => info!("Lost the race on {key}, retrying: {e}"),
            Err(e) => return Err(e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let storage = DocumentStorage::from_options(None, &StorageOptions::default()).await?;

    let (a, b) = tokio::join!(
        increment(&storage, "counter-1", 5),
        increment(&storage, "counter-1", 7)
    );
    info!("Increments finished at {} and {}", a?, b?);

    let mut container = StateContainer::<Counter>::default();
    storage
        .read_state(Counter::TYPE_NAME, "counter-1", &mut container)
        .await?;
    println!("Current value: {} at version {}", container.state.value, container.etag); // Current value: 12

    storage.dispose().await?;

    Ok(())
}

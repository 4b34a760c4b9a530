use notifier::{AnyEvent, BusConfig, Close, EventBus, from_fn, offload, smart_fn};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
struct Ping(u32);

#[derive(Debug)]
struct Alarm {
    level: u8,
}

#[tokio::main]
async fn main() -> Result<(), notifier::BusError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "notifier=debug".into()))
        .init();

    let bus = EventBus::new(BusConfig::default().with_capacity(16));

    // Published before anyone listens; held until the subscriber below attaches.
    bus.register_publisher(|| Ping(0));
    for i in 1..=3 {
        bus.publish(Ping(i)).await?;
    }

    bus.register_subscriber(Arc::new(from_fn(|ping: Arc<Ping>| async move {
        println!("handled {ping:?}");
        Ok(())
    })));

    // Sees every topic, keeps only loud alarms, runs off the delivery worker.
    bus.register_smart_subscriber(Arc::new(offload(
        Arc::new(Handle::current()),
        smart_fn(
            |event: &AnyEvent| event.downcast_ref::<Alarm>().is_some_and(|a| a.level > 2),
            |event: AnyEvent| async move {
                println!("alarm on {}: {event:?}", event.topic());
                Ok(())
            },
        ),
    )));
    bus.register_publisher(|| Alarm { level: 0 });
    bus.stop_deferred_delivery();

    bus.publish(Alarm { level: 1 }).await?;
    bus.publish(Alarm { level: 5 }).await?;

    tokio::time::sleep(Duration::from_millis(50)).await;
    bus.close().await;
    Ok(())
}

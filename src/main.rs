use std::sync::Arc;

use spindle::{
    command_channel, init_logging, signals, Controller, DeliveryWorker, DispatchQueue, Message,
    Node, Settings,
};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;
    settings.validate()?;

    let logging = init_logging(settings.logging.clone())
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT"),
        built = env!("BUILD_TIME"),
        host = %host,
        node = %settings.node.name,
        topic = %settings.node.topic,
        "Starting spindle"
    );

    let node = Arc::new(Node::new(settings.node.name.as_str()));
    let drained_queue = Arc::new(DispatchQueue::new(settings.delivery.queue.as_str()));
    let topic = settings.node.topic.as_str();
    let depth = settings.node.buffer_depth;

    // Первая подписка обслуживается spin_once, две остальные воркером
    let _sub_1 = node.subscribe(
        topic,
        depth,
        |msg: &Message| {
            info!("Subscriber<1> heard: {msg}");
            Ok(())
        },
        None,
    );
    let _sub_2 = node.subscribe(
        topic,
        depth,
        |msg: &Message| {
            info!("Subscriber<2> heard: {msg}");
            Ok(())
        },
        Some(Arc::clone(&drained_queue)),
    );
    let _sub_3 = node.subscribe(
        topic,
        depth,
        |msg: &Message| {
            info!("Subscriber<3> heard: {msg}");
            Ok(())
        },
        Some(Arc::clone(&drained_queue)),
    );

    let worker = Arc::new(DeliveryWorker::new(
        Arc::clone(&drained_queue),
        settings.worker_config(),
    ));
    worker.start()?;

    let controller = Arc::new(Controller::new(Arc::clone(&worker)));
    let (control, commands) = command_channel(16);
    let controller_task =
        tokio::spawn(Arc::clone(&controller).run(settings.flush_schedule(), commands));

    let talker = settings.talker_period().map(|period| {
        let node = Arc::clone(&node);
        let topic = settings.node.topic.clone();
        tokio::spawn(async move {
            let mut tick = interval(period);
            let mut count: u64 = 0;
            loop {
                tick.tick().await;
                node.publish(&topic, format!("hello world {count}"));
                count += 1;
            }
        })
    });

    let mut tick = interval(settings.loop_period());
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = signals::wait_for_shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            res = &mut shutdown => {
                if let Err(e) = res {
                    error!(error = %e, "Failed to listen for shutdown signals");
                }
                break;
            }
            _ = tick.tick() => {
                node.spin_once();
            }
        }
    }

    info!("Shutting down");
    if let Some(talker) = talker {
        talker.abort();
    }
    if let Err(e) = control.shutdown().await {
        warn!(error = %e, "Controller already stopped");
    }
    if let Err(e) = controller_task.await {
        error!(error = %e, "Controller task failed");
    }

    let stopping = Arc::clone(&worker);
    tokio::task::spawn_blocking(move || stopping.stop()).await?;

    let queue_stats = drained_queue.stats();
    let worker_stats = worker.stats();
    info!(
        published = node.published(),
        flushes = controller.cycles_completed(),
        delivered = worker_stats.invoked,
        failed = worker_stats.failed,
        discarded = queue_stats.discarded,
        evicted = queue_stats.evicted,
        "Spindle stopped"
    );

    logging.shutdown();
    Ok(())
}

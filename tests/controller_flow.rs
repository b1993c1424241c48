use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use spindle::{
    command_channel, ControlCommand, Controller, DeliveryWorker, DispatchQueue, FlushSchedule,
    Message, Node, StatusCode, WorkerConfig,
};
use tokio::time::{sleep, timeout};

struct Harness {
    node: Arc<Node>,
    queue: Arc<DispatchQueue>,
    controller: Arc<Controller>,
}

fn harness() -> Harness {
    let node = Arc::new(Node::new("listener"));
    let queue = Arc::new(DispatchQueue::new("cq_2"));
    let worker = Arc::new(DeliveryWorker::new(
        queue.clone(),
        WorkerConfig {
            threads: 1,
            idle_wait: Duration::from_millis(5),
            name: "cq_2-delivery".to_string(),
        },
    ));
    Harness {
        node,
        queue,
        controller: Arc::new(Controller::new(worker)),
    }
}

async fn eventually(cond: impl Fn() -> bool) -> bool {
    timeout(Duration::from_secs(5), async {
        while !cond() {
            sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .is_ok()
}

/// Плановый цикл на работающем узле: сообщения, опубликованные во время
/// паузы, не доставляются подписчикам воркера, а подписчик очереди по
/// умолчанию продолжает их получать через `spin_once`.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scheduled_flush_with_live_node() {
    let h = harness();
    let drained_log = Arc::new(Mutex::new(Vec::new()));
    let default_heard = Arc::new(AtomicUsize::new(0));

    let d = default_heard.clone();
    let _sub_1 = h.node.subscribe(
        "chatter",
        100,
        move |_: &Message| {
            d.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
        None,
    );
    let l = drained_log.clone();
    let _sub_2 = h.node.subscribe(
        "chatter",
        100,
        move |msg: &Message| {
            l.lock().push(msg.data.clone());
            Ok(())
        },
        Some(h.queue.clone()),
    );

    h.controller.worker().start().unwrap();
    let (control, commands) = command_channel(4);
    let schedule = FlushSchedule::once(Duration::from_millis(200), Duration::from_millis(150));
    let task = tokio::spawn(Arc::clone(&h.controller).run(schedule, commands));

    h.node.publish("chatter", "early");
    assert!(eventually(|| drained_log.lock().len() == 1).await);

    assert!(eventually(|| h.controller.is_paused()).await);
    for i in 0..10 {
        h.node.publish("chatter", format!("paused {i}"));
    }
    assert_eq!(h.node.spin_once(), 11);
    assert_eq!(default_heard.load(Ordering::SeqCst), 11);

    assert!(eventually(|| !h.controller.is_paused()).await);
    assert_eq!(h.controller.cycles_completed(), 1);
    assert!(h.queue.is_empty());

    h.node.publish("chatter", "late");
    assert!(eventually(|| drained_log.lock().len() == 2).await);
    assert_eq!(*drained_log.lock(), vec!["early", "late"]);

    control.shutdown().await.unwrap();
    task.await.unwrap();
    h.controller.worker().stop();
}

/// Периодическое расписание повторяет цикл очистки.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_periodic_schedule_repeats() {
    let h = harness();
    h.controller.worker().start().unwrap();

    let (control, commands) = command_channel(4);
    let schedule = FlushSchedule::once(Duration::from_millis(10), Duration::from_millis(20))
        .with_interval(Duration::from_millis(60));
    let task = tokio::spawn(Arc::clone(&h.controller).run(schedule, commands));

    assert!(eventually(|| h.controller.cycles_completed() >= 3).await);

    control.shutdown().await.unwrap();
    task.await.unwrap();
    h.controller.worker().stop();
}

/// Команды управления: пауза, возобновление без очистки и отправка без
/// ожидания подтверждения.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_manual_commands() {
    let h = harness();
    let heard = Arc::new(AtomicUsize::new(0));
    let c = heard.clone();
    let _sub = h.node.subscribe(
        "chatter",
        0,
        move |_: &Message| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
        Some(h.queue.clone()),
    );

    h.controller.worker().start().unwrap();
    let (control, commands) = command_channel(4);
    let idle = FlushSchedule::once(Duration::from_secs(3600), Duration::from_secs(1));
    let task = tokio::spawn(Arc::clone(&h.controller).run(idle, commands));

    control.pause().await.unwrap();
    for i in 0..5 {
        h.node.publish("chatter", format!("{i}"));
    }
    sleep(Duration::from_millis(30)).await;
    assert_eq!(heard.load(Ordering::SeqCst), 0);

    assert!(control.resume(false).await.unwrap().is_none());
    assert!(eventually(|| heard.load(Ordering::SeqCst) == 5).await);

    control.try_send(ControlCommand::Pause { ack: None }).unwrap();
    assert!(eventually(|| h.controller.is_paused()).await);

    let report = control.resume(true).await.unwrap().unwrap();
    assert_eq!(report.items_discarded, 0);

    control.shutdown().await.unwrap();
    task.await.unwrap();
    h.controller.worker().stop();

    let err = control.flush().await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::ControllerClosed);
}

/// Закрытие всех дескрипторов завершает цикл управления.
#[tokio::test]
async fn test_run_stops_when_handles_dropped() {
    let h = harness();
    let (control, commands) = command_channel(1);
    let task = tokio::spawn(Arc::clone(&h.controller).run(FlushSchedule::default(), commands));

    drop(control);
    timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(!h.controller.is_paused());
}

use chrono::Utc;
use dealwatch::orchestration::QualityMonitor;
use dealwatch::registry::MIN_STEP;
use dealwatch::{
    Address, BlacklistTarget, Config, Deal, DealId, MockNode, MockPool, MonitorError, PoolConfig,
    PoolFormat, ProcessorConfig, ProcessorFormat, TaskId,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const MH: f64 = 1e6;

fn test_config(format: ProcessorFormat, pool_format: PoolFormat) -> Config {
    Config {
        port: 0,
        node_api_url: "http://example.invalid".to_string(),
        quality_threshold: 0.9,
        reconcile_interval: Duration::from_secs(10),
        connection_timeout: Duration::from_secs(1),
        log_processor: format,
        processor: ProcessorConfig {
            smoothing_window: Duration::from_secs(60),
            ..ProcessorConfig::default()
        },
        pool_processor: pool_format,
        pool_api_url: "http://pool.invalid".to_string(),
        pool: PoolConfig {
            track_interval: Duration::from_secs(15),
            smoothing_window: Duration::from_secs(60),
            accuracy_delay: Duration::from_secs(300),
        },
    }
}

fn setup(node: MockNode) -> (Arc<QualityMonitor>, Arc<MockNode>) {
    setup_with(node, ProcessorFormat::Common)
}

fn setup_with(node: MockNode, format: ProcessorFormat) -> (Arc<QualityMonitor>, Arc<MockNode>) {
    let node = Arc::new(node);
    let monitor = Arc::new(QualityMonitor::new(
        test_config(format, PoolFormat::Disabled),
        node.clone(),
        node.clone(),
        node.clone(),
    ));
    (monitor, node)
}

fn setup_with_pool(node: MockNode, pool: MockPool) -> (Arc<QualityMonitor>, Arc<MockNode>) {
    let node = Arc::new(node);
    let monitor = QualityMonitor::new(
        test_config(ProcessorFormat::Common, PoolFormat::Dwarf),
        node.clone(),
        node.clone(),
        node.clone(),
    )
    .with_pool_reports(Arc::new(pool));
    (Arc::new(monitor), node)
}

fn deal(id: &str, supplier: &str, target_mh: f64) -> Deal {
    Deal::new(
        DealId::new(id.to_string()),
        Address::new(supplier.to_string()),
        Address::new("0xconsumer".to_string()),
        Utc::now(),
        target_mh * MH,
    )
}

fn spawn_tracking(
    monitor: &Arc<QualityMonitor>,
    cancel: &CancellationToken,
    deal: &Deal,
    task: &str,
) -> JoinHandle<Result<(), MonitorError>> {
    let monitor = monitor.clone();
    let cancel = cancel.clone();
    let deal = deal.clone();
    let task = TaskId::new(task.to_string());
    tokio::spawn(async move { monitor.track_task(&cancel, &deal, task).await })
}

async fn sleep_secs(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn test_fitting_supplier_is_not_blacklisted() {
    let (monitor, node) = setup(MockNode::new().with_hashrate(100.0));
    let cancel = CancellationToken::new();
    let d1 = deal("1", "0xsupplier", 100.0);

    monitor.deal_opened(d1.clone()).unwrap();
    let tracking = spawn_tracking(&monitor, &cancel, &d1, "t1");

    sleep_secs(240).await;
    monitor.reconcile_all().await;

    assert!(node.finished().is_empty());
    let deals = monitor.deals();
    assert_eq!(deals.len(), 1);
    let quality = deals[0].quality.unwrap();
    assert!(quality.accurate);
    assert!((quality.ratio - 1.0).abs() < 0.01);

    let window = monitor
        .blacklist_registry()
        .get(&d1.supplier)
        .expect("window created on deal_opened");
    assert!(!window.lock().blacklisted());
    assert!(window.lock().last_success().is_some());
    assert_eq!(window.lock().current_step(), MIN_STEP);

    cancel.cancel();
    tracking.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_underdelivering_supplier_is_blacklisted_and_settled() {
    let (monitor, node) = setup(MockNode::new().with_hashrate(50.0));
    let cancel = CancellationToken::new();
    let d1 = deal("1", "0xsupplier", 100.0);

    monitor.deal_opened(d1.clone()).unwrap();
    let tracking = spawn_tracking(&monitor, &cancel, &d1, "t1");

    sleep_secs(480).await;
    let quality = monitor.deals()[0].quality.unwrap();
    assert!(quality.accurate);
    assert!((quality.ratio - 0.5).abs() < 0.01);

    monitor.reconcile_all().await;

    assert_eq!(node.finished(), vec![(d1.id.clone(), BlacklistTarget::Supplier)]);
    assert!(monitor.deals().is_empty());
    let suppliers = monitor.suppliers();
    assert_eq!(suppliers.len(), 1);
    assert!(suppliers[0].blacklisted);
    assert_eq!(suppliers[0].current_step_secs, 2 * 60 * 60);
    assert_eq!(monitor.stats().blacklisted_deals, 1);

    // The settled deal's processor is stopped without a global shutdown.
    tokio::time::timeout(Duration::from_secs(1), tracking)
        .await
        .expect("processor must stop once the deal is settled")
        .unwrap()
        .unwrap();

    // Later ticks do not see the deal again.
    sleep_secs(60).await;
    monitor.reconcile_all().await;
    assert_eq!(node.finished().len(), 1);
    assert!(!cancel.is_cancelled());
}

#[tokio::test]
async fn test_track_task_requires_registered_deal() {
    let (monitor, node) = setup(MockNode::new());
    let cancel = CancellationToken::new();
    let d1 = deal("404", "0xsupplier", 100.0);

    let result = monitor
        .track_task(&cancel, &d1, TaskId::new("t1".to_string()))
        .await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("deal not found"));
    assert!(matches!(err, MonitorError::DealNotFound(ref id) if *id == d1.id));
    assert!(monitor.deals().is_empty());
    assert!(monitor.suppliers().is_empty());
    assert_eq!(node.opens(), 0);
}

#[tokio::test]
async fn test_finish_without_task_settles_without_blacklist() {
    let (monitor, node) = setup(MockNode::new());
    let d1 = deal("1", "0xsupplier", 100.0);

    monitor.deal_opened(d1.clone()).unwrap();
    monitor.finish_deal(&d1).await.unwrap();

    assert_eq!(node.finished(), vec![(d1.id.clone(), BlacklistTarget::Nobody)]);
    assert!(monitor.deals().is_empty());
    // Penalty history outlives the deal.
    assert_eq!(monitor.suppliers().len(), 1);
    assert!(!monitor.suppliers()[0].blacklisted);
}

#[tokio::test]
async fn test_failed_finish_keeps_deal_registered() {
    let (monitor, node) = setup(MockNode::new());
    node.set_fail_finish(true);
    let d1 = deal("1", "0xsupplier", 100.0);

    monitor.deal_opened(d1.clone()).unwrap();
    let result = monitor.finish_deal(&d1).await;

    assert!(matches!(result, Err(MonitorError::Service(_))));
    assert_eq!(monitor.deals().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_finish_deal_stops_processor() {
    let (monitor, node) = setup(MockNode::new().with_hashrate(100.0));
    let cancel = CancellationToken::new();
    let d1 = deal("1", "0xsupplier", 100.0);

    monitor.deal_opened(d1.clone()).unwrap();
    let tracking = spawn_tracking(&monitor, &cancel, &d1, "t1");
    sleep_secs(30).await;

    monitor.finish_deal(&d1).await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), tracking)
        .await
        .expect("finish_deal must stop the processor")
        .unwrap()
        .unwrap();
    assert_eq!(node.finished(), vec![(d1.id.clone(), BlacklistTarget::Nobody)]);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_supplier_trends_to_zero() {
    let (monitor, node) = setup(MockNode::new().with_hashrate(100.0));
    let cancel = CancellationToken::new();
    let d1 = deal("1", "0xsupplier", 100.0);

    monitor.deal_opened(d1.clone()).unwrap();
    let tracking = spawn_tracking(&monitor, &cancel, &d1, "t1");

    sleep_secs(240).await;
    node.go_silent();

    sleep_secs(100).await;
    assert!(monitor.deals()[0].quality.unwrap().ratio > 0.99);

    sleep_secs(600).await;
    assert!(monitor.deals()[0].quality.unwrap().ratio < 0.05);

    cancel.cancel();
    tracking.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_log_stream_is_reopened_after_failures() {
    let (monitor, node) = setup(
        MockNode::new()
            .with_hashrate(100.0)
            .with_failed_opens(3)
            .with_chunks_per_stream(2),
    );
    let cancel = CancellationToken::new();
    let d1 = deal("1", "0xsupplier", 100.0);

    monitor.deal_opened(d1.clone()).unwrap();
    let tracking = spawn_tracking(&monitor, &cancel, &d1, "t1");

    sleep_secs(300).await;
    assert!(node.opens() >= 2);
    let quality = monitor.deals()[0].quality.unwrap();
    assert!(quality.accurate);
    assert!((quality.ratio - 1.0).abs() < 0.01);

    cancel.cancel();
    tracking.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_settlement_does_not_stop_reconciliation() {
    let (monitor, node) = setup(MockNode::new().with_hashrate(100.0));
    node.set_fail_finish(true);
    let cancel = CancellationToken::new();
    let bad = deal("1", "0xbad", 200.0);
    let good = deal("2", "0xgood", 100.0);

    monitor.deal_opened(bad.clone()).unwrap();
    monitor.deal_opened(good.clone()).unwrap();
    let t1 = spawn_tracking(&monitor, &cancel, &bad, "t1");
    let t2 = spawn_tracking(&monitor, &cancel, &good, "t2");

    sleep_secs(480).await;
    monitor.reconcile_all().await;

    let deals = monitor.deals();
    assert_eq!(deals.len(), 1);
    assert_eq!(deals[0].deal_id, good.id);
    assert!(node.finished().is_empty());

    let bad_window = monitor.blacklist_registry().get(&bad.supplier).unwrap();
    assert!(bad_window.lock().blacklisted());
    let good_window = monitor.blacklist_registry().get(&good.supplier).unwrap();
    assert!(good_window.lock().last_success().is_some());

    cancel.cancel();
    t1.await.unwrap().unwrap();
    t2.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_expired_blacklist_is_lifted() {
    let (monitor, node) = setup(MockNode::new());
    let d1 = deal("1", "0xsupplier", 100.0);
    monitor.deal_opened(d1.clone()).unwrap();

    let window = monitor.blacklist_registry().get(&d1.supplier).unwrap();
    window
        .lock()
        .failure_at(Utc::now() - chrono::Duration::hours(2));

    node.set_fail_remove(true);
    monitor.reconcile_all().await;
    assert!(node.removed().is_empty());
    assert!(window.lock().cooldown_until().is_some());

    node.set_fail_remove(false);
    monitor.reconcile_all().await;
    assert_eq!(node.removed(), vec![d1.supplier.clone()]);
    assert!(window.lock().cooldown_until().is_none());
}

#[tokio::test]
async fn test_active_blacklist_is_not_lifted() {
    let (monitor, node) = setup(MockNode::new());
    let d1 = deal("1", "0xsupplier", 100.0);
    monitor.deal_opened(d1.clone()).unwrap();
    monitor
        .blacklist_registry()
        .get(&d1.supplier)
        .unwrap()
        .lock()
        .failure();

    monitor.reconcile_all().await;
    assert!(node.removed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reregistering_deal_drops_processor() {
    let (monitor, _node) = setup(MockNode::new().with_hashrate(100.0));
    let cancel = CancellationToken::new();
    let d1 = deal("1", "0xsupplier", 100.0);

    monitor.deal_opened(d1.clone()).unwrap();
    let tracking = spawn_tracking(&monitor, &cancel, &d1, "t1");
    sleep_secs(20).await;

    monitor.deal_opened(d1.clone()).unwrap();
    tokio::time::timeout(Duration::from_secs(1), tracking)
        .await
        .expect("replaced processor must stop")
        .unwrap()
        .unwrap();

    let deals = monitor.deals();
    assert_eq!(deals.len(), 1);
    assert!(deals[0].task_id.is_none());
    assert_eq!(monitor.suppliers().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_processor_always_passes() {
    let (monitor, node) = setup_with(MockNode::new(), ProcessorFormat::Disabled);
    let cancel = CancellationToken::new();
    let d1 = deal("1", "0xsupplier", 100.0);

    monitor.deal_opened(d1.clone()).unwrap();
    let tracking = spawn_tracking(&monitor, &cancel, &d1, "t1");
    sleep_secs(1).await;

    monitor.reconcile_all().await;
    assert!(node.finished().is_empty());
    assert_eq!(node.opens(), 0);

    cancel.cancel();
    tracking.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_run_blacklists_and_stops_on_cancel() {
    let (monitor, node) = setup(MockNode::new().with_hashrate(50.0));
    let cancel = CancellationToken::new();
    let d1 = deal("1", "0xsupplier", 100.0);
    let d2 = deal("2", "0xother", 50.0);

    monitor.deal_opened(d1.clone()).unwrap();
    monitor.deal_opened(d2.clone()).unwrap();
    let t1 = spawn_tracking(&monitor, &cancel, &d1, "t1");
    let t2 = spawn_tracking(&monitor, &cancel, &d2, "t2");
    let run = tokio::spawn({
        let monitor = monitor.clone();
        let cancel = cancel.clone();
        async move { monitor.run(cancel).await }
    });

    sleep_secs(600).await;
    assert_eq!(node.finished(), vec![(d1.id.clone(), BlacklistTarget::Supplier)]);
    assert_eq!(monitor.deals().len(), 1);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), async {
        run.await.unwrap();
        t1.await.unwrap().unwrap();
        t2.await.unwrap().unwrap();
    })
    .await
    .expect("every loop must stop on cancellation");
}

#[tokio::test(start_paused = true)]
async fn test_run_returns_while_blacklist_removal_hangs() {
    let (monitor, node) = setup(MockNode::new().with_remove_delay(Duration::from_secs(3600)));
    let cancel = CancellationToken::new();
    let d1 = deal("1", "0xsupplier", 100.0);

    monitor.deal_opened(d1.clone()).unwrap();
    monitor
        .blacklist_registry()
        .get(&d1.supplier)
        .unwrap()
        .lock()
        .failure_at(Utc::now() - chrono::Duration::hours(2));

    let run = tokio::spawn({
        let monitor = monitor.clone();
        let cancel = cancel.clone();
        async move { monitor.run(cancel).await }
    });

    // The first pass starts at 10s and blocks on the removal call.
    sleep_secs(11).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(60), run)
        .await
        .expect("run must return while a removal call is pending")
        .unwrap();
    assert!(node.removed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_finish_after_forced_settlement_is_noop() {
    let (monitor, node) = setup(MockNode::new().with_hashrate(50.0));
    let cancel = CancellationToken::new();
    let d1 = deal("1", "0xsupplier", 100.0);

    monitor.deal_opened(d1.clone()).unwrap();
    let tracking = spawn_tracking(&monitor, &cancel, &d1, "t1");

    sleep_secs(480).await;
    monitor.reconcile_all().await;
    assert_eq!(node.finished(), vec![(d1.id.clone(), BlacklistTarget::Supplier)]);

    monitor.finish_deal(&d1).await.unwrap();
    assert_eq!(node.finished(), vec![(d1.id.clone(), BlacklistTarget::Supplier)]);

    tracking.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_finish_deal_settles_once() {
    let (monitor, node) = setup(MockNode::new());
    let d1 = deal("1", "0xsupplier", 100.0);

    monitor.deal_opened(d1.clone()).unwrap();
    monitor.finish_deal(&d1).await.unwrap();
    monitor.finish_deal(&d1).await.unwrap();

    assert_eq!(node.finished(), vec![(d1.id.clone(), BlacklistTarget::Nobody)]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_finish_keeps_processor_running() {
    let (monitor, node) = setup(MockNode::new().with_hashrate(100.0));
    node.set_fail_finish(true);
    let cancel = CancellationToken::new();
    let d1 = deal("1", "0xsupplier", 100.0);

    monitor.deal_opened(d1.clone()).unwrap();
    let tracking = spawn_tracking(&monitor, &cancel, &d1, "t1");
    sleep_secs(30).await;

    assert!(monitor.finish_deal(&d1).await.is_err());
    let deals = monitor.deals();
    assert_eq!(deals.len(), 1);
    assert!(deals[0].task_id.is_some());
    assert!(!tracking.is_finished());

    node.set_fail_finish(false);
    monitor.finish_deal(&d1).await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), tracking)
        .await
        .expect("finish_deal must stop the processor")
        .unwrap()
        .unwrap();
    assert_eq!(node.finished(), vec![(d1.id.clone(), BlacklistTarget::Nobody)]);
}

#[tokio::test(start_paused = true)]
async fn test_pool_reports_catch_lying_logs() {
    let pool = MockPool::new();
    pool.set_hashrate("c1", 40.0);
    let (monitor, node) = setup_with_pool(MockNode::new().with_hashrate(100.0), pool);
    let cancel = CancellationToken::new();
    let d1 = deal("1", "0xsupplier", 100.0);

    monitor.deal_opened(d1.clone()).unwrap();
    let tracking = spawn_tracking(&monitor, &cancel, &d1, "t1");

    // Logs are accurate and fit; the pool signal is still warming up.
    sleep_secs(240).await;
    monitor.reconcile_all().await;
    assert!(node.finished().is_empty());
    let pool_quality = monitor.deals()[0].pool_quality.unwrap();
    assert!(!pool_quality.accurate);

    sleep_secs(240).await;
    let status = &monitor.deals()[0];
    assert!((status.quality.unwrap().ratio - 1.0).abs() < 0.01);
    assert!(status.pool_quality.unwrap().accurate);
    assert!((status.pool_quality.unwrap().ratio - 0.4).abs() < 0.01);

    monitor.reconcile_all().await;
    assert_eq!(node.finished(), vec![(d1.id.clone(), BlacklistTarget::Supplier)]);
    tracking.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_fitting_pool_reports_keep_deal() {
    let pool = MockPool::new();
    pool.set_hashrate("c1", 100.0);
    let (monitor, node) = setup_with_pool(MockNode::new().with_hashrate(100.0), pool);
    let cancel = CancellationToken::new();
    let d1 = deal("1", "0xsupplier", 100.0);

    monitor.deal_opened(d1.clone()).unwrap();
    let tracking = spawn_tracking(&monitor, &cancel, &d1, "t1");

    sleep_secs(480).await;
    monitor.reconcile_all().await;
    assert!(node.finished().is_empty());

    cancel.cancel();
    tracking.await.unwrap().unwrap();
}

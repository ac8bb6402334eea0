mod common;

use std::{num::NonZeroUsize, time::Duration};

use actor::{
    ActorConfig, ActorErr, Collector,
    checkpoint::CheckpointWatcher,
    dispatch::{Backpressure, dispatch_queue},
    env::{EnvPool, Environment, WorkerPool},
    policy::LinearPolicy,
};
use common::{Crash, Hang, Recorded, counters};
use ndarray::{Array2, s};
use rand::{SeedableRng, rngs::StdRng};
use tokio::sync::watch;

fn config(workers: usize, horizon: usize) -> ActorConfig {
    ActorConfig {
        num_envs: workers,
        num_threads: 2,
        horizon,
        obs_dim: 2,
        num_actions: 2,
        max_global_steps: workers * horizon,
        ..Default::default()
    }
}

fn pool(envs: Vec<Box<dyn Environment>>, barrier_timeout: Option<Duration>) -> EnvPool {
    EnvPool::new(envs, NonZeroUsize::new(2).unwrap(), barrier_timeout).unwrap()
}

fn collector(
    config: &ActorConfig,
    envs: Vec<Box<dyn Environment>>,
) -> Collector<LinearPolicy, EnvPool, StdRng> {
    Collector::new(
        LinearPolicy::new(config.obs_dim, config.num_actions),
        pool(envs, Some(Duration::from_secs(5))),
        StdRng::seed_from_u64(0),
        config,
    )
    .unwrap()
}

#[tokio::test]
async fn one_cycle_enqueues_one_batch_with_a_bootstrap_row() {
    let config = config(4, 5);
    let mut collector = collector(&config, counters(4, 100, 1.0));
    let dir = tempfile::tempdir().unwrap();
    let mut watcher = CheckpointWatcher::new(dir.path());
    let (queue, mut source) = dispatch_queue(NonZeroUsize::new(4).unwrap(), Backpressure::Block);

    let metrics = collector.run(&queue, &mut watcher).await.unwrap();
    queue.finish();
    collector.stop().await;

    assert_eq!(metrics.global_step, 20);
    assert_eq!(metrics.batches, 1);

    let batch = source.next().await.unwrap();
    assert!(source.next().await.is_none());

    assert_eq!(batch.states.dim(), (6, 4, 2));
    assert_eq!(batch.rewards.dim(), (5, 4));
    assert_eq!(batch.done_mask.dim(), (5, 4));
    assert_eq!(batch.actions.dim(), (5, 4, 2));
    assert_eq!(batch.values.dim(), (5, 4));

    // Row t holds the observation the policy acted on at step t.
    for t in 0..=5 {
        for w in 0..4 {
            assert_eq!(batch.states[[t, w, 0]], t as f32);
            assert_eq!(batch.states[[t, w, 1]], w as f32);
        }
    }

    assert_eq!(
        batch.states.slice(s![5, .., ..]),
        collector.observations().view()
    );
    assert!(batch.actions.sum_axis(ndarray::Axis(2)).iter().all(|&n| n == 1.0));
}

#[tokio::test]
async fn episode_counters_reset_exactly_on_done() {
    let config = config(2, 5);
    let recorded = Recorded::default();
    let mut collector = collector(&config, counters(2, 3, 2.0)).with_sink(recorded.clone());

    let batch = collector.collect().await.unwrap();
    collector.stop().await;

    let expected_mask = Array2::from_shape_fn((5, 2), |(t, _)| if t == 2 { 0.0 } else { 1.0 });
    assert_eq!(batch.done_mask, expected_mask);
    assert!(batch.rewards.iter().all(|&r| r == 1.0));

    let summaries = recorded.0.lock();
    assert_eq!(summaries.len(), 2);
    for summary in summaries.iter() {
        assert_eq!(summary.length, 3);
        assert_eq!(summary.reward, 6.0);
        assert_eq!(summary.global_step, 6);
        assert_eq!(summary.action_counts.iter().sum::<usize>(), 3);
    }

    assert_eq!(collector.metrics().episodes, 2);
}

#[tokio::test]
async fn step_budget_bounds_the_run() {
    let mut config = config(2, 3);
    config.max_global_steps = 2 * 3 * 4;
    let mut collector = collector(&config, counters(2, 10, 1.0));
    let dir = tempfile::tempdir().unwrap();
    let mut watcher = CheckpointWatcher::new(dir.path());
    let (queue, mut source) = dispatch_queue(NonZeroUsize::new(8).unwrap(), Backpressure::Block);

    let metrics = collector.run(&queue, &mut watcher).await.unwrap();
    drop(queue);
    collector.stop().await;

    assert_eq!(metrics.global_step, 24);
    assert_eq!(metrics.batches, 4);
    assert!(!metrics.queue_closed);

    let mut received = 0;
    while source.next().await.is_some() {
        received += 1;
    }
    assert_eq!(received, 4);
}

#[tokio::test]
async fn closed_queue_stops_collection() {
    let mut config = config(2, 3);
    config.max_global_steps = usize::MAX;
    let mut collector = collector(&config, counters(2, 10, 1.0));
    let dir = tempfile::tempdir().unwrap();
    let mut watcher = CheckpointWatcher::new(dir.path());
    let (queue, source) = dispatch_queue(NonZeroUsize::new(1).unwrap(), Backpressure::Block);
    source.close();

    let metrics = collector.run(&queue, &mut watcher).await.unwrap();
    collector.stop().await;

    assert!(metrics.queue_closed);
    assert_eq!(metrics.batches, 0);
}

#[tokio::test]
async fn shutdown_waits_for_the_horizon_boundary() {
    let mut config = config(2, 3);
    config.max_global_steps = usize::MAX;
    let mut collector = collector(&config, counters(2, 10, 1.0));
    let dir = tempfile::tempdir().unwrap();
    let mut watcher = CheckpointWatcher::new(dir.path());
    let (queue, _source) = dispatch_queue(NonZeroUsize::new(1).unwrap(), Backpressure::DropOldest);

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();
    });

    let metrics = collector.run_until(&queue, &mut watcher, stop_rx).await.unwrap();
    collector.stop().await;

    assert!(metrics.interrupted);
    assert!(!metrics.queue_closed);
    assert!(metrics.global_step > 0);
    assert_eq!(metrics.global_step % (2 * 3), 0);
    assert_eq!(metrics.batches, metrics.global_step / (2 * 3));
}

#[tokio::test]
async fn shutdown_discards_a_batch_waiting_for_room() {
    let mut config = config(2, 3);
    config.max_global_steps = usize::MAX;
    let mut collector = collector(&config, counters(2, 10, 1.0));
    let dir = tempfile::tempdir().unwrap();
    let mut watcher = CheckpointWatcher::new(dir.path());
    let (queue, _source) = dispatch_queue(NonZeroUsize::new(1).unwrap(), Backpressure::Block);

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        stop_tx.send(true).unwrap();
    });

    let metrics = collector.run_until(&queue, &mut watcher, stop_rx).await.unwrap();
    collector.stop().await;

    assert!(metrics.interrupted);
    assert_eq!(metrics.batches, 1);
    assert_eq!(metrics.global_step, 2 * 2 * 3);
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn hung_worker_blocks_the_barrier_without_a_timeout() {
    let mut envs = counters(1, 10, 1.0);
    envs.push(Box::new(Hang));
    let mut pool = pool(envs, None);

    pool.submit_actions(&[0, 0]).unwrap();
    let waited = tokio::time::timeout(Duration::from_millis(200), pool.await_completion()).await;
    assert!(waited.is_err());
}

#[tokio::test]
async fn hung_worker_times_out_with_a_barrier_timeout() {
    let mut envs = counters(1, 10, 1.0);
    envs.push(Box::new(Hang));
    let mut pool = pool(envs, Some(Duration::from_millis(100)));

    pool.submit_actions(&[0, 0]).unwrap();
    let err = pool.await_completion().await.unwrap_err();

    let ActorErr::BarrierTimeout {
        step,
        waited,
        pending,
    } = err
    else {
        panic!("expected a barrier timeout, got {err}");
    };
    assert_eq!((step, pending), (0, 1));
    assert!(waited >= Duration::from_millis(100));
}

#[tokio::test]
async fn crashed_worker_is_reported() {
    let mut envs = counters(1, 10, 1.0);
    envs.push(Box::new(Crash));
    let mut pool = pool(envs, Some(Duration::from_secs(5)));

    pool.submit_actions(&[1, 1]).unwrap();
    let err = pool.await_completion().await.unwrap_err();
    assert!(matches!(err, ActorErr::WorkerCrashed { worker: 1 }));
}

#[tokio::test]
async fn slots_reflect_the_last_step() {
    let mut pool = pool(counters(3, 2, 0.5), None);
    assert_eq!(pool.initial_observations().dim(), (3, 2));

    pool.submit_actions(&[1, 0, 1]).unwrap();
    pool.await_completion().await.unwrap();

    let slots = pool.shared_slots();
    assert_eq!(slots.len(), 3);
    for (w, slot) in slots.iter().enumerate() {
        assert_eq!(slot.observation, vec![1.0, w as f32]);
        assert_eq!(slot.reward, 0.5);
        assert!(!slot.done);
        assert_eq!(slot.action, [1, 0, 1][w]);
    }

    pool.submit_actions(&[0, 0, 0]).unwrap();
    pool.await_completion().await.unwrap();
    assert!(pool.shared_slots().iter().all(|slot| slot.done));
    pool.stop().await;
}

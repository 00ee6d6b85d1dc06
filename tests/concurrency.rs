use std::sync::Arc;
use std::time::Duration;

use psu_control_lib::serial::SimulatedSupply;
use psu_control_lib::DeviceManager;

const FOREGROUND_TASKS: usize = 4;
const READS_PER_TASK: usize = 200;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn poller_and_foreground_never_interleave() {
    let sim = SimulatedSupply::new();
    sim.set_voltage(7.25);
    sim.set_current(0.5);
    sim.set_powered(true);

    let manager = Arc::new(DeviceManager::with_opener(Arc::new(sim.clone())));
    manager.open("/dev/ttyUSB0").await.unwrap();
    manager.start_monitoring_every(Duration::from_millis(1)).await;

    let mut tasks = Vec::new();
    for _ in 0..FOREGROUND_TASKS {
        let manager = manager.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..READS_PER_TASK {
                assert_eq!(manager.read_voltage().await.unwrap(), 7.25);
                assert!(manager.is_on().await.unwrap());
                assert_eq!(manager.read_current().await.unwrap(), 0.5);
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    manager.shutdown().await;
    assert_eq!(sim.overlapping_exchanges(), 0);
    assert!(sim.received().len() >= FOREGROUND_TASKS * READS_PER_TASK * 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_while_monitoring_is_safe() {
    let sim = SimulatedSupply::new();
    sim.set_current(1.5);

    let manager = Arc::new(DeviceManager::with_opener(Arc::new(sim.clone())));
    manager.open("COM3").await.unwrap();
    manager.start_monitoring_every(Duration::from_millis(1)).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    manager.supply().close().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(manager.is_monitoring().await, "the loop keeps running on a closed port");

    let sent = sim.received().len();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(sim.received().len(), sent);

    manager.stop_monitoring().await;
}

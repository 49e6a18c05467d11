//! Poll timer
//!
//! Runs one control cycle, then sleeps for the period the controller asks
//! for. The service lock is held for the whole cycle so client requests
//! never interleave with a poll.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info};

use tpf_core::FanService;

pub async fn run_control_loop(service: Arc<Mutex<FanService>>) {
    info!("Fan control loop starting");
    let mut iteration: u64 = 0;
    loop {
        iteration += 1;
        let next_poll = run_cycle(&service).await;
        debug!(iteration, next_poll_ms = next_poll.as_millis() as u64, "Control cycle done");
        tokio::time::sleep(next_poll).await;
    }
}

/// Single poll under the service lock; returns the delay until the next one
async fn run_cycle(service: &Mutex<FanService>) -> Duration {
    let mut service = service.lock().await;
    service.poll(Instant::now()).next_poll
}

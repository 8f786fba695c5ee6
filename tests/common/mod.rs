#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_gateway::{ClientOptions, Gateway, Sleeper};
use async_trait::async_trait;

/// Records requested delays and returns immediately.
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}

pub fn options_for(base_url: &str, sleeper: Arc<RecordingSleeper>) -> ClientOptions {
    ClientOptions::new("gw_test")
        .with_base_url(base_url)
        .with_sleeper(sleeper)
}

pub fn gateway_for(base_url: &str) -> (Gateway, Arc<RecordingSleeper>) {
    let sleeper = Arc::new(RecordingSleeper::default());
    let gateway = Gateway::new(options_for(base_url, sleeper.clone()))
        .expect("failed to create gateway client");
    (gateway, sleeper)
}

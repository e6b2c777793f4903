#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper"
)]

use std::time::Duration;

use broadcast_client::{Callbacks, ErrorEvent};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

/// Longest a test waits for a callback.
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Something a client handed to its handler.
#[derive(Debug)]
pub enum Recorded {
    Update(Value),
    Error(ErrorEvent),
}

/// Callback invocations, in order.
pub struct Recording {
    rx: mpsc::UnboundedReceiver<Recorded>,
}

impl Recording {
    pub async fn next(&mut self) -> Recorded {
        timeout(CALLBACK_TIMEOUT, self.rx.recv())
            .await
            .expect("no callback within timeout")
            .expect("client dropped its handler")
    }

    /// A callback that already happened, without waiting.
    pub fn try_next(&mut self) -> Option<Recorded> {
        self.rx.try_recv().ok()
    }

    /// Skip error events until the next update.
    pub async fn next_update(&mut self) -> Value {
        loop {
            if let Recorded::Update(data) = self.next().await {
                return data;
            }
        }
    }

    /// Skip updates until the next error event.
    pub async fn next_error(&mut self) -> ErrorEvent {
        loop {
            if let Recorded::Error(event) = self.next().await {
                return event;
            }
        }
    }
}

/// A handler forwarding every callback to the returned [`Recording`].
pub fn recording_handler() -> (Callbacks, Recording) {
    init_tracing();

    let (tx, rx) = mpsc::unbounded_channel();
    let errors = tx.clone();
    let handler = Callbacks::new()
        .with_update(move |data| {
            drop(tx.send(Recorded::Update(data)));
            Ok(())
        })
        .with_error(move |event| {
            drop(errors.send(Recorded::Error(event.clone())));
        });

    (handler, Recording { rx })
}

/// Log through `RUST_LOG` when set.
pub fn init_tracing() {
    _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

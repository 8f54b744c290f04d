//! Common test utilities.
//!
//! Shared helpers for integration tests. Import with `mod common;` in
//! test files.

use groupcast::{Action, ActionKind, Connection, GcsConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

static CHANNEL_SEQ: AtomicUsize = AtomicUsize::new(0);

/// A channel name unique within this test process.
pub fn unique_channel(prefix: &str) -> String {
    let n = CHANNEL_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{n}", std::process::id())
}

/// Open a named member on `channel` with the given configuration.
pub fn open_node(name: &str, channel: &str, config: GcsConfig) -> Connection {
    let conn = Connection::create(&format!("dummy://{name}"), config).expect("create connection");
    conn.open(channel).expect("open channel");
    conn
}

/// Receive until an action of `kind` arrives, returning it.
pub fn recv_until(conn: &Connection, kind: ActionKind) -> Action {
    loop {
        let action = conn.recv().expect("recv");
        if action.kind == kind {
            return action;
        }
    }
}

/// Consume actions until the first CONF, which marks the configuration
/// installed.
pub fn wait_conf(conn: &Connection) -> Action {
    recv_until(conn, ActionKind::Conf)
}

/// Poll `cond` until it holds or the timeout elapses.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

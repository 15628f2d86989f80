//! Time source.
use std::{
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

use lazy_static::lazy_static;

struct TimeSource {
    timestamp: Mutex<i64>,
}

lazy_static! {
    static ref TIME_SOURCE: TimeSource = TimeSource {
        timestamp: Mutex::new(0),
    };
}

/// Returns the number of seconds since the UNIX epoch. The time returned
/// is guaranteed to never decrease within the process.
///
/// The returned timestamp MUST NOT be trusted in any way, as the underlying
/// time source is reliant on the host operating system.
pub fn insecure_posix_time() -> i64 {
    let mut last = TIME_SOURCE.timestamp.lock().unwrap();

    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
    let now = now.as_secs() as i64;

    if now < *last {
        panic!("time: clock appeared to have ran backwards")
    }
    *last = now;

    *last
}

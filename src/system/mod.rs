pub mod timeout;
pub use timeout::timeout;

use std::time::Duration;

use smol::Timer;

/// Sleep for a given number of seconds.
pub async fn sleep(seconds: u64) {
    Timer::after(Duration::from_secs(seconds)).await;
}

/// Sleep for a given number of milliseconds.
pub async fn msleep(millis: u64) {
    Timer::after(Duration::from_millis(millis)).await;
}

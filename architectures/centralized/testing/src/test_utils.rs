use std::future::Future;
use std::time::Duration;

use escrow_lending_core::WalletAddress;

pub async fn assert_with_retries<T, F, Fut>(mut function: F, y: T)
where
    T: PartialEq + std::fmt::Debug,
    Fut: Future<Output = T>,
    F: FnMut() -> Fut,
{
    let retry_attempts: u64 = 15;
    let mut result;
    for attempt in 1..=retry_attempts {
        result = function().await;
        if result == y {
            return;
        } else if attempt == retry_attempts {
            panic!("assertion failed {:?} != {:?}", result, y);
        } else {
            tokio::time::sleep(Duration::from_millis(50 * attempt)).await;
        }
    }
}

pub fn address(s: &str) -> WalletAddress {
    s.parse().expect("test address is valid")
}

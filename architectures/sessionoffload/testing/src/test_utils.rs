use std::future::Future;
use std::net::TcpListener;
use std::time::Duration;

use anyhow::Result;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// An address nothing listens on: bound once to reserve it, then released.
pub fn unused_addr() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr.to_string())
}

pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

pub async fn assert_with_retries<T, F, Fut>(function: F, y: T)
where
    T: PartialEq + std::fmt::Debug,
    Fut: Future<Output = T>,
    F: FnMut() -> Fut,
{
    let res = with_retries(function, y).await;
    assert!(res);
}

pub async fn with_retries<T, F, Fut>(mut function: F, y: T) -> bool
where
    T: PartialEq + std::fmt::Debug,
    Fut: Future<Output = T>,
    F: FnMut() -> Fut,
{
    let retry_attempts: u64 = 50;
    let mut result;
    for attempt in 1..=retry_attempts {
        result = function().await;
        if result == y {
            return true;
        } else if attempt == retry_attempts {
            eprintln!("assertion failed, got: {result:?} but expected: {y:?}");
            return false;
        } else {
            tokio::time::sleep(Duration::from_millis(10 * attempt)).await;
        }
    }
    false
}

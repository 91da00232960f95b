//! Повторные попытки с отменой
//!
//! Пауза между попытками не блокирует поток: это `tokio::time::sleep`,
//! который прерывается токеном отмены запуска.

use std::fmt::Display;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use crate::config::RetryPolicy;

/// Итог неудачной серии попыток
#[derive(Debug)]
pub enum RetryError<E> {
    /// Все попытки исчерпаны
    Exhausted { attempts: u32, last: E },
    /// Запуск отменён
    Cancelled,
}

/// Выполнить операцию не более `policy.max_attempts` раз.
///
/// Возвращает результат и номер удачной попытки (с 1).
pub async fn retry_with_policy<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut operation: F,
) -> Result<(T, u32), RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            outcome = operation(attempt) => outcome,
        };

        let error = match outcome {
            Ok(value) => return Ok((value, attempt)),
            Err(error) => error,
        };

        if attempt >= max_attempts {
            log::warn!("{}: attempt {}/{} failed: {}; giving up", label, attempt, max_attempts, error);
            return Err(RetryError::Exhausted { attempts: attempt, last: error });
        }

        let delay = policy.delay_for(attempt);
        log::warn!(
            "{}: attempt {}/{} failed: {}; retrying in {:.1}s",
            label,
            attempt,
            max_attempts,
            error,
            delay.as_secs_f64()
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    }
}

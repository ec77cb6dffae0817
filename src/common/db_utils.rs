use std::future::Future;

use crate::common::error::AppError;

// ---
// Helper de concorrência: uma nova tentativa em caso de conflito
// ---
/// Executa `op`; se falhar com `AppError::Conflict`, executa de novo exatamente uma vez.
/// Na segunda tentativa a operação relê o estado, então um conflito real vira
/// o erro de negócio correspondente (transição inválida, token já usado...).
pub(crate) async fn retry_on_conflict<T, F, Fut>(mut op: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    match op().await {
        Err(e) if e.is_conflict() => {
            tracing::warn!("Conflito de concorrência, tentando novamente: {}", e);
            op().await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn conflict_is_retried_once() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), AppError> = retry_on_conflict(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::Conflict("requisição".into()))
        })
        .await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), AppError> = retry_on_conflict(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::TokenNotFound)
        })
        .await;
        assert!(matches!(result, Err(AppError::TokenNotFound)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_attempt_can_succeed() {
        let calls = AtomicUsize::new(0);
        let result = retry_on_conflict(|| async {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(AppError::Conflict("cotação".into())),
                n => Ok(n),
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
    }
}

use crate::domain::model::{Completion, Message};
use crate::domain::ports::CompletionService;
use crate::utils::error::{MettaError, Result};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Shrink the response budget to 90% after each context overflow.
pub fn reduce_budget(budget: u32) -> u32 {
    (budget as u64 * 9 / 10) as u32
}

#[derive(Debug)]
enum AskState {
    Attempting { attempt: u32, budget: u32 },
    Succeeded(Vec<Completion>),
    Failed(MettaError),
}

/// Asks the model, shrinking the response budget whenever the service reports
/// a context overflow. Any other error ends the loop right away.
pub async fn ask_with_retry<C: CompletionService + ?Sized>(
    service: &C,
    model: &str,
    initial_budget: u32,
    messages: &[Message],
    max_attempts: u32,
) -> Result<Vec<Completion>> {
    let mut state = AskState::Attempting {
        attempt: 0,
        budget: initial_budget,
    };

    loop {
        state = match state {
            AskState::Attempting { attempt, budget } if attempt >= max_attempts => {
                AskState::Failed(MettaError::RetriesExhausted {
                    attempts: attempt,
                    last_budget: budget,
                })
            }
            AskState::Attempting { attempt, budget } => {
                tracing::debug!("Attempt {} with {} response tokens", attempt, budget);
                match service.complete(model, budget, messages).await {
                    Ok(completions) => AskState::Succeeded(completions),
                    Err(e) if e.is_context_overflow() => {
                        tracing::info!("Exceeded token length.. reducing request size.");
                        AskState::Attempting {
                            attempt: attempt + 1,
                            budget: reduce_budget(budget),
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Completion service error: {}", e);
                        AskState::Failed(e)
                    }
                }
            }
            AskState::Succeeded(completions) => return Ok(completions),
            AskState::Failed(e) => return Err(e),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::FinishReason;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned outcomes and remembers the budget of every call.
    struct ScriptedService {
        outcomes: Mutex<VecDeque<Result<Vec<Completion>>>>,
        budgets: Mutex<Vec<u32>>,
    }

    impl ScriptedService {
        fn new(outcomes: Vec<Result<Vec<Completion>>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                budgets: Mutex::new(Vec::new()),
            }
        }

        fn budgets(&self) -> Vec<u32> {
            self.budgets.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionService for ScriptedService {
        async fn complete(
            &self,
            _model: &str,
            max_response_tokens: u32,
            _messages: &[Message],
        ) -> Result<Vec<Completion>> {
            self.budgets.lock().unwrap().push(max_response_tokens);
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .expect("no more scripted outcomes")
        }
    }

    fn overflow() -> Result<Vec<Completion>> {
        Err(MettaError::ContextLengthExceeded { max_tokens: 0 })
    }

    fn success() -> Result<Vec<Completion>> {
        Ok(vec![Completion::new("1. Q?\n- A", FinishReason::Stop)])
    }

    #[tokio::test]
    async fn test_succeeds_first_time() {
        let service = ScriptedService::new(vec![success()]);
        let result = ask_with_retry(&service, "m", 1000, &[], DEFAULT_MAX_ATTEMPTS).await;
        assert_eq!(result.unwrap().len(), 1);
        assert_eq!(service.budgets(), vec![1000]);
    }

    #[tokio::test]
    async fn test_reduces_budget_on_overflow() {
        let service = ScriptedService::new(vec![overflow(), overflow(), success()]);
        let result = ask_with_retry(&service, "m", 3992, &[], DEFAULT_MAX_ATTEMPTS).await;
        assert!(result.is_ok());
        // 3992 -> 3592 -> 3232
        assert_eq!(service.budgets(), vec![3992, 3592, 3232]);
    }

    #[tokio::test]
    async fn test_gives_up_after_five_overflows() {
        let service = ScriptedService::new((0..6).map(|_| overflow()).collect());
        let result = ask_with_retry(&service, "m", 1000, &[], DEFAULT_MAX_ATTEMPTS).await;
        match result {
            Err(MettaError::RetriesExhausted {
                attempts,
                last_budget,
            }) => {
                assert_eq!(attempts, 5);
                assert_eq!(last_budget, 590);
            }
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
        assert_eq!(service.budgets(), vec![1000, 900, 810, 729, 656]);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let service = ScriptedService::new(vec![
            Err(MettaError::Upstream {
                status: 429,
                code: "rate_limit_exceeded".to_string(),
                message: "Rate limit reached".to_string(),
            }),
            success(),
        ]);
        let result = ask_with_retry(&service, "m", 1000, &[], DEFAULT_MAX_ATTEMPTS).await;
        match result {
            Err(MettaError::Upstream { status, code, .. }) => {
                assert_eq!(status, 429);
                assert_eq!(code, "rate_limit_exceeded");
            }
            other => panic!("expected Upstream, got {:?}", other),
        }
        assert_eq!(service.budgets(), vec![1000]);
    }

    #[test]
    fn test_reduce_budget_rounds_down() {
        assert_eq!(reduce_budget(1000), 900);
        assert_eq!(reduce_budget(729), 656);
        assert_eq!(reduce_budget(1), 0);
    }
}

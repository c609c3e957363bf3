//! Race several calls, keep the first success
//!
//! Every candidate runs in its own task and reports into a channel with
//! room for all of them, so a candidate that finishes after the race is
//! decided never blocks; its result is simply dropped. Candidates are not
//! cancelled. Bound their lifetime with a timeout of their own.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;

/// The candidate that answered first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Winner<T> {
    /// Position in the candidate list
    pub index: usize,
    pub value: T,
}

/// Why no candidate won
#[derive(Debug)]
pub enum RaceError<E> {
    /// Nothing to race
    NoCandidates,
    /// Deadline passed; holds the failures seen so far
    Timeout {
        deadline: Duration,
        failures: Vec<(usize, E)>,
    },
    /// Every candidate failed before the deadline
    AllFailed { failures: Vec<(usize, E)> },
}

impl<E> RaceError<E> {
    /// Failures collected before the race was decided, by candidate index
    pub fn failures(&self) -> &[(usize, E)] {
        match self {
            Self::NoCandidates => &[],
            Self::Timeout { failures, .. } | Self::AllFailed { failures } => failures,
        }
    }
}

impl<E> fmt::Display for RaceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCandidates => write!(f, "no candidates"),
            Self::Timeout { deadline, failures } => write!(
                f,
                "no success within {deadline:?} ({} failed)",
                failures.len()
            ),
            Self::AllFailed { failures } => write!(f, "all {} candidates failed", failures.len()),
        }
    }
}

impl<E: fmt::Debug> std::error::Error for RaceError<E> {}

/// Run all `candidates` concurrently and return the first `Ok`.
///
/// Returns as soon as one candidate succeeds, as soon as all of them have
/// failed, or when `deadline` elapses, whichever comes first.
pub async fn first_success<T, E, F>(
    candidates: Vec<F>,
    deadline: Duration,
) -> Result<Winner<T>, RaceError<E>>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let total = candidates.len();
    if total == 0 {
        return Err(RaceError::NoCandidates);
    }

    let (tx, mut rx) = mpsc::channel(total);
    for (index, candidate) in candidates.into_iter().enumerate() {
        let tx = tx.clone();
        tokio::spawn(async move {
            let outcome = candidate.await;
            // One slot per candidate: never full, only closed once decided.
            let _ = tx.try_send((index, outcome));
        });
    }
    drop(tx);

    let timer = tokio::time::sleep(deadline);
    tokio::pin!(timer);

    let mut failures = Vec::new();
    loop {
        tokio::select! {
            biased;

            received = rx.recv() => match received {
                Some((index, Ok(value))) => return Ok(Winner { index, value }),
                Some((index, Err(err))) => {
                    failures.push((index, err));
                    if failures.len() == total {
                        return Err(RaceError::AllFailed { failures });
                    }
                }
                // A candidate panicked and no one is left to report
                None => return Err(RaceError::AllFailed { failures }),
            },
            () = &mut timer => return Err(RaceError::Timeout { deadline, failures }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use futures::future::BoxFuture;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{Instant, sleep};

    type Candidate = BoxFuture<'static, Result<u32, &'static str>>;

    fn after(ms: u64, outcome: Result<u32, &'static str>) -> Candidate {
        async move {
            sleep(Duration::from_millis(ms)).await;
            outcome
        }
        .boxed()
    }

    fn never() -> Candidate {
        std::future::pending().boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn test_fastest_success_wins() {
        let winner = first_success(
            vec![after(30, Ok(1)), after(10, Ok(2)), after(20, Ok(3))],
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(winner, Winner { index: 1, value: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_decide() {
        let winner = first_success(
            vec![after(5, Err("down")), after(15, Ok(7)), after(1, Err("down"))],
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(winner.index, 1);
        assert_eq!(winner.value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_failed_returns_early() {
        let start = Instant::now();
        let err = first_success(
            vec![after(5, Err("a")), after(10, Err("b"))],
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(matches!(err, RaceError::AllFailed { .. }));
        let mut failed: Vec<usize> = err.failures().iter().map(|(i, _)| *i).collect();
        failed.sort_unstable();
        assert_eq!(failed, vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_the_wait() {
        let start = Instant::now();
        let err = first_success(
            vec![never(), after(10, Err("refused")), never()],
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(start.elapsed() >= Duration::from_secs(1));
        match err {
            RaceError::Timeout { deadline, failures } => {
                assert_eq!(deadline, Duration::from_secs(1));
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].0, 1);
            }
            other => panic!("expected timeout, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_no_candidates() {
        let err = first_success(Vec::<Candidate>::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RaceError::NoCandidates));
        assert!(err.failures().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_losers_run_to_completion() {
        let finished = Arc::new(AtomicUsize::new(0));
        let candidates: Vec<Candidate> = [1u64, 50, 100]
            .into_iter()
            .map(|ms| {
                let finished = Arc::clone(&finished);
                async move {
                    sleep(Duration::from_millis(ms)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(0)
                }
                .boxed()
            })
            .collect();

        let winner = first_success(candidates, Duration::from_secs(1)).await.unwrap();
        assert_eq!(winner.index, 0);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 3);
    }
}

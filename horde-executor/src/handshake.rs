//! Handshake state
//!
//! Holds the two single-fulfillment slots an executor fills while talking to
//! its miner: the initial job request, then the full job payload. Each slot
//! has its own lock so that checking and filling one never contends with
//! the other, and a filled slot is never overwritten.

use horde_core::protocol::{InitialJobRequest, JobRequest};
use std::sync::OnceLock;
use tokio::sync::{Mutex, Notify};
use tracing::debug;
use uuid::Uuid;

use crate::error::HandshakeError;

/// A value that is set at most once and can be awaited by any number of tasks
pub struct Slot<T> {
    lock: Mutex<()>,
    value: OnceLock<T>,
    filled: Notify,
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            value: OnceLock::new(),
            filled: Notify::new(),
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.value.get()
    }

    pub fn is_filled(&self) -> bool {
        self.value.get().is_some()
    }

    /// Fills the slot under its own lock and wakes every waiter
    ///
    /// Hands the value back if the slot was already filled.
    pub async fn try_fill(&self, value: T) -> Result<(), T> {
        let _guard = self.lock.lock().await;
        if self.value.get().is_some() {
            return Err(value);
        }
        self.value.set(value)?;
        self.filled.notify_waiters();
        Ok(())
    }

    /// Waits until the slot is filled
    pub async fn wait(&self) -> &T {
        loop {
            // Registered before the check so a fill in between is not missed
            let notified = self.filled.notified();
            if let Some(value) = self.value.get() {
                return value;
            }
            notified.await;
        }
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-connection handshake for exactly one job
#[derive(Default)]
pub struct HandshakeState {
    initial: Slot<InitialJobRequest>,
    payload: Slot<JobRequest>,
}

impl HandshakeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity of the job, known once the initial job request is accepted
    pub fn job_uuid(&self) -> Result<Uuid, HandshakeError> {
        self.initial
            .get()
            .map(|msg| msg.job_uuid)
            .ok_or(HandshakeError::NotInitialized)
    }

    /// Accepts the initial job request, exactly once
    pub async fn submit_initial(&self, msg: InitialJobRequest) -> Result<(), HandshakeError> {
        let received = msg.job_uuid;

        self.initial.try_fill(msg).await.map_err(|_| {
            HandshakeError::DuplicateMessage {
                kind: "initial job request",
                first: self.initial.get().map_or(received, |first| first.job_uuid),
                received,
            }
        })?;

        debug!("Received initial job request: job_uuid={}", received);
        Ok(())
    }

    /// Accepts the full job payload, exactly once and only after the initial request
    pub async fn submit_payload(&self, msg: JobRequest) -> Result<(), HandshakeError> {
        let received = msg.job_uuid;

        let Some(initial) = self.initial.get() else {
            return Err(HandshakeError::OutOfOrderMessage { job_uuid: received });
        };

        let duplicate = HandshakeError::DuplicateMessage {
            kind: "full job payload request",
            first: initial.job_uuid,
            received,
        };
        if self.payload.is_filled() {
            return Err(duplicate);
        }

        if received != initial.job_uuid {
            return Err(HandshakeError::MismatchedJob {
                expected: initial.job_uuid,
                received,
            });
        }

        self.payload.try_fill(msg).await.map_err(|_| duplicate)?;

        debug!("Received full job payload request: job_uuid={}", received);
        Ok(())
    }

    /// Waits for the initial job request. Blocks forever if it never comes.
    pub async fn wait_initial(&self) -> &InitialJobRequest {
        self.initial.wait().await
    }

    /// Waits for the full job payload
    pub async fn wait_payload(&self) -> &JobRequest {
        self.payload.wait().await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    pub(crate) fn initial_request(job_uuid: Uuid) -> InitialJobRequest {
        InitialJobRequest {
            job_uuid,
            executor_class: "spin_up-4min.gpu-24gb".to_string(),
            docker_image: "alpine:latest".to_string(),
            timeout_seconds: Some(30),
            volume: None,
            streaming_details: None,
        }
    }

    pub(crate) fn job_request(job_uuid: Uuid) -> JobRequest {
        JobRequest {
            job_uuid,
            docker_image: "alpine:latest".to_string(),
            args: vec!["echo".to_string(), "hello".to_string()],
            env: HashMap::new(),
            volume: None,
            output_upload: None,
            artifacts_dir: None,
        }
    }

    #[tokio::test]
    async fn test_initial_then_payload() {
        let state = HandshakeState::new();
        let job_uuid = Uuid::new_v4();

        assert_eq!(state.job_uuid(), Err(HandshakeError::NotInitialized));

        state.submit_initial(initial_request(job_uuid)).await.unwrap();
        assert_eq!(state.job_uuid(), Ok(job_uuid));

        state.submit_payload(job_request(job_uuid)).await.unwrap();
        assert_eq!(state.payload.get().unwrap().job_uuid, job_uuid);
        assert_eq!(state.job_uuid(), Ok(job_uuid));
    }

    #[tokio::test]
    async fn test_duplicate_initial_keeps_first() {
        let state = HandshakeState::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        state.submit_initial(initial_request(first)).await.unwrap();
        let err = state.submit_initial(initial_request(second)).await.unwrap_err();

        assert_eq!(
            err,
            HandshakeError::DuplicateMessage {
                kind: "initial job request",
                first,
                received: second,
            }
        );
        assert_eq!(state.job_uuid(), Ok(first));
        assert_eq!(state.initial.get().unwrap().job_uuid, first);
    }

    #[tokio::test]
    async fn test_duplicate_payload_keeps_first() {
        let state = HandshakeState::new();
        let job_uuid = Uuid::new_v4();
        state.submit_initial(initial_request(job_uuid)).await.unwrap();

        state.submit_payload(job_request(job_uuid)).await.unwrap();

        let mut second = job_request(job_uuid);
        second.args = vec!["rm".to_string(), "-rf".to_string()];
        let err = state.submit_payload(second).await.unwrap_err();

        assert!(matches!(err, HandshakeError::DuplicateMessage { .. }));
        assert_eq!(state.payload.get().unwrap().args, vec!["echo", "hello"]);
    }

    #[tokio::test]
    async fn test_payload_before_initial_is_rejected() {
        let state = HandshakeState::new();
        let job_uuid = Uuid::new_v4();

        let err = state.submit_payload(job_request(job_uuid)).await.unwrap_err();
        assert_eq!(err, HandshakeError::OutOfOrderMessage { job_uuid });
        assert!(state.payload.get().is_none());

        // The payload may still be delivered properly afterwards
        state.submit_initial(initial_request(job_uuid)).await.unwrap();
        state.submit_payload(job_request(job_uuid)).await.unwrap();
    }

    #[tokio::test]
    async fn test_payload_for_other_job_is_rejected() {
        let state = HandshakeState::new();
        let job_uuid = Uuid::new_v4();
        let other = Uuid::new_v4();
        state.submit_initial(initial_request(job_uuid)).await.unwrap();

        let err = state.submit_payload(job_request(other)).await.unwrap_err();
        assert_eq!(
            err,
            HandshakeError::MismatchedJob {
                expected: job_uuid,
                received: other,
            }
        );
        assert!(state.payload.get().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_initial_accepted_once() {
        let state = Arc::new(HandshakeState::new());
        let mut handles = Vec::new();

        for _ in 0..32 {
            let state = Arc::clone(&state);
            handles.push(tokio::spawn(async move {
                state.submit_initial(initial_request(Uuid::new_v4())).await
            }));
        }

        let mut accepted = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => accepted.push(()),
                Err(err) => assert!(matches!(err, HandshakeError::DuplicateMessage { .. })),
            }
        }

        assert_eq!(accepted.len(), 1);
        assert!(state.job_uuid().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_payload_before_initial_always_rejected() {
        let state = Arc::new(HandshakeState::new());
        let job_uuid = Uuid::new_v4();
        let mut handles = Vec::new();

        for _ in 0..32 {
            let state = Arc::clone(&state);
            handles.push(tokio::spawn(async move {
                state.submit_payload(job_request(job_uuid)).await
            }));
        }

        for handle in handles {
            assert_eq!(
                handle.await.unwrap(),
                Err(HandshakeError::OutOfOrderMessage { job_uuid })
            );
        }
        assert!(state.payload.get().is_none());
    }

    #[tokio::test]
    async fn test_waiters_observe_same_value() {
        let state = Arc::new(HandshakeState::new());
        let job_uuid = Uuid::new_v4();

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let state = Arc::clone(&state);
                tokio::spawn(async move { state.wait_initial().await.job_uuid })
            })
            .collect();

        tokio::task::yield_now().await;
        state.submit_initial(initial_request(job_uuid)).await.unwrap();

        for waiter in waiters {
            let seen = tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(seen, job_uuid);
        }

        // Late waiters see the stored value immediately
        assert_eq!(state.wait_initial().await.job_uuid, job_uuid);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_slot_filled_once_under_contention() {
        let slot = Arc::new(Slot::new());
        let handles: Vec<_> = (0..16u32)
            .map(|i| {
                let slot = Arc::clone(&slot);
                tokio::spawn(async move { slot.try_fill(i).await })
            })
            .collect();

        let mut rejected = Vec::new();
        for handle in handles {
            if let Err(value) = handle.await.unwrap() {
                rejected.push(value);
            }
        }

        assert_eq!(rejected.len(), 15);
        let stored = *slot.get().unwrap();
        assert!(!rejected.contains(&stored));
        assert_eq!(*slot.wait().await, stored);
    }

    #[tokio::test]
    async fn test_wait_without_initial_stays_pending() {
        let state = HandshakeState::new();
        let waited = tokio::time::timeout(Duration::from_millis(50), state.wait_initial()).await;
        assert!(waited.is_err());
    }
}

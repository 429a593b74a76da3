//! In-memory transport for tests

use async_trait::async_trait;
use horde_core::protocol::{ExecutorToMinerMessage, MinerToExecutorMessage};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::Transport;
use crate::error::TransportError;

/// Executor end of an in-memory channel
pub struct MemoryTransport {
    inbound: Mutex<UnboundedReceiver<String>>,
    outbound: UnboundedSender<String>,
}

/// Miner end of an in-memory channel
pub struct MemoryPeer {
    pub to_executor: UnboundedSender<String>,
    pub from_executor: UnboundedReceiver<String>,
}

pub fn pair() -> (MemoryTransport, MemoryPeer) {
    let (to_executor, inbound) = mpsc::unbounded_channel();
    let (outbound, from_executor) = mpsc::unbounded_channel();
    (
        MemoryTransport {
            inbound: Mutex::new(inbound),
            outbound,
        },
        MemoryPeer {
            to_executor,
            from_executor,
        },
    )
}

impl MemoryPeer {
    pub fn send(&self, msg: &MinerToExecutorMessage) {
        self.to_executor
            .send(serde_json::to_string(msg).unwrap())
            .unwrap();
    }

    /// Everything the executor has sent so far
    pub fn drain(&mut self) -> Vec<ExecutorToMinerMessage> {
        let mut sent = Vec::new();
        while let Ok(frame) = self.from_executor.try_recv() {
            sent.push(serde_json::from_str(&frame).unwrap());
        }
        sent
    }

    /// Waits for the next message from the executor
    pub async fn next(&mut self) -> ExecutorToMinerMessage {
        let frame = self.from_executor.recv().await.unwrap();
        serde_json::from_str(&frame).unwrap()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, frame: String) -> Result<(), TransportError> {
        self.outbound.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn receive(&self) -> Result<Option<String>, TransportError> {
        Ok(self.inbound.lock().await.recv().await)
    }
}

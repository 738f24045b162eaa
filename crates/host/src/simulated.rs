//! Simulated execution machine
//!
//! A deterministic keccak step machine standing in for the real replay
//! engine. Message `m` starts at the finished-machine hash of global state
//! `m`; each opcode hashes the machine hash with its position, and the last
//! opcode finishes the machine into global state `m + 1`. A divergence makes
//! one opcode produce a different hash, which yields a different but
//! self-consistent history from that point on.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use xlayer_core::{
    ChallengeLevels, ExecutionError, ExecutionProvider, ExecutionRun, GlobalState, Hash, Height, OneStepVerifier,
    StepInfo,
};
use xlayer_merkle::Keccak256Hasher;

/// Point where a dishonest machine departs from the honest one
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divergence {
    /// Message whose execution goes wrong
    pub message: u64,
    /// First wrong machine position within that message, in `1..=opcodes_per_message`
    pub opcode: u64,
}

/// Proof data for one machine step
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct StepProof {
    position: u64,
    total: u64,
    message: u64,
}

/// Step function and finishing rule of the machine
#[derive(Clone, Debug)]
pub struct SimulatedMachine {
    total: u64,
    module_root: Hash,
}

impl SimulatedMachine {
    /// Machine executing `levels.opcodes_per_message()` opcodes per message
    pub fn new(levels: &ChallengeLevels) -> Self {
        let total = levels.opcodes_per_message().max(1);
        let module_root = Keccak256Hasher::hash_parts(&[b"simulated machine", &total.to_be_bytes()]);
        Self { total, module_root }
    }

    /// Opcodes per message
    pub const fn total(&self) -> u64 {
        self.total
    }

    /// Identity of the machine
    pub const fn module_root(&self) -> Hash {
        self.module_root
    }

    /// Global state before any message
    pub fn genesis() -> GlobalState {
        GlobalState {
            block_hash: Keccak256Hasher::hash(b"genesis"),
            send_root: [0u8; 32],
            batch: 0,
            pos_in_batch: 0,
        }
    }

    /// Machine hash after executing the opcode at `position` from `before`
    pub fn step(before: &Hash, position: u64) -> Hash {
        Keccak256Hasher::hash_parts(&[before, &position.to_be_bytes()])
    }

    fn corrupt_step(before: &Hash, position: u64) -> Hash {
        Keccak256Hasher::hash_parts(&[before, &position.to_be_bytes(), b"diverged"])
    }

    /// Global state reached when message `message` finishes from machine hash `before`
    pub fn finish(before: &Hash, message: u64) -> GlobalState {
        GlobalState {
            block_hash: Keccak256Hasher::hash_parts(&[b"block", before]),
            send_root: Keccak256Hasher::hash_parts(&[b"send", before]),
            batch: 0,
            pos_in_batch: message + 1,
        }
    }

    fn corrupt_finish(before: &Hash, message: u64) -> GlobalState {
        GlobalState {
            block_hash: Keccak256Hasher::hash_parts(&[b"block", before, b"diverged"]),
            ..Self::finish(before, message)
        }
    }

    /// Machine hashes at positions `0..=total` of `message`, starting from `start`
    fn run(&self, start: &GlobalState, message: u64, corrupt_at: Option<u64>) -> (Vec<Hash>, GlobalState) {
        let mut hashes = Vec::with_capacity(self.total as usize + 1);
        let mut current = start.machine_finished_hash();
        hashes.push(current);
        for position in 0..self.total - 1 {
            current = if corrupt_at == Some(position + 1) {
                Self::corrupt_step(&current, position)
            } else {
                Self::step(&current, position)
            };
            hashes.push(current);
        }
        let next = if corrupt_at == Some(self.total) {
            Self::corrupt_finish(&current, message)
        } else {
            Self::finish(&current, message)
        };
        hashes.push(next.machine_finished_hash());
        (hashes, next)
    }
}

/// Execution provider backed by the simulated machine
#[derive(Debug)]
pub struct SimulatedExecution {
    machine: SimulatedMachine,
    states: Vec<GlobalState>,
    divergence: Option<Divergence>,
}

impl SimulatedExecution {
    /// Execute `messages` messages, optionally diverging
    pub fn new(levels: &ChallengeLevels, messages: u64, divergence: Option<Divergence>) -> Self {
        let machine = SimulatedMachine::new(levels);
        let mut states = Vec::with_capacity(messages as usize + 1);
        states.push(SimulatedMachine::genesis());
        for message in 0..messages {
            let corrupt_at = divergence.filter(|d| d.message == message).map(|d| d.opcode);
            let (_, next) = machine.run(&states[message as usize], message, corrupt_at);
            states.push(next);
        }
        Self {
            machine,
            states,
            divergence,
        }
    }

    /// Honest execution of `messages` messages
    pub fn honest(levels: &ChallengeLevels, messages: u64) -> Self {
        Self::new(levels, messages, None)
    }

    /// Underlying machine
    pub const fn machine(&self) -> &SimulatedMachine {
        &self.machine
    }

    fn head_height(&self) -> Height {
        self.states.len() as u64 - 1
    }
}

#[async_trait]
impl ExecutionProvider for SimulatedExecution {
    fn module_root(&self) -> Hash {
        self.machine.module_root()
    }

    async fn head(&self) -> Result<Height, ExecutionError> {
        Ok(self.head_height())
    }

    async fn global_state_at(&self, height: Height) -> Result<GlobalState, ExecutionError> {
        self.states
            .get(height as usize)
            .cloned()
            .ok_or(ExecutionError::NotYetAvailable {
                requested: height,
                available: self.head_height(),
            })
    }

    async fn create_execution_run(&self, module_root: Hash, message: u64) -> Result<Arc<dyn ExecutionRun>, ExecutionError> {
        if module_root != self.machine.module_root() {
            return Err(ExecutionError::Other(format!(
                "unknown module root 0x{}",
                hex::encode(&module_root[..4])
            )));
        }
        if message >= self.head_height() {
            return Err(ExecutionError::NotYetAvailable {
                requested: message + 1,
                available: self.head_height(),
            });
        }
        let corrupt_at = self.divergence.filter(|d| d.message == message).map(|d| d.opcode);
        let (hashes, _) = self.machine.run(&self.states[message as usize], message, corrupt_at);
        Ok(Arc::new(SimulatedRun {
            message,
            total: self.machine.total(),
            hashes,
        }))
    }
}

/// Replay of one message on the simulated machine
#[derive(Debug)]
pub struct SimulatedRun {
    message: u64,
    total: u64,
    hashes: Vec<Hash>,
}

impl SimulatedRun {
    fn hash_at(&self, position: u64) -> Hash {
        let index = position.min(self.total) as usize;
        self.hashes[index]
    }
}

#[async_trait]
impl ExecutionRun for SimulatedRun {
    async fn leaves_with_step_size(&self, start: u64, step_size: u64, count: u64) -> Result<Vec<Hash>, ExecutionError> {
        if step_size == 0 {
            return Err(ExecutionError::OutOfRange("step size must be non-zero".to_string()));
        }
        Ok((0..count)
            .map(|i| self.hash_at(start.saturating_add(i.saturating_mul(step_size))))
            .collect())
    }

    async fn leaves_in_range_with_step_size(&self, from: u64, to: u64, step_size: u64) -> Result<Vec<Hash>, ExecutionError> {
        if step_size == 0 || from > to {
            return Err(ExecutionError::OutOfRange(format!(
                "invalid range {}..={} step {}",
                from, to, step_size
            )));
        }
        Ok((from..=to).step_by(step_size as usize).map(|p| self.hash_at(p)).collect())
    }

    async fn proof_at(&self, position: u64) -> Result<Vec<u8>, ExecutionError> {
        if position >= self.total {
            return Err(ExecutionError::OutOfRange(format!(
                "machine finished at {}, no step at {}",
                self.total, position
            )));
        }
        let proof = StepProof {
            position,
            total: self.total,
            message: self.message,
        };
        bincode::serialize(&proof).map_err(|e| ExecutionError::Other(e.to_string()))
    }

    async fn step_at(&self, position: u64) -> Result<StepInfo, ExecutionError> {
        Ok(StepInfo {
            position,
            hash: self.hash_at(position),
            finished: position >= self.total,
        })
    }
}

/// One-step verifier for the simulated machine
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedVerifier;

impl OneStepVerifier for SimulatedVerifier {
    fn verify_one_step(&self, before: &Hash, proof: &[u8]) -> Result<Hash, String> {
        let proof: StepProof = bincode::deserialize(proof).map_err(|e| format!("malformed step proof: {}", e))?;
        if proof.position >= proof.total {
            return Err(format!("no step at {} of {}", proof.position, proof.total));
        }
        if proof.position + 1 == proof.total {
            return Ok(SimulatedMachine::finish(before, proof.message).machine_finished_hash());
        }
        Ok(SimulatedMachine::step(before, proof.position))
    }
}

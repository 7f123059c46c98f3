use crate::packet_id::PacketId;
#[cfg(test)] use mockall::automock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, PoisonError};

/// Source of packet ids. It is called from application threads (splitting messages) as well as
///  from the network task (finalizing merged datagrams), so implementations must be safe for
///  concurrent callers.
#[cfg_attr(test, automock)]
pub trait IdGenerator: Send + Sync {
    /// returns a random id that is never the placeholder id 0
    fn next_packet_id(&self) -> PacketId;
}

pub struct RandomIdGenerator {
    rng: Mutex<StdRng>,
}

impl RandomIdGenerator {
    pub fn new() -> RandomIdGenerator {
        RandomIdGenerator {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// reproducible ids, e.g. for simulations
    pub fn from_seed(seed: u64) -> RandomIdGenerator {
        RandomIdGenerator {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for RandomIdGenerator {
    fn next_packet_id(&self) -> PacketId {
        // the RNG's state stays valid even if a holder of the lock panicked
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        PacketId::from_raw(rng.random_range(1..=u32::MAX))
    }
}

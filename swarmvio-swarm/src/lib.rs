//! Swarm broadcast transport: best-effort UDP multicast carrying keyframe
//! descriptors and loop edges between agents, plus the lazy-broadcast and
//! force-landmarks policy that decides what to send (spec §4.6, §6).

pub mod error;
pub mod message;
pub mod policy;
pub mod transport;

pub use error::{Error, Result};
pub use message::SwarmMessage;
pub use policy::{decide_broadcast, PeerTracker, DEFAULT_NEARBY_DIST};
pub use transport::{parse_lcm_uri, run_recv_loop, MulticastAddr, SwarmTransport};

//! What travels between patches.

use ps_core::Day;
use ps_net::MsgKind;
use ps_sched::{Agent, AgentRecord};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// An agent type that can cross rank boundaries: it and its domain message
/// type both serialize.
pub trait Migrant: Agent<Message: Serialize + DeserializeOwned> + Serialize + DeserializeOwned {}

impl<A> Migrant for A
where
    A: Agent + Serialize + DeserializeOwned,
    A::Message: Serialize + DeserializeOwned,
{
}

/// Every agent that locked one gate entrance since the previous flush.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GateBatch<A> {
    /// The source patch's day when the batch was flushed.
    pub sender_day: Day,
    pub agents:     Vec<AgentRecord<A>>,
}

/// Body of every item on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Payload<A, M> {
    GateBatch(GateBatch<A>),
    Domain(M),
}

impl<A, M> Payload<A, M> {
    pub fn kind(&self) -> MsgKind {
        match self {
            Payload::GateBatch(_) => MsgKind::Gate,
            Payload::Domain(_)    => MsgKind::Domain,
        }
    }
}

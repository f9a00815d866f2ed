//! Builder for constructing a [`PatchGroup`].

use std::any::Any;

use ps_core::{AgentKey, Day, GblAddr, InteractantId, KernelConfig, KernelResult, LocalId, Rank};
use ps_net::{NetworkInterface, Transport};
use ps_sched::{Agent, TickCallback};

use crate::error::{SimError, SimResult};
use crate::group::{GroupStats, MessageHandler, PatchGroup, Route};
use crate::patch::Patch;
use crate::payload::Migrant;

/// The two ends of a gate created by [`PatchGroupBuilder::connect`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GateHandle {
    /// Entrance address (in the source patch).
    pub src:      GblAddr,
    /// Exit address (in the destination patch).
    pub dest:     GblAddr,
    /// The interactant agents lock to leave; `Some` only on the source rank.
    pub entrance: Option<InteractantId>,
}

/// Builder for [`PatchGroup<A>`].
///
/// Every rank describes the same global gate topology: `connect` must be
/// called for every gate, in the same order, on every rank, so that the
/// gate addresses agree.  Patches, interactants, agents, and handlers are
/// only added for the local rank.
///
/// # Example
///
/// ```rust,ignore
/// let mut b = PatchGroupBuilder::new(config, transport);
/// let ward = b.add_patch(0, "ward")?;
/// let icu  = GblAddr::patch(Rank(1), 0);
/// let gate = b.connect(ward, icu)?;
/// b.add_agent(ward, Patient::new(gate.entrance), Day(0))?;
/// let mut group = b.build()?;
/// group.run(&mut NoopObserver)?;
/// ```
pub struct PatchGroupBuilder<A: Migrant> {
    config:    KernelConfig,
    rank:      Rank,
    transport: Box<dyn Transport>,
    patches:   Vec<Patch<A>>,
    gates:     u32,
    handlers:  Vec<MessageHandler<A>>,
    routes:    Vec<(GblAddr, GblAddr, Route)>,
}

impl<A: Migrant> PatchGroupBuilder<A> {
    pub fn new(config: KernelConfig, transport: impl Transport + 'static) -> Self {
        let rank = transport.rank();
        Self {
            config,
            rank,
            transport: Box::new(transport),
            patches: Vec::new(),
            gates: 0,
            handlers: Vec::new(),
            routes: Vec::new(),
        }
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    fn index_of(&self, addr: GblAddr) -> SimResult<usize> {
        if addr.rank != self.rank {
            return Err(SimError::NotLocal { addr, rank: self.rank });
        }
        self.patches
            .iter()
            .position(|p| p.addr() == addr)
            .ok_or(SimError::UnknownPatch(addr))
    }

    fn patch_mut(&mut self, addr: GblAddr) -> SimResult<&mut Patch<A>> {
        let i = self.index_of(addr)?;
        Ok(&mut self.patches[i])
    }

    /// Add local patch number `id`, returning its address.
    pub fn add_patch(&mut self, id: u32, name: impl Into<String>) -> SimResult<GblAddr> {
        let addr = GblAddr::patch(self.rank, id);
        if self.patches.iter().any(|p| p.addr() == addr) {
            return Err(SimError::DuplicatePatch(addr));
        }
        self.patches.push(Patch::new(addr, name, Day::ZERO, &self.config)?);
        Ok(addr)
    }

    pub fn add_interactant(&mut self, patch: GblAddr, name: impl Into<String>) -> SimResult<InteractantId> {
        Ok(self.patch_mut(patch)?.add_interactant(name))
    }

    pub fn add_interactant_with_payload<T: Any + Send>(
        &mut self,
        patch:   GblAddr,
        name:    impl Into<String>,
        payload: T,
    ) -> SimResult<InteractantId> {
        Ok(self.patch_mut(patch)?.add_interactant_with_payload(name, payload))
    }

    /// Declare a gate from patch `from` to patch `to`.  Either end may be
    /// remote; the local ends are created here.
    pub fn connect(&mut self, from: GblAddr, to: GblAddr) -> SimResult<GateHandle> {
        let is_patch = |a: GblAddr| matches!(a.local, LocalId::Pair(_, 0));
        if !is_patch(from) || !is_patch(to) || from == to {
            return Err(SimError::BadGate { from, to });
        }
        self.gates += 1;
        let src = from.child(self.gates);
        let dest = to.child(self.gates);

        let entrance = if from.rank == self.rank {
            Some(self.patch_mut(from)?.add_entrance(src, dest))
        } else {
            None
        };
        if to.rank == self.rank {
            let patch = self.index_of(to)?;
            let exit = self.patches[patch].add_exit(dest, src);
            self.routes.push((src, dest, Route::Exit { patch, exit }));
        }
        Ok(GateHandle { src, dest, entrance })
    }

    /// Schedule a new agent in local patch `patch` on day `at`.
    pub fn add_agent(&mut self, patch: GblAddr, body: A, at: Day) -> SimResult<AgentKey> {
        Ok(self.patch_mut(patch)?.spawn(body, at)?)
    }

    pub fn add_tick_callback(&mut self, patch: GblAddr, cb: TickCallback) -> SimResult<()> {
        self.patch_mut(patch)?.add_tick_callback(cb);
        Ok(())
    }

    /// Deliver domain messages sent from `src` to local patch `dest` through
    /// `handler`.
    pub fn on_message<F>(&mut self, src: GblAddr, dest: GblAddr, handler: F) -> SimResult<()>
    where
        F: FnMut(&mut Patch<A>, GblAddr, <A as Agent>::Message) -> KernelResult<()> + Send + 'static,
    {
        let patch = self.index_of(dest)?;
        self.handlers.push(Box::new(handler));
        let handler = self.handlers.len() - 1;
        self.routes.push((src, dest, Route::Handler { patch, handler }));
        Ok(())
    }

    /// Validate the configuration and wire every route into the network
    /// interface.
    pub fn build(self) -> SimResult<PatchGroup<A>> {
        self.config.validate()?;
        let mut net = NetworkInterface::new(self.transport, self.config.max_items_per_chunk);
        for (src, dest, route) in self.routes {
            net.expect(src, dest, route);
        }
        Ok(PatchGroup {
            config:   self.config,
            rank:     self.rank,
            patches:  self.patches,
            net,
            handlers: self.handlers,
            stats:    GroupStats::default(),
            started:  false,
        })
    }
}

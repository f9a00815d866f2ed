//! Unit tests for ps-net.

use ps_core::{GblAddr, KernelResult, Rank};

use crate::{ChannelTransport, MsgKind, NetworkInterface, WireItem};

// ── Helpers ───────────────────────────────────────────────────────────────────

fn addr(rank: u32, patch: u32) -> GblAddr {
    GblAddr::patch(Rank(rank), patch)
}

fn item(n: u32) -> WireItem<u32> {
    WireItem { kind: MsgKind::Domain, src: addr(0, 0), dest: addr(1, 0), body: n }
}

type Net = NetworkInterface<u32, u8>;

fn nets(n: usize, max_items: usize) -> Vec<Net> {
    ChannelTransport::mesh(n)
        .into_iter()
        .map(|t| {
            let mut net = Net::new(Box::new(t), max_items);
            for r in 0..n {
                net.add_partner(Rank(r as u32));
            }
            net
        })
        .collect()
}

/// One full cycle, collecting what was delivered.
fn cycle(net: &mut Net, got: &mut Vec<(u8, u32)>) -> KernelResult<()> {
    net.start_recv();
    net.start_send()?;
    net.finish_send()?;
    net.finish_recv(|route, item| {
        got.push((route, item.body));
        Ok(())
    })
}

// ── Wire ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod wire {
    use ps_core::{KernelError, Rank, VectorClock};

    use super::*;
    use crate::{Chunk, ChunkTag, ChunkTail, DoneSignal};

    fn tail() -> ChunkTail {
        ChunkTail { clock: VectorClock::new(2, Rank(0)), done: None }
    }

    #[test]
    fn split_tags_all_but_last_continue() {
        let chunks = Chunk::split((0..5).map(item).collect(), 2, tail());
        let tags: Vec<_> = chunks.iter().map(Chunk::tag).collect();
        assert_eq!(tags, vec![ChunkTag::Continue, ChunkTag::Continue, ChunkTag::End]);
        let sizes: Vec<_> = chunks.iter().map(|c| c.items.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn split_exact_and_empty() {
        assert_eq!(Chunk::split((0..2).map(item).collect(), 2, tail()).len(), 1);
        let empty = Chunk::<u32>::split(Vec::new(), 2, tail());
        assert_eq!(empty.len(), 1);
        assert_eq!(empty[0].tag(), ChunkTag::End);
    }

    #[test]
    fn encode_decode_keeps_tail() {
        let mut t = tail();
        t.done = Some(DoneSignal { rank: Rank(0), cycle: 4 });
        let chunk = Chunk { items: vec![item(9)], tail: Some(t) };
        let frame = chunk.encode().unwrap();
        assert_eq!(frame.tag, ChunkTag::End);
        let back: Chunk<u32> = Chunk::decode(&frame, Rank(0)).unwrap();
        assert_eq!(back, chunk);
    }

    #[test]
    fn tag_mismatch_is_protocol_violation() {
        let chunk = Chunk { items: vec![item(1)], tail: None };
        let mut frame = chunk.encode().unwrap();
        frame.tag = ChunkTag::End;
        let err = Chunk::<u32>::decode(&frame, Rank(1)).unwrap_err();
        assert!(matches!(err, KernelError::ProtocolViolation(_)));
    }

    #[test]
    fn garbage_is_protocol_violation() {
        let frame = crate::Frame { tag: ChunkTag::End, body: b"not json".to_vec() };
        assert!(matches!(Chunk::<u32>::decode(&frame, Rank(1)), Err(KernelError::ProtocolViolation(_))));
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod transport {
    use std::time::Duration;

    use ps_core::{KernelError, Rank};

    use crate::{ChannelTransport, ChunkTag, Frame, NetError, Transport};

    fn frame(b: u8) -> Frame {
        Frame { tag: ChunkTag::End, body: vec![b] }
    }

    #[test]
    fn per_sender_fifo() {
        let mut mesh = ChannelTransport::mesh(2);
        let mut r1 = mesh.pop().unwrap();
        let mut r0 = mesh.pop().unwrap();
        assert_eq!(r0.rank(), Rank(0));
        assert_eq!(r1.world_size(), 2);

        let reqs: Vec<_> = (0..3).map(|b| r0.post_send(Rank(1), frame(b)).unwrap()).collect();
        r0.complete_sends(reqs).unwrap();
        for b in 0..3 {
            assert_eq!(r1.wait_any(&[Rank(0)]).unwrap(), (Rank(0), frame(b)));
        }
    }

    #[test]
    fn timeout_and_nothing_posted() {
        let mut r0 = ChannelTransport::mesh(2).remove(0).with_timeout(Duration::from_millis(10));
        assert!(matches!(r0.wait_any(&[]), Err(NetError::NothingPosted)));
        // The peer endpoint was dropped with the rest of the mesh.
        let err = r0.wait_any(&[Rank(1)]).unwrap_err();
        assert!(matches!(err, NetError::Disconnected { peer: Rank(1) } | NetError::Timeout { .. }));
        assert!(matches!(KernelError::from(err), KernelError::TransportFailure { peer: Rank(1), .. }));
    }

    #[test]
    fn unknown_peer() {
        let mut r0 = ChannelTransport::mesh(1).remove(0);
        assert!(matches!(r0.post_send(Rank(4), frame(0)), Err(NetError::UnknownPeer(Rank(4)))));
    }
}

// ── NetworkInterface ──────────────────────────────────────────────────────────

#[cfg(test)]
mod interface {
    use std::thread;

    use ps_core::KernelError;

    use super::*;

    #[test]
    fn same_rank_items_are_delivered_locally() {
        let mut net = nets(1, 10).pop().unwrap();
        net.expect(addr(0, 0), addr(0, 1), 7);
        net.enqueue(MsgKind::Gate, 42, addr(0, 0), addr(0, 1));

        let mut got = Vec::new();
        cycle(&mut net, &mut got).unwrap();
        assert_eq!(got, vec![(7, 42)]);
        assert_eq!(net.stats().local_items, 1);
        assert_eq!(net.stats().chunks_sent, 0);
        assert_eq!(net.cycle(), 1);
    }

    #[test]
    fn buffered_counts_items_until_delivered() {
        let mut net = nets(1, 10).pop().unwrap();
        net.expect(addr(0, 0), addr(0, 1), 7);
        assert_eq!(net.buffered(), 0);

        net.enqueue(MsgKind::Domain, 1, addr(0, 0), addr(0, 1));
        net.enqueue(MsgKind::Domain, 2, addr(0, 0), addr(0, 1));
        assert_eq!(net.buffered(), 2);

        net.start_recv();
        net.start_send().unwrap();
        // Diverted to the local list, still not handed out.
        assert_eq!(net.buffered(), 2);

        net.finish_send().unwrap();
        net.finish_recv(|_, _| Ok(())).unwrap();
        assert_eq!(net.buffered(), 0);
    }

    #[test]
    fn unexpected_source_is_fatal() {
        let mut net = nets(1, 10).pop().unwrap();
        net.enqueue(MsgKind::Domain, 1, addr(0, 0), addr(0, 1));
        let err = cycle(&mut net, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, KernelError::UnknownMessageSource { .. }));
    }

    #[test]
    fn chunked_batch_arrives_whole_and_in_order() {
        let mut pair = nets(2, 2);
        let mut r1 = pair.pop().unwrap();
        let mut r0 = pair.pop().unwrap();
        r1.expect(addr(0, 0), addr(1, 0), 3);
        for n in 0..5 {
            r0.enqueue(MsgKind::Domain, n, addr(0, 0), addr(1, 0));
        }

        let (res0, res1) = thread::scope(|s| {
            let h0 = s.spawn(move || {
                let mut got = Vec::new();
                cycle(&mut r0, &mut got).map(|_| (got, r0.stats()))
            });
            let h1 = s.spawn(move || {
                let mut got = Vec::new();
                cycle(&mut r1, &mut got).map(|_| got)
            });
            (h0.join().unwrap(), h1.join().unwrap())
        });

        let (got0, stats0) = res0.unwrap();
        assert!(got0.is_empty());
        assert_eq!(stats0.chunks_sent, 3);
        assert_eq!(stats0.items_sent, 5);
        assert_eq!(res1.unwrap(), (0..5).map(|n| (3, n)).collect::<Vec<_>>());
    }

    #[test]
    fn clocks_merge_across_cycles() {
        let mut pair = nets(2, 10);
        let mut r1 = pair.pop().unwrap();
        let mut r0 = pair.pop().unwrap();

        let (c0, c1) = thread::scope(|s| {
            let h0 = s.spawn(move || -> KernelResult<Vec<u64>> {
                for _ in 0..2 {
                    cycle(&mut r0, &mut Vec::new())?;
                }
                Ok(r0.vclock().counts().to_vec())
            });
            let h1 = s.spawn(move || -> KernelResult<Vec<u64>> {
                for _ in 0..2 {
                    cycle(&mut r1, &mut Vec::new())?;
                }
                Ok(r1.vclock().counts().to_vec())
            });
            (h0.join().unwrap(), h1.join().unwrap())
        });

        // Cycle 2 carries the peer's clock as of the end of cycle 1.
        assert_eq!(c0.unwrap(), vec![2, 1]);
        assert_eq!(c1.unwrap(), vec![1, 2]);
    }

    #[test]
    fn termination_waits_for_latest_declaration() {
        let ranks = nets(3, 10);
        let exits: Vec<u64> = thread::scope(|s| {
            let handles: Vec<_> = ranks
                .into_iter()
                .map(|mut net| {
                    s.spawn(move || -> KernelResult<u64> {
                        // Rank r runs out of work after r + 1 cycles.
                        let declare_at = net.rank().0 as u64 + 1;
                        net.start_recv();
                        net.start_send()?;
                        loop {
                            net.finish_send()?;
                            net.finish_recv(|_, _| Ok(()))?;
                            if net.cycle() >= declare_at && net.send_done_signal() {
                                return Ok(net.cycle());
                            }
                            net.start_recv();
                            net.start_send()?;
                        }
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect()
        });
        assert_eq!(exits, vec![4, 4, 4]);
    }

    #[test]
    fn lone_rank_terminates_one_cycle_after_declaring() {
        let mut net = nets(1, 10).pop().unwrap();
        cycle(&mut net, &mut Vec::new()).unwrap();
        assert!(!net.send_done_signal());
        assert!(net.has_declared());
        cycle(&mut net, &mut Vec::new()).unwrap();
        assert!(net.send_done_signal());
    }
}

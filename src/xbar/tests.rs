use super::*;
use crate::timeq::Tick;

const PERIOD: Tick = 1000;
const SPAN: u64 = 1 << 40;

fn controller(num_upstream: usize) -> XbarConfig {
    XbarConfig {
        num_upstream,
        num_downstream: 1,
        downstream_ranges: vec![AddrRange::new(0, SPAN)],
        clock_period: PERIOD,
        ..XbarConfig::controller()
    }
}

fn device() -> XbarConfig {
    XbarConfig {
        downstream_ranges: vec![AddrRange::new(0, SPAN)],
        clock_period: PERIOD,
        ..XbarConfig::device()
    }
}

fn violation(err: &anyhow::Error) -> &ProtocolViolation {
    err.downcast_ref::<ProtocolViolation>()
        .expect("error should be a protocol violation")
}

fn accept(xbar: &mut Crossbar, now: Tick, src: LinkId, tx: Transaction) -> Accepted {
    match xbar.handle_request(now, src, tx).unwrap() {
        Ok(accepted) => accepted,
        Err(reject) => panic!("{} rejected at {now}: {:?}", reject.payload.id, reject.reason),
    }
}

// What the far side of a controller does: unpack, answer, pack.
fn device_answer(mut tx: Transaction) -> Transaction {
    let mut codec = FlitCodec::new(FlitRole::Device, FLIT_SIZE);
    codec.decode(&mut tx).unwrap();
    if tx.cmd.is_read() {
        tx.data = Some(vec![0xab; tx.size as usize]);
    }
    tx.make_response();
    codec.encode(&mut tx, CreditGrant::default()).unwrap();
    tx
}

#[test]
fn credit_taken_then_full_queue_asks_for_timed_retry() {
    let mut ctrl = Crossbar::new(XbarConfig {
        queue_capacity: 1,
        ..controller(1)
    });
    let pool = |x: &Crossbar| x.credits().remote(0).available(CreditClass::Response);
    assert_eq!(pool(&ctrl), 64);

    let first = accept(&mut ctrl, 0, 0, Transaction::read(RequestId(1), 0x1000, 64));
    // (frontend 2 + forward 3) cycles
    assert_eq!(first.ticket().unwrap().ready_at(), 5 * PERIOD);
    assert_eq!(pool(&ctrl), 63);
    assert_eq!(ctrl.outstanding(Side::Downstream, 0), 1);
    // header cycle plus ceil(66 / 16) payload cycles
    assert_eq!(ctrl.req_layer(0).busy_until(), Some(6 * PERIOD));

    let now = 6 * PERIOD;
    let reject = ctrl
        .handle_request(now, 0, Transaction::read(RequestId(2), 0x1040, 64))
        .unwrap()
        .unwrap_err();
    assert_eq!(reject.reason, RejectReason::QueueFull);
    assert_eq!(reject.retry_at, Some(7 * PERIOD));
    assert_eq!(reject.payload.id, RequestId(2));
    assert_eq!(reject.payload.cmd, MemCmd::ReadReq);
    assert_eq!(pool(&ctrl), 63);
    assert!(!ctrl.routes().contains(RequestId(2)));
    assert_eq!(ctrl.req_layer(0).retry_later(), Some(7 * PERIOD));
    assert_eq!(ctrl.stats().queue_full_retries(), 1);

    // the layer is held for the rejected source, which is retried first
    ctrl.tick(7 * PERIOD);
    let notice = ctrl.pop_notice().unwrap();
    assert_eq!(
        (notice.side, notice.link, notice.cause),
        (Side::Upstream, 0, RetryCause::LayerFree)
    );
}

#[test]
fn response_without_route_is_fatal() {
    let mut ctrl = Crossbar::new(controller(1));
    let mut stray = Transaction::read(RequestId(99), 0x40, 64);
    stray.make_response();
    let err = ctrl.handle_response(0, 0, stray).unwrap_err();
    assert!(matches!(
        violation(&err),
        ProtocolViolation::UnroutedResponse { id: RequestId(99), link: 0, .. }
    ));
    assert_eq!(ctrl.credits().remote(0).available(CreditClass::Response), 64);
}

#[test]
fn unmapped_address_without_default_is_fatal() {
    let mut ctrl = Crossbar::new(XbarConfig {
        downstream_ranges: vec![AddrRange::new(0, 0x1000)],
        ..controller(1)
    });
    let err = ctrl
        .handle_request(0, 0, Transaction::read(RequestId(1), 0x2000, 64))
        .unwrap_err();
    assert!(matches!(
        violation(&err),
        ProtocolViolation::NoDestination { addr: 0x2000, .. }
    ));
}

#[test]
fn default_link_catches_unmapped_addresses() {
    let mut xbar = Crossbar::new(XbarConfig {
        num_downstream: 2,
        default_downstream: true,
        downstream_ranges: vec![AddrRange::new(0, 0x1000), AddrRange::new(0x1000, 0x1000)],
        ..XbarConfig::default()
    });
    assert_eq!(xbar.num_downstream(), 3);
    assert_eq!(xbar.resolve(0x1800, 0).unwrap(), 1);
    assert_eq!(xbar.resolve(0x9000, 0).unwrap(), 2);
    accept(&mut xbar, 0, 0, Transaction::read(RequestId(1), 0x9000, 64));
    assert_eq!(xbar.outstanding(Side::Downstream, 2), 1);
}

#[test]
fn completion_rides_in_queued_data_flit() {
    let mut dev = Crossbar::new(device());
    let mut host = FlitCodec::new(FlitRole::Host, FLIT_SIZE);

    let mut read = Transaction::read(RequestId(1), 0x0, 64);
    host.encode(&mut read, CreditGrant::default()).unwrap();
    let mut wb = Transaction::writeback(RequestId(2), 0x40, vec![7; 64]);
    host.encode(&mut wb, CreditGrant::default()).unwrap();

    accept(&mut dev, 0, 0, read);
    accept(&mut dev, 10 * PERIOD, 0, wb);
    assert_eq!(dev.routes().len(), 2);

    let mut read = dev.take_ready_request(0, 20 * PERIOD).unwrap();
    let mut wb = dev.take_ready_request(0, 20 * PERIOD).unwrap();
    assert_eq!((read.cmd, wb.cmd), (MemCmd::ReadReq, MemCmd::Writeback));
    read.data = Some(vec![1; 64]);
    read.make_response();
    wb.make_response();

    let first = dev.handle_response(20 * PERIOD, 0, read).unwrap().unwrap();
    assert!(first.ticket().is_some());
    let second = dev.handle_response(30 * PERIOD, 0, wb).unwrap().unwrap();
    assert_eq!(second, Accepted::Absorbed);

    assert_eq!(dev.outstanding(Side::Upstream, 0), 1);
    assert!(dev.routes().is_empty());
    let carrier = dev.take_ready_response(0, 30 * PERIOD).unwrap();
    assert_eq!(carrier.cmd, MemCmd::MemData);
    assert_eq!(carrier.reserved_for_more_ndr, 0);
    assert_eq!(carrier.bundled.len(), 1);
    assert_eq!(carrier.bundled[0].cmd, MemCmd::Cmp);
    assert_eq!(carrier.credit_release(), 2);
    assert_eq!(dev.stats().absorbed_completions(), 1);
}

#[test]
fn retries_are_granted_in_rejection_order() {
    let (a, b, c) = (0, 1, 2);
    let mut ctrl = Crossbar::new(controller(3));
    accept(&mut ctrl, 0, c, Transaction::read(RequestId(1), 0x0, 64));

    for (t, src, id) in [(100, a, 2), (200, b, 3), (300, a, 2)] {
        let reject = ctrl
            .handle_request(t, src, Transaction::read(RequestId(id), 0x40 * id, 64))
            .unwrap()
            .unwrap_err();
        assert_eq!(reject.reason, RejectReason::Busy);
        assert_eq!(reject.retry_at, None);
    }
    assert_eq!(ctrl.req_layer(0).waiting().copied().collect::<Vec<_>>(), vec![a, b]);

    let now = 6 * PERIOD;
    ctrl.tick(now);
    assert_eq!(ctrl.pop_notice().map(|n| n.link), Some(a));
    assert!(ctrl.pop_notice().is_none());

    // b may not jump the queue while the layer is held for a
    let jumped = ctrl
        .handle_request(now, b, Transaction::read(RequestId(3), 0xc0, 64))
        .unwrap();
    assert!(jumped.is_err());
    accept(&mut ctrl, now, a, Transaction::read(RequestId(2), 0x80, 64));

    ctrl.tick(12 * PERIOD);
    assert_eq!(ctrl.pop_notice().map(|n| n.link), Some(b));
    accept(&mut ctrl, 12 * PERIOD, b, Transaction::read(RequestId(3), 0xc0, 64));
}

#[test]
fn request_identity_is_routed_once() {
    let mut ctrl = Crossbar::new(controller(2));
    accept(&mut ctrl, 0, 0, Transaction::read(RequestId(5), 0x0, 64));
    assert_eq!(ctrl.routes().len(), 1);
    assert!(ctrl.routes().contains(RequestId(5)));

    let err = ctrl
        .handle_request(10 * PERIOD, 1, Transaction::read(RequestId(5), 0x40, 64))
        .unwrap_err();
    assert!(matches!(
        violation(&err),
        ProtocolViolation::DuplicateRoute { existing: 0, link: 1, .. }
    ));

    let fwd = ctrl.take_ready_request(0, 10 * PERIOD).unwrap();
    ctrl.handle_response(10 * PERIOD, 0, device_answer(fwd))
        .unwrap()
        .unwrap();
    assert!(ctrl.routes().is_empty());
}

#[test]
fn posted_writes_take_no_credit_and_no_route() {
    let mut ctrl = Crossbar::new(controller(1));
    accept(
        &mut ctrl,
        0,
        0,
        Transaction::write_partial(RequestId(1), 0x0, vec![1; 8]),
    );
    accept(&mut ctrl, 10 * PERIOD, 0, Transaction::clean_evict(RequestId(2), 0x40, 64));
    assert!(ctrl.routes().is_empty());
    assert_eq!(ctrl.credits().remote(0).available(CreditClass::Response), 64);
    let fwd = ctrl.take_ready_request(0, 20 * PERIOD).unwrap();
    assert_eq!(fwd.cmd, MemCmd::MemWrPtl);
}

#[test]
fn response_returns_credit_and_decodes() {
    let mut ctrl = Crossbar::new(controller(1));
    accept(&mut ctrl, 0, 0, Transaction::read(RequestId(1), 0x80, 64));
    assert!(ctrl.peek_ready_request(0, 4 * PERIOD).is_none());
    let fwd = ctrl.take_ready_request(0, 5 * PERIOD).unwrap();
    assert_eq!((fwd.cmd, fwd.size), (MemCmd::MemRd, FLIT_SIZE));
    assert_eq!(fwd.advertised.response, 64);

    let accepted = ctrl
        .handle_response(8 * PERIOD, 0, device_answer(fwd))
        .unwrap()
        .unwrap();
    assert_eq!(accepted.ticket().unwrap().ready_at(), 11 * PERIOD);
    assert_eq!(ctrl.credits().remote(0).available(CreditClass::Response), 64);
    assert_eq!(ctrl.stats().credits_released(), 1);

    let resp = ctrl.take_ready_response(0, 11 * PERIOD).unwrap();
    assert_eq!((resp.cmd, resp.size), (MemCmd::ReadResp, 64));
    assert!(!resp.is_encoded());
    assert_eq!(resp.data.as_deref(), Some(&[0xab; 64][..]));
}

#[test]
fn exhausted_pool_parks_sender_until_credit_returns() {
    let mut ctrl = Crossbar::new(XbarConfig {
        credits: CreditLimits {
            response: 1,
            ..CreditLimits::default()
        },
        ..controller(2)
    });
    accept(&mut ctrl, 0, 0, Transaction::read(RequestId(1), 0x0, 64));

    let reject = ctrl
        .handle_request(10 * PERIOD, 1, Transaction::read(RequestId(2), 0x40, 64))
        .unwrap()
        .unwrap_err();
    assert_eq!(reject.reason, RejectReason::NoCredit);
    assert_eq!(reject.retry_at, None);
    assert!(!ctrl.routes().contains(RequestId(2)));
    assert_eq!(ctrl.outstanding(Side::Downstream, 0), 1);
    assert_eq!(ctrl.stats().credit_stalls(), 1);

    let fwd = ctrl.take_ready_request(0, 10 * PERIOD).unwrap();
    ctrl.handle_response(10 * PERIOD, 0, device_answer(fwd))
        .unwrap()
        .unwrap();
    let notice = ctrl.pop_notice().unwrap();
    assert_eq!(
        (notice.side, notice.link, notice.cause, notice.at),
        (Side::Upstream, 1, RetryCause::CreditReturned, 10 * PERIOD)
    );
    accept(&mut ctrl, 20 * PERIOD, 1, reject.payload);
}

#[test]
fn credit_stall_gives_up_the_retry_claim() {
    let mut ctrl = Crossbar::new(XbarConfig {
        credits: CreditLimits {
            response: 1,
            ..CreditLimits::default()
        },
        ..controller(2)
    });
    accept(&mut ctrl, 0, 0, Transaction::read(RequestId(1), 0x0, 64));
    let busy = ctrl
        .handle_request(PERIOD, 1, Transaction::read(RequestId(2), 0x40, 64))
        .unwrap()
        .unwrap_err();
    assert_eq!(busy.reason, RejectReason::Busy);

    ctrl.tick(6 * PERIOD);
    let notice = ctrl.pop_notice().unwrap();
    assert_eq!((notice.link, notice.cause), (1, RetryCause::LayerFree));
    let stalled = ctrl
        .handle_request(6 * PERIOD, 1, busy.payload)
        .unwrap()
        .unwrap_err();
    assert_eq!(stalled.reason, RejectReason::NoCredit);
    assert_eq!(ctrl.req_layer(0).state(), LayerState::Idle);

    // a posted write needs no credit and must not wait out the abandoned claim
    accept(
        &mut ctrl,
        6 * PERIOD,
        0,
        Transaction::write_partial(RequestId(3), 0x80, vec![1; 16]),
    );
}

#[test]
fn tick_wakes_senders_left_parked_by_late_releases() {
    let mut ctrl = Crossbar::new(XbarConfig {
        credits: CreditLimits {
            response: 2,
            ..CreditLimits::default()
        },
        ..controller(3)
    });
    accept(&mut ctrl, 0, 0, Transaction::read(RequestId(1), 0x0, 64));
    accept(&mut ctrl, 6 * PERIOD, 0, Transaction::read(RequestId(2), 0x40, 64));
    for (src, id) in [(1, 3), (2, 4)] {
        let reject = ctrl
            .handle_request(12 * PERIOD, src, Transaction::read(RequestId(id), 0x80, 64))
            .unwrap()
            .unwrap_err();
        assert_eq!(reject.reason, RejectReason::NoCredit);
    }

    let a = ctrl.take_ready_request(0, 12 * PERIOD).unwrap();
    let b = ctrl.take_ready_request(0, 12 * PERIOD).unwrap();
    // the first release finds the pool empty and wakes the oldest waiter only
    ctrl.handle_response(12 * PERIOD, 0, device_answer(a))
        .unwrap()
        .unwrap();
    let notice = ctrl.pop_notice().unwrap();
    assert_eq!((notice.link, notice.cause), (1, RetryCause::CreditReturned));
    ctrl.handle_response(20 * PERIOD, 0, device_answer(b))
        .unwrap()
        .unwrap();
    assert!(ctrl.pop_notice().is_none());
    assert_eq!(ctrl.credits().remote(0).available(CreditClass::Response), 2);

    ctrl.tick(20 * PERIOD);
    let notice = ctrl.pop_notice().unwrap();
    assert_eq!(
        (notice.side, notice.link, notice.cause),
        (Side::Upstream, 2, RetryCause::CreditReturned)
    );
    assert!(ctrl.pop_notice().is_none());
}

#[test]
fn busy_response_layer_leaves_route_in_place() {
    let mut ctrl = Crossbar::new(XbarConfig {
        num_downstream: 2,
        downstream_ranges: vec![AddrRange::new(0, 0x1000), AddrRange::new(0x1000, 0x1000)],
        ..controller(1)
    });
    accept(&mut ctrl, 0, 0, Transaction::read(RequestId(1), 0x0, 64));
    accept(&mut ctrl, 0, 0, Transaction::read(RequestId(2), 0x1000, 64));
    let a = ctrl.take_ready_request(0, 5 * PERIOD).unwrap();
    let b = ctrl.take_ready_request(1, 5 * PERIOD).unwrap();

    ctrl.handle_response(5 * PERIOD, 0, device_answer(a))
        .unwrap()
        .unwrap();
    let reject = ctrl
        .handle_response(5 * PERIOD, 1, device_answer(b))
        .unwrap()
        .unwrap_err();
    assert_eq!(reject.reason, RejectReason::Busy);
    assert!(ctrl.routes().contains(RequestId(2)));
    assert_eq!(ctrl.credits().remote(1).available(CreditClass::Response), 63);

    ctrl.tick(11 * PERIOD);
    let notice = ctrl.pop_notice().unwrap();
    assert_eq!((notice.side, notice.link), (Side::Downstream, 1));
    ctrl.handle_response(11 * PERIOD, 1, reject.payload)
        .unwrap()
        .unwrap();
    assert!(ctrl.routes().is_empty());
}

#[test]
fn bundled_completions_reach_their_own_requesters() {
    let mut ctrl = Crossbar::new(controller(2));
    let mut dev = Crossbar::new(device());

    accept(
        &mut ctrl,
        0,
        0,
        Transaction::writeback(RequestId(1), 0x0, vec![3; 64]),
    );
    accept(&mut ctrl, 6 * PERIOD, 1, Transaction::read(RequestId(2), 0x40, 64));

    let wb = ctrl.take_ready_request(0, 5 * PERIOD).unwrap();
    accept(&mut dev, 5 * PERIOD, 0, wb);
    let read = ctrl.take_ready_request(0, 11 * PERIOD).unwrap();
    accept(&mut dev, 11 * PERIOD, 0, read);

    let mut wb = dev.take_ready_request(0, 9 * PERIOD).unwrap();
    let mut read = dev.take_ready_request(0, 15 * PERIOD).unwrap();
    wb.make_response();
    read.data = Some(vec![9; 64]);
    read.make_response();

    dev.handle_response(15 * PERIOD, 0, read).unwrap().unwrap();
    let absorbed = dev.handle_response(21 * PERIOD, 0, wb).unwrap().unwrap();
    assert_eq!(absorbed, Accepted::Absorbed);

    let carrier = dev.take_ready_response(0, 21 * PERIOD).unwrap();
    assert_eq!(ctrl.credits().remote(0).available(CreditClass::Response), 62);
    ctrl.handle_response(21 * PERIOD, 0, carrier)
        .unwrap()
        .unwrap();

    assert!(ctrl.routes().is_empty());
    assert_eq!(ctrl.credits().remote(0).available(CreditClass::Response), 64);
    let to_writer = ctrl.take_ready_response(0, 24 * PERIOD).unwrap();
    let to_reader = ctrl.take_ready_response(1, 24 * PERIOD).unwrap();
    assert_eq!((to_writer.id, to_writer.cmd), (RequestId(1), MemCmd::WriteResp));
    assert_eq!((to_reader.id, to_reader.cmd), (RequestId(2), MemCmd::ReadResp));
    assert_eq!(ctrl.stats().bundled_completions(), 1);
}

struct Backing {
    latency: Tick,
    seen: Vec<(LinkId, MemCmd)>,
}

impl MemSidePeer for Backing {
    fn send_atomic(&mut self, link: LinkId, tx: &mut Transaction) -> anyhow::Result<Tick> {
        self.seen.push((link, tx.cmd));
        if tx.cmd.is_read() {
            tx.data = Some(vec![0x5a; tx.size as usize]);
        }
        tx.make_response();
        Ok(self.latency)
    }

    fn send_functional(&mut self, link: LinkId, tx: &mut Transaction) -> anyhow::Result<()> {
        self.seen.push((link, tx.cmd));
        if tx.cmd.is_read() {
            tx.data = Some(vec![0; tx.size as usize]);
        }
        tx.make_response();
        Ok(())
    }
}

#[test]
fn atomic_access_bypasses_timing_state() {
    let mut ctrl = Crossbar::new(controller(1));
    let mut peer = Backing {
        latency: 40 * PERIOD,
        seen: Vec::new(),
    };
    let mut tx = Transaction::read(RequestId(1), 0x100, 64);
    let latency = ctrl.handle_atomic(0, &mut tx, &mut peer).unwrap();
    assert_eq!(latency, 40 * PERIOD);
    assert_eq!(tx.cmd, MemCmd::ReadResp);
    assert_eq!(peer.seen, vec![(0, MemCmd::ReadReq)]);
    assert_eq!(ctrl.credits().remote(0).available(CreditClass::Response), 64);
    assert!(ctrl.routes().is_empty());
    assert_eq!(ctrl.req_layer(0).state(), LayerState::Idle);
    assert_eq!(ctrl.stats().trans_dist(MemCmd::ReadResp), 1);
    assert_eq!(ctrl.stats().atomic_accesses(), 1);
}

#[test]
fn functional_read_sees_queued_response_data() {
    let mut xbar = Crossbar::new(XbarConfig {
        downstream_ranges: vec![AddrRange::new(0, SPAN)],
        ..XbarConfig::default()
    });
    let mut peer = Backing {
        latency: 0,
        seen: Vec::new(),
    };
    accept(&mut xbar, 0, 0, Transaction::read(RequestId(1), 0x200, 64));
    let mut fwd = xbar.take_ready_request(0, 10 * PERIOD).unwrap();
    fwd.data = Some((0..64).collect());
    fwd.make_response();
    xbar.handle_response(10 * PERIOD, 0, fwd).unwrap().unwrap();

    // a write patches the queued copy and still goes to memory
    let mut write = Transaction::write_partial(RequestId(2), 0x204, vec![0xee; 4]);
    xbar.handle_functional(0, &mut write, &mut peer).unwrap();
    assert_eq!(peer.seen, vec![(0, MemCmd::WritePartial)]);

    let mut probe = Transaction::read(RequestId(3), 0x200, 16);
    xbar.handle_functional(0, &mut probe, &mut peer).unwrap();
    assert_eq!(probe.cmd, MemCmd::ReadResp);
    let data = probe.data.unwrap();
    assert_eq!(&data[..4], &[0, 1, 2, 3]);
    assert_eq!(&data[4..8], &[0xee; 4]);
    assert_eq!(data[8], 8);
    assert_eq!(peer.seen.len(), 1);
    assert_eq!(xbar.stats().functional_hits(), 1);

    let mut miss = Transaction::read(RequestId(4), 0x800, 16);
    xbar.handle_functional(0, &mut miss, &mut peer).unwrap();
    assert_eq!(peer.seen.len(), 2);
}

#[test]
fn reset_restores_credits_and_clears_state() {
    let mut ctrl = Crossbar::new(controller(1));
    for i in 0..4u64 {
        accept(
            &mut ctrl,
            i * 10 * PERIOD,
            0,
            Transaction::writeback(RequestId(i), i * 64, vec![0; 64]),
        );
    }
    assert_eq!(ctrl.codec().unwrap().last_rollover(), 0);
    assert_eq!(ctrl.stats().data_flits(), 1);
    accept(&mut ctrl, 50 * PERIOD, 0, Transaction::writeback(RequestId(9), 0, vec![0; 64]));
    assert_eq!(ctrl.codec().unwrap().last_rollover(), 1);

    ctrl.reset();
    assert!(ctrl.is_quiescent());
    assert_eq!(ctrl.codec().unwrap().last_rollover(), 0);
    assert_eq!(ctrl.credits().remote(0).available(CreditClass::Response), 64);
    assert_eq!(ctrl.outstanding(Side::Downstream, 0), 0);
}
